use thiserror::Error;

/// Errors surfaced by the object-model boundary (the minimal stand-in for the
/// generic PDF reader/writer, which this crate treats as an external
/// collaborator).
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("missing dictionary key: {0}")]
    MissingKey(String),
    #[error("wrong object type for key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Primitive-level cryptographic failures: bad padding, truncated key wrap,
/// wrong IV/key lengths. These never carry key material.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoFormatError {
    #[error("invalid padding encountered while decrypting; the key is likely incorrect")]
    Padding,
    #[error("ciphertext length is not a multiple of the block size")]
    InvalidCipherTextLength,
    #[error("key length does not match what this primitive requires")]
    InvalidKeyLength,
    #[error("key wrap input is truncated or malformed")]
    InvalidWrapData,
}

/// The error taxonomy from spec.md §7, one variant family per kind.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("malformed /Encrypt dictionary: {0}")]
    PdfRead(String),
    #[error("cannot write: {0}")]
    PdfWrite(String),
    #[error("crypt filter '{0}' referenced by a stream is not present in the configuration")]
    PdfStream(String),
    #[error("{0}")]
    Pdf(String),
    #[error("unknown /CFM method: {0}")]
    NotImplemented(String),
    #[error("Cipher {0} not allowed for CMS content encryption")]
    CipherNotAllowed(String),
    #[error(transparent)]
    Crypto(#[from] CryptoFormatError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    StringPrep(#[from] stringprep::Error),
}

pub type Result<T, E = HandlerError> = std::result::Result<T, E>;
