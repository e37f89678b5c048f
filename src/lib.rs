#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

//! `pdfcrypt`: the PDF security handler core — `/Encrypt` dictionary
//! parsing and serialization, crypt filters, and the Standard
//! (password-based) and public-key security handlers. Generalized from
//! lopdf's `encryption` module (see `TEACHER.txt`, `DESIGN.md`).

#[macro_use]
mod model;
pub use crate::model::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

pub mod context;
pub mod credential;
pub mod crypt_filter_config;
pub mod crypt_filters;
mod crypto;
mod encodings;
pub mod envelope;
pub mod error;
mod object_crypt;
pub mod password_algorithm;
pub mod permissions;
pub mod registry;
pub mod security_handler;

pub use context::{AuthLatch, HandlerContext};
pub use credential::{Credential, SerialisedCredential};
pub use crypt_filter_config::CryptFilterConfiguration;
pub use envelope::PrivateKeyDecrypter;
pub use error::{HandlerError, Result};
pub use object_crypt::{decrypt_object, encrypt_object};
pub use password_algorithm::PasswordAlgorithm;
pub use permissions::Permissions;
pub use registry::{HandlerKind, HandlerRegistry};
pub use security_handler::{AuthResult, AuthStatus, HandlerVersion, PubKeySecurityHandler, PubKeySubFilter, StandardSecurityHandler};

/// The two concrete security handler variants, dispatched by `/Filter`
/// (spec.md §9's tagged sum in place of the source's class hierarchy).
#[derive(Debug)]
pub enum SecurityHandler {
    Standard(StandardSecurityHandler),
    PubKey(PubKeySecurityHandler),
}

impl SecurityHandler {
    /// Dispatches on `/Filter` (falling back to `/SubFilter` when `/Filter`
    /// is non-standard, spec.md §9 Open Question (b) / `test_pubkey_alternative_filter`)
    /// and parses the `/Encrypt` dictionary into the matching handler.
    pub fn build(encrypt_dict: &Dictionary, document_id: Option<&[u8]>, registry: &HandlerRegistry) -> Result<Self> {
        let filter_name = encrypt_dict
            .get(b"Filter")
            .ok()
            .and_then(Object::as_name)
            .map(|name| String::from_utf8_lossy(name).into_owned());

        let registered = filter_name.as_deref().and_then(|name| registry.lookup(name).ok());
        let kind = match registered {
            Some(kind) => kind,
            None if encrypt_dict.has(b"SubFilter") => HandlerKind::PubKey,
            None => match filter_name {
                Some(name) => return Err(HandlerError::PdfRead(format!("no handler registered for /Filter {name:?}"))),
                None => return Err(HandlerError::PdfRead("/Encrypt dictionary is missing /Filter".into())),
            },
        };

        match kind {
            HandlerKind::Standard => Ok(SecurityHandler::Standard(StandardSecurityHandler::build(encrypt_dict, document_id)?)),
            HandlerKind::PubKey => Ok(SecurityHandler::PubKey(PubKeySecurityHandler::build(encrypt_dict)?)),
        }
    }

    pub fn crypt_filter_config(&self) -> &CryptFilterConfiguration {
        match self {
            SecurityHandler::Standard(handler) => handler.crypt_filter_config(),
            SecurityHandler::PubKey(handler) => handler.crypt_filter_config(),
        }
    }

    pub fn auth_latch(&self) -> &AuthLatch {
        match self {
            SecurityHandler::Standard(handler) => handler.auth_latch(),
            SecurityHandler::PubKey(handler) => handler.auth_latch(),
        }
    }

    pub fn is_auth_failed(&self) -> bool {
        match self {
            SecurityHandler::Standard(handler) => handler.is_auth_failed(),
            SecurityHandler::PubKey(handler) => handler.is_auth_failed(),
        }
    }

    pub fn as_pdf_object(&self) -> Result<Dictionary> {
        match self {
            SecurityHandler::Standard(handler) => handler.as_pdf_object(),
            SecurityHandler::PubKey(handler) => handler.as_pdf_object(),
        }
    }
}
