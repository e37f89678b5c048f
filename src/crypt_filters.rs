//! Crypt filters (spec.md §4.2): per-object encryption engines. The standard
//! (RC4/AES) variants are a direct generalization of lopdf's
//! `encryption::crypt_filters`; the pubkey variants are new, grounded on the
//! envelope machinery in [`crate::envelope`].

use crate::context::{AuthLatch, HandlerContext};
use crate::crypto::{Pkcs5, Rc4};
use crate::envelope::{self, PrivateKeyDecrypter};
use crate::error::{CryptoFormatError, HandlerError};
use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _};
use md5::{Digest as _, Md5};
use rand::Rng as _;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use std::sync::RwLock;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// `/CFM` method names (spec.md §4.2, §6.1).
pub mod method {
    pub const NONE: &[u8] = b"None";
    pub const V2: &[u8] = b"V2";
    pub const AESV2: &[u8] = b"AESV2";
    pub const AESV3: &[u8] = b"AESV3";
}

/// Common interface every crypt filter implements, regardless of whether its
/// shared key comes from a password-derived file key or a CMS envelope.
pub trait CryptFilter: std::fmt::Debug + Send + Sync {
    /// `/CFM` name this filter serializes under.
    fn method(&self) -> &'static [u8];

    /// Shared-key length in bytes. `0` for the identity filter.
    fn keylen(&self) -> usize;

    /// Per-object key, derived from the shared key plus object/generation
    /// number (PDF Algorithm 1) for `/V2`/`/AESV2`, or just the shared key
    /// unchanged for `/AESV3` and identity.
    fn derive_object_key(&self, obj_num: u32, gen: u16) -> Result<Vec<u8>, HandlerError>;

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError>;
    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError>;

    /// Identity filters raise rather than appear in a serialized `/CF`
    /// dictionary (spec.md §3).
    fn check_serializable(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> &'static [u8] {
        method::NONE
    }

    fn keylen(&self) -> usize {
        0
    }

    fn derive_object_key(&self, _obj_num: u32, _gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(Vec::new())
    }

    fn encrypt(&self, _obj_num: u32, _gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _obj_num: u32, _gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        Ok(ciphertext.to_vec())
    }

    fn check_serializable(&self) -> Result<(), HandlerError> {
        Err(HandlerError::Pdf("the identity crypt filter cannot be serialized into an /Encrypt dictionary".into()))
    }
}

/// Shared PDF Algorithm 1 (per-object key for `/V2`/`/AESV2`).
fn derive_object_key_algorithm_1(shared_key: &[u8], obj_num: u32, gen: u16, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(shared_key);
    hasher.update(&obj_num.to_le_bytes()[..3]);
    hasher.update(&gen.to_le_bytes()[..2]);
    if aes {
        hasher.update(b"sAlT");
    }
    let n = (shared_key.len() + 5).min(16);
    hasher.finalize()[..n].to_vec()
}

#[derive(Clone, Debug)]
pub struct StandardRc4CryptFilter {
    shared_key: Vec<u8>,
}

impl StandardRc4CryptFilter {
    pub fn from_handler_context(ctx: &HandlerContext) -> Self {
        StandardRc4CryptFilter { shared_key: ctx.file_key.clone() }
    }
}

impl CryptFilter for StandardRc4CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::V2
    }

    fn keylen(&self) -> usize {
        self.shared_key.len()
    }

    fn derive_object_key(&self, obj_num: u32, gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(derive_object_key_algorithm_1(&self.shared_key, obj_num, gen, false))
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        Ok(Rc4::new(&key).encrypt(plaintext))
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        Ok(Rc4::new(&key).decrypt(ciphertext))
    }
}

#[derive(Clone, Debug)]
pub struct StandardAes128CryptFilter {
    shared_key: Vec<u8>,
}

impl StandardAes128CryptFilter {
    pub fn from_handler_context(ctx: &HandlerContext) -> Self {
        StandardAes128CryptFilter { shared_key: ctx.file_key.clone() }
    }
}

impl CryptFilter for StandardAes128CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::AESV2
    }

    fn keylen(&self) -> usize {
        self.shared_key.len()
    }

    fn derive_object_key(&self, obj_num: u32, gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(derive_object_key_algorithm_1(&self.shared_key, obj_num, gen, true))
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        if key.len() != 16 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let ciphertext_len = (plaintext.len() + 16) / 16 * 16;
        let mut ciphertext = Vec::with_capacity(16 + ciphertext_len);

        let mut iv = [0u8; 16];
        rand::rng().fill(&mut iv);

        ciphertext.extend_from_slice(&iv);
        ciphertext.extend_from_slice(plaintext);
        ciphertext.resize(16 + ciphertext_len, 0);

        Aes128CbcEnc::new(key.as_slice().into(), &iv.into())
            .encrypt_padded_mut::<Pkcs5>(&mut ciphertext[16..], plaintext.len())
            .map_err(|_| CryptoFormatError::Padding)?;

        Ok(ciphertext)
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        if key.len() != 16 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        if ciphertext.len() % 16 != 0 {
            return Err(CryptoFormatError::InvalidCipherTextLength.into());
        }

        if ciphertext.len() <= 16 {
            return Ok(Vec::new());
        }

        let mut iv = [0u8; 16];
        iv.copy_from_slice(&ciphertext[..16]);

        let mut data = ciphertext[16..].to_vec();
        let plaintext = Aes128CbcDec::new(key.as_slice().into(), &iv.into())
            .decrypt_padded_mut::<Pkcs5>(&mut data)
            .map_err(|_| CryptoFormatError::Padding)?;

        Ok(plaintext.to_vec())
    }
}

#[derive(Clone, Debug)]
pub struct StandardAes256CryptFilter {
    shared_key: Vec<u8>,
}

impl StandardAes256CryptFilter {
    pub fn from_handler_context(ctx: &HandlerContext) -> Self {
        StandardAes256CryptFilter { shared_key: ctx.file_key.clone() }
    }
}

impl CryptFilter for StandardAes256CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::AESV3
    }

    fn keylen(&self) -> usize {
        self.shared_key.len()
    }

    /// `/AESV3` is object-key-independent: the shared (file) key is used
    /// directly (spec.md §4.2).
    fn derive_object_key(&self, _obj_num: u32, _gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(self.shared_key.clone())
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        if key.len() != 32 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let ciphertext_len = (plaintext.len() + 16) / 16 * 16;
        let mut ciphertext = Vec::with_capacity(16 + ciphertext_len);

        let mut iv = [0u8; 16];
        rand::rng().fill(&mut iv);

        ciphertext.extend_from_slice(&iv);
        ciphertext.extend_from_slice(plaintext);
        ciphertext.resize(16 + ciphertext_len, 0);

        Aes256CbcEnc::new(key.as_slice().into(), &iv.into())
            .encrypt_padded_mut::<Pkcs5>(&mut ciphertext[16..], plaintext.len())
            .map_err(|_| CryptoFormatError::Padding)?;

        Ok(ciphertext)
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        if key.len() != 32 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        if ciphertext.len() % 16 != 0 {
            return Err(CryptoFormatError::InvalidCipherTextLength.into());
        }

        if ciphertext.len() <= 16 {
            return Ok(Vec::new());
        }

        let mut iv = [0u8; 16];
        iv.copy_from_slice(&ciphertext[..16]);

        let mut data = ciphertext[16..].to_vec();
        let plaintext = Aes256CbcDec::new(key.as_slice().into(), &iv.into())
            .decrypt_padded_mut::<Pkcs5>(&mut data)
            .map_err(|_| CryptoFormatError::Padding)?;

        Ok(plaintext.to_vec())
    }
}

/// Which hash PDF uses to turn a pubkey filter's seed into a shared key
/// (spec.md §4.2: SHA-1 for AES-128/RC4, SHA-256 for AES-256).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SeedHash {
    Sha1,
    Sha256,
}

fn hash_seed(hash: SeedHash, seed: &[u8], recipients: &[Vec<u8>], encrypt_metadata: bool, keylen: usize) -> Vec<u8> {
    let mut digest = match hash {
        SeedHash::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(seed);
            for recipient in recipients {
                hasher.update(recipient);
            }
            if !encrypt_metadata {
                hasher.update(0xFFFFFFFFu32.to_le_bytes());
            }
            hasher.finalize().to_vec()
        }
        SeedHash::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            for recipient in recipients {
                hasher.update(recipient);
            }
            if !encrypt_metadata {
                hasher.update(0xFFFFFFFFu32.to_le_bytes());
            }
            hasher.finalize().to_vec()
        }
    };
    digest.truncate(keylen);
    digest
}

/// State shared by every pubkey crypt filter: the raw CMS `EnvelopedData`
/// bytes (one per recipient added) and the key derived once `authenticate`
/// succeeds.
#[derive(Debug)]
struct PubKeyState {
    recipients: RwLock<Vec<Vec<u8>>>,
    shared_key: RwLock<Option<Vec<u8>>>,
    serialized: RwLock<bool>,
    auth_latch: AuthLatch,
    encrypt_metadata: bool,
    expected_permissions: i32,
}

impl PubKeyState {
    fn new(encrypt_metadata: bool, auth_latch: AuthLatch, expected_permissions: i32) -> Self {
        PubKeyState {
            recipients: RwLock::new(Vec::new()),
            shared_key: RwLock::new(None),
            serialized: RwLock::new(false),
            auth_latch,
            encrypt_metadata,
            expected_permissions,
        }
    }

    /// `add_recipients` is permitted only before serialization and, for
    /// per-filter (non-default) filters, only once (spec.md §4.2;
    /// SPEC_FULL.md §2 distinguishes this from the handler-level S5
    /// `add_recipients` no-op-on-repeat rule).
    fn add_recipient(&self, envelope_der: Vec<u8>) -> Result<(), HandlerError> {
        if *self.serialized.read().unwrap() {
            return Err(HandlerError::Pdf("cannot add a recipient to a crypt filter that has already been serialized".into()));
        }
        let mut recipients = self.recipients.write().unwrap();
        if !recipients.is_empty() {
            return Err(HandlerError::Pdf("this crypt filter's recipient list has already been set once".into()));
        }
        recipients.push(envelope_der);
        Ok(())
    }

    fn mark_serialized(&self) {
        *self.serialized.write().unwrap() = true;
    }

    fn shared_key(&self) -> Result<Vec<u8>, HandlerError> {
        if self.auth_latch.has_failed() {
            return Err(HandlerError::PdfRead("authentication previously failed for this crypt filter".into()));
        }
        self.shared_key.read().unwrap().clone().ok_or_else(|| {
            HandlerError::PdfRead("this crypt filter has not been authenticated yet".into())
        })
    }

    fn authenticate(&self, decrypter: &PrivateKeyDecrypter, hash: SeedHash, keylen: usize) -> Result<(), HandlerError> {
        let recipients = self.recipients.read().unwrap().clone();
        let recipient_bytes: Vec<Vec<u8>> = recipients.clone();

        let mut last_err = None;
        for envelope_der in &recipients {
            match envelope::open_envelope(envelope_der, decrypter) {
                Ok((seed, perms)) => {
                    if perms != self.expected_permissions {
                        last_err = Some(HandlerError::PdfRead(
                            "recipient envelope's permission bytes do not match the /P value in the encryption dictionary".into(),
                        ));
                        continue;
                    }
                    let key = hash_seed(hash, &seed, &recipient_bytes, self.encrypt_metadata, keylen);
                    *self.shared_key.write().unwrap() = Some(key);
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }

        self.auth_latch.fail();
        Err(last_err.unwrap_or_else(|| HandlerError::PdfRead("no recipient envelope matched the supplied private key".into())))
    }
}

macro_rules! pubkey_filter {
    ($name:ident, $method:expr, $hash:expr) => {
        #[derive(Debug)]
        pub struct $name {
            state: PubKeyState,
            keylen: usize,
        }

        impl $name {
            pub fn new(encrypt_metadata: bool, keylen: usize, auth_latch: AuthLatch, expected_permissions: i32) -> Self {
                $name { state: PubKeyState::new(encrypt_metadata, auth_latch, expected_permissions), keylen }
            }

            pub fn add_recipient(&self, envelope_der: Vec<u8>) -> Result<(), HandlerError> {
                self.state.add_recipient(envelope_der)
            }

            pub fn mark_serialized(&self) {
                self.state.mark_serialized();
            }

            /// Finds the recipient envelope the given private key can open
            /// and derives this filter's shared key from its seed.
            pub fn authenticate(&self, decrypter: &PrivateKeyDecrypter) -> Result<(), HandlerError> {
                self.state.authenticate(decrypter, $hash, self.keylen)
            }
        }
    };
}

pubkey_filter!(PubKeyRc4CryptFilter, method::V2, SeedHash::Sha1);
pubkey_filter!(PubKeyAes128CryptFilter, method::AESV2, SeedHash::Sha1);
pubkey_filter!(PubKeyAes256CryptFilter, method::AESV3, SeedHash::Sha256);

impl CryptFilter for PubKeyRc4CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::V2
    }

    fn keylen(&self) -> usize {
        self.keylen
    }

    fn derive_object_key(&self, obj_num: u32, gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(derive_object_key_algorithm_1(&self.state.shared_key()?, obj_num, gen, false))
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        Ok(Rc4::new(&key).encrypt(plaintext))
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        Ok(Rc4::new(&key).decrypt(ciphertext))
    }
}

impl CryptFilter for PubKeyAes128CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::AESV2
    }

    fn keylen(&self) -> usize {
        self.keylen
    }

    fn derive_object_key(&self, obj_num: u32, gen: u16) -> Result<Vec<u8>, HandlerError> {
        Ok(derive_object_key_algorithm_1(&self.state.shared_key()?, obj_num, gen, true))
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        aes128_cbc_encrypt(&key, plaintext)
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        aes128_cbc_decrypt(&key, ciphertext)
    }
}

impl CryptFilter for PubKeyAes256CryptFilter {
    fn method(&self) -> &'static [u8] {
        method::AESV3
    }

    fn keylen(&self) -> usize {
        self.keylen
    }

    fn derive_object_key(&self, _obj_num: u32, _gen: u16) -> Result<Vec<u8>, HandlerError> {
        self.state.shared_key()
    }

    fn encrypt(&self, obj_num: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        aes256_cbc_encrypt(&key, plaintext)
    }

    fn decrypt(&self, obj_num: u32, gen: u16, ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let key = self.derive_object_key(obj_num, gen)?;
        aes256_cbc_decrypt(&key, ciphertext)
    }
}

fn aes128_cbc_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
    if key.len() != 16 {
        return Err(CryptoFormatError::InvalidKeyLength.into());
    }
    let ciphertext_len = (plaintext.len() + 16) / 16 * 16;
    let mut ciphertext = Vec::with_capacity(16 + ciphertext_len);
    let mut iv = [0u8; 16];
    rand::rng().fill(&mut iv);
    ciphertext.extend_from_slice(&iv);
    ciphertext.extend_from_slice(plaintext);
    ciphertext.resize(16 + ciphertext_len, 0);
    Aes128CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_mut::<Pkcs5>(&mut ciphertext[16..], plaintext.len())
        .map_err(|_| CryptoFormatError::Padding)?;
    Ok(ciphertext)
}

fn aes128_cbc_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
    if key.len() != 16 {
        return Err(CryptoFormatError::InvalidKeyLength.into());
    }
    if ciphertext.len() % 16 != 0 {
        return Err(CryptoFormatError::InvalidCipherTextLength.into());
    }
    if ciphertext.len() <= 16 {
        return Ok(Vec::new());
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&ciphertext[..16]);
    let mut data = ciphertext[16..].to_vec();
    let plaintext = Aes128CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs5>(&mut data)
        .map_err(|_| CryptoFormatError::Padding)?;
    Ok(plaintext.to_vec())
}

fn aes256_cbc_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, HandlerError> {
    if key.len() != 32 {
        return Err(CryptoFormatError::InvalidKeyLength.into());
    }
    let ciphertext_len = (plaintext.len() + 16) / 16 * 16;
    let mut ciphertext = Vec::with_capacity(16 + ciphertext_len);
    let mut iv = [0u8; 16];
    rand::rng().fill(&mut iv);
    ciphertext.extend_from_slice(&iv);
    ciphertext.extend_from_slice(plaintext);
    ciphertext.resize(16 + ciphertext_len, 0);
    Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_mut::<Pkcs5>(&mut ciphertext[16..], plaintext.len())
        .map_err(|_| CryptoFormatError::Padding)?;
    Ok(ciphertext)
}

fn aes256_cbc_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, HandlerError> {
    if key.len() != 32 {
        return Err(CryptoFormatError::InvalidKeyLength.into());
    }
    if ciphertext.len() % 16 != 0 {
        return Err(CryptoFormatError::InvalidCipherTextLength.into());
    }
    if ciphertext.len() <= 16 {
        return Ok(Vec::new());
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&ciphertext[..16]);
    let mut data = ciphertext[16..].to_vec();
    let plaintext = Aes256CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs5>(&mut data)
        .map_err(|_| CryptoFormatError::Padding)?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(key: Vec<u8>) -> HandlerContext {
        HandlerContext { file_key: key, encrypt_metadata: true, version: 4 }
    }

    #[test]
    fn identity_filter_round_trips_and_refuses_serialization() {
        let filter = IdentityCryptFilter;
        let data = b"0 1 0 rg /a0 gs";
        let encrypted = filter.encrypt(7, 0, data).unwrap();
        assert_eq!(encrypted, data);
        assert_eq!(filter.decrypt(7, 0, &encrypted).unwrap(), data);
        assert!(filter.check_serializable().is_err());
    }

    #[test]
    fn rc4_filter_round_trips() {
        let filter = StandardRc4CryptFilter::from_handler_context(&ctx(vec![1, 2, 3, 4, 5]));
        let plaintext = b"hello, world";
        let ciphertext = filter.encrypt(3, 0, plaintext).unwrap();
        assert_eq!(filter.decrypt(3, 0, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn aes128_filter_round_trips_with_random_iv() {
        let filter = StandardAes128CryptFilter::from_handler_context(&ctx(vec![9u8; 16]));
        let plaintext = b"some stream content, not block aligned";
        let ciphertext = filter.encrypt(12, 0, plaintext).unwrap();
        assert_eq!(filter.decrypt(12, 0, &ciphertext).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn aes256_filter_object_key_ignores_obj_and_gen() {
        let filter = StandardAes256CryptFilter::from_handler_context(&ctx(vec![7u8; 32]));
        assert_eq!(filter.derive_object_key(1, 0).unwrap(), filter.derive_object_key(99, 3).unwrap());

        let plaintext = b"metadata-free object body";
        let ciphertext = filter.encrypt(1, 0, plaintext).unwrap();
        assert_eq!(filter.decrypt(5, 2, &ciphertext).unwrap(), plaintext.to_vec());
    }
}
