//! Password-to-key algorithms for the Standard security handler (spec.md
//! §4.3), generalized from lopdf's `encryption::algorithms::PasswordAlgorithm`
//! (the R2-R4 MD5/RC4 ladder) and extended with ISO 32000-2's R6 SHA-2 ladder
//! (Algorithms 2.A/2.B/8/9/10/11/12/13), which lopdf does not implement.
//!
//! Low-level `authenticate_*` functions return `Ok(bool)` for a password
//! match/mismatch rather than an error: per spec.md §7 a wrong password is
//! not an exception, it is a `FAILED` auth status the caller (the security
//! handler) turns into its state-machine transition.

use crate::encodings;
use crate::error::{CryptoFormatError, HandlerError};
use crate::model::Document;
use crate::permissions::Permissions;
use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _};
use crate::crypto::Rc4;
use md5::{Digest as _, Md5};
use rand::Rng as _;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256EcbEnc = ecb::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

/// The 32-byte padding string Algorithm 2/3/4/5 pad short passwords with.
const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Holds the parsed `/Encrypt` dictionary fields and entry point for every
/// revision's key derivation / authentication algorithm.
#[derive(Clone, Debug, Default)]
pub struct PasswordAlgorithm {
    pub encrypt_metadata: bool,
    pub length: Option<usize>,
    pub version: i64,
    pub revision: i64,
    pub owner_value: Vec<u8>,
    pub owner_encrypted: Vec<u8>,
    pub user_value: Vec<u8>,
    pub user_encrypted: Vec<u8>,
    pub permissions: Permissions,
    pub permission_encrypted: Vec<u8>,
}

impl PasswordAlgorithm {
    /// Sanitizes a password for revisions up to R4: converts to
    /// PDFDocEncoding. PDF Algorithm 2, first step.
    pub fn sanitize_password_r4(&self, password: &str) -> Vec<u8> {
        encodings::string_to_bytes(password)
    }

    /// Sanitizes a password for R5/R6: SASLprep-normalizes the UTF-8 input.
    /// PDF Algorithm 2.A, first step.
    pub fn sanitize_password_r6(&self, password: &str) -> Result<Vec<u8>, HandlerError> {
        Ok(stringprep::saslprep(password)?.as_bytes().to_vec())
    }

    pub fn sanitize_password(&self, password: &str) -> Result<Vec<u8>, HandlerError> {
        match self.revision {
            2..=4 => Ok(self.sanitize_password_r4(password)),
            5..=6 => self.sanitize_password_r6(password),
            r => Err(HandlerError::PdfRead(format!("unsupported standard security handler revision {r}"))),
        }
    }

    /// PDF Algorithm 2: the file encryption key for R2-R4.
    pub fn compute_file_encryption_key_r4(&self, doc: &Document, password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let len = password.len().min(32);

        let mut hasher = Md5::new();
        hasher.update(&password[..len]);
        hasher.update(&PAD_BYTES[..32 - len]);
        hasher.update(&self.owner_value);
        hasher.update((self.permissions.bits() as u32).to_le_bytes());

        let file_id_0 = doc.first_id()?;
        hasher.update(file_id_0);

        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update(b"\xff\xff\xff\xff");
        }

        let mut hash = hasher.finalize();

        let n = if self.revision >= 3 { self.length.unwrap_or(40) / 8 } else { 5 };
        if n > 16 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]);
            }
        }

        Ok(hash[..n].to_vec())
    }

    /// PDF Algorithm 2.A: the file encryption key for R5/R6, recovered by
    /// trying the password against the owner branch, then the user branch.
    fn compute_file_encryption_key_r6(&self, password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let mut password = password;
        if password.len() > 127 {
            password = &password[..127];
        }

        let hashed_owner_password = &self.owner_value[0..32];
        let owner_validation_salt = &self.owner_value[32..40];
        let owner_key_salt = &self.owner_value[40..48];

        let hashed_user_password = &self.user_value[0..32];
        let user_validation_salt = &self.user_value[32..40];
        let user_key_salt = &self.user_value[40..48];

        if self.compute_hash(password, owner_validation_salt, Some(&self.user_value))? == hashed_owner_password {
            let hash = self.compute_hash(password, owner_key_salt, Some(&self.user_value))?;
            return Self::aes256_cbc_zero_iv_decrypt(&hash, &self.owner_encrypted);
        }

        if self.compute_hash(password, user_validation_salt, None)? == hashed_user_password {
            let hash = self.compute_hash(password, user_key_salt, None)?;
            let file_encryption_key = Self::aes256_cbc_zero_iv_decrypt(&hash, &self.user_encrypted)?;
            self.validate_permissions(&file_encryption_key)?;
            return Ok(file_encryption_key);
        }

        Err(HandlerError::PdfRead("password does not match either the owner or the user key".into()))
    }

    pub fn compute_file_encryption_key(&self, doc: &Document, password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        match self.revision {
            2..=4 => self.compute_file_encryption_key_r4(doc, password),
            5..=6 => self.compute_file_encryption_key_r6(password),
            r => Err(HandlerError::PdfRead(format!("unsupported standard security handler revision {r}"))),
        }
    }

    fn aes256_cbc_zero_iv_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HandlerError> {
        if key.len() != 32 || data.len() % 16 != 0 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }
        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(key);
        let iv = [0u8; 16];
        let mut out = data.to_vec();
        let mut decryptor = Aes256CbcDec::new(&key_arr.into(), &iv.into());
        for block in out.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
        Ok(out)
    }

    /// PDF Algorithm 2.B: the iterated SHA-2 hash ladder used throughout R6.
    fn compute_hash(&self, password: &[u8], salt: &[u8], user_key: Option<&[u8]>) -> Result<Vec<u8>, HandlerError> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_key) = user_key {
            hasher.update(user_key);
        }
        let mut k = hasher.finalize().to_vec();

        if self.revision == 5 {
            return Ok(k);
        }

        let mut round: u32 = 0;
        loop {
            round += 1;
            let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + user_key.map_or(0, <[u8]>::len)));
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                if let Some(user_key) = user_key {
                    k1.extend_from_slice(user_key);
                }
            }

            let key = &k[0..16];
            let iv = &k[16..32];
            let mut encryptor = Aes128CbcEnc::new(key.into(), iv.into());
            for block in k1.chunks_exact_mut(16) {
                encryptor.encrypt_block_mut(block.into());
            }
            let e = k1;

            k = match e[..16].iter().map(|v| *v as u32).sum::<u32>() % 3 {
                0 => Sha256::digest(&e).to_vec(),
                1 => Sha384::digest(&e).to_vec(),
                _ => Sha512::digest(&e).to_vec(),
            };

            if round >= 64 && e.last().copied().unwrap_or(0) as u32 <= round - 32 {
                break;
            }
        }

        k.truncate(32);
        Ok(k)
    }

    /// PDF Algorithm 3: the `/O` entry for R2-R4.
    pub fn compute_hashed_owner_password_r4(&self, owner_password: Option<&[u8]>, user_password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let password = owner_password.unwrap_or(user_password);
        let len = password.len().min(32);

        let mut hasher = Md5::new();
        hasher.update(&password[..len]);
        hasher.update(&PAD_BYTES[..32 - len]);
        let mut hash = hasher.finalize();

        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }

        let n = if self.revision >= 3 { self.length.unwrap_or(40) / 8 } else { 5 };
        if n > 16 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let len = user_password.len().min(32);
        let mut bytes = [0u8; 32];
        bytes[..len].copy_from_slice(&user_password[..len]);
        bytes[len..].copy_from_slice(&PAD_BYTES[..32 - len]);

        let mut result = Rc4::new(&hash[..n]).encrypt(bytes);

        if self.revision >= 3 {
            let mut key = vec![0u8; n];
            for i in 1..=19u8 {
                for (in_byte, out_byte) in hash[..n].iter().zip(key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                result = Rc4::new(&key).encrypt(&result);
            }
        }

        Ok(result)
    }

    /// PDF Algorithm 4: the `/U` entry for R2.
    pub fn compute_hashed_user_password_r2(&self, doc: &Document, user_password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let file_encryption_key = self.compute_file_encryption_key_r4(doc, user_password)?;
        Ok(Rc4::new(&file_encryption_key).encrypt(PAD_BYTES))
    }

    /// PDF Algorithm 5: the `/U` entry for R3/R4.
    pub fn compute_hashed_user_password_r3_r4(&self, doc: &Document, user_password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let file_encryption_key = self.compute_file_encryption_key_r4(doc, user_password)?;

        let mut hasher = Md5::new();
        hasher.update(PAD_BYTES);
        hasher.update(doc.first_id()?);
        let hash = hasher.finalize();

        let mut result = Rc4::new(&file_encryption_key).encrypt(hash);

        let mut key = vec![0u8; file_encryption_key.len()];
        for i in 1..=19u8 {
            for (in_byte, out_byte) in file_encryption_key.iter().zip(key.iter_mut()) {
                *out_byte = in_byte ^ i;
            }
            result = Rc4::new(&key).encrypt(&result);
        }

        result.resize(32, 0);
        rand::rng().fill(&mut result[16..]);
        Ok(result)
    }

    /// PDF Algorithm 6: validates a user password for R2-R4.
    fn authenticate_user_password_r4(&self, doc: &Document, user_password: &[u8]) -> Result<bool, HandlerError> {
        let hashed_user_password = match self.revision {
            2 => self.compute_hashed_user_password_r2(doc, user_password)?,
            3 | 4 => self.compute_hashed_user_password_r3_r4(doc, user_password)?,
            r => return Err(HandlerError::PdfRead(format!("unsupported standard security handler revision {r}"))),
        };

        let len = if self.revision >= 3 { 16 } else { hashed_user_password.len() };
        if self.user_value.len() < len {
            return Err(HandlerError::PdfRead("/U entry is too short for this revision".into()));
        }

        Ok(hashed_user_password[..len] == self.user_value[..len])
    }

    /// PDF Algorithm 7: recovers the user password from `/O` and validates it
    /// via Algorithm 6, for R2-R4 owner authentication.
    fn authenticate_owner_password_r4(&self, doc: &Document, owner_password: &[u8]) -> Result<bool, HandlerError> {
        let len = owner_password.len().min(32);

        let mut hasher = Md5::new();
        hasher.update(&owner_password[..len]);
        hasher.update(&PAD_BYTES[..32 - len]);
        let mut hash = hasher.finalize();

        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }

        let n = if self.revision >= 3 { self.length.unwrap_or(40) / 8 } else { 5 };
        if n > 16 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let mut result = self.owner_value.to_vec();

        if self.revision >= 3 {
            let mut key = vec![0u8; n];
            for i in (1..=19u8).rev() {
                for (in_byte, out_byte) in hash[..n].iter().zip(key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                result = Rc4::new(&key).decrypt(&result);
            }
        }

        result = Rc4::new(&hash[..n]).decrypt(&result);

        self.authenticate_user_password_r4(doc, &result)
    }

    /// PDF Algorithm 8: the `/U`/`/UE` pair for R6.
    pub fn compute_hashed_user_password_r6(&self, file_encryption_key: &[u8], user_password: &[u8]) -> Result<(Vec<u8>, Vec<u8>), HandlerError> {
        let mut user_value = [0u8; 48];
        rand::rng().fill(&mut user_value[32..]);

        let user_validation_salt = user_value[32..40].to_vec();
        let hashed_user_password = self.compute_hash(user_password, &user_validation_salt, None)?;
        user_value[..32].copy_from_slice(&hashed_user_password);

        let user_key_salt = user_value[40..48].to_vec();
        let hash = self.compute_hash(user_password, &user_key_salt, None)?;

        let user_encrypted = Self::aes256_cbc_zero_iv_encrypt(&hash, file_encryption_key)?;
        Ok((user_value.to_vec(), user_encrypted))
    }

    /// PDF Algorithm 9: the `/O`/`/OE` pair for R6.
    pub fn compute_hashed_owner_password_r6(&self, file_encryption_key: &[u8], owner_password: &[u8]) -> Result<(Vec<u8>, Vec<u8>), HandlerError> {
        let mut owner_value = [0u8; 48];
        rand::rng().fill(&mut owner_value[32..]);

        let owner_validation_salt = owner_value[32..40].to_vec();
        let hashed_owner_password = self.compute_hash(owner_password, &owner_validation_salt, Some(&self.user_value))?;
        owner_value[..32].copy_from_slice(&hashed_owner_password);

        let owner_key_salt = owner_value[40..48].to_vec();
        let hash = self.compute_hash(owner_password, &owner_key_salt, Some(&self.user_value))?;

        let owner_encrypted = Self::aes256_cbc_zero_iv_encrypt(&hash, file_encryption_key)?;
        Ok((owner_value.to_vec(), owner_encrypted))
    }

    fn aes256_cbc_zero_iv_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HandlerError> {
        if key.len() != 32 || data.len() % 16 != 0 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }
        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(key);
        let iv = [0u8; 16];
        let mut out = data.to_vec();
        let mut encryptor = Aes256CbcEnc::new(&key_arr.into(), &iv.into());
        for block in out.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
        Ok(out)
    }

    /// PDF Algorithm 10: the `/Perms` block.
    pub fn compute_permissions(&self, file_encryption_key: &[u8]) -> Result<Vec<u8>, HandlerError> {
        if file_encryption_key.len() != 32 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.permissions.bits().to_le_bytes());
        bytes[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        bytes[9..12].copy_from_slice(b"adb");
        rand::rng().fill(&mut bytes[12..16]);

        let mut key = [0u8; 32];
        key.copy_from_slice(file_encryption_key);
        let mut encryptor = Aes256EcbEnc::new(&key.into());
        for block in bytes.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }

        Ok(bytes.to_vec())
    }

    /// PDF Algorithm 11: validates a user password for R6.
    fn authenticate_user_password_r6(&self, user_password: &[u8]) -> Result<bool, HandlerError> {
        let mut user_password = user_password;
        if user_password.len() > 127 {
            user_password = &user_password[..127];
        }

        let hashed_user_password = &self.user_value[0..32];
        let user_validation_salt = self.user_value[32..40].to_vec();

        Ok(self.compute_hash(user_password, &user_validation_salt, None)? == hashed_user_password)
    }

    /// PDF Algorithm 12: validates an owner password for R6.
    fn authenticate_owner_password_r6(&self, owner_password: &[u8]) -> Result<bool, HandlerError> {
        let mut owner_password = owner_password;
        if owner_password.len() > 127 {
            owner_password = &owner_password[..127];
        }

        let hashed_owner_password = &self.owner_value[0..32];
        let owner_validation_salt = self.owner_value[32..40].to_vec();

        Ok(self.compute_hash(owner_password, &owner_validation_salt, Some(&self.user_value))? == hashed_owner_password)
    }

    /// PDF Algorithm 13: validates `/Perms` against the recovered file key.
    fn validate_permissions(&self, file_encryption_key: &[u8]) -> Result<(), HandlerError> {
        if self.permission_encrypted.len() != 16 || file_encryption_key.len() != 32 {
            return Err(CryptoFormatError::InvalidKeyLength.into());
        }

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.permission_encrypted);

        let mut key = [0u8; 32];
        key.copy_from_slice(file_encryption_key);
        let mut decryptor = Aes256EcbDec::new(&key.into());
        for block in bytes.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }

        if &bytes[9..12] != b"adb" {
            return Err(HandlerError::PdfRead("/Perms block failed the 'adb' sentinel check".into()));
        }

        if bytes[..4] != self.permissions.bits().to_le_bytes()[..4] {
            return Err(HandlerError::PdfRead("/Perms block does not match the /P entry".into()));
        }

        if bytes[8] != if self.encrypt_metadata { b'T' } else { b'F' } {
            return Err(HandlerError::PdfRead("/Perms block does not match /EncryptMetadata".into()));
        }

        Ok(())
    }

    /// Validates a user password against this algorithm's stored `/U` value,
    /// dispatching to Algorithm 6 or 11 by revision.
    pub fn authenticate_user_password(&self, doc: &Document, user_password: &[u8]) -> Result<bool, HandlerError> {
        match self.revision {
            2..=4 => self.authenticate_user_password_r4(doc, user_password),
            5..=6 => self.authenticate_user_password_r6(user_password),
            r => Err(HandlerError::PdfRead(format!("unsupported standard security handler revision {r}"))),
        }
    }

    /// Validates an owner password, dispatching to Algorithm 7 or 12.
    pub fn authenticate_owner_password(&self, doc: &Document, owner_password: &[u8]) -> Result<bool, HandlerError> {
        match self.revision {
            2..=4 => self.authenticate_owner_password_r4(doc, owner_password),
            5..=6 => self.authenticate_owner_password_r6(owner_password),
            r => Err(HandlerError::PdfRead(format!("unsupported standard security handler revision {r}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dictionary, Object};

    fn document_with_id() -> Document {
        let mut doc = Document::new();
        doc.trailer.set(
            "ID",
            Object::Array(vec![Object::string_literal(b"0123456789abcdef".to_vec())]),
        );
        doc
    }

    #[test]
    fn r4_owner_and_user_passwords_authenticate_and_reject_swap() {
        let document = document_with_id();
        let mut algorithm = PasswordAlgorithm {
            encrypt_metadata: true,
            length: Some(128),
            version: 4,
            revision: 4,
            permissions: Permissions::all().correct_bits(),
            ..Default::default()
        };

        let owner_password = algorithm.sanitize_password_r4("owner");
        let user_password = algorithm.sanitize_password_r4("user");

        algorithm.owner_value = algorithm
            .compute_hashed_owner_password_r4(Some(&owner_password), &user_password)
            .unwrap();
        algorithm.user_value = algorithm
            .compute_hashed_user_password_r3_r4(&document, &user_password)
            .unwrap();

        assert!(algorithm.authenticate_owner_password(&document, &owner_password).unwrap());
        assert!(algorithm.authenticate_user_password(&document, &user_password).unwrap());
        assert!(!algorithm.authenticate_owner_password(&document, &user_password).unwrap());
        assert!(!algorithm.authenticate_user_password(&document, &owner_password).unwrap());
    }

    #[test]
    fn r6_owner_and_user_key_recovery_round_trips() {
        let mut algorithm = PasswordAlgorithm {
            encrypt_metadata: true,
            version: 5,
            revision: 6,
            permissions: Permissions::all().correct_bits(),
            ..Default::default()
        };

        let owner_password = algorithm.sanitize_password_r6("owner").unwrap();
        let user_password = algorithm.sanitize_password_r6("user").unwrap();

        let mut file_encryption_key = [0u8; 32];
        rand::rng().fill(&mut file_encryption_key);

        let (user_value, user_encrypted) = algorithm.compute_hashed_user_password_r6(&file_encryption_key, &user_password).unwrap();
        algorithm.user_value = user_value;
        algorithm.user_encrypted = user_encrypted;

        let (owner_value, owner_encrypted) = algorithm.compute_hashed_owner_password_r6(&file_encryption_key, &owner_password).unwrap();
        algorithm.owner_value = owner_value;
        algorithm.owner_encrypted = owner_encrypted;

        algorithm.permission_encrypted = algorithm.compute_permissions(&file_encryption_key).unwrap();

        assert!(algorithm.authenticate_owner_password_r6(&owner_password).unwrap());
        assert!(algorithm.authenticate_user_password_r6(&user_password).unwrap());
        assert!(!algorithm.authenticate_owner_password_r6(&user_password).unwrap());

        assert!(algorithm.validate_permissions(&file_encryption_key).is_ok());

        let recovered_via_owner = algorithm.compute_file_encryption_key_r6(&owner_password).unwrap();
        assert_eq!(recovered_via_owner, file_encryption_key);

        let recovered_via_user = algorithm.compute_file_encryption_key_r6(&user_password).unwrap();
        assert_eq!(recovered_via_user, file_encryption_key);
    }
}
