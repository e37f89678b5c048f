//! Security handlers (spec.md §4.3, §4.4, §9): the policy objects that own
//! the file-wide key, authenticate credentials, and build/parse the
//! `/Encrypt` dictionary. Generalizes lopdf's `EncryptionState` into the
//! tagged `Standard | PubKey` sum the source's class hierarchy called for.

use crate::context::{AuthLatch, HandlerContext};
use crate::credential::Credential;
use crate::crypt_filter_config::{CryptFilterConfiguration, IDENTITY_NAME};
use crate::crypt_filters::{
    CryptFilter, IdentityCryptFilter, PubKeyAes128CryptFilter, PubKeyAes256CryptFilter, PubKeyRc4CryptFilter,
    StandardAes128CryptFilter, StandardAes256CryptFilter, StandardRc4CryptFilter, method,
};
use crate::envelope::{self, PrivateKeyDecrypter};
use crate::error::HandlerError;
use crate::model::{Dictionary, Document, Object};
use crate::password_algorithm::PasswordAlgorithm;
use crate::permissions::Permissions;
use rand::Rng as _;
use std::sync::Arc;

/// Security-handler version (spec.md §3, `/V`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerVersion {
    Rc4_40,
    Rc4LongerKeys,
    Rc4OrAes128,
    Aes256,
    Other(i64),
}

impl HandlerVersion {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => HandlerVersion::Rc4_40,
            2 => HandlerVersion::Rc4LongerKeys,
            4 => HandlerVersion::Rc4OrAes128,
            5 => HandlerVersion::Aes256,
            other => HandlerVersion::Other(other),
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            HandlerVersion::Rc4_40 => 1,
            HandlerVersion::Rc4LongerKeys => 2,
            HandlerVersion::Rc4OrAes128 => 4,
            HandlerVersion::Aes256 => 5,
            HandlerVersion::Other(v) => v,
        }
    }

    /// `check_key_length` (spec.md §3, §9 open question (a)): `RC4_40` and
    /// `AES256` silently coerce the requested length; the two middle
    /// variants reject anything outside 5-16 bytes.
    pub fn check_key_length(self, requested_bytes: usize) -> Result<usize, HandlerError> {
        match self {
            HandlerVersion::Rc4_40 => Ok(5),
            HandlerVersion::Rc4LongerKeys | HandlerVersion::Rc4OrAes128 => {
                if (5..=16).contains(&requested_bytes) {
                    Ok(requested_bytes)
                } else {
                    Err(HandlerError::PdfRead(format!(
                        "key length {requested_bytes} bytes is out of range 5-16 for this handler version"
                    )))
                }
            }
            HandlerVersion::Aes256 => Ok(32),
            HandlerVersion::Other(v) => Err(HandlerError::NotImplemented(format!("unsupported handler version /V {v}"))),
        }
    }
}

/// Outcome of `Handler::authenticate` (spec.md §3, §7: not an exception).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    User,
    Owner,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResult {
    pub status: AuthStatus,
    /// Present only when `status == User`; `None` for owner auth ("all
    /// permissions") and for `Failed`.
    pub permission_flags: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandlerState {
    Uninitialized,
    Authenticated(AuthStatus),
    AuthFailed,
}

/// Password-based security handler (spec.md §4.3).
#[derive(Debug)]
pub struct StandardSecurityHandler {
    version: HandlerVersion,
    algorithm: PasswordAlgorithm,
    id1: Option<Vec<u8>>,
    file_key: Option<Vec<u8>>,
    crypt_filter_config: CryptFilterConfiguration,
    /// Name to `/CFM` mapping for every entry of a parsed `/CF` dictionary,
    /// beyond whichever names `/StmF`/`/StrF` point at. Filters can't be
    /// materialized until the file key is known, so `build` only records
    /// the mapping; `finish_authentication` instantiates the rest.
    cf_methods: Vec<(String, Vec<u8>)>,
    state: HandlerState,
    auth_latch: AuthLatch,
    credential: Option<Credential>,
}

/// `Object::as_name` returns `Option`, unlike the rest of the accessor
/// family, since an absent `/Name` entry is routine rather than a type
/// error; this adapts a `Dictionary::get` lookup straight to it.
fn dict_name<'d>(dict: &'d Dictionary, key: &[u8]) -> Option<&'d [u8]> {
    dict.get(key).ok().and_then(Object::as_name)
}

fn document_with_id(id1: Option<&[u8]>) -> Document {
    let mut doc = Document::new();
    if let Some(id1) = id1 {
        doc.trailer.set("ID", Object::Array(vec![Object::string_literal(id1.to_vec())]));
    }
    doc
}

fn standard_filter_for(version: HandlerVersion, ctx: &HandlerContext, use_aes: bool) -> Arc<dyn CryptFilter> {
    match version {
        HandlerVersion::Aes256 => Arc::new(StandardAes256CryptFilter::from_handler_context(ctx)),
        _ if use_aes => Arc::new(StandardAes128CryptFilter::from_handler_context(ctx)),
        _ => Arc::new(StandardRc4CryptFilter::from_handler_context(ctx)),
    }
}

/// Builds the crypt filter a single `/CF` entry's own `/CFM` calls for,
/// independent of the handler's overall RC4/AES toggle (spec.md §4.5: a
/// `/CF` dictionary may name several filters of different methods at once).
fn standard_filter_for_method(method_name: &[u8], ctx: &HandlerContext) -> Result<Arc<dyn CryptFilter>, HandlerError> {
    match method_name {
        m if m == method::NONE => Ok(Arc::new(IdentityCryptFilter)),
        m if m == method::V2 => Ok(Arc::new(StandardRc4CryptFilter::from_handler_context(ctx))),
        m if m == method::AESV2 => Ok(Arc::new(StandardAes128CryptFilter::from_handler_context(ctx))),
        m if m == method::AESV3 => Ok(Arc::new(StandardAes256CryptFilter::from_handler_context(ctx))),
        other => Err(HandlerError::NotImplemented(format!(
            "unknown /CFM method {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

impl StandardSecurityHandler {
    /// Low-level builder mirroring the original's `build_from_pw_legacy`
    /// (SPEC_FULL.md §2, `test_legacy_encryption`): explicit revision, key
    /// length and AES toggle, for R2-R4.
    pub fn build_from_pw_legacy(
        revision: i64,
        key_length_bytes: usize,
        owner_password: &str,
        user_password: &str,
        permissions: Permissions,
        id1: Vec<u8>,
        encrypt_metadata: bool,
        use_aes128: bool,
    ) -> Result<Self, HandlerError> {
        let version = match (revision, use_aes128) {
            (2, false) => HandlerVersion::Rc4_40,
            (3, false) => HandlerVersion::Rc4LongerKeys,
            (4, _) => HandlerVersion::Rc4OrAes128,
            (r, _) => return Err(HandlerError::PdfRead(format!("unsupported legacy revision {r}"))),
        };
        let key_length_bytes = version.check_key_length(key_length_bytes)?;

        let mut algorithm = PasswordAlgorithm {
            encrypt_metadata,
            length: Some(key_length_bytes * 8),
            version: version.as_i64(),
            revision,
            permissions: permissions.correct_bits(),
            ..Default::default()
        };

        let owner_bytes = algorithm.sanitize_password_r4(owner_password);
        let user_bytes = algorithm.sanitize_password_r4(user_password);

        algorithm.owner_value = algorithm.compute_hashed_owner_password_r4(Some(&owner_bytes), &user_bytes)?;

        let doc = document_with_id(Some(&id1));
        let file_key = algorithm.compute_file_encryption_key_r4(&doc, &user_bytes)?;

        algorithm.user_value = match revision {
            2 => algorithm.compute_hashed_user_password_r2(&doc, &user_bytes)?,
            _ => algorithm.compute_hashed_user_password_r3_r4(&doc, &user_bytes)?,
        };

        let mut crypt_filter_config = CryptFilterConfiguration::new();
        let ctx = HandlerContext { file_key: file_key.clone(), encrypt_metadata, version: version.as_i64() };
        crypt_filter_config.register_filter("StdCF", standard_filter_for(version, &ctx, use_aes128));
        crypt_filter_config.set_default_string_filter("StdCF")?;
        crypt_filter_config.set_default_stream_filter("StdCF")?;

        Ok(StandardSecurityHandler {
            version,
            algorithm,
            id1: Some(id1.clone()),
            file_key: Some(file_key),
            crypt_filter_config,
            cf_methods: Vec::new(),
            state: HandlerState::Authenticated(AuthStatus::Owner),
            auth_latch: AuthLatch::new(),
            credential: Some(Credential::Password { password: user_bytes, id1: Some(id1) }),
        })
    }

    /// High-level builder (SPEC_FULL.md §2): AES-256/R6 defaults.
    pub fn build_from_pw(owner_password: &str, user_password: &str, permissions: Permissions, encrypt_metadata: bool) -> Result<Self, HandlerError> {
        let version = HandlerVersion::Aes256;
        let mut algorithm = PasswordAlgorithm {
            encrypt_metadata,
            length: Some(256),
            version: version.as_i64(),
            revision: 6,
            permissions: permissions.correct_bits(),
            ..Default::default()
        };

        let owner_bytes = algorithm.sanitize_password_r6(owner_password)?;
        let user_bytes = algorithm.sanitize_password_r6(user_password)?;

        let mut file_key = [0u8; 32];
        rand::rng().fill(&mut file_key);

        let (user_value, user_encrypted) = algorithm.compute_hashed_user_password_r6(&file_key, &user_bytes)?;
        algorithm.user_value = user_value;
        algorithm.user_encrypted = user_encrypted;

        let (owner_value, owner_encrypted) = algorithm.compute_hashed_owner_password_r6(&file_key, &owner_bytes)?;
        algorithm.owner_value = owner_value;
        algorithm.owner_encrypted = owner_encrypted;

        algorithm.permission_encrypted = algorithm.compute_permissions(&file_key)?;

        let mut crypt_filter_config = CryptFilterConfiguration::new();
        let ctx = HandlerContext { file_key: file_key.to_vec(), encrypt_metadata, version: version.as_i64() };
        crypt_filter_config.register_filter("StdCF", standard_filter_for(version, &ctx, true));
        crypt_filter_config.set_default_string_filter("StdCF")?;
        crypt_filter_config.set_default_stream_filter("StdCF")?;

        Ok(StandardSecurityHandler {
            version,
            algorithm,
            id1: None,
            file_key: Some(file_key.to_vec()),
            crypt_filter_config,
            cf_methods: Vec::new(),
            state: HandlerState::Authenticated(AuthStatus::Owner),
            auth_latch: AuthLatch::new(),
            credential: Some(Credential::Password { password: user_bytes, id1: None }),
        })
    }

    /// Parses an `/Encrypt` dictionary (spec.md §6.1); `document_id` is the
    /// first element of the document's `/ID` array.
    pub fn build(encrypt_dict: &Dictionary, document_id: Option<&[u8]>) -> Result<Self, HandlerError> {
        let version = HandlerVersion::from_i64(encrypt_dict.get(b"V").and_then(Object::as_i64).unwrap_or(0));
        let revision = encrypt_dict
            .get(b"R")
            .and_then(Object::as_i64)
            .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /R".into()))?;

        let length_bits = encrypt_dict.get(b"Length").and_then(Object::as_i64).unwrap_or(40);

        let owner_value = encrypt_dict
            .get(b"O")
            .and_then(Object::as_str)
            .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /O".into()))?
            .to_vec();
        let user_value = encrypt_dict
            .get(b"U")
            .and_then(Object::as_str)
            .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /U".into()))?
            .to_vec();

        let owner_encrypted = encrypt_dict.get(b"OE").and_then(Object::as_str).map(<[u8]>::to_vec).unwrap_or_default();
        let user_encrypted = encrypt_dict.get(b"UE").and_then(Object::as_str).map(<[u8]>::to_vec).unwrap_or_default();
        let permission_encrypted = encrypt_dict.get(b"Perms").and_then(Object::as_str).map(<[u8]>::to_vec).unwrap_or_default();

        let p = encrypt_dict
            .get(b"P")
            .and_then(Object::as_i64)
            .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /P".into()))? as i32;

        let encrypt_metadata = encrypt_dict.get(b"EncryptMetadata").and_then(Object::as_bool).unwrap_or(true);

        let algorithm = PasswordAlgorithm {
            encrypt_metadata,
            length: Some(length_bits as usize),
            version: version.as_i64(),
            revision,
            owner_value,
            owner_encrypted,
            user_value,
            user_encrypted,
            permissions: Permissions::from_p_value(p),
            permission_encrypted,
        };

        let mut crypt_filter_config = CryptFilterConfiguration::new();
        let mut cf_methods = Vec::new();
        if matches!(version, HandlerVersion::Rc4OrAes128 | HandlerVersion::Aes256) {
            if let Ok(cf_dict) = encrypt_dict.get(b"CF").and_then(Object::as_dict) {
                for (name, entry) in cf_dict.iter() {
                    let Ok(entry_dict) = entry.as_dict() else { continue };
                    let method_name = dict_name(entry_dict, b"CFM").unwrap_or(method::NONE);
                    // Filters are constructed lazily once the file key is known
                    // (derive_shared_encryption_key, spec.md §4.2); parsing the
                    // dictionary only records which method each name maps to.
                    // The handler materializes the real filter instances in
                    // `finish_authentication` below, once it has a file key.
                    cf_methods.push((String::from_utf8_lossy(name).into_owned(), method_name.to_vec()));
                }
            }

            if let Some(name) = dict_name(encrypt_dict, b"StmF") {
                if name != IDENTITY_NAME.as_bytes() {
                    let _ = crypt_filter_config.set_default_stream_filter(String::from_utf8_lossy(name).into_owned());
                }
            }
            if let Some(name) = dict_name(encrypt_dict, b"StrF") {
                if name != IDENTITY_NAME.as_bytes() {
                    let _ = crypt_filter_config.set_default_string_filter(String::from_utf8_lossy(name).into_owned());
                }
            }
        }

        Ok(StandardSecurityHandler {
            version,
            algorithm,
            id1: document_id.map(<[u8]>::to_vec),
            file_key: None,
            crypt_filter_config,
            cf_methods,
            state: HandlerState::Uninitialized,
            auth_latch: AuthLatch::new(),
            credential: None,
        })
    }

    /// Materializes the crypt filter(s) from the now-known file key. Called
    /// once authentication succeeds on a handler built from a serialized
    /// `/Encrypt` dictionary (`build`); builders that already have a file
    /// key populate `crypt_filter_config` directly instead.
    fn finish_authentication(&mut self, password: Vec<u8>, id1: Option<Vec<u8>>) {
        let file_key = self.file_key.clone().expect("file key must be set before finishing authentication");
        let ctx = HandlerContext { file_key, encrypt_metadata: self.algorithm.encrypt_metadata, version: self.version.as_i64() };
        let use_aes = matches!(self.version, HandlerVersion::Rc4OrAes128 | HandlerVersion::Aes256);

        if self.crypt_filter_config.default_string_filter_name().is_none()
            && self.crypt_filter_config.default_stream_filter_name().is_none()
        {
            self.crypt_filter_config.register_filter("StdCF", standard_filter_for(self.version, &ctx, use_aes));
            let _ = self.crypt_filter_config.set_default_string_filter("StdCF");
            let _ = self.crypt_filter_config.set_default_stream_filter("StdCF");
        } else {
            // A /CF dictionary named the defaults already; materialize the
            // same standard filter under each name /StmF / /StrF pointed at
            // that has not been registered yet.
            let names: Vec<String> = [self.crypt_filter_config.default_string_filter_name(), self.crypt_filter_config.default_stream_filter_name()]
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect();
            for name in names {
                if name != IDENTITY_NAME && self.crypt_filter_config.get(&name).is_err() {
                    self.crypt_filter_config.register_filter(name, standard_filter_for(self.version, &ctx, use_aes));
                }
            }
        }

        // Every other /CF entry (e.g. a non-default filter a stream reaches
        // by its own /Crypt + /DecodeParms /Name override) is materialized
        // here by its own /CFM, not by the handler's blanket RC4/AES toggle.
        for (name, method_name) in self.cf_methods.clone() {
            if name == IDENTITY_NAME || self.crypt_filter_config.get(&name).is_ok() {
                continue;
            }
            match standard_filter_for_method(&method_name, &ctx) {
                Ok(filter) => self.crypt_filter_config.register_filter(name, filter),
                Err(err) => log::warn!("crypt filter {name:?} names an unsupported /CFM, leaving it unregistered: {err}"),
            }
        }

        self.credential = Some(Credential::Password { password, id1 });
    }

    /// Tries the user password, then the owner password (spec.md §4.3).
    pub fn authenticate(&mut self, credential: &Credential) -> Result<AuthResult, HandlerError> {
        let Credential::Password { password, id1 } = credential else {
            return Err(HandlerError::PdfRead("a password credential is required to authenticate a Standard security handler".into()));
        };

        let id1 = id1.clone().or_else(|| self.id1.clone());
        let doc = document_with_id(id1.as_deref());

        if self.algorithm.authenticate_user_password(&doc, password)? {
            let file_key = self.algorithm.compute_file_encryption_key(&doc, password)?;
            self.file_key = Some(file_key);
            self.state = HandlerState::Authenticated(AuthStatus::User);
            self.finish_authentication(password.clone(), id1);
            return Ok(AuthResult { status: AuthStatus::User, permission_flags: Some(self.algorithm.permissions.as_p_value()) });
        }

        if self.algorithm.authenticate_owner_password(&doc, password)? {
            // For R2-R4, Algorithm 7 recovers the user password internally;
            // the file key is still derived the same way Algorithm 2 always
            // derives it (from the user password), so for legacy revisions
            // we recover it once more here. For R6, Algorithm 2.A already
            // returns the true file key directly from the owner branch.
            let file_key = match self.algorithm.revision {
                2..=4 => {
                    let recovered_user_password = self.recover_user_password_from_owner(password)?;
                    self.algorithm.compute_file_encryption_key(&doc, &recovered_user_password)?
                }
                _ => self.algorithm.compute_file_encryption_key(&doc, password)?,
            };
            self.file_key = Some(file_key);
            self.state = HandlerState::Authenticated(AuthStatus::Owner);
            self.finish_authentication(password.clone(), id1);
            return Ok(AuthResult { status: AuthStatus::Owner, permission_flags: None });
        }

        self.state = HandlerState::AuthFailed;
        self.auth_latch.fail();
        Ok(AuthResult { status: AuthStatus::Failed, permission_flags: None })
    }

    /// PDF Algorithm 7's RC4 ladder, re-run to recover the cleartext user
    /// password an owner password decodes from `/O` (needed because
    /// Algorithm 2 always hashes the user password, never the owner's).
    fn recover_user_password_from_owner(&self, owner_password: &[u8]) -> Result<Vec<u8>, HandlerError> {
        use crate::crypto::Rc4;
        use md5::{Digest as _, Md5};

        const PAD_BYTES: [u8; 32] = [
            0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E,
            0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
        ];

        let len = owner_password.len().min(32);
        let mut hasher = Md5::new();
        hasher.update(&owner_password[..len]);
        hasher.update(&PAD_BYTES[..32 - len]);
        let mut hash = hasher.finalize();

        if self.algorithm.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }

        let n = if self.algorithm.revision >= 3 { self.algorithm.length.unwrap_or(40) / 8 } else { 5 };

        let mut result = self.algorithm.owner_value.clone();
        if self.algorithm.revision >= 3 {
            let mut key = vec![0u8; n];
            for i in (1..=19u8).rev() {
                for (in_byte, out_byte) in hash[..n].iter().zip(key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                result = Rc4::new(&key).decrypt(&result);
            }
        }
        result = Rc4::new(&hash[..n]).decrypt(&result);
        Ok(result)
    }

    pub fn extract_credential(&self) -> Option<Credential> {
        self.credential.clone()
    }

    pub fn crypt_filter_config(&self) -> &CryptFilterConfiguration {
        &self.crypt_filter_config
    }

    pub fn auth_latch(&self) -> &AuthLatch {
        &self.auth_latch
    }

    pub fn is_auth_failed(&self) -> bool {
        matches!(self.state, HandlerState::AuthFailed)
    }

    /// Serializes back into an `/Encrypt` dictionary (spec.md §6.1).
    pub fn as_pdf_object(&self) -> Result<Dictionary, HandlerError> {
        if self.file_key.is_none() {
            return Err(HandlerError::PdfWrite("cannot serialize a Standard security handler before a file key has been established".into()));
        }

        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"Standard".to_vec()));
        dict.set("V", Object::Integer(self.version.as_i64()));
        dict.set("R", Object::Integer(self.algorithm.revision));
        dict.set("Length", Object::Integer(self.algorithm.length.unwrap_or(40) as i64));
        dict.set("P", Object::Integer(self.algorithm.permissions.as_p_value() as i64));
        dict.set("O", Object::string_literal(self.algorithm.owner_value.clone()));
        dict.set("U", Object::string_literal(self.algorithm.user_value.clone()));

        if self.algorithm.revision >= 6 {
            dict.set("OE", Object::string_literal(self.algorithm.owner_encrypted.clone()));
            dict.set("UE", Object::string_literal(self.algorithm.user_encrypted.clone()));
            dict.set("Perms", Object::string_literal(self.algorithm.permission_encrypted.clone()));
        }

        if matches!(self.version, HandlerVersion::Rc4OrAes128 | HandlerVersion::Aes256) {
            dict.set("EncryptMetadata", Object::Boolean(self.algorithm.encrypt_metadata));

            let mut cf = Dictionary::new();
            for (name, filter) in self.crypt_filter_config.iter() {
                filter.check_serializable()?;
                let mut entry = Dictionary::new();
                entry.set("CFM", Object::Name(filter.method().to_vec()));
                entry.set("Length", Object::Integer(filter.keylen() as i64));
                cf.set(name, Object::Dictionary(entry));
            }
            dict.set("CF", Object::Dictionary(cf));

            let stm_name = self.crypt_filter_config.default_stream_filter_name().unwrap_or(IDENTITY_NAME);
            let str_name = self.crypt_filter_config.default_string_filter_name().unwrap_or(IDENTITY_NAME);
            dict.set("StmF", Object::Name(stm_name.as_bytes().to_vec()));
            dict.set("StrF", Object::Name(str_name.as_bytes().to_vec()));
        }

        Ok(dict)
    }
}

/// `/SubFilter` values for the public-key handler (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PubKeySubFilter {
    /// `adbe.pkcs7.s3`: deprecated, always refused.
    S3,
    /// `adbe.pkcs7.s4`: recipients live on the handler; per-stream crypt
    /// filters are forbidden.
    S4,
    /// `adbe.pkcs7.s5`: recipients live on individual crypt filters; `/CF`
    /// is required.
    S5,
}

impl PubKeySubFilter {
    fn from_name(name: &[u8]) -> Result<Self, HandlerError> {
        match name {
            b"adbe.pkcs7.s3" => Ok(PubKeySubFilter::S3),
            b"adbe.pkcs7.s4" => Ok(PubKeySubFilter::S4),
            b"adbe.pkcs7.s5" => Ok(PubKeySubFilter::S5),
            other => Err(HandlerError::PdfRead(format!(
                "unsupported /SubFilter {:?} for a public-key security handler",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn as_name(self) -> &'static [u8] {
        match self {
            PubKeySubFilter::S3 => b"adbe.pkcs7.s3",
            PubKeySubFilter::S4 => b"adbe.pkcs7.s4",
            PubKeySubFilter::S5 => b"adbe.pkcs7.s5",
        }
    }
}

/// The three concrete pubkey crypt filter kinds, unified enough to expose
/// `add_recipient`/`authenticate` without a second dynamic-dispatch trait
/// (spec.md §4.2). Each variant still implements [`CryptFilter`] itself;
/// `as_crypt_filter` hands that object out for registration in a
/// [`CryptFilterConfiguration`].
#[derive(Clone)]
enum PubKeyFilterHandle {
    Rc4(Arc<PubKeyRc4CryptFilter>),
    Aes128(Arc<PubKeyAes128CryptFilter>),
    Aes256(Arc<PubKeyAes256CryptFilter>),
}

impl PubKeyFilterHandle {
    fn new(cfm: &[u8], encrypt_metadata: bool, keylen: usize, auth_latch: AuthLatch, expected_permissions: i32) -> Result<Self, HandlerError> {
        match cfm {
            m if m == method::V2 => Ok(PubKeyFilterHandle::Rc4(Arc::new(PubKeyRc4CryptFilter::new(encrypt_metadata, keylen, auth_latch, expected_permissions)))),
            m if m == method::AESV2 => Ok(PubKeyFilterHandle::Aes128(Arc::new(PubKeyAes128CryptFilter::new(encrypt_metadata, keylen, auth_latch, expected_permissions)))),
            m if m == method::AESV3 => Ok(PubKeyFilterHandle::Aes256(Arc::new(PubKeyAes256CryptFilter::new(encrypt_metadata, keylen, auth_latch, expected_permissions)))),
            other => Err(HandlerError::NotImplemented(format!("unknown /CFM method for a pubkey crypt filter: {:?}", String::from_utf8_lossy(other)))),
        }
    }

    fn add_recipient(&self, envelope_der: Vec<u8>) -> Result<(), HandlerError> {
        match self {
            PubKeyFilterHandle::Rc4(f) => f.add_recipient(envelope_der),
            PubKeyFilterHandle::Aes128(f) => f.add_recipient(envelope_der),
            PubKeyFilterHandle::Aes256(f) => f.add_recipient(envelope_der),
        }
    }

    fn authenticate(&self, decrypter: &PrivateKeyDecrypter) -> Result<(), HandlerError> {
        match self {
            PubKeyFilterHandle::Rc4(f) => f.authenticate(decrypter),
            PubKeyFilterHandle::Aes128(f) => f.authenticate(decrypter),
            PubKeyFilterHandle::Aes256(f) => f.authenticate(decrypter),
        }
    }

    fn mark_serialized(&self) {
        match self {
            PubKeyFilterHandle::Rc4(f) => f.mark_serialized(),
            PubKeyFilterHandle::Aes128(f) => f.mark_serialized(),
            PubKeyFilterHandle::Aes256(f) => f.mark_serialized(),
        }
    }

    fn as_crypt_filter(&self) -> Arc<dyn CryptFilter> {
        match self {
            PubKeyFilterHandle::Rc4(f) => f.clone(),
            PubKeyFilterHandle::Aes128(f) => f.clone(),
            PubKeyFilterHandle::Aes256(f) => f.clone(),
        }
    }
}

/// Public-key (certificate-based) security handler (spec.md §4.4).
pub struct PubKeySecurityHandler {
    subfilter: PubKeySubFilter,
    keylen: usize,
    use_aes256: bool,
    encrypt_metadata: bool,
    permissions: Permissions,
    /// S4 only: the single handler-level shared key, once derived.
    handler_shared_key: Option<Vec<u8>>,
    /// S4 only: DER `EnvelopedData` blobs, one per recipient certificate.
    handler_recipients: Vec<Vec<u8>>,
    /// S5 only: named per-filter handles (also registered, as `dyn
    /// CryptFilter`, in `crypt_filter_config`).
    s5_filters: Vec<(String, PubKeyFilterHandle)>,
    crypt_filter_config: CryptFilterConfiguration,
    state: HandlerState,
    auth_latch: AuthLatch,
    ignore_key_usage: bool,
}

impl PubKeySecurityHandler {
    /// `build_from_certs` (spec.md §4.4, SPEC_FULL.md §2): generates a
    /// random 20-byte seed, CMS-envelopes it under each recipient's public
    /// key (RSAES-PKCS1-v1_5, the writer's compatibility default), and
    /// populates either the handler-level (S4) or per-filter (S5) recipient
    /// list depending on `subfilter`.
    pub fn build_from_certs(
        subfilter: PubKeySubFilter,
        recipient_certificates: &[Vec<u8>],
        use_aes256: bool,
        permissions: Permissions,
        encrypt_metadata: bool,
        ignore_key_usage: bool,
    ) -> Result<Self, HandlerError> {
        if subfilter == PubKeySubFilter::S3 {
            return Err(HandlerError::PdfRead("adbe.pkcs7.s3 is deprecated and refused".into()));
        }
        if recipient_certificates.is_empty() {
            return Err(HandlerError::PdfRead("at least one recipient certificate is required".into()));
        }

        if !ignore_key_usage {
            for certificate_der in recipient_certificates {
                check_key_encipherment(certificate_der)?;
            }
        }

        let permissions = permissions.correct_bits();
        let keylen = if use_aes256 { 32 } else { 16 };
        let mut seed = [0u8; 20];
        rand::rng().fill(&mut seed);

        let envelope_der = envelope::seal_envelope(&seed, permissions.as_p_value(), recipient_certificates, false)?;
        let auth_latch = AuthLatch::new();

        let (handler_recipients, s5_filters, crypt_filter_config, handler_shared_key) = match subfilter {
            PubKeySubFilter::S3 => unreachable!(),
            PubKeySubFilter::S4 => {
                let shared_key = hash_seed_for_handler(&seed, std::slice::from_ref(&envelope_der), encrypt_metadata, keylen, use_aes256);
                let ctx = HandlerContext { file_key: shared_key.clone(), encrypt_metadata, version: if use_aes256 { 5 } else { 4 } };
                let mut config = CryptFilterConfiguration::new();
                let default_filter = if use_aes256 {
                    Arc::new(StandardAes256CryptFilter::from_handler_context(&ctx)) as Arc<dyn CryptFilter>
                } else {
                    Arc::new(StandardAes128CryptFilter::from_handler_context(&ctx)) as Arc<dyn CryptFilter>
                };
                config.register_filter("DefaultCF", default_filter);
                config.set_default_string_filter("DefaultCF")?;
                config.set_default_stream_filter("DefaultCF")?;
                (vec![envelope_der], Vec::new(), config, Some(shared_key))
            }
            PubKeySubFilter::S5 => {
                let cfm = if use_aes256 { method::AESV3 } else { method::AESV2 };
                let handle = PubKeyFilterHandle::new(cfm, encrypt_metadata, keylen, auth_latch.clone(), permissions.as_p_value())?;
                handle.add_recipient(envelope_der)?;

                let mut config = CryptFilterConfiguration::new();
                config.register_filter("DefaultCF", handle.as_crypt_filter());
                config.set_default_string_filter("DefaultCF")?;
                config.set_default_stream_filter("DefaultCF")?;
                (Vec::new(), vec![("DefaultCF".to_string(), handle)], config, None)
            }
        };

        Ok(PubKeySecurityHandler {
            subfilter,
            keylen,
            use_aes256,
            encrypt_metadata,
            permissions,
            handler_shared_key,
            handler_recipients,
            s5_filters,
            crypt_filter_config,
            state: HandlerState::Authenticated(AuthStatus::Owner),
            auth_latch,
            ignore_key_usage,
        })
    }

    pub fn build(encrypt_dict: &Dictionary) -> Result<Self, HandlerError> {
        let subfilter_name = dict_name(encrypt_dict, b"SubFilter")
            .ok_or_else(|| HandlerError::PdfRead("/Encrypt dictionary is missing /SubFilter".into()))?;
        let subfilter = PubKeySubFilter::from_name(subfilter_name)?;

        let encrypt_metadata = encrypt_dict.get(b"EncryptMetadata").and_then(Object::as_bool).unwrap_or(true);
        let version = HandlerVersion::from_i64(encrypt_dict.get(b"V").and_then(Object::as_i64).unwrap_or(4));
        let use_aes256 = matches!(version, HandlerVersion::Aes256);
        let keylen = if use_aes256 { 32 } else { 16 };
        let permissions = encrypt_dict
            .get(b"P")
            .and_then(Object::as_i64)
            .map(|p| Permissions::from_p_value(p as i32))
            .unwrap_or_default();

        let auth_latch = AuthLatch::new();

        let (handler_recipients, s5_filters, crypt_filter_config) = match subfilter {
            PubKeySubFilter::S3 => {
                return Err(HandlerError::PdfRead("adbe.pkcs7.s3 is deprecated and refused".into()));
            }
            PubKeySubFilter::S4 => {
                let recipients = encrypt_dict
                    .get(b"Recipients")
                    .and_then(Object::as_array)
                    .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /Recipients for adbe.pkcs7.s4".into()))?;
                let recipients: Vec<Vec<u8>> = recipients
                    .iter()
                    .map(|obj| obj.as_str().map(<[u8]>::to_vec))
                    .collect::<Result<_, _>>()
                    .map_err(|_| HandlerError::PdfRead("/Recipients must be an array of byte strings".into()))?;
                (recipients, Vec::new(), CryptFilterConfiguration::new())
            }
            PubKeySubFilter::S5 => {
                let cf_dict = encrypt_dict
                    .get(b"CF")
                    .and_then(Object::as_dict)
                    .map_err(|_| HandlerError::PdfRead("/Encrypt dictionary is missing /CF for adbe.pkcs7.s5".into()))?;

                let mut config = CryptFilterConfiguration::new();
                let mut filters = Vec::new();

                for (name, entry) in cf_dict.iter() {
                    let entry_dict = entry
                        .as_dict()
                        .map_err(|_| HandlerError::PdfRead("malformed crypt-filter entry in /CF".into()))?;
                    let cfm = dict_name(entry_dict, b"CFM")
                        .ok_or_else(|| HandlerError::PdfRead(format!("crypt filter {:?} is missing /CFM", String::from_utf8_lossy(name))))?;
                    if cfm == method::NONE {
                        return Err(HandlerError::PdfRead(format!(
                            "crypt filter {:?} has /CFM /None, which is not valid for a pubkey filter",
                            String::from_utf8_lossy(name)
                        )));
                    }
                    let recipients = entry_dict
                        .get(b"Recipients")
                        .and_then(Object::as_array)
                        .map_err(|_| HandlerError::PdfRead(format!("crypt filter {:?} is missing /Recipients", String::from_utf8_lossy(name))))?;

                    let handle = PubKeyFilterHandle::new(cfm, encrypt_metadata, keylen, auth_latch.clone(), permissions.as_p_value())?;
                    for recipient in recipients {
                        let envelope_der = recipient
                            .as_str()
                            .map_err(|_| HandlerError::PdfRead("/Recipients entries must be byte strings".into()))?;
                        handle.add_recipient(envelope_der.to_vec())?;
                    }

                    config.register_filter(String::from_utf8_lossy(name).into_owned(), handle.as_crypt_filter());
                    filters.push((String::from_utf8_lossy(name).into_owned(), handle));
                }

                if let Some(name) = dict_name(encrypt_dict, b"StmF") {
                    let _ = config.set_default_stream_filter(String::from_utf8_lossy(name).into_owned());
                }
                if let Some(name) = dict_name(encrypt_dict, b"StrF") {
                    let _ = config.set_default_string_filter(String::from_utf8_lossy(name).into_owned());
                }

                (Vec::new(), filters, config)
            }
        };

        Ok(PubKeySecurityHandler {
            subfilter,
            keylen,
            use_aes256,
            encrypt_metadata,
            permissions,
            handler_shared_key: None,
            handler_recipients,
            s5_filters,
            crypt_filter_config,
            state: HandlerState::Uninitialized,
            auth_latch,
            ignore_key_usage: false,
        })
    }

    /// S4: derives the single handler-level shared key against every
    /// recipient envelope until one decrypts with `decrypter`. S5: calls
    /// `authenticate` on every per-filter handle that still has recipients
    /// set, so the defaults are auto-authenticated while filters the caller
    /// has not touched remain locked (spec.md §8 scenario 6).
    pub fn authenticate(&mut self, decrypter: &PrivateKeyDecrypter) -> Result<AuthResult, HandlerError> {
        match self.subfilter {
            PubKeySubFilter::S3 => unreachable!(),
            PubKeySubFilter::S4 => {
                let mut last_err = None;
                for envelope_der in &self.handler_recipients {
                    match envelope::open_envelope(envelope_der, decrypter) {
                        Ok((seed, perms)) => {
                            if perms != self.permissions.as_p_value() {
                                last_err = Some(HandlerError::PdfRead(
                                    "recipient envelope's permission bytes do not match the /P value in the encryption dictionary".into(),
                                ));
                                continue;
                            }
                            let recipient_bytes = self.handler_recipients.clone();
                            let mut seed20 = [0u8; 20];
                            seed20[..seed.len().min(20)].copy_from_slice(&seed[..seed.len().min(20)]);
                            let shared_key = hash_seed_for_handler(&seed20, &recipient_bytes, self.encrypt_metadata, self.keylen, self.use_aes256);
                            self.handler_shared_key = Some(shared_key.clone());

                            let ctx = HandlerContext { file_key: shared_key, encrypt_metadata: self.encrypt_metadata, version: if self.use_aes256 { 5 } else { 4 } };
                            let filter = if self.use_aes256 {
                                Arc::new(StandardAes256CryptFilter::from_handler_context(&ctx)) as Arc<dyn CryptFilter>
                            } else {
                                Arc::new(StandardAes128CryptFilter::from_handler_context(&ctx)) as Arc<dyn CryptFilter>
                            };
                            self.crypt_filter_config.register_filter("DefaultCF", filter);
                            self.crypt_filter_config.set_default_string_filter("DefaultCF")?;
                            self.crypt_filter_config.set_default_stream_filter("DefaultCF")?;

                            self.state = HandlerState::Authenticated(AuthStatus::User);
                            return Ok(AuthResult { status: AuthStatus::User, permission_flags: Some(self.permissions.as_p_value()) });
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                let _ = last_err;
                self.state = HandlerState::AuthFailed;
                self.auth_latch.fail();
                Ok(AuthResult { status: AuthStatus::Failed, permission_flags: None })
            }
            PubKeySubFilter::S5 => {
                // The default filter(s) named by /StmF and /StrF are
                // auto-authenticated; any other filter stays locked until
                // the caller explicitly authenticates it (scenario 6).
                let default_names: Vec<&str> = [self.crypt_filter_config.default_stream_filter_name(), self.crypt_filter_config.default_string_filter_name()]
                    .into_iter()
                    .flatten()
                    .collect();

                let mut any_succeeded = false;
                for (name, handle) in &self.s5_filters {
                    if default_names.contains(&name.as_str()) {
                        if handle.authenticate(decrypter).is_ok() {
                            any_succeeded = true;
                        }
                    }
                }

                if any_succeeded {
                    self.state = HandlerState::Authenticated(AuthStatus::User);
                    Ok(AuthResult { status: AuthStatus::User, permission_flags: Some(self.permissions.as_p_value()) })
                } else {
                    self.state = HandlerState::AuthFailed;
                    self.auth_latch.fail();
                    Ok(AuthResult { status: AuthStatus::Failed, permission_flags: None })
                }
            }
        }
    }

    /// Authenticates one named per-filter crypt filter explicitly (S5 only;
    /// spec.md §8 scenario 6, `test_custom_pubkey_crypt_filter`).
    pub fn authenticate_filter(&self, name: &str, decrypter: &PrivateKeyDecrypter) -> Result<(), HandlerError> {
        self.s5_filters
            .iter()
            .find(|(filter_name, _)| filter_name == name)
            .ok_or_else(|| HandlerError::PdfStream(name.to_string()))?
            .1
            .authenticate(decrypter)
    }

    /// Handler-level `add_recipients` is idempotent: calling it twice is
    /// allowed and pointless, never an error (SPEC_FULL.md §2).
    pub fn add_recipients(&mut self, recipient_certificates: &[Vec<u8>]) -> Result<(), HandlerError> {
        if self.subfilter != PubKeySubFilter::S4 {
            return Err(HandlerError::Pdf("add_recipients at the handler level only applies to adbe.pkcs7.s4".into()));
        }
        if !self.handler_recipients.is_empty() {
            return Ok(());
        }
        if !self.ignore_key_usage {
            for certificate_der in recipient_certificates {
                check_key_encipherment(certificate_der)?;
            }
        }
        let mut seed = [0u8; 20];
        rand::rng().fill(&mut seed);
        self.handler_recipients
            .push(envelope::seal_envelope(&seed, self.permissions.as_p_value(), recipient_certificates, false)?);
        Ok(())
    }

    pub fn crypt_filter_config(&self) -> &CryptFilterConfiguration {
        &self.crypt_filter_config
    }

    pub fn auth_latch(&self) -> &AuthLatch {
        &self.auth_latch
    }

    pub fn is_auth_failed(&self) -> bool {
        matches!(self.state, HandlerState::AuthFailed)
    }

    /// Pubkey handlers built from certificates cannot be re-derived from an
    /// extracted credential (spec.md §4.3: "retains nothing extractable").
    pub fn extract_credential(&self) -> Option<Credential> {
        None
    }

    pub fn as_pdf_object(&self) -> Result<Dictionary, HandlerError> {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"Adobe.PubSec".to_vec()));
        dict.set("SubFilter", Object::Name(self.subfilter.as_name().to_vec()));
        dict.set("V", Object::Integer(if self.use_aes256 { 5 } else { 4 }));
        dict.set("Length", Object::Integer((self.keylen * 8) as i64));
        dict.set("P", Object::Integer(self.permissions.as_p_value() as i64));
        dict.set("EncryptMetadata", Object::Boolean(self.encrypt_metadata));

        match self.subfilter {
            PubKeySubFilter::S3 => unreachable!(),
            PubKeySubFilter::S4 => {
                dict.set(
                    "Recipients",
                    Object::Array(self.handler_recipients.iter().map(|r| Object::string_literal(r.clone())).collect()),
                );
            }
            PubKeySubFilter::S5 => {
                let mut cf = Dictionary::new();
                for (name, handle) in &self.s5_filters {
                    handle.mark_serialized();
                    let filter = handle.as_crypt_filter();
                    let mut entry = Dictionary::new();
                    entry.set("CFM", Object::Name(filter.method().to_vec()));
                    entry.set("Length", Object::Integer(filter.keylen() as i64));
                    cf.set(name.clone(), Object::Dictionary(entry));
                }
                dict.set("CF", Object::Dictionary(cf));

                let stm_name = self.crypt_filter_config.default_stream_filter_name().unwrap_or(IDENTITY_NAME);
                let str_name = self.crypt_filter_config.default_string_filter_name().unwrap_or(IDENTITY_NAME);
                dict.set("StmF", Object::Name(stm_name.as_bytes().to_vec()));
                dict.set("StrF", Object::Name(str_name.as_bytes().to_vec()));
            }
        }

        Ok(dict)
    }
}

fn check_key_encipherment(certificate_der: &[u8]) -> Result<(), HandlerError> {
    use x509_parser::prelude::{FromDer, X509Certificate};

    let (_, cert) = X509Certificate::from_der(certificate_der)
        .map_err(|err| HandlerError::PdfRead(format!("could not parse recipient certificate: {err}")))?;

    let key_usage = cert
        .extensions()
        .iter()
        .find_map(|ext| ext.parsed_extension().key_usage())
        .ok_or_else(|| HandlerError::PdfWrite("recipient certificate carries no keyUsage extension".into()))?;

    if key_usage.key_encipherment() {
        Ok(())
    } else {
        Err(HandlerError::PdfWrite(
            "recipient certificate's keyUsage does not assert keyEncipherment".into(),
        ))
    }
}

fn hash_seed_for_handler(seed: &[u8; 20], recipients: &[Vec<u8>], encrypt_metadata: bool, keylen: usize, use_sha256: bool) -> Vec<u8> {
    use sha1::Sha1;
    use sha2::{Digest as _, Sha256};

    let mut digest = if use_sha256 {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        for recipient in recipients {
            hasher.update(recipient);
        }
        if !encrypt_metadata {
            hasher.update(0xFFFFFFFFu32.to_le_bytes());
        }
        hasher.finalize().to_vec()
    } else {
        let mut hasher = Sha1::new();
        hasher.update(seed);
        for recipient in recipients {
            hasher.update(recipient);
        }
        if !encrypt_metadata {
            hasher.update(0xFFFFFFFFu32.to_le_bytes());
        }
        hasher.finalize().to_vec()
    };
    digest.truncate(keylen);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_owner_auth_yields_null_permission_flags() {
        let permissions = Permissions::from_p_value(-44);
        let mut handler = StandardSecurityHandler::build_from_pw_legacy(
            2,
            5,
            "ownersecret",
            "usersecret",
            permissions,
            b"0123456789abcdef".to_vec(),
            true,
            false,
        )
        .unwrap();

        let encrypt_dict = handler.as_pdf_object().unwrap();
        let id1 = b"0123456789abcdef".to_vec();
        let mut reopened = StandardSecurityHandler::build(&encrypt_dict, Some(&id1)).unwrap();

        let result = reopened
            .authenticate(&Credential::Password { password: b"ownersecret".to_vec(), id1: Some(id1.clone()) })
            .unwrap();
        assert_eq!(result.status, AuthStatus::Owner);
        assert_eq!(result.permission_flags, None);

        let _ = handler.extract_credential();
    }

    #[test]
    fn aes256_user_auth_returns_stored_permission_flags() {
        let permissions = Permissions::from_p_value(-44);
        let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();
        let encrypt_dict = handler.as_pdf_object().unwrap();

        let mut reopened = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
        let result = reopened.authenticate(&Credential::Password { password: b"usersecret".to_vec(), id1: None }).unwrap();
        assert_eq!(result.status, AuthStatus::User);
        assert_eq!(result.permission_flags, Some(-44));
    }

    #[test]
    fn wrong_password_fails_without_releasing_key_material() {
        let permissions = Permissions::from_p_value(-4);
        let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();
        let encrypt_dict = handler.as_pdf_object().unwrap();

        let mut reopened = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
        let result = reopened
            .authenticate(&Credential::Password { password: b"thispasswordiswrong".to_vec(), id1: None })
            .unwrap();
        assert_eq!(result.status, AuthStatus::Failed);
        assert!(reopened.is_auth_failed());
        assert!(reopened.auth_latch().has_failed());
    }

    #[test]
    fn credential_round_trip_reauthenticates_to_the_same_status() {
        let permissions = Permissions::from_p_value(-4);
        let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();
        let encrypt_dict = handler.as_pdf_object().unwrap();

        let mut first = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
        let first_result = first.authenticate(&Credential::Password { password: b"usersecret".to_vec(), id1: None }).unwrap();
        let credential = first.extract_credential().unwrap();
        let serialised = credential.serialise();
        let recovered = serialised.deserialise().unwrap();

        let mut second = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
        let second_result = second.authenticate(&recovered).unwrap();
        assert_eq!(first_result.status, second_result.status);
    }

    #[test]
    fn rejecting_deprecated_s3_subfilter() {
        let mut dict = Dictionary::new();
        dict.set("SubFilter", Object::Name(b"adbe.pkcs7.s3".to_vec()));
        assert!(PubKeySecurityHandler::build(&dict).is_err());
    }
}
