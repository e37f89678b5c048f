//! End-to-end scenarios (spec.md §8): each test drives the public API the way
//! a caller holding a parsed `/Encrypt` dictionary and a credential would,
//! rather than reaching into a handler's internals.

use pdfcrypt::{
    AuthLatch, AuthStatus, Credential, Dictionary, HandlerError, Object, Permissions,
    PrivateKeyDecrypter, Stream, StandardSecurityHandler, decrypt_object, encrypt_object,
};
use pdfcrypt::crypt_filters::{
    CryptFilter, PubKeyAes128CryptFilter, PubKeyAes256CryptFilter, PubKeyRc4CryptFilter,
};
use pkcs8::EncodePrivateKey;
use rand::Rng as _;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

#[test]
fn legacy_rc4_40_owner_auth_round_trips_a_stream() {
    let permissions = Permissions::from_p_value(-44);
    let id1 = b"0123456789abcdef".to_vec();
    let handler =
        StandardSecurityHandler::build_from_pw_legacy(2, 5, "ownersecret", "usersecret", permissions, id1.clone(), true, false).unwrap();
    let encrypt_dict = handler.as_pdf_object().unwrap();

    let mut obj = Object::Stream(Stream::new(Dictionary::new(), b"0 1 0 rg /a0 gs".to_vec()));
    encrypt_object(handler.crypt_filter_config(), true, (7, 0), &mut obj).unwrap();
    assert_ne!(obj.as_stream().unwrap().content, b"0 1 0 rg /a0 gs".to_vec());

    let mut reopened = StandardSecurityHandler::build(&encrypt_dict, Some(&id1)).unwrap();
    let result = reopened
        .authenticate(&Credential::Password { password: b"ownersecret".to_vec(), id1: Some(id1) })
        .unwrap();
    assert_eq!(result.status, AuthStatus::Owner);
    assert_eq!(result.permission_flags, None);

    decrypt_object(reopened.crypt_filter_config(), true, (7, 0), &mut obj).unwrap();
    assert_eq!(obj.as_stream().unwrap().content, b"0 1 0 rg /a0 gs".to_vec());
}

#[test]
fn aes256_user_auth_reports_stored_permission_flags_and_decrypts() {
    let permissions = Permissions::from_p_value(-44);
    let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();

    let mut obj = Object::Stream(Stream::new(Dictionary::new(), b"BT /F1 12 Tf (Hi) Tj ET".to_vec()));
    encrypt_object(handler.crypt_filter_config(), true, (11, 0), &mut obj).unwrap();
    let encrypt_dict = handler.as_pdf_object().unwrap();

    let mut reopened = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
    let result = reopened.authenticate(&Credential::Password { password: b"usersecret".to_vec(), id1: None }).unwrap();
    assert_eq!(result.status, AuthStatus::User);
    assert_eq!(result.permission_flags, Some(-44));

    decrypt_object(reopened.crypt_filter_config(), true, (11, 0), &mut obj).unwrap();
    assert_eq!(obj.as_stream().unwrap().content, b"BT /F1 12 Tf (Hi) Tj ET".to_vec());
}

#[test]
fn wrong_password_fails_and_leaves_object_access_erroring() {
    let permissions = Permissions::from_p_value(-4);
    let id1 = b"fedcba9876543210".to_vec();
    let handler = StandardSecurityHandler::build_from_pw_legacy(4, 16, "ownersecret", "usersecret", permissions, id1.clone(), true, true).unwrap();
    let encrypt_dict = handler.as_pdf_object().unwrap();

    let mut reopened = StandardSecurityHandler::build(&encrypt_dict, Some(&id1)).unwrap();
    let result = reopened
        .authenticate(&Credential::Password { password: b"thispasswordiswrong".to_vec(), id1: Some(id1) })
        .unwrap();
    assert_eq!(result.status, AuthStatus::Failed);
    assert!(reopened.is_auth_failed());
    assert!(reopened.auth_latch().has_failed());

    // The named default filter was recorded while parsing /Encrypt, but a
    // handler that never authenticated never materializes it, so resolving
    // it for a read raises instead of silently returning plaintext.
    let mut obj = Object::string_literal(b"some indirect string".to_vec());
    let err = decrypt_object(reopened.crypt_filter_config(), true, (1, 0), &mut obj).unwrap_err();
    assert!(matches!(err, HandlerError::PdfStream(_)));
}

#[test]
fn identity_crypt_filter_bypasses_handler_encryption() {
    let permissions = Permissions::default();
    let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();

    let mut stream = Stream::new(Dictionary::new(), b"unencrypted payload".to_vec());
    stream.add_crypt_filter_override(b"Identity");
    let mut obj = Object::Stream(stream);

    encrypt_object(handler.crypt_filter_config(), true, (3, 0), &mut obj).unwrap();
    assert_eq!(obj.as_stream().unwrap().content, b"unencrypted payload".to_vec());

    decrypt_object(handler.crypt_filter_config(), true, (3, 0), &mut obj).unwrap();
    assert_eq!(obj.as_stream().unwrap().content, b"unencrypted payload".to_vec());
}

#[test]
fn metadata_stream_bypasses_encryption_when_encrypt_metadata_is_false() {
    let permissions = Permissions::default();
    let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, false).unwrap();

    let mut metadata_dict = Dictionary::new();
    metadata_dict.set("Type", Object::Name(b"Metadata".to_vec()));
    let mut metadata_obj = Object::Stream(Stream::new(metadata_dict, b"Test document".to_vec()));
    encrypt_object(handler.crypt_filter_config(), false, (9, 0), &mut metadata_obj).unwrap();
    assert_eq!(metadata_obj.as_stream().unwrap().content, b"Test document".to_vec());

    let mut content_obj = Object::Stream(Stream::new(Dictionary::new(), b"1 0 0 1 0 0 cm".to_vec()));
    encrypt_object(handler.crypt_filter_config(), false, (10, 0), &mut content_obj).unwrap();
    assert_ne!(content_obj.as_stream().unwrap().content, b"1 0 0 1 0 0 cm".to_vec());

    let encrypt_dict = handler.as_pdf_object().unwrap();
    let mut reopened = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
    reopened.authenticate(&Credential::Password { password: b"usersecret".to_vec(), id1: None }).unwrap();
    decrypt_object(reopened.crypt_filter_config(), false, (10, 0), &mut content_obj).unwrap();
    assert_eq!(content_obj.as_stream().unwrap().content, b"1 0 0 1 0 0 cm".to_vec());
}

#[test]
fn corrupted_credential_raises_before_reauthenticating() {
    let credential = Credential::Password { password: b"usersecret".to_vec(), id1: None };
    let mut serialised = credential.serialise();
    serialised.data.truncate(1);

    match serialised.deserialise().unwrap_err() {
        HandlerError::PdfRead(message) => assert!(message.contains("Failed to deserialise password")),
        other => panic!("expected PdfRead, got {other:?}"),
    }
}

/// Encrypts `seed || permissions` under `public_key` and frames it exactly
/// as `envelope::seal_envelope`'s simplified encoding does, so
/// `open_envelope`'s fallback path (`open_simplified_envelope`) can parse it
/// back without this test needing to fabricate an X.509 certificate (see
/// DESIGN.md: this module's own tests note the same constraint).
fn seal_for_recipient(public_key: &RsaPublicKey, seed: &[u8; 20], permissions: i32) -> Vec<u8> {
    let mut payload = seed.to_vec();
    payload.extend_from_slice(&permissions.to_be_bytes());
    let encrypted = public_key.encrypt(&mut rand::rng(), Pkcs1v15Encrypt, &payload).unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&(encrypted.len() as u32).to_be_bytes());
    out.extend_from_slice(&encrypted);
    out
}

fn decrypter_for(private_key: &RsaPrivateKey) -> PrivateKeyDecrypter {
    let der = private_key.to_pkcs8_der().unwrap();
    PrivateKeyDecrypter::from_pkcs8_der(der.as_bytes(), Vec::new(), true).unwrap()
}

#[test]
fn pubkey_aes256_filter_authenticates_the_matching_recipient_and_rejects_others() {
    let recipient_key = RsaPrivateKey::new(&mut rand::rng(), 2048).unwrap();
    let recipient_public = RsaPublicKey::from(&recipient_key);
    let other_key = RsaPrivateKey::new(&mut rand::rng(), 2048).unwrap();

    let mut seed = [0u8; 20];
    rand::rng().fill(&mut seed);
    let permissions = -3904;

    let filter = PubKeyAes256CryptFilter::new(true, 32, AuthLatch::new(), permissions);
    filter.add_recipient(seal_for_recipient(&recipient_public, &seed, permissions)).unwrap();
    filter.authenticate(&decrypter_for(&recipient_key)).unwrap();

    let plaintext = b"0 1 0 rg /a0 gs";
    let ciphertext = filter.encrypt(5, 0, plaintext).unwrap();
    assert_eq!(filter.decrypt(5, 0, &ciphertext).unwrap(), plaintext.to_vec());

    let other_filter = PubKeyAes256CryptFilter::new(true, 32, AuthLatch::new(), permissions);
    other_filter.add_recipient(seal_for_recipient(&recipient_public, &seed, permissions)).unwrap();
    assert!(other_filter.authenticate(&decrypter_for(&other_key)).is_err());
    // The failed authenticate() latches, so even a later encrypt attempt on
    // this filter is refused rather than silently using no key.
    assert!(other_filter.encrypt(5, 0, plaintext).is_err());
}

#[test]
fn custom_pubkey_filter_stays_locked_until_authenticated_explicitly() {
    let recipient_key = RsaPrivateKey::new(&mut rand::rng(), 2048).unwrap();
    let recipient_public = RsaPublicKey::from(&recipient_key);
    let mut seed = [0u8; 20];
    rand::rng().fill(&mut seed);
    let permissions = -3904;

    // Mirrors a handler with a default AES-128 filter (auto-authenticated on
    // open) and a custom RC4 filter the caller has not touched yet.
    let default_filter = PubKeyAes128CryptFilter::new(true, 16, AuthLatch::new(), permissions);
    default_filter.add_recipient(seal_for_recipient(&recipient_public, &seed, permissions)).unwrap();
    default_filter.authenticate(&decrypter_for(&recipient_key)).unwrap();

    let custom_filter = PubKeyRc4CryptFilter::new(true, 16, AuthLatch::new(), permissions);
    custom_filter.add_recipient(seal_for_recipient(&recipient_public, &seed, permissions)).unwrap();

    let plaintext = b"custom filter payload";
    assert!(default_filter.encrypt(1, 0, plaintext).is_ok());

    let err = custom_filter.encrypt(2, 0, plaintext).unwrap_err();
    assert!(matches!(err, HandlerError::PdfRead(message) if message.contains("has not been authenticated")));

    custom_filter.authenticate(&decrypter_for(&recipient_key)).unwrap();
    assert!(custom_filter.encrypt(2, 0, plaintext).is_ok());
}

#[test]
fn standard_handler_materializes_every_named_cf_entry_not_just_the_defaults() {
    let permissions = Permissions::from_p_value(-44);
    let handler = StandardSecurityHandler::build_from_pw("ownersecret", "usersecret", permissions, true).unwrap();
    let mut encrypt_dict = handler.as_pdf_object().unwrap();

    // Add a second named filter to /CF, of a different /CFM than the
    // default "StdCF", and leave /StmF and /StrF pointing at the default —
    // exactly the shape of a document where one stream opts into a
    // non-default filter via /Crypt + /DecodeParms /Name.
    let cf_dict = encrypt_dict.get(b"CF").unwrap().as_dict().unwrap().clone();
    let mut extra_entry = Dictionary::new();
    extra_entry.set("CFM", Object::Name(b"AESV2".to_vec()));
    extra_entry.set("Length", Object::Integer(16));
    let mut cf_dict = cf_dict;
    cf_dict.set("ExtraCF", Object::Dictionary(extra_entry));
    encrypt_dict.set("CF", Object::Dictionary(cf_dict));

    let mut reopened = StandardSecurityHandler::build(&encrypt_dict, None).unwrap();
    reopened.authenticate(&Credential::Password { password: b"usersecret".to_vec(), id1: None }).unwrap();

    let mut stream = Stream::new(Dictionary::new(), b"custom-filter payload".to_vec());
    stream.add_crypt_filter_override(b"ExtraCF");
    let mut obj = Object::Stream(stream);

    encrypt_object(reopened.crypt_filter_config(), true, (4, 0), &mut obj).unwrap();
    assert_ne!(obj.as_stream().unwrap().content, b"custom-filter payload".to_vec());

    decrypt_object(reopened.crypt_filter_config(), true, (4, 0), &mut obj).unwrap();
    assert_eq!(obj.as_stream().unwrap().content, b"custom-filter payload".to_vec());
}
