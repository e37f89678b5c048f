//! Recursive object-graph walk that applies a resolved crypt filter to every
//! string and stream reachable from an indirect object (spec.md §4.5, §8
//! scenarios 4 and 7). Generalizes lopdf's free `encrypt_object`/
//! `decrypt_object` functions in `encryption.rs`, replacing the single
//! `EncryptionState`-held default filter pair with a full
//! [`CryptFilterConfiguration`] lookup (named overrides, embedded-file
//! default, per-call string/stream resolution).

use crate::crypt_filter_config::CryptFilterConfiguration;
use crate::error::HandlerError;
use crate::model::{Object, ObjectId};

fn crypt_override(obj: &Object) -> Option<Option<String>> {
    let stream = obj.as_stream().ok()?;
    let in_filter_chain = stream.filters().map(|names| names.contains(&&b"Crypt"[..])).unwrap_or(false);
    if !in_filter_chain {
        return None;
    }
    let name = stream
        .dict
        .get(b"DecodeParms")
        .ok()
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|parms| parms.get(b"Name").ok())
        .and_then(Object::as_name)
        .map(|name| String::from_utf8_lossy(name).into_owned());
    Some(name)
}

fn is_embedded_file(obj: &Object) -> bool {
    obj.as_stream().map(|stream| stream.dict.has_type(b"EmbeddedFile")).unwrap_or(false)
}

fn string_or_stream_filter(
    config: &CryptFilterConfiguration,
    obj: &Object,
    override_name: &Option<Option<String>>,
) -> Result<std::sync::Arc<dyn crate::crypt_filters::CryptFilter>, HandlerError> {
    match obj {
        Object::String(..) => config.resolve_for_string(),
        Object::Stream(_) => config.resolve_for_stream(override_name.as_ref().map(|n| n.as_deref()), is_embedded_file(obj)),
        _ => unreachable!("only called for String/Stream objects"),
    }
}

/// True for the cross-reference stream itself, and for any string nested
/// inside its dictionary — PDF forbids encrypting either (ISO 32000-1
/// §7.5.8.2), since the reader must be able to locate objects before a
/// credential has authenticated.
fn is_xref_stream(obj: &Object) -> bool {
    obj.as_stream().map(|stream| stream.dict.has_type(b"XRef")).unwrap_or(false)
}

enum Direction {
    Encrypt,
    Decrypt,
}

fn walk(config: &CryptFilterConfiguration, encrypt_metadata: bool, obj_id: ObjectId, obj: &mut Object, direction: &Direction) -> Result<(), HandlerError> {
    if is_xref_stream(obj) {
        return Ok(());
    }
    if obj.type_name() == Some(b"Metadata") && !encrypt_metadata {
        return Ok(());
    }

    match obj {
        Object::Array(items) => {
            for item in items {
                walk(config, encrypt_metadata, obj_id, item, direction)?;
            }
            return Ok(());
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                walk(config, encrypt_metadata, obj_id, value, direction)?;
            }
            return Ok(());
        }
        // Strings and streams are the encryptable leaves; every other object
        // variant (numbers, names, booleans, references) is left untouched.
        Object::String(..) | Object::Stream(..) => {}
        _ => return Ok(()),
    }

    let override_name = crypt_override(obj);
    let filter = string_or_stream_filter(config, obj, &override_name)?;

    let (obj_num, gen) = obj_id;
    match obj {
        Object::String(content, _) => {
            *content = match direction {
                Direction::Encrypt => filter.encrypt(obj_num, gen, content)?,
                Direction::Decrypt => filter.decrypt(obj_num, gen, content)?,
            };
        }
        Object::Stream(stream) => {
            let transformed = match direction {
                Direction::Encrypt => filter.encrypt(obj_num, gen, &stream.content)?,
                Direction::Decrypt => filter.decrypt(obj_num, gen, &stream.content)?,
            };
            stream.set_content(transformed);
        }
        _ => unreachable!(),
    }

    Ok(())
}

/// Encrypts every string and stream reachable from `obj` in place, recursing
/// through arrays and dictionaries. A stream's own dictionary is not
/// recursed into; only its content is encrypted.
pub fn encrypt_object(config: &CryptFilterConfiguration, encrypt_metadata: bool, obj_id: ObjectId, obj: &mut Object) -> Result<(), HandlerError> {
    walk(config, encrypt_metadata, obj_id, obj, &Direction::Encrypt)
}

/// Decrypts every string and stream reachable from `obj` in place.
pub fn decrypt_object(config: &CryptFilterConfiguration, encrypt_metadata: bool, obj_id: ObjectId, obj: &mut Object) -> Result<(), HandlerError> {
    walk(config, encrypt_metadata, obj_id, obj, &Direction::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HandlerContext;
    use crate::crypt_filters::StandardAes128CryptFilter;
    use crate::model::{Dictionary, Stream};
    use std::sync::Arc;

    fn config_with_default() -> CryptFilterConfiguration {
        let mut config = CryptFilterConfiguration::new();
        let ctx = HandlerContext { file_key: vec![7u8; 16], encrypt_metadata: true, version: 4 };
        config.register_filter("StdCF", Arc::new(StandardAes128CryptFilter::from_handler_context(&ctx)));
        config.set_default_string_filter("StdCF").unwrap();
        config.set_default_stream_filter("StdCF").unwrap();
        config
    }

    #[test]
    fn stream_round_trips_through_encrypt_then_decrypt() {
        let config = config_with_default();
        let mut obj = Object::Stream(Stream::new(Dictionary::new(), b"0 1 0 rg /a0 gs".to_vec()));

        encrypt_object(&config, true, (7, 0), &mut obj).unwrap();
        assert_ne!(obj.as_stream().unwrap().content, b"0 1 0 rg /a0 gs".to_vec());

        decrypt_object(&config, true, (7, 0), &mut obj).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"0 1 0 rg /a0 gs".to_vec());
    }

    #[test]
    fn xref_stream_is_never_touched() {
        let config = config_with_default();
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XRef".to_vec()));
        let mut obj = Object::Stream(Stream::new(dict, b"raw xref bytes".to_vec()));

        encrypt_object(&config, true, (1, 0), &mut obj).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"raw xref bytes".to_vec());
    }

    #[test]
    fn metadata_bypass_leaves_content_readable_when_encrypt_metadata_is_false() {
        let config = config_with_default();
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"Metadata".to_vec()));
        let mut obj = Object::Stream(Stream::new(dict, b"Test document".to_vec()));

        encrypt_object(&config, false, (2, 0), &mut obj).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"Test document".to_vec());
    }

    #[test]
    fn identity_crypt_override_bypasses_the_default_filter() {
        let config = config_with_default();
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Array(vec![Object::Name(b"Crypt".to_vec())]));
        let mut parms = Dictionary::new();
        parms.set("Name", Object::Name(b"Identity".to_vec()));
        dict.set("DecodeParms", Object::Dictionary(parms));
        let mut obj = Object::Stream(Stream::new(dict, b"unencrypted payload".to_vec()));

        encrypt_object(&config, true, (3, 0), &mut obj).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"unencrypted payload".to_vec());
    }

    #[test]
    fn array_and_dictionary_nesting_is_traversed() {
        let config = config_with_default();
        let mut nested_dict = Dictionary::new();
        nested_dict.set("Title", Object::string_literal(b"secret title".to_vec()));
        let mut obj = Object::Array(vec![Object::Dictionary(nested_dict), Object::string_literal(b"top level".to_vec())]);

        encrypt_object(&config, true, (4, 0), &mut obj).unwrap();
        let Object::Array(items) = &obj else { panic!("expected array") };
        let Object::Dictionary(dict) = &items[0] else { panic!("expected dictionary") };
        assert_ne!(dict.get(b"Title").unwrap().as_str().unwrap(), b"secret title");
        assert_ne!(items[1].as_str().unwrap(), b"top level");

        decrypt_object(&config, true, (4, 0), &mut obj).unwrap();
        let Object::Array(items) = &obj else { panic!("expected array") };
        let Object::Dictionary(dict) = &items[0] else { panic!("expected dictionary") };
        assert_eq!(dict.get(b"Title").unwrap().as_str().unwrap(), b"secret title");
        assert_eq!(items[1].as_str().unwrap(), b"top level");
    }
}
