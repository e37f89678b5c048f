//! Credential serialization (spec.md §3, §9): captures the material needed
//! to re-authenticate without redoing the original password/certificate
//! exchange, and a versioned wire form for persisting a held session.

use crate::error::HandlerError;

const TYPE_PASSWORD: &str = "pwd";
const TYPE_PKCS11: &str = "pkcs11";
const TYPE_ENVELOPE: &str = "envelope";

/// The decoded payload of a [`SerialisedCredential`]; the thing an
/// application actually wants to hold onto and hand back to
/// `Handler::authenticate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// A password plus, for legacy revisions, the first element of the
    /// document's `/ID` array it was derived against.
    Password { password: Vec<u8>, id1: Option<Vec<u8>> },
    /// Reserved for a PKCS#11 hardware-token credential; this core never
    /// produces one, but a caller can round-trip an opaque blob through it.
    Pkcs11 { token_label: Vec<u8> },
    /// A recipient certificate and the private key able to open its
    /// envelope, DER-encoded.
    Envelope { certificate_der: Vec<u8>, private_key_der: Vec<u8> },
}

/// The wire form from spec.md §9: `{u8 type_len, bytes type, bytes payload}`,
/// where `payload` is itself a sequence of length-prefixed fields specific
/// to `credential_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialisedCredential {
    pub credential_type: String,
    pub data: Vec<u8>,
}

fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_length_prefixed<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], HandlerError> {
    if input.len() < 4 {
        return Err(HandlerError::PdfRead("truncated serialised credential: missing length prefix".into()));
    }
    let (len_bytes, rest) = input.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    if rest.len() < len {
        return Err(HandlerError::PdfRead("truncated serialised credential: field shorter than declared".into()));
    }
    let (field, rest) = rest.split_at(len);
    *input = rest;
    Ok(field)
}

impl Credential {
    pub fn serialise(&self) -> SerialisedCredential {
        let (credential_type, data) = match self {
            Credential::Password { password, id1 } => {
                let mut data = Vec::new();
                write_length_prefixed(&mut data, password);
                match id1 {
                    Some(id1) => {
                        data.push(1);
                        write_length_prefixed(&mut data, id1);
                    }
                    None => data.push(0),
                }
                (TYPE_PASSWORD, data)
            }
            Credential::Pkcs11 { token_label } => {
                let mut data = Vec::new();
                write_length_prefixed(&mut data, token_label);
                (TYPE_PKCS11, data)
            }
            Credential::Envelope { certificate_der, private_key_der } => {
                let mut data = Vec::new();
                write_length_prefixed(&mut data, certificate_der);
                write_length_prefixed(&mut data, private_key_der);
                (TYPE_ENVELOPE, data)
            }
        };

        SerialisedCredential { credential_type: credential_type.to_string(), data }
    }
}

impl SerialisedCredential {
    pub fn deserialise(&self) -> Result<Credential, HandlerError> {
        let mut rest: &[u8] = &self.data;

        match self.credential_type.as_str() {
            TYPE_PASSWORD => {
                let password = read_length_prefixed(&mut rest)
                    .map_err(|_| HandlerError::PdfRead("Failed to deserialise password".into()))?
                    .to_vec();
                let has_id1 = *rest
                    .first()
                    .ok_or_else(|| HandlerError::PdfRead("Failed to deserialise password".into()))?;
                rest = &rest[1..];
                let id1 = if has_id1 == 1 {
                    Some(
                        read_length_prefixed(&mut rest)
                            .map_err(|_| HandlerError::PdfRead("Failed to deserialise password".into()))?
                            .to_vec(),
                    )
                } else {
                    None
                };
                Ok(Credential::Password { password, id1 })
            }
            TYPE_PKCS11 => {
                let token_label = read_length_prefixed(&mut rest)
                    .map_err(|_| HandlerError::PdfRead("Failed to decode serialised pkcs11 credential".into()))?
                    .to_vec();
                Ok(Credential::Pkcs11 { token_label })
            }
            TYPE_ENVELOPE => {
                let certificate_der = read_length_prefixed(&mut rest)
                    .map_err(|_| HandlerError::PdfRead("Failed to decode serialised pubkey credential".into()))?
                    .to_vec();
                let private_key_der = read_length_prefixed(&mut rest)
                    .map_err(|_| HandlerError::PdfRead("Failed to decode serialised pubkey credential".into()))?
                    .to_vec();
                Ok(Credential::Envelope { certificate_der, private_key_der })
            }
            other => Err(HandlerError::PdfRead(format!("unknown serialised credential type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_credential_round_trips_with_id1() {
        let credential = Credential::Password { password: b"usersecret".to_vec(), id1: Some(vec![1, 2, 3, 4]) };
        let serialised = credential.serialise();
        assert_eq!(serialised.credential_type, "pwd");
        assert_eq!(serialised.deserialise().unwrap(), credential);
    }

    #[test]
    fn password_credential_round_trips_without_id1() {
        let credential = Credential::Password { password: b"ownersecret".to_vec(), id1: None };
        let serialised = credential.serialise();
        assert_eq!(serialised.deserialise().unwrap(), credential);
    }

    #[test]
    fn envelope_credential_round_trips() {
        let credential = Credential::Envelope { certificate_der: vec![0xDE, 0xAD], private_key_der: vec![0xBE, 0xEF] };
        let serialised = credential.serialise();
        assert_eq!(serialised.credential_type, "envelope");
        assert_eq!(serialised.deserialise().unwrap(), credential);
    }

    #[test]
    fn corrupted_payload_raises_pdf_read_error() {
        let mut serialised = Credential::Password { password: b"x".to_vec(), id1: None }.serialise();
        serialised.data.truncate(1);
        let err = serialised.deserialise().unwrap_err();
        assert!(matches!(err, HandlerError::PdfRead(_)));
    }

    #[test]
    fn unknown_credential_type_raises_pdf_read_error() {
        let serialised = SerialisedCredential { credential_type: "bogus".to_string(), data: Vec::new() };
        assert!(serialised.deserialise().is_err());
    }
}
