//! AES key wrap (RFC 3394), the default IV being `A6A6A6A6A6A6A6A6` per the
//! RFC and spec.md §4.1. CMS `KeyTransRecipientInfo` usually wraps the
//! content-encryption key straight under RSA, but a recipient's
//! `keyEncryptionAlgorithm` can legally name an AES key-wrap OID instead
//! (e.g. when the recipient's "key transport" key is itself a raw KEK); the
//! envelope module dispatches to this primitive for that case.

use crate::error::CryptoFormatError;
use aes_kw::{KekAes128, KekAes256};

pub fn aes_key_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, CryptoFormatError> {
    match kek.len() {
        16 => {
            let kek = KekAes128::try_from(kek).map_err(|_| CryptoFormatError::InvalidKeyLength)?;
            kek.unwrap_vec(wrapped).map_err(|_| CryptoFormatError::InvalidWrapData)
        }
        32 => {
            let kek = KekAes256::try_from(kek).map_err(|_| CryptoFormatError::InvalidKeyLength)?;
            kek.unwrap_vec(wrapped).map_err(|_| CryptoFormatError::InvalidWrapData)
        }
        _ => Err(CryptoFormatError::InvalidKeyLength),
    }
}

pub fn aes_key_wrap(kek: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoFormatError> {
    match kek.len() {
        16 => {
            let kek = KekAes128::try_from(kek).map_err(|_| CryptoFormatError::InvalidKeyLength)?;
            kek.wrap_vec(data).map_err(|_| CryptoFormatError::InvalidWrapData)
        }
        32 => {
            let kek = KekAes256::try_from(kek).map_err(|_| CryptoFormatError::InvalidKeyLength)?;
            kek.wrap_vec(data).map_err(|_| CryptoFormatError::InvalidWrapData)
        }
        _ => Err(CryptoFormatError::InvalidKeyLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 3394 §4.1: wrapping a 128-bit key under a 128-bit KEK yields 24
    // bytes (one extra 8-byte integrity block) and unwraps back losslessly.
    #[test]
    fn wrap_then_unwrap_round_trips_128_bit_key() {
        let kek = hex("000102030405060708090A0B0C0D0E0F");
        let data = hex("00112233445566778899AABBCCDDEEFF");

        let wrapped = aes_key_wrap(&kek, &data).unwrap();
        assert_eq!(wrapped.len(), data.len() + 8);

        let unwrapped = aes_key_unwrap(&kek, &wrapped).unwrap();
        assert_eq!(unwrapped, data);
    }

    #[test]
    fn unwrap_rejects_tampered_ciphertext() {
        let kek = hex("000102030405060708090A0B0C0D0E0F");
        let data = hex("00112233445566778899AABBCCDDEEFF");
        let mut wrapped = aes_key_wrap(&kek, &data).unwrap();
        wrapped[0] ^= 0xFF;
        assert!(aes_key_unwrap(&kek, &wrapped).is_err());
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
