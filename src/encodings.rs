//! PDFDocEncoding conversion, used by the legacy (R2-R4) password algorithms
//! to turn a host password string into the byte string PDF Algorithm 2
//! expects (spec.md §4.3). Mirrors the shape of lopdf's
//! `encodings::string_to_bytes`, but only the single encoding this crate
//! needs rather than the full font-encoding table set lopdf carries for text
//! extraction.

/// PDFDocEncoding agrees with ISO 8859-1 (Latin-1) for the printable ASCII
/// range and for 0xA1-0xFF; the handful of codepoints below 0x20 and in
/// 0x80-0x9F that differ from Latin-1 (ISO 32000-1 Annex D.2) are not
/// reachable from ordinary passwords and are treated as unmapped here, same
/// as lopdf's encoding tables do for codepoints outside a font's mapping.
pub fn string_to_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|ch| {
            let code = ch as u32;
            if (0x20..=0x7E).contains(&code) || (0xA1..=0xFF).contains(&code) {
                Some(code as u8)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_password_round_trips_identically() {
        assert_eq!(string_to_bytes("usersecret"), b"usersecret".to_vec());
    }

    #[test]
    fn unmappable_codepoints_are_dropped() {
        assert_eq!(string_to_bytes("a\u{1F600}b"), b"ab".to_vec());
    }
}
