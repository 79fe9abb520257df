//! The gateway's base64 dialect: standard alphabet with `/` replaced by `@`.
//!
//! This is a deliberate, documented deviation (design §6) that makes the
//! encoded form safe to embed directly in a JSON string without escaping.
//! Both directions must agree on the substitution, so it is built once here
//! with the `base64` crate's `Alphabet` customization point rather than
//! hand-rolled.

use base64::alphabet::Alphabet;
use base64::engine::{general_purpose::PAD, GeneralPurpose};
use base64::Engine;

const ALPHABET_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+@";

fn engine() -> GeneralPurpose {
    let alphabet = Alphabet::new(ALPHABET_CHARS).expect("alphabet is 64 distinct printable chars");
    GeneralPurpose::new(&alphabet, PAD)
}

/// Encode bytes using the `/`-to-`@` alphabet, with standard `=` padding.
pub fn encode(input: &[u8]) -> String {
    engine().encode(input)
}

/// Decode a string produced by [`encode`]. Rejects input containing a raw
/// `/`, since that byte is never valid in this dialect.
pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    engine().decode(input)
}

/// Encode the HTTP Basic credential pair `id:key` for the `Authorization`
/// header (design §6).
pub fn encode_basic_auth(id: &str, key: &str) -> String {
    encode(format!("{id}:{key}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_byte_value() {
        let input: Vec<u8> = (0..=255u8).collect();
        let encoded = encode(&input);
        assert!(!encoded.contains('/'));
        let decoded = decode(&encoded).expect("decodes");
        assert_eq!(decoded, input);
    }

    #[test]
    fn never_emits_a_raw_slash() {
        // Bytes chosen so a standard base64 encoder would emit '/': 0xFF 0xFF 0xFF -> "////"
        let input = [0xFFu8, 0xFF, 0xFF];
        let encoded = encode(&input);
        assert!(!encoded.contains('/'));
        assert!(encoded.contains('@'));
    }

    #[test]
    fn at_sign_decodes_to_six_bit_value_63() {
        // A lone "@AAA" quartet: '@' is the first sextet -> top 6 bits all 1 (111111)
        // followed by zero bits, i.e. byte 0 = 0b11111100 = 0xFC.
        let decoded = decode("@AAA").expect("decodes");
        assert_eq!(decoded[0], 0b1111_1100);
    }

    #[test]
    fn basic_auth_pair_round_trips() {
        let encoded = encode_basic_auth("0123456789abcdef", "f".repeat(64).as_str());
        let raw = decode(&encoded).expect("decodes");
        let text = String::from_utf8(raw).expect("utf8");
        assert_eq!(text, format!("0123456789abcdef:{}", "f".repeat(64)));
    }
}
