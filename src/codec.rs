//! Wire-format detection for encoded body blobs.
//!
//! Two physical encodings exist for ciphertext bodies:
//! - Legacy: structured text ending in `:i` plus 32 hex characters (a
//!   16-byte IV, hex-encoded). The string's own bytes are the payload.
//! - Current: base64 (standard alphabet).

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;

use crate::error::BodyError;

/// Trailing marker of the legacy text encoding: the literal `:i` delimiter
/// followed by exactly 32 hex characters, anchored at the end of the string.
static LEGACY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":i[0-9a-fA-F]{32}$").expect("legacy marker regex"));

/// True if `body` is in the legacy text encoding.
pub fn is_legacy_format(body: &str) -> bool {
    LEGACY_MARKER.is_match(body)
}

/// Classify an encoded body and decode it to raw ciphertext bytes.
///
/// Legacy-format bodies are already the literal byte content and are returned
/// as their UTF-8 bytes, never base64-decoded. Anything else is treated as
/// base64. Pure and synchronous; must run before any decrypt call.
pub fn detect_and_decode(body: &str) -> Result<Vec<u8>, BodyError> {
    if is_legacy_format(body) {
        return Ok(body.as_bytes().to_vec());
    }
    BASE64
        .decode(body)
        .map_err(|e| BodyError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IV_HEX: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn detects_legacy_marker() {
        let body = format!("c2VyaWFsaXplZA==:i{IV_HEX}");
        assert!(is_legacy_format(&body));
    }

    #[test]
    fn detects_uppercase_hex_iv() {
        let body = format!("payload:i{}", IV_HEX.to_uppercase());
        assert!(is_legacy_format(&body));
    }

    #[test]
    fn marker_must_be_anchored_at_end() {
        let body = format!("payload:i{IV_HEX}trailing");
        assert!(!is_legacy_format(&body));
    }

    #[test]
    fn marker_requires_exactly_32_hex_chars() {
        assert!(!is_legacy_format("payload:i0011"));
        // 33 hex chars after the delimiter: the marker no longer ends the string
        assert!(!is_legacy_format(&format!("payload:if{IV_HEX}")));
        assert!(!is_legacy_format(&format!("payload:i{}", &IV_HEX[..31])));
        assert!(!is_legacy_format(&format!("payload:i{}zz", &IV_HEX[..30])));
    }

    #[test]
    fn legacy_body_decodes_to_its_own_bytes() {
        let body = format!("serialized-ciphertext:i{IV_HEX}");
        let bytes = detect_and_decode(&body).unwrap();
        assert_eq!(bytes, body.as_bytes());
    }

    #[test]
    fn current_body_decodes_as_base64() {
        let body = BASE64.encode(b"raw ciphertext bytes");
        let bytes = detect_and_decode(&body).unwrap();
        assert_eq!(bytes, b"raw ciphertext bytes");
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = detect_and_decode("not base64!!!").unwrap_err();
        assert!(matches!(err, BodyError::Decode(_)));
        assert!(err.to_string().contains("decode failed"));
    }

    #[test]
    fn legacy_and_base64_paths_yield_same_bytes() {
        // The same physical payload, once as legacy text and once base64'd,
        // must decode to identical ciphertext bytes.
        let legacy = format!("abc123:i{IV_HEX}");
        let current = BASE64.encode(legacy.as_bytes());
        assert!(is_legacy_format(&legacy));
        assert!(!is_legacy_format(&current));
        assert_eq!(
            detect_and_decode(&legacy).unwrap(),
            detect_and_decode(&current).unwrap()
        );
    }
}
