//! Tests for webhook signature validation.

use super::*;

const SECRET: &str = "super-secret-webhook-token";
const PAYLOAD: &[u8] = br#"{"action":"opened","number":1}"#;

/// Published HMAC-SHA1 test vector.
#[test]
fn test_sign_payload_known_vector() {
    let signature = sign_payload("key", b"The quick brown fox jumps over the lazy dog")
        .expect("signing should succeed");

    assert_eq!(
        signature,
        "sha1=de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
    );
}

#[test]
fn test_valid_signature_accepted() {
    let signature = sign_payload(SECRET, PAYLOAD).expect("signing should succeed");

    validate_signature(SECRET, PAYLOAD, Some(&signature)).expect("signature should validate");
}

#[test]
fn test_tampered_payload_rejected() {
    let signature = sign_payload(SECRET, PAYLOAD).expect("signing should succeed");

    let result = validate_signature(SECRET, br#"{"action":"closed"}"#, Some(&signature));

    assert!(matches!(result, Err(SignatureError::Mismatch)));
}

#[test]
fn test_wrong_secret_rejected() {
    let signature = sign_payload(SECRET, PAYLOAD).expect("signing should succeed");

    let result = validate_signature("some-other-secret", PAYLOAD, Some(&signature));

    assert!(matches!(result, Err(SignatureError::Mismatch)));
}

#[test]
fn test_missing_header_rejected() {
    let result = validate_signature(SECRET, PAYLOAD, None);

    assert!(matches!(result, Err(SignatureError::MissingSignature)));
}

#[test]
fn test_wrong_prefix_rejected() {
    let result = validate_signature(
        SECRET,
        PAYLOAD,
        Some("sha256=de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"),
    );

    assert!(matches!(
        result,
        Err(SignatureError::MalformedSignature { .. })
    ));
}

#[test]
fn test_invalid_hex_rejected() {
    let result = validate_signature(SECRET, PAYLOAD, Some("sha1=not-hex-at-all"));

    assert!(matches!(
        result,
        Err(SignatureError::MalformedSignature { .. })
    ));
}

/// A digest of the wrong length is a mismatch, not a parse error.
#[test]
fn test_truncated_digest_rejected() {
    let result = validate_signature(SECRET, PAYLOAD, Some("sha1=de7c9b85"));

    assert!(matches!(result, Err(SignatureError::Mismatch)));
}
