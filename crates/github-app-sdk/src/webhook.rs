//! Webhook payload signature validation.
//!
//! GitHub signs webhook deliveries with an HMAC-SHA1 digest of the raw
//! payload, carried in the `X-Hub-Signature` header as `sha1=<hex>`.
//! Validation recomputes the digest with the shared webhook secret and
//! compares the two in constant time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const SIGNATURE_PREFIX: &str = "sha1=";

/// Sign a payload the way GitHub does, yielding `sha1=<hex>`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let digest = compute_hmac(secret, payload)?;
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Validate a signature header value against a payload.
///
/// Pass `None` when the request carried no signature header at all.
///
/// # Errors
///
/// * [`SignatureError::MissingSignature`] when no header was present
/// * [`SignatureError::MalformedSignature`] when the header is not
///   `sha1=` followed by hex
/// * [`SignatureError::Mismatch`] when the digest does not match
pub fn validate_signature(
    secret: &str,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::MissingSignature)?;
    let claimed = parse_signature(signature)?;
    let expected = compute_hmac(secret, payload)?;

    if !constant_time_compare(&claimed, &expected) {
        return Err(SignatureError::Mismatch);
    }
    Ok(())
}

/// Extract the hex-encoded digest from GitHub's `sha1=<hex>` format.
fn parse_signature(signature: &str) -> Result<Vec<u8>, SignatureError> {
    let Some(hex_signature) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return Err(SignatureError::MalformedSignature {
            message: format!(
                "signature must start with '{SIGNATURE_PREFIX}', got: '{}'",
                signature.chars().take(10).collect::<String>()
            ),
        });
    };

    hex::decode(hex_signature).map_err(|e| SignatureError::MalformedSignature {
        message: format!("invalid hex encoding in signature: {e}"),
    })
}

fn compute_hmac(secret: &str, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|e| SignatureError::Hmac {
            message: e.to_string(),
        })?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Length check first, then constant-time comparison of the digests.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
