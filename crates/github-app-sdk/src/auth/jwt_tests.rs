//! Tests for App JWT minting.

use super::*;
use crate::auth::test_keys::{
    TEST_PRIVATE_KEY_PEM, TEST_PRIVATE_KEY_PKCS8_PEM, TEST_PUBLIC_KEY_PEM,
};
use crate::auth::{AppCredentials, PrivateKey};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DecodedClaims {
    iss: u64,
    iat: i64,
    exp: i64,
}

fn test_signer(app_id: u64) -> AppJwtSigner {
    let credentials = AppCredentials::new(
        GitHubAppId::new(app_id),
        PrivateKey::from_pem(TEST_PRIVATE_KEY_PEM).expect("test key should be valid"),
    );
    AppJwtSigner::new(&credentials).expect("signer construction should succeed")
}

/// Verify a minted JWT is a structurally valid three-part token.
#[test]
fn test_mint_produces_three_part_token() {
    let signer = test_signer(123456);

    let token = signer.mint().expect("minting should succeed");

    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "JWT should be header.payload.signature");
}

/// Verify the minted token decodes under the matching public key and carries
/// the expected claims: iss equals the app ID, and exp sits five minutes
/// after iat.
#[test]
fn test_mint_claims_and_signature() {
    let signer = test_signer(987654);
    let token = signer.mint().expect("minting should succeed");

    let decoding_key =
        DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY_PEM.as_bytes()).expect("valid public key");
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<DecodedClaims>(&token, &decoding_key, &validation)
        .expect("token should verify under the matching public key");

    assert_eq!(data.claims.iss, 987654);
    assert_eq!(data.claims.exp - data.claims.iat, JWT_LIFETIME_SECS);

    let now = Utc::now().timestamp();
    assert!(data.claims.iat <= now + 5, "iat should not be in the future");
    assert!(data.claims.exp > now, "token should not be pre-expired");
}

/// Verify each mint call produces a token with fresh claims.
#[test]
fn test_mint_is_repeatable() {
    let signer = test_signer(42);

    let first = signer.mint().expect("first mint");
    let second = signer.mint().expect("second mint");

    // Same structure either way; timestamps may or may not tick between
    // calls so only structure is asserted.
    assert_eq!(first.split('.').count(), 3);
    assert_eq!(second.split('.').count(), 3);
}

/// Verify a PKCS#8 key is accepted and produces verifiable tokens.
#[test]
fn test_mint_with_pkcs8_key() {
    let credentials = AppCredentials::new(
        GitHubAppId::new(7),
        PrivateKey::from_pem(TEST_PRIVATE_KEY_PKCS8_PEM).expect("pkcs8 key should be valid"),
    );
    let signer = AppJwtSigner::new(&credentials).expect("signer construction should succeed");

    let token = signer.mint().expect("minting should succeed");

    let decoding_key =
        DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY_PEM.as_bytes()).expect("valid public key");
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_required_spec_claims(&["exp"]);
    decode::<DecodedClaims>(&token, &decoding_key, &validation)
        .expect("pkcs8-signed token should verify");
}

/// Verify the signer's Debug output never leaks key material.
#[test]
fn test_signer_debug_redacts_key() {
    let signer = test_signer(11);

    let debug = format!("{:?}", signer);

    assert!(debug.contains("REDACTED"));
    assert!(!debug.contains("MIIE"), "PEM body must not leak into Debug");
}
