//! Tests for connector error types.

use super::*;
use axum::body::to_bytes;

/// Verify that ConnectionError keeps the SDK's retry classification for
/// wrapped errors and marks connector-specific failures permanent.
#[test]
fn test_connection_error_transience() {
    assert!(ConnectionError::Api(ApiError::http(502, "bad gateway")).is_transient());
    assert!(!ConnectionError::Api(ApiError::http(404, "not found")).is_transient());

    assert!(!ConnectionError::ChangeNotFound {
        project: "acme/widgets".to_string(),
        number: 42
    }
    .is_transient());
    assert!(!ConnectionError::AmbiguousSha {
        sha: "abc123".to_string()
    }
    .is_transient());
    assert!(!ConnectionError::InvalidChangeNumber {
        value: "not-a-number".to_string()
    }
    .is_transient());
    assert!(!ConnectionError::Stopped.is_transient());
}

/// Verify the messages operators will grep for.
#[test]
fn test_connection_error_display() {
    let err = ConnectionError::ChangeNotFound {
        project: "acme/widgets".to_string(),
        number: 17,
    };
    assert_eq!(
        err.to_string(),
        "Failed to retrieve pull request #17 of acme/widgets"
    );

    let err = ConnectionError::AmbiguousSha {
        sha: "deadbeef".to_string(),
    };
    assert_eq!(err.to_string(), "Multiple pulls found with head sha deadbeef");
}

/// Verify merge failures flow through with the provider's message intact.
#[test]
fn test_merge_failure_passthrough() {
    let err = ConnectionError::Api(ApiError::MergeFailed {
        message: "Pull Request is not mergeable".to_string(),
    });
    assert!(err.to_string().contains("Pull Request is not mergeable"));
    assert!(!err.is_transient());
}

/// Verify the payload endpoint maps errors to the documented status codes
/// and renders a JSON body with error, status, and timestamp fields.
#[tokio::test]
async fn test_payload_error_responses() {
    let response = PayloadError::Unauthorized(SignatureError::Mismatch).into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["status"], 401);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("signature"));
    assert!(body["timestamp"].is_string());

    let response = PayloadError::MissingEventHeader.into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = PayloadError::TokenNotConfigured.into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = PayloadError::IntakeUnavailable.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok()),
        Some("30")
    );
}
