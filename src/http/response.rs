//! Response envelopes.
//!
//! Every error and acknowledgement the balancer produces itself (as
//! opposed to bytes relayed from a backend) goes out as a small JSON
//! envelope so clients can tell the two apart.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

/// JSON body for locally generated responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub code: u16,
    pub message: String,
}

/// Build a JSON envelope response with the given status.
pub fn envelope(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Envelope {
            code: status.as_u16(),
            message: message.into(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_status_in_body_and_header() {
        let response = envelope(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let body = serde_json::to_string(&Envelope {
            code: 400,
            message: "empty client id".to_string(),
        })
        .unwrap();
        assert_eq!(body, r#"{"code":400,"message":"empty client id"}"#);
    }
}
