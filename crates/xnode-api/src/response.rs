//! Response envelope shared by every panel-facing endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Every panel-facing payload is wrapped in `{ "response": ... }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub response: T,
}

pub fn wrap<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope { response: data })).into_response()
}

pub fn ok<T: Serialize>(data: T) -> Response {
    wrap(StatusCode::OK, data)
}

/// Outcome record used by the mutation endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl OpOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_null_error_on_success() {
        let json = serde_json::to_value(Envelope {
            response: OpOutcome::success(),
        })
        .unwrap();
        assert_eq!(json["response"]["success"], true);
        assert!(json["response"]["error"].is_null());
    }
}
