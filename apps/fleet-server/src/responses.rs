use axum::{http::StatusCode, response::IntoResponse, Json};
use fleet_kernel::StoreError;
use serde_json::json;

/// Errors surfaced by the poll gateway, rendered as problem+json.
#[derive(Debug, thiserror::Error)]
pub(crate) enum GatewayError {
    #[error("api_key is required")]
    MissingKey,
    #[error("unknown api_key")]
    UnknownKey,
    #[error("{0}")]
    BadRequest(String),
    #[error("installation {0} not found")]
    InstallationNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn problem(status: StatusCode, title: &str, detail: &str) -> axum::response::Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/problem+json")],
        Json(json!({
            "type": "about:blank",
            "title": title,
            "status": status.as_u16(),
            "detail": detail,
        })),
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let detail = self.to_string();
        match &self {
            GatewayError::MissingKey | GatewayError::UnknownKey => {
                problem(StatusCode::UNAUTHORIZED, "Unauthorized", &detail)
            }
            GatewayError::BadRequest(_) | GatewayError::Store(StoreError::Invalid(_)) => {
                problem(StatusCode::BAD_REQUEST, "Bad Request", &detail)
            }
            GatewayError::InstallationNotFound(_) | GatewayError::Store(StoreError::NotFound { .. }) => {
                problem(StatusCode::NOT_FOUND, "Not Found", &detail)
            }
            GatewayError::Store(StoreError::Conflict { .. }) => {
                problem(StatusCode::CONFLICT, "Conflict", &detail)
            }
            GatewayError::Store(err) => {
                tracing::error!(target: "fleet::gateway", error = %err, "store failure");
                problem(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "store unavailable",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::InstallStatus;

    #[tokio::test]
    async fn conflict_maps_to_409_problem() {
        let resp = GatewayError::Store(StoreError::Conflict {
            id: "i1".into(),
            expected: InstallStatus::Pending,
            actual: InstallStatus::Active,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(
            resp.headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/problem+json")
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], 409);
        assert_eq!(value["type"], "about:blank");
    }

    #[test]
    fn internal_errors_hide_details() {
        let resp = GatewayError::Store(StoreError::Join("panicked".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
