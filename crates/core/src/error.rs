use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for all proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request body: {0}")]
    InvalidJson(String),

    #[error("invalid request shape: {0}")]
    InvalidShape(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("backend {model} already registered as a default")]
    RegistryCollision { model: String },

    /// A non-retryable upstream response (status >= 400), returned verbatim.
    #[error("upstream error (status {status})")]
    Upstream {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },

    /// All backends in a route exhausted their retry budgets.
    #[error("all backends failed: {0}")]
    AllBackendsFailed(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) | Self::InvalidShape(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ModelNotFound(_) => StatusCode::BAD_REQUEST,
            Self::RegistryCollision { .. } => StatusCode::CONFLICT,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::AllBackendsFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Translation(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidShape(_) => "invalid_json_shape",
            Self::BadRequest(_) => "invalid_request_error",
            Self::ModelNotFound(_) => "invalid_request_error",
            Self::RegistryCollision { .. } => "model_collision",
            Self::Upstream { .. } => "upstream_error",
            Self::AllBackendsFailed(_) => "bad_gateway",
            Self::Translation(_) | Self::Internal(_) => "server_error",
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidShape(_) => "invalid_json_shape",
            Self::BadRequest(_) => "invalid_request",
            Self::ModelNotFound(_) => "model_not_found",
            Self::RegistryCollision { .. } => "model_collision",
            Self::AllBackendsFailed(_) => "bad_gateway",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Terminal backend errors (>=400) are returned verbatim to the
        // client, headers filtered, per the error taxonomy's rule 4.
        if let Self::Upstream { body, headers, .. } = &self {
            let mut builder = Response::builder().status(status);
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            if let Ok(resp) = builder.body(axum::body::Body::from(body.clone())) {
                return resp;
            }
        }

        // Synthesized all-backends-failed uses the bare-string detail shape.
        if let Self::AllBackendsFailed(message) = &self {
            let body = json!({ "detail": message });
            return (status, [("content-type", "application/json")], body.to_string())
                .into_response();
        }

        let body = json!({
            "detail": {
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "code": self.error_code(),
                }
            }
        });

        (status, [("content-type", "application/json")], body.to_string()).into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Internal(format!("unexpected network error: {e}"))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Translation(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_is_400() {
        let err = ProxyError::ModelNotFound("ghost".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn registry_collision_is_409() {
        let err = ProxyError::RegistryCollision { model: "alpha".into() };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn upstream_status_passed_through() {
        let err = ProxyError::Upstream {
            status: 503,
            body: "{}".into(),
            headers: vec![],
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
