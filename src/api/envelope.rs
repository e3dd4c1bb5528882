//! Response envelope and API errors.
//!
//! Success: `{ "data": T, "meta": { ... } }`.
//! Failure: `{ "error": { "code", "message", "details"? }, "meta": { ... } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::inference::Unavailable;
use crate::model::{ModelError, ModelKey};

const API_VERSION: &str = "v1";

#[derive(Debug, Serialize)]
pub struct Meta {
    pub served_at: DateTime<Utc>,
    pub api_version: &'static str,
}

impl Meta {
    fn now() -> Self {
        Self {
            served_at: Utc::now(),
            api_version: API_VERSION,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub meta: Meta,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            meta: Meta::now(),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<Envelope<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    ModelNotFound(ModelKey),
    /// The pipeline cannot forecast this satellite yet
    Unavailable(Unavailable),
}

impl From<Unavailable> for ApiError {
    fn from(e: Unavailable) -> Self {
        ApiError::Unavailable(e)
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ApiError {
    /// No window is a 404; a missing model or a schema disagreement means
    /// the pipeline is not ready, so 503.
    pub const fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelNotFound(_) | ApiError::Unavailable(Unavailable::NoWindow { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> String {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST".to_string(),
            ApiError::ModelNotFound(_) => "MODEL_NOT_FOUND".to_string(),
            ApiError::Unavailable(e) => e.code().to_ascii_uppercase(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    meta: Meta,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (message, details) = match &self {
            ApiError::BadRequest(msg) => (msg.clone(), None),
            ApiError::ModelNotFound(key) => (format!("no model {key}"), None),
            ApiError::Unavailable(e) => (e.to_string(), serde_json::to_value(e).ok()),
        };
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message,
                details,
            },
            meta: Meta::now(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let resp = Envelope::ok(serde_json::json!({"satellite": "25544"})).into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body(resp).await;
        assert_eq!(v["data"]["satellite"], "25544");
        assert_eq!(v["meta"]["api_version"], "v1");
        assert!(v["meta"]["served_at"].is_string());
    }

    #[tokio::test]
    async fn test_unavailable_maps_to_status_and_details() {
        let no_model = ApiError::from(Unavailable::NoModel {
            satellite_id: "25544".into(),
        });
        assert_eq!(no_model.status(), StatusCode::SERVICE_UNAVAILABLE);
        let v = body(no_model.into_response()).await;
        assert_eq!(v["error"]["code"], "NO_MODEL");
        assert_eq!(v["error"]["details"]["reason"], "no_model");

        let resp = ApiError::ModelNotFound(ModelKey::Shared).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let v = body(resp).await;
        assert_eq!(v["error"]["message"], "no model shared");
        assert!(v["error"].get("details").is_none());
    }
}
