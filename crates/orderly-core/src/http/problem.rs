//! application/problem+json のエラーレスポンス

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::domain::{ErrorKind, OrderError};

pub type ApiResult<T> = Result<T, ApiProblem>;

#[derive(Debug)]
pub struct ApiProblem {
    status: StatusCode,
    title: &'static str,
    detail: String,
    kind: &'static str,
    correlation_id: String,
}

impl ApiProblem {
    pub fn from_domain(error: OrderError) -> Self {
        let detail = error.to_string();
        match error.kind() {
            ErrorKind::Validation => Self::validation(detail),
            ErrorKind::NotFound => Self::new(
                StatusCode::NOT_FOUND,
                "Not found",
                "https://orderly.dev/problems/not-found",
                detail,
            ),
            ErrorKind::Conflict => Self::new(
                StatusCode::CONFLICT,
                "Conflict",
                "https://orderly.dev/problems/conflict",
                detail,
            ),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Validation failed",
            "https://orderly.dev/problems/validation",
            detail,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn new(
        status: StatusCode,
        title: &'static str,
        kind: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            title,
            detail: detail.into(),
            kind,
            correlation_id: Ulid::new().to_string(),
        }
    }
}

impl From<OrderError> for ApiProblem {
    fn from(error: OrderError) -> Self {
        Self::from_domain(error)
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    status: u16,
    detail: String,
    correlation_id: String,
}

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        debug!(
            status = self.status.as_u16(),
            correlation_id = %self.correlation_id,
            detail = %self.detail,
            "request rejected"
        );
        let payload = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            correlation_id: self.correlation_id,
        };

        let mut response = (self.status, Json(payload)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );

        response
    }
}
