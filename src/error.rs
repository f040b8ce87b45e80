use std::time::Duration;

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::repo::{Entity, RepoError};
use crate::validation::FieldErrors;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0} not found")] NotFound(Entity),
    #[error("invalid input: {0}")] Validation(FieldErrors),
    #[error("authentication required")] Unauthorized,
    #[error("insufficient role")] Forbidden,
    #[error("{0}")] Conflict(String),
    #[error("too many requests")] TooManyRequests(Duration),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(what) => ApiError::NotFound(what),
            RepoError::Conflict(msg) => ApiError::Conflict(msg.to_string()),
            RepoError::Internal(msg) => {
                log::error!("storage failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(e: FieldErrors) -> Self { ApiError::Validation(e) }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut res = HttpResponse::build(self.status_code());
        match self {
            // field map, e.g. {"title": ["must not be empty"]}
            ApiError::Validation(fields) => res.json(fields),
            ApiError::TooManyRequests(retry) => res
                .insert_header((header::RETRY_AFTER, retry.as_secs().max(1).to_string()))
                .json(ApiErrorBody { error: self.to_string() }),
            _ => res.json(ApiErrorBody { error: self.to_string() }),
        }
    }
}
