use axum::{
    extract::rejection::JsonRejection,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};

use crate::engine::error::EngineError;

use super::api::{ErrorResponse, ErrorResponseType};

pub enum ServerError {
    NotFound(Uri),
    Engine(EngineError),
    UncaughtError { message: String },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            Self::Engine(err) => {
                let (status, error_type) = match &err {
                    EngineError::Parse { .. } => {
                        (StatusCode::BAD_REQUEST, ErrorResponseType::ParseError)
                    }
                    EngineError::Bind(_) => {
                        (StatusCode::BAD_REQUEST, ErrorResponseType::BindError)
                    }
                    EngineError::Forbidden => {
                        (StatusCode::FORBIDDEN, ErrorResponseType::Forbidden)
                    }
                    EngineError::ResultTooLarge { .. } => {
                        (StatusCode::BAD_REQUEST, ErrorResponseType::ResultTooLarge)
                    }
                    EngineError::Backend(_) | EngineError::Internal(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponseType::UncaughtError,
                    ),
                };
                (
                    status,
                    axum::Json(ErrorResponse {
                        message: err.to_string(),
                        error_type,
                    }),
                )
                    .into_response()
            }
            Self::UncaughtError { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(ErrorResponse {
                    message,
                    error_type: ErrorResponseType::UncaughtError,
                }),
            )
                .into_response(),
            Self::NotFound(uri) => (
                StatusCode::NOT_FOUND,
                format!("Path not found: {}", uri.path()),
            )
                .into_response(),
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::UncaughtError {
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(err: JsonRejection) -> Self {
        Self::Engine(EngineError::Bind(err.to_string()))
    }
}
