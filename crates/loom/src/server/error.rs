//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::manager::ManagerError;
use crate::project::{ControllerError, StoreError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<ControllerError> for ApiError {
    fn from(error: ControllerError) -> Self {
        match error {
            ControllerError::Manager(e) => ApiError::Manager(e),
            ControllerError::Store(e) => ApiError::Store(e),
        }
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Manager(e) => match e {
                ManagerError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
                ManagerError::NotRunning(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_running"),
                ManagerError::Compile { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "compile_error"),
                ManagerError::ModuleInit { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "module_init_error"),
                ManagerError::Hook { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "hook_error"),
                ManagerError::StopTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "stop_timeout"),
                ManagerError::RouteNotFound { .. } => (StatusCode::NOT_FOUND, "route_not_found"),
                ManagerError::Script { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "script_error"),
                ManagerError::Busy(_) => (StatusCode::TOO_MANY_REQUESTS, "busy"),
                ManagerError::Runtime { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "runtime_error"),
            },
            ApiError::Store(e) => match e {
                StoreError::ProjectNotFound(_) | StoreError::SourceNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                StoreError::InvalidId(_) | StoreError::InvalidSource(_) | StoreError::NoSource(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                code,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_errors_map_to_statuses() {
        let response = ApiError::from(ManagerError::AlreadyRunning("p1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = ApiError::from(ManagerError::RouteNotFound {
            project: "p1".to_string(),
            method: "GET".to_string(),
            path: "/x".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::from(ManagerError::Busy("p1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let response = ApiError::from(StoreError::InvalidId("..".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
