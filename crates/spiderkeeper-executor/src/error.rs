// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spiderkeeper-executor.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spiderkeeper_protocol::wire::ErrorDetail;
use thiserror::Error;

use crate::backend::BackendError;

/// Executor errors.
///
/// The remote-call variants name the operation that failed; the scheduler
/// sees their message as the `detail` of the HTTP error response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Starting a container failed.
    #[error("Failed to run task: {0}")]
    RemoteTaskRun(#[source] BackendError),

    /// Inspecting a container failed.
    #[error("Failed to check task: {0}")]
    RemoteTaskCheck(#[source] BackendError),

    /// Listing containers or reading logs failed.
    #[error("Failed to get task: {0}")]
    RemoteTaskGet(#[source] BackendError),

    /// Stopping a container failed.
    #[error("Failed to stop container: {0}")]
    ContainerStop(#[source] BackendError),

    /// Removing a container failed.
    #[error("Failed to remove container: {0}")]
    ContainerRm(#[source] BackendError),

    /// Registration with the scheduler failed.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// HTTP call to the scheduler failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type using executor Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn backend(&self) -> Option<&BackendError> {
        match self {
            Error::RemoteTaskRun(e)
            | Error::RemoteTaskCheck(e)
            | Error::RemoteTaskGet(e)
            | Error::ContainerStop(e)
            | Error::ContainerRm(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.backend() {
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(BackendError::InvalidSpec(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
            None => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorDetail {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
