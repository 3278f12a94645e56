// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spiderkeeper-scheduler.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spiderkeeper_protocol::wire::ErrorDetail;
use thiserror::Error;

/// Scheduler errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// HTTP call to a collaborator failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A referenced executor, task, job or artifact does not exist.
    #[error("Object does not exist: {0}")]
    ObjectDoesNotExist(String),

    /// The executor could not start the container.
    #[error("Failed to run task: {0}")]
    RemoteTaskRun(String),

    /// The executor could not report container state.
    #[error("Failed to check task: {0}")]
    RemoteTaskCheck(String),

    /// The executor could not stop the container.
    #[error("Failed to stop container: {0}")]
    ContainerStop(String),

    /// The executor could not remove the container.
    #[error("Failed to remove container: {0}")]
    ContainerRm(String),

    /// The job is already scheduled.
    #[error("Job run error: {0}")]
    JobRun(String),

    /// The job is not scheduled.
    #[error("Job stopped error: {0}")]
    JobStopped(String),

    /// The job cannot be paused.
    #[error("Job pause error: {0}")]
    JobPause(String),

    /// The job cannot be resumed.
    #[error("Job unpause error: {0}")]
    JobUnpause(String),

    /// Request or cron expression failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using scheduler Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Database(_) | Error::Migrate(_) => "DatabaseError",
            Error::Http(_) => "HttpError",
            Error::Json(_) => "JsonError",
            Error::ObjectDoesNotExist(_) => "ObjectDoesNotExist",
            Error::RemoteTaskRun(_) => "RemoteTaskRunError",
            Error::RemoteTaskCheck(_) => "RemoteTaskCheckError",
            Error::ContainerStop(_) => "ContainerStopError",
            Error::ContainerRm(_) => "ContainerRmError",
            Error::JobRun(_) => "JobRunError",
            Error::JobStopped(_) => "JobStoppedError",
            Error::JobPause(_) => "JobPauseError",
            Error::JobUnpause(_) => "JobUnpauseError",
            Error::Validation(_) => "ValidationError",
            Error::Other(_) => "Error",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ObjectDoesNotExist(_) => StatusCode::NOT_FOUND,
            Error::JobRun(_) | Error::JobStopped(_) | Error::JobPause(_) | Error::JobUnpause(_) => {
                StatusCode::CONFLICT
            }
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::RemoteTaskRun(_)
            | Error::RemoteTaskCheck(_)
            | Error::ContainerStop(_)
            | Error::ContainerRm(_)
            | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        }
        let body = ErrorDetail {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::ObjectDoesNotExist("executor 3".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::JobPause("job-1".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::Validation("bad cron".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::RemoteTaskRun("no container id".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Other("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::JobRun("x".into()).kind(), "JobRunError");
        assert_eq!(Error::ObjectDoesNotExist("x".into()).kind(), "ObjectDoesNotExist");
    }
}
