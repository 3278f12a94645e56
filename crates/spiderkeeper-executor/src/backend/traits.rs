// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend trait definitions.
//!
//! Defines the uniform interface every container runtime implements.

use async_trait::async_trait;
use futures::stream::BoxStream;
use spiderkeeper_protocol::wire::{ContainerSummary, ResourceInfo};
use spiderkeeper_protocol::{ExecutorType, RunSpec, RunState};
use thiserror::Error;

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The runtime CLI exited unsuccessfully.
    #[error("{program} failed (exit code {code:?}): {stderr}")]
    Command {
        /// CLI that was invoked (`docker`, `kubectl`).
        program: &'static str,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// Container or pod does not exist.
    #[error("Container not found: {0}")]
    NotFound(String),

    /// The run specification cannot be translated for this runtime.
    #[error("Invalid run specification: {0}")]
    InvalidSpec(String),

    /// The runtime produced output that could not be interpreted.
    #[error("Unexpected output from {program}: {details}")]
    UnexpectedOutput {
        /// CLI that produced the output.
        program: &'static str,
        /// What was wrong with it.
        details: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether the error means the container is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound(_) => true,
            BackendError::Command { stderr, .. } => {
                stderr.contains("No such container")
                    || stderr.contains("NotFound")
                    || stderr.contains("not found")
            }
            _ => false,
        }
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Stream of log lines.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Options for [`Backend::log`].
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    /// Keep the stream open and follow new output.
    pub follow: bool,
    /// Number of trailing lines to return.
    pub tail: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: false,
            tail: 50,
        }
    }
}

/// Trait for container runtimes.
///
/// Backends are pure adapters: they translate each call into one runtime
/// operation and never retry. Retry policy belongs to the scheduler.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Runtime this backend drives.
    fn backend_type(&self) -> ExecutorType;

    /// Start a container for the run and return its identifier.
    ///
    /// Docker returns the 12-character short id, Kubernetes the pod name.
    async fn run(&self, spec: &RunSpec) -> Result<String>;

    /// Current state of a container.
    async fn status(&self, container_id: &str) -> Result<RunState>;

    /// Stop a container. Stopping a missing container succeeds.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Remove a container, stopping it first. Removing a missing container succeeds.
    async fn delete(&self, container_id: &str) -> Result<()>;

    /// Every container carrying the spiderkeeper run label.
    async fn list_all(&self) -> Result<Vec<ContainerSummary>>;

    /// Container output, merged stdout and stderr.
    async fn log(&self, container_id: &str, options: LogOptions) -> Result<LogStream>;

    /// Capacity of the host or cluster.
    async fn resource_info(&self) -> Result<ResourceInfo>;
}
