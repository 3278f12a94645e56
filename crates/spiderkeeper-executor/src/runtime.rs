// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable executor runtime.
//!
//! ```ignore
//! let runtime = ExecutorRuntime::builder()
//!     .backend(Arc::new(DockerBackend::new(DockerConfig::default())))
//!     .bind_addr("0.0.0.0:8082".parse()?)
//!     .scheduler_url("http://scheduler:8081/api/v1")
//!     .registration(RegisterExecutor { .. })
//!     .build()?
//!     .start()
//!     .await?;
//!
//! runtime.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use spiderkeeper_protocol::wire::RegisterExecutor;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::Backend;
use crate::handlers::{ExecutorState, router};
use crate::heartbeat::{HeartbeatEmitter, HeartbeatEmitterConfig};

/// Builder for creating an [`ExecutorRuntime`].
pub struct ExecutorRuntimeBuilder {
    backend: Option<Arc<dyn Backend>>,
    registration: Option<RegisterExecutor>,
    scheduler_url: Option<String>,
    bind_addr: SocketAddr,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    log_tail: usize,
}

impl Default for ExecutorRuntimeBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            registration: None,
            scheduler_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
            log_tail: 50,
        }
    }
}

impl ExecutorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container backend (required).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the registration payload sent to the scheduler (required).
    pub fn registration(mut self, registration: RegisterExecutor) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Set the scheduler base URL (required).
    pub fn scheduler_url(mut self, url: impl Into<String>) -> Self {
        self.scheduler_url = Some(url.into());
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: `0.0.0.0:8082`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the heartbeat interval.
    ///
    /// Default: 10 seconds
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the cap for the heartbeat retry back-off.
    ///
    /// Default: 60 seconds
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the default number of log lines.
    ///
    /// Default: 50
    pub fn log_tail(mut self, tail: usize) -> Self {
        self.log_tail = tail;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ExecutorRuntimeConfig> {
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;
        let registration = self
            .registration
            .ok_or_else(|| anyhow::anyhow!("registration is required"))?;
        let scheduler_url = self
            .scheduler_url
            .ok_or_else(|| anyhow::anyhow!("scheduler_url is required"))?;

        if registration.executor_type != backend.backend_type() {
            anyhow::bail!(
                "registration type {} does not match backend type {}",
                registration.executor_type,
                backend.backend_type()
            );
        }

        Ok(ExecutorRuntimeConfig {
            backend,
            heartbeat: HeartbeatEmitterConfig {
                scheduler_url: scheduler_url.trim_end_matches('/').to_string(),
                registration,
                interval: self.heartbeat_interval,
                timeout: self.heartbeat_timeout,
            },
            bind_addr: self.bind_addr,
            log_tail: self.log_tail,
        })
    }
}

/// Configuration for an [`ExecutorRuntime`].
pub struct ExecutorRuntimeConfig {
    backend: Arc<dyn Backend>,
    heartbeat: HeartbeatEmitterConfig,
    bind_addr: SocketAddr,
    log_tail: usize,
}

impl ExecutorRuntimeConfig {
    /// Start the runtime: bind the HTTP server, register with the scheduler
    /// and spawn the heartbeat loop.
    ///
    /// Fails if the scheduler rejects or cannot be reached for registration.
    pub async fn start(self) -> Result<ExecutorRuntime> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let emitter = HeartbeatEmitter::new(self.backend.clone(), self.heartbeat);
        let executor_id = emitter.register().await?;
        let heartbeat_shutdown = emitter.shutdown_handle();
        let heartbeat_handle = tokio::spawn(async move {
            emitter.run(executor_id).await;
        });

        let state = Arc::new(ExecutorState::new(self.backend.clone()).with_log_tail(self.log_tail));
        let app = router(state);

        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(async move {
            info!(addr = %local_addr, "Executor HTTP server starting");
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while server_shutdown_rx.changed().await.is_ok() {
                        if *server_shutdown_rx.borrow() {
                            break;
                        }
                    }
                })
                .await;
            info!("Executor HTTP server stopped");
            result.map_err(anyhow::Error::from)
        });

        info!(
            bind_addr = %local_addr,
            executor_id,
            backend = %self.backend.backend_type(),
            "ExecutorRuntime started"
        );

        Ok(ExecutorRuntime {
            executor_id,
            local_addr,
            server_handle,
            heartbeat_handle,
            server_shutdown_tx,
            heartbeat_shutdown,
        })
    }
}

/// A running executor that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ExecutorRuntime {
    executor_id: i64,
    local_addr: SocketAddr,
    server_handle: JoinHandle<Result<()>>,
    heartbeat_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    heartbeat_shutdown: Arc<Notify>,
}

impl ExecutorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ExecutorRuntimeBuilder {
        ExecutorRuntimeBuilder::new()
    }

    /// Executor id assigned by the scheduler.
    pub fn executor_id(&self) -> i64 {
        self.executor_id
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("ExecutorRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.heartbeat_shutdown.notify_one();

        if let Err(e) = self.heartbeat_handle.await {
            error!("Heartbeat emitter task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ExecutorRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Executor HTTP server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Executor HTTP server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
