// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable scheduler runtime.
//!
//! ```ignore
//! let runtime = SchedulerRuntime::builder()
//!     .database_url("sqlite://spiderkeeper.db")
//!     .server_url("http://server:8080/api/v1")
//!     .bind_addr("0.0.0.0:8081".parse()?)
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
use chrono_tz::Tz;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cron::{CronConfig, CronScheduler};
use crate::dispatch::{DispatchConfig, DispatchEngine};
use crate::handlers::{SchedulerState, router};
use crate::heartbeat_monitor::HeartbeatMonitor;
use crate::jobs::JobController;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::registry::ExecutorRegistry;
use crate::server_client::ServerClient;
use crate::store::{self, Store};

enum StoreSource {
    Url(String),
    Instance(Arc<dyn Store>),
}

/// Builder for creating a [`SchedulerRuntime`].
pub struct SchedulerRuntimeBuilder {
    store: Option<StoreSource>,
    server_url: Option<String>,
    collector_url: Option<String>,
    bind_addr: SocketAddr,
    heartbeat_interval: Duration,
    cron: CronConfig,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
    max_active_tasks_per_job: Option<i64>,
    reconcile_interval: Duration,
    reconcile_pending_grace: Duration,
}

impl Default for SchedulerRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            server_url: None,
            collector_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            heartbeat_interval: Duration::from_secs(10),
            cron: CronConfig::default(),
            poll_interval: Duration::from_secs(5),
            poll_timeout: None,
            max_active_tasks_per_job: None,
            reconcile_interval: ReconcilerConfig::default().interval,
            reconcile_pending_grace: ReconcilerConfig::default().pending_grace,
        }
    }
}

impl SchedulerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the store at `url` on start (this or [`store`](Self::store) is required).
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.store = Some(StoreSource::Url(url.into()));
        self
    }

    /// Use an already connected store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(StoreSource::Instance(store));
        self
    }

    /// Set the Server collaborator base URL (required).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Set the collector base URL handed to spiders.
    ///
    /// Default: the Server URL
    pub fn collector_url(mut self, url: impl Into<String>) -> Self {
        self.collector_url = Some(url.into());
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: `0.0.0.0:8081`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the interval executors heartbeat on.
    ///
    /// Default: 10 seconds
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Collapse missed cron fires into one.
    ///
    /// Default: true
    pub fn job_coalesce(mut self, coalesce: bool) -> Self {
        self.cron.coalesce = coalesce;
        self
    }

    /// Set the maximum concurrently running instances per job.
    ///
    /// Default: 1
    pub fn job_max_instances(mut self, max_instances: usize) -> Self {
        self.cron.max_instances = max_instances;
        self
    }

    /// Set the size of the blocking dispatch pool.
    ///
    /// Default: 10
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.cron.pool_size = size;
        self
    }

    /// Set the timezone cron expressions and run names use.
    ///
    /// Default: UTC
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.cron.timezone = timezone;
        self
    }

    /// Set how often due cron jobs are checked.
    ///
    /// Default: 1 second
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.cron.tick_interval = interval;
        self
    }

    /// Set the interval between container status checks.
    ///
    /// Default: 5 seconds
    pub fn task_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stop runs that are still going after `timeout`.
    ///
    /// Default: unset
    pub fn task_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Skip fires of jobs that already have `limit` active tasks.
    ///
    /// Default: unset
    pub fn max_active_tasks_per_job(mut self, limit: Option<i64>) -> Self {
        self.max_active_tasks_per_job = limit;
        self
    }

    /// Set the interval between reconciliation passes.
    ///
    /// Default: 20 seconds
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set how old a task must be before its created, restarting or paused
    /// container is reconciled.
    ///
    /// Default: zero
    pub fn reconcile_pending_grace(mut self, grace: Duration) -> Self {
        self.reconcile_pending_grace = grace;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SchedulerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("database_url or store is required"))?;
        let server_url = self
            .server_url
            .ok_or_else(|| anyhow::anyhow!("server_url is required"))?
            .trim_end_matches('/')
            .to_string();
        let collector_url = self
            .collector_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| server_url.clone());

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than zero");
        }

        Ok(SchedulerRuntimeConfig {
            store,
            server_url,
            bind_addr: self.bind_addr,
            heartbeat_interval: self.heartbeat_interval,
            dispatch: DispatchConfig {
                poll_interval: self.poll_interval,
                poll_timeout: self.poll_timeout,
                max_active_tasks_per_job: self.max_active_tasks_per_job,
                collector_url,
                timezone: self.cron.timezone,
            },
            cron: self.cron,
            reconciler: ReconcilerConfig {
                interval: self.reconcile_interval,
                pending_grace: self.reconcile_pending_grace,
            },
        })
    }
}

/// Configuration for a [`SchedulerRuntime`].
pub struct SchedulerRuntimeConfig {
    store: StoreSource,
    server_url: String,
    bind_addr: SocketAddr,
    heartbeat_interval: Duration,
    cron: CronConfig,
    dispatch: DispatchConfig,
    reconciler: ReconcilerConfig,
}

impl SchedulerRuntimeConfig {
    /// Start the runtime: connect the store, recover cron jobs, spawn the
    /// background workers and the HTTP server.
    pub async fn start(self) -> Result<SchedulerRuntime> {
        let store = match self.store {
            StoreSource::Url(url) => store::connect(&url).await?,
            StoreSource::Instance(store) => store,
        };

        let registry = ExecutorRegistry::new(store.clone(), self.heartbeat_interval);
        let server = ServerClient::new(self.server_url);

        let engine = DispatchEngine::new(
            tokio::runtime::Handle::current(),
            store.clone(),
            registry.clone(),
            server.clone(),
            self.dispatch,
        );
        let cron = Arc::new(CronScheduler::new(store.clone(), Arc::new(engine), self.cron));
        cron.recover().await?;

        // Heartbeat monitor
        let monitor = HeartbeatMonitor::new(store.clone(), registry.clone());
        let monitor_shutdown = monitor.shutdown_handle();
        let monitor_handle = tokio::spawn(async move {
            monitor.run().await;
        });

        // Reconciler
        let reconciler = Reconciler::new(
            store.clone(),
            registry.clone(),
            server.clone(),
            self.reconciler,
        );
        let reconciler_shutdown = reconciler.shutdown_handle();
        let reconciler_handle = tokio::spawn(async move {
            reconciler.run().await;
        });

        // Cron tick loop
        let cron_shutdown = cron.shutdown_handle();
        let cron_loop = cron.clone();
        let cron_handle = tokio::spawn(async move {
            cron_loop.run().await;
        });

        let state = Arc::new(SchedulerState {
            store: store.clone(),
            registry,
            jobs: JobController::new(cron, server),
        });
        let app = router(state);

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(async move {
            info!(addr = %local_addr, "Scheduler HTTP server starting");
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while server_shutdown_rx.changed().await.is_ok() {
                        if *server_shutdown_rx.borrow() {
                            break;
                        }
                    }
                })
                .await;
            info!("Scheduler HTTP server stopped");
            result.map_err(anyhow::Error::from)
        });

        info!(bind_addr = %local_addr, "SchedulerRuntime started");

        Ok(SchedulerRuntime {
            local_addr,
            store,
            server_handle,
            workers: vec![
                ("heartbeat monitor", monitor_shutdown, monitor_handle),
                ("reconciler", reconciler_shutdown, reconciler_handle),
                ("cron scheduler", cron_shutdown, cron_handle),
            ],
            server_shutdown_tx,
        })
    }
}

/// A running scheduler that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Runs already
/// on a dispatch worker are not interrupted.
pub struct SchedulerRuntime {
    local_addr: SocketAddr,
    store: Arc<dyn Store>,
    server_handle: JoinHandle<Result<()>>,
    workers: Vec<(&'static str, Arc<Notify>, JoinHandle<()>)>,
    server_shutdown_tx: watch::Sender<bool>,
}

impl SchedulerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SchedulerRuntimeBuilder {
        SchedulerRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("SchedulerRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        for (_, shutdown, _) in &self.workers {
            shutdown.notify_one();
        }

        for (name, _, handle) in self.workers {
            if let Err(e) = handle.await {
                error!("{} task panicked: {}", name, e);
            }
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("SchedulerRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Scheduler HTTP server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Scheduler HTTP server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
