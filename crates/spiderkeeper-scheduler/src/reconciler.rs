// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation loop.
//!
//! Audits every online executor against what it actually runs. Any
//! container that is not running is written back to the task record and the
//! Server, then removed; the executor's `task_count` is reset to the number
//! of running containers. With a pending grace period, a container that is
//! not yet terminal is left alone until its task is older than the grace.
//!
//! A pass with nothing new to report performs no writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spiderkeeper_protocol::wire::ContainerSummary;
use spiderkeeper_protocol::RunState;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::executor_client::ExecutorClient;
use crate::registry::ExecutorRegistry;
use crate::server_client::ServerClient;
use crate::store::{ExecutorRecord, Store};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between passes.
    pub interval: Duration,
    /// Minimum task age before a created, restarting or paused container
    /// is reconciled.
    pub pending_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            pending_grace: Duration::ZERO,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Executors whose containers were listed.
    pub executors: usize,
    /// Running containers observed.
    pub running: usize,
    /// Non-running containers written back and removed.
    pub reconciled: usize,
    /// Rows changed in the store.
    pub writes: usize,
}

/// Background worker that reconciles recorded state with the executors.
pub struct Reconciler {
    store: Arc<dyn Store>,
    registry: ExecutorRegistry,
    server: ServerClient,
    executors: ExecutorClient,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ExecutorRegistry,
        server: ServerClient,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            server,
            executors: ExecutorClient::new(),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_executor_client(mut self, executors: ExecutorClient) -> Self {
        self.executors = executors;
        self
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Reconciler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    match self.reconcile_once().await {
                        Ok(report) if report.writes > 0 || report.reconciled > 0 => {
                            info!(
                                executors = report.executors,
                                running = report.running,
                                reconciled = report.reconciled,
                                writes = report.writes,
                                "Reconciliation pass applied changes"
                            );
                        }
                        Ok(report) => {
                            debug!(executors = report.executors, running = report.running, "Reconciliation pass clean");
                        }
                        Err(e) => error!(error = %e, "Reconciliation pass failed"),
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Reconcile every online executor once.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for executor in self.registry.list_online(None).await? {
            let containers = match self.executors.containers(&executor.url).await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(executor_id = executor.id, url = %executor.url, error = %e, "Failed to list containers");
                    continue;
                }
            };
            report.executors += 1;
            self.reconcile_executor(&executor, &containers, &mut report).await;
        }

        Ok(report)
    }

    async fn reconcile_executor(
        &self,
        executor: &ExecutorRecord,
        containers: &[ContainerSummary],
        report: &mut ReconcileReport,
    ) {
        let mut running = 0;

        for container in containers {
            if container.status == RunState::Running {
                running += 1;
                continue;
            }
            if !container.status.is_terminal() && self.within_grace(container).await {
                debug!(
                    container_id = %container.container_id,
                    state = %container.status,
                    "Container still within pending grace"
                );
                continue;
            }
            match self.reconcile_container(executor, container).await {
                Ok(writes) => {
                    report.reconciled += 1;
                    report.writes += writes;
                }
                Err(e) => error!(
                    executor_id = executor.id,
                    container_id = %container.container_id,
                    task_name = %container.task_name,
                    error = %e,
                    "Failed to reconcile container"
                ),
            }
        }

        report.running += running;
        match self.registry.set_task_count(executor.id, running as i64).await {
            Ok(true) => {
                report.writes += 1;
                info!(executor_id = executor.id, task_count = running, "Executor task count corrected");
            }
            Ok(false) => {}
            Err(e) => error!(executor_id = executor.id, error = %e, "Failed to write task count"),
        }
    }

    async fn within_grace(&self, container: &ContainerSummary) -> bool {
        if self.config.pending_grace.is_zero() {
            return false;
        }
        let Ok(grace) = chrono::Duration::from_std(self.config.pending_grace) else {
            return true;
        };
        match self.store.get_task_by_name(&container.task_name).await {
            Ok(Some(task)) => Utc::now() - task.started_at < grace,
            // Unknown to the store: nothing to wait for.
            Ok(None) => false,
            Err(e) => {
                warn!(task_name = %container.task_name, error = %e, "Failed to load task for grace check");
                true
            }
        }
    }

    /// Store, then Server, then remove. Returns the number of store writes.
    async fn reconcile_container(
        &self,
        executor: &ExecutorRecord,
        container: &ContainerSummary,
    ) -> Result<usize> {
        let name = &container.task_name;
        let updated = self
            .store
            .update_task_state(name, container.status, Utc::now())
            .await?;

        let record = self.store.get_task_by_name(name).await?;
        let server_task_id = match record.and_then(|task| task.server_task_id) {
            Some(id) => Ok(id),
            None => self.server.find_task_id(name).await,
        };
        let pushed = match server_task_id {
            Ok(id) => self.server.update_task(id, container.status).await,
            Err(e) => Err(e),
        };
        match pushed {
            Ok(()) => {}
            Err(Error::ObjectDoesNotExist(what)) => {
                warn!(task_name = %name, missing = %what, "No Server task for container");
            }
            Err(e) => return Err(e),
        }

        self.executors
            .remove(&executor.url, &container.container_id)
            .await?;

        info!(
            executor_id = executor.id,
            container_id = %container.container_id,
            task_name = %name,
            state = %container.status,
            "Container reconciled"
        );
        Ok(usize::from(updated))
    }
}
