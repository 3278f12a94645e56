// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration and heartbeat emitter.
//!
//! On startup the executor registers itself with the scheduler once
//! (`POST /executors`) and receives its executor id. From then on it reports
//! a resource snapshot with `POST /heartbeats/{id}` on a fixed interval.
//!
//! A failed heartbeat never stops the loop: the wait before the next attempt
//! grows by one base interval per consecutive failure, capped at
//! `heartbeat_timeout`, and resets after the first success.

use std::sync::Arc;
use std::time::Duration;

use spiderkeeper_protocol::wire::{Data, ExecutorRegistered, Heartbeat, RegisterExecutor, ResourceInfo};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::error::{Error, Result};

/// Configuration for the heartbeat emitter.
#[derive(Debug, Clone)]
pub struct HeartbeatEmitterConfig {
    /// Scheduler base URL (including the API prefix).
    pub scheduler_url: String,
    /// Registration payload.
    pub registration: RegisterExecutor,
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Maximum wait between attempts while the scheduler is unreachable.
    pub timeout: Duration,
}

/// Background worker that keeps this executor online in the scheduler.
pub struct HeartbeatEmitter {
    client: reqwest::Client,
    backend: Arc<dyn Backend>,
    config: HeartbeatEmitterConfig,
    shutdown: Arc<Notify>,
}

impl HeartbeatEmitter {
    /// Create a new heartbeat emitter.
    pub fn new(backend: Arc<dyn Backend>, config: HeartbeatEmitterConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Register with the scheduler and return the executor id.
    pub async fn register(&self) -> Result<i64> {
        let url = format!("{}/executors", self.config.scheduler_url);
        let response = self
            .client
            .post(&url)
            .json(&self.config.registration)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registration(format!("{} returned {}: {}", url, status, body)));
        }

        let registered: Data<ExecutorRegistered> = response.json().await?;
        info!(
            executor_id = registered.data.executor_id,
            name = %self.config.registration.name,
            "Registered with scheduler"
        );
        Ok(registered.data.executor_id)
    }

    /// Send one heartbeat.
    pub async fn send_heartbeat(&self, executor_id: i64, resources: ResourceInfo) -> Result<()> {
        let url = format!("{}/heartbeats/{}", self.config.scheduler_url, executor_id);
        self.client
            .post(&url)
            .json(&Heartbeat::online(resources))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Run the heartbeat loop until shutdown.
    pub async fn run(&self, executor_id: i64) {
        info!(
            executor_id,
            interval_secs = self.config.interval.as_secs(),
            "Heartbeat emitter started"
        );

        let mut resources = ResourceInfo::default();
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Heartbeat emitter received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(wait) => {
                    match self.backend.resource_info().await {
                        Ok(snapshot) => resources = snapshot,
                        Err(e) => warn!(error = %e, "Failed to collect resource snapshot, reusing last one"),
                    }

                    let result = self.send_heartbeat(executor_id, resources).await;
                    if let Err(e) = &result {
                        error!(executor_id, error = %e, "Heartbeat failed");
                    } else {
                        debug!(executor_id, "Heartbeat sent");
                    }
                    wait = next_wait(wait, &self.config, result.is_ok());
                }
            }
        }

        info!("Heartbeat emitter stopped");
    }
}

/// Wait before the next heartbeat attempt.
fn next_wait(current: Duration, config: &HeartbeatEmitterConfig, succeeded: bool) -> Duration {
    if succeeded {
        return config.interval;
    }
    let grown = current.max(config.interval) + config.interval;
    grown.min(config.timeout.max(config.interval))
}
