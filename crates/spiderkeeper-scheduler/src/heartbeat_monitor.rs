// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that flips silent executors offline.
//!
//! Every `3 × heartbeat_interval` the monitor lists online executors and
//! marks those whose `expired_at` has passed (or was never set) as offline.
//! The flip is a conditional update, so a heartbeat landing between the
//! listing and the write keeps the executor online.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::registry::ExecutorRegistry;
use crate::store::Store;

/// Configuration for the heartbeat monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// How often to look for expired executors.
    pub poll_interval: Duration,
}

/// Background worker that monitors executor heartbeats.
pub struct HeartbeatMonitor {
    registry: ExecutorRegistry,
    store: Arc<dyn Store>,
    config: HeartbeatMonitorConfig,
    shutdown: Arc<Notify>,
}

impl HeartbeatMonitor {
    /// Create a new monitor polling every `3 × heartbeat_interval`.
    pub fn new(store: Arc<dyn Store>, registry: ExecutorRegistry) -> Self {
        let config = HeartbeatMonitorConfig {
            poll_interval: registry.expiry_window(),
        };
        Self::with_config(store, registry, config)
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        registry: ExecutorRegistry,
        config: HeartbeatMonitorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the monitor loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Heartbeat monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Heartbeat monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.check_expired_at(Utc::now()).await {
                        error!(error = %e, "Failed to check executor heartbeats");
                    }
                }
            }
        }

        info!("Heartbeat monitor stopped");
    }

    /// Mark every online executor that expired before `now` as offline.
    ///
    /// Returns the number of executors flipped.
    pub async fn check_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let online = self.registry.list_online(None).await?;
        let mut flipped = 0;

        for executor in online {
            let expired = executor.expired_at.is_none_or(|at| at < now);
            if !expired {
                continue;
            }
            match self.store.mark_offline_if_expired(executor.id, now).await {
                Ok(true) => {
                    flipped += 1;
                    warn!(
                        executor_id = executor.id,
                        name = %executor.name,
                        expired_at = ?executor.expired_at,
                        "Executor heartbeat expired, marked offline"
                    );
                }
                Ok(false) => {
                    debug!(executor_id = executor.id, "Executor refreshed before offline flip");
                }
                Err(e) => {
                    error!(executor_id = executor.id, error = %e, "Failed to mark executor offline");
                }
            }
        }

        Ok(flipped)
    }
}
