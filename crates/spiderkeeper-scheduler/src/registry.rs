// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor registry.
//!
//! The persisted fleet roster. Executors register by name and then keep
//! themselves online with heartbeats; every heartbeat pushes the expiry to
//! `now + 3 × heartbeat_interval`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use spiderkeeper_protocol::wire::{Heartbeat, RegisterExecutor};
use spiderkeeper_protocol::{ExecutorType, FleetState};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{ExecutorFilter, ExecutorRecord, NewExecutor, Store};

/// Number of heartbeat intervals an executor may stay silent.
pub const EXPIRY_INTERVALS: u32 = 3;

/// Executor roster backed by the store.
#[derive(Clone)]
pub struct ExecutorRegistry {
    store: Arc<dyn Store>,
    heartbeat_interval: Duration,
}

impl ExecutorRegistry {
    pub fn new(store: Arc<dyn Store>, heartbeat_interval: Duration) -> Self {
        Self {
            store,
            heartbeat_interval,
        }
    }

    /// Window after the last heartbeat during which an executor counts as alive.
    pub fn expiry_window(&self) -> Duration {
        self.heartbeat_interval * EXPIRY_INTERVALS
    }

    /// Expiry timestamp for a heartbeat received at `now`.
    pub fn expiry_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.expiry_window())
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Register an executor, or refresh an existing one with the same name.
    pub async fn register(&self, registration: &RegisterExecutor) -> Result<ExecutorRecord> {
        if registration.name.trim().is_empty() {
            return Err(Error::Validation("executor name must not be empty".to_string()));
        }
        if registration.url.trim().is_empty() {
            return Err(Error::Validation("executor url must not be empty".to_string()));
        }

        let executor = NewExecutor {
            name: registration.name.clone(),
            selector: registration.selector.clone(),
            url: registration.url.trim_end_matches('/').to_string(),
            executor_type: registration.executor_type,
        };
        let record = self.store.upsert_executor(&executor, Utc::now()).await?;

        info!(
            executor_id = record.id,
            name = %record.name,
            executor_type = %record.executor_type,
            url = %record.url,
            "Executor registered"
        );
        Ok(record)
    }

    /// Store a heartbeat and refresh the expiry.
    pub async fn heartbeat(&self, executor_id: i64, heartbeat: &Heartbeat) -> Result<()> {
        let now = Utc::now();
        let updated = self
            .store
            .record_heartbeat(
                executor_id,
                heartbeat.memory,
                heartbeat.cpu,
                heartbeat.status,
                self.expiry_for(now),
                now,
            )
            .await?;
        if !updated {
            return Err(Error::ObjectDoesNotExist(format!("executor {}", executor_id)));
        }
        debug!(executor_id, status = %heartbeat.status, "Heartbeat recorded");
        Ok(())
    }

    pub async fn get(&self, executor_id: i64) -> Result<ExecutorRecord> {
        self.store
            .get_executor(executor_id)
            .await?
            .ok_or_else(|| Error::ObjectDoesNotExist(format!("executor {}", executor_id)))
    }

    pub async fn list(&self, filter: &ExecutorFilter) -> Result<Vec<ExecutorRecord>> {
        self.store.list_executors(filter).await
    }

    /// Online executors, optionally restricted to one runtime type.
    pub async fn list_online(&self, executor_type: Option<ExecutorType>) -> Result<Vec<ExecutorRecord>> {
        self.store
            .list_executors(&ExecutorFilter {
                status: Some(FleetState::Online),
                executor_type,
            })
            .await
    }

    /// Apply a task-count delta, clamped at zero.
    pub async fn adjust_task_count(&self, executor_id: i64, delta: i64) -> Result<()> {
        if !self
            .store
            .adjust_task_count(executor_id, delta, Utc::now())
            .await?
        {
            return Err(Error::ObjectDoesNotExist(format!("executor {}", executor_id)));
        }
        Ok(())
    }

    /// Overwrite the task count. Returns true if a write happened.
    pub async fn set_task_count(&self, executor_id: i64, count: i64) -> Result<bool> {
        self.store.set_task_count(executor_id, count, Utc::now()).await
    }

    pub async fn delete(&self, executor_id: i64) -> Result<()> {
        if !self.store.delete_executor(executor_id).await? {
            return Err(Error::ObjectDoesNotExist(format!("executor {}", executor_id)));
        }
        info!(executor_id, "Executor deleted");
        Ok(())
    }
}
