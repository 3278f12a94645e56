// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for spiderkeeper-scheduler.
//!
//! One [`Store`] trait covers the executor roster, task bookkeeping and the
//! cron job store. Both backends keep the same invariants in SQL:
//!
//! - `task_count` deltas are single statements clamped at zero
//! - task state updates are conditional and never leave a terminal state
//! - `finished_at` is written once, by the first terminal update

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use spiderkeeper_protocol::{ExecutorType, FleetState, RunState};

use crate::error::{Error, Result};

/// SQL list of terminal run states, used in conditional updates.
pub(crate) const TERMINAL_STATES_SQL: &str = "('EXITED', 'DEAD', 'FINISH', 'STOPPED', 'FAILURE')";

/// Executor row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ExecutorRecord {
    pub id: i64,
    pub name: String,
    pub selector: String,
    pub url: String,
    #[sqlx(try_from = "String")]
    #[serde(rename = "type")]
    pub executor_type: ExecutorType,
    #[sqlx(try_from = "String")]
    pub status: FleetState,
    /// Memory in MiB.
    pub memory: i64,
    /// CPU in milli-units.
    pub cpu: i64,
    pub task_count: i64,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration data for an executor.
#[derive(Debug, Clone)]
pub struct NewExecutor {
    pub name: String,
    pub selector: String,
    pub url: String,
    pub executor_type: ExecutorType,
}

/// Filter for listing executors.
#[derive(Debug, Clone, Default)]
pub struct ExecutorFilter {
    pub status: Option<FleetState>,
    pub executor_type: Option<ExecutorType>,
}

/// Task bookkeeping row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[sqlx(try_from = "String")]
    pub executor_type: ExecutorType,
    pub executor_id: i64,
    pub job_id: String,
    pub container_id: String,
    #[sqlx(try_from = "String")]
    pub status: RunState,
    pub server_task_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Data for a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub url: String,
    pub executor_type: ExecutorType,
    pub executor_id: i64,
    pub job_id: String,
    pub container_id: String,
    pub status: RunState,
    pub started_at: DateTime<Utc>,
}

/// Filter for listing and counting tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub job_id: Option<String>,
    /// Empty means any state.
    pub statuses: Vec<RunState>,
}

/// Persisted cron job.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub job_id: String,
    /// Normalized 5-field expression.
    pub cron: String,
    pub trigger_kind: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub paused: bool,
    #[sqlx(rename = "coalesce_missed")]
    pub coalesce: bool,
    pub max_instances: i64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a new cron job.
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub job_id: String,
    pub cron: String,
    pub trigger_kind: String,
    pub payload: serde_json::Value,
    pub coalesce: bool,
    pub max_instances: i64,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Storage backend for the scheduler.
#[async_trait]
pub trait Store: Send + Sync {
    // Executors

    /// Insert an executor, or update selector/url/type of an existing one
    /// with the same name. Status and counters of an existing row are kept.
    async fn upsert_executor(&self, executor: &NewExecutor, now: DateTime<Utc>) -> Result<ExecutorRecord>;

    async fn get_executor(&self, id: i64) -> Result<Option<ExecutorRecord>>;

    async fn list_executors(&self, filter: &ExecutorFilter) -> Result<Vec<ExecutorRecord>>;

    /// Store a heartbeat. Returns false for an unknown id.
    async fn record_heartbeat(
        &self,
        id: i64,
        memory: i64,
        cpu: i64,
        status: FleetState,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Flip an online executor to offline if its expiry is missing or before `now`.
    async fn mark_offline_if_expired(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Add `delta` to the task count, clamped at zero. Returns false for an unknown id.
    async fn adjust_task_count(&self, id: i64, delta: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Overwrite the task count. Returns true only if the stored value changed.
    async fn set_task_count(&self, id: i64, count: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn delete_executor(&self, id: i64) -> Result<bool>;

    // Tasks

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord>;

    async fn get_task(&self, id: i64) -> Result<Option<TaskRecord>>;

    async fn get_task_by_name(&self, name: &str) -> Result<Option<TaskRecord>>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;

    async fn count_tasks(&self, filter: &TaskFilter) -> Result<i64>;

    /// Move a non-terminal task to `state`. Stamps `finished_at` when `state`
    /// is terminal. Returns true only if a row changed.
    async fn update_task_state(&self, name: &str, state: RunState, now: DateTime<Utc>) -> Result<bool>;

    async fn set_server_task_id(&self, name: &str, server_task_id: i64) -> Result<()>;

    // Cron jobs

    /// Insert a job. Returns false if the id already exists.
    async fn insert_job(&self, job: &NewScheduledJob, now: DateTime<Utc>) -> Result<bool>;

    async fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>>;

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn delete_job(&self, job_id: &str) -> Result<bool>;

    async fn set_job_paused(
        &self,
        job_id: &str,
        paused: bool,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn set_next_run(
        &self,
        job_id: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Jobs that are not paused and whose `next_run_at <= now`.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;
}

/// Connect to the store named by a database URL and apply migrations.
///
/// `sqlite:` URLs select [`SqliteStore`]; `postgres:` and `postgresql:`
/// select [`PostgresStore`].
pub async fn connect(database_url: &str) -> Result<Arc<dyn Store>> {
    if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteStore::connect(database_url).await?))
    } else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
        Ok(Arc::new(PostgresStore::connect(database_url).await?))
    } else {
        Err(Error::Validation(format!(
            "unsupported database url scheme: {}",
            database_url.split(':').next().unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_sql_matches_enum() {
        for state in RunState::ALL {
            let quoted = format!("'{}'", state.as_str());
            assert_eq!(
                TERMINAL_STATES_SQL.contains(&quoted),
                state.is_terminal(),
                "{}",
                state
            );
        }
    }
}
