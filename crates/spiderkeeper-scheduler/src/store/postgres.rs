// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spiderkeeper_protocol::{FleetState, RunState};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::Result;

use super::{
    ExecutorFilter, ExecutorRecord, NewExecutor, NewScheduledJob, NewTask, ScheduledJob, Store,
    TERMINAL_STATES_SQL, TaskFilter, TaskRecord,
};

/// PostgreSQL migrator with all scheduler migrations embedded.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }
}

fn push_task_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
    builder.push(" WHERE TRUE");
    if let Some(job_id) = &filter.job_id {
        builder.push(" AND job_id = ").push_bind(job_id.clone());
    }
    if !filter.statuses.is_empty() {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for state in &filter.statuses {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(")");
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_executor(&self, executor: &NewExecutor, now: DateTime<Utc>) -> Result<ExecutorRecord> {
        let record = sqlx::query_as::<_, ExecutorRecord>(
            r#"
            INSERT INTO executors (name, selector, url, executor_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'OFFLINE', $5, $5)
            ON CONFLICT (name) DO UPDATE
            SET selector = EXCLUDED.selector,
                url = EXCLUDED.url,
                executor_type = EXCLUDED.executor_type,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&executor.name)
        .bind(&executor.selector)
        .bind(&executor.url)
        .bind(executor.executor_type.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_executor(&self, id: i64) -> Result<Option<ExecutorRecord>> {
        let record = sqlx::query_as::<_, ExecutorRecord>("SELECT * FROM executors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_executors(&self, filter: &ExecutorFilter) -> Result<Vec<ExecutorRecord>> {
        let records = sqlx::query_as::<_, ExecutorRecord>(
            r#"
            SELECT * FROM executors
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR executor_type = $2)
            ORDER BY id
            "#,
        )
        .bind(filter.status.map(FleetState::as_str))
        .bind(filter.executor_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn record_heartbeat(
        &self,
        id: i64,
        memory: i64,
        cpu: i64,
        status: FleetState,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET memory = $1, cpu = $2, status = $3, expired_at = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(memory)
        .bind(cpu)
        .bind(status.as_str())
        .bind(expired_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_offline_if_expired(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET status = 'OFFLINE', updated_at = $1
            WHERE id = $2
              AND status = 'ONLINE'
              AND (expired_at IS NULL OR expired_at < $1)
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_task_count(&self, id: i64, delta: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET task_count = GREATEST(task_count + $1, 0), updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(delta)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_task_count(&self, id: i64, count: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET task_count = $1, updated_at = $2
            WHERE id = $3 AND task_count <> $1
            "#,
        )
        .bind(count.max(0))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_executor(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM executors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            INSERT INTO tasks (name, url, executor_type, executor_id, job_id, container_id, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&task.name)
        .bind(&task.url)
        .bind(task.executor_type.as_str())
        .bind(task.executor_id)
        .bind(&task.job_id)
        .bind(&task.container_id)
        .bind(task.status.as_str())
        .bind(task.started_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_task_by_name(&self, name: &str) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM tasks");
        push_task_filter(&mut builder, filter);
        builder.push(" ORDER BY id");
        let records = builder
            .build_query_as::<TaskRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        push_task_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn update_task_state(&self, name: &str, state: RunState, now: DateTime<Utc>) -> Result<bool> {
        let finished_at = state.is_terminal().then_some(now);
        let query = format!(
            r#"
            UPDATE tasks
            SET status = $1, finished_at = COALESCE(finished_at, $2)
            WHERE name = $3
              AND status <> $1
              AND status NOT IN {}
            "#,
            TERMINAL_STATES_SQL
        );
        let result = sqlx::query(&query)
            .bind(state.as_str())
            .bind(finished_at)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_server_task_id(&self, name: &str, server_task_id: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET server_task_id = $1 WHERE name = $2")
            .bind(server_task_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_job(&self, job: &NewScheduledJob, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs
                (job_id, cron, trigger_kind, payload, paused, coalesce_missed, max_instances,
                 next_run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7, $8, $8)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.cron)
        .bind(&job.trigger_kind)
        .bind(Json(&job.payload))
        .bind(job.coalesce)
        .bind(job.max_instances)
        .bind(job.next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        let record =
            sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let records =
            sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs ORDER BY job_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(records)
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_job_paused(
        &self,
        job_id: &str,
        paused: bool,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET paused = $1, next_run_at = $2, updated_at = $3
            WHERE job_id = $4
            "#,
        )
        .bind(paused)
        .bind(next_run_at)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_next_run(
        &self,
        job_id: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET next_run_at = $1, updated_at = $2 WHERE job_id = $3")
            .bind(next_run_at)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let records = sqlx::query_as::<_, ScheduledJob>(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE NOT paused
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
            ORDER BY next_run_at, job_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
