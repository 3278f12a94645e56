// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spiderkeeper_protocol::{FleetState, RunState};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::Result;

use super::{
    ExecutorFilter, ExecutorRecord, NewExecutor, NewScheduledJob, NewTask, ScheduledJob, Store,
    TERMINAL_STATES_SQL, TaskFilter, TaskRecord,
};

/// SQLite migrator with all scheduler migrations embedded.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply migrations.
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let url = if in_memory || database_url.contains("mode=") {
            database_url.to_string()
        } else if database_url.contains('?') {
            format!("{}&mode=rwc", database_url)
        } else {
            format!("{}?mode=rwc", database_url)
        };

        let options = if in_memory {
            // Closing the only connection would drop the database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(&url).await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory store.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }
}

fn push_task_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    builder.push(" WHERE 1 = 1");
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
impl Store for SqliteStore {
    async fn upsert_executor(&self, executor: &NewExecutor, now: DateTime<Utc>) -> Result<ExecutorRecord> {
        let record = sqlx::query_as::<_, ExecutorRecord>(
            r#"
            INSERT INTO executors (name, selector, url, executor_type, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'OFFLINE', ?5, ?5)
            ON CONFLICT (name) DO UPDATE
            SET selector = excluded.selector,
                url = excluded.url,
                executor_type = excluded.executor_type,
                updated_at = excluded.updated_at
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
        let record = sqlx::query_as::<_, ExecutorRecord>("SELECT * FROM executors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_executors(&self, filter: &ExecutorFilter) -> Result<Vec<ExecutorRecord>> {
        let records = sqlx::query_as::<_, ExecutorRecord>(
            r#"
            SELECT * FROM executors
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR executor_type = ?2)
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
            SET memory = ?, cpu = ?, status = ?, expired_at = ?, updated_at = ?
            WHERE id = ?
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
            SET status = 'OFFLINE', updated_at = ?1
            WHERE id = ?2
              AND status = 'ONLINE'
              AND (expired_at IS NULL OR expired_at < ?1)
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
            SET task_count = MAX(task_count + ?, 0), updated_at = ?
            WHERE id = ?
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
            SET task_count = ?1, updated_at = ?2
            WHERE id = ?3 AND task_count <> ?1
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
        let result = sqlx::query("DELETE FROM executors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            INSERT INTO tasks (name, url, executor_type, executor_id, job_id, container_id, status, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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
        let record = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_task_by_name(&self, name: &str) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks");
        push_task_filter(&mut builder, filter);
        builder.push(" ORDER BY id");
        let records = builder
            .build_query_as::<TaskRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks");
        push_task_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn update_task_state(&self, name: &str, state: RunState, now: DateTime<Utc>) -> Result<bool> {
        let finished_at = state.is_terminal().then_some(now);
        let query = format!(
            r#"
            UPDATE tasks
            SET status = ?1, finished_at = COALESCE(finished_at, ?2)
            WHERE name = ?3
              AND status <> ?1
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
        sqlx::query("UPDATE tasks SET server_task_id = ? WHERE name = ?")
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
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?8)
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
        let record = sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let records = sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs ORDER BY job_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_id = ?")
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
            SET paused = ?, next_run_at = ?, updated_at = ?
            WHERE job_id = ?
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
        sqlx::query("UPDATE scheduled_jobs SET next_run_at = ?, updated_at = ? WHERE job_id = ?")
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
            WHERE paused = 0
              AND next_run_at IS NOT NULL
              AND next_run_at <= ?
            ORDER BY next_run_at, job_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use spiderkeeper_protocol::ExecutorType;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory()
            .await
            .expect("Failed to create in-memory store")
    }

    fn executor(name: &str) -> NewExecutor {
        NewExecutor {
            name: name.to_string(),
            selector: "eu".to_string(),
            url: format!("http://{}:8082/api/v1", name),
            executor_type: ExecutorType::Docker,
        }
    }

    fn task(name: &str, executor_id: i64) -> NewTask {
        NewTask {
            name: name.to_string(),
            url: "http://exec-a:8082/api/v1".to_string(),
            executor_type: ExecutorType::Docker,
            executor_id,
            job_id: "job-1".to_string(),
            container_id: "abc123".to_string(),
            status: RunState::Created,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_status_and_counters() {
        let store = test_store().await;
        let now = Utc::now();

        let created = store.upsert_executor(&executor("exec-a"), now).await.unwrap();
        assert_eq!(created.status, FleetState::Offline);
        assert_eq!(created.task_count, 0);

        store
            .record_heartbeat(created.id, 1024, 2000, FleetState::Online, now + Duration::seconds(30), now)
            .await
            .unwrap();
        store.adjust_task_count(created.id, 2, now).await.unwrap();

        let mut changed = executor("exec-a");
        changed.url = "http://elsewhere/api/v1".to_string();
        let updated = store.upsert_executor(&changed, now).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.url, "http://elsewhere/api/v1");
        assert_eq!(updated.status, FleetState::Online);
        assert_eq!(updated.task_count, 2);
        assert_eq!(updated.memory, 1024);
    }

    #[tokio::test]
    async fn test_task_count_never_negative() {
        let store = test_store().await;
        let now = Utc::now();
        let exec = store.upsert_executor(&executor("exec-a"), now).await.unwrap();

        store.adjust_task_count(exec.id, 1, now).await.unwrap();
        store.adjust_task_count(exec.id, -3, now).await.unwrap();

        let exec = store.get_executor(exec.id).await.unwrap().unwrap();
        assert_eq!(exec.task_count, 0);
    }

    #[tokio::test]
    async fn test_set_task_count_reports_writes() {
        let store = test_store().await;
        let now = Utc::now();
        let exec = store.upsert_executor(&executor("exec-a"), now).await.unwrap();

        assert!(store.set_task_count(exec.id, 3, now).await.unwrap());
        assert!(!store.set_task_count(exec.id, 3, now).await.unwrap());
        assert!(store.set_task_count(exec.id, 0, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_offline_only_when_expired() {
        let store = test_store().await;
        let now = Utc::now();
        let exec = store.upsert_executor(&executor("exec-a"), now).await.unwrap();
        store
            .record_heartbeat(exec.id, 0, 0, FleetState::Online, now + Duration::seconds(30), now)
            .await
            .unwrap();

        assert!(!store.mark_offline_if_expired(exec.id, now).await.unwrap());
        assert!(
            store
                .mark_offline_if_expired(exec.id, now + Duration::seconds(31))
                .await
                .unwrap()
        );
        let exec = store.get_executor(exec.id).await.unwrap().unwrap();
        assert_eq!(exec.status, FleetState::Offline);
    }

    #[tokio::test]
    async fn test_list_executors_filter() {
        let store = test_store().await;
        let now = Utc::now();
        let a = store.upsert_executor(&executor("exec-a"), now).await.unwrap();
        store.upsert_executor(&executor("exec-b"), now).await.unwrap();
        store
            .record_heartbeat(a.id, 0, 0, FleetState::Online, now + Duration::seconds(30), now)
            .await
            .unwrap();

        let online = store
            .list_executors(&ExecutorFilter {
                status: Some(FleetState::Online),
                executor_type: Some(ExecutorType::Docker),
            })
            .await
            .unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].name, "exec-a");

        let k8s = store
            .list_executors(&ExecutorFilter {
                status: None,
                executor_type: Some(ExecutorType::K8s),
            })
            .await
            .unwrap();
        assert!(k8s.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let store = test_store().await;
        let now = Utc::now();
        store.insert_task(&task("job-1-scheduled-1", 1)).await.unwrap();

        assert!(store.update_task_state("job-1-scheduled-1", RunState::Running, now).await.unwrap());
        assert!(!store.update_task_state("job-1-scheduled-1", RunState::Running, now).await.unwrap());

        let exited_at = now + Duration::seconds(5);
        assert!(store.update_task_state("job-1-scheduled-1", RunState::Exited, exited_at).await.unwrap());

        let later = now + Duration::seconds(60);
        assert!(!store.update_task_state("job-1-scheduled-1", RunState::Failure, later).await.unwrap());
        assert!(!store.update_task_state("job-1-scheduled-1", RunState::Running, later).await.unwrap());

        let record = store.get_task_by_name("job-1-scheduled-1").await.unwrap().unwrap();
        assert_eq!(record.status, RunState::Exited);
        assert_eq!(record.finished_at, Some(exited_at));
        assert_eq!(record.container_id, "abc123");
    }

    #[tokio::test]
    async fn test_list_and_count_tasks() {
        let store = test_store().await;
        let now = Utc::now();
        store.insert_task(&task("t1", 1)).await.unwrap();
        store.insert_task(&task("t2", 1)).await.unwrap();
        let mut other = task("t3", 1);
        other.job_id = "job-2".to_string();
        store.insert_task(&other).await.unwrap();
        store.update_task_state("t2", RunState::Running, now).await.unwrap();

        let active = TaskFilter {
            job_id: Some("job-1".to_string()),
            statuses: vec![RunState::Created, RunState::Running],
        };
        assert_eq!(store.count_tasks(&active).await.unwrap(), 2);

        let running = TaskFilter {
            job_id: None,
            statuses: vec![RunState::Running],
        };
        let tasks = store.list_tasks(&running).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "t2");

        assert_eq!(store.count_tasks(&TaskFilter::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_job_store() {
        let store = test_store().await;
        let now = Utc::now();
        let job = NewScheduledJob {
            job_id: "job-1".to_string(),
            cron: "*/5 * * * *".to_string(),
            trigger_kind: "scheduled".to_string(),
            payload: json!({"trigger_kind": "scheduled"}),
            coalesce: true,
            max_instances: 1,
            next_run_at: Some(now + Duration::minutes(5)),
        };

        assert!(store.insert_job(&job, now).await.unwrap());
        assert!(!store.insert_job(&job, now).await.unwrap());

        let stored = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(stored.payload, json!({"trigger_kind": "scheduled"}));
        assert!(stored.coalesce);
        assert!(!stored.paused);

        assert!(store.due_jobs(now).await.unwrap().is_empty());
        assert_eq!(store.due_jobs(now + Duration::minutes(5)).await.unwrap().len(), 1);

        store.set_job_paused("job-1", true, None, now).await.unwrap();
        assert!(store.due_jobs(now + Duration::hours(1)).await.unwrap().is_empty());

        assert!(store.delete_job("job-1").await.unwrap());
        assert!(store.get_job("job-1").await.unwrap().is_none());
    }
}
