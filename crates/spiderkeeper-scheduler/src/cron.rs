// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cron scheduler with a persistent job store.
//!
//! Jobs live in the `scheduled_jobs` table and survive restarts. A tick loop
//! loads due jobs, advances their `next_run_at` and hands each fire to a
//! bounded pool of blocking workers running a [`JobRunner`]. The tick never
//! waits for a runner to finish.
//!
//! Cron expressions use the classic 5-field form; the `@yearly`, `@monthly`,
//! `@weekly`, `@daily` and `@hourly` aliases are rewritten to it first.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::store::{NewScheduledJob, ScheduledJob, Store};

/// Trigger kind used for fires coming from the cron schedule.
pub const SCHEDULED: &str = "scheduled";

/// Trigger kind used for fires requested through the API.
pub const MANUAL: &str = "manual";

/// Upper bound on fires replayed for one job in a single tick when
/// `coalesce` is off.
const MAX_CATCH_UP_FIRES: usize = 100;

const ALIASES: &[(&[&str], &str)] = &[
    (&["@yearly", "@annually"], "0 0 1 1 *"),
    (&["@monthly"], "0 0 1 * *"),
    (&["@weekly"], "0 0 * * 0"),
    (&["@daily", "@midnight"], "0 0 * * *"),
    (&["@hourly"], "0 * * * *"),
];

/// Rewrite aliases and check the expression has exactly five fields.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let trimmed = expr.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if let Some((_, expanded)) = ALIASES
        .iter()
        .find(|(names, _)| names.contains(&lowered.as_str()))
    {
        return Ok((*expanded).to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::Validation(format!(
            "Wrong number of fields; got {}, expected 5",
            fields.len()
        )));
    }
    Ok(fields.join(" "))
}

/// Normalize and parse an expression.
pub fn parse_cron(expr: &str) -> Result<(String, Cron)> {
    let normalized = normalize_cron(expr)?;
    let cron = Cron::new(&normalized)
        .parse()
        .map_err(|e| Error::Validation(format!("Invalid cron expression {:?}: {}", expr, e)))?;
    Ok((normalized, cron))
}

/// Next occurrence strictly after `after`, evaluated in `tz`.
pub fn next_fire(cron: &Cron, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after.with_timezone(&tz), false)
        .ok()
        .map(|next| next.with_timezone(&Utc))
}

/// Callback executed for every fire, on a blocking worker thread.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job_id: &str, payload: &Value) -> Result<()>;
}

/// Cron scheduler configuration.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Collapse missed fires into one.
    pub coalesce: bool,
    /// Maximum concurrently running instances per job.
    pub max_instances: usize,
    /// Number of blocking workers.
    pub pool_size: usize,
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
    /// How often due jobs are checked.
    pub tick_interval: Duration,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            coalesce: true,
            max_instances: 1,
            pool_size: 10,
            timezone: Tz::UTC,
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Decrements the per-job running counter when a fire finishes.
struct RunningGuard {
    running: Arc<DashMap<String, usize>>,
    job_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.running.get_mut(&self.job_id) {
            *count = count.saturating_sub(1);
        }
        self.running.remove_if(&self.job_id, |_, count| *count == 0);
    }
}

/// Persistent cron scheduler.
pub struct CronScheduler {
    store: Arc<dyn Store>,
    runner: Arc<dyn JobRunner>,
    config: CronConfig,
    permits: Arc<Semaphore>,
    running: Arc<DashMap<String, usize>>,
    shutdown: Arc<Notify>,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn Store>, runner: Arc<dyn JobRunner>, config: CronConfig) -> Self {
        Self {
            store,
            runner,
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
            config,
            running: Arc::new(DashMap::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Number of fires of `job_id` queued or running.
    pub fn running_instances(&self, job_id: &str) -> usize {
        self.running.get(job_id).map(|count| *count).unwrap_or(0)
    }

    /// Add a job with the default `coalesce` and `max_instances`.
    ///
    /// Returns `Ok(false)` without touching the store if the id is taken.
    pub async fn add_job(&self, job_id: &str, cron: &str, payload: Value) -> Result<bool> {
        let (normalized, parsed) = parse_cron(cron)?;

        if self.store.get_job(job_id).await?.is_some() {
            warn!(job_id = %job_id, "Job already scheduled, ignoring add");
            return Ok(false);
        }

        let now = Utc::now();
        let job = NewScheduledJob {
            job_id: job_id.to_string(),
            cron: normalized,
            trigger_kind: SCHEDULED.to_string(),
            payload,
            coalesce: self.config.coalesce,
            max_instances: self.config.max_instances as i64,
            next_run_at: next_fire(&parsed, now, self.config.timezone),
        };

        let inserted = self.store.insert_job(&job, now).await?;
        if !inserted {
            warn!(job_id = %job_id, "Job already scheduled, ignoring add");
            return Ok(false);
        }

        info!(
            job_id = %job_id,
            cron = %job.cron,
            next_run_at = ?job.next_run_at,
            "Job scheduled"
        );
        Ok(true)
    }

    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        if !self.store.delete_job(job_id).await? {
            return Err(Error::ObjectDoesNotExist(format!("scheduled job {}", job_id)));
        }
        info!(job_id = %job_id, "Job removed");
        Ok(())
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<()> {
        if !self
            .store
            .set_job_paused(job_id, true, None, Utc::now())
            .await?
        {
            return Err(Error::ObjectDoesNotExist(format!("scheduled job {}", job_id)));
        }
        info!(job_id = %job_id, "Job paused");
        Ok(())
    }

    /// Resume a job; the next fire is computed from now.
    pub async fn resume_job(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id).await?;
        let (_, parsed) = parse_cron(&job.cron)?;
        let now = Utc::now();
        let next_run_at = next_fire(&parsed, now, self.config.timezone);
        self.store
            .set_job_paused(job_id, false, next_run_at, now)
            .await?;
        info!(job_id = %job_id, next_run_at = ?next_run_at, "Job resumed");
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ScheduledJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::ObjectDoesNotExist(format!("scheduled job {}", job_id)))
    }

    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.store.list_jobs().await
    }

    /// Fill in `next_run_at` for active jobs that have none, e.g. after a restart.
    pub async fn recover(&self) -> Result<usize> {
        let now = Utc::now();
        let mut recovered = 0;
        for job in self.store.list_jobs().await? {
            if job.paused || job.next_run_at.is_some() {
                continue;
            }
            match parse_cron(&job.cron) {
                Ok((_, parsed)) => {
                    let next_run_at = next_fire(&parsed, now, self.config.timezone);
                    self.store.set_next_run(&job.job_id, next_run_at, now).await?;
                    recovered += 1;
                }
                Err(e) => error!(job_id = %job.job_id, error = %e, "Stored job has invalid cron"),
            }
        }
        if recovered > 0 {
            info!(recovered, "Recomputed next run for stored jobs");
        }
        Ok(recovered)
    }

    /// Submit one fire with the default instance limit.
    ///
    /// Returns false if the job already has `max_instances` fires in flight.
    pub fn submit(&self, job_id: &str, trigger_kind: &str, payload: &Value) -> bool {
        self.fire(job_id, trigger_kind, payload, self.config.max_instances)
    }

    fn fire(&self, job_id: &str, trigger_kind: &str, payload: &Value, max_instances: usize) -> bool {
        {
            let mut count = self.running.entry(job_id.to_string()).or_insert(0);
            if *count >= max_instances.max(1) {
                warn!(
                    job_id = %job_id,
                    running = *count,
                    max_instances,
                    "Maximum number of running instances reached, skipping fire"
                );
                return false;
            }
            *count += 1;
        }

        let guard = RunningGuard {
            running: self.running.clone(),
            job_id: job_id.to_string(),
        };
        let permits = self.permits.clone();
        let runner = self.runner.clone();
        let job_id = job_id.to_string();
        let payload = with_trigger_kind(payload, trigger_kind);

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let task_job_id = job_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                runner.run(&task_job_id, &payload)
            })
            .await;

            match result {
                Ok(Ok(())) => debug!(job_id = %job_id, "Job run finished"),
                Ok(Err(e)) => error!(job_id = %job_id, error = %e, "Job run failed"),
                Err(e) => error!(job_id = %job_id, error = %e, "Job run panicked"),
            }
        });

        true
    }

    /// Fire every job due at `now`. Returns the number of fires submitted.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut submitted = 0;

        for job in self.store.due_jobs(now).await? {
            let parsed = match parse_cron(&job.cron) {
                Ok((_, parsed)) => parsed,
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "Stored job has invalid cron, pausing");
                    self.store.set_job_paused(&job.job_id, true, None, now).await?;
                    continue;
                }
            };

            let fires = if job.coalesce {
                1
            } else {
                missed_fires(&parsed, job.next_run_at, now, self.config.timezone)
            };

            let next_run_at = next_fire(&parsed, now, self.config.timezone);
            self.store.set_next_run(&job.job_id, next_run_at, now).await?;

            debug!(job_id = %job.job_id, fires, next_run_at = ?next_run_at, "Job due");
            let max_instances = usize::try_from(job.max_instances).unwrap_or(1);
            for _ in 0..fires {
                if self.fire(&job.job_id, &job.trigger_kind, &job.payload, max_instances) {
                    submitted += 1;
                }
            }
        }

        Ok(submitted)
    }

    /// Run the tick loop until shutdown.
    pub async fn run(&self) {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            pool_size = self.config.pool_size,
            timezone = %self.config.timezone,
            "Cron scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cron scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.tick_interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Cron tick failed");
                    }
                }
            }
        }

        info!("Cron scheduler stopped");
    }
}

/// Number of occurrences between the stored `next_run_at` and `now`, inclusive.
fn missed_fires(cron: &Cron, first: Option<DateTime<Utc>>, now: DateTime<Utc>, tz: Tz) -> usize {
    let mut fires = 0;
    let mut at = first;
    while let Some(t) = at {
        if t > now || fires >= MAX_CATCH_UP_FIRES {
            break;
        }
        fires += 1;
        at = next_fire(cron, t, tz);
    }
    fires.max(1)
}

fn with_trigger_kind(payload: &Value, trigger_kind: &str) -> Value {
    let mut payload = payload.clone();
    match payload.as_object_mut() {
        Some(object) => {
            object
                .entry("trigger_kind")
                .or_insert_with(|| Value::String(trigger_kind.to_string()));
        }
        None => {
            payload = serde_json::json!({ "trigger_kind": trigger_kind });
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Value)>>,
        delay: Duration,
    }

    impl JobRunner for RecordingRunner {
        fn run(&self, job_id: &str, payload: &Value) -> Result<()> {
            std::thread::sleep(self.delay);
            self.calls
                .lock()
                .unwrap()
                .push((job_id.to_string(), payload.clone()));
            Ok(())
        }
    }

    async fn scheduler(runner: Arc<RecordingRunner>, config: CronConfig) -> (CronScheduler, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        (CronScheduler::new(store.clone(), runner, config), store)
    }

    async fn wait_for_calls(runner: &RecordingRunner, expected: usize) {
        for _ in 0..100 {
            if runner.calls.lock().unwrap().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize_cron("@daily").unwrap(), "0 0 * * *");
        assert_eq!(normalize_cron("  @Hourly ").unwrap(), "0 * * * *");
        assert_eq!(normalize_cron("@annually").unwrap(), "0 0 1 1 *");
        assert_eq!(normalize_cron("@weekly").unwrap(), "0 0 * * 0");
        assert_eq!(normalize_cron("*/5  *  * * *").unwrap(), "*/5 * * * *");
    }

    #[test]
    fn test_wrong_field_count() {
        let err = normalize_cron("* * * *").unwrap_err();
        assert!(err.to_string().contains("Wrong number of fields; got 4, expected 5"));

        let err = normalize_cron("0 0 * * * *").unwrap_err();
        assert!(err.to_string().contains("got 6"));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(parse_cron("61 * * * *").is_err());
        assert!(parse_cron("*/15 9-17 * * 1-5").is_ok());
    }

    #[test]
    fn test_next_fire_in_timezone() {
        let (_, cron) = parse_cron("@daily").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let utc = next_fire(&cron, after, Tz::UTC).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());

        // Midnight in Shanghai is 16:00 UTC the previous day.
        let shanghai = next_fire(&cron, after, chrono_tz::Asia::Shanghai).unwrap();
        assert_eq!(shanghai, Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_missed_fires() {
        let (_, cron) = parse_cron("*/10 * * * *").unwrap();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 35, 0).unwrap();
        assert_eq!(missed_fires(&cron, Some(first), now, Tz::UTC), 4);
        assert_eq!(missed_fires(&cron, None, now, Tz::UTC), 1);
    }

    #[test]
    fn test_trigger_kind_injected() {
        assert_eq!(
            with_trigger_kind(&json!({"a": 1}), MANUAL),
            json!({"a": 1, "trigger_kind": "manual"})
        );
        assert_eq!(
            with_trigger_kind(&json!({"trigger_kind": "scheduled"}), MANUAL),
            json!({"trigger_kind": "scheduled"})
        );
        assert_eq!(with_trigger_kind(&Value::Null, SCHEDULED), json!({"trigger_kind": "scheduled"}));
    }

    #[tokio::test]
    async fn test_add_duplicate_returns_false() {
        let runner = Arc::new(RecordingRunner::default());
        let (scheduler, _) = scheduler(runner, CronConfig::default()).await;

        assert!(scheduler.add_job("job-1", "@hourly", json!({})).await.unwrap());
        assert!(!scheduler.add_job("job-1", "@daily", json!({})).await.unwrap());

        let job = scheduler.get_job("job-1").await.unwrap();
        assert_eq!(job.cron, "0 * * * *");
        assert!(job.next_run_at.is_some());

        let err = scheduler.add_job("job-2", "* * *", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_pause_resume_remove() {
        let runner = Arc::new(RecordingRunner::default());
        let (scheduler, _) = scheduler(runner, CronConfig::default()).await;
        scheduler.add_job("job-1", "*/5 * * * *", json!({})).await.unwrap();

        scheduler.pause_job("job-1").await.unwrap();
        let job = scheduler.get_job("job-1").await.unwrap();
        assert!(job.paused);
        assert!(job.next_run_at.is_none());

        scheduler.resume_job("job-1").await.unwrap();
        let job = scheduler.get_job("job-1").await.unwrap();
        assert!(!job.paused);
        assert!(job.next_run_at.unwrap() > Utc::now());

        scheduler.remove_job("job-1").await.unwrap();
        assert!(matches!(
            scheduler.remove_job("job-1").await.unwrap_err(),
            Error::ObjectDoesNotExist(_)
        ));
        assert!(matches!(
            scheduler.pause_job("job-1").await.unwrap_err(),
            Error::ObjectDoesNotExist(_)
        ));
    }

    #[tokio::test]
    async fn test_tick_fires_due_job_and_advances() {
        let runner = Arc::new(RecordingRunner::default());
        let (scheduler, store) = scheduler(runner.clone(), CronConfig::default()).await;
        scheduler
            .add_job("job-1", "* * * * *", json!({"trigger_kind": "scheduled"}))
            .await
            .unwrap();

        let due_at = scheduler.get_job("job-1").await.unwrap().next_run_at.unwrap();
        assert_eq!(scheduler.tick(due_at - chrono::Duration::seconds(1)).await.unwrap(), 0);

        let now = due_at + chrono::Duration::seconds(1);
        assert_eq!(scheduler.tick(now).await.unwrap(), 1);
        wait_for_calls(&runner, 1).await;

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("job-1".to_string(), json!({"trigger_kind": "scheduled"}))]);

        let job = store.get_job("job-1").await.unwrap().unwrap();
        assert!(job.next_run_at.unwrap() > now);
    }

    #[tokio::test]
    async fn test_coalesce_collapses_missed_fires() {
        let runner = Arc::new(RecordingRunner::default());
        let config = CronConfig {
            max_instances: 10,
            ..CronConfig::default()
        };
        let (scheduler, _) = scheduler(runner.clone(), config).await;
        scheduler.add_job("job-1", "* * * * *", json!({})).await.unwrap();

        let due_at = scheduler.get_job("job-1").await.unwrap().next_run_at.unwrap();
        let late = due_at + chrono::Duration::minutes(5);
        assert_eq!(scheduler.tick(late).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_without_coalesce_every_missed_fire_runs() {
        let runner = Arc::new(RecordingRunner::default());
        let config = CronConfig {
            coalesce: false,
            max_instances: 10,
            ..CronConfig::default()
        };
        let (scheduler, _) = scheduler(runner.clone(), config).await;
        scheduler.add_job("job-1", "* * * * *", json!({})).await.unwrap();

        let due_at = scheduler.get_job("job-1").await.unwrap().next_run_at.unwrap();
        let late = due_at + chrono::Duration::seconds(150);
        assert_eq!(scheduler.tick(late).await.unwrap(), 3);
        wait_for_calls(&runner, 3).await;
        assert_eq!(runner.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_instances_skips_overlapping_fire() {
        let runner = Arc::new(RecordingRunner {
            delay: Duration::from_millis(200),
            ..RecordingRunner::default()
        });
        let (scheduler, _) = scheduler(runner.clone(), CronConfig::default()).await;

        assert!(scheduler.submit("job-1", MANUAL, &json!({})));
        assert!(!scheduler.submit("job-1", MANUAL, &json!({})));
        assert!(scheduler.submit("job-2", MANUAL, &json!({})));

        wait_for_calls(&runner, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.running_instances("job-1"), 0);
        assert!(scheduler.submit("job-1", MANUAL, &json!({})));
    }

    #[tokio::test]
    async fn test_recover_fills_missing_next_run() {
        let runner = Arc::new(RecordingRunner::default());
        let (scheduler, store) = scheduler(runner, CronConfig::default()).await;
        scheduler.add_job("job-1", "@daily", json!({})).await.unwrap();
        store.set_next_run("job-1", None, Utc::now()).await.unwrap();

        assert_eq!(scheduler.recover().await.unwrap(), 1);
        assert!(store.get_job("job-1").await.unwrap().unwrap().next_run_at.is_some());
    }
}
