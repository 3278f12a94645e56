// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for spiderkeeper-scheduler.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

/// Scheduler configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection string (`sqlite:` or `postgres:`)
    pub database_url: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Interval executors are expected to heartbeat on
    pub heartbeat_interval: Duration,
    /// Collapse missed cron fires into one
    pub job_coalesce: bool,
    /// Maximum concurrently running instances per job
    pub job_max_instances: usize,
    /// Size of the blocking dispatch pool
    pub worker_pool_size: usize,
    /// Timezone cron expressions are evaluated in
    pub timezone: Tz,
    /// Server collaborator base URL (including the API prefix)
    pub server_url: String,
    /// Collector base URL handed to spiders
    pub collector_url: String,
    /// Interval between container status checks during dispatch
    pub task_poll_interval: Duration,
    /// Give up on a run after this long; unset means wait forever
    pub task_poll_timeout: Option<Duration>,
    /// Interval between reconciliation passes
    pub reconcile_interval: Duration,
    /// Task age before a pending or paused container is reconciled
    pub reconcile_pending_grace: Duration,
    /// Skip a fire when the job already has this many active tasks
    pub max_active_tasks_per_job: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SPIDERKEEPER_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SPIDERKEEPER_DATABASE_URL"))?;
        let server_url = std::env::var("SPIDERKEEPER_SERVER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SPIDERKEEPER_SERVER_URL"))?;

        let port: u16 = parse_var("SPIDERKEEPER_SCHEDULER_PORT", 8081)?;

        let collector_url = std::env::var("SPIDERKEEPER_COLLECTOR_URL")
            .unwrap_or_else(|_| server_url.clone());

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            heartbeat_interval: Duration::from_secs(parse_var("SPIDERKEEPER_HEARTBEAT_INTERVAL", 10)?),
            job_coalesce: parse_var("SPIDERKEEPER_JOB_COALESCE", true)?,
            job_max_instances: parse_var("SPIDERKEEPER_JOB_MAX_INSTANCES", 1)?,
            worker_pool_size: parse_var("SPIDERKEEPER_WORKER_POOL_SIZE", 10)?,
            timezone: parse_var("SPIDERKEEPER_TIMEZONE", Tz::UTC)?,
            server_url: server_url.trim_end_matches('/').to_string(),
            collector_url: collector_url.trim_end_matches('/').to_string(),
            task_poll_interval: Duration::from_secs(parse_var("SPIDERKEEPER_TASK_POLL_INTERVAL", 5)?),
            task_poll_timeout: parse_optional_var::<u64>("SPIDERKEEPER_TASK_POLL_TIMEOUT")?
                .map(Duration::from_secs),
            reconcile_interval: Duration::from_secs(parse_var("SPIDERKEEPER_RECONCILE_INTERVAL", 20)?),
            reconcile_pending_grace: Duration::from_secs(parse_var(
                "SPIDERKEEPER_RECONCILE_PENDING_GRACE",
                0,
            )?),
            max_active_tasks_per_job: parse_optional_var("SPIDERKEEPER_MAX_ACTIVE_TASKS_PER_JOB")?,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional_var(name)?.unwrap_or(default))
}

fn parse_optional_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var: name, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has a value that cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
