// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spiderkeeper Scheduler - Crawl Control Plane
//!
//! Runs the cron scheduler, dispatch pool, heartbeat monitor, reconciler and
//! HTTP API in one process.

use tracing::{info, warn};

use spiderkeeper_scheduler::config::Config;
use spiderkeeper_scheduler::runtime::SchedulerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spiderkeeper_scheduler=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        server_url = %config.server_url,
        timezone = %config.timezone,
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        "Starting Spiderkeeper Scheduler"
    );

    let runtime = SchedulerRuntime::builder()
        .database_url(&config.database_url)
        .server_url(&config.server_url)
        .collector_url(&config.collector_url)
        .bind_addr(config.http_addr)
        .heartbeat_interval(config.heartbeat_interval)
        .job_coalesce(config.job_coalesce)
        .job_max_instances(config.job_max_instances)
        .worker_pool_size(config.worker_pool_size)
        .timezone(config.timezone)
        .task_poll_interval(config.task_poll_interval)
        .task_poll_timeout(config.task_poll_timeout)
        .max_active_tasks_per_job(config.max_active_tasks_per_job)
        .reconcile_interval(config.reconcile_interval)
        .reconcile_pending_grace(config.reconcile_pending_grace)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Scheduler ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Spiderkeeper Scheduler shut down");

    Ok(())
}
