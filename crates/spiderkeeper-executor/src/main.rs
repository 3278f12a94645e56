// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spiderkeeper Executor - Crawl Container Agent
//!
//! Runs crawl containers on Docker or Kubernetes and reports its capacity to
//! the scheduler.

use std::sync::Arc;
use tracing::{info, warn};

use spiderkeeper_executor::backend::{Backend, DockerBackend, KubernetesBackend};
use spiderkeeper_executor::config::Config;
use spiderkeeper_executor::runtime::ExecutorRuntime;
use spiderkeeper_protocol::ExecutorType;
use spiderkeeper_protocol::wire::RegisterExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spiderkeeper_executor=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        name = %config.name,
        executor_type = %config.executor_type,
        http_addr = %config.http_addr,
        scheduler_url = %config.scheduler_url,
        "Starting Spiderkeeper Executor"
    );

    let backend: Arc<dyn Backend> = match config.executor_type {
        ExecutorType::Docker => Arc::new(DockerBackend::new(config.docker_config())),
        ExecutorType::K8s => Arc::new(KubernetesBackend::new(config.kubernetes_config())),
    };
    info!(backend = %backend.backend_type(), "Backend initialized");

    let runtime = ExecutorRuntime::builder()
        .backend(backend)
        .bind_addr(config.http_addr)
        .scheduler_url(&config.scheduler_url)
        .registration(RegisterExecutor {
            name: config.name.clone(),
            selector: config.selector.clone(),
            url: config.advertise_url.clone(),
            executor_type: config.executor_type,
        })
        .heartbeat_interval(config.heartbeat_interval)
        .heartbeat_timeout(config.heartbeat_timeout)
        .log_tail(config.log_tail)
        .build()?
        .start()
        .await?;

    info!(
        addr = %runtime.local_addr(),
        executor_id = runtime.executor_id(),
        "Executor ready"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Spiderkeeper Executor shut down");

    Ok(())
}
