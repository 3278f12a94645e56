// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for spiderkeeper-executor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use spiderkeeper_protocol::{API_PREFIX, ExecutorType};

use crate::backend::{DockerConfig, KubernetesConfig};

/// Executor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique executor name registered with the scheduler
    pub name: String,
    /// Container runtime driven by this executor
    pub executor_type: ExecutorType,
    /// Free-text affinity tag matched against job selectors
    pub selector: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Base URL the scheduler uses to reach this executor (including the API prefix)
    pub advertise_url: String,
    /// Scheduler base URL (including the API prefix)
    pub scheduler_url: String,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Upper bound for the heartbeat retry back-off
    pub heartbeat_timeout: Duration,
    /// Docker daemon address (`--host`)
    pub docker_host: Option<String>,
    /// Docker network for crawl containers
    pub docker_network: Option<String>,
    /// Kubernetes namespace for crawl pods
    pub k8s_namespace: String,
    /// Kubeconfig path
    pub k8s_config: Option<PathBuf>,
    /// Default number of log lines returned when not following
    pub log_tail: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let scheduler_url = std::env::var("SPIDERKEEPER_SCHEDULER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SPIDERKEEPER_SCHEDULER_URL"))?;

        let port: u16 = parse_var("SPIDERKEEPER_EXECUTOR_PORT", 8082)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let name = std::env::var("SPIDERKEEPER_EXECUTOR_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "spiderkeeper-executor".to_string());

        let advertise_url = std::env::var("SPIDERKEEPER_EXECUTOR_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}{}", port, API_PREFIX));

        Ok(Self {
            name,
            executor_type: parse_var("SPIDERKEEPER_EXECUTOR_TYPE", ExecutorType::Docker)?,
            selector: std::env::var("SPIDERKEEPER_EXECUTOR_SELECTOR").unwrap_or_default(),
            http_addr,
            advertise_url: advertise_url.trim_end_matches('/').to_string(),
            scheduler_url: scheduler_url.trim_end_matches('/').to_string(),
            heartbeat_interval: Duration::from_secs(parse_var("SPIDERKEEPER_HEARTBEAT_INTERVAL", 10)?),
            heartbeat_timeout: Duration::from_secs(parse_var("SPIDERKEEPER_HEARTBEAT_TIMEOUT", 60)?),
            docker_host: non_empty_var("SPIDERKEEPER_EXECUTOR_REMOTE_URL"),
            docker_network: non_empty_var("SPIDERKEEPER_DOCKER_NETWORK"),
            k8s_namespace: std::env::var("SPIDERKEEPER_K8S_NAMESPACE")
                .unwrap_or_else(|_| "default".to_string()),
            k8s_config: non_empty_var("SPIDERKEEPER_K8S_CONFIG").map(PathBuf::from),
            log_tail: parse_var("SPIDERKEEPER_LOG_TAIL", 50)?,
        })
    }

    pub fn docker_config(&self) -> DockerConfig {
        DockerConfig {
            host: self.docker_host.clone(),
            network: self.docker_network.clone(),
            ..Default::default()
        }
    }

    pub fn kubernetes_config(&self) -> KubernetesConfig {
        KubernetesConfig {
            kubeconfig: self.k8s_config.clone(),
            namespace: self.k8s_namespace.clone(),
            ..Default::default()
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: name,
            value,
        }),
        Err(_) => Ok(default),
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
