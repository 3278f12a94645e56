// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker backend.
//!
//! Drives a local or remote Docker daemon through the `docker` CLI. Every
//! container gets two labels: `spiderkeeper.managed=true` for [`list_all`]
//! and `spiderkeeper.run-name=<task name>` so the reconciler can map a
//! container back to its task record.
//!
//! [`list_all`]: Backend::list_all

use async_trait::async_trait;
use spiderkeeper_protocol::wire::{ContainerSummary, ResourceInfo};
use spiderkeeper_protocol::{ExecutorType, RunSpec, RunState};
use tracing::{debug, info, warn};

use super::cli::{Cli, ignore_not_found};
use super::traits::{Backend, BackendError, LogOptions, LogStream, Result};

pub const MANAGED_LABEL: &str = "spiderkeeper.managed";
pub const RUN_NAME_LABEL: &str = "spiderkeeper.run-name";

/// Length of the short container id returned by [`DockerBackend::run`].
const SHORT_ID_LEN: usize = 12;

/// Configuration for the Docker backend.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Path to the docker binary.
    pub binary: String,
    /// Daemon address passed as `--host` (e.g. `tcp://10.0.0.5:2375`).
    /// Uses the CLI default when unset.
    pub host: Option<String>,
    /// Network containers are attached to.
    pub network: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
            network: None,
        }
    }
}

/// Backend that runs crawl containers on Docker.
pub struct DockerBackend {
    cli: Cli,
    config: DockerConfig,
}

impl DockerBackend {
    pub fn new(config: DockerConfig) -> Self {
        let mut global_args = Vec::new();
        if let Some(host) = &config.host {
            global_args.push("--host".to_string());
            global_args.push(host.clone());
        }
        Self {
            cli: Cli::new("docker", config.binary.clone(), global_args),
            config,
        }
    }

    /// Arguments for `docker run`.
    fn run_args(&self, spec: &RunSpec) -> Result<Vec<String>> {
        let params = &spec.executor_params;
        if params.image.trim().is_empty() {
            return Err(BackendError::InvalidSpec("image is empty".to_string()));
        }

        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            container_name(spec.task_name()),
            "--label".to_string(),
            format!("{}=true", MANAGED_LABEL),
            "--label".to_string(),
            format!("{}={}", RUN_NAME_LABEL, spec.task_name()),
        ];

        if let Some(network) = &self.config.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if params.cpu_limit > 0 {
            args.push("--cpus".to_string());
            args.push(format!("{:.3}", params.cpu_limit as f64 / 1000.0));
        }
        if params.memory_limit > 0 {
            args.push("--memory".to_string());
            args.push(format!("{}m", params.memory_limit));
        }
        for env in spec.container_env() {
            args.push("--env".to_string());
            args.push(env);
        }
        for volume in params.volume.iter().filter(|v| !v.trim().is_empty()) {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }

        args.push(params.image.clone());
        args.extend(params.command());
        Ok(args)
    }
}

/// Docker container name for a run: `spiderkeeper-<task name>`, restricted to
/// the characters Docker accepts.
pub fn container_name(task_name: &str) -> String {
    let sanitized: String = task_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("spiderkeeper-{}", sanitized)
}

/// Parse one line of `docker ps --format '{{.ID}}\t{{.State}}\t{{.Label ...}}'`.
fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut parts = line.split('\t');
    let container_id = parts.next()?.trim();
    let state = parts.next()?.trim();
    let task_name = parts.next().unwrap_or_default().trim();

    if container_id.is_empty() {
        return None;
    }

    let status = match RunState::from_docker(state) {
        Ok(status) => status,
        Err(e) => {
            warn!(container_id, error = %e, "Skipping container with unrecognised state");
            return None;
        }
    };

    Some(ContainerSummary {
        container_id: container_id.to_string(),
        status,
        task_name: task_name.to_string(),
    })
}

#[async_trait]
impl Backend for DockerBackend {
    fn backend_type(&self) -> ExecutorType {
        ExecutorType::Docker
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let args = self.run_args(spec)?;
        let id = self.cli.output(&args).await?;
        let short: String = id.chars().take(SHORT_ID_LEN).collect();
        if short.is_empty() {
            return Err(BackendError::UnexpectedOutput {
                program: "docker",
                details: "run returned no container id".to_string(),
            });
        }

        info!(
            task_name = %spec.task_name(),
            container_id = %short,
            image = %spec.executor_params.image,
            "Container started"
        );
        Ok(short)
    }

    async fn status(&self, container_id: &str) -> Result<RunState> {
        let out = self
            .cli
            .output(&["inspect", "--format", "{{.State.Status}}", container_id])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BackendError::NotFound(container_id.to_string())
                } else {
                    e
                }
            })?;

        RunState::from_docker(&out).map_err(|e| BackendError::UnexpectedOutput {
            program: "docker",
            details: e.to_string(),
        })
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        ignore_not_found(self.cli.output(&["stop", container_id]).await)?;
        debug!(container_id, "Container stopped");
        Ok(())
    }

    async fn delete(&self, container_id: &str) -> Result<()> {
        self.stop(container_id).await?;
        ignore_not_found(self.cli.output(&["rm", container_id]).await)?;
        info!(container_id, "Container removed");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ContainerSummary>> {
        let filter = format!("label={}=true", MANAGED_LABEL);
        let format = format!("{{{{.ID}}}}\t{{{{.State}}}}\t{{{{.Label \"{}\"}}}}", RUN_NAME_LABEL);
        let out = self
            .cli
            .output(&["ps", "--all", "--filter", &filter, "--format", &format])
            .await?;

        Ok(out.lines().filter_map(parse_ps_line).collect())
    }

    async fn log(&self, container_id: &str, options: LogOptions) -> Result<LogStream> {
        let tail = options.tail.to_string();
        let mut args = vec!["logs", "--tail", tail.as_str()];
        if options.follow {
            args.push("--follow");
        }
        args.push(container_id);
        self.cli.lines(&args)
    }

    async fn resource_info(&self) -> Result<ResourceInfo> {
        let out = self
            .cli
            .output(&["info", "--format", "{{.NCPU}} {{.MemTotal}}"])
            .await?;
        parse_docker_info(&out)
    }
}

/// Parse `<ncpu> <mem bytes>`.
fn parse_docker_info(out: &str) -> Result<ResourceInfo> {
    let invalid = || BackendError::UnexpectedOutput {
        program: "docker",
        details: format!("cannot parse docker info output: {out:?}"),
    };
    let mut parts = out.split_whitespace();
    let ncpu: i64 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
    let mem_bytes: i64 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
    Ok(ResourceInfo {
        cpu: ncpu * 1000,
        memory: mem_bytes / (1024 * 1024),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderkeeper_protocol::{ExecutorParams, SpiderParams};

    fn spec() -> RunSpec {
        RunSpec {
            spider_params: SpiderParams {
                data_url: "http://collector/data".to_string(),
                log_url: "http://collector/logs".to_string(),
                metrics_url: "http://collector/metrics".to_string(),
                storage_enable: false,
                snapshot_enable: true,
                task_name: "42-scheduled-20240101120000".to_string(),
            },
            executor_params: ExecutorParams {
                image: "quotes:1.2".to_string(),
                cmdline: r#"["scrapy", "crawl", "quotes"]"#.to_string(),
                volume: vec!["/data:/app/data".to_string()],
                environment: vec!["PROXY=off".to_string()],
                cpu_limit: 1500,
                memory_limit: 512,
                executor_selector: String::new(),
            },
        }
    }

    #[test]
    fn test_run_args() {
        let backend = DockerBackend::new(DockerConfig {
            network: Some("crawl".to_string()),
            ..Default::default()
        });
        let args = backend.run_args(&spec()).unwrap();

        let joined = args.join(" ");
        assert!(joined.starts_with("run --detach --init --name spiderkeeper-42-scheduled-20240101120000"));
        assert!(joined.contains("--label spiderkeeper.run-name=42-scheduled-20240101120000"));
        assert!(joined.contains("--network crawl"));
        assert!(joined.contains("--cpus 1.500"));
        assert!(joined.contains("--memory 512m"));
        assert!(joined.contains("--env PROXY=off"));
        assert!(joined.contains("--env TASK_NAME=42-scheduled-20240101120000"));
        assert!(joined.contains("--volume /data:/app/data"));
        assert!(joined.ends_with("quotes:1.2 scrapy crawl quotes"));
    }

    #[test]
    fn test_run_args_without_limits() {
        let mut spec = spec();
        spec.executor_params.cpu_limit = 0;
        spec.executor_params.memory_limit = 0;
        let args = DockerBackend::new(DockerConfig::default()).run_args(&spec).unwrap();
        assert!(!args.contains(&"--cpus".to_string()));
        assert!(!args.contains(&"--memory".to_string()));
        assert!(!args.contains(&"--network".to_string()));
    }

    #[test]
    fn test_run_args_rejects_empty_image() {
        let mut spec = spec();
        spec.executor_params.image = " ".to_string();
        let err = DockerBackend::new(DockerConfig::default()).run_args(&spec).unwrap_err();
        assert!(matches!(err, BackendError::InvalidSpec(_)));
    }

    #[test]
    fn test_container_name_sanitizes() {
        assert_eq!(container_name("a b/c"), "spiderkeeper-a-b-c");
    }

    #[test]
    fn test_parse_ps_line() {
        let summary = parse_ps_line("3f2a9c1d0b7e\texited\t42-scheduled-20240101120000").unwrap();
        assert_eq!(summary.container_id, "3f2a9c1d0b7e");
        assert_eq!(summary.status, RunState::Exited);
        assert_eq!(summary.task_name, "42-scheduled-20240101120000");

        assert!(parse_ps_line("").is_none());
        assert!(parse_ps_line("abc\tweird\tx").is_none());
    }

    #[test]
    fn test_parse_docker_info() {
        let info = parse_docker_info("8 16777216000").unwrap();
        assert_eq!(info.cpu, 8000);
        assert_eq!(info.memory, 16000);
        assert!(parse_docker_info("garbage").is_err());
    }
}
