// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes backend.
//!
//! Each run becomes one bare pod with `restartPolicy: Never`, created through
//! `kubectl create -f -`. Kubernetes has no separate stop primitive, so
//! [`Backend::stop`] deletes the pod.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use spiderkeeper_protocol::wire::{ContainerSummary, ResourceInfo};
use spiderkeeper_protocol::{ExecutorType, RunSpec, RunState};
use tracing::{info, warn};

use super::cli::{Cli, ignore_not_found};
use super::traits::{Backend, BackendError, LogOptions, LogStream, Result};

pub const MANAGED_LABEL: &str = "spiderkeeper/managed";
/// Annotation holding the unmodified run name (label values are too restrictive).
pub const RUN_NAME_ANNOTATION: &str = "spiderkeeper/run-name";

/// Maximum length of a pod name (DNS label).
const MAX_POD_NAME_LEN: usize = 63;
/// Hex digits of the run name digest appended to truncated pod names.
const POD_NAME_HASH_LEN: usize = 8;

/// Configuration for the Kubernetes backend.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    /// Path to the kubectl binary.
    pub binary: String,
    /// Kubeconfig file; uses kubectl's default resolution when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Namespace pods are created in.
    pub namespace: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
            namespace: "default".to_string(),
        }
    }
}

/// Backend that runs crawl pods on Kubernetes.
pub struct KubernetesBackend {
    cli: Cli,
    config: KubernetesConfig,
}

impl KubernetesBackend {
    pub fn new(config: KubernetesConfig) -> Self {
        let mut global_args = Vec::new();
        if let Some(path) = &config.kubeconfig {
            global_args.push("--kubeconfig".to_string());
            global_args.push(path.to_string_lossy().into_owned());
        }
        global_args.push("--namespace".to_string());
        global_args.push(config.namespace.clone());

        Self {
            cli: Cli::new("kubectl", config.binary.clone(), global_args),
            config,
        }
    }

    /// Pod manifest for a run.
    fn pod_manifest(&self, spec: &RunSpec) -> Result<Value> {
        let params = &spec.executor_params;
        if params.image.trim().is_empty() {
            return Err(BackendError::InvalidSpec("image is empty".to_string()));
        }

        let env: Vec<Value> = spec
            .container_env()
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        for (index, volume) in params
            .volume
            .iter()
            .filter(|v| !v.trim().is_empty())
            .enumerate()
        {
            let mut parts = volume.split(':');
            let (Some(host_path), Some(mount_path)) = (parts.next(), parts.next()) else {
                return Err(BackendError::InvalidSpec(format!(
                    "volume must be host:container[:ro], got {volume:?}"
                )));
            };
            let name = format!("volume-{index}");
            volumes.push(json!({ "name": name, "hostPath": { "path": host_path } }));
            mounts.push(json!({
                "name": name,
                "mountPath": mount_path,
                "readOnly": parts.next() == Some("ro"),
            }));
        }

        let mut limits = serde_json::Map::new();
        if params.cpu_limit > 0 {
            limits.insert("cpu".to_string(), json!(format!("{}m", params.cpu_limit)));
        }
        if params.memory_limit > 0 {
            limits.insert("memory".to_string(), json!(format!("{}Mi", params.memory_limit)));
        }

        let mut container = json!({
            "name": "spider",
            "image": params.image,
            "env": env,
            "volumeMounts": mounts,
            "resources": { "limits": limits },
        });
        let command = params.command();
        if !command.is_empty() {
            container["command"] = json!(command);
        }

        Ok(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": pod_name(spec.task_name()),
                "namespace": self.config.namespace,
                "labels": { MANAGED_LABEL: "true" },
                "annotations": { RUN_NAME_ANNOTATION: spec.task_name() },
            },
            "spec": {
                "restartPolicy": "Never",
                "nodeSelector": node_selector(&params.executor_selector),
                "containers": [container],
                "volumes": volumes,
            },
        }))
    }
}

/// Pod name for a run: lower-case DNS label of at most 63 characters.
///
/// Names that do not fit are cut and suffixed with a digest of the full run
/// name, so runs sharing a long prefix still get distinct pods.
pub fn pod_name(task_name: &str) -> String {
    let name: String = task_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    if name.len() > MAX_POD_NAME_LEN {
        let digest = format!("{:x}", Sha256::digest(task_name.as_bytes()));
        let mut prefix = name;
        prefix.truncate(MAX_POD_NAME_LEN - POD_NAME_HASH_LEN - 1);
        let prefix = prefix.trim_matches('-');
        return format!("{}-{}", prefix, &digest[..POD_NAME_HASH_LEN])
            .trim_start_matches('-')
            .to_string();
    }

    let name = name.trim_matches('-');
    if name.is_empty() {
        "spiderkeeper-run".to_string()
    } else {
        name.to_string()
    }
}

/// `key=value[,key=value]` into a nodeSelector map. Entries without `=` are ignored.
fn node_selector(selector: &str) -> Value {
    let map: serde_json::Map<String, Value> = selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), json!(v.trim())))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    Value::Object(map)
}

/// Kubernetes CPU quantity (`"4"`, `"3800m"`, `"0.5"`) in milli-units.
pub fn parse_cpu_quantity(quantity: &str) -> Option<i64> {
    let quantity = quantity.trim();
    if let Some(milli) = quantity.strip_suffix('m') {
        return milli.parse().ok();
    }
    quantity.parse::<f64>().ok().map(|cores| (cores * 1000.0).round() as i64)
}

/// Kubernetes memory quantity (`"16Gi"`, `"16384Ki"`, `"1G"`, bytes) in MiB.
pub fn parse_memory_quantity(quantity: &str) -> Option<i64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];

    let quantity = quantity.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1.0));
    let bytes = number.parse::<f64>().ok()? * multiplier;
    Some((bytes / (1024.0 * 1024.0)).floor() as i64)
}

fn summarize_pod(pod: &Value) -> Option<ContainerSummary> {
    let name = pod.pointer("/metadata/name")?.as_str()?;
    let phase = pod
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let status = match RunState::from_k8s_phase(phase) {
        Ok(status) => status,
        Err(e) => {
            warn!(pod = name, error = %e, "Skipping pod with unrecognised phase");
            return None;
        }
    };
    let task_name = pod
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(RUN_NAME_ANNOTATION))
        .and_then(Value::as_str)
        .unwrap_or(name);

    Some(ContainerSummary {
        container_id: name.to_string(),
        status,
        task_name: task_name.to_string(),
    })
}

fn sum_allocatable(nodes: &Value) -> ResourceInfo {
    let mut total = ResourceInfo::default();
    let items = nodes
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for node in items {
        let Some(allocatable) = node.pointer("/status/allocatable") else {
            continue;
        };
        total.cpu += allocatable
            .get("cpu")
            .and_then(Value::as_str)
            .and_then(parse_cpu_quantity)
            .unwrap_or(0);
        total.memory += allocatable
            .get("memory")
            .and_then(Value::as_str)
            .and_then(parse_memory_quantity)
            .unwrap_or(0);
    }
    total
}

#[async_trait]
impl Backend for KubernetesBackend {
    fn backend_type(&self) -> ExecutorType {
        ExecutorType::K8s
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let manifest = self.pod_manifest(spec)?;
        let body = serde_json::to_vec(&manifest)?;
        let out = self
            .cli
            .output_with_stdin(&["create", "--filename", "-", "--output", "name"], &body)
            .await?;

        let name = out.trim().trim_start_matches("pod/").to_string();
        if name.is_empty() {
            return Err(BackendError::UnexpectedOutput {
                program: "kubectl",
                details: "create returned no pod name".to_string(),
            });
        }

        info!(
            task_name = %spec.task_name(),
            pod = %name,
            namespace = %self.config.namespace,
            "Pod created"
        );
        Ok(name)
    }

    async fn status(&self, container_id: &str) -> Result<RunState> {
        let out = self
            .cli
            .output(&["get", "pod", container_id, "--output", "jsonpath={.status.phase}"])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BackendError::NotFound(container_id.to_string())
                } else {
                    e
                }
            })?;

        RunState::from_k8s_phase(&out).map_err(|e| BackendError::UnexpectedOutput {
            program: "kubectl",
            details: e.to_string(),
        })
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.delete(container_id).await
    }

    async fn delete(&self, container_id: &str) -> Result<()> {
        ignore_not_found(
            self.cli
                .output(&["delete", "pod", container_id, "--ignore-not-found", "--wait=false"])
                .await,
        )?;
        info!(pod = container_id, "Pod deleted");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ContainerSummary>> {
        let selector = format!("{}=true", MANAGED_LABEL);
        let out = self
            .cli
            .output(&["get", "pods", "--selector", &selector, "--output", "json"])
            .await?;
        let pods: Value = serde_json::from_str(&out)?;

        Ok(pods
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(summarize_pod).collect())
            .unwrap_or_default())
    }

    async fn log(&self, container_id: &str, options: LogOptions) -> Result<LogStream> {
        let tail = options.tail.to_string();
        let mut args = vec!["logs", container_id, "--tail", tail.as_str()];
        if options.follow {
            args.push("--follow");
        }
        self.cli.lines(&args)
    }

    async fn resource_info(&self) -> Result<ResourceInfo> {
        let out = self.cli.output(&["get", "nodes", "--output", "json"]).await?;
        let nodes: Value = serde_json::from_str(&out)?;
        Ok(sum_allocatable(&nodes))
    }
}
