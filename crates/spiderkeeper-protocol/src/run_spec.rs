// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run specification sent from the scheduler to an executor with `/_run`.

use serde::{Deserialize, Serialize};

/// Crawl parameters, exposed to the spider process as environment variables.
///
/// Field names are upper-case on the wire because the spider reads them
/// verbatim from its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiderParams {
    #[serde(rename = "DATA_URL")]
    pub data_url: String,
    #[serde(rename = "LOG_URL")]
    pub log_url: String,
    #[serde(rename = "METRICS_URL")]
    pub metrics_url: String,
    #[serde(rename = "STORAGE_ENABLE", default)]
    pub storage_enable: bool,
    #[serde(rename = "SNAPSHOT_ENABLE", default)]
    pub snapshot_enable: bool,
    #[serde(rename = "TASK_NAME")]
    pub task_name: String,
}

impl SpiderParams {
    /// `KEY=VALUE` pairs in a stable order.
    pub fn to_env(&self) -> Vec<String> {
        vec![
            format!("DATA_URL={}", self.data_url),
            format!("LOG_URL={}", self.log_url),
            format!("METRICS_URL={}", self.metrics_url),
            format!("STORAGE_ENABLE={}", self.storage_enable),
            format!("SNAPSHOT_ENABLE={}", self.snapshot_enable),
            format!("TASK_NAME={}", self.task_name),
        ]
    }
}

/// Container runtime parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorParams {
    /// Full image reference, `name:tag`.
    pub image: String,
    /// Either a JSON list (`["scrapy", "crawl", "x"]`) or a plain command line.
    #[serde(default)]
    pub cmdline: String,
    /// `host:container[:mode]` bind mounts.
    #[serde(default)]
    pub volume: Vec<String>,
    /// `KEY=VALUE` entries.
    #[serde(default)]
    pub environment: Vec<String>,
    /// CPU limit in milli-units; 0 means unlimited.
    #[serde(default)]
    pub cpu_limit: i64,
    /// Memory limit in MiB; 0 means unlimited.
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default)]
    pub executor_selector: String,
}

impl ExecutorParams {
    /// Split the command line into argv.
    ///
    /// Values starting with `[` are parsed as a list; single-quoted lists
    /// (`['a', 'b']`) are accepted as well. Anything else is split on
    /// whitespace. An empty command line yields an empty argv, leaving the
    /// image's default command in place.
    pub fn command(&self) -> Vec<String> {
        let raw = self.cmdline.trim();
        if raw.starts_with('[') {
            if let Ok(args) = serde_json::from_str::<Vec<String>>(raw) {
                return args;
            }
            if let Ok(args) = serde_json::from_str::<Vec<String>>(&raw.replace('\'', "\"")) {
                return args;
            }
        }
        raw.split_whitespace().map(str::to_string).collect()
    }
}

/// Everything an executor needs to start one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub spider_params: SpiderParams,
    pub executor_params: ExecutorParams,
}

impl RunSpec {
    pub fn task_name(&self) -> &str {
        &self.spider_params.task_name
    }

    /// Container environment: executor entries first, then spider params.
    pub fn container_env(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .executor_params
            .environment
            .iter()
            .filter(|e| !e.trim().is_empty())
            .cloned()
            .collect();
        env.extend(self.spider_params.to_env());
        env
    }
}

/// Split a `;`-separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
