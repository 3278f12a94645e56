// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the Server collaborator.
//!
//! The Server owns projects, jobs, artifacts and the user-facing task list.
//! The scheduler reads job definitions from it and mirrors run states into
//! its task records. Task states are sent as integer codes.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use spiderkeeper_protocol::RunState;
use spiderkeeper_protocol::wire::Data;
use tracing::debug;

use crate::error::{Error, Result};

/// Job definition as stored by the Server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerJob {
    /// Cron expression the job is scheduled with.
    pub trigger_expression: String,
    pub cmdline: String,
    /// `docker` or `k8s`.
    pub executor_type: String,
    pub executor_selector: String,
    /// `;`-separated bind mounts.
    pub volume: String,
    /// `;`-separated `KEY=VALUE` entries.
    pub environment: String,
    pub storage_enable: bool,
    pub snapshot_enable: bool,
    pub cpu_limit: i64,
    pub memory_limit: i64,
}

/// Artifact the job runs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Artifact {
    pub image: String,
    pub version: Option<String>,
}

impl Artifact {
    /// Full image reference, `image:version`, with `latest` for a missing version.
    pub fn image_ref(&self) -> String {
        let version = self
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("latest");
        format!("{}:{}", self.image, version)
    }
}

#[derive(Debug, Deserialize)]
struct ServerTask {
    id: i64,
}

/// Client for the Server collaborator API.
#[derive(Debug, Clone)]
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    /// Create a client for `base_url` (including the API prefix).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `GET /jobs/{id}`.
    pub async fn get_job(&self, job_id: &str) -> Result<ServerJob> {
        self.get_data(&format!("{}/jobs/{}", self.base_url, job_id), || {
            format!("job {}", job_id)
        })
        .await
    }

    /// `GET /jobs/{id}/artifact`.
    pub async fn get_artifact(&self, job_id: &str) -> Result<Artifact> {
        self.get_data(&format!("{}/jobs/{}/artifact", self.base_url, job_id), || {
            format!("artifact of job {}", job_id)
        })
        .await
    }

    /// `POST /tasks`. Returns the Server-side task id.
    pub async fn create_task(&self, name: &str, job_id: &str, state: RunState) -> Result<i64> {
        let url = format!("{}/tasks", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "name": name,
                "job_id": job_id,
                "task_status": state.code(),
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: Data<ServerTask> = response.json().await?;
        debug!(task_name = %name, server_task_id = body.data.id, "Server task created");
        Ok(body.data.id)
    }

    /// Look up a Server task id by run name.
    pub async fn find_task_id(&self, name: &str) -> Result<i64> {
        let url = format!("{}/tasks", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", format!("filter_name,{}", name))])
            .send()
            .await?
            .error_for_status()?;
        let body: Data<Vec<ServerTask>> = response.json().await?;
        body.data
            .first()
            .map(|task| task.id)
            .ok_or_else(|| Error::ObjectDoesNotExist(format!("server task {}", name)))
    }

    /// `PATCH /tasks/{id}` with the new state.
    pub async fn update_task(&self, server_task_id: i64, state: RunState) -> Result<()> {
        let url = format!("{}/tasks/{}", self.base_url, server_task_id);
        let response = self
            .client
            .patch(&url)
            .json(&json!({ "task_status": state.code() }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ObjectDoesNotExist(format!("server task {}", server_task_id)));
        }
        response.error_for_status()?;
        debug!(server_task_id, state = %state, "Server task updated");
        Ok(())
    }

    async fn get_data<T, F>(&self, url: &str, what: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> String,
    {
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ObjectDoesNotExist(what()));
        }
        let body: Data<Option<T>> = response.error_for_status()?.json().await?;
        body.data.ok_or_else(|| Error::ObjectDoesNotExist(what()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref() {
        let artifact = Artifact {
            image: "registry/spider".to_string(),
            version: Some("1.2".to_string()),
        };
        assert_eq!(artifact.image_ref(), "registry/spider:1.2");

        let artifact = Artifact {
            image: "registry/spider".to_string(),
            version: Some(" ".to_string()),
        };
        assert_eq!(artifact.image_ref(), "registry/spider:latest");
        assert_eq!(Artifact::default().image_ref(), ":latest");
    }

    #[test]
    fn test_job_fields_default() {
        let job: ServerJob = serde_json::from_value(json!({
            "trigger_expression": "@daily",
            "executor_type": "docker",
            "unknown": 1
        }))
        .unwrap();
        assert_eq!(job.trigger_expression, "@daily");
        assert_eq!(job.volume, "");
        assert!(!job.storage_enable);
    }
}
