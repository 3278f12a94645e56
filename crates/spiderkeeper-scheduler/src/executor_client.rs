// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for executor services.
//!
//! One client serves the whole fleet; every call takes the executor's base
//! URL as recorded in the registry. Failures are reported with the
//! operation-specific error variant and the executor's `detail` message.

use serde::de::DeserializeOwned;
use spiderkeeper_protocol::RunSpec;
use spiderkeeper_protocol::wire::{ContainerStatus, ContainerSummary, Data, ErrorDetail, Message};

use crate::error::{Error, Result};

/// Client for the executor API.
#[derive(Debug, Clone, Default)]
pub struct ExecutorClient {
    client: reqwest::Client,
}

impl ExecutorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// `POST /_run`. Returns the container id.
    pub async fn run(&self, base_url: &str, spec: &RunSpec) -> Result<String> {
        let url = format!("{}/_run", base_url);
        let body: Data<ContainerStatus> = self
            .send(self.client.post(&url).json(spec), Error::RemoteTaskRun)
            .await?;
        let container_id = body.data.container_id.trim().to_string();
        if container_id.is_empty() {
            return Err(Error::RemoteTaskRun(format!(
                "{} returned no container id for {}",
                base_url,
                spec.task_name()
            )));
        }
        Ok(container_id)
    }

    /// `GET /_check/{id}`.
    pub async fn check(&self, base_url: &str, container_id: &str) -> Result<ContainerStatus> {
        let url = format!("{}/_check/{}", base_url, container_id);
        let body: Data<ContainerStatus> = self.send(self.client.get(&url), Error::RemoteTaskCheck).await?;
        Ok(body.data)
    }

    /// `GET /_stop/{id}`.
    pub async fn stop(&self, base_url: &str, container_id: &str) -> Result<()> {
        let url = format!("{}/_stop/{}", base_url, container_id);
        let _: Message = self.send(self.client.get(&url), Error::ContainerStop).await?;
        Ok(())
    }

    /// `GET /_rm/{id}`.
    pub async fn remove(&self, base_url: &str, container_id: &str) -> Result<()> {
        let url = format!("{}/_rm/{}", base_url, container_id);
        let _: Message = self.send(self.client.get(&url), Error::ContainerRm).await?;
        Ok(())
    }

    /// `GET /containers`.
    pub async fn containers(&self, base_url: &str) -> Result<Vec<ContainerSummary>> {
        let url = format!("{}/containers", base_url);
        let body: Data<Vec<ContainerSummary>> =
            self.send(self.client.get(&url), Error::RemoteTaskCheck).await?;
        Ok(body.data)
    }

    async fn send<T, F>(&self, request: reqwest::RequestBuilder, on_error: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(String) -> Error,
    {
        let response = request.send().await.map_err(|e| on_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorDetail>(&body)
                .map(|e| e.detail)
                .unwrap_or(body);
            return Err(on_error(format!("executor returned {}: {}", status, detail)));
        }
        response.json().await.map_err(|e| on_error(e.to_string()))
    }
}
