// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! Keeps containers in memory; tests drive state transitions with
//! [`MockBackend::set_state`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use spiderkeeper_protocol::wire::{ContainerSummary, ResourceInfo};
use spiderkeeper_protocol::{ExecutorType, RunSpec, RunState};
use tokio::sync::Mutex;

use super::traits::*;

/// Mock container state.
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub task_name: String,
    pub state: RunState,
    pub spec: RunSpec,
}

/// Mock backend for testing.
pub struct MockBackend {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    next_id: AtomicU64,
    /// If true, `run` fails.
    pub fail_run: bool,
    /// Capacity reported by `resource_info`.
    pub resources: ResourceInfo,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            fail_run: false,
            resources: ResourceInfo {
                cpu: 4000,
                memory: 8192,
            },
        }
    }

    /// Create a mock backend whose `run` always fails.
    pub fn failing() -> Self {
        Self {
            fail_run: true,
            ..Self::new()
        }
    }

    /// Force a container into a state (e.g. simulate an out-of-band kill).
    pub async fn set_state(&self, container_id: &str, state: RunState) {
        let mut containers = self.containers.lock().await;
        if let Some(container) = containers.get_mut(container_id) {
            container.state = state;
        }
    }

    pub async fn container(&self, container_id: &str) -> Option<MockContainer> {
        self.containers.lock().await.get(container_id).cloned()
    }

    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn backend_type(&self) -> ExecutorType {
        ExecutorType::Docker
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        if self.fail_run {
            return Err(BackendError::Command {
                program: "mock",
                code: Some(125),
                stderr: "mock run failure".to_string(),
            });
        }

        let id = format!("{:012x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                task_name: spec.task_name().to_string(),
                state: RunState::Running,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    async fn status(&self, container_id: &str) -> Result<RunState> {
        self.containers
            .lock()
            .await
            .get(container_id)
            .map(|c| c.state)
            .ok_or_else(|| BackendError::NotFound(container_id.to_string()))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.set_state(container_id, RunState::Exited).await;
        Ok(())
    }

    async fn delete(&self, container_id: &str) -> Result<()> {
        self.containers.lock().await.remove(container_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self.containers.lock().await;
        let mut list: Vec<ContainerSummary> = containers
            .iter()
            .map(|(id, c)| ContainerSummary {
                container_id: id.clone(),
                status: c.state,
                task_name: c.task_name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        Ok(list)
    }

    async fn log(&self, container_id: &str, options: LogOptions) -> Result<LogStream> {
        let container = self
            .container(container_id)
            .await
            .ok_or_else(|| BackendError::NotFound(container_id.to_string()))?;
        let all: Vec<String> = (1..=3)
            .map(|n| format!("{} line {}", container.task_name, n))
            .collect();
        let skip = all.len().saturating_sub(options.tail);
        let lines: Vec<Result<String>> = all.into_iter().skip(skip).map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(lines)))
    }

    async fn resource_info(&self) -> Result<ResourceInfo> {
        Ok(self.resources)
    }
}
