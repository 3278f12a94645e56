// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::state::{ExecutorType, FleetState, RunState};

/// `{"data": ...}` envelope used by every successful read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data<T> {
    pub data: T,
}

impl<T> Data<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// `{"message": ...}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new("ok")
    }
}

/// `{"detail": ...}` body of every 4xx/5xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Result of `/_run` and `/_check/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub status: RunState,
    pub container_id: String,
}

/// One labelled container, as returned by `/containers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub container_id: String,
    pub status: RunState,
    pub task_name: String,
}

/// Host or cluster capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// CPU in milli-units.
    pub cpu: i64,
    /// Memory in MiB.
    pub memory: i64,
}

/// Body of `POST /executors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterExecutor {
    pub name: String,
    #[serde(default)]
    pub selector: String,
    pub url: String,
    #[serde(rename = "type")]
    pub executor_type: ExecutorType,
}

/// Response data of `POST /executors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorRegistered {
    pub executor_id: i64,
}

/// Body of `POST /heartbeats/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub memory: i64,
    pub cpu: i64,
    #[serde(default)]
    pub status: FleetState,
}

impl Heartbeat {
    pub fn online(resources: ResourceInfo) -> Self {
        Self {
            memory: resources.memory,
            cpu: resources.cpu,
            status: FleetState::Online,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_uses_type_key() {
        let body: RegisterExecutor = serde_json::from_value(json!({
            "name": "exec-1", "url": "http://10.0.0.2:8082/api/v1", "type": "docker"
        }))
        .unwrap();
        assert_eq!(body.executor_type, ExecutorType::Docker);
        assert_eq!(body.selector, "");
    }

    #[test]
    fn test_heartbeat_status_defaults_online() {
        let hb: Heartbeat = serde_json::from_value(json!({"memory": 2048, "cpu": 4000})).unwrap();
        assert_eq!(hb.status, FleetState::Online);
    }

    #[test]
    fn test_container_list_envelope() {
        let body: Data<Vec<ContainerSummary>> = serde_json::from_value(json!({
            "data": [{"container_id": "abc", "status": "EXITED", "task_name": "1-scheduled-x"}]
        }))
        .unwrap();
        assert_eq!(body.data[0].status, RunState::Exited);
    }
}
