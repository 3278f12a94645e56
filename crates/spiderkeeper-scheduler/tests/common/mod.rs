// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test helpers for spiderkeeper-scheduler.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use spiderkeeper_protocol::wire::{Heartbeat, RegisterExecutor, ResourceInfo};
use spiderkeeper_protocol::{ExecutorType, RunState};
use spiderkeeper_scheduler::cron::{CronConfig, CronScheduler, JobRunner};
use spiderkeeper_scheduler::handlers::{SchedulerState, router};
use spiderkeeper_scheduler::jobs::JobController;
use spiderkeeper_scheduler::registry::ExecutorRegistry;
use spiderkeeper_scheduler::server_client::ServerClient;
use spiderkeeper_scheduler::store::{ExecutorRecord, NewTask, SqliteStore, Store, TaskRecord};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Fresh in-memory store with migrations applied.
pub async fn store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

pub fn registry(store: &Arc<dyn Store>) -> ExecutorRegistry {
    ExecutorRegistry::new(store.clone(), HEARTBEAT_INTERVAL)
}

/// Register an executor and bring it online with one heartbeat.
pub async fn online_executor(registry: &ExecutorRegistry, name: &str, url: &str) -> ExecutorRecord {
    let record = registry
        .register(&RegisterExecutor {
            name: name.to_string(),
            selector: String::new(),
            url: url.to_string(),
            executor_type: ExecutorType::Docker,
        })
        .await
        .unwrap();
    registry
        .heartbeat(record.id, &Heartbeat::online(ResourceInfo { cpu: 4000, memory: 8192 }))
        .await
        .unwrap();
    registry.get(record.id).await.unwrap()
}

/// Insert a task record as the dispatch engine would.
pub async fn insert_task(
    store: &Arc<dyn Store>,
    executor: &ExecutorRecord,
    name: &str,
    container_id: &str,
    status: RunState,
) -> TaskRecord {
    store
        .insert_task(&NewTask {
            name: name.to_string(),
            url: executor.url.clone(),
            executor_type: executor.executor_type,
            executor_id: executor.id,
            job_id: name.split('-').next().unwrap_or_default().to_string(),
            container_id: container_id.to_string(),
            status,
            started_at: Utc::now(),
        })
        .await
        .unwrap()
}

/// Mount `GET /jobs/{id}` and `GET /jobs/{id}/artifact` on a mocked Server.
pub async fn mount_server_job(server: &MockServer, job_id: &str, trigger_expression: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/jobs/{}", job_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": job_id,
                "trigger_expression": trigger_expression,
                "cmdline": "scrapy crawl news",
                "executor_type": "docker",
                "executor_selector": "",
                "volume": "/data:/data;",
                "environment": "LANG=C;MODE=full",
                "storage_enable": true
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/jobs/{}/artifact", job_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"image": "crawlers/news", "version": "1.0"}
        })))
        .mount(server)
        .await;
}

/// Runner that records every call and does nothing else.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl JobRunner for RecordingRunner {
    fn run(&self, job_id: &str, payload: &Value) -> spiderkeeper_scheduler::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), payload.clone()));
        Ok(())
    }
}

/// Router over `store` with a recording runner behind the cron scheduler.
pub fn test_app(store: &Arc<dyn Store>, server_url: &str, runner: Arc<RecordingRunner>) -> Router {
    let cron = Arc::new(CronScheduler::new(store.clone(), runner, CronConfig::default()));
    router(Arc::new(SchedulerState {
        store: store.clone(),
        registry: registry(store),
        jobs: JobController::new(cron, ServerClient::new(server_url)),
    }))
}

/// Send a request and return status plus parsed JSON body (`Null` if empty).
pub async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    request(app, "GET", uri, None).await
}
