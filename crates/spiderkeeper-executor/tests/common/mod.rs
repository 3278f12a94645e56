// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test helpers for spiderkeeper-executor.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use spiderkeeper_executor::backend::MockBackend;
use spiderkeeper_executor::handlers::{ExecutorState, router};
use spiderkeeper_protocol::{ExecutorParams, RunSpec, SpiderParams};
use tower::ServiceExt;

/// Build a router backed by the given mock.
pub fn test_app(backend: Arc<MockBackend>) -> Router {
    router(Arc::new(ExecutorState::new(backend)))
}

/// Run spec for a task with the given name.
pub fn run_spec(task_name: &str) -> RunSpec {
    RunSpec {
        spider_params: SpiderParams {
            data_url: "http://collector/data".to_string(),
            log_url: "http://collector/log".to_string(),
            metrics_url: "http://collector/metrics".to_string(),
            storage_enable: false,
            snapshot_enable: false,
            task_name: task_name.to_string(),
        },
        executor_params: ExecutorParams {
            image: "crawlers/news:1.0".to_string(),
            cmdline: r#"["scrapy", "crawl", "news"]"#.to_string(),
            volume: vec![],
            environment: vec!["LANG=C".to_string()],
            cpu_limit: 500,
            memory_limit: 256,
            executor_selector: String::new(),
        },
    }
}

/// Send a GET request and return status plus raw body.
pub async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

/// Send a JSON POST request and return status plus raw body.
pub async fn post_json(app: &Router, uri: &str, payload: &impl serde::Serialize) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}
