// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API tests for the scheduler router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use spiderkeeper_protocol::RunState;
use wiremock::MockServer;

use common::*;

#[tokio::test]
async fn test_executor_registration_and_heartbeat() {
    let store = store().await;
    let app = test_app(&store, "http://server.invalid", Arc::new(RecordingRunner::default()));

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/executors",
        Some(json!({"name": "exec-a", "selector": "eu", "url": "http://exec-a:8082/api/v1", "type": "docker"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let executor_id = body["data"]["executor_id"].as_i64().unwrap();

    let (_, body) = get(&app, "/api/v1/executors?status=offline").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["type"], "docker");
    assert_eq!(body["data"][0]["status"], "OFFLINE");

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/v1/heartbeats/{}", executor_id),
        Some(json!({"memory": 8192, "cpu": 4000, "status": "ONLINE"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "ok"}));

    let (_, body) = get(&app, "/api/v1/executors?status=online&type=docker").await;
    assert_eq!(body["data"][0]["memory"], 8192);
    let (_, body) = get(&app, "/api/v1/executors?type=k8s").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = get(&app, &format!("/api/v1/executors/{}", executor_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "exec-a");
}

#[tokio::test]
async fn test_executor_errors() {
    let store = store().await;
    let app = test_app(&store, "http://server.invalid", Arc::new(RecordingRunner::default()));

    let (status, body) = get(&app, "/api/v1/executors/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("executor 999"));

    let (status, _) = request(
        &app,
        "POST",
        "/api/v1/heartbeats/999",
        Some(json!({"memory": 1, "cpu": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/api/v1/executors?status=sleeping").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = request(&app, "DELETE", "/api/v1/executors/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_executor() {
    let store = store().await;
    let executor = online_executor(&registry(&store), "exec-a", "http://exec-a/api/v1").await;
    let app = test_app(&store, "http://server.invalid", Arc::new(RecordingRunner::default()));

    let (status, _) = request(&app, "DELETE", &format!("/api/v1/executors/{}", executor.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&app, &format!("/api/v1/executors/{}", executor.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_transitions() {
    let store = store().await;
    let server = MockServer::start().await;
    mount_server_job(&server, "7", "@hourly").await;
    let app = test_app(&store, &server.uri(), Arc::new(RecordingRunner::default()));

    let (status, body) = get(&app, "/api/v1/jobs/7/_start").await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = get(&app, "/api/v1/jobs/7/_start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("already scheduled"));

    let (_, body) = get(&app, "/api/v1/jobs").await;
    assert_eq!(body["data"][0]["job_id"], "7");
    assert_eq!(body["data"][0]["cron"], "0 * * * *");

    assert_eq!(get(&app, "/api/v1/jobs/7/_unpause").await.0, StatusCode::CONFLICT);
    assert_eq!(get(&app, "/api/v1/jobs/7/_pause").await.0, StatusCode::OK);
    assert_eq!(get(&app, "/api/v1/jobs/7/_pause").await.0, StatusCode::CONFLICT);
    assert_eq!(get(&app, "/api/v1/jobs/7/_unpause").await.0, StatusCode::OK);
    assert_eq!(get(&app, "/api/v1/jobs/7/_stop").await.0, StatusCode::OK);

    let (status, body) = get(&app, "/api/v1/jobs/7/_stop").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("not scheduled"));
    assert_eq!(get(&app, "/api/v1/jobs/7/_pause").await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_start_with_invalid_cron() {
    let store = store().await;
    let server = MockServer::start().await;
    mount_server_job(&server, "8", "* * * *").await;
    let app = test_app(&store, &server.uri(), Arc::new(RecordingRunner::default()));

    let (status, body) = get(&app, "/api/v1/jobs/8/_start").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("expected 5"));
}

#[tokio::test]
async fn test_start_unknown_server_job() {
    let store = store().await;
    let server = MockServer::start().await;
    let app = test_app(&store, &server.uri(), Arc::new(RecordingRunner::default()));

    let (status, _) = get(&app, "/api/v1/jobs/404/_start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_trigger_reaches_runner() {
    let store = store().await;
    let server = MockServer::start().await;
    mount_server_job(&server, "7", "@hourly").await;
    let runner = Arc::new(RecordingRunner::default());
    let app = test_app(&store, &server.uri(), runner.clone());

    let (status, _) = get(&app, "/api/v1/jobs/7/_trigger").await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..100 {
        if !runner.calls.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let calls = runner.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![("7".to_string(), json!({"trigger_kind": "manual"}))]);
}

#[tokio::test]
async fn test_trigger_unknown_job_is_not_found() {
    let store = store().await;
    let server = MockServer::start().await;
    let runner = Arc::new(RecordingRunner::default());
    let app = test_app(&store, &server.uri(), runner.clone());

    let (status, _) = get(&app, "/api/v1/jobs/404/_trigger").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runner.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_task_queries() {
    let store = store().await;
    let executor = online_executor(&registry(&store), "exec-a", "http://exec-a/api/v1").await;
    let running = insert_task(&store, &executor, "7-scheduled-1", "c1", RunState::Running).await;
    insert_task(&store, &executor, "7-scheduled-2", "c2", RunState::Created).await;
    insert_task(&store, &executor, "8-scheduled-1", "c3", RunState::Running).await;
    let app = test_app(&store, "http://server.invalid", Arc::new(RecordingRunner::default()));

    let (_, body) = get(&app, "/api/v1/tasks?job_id=7").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = get(&app, "/api/v1/tasks?status=RUNNING").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = get(&app, "/api/v1/tasks/count?job_id=7&status=RUNNING,CREATED").await;
    assert_eq!(body, json!({"data": {"count": 2}}));

    let (status, body) = get(&app, &format!("/api/v1/tasks/{}", running.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "7-scheduled-1");
    assert_eq!(body["data"]["status"], "RUNNING");

    assert_eq!(get(&app, "/api/v1/tasks/999").await.0, StatusCode::NOT_FOUND);
    assert_eq!(
        get(&app, "/api/v1/tasks?status=BOGUS").await.0,
        StatusCode::UNPROCESSABLE_ENTITY
    );
}
