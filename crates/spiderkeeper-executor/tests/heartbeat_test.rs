// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration and heartbeat tests against a mocked scheduler.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spiderkeeper_executor::backend::MockBackend;
use spiderkeeper_executor::heartbeat::{HeartbeatEmitter, HeartbeatEmitterConfig};
use spiderkeeper_executor::runtime::ExecutorRuntime;
use spiderkeeper_protocol::ExecutorType;
use spiderkeeper_protocol::wire::{RegisterExecutor, ResourceInfo};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registration() -> RegisterExecutor {
    RegisterExecutor {
        name: "exec-a".to_string(),
        selector: "eu".to_string(),
        url: "http://exec-a:8082/api/v1".to_string(),
        executor_type: ExecutorType::Docker,
    }
}

fn emitter(scheduler: &MockServer) -> HeartbeatEmitter {
    HeartbeatEmitter::new(
        Arc::new(MockBackend::new()),
        HeartbeatEmitterConfig {
            scheduler_url: format!("{}/api/v1", scheduler.uri()),
            registration: registration(),
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(200),
        },
    )
}

#[tokio::test]
async fn test_register_returns_executor_id() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/executors"))
        .and(body_json(json!({
            "name": "exec-a",
            "selector": "eu",
            "url": "http://exec-a:8082/api/v1",
            "type": "docker"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"executor_id": 7}})))
        .expect(1)
        .mount(&scheduler)
        .await;

    let id = emitter(&scheduler).register().await.unwrap();
    assert_eq!(id, 7);
}

#[tokio::test]
async fn test_register_rejected() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/executors"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
        .mount(&scheduler)
        .await;

    let err = emitter(&scheduler).register().await.unwrap_err();
    assert!(err.to_string().contains("Registration failed"));
}

#[tokio::test]
async fn test_heartbeat_payload() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/heartbeats/7"))
        .and(body_json(json!({"memory": 8192, "cpu": 4000, "status": "ONLINE"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .expect(1)
        .mount(&scheduler)
        .await;

    emitter(&scheduler)
        .send_heartbeat(7, ResourceInfo { cpu: 4000, memory: 8192 })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_loop_keeps_running_after_failures() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/heartbeats/3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&scheduler)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/heartbeats/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .mount(&scheduler)
        .await;

    let emitter = Arc::new(emitter(&scheduler));
    let shutdown = emitter.shutdown_handle();
    let worker = emitter.clone();
    let handle = tokio::spawn(async move { worker.run(3).await });

    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    let received = scheduler.received_requests().await.unwrap();
    assert!(received.len() >= 3, "expected retries, got {}", received.len());
}

#[tokio::test]
async fn test_runtime_start_registers_and_serves() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/executors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"executor_id": 11}})))
        .mount(&scheduler)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/heartbeats/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .mount(&scheduler)
        .await;

    let runtime = ExecutorRuntime::builder()
        .backend(Arc::new(MockBackend::new()))
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .scheduler_url(format!("{}/api/v1", scheduler.uri()))
        .registration(registration())
        .heartbeat_interval(Duration::from_millis(50))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert_eq!(runtime.executor_id(), 11);

    let url = format!("http://{}/api/v1/resources", runtime.local_addr());
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["cpu"], 4000);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_fails_when_registration_fails() {
    let scheduler = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/executors"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&scheduler)
        .await;

    let result = ExecutorRuntime::builder()
        .backend(Arc::new(MockBackend::new()))
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .scheduler_url(format!("{}/api/v1", scheduler.uri()))
        .registration(registration())
        .build()
        .unwrap()
        .start()
        .await;
    assert!(result.is_err());
}
