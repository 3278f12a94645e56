// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API of the scheduler.
//!
//! Mounted under [`API_PREFIX`]. Executors use `/executors` and
//! `/heartbeats/{id}`; the Server drives jobs through the action routes
//! (`/jobs/{id}/_start`, `_stop`, `_pause`, `_unpause`, `_trigger`).

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use spiderkeeper_protocol::wire::{Data, ExecutorRegistered, Heartbeat, Message, RegisterExecutor};
use spiderkeeper_protocol::{API_PREFIX, ExecutorType, FleetState, RunState};
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::jobs::JobController;
use crate::registry::ExecutorRegistry;
use crate::store::{ExecutorFilter, ExecutorRecord, ScheduledJob, Store, TaskFilter, TaskRecord};

/// Shared state for scheduler handlers.
pub struct SchedulerState {
    pub store: Arc<dyn Store>,
    pub registry: ExecutorRegistry,
    pub jobs: JobController,
}

/// Build the scheduler router.
pub fn router(state: Arc<SchedulerState>) -> Router {
    let api = Router::new()
        .route("/executors", post(register_executor).get(list_executors))
        .route("/executors/{executor_id}", get(get_executor).delete(delete_executor))
        .route("/heartbeats/{executor_id}", post(heartbeat))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}/_start", get(start_job))
        .route("/jobs/{job_id}/_stop", get(stop_job))
        .route("/jobs/{job_id}/_pause", get(pause_job))
        .route("/jobs/{job_id}/_unpause", get(unpause_job))
        .route("/jobs/{job_id}/_trigger", get(trigger_job))
        .route("/tasks", get(list_tasks))
        .route("/tasks/count", get(count_tasks))
        .route("/tasks/{task_id}", get(get_task))
        .with_state(state);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Executors
// ============================================================================

async fn register_executor(
    State(state): State<Arc<SchedulerState>>,
    Json(body): Json<RegisterExecutor>,
) -> Result<Json<Data<ExecutorRegistered>>> {
    let record = state.registry.register(&body).await?;
    Ok(Json(Data::new(ExecutorRegistered {
        executor_id: record.id,
    })))
}

#[derive(Debug, Deserialize)]
struct ExecutorQuery {
    status: Option<String>,
    #[serde(rename = "type")]
    executor_type: Option<String>,
}

async fn list_executors(
    State(state): State<Arc<SchedulerState>>,
    Query(query): Query<ExecutorQuery>,
) -> Result<Json<Data<Vec<ExecutorRecord>>>> {
    let filter = ExecutorFilter {
        status: parse_param::<FleetState>("status", query.status.as_deref())?,
        executor_type: parse_param::<ExecutorType>("type", query.executor_type.as_deref())?,
    };
    Ok(Json(Data::new(state.registry.list(&filter).await?)))
}

async fn get_executor(
    State(state): State<Arc<SchedulerState>>,
    Path(executor_id): Path<i64>,
) -> Result<Json<Data<ExecutorRecord>>> {
    Ok(Json(Data::new(state.registry.get(executor_id).await?)))
}

async fn delete_executor(
    State(state): State<Arc<SchedulerState>>,
    Path(executor_id): Path<i64>,
) -> Result<Json<Message>> {
    state.registry.delete(executor_id).await?;
    Ok(Json(Message::new(format!("Executor {} deleted", executor_id))))
}

async fn heartbeat(
    State(state): State<Arc<SchedulerState>>,
    Path(executor_id): Path<i64>,
    Json(body): Json<Heartbeat>,
) -> Result<Json<Message>> {
    state.registry.heartbeat(executor_id, &body).await?;
    Ok(Json(Message::ok()))
}

// ============================================================================
// Jobs
// ============================================================================

async fn list_jobs(State(state): State<Arc<SchedulerState>>) -> Result<Json<Data<Vec<ScheduledJob>>>> {
    Ok(Json(Data::new(state.jobs.list().await?)))
}

async fn start_job(
    State(state): State<Arc<SchedulerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Message>> {
    state.jobs.start(&job_id).await?;
    Ok(Json(Message::ok()))
}

async fn stop_job(
    State(state): State<Arc<SchedulerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Message>> {
    state.jobs.stop(&job_id).await?;
    Ok(Json(Message::ok()))
}

async fn pause_job(
    State(state): State<Arc<SchedulerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Message>> {
    state.jobs.pause(&job_id).await?;
    Ok(Json(Message::ok()))
}

async fn unpause_job(
    State(state): State<Arc<SchedulerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Message>> {
    state.jobs.unpause(&job_id).await?;
    Ok(Json(Message::ok()))
}

async fn trigger_job(
    State(state): State<Arc<SchedulerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Message>> {
    state.jobs.trigger(&job_id).await?;
    Ok(Json(Message::ok()))
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Deserialize)]
struct TaskQuery {
    job_id: Option<String>,
    /// Comma-separated run states.
    status: Option<String>,
}

impl TaskQuery {
    fn filter(&self) -> Result<TaskFilter> {
        let statuses = self
            .status
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| RunState::from_str(s).map_err(|e| Error::Validation(format!("status: {}", e))))
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskFilter {
            job_id: self.job_id.clone().filter(|id| !id.is_empty()),
            statuses,
        })
    }
}

#[derive(Debug, Serialize)]
struct TaskCount {
    count: i64,
}

async fn list_tasks(
    State(state): State<Arc<SchedulerState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Data<Vec<TaskRecord>>>> {
    Ok(Json(Data::new(state.store.list_tasks(&query.filter()?).await?)))
}

async fn count_tasks(
    State(state): State<Arc<SchedulerState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Data<TaskCount>>> {
    let count = state.store.count_tasks(&query.filter()?).await?;
    Ok(Json(Data::new(TaskCount { count })))
}

async fn get_task(
    State(state): State<Arc<SchedulerState>>,
    Path(task_id): Path<i64>,
) -> Result<Json<Data<TaskRecord>>> {
    state
        .store
        .get_task(task_id)
        .await?
        .map(|task| Json(Data::new(task)))
        .ok_or_else(|| Error::ObjectDoesNotExist(format!("task {}", task_id)))
}

fn parse_param<T: FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| Error::Validation(format!("{}: {}", name, e))),
        None => Ok(None),
    }
}
