// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API served to the scheduler.
//!
//! Action-style endpoints mounted under [`API_PREFIX`]:
//!
//! | Route | Operation |
//! |---|---|
//! | `POST /_run` | [`Backend::run`] |
//! | `GET /_check/{id}` | [`Backend::status`] |
//! | `GET /_stop/{id}` | [`Backend::stop`] |
//! | `GET /_rm/{id}` | [`Backend::delete`] |
//! | `GET /_log/{id}` | [`Backend::log`] |
//! | `GET /containers` | [`Backend::list_all`] |
//! | `GET /resources` | [`Backend::resource_info`] |

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use spiderkeeper_protocol::wire::{ContainerStatus, ContainerSummary, Data, Message, ResourceInfo};
use spiderkeeper_protocol::{API_PREFIX, RunSpec, RunState};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::backend::{Backend, LogOptions};
use crate::error::{Error, Result};

/// Shared state for executor handlers.
pub struct ExecutorState {
    backend: Arc<dyn Backend>,
    log_tail: usize,
}

impl ExecutorState {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            log_tail: LogOptions::default().tail,
        }
    }

    /// Set the default number of log lines.
    pub fn with_log_tail(mut self, tail: usize) -> Self {
        self.log_tail = tail;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

/// Build the executor router.
pub fn router(state: Arc<ExecutorState>) -> Router {
    let api = Router::new()
        .route("/_run", post(run_container))
        .route("/_check/{container_id}", get(check_container))
        .route("/_stop/{container_id}", get(stop_container))
        .route("/_rm/{container_id}", get(remove_container))
        .route("/_log/{container_id}", get(container_log))
        .route("/containers", get(list_containers))
        .route("/resources", get(resources))
        .with_state(state);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
}

async fn run_container(
    State(state): State<Arc<ExecutorState>>,
    Json(spec): Json<RunSpec>,
) -> Result<Json<Data<ContainerStatus>>> {
    let container_id = state
        .backend
        .run(&spec)
        .await
        .map_err(Error::RemoteTaskRun)?;

    info!(
        task_name = %spec.task_name(),
        container_id = %container_id,
        "Task dispatched"
    );

    Ok(Json(Data::new(ContainerStatus {
        status: RunState::Running,
        container_id,
    })))
}

async fn check_container(
    State(state): State<Arc<ExecutorState>>,
    Path(container_id): Path<String>,
) -> Result<Json<Data<ContainerStatus>>> {
    let status = state
        .backend
        .status(&container_id)
        .await
        .map_err(Error::RemoteTaskCheck)?;

    Ok(Json(Data::new(ContainerStatus {
        status,
        container_id,
    })))
}

async fn stop_container(
    State(state): State<Arc<ExecutorState>>,
    Path(container_id): Path<String>,
) -> Result<Json<Message>> {
    state
        .backend
        .stop(&container_id)
        .await
        .map_err(Error::ContainerStop)?;
    Ok(Json(Message::new(format!("Container {} stopped", container_id))))
}

async fn remove_container(
    State(state): State<Arc<ExecutorState>>,
    Path(container_id): Path<String>,
) -> Result<Json<Message>> {
    state
        .backend
        .delete(&container_id)
        .await
        .map_err(Error::ContainerRm)?;
    Ok(Json(Message::new(format!("Container {} removed", container_id))))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default)]
    follow: bool,
    tail: Option<usize>,
}

async fn container_log(
    State(state): State<Arc<ExecutorState>>,
    Path(container_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Response> {
    let options = LogOptions {
        follow: query.follow,
        tail: query.tail.unwrap_or(state.log_tail),
    };
    let lines = state
        .backend
        .log(&container_id, options)
        .await
        .map_err(Error::RemoteTaskGet)?;

    let body = lines.map(move |line| match line {
        Ok(line) => Ok(Bytes::from(line + "\n")),
        Err(e) => {
            warn!(container_id = %container_id, error = %e, "Log stream interrupted");
            Err(e)
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn list_containers(
    State(state): State<Arc<ExecutorState>>,
) -> Result<Json<Data<Vec<ContainerSummary>>>> {
    let containers = state
        .backend
        .list_all()
        .await
        .map_err(Error::RemoteTaskGet)?;
    Ok(Json(Data::new(containers)))
}

async fn resources(State(state): State<Arc<ExecutorState>>) -> Result<Json<Data<ResourceInfo>>> {
    let info = state
        .backend
        .resource_info()
        .await
        .map_err(Error::RemoteTaskGet)?;
    Ok(Json(Data::new(info)))
}
