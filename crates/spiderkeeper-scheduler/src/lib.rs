// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spiderkeeper Scheduler - Crawl Control Plane
//!
//! Schedules recurring crawl jobs, dispatches each run to an executor of the
//! fleet and follows it to completion, while continuously reconciling its
//! records against what the executors actually run.
//!
//! # Architecture
//!
//! ```text
//!            Server (jobs, artifacts, task list)
//!               ▲            │ _start/_stop/_pause/_unpause
//!               │            ▼
//! ┌──────────────────────────────────────────────┐
//! │  spiderkeeper-scheduler                      │
//! │                                              │
//! │  cron tick ──► worker pool ──► dispatch      │
//! │                    (spawn_blocking)  │       │
//! │  heartbeat monitor   reconciler      │       │
//! │        │                 │           │       │
//! │        ▼                 ▼           ▼       │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  Store (Postgres / SQLite)             │  │
//! │  │  executors · tasks · scheduled_jobs    │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//!         │ _run/_check/_rm/containers   ▲ register + heartbeats
//!         ▼                              │
//!              spiderkeeper-executor (×N)
//! ```
//!
//! # Background workers
//!
//! - [`cron::CronScheduler`] fires due jobs onto a bounded blocking pool
//! - [`heartbeat_monitor::HeartbeatMonitor`] flips silent executors offline
//! - [`reconciler::Reconciler`] writes back terminal containers and resets
//!   executor task counts

pub mod config;
pub mod cron;
pub mod dispatch;
pub mod error;
pub mod executor_client;
pub mod handlers;
pub mod heartbeat_monitor;
pub mod jobs;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod selector;
pub mod server_client;
pub mod store;

pub use error::{Error, Result};
pub use runtime::{SchedulerRuntime, SchedulerRuntimeBuilder};
