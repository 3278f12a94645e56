// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spiderkeeper Executor - Crawl Container Agent
//!
//! A small HTTP service that runs one crawl task per container on a single
//! Docker host or Kubernetes namespace, on behalf of the scheduler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     spiderkeeper-scheduler   │
//! └──────────────────────────────┘
//!        │ _run/_check/_rm    ▲ register + heartbeats
//!        ▼                    │
//! ┌──────────────────────────────┐
//! │  spiderkeeper-executor       │
//! │  ┌────────────┐ ┌─────────┐  │
//! │  │  handlers  │ │heartbeat│  │
//! │  └────────────┘ └─────────┘  │
//! │         │            │       │
//! │         ▼            ▼       │
//! │   ┌──────────────────────┐   │
//! │   │  Backend (trait)     │   │
//! │   │  docker / kubectl    │   │
//! │   └──────────────────────┘   │
//! └──────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. Bind the HTTP server.
//! 2. Register with the scheduler and obtain an executor id.
//! 3. Send a resource heartbeat every `SPIDERKEEPER_HEARTBEAT_INTERVAL`
//!    seconds until shutdown.

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod runtime;

pub use error::{Error, Result};
pub use runtime::{ExecutorRuntime, ExecutorRuntimeBuilder};
