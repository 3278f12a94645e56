// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types shared by the spiderkeeper scheduler and executor.
//!
//! Both services speak action-style HTTP/JSON (`/_run`, `/_check/{id}`, ...).
//! This crate holds everything that crosses that boundary:
//!
//! - [`RunState`] / [`FleetState`]: lifecycle enumerations and the mapping
//!   from runtime-native status strings
//! - [`RunSpec`]: the per-dispatch bundle of crawl and runtime parameters
//! - [`wire`]: request/response envelopes

pub mod run_spec;
pub mod state;
pub mod wire;

pub use run_spec::{ExecutorParams, RunSpec, SpiderParams};
pub use state::{ExecutorType, FleetState, ParseStateError, RunState};

/// Prefix under which both services mount their HTTP API.
pub const API_PREFIX: &str = "/api/v1";
