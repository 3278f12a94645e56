// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle enumerations.
//!
//! Containers, pods and scheduler task records share [`RunState`]; executors
//! use [`FleetState`]. A run state is forwarded to the Server collaborator
//! as the integer from [`RunState::code`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a state name or code is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

/// State of one run (container, pod or task record).
///
/// Variant order is the comparison order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    Restarting,
    Running,
    Paused,
    Exited,
    Dead,
    Finish,
    Stopped,
    Failure,
}

/// Docker `State.Status` values.
const DOCKER_STATES: &[(&str, RunState)] = &[
    ("created", RunState::Created),
    ("restarting", RunState::Restarting),
    ("running", RunState::Running),
    ("paused", RunState::Paused),
    ("removing", RunState::Exited),
    ("exited", RunState::Exited),
    ("dead", RunState::Dead),
];

/// Kubernetes pod `status.phase` values.
const K8S_PHASES: &[(&str, RunState)] = &[
    ("Pending", RunState::Created),
    ("Running", RunState::Running),
    ("Succeeded", RunState::Finish),
    ("Failed", RunState::Failure),
    ("Unknown", RunState::Dead),
];

impl RunState {
    /// All variants in comparison order.
    pub const ALL: [RunState; 9] = [
        RunState::Created,
        RunState::Restarting,
        RunState::Running,
        RunState::Paused,
        RunState::Exited,
        RunState::Dead,
        RunState::Finish,
        RunState::Stopped,
        RunState::Failure,
    ];

    /// States after which a task record must never change again.
    pub const TERMINAL: [RunState; 5] = [
        RunState::Exited,
        RunState::Dead,
        RunState::Finish,
        RunState::Stopped,
        RunState::Failure,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Integer code used by the Server collaborator.
    pub fn code(self) -> i32 {
        match self {
            RunState::Created => 1,
            RunState::Restarting => 2,
            RunState::Running => 3,
            RunState::Paused => 4,
            RunState::Exited => 5,
            RunState::Dead => 6,
            RunState::Finish => 0,
            RunState::Stopped => -1,
            RunState::Failure => -2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "CREATED",
            RunState::Restarting => "RESTARTING",
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Exited => "EXITED",
            RunState::Dead => "DEAD",
            RunState::Finish => "FINISH",
            RunState::Stopped => "STOPPED",
            RunState::Failure => "FAILURE",
        }
    }

    /// Map a Docker container status (`docker inspect .State.Status`).
    pub fn from_docker(status: &str) -> Result<Self, ParseStateError> {
        lookup(DOCKER_STATES, status.trim())
    }

    /// Map a Kubernetes pod phase.
    pub fn from_k8s_phase(phase: &str) -> Result<Self, ParseStateError> {
        // A pod that has not been scheduled yet reports an empty phase.
        let phase = phase.trim();
        if phase.is_empty() {
            return Ok(RunState::Created);
        }
        lookup(K8S_PHASES, phase)
    }
}

fn lookup(table: &[(&str, RunState)], native: &str) -> Result<RunState, ParseStateError> {
    table
        .iter()
        .find(|(name, _)| *name == native)
        .map(|(_, state)| *state)
        .ok_or_else(|| ParseStateError(native.to_string()))
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Executor availability, driven by heartbeats.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetState {
    #[default]
    Online,
    Offline,
}

impl FleetState {
    pub fn as_str(self) -> &'static str {
        match self {
            FleetState::Online => "ONLINE",
            FleetState::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FleetState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("online") {
            Ok(FleetState::Online)
        } else if s.eq_ignore_ascii_case("offline") {
            Ok(FleetState::Offline)
        } else {
            Err(ParseStateError(s.to_string()))
        }
    }
}

/// Container runtime an executor drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorType {
    Docker,
    K8s,
}

impl ExecutorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorType::Docker => "docker",
            ExecutorType::K8s => "k8s",
        }
    }
}

impl fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorType {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(ExecutorType::Docker),
            "k8s" | "kubernetes" => Ok(ExecutorType::K8s),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

macro_rules! impl_try_from_string {
    ($($ty:ty),*) => {$(
        impl TryFrom<String> for $ty {
            type Error = ParseStateError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    )*};
}

// Lets database rows decode text columns straight into the enums.
impl_try_from_string!(RunState, FleetState, ExecutorType);
