// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor selection policy.

use crate::store::ExecutorRecord;

/// Picks the executor a run is dispatched to.
pub trait ExecutorSelector: Send + Sync {
    /// Choose one of `candidates` for a job with affinity tag `selector`.
    fn select<'a>(&self, candidates: &'a [ExecutorRecord], selector: &str) -> Option<&'a ExecutorRecord>;
}

/// First candidate whose selector matches, otherwise the first candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl ExecutorSelector for FirstMatch {
    fn select<'a>(&self, candidates: &'a [ExecutorRecord], selector: &str) -> Option<&'a ExecutorRecord> {
        let selector = selector.trim();
        if !selector.is_empty() {
            if let Some(matched) = candidates.iter().find(|e| e.selector == selector) {
                return Some(matched);
            }
        }
        candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use spiderkeeper_protocol::{ExecutorType, FleetState};

    fn executor(id: i64, selector: &str) -> ExecutorRecord {
        let now = Utc::now();
        ExecutorRecord {
            id,
            name: format!("exec-{}", id),
            selector: selector.to_string(),
            url: format!("http://exec-{}/api/v1", id),
            executor_type: ExecutorType::Docker,
            status: FleetState::Online,
            memory: 0,
            cpu: 0,
            task_count: 0,
            expired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_prefers_matching_selector() {
        let candidates = vec![executor(1, "gpu"), executor(2, "eu"), executor(3, "eu")];
        assert_eq!(FirstMatch.select(&candidates, "eu").map(|e| e.id), Some(2));
    }

    #[test]
    fn test_falls_back_to_first() {
        let candidates = vec![executor(1, "gpu"), executor(2, "eu")];
        assert_eq!(FirstMatch.select(&candidates, "us").map(|e| e.id), Some(1));
        assert_eq!(FirstMatch.select(&candidates, "").map(|e| e.id), Some(1));
        assert!(FirstMatch.select(&[], "eu").is_none());
    }
}
