// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job lifecycle operations exposed over HTTP.
//!
//! Each operation checks the job's current schedule state and fails with a
//! conflict error when the transition does not apply.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::cron::{CronScheduler, MANUAL, SCHEDULED};
use crate::error::{Error, Result};
use crate::server_client::ServerClient;
use crate::store::ScheduledJob;

/// Starts, stops, pauses, resumes and triggers jobs.
#[derive(Clone)]
pub struct JobController {
    cron: Arc<CronScheduler>,
    server: ServerClient,
}

impl JobController {
    pub fn new(cron: Arc<CronScheduler>, server: ServerClient) -> Self {
        Self { cron, server }
    }

    async fn scheduled(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        match self.cron.get_job(job_id).await {
            Ok(job) => Ok(Some(job)),
            Err(Error::ObjectDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Schedule a job with the trigger expression stored on the Server.
    pub async fn start(&self, job_id: &str) -> Result<()> {
        if self.scheduled(job_id).await?.is_some() {
            return Err(Error::JobRun(format!("job {} is already scheduled", job_id)));
        }

        let job = self.server.get_job(job_id).await?;
        let added = self
            .cron
            .add_job(job_id, &job.trigger_expression, json!({ "trigger_kind": SCHEDULED }))
            .await?;
        if !added {
            return Err(Error::JobRun(format!("job {} is already scheduled", job_id)));
        }

        info!(job_id = %job_id, trigger_expression = %job.trigger_expression, "Job started");
        Ok(())
    }

    pub async fn stop(&self, job_id: &str) -> Result<()> {
        if self.scheduled(job_id).await?.is_none() {
            return Err(Error::JobStopped(format!("job {} is not scheduled", job_id)));
        }
        self.cron.remove_job(job_id).await
    }

    pub async fn pause(&self, job_id: &str) -> Result<()> {
        match self.scheduled(job_id).await? {
            None => Err(Error::JobPause(format!("job {} is not scheduled", job_id))),
            Some(job) if job.paused => Err(Error::JobPause(format!("job {} is already paused", job_id))),
            Some(_) => self.cron.pause_job(job_id).await,
        }
    }

    pub async fn unpause(&self, job_id: &str) -> Result<()> {
        match self.scheduled(job_id).await? {
            None => Err(Error::JobUnpause(format!("job {} is not scheduled", job_id))),
            Some(job) if !job.paused => Err(Error::JobUnpause(format!("job {} is not paused", job_id))),
            Some(_) => self.cron.resume_job(job_id).await,
        }
    }

    /// Dispatch one run now, outside the cron schedule.
    pub async fn trigger(&self, job_id: &str) -> Result<()> {
        self.server.get_job(job_id).await?;
        if !self.cron.submit(job_id, MANUAL, &json!({ "trigger_kind": MANUAL })) {
            return Err(Error::JobRun(format!(
                "job {} already has the maximum number of running instances",
                job_id
            )));
        }
        info!(job_id = %job_id, "Job triggered manually");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ScheduledJob>> {
        self.cron.list_jobs().await
    }
}
