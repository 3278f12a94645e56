// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task dispatch engine.
//!
//! One call to [`DispatchEngine::dispatch`] carries a single run from the
//! cron fire to cleanup:
//!
//! ```text
//! Server job + artifact -> RunSpec -> pick executor -> POST /_run
//!     -> task_count +1, task record, Server task
//!     -> poll /_check until terminal (store first, then Server)
//!     -> task_count -1, /_rm
//! ```
//!
//! The engine runs on a blocking worker thread and drives the async store
//! and HTTP clients through a runtime [`Handle`]. It must never be called
//! from inside an async task.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;
use serde_json::Value;
use spiderkeeper_protocol::run_spec::split_list;
use spiderkeeper_protocol::{ExecutorParams, ExecutorType, RunSpec, RunState, SpiderParams};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::cron::{JobRunner, SCHEDULED};
use crate::error::{Error, Result};
use crate::executor_client::ExecutorClient;
use crate::registry::ExecutorRegistry;
use crate::selector::{ExecutorSelector, FirstMatch};
use crate::server_client::{Artifact, ServerClient, ServerJob};
use crate::store::{ExecutorRecord, NewTask, Store, TaskFilter, TaskRecord};

/// Dispatch engine configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between `/_check` calls.
    pub poll_interval: Duration,
    /// Stop the container after this long; `None` waits forever.
    pub poll_timeout: Option<Duration>,
    /// Skip a fire when the job already has this many active tasks.
    pub max_active_tasks_per_job: Option<i64>,
    /// Collector base URL handed to spiders.
    pub collector_url: String,
    /// Timezone of the timestamp in run names.
    pub timezone: Tz,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_timeout: None,
            max_active_tasks_per_job: None,
            collector_url: String::new(),
            timezone: Tz::UTC,
        }
    }
}

/// Carries runs from cron fire to cleanup.
pub struct DispatchEngine {
    handle: Handle,
    store: Arc<dyn Store>,
    registry: ExecutorRegistry,
    server: ServerClient,
    executors: ExecutorClient,
    selector: Arc<dyn ExecutorSelector>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        handle: Handle,
        store: Arc<dyn Store>,
        registry: ExecutorRegistry,
        server: ServerClient,
        config: DispatchConfig,
    ) -> Self {
        Self {
            handle,
            store,
            registry,
            server,
            executors: ExecutorClient::new(),
            selector: Arc::new(FirstMatch),
            config,
        }
    }

    /// Replace the executor selection policy.
    pub fn with_selector(mut self, selector: Arc<dyn ExecutorSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_executor_client(mut self, executors: ExecutorClient) -> Self {
        self.executors = executors;
        self
    }

    /// Run one fire of `job_id` to completion.
    ///
    /// Returns the final task record, or `None` when the fire was skipped
    /// because the job is at its active task limit.
    pub fn dispatch(&self, job_id: &str, trigger_kind: &str) -> Result<Option<TaskRecord>> {
        if self.at_active_limit(job_id)? {
            return Ok(None);
        }

        let job = self.handle.block_on(self.server.get_job(job_id))?;
        let artifact = self.handle.block_on(self.server.get_artifact(job_id))?;

        let task_name = self.task_name(job_id, trigger_kind);
        let spec = self.run_spec(&task_name, &job, &artifact);
        let executor_type = ExecutorType::from_str(&job.executor_type)
            .map_err(|e| Error::Validation(format!("job {}: {}", job_id, e)))?;

        let executor = self.choose_executor(executor_type, &job.executor_selector)?;

        let container_id = self.handle.block_on(self.executors.run(&executor.url, &spec))?;
        info!(
            job_id = %job_id,
            task_name = %task_name,
            executor_id = executor.id,
            container_id = %container_id,
            "Task dispatched"
        );

        self.handle
            .block_on(self.registry.adjust_task_count(executor.id, 1))?;
        let task = self.handle.block_on(self.store.insert_task(&NewTask {
            name: task_name.clone(),
            url: executor.url.clone(),
            executor_type: executor.executor_type,
            executor_id: executor.id,
            job_id: job_id.to_string(),
            container_id: container_id.clone(),
            status: RunState::Created,
            started_at: Utc::now(),
        }))?;
        let server_task_id = self
            .handle
            .block_on(self.server.create_task(&task_name, job_id, RunState::Created))?;
        self.handle
            .block_on(self.store.set_server_task_id(&task_name, server_task_id))?;

        self.poll_to_terminal(&task, server_task_id)?;
        self.cleanup(&task);

        self.handle.block_on(self.store.get_task_by_name(&task_name))
    }

    fn at_active_limit(&self, job_id: &str) -> Result<bool> {
        let Some(limit) = self.config.max_active_tasks_per_job else {
            return Ok(false);
        };
        let active = self.handle.block_on(self.store.count_tasks(&TaskFilter {
            job_id: Some(job_id.to_string()),
            statuses: vec![RunState::Running, RunState::Created],
        }))?;
        if active >= limit {
            warn!(job_id = %job_id, active, limit, "Job at active task limit, skipping run");
            return Ok(true);
        }
        Ok(false)
    }

    fn task_name(&self, job_id: &str, trigger_kind: &str) -> String {
        let local = Utc::now().with_timezone(&self.config.timezone);
        format!("{}-{}-{}", job_id, trigger_kind, local.format("%Y%m%d%H%M%S"))
    }

    fn run_spec(&self, task_name: &str, job: &ServerJob, artifact: &Artifact) -> RunSpec {
        let collector = &self.config.collector_url;
        RunSpec {
            spider_params: SpiderParams {
                data_url: format!("{}/data", collector),
                log_url: format!("{}/log", collector),
                metrics_url: format!("{}/metrics", collector),
                storage_enable: job.storage_enable,
                snapshot_enable: job.snapshot_enable,
                task_name: task_name.to_string(),
            },
            executor_params: ExecutorParams {
                image: artifact.image_ref(),
                cmdline: job.cmdline.clone(),
                volume: split_list(&job.volume),
                environment: split_list(&job.environment),
                cpu_limit: job.cpu_limit,
                memory_limit: job.memory_limit,
                executor_selector: job.executor_selector.clone(),
            },
        }
    }

    fn choose_executor(&self, executor_type: ExecutorType, selector: &str) -> Result<ExecutorRecord> {
        let candidates = self
            .handle
            .block_on(self.registry.list_online(Some(executor_type)))?;
        self.selector
            .select(&candidates, selector)
            .cloned()
            .ok_or_else(|| {
                Error::ObjectDoesNotExist(format!("no online {} executor", executor_type))
            })
    }

    fn poll_to_terminal(&self, task: &TaskRecord, server_task_id: i64) -> Result<()> {
        let started = Instant::now();
        let mut current = task.status;

        loop {
            std::thread::sleep(self.config.poll_interval);

            if let Some(timeout) = self.config.poll_timeout {
                if started.elapsed() >= timeout {
                    warn!(
                        task_name = %task.name,
                        timeout_secs = timeout.as_secs(),
                        "Task exceeded poll timeout, stopping container"
                    );
                    if let Err(e) = self
                        .handle
                        .block_on(self.executors.stop(&task.url, &task.container_id))
                    {
                        error!(task_name = %task.name, error = %e, "Failed to stop timed out container");
                    }
                    self.record_state(task, server_task_id, RunState::Stopped)?;
                    return Ok(());
                }
            }

            let status = self
                .handle
                .block_on(self.executors.check(&task.url, &task.container_id))?;
            if status.status != current {
                debug!(task_name = %task.name, from = %current, to = %status.status, "Task state changed");
                self.record_state(task, server_task_id, status.status)?;
                current = status.status;
            }
            if current.is_terminal() {
                info!(task_name = %task.name, state = %current, "Task finished");
                return Ok(());
            }
        }
    }

    /// Scheduler record first, then the Server.
    fn record_state(&self, task: &TaskRecord, server_task_id: i64, state: RunState) -> Result<()> {
        self.handle
            .block_on(self.store.update_task_state(&task.name, state, Utc::now()))?;
        self.handle
            .block_on(self.server.update_task(server_task_id, state))?;
        Ok(())
    }

    fn cleanup(&self, task: &TaskRecord) {
        if let Err(e) = self
            .handle
            .block_on(self.registry.adjust_task_count(task.executor_id, -1))
        {
            error!(task_name = %task.name, executor_id = task.executor_id, error = %e, "Failed to release task slot");
        }
        if let Err(e) = self
            .handle
            .block_on(self.executors.remove(&task.url, &task.container_id))
        {
            warn!(task_name = %task.name, container_id = %task.container_id, error = %e, "Failed to remove container");
        }
    }
}

impl JobRunner for DispatchEngine {
    fn run(&self, job_id: &str, payload: &Value) -> Result<()> {
        let trigger_kind = payload
            .get("trigger_kind")
            .and_then(Value::as_str)
            .unwrap_or(SCHEDULED);
        self.dispatch(job_id, trigger_kind).map(|_| ())
    }
}
