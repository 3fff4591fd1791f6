use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tokio::sync::watch;

use crate::config::{QueueConfig, SearchConfig};
use crate::queue::task::{TaskError, TaskKind, TaskResult, MAX_WAIT_MILLIS};
use crate::queue::{ClaimedTask, Payload, TaskQueue};
use crate::search::fusion::FusionEngine;
use crate::search::hybrid::HybridSearcher;

/// Claims, runs and completes tasks until told to stop.
pub struct Worker {
    queue: TaskQueue,
    engine: Arc<FusionEngine>,
    hybrid: Arc<HybridSearcher>,
    poll_interval: Duration,
    lease: Duration,
    default_results: usize,
    max_results: usize,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        engine: Arc<FusionEngine>,
        hybrid: Arc<HybridSearcher>,
        queue_config: &QueueConfig,
        search_config: &SearchConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            hybrid,
            poll_interval: Duration::from_secs(queue_config.poll_interval_secs),
            lease: Duration::from_secs(queue_config.lease_secs),
            default_results: search_config.default_results,
            max_results: search_config.max_results,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Run one task. Every failure becomes an error result.
    pub async fn process(&self, task: &ClaimedTask) -> TaskResult {
        let kind = match &task.payload {
            Payload::Json(value) => match TaskKind::parse(value) {
                Ok(kind) => kind,
                Err(e) => return TaskResult::error(e),
            },
            Payload::Malformed { error, .. } => {
                return TaskResult::error(TaskError::Malformed(error.clone()))
            }
        };

        match kind {
            TaskKind::Search {
                query,
                n_results,
                hybrid,
            } => self.search(&query, n_results, hybrid).await,
            TaskKind::Ping { message } => TaskResult::success(json!({
                "pong": message.unwrap_or_else(|| "pong".to_string()),
                "worker": self.queue.machine(),
            })),
            TaskKind::Wait { millis } => {
                let millis = millis.min(MAX_WAIT_MILLIS);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                TaskResult::success(json!({ "waited_ms": millis }))
            }
        }
    }

    async fn search(&self, query: &str, n_results: Option<usize>, hybrid: bool) -> TaskResult {
        let query = query.trim();
        if query.is_empty() {
            return TaskResult::error("search task has an empty query");
        }
        let n = n_results
            .unwrap_or(self.default_results)
            .min(self.max_results);

        let outcome = if hybrid {
            self.hybrid.search(query, n).await
        } else {
            self.engine.search(query, n).await
        };

        if outcome.backend_unavailable() {
            return TaskResult::error(format!(
                "knowledge base unavailable: all {} collections failed",
                outcome.collections_queried
            ));
        }
        TaskResult::success(json!({
            "results": outcome.results,
            "failed_collections": outcome.failed_collections,
        }))
    }

    /// Claim and finish at most one task. `Ok(false)` means the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(task) = self.queue.claim_next()? else {
            return Ok(false);
        };
        let result = self.process(&task).await;
        if let TaskResult::Error { error } = &result {
            tracing::warn!("Task {} failed: {error}", task.original_name);
        }
        self.queue.complete(&task, result)?;
        Ok(true)
    }

    /// Main loop. Shutdown is checked between tasks, so a task in flight
    /// always finishes. Queue IO errors end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "Worker {} polling every {:?} (lease {:?})",
            self.queue.machine(),
            self.poll_interval,
            self.lease
        );

        self.recover()?;
        let recovery_interval = (self.lease / 4).max(self.poll_interval);
        let mut last_recovery = Instant::now();
        let mut processed = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.run_once().await? {
                processed += 1;
                continue;
            }

            if !self.lease.is_zero() && last_recovery.elapsed() >= recovery_interval {
                self.recover()?;
                last_recovery = Instant::now();
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    // Sender dropped: nobody can ask us to stop anymore, so stop now
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Worker {} stopped after {processed} tasks", self.queue.machine());
        Ok(())
    }

    fn recover(&self) -> Result<()> {
        let requeued = self.queue.recover_stale(self.lease)?;
        if requeued > 0 {
            tracing::info!("Requeued {requeued} stale tasks");
        }
        Ok(())
    }
}
