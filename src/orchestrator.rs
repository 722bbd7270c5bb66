//! Task Orchestrator (spec.md §4.4) — the per-request state machine:
//! acquire the GPU lock, ask the Planner, execute the plan, release the
//! lock, stream, publish, clean up. Retries are an explicit `attempt`
//! counter driven by a `tokio::time::sleep` loop rather than recursion,
//! per spec.md §9's design note on the source's task-queue retry
//! primitive.
//!
//! Two distinct retry loops live here (spec.md §7): `ErrorKind::Capacity`
//! goes through `defer`, bumping `Task::attempt` against
//! `Config::max_retries`; `ErrorKind::Transient` gets a short, separate
//! local retry (`MAX_TRANSIENT_RETRIES`, its own backoff) before the task
//! is allowed to fail. They don't share a counter — a capacity-starved
//! task and a task riding out a Redis blip fail on unrelated budgets.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cs::lock;
use crate::error::DispatchError;
use crate::planner::{self, Plan};
use crate::relay::{self, RelayOutcome};
use crate::runtime::{ChatMessage, KeepAlive, ModelRuntimeClient};
use crate::telemetry::GpuProbe;
use crate::tracker::ResourceTracker;
use crate::cs::CoordinationStore;
use crate::config::Config;
use crate::task_store::{TaskStatus, TaskStore};

/// A request as it enters the Orchestrator (spec.md §3 Request entity).
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub model_name: String,
    pub query: String,
    pub channel_id: String,
    pub gpu_index: u32,
    pub attempt: u32,
}

/// Terminal result surfaced to the HTTP task-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { chunks: usize },
    Failed { reason: String },
}

/// Cap on the local retry loop for `ErrorKind::Transient` failures (CS
/// unreachable, MRC network error) — separate from `Config::max_retries`,
/// which governs the capacity/admission defer loop instead.
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Backoff before a transient retry: doubles each attempt, capped at 2s.
fn transient_backoff(attempt: u32) -> Duration {
    let millis = 250u64.saturating_mul(1 << attempt.saturating_sub(1).min(3));
    Duration::from_millis(millis.min(2_000))
}

pub struct Orchestrator<'a> {
    store: &'a dyn CoordinationStore,
    runtime: &'a dyn ModelRuntimeClient,
    probe: &'a dyn GpuProbe,
    config: &'a Config,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn CoordinationStore,
        runtime: &'a dyn ModelRuntimeClient,
        probe: &'a dyn GpuProbe,
        config: &'a Config,
    ) -> Self {
        Self { store, runtime, probe, config }
    }

    /// Drive `task` through SUBMITTED → … → a terminal `TaskOutcome`,
    /// looping on DEFERRED internally (spec.md §4.4 step 6) rather than
    /// returning control to the caller between admission retries.
    /// `task_store` is updated with interim and terminal status so
    /// `GET /api/v1/task/{task_id}` observes progress without polling CS.
    pub async fn run_task(&self, mut task: Task, cancel: &CancellationToken, task_store: &TaskStore) -> TaskOutcome {
        let tracker = ResourceTracker::new(self.store);
        let mut transient_attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                let outcome = self.fail(&tracker, &task, "cancelled").await;
                task_store.complete(&task.task_id, &outcome);
                return outcome;
            }

            // SUBMITTED -> PLANNING: reserve before acquiring the lock, so
            // concurrent planners treat this model as protected while we wait.
            if let Err(e) = tracker.mark_reserved(&task.model_name, &task.task_id).await {
                let outcome = self.fail(&tracker, &task, &e.user_message()).await;
                task_store.complete(&task.task_id, &outcome);
                return outcome;
            }
            task_store.set_status(&task.task_id, TaskStatus::ManagingModel);

            match self.plan_and_execute(&task).await {
                Ok(PlanOutcome::Ready) => {
                    task_store.set_status(&task.task_id, TaskStatus::Streaming);
                    let outcome = self.stream_and_finish(&tracker, &task, cancel).await;
                    task_store.complete(&task.task_id, &outcome);
                    return outcome;
                }
                Ok(PlanOutcome::Deferred) => match self.defer(&tracker, &mut task, task_store).await {
                    Some(outcome) => return outcome,
                    None => continue,
                },
                Err(e) if e.kind() == crate::error::ErrorKind::Capacity => {
                    match self.defer(&tracker, &mut task, task_store).await {
                        Some(outcome) => return outcome,
                        None => continue,
                    }
                }
                Err(e) if e.kind() == crate::error::ErrorKind::Transient
                    && transient_attempt < MAX_TRANSIENT_RETRIES =>
                {
                    transient_attempt += 1;
                    tracing::warn!(
                        task_id = %task.task_id,
                        attempt = transient_attempt,
                        "transient error, retrying locally: {e}"
                    );
                    tokio::time::sleep(transient_backoff(transient_attempt)).await;
                    continue;
                }
                Err(e) => {
                    let outcome = self.fail(&tracker, &task, &e.user_message()).await;
                    task_store.complete(&task.task_id, &outcome);
                    return outcome;
                }
            }
        }
    }

    /// PLANNING -> EXECUTING_PLAN -> PINNED. Acquires the GPU lock,
    /// reads VRAM/residents/protected *after* acquisition (spec.md §9
    /// pins this ordering), computes and executes the plan, releases
    /// the lock before returning.
    async fn plan_and_execute(&self, task: &Task) -> Result<PlanOutcome, DispatchError> {
        let guard = match lock::acquire(
            self.store,
            task.gpu_index,
            self.config.gpu_lock_wait,
            self.config.gpu_lock_ttl,
        )
        .await
        {
            Ok(guard) => guard,
            Err(_) => return Ok(PlanOutcome::Deferred),
        };

        let result = self.execute_under_lock(task).await;
        let _ = guard.release(self.store).await;
        result
    }

    async fn execute_under_lock(&self, task: &Task) -> Result<PlanOutcome, DispatchError> {
        let tracker = ResourceTracker::new(self.store);

        let pulled = self.runtime.list().await?;
        let target = pulled
            .iter()
            .find(|m| m.name == task.model_name)
            .ok_or_else(|| DispatchError::UnknownModel(task.model_name.clone()))?;

        let residents = self.runtime.ps().await?;
        let vram = self.probe.vram_usage(task.gpu_index).await?;
        let protected = tracker.protected_models().await?;

        if target.size_bytes > vram.total {
            return Err(DispatchError::ModelExceedsVram {
                model: task.model_name.clone(),
                size: target.size_bytes,
                total: vram.total,
            });
        }

        let plan = planner::plan(
            &task.model_name,
            target.size_bytes,
            &residents,
            vram.total,
            vram.free,
            &protected,
        );

        match plan {
            Plan::AlreadyLoaded => Ok(PlanOutcome::Ready),
            Plan::LoadDirect => {
                self.runtime.generate(&task.model_name, KeepAlive::Pin).await?;
                Ok(PlanOutcome::Ready)
            }
            Plan::LoadAfterOffload(offload_set) => {
                let mut freed = 0u64;
                let resident_by_name: std::collections::HashMap<&str, u64> = residents
                    .iter()
                    .map(|r| (r.name.as_str(), r.size_vram_bytes))
                    .collect();

                for model in &offload_set {
                    self.runtime.generate(model, KeepAlive::Evict).await?;
                    freed += resident_by_name.get(model.as_str()).copied().unwrap_or(0);
                }

                if freed + vram.free >= target.size_bytes {
                    self.runtime.generate(&task.model_name, KeepAlive::Pin).await?;
                    Ok(PlanOutcome::Ready)
                } else {
                    Ok(PlanOutcome::Deferred)
                }
            }
            Plan::InsufficientVram => Ok(PlanOutcome::Deferred),
        }
    }

    /// PINNED -> STREAMING -> DONE. Activates, opens the chat stream,
    /// relays it, then clears all reservation/activation state for this
    /// task regardless of outcome (spec.md §4.4 step 5).
    async fn stream_and_finish(
        &self,
        tracker: &ResourceTracker<'_>,
        task: &Task,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        if let Err(e) = tracker.mark_active(&task.model_name, &task.task_id).await {
            return self.fail(tracker, task, &e.user_message()).await;
        }
        let _ = tracker.mark_unreserved(&task.model_name, &task.task_id).await;

        let messages = vec![ChatMessage { role: "user", content: task.query.clone() }];
        let stream = match self.runtime.chat(&task.model_name, messages).await {
            Ok(s) => s,
            Err(e) => return self.fail(tracker, task, &e.user_message()).await,
        };

        let now = tokio::time::Instant::now();
        let soft_deadline = now + self.config.soft_timeout;
        let hard_deadline = now + self.config.hard_timeout;
        let outcome =
            relay::relay_chat_stream(self.store, &task.channel_id, stream, soft_deadline, hard_deadline, cancel)
                .await;

        let _ = tracker.mark_inactive(&task.model_name, &task.task_id).await;
        let _ = tracker.mark_unreserved(&task.model_name, &task.task_id).await;

        match outcome {
            RelayOutcome::Completed { chunks } => TaskOutcome::Success { chunks },
            RelayOutcome::Aborted { reason } => TaskOutcome::Failed { reason },
        }
    }

    /// DEFERRED: keep the reservation, bump `attempt`, sleep the retry
    /// countdown, and loop — unless `max_retries` has been exceeded, in
    /// which case fail with `max_retries_exceeded`. Returns `Some` when
    /// the task has reached a terminal outcome, `None` to keep looping.
    async fn defer(
        &self,
        tracker: &ResourceTracker<'_>,
        task: &mut Task,
        task_store: &TaskStore,
    ) -> Option<TaskOutcome> {
        if task.attempt >= self.config.max_retries {
            let outcome = self
                .fail(tracker, task, &DispatchError::MaxRetriesExceeded { task_id: task.task_id.clone() }.user_message())
                .await;
            task_store.complete(&task.task_id, &outcome);
            return Some(outcome);
        }
        task.attempt += 1;
        task_store.set_status(&task.task_id, TaskStatus::Retry);
        tracing::warn!(task_id = %task.task_id, attempt = task.attempt, "deferring admission, retrying");
        tokio::time::sleep(self.config.retry_countdown).await;
        None
    }

    /// FAILED: publish `[ERROR: …][DONE]` best-effort and clear all
    /// tracker state for this task.
    async fn fail(&self, tracker: &ResourceTracker<'_>, task: &Task, reason: &str) -> TaskOutcome {
        tracing::error!(task_id = %task.task_id, model = %task.model_name, "task failed: {reason}");
        let _ = self.store.publish(&task.channel_id, &format!("[ERROR: {reason}]")).await;
        relay::publish_done(self.store, &task.channel_id).await;
        let _ = tracker.mark_inactive(&task.model_name, &task.task_id).await;
        let _ = tracker.mark_unreserved(&task.model_name, &task.task_id).await;
        TaskOutcome::Failed { reason: reason.to_string() }
    }
}

enum PlanOutcome {
    Ready,
    Deferred,
}
