//! Fixed-size worker pool pulling jobs from the queue.
//!
//! Each worker loops: claim, dispatch, settle. Settlement is where the error
//! taxonomy bites: retryable failures go back to the queue with jittered
//! backoff until the attempt cap, everything else dead-letters. A claimed
//! job is always settled on the same worker; workers check the shutdown
//! signal between jobs, never mid-job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::job::{QueuedJob, RetryPolicy};
use crate::processor::{JobReport, ProcessorContext, ProcessorError};

/// Claim/dispatch/settle loop shared by every worker task.
///
/// The pool holds one base [`ProcessorContext`] and rebinds it per claimed
/// job, so all workers share the same stores, providers, and budget guard.
#[derive(Debug)]
pub struct WorkerPool {
    context: ProcessorContext,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(context: ProcessorContext, retry: RetryPolicy, poll_interval: Duration) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(),
            retry,
            poll_interval,
        }
    }

    /// Spawns `workers` tasks that run until `shutdown` flips to `true` or
    /// its sender drops.
    pub fn spawn(
        self: &Arc<Self>,
        workers: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|slot| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(slot, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(slot, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.context.queue.claim().await {
                Ok(Some(queued)) => self.handle_one(queued).await,
                Ok(None) => {
                    if idle_wait(self.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(error) => {
                    warn!(slot, %error, "queue claim failed");
                    if idle_wait(self.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(slot, "worker stopped");
    }

    async fn handle_one(&self, queued: QueuedJob) {
        let ctx = self.context.for_job(&queued.id, queued.job.kind);
        debug!(job_id = %queued.id, kind = %queued.job.kind, attempt = queued.attempt, "job claimed");
        match self.dispatcher.dispatch(&queued.job, &ctx).await {
            Ok(report) => self.settle_success(&queued, &ctx, report).await,
            Err(error) => self.settle_failure(&queued, &ctx, &error).await,
        }
    }

    async fn settle_success(&self, queued: &QueuedJob, ctx: &ProcessorContext, report: JobReport) {
        for fault in &report.faults {
            warn!(
                job_id = %queued.id,
                document_id = %fault.document_id(),
                fault = %fault.message,
                "job succeeded with a fault"
            );
        }

        // Follow-ons first: if completing the row fails the job is
        // redelivered and its idempotent effects replay, but a lost
        // follow-on would never be retried.
        for follow in report.follow_on {
            let kind = follow.kind;
            match ctx.queue.enqueue(follow).await {
                Ok(follow_id) => {
                    debug!(job_id = %queued.id, follow_id = %follow_id, kind = %kind, "queued follow-on job");
                }
                Err(error) => {
                    error!(job_id = %queued.id, kind = %kind, %error, "failed to queue follow-on job");
                }
            }
        }

        if let Err(error) = ctx.queue.complete(&queued.id).await {
            error!(job_id = %queued.id, %error, "failed to mark job complete");
            return;
        }
        emit_quiet(ctx, format!("done: {}", report.summary));
        info!(job_id = %queued.id, kind = %queued.job.kind, summary = %report.summary, "job completed");
    }

    async fn settle_failure(
        &self,
        queued: &QueuedJob,
        ctx: &ProcessorContext,
        error: &ProcessorError,
    ) {
        let exhausted = queued.attempt + 1 >= self.retry.max_attempts;
        if error.is_retryable() && !exhausted {
            let delay = self.retry.jittered_delay_for(queued.attempt);
            warn!(
                job_id = %queued.id,
                kind = %queued.job.kind,
                attempt = queued.attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "job failed; retrying"
            );
            if let Err(store_error) = ctx.queue.retry(&queued.id, delay, &error.to_string()).await {
                error!(job_id = %queued.id, %store_error, "failed to reschedule job");
            }
            emit_quiet(ctx, format!("attempt {} failed: {error}", queued.attempt));
        } else {
            warn!(
                job_id = %queued.id,
                kind = %queued.job.kind,
                attempt = queued.attempt,
                retryable = error.is_retryable(),
                %error,
                "job dead-lettered"
            );
            if let Err(store_error) = ctx.queue.dead_letter(&queued.id, &error.to_string()).await {
                error!(job_id = %queued.id, %store_error, "failed to dead-letter job");
            }
            emit_quiet(
                ctx,
                format!("dead-lettered on attempt {}: {error}", queued.attempt),
            );
        }
    }
}

/// Sleeps one poll interval. Returns `true` when shutdown fired (or its
/// sender vanished) during the wait.
async fn idle_wait(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(interval) => false,
    }
}

/// Worker-scope events are best-effort; a full or closed bus must not fail
/// settlement.
fn emit_quiet(ctx: &ProcessorContext, message: String) {
    if let Err(error) = ctx.emit("worker", message) {
        warn!(job_id = %ctx.job_id, %error, "event emission failed");
    }
}
