//! Worker runtime: a pool of cooperative workers draining the priority
//! queues with a 6:3:1 proportional split, retrying failed jobs on the
//! per-type backoff schedule, and archiving terminal failures.

use crate::domain::jobs::{
    JobEnvelope, QueueTier, RetryPolicy, VideoProcessingPayload, TYPE_VIDEO_PROCESSING,
};
use crate::ports::queue::JobQueue;
use crate::ports::repository::VideoRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How long a dequeue blocks before the loop re-checks for shutdown.
const DEQUEUE_TIMEOUT_SECS: f64 = 1.0;
/// Cadence of the delayed-job promoter.
const PROMOTE_INTERVAL: Duration = Duration::from_secs(5);
/// Extra wait for workers after in-flight jobs are cancelled.
const CANCEL_DRAIN: Duration = Duration::from_secs(5);

/// Repeating dispatch schedule realizing the 6:3:1 tier weights. Workers
/// walk it round-robin from per-worker offsets, so under sustained load the
/// tiers share the pool proportionally instead of critical starving low.
const DISPATCH_SCHEDULE: [QueueTier; 10] = [
    QueueTier::Critical,
    QueueTier::Critical,
    QueueTier::Default,
    QueueTier::Critical,
    QueueTier::Critical,
    QueueTier::Default,
    QueueTier::Critical,
    QueueTier::Default,
    QueueTier::Critical,
    QueueTier::Low,
];

/// Failure reported by a job handler.
#[derive(Debug)]
pub struct JobError {
    message: String,
    permanent: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

/// One entry in the job-type dispatch table.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobEnvelope, cancel: CancellationToken) -> Result<(), JobError>;
}

pub struct WorkerRuntime {
    queue: Arc<dyn JobQueue>,
    repo: Arc<dyn VideoRepository>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    concurrency: usize,
    shutdown_grace: Duration,
    /// Cancelled only when the shutdown grace deadline passes
    job_cancel: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        repo: Arc<dyn VideoRepository>,
        handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
        concurrency: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            queue,
            repo,
            handlers,
            concurrency,
            shutdown_grace,
            job_cancel: CancellationToken::new(),
        }
    }

    /// Run the pool until `shutdown` fires, then drain: stop taking new
    /// jobs, wait out the grace period, cancel whatever is still running.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();

        let promoter = self.clone();
        let promoter_shutdown = shutdown.clone();
        tasks.spawn(async move {
            promoter.promote_loop(promoter_shutdown).await;
        });

        for worker_id in 0..self.concurrency {
            let runtime = self.clone();
            let worker_shutdown = shutdown.clone();
            tasks.spawn(async move {
                runtime.worker_loop(worker_id, worker_shutdown).await;
            });
        }
        tracing::info!(concurrency = self.concurrency, "worker runtime started");

        shutdown.cancelled().await;
        tracing::info!("shutdown signal received, waiting for in-flight jobs");

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!("shutdown grace elapsed, cancelling in-flight jobs");
            self.job_cancel.cancel();
            let _ = tokio::time::timeout(CANCEL_DRAIN, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            tasks.abort_all();
        }

        tracing::info!("worker runtime stopped");
    }

    async fn promote_loop(&self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(PROMOTE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => {}
            }
            match self.queue.promote_due().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(promoted = n, "promoted delayed jobs"),
                Err(e) => tracing::error!("failed to promote delayed jobs: {}", e),
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        tracing::info!(worker_id, "worker started");
        // Per-worker offset so the pool does not hit the schedule in phase.
        let mut slot = worker_id;

        while !shutdown.is_cancelled() {
            let tier = DISPATCH_SCHEDULE[slot % DISPATCH_SCHEDULE.len()];
            slot += 1;

            match self.queue.dequeue(tier, DEQUEUE_TIMEOUT_SECS).await {
                Ok(Some(job)) => self.execute(worker_id, job).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker_id, "error dequeuing job: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        tracing::info!(worker_id, "worker stopped");
    }

    async fn execute(&self, worker_id: usize, job: JobEnvelope) {
        let Some(handler) = self.handlers.get(job.task_type.as_str()) else {
            tracing::error!(
                task_type = %job.task_type,
                task_id = %job.id,
                "no handler registered for job type"
            );
            self.archive_job(&job, "no handler registered").await;
            return;
        };

        tracing::info!(
            worker_id,
            task_type = %job.task_type,
            task_id = %job.id,
            attempt = job.attempt,
            "processing job"
        );

        let policy = RetryPolicy::for_task_type(&job.task_type);
        let token = self.job_cancel.child_token();

        // Each job runs in its own task: a panicking handler surfaces as a
        // join error instead of taking the worker down, and an aborted task
        // drops its future, which kills any running subprocess.
        let handler = handler.clone();
        let handler_job = job.clone();
        let mut handle = tokio::spawn(async move { handler.handle(&handler_job, token).await });

        let outcome = tokio::select! {
            result = &mut handle => Some(result),
            _ = tokio::time::sleep(policy.timeout) => None,
        };

        match outcome {
            None => {
                handle.abort();
                let _ = handle.await;
                tracing::error!(
                    task_type = %job.task_type,
                    task_id = %job.id,
                    timeout_secs = policy.timeout.as_secs(),
                    "job timed out"
                );
                self.retry_or_archive(job, &policy).await;
            }
            Some(Ok(Ok(()))) => {
                tracing::info!(task_type = %job.task_type, task_id = %job.id, "job completed");
            }
            Some(Ok(Err(err))) if err.is_permanent() => {
                tracing::error!(
                    task_type = %job.task_type,
                    task_id = %job.id,
                    "job failed permanently: {}",
                    err
                );
                self.archive_job(&job, &err.to_string()).await;
            }
            Some(Ok(Err(err))) => {
                tracing::error!(
                    task_type = %job.task_type,
                    task_id = %job.id,
                    attempt = job.attempt,
                    "job failed: {}",
                    err
                );
                self.retry_or_archive(job, &policy).await;
            }
            Some(Err(join_err)) => {
                tracing::error!(
                    task_type = %job.task_type,
                    task_id = %job.id,
                    "job handler panicked: {}",
                    join_err
                );
                self.retry_or_archive(job, &policy).await;
            }
        }
    }

    async fn retry_or_archive(&self, mut job: JobEnvelope, policy: &RetryPolicy) {
        if job.attempt >= policy.max_retries {
            self.archive_job(&job, "max retries exceeded").await;
            return;
        }

        let delay = policy.backoff_for(job.attempt);
        job.attempt += 1;
        tracing::info!(
            task_id = %job.id,
            attempt = job.attempt,
            delay_secs = delay.as_secs(),
            "scheduling job retry"
        );
        if let Err(e) = self.queue.schedule_retry(job, delay).await {
            tracing::error!("failed to schedule retry: {}", e);
        }
    }

    async fn archive_job(&self, job: &JobEnvelope, reason: &str) {
        tracing::error!(
            task_type = %job.task_type,
            task_id = %job.id,
            reason,
            "archiving job"
        );
        if let Err(e) = self.queue.archive(job).await {
            tracing::error!(task_id = %job.id, "failed to archive job: {}", e);
        }

        // A processing job that will never run again leaves its video failed.
        if job.task_type == TYPE_VIDEO_PROCESSING {
            if let Ok(payload) =
                serde_json::from_value::<VideoProcessingPayload>(job.payload.clone())
            {
                if let Err(e) = self.repo.mark_failed(payload.video_id).await {
                    tracing::error!(
                        video_id = %payload.video_id,
                        "failed to mark video failed after archive: {}",
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::TYPE_THUMBNAIL_GENERATION;
    use crate::ports::queue::MockJobQueue;
    use crate::ports::repository::MockVideoRepository;
    use uuid::Uuid;

    #[test]
    fn test_dispatch_schedule_realizes_weights() {
        let critical = DISPATCH_SCHEDULE
            .iter()
            .filter(|t| **t == QueueTier::Critical)
            .count();
        let default = DISPATCH_SCHEDULE
            .iter()
            .filter(|t| **t == QueueTier::Default)
            .count();
        let low = DISPATCH_SCHEDULE
            .iter()
            .filter(|t| **t == QueueTier::Low)
            .count();
        assert_eq!((critical, default, low), (6, 3, 1));
    }

    fn runtime(queue: MockJobQueue, repo: MockVideoRepository) -> Arc<WorkerRuntime> {
        Arc::new(WorkerRuntime::new(
            Arc::new(queue),
            Arc::new(repo),
            HashMap::new(),
            1,
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_retry_then_archive_marks_video_failed() {
        let video_id = Uuid::new_v4();
        let job = JobEnvelope {
            id: "t-1".to_string(),
            task_type: TYPE_VIDEO_PROCESSING.to_string(),
            queue: QueueTier::Default,
            payload: serde_json::to_value(VideoProcessingPayload {
                video_id,
                qualities: vec!["360p".to_string()],
                priority: 0,
            })
            .unwrap(),
            attempt: 0,
        };
        let policy = RetryPolicy::for_task_type(TYPE_VIDEO_PROCESSING);

        // attempt 0 -> schedule retry with the first backoff entry
        let mut queue = MockJobQueue::new();
        queue
            .expect_schedule_retry()
            .withf(|job, delay| job.attempt == 1 && *delay == Duration::from_secs(60))
            .times(1)
            .returning(|_, _| Ok(()));
        let rt = runtime(queue, MockVideoRepository::new());
        rt.retry_or_archive(job.clone(), &policy).await;

        // attempt == max_retries -> archive + mark failed
        let mut exhausted = job;
        exhausted.attempt = policy.max_retries;
        let mut queue = MockJobQueue::new();
        queue.expect_archive().times(1).returning(|_| Ok(()));
        let mut repo = MockVideoRepository::new();
        repo.expect_mark_failed()
            .withf(move |id| *id == video_id)
            .times(1)
            .returning(|_| Ok(()));
        let rt = runtime(queue, repo);
        rt.retry_or_archive(exhausted, &policy).await;
    }

    #[tokio::test]
    async fn test_archive_non_processing_job_skips_video() {
        let job = JobEnvelope::new(
            TYPE_THUMBNAIL_GENERATION,
            QueueTier::Default,
            serde_json::json!({"video_id": Uuid::new_v4()}),
        );
        let mut queue = MockJobQueue::new();
        queue.expect_archive().times(1).returning(|_| Ok(()));
        // repo must not be touched for a thumbnail archive
        let repo = MockVideoRepository::new();
        let rt = runtime(queue, repo);
        rt.archive_job(&job, "max retries exceeded").await;
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_archived() {
        let job = JobEnvelope::new(
            "video:unknown",
            QueueTier::Default,
            serde_json::json!({}),
        );
        let mut queue = MockJobQueue::new();
        queue.expect_archive().times(1).returning(|_| Ok(()));
        let rt = runtime(queue, MockVideoRepository::new());
        rt.execute(0, job).await;
    }
}
