//! Job queue dispatcher: the retry/backoff state machine.
//!
//! A dispatcher owns an in-memory FIFO channel, a bounded-concurrency
//! worker, and the retry policy. Enqueueing is fire-and-forget: nothing
//! from this module surfaces to the caller of `enqueue`, because a
//! degraded mail pipeline must never fail the user-facing action that
//! triggered it.
//!
//! The queue is process-lifetime-only. A crash loses pending and
//! in-flight jobs; the history ledger is the durable trail.

use crate::error::DeliveryError;
use crate::history::HistoryLedger;
use crate::job::{EnqueueRequest, Job};
use crate::models::{DeliveryStatus, HistoryUpdate, QueueStats};
use crate::preferences::PreferenceGate;
use crate::provider::DeliveryProvider;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry and concurrency policy for a dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retries after the first failed attempt before a job is dropped.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay on each further retry.
    pub backoff_factor: u32,
    /// Maximum jobs in flight at once. Deliveries are serialized by
    /// default so the external provider is never hammered.
    pub concurrency: usize,
    /// Upper bound on a single provider call. A hung call is converted
    /// into a transient failure instead of pinning a concurrency slot.
    pub send_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
            concurrency: 1,
            send_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `initial_delay * backoff_factor^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_factor
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

/// Hook invoked when a job fails terminally.
///
/// Implementations can page operators or persist the job for replay; the
/// history row already records the terminal state, so without a sink the
/// dispatcher only logs.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn job_exhausted(&self, job: &Job, reason: &str);
}

struct Pipeline {
    provider: Arc<dyn DeliveryProvider>,
    gate: PreferenceGate,
    ledger: HistoryLedger,
    config: DispatcherConfig,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// The notification job queue.
///
/// Owns its queue, counters and policy; construct one at process start
/// and hand out references. Multiple independent instances are fine,
/// which is what keeps the pipeline testable in isolation.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
    shutdown: watch::Sender<bool>,
    pipeline: Arc<Pipeline>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker loop.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        provider: Arc<dyn DeliveryProvider>,
        gate: PreferenceGate,
        ledger: HistoryLedger,
        config: DispatcherConfig,
    ) -> Self {
        Self::with_dead_letter_sink(provider, gate, ledger, config, None)
    }

    /// Create a dispatcher with a terminal-failure sink.
    pub fn with_dead_letter_sink(
        provider: Arc<dyn DeliveryProvider>,
        gate: PreferenceGate,
        ledger: HistoryLedger,
        config: DispatcherConfig,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Arc::new(Pipeline {
            provider,
            gate,
            ledger,
            config,
            dead_letter,
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        });

        let worker = tokio::spawn(run_worker(
            Arc::clone(&pipeline),
            rx,
            tx.clone(),
            shutdown_rx,
        ));

        Self {
            tx,
            shutdown: shutdown_tx,
            pipeline,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a notification for delivery and return immediately.
    ///
    /// Never fails from the caller's perspective; all failure handling is
    /// internal and asynchronous. The returned id keys the job's history
    /// record.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Uuid {
        let job = Job::from_request(request);
        let job_id = job.id;

        self.pipeline.ledger.record_queued(&job).await;

        info!(
            job_id = %job_id,
            email_type = %job.notification_type,
            target_user_id = ?job.target_user_id,
            context = ?job.context,
            "Notification enqueued"
        );

        self.pipeline.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.pipeline.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(job_id = %job_id, "Dispatcher is shut down; dropping job");
        }

        job_id
    }

    /// Snapshot of queue depth and in-flight work.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.pipeline.queued.load(Ordering::SeqCst),
            in_flight: self.pipeline.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Stop pulling queued jobs and wait for in-flight deliveries to
    /// finish. Jobs still queued, and retries that come due afterwards,
    /// are dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "Dispatcher worker task failed");
            }
        }
    }
}

async fn run_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    tx: mpsc::UnboundedSender<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    let concurrency = pipeline.config.concurrency;
    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        // Hold a permit before pulling the next job so the queue drains
        // no faster than the concurrency limit allows.
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        tokio::select! {
            changed = shutdown.changed() => {
                drop(permit);
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe_job = rx.recv() => {
                let Some(job) = maybe_job else {
                    drop(permit);
                    break;
                };
                pipeline.queued.fetch_sub(1, Ordering::SeqCst);
                pipeline.in_flight.fetch_add(1, Ordering::SeqCst);

                let pipeline = Arc::clone(&pipeline);
                let tx = tx.clone();
                tokio::spawn(async move {
                    run_job(Arc::clone(&pipeline), job, tx).await;
                    pipeline.in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });
            }
        }
    }

    // Wait for in-flight jobs before the worker exits.
    let _ = semaphore.acquire_many(concurrency as u32).await;
    debug!("Dispatcher worker stopped");
}

async fn run_job(pipeline: Arc<Pipeline>, mut job: Job, tx: mpsc::UnboundedSender<Job>) {
    let wait_ms = (Utc::now() - job.enqueued_at).num_milliseconds();
    debug!(
        job_id = %job.id,
        email_type = %job.notification_type,
        wait_ms,
        "Processing notification job"
    );

    let category = job.notification_type.category();
    let decision = pipeline
        .gate
        .can_deliver(job.target_user_id, category)
        .await;
    if !decision.allowed {
        info!(
            job_id = %job.id,
            email_type = %job.notification_type,
            category = %category,
            target_user_id = ?job.target_user_id,
            reason = %decision.reason,
            "Notification suppressed by preferences"
        );
        pipeline
            .ledger
            .apply(
                job.id,
                HistoryUpdate::status(DeliveryStatus::Skipped)
                    .with_failure_reason(decision.reason)
                    .with_retry_count(job.attempt),
            )
            .await;
        return;
    }

    let started = std::time::Instant::now();
    let outcome = match tokio::time::timeout(
        pipeline.config.send_timeout,
        pipeline.provider.send(&job),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout(pipeline.config.send_timeout)),
    };
    let send_duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            info!(
                job_id = %job.id,
                email_type = %job.notification_type,
                message_id = %result.message_id,
                attempt = job.attempt + 1,
                wait_ms,
                send_duration_ms,
                "Notification delivered"
            );
            pipeline
                .ledger
                .apply(
                    job.id,
                    HistoryUpdate::status(DeliveryStatus::Sent)
                        .with_sent_at(Utc::now())
                        .clear_failure_reason()
                        .with_retry_count(job.attempt),
                )
                .await;
        }
        Err(err) => {
            job.attempt += 1;
            handle_failure(pipeline, job, err, send_duration_ms, tx).await;
        }
    }
}

async fn handle_failure(
    pipeline: Arc<Pipeline>,
    job: Job,
    err: DeliveryError,
    send_duration_ms: u64,
    tx: mpsc::UnboundedSender<Job>,
) {
    if err.is_retryable() && job.attempt <= pipeline.config.max_retries {
        let delay = pipeline.config.delay_for_attempt(job.attempt);
        warn!(
            job_id = %job.id,
            email_type = %job.notification_type,
            error = %err,
            attempt = job.attempt,
            retry_in_ms = delay.as_millis() as u64,
            send_duration_ms,
            "Delivery failed; retry scheduled"
        );
        pipeline
            .ledger
            .apply(
                job.id,
                HistoryUpdate::status(DeliveryStatus::Failed)
                    .with_failure_reason(err.to_string())
                    .with_retry_count(job.attempt),
            )
            .await;

        // Retries re-enter at the tail of the queue after the delay, so
        // they do not preserve ordering against later enqueues.
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut job = job;
            job.enqueued_at = Utc::now();
            pipeline.queued.fetch_add(1, Ordering::SeqCst);
            if tx.send(job).is_err() {
                pipeline.queued.fetch_sub(1, Ordering::SeqCst);
                debug!("Dispatcher shut down before a scheduled retry could run");
            }
        });
        return;
    }

    error!(
        job_id = %job.id,
        email_type = %job.notification_type,
        error = %err,
        attempt = job.attempt,
        retryable = err.is_retryable(),
        send_duration_ms,
        "Delivery failed terminally; dropping job"
    );

    // Retries performed, not attempts failed; a permanent rejection on
    // the first attempt records zero.
    let retries_performed = job
        .attempt
        .saturating_sub(1)
        .min(pipeline.config.max_retries);
    pipeline
        .ledger
        .apply(
            job.id,
            HistoryUpdate::status(DeliveryStatus::Failed)
                .with_failure_reason(err.to_string())
                .with_retry_count(retries_performed),
        )
        .await;

    if let Some(sink) = &pipeline.dead_letter {
        sink.job_exhausted(&job, &err.to_string()).await;
    }
}
