//! Durable SMS job queue and worker pool (§4.5/C5).
//!
//! No relational database is in the dependency graph here, so
//! durability is provided by a persistence shim over `KeyedStore`
//! (the in-flight job list lives under a single `queue:sms` key and
//! is replayed into the in-process `tokio::mpsc` channel on worker
//! startup) rather than a database-backed queue table.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tracing::{error, info, warn};

use otp_store::{KeyedStore, KeyedStoreExt};

use super::sms_provider::DeliveryStatus;
use super::sms_router::SmsRouter;

const QUEUE_STORE_KEY: &str = "queue:sms";
const QUEUE_STORE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const MAX_ATTEMPTS: u32 = 3;
const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEAD_LETTER_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsJob {
    pub identity: String,
    pub to: String,
    pub message: String,
    pub delivery_callback_url: Option<String>,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: SmsJob,
    pub last_error: Option<String>,
}

/// Durable FIFO: jobs are persisted to `KeyedStore` under
/// [`QUEUE_STORE_KEY`] on every push/pop so a process restart can
/// rehydrate the channel (`rehydrate`), and fed to workers through a
/// `tokio::mpsc` channel for in-process delivery.
pub struct JobQueue {
    store: Arc<dyn KeyedStore>,
    sender: mpsc::UnboundedSender<SmsJob>,
    receiver: Mutex<mpsc::UnboundedReceiver<SmsJob>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    shutdown: Notify,
}

impl JobQueue {
    pub fn new(store: Arc<dyn KeyedStore>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self { store, sender, receiver: Mutex::new(receiver), dead_letters: Mutex::new(VecDeque::new()), shutdown: Notify::new() })
    }

    async fn persist_snapshot(&self, jobs: &[SmsJob]) {
        if let Err(e) = self.store.set(QUEUE_STORE_KEY, &jobs.to_vec(), QUEUE_STORE_TTL).await {
            warn!(error = %e, "failed to persist sms queue snapshot");
        }
    }

    /// Enqueues a job and appends it to the durable snapshot.
    pub async fn push(&self, job: SmsJob) {
        let mut snapshot: Vec<SmsJob> = self.store.get(QUEUE_STORE_KEY).await.ok().flatten().unwrap_or_default();
        snapshot.push(job.clone());
        self.persist_snapshot(&snapshot).await;

        if self.sender.send(job).is_err() {
            error!("sms job queue channel closed, job dropped from in-process delivery");
        }
    }

    /// Replays any jobs a previous process instance had persisted but
    /// not yet drained, re-feeding them into the channel on startup.
    pub async fn rehydrate(&self) {
        let snapshot: Vec<SmsJob> = self.store.get(QUEUE_STORE_KEY).await.ok().flatten().unwrap_or_default();
        for job in snapshot {
            if self.sender.send(job).is_err() {
                break;
            }
        }
    }

    async fn remove_from_snapshot(&self, job: &SmsJob) {
        let mut snapshot: Vec<SmsJob> = self.store.get(QUEUE_STORE_KEY).await.ok().flatten().unwrap_or_default();
        if let Some(pos) = snapshot.iter().position(|j| j.identity == job.identity && j.to == job.to && j.message == job.message) {
            snapshot.remove(pos);
            self.persist_snapshot(&snapshot).await;
        }
    }

    async fn record_dead_letter(&self, job: SmsJob, last_error: Option<String>) {
        let mut dead_letters = self.dead_letters.lock().await;
        if dead_letters.len() == DEAD_LETTER_CAPACITY {
            dead_letters.pop_front();
        }
        dead_letters.push_back(DeadLetter { job, last_error });
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Signals running workers to stop pulling new jobs after
    /// draining whatever they currently hold (§4.5 Cancellation).
    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn backoff_delay(attempt: u32) -> Duration {
        Duration::from_secs(2u64.pow(attempt.saturating_sub(1)) * 2)
    }
}

/// Pulls jobs from a [`JobQueue`] serially, dispatching through
/// [`SmsRouter`]. Multiple workers may run over the same queue for
/// horizontal scaling (§4.5).
pub struct SmsWorker {
    queue: Arc<JobQueue>,
    router: Arc<SmsRouter>,
}

impl SmsWorker {
    pub fn new(queue: Arc<JobQueue>, router: Arc<SmsRouter>) -> Self {
        Self { queue, router }
    }

    /// Runs until the queue's shutdown signal fires and the channel
    /// drains; intended to be spawned as a long-lived task.
    pub async fn run(&self) {
        loop {
            let job = {
                let mut receiver = self.queue.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.queue.shutdown.notified() => None,
                    job = receiver.recv() => job,
                }
            };

            let Some(job) = job else {
                info!("sms worker stopping: shutdown requested or channel closed");
                break;
            };

            self.process(job).await;
        }
    }

    async fn process(&self, mut job: SmsJob) {
        job.attempt += 1;

        let send_future = if job.attempt >= 3 {
            self.router.send_with_rotation(&job.to, &job.identity, &job.message, job.delivery_callback_url.as_deref(), None)
        } else {
            self.router.send(&job.to, &job.identity, &job.message, job.delivery_callback_url.as_deref())
        };

        let outcome = match timeout(PROVIDER_CALL_TIMEOUT, send_future).await {
            Ok(outcome) => outcome,
            Err(_) => super::sms_router::SendOutcome { success: false, provider: String::new(), message_id: String::new(), error: Some("provider call timed out".to_string()) },
        };

        if outcome.success {
            self.queue.remove_from_snapshot(&job).await;
            return;
        }

        if job.attempt >= MAX_ATTEMPTS {
            warn!(identity = %job.identity, attempts = job.attempt, error = ?outcome.error, "sms job exhausted retries, moving to dead-letter log");
            self.queue.remove_from_snapshot(&job).await;
            self.queue.record_dead_letter(job, outcome.error).await;
            return;
        }

        let delay = JobQueue::backoff_delay(job.attempt);
        warn!(identity = %job.identity, attempt = job.attempt, delay_secs = delay.as_secs(), "sms job failed, scheduling retry");

        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.sender.send(job);
        });
    }

    /// Used by `UpdateDelivery` webhook handlers to normalize a
    /// parsed receipt into router state without going through the
    /// job-retry path.
    pub async fn apply_receipt(&self, message_id: &str, status: DeliveryStatus, failure_reason: Option<String>) {
        self.router.update_delivery(message_id, status, failure_reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sms_provider::mock::MockProvider;
    use otp_store::InMemoryStore;
    use otp_telemetry::SystemClock;

    fn test_router(succeed: bool) -> Arc<SmsRouter> {
        let provider: Arc<dyn crate::services::sms_provider::SmsProvider> = Arc::new(MockProvider::new("only", 1, succeed));
        Arc::new(SmsRouter::new(vec![provider], Arc::new(InMemoryStore::new()), Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn successful_job_is_removed_from_snapshot_without_retry() {
        let store: Arc<dyn KeyedStore> = Arc::new(InMemoryStore::new());
        let queue = JobQueue::new(store.clone());
        let router = test_router(true);
        let worker = SmsWorker::new(queue.clone(), router);

        queue
            .push(SmsJob { identity: "+1".to_string(), to: "+1".to_string(), message: "hi".to_string(), delivery_callback_url: None, attempt: 0 })
            .await;

        let job = queue.receiver.lock().await.recv().await.unwrap();
        worker.process(job).await;

        let snapshot: Vec<SmsJob> = store.get(QUEUE_STORE_KEY).await.unwrap().unwrap_or_default();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn exhausted_job_lands_in_dead_letter_log() {
        let store: Arc<dyn KeyedStore> = Arc::new(InMemoryStore::new());
        let queue = JobQueue::new(store);
        let router = test_router(false);
        let worker = SmsWorker::new(queue.clone(), router);

        let job = SmsJob { identity: "+1".to_string(), to: "+1".to_string(), message: "hi".to_string(), delivery_callback_url: None, attempt: MAX_ATTEMPTS - 1 };
        worker.process(job).await;

        let dead_letters = queue.dead_letters().await;
        assert_eq!(dead_letters.len(), 1);
    }

    #[test]
    fn backoff_delay_doubles_each_attempt() {
        assert_eq!(JobQueue::backoff_delay(1), Duration::from_secs(2));
        assert_eq!(JobQueue::backoff_delay(2), Duration::from_secs(4));
        assert_eq!(JobQueue::backoff_delay(3), Duration::from_secs(8));
    }
}
