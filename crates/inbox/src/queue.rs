use crate::ingest::Ingestor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};
use unibox_core::config::IngestConfig;
use unibox_core::platform::ParsedEvent;
use unibox_core::types::PlatformType;

/// One acknowledged webhook delivery waiting to be ingested.
#[derive(Debug)]
pub struct IngestJob {
    pub platform: PlatformType,
    pub events: Vec<ParsedEvent>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("ingest queue is full")]
    Full,
    #[error("ingest queue is shut down")]
    Closed,
}

/// Backoff for store failures on already acknowledged events.
#[derive(Debug, Clone, Copy)]
struct StoreRetry {
    attempts: u32,
    base_delay: Duration,
}

impl StoreRetry {
    /// The provider has been told 200, so a store failure is retried here
    /// until the attempts run out.
    async fn ingest(
        &self,
        ingestor: &Ingestor,
        worker: usize,
        platform: PlatformType,
        event_index: usize,
        event: ParsedEvent,
    ) {
        let mut delay = self.base_delay;
        for attempt in 1..=self.attempts {
            let err = match ingestor.ingest_event(platform, event_index, event.clone()).await {
                Ok(_) => return,
                Err(err) => err,
            };
            if attempt == self.attempts {
                error!(worker, platform = %platform, event_index, attempts = self.attempts, error = %err, "queued event dropped after store failures");
                return;
            }
            warn!(worker, platform = %platform, event_index, attempt, error = %err, "store failure, retrying queued event");
            sleep(delay).await;
            delay *= 2;
        }
    }
}

/// Bounded job queue drained by a fixed pool of workers.
pub struct IngestQueue {
    tx: Mutex<Option<mpsc::Sender<IngestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueue_timeout: Duration,
}

impl IngestQueue {
    pub fn start(ingestor: Arc<Ingestor>, config: &IngestConfig) -> Self {
        let (tx, rx) = mpsc::channel::<IngestJob>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let retry = StoreRetry {
            attempts: config.store_retry_attempts.max(1),
            base_delay: Duration::from_millis(config.store_retry_base_ms),
        };

        let handles = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let ingestor = ingestor.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };
                        ingestor.metrics().add_events_received(job.events.len() as u64);
                        for (event_index, event) in job.events.into_iter().enumerate() {
                            retry.ingest(&ingestor, worker, job.platform, event_index, event).await;
                        }
                    }
                    info!(worker, "ingest worker stopped");
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
        }
    }

    /// Enqueue a delivery, waiting up to the enqueue timeout for room.
    pub async fn submit(&self, job: IngestJob) -> Result<(), QueueError> {
        let tx = self.tx.lock().await.clone().ok_or(QueueError::Closed)?;
        match tx.send_timeout(job, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(job)) => {
                warn!(platform = %job.platform, events = job.events.len(), "ingest queue full");
                Err(QueueError::Full)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Stop accepting jobs and wait for workers to drain what is queued.
    pub async fn shutdown(&self) {
        self.tx.lock().await.take();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "ingest worker panicked");
            }
        }
    }
}
