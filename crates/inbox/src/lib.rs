//! Ingestion pipeline and the inbox operations built on top of it.

pub mod controller;
pub mod dedupe;
pub mod ingest;
pub mod priority;
pub mod queue;
pub mod reply;
pub mod sentiment;
pub mod sync;

pub use controller::{BulkFailure, BulkUpdateResult, InboxController, MessageFilter, MessagePage};
pub use dedupe::DedupGate;
pub use ingest::{BatchReport, IngestOutcome, Ingestor};
pub use queue::{IngestJob, IngestQueue, QueueError};
pub use reply::{ClientMap, ReplyDispatcher, ReplyReceipt};
pub use sentiment::{KeywordClassifier, SentimentClassifier};
pub use sync::{AccountSync, SyncCoordinator, SyncReport, SyncStatus};

use std::sync::Arc;
use unibox_core::accounts::AccountRegistry;
use unibox_core::config::{AppConfig, IngestMode};
use unibox_core::metrics::MetricsStore;
use unibox_core::store::MessageStore;

/// Everything the gateway and CLI need, wired from configuration.
pub struct Inbox {
    pub ingestor: Arc<Ingestor>,
    pub controller: Arc<InboxController>,
    /// Present in queued ingest mode.
    pub queue: Option<Arc<IngestQueue>>,
}

impl Inbox {
    /// Must run inside a Tokio runtime when the ingest mode is queued.
    pub fn start(
        config: &AppConfig,
        store: Arc<dyn MessageStore>,
        accounts: Arc<AccountRegistry>,
        clients: ClientMap,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        let gate = DedupGate::new(
            store.clone(),
            config.ingest.dedupe_ttl_secs,
            config.ingest.dedupe_max_entries,
        );
        let classifier = Arc::new(SentimentClassifier::from_config(&config.sentiment));
        let ingestor = Arc::new(Ingestor::new(store.clone(), gate, classifier, metrics.clone()));

        let dispatcher = ReplyDispatcher::new(store.clone(), accounts.clone(), clients.clone(), metrics);
        let sync = SyncCoordinator::new(accounts, clients, ingestor.clone(), config.sync.clone());
        let controller = Arc::new(InboxController::new(store, dispatcher, sync));

        let queue = match config.ingest.mode {
            IngestMode::Queued => Some(Arc::new(IngestQueue::start(ingestor.clone(), &config.ingest))),
            IngestMode::Inline => None,
        };

        Self {
            ingestor,
            controller,
            queue,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown().await;
        }
    }
}
