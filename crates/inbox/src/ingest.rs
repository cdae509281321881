use crate::dedupe::DedupGate;
use crate::priority::derive_priority;
use crate::sentiment::SentimentClassifier;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use unibox_core::error::StoreError;
use unibox_core::metrics::MetricsStore;
use unibox_core::platform::ParsedEvent;
use unibox_core::store::{InsertOutcome, MessageStore};
use unibox_core::types::{InboxMessage, NewMessage, PlatformType};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(Uuid),
    Duplicate,
    Skipped(&'static str),
    Malformed,
}

/// Per-batch tally returned to the webhook handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted(_) => self.inserted += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Skipped(_) => self.skipped += 1,
            IngestOutcome::Malformed => self.malformed += 1,
        }
    }
}

/// Normalized event -> dedupe -> classify -> store. Shared by the webhook
/// path and backfill so both are idempotent against each other.
pub struct Ingestor {
    store: Arc<dyn MessageStore>,
    gate: DedupGate,
    classifier: Arc<SentimentClassifier>,
    metrics: Arc<MetricsStore>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        gate: DedupGate,
        classifier: Arc<SentimentClassifier>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            store,
            gate,
            classifier,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub async fn ingest_message(&self, new: NewMessage) -> Result<IngestOutcome, StoreError> {
        let platform = new.platform_type;
        let platform_id = new.platform_id.clone();

        let checked = self.gate.should_insert(platform, &platform_id).await;
        if !checked.map_err(|e| self.store_failure(e))? {
            debug!(platform = %platform, platform_id = %platform_id, "duplicate event");
            self.metrics.inc_duplicates();
            return Ok(IngestOutcome::Duplicate);
        }

        let sentiment = self.classifier.classify(&new.content).await;
        let priority = derive_priority(&new, sentiment);
        let message = InboxMessage::from_new(new, priority, sentiment);

        let inserted = self.store.insert(message).await;
        match inserted.map_err(|e| self.store_failure(e))? {
            InsertOutcome::Inserted(message) => {
                self.gate.remember(platform, &platform_id).await;
                self.metrics.inc_ingested();
                info!(
                    platform = %platform,
                    platform_id = %platform_id,
                    account_id = %message.account_id,
                    id = %message.id,
                    message_type = %message.message_type,
                    "message ingested"
                );
                Ok(IngestOutcome::Inserted(message.id))
            }
            InsertOutcome::Duplicate => {
                // Lost a race with a concurrent delivery of the same event.
                self.gate.remember(platform, &platform_id).await;
                self.metrics.inc_duplicates();
                Ok(IngestOutcome::Duplicate)
            }
        }
    }

    fn store_failure(&self, err: StoreError) -> StoreError {
        self.metrics.inc_store_failures();
        err
    }

    pub async fn ingest_event(
        &self,
        platform: PlatformType,
        event_index: usize,
        event: ParsedEvent,
    ) -> Result<IngestOutcome, StoreError> {
        match event {
            ParsedEvent::Message(message) => self.ingest_message(message).await,
            ParsedEvent::Skipped { reason } => {
                debug!(platform = %platform, event_index, reason, "event skipped");
                self.metrics.inc_filtered();
                Ok(IngestOutcome::Skipped(reason))
            }
            ParsedEvent::Malformed(err) => {
                warn!(
                    platform = %platform,
                    event_index,
                    reason = %err.reason,
                    raw = %err.raw,
                    "malformed event skipped"
                );
                self.metrics.inc_malformed();
                Ok(IngestOutcome::Malformed)
            }
        }
    }

    /// Ingest every event of one webhook delivery. A failing event never
    /// stops the rest; if any hit a store failure the first one is returned
    /// after the batch so the caller can ask for redelivery.
    pub async fn ingest_batch(
        &self,
        platform: PlatformType,
        events: Vec<ParsedEvent>,
    ) -> Result<BatchReport, StoreError> {
        let mut report = BatchReport {
            received: events.len(),
            ..BatchReport::default()
        };
        self.metrics.add_events_received(events.len() as u64);
        let mut first_failure = None;

        for (event_index, event) in events.into_iter().enumerate() {
            match self.ingest_event(platform, event_index, event).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    error!(platform = %platform, event_index, error = %err, "failed to store event");
                    report.failed += 1;
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use unibox_core::config::SentimentConfig;
    use unibox_core::error::NormalizeError;
    use unibox_core::types::{MessageType, Priority, Sender, Sentiment};
    use unibox_persistence::MemoryMessageStore;

    pub(crate) fn ingestor(store: Arc<dyn MessageStore>) -> Ingestor {
        Ingestor::new(
            store.clone(),
            DedupGate::new(store, 600, 1024),
            Arc::new(SentimentClassifier::keywords_only(&SentimentConfig::default())),
            MetricsStore::new(),
        )
    }

    fn comment(id: &str, text: &str) -> NewMessage {
        NewMessage::new(PlatformType::Facebook, id, "fb-main", MessageType::Comment, Sender::new("u1"))
            .with_content(text)
    }

    #[tokio::test]
    async fn redelivery_yields_one_message() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let ingestor = ingestor(store.clone());

        for _ in 0..3 {
            ingestor.ingest_message(comment("c1", "Nice!")).await.unwrap();
        }
        let snapshot = ingestor.metrics.snapshot();
        assert_eq!(snapshot.messages_ingested, 1);
        assert_eq!(snapshot.duplicates_skipped, 2);
        assert!(store.get_by_platform_id(PlatformType::Facebook, "c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sentiment_and_priority_are_derived() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let ingestor = ingestor(store.clone());
        let IngestOutcome::Inserted(id) = ingestor
            .ingest_message(comment("c2", "worst service, totally broken"))
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.sentiment, Sentiment::Negative);
        assert_eq!(stored.priority, Priority::High);
    }

    #[tokio::test]
    async fn batch_isolates_bad_events() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let ingestor = ingestor(store);
        let events = vec![
            ParsedEvent::Message(comment("a", "one")),
            ParsedEvent::Malformed(NormalizeError::new("missing comment_id", "{}")),
            ParsedEvent::Message(comment("b", "two")),
            ParsedEvent::skipped("filtered"),
            ParsedEvent::Message(comment("a", "one")),
        ];
        let report = ingestor.ingest_batch(PlatformType::Facebook, events).await.unwrap();
        assert_eq!(
            report,
            BatchReport {
                received: 5,
                inserted: 2,
                duplicates: 1,
                skipped: 1,
                malformed: 1,
                failed: 0,
            }
        );
    }
}
