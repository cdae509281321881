use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub events_received: u64,
    pub messages_ingested: u64,
    pub duplicates_skipped: u64,
    pub events_filtered: u64,
    pub events_malformed: u64,
    pub signature_failures: u64,
    pub store_failures: u64,
    pub replies_sent: u64,
    pub replies_failed: u64,
}

#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    events_received: AtomicU64,
    messages_ingested: AtomicU64,
    duplicates_skipped: AtomicU64,
    events_filtered: AtomicU64,
    events_malformed: AtomicU64,
    signature_failures: AtomicU64,
    store_failures: AtomicU64,
    replies_sent: AtomicU64,
    replies_failed: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            messages_ingested: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            replies_failed: AtomicU64::new(0),
        })
    }

    pub fn add_events_received(&self, count: u64) {
        self.events_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_ingested(&self) {
        self.messages_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signature_failures(&self) {
        self.signature_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_failures(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_failed(&self) {
        self.replies_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            messages_ingested: self.messages_ingested.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            replies_failed: self.replies_failed.load(Ordering::Relaxed),
        }
    }
}
