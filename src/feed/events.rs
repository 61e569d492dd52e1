//! Notification sink for discovered entries and metadata changes.
//!
//! Each session owns one [`FeedEvents`]. Dispatch never waits on receivers:
//! a receiver that falls more than `capacity` events behind observes
//! `RecvError::Lagged` and skips ahead.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::snapshot::MetadataChanges;
use super::types::FeedEntry;

/// Default per-channel buffer size.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A previously unseen entry.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub feed_url: Arc<str>,
    pub entry: Arc<FeedEntry>,
}

/// Metadata values that changed in one cycle.
#[derive(Debug, Clone)]
pub struct MetadataEvent {
    pub feed_url: Arc<str>,
    pub changes: Arc<MetadataChanges>,
}

/// Either kind of notification, in dispatch order.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    MetadataChanged(MetadataEvent),
    EntryDiscovered(EntryEvent),
}

/// Broadcast channels for one session.
#[derive(Debug)]
pub struct FeedEvents {
    entries: broadcast::Sender<EntryEvent>,
    metadata: broadcast::Sender<MetadataEvent>,
    all: broadcast::Sender<FeedEvent>,
}

impl FeedEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (entries, _) = broadcast::channel(capacity);
        let (metadata, _) = broadcast::channel(capacity);
        let (all, _) = broadcast::channel(capacity);
        Self {
            entries,
            metadata,
            all,
        }
    }

    /// Receive entry-discovered events.
    pub fn subscribe_entries(&self) -> broadcast::Receiver<EntryEvent> {
        self.entries.subscribe()
    }

    /// Receive metadata-changed events.
    pub fn subscribe_metadata(&self) -> broadcast::Receiver<MetadataEvent> {
        self.metadata.subscribe()
    }

    /// Receive both kinds on one channel.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.all.subscribe()
    }

    pub(crate) fn entry_discovered(&self, feed_url: &Arc<str>, entry: FeedEntry) {
        let event = EntryEvent {
            feed_url: Arc::clone(feed_url),
            entry: Arc::new(entry),
        };
        // No receivers is not an error
        let _ = self.all.send(FeedEvent::EntryDiscovered(event.clone()));
        let _ = self.entries.send(event);
    }

    pub(crate) fn metadata_changed(&self, feed_url: &Arc<str>, changes: MetadataChanges) {
        let event = MetadataEvent {
            feed_url: Arc::clone(feed_url),
            changes: Arc::new(changes),
        };
        let _ = self.all.send(FeedEvent::MetadataChanged(event.clone()));
        let _ = self.metadata.send(event);
    }
}

impl Default for FeedEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
