//! Change feed: per-table insert/update/delete notifications.
//!
//! Every successful mutation on the [`Database`](crate::db::Database) is
//! published here. Each table keeps its own sequence counter, assigned while
//! the database lock is held, so a table's events are totally ordered and a
//! subscriber can tell when it has missed one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::models::Table;

/// Default number of events buffered per subscriber before it lags.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Primary key of the affected row
    pub id: String,
    /// Per-table sequence number, strictly increasing
    pub seq: u64,
    /// Row after the change; `None` for deletes
    pub record: Option<serde_json::Value>,
}

/// Restricts a subscription to rows whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub column: String,
    pub value: serde_json::Value,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Deletes carry no record and always pass; removing an unknown id is a no-op.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event
            .record
            .as_ref()
            .map_or(true, |record| self.matches_record(record))
    }

    /// Whether a row, in its JSON form, passes the filter.
    pub fn matches_record(&self, record: &serde_json::Value) -> bool {
        record.get(&self.column) == Some(&self.value)
    }
}

struct FeedInner {
    sender: broadcast::Sender<ChangeEvent>,
    sequences: Vec<AtomicU64>,
    channels: Mutex<HashSet<String>>,
}

/// Broadcast hub shared by the database and every subscriber.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                sender,
                sequences: (0..Table::COUNT).map(|_| AtomicU64::new(0)).collect(),
                channels: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Publish a change and return its sequence number.
    pub fn publish(
        &self,
        table: Table,
        kind: ChangeKind,
        id: &str,
        record: Option<serde_json::Value>,
    ) -> u64 {
        let seq = self.inner.sequences[table.index()].fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is not an error: nobody is listening yet.
        let _ = self.inner.sender.send(ChangeEvent {
            table,
            kind,
            id: id.to_string(),
            seq,
            record,
        });
        seq
    }

    /// Sequence number of the table's latest published change.
    pub fn sequence(&self, table: Table) -> u64 {
        self.inner.sequences[table.index()].load(Ordering::SeqCst)
    }

    /// Open a subscription to one table under a freshly generated channel name.
    pub fn subscribe(&self, table: Table, filter: Option<RowFilter>) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        let name = format!("{}:{}", table.as_str(), uuid::Uuid::new_v4());
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone());
        Subscription {
            name,
            table,
            filter,
            last_seq: self.sequence(table),
            receiver,
            feed: Arc::clone(&self.inner),
        }
    }

    /// Names of the currently open subscriptions.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// What a subscriber should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Apply this event.
    Event(ChangeEvent),
    /// Events were missed; local state must be re-fetched.
    Resync,
}

/// A live subscription to one table. Closes its channel on drop.
pub struct Subscription {
    name: String,
    table: Table,
    filter: Option<RowFilter>,
    last_seq: u64,
    receiver: broadcast::Receiver<ChangeEvent>,
    feed: Arc<FeedInner>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Sequence of the last event this subscription has seen.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Wait for the next relevant delivery. `None` once the feed is gone.
    ///
    /// Gap detection runs before filtering, so rows filtered out never look
    /// like missed events.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => {
                    self.last_seq = self.feed.sequences[self.table.index()].load(Ordering::SeqCst);
                    return Some(Delivery::Resync);
                }
                Err(RecvError::Closed) => return None,
            };

            if event.table != self.table || event.seq <= self.last_seq {
                continue;
            }

            let gap = event.seq > self.last_seq + 1;
            self.last_seq = event.seq;
            if gap {
                return Some(Delivery::Resync);
            }

            if self.filter.as_ref().map_or(true, |f| f.matches(&event)) {
                return Some(Delivery::Event(event));
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feed
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequences_are_per_table() {
        let feed = ChangeFeed::default();
        assert_eq!(feed.publish(Table::Patients, ChangeKind::Insert, "a", None), 1);
        assert_eq!(feed.publish(Table::Patients, ChangeKind::Update, "a", None), 2);
        assert_eq!(
            feed.publish(Table::Appointments, ChangeKind::Insert, "b", None),
            1
        );
        assert_eq!(feed.sequence(Table::Patients), 2);
        assert_eq!(feed.sequence(Table::Exercises), 0);
    }

    #[test]
    fn test_channel_names_are_unique_and_released() {
        let feed = ChangeFeed::default();
        let a = feed.subscribe(Table::Patients, None);
        let b = feed.subscribe(Table::Patients, None);
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("patients:"));
        assert_eq!(feed.active_channels().len(), 2);

        drop(a);
        assert_eq!(feed.active_channels(), vec![b.name().to_string()]);
    }

    #[tokio::test]
    async fn test_recv_skips_other_tables() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe(Table::Appointments, None);

        feed.publish(Table::Patients, ChangeKind::Insert, "p", None);
        feed.publish(
            Table::Appointments,
            ChangeKind::Insert,
            "a",
            Some(json!({"id": "a"})),
        );

        match sub.recv().await {
            Some(Delivery::Event(event)) => {
                assert_eq!(event.id, "a");
                assert_eq!(event.seq, 1);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filter_does_not_cause_resync() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe(
            Table::Appointments,
            Some(RowFilter::eq("patient_id", "p2")),
        );

        feed.publish(
            Table::Appointments,
            ChangeKind::Insert,
            "a1",
            Some(json!({"id": "a1", "patient_id": "p1"})),
        );
        feed.publish(
            Table::Appointments,
            ChangeKind::Insert,
            "a2",
            Some(json!({"id": "a2", "patient_id": "p2"})),
        );

        match sub.recv().await {
            Some(Delivery::Event(event)) => assert_eq!(event.id, "a2"),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagged_receiver_resyncs() {
        let feed = ChangeFeed::new(2);
        let mut sub = feed.subscribe(Table::Patients, None);

        for i in 0..5 {
            feed.publish(Table::Patients, ChangeKind::Insert, &i.to_string(), None);
        }

        assert_eq!(sub.recv().await, Some(Delivery::Resync));
    }
}
