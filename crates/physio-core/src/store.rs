//! Reconciling in-memory cache of one table.
//!
//! An [`EntityStore`] owns the list of rows a view works with, the loading
//! flag, the mutation functions and one change-feed subscription. Confirmed
//! mutations are applied locally right away; the feed later delivers the
//! same change. Both paths carry the table sequence number, and a row is
//! only ever replaced by a strictly newer version, so the two paths cannot
//! double-apply or roll a row back.
//!
//! A missed event (sequence gap or lagged receiver) schedules a debounced
//! full re-fetch instead of trusting a partial picture.
//!
//! A store subscribed with a [`RowFilter`] holds only matching rows. The
//! filter applies to snapshots and to feed events alike; a row updated out
//! of the filter is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{DbError, DbResult};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind, Delivery, RowFilter, Subscription};
use crate::models::Entity;
use crate::repo::{Repository, Snapshot, Versioned};

/// Default delay that coalesces bursts of re-fetch requests.
pub const DEFAULT_REFETCH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub refetch_debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            refetch_debounce: DEFAULT_REFETCH_DEBOUNCE,
        }
    }
}

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("repository task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of a mutation. Failures are values, never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> MutationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Subscription lifecycle of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Subscribed,
    Cleaning,
}

struct StoreState<E> {
    rows: Vec<E>,
    /// Sequence each known id reflects. Removed ids stay as tombstones.
    versions: HashMap<String, u64>,
    /// Sequence of the last applied snapshot.
    watermark: u64,
    loading: bool,
    filter: Option<RowFilter>,
}

fn admits<E: Entity>(filter: Option<&RowFilter>, row: &E) -> bool {
    match filter {
        None => true,
        Some(filter) => serde_json::to_value(row).is_ok_and(|v| filter.matches_record(&v)),
    }
}

impl<E: Entity> StoreState<E> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            versions: HashMap::new(),
            watermark: 0,
            loading: false,
            filter: None,
        }
    }

    /// Scope the store to `filter`, dropping rows outside it.
    fn set_filter(&mut self, filter: Option<RowFilter>) {
        self.filter = filter;
        let filter = self.filter.clone();
        self.rows.retain(|r| admits(filter.as_ref(), r));
    }

    fn is_stale(&self, id: &str, seq: u64) -> bool {
        seq <= self.watermark || self.versions.get(id).is_some_and(|&v| v >= seq)
    }

    /// Insert or replace `row`. A row outside the filter is removed instead.
    fn upsert(&mut self, row: E, seq: u64) -> bool {
        if !admits(self.filter.as_ref(), &row) {
            return self.remove(row.id(), seq);
        }
        if self.is_stale(row.id(), seq) {
            return false;
        }
        self.versions.insert(row.id().to_string(), seq);
        self.rows.retain(|r| r.id() != row.id());
        let at = self
            .rows
            .partition_point(|r| E::list_order(r, &row) != std::cmp::Ordering::Greater);
        self.rows.insert(at, row);
        true
    }

    fn remove(&mut self, id: &str, seq: u64) -> bool {
        if self.is_stale(id, seq) {
            return false;
        }
        self.versions.insert(id.to_string(), seq);
        self.rows.retain(|r| r.id() != id);
        true
    }

    /// Replace the list with a snapshot, keeping rows already known at a
    /// newer sequence than the snapshot.
    fn replace(&mut self, snapshot: Snapshot<E>) {
        if snapshot.seq < self.watermark {
            return;
        }
        let seq = snapshot.seq;
        let filter = self.filter.clone();
        let newer: HashMap<String, u64> = self
            .versions
            .iter()
            .filter(|(_, &v)| v > seq)
            .map(|(id, &v)| (id.clone(), v))
            .collect();

        let mut rows: Vec<E> = snapshot
            .rows
            .into_iter()
            .filter(|r| !newer.contains_key(r.id()) && admits(filter.as_ref(), r))
            .collect();
        let mut versions: HashMap<String, u64> =
            rows.iter().map(|r| (r.id().to_string(), seq)).collect();

        for row in self.rows.drain(..) {
            if newer.contains_key(row.id()) {
                rows.push(row);
            }
        }
        versions.extend(newer);
        rows.sort_by(E::list_order);

        self.rows = rows;
        self.versions = versions;
        self.watermark = seq;
    }
}

struct SubscriptionSlot {
    state: SubscriptionState,
    channel: Option<String>,
    task: Option<JoinHandle<()>>,
}

struct StoreInner<R: Repository> {
    repo: R,
    config: StoreConfig,
    state: RwLock<StoreState<R::Entity>>,
    refetch_pending: AtomicBool,
    subscription: Mutex<SubscriptionSlot>,
}

impl<R: Repository> StoreInner<R> {
    async fn run<T, F>(self: &Arc<Self>, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&R) -> DbResult<T> + Send + 'static,
    {
        let inner = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || op(&inner.repo)).await??)
    }

    async fn fetch(self: &Arc<Self>) -> Result<(), StoreError> {
        self.state.write().await.loading = true;
        let result = self.run(|repo| repo.list()).await;

        let mut state = self.state.write().await;
        state.loading = false;
        match result {
            Ok(snapshot) => {
                debug!(
                    table = %R::Entity::TABLE,
                    rows = snapshot.rows.len(),
                    seq = snapshot.seq,
                    "fetched snapshot"
                );
                state.replace(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!(table = %R::Entity::TABLE, error = %e, "fetch failed, keeping previous rows");
                Err(e)
            }
        }
    }

    async fn apply_event(self: &Arc<Self>, event: ChangeEvent) {
        let table = R::Entity::TABLE;
        let mut state = self.state.write().await;
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(record) = event.record else {
                    drop(state);
                    self.schedule_refetch();
                    return;
                };
                match serde_json::from_value::<R::Entity>(record) {
                    Ok(row) => {
                        if state.upsert(row, event.seq) {
                            debug!(table = %table, id = %event.id, seq = event.seq, "patched row from feed");
                        }
                    }
                    Err(e) => {
                        warn!(table = %table, id = %event.id, error = %e, "undecodable change event");
                        drop(state);
                        self.schedule_refetch();
                    }
                }
            }
            ChangeKind::Delete => {
                if state.remove(&event.id, event.seq) {
                    debug!(table = %table, id = %event.id, seq = event.seq, "removed row from feed");
                }
            }
        }
    }

    /// Re-fetch after the debounce delay. Requests arriving while one is
    /// pending are absorbed by it.
    fn schedule_refetch(self: &Arc<Self>) {
        if self.refetch_pending.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.refetch_debounce).await;
            inner.refetch_pending.store(false, AtomicOrdering::SeqCst);
            debug!(table = %R::Entity::TABLE, "debounced refetch");
            // Failure is already logged and the previous rows kept.
            let _ = inner.fetch().await;
        });
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, SubscriptionSlot> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn listen<R: Repository>(
    inner: Weak<StoreInner<R>>,
    mut subscription: Subscription,
    filter: Option<RowFilter>,
) {
    if let Some(strong) = inner.upgrade() {
        let mut state = strong.state.write().await;
        state.set_filter(filter);
        // Changes between the last snapshot and opening the subscription.
        let missed = subscription.last_seq() > state.watermark;
        drop(state);
        if missed {
            strong.schedule_refetch();
        }
    }
    while let Some(delivery) = subscription.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match delivery {
            Delivery::Event(event) => inner.apply_event(event).await,
            Delivery::Resync => {
                debug!(channel = subscription.name(), "missed events, scheduling refetch");
                inner.schedule_refetch();
            }
        }
    }
}

/// Cache and mutation front-end for one table.
pub struct EntityStore<R: Repository> {
    inner: Arc<StoreInner<R>>,
}

impl<R: Repository> EntityStore<R> {
    pub fn new(repo: R) -> Self {
        Self::with_config(repo, StoreConfig::default())
    }

    pub fn with_config(repo: R, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                repo,
                config,
                state: RwLock::new(StoreState::new()),
                refetch_pending: AtomicBool::new(false),
                subscription: Mutex::new(SubscriptionSlot {
                    state: SubscriptionState::Idle,
                    channel: None,
                    task: None,
                }),
            }),
        }
    }

    /// Load every row. On failure the previous rows stay and the error is
    /// returned; the loading flag is cleared either way.
    pub async fn fetch_all(&self) -> Result<(), StoreError> {
        self.inner.fetch().await
    }

    pub async fn create(&self, new: R::New) -> MutationResult<R::Entity> {
        let result = self.inner.run(move |repo| repo.insert(new)).await;
        self.confirm("create", result).await
    }

    pub async fn update(&self, id: &str, patch: R::Patch) -> MutationResult<R::Entity> {
        let key = id.to_string();
        let result = self.inner.run(move |repo| repo.update(&key, patch)).await;
        self.confirm("update", result).await
    }

    /// Soft delete. Tables without an active flag report failure.
    pub async fn deactivate(&self, id: &str) -> MutationResult<R::Entity> {
        let key = id.to_string();
        let result = self.inner.run(move |repo| repo.deactivate(&key)).await;
        self.confirm("deactivate", result).await
    }

    /// Hard delete.
    pub async fn remove(&self, id: &str) -> MutationResult<()> {
        let key = id.to_string();
        match self.inner.run(move |repo| repo.delete(&key)).await {
            Ok(seq) => {
                self.inner.state.write().await.remove(id, seq);
                MutationResult::ok(())
            }
            Err(e) => {
                warn!(table = %R::Entity::TABLE, id, error = %e, "remove failed");
                MutationResult::err(e.to_string())
            }
        }
    }

    async fn confirm(
        &self,
        op: &'static str,
        result: Result<Versioned<R::Entity>, StoreError>,
    ) -> MutationResult<R::Entity> {
        match result {
            Ok(Versioned { row, seq }) => {
                self.inner.state.write().await.upsert(row.clone(), seq);
                MutationResult::ok(row)
            }
            Err(e) => {
                warn!(table = %R::Entity::TABLE, op, error = %e, "mutation failed");
                MutationResult::err(e.to_string())
            }
        }
    }

    /// Current rows in list order.
    pub async fn snapshot(&self) -> Vec<R::Entity> {
        self.inner.state.read().await.rows.clone()
    }

    pub async fn get(&self, id: &str) -> Option<R::Entity> {
        self.inner
            .state
            .read()
            .await
            .rows
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.read().await.loading
    }

    /// Open the store's change subscription.
    ///
    /// With a `filter`, the store keeps only matching rows from then on,
    /// including across re-fetches, until a later subscription replaces it.
    /// Returns `false` without doing anything unless the store is idle.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, feed: &ChangeFeed, filter: Option<RowFilter>) -> bool {
        let mut slot = self.inner.slot();
        if slot.state != SubscriptionState::Idle {
            return false;
        }
        slot.state = SubscriptionState::Subscribing;

        // Unfiltered at the feed so rows leaving the filter are seen too.
        let subscription = feed.subscribe(R::Entity::TABLE, None);
        let channel = subscription.name().to_string();
        let task = tokio::spawn(listen(Arc::downgrade(&self.inner), subscription, filter));

        info!(channel = %channel, "subscribed to changes");
        slot.channel = Some(channel);
        slot.task = Some(task);
        slot.state = SubscriptionState::Subscribed;
        true
    }

    /// Close the subscription. Returns `false` if there was none.
    ///
    /// The channel is released by the time this returns.
    pub async fn unsubscribe(&self) -> bool {
        let (task, channel) = {
            let mut slot = self.inner.slot();
            if slot.state != SubscriptionState::Subscribed {
                return false;
            }
            slot.state = SubscriptionState::Cleaning;
            (slot.task.take(), slot.channel.take())
        };

        if let Some(task) = task {
            task.abort();
            // Resolves once the task, and its subscription, are dropped.
            let _ = task.await;
        }
        info!(channel = channel.as_deref().unwrap_or_default(), "unsubscribed");
        self.inner.slot().state = SubscriptionState::Idle;
        true
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.inner.slot().state
    }

    pub fn channel_name(&self) -> Option<String> {
        self.inner.slot().channel.clone()
    }
}

impl<R: Repository> Drop for EntityStore<R> {
    fn drop(&mut self) {
        if let Some(task) = self.inner.slot().task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPatient, Patient, PatientPatch, Table};
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[derive(Default)]
    struct MockState {
        rows: Mutex<Vec<Patient>>,
        seq: AtomicU64,
        fail: AtomicBool,
        list_calls: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct MockRepo(Arc<MockState>);

    impl MockRepo {
        fn check(&self) -> DbResult<()> {
            if self.0.fail.load(AtomicOrdering::SeqCst) {
                Err(DbError::Invalid("backend unavailable".into()))
            } else {
                Ok(())
            }
        }

        fn next_seq(&self) -> u64 {
            self.0.seq.fetch_add(1, AtomicOrdering::SeqCst) + 1
        }
    }

    impl Repository for MockRepo {
        type Entity = Patient;
        type New = NewPatient;
        type Patch = PatientPatch;

        fn list(&self) -> DbResult<Snapshot<Patient>> {
            self.0.list_calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.check()?;
            Ok(Snapshot {
                rows: self.0.rows.lock().unwrap().clone(),
                seq: self.0.seq.load(AtomicOrdering::SeqCst),
            })
        }

        fn insert(&self, new: NewPatient) -> DbResult<Versioned<Patient>> {
            self.check()?;
            let row = Patient::from_new(new);
            self.0.rows.lock().unwrap().push(row.clone());
            Ok(Versioned {
                row,
                seq: self.next_seq(),
            })
        }

        fn update(&self, id: &str, patch: PatientPatch) -> DbResult<Versioned<Patient>> {
            self.check()?;
            let mut rows = self.0.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
            row.apply(patch);
            Ok(Versioned {
                row: row.clone(),
                seq: self.next_seq(),
            })
        }

        fn delete(&self, id: &str) -> DbResult<u64> {
            self.check()?;
            self.0.rows.lock().unwrap().retain(|r| r.id != id);
            Ok(self.next_seq())
        }
    }

    fn patient(name: &str) -> NewPatient {
        NewPatient {
            name: name.into(),
            ..Default::default()
        }
    }

    fn event(kind: ChangeKind, row: &Patient, seq: u64) -> ChangeEvent {
        ChangeEvent {
            table: Table::Patients,
            kind,
            id: row.id.clone(),
            seq,
            record: match kind {
                ChangeKind::Delete => None,
                _ => Some(serde_json::to_value(row).unwrap()),
            },
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_rows_and_clears_loading() {
        let repo = MockRepo::default();
        let store = EntityStore::new(repo.clone());
        store.create(patient("Ana")).await;
        store.fetch_all().await.unwrap();
        assert_eq!(store.snapshot().await.len(), 1);

        repo.0.fail.store(true, AtomicOrdering::SeqCst);
        assert!(store.fetch_all().await.is_err());
        assert_eq!(store.snapshot().await.len(), 1);
        assert!(!store.is_loading().await);
    }

    #[tokio::test]
    async fn test_mutations_report_failure_as_value() {
        let repo = MockRepo::default();
        let store = EntityStore::new(repo.clone());
        repo.0.fail.store(true, AtomicOrdering::SeqCst);

        let created = store.create(patient("Ana")).await;
        assert!(!created.success);
        assert!(created.data.is_none());
        assert!(created.error.is_some());

        repo.0.fail.store(false, AtomicOrdering::SeqCst);
        let missing = store.update("nope", PatientPatch::default()).await;
        assert!(!missing.success);

        // The mock has no soft delete.
        let created = store.create(patient("Ana")).await;
        let id = created.data.unwrap().id;
        assert!(!store.deactivate(&id).await.success);
    }

    #[tokio::test]
    async fn test_rows_kept_in_list_order() {
        let store = EntityStore::new(MockRepo::default());
        for name in ["Carla", "Ana", "Bruno"] {
            assert!(store.create(patient(name)).await.success);
        }
        let names: Vec<_> = store.snapshot().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ana", "Bruno", "Carla"]);
    }

    #[tokio::test]
    async fn test_own_notification_is_idempotent() {
        let store = EntityStore::new(MockRepo::default());
        let created = store.create(patient("Ana")).await.data.unwrap();
        let updated = store
            .update(
                &created.id,
                PatientPatch {
                    phone: Some("555".into()),
                    ..Default::default()
                },
            )
            .await
            .data
            .unwrap();

        // Late delivery of the insert must not roll the row back.
        store
            .inner
            .apply_event(event(ChangeKind::Insert, &created, 1))
            .await;
        store
            .inner
            .apply_event(event(ChangeKind::Update, &updated, 2))
            .await;

        assert_eq!(store.snapshot().await, vec![updated]);
    }

    #[tokio::test]
    async fn test_delete_tombstone_blocks_older_update() {
        let store = EntityStore::new(MockRepo::default());
        let created = store.create(patient("Ana")).await.data.unwrap();
        assert!(store.remove(&created.id).await.success);

        store
            .inner
            .apply_event(event(ChangeKind::Update, &created, 1))
            .await;
        assert!(store.snapshot().await.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_newer_local_rows() {
        let mut state: StoreState<Patient> = StoreState::new();
        let a = Patient::from_new(patient("Ana"));
        let mut a2 = a.clone();
        a2.name = "Ana Paula".into();
        state.upsert(a2.clone(), 5);

        state.replace(Snapshot {
            rows: vec![a],
            seq: 3,
        });
        assert_eq!(state.rows, vec![a2]);
        assert_eq!(state.watermark, 3);

        // An older snapshot than the watermark is ignored.
        state.replace(Snapshot {
            rows: vec![],
            seq: 2,
        });
        assert_eq!(state.rows.len(), 1);
    }

    #[test]
    fn test_filter_scopes_snapshots_and_updates() {
        let mut state: StoreState<Patient> = StoreState::new();
        let mut a = Patient::from_new(patient("Ana"));
        a.phone = Some("555".into());
        let mut b = Patient::from_new(patient("Bia"));
        state.upsert(b.clone(), 1);

        state.set_filter(Some(RowFilter::eq("phone", "555")));
        assert!(state.rows.is_empty());

        state.replace(Snapshot {
            rows: vec![a.clone(), b.clone()],
            seq: 2,
        });
        assert_eq!(state.rows, vec![a.clone()]);

        // Updated out of the filter: removed, and the older snapshot can't restore it.
        let mut moved = a.clone();
        moved.phone = None;
        assert!(state.upsert(moved, 3));
        assert!(state.rows.is_empty());
        state.replace(Snapshot {
            rows: vec![a],
            seq: 2,
        });
        assert!(state.rows.is_empty());

        b.phone = Some("555".into());
        assert!(state.upsert(b.clone(), 4));
        assert_eq!(state.rows, vec![b]);
    }

    #[tokio::test]
    async fn test_subscribe_lifecycle() {
        let feed = ChangeFeed::default();
        let store = EntityStore::new(MockRepo::default());
        assert_eq!(store.subscription_state(), SubscriptionState::Idle);

        assert!(store.subscribe(&feed, None));
        assert!(!store.subscribe(&feed, None));
        assert_eq!(store.subscription_state(), SubscriptionState::Subscribed);
        let channel = store.channel_name().unwrap();
        assert!(channel.starts_with("patients:"));
        assert_eq!(feed.active_channels(), vec![channel]);

        assert!(store.unsubscribe().await);
        assert!(!store.unsubscribe().await);
        assert_eq!(store.subscription_state(), SubscriptionState::Idle);
        assert!(feed.active_channels().is_empty());

        // Idle again, so a fresh subscription is allowed.
        assert!(store.subscribe(&feed, None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_requests_are_debounced() {
        let repo = MockRepo::default();
        let store = EntityStore::new(repo.clone());
        store.fetch_all().await.unwrap();
        assert_eq!(repo.0.list_calls.load(AtomicOrdering::SeqCst), 1);

        for _ in 0..5 {
            store.inner.schedule_refetch();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(repo.0.list_calls.load(AtomicOrdering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        for _ in 0..50 {
            if repo.0.list_calls.load(AtomicOrdering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.0.list_calls.load(AtomicOrdering::SeqCst), 2);
    }
}
