//! Local replica of the last-fetched batches plus the reconciler that
//! applies server-confirmed mutations to it.
//!
//! Two layers, read top-down by the view:
//!
//! - **Overlay**: staged inline edits not yet confirmed by the server.
//! - **Replica**: records as last fetched or reconciled.
//!
//! `displayed(id)` merges both. Reconciliation only ever touches the
//! replica; a rejected edit is rolled back by dropping its overlay entry,
//! so the displayed value returns to exactly what it was.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::api::{BatchPage, PageRequest, Pagination};
use crate::broadcast::{Broadcaster, SubscriptionId};
use crate::model::{Batch, BatchField, BatchMutation, StatusTally, TeamMember};

/// Change notification for view subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Replaced { len: usize },
    Inserted { id: String },
    Updated { id: String, field: BatchField },
    Deleted { id: String },
    Staged { id: String, field: BatchField },
    RolledBack { id: String, field: BatchField },
}

/// Outcome of applying a confirmed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    /// The id is no longer cached; nothing changed.
    Desync,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("batch '{0}' already exists")]
pub struct DuplicateId(pub String);

#[derive(Default)]
struct CacheState {
    records: Vec<Batch>,
    overlay: BTreeMap<(String, BatchField), BatchMutation>,
    loaded: Option<PageRequest>,
    pagination: Option<Pagination>,
}

impl CacheState {
    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|b| b.id == id)
    }
}

/// Ordered, id-unique batch replica. Never re-sorted in place.
#[derive(Default)]
pub struct BatchCache {
    state: RwLock<CacheState>,
    events: Broadcaster<CacheEvent>,
}

impl BatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Observe every change to the replica or the overlay.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ====================================================================
    // Replica: whole set
    // ====================================================================

    /// Overwrite the replica. Returns the new size.
    ///
    /// A repeated id keeps its first occurrence. Staged edits survive only
    /// for ids still present.
    pub fn replace(&self, records: Vec<Batch>) -> usize {
        let len = {
            let mut state = self.write();
            let mut seen = HashSet::with_capacity(records.len());
            let mut kept = Vec::with_capacity(records.len());
            for b in records {
                if seen.insert(b.id.clone()) {
                    kept.push(b);
                } else {
                    tracing::warn!(id = %b.id, "duplicate id in fetched records; keeping first");
                }
            }
            state.overlay.retain(|(id, _), _| seen.contains(id));
            state.records = kept;
            state.records.len()
        };
        self.events.publish(&CacheEvent::Replaced { len });
        len
    }

    /// Replace with a fetched page and remember which page it was.
    pub fn replace_page(&self, request: PageRequest, page: BatchPage) -> usize {
        {
            let mut state = self.write();
            state.loaded = Some(request);
            state.pagination = page.pagination;
        }
        self.replace(page.records)
    }

    /// The page request the replica was last loaded with.
    pub fn loaded_page(&self) -> Option<PageRequest> {
        self.read().loaded
    }

    /// Pagination reported by the last paginated fetch.
    pub fn pagination(&self) -> Option<Pagination> {
        self.read().pagination
    }

    // ====================================================================
    // Replica: reconciler
    // ====================================================================

    /// Apply a confirmed single-field update in place.
    pub fn apply_update(&self, id: &str, mutation: &BatchMutation) -> Reconciled {
        let applied = {
            let mut state = self.write();
            match state.position(id) {
                Some(i) => {
                    mutation.apply(&mut state.records[i]);
                    true
                }
                None => false,
            }
        };
        if !applied {
            tracing::warn!(id, field = %mutation.field(), "update for batch not in cache; left as-is");
            return Reconciled::Desync;
        }
        self.events.publish(&CacheEvent::Updated { id: id.to_string(), field: mutation.field() });
        Reconciled::Applied
    }

    /// Remove a batch. Absent ids are ignored. Returns whether one was removed.
    pub fn apply_delete(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.write();
            match state.position(id) {
                Some(i) => {
                    state.records.remove(i);
                    state.overlay.retain(|(oid, _), _| oid != id);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(&CacheEvent::Deleted { id: id.to_string() });
        }
        removed
    }

    /// Append a new batch. An id already cached is refused, never overwritten.
    pub fn apply_insert(&self, batch: Batch) -> Result<(), DuplicateId> {
        let id = batch.id.clone();
        {
            let mut state = self.write();
            if state.position(&id).is_some() {
                return Err(DuplicateId(id));
            }
            state.records.push(batch);
        }
        self.events.publish(&CacheEvent::Inserted { id });
        Ok(())
    }

    // ====================================================================
    // Overlay: optimistic edits
    // ====================================================================

    /// Show `mutation` immediately without touching the replica.
    /// Returns `false` if the id is not cached.
    pub fn stage(&self, id: &str, mutation: BatchMutation) -> bool {
        let field = mutation.field();
        {
            let mut state = self.write();
            if state.position(id).is_none() {
                return false;
            }
            state.overlay.insert((id.to_string(), field), mutation);
        }
        self.events.publish(&CacheEvent::Staged { id: id.to_string(), field });
        true
    }

    /// Move a staged edit into the replica after server confirmation.
    pub fn commit(&self, id: &str, field: BatchField) -> Reconciled {
        let staged = self.write().overlay.remove(&(id.to_string(), field));
        match staged {
            Some(mutation) => self.apply_update(id, &mutation),
            None => {
                tracing::warn!(id, %field, "commit without a staged edit");
                Reconciled::Desync
            }
        }
    }

    /// Drop a staged edit. Returns whether one existed.
    pub fn rollback(&self, id: &str, field: BatchField) -> bool {
        let dropped = self.write().overlay.remove(&(id.to_string(), field)).is_some();
        if dropped {
            self.events.publish(&CacheEvent::RolledBack { id: id.to_string(), field });
        }
        dropped
    }

    pub fn has_staged(&self, id: &str, field: BatchField) -> bool {
        self.read().overlay.contains_key(&(id.to_string(), field))
    }

    // ====================================================================
    // Reads
    // ====================================================================

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().position(id).is_some()
    }

    /// Replica record only, ignoring staged edits.
    pub fn find(&self, id: &str) -> Option<Batch> {
        let state = self.read();
        state.position(id).map(|i| state.records[i].clone())
    }

    /// Replica records in cache order.
    pub fn snapshot(&self) -> Vec<Batch> {
        self.read().records.clone()
    }

    /// What the view should show for one batch: replica plus staged edits.
    pub fn displayed(&self, id: &str) -> Option<Batch> {
        let state = self.read();
        let mut batch = state.records[state.position(id)?].clone();
        for ((oid, _), m) in state.overlay.range((id.to_string(), BatchField::Assignee)..) {
            if oid.as_str() != id {
                break;
            }
            m.apply(&mut batch);
        }
        Some(batch)
    }

    /// Records with an exact assignee match, in cache order.
    pub fn filter_by_assignee(&self, assignee: &str) -> Vec<Batch> {
        self.read()
            .records
            .iter()
            .filter(|b| b.assignee.as_deref() == Some(assignee))
            .cloned()
            .collect()
    }

    pub fn tally(&self) -> StatusTally {
        StatusTally::of(&self.read().records)
    }

    pub fn member_stats(&self, names: &[String]) -> Vec<TeamMember> {
        TeamMember::tally(names, &self.read().records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::model::BatchStatus;

    fn seeded(ids: &[&str]) -> BatchCache {
        let cache = BatchCache::new();
        cache.replace(ids.iter().map(|id| Batch::new(*id)).collect());
        cache
    }

    fn ids(cache: &BatchCache) -> Vec<String> {
        cache.snapshot().into_iter().map(|b| b.id).collect()
    }

    // ========================================================================
    // replace
    // ========================================================================

    #[test]
    fn replace_returns_new_size() {
        let cache = BatchCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.replace(vec![Batch::new("a"), Batch::new("b")]), 2);
        assert_eq!(cache.replace(vec![Batch::new("c")]), 1);
        assert_eq!(ids(&cache), vec!["c"]);
    }

    #[test]
    fn replace_drops_repeated_ids() {
        let cache = BatchCache::new();
        let first = Batch::new("a").with_status(BatchStatus::Done);
        assert_eq!(cache.replace(vec![first.clone(), Batch::new("b"), Batch::new("a")]), 2);
        assert_eq!(cache.find("a").unwrap(), first);
    }

    #[test]
    fn replace_page_remembers_pagination() {
        let cache = BatchCache::new();
        let page = BatchPage {
            records: vec![Batch::new("a")],
            pagination: Some(Pagination { page: 3, total_pages: 4, total: 151, per_page: None }),
        };
        cache.replace_page(PageRequest::new(3, 50), page);
        assert_eq!(cache.loaded_page(), Some(PageRequest::new(3, 50)));
        assert_eq!(cache.pagination().unwrap().total, 151);
    }

    // ========================================================================
    // apply_update
    // ========================================================================

    #[test]
    fn update_changes_one_field() {
        let cache = BatchCache::new();
        cache.replace(vec![Batch::new("B1")]);
        let r = cache.apply_update("B1", &BatchMutation::SetStatus(BatchStatus::Done));
        assert_eq!(r, Reconciled::Applied);
        assert_eq!(cache.snapshot(), vec![Batch::new("B1").with_status(BatchStatus::Done)]);
    }

    #[test]
    fn update_unknown_id_is_desync_noop() {
        let cache = seeded(&["a", "b"]);
        let before = cache.snapshot();
        let r = cache.apply_update("zzz", &BatchMutation::SetComments("hi".into()));
        assert_eq!(r, Reconciled::Desync);
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn update_preserves_order() {
        let cache = seeded(&["c", "a", "b"]);
        cache.apply_update("a", &BatchMutation::SetFolder("/x".into()));
        assert_eq!(ids(&cache), vec!["c", "a", "b"]);
    }

    // ========================================================================
    // apply_delete / apply_insert
    // ========================================================================

    #[test]
    fn delete_absent_id_twice_is_noop() {
        let cache = seeded(&["a", "b"]);
        assert!(!cache.apply_delete("x"));
        assert!(!cache.apply_delete("x"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn delete_present_id_once() {
        let cache = seeded(&["a", "b", "c"]);
        assert!(cache.apply_delete("b"));
        assert!(!cache.apply_delete("b"));
        assert_eq!(ids(&cache), vec!["a", "c"]);
    }

    #[test]
    fn insert_duplicate_is_rejected() {
        let cache = seeded(&["a"]);
        let err = cache.apply_insert(Batch::new("a").with_assignee("ana")).unwrap_err();
        assert_eq!(err, DuplicateId("a".into()));
        assert_eq!(cache.len(), 1);
        assert!(cache.find("a").unwrap().is_unassigned());
    }

    #[test]
    fn insert_appends() {
        let cache = seeded(&["b", "a"]);
        cache.apply_insert(Batch::new("c")).unwrap();
        assert_eq!(ids(&cache), vec!["b", "a", "c"]);
    }

    // ========================================================================
    // Overlay
    // ========================================================================

    #[test]
    fn staged_edit_is_displayed_but_not_replicated() {
        let cache = seeded(&["B1"]);
        assert!(cache.stage("B1", BatchMutation::SetAssignee(Some("ana".into()))));

        assert_eq!(cache.displayed("B1").unwrap().assignee.as_deref(), Some("ana"));
        assert!(cache.find("B1").unwrap().is_unassigned());
        assert!(cache.has_staged("B1", BatchField::Assignee));
    }

    #[test]
    fn rollback_restores_displayed_value() {
        let cache = seeded(&["B1"]);
        let before = cache.displayed("B1").unwrap();
        cache.stage("B1", BatchMutation::SetStatus(BatchStatus::Done));
        assert!(cache.rollback("B1", BatchField::Status));
        assert_eq!(cache.displayed("B1").unwrap(), before);
        assert!(!cache.rollback("B1", BatchField::Status));
    }

    #[test]
    fn commit_moves_edit_into_replica() {
        let cache = seeded(&["B1"]);
        cache.stage("B1", BatchMutation::SetDueDate("2025-02-01".into()));
        assert_eq!(cache.commit("B1", BatchField::DueDate), Reconciled::Applied);
        assert!(!cache.has_staged("B1", BatchField::DueDate));
        assert_eq!(cache.find("B1").unwrap().metadata.due_date.as_deref(), Some("2025-02-01"));
    }

    #[test]
    fn stage_unknown_id_refused() {
        let cache = seeded(&["a"]);
        assert!(!cache.stage("nope", BatchMutation::SetFolder("/x".into())));
    }

    #[test]
    fn displayed_applies_only_own_edits() {
        let cache = seeded(&["a", "ab", "b"]);
        cache.stage("a", BatchMutation::SetFolder("/a".into()));
        cache.stage("ab", BatchMutation::SetFolder("/ab".into()));
        cache.stage("a", BatchMutation::SetComments("note".into()));

        let a = cache.displayed("a").unwrap();
        assert_eq!(a.folder.as_deref(), Some("/a"));
        assert_eq!(a.comments.as_deref(), Some("note"));
        assert!(cache.displayed("b").unwrap().folder.is_none());
    }

    // ========================================================================
    // Events and reads
    // ========================================================================

    #[test]
    fn subscribers_see_cache_events() {
        let cache = BatchCache::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        cache.subscribe(move |ev| e.lock().unwrap().push(ev.clone()));

        cache.replace(vec![Batch::new("a")]);
        cache.apply_update("a", &BatchMutation::SetStatus(BatchStatus::Partial));
        cache.apply_update("missing", &BatchMutation::SetStatus(BatchStatus::Partial));
        cache.apply_delete("a");
        cache.apply_delete("a");

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                CacheEvent::Replaced { len: 1 },
                CacheEvent::Updated { id: "a".into(), field: BatchField::Status },
                CacheEvent::Deleted { id: "a".into() },
            ]
        );
    }

    #[test]
    fn tallies_and_filters() {
        let cache = BatchCache::new();
        cache.replace(vec![
            Batch::new("a").with_assignee("ana").with_status(BatchStatus::Done),
            Batch::new("b").with_assignee("luis"),
            Batch::new("c").with_assignee("ana").with_status(BatchStatus::Partial),
        ]);
        assert_eq!(cache.tally().completed, 1);
        assert_eq!(cache.filter_by_assignee("ana").len(), 2);

        let stats = cache.member_stats(&["ana".to_string()]);
        assert_eq!(stats[0].batches, 2);
        assert_eq!(stats[0].completed, 1);
    }
}
