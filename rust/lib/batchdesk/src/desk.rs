//! The `Desk`: one owned state object per dashboard session.
//!
//! Every user-triggered mutation follows the same path:
//!
//! ```text
//! validate ─▶ gate ─▶ gateway ─▶ reconcile cache ─▶ broadcast ─▶ notify ─▶ release
//!                        │
//!                        └─ Err ─▶ notify error ─▶ release   (cache untouched)
//! ```
//!
//! Client-side validation failures stop before the gate and never reach the
//! network. Reads that do not replace the cache (stats, export, roster, file
//! check, missing batches) skip the gate and may interleave with a guarded
//! operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::api::{
    ApiError, BatchApi, BatchStats, Export, FileCheck, Maintenance, MissingBatches, NewMember,
    PageRequest,
};
use crate::broadcast::{BatchesChanged, ChangeBroadcaster, ChangeOrigin, SubscriptionId};
use crate::cache::{BatchCache, CacheEvent, Reconciled};
use crate::config::DeskConfig;
use crate::error::DeskError;
use crate::gate::BusyGate;
use crate::http::HttpBatchApi;
use crate::model::{Batch, BatchField, BatchMutation, DeleteFilter, NewBatch, StatusTally, TeamMember, UploadMode};
use crate::notify::{NotificationSink, Severity};
use crate::upload::{confirmed, parse_upload};

/// Default upper bound for one guarded operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Desk {
    gate: BusyGate,
    api: Arc<dyn BatchApi>,
    cache: BatchCache,
    changes: ChangeBroadcaster,
    sink: Arc<dyn NotificationSink>,
    op_timeout: Duration,
    per_page: u32,
}

impl Desk {
    pub fn new(api: Arc<dyn BatchApi>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            gate: BusyGate::new(),
            api,
            cache: BatchCache::new(),
            changes: ChangeBroadcaster::new(),
            sink,
            op_timeout: DEFAULT_OP_TIMEOUT,
            per_page: PageRequest::default().per_page,
        }
    }

    /// HTTP-backed desk using the server, page size, timeout and retry
    /// policy from `config`.
    pub fn from_config(config: &DeskConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let api = HttpBatchApi::new(config.server.as_str()).with_retry(config.retry.clone());
        Self::new(Arc::new(api), sink)
            .with_op_timeout(config.op_timeout())
            .with_per_page(config.per_page)
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn cache(&self) -> &BatchCache {
        &self.cache
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// The page to fetch when none was loaded yet.
    pub fn first_page(&self) -> PageRequest {
        PageRequest::new(1, self.per_page)
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Called after every successful batch mutation.
    pub fn subscribe_changes<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&BatchesChanged) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    pub fn unsubscribe_changes(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    /// Called on every cache change, including staged and rolled-back edits.
    pub fn subscribe_cache<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.cache.subscribe(listener)
    }

    // ====================================================================
    // Boundary helpers
    // ====================================================================

    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!(%severity, "{}", message),
            Severity::Warning => tracing::warn!(%severity, "{}", message),
            Severity::Success | Severity::Info => tracing::info!(%severity, "{}", message),
        }
        self.sink.show(message, severity);
    }

    fn report(&self, operation: &'static str, err: &DeskError) {
        tracing::debug!(operation, code = err.error_code(), "operation failed");
        self.notify(&err.to_string(), err.severity());
    }

    /// Fail before the gate, with no network call.
    fn reject<T>(&self, operation: &'static str, err: DeskError) -> Result<T, DeskError> {
        self.report(operation, &err);
        Err(err)
    }

    /// Run `work` holding the gate, bounded by the op timeout.
    ///
    /// A held gate refuses immediately. The guard is dropped after the
    /// outcome is reported, so the view never sees an idle gate with a
    /// stale notification.
    async fn guarded<T, Fut>(&self, operation: &'static str, work: Fut) -> Result<T, DeskError>
    where
        Fut: Future<Output = Result<T, DeskError>>,
    {
        let Some(_guard) = self.gate.enter(operation) else {
            tracing::warn!(operation, "refused: another operation is in progress");
            return self.reject(operation, DeskError::GateBusy);
        };
        let result = self.bounded(operation, work).await;
        if let Err(e) = &result {
            self.report(operation, e);
        }
        result
    }

    /// Ungated read, bounded by the op timeout.
    async fn unguarded<T, Fut>(&self, operation: &'static str, work: Fut) -> Result<T, DeskError>
    where
        Fut: Future<Output = Result<T, DeskError>>,
    {
        let result = self.bounded(operation, work).await;
        if let Err(e) = &result {
            self.report(operation, e);
        }
        result
    }

    async fn bounded<T, Fut>(&self, operation: &'static str, work: Fut) -> Result<T, DeskError>
    where
        Fut: Future<Output = Result<T, DeskError>>,
    {
        match tokio::time::timeout(self.op_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(DeskError::Timeout { operation, after: self.op_timeout }),
        }
    }

    /// Roster names must be non-blank. Refused with a warning, no request.
    fn check_member_name(&self, name: &str) -> Result<(), DeskError> {
        if name.trim().is_empty() {
            let err = DeskError::Validation("member name cannot be blank".into());
            self.notify(&err.to_string(), Severity::Warning);
            return Err(err);
        }
        Ok(())
    }

    fn changed(&self, origin: ChangeOrigin) {
        self.changes.notify_changed(Utc::now(), origin);
    }

    /// Reload the current page after a bulk change.
    ///
    /// The mutation already succeeded; a failed reload only leaves the
    /// cache stale and is logged.
    async fn refetch(&self, operation: &'static str) {
        let page = self.cache.loaded_page().unwrap_or_else(|| self.first_page());
        match self.api.list(page).await {
            Ok(fetched) => {
                let len = self.cache.replace_page(page, fetched);
                tracing::debug!(operation, len, "cache reloaded");
            }
            Err(e) => tracing::warn!(operation, error = %e, "reload after bulk change failed, cache is stale"),
        }
    }

    // ====================================================================
    // Operations
    // ====================================================================

    /// Fetch one page and replace the cache with it. Returns the cache size.
    pub async fn sync(&self, page: PageRequest) -> Result<usize, DeskError> {
        self.guarded("sync", async {
            let fetched = self.api.list(page).await?;
            let len = self.cache.replace_page(page, fetched);
            tracing::info!(page = page.page, per_page = page.per_page, len, "batches loaded");
            Ok::<_, DeskError>(len)
        })
        .await
    }

    /// Create a batch. A client-chosen id already in the cache is refused
    /// without a request.
    pub async fn create(&self, new: NewBatch) -> Result<Option<Batch>, DeskError> {
        if let Some(id) = new.id.as_deref() {
            if id.trim().is_empty() {
                return self.reject("create", DeskError::Validation("batch id cannot be blank".into()));
            }
            if self.cache.contains(id) {
                return self.reject("create", DeskError::Validation(format!("batch '{}' already exists", id)));
            }
        }

        self.guarded("create", async {
            let created = self.api.create(&new).await?;
            match created.record.clone() {
                Some(record) => {
                    if let Err(dup) = self.cache.apply_insert(record) {
                        tracing::warn!(id = %dup.0, "created batch already cached, left as-is");
                    }
                }
                None => self.refetch("create").await,
            }
            self.changed(ChangeOrigin::Create);
            let message = match (&created.record, &created.message) {
                (_, Some(m)) => m.clone(),
                (Some(b), None) => format!("Batch {} created", b.id),
                (None, None) => "Batch created".to_string(),
            };
            self.notify(&message, Severity::Success);
            tracing::info!(id = ?created.record.as_ref().map(|b| b.id.as_str()), "batch created");
            Ok::<_, DeskError>(created.record)
        })
        .await
    }

    /// Inline edit of one field.
    ///
    /// The edit is shown immediately through the cache overlay and rolled
    /// back if the server refuses it or the operation is abandoned. Editing
    /// a field to its current value sends nothing.
    pub async fn edit(&self, id: &str, mutation: BatchMutation) -> Result<(), DeskError> {
        // While the gate is held even a no-op goes through it and is refused.
        if !self.is_busy() {
            if let Some(current) = self.cache.displayed(id) {
                if mutation.is_noop_for(&current) {
                    tracing::debug!(id, field = %mutation.field(), "edit is a no-op, skipped");
                    return Ok(());
                }
            }
        }

        self.guarded("edit", async {
            let field = mutation.field();
            let staged = StagedEdit::stage(&self.cache, id, mutation.clone());
            self.api.update(id, &mutation).await?;

            let reconciled = match staged {
                Some(edit) => edit.commit(),
                None => self.cache.apply_update(id, &mutation),
            };
            if reconciled == Reconciled::Desync {
                tracing::warn!(id, %field, "edited batch is not in the loaded page");
            }
            self.changed(ChangeOrigin::Update);
            self.notify(&format!("Batch {} updated", id), Severity::Success);
            tracing::info!(id, %field, "batch updated");
            Ok::<_, DeskError>(())
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), DeskError> {
        self.guarded("delete", async {
            self.api.delete(id).await?;
            if !self.cache.apply_delete(id) {
                tracing::debug!(id, "deleted batch was not cached");
            }
            self.changed(ChangeOrigin::Delete);
            self.notify(&format!("Batch {} deleted", id), Severity::Success);
            tracing::info!(id, "batch deleted");
            Ok::<_, DeskError>(())
        })
        .await
    }

    /// Delete every batch matching `filter`. Needs at least one criterion
    /// and the typed confirmation phrase. Returns the server's count.
    pub async fn delete_by_filter(&self, filter: &DeleteFilter, confirmation: Option<&str>) -> Result<u64, DeskError> {
        if filter.is_empty() {
            return self.reject("delete-by-filter", DeskError::MissingFilter);
        }
        if !confirmed(confirmation) {
            return self.reject("delete-by-filter", DeskError::Cancelled);
        }

        self.guarded("delete-by-filter", async {
            let deleted = self.api.delete_by_filter(filter).await?;
            self.refetch("delete-by-filter").await;
            self.changed(ChangeOrigin::DeleteByFilter);
            self.notify(&format!("{} batches deleted", deleted), Severity::Success);
            tracing::info!(deleted, "batches deleted by filter");
            Ok::<_, DeskError>(deleted)
        })
        .await
    }

    /// Upload a JSON snapshot. `Replace` wipes existing data and needs the
    /// typed confirmation phrase. Returns the server's inserted count.
    pub async fn upload(
        &self,
        file_name: &str,
        text: &str,
        mode: UploadMode,
        confirmation: Option<&str>,
    ) -> Result<u64, DeskError> {
        let items = match parse_upload(file_name, text) {
            Ok(items) => items,
            Err(e) => return self.reject("upload", e),
        };
        if mode.is_destructive() && !confirmed(confirmation) {
            return self.reject("upload", DeskError::Cancelled);
        }

        self.guarded("upload", async {
            let inserted = self.api.upload(&items, mode).await?;
            self.refetch("upload").await;
            self.changed(ChangeOrigin::Upload);
            self.notify(&format!("{} batches uploaded ({})", inserted, mode.as_str()), Severity::Success);
            tracing::info!(inserted, mode = mode.as_str(), file = file_name, "batches uploaded");
            Ok::<_, DeskError>(inserted)
        })
        .await
    }

    /// Delete every batch on the server. Needs the typed confirmation phrase.
    ///
    /// The server reloads its seed file after wiping, so the cache is
    /// emptied first and then refetched.
    pub async fn delete_all(&self, confirmation: Option<&str>) -> Result<Maintenance, DeskError> {
        if !confirmed(confirmation) {
            return self.reject("delete-all", DeskError::Cancelled);
        }

        self.guarded("delete-all", async {
            let report = self.api.reset().await?;
            self.cache.replace(Vec::new());
            self.refetch("delete-all").await;
            self.changed(ChangeOrigin::Reset);
            let message = report.message.clone().unwrap_or_else(|| "All batches deleted".to_string());
            self.notify(&message, Severity::Success);
            tracing::info!(deleted = report.affected, "all batches deleted");
            Ok::<_, DeskError>(report)
        })
        .await
    }

    /// Load the server's seed file into an empty database.
    pub async fn init_batches(&self) -> Result<Maintenance, DeskError> {
        self.maintenance("init", ChangeOrigin::Init, self.api.init()).await
    }

    /// Refresh every batch's uploaded-files state from the file store.
    pub async fn sync_files(&self) -> Result<Maintenance, DeskError> {
        self.maintenance("sync-files", ChangeOrigin::SyncFiles, self.api.sync_files()).await
    }

    /// Create a batch for every stored mask file that has none.
    pub async fn auto_create(&self) -> Result<Maintenance, DeskError> {
        self.maintenance("auto-create", ChangeOrigin::AutoCreate, self.api.auto_create()).await
    }

    async fn maintenance<Fut>(
        &self,
        operation: &'static str,
        origin: ChangeOrigin,
        call: Fut,
    ) -> Result<Maintenance, DeskError>
    where
        Fut: Future<Output = Result<Maintenance, ApiError>>,
    {
        self.guarded(operation, async {
            let report = call.await?;
            self.refetch(operation).await;
            self.changed(origin);
            let message = report
                .message
                .clone()
                .unwrap_or_else(|| format!("{} finished: {} batches", operation, report.affected));
            self.notify(&message, Severity::Success);
            tracing::info!(operation, affected = report.affected, "maintenance finished");
            Ok::<_, DeskError>(report)
        })
        .await
    }

    /// Mask files held by the server, grouped by batch.
    pub async fn check_files(&self) -> Result<FileCheck, DeskError> {
        self.unguarded("check-files", async {
            let check = self.api.check_files().await?;
            let message = check
                .message
                .clone()
                .unwrap_or_else(|| format!("{} files found", check.total_files));
            self.notify(&message, Severity::Success);
            Ok::<_, DeskError>(check)
        })
        .await
    }

    /// Expected batch ids the server does not have yet.
    pub async fn missing(&self) -> Result<MissingBatches, DeskError> {
        self.unguarded("missing", async {
            let missing = self.api.missing().await?;
            let message = match missing.ids.len() {
                0 => "No missing batches".to_string(),
                n => format!("{} batches missing", n),
            };
            self.notify(&message, Severity::Success);
            Ok::<_, DeskError>(missing)
        })
        .await
    }

    pub async fn export(&self) -> Result<Export, DeskError> {
        self.unguarded("export", async {
            let export = self.api.export().await?;
            self.notify(&format!("Exported {}", export.filename), Severity::Success);
            Ok::<_, DeskError>(export)
        })
        .await
    }

    pub async fn stats(&self) -> Result<BatchStats, DeskError> {
        self.unguarded("stats", async { Ok::<_, DeskError>(self.api.stats().await?) }).await
    }

    pub async fn roster(&self) -> Result<Vec<String>, DeskError> {
        self.unguarded("roster", async { Ok::<_, DeskError>(self.api.roster().await?) }).await
    }

    /// Roster names with per-member counts over the cached batches.
    pub async fn member_stats(&self) -> Result<Vec<TeamMember>, DeskError> {
        let names = self.roster().await?;
        Ok(self.cache.member_stats(&names))
    }

    /// Dashboard metrics over the cached batches.
    pub fn tally(&self) -> StatusTally {
        self.cache.tally()
    }

    pub async fn add_member(&self, member: NewMember) -> Result<(), DeskError> {
        self.check_member_name(&member.name)?;

        self.guarded("add-member", async {
            let message = self.api.add_member(&member).await?;
            let message = message.unwrap_or_else(|| format!("{} added", member.name));
            self.notify(&message, Severity::Success);
            tracing::info!(name = %member.name, role = %member.role, "member added");
            Ok::<_, DeskError>(())
        })
        .await
    }

    pub async fn remove_member(&self, name: &str) -> Result<(), DeskError> {
        self.check_member_name(name)?;

        self.guarded("remove-member", async {
            let message = self.api.remove_member(name).await?;
            let message = message.unwrap_or_else(|| format!("{} removed", name));
            self.notify(&message, Severity::Success);
            tracing::info!(name, "member removed");
            Ok::<_, DeskError>(())
        })
        .await
    }
}

/// A staged overlay edit that rolls back unless committed.
struct StagedEdit<'a> {
    cache: &'a BatchCache,
    id: &'a str,
    field: BatchField,
    armed: bool,
}

impl<'a> StagedEdit<'a> {
    /// `None` when the id is not cached.
    fn stage(cache: &'a BatchCache, id: &'a str, mutation: BatchMutation) -> Option<Self> {
        let field = mutation.field();
        cache
            .stage(id, mutation)
            .then_some(Self { cache, id, field, armed: true })
    }

    fn commit(mut self) -> Reconciled {
        self.armed = false;
        self.cache.commit(self.id, self.field)
    }
}

impl Drop for StagedEdit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.rollback(self.id, self.field);
            tracing::debug!(id = self.id, field = %self.field, "staged edit rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchStatus;

    #[test]
    fn staged_edit_rolls_back_on_drop() {
        let cache = BatchCache::new();
        cache.replace(vec![Batch::new("B1")]);
        {
            let edit = StagedEdit::stage(&cache, "B1", BatchMutation::SetStatus(BatchStatus::Done));
            assert!(edit.is_some());
            assert_eq!(cache.displayed("B1").unwrap().status, BatchStatus::Done);
        }
        assert_eq!(cache.displayed("B1").unwrap().status, BatchStatus::NotStarted);
        assert!(!cache.has_staged("B1", BatchField::Status));
    }

    #[test]
    fn committed_edit_survives_drop() {
        let cache = BatchCache::new();
        cache.replace(vec![Batch::new("B1")]);
        let edit = StagedEdit::stage(&cache, "B1", BatchMutation::SetFolder("/a".into())).unwrap();
        assert_eq!(edit.commit(), Reconciled::Applied);
        assert_eq!(cache.find("B1").unwrap().folder.as_deref(), Some("/a"));
    }

    #[test]
    fn staging_unknown_id_is_none() {
        let cache = BatchCache::new();
        assert!(StagedEdit::stage(&cache, "x", BatchMutation::SetComments("c".into())).is_none());
    }
}
