//! API gateway contract: one async call per backend capability.
//!
//! Every call yields `Ok(payload)` or an [`ApiError`] saying why it failed.
//! Implementations never touch the cache or the view.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Batch, BatchMutation, DeleteFilter, NewBatch, UploadMode};

/// Filename used when an export response carries no `Content-Disposition`.
pub const DEFAULT_EXPORT_FILENAME: &str = "batches_export.json";

// ── Error ───────────────────────────────────────────────────────────

/// Gateway-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response was received.
    #[error("network: {0}")]
    Network(String),

    /// A response arrived and reports failure (non-2xx, or `success: false`).
    #[error("HTTP {status}: {reason}")]
    Server { status: u16, reason: String },

    /// A response arrived but does not have the expected shape.
    #[error("decode: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// `page` / `per_page` query for `GET /batches`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page: page.max(1), per_page: per_page.max(1) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 50 }
    }
}

/// `POST /add-segmentador` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub email: String,
}

impl NewMember {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: "Segmentador".to_string(),
            email: String::new(),
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub total_pages: u32,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

/// One page of batches. `pagination` is `None` for the legacy bare-array shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPage {
    pub records: Vec<Batch>,
    pub pagination: Option<Pagination>,
}

/// Result of `POST /batches`. The server may or may not echo the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Created {
    pub record: Option<Batch>,
    pub message: Option<String>,
}

/// `stats` object of `GET /batches/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: u64,
    pub unassigned: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BatchStats {
    pub fn assigned(&self) -> u64 {
        self.total.saturating_sub(self.unassigned)
    }
}

/// Outcome of a server-side maintenance run: file sync, auto-create,
/// initial load or reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Maintenance {
    /// Batches touched (updated, created, loaded or deleted). Zero when the
    /// server does not say.
    pub affected: u64,
    pub message: Option<String>,
    /// Per-batch detail rows, passed through as sent.
    pub results: Vec<Value>,
}

/// `GET /check-mongo-files`: mask files stored on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCheck {
    pub total_files: u64,
    /// Batch id to the file names that mention it.
    #[serde(default)]
    pub batch_patterns: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /missing-batches`: expected batch ids not yet in the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingBatches {
    #[serde(rename = "missing_batches", alias = "missing")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_existing: Option<u64>,
}

/// Raw export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub filename: String,
    pub bytes: Vec<u8>,
}

// ── BatchApi ────────────────────────────────────────────────────────

/// The backend surface used by a [`Desk`](crate::Desk).
#[async_trait::async_trait]
pub trait BatchApi: Send + Sync + 'static {
    /// `GET /batches?page&per_page`.
    async fn list(&self, page: PageRequest) -> Result<BatchPage, ApiError>;

    /// `POST /batches`.
    async fn create(&self, batch: &NewBatch) -> Result<Created, ApiError>;

    /// `PUT /batches/{id}` with a single-field body.
    async fn update(&self, id: &str, mutation: &BatchMutation) -> Result<(), ApiError>;

    /// `DELETE /batches/{id}`.
    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// `POST /batches/delete-by-filter`. Returns `deleted_count`.
    async fn delete_by_filter(&self, filter: &DeleteFilter) -> Result<u64, ApiError>;

    /// `POST /batches/upload`. Returns `inserted_count`.
    async fn upload(&self, batches: &[Value], mode: UploadMode) -> Result<u64, ApiError>;

    /// `GET /batches/export`.
    async fn export(&self) -> Result<Export, ApiError>;

    /// `GET /batches/stats`.
    async fn stats(&self) -> Result<BatchStats, ApiError>;

    /// `GET /segmentadores`.
    async fn roster(&self) -> Result<Vec<String>, ApiError>;

    /// `POST /add-segmentador`. Returns the server's message, if any.
    async fn add_member(&self, member: &NewMember) -> Result<Option<String>, ApiError>;

    /// `DELETE /delete-segmentador`. Returns the server's message, if any.
    async fn remove_member(&self, name: &str) -> Result<Option<String>, ApiError>;

    /// `POST /reset-batches`: wipe every batch and reload the server's seed file.
    async fn reset(&self) -> Result<Maintenance, ApiError>;

    /// `POST /init-batches`: load the seed file into an empty database.
    async fn init(&self) -> Result<Maintenance, ApiError>;

    /// `POST /sync-batch-files`: refresh each batch's uploaded-files state.
    async fn sync_files(&self) -> Result<Maintenance, ApiError>;

    /// `POST /auto-create-batches`: create batches for orphan mask files.
    async fn auto_create(&self) -> Result<Maintenance, ApiError>;

    /// `GET /check-mongo-files`.
    async fn check_files(&self) -> Result<FileCheck, ApiError>;

    /// `GET /missing-batches`.
    async fn missing(&self) -> Result<MissingBatches, ApiError>;
}

// ── Body decoding ───────────────────────────────────────────────────
//
// Shared by every transport so shape validation is identical whether the
// JSON came off the wire or out of a test fixture.

#[derive(Deserialize)]
struct PagedBody {
    #[serde(alias = "batches")]
    records: Vec<Batch>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

/// Decode either `{records|batches, pagination}` or a bare array.
///
/// A body of the right shape with a bad record reports that record's
/// decode error.
pub fn decode_page(body: Value) -> Result<BatchPage, ApiError> {
    let malformed = |e: serde_json::Error| ApiError::Malformed(format!("batch list: {}", e));
    if body.is_array() {
        let records = serde_json::from_value(body).map_err(malformed)?;
        return Ok(BatchPage { records, pagination: None });
    }
    if body.get("records").is_some() || body.get("batches").is_some() {
        let paged: PagedBody = serde_json::from_value(body).map_err(malformed)?;
        return Ok(BatchPage { records: paged.records, pagination: paged.pagination });
    }
    Err(ApiError::Malformed(
        "batch list is neither a paginated object nor an array".into(),
    ))
}

/// Turn a 2xx body with `success: false` into [`ApiError::Server`].
pub fn reject_unsuccessful(status: u16, body: &Value) -> Result<(), ApiError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(ApiError::Server { status, reason: failure_reason(body, "") });
    }
    Ok(())
}

/// Best human-readable reason in an error body: `error`, then `message`,
/// then the raw text.
pub fn failure_reason(body: &Value, raw: &str) -> String {
    ["error", "message"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            let raw = raw.trim();
            if raw.is_empty() { "request failed".to_string() } else { raw.to_string() }
        })
}

/// Read an unsigned counter such as `inserted_count`.
pub fn decode_count(body: &Value, key: &str) -> Result<u64, ApiError> {
    body.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::Malformed(format!("missing '{}'", key)))
}

/// Decode the `stats` object of a stats response.
pub fn decode_stats(body: &Value) -> Result<BatchStats, ApiError> {
    let stats = body
        .get("stats")
        .cloned()
        .ok_or_else(|| ApiError::Malformed("missing 'stats'".into()))?;
    serde_json::from_value(stats).map_err(|e| ApiError::Malformed(format!("stats: {}", e)))
}

/// Decode the create response; `batch` is optional.
pub fn decode_created(body: &Value) -> Result<Created, ApiError> {
    let record = match body.get("batch") {
        Some(v) if !v.is_null() => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| ApiError::Malformed(format!("created batch: {}", e)))?,
        ),
        _ => None,
    };
    Ok(Created {
        record,
        message: body.get("message").and_then(Value::as_str).map(str::to_string),
    })
}

/// Decode `{segmentadores: [names]}`.
pub fn decode_roster(body: &Value) -> Result<Vec<String>, ApiError> {
    let names = body
        .get("segmentadores")
        .cloned()
        .ok_or_else(|| ApiError::Malformed("missing 'segmentadores'".into()))?;
    serde_json::from_value(names).map_err(|e| ApiError::Malformed(format!("roster: {}", e)))
}

/// Decode a maintenance response. The count is read from the first of
/// `count_keys` present.
pub fn decode_maintenance(body: &Value, count_keys: &[&str]) -> Maintenance {
    Maintenance {
        affected: count_keys
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_u64))
            .unwrap_or(0),
        message: body.get("message").and_then(Value::as_str).map(str::to_string),
        results: body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

/// Decode a whole response body into `T`, ignoring envelope keys.
pub fn decode_body<T: DeserializeOwned>(body: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Malformed(format!("{}: {}", what, e)))
}

/// Extract the filename hint from a `Content-Disposition` header value.
pub fn export_filename(content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(|h| {
            let idx = h.find("filename=")?;
            let rest = &h[idx + "filename=".len()..];
            let name = match rest.strip_prefix('"') {
                Some(quoted) => &quoted[..quoted.rfind('"')?],
                None => rest.split(';').next().unwrap_or("").trim(),
            };
            (!name.is_empty()).then(|| name.to_string())
        })
        .unwrap_or_else(|| DEFAULT_EXPORT_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================================================
    // List shapes
    // ========================================================================

    #[test]
    fn decode_paginated_records() {
        let page = decode_page(json!({
            "records": [{"id": "B1", "status": "NS"}],
            "pagination": {"page": 2, "total_pages": 5, "total": 201}
        }))
        .unwrap();
        assert_eq!(page.records.len(), 1);
        let p = page.pagination.unwrap();
        assert_eq!((p.page, p.total_pages, p.total), (2, 5, 201));
    }

    #[test]
    fn decode_paginated_batches_alias() {
        let page = decode_page(json!({
            "batches": [{"id": "B1"}, {"id": "B2"}],
            "pagination": {"page": 1, "per_page": 50, "total": 2, "total_pages": 1}
        }))
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.pagination.unwrap().per_page, Some(50));
    }

    #[test]
    fn decode_legacy_bare_array() {
        let page = decode_page(json!([{"id": "B1"}, {"id": "B2"}, {"id": "B3"}])).unwrap();
        assert_eq!(page.records.len(), 3);
        assert!(page.pagination.is_none());
    }

    #[test]
    fn decode_page_rejects_other_shapes() {
        assert!(matches!(
            decode_page(json!({"error": "No DB connection"})),
            Err(ApiError::Malformed(_))
        ));
        assert!(matches!(decode_page(json!("nope")), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn decode_page_keeps_record_error() {
        let err = decode_page(json!({"records": [{"id": "B1"}, {"status": "NS"}]})).unwrap_err();
        match err {
            ApiError::Malformed(reason) => assert!(reason.contains("missing field `id`"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }

        let err = decode_page(json!([{"id": 7}])).unwrap_err();
        assert!(matches!(err, ApiError::Malformed(ref r) if r.starts_with("batch list: ")), "{:?}", err);
    }

    // ========================================================================
    // Envelopes
    // ========================================================================

    #[test]
    fn success_false_is_server_rejection() {
        let err = reject_unsuccessful(200, &json!({"success": false, "error": "duplicate id"}))
            .unwrap_err();
        assert_eq!(err, ApiError::Server { status: 200, reason: "duplicate id".into() });
        assert!(reject_unsuccessful(200, &json!({"success": true})).is_ok());
        assert!(reject_unsuccessful(200, &json!({"ok": 1})).is_ok());
    }

    #[test]
    fn failure_reason_fallbacks() {
        assert_eq!(failure_reason(&json!({"message": "nope"}), "raw"), "nope");
        assert_eq!(failure_reason(&Value::Null, " raw body "), "raw body");
        assert_eq!(failure_reason(&Value::Null, ""), "request failed");
    }

    #[test]
    fn counts_and_stats() {
        assert_eq!(decode_count(&json!({"inserted_count": 12}), "inserted_count").unwrap(), 12);
        assert!(decode_count(&json!({}), "deleted_count").is_err());

        let stats = decode_stats(&json!({
            "success": true,
            "stats": {"total": 10, "unassigned": 3, "by_status": {"S": 4}}
        }))
        .unwrap();
        assert_eq!(stats.assigned(), 7);
        assert!(stats.extra.contains_key("by_status"));
        assert!(decode_stats(&json!({"success": true})).is_err());
    }

    #[test]
    fn created_record_is_optional() {
        let c = decode_created(&json!({"success": true, "batch": {"id": "batch_9"}})).unwrap();
        assert_eq!(c.record.unwrap().id, "batch_9");
        let c = decode_created(&json!({"success": true, "message": "ok"})).unwrap();
        assert!(c.record.is_none());
        assert_eq!(c.message.as_deref(), Some("ok"));
    }

    #[test]
    fn roster_decoding() {
        let names = decode_roster(&json!({"success": true, "segmentadores": ["ana", "luis"]}))
            .unwrap();
        assert_eq!(names, vec!["ana", "luis"]);
        assert!(decode_roster(&json!({"success": true})).is_err());
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    #[test]
    fn maintenance_count_first_known_key() {
        let m = decode_maintenance(
            &json!({
                "success": true,
                "created_batches": 2,
                "message": "2 created",
                "results": [{"batch_id": "batch_9", "created": true}]
            }),
            &["created_batches", "created"],
        );
        assert_eq!(m.affected, 2);
        assert_eq!(m.message.as_deref(), Some("2 created"));
        assert_eq!(m.results.len(), 1);

        let m = decode_maintenance(&json!({"success": true, "message": "reset"}), &["deleted"]);
        assert_eq!(m.affected, 0);
        assert!(m.results.is_empty());
    }

    #[test]
    fn missing_and_file_check_bodies() {
        let missing: MissingBatches = decode_body(
            json!({"success": true, "missing_batches": ["batch_9"], "total_missing": 1, "total_existing": 40}),
            "missing batches",
        )
        .unwrap();
        assert_eq!(missing.ids, vec!["batch_9"]);
        assert_eq!(missing.total_existing, Some(40));

        let legacy: MissingBatches = decode_body(json!({"missing": []}), "missing batches").unwrap();
        assert!(legacy.ids.is_empty());

        let check: FileCheck = decode_body(
            json!({"success": true, "total_files": 3, "batch_patterns": {"batch_12": ["masks_batch_12.zip"]}}),
            "file check",
        )
        .unwrap();
        assert_eq!(check.total_files, 3);
        assert_eq!(check.batch_patterns["batch_12"], vec!["masks_batch_12.zip"]);

        assert!(decode_body::<FileCheck>(json!({"success": true}), "file check").is_err());
    }

    // ========================================================================
    // Export filename
    // ========================================================================

    #[test]
    fn export_filename_from_header() {
        assert_eq!(
            export_filename(Some("attachment; filename=\"batches_2025-01-01.json\"")),
            "batches_2025-01-01.json"
        );
        assert_eq!(export_filename(Some("attachment; filename=dump.json; size=3")), "dump.json");
    }

    #[test]
    fn export_filename_defaults() {
        assert_eq!(export_filename(None), DEFAULT_EXPORT_FILENAME);
        assert_eq!(export_filename(Some("attachment")), DEFAULT_EXPORT_FILENAME);
        assert_eq!(export_filename(Some("attachment; filename=\"\"")), DEFAULT_EXPORT_FILENAME);
    }
}
