//! reqwest-backed [`BatchApi`].
//!
//! ```ignore
//! let api = HttpBatchApi::new("http://localhost:5000/api");
//! let page = api.list(PageRequest::new(1, 50)).await?;
//! ```

use std::future::Future;

use serde_json::Value;

use crate::api::{
    decode_body, decode_count, decode_created, decode_maintenance, decode_page, decode_roster,
    decode_stats, export_filename, failure_reason, reject_unsuccessful, ApiError, BatchApi,
    BatchPage, BatchStats, Created, Export, FileCheck, Maintenance, MissingBatches, NewMember,
    PageRequest,
};
use crate::model::{BatchMutation, DeleteFilter, NewBatch, UploadMode};
use crate::retry::RetryPolicy;

/// HTTP client for the batch backend.
///
/// All paths are relative to `base_url`, which usually ends in `/api`.
pub struct HttpBatchApi {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpBatchApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/batches/{id}` with `id` as one percent-encoded segment, so
    /// `/`, `?` and `#` in an id never change which resource is addressed.
    fn batch_url(&self, id: &str) -> Result<reqwest::Url, ApiError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::Network(format!("invalid base url '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("base url '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push("batches")
            .push(id);
        Ok(url)
    }

    /// `POST` a maintenance action and decode its summary.
    async fn maintain(&self, path: &str, count_keys: &[&str]) -> Result<Maintenance, ApiError> {
        let body = self.send(self.http.post(self.url(path))).await?;
        Ok(decode_maintenance(&body, count_keys))
    }

    /// Send a request and return its JSON body.
    ///
    /// Non-2xx and `success: false` become [`ApiError::Server`]. An empty
    /// 2xx body decodes as `null`; a non-empty, non-JSON 2xx body is
    /// [`ApiError::Malformed`].
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => v,
                Err(_) if !status.is_success() => Value::Null,
                Err(e) => return Err(ApiError::Malformed(format!("response body: {}", e))),
            }
        };

        if !status.is_success() {
            let reason = failure_reason(&body, &text);
            tracing::debug!(status = status.as_u16(), %reason, "request rejected");
            return Err(ApiError::Server { status: status.as_u16(), reason });
        }
        reject_unsuccessful(status.as_u16(), &body)?;
        Ok(body)
    }

    /// Run a read-only call, retrying network failures per policy.
    async fn read<T, F, Fut>(&self, what: &'static str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(ApiError::Network(reason)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(what, attempt, %reason, ?delay, "network failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn fetch_export(&self) -> Result<Export, ApiError> {
        let resp = self.http.get(self.url("/batches/export")).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str(&text).unwrap_or(Value::Null);
            return Err(ApiError::Server {
                status: status.as_u16(),
                reason: failure_reason(&body, &text),
            });
        }
        let filename = export_filename(
            resp.headers()
                .get(reqwest::header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = resp.bytes().await?.to_vec();
        Ok(Export { filename, bytes })
    }
}

#[async_trait::async_trait]
impl BatchApi for HttpBatchApi {
    async fn list(&self, page: PageRequest) -> Result<BatchPage, ApiError> {
        let path = format!("/batches?page={}&per_page={}", page.page, page.per_page);
        let body = self.read("list", || self.get_json(&path)).await?;
        decode_page(body)
    }

    async fn create(&self, batch: &NewBatch) -> Result<Created, ApiError> {
        let body = self.send(self.http.post(self.url("/batches")).json(batch)).await?;
        decode_created(&body)
    }

    async fn update(&self, id: &str, mutation: &BatchMutation) -> Result<(), ApiError> {
        let url = self.batch_url(id)?;
        self.send(self.http.put(url).json(&mutation.to_body())).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let url = self.batch_url(id)?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &DeleteFilter) -> Result<u64, ApiError> {
        let url = self.url("/batches/delete-by-filter");
        let body = self.send(self.http.post(url).json(filter)).await?;
        decode_count(&body, "deleted_count")
    }

    async fn upload(&self, batches: &[Value], mode: UploadMode) -> Result<u64, ApiError> {
        let payload = serde_json::json!({ "batches": batches, "mode": mode.as_str() });
        let body = self.send(self.http.post(self.url("/batches/upload")).json(&payload)).await?;
        decode_count(&body, "inserted_count")
    }

    async fn export(&self) -> Result<Export, ApiError> {
        self.read("export", || self.fetch_export()).await
    }

    async fn stats(&self) -> Result<BatchStats, ApiError> {
        let body = self.read("stats", || self.get_json("/batches/stats")).await?;
        decode_stats(&body)
    }

    async fn roster(&self) -> Result<Vec<String>, ApiError> {
        let body = self.read("roster", || self.get_json("/segmentadores")).await?;
        decode_roster(&body)
    }

    async fn add_member(&self, member: &NewMember) -> Result<Option<String>, ApiError> {
        let body = self.send(self.http.post(self.url("/add-segmentador")).json(member)).await?;
        Ok(body.get("message").and_then(Value::as_str).map(str::to_string))
    }

    async fn remove_member(&self, name: &str) -> Result<Option<String>, ApiError> {
        let payload = serde_json::json!({ "name": name });
        let body = self
            .send(self.http.delete(self.url("/delete-segmentador")).json(&payload))
            .await?;
        Ok(body.get("message").and_then(Value::as_str).map(str::to_string))
    }

    async fn reset(&self) -> Result<Maintenance, ApiError> {
        self.maintain("/reset-batches", &["deleted", "deleted_count"]).await
    }

    async fn init(&self) -> Result<Maintenance, ApiError> {
        self.maintain("/init-batches", &["loaded_count"]).await
    }

    async fn sync_files(&self) -> Result<Maintenance, ApiError> {
        self.maintain("/sync-batch-files", &["batches_updated", "synchronized"]).await
    }

    async fn auto_create(&self) -> Result<Maintenance, ApiError> {
        self.maintain("/auto-create-batches", &["created_batches", "created"]).await
    }

    async fn check_files(&self) -> Result<FileCheck, ApiError> {
        let body = self.read("check-files", || self.get_json("/check-mongo-files")).await?;
        decode_body(body, "file check")
    }

    async fn missing(&self) -> Result<MissingBatches, ApiError> {
        let body = self.read("missing", || self.get_json("/missing-batches")).await?;
        decode_body(body, "missing batches")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let api = HttpBatchApi::new("http://localhost:5000/api/");
        assert_eq!(api.base_url(), "http://localhost:5000/api");
        assert_eq!(api.url("/batches"), "http://localhost:5000/api/batches");
    }

    #[test]
    fn batch_id_is_one_encoded_segment() {
        let api = HttpBatchApi::new("http://localhost:5000/api");
        assert_eq!(api.batch_url("B1").unwrap().as_str(), "http://localhost:5000/api/batches/B1");
        assert_eq!(
            api.batch_url("X#1").unwrap().as_str(),
            "http://localhost:5000/api/batches/X%231"
        );
        assert_eq!(
            api.batch_url("a/b?c").unwrap().as_str(),
            "http://localhost:5000/api/batches/a%2Fb%3Fc"
        );

        let root = HttpBatchApi::new("http://localhost:5000");
        assert_eq!(root.batch_url("B1").unwrap().as_str(), "http://localhost:5000/batches/B1");
    }

    #[test]
    fn unparseable_base_url_fails_without_request() {
        let api = HttpBatchApi::new("not a url");
        assert!(matches!(api.batch_url("B1"), Err(ApiError::Network(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error_after_retries() {
        // Port 9 (discard) on loopback is closed on test hosts.
        let api = HttpBatchApi::new("http://127.0.0.1:9")
            .with_retry(RetryPolicy { max_attempts: 2, base_backoff_ms: 1 });
        let err = api.stats().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)), "got {:?}", err);
    }
}
