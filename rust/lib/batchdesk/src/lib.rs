//! Batchdesk: coordination core for a batch-tracking dashboard client.
//!
//! The view renders; the `Desk` owns everything else for one session:
//!
//! - **Busy gate**: at most one user-triggered mutation in flight.
//! - **Gateway**: `BatchApi`, one async call per backend capability, with
//!   failures normalized into `ApiError`.
//! - **Cache**: the last-fetched batches, reconciled in place after each
//!   confirmed mutation, with an overlay for optimistic inline edits.
//! - **Broadcaster**: in-process fan-out of "batches changed" events.
//! - **Notifications**: one visible status message, latest wins.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use batchdesk::{Desk, DeskConfig, BatchMutation, BatchStatus};
//!
//! let config = DeskConfig::default();
//! let toast = Arc::new(config.toast());
//! let desk = Desk::from_config(&config, toast.clone());
//!
//! desk.subscribe_changes(|ev| println!("changed by {:?} at {}", ev.origin, ev.at));
//! desk.sync(desk.first_page()).await?;
//! desk.edit("B1", BatchMutation::SetStatus(BatchStatus::Done)).await?;
//! ```

pub mod api;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod desk;
pub mod error;
pub mod gate;
pub mod http;
pub mod model;
pub mod notify;
pub mod retry;
pub mod upload;

// Re-export primary types at crate root.
pub use api::{
    ApiError, BatchApi, BatchPage, BatchStats, Created, Export, FileCheck, Maintenance, MissingBatches,
    NewMember, PageRequest, Pagination,
};
pub use broadcast::{BatchesChanged, Broadcaster, ChangeBroadcaster, ChangeOrigin, SubscriptionId};
pub use cache::{BatchCache, CacheEvent, DuplicateId, Reconciled};
pub use config::{ConfigError, DeskConfig};
pub use desk::Desk;
pub use error::DeskError;
pub use gate::{BusyGate, BusyGuard};
pub use http::HttpBatchApi;
pub use model::{
    Batch, BatchField, BatchMetadata, BatchMutation, BatchStatus, DeleteFilter, NewBatch, StatusTally,
    TeamMember, UploadMode,
};
pub use notify::{Notification, NotificationSink, Severity, Toast};
pub use retry::RetryPolicy;
pub use upload::{parse_upload, CONFIRM_PHRASE};
