//! # folio-sync
//!
//! Local-first annotation reconciliation for folio.
//!
//! This crate provides:
//! - [`merge`]: the pure reconciliation of a local and a remote annotation set
//! - [`AnnotationReconciler`]: per-document debounced pushes with at most one
//!   push in flight, mount-time fetch/merge/write-back and teardown flush
//! - Local stores (in-memory, JSON files) and an HTTP remote client
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use folio_core::StaticAuth;
//! use folio_sync::{AnnotationReconciler, HttpAnnotationClient, MemoryAnnotationStore, SyncConfig};
//!
//! let remote = Arc::new(HttpAnnotationClient::from_env()?);
//! let reconciler = AnnotationReconciler::new(
//!     Arc::new(MemoryAnnotationStore::new()),
//!     remote.clone(),
//!     remote,
//!     SyncConfig::from_env(),
//! );
//!
//! let annotations = reconciler.load("book-42").await?;
//! reconciler.upsert("book-42", record).await?;
//!
//! // On shutdown
//! reconciler.teardown().await;
//! ```

pub mod config;
pub mod events;
pub mod http;
pub mod merge;
pub mod mock;
pub mod reconciler;
pub mod store;

// Re-export core types
pub use folio_core::*;

pub use config::SyncConfig;
pub use events::SyncEvent;
pub use http::HttpAnnotationClient;
pub use merge::merge;
pub use reconciler::{AnnotationReconciler, SyncPhase, TeardownReport};
pub use store::{FileAnnotationStore, MemoryAnnotationStore};
