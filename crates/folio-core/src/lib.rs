//! # folio-core
//!
//! Core types, traits, and abstractions for the folio reader.
//!
//! This crate provides the annotation data model, the parse step that turns
//! loosely-shaped remote payloads into canonical records, the collaborator
//! traits the reconciler is written against, and the shared error type.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{AnnotationParseError, Error, Result};
pub use models::*;
pub use rate_limit::ActionRateLimiter;
pub use traits::*;
