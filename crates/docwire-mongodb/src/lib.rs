//! MongoDB operation-layer core for docwire
//!
//! This crate provides the two pieces of a document-database client that sit
//! between command construction and the network.
//!
//! # Features
//! - Batch-oriented async cursors with on-demand getMore, limits and cancellation
//! - Bounded, best-effort server cursor cleanup on dispose and drop
//! - Replacement/update field-name validation selected once per write
//! - Validate-then-encode write requests that never emit partial documents

pub mod batch;
pub mod config;
pub mod cursor;
pub mod transport;
pub mod validation;

pub use batch::{CursorBatch, CursorHandle, CursorReply, Namespace};
pub use config::{CursorOptions, DottedKeyPolicy, FieldNamePolicy};
pub use cursor::{Cursor, CursorState};
pub use docwire_common::{DocwireError, InvalidFieldNameError, Result};
pub use transport::{BatchTransport, CursorSession, MongoTransport};
pub use validation::{
    validate_document, FallbackValidator, FieldNameValidator, ReplacementValidator,
    UpdateValidator, ValidatorSelector, WriteKind, WriteRequest,
};

// Re-exported so callers can build cancellation signals for `Cursor::advance_with`
pub use tokio_util::sync::CancellationToken;
