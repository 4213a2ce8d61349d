//! Core type definitions for Eventline.
//!
//! This crate defines the types shared by the sync engine and the
//! applications that consume it:
//! - Client and event identifiers (UUID v7)
//! - Remote records, their zones and field values
//! - The opaque change cursor issued by the remote store
//! - The `SyncEvent` capability trait implemented by application events
//!
//! Application event variants live in the application, not here. The engine
//! only ever sees them through `SyncEvent` and the `RecordAdapter` view.

mod cursor;
mod event;
mod ids;
mod record;

pub use cursor::ChangeCursor;
pub use event::SyncEvent;
pub use ids::{ClientId, EventId};
pub use record::{FieldValue, Record, RecordAdapter, RecordId, ZoneId};

/// Result type alias for record encoding and decoding.
pub type RecordResult<T> = std::result::Result<T, RecordError>;

/// Errors raised while reading or writing record fields.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field {field} has type {actual}, expected {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("record type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
