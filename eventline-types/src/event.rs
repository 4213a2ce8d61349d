//! The capability set every synchronized event type implements.

use crate::{EventId, RecordAdapter, RecordResult};

/// An immutable, serializable record of an action.
///
/// Application event variants implement this trait; the engine is generic
/// over it and never inspects event contents.
///
/// `TYPE_ID` is written to every uploaded record as its record type and is
/// how other devices find the decoder for it. It must stay the same forever
/// for a given variant and must never be reused by another variant, or older
/// and newer builds will stop understanding each other's events.
pub trait SyncEvent: Clone + Send + Sync + 'static {
    /// Permanent type identifier.
    const TYPE_ID: &'static str;

    /// Unique id of this event instance. Used as the record name.
    fn event_id(&self) -> EventId;

    /// Writes this event's fields into a record.
    fn write_fields(&self, record: &mut dyn RecordAdapter) -> RecordResult<()>;

    /// Reconstructs an event from a record's fields.
    fn read_fields(record: &dyn RecordAdapter) -> RecordResult<Self>;
}
