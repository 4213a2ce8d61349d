//! Remote record store abstraction.
//!
//! The engine never talks to a particular service directly; it consumes the
//! capability described by [`RecordStore`]: record save/delete, typed
//! queries, zone-scoped incremental change queries keyed by an opaque
//! cursor, and push subscriptions.

use crate::error::SyncResult;
use async_trait::async_trait;
use eventline_types::{ChangeCursor, FieldValue, Record, RecordId, ZoneId};
use serde::{Deserialize, Serialize};

/// Equality predicate on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub value: FieldValue,
}

/// Sort order on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

/// A record query scoped to one zone and record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub zone: ZoneId,
    pub record_type: String,
    pub filters: Vec<QueryFilter>,
    pub sort: Vec<SortDescriptor>,
}

impl RecordQuery {
    /// Matches every record of `record_type` in `zone`.
    pub fn new(zone: ZoneId, record_type: impl Into<String>) -> Self {
        Self {
            zone,
            record_type: record_type.into(),
            filters: Vec::new(),
            sort: Vec::new(),
        }
    }

    /// Adds an equality filter.
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filters.push(QueryFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a sort key.
    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Returns true if `record` satisfies the zone, type and filters.
    pub fn matches(&self, record: &Record) -> bool {
        record.id.zone == self.zone
            && record.record_type == self.record_type
            && self
                .filters
                .iter()
                .all(|f| record.fields.get(&f.field) == Some(&f.value))
    }
}

/// Result of one incremental change query.
#[derive(Debug, Clone)]
pub struct ZoneChanges {
    /// Records created or modified after the starting cursor.
    pub records: Vec<Record>,
    /// Records deleted after the starting cursor.
    pub deleted: Vec<RecordId>,
    /// Cursor to pass to the next query.
    pub cursor: ChangeCursor,
    /// True if the store truncated the result at `max_results`.
    pub more_coming: bool,
}

/// A zone subscription that makes the store push a notification whenever
/// the zone changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub zone: ZoneId,
}

/// Abstract remote record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the name of the store provider.
    fn provider_name(&self) -> &'static str;

    /// Creates the given zones. Creating an existing zone is not an error.
    async fn create_zones(&self, zones: &[ZoneId]) -> SyncResult<()>;

    /// Saves a record, returning the committed copy with server metadata.
    /// Saving an existing record id replaces it.
    async fn save(&self, record: Record) -> SyncResult<Record>;

    /// Deletes records in one batch.
    async fn delete(&self, ids: &[RecordId]) -> SyncResult<()>;

    /// Runs a query.
    async fn query(&self, query: &RecordQuery) -> SyncResult<Vec<Record>>;

    /// Returns changes in `zone` after `cursor` (from the beginning if
    /// `None`). `max_results == 0` means unbounded.
    ///
    /// Fails with `SyncError::ChangeTokenExpired` if the cursor is no longer
    /// accepted.
    async fn fetch_zone_changes(
        &self,
        zone: &ZoneId,
        cursor: Option<&ChangeCursor>,
        max_results: usize,
    ) -> SyncResult<ZoneChanges>;

    /// Registers a subscription, returning its id.
    async fn save_subscription(&self, subscription: &Subscription) -> SyncResult<String>;

    /// Removes a subscription. Removing an unknown id is not an error.
    async fn delete_subscription(&self, subscription_id: &str) -> SyncResult<()>;
}
