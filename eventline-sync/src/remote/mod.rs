//! Remote record store transports.
//!
//! - [`MemoryRecordStore`]: in-process store shared by clones, for tests
//!   and local development
//! - [`HttpRecordStore`]: JSON web API client

pub mod http;
pub mod memory;
pub mod store;

pub use http::{HttpRecordStore, HttpStoreConfig};
pub use memory::MemoryRecordStore;
pub use store::{QueryFilter, RecordQuery, RecordStore, SortDescriptor, Subscription, ZoneChanges};
