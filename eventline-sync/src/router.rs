//! Routing of fetched records to typed event streams.
//!
//! The router keeps an explicit table from type identifier to a route that
//! knows how to decode that event type and which broadcast channel to send
//! it on. Records whose type has no route are ignored; records that fail to
//! decode are reported on a separate failure channel instead of being
//! dropped silently.

use crate::error::{SyncError, SyncResult};
use eventline_types::{Record, RecordError, RecordResult, SyncEvent};
use futures::Stream;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A record that matched a route but could not be decoded.
#[derive(Debug, Clone)]
pub struct DecodeFailure {
    pub type_id: String,
    pub record: Record,
    pub error: Arc<RecordError>,
}

trait Route: Send + Sync {
    fn publish(&self, record: &Record) -> RecordResult<()>;

    fn as_any(&self) -> &dyn Any;
}

struct TypedRoute<E: SyncEvent> {
    sender: broadcast::Sender<E>,
}

impl<E: SyncEvent> Route for TypedRoute<E> {
    fn publish(&self, record: &Record) -> RecordResult<()> {
        let event = E::read_fields(record)?;
        // No subscribers is fine.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type id → decoder + channel table.
pub struct EventRouter {
    routes: RwLock<HashMap<&'static str, Box<dyn Route>>>,
    records: broadcast::Sender<Record>,
    failures: broadcast::Sender<DecodeFailure>,
    capacity: usize,
}

impl EventRouter {
    /// Creates a router whose channels buffer `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (records, _) = broadcast::channel(capacity);
        let (failures, _) = broadcast::channel(capacity);
        Self {
            routes: RwLock::new(HashMap::new()),
            records,
            failures,
            capacity,
        }
    }

    /// Subscribes to events of type `E`, registering its route on first use.
    ///
    /// Fails with [`SyncError::DuplicateTypeId`] if another event type is
    /// already registered under `E::TYPE_ID`.
    pub fn subscribe<E: SyncEvent>(&self) -> SyncResult<broadcast::Receiver<E>> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());

        if let Some(route) = routes.get(E::TYPE_ID) {
            return route
                .as_any()
                .downcast_ref::<TypedRoute<E>>()
                .map(|typed| typed.sender.subscribe())
                .ok_or(SyncError::DuplicateTypeId(E::TYPE_ID));
        }

        let (sender, receiver) = broadcast::channel(self.capacity);
        routes.insert(E::TYPE_ID, Box::new(TypedRoute { sender }));
        debug!("Registered event route {}", E::TYPE_ID);
        Ok(receiver)
    }

    /// Returns true if a route exists for `type_id`.
    pub fn is_registered(&self, type_id: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(type_id)
    }

    /// Every published record, decoded or not.
    pub fn records(&self) -> broadcast::Receiver<Record> {
        self.records.subscribe()
    }

    /// Records that failed to decode.
    pub fn decode_failures(&self) -> broadcast::Receiver<DecodeFailure> {
        self.failures.subscribe()
    }

    /// Broadcasts `record` raw, then decodes and broadcasts it on its route.
    pub fn publish(&self, record: &Record) {
        let _ = self.records.send(record.clone());

        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let Some(route) = routes.get(record.record_type.as_str()) else {
            debug!("No route for record type {}, ignoring", record.record_type);
            return;
        };

        if let Err(error) = route.publish(record) {
            warn!("Failed to decode record {}: {}", record.id, error);
            let _ = self.failures.send(DecodeFailure {
                type_id: record.record_type.clone(),
                record: record.clone(),
                error: Arc::new(error),
            });
        }
    }
}

/// Adapts a broadcast receiver into a stream. Lagged items are skipped;
/// the stream ends when the sender is dropped.
pub fn into_stream<T>(receiver: broadcast::Receiver<T>) -> impl Stream<Item = T> + Send
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(item) => return Some((item, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Stream lagged, skipped {} items", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
