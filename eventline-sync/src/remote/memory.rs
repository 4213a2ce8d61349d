//! In-process record store.
//!
//! Clones share the same state, so several engines built on clones of one
//! `MemoryRecordStore` behave like several devices talking to one remote
//! store. Cursors are per-zone change sequence numbers; tests can expire
//! them, add latency, take the store offline or make it reject saves.

use super::store::{RecordQuery, RecordStore, Subscription, ZoneChanges};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use eventline_types::{ChangeCursor, FieldValue, Record, RecordId, ZoneId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct ZoneState {
    /// Live records by name, with the sequence number of their last change.
    records: HashMap<String, (u64, Record)>,
    /// Deleted record names with the sequence number of the deletion.
    tombstones: HashMap<String, u64>,
    /// Last assigned sequence number.
    head: u64,
    /// Cursors below this sequence number are rejected as expired.
    oldest_valid: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    zones: HashMap<ZoneId, ZoneState>,
    subscriptions: HashMap<String, Subscription>,
    offline: bool,
    failing_saves: usize,
    rejected_saves: usize,
    latency: Option<Duration>,
    last_created_at: Option<DateTime<Utc>>,
    save_count: usize,
}

/// In-memory implementation of [`RecordStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryRecordStore {
    /// Creates an empty store with no zones.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given zones already present.
    pub fn with_zones(zones: &[ZoneId]) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for zone in zones {
                state.zones.entry(zone.clone()).or_default();
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every call fail with a network error until turned back on.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Makes the next `count` saves fail with a network error.
    pub fn fail_next_saves(&self, count: usize) {
        self.lock().failing_saves = count;
    }

    /// Makes the store reject the next `count` saves as invalid.
    pub fn reject_next_saves(&self, count: usize) {
        self.lock().rejected_saves = count;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Rejects every cursor of `zone` issued before the current head.
    pub fn expire_cursors(&self, zone: &ZoneId) {
        let mut state = self.lock();
        if let Some(z) = state.zones.get_mut(zone) {
            z.oldest_valid = z.head;
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Every live record in `zone`, in change order.
    pub fn records(&self, zone: &ZoneId) -> Vec<Record> {
        let state = self.lock();
        let mut records: Vec<(u64, Record)> = state
            .zones
            .get(zone)
            .map(|z| z.records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, r)| r).collect()
    }

    /// Registered subscriptions.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.values().cloned().collect()
    }

    async fn enter(&self) -> SyncResult<()> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.lock().offline {
            return Err(SyncError::Network("remote store unreachable".to_string()));
        }
        Ok(())
    }

    fn parse_cursor(cursor: &ChangeCursor) -> SyncResult<u64> {
        cursor
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or(SyncError::ChangeTokenExpired)
    }
}

fn compare_fields(a: Option<&FieldValue>, b: Option<&FieldValue>) -> Ordering {
    match (a, b) {
        (Some(FieldValue::Int(x)), Some(FieldValue::Int(y))) => x.cmp(y),
        (Some(FieldValue::Double(x)), Some(FieldValue::Double(y))) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Some(FieldValue::Timestamp(x)), Some(FieldValue::Timestamp(y))) => x.cmp(y),
        (Some(FieldValue::String(x)), Some(FieldValue::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn provider_name(&self) -> &'static str {
        "In-memory"
    }

    async fn create_zones(&self, zones: &[ZoneId]) -> SyncResult<()> {
        self.enter().await?;
        let mut state = self.lock();
        for zone in zones {
            state.zones.entry(zone.clone()).or_default();
        }
        Ok(())
    }

    async fn save(&self, mut record: Record) -> SyncResult<Record> {
        self.enter().await?;
        let mut state = self.lock();

        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(SyncError::Network("injected save failure".to_string()));
        }
        if state.rejected_saves > 0 {
            state.rejected_saves -= 1;
            return Err(SyncError::Server {
                code: "INVALID_ARGUMENTS".to_string(),
                reason: format!("record {} rejected", record.id),
            });
        }

        // Creation times are strictly increasing so newest-first ordering is
        // unambiguous even for saves within the same millisecond.
        let mut now = Utc::now();
        if let Some(last) = state.last_created_at {
            if now <= last {
                now = last + ChronoDuration::milliseconds(1);
            }
        }

        let zone = state
            .zones
            .get_mut(&record.id.zone)
            .ok_or_else(|| SyncError::ZoneNotFound(record.id.zone.to_string()))?;

        zone.head += 1;
        let seq = zone.head;
        let previous = zone.records.get(&record.id.name).map(|(_, r)| r.created_at);
        record.created_at = previous.flatten().or(Some(now));
        record.change_tag = Some(seq.to_string());
        zone.tombstones.remove(&record.id.name);
        zone.records
            .insert(record.id.name.clone(), (seq, record.clone()));

        if previous.is_none() {
            state.last_created_at = Some(now);
        }
        state.save_count += 1;
        debug!("Saved record {} (seq {})", record.id, seq);
        Ok(record)
    }

    async fn delete(&self, ids: &[RecordId]) -> SyncResult<()> {
        self.enter().await?;
        let mut state = self.lock();
        for id in ids {
            let Some(zone) = state.zones.get_mut(&id.zone) else {
                return Err(SyncError::ZoneNotFound(id.zone.to_string()));
            };
            if zone.records.remove(&id.name).is_some() {
                zone.head += 1;
                zone.tombstones.insert(id.name.clone(), zone.head);
            }
        }
        debug!("Deleted {} records", ids.len());
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> SyncResult<Vec<Record>> {
        self.enter().await?;
        let state = self.lock();
        let zone = state
            .zones
            .get(&query.zone)
            .ok_or_else(|| SyncError::ZoneNotFound(query.zone.to_string()))?;

        let mut results: Vec<Record> = zone
            .records
            .values()
            .map(|(_, r)| r)
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            for key in &query.sort {
                let ord = compare_fields(a.fields.get(&key.field), b.fields.get(&key.field));
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        Ok(results)
    }

    async fn fetch_zone_changes(
        &self,
        zone: &ZoneId,
        cursor: Option<&ChangeCursor>,
        max_results: usize,
    ) -> SyncResult<ZoneChanges> {
        self.enter().await?;
        let state = self.lock();
        let z = state
            .zones
            .get(zone)
            .ok_or_else(|| SyncError::ZoneNotFound(zone.to_string()))?;

        let since = match cursor {
            Some(c) => {
                let seq = Self::parse_cursor(c)?;
                if seq < z.oldest_valid || seq > z.head {
                    return Err(SyncError::ChangeTokenExpired);
                }
                seq
            }
            None => 0,
        };

        enum Change<'a> {
            Saved(&'a Record),
            Deleted(&'a str),
        }

        let mut changes: Vec<(u64, Change<'_>)> = z
            .records
            .values()
            .filter(|(seq, _)| *seq > since)
            .map(|(seq, r)| (*seq, Change::Saved(r)))
            .chain(
                z.tombstones
                    .iter()
                    .filter(|(_, seq)| **seq > since)
                    .map(|(name, seq)| (*seq, Change::Deleted(name.as_str()))),
            )
            .collect();
        changes.sort_by_key(|(seq, _)| *seq);

        let more_coming = max_results > 0 && changes.len() > max_results;
        if more_coming {
            changes.truncate(max_results);
        }
        let next = if more_coming {
            changes.last().map(|(seq, _)| *seq).unwrap_or(since)
        } else {
            z.head
        };

        let mut records = Vec::new();
        let mut deleted = Vec::new();
        for (_, change) in changes {
            match change {
                Change::Saved(r) => records.push(r.clone()),
                Change::Deleted(name) => deleted.push(RecordId::new(name, zone.clone())),
            }
        }

        Ok(ZoneChanges {
            records,
            deleted,
            cursor: ChangeCursor::from(next.to_string()),
            more_coming,
        })
    }

    async fn save_subscription(&self, subscription: &Subscription) -> SyncResult<String> {
        self.enter().await?;
        let mut state = self.lock();
        if !state.zones.contains_key(&subscription.zone) {
            return Err(SyncError::ZoneNotFound(subscription.zone.to_string()));
        }
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription.id.clone())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> SyncResult<()> {
        self.enter().await?;
        self.lock().subscriptions.remove(subscription_id);
        Ok(())
    }
}
