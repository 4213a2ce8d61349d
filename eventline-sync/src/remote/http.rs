//! Record store client for a JSON record web API.
//!
//! Requests are POSTed to
//! `{api_base_url}/database/1/{container}/{environment}/{database}/{operation}`
//! with operations `zones/modify`, `records/modify`, `records/query`,
//! `changes/zone` and `subscriptions/modify`. Field values travel as
//! `{ "value": ..., "type": ... }` pairs; bytes and assets are base64.
//! Assets received from the server are written into `asset_cache_dir` and
//! surfaced as local paths.

use super::store::{RecordQuery, RecordStore, Subscription, ZoneChanges};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use eventline_types::{ChangeCursor, FieldValue, Record, RecordId, ZoneId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// HTTP record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStoreConfig {
    /// Base URL of the record API.
    pub api_base_url: String,
    /// Container identifier.
    pub container: String,
    /// Environment name (e.g. `development`, `production`).
    pub environment: String,
    /// Database scope (e.g. `private`).
    pub database: String,
    /// API token sent as the `api_token` query parameter.
    pub api_token: Option<String>,
    /// Where downloaded assets are materialized.
    pub asset_cache_dir: PathBuf,
    /// Default timeout for every request (seconds).
    pub request_timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            container: "eventline".to_string(),
            environment: "development".to_string(),
            database: "private".to_string(),
            api_token: None,
            asset_cache_dir: std::env::temp_dir().join("eventline-assets"),
            request_timeout_secs: 60,
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireZoneId {
    zone_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireField {
    value: Value,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTimestamp {
    timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    record_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record_type: Option<String>,
    #[serde(rename = "zoneID", default, skip_serializing_if = "Option::is_none")]
    zone_id: Option<WireZoneId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, WireField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record_change_tag: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default, skip_serializing)]
    server_error_code: Option<String>,
    #[serde(default, skip_serializing)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<WireRecord>,
    #[serde(rename = "continuationMarker", default)]
    continuation_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireZoneChanges {
    #[serde(default)]
    records: Vec<WireRecord>,
    #[serde(default)]
    sync_token: Option<String>,
    #[serde(default)]
    more_coming: bool,
    #[serde(default)]
    server_error_code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZoneChangesResponse {
    zones: Vec<WireZoneChanges>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    server_error_code: Option<String>,
    reason: Option<String>,
}

fn server_error(code: &str, reason: Option<String>) -> SyncError {
    let reason = reason.unwrap_or_default();
    match code {
        "CHANGE_TOKEN_EXPIRED" => SyncError::ChangeTokenExpired,
        "ZONE_NOT_FOUND" => SyncError::ZoneNotFound(reason),
        "NOT_FOUND" => SyncError::NotFound(reason),
        _ => SyncError::Server {
            code: code.to_string(),
            reason,
        },
    }
}

/// File name for a downloaded asset. Both parts come from the server, so
/// anything but ASCII letters, digits, `-` and `_` is replaced and the
/// result can never leave the cache directory.
fn asset_file_name(record_name: &str, key: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    format!("{}-{}", clean(record_name), clean(key))
}

/// HTTP implementation of [`RecordStore`].
pub struct HttpRecordStore {
    config: HttpStoreConfig,
    client: Client,
}

impl HttpRecordStore {
    /// Creates a new client.
    pub fn new(config: HttpStoreConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/database/1/{}/{}/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.container,
            self.config.environment,
            self.config.database,
            operation
        )
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        body: Value,
    ) -> SyncResult<T> {
        let mut request = self.client.post(self.endpoint(operation)).json(&body);
        if let Some(token) = &self.config.api_token {
            request = request.query(&[("api_token", token.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout
            } else {
                SyncError::Network(format!("{operation} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(ErrorBody {
                server_error_code: Some(code),
                reason,
            }) = serde_json::from_str::<ErrorBody>(&text)
            {
                return Err(server_error(&code, reason));
            }
            return Err(SyncError::Server {
                code: status.as_u16().to_string(),
                reason: text,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("failed to parse {operation} response: {e}")))
    }

    async fn encode_field(value: &FieldValue) -> SyncResult<WireField> {
        let (value, kind) = match value {
            FieldValue::String(s) => (json!(s), "STRING"),
            FieldValue::Int(v) => (json!(v), "INT64"),
            FieldValue::Double(v) => (json!(v), "DOUBLE"),
            FieldValue::Bytes(b) => (json!(BASE64.encode(b)), "BYTES"),
            FieldValue::Timestamp(t) => (json!(t.timestamp_millis()), "TIMESTAMP"),
            FieldValue::Asset(path) => {
                let data = fs::read(path).await?;
                (json!(BASE64.encode(data)), "ASSET")
            }
            FieldValue::StringList(v) => (json!(v), "STRING_LIST"),
        };
        Ok(WireField {
            value,
            kind: kind.to_string(),
        })
    }

    async fn encode_record(record: &Record) -> SyncResult<WireRecord> {
        let mut fields = BTreeMap::new();
        for (key, value) in &record.fields {
            fields.insert(key.clone(), Self::encode_field(value).await?);
        }
        Ok(WireRecord {
            record_name: record.id.name.clone(),
            record_type: Some(record.record_type.clone()),
            zone_id: Some(WireZoneId {
                zone_name: record.id.zone.name().to_string(),
            }),
            fields,
            record_change_tag: record.change_tag.clone(),
            ..Default::default()
        })
    }

    async fn decode_field(
        &self,
        record_name: &str,
        key: &str,
        field: WireField,
    ) -> SyncResult<FieldValue> {
        let bad = |what: &str| SyncError::Server {
            code: "BAD_FIELD".to_string(),
            reason: format!("{record_name}.{key}: {what}"),
        };
        let decode_base64 = |v: &Value| -> SyncResult<Vec<u8>> {
            let s = v.as_str().ok_or_else(|| bad("expected base64 string"))?;
            BASE64.decode(s).map_err(|e| bad(&e.to_string()))
        };

        Ok(match field.kind.as_str() {
            "STRING" => FieldValue::String(
                field.value.as_str().ok_or_else(|| bad("expected string"))?.to_string(),
            ),
            "INT64" => FieldValue::Int(field.value.as_i64().ok_or_else(|| bad("expected int"))?),
            "DOUBLE" => {
                FieldValue::Double(field.value.as_f64().ok_or_else(|| bad("expected double"))?)
            }
            "BYTES" => FieldValue::Bytes(decode_base64(&field.value)?),
            "TIMESTAMP" => {
                let millis = field.value.as_i64().ok_or_else(|| bad("expected millis"))?;
                FieldValue::Timestamp(
                    DateTime::<Utc>::from_timestamp_millis(millis)
                        .ok_or_else(|| bad("timestamp out of range"))?,
                )
            }
            "ASSET" => {
                let data = decode_base64(&field.value)?;
                fs::create_dir_all(&self.config.asset_cache_dir).await?;
                let path = self
                    .config
                    .asset_cache_dir
                    .join(asset_file_name(record_name, key));
                fs::write(&path, data).await?;
                FieldValue::Asset(path)
            }
            "STRING_LIST" => FieldValue::StringList(serde_json::from_value(field.value)?),
            other => return Err(bad(&format!("unknown field type {other}"))),
        })
    }

    async fn decode_record(&self, zone: &ZoneId, wire: WireRecord) -> SyncResult<Record> {
        if let Some(code) = wire.server_error_code {
            return Err(server_error(&code, wire.reason));
        }
        let zone = wire
            .zone_id
            .map(|z| ZoneId::new(z.zone_name))
            .unwrap_or_else(|| zone.clone());
        let mut record = Record::new(
            wire.record_type.unwrap_or_default(),
            RecordId::new(wire.record_name.clone(), zone),
        );
        for (key, field) in wire.fields {
            let value = self.decode_field(&wire.record_name, &key, field).await?;
            record.fields.insert(key, value);
        }
        record.created_at = wire
            .created
            .and_then(|c| DateTime::<Utc>::from_timestamp_millis(c.timestamp));
        record.change_tag = wire.record_change_tag;
        Ok(record)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    fn provider_name(&self) -> &'static str {
        "HTTP record API"
    }

    async fn create_zones(&self, zones: &[ZoneId]) -> SyncResult<()> {
        let operations: Vec<Value> = zones
            .iter()
            .map(|z| {
                json!({
                    "operationType": "create",
                    "zone": { "zoneID": { "zoneName": z.name() } }
                })
            })
            .collect();

        let response: Value = self
            .post("zones/modify", json!({ "operations": operations }))
            .await?;

        if let Some(results) = response["zones"].as_array() {
            for zone in results {
                if let Some(code) = zone["serverErrorCode"].as_str() {
                    // Creating an existing zone is fine.
                    if code != "ZONE_ALREADY_EXISTS" {
                        return Err(server_error(
                            code,
                            zone["reason"].as_str().map(str::to_string),
                        ));
                    }
                }
            }
        }
        info!("Ensured {} zones", zones.len());
        Ok(())
    }

    async fn save(&self, record: Record) -> SyncResult<Record> {
        let wire = Self::encode_record(&record).await?;
        debug!("Saving record {}", record.id);

        let response: RecordsResponse = self
            .post(
                "records/modify",
                json!({
                    "operations": [{ "operationType": "forceReplace", "record": wire }]
                }),
            )
            .await?;

        let saved = response
            .records
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Network("empty save response".to_string()))?;
        let mut committed = self.decode_record(record.zone(), saved).await?;
        // Assets echo back as server references; keep the local paths.
        for (key, value) in &record.fields {
            if matches!(value, FieldValue::Asset(_)) {
                committed.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(committed)
    }

    async fn delete(&self, ids: &[RecordId]) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let operations: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "operationType": "forceDelete",
                    "record": {
                        "recordName": id.name,
                        "zoneID": { "zoneName": id.zone.name() }
                    }
                })
            })
            .collect();

        let response: RecordsResponse = self
            .post("records/modify", json!({ "operations": operations }))
            .await?;

        for record in response.records {
            if let Some(code) = record.server_error_code {
                if code != "NOT_FOUND" {
                    return Err(server_error(&code, record.reason));
                }
            }
        }
        info!("Deleted {} records", ids.len());
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> SyncResult<Vec<Record>> {
        let mut filter_by = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            let field = Self::encode_field(&filter.value).await?;
            filter_by.push(json!({
                "fieldName": filter.field,
                "comparator": "EQUALS",
                "fieldValue": field,
            }));
        }
        let sort_by: Vec<Value> = query
            .sort
            .iter()
            .map(|s| json!({ "fieldName": s.field, "ascending": s.ascending }))
            .collect();

        let mut results = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut body = json!({
                "zoneID": { "zoneName": query.zone.name() },
                "query": {
                    "recordType": query.record_type,
                    "filterBy": filter_by,
                    "sortBy": sort_by,
                }
            });
            if let Some(m) = &marker {
                body["continuationMarker"] = json!(m);
            }

            let response: RecordsResponse = self.post("records/query", body).await?;
            for wire in response.records {
                results.push(self.decode_record(&query.zone, wire).await?);
            }

            marker = response.continuation_marker;
            if marker.is_none() {
                break;
            }
        }

        Ok(results)
    }

    async fn fetch_zone_changes(
        &self,
        zone: &ZoneId,
        cursor: Option<&ChangeCursor>,
        max_results: usize,
    ) -> SyncResult<ZoneChanges> {
        let mut token = match cursor {
            Some(c) => Some(
                c.as_str()
                    .ok_or(SyncError::ChangeTokenExpired)?
                    .to_string(),
            ),
            None => None,
        };

        let mut records = Vec::new();
        let mut deleted = Vec::new();

        loop {
            let mut request = json!({ "zoneID": { "zoneName": zone.name() } });
            if let Some(t) = &token {
                request["syncToken"] = json!(t);
            }
            if max_results > 0 {
                request["resultsLimit"] = json!(max_results);
            }

            let response: ZoneChangesResponse = self
                .post("changes/zone", json!({ "zones": [request] }))
                .await?;
            let changes = response
                .zones
                .into_iter()
                .next()
                .ok_or_else(|| SyncError::Network("empty changes response".to_string()))?;

            if let Some(code) = changes.server_error_code {
                return Err(server_error(&code, changes.reason));
            }

            for wire in changes.records {
                if wire.deleted {
                    deleted.push(RecordId::new(wire.record_name, zone.clone()));
                } else {
                    records.push(self.decode_record(zone, wire).await?);
                }
            }

            let next = changes
                .sync_token
                .ok_or_else(|| {
                    SyncError::Network("changes response without sync token".to_string())
                })?;
            token = Some(next.clone());

            // A bounded request returns after one page; unbounded follows pages.
            if !changes.more_coming || max_results > 0 {
                debug!("Fetched {} changes from zone {}", records.len(), zone);
                return Ok(ZoneChanges {
                    records,
                    deleted,
                    cursor: ChangeCursor::from(next),
                    more_coming: changes.more_coming,
                });
            }
        }
    }

    async fn save_subscription(&self, subscription: &Subscription) -> SyncResult<String> {
        let response: Value = self
            .post(
                "subscriptions/modify",
                json!({
                    "operations": [{
                        "operationType": "create",
                        "subscription": {
                            "subscriptionID": subscription.id,
                            "subscriptionType": "zone",
                            "zoneID": { "zoneName": subscription.zone.name() },
                        }
                    }]
                }),
            )
            .await?;

        let result = &response["subscriptions"][0];
        if let Some(code) = result["serverErrorCode"].as_str() {
            return Err(server_error(code, result["reason"].as_str().map(str::to_string)));
        }
        Ok(result["subscriptionID"]
            .as_str()
            .unwrap_or(&subscription.id)
            .to_string())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> SyncResult<()> {
        let response: Value = match self
            .post(
                "subscriptions/modify",
                json!({
                    "operations": [{
                        "operationType": "delete",
                        "subscription": { "subscriptionID": subscription_id }
                    }]
                }),
            )
            .await
        {
            Ok(response) => response,
            Err(SyncError::NotFound(_)) => {
                warn!("Subscription {} already gone", subscription_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let result = &response["subscriptions"][0];
        if let Some(code) = result["serverErrorCode"].as_str() {
            if code == "NOT_FOUND" {
                warn!("Subscription {} already gone", subscription_id);
                return Ok(());
            }
            return Err(server_error(code, result["reason"].as_str().map(str::to_string)));
        }
        Ok(())
    }
}
