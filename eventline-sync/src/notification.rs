//! Push notification payloads.

use serde_json::Value;

/// Extracts the subscription id a push payload was sent for.
///
/// Looks at `ck.fet.sid` (zone fetch notifications), `ck.qry.sid` (query
/// notifications) and a top-level `subscriptionID`, in that order.
pub fn subscription_id(payload: &Value) -> Option<&str> {
    payload
        .pointer("/ck/fet/sid")
        .or_else(|| payload.pointer("/ck/qry/sid"))
        .or_else(|| payload.get("subscriptionID"))
        .and_then(Value::as_str)
}
