use eventline_types::{ClientId, EventId};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

// ── ClientId ─────────────────────────────────────────────────────

#[test]
fn client_id_unique() {
    assert_ne!(ClientId::new(), ClientId::new());
}

#[test]
fn client_id_display_roundtrip() {
    let id = ClientId::new();
    let parsed: ClientId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn client_id_parse_invalid() {
    assert!(ClientId::parse("not-a-uuid").is_err());
}

#[test]
fn client_id_from_uuid() {
    let uuid = Uuid::new_v4();
    assert_eq!(ClientId::from_uuid(uuid).as_uuid(), uuid);
}

#[test]
fn client_id_serde_is_transparent() {
    let id = ClientId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

// ── EventId ──────────────────────────────────────────────────────

#[test]
fn event_id_unique() {
    let a = EventId::new();
    let b = EventId::new();
    assert_ne!(a, b);
}

#[test]
fn event_id_from_str_invalid() {
    assert!(EventId::from_str("bad").is_err());
}

#[test]
fn event_id_string_order_follows_creation_order() {
    let ids: Vec<EventId> = (0..50).map(|_| EventId::new()).collect();
    let mut names: Vec<String> = ids.iter().map(ToString::to_string).collect();
    let original = names.clone();
    names.sort();
    assert_eq!(names, original);
}

#[test]
fn event_id_hash_eq() {
    let id = EventId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}
