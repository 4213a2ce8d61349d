use chrono::{TimeZone, Utc};
use eventline_types::{
    ChangeCursor, EventId, FieldValue, Record, RecordAdapter, RecordError, RecordId,
    RecordResult, SyncEvent, ZoneId,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn events_zone() -> ZoneId {
    ZoneId::new("Events")
}

#[derive(Debug, Clone, PartialEq)]
struct TaskCompleted {
    id: EventId,
    task: String,
    minutes: i64,
}

impl SyncEvent for TaskCompleted {
    const TYPE_ID: &'static str = "TaskCompleted";

    fn event_id(&self) -> EventId {
        self.id
    }

    fn write_fields(&self, record: &mut dyn RecordAdapter) -> RecordResult<()> {
        record.set_field("task", self.task.clone().into());
        record.set_field("minutes", self.minutes.into());
        Ok(())
    }

    fn read_fields(record: &dyn RecordAdapter) -> RecordResult<Self> {
        Ok(Self {
            id: EventId::parse(record.record_name())?,
            task: record.string("task")?.to_string(),
            minutes: record.int("minutes")?,
        })
    }
}

// ── Zone and record ids ──────────────────────────────────────────

#[test]
fn zone_id_display() {
    assert_eq!(events_zone().to_string(), "Events");
    assert_eq!(events_zone().name(), "Events");
}

#[test]
fn record_id_display_includes_zone() {
    let id = RecordId::new("abc", events_zone());
    assert_eq!(id.to_string(), "Events/abc");
}

// ── RecordAdapter accessors ──────────────────────────────────────

#[test]
fn typed_accessors_read_matching_fields() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let record = Record::new("Backup", RecordId::new("r1", events_zone()))
        .with_field("name", "groceries")
        .with_field("count", 3i64)
        .with_field("ratio", 0.5f64)
        .with_field("blob", vec![1u8, 2, 3])
        .with_field("when", at)
        .with_field("file", PathBuf::from("/tmp/backup.sqlite"))
        .with_field("tags", vec!["a".to_string(), "b".to_string()]);

    assert_eq!(record.string("name").unwrap(), "groceries");
    assert_eq!(record.int("count").unwrap(), 3);
    assert_eq!(record.double("ratio").unwrap(), 0.5);
    assert_eq!(record.bytes("blob").unwrap(), &[1, 2, 3]);
    assert_eq!(record.timestamp("when").unwrap(), at);
    assert_eq!(
        record.asset("file").unwrap(),
        PathBuf::from("/tmp/backup.sqlite").as_path()
    );
    assert_eq!(record.string_list("tags").unwrap().len(), 2);
}

#[test]
fn double_accepts_int_fields() {
    let record = Record::new("T", RecordId::new("r", events_zone())).with_field("n", 4i64);
    assert_eq!(record.double("n").unwrap(), 4.0);
}

#[test]
fn missing_field_is_reported() {
    let record = Record::new("T", RecordId::new("r", events_zone()));
    match record.string("nope") {
        Err(RecordError::MissingField(f)) => assert_eq!(f, "nope"),
        other => panic!("expected MissingField, got {other:?}"),
    }
}

#[test]
fn wrong_type_names_both_types() {
    let record = Record::new("T", RecordId::new("r", events_zone())).with_field("n", 4i64);
    match record.string("n") {
        Err(RecordError::WrongType {
            field,
            expected,
            actual,
        }) => {
            assert_eq!(field, "n");
            assert_eq!(expected, "string");
            assert_eq!(actual, "int");
        }
        other => panic!("expected WrongType, got {other:?}"),
    }
}

#[test]
fn json_fields_are_stored_as_strings() {
    let mut record = Record::new("T", RecordId::new("r", events_zone()));
    record
        .set_json("payload", &serde_json::json!({"k": [1, 2]}))
        .unwrap();

    assert!(matches!(record.field("payload"), Some(FieldValue::String(_))));
    assert_eq!(record.json("payload").unwrap()["k"][1], 2);
}

#[test]
fn remove_field_returns_previous_value() {
    let mut record = Record::new("T", RecordId::new("r", events_zone())).with_field("a", "x");
    assert_eq!(record.remove_field("a"), Some(FieldValue::from("x")));
    assert!(record.field("a").is_none());
}

// ── SyncEvent through the adapter ────────────────────────────────

#[test]
fn event_encodes_and_decodes_through_adapter() {
    let event = TaskCompleted {
        id: EventId::new(),
        task: "water plants".into(),
        minutes: 5,
    };
    let mut record = Record::new(
        TaskCompleted::TYPE_ID,
        RecordId::new(event.event_id().to_string(), events_zone()),
    );
    event.write_fields(&mut record).unwrap();

    assert_eq!(record.record_type(), "TaskCompleted");
    assert_eq!(TaskCompleted::read_fields(&record).unwrap(), event);
}

#[test]
fn record_serde_keeps_field_types() {
    let record = Record::new("T", RecordId::new("r", events_zone()))
        .with_field("bytes", vec![9u8])
        .with_field("n", 1i64);
    let json = serde_json::to_string(&record).unwrap();
    let parsed: Record = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, record);
    assert!(json.contains("\"type\":\"bytes\""));
}

// ── ChangeCursor ─────────────────────────────────────────────────

#[test]
fn cursor_debug_hides_long_tokens() {
    let short = ChangeCursor::from("7");
    assert_eq!(format!("{short:?}"), "ChangeCursor(\"7\")");

    let long = ChangeCursor::new(vec![0xffu8; 64]);
    assert_eq!(format!("{long:?}"), "ChangeCursor(64 bytes)");
}

#[test]
fn cursor_text_access() {
    let cursor = ChangeCursor::from("token-1".to_string());
    assert_eq!(cursor.as_str(), Some("token-1"));
    assert_eq!(cursor.clone().into_bytes(), b"token-1".to_vec());
    assert_eq!(cursor.as_bytes(), b"token-1");
}
