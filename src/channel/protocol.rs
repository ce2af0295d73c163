//! Wire protocol: inbound frame decoding and outbound messages
//!
//! ## Server → Client
//!
//! ```json
//! {"type": "commission_paid", "title": "Payment", "message": "£500 paid",
//!  "data": {"amount": 500}, "timestamp": "2024-01-01T00:00:00Z", "priority": "high"}
//! ```
//!
//! Only `type` is required. A missing `message` decodes as empty, a missing or
//! unrecognized `priority` as medium, and a missing or unparseable
//! `timestamp` as the time the frame was received.
//!
//! ## Client → Server
//!
//! ```json
//! {"type": "ping", "timestamp": "2024-01-01T00:00:30Z"}
//! ```

use crate::core::error::DecodeError;
use crate::core::events::{Event, EventKind, Priority};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat
    Ping { timestamp: DateTime<Utc> },
}

impl ClientMessage {
    pub fn ping() -> Self {
        ClientMessage::Ping {
            timestamp: Utc::now(),
        }
    }
}

/// Inbound frame as it appears on the wire
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Decode a text frame, stamping missing timestamps with the current time
pub fn decode(raw: &str) -> Result<Event, DecodeError> {
    decode_at(raw, Utc::now())
}

/// Decode a binary frame carrying UTF-8 JSON
pub fn decode_bytes(raw: &[u8]) -> Result<Event, DecodeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DecodeError::malformed("binary frame is not valid UTF-8"))?;
    decode(text)
}

/// Decode a text frame received at `received_at`
pub fn decode_at(raw: &str, received_at: DateTime<Utc>) -> Result<Event, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(DecodeError::malformed("frame is not a JSON object"));
    }

    let frame =
        InboundFrame::deserialize(&value).map_err(|e| DecodeError::malformed(e.to_string()))?;

    let kind = EventKind::from_tag(&frame.event_type, &value);
    if kind.is_unknown() {
        tracing::debug!(event_type = %frame.event_type, "Unrecognized event type, classified as unknown");
    }

    let priority = match frame.priority.as_deref() {
        None => Priority::default(),
        Some(p) => Priority::parse(p).unwrap_or_else(|| {
            tracing::debug!(priority = %p, "Unrecognized priority, using medium");
            Priority::default()
        }),
    };

    let timestamp = frame
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    Ok(Event::new(kind, frame.message.unwrap_or_default())
        .with_optional(frame.title, frame.data)
        .with_priority(priority)
        .with_timestamp(timestamp))
}

/// RFC 3339, or a naive ISO-8601 datetime taken as UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(_) => {
            tracing::debug!(timestamp = %value, "Unparseable timestamp, using receive time");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_full_frame() {
        let raw = r#"{"type":"commission_paid","title":"Payment","message":"£500 paid",
                      "data":{"amount":500},"timestamp":"2024-01-01T00:00:00Z","priority":"high"}"#;
        let event = decode_at(raw, received()).unwrap();

        assert_eq!(event.kind(), &EventKind::CommissionPaid);
        assert_eq!(event.title(), Some("Payment"));
        assert_eq!(event.message(), "£500 paid");
        assert_eq!(event.payload_field("amount"), Some(&json!(500)));
        assert_eq!(
            event.timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(event.priority(), Priority::High);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = decode("{invalid json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(decode("42").is_err());
        assert!(decode(r#"["commission_paid"]"#).is_err());
    }

    #[test]
    fn test_missing_or_non_string_type_is_malformed() {
        assert!(decode(r#"{"message":"x"}"#).is_err());
        assert!(decode(r#"{"type":7,"message":"x"}"#).is_err());
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let err = decode(r#"{"type":"commission_paid","message":{"nested":true}}"#).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_MALFORMED");
    }

    #[test]
    fn test_unknown_type_is_classified_not_rejected() {
        let event = decode(r#"{"type":"totally_unknown_tag","message":"x"}"#).unwrap();

        match event.kind() {
            EventKind::Unknown { tag, raw } => {
                assert_eq!(tag, "totally_unknown_tag");
                assert_eq!(raw["message"], "x");
            }
            other => panic!("Expected Unknown, got {:?}", other),
        }
        assert_eq!(event.message(), "x");
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let event = decode_at(r#"{"type":"pong"}"#, received()).unwrap();

        assert_eq!(event.kind(), &EventKind::Pong);
        assert_eq!(event.message(), "");
        assert_eq!(event.priority(), Priority::Medium);
        assert_eq!(event.timestamp(), received());
        assert!(event.title().is_none());
        assert!(event.payload().is_none());
    }

    #[test]
    fn test_unrecognized_priority_falls_back_to_medium() {
        let event = decode(r#"{"type":"deadline_reminder","message":"x","priority":"urgent"}"#)
            .unwrap();
        assert_eq!(event.priority(), Priority::Medium);
    }

    #[test]
    fn test_naive_timestamp_taken_as_utc() {
        let raw = r#"{"type":"client_assigned","message":"x","timestamp":"2024-03-05T10:20:30.123456"}"#;
        let event = decode_at(raw, received()).unwrap();
        assert_eq!(
            event.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-05 10:20:30"
        );
    }

    #[test]
    fn test_garbage_timestamp_uses_receive_time() {
        let raw = r#"{"type":"client_assigned","message":"x","timestamp":"yesterday"}"#;
        let event = decode_at(raw, received()).unwrap();
        assert_eq!(event.timestamp(), received());
    }

    #[test]
    fn test_null_optional_fields() {
        let raw = r#"{"type":"system_announcement","title":null,"message":"hi","data":null}"#;
        let event = decode(raw).unwrap();
        assert!(event.title().is_none());
        assert!(event.payload().is_none());
    }

    #[test]
    fn test_decode_bytes() {
        let event = decode_bytes(br#"{"type":"initial_data","message":"hello"}"#).unwrap();
        assert_eq!(event.kind(), &EventKind::InitialData);

        assert!(decode_bytes(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_ping_serialization() {
        let json = serde_json::to_value(ClientMessage::ping()).unwrap();
        assert_eq!(json["type"], "ping");

        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
