//! Push payload decoding
//!
//! Turns the opaque bytes delivered by the platform's VoIP push capability
//! into an [`IncomingCallEvent`]. Decoding is a pure function of its inputs:
//! it never touches the session store and never reads the clock, which is why
//! the receive instant is passed in by the caller.
//!
//! # Payload format
//!
//! A JSON object carrying a call-type marker plus the call fields, either at
//! the top level or nested under `items`:
//!
//! ```json
//! {
//!   "notification_type": "incomingCall",
//!   "items": {
//!     "call_id": "7f1c4c9e-2f0e-4bb4-9a57-1c3d6f0e8a11",
//!     "peer_caller_id_name": "Alice",
//!     "video": false
//!   }
//! }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use chrono::Utc;
//! use voip_push_bridge::push::decode;
//!
//! let raw = br#"{"type":"incoming_call","callId":"abc","callerDisplayName":"Alice","hasVideo":false}"#;
//! let event = decode(raw, Utc::now()).unwrap();
//! assert_eq!(event.call_id().as_str(), "abc");
//! assert_eq!(event.caller_display_name(), "Alice");
//! assert!(!event.has_video());
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

const MAX_CALL_ID_LEN: usize = 128;

const MARKER_FIELDS: &[&str] = &["notification_type", "type"];
const INCOMING_CALL_MARKERS: &[&str] = &["incomingCall", "incoming_call"];
const CALL_ID_FIELDS: &[&str] = &["call_id", "callId", "call_uuid", "callUUID"];
const DISPLAY_NAME_FIELDS: &[&str] = &["caller_display_name", "callerDisplayName", "peer_caller_id_name"];
const VIDEO_FIELDS: &[&str] = &["has_video", "hasVideo", "video"];

/// Identifier scoping one call's lifetime
///
/// Assigned by the push payload or the native call UI, never generated
/// locally. UUID-shaped values are canonicalised to lowercase so that the
/// uppercase UUIDs reported by native call UIs match the push payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallId(String);

impl CallId {
    /// Validate and normalise a raw call identifier
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DecodeError::malformed("call id is empty"));
        }
        if trimmed.len() > MAX_CALL_ID_LEN {
            return Err(DecodeError::malformed(format!(
                "call id exceeds {} bytes",
                MAX_CALL_ID_LEN
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(DecodeError::malformed("call id contains control characters"));
        }

        match uuid::Uuid::parse_str(trimmed) {
            Ok(uuid) => Ok(Self(uuid.hyphenated().to_string())),
            Err(_) => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CallId {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CallId> for String {
    fn from(id: CallId) -> Self {
        id.0
    }
}

/// A decoded incoming-call push
///
/// Immutable once decoded; fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingCallEvent {
    call_id: CallId,
    caller_display_name: String,
    has_video: bool,
    received_at: DateTime<Utc>,
}

impl IncomingCallEvent {
    pub fn new(
        call_id: CallId,
        caller_display_name: impl Into<String>,
        has_video: bool,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            caller_display_name: caller_display_name.into(),
            has_video,
            received_at,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn caller_display_name(&self) -> &str {
        &self.caller_display_name
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Decode a raw push payload into an [`IncomingCallEvent`]
///
/// Checks run in a fixed order: the bytes must be a JSON object
/// ([`DecodeError::Malformed`] otherwise), the object must carry a recognised
/// incoming-call marker ([`DecodeError::Unsupported`] otherwise), and the call
/// id and caller display name must be present and valid
/// ([`DecodeError::Malformed`] otherwise).
pub fn decode(raw: &[u8], received_at: DateTime<Utc>) -> Result<IncomingCallEvent, DecodeError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| DecodeError::malformed(format!("payload is not valid JSON: {}", e)))?;

    let root = value
        .as_object()
        .ok_or_else(|| DecodeError::malformed("payload is not a JSON object"))?;

    check_marker(root)?;

    let items = match root.get("items") {
        Some(Value::Object(items)) => Some(items),
        Some(_) => return Err(DecodeError::malformed("`items` is not an object")),
        None => None,
    };

    let call_id = match lookup(root, items, CALL_ID_FIELDS) {
        Some(Value::String(raw_id)) => CallId::parse(raw_id)?,
        Some(_) => return Err(DecodeError::malformed("call id is not a string")),
        None => return Err(DecodeError::malformed("missing call id")),
    };

    let caller_display_name = match lookup(root, items, DISPLAY_NAME_FIELDS) {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(Value::String(_)) => {
            return Err(DecodeError::malformed("caller display name is empty"))
        }
        Some(_) => return Err(DecodeError::malformed("caller display name is not a string")),
        None => return Err(DecodeError::malformed("missing caller display name")),
    };

    let has_video = match lookup(root, items, VIDEO_FIELDS) {
        Some(Value::Bool(video)) => *video,
        Some(Value::Null) | None => false,
        Some(_) => return Err(DecodeError::malformed("video flag is not a boolean")),
    };

    Ok(IncomingCallEvent {
        call_id,
        caller_display_name,
        has_video,
        received_at,
    })
}

fn check_marker(root: &Map<String, Value>) -> Result<(), DecodeError> {
    let marker = MARKER_FIELDS.iter().find_map(|field| root.get(*field));
    match marker {
        Some(Value::String(kind)) if INCOMING_CALL_MARKERS.contains(&kind.as_str()) => Ok(()),
        Some(Value::String(kind)) => Err(DecodeError::unsupported(Some(kind.as_str()))),
        _ => Err(DecodeError::unsupported(None)),
    }
}

/// Top-level fields win over nested `items` fields
fn lookup<'a>(
    root: &'a Map<String, Value>,
    items: Option<&'a Map<String, Value>>,
    names: &[&str],
) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| root.get(*name))
        .or_else(|| items.and_then(|items| names.iter().find_map(|name| items.get(*name))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_flat_payload() {
        let raw = br#"{"type":"incoming_call","callId":"abc","callerDisplayName":"Alice","hasVideo":false}"#;
        let event = decode(raw, at()).unwrap();
        assert_eq!(event.call_id().as_str(), "abc");
        assert_eq!(event.caller_display_name(), "Alice");
        assert!(!event.has_video());
        assert_eq!(event.received_at(), at());
    }

    #[test]
    fn test_decode_nested_items_payload() {
        let raw = br#"{
            "notification_type": "incomingCall",
            "items": {
                "call_id": "7F1C4C9E-2F0E-4BB4-9A57-1C3D6F0E8A11",
                "peer_caller_id_name": "  Bob  ",
                "video": true
            }
        }"#;
        let event = decode(raw, at()).unwrap();
        assert_eq!(event.call_id().as_str(), "7f1c4c9e-2f0e-4bb4-9a57-1c3d6f0e8a11");
        assert_eq!(event.caller_display_name(), "Bob");
        assert!(event.has_video());
    }

    #[test]
    fn test_missing_call_id_is_malformed() {
        let raw = br#"{"type":"incoming_call","callerDisplayName":"Alice"}"#;
        assert_eq!(decode(raw, at()), Err(DecodeError::malformed("missing call id")));
    }

    #[test]
    fn test_non_string_call_id_is_malformed() {
        let raw = br#"{"type":"incoming_call","callId":42,"callerDisplayName":"Alice"}"#;
        assert!(matches!(decode(raw, at()), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_missing_display_name_is_malformed() {
        let raw = br#"{"type":"incoming_call","callId":"abc"}"#;
        assert_eq!(
            decode(raw, at()),
            Err(DecodeError::malformed("missing caller display name"))
        );
    }

    #[test]
    fn test_blank_display_name_is_malformed() {
        let raw = br#"{"type":"incoming_call","callId":"abc","callerDisplayName":"   "}"#;
        assert!(matches!(decode(raw, at()), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_marker_checked_before_items_shape() {
        let raw = br#"{"type":"chatMessage","items":["hello"]}"#;
        let err = decode(raw, at()).unwrap_err();
        assert_eq!(err, DecodeError::unsupported(Some("chatMessage")));
        assert!(err.is_ignorable());

        let raw = br#"{"type":"incomingCall","items":["hello"]}"#;
        assert_eq!(
            decode(raw, at()),
            Err(DecodeError::malformed("`items` is not an object"))
        );
    }

    #[test]
    fn test_missing_marker_is_unsupported() {
        let raw = br#"{"callId":"abc","callerDisplayName":"Alice"}"#;
        let err = decode(raw, at()).unwrap_err();
        assert_eq!(err, DecodeError::unsupported(None));
        assert!(err.is_ignorable());
    }

    #[test]
    fn test_other_push_type_is_unsupported() {
        let raw = br#"{"notification_type":"voicemailReceived","items":{}}"#;
        assert_eq!(
            decode(raw, at()),
            Err(DecodeError::unsupported(Some("voicemailReceived")))
        );
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(matches!(decode(b"\x00\x01binary", at()), Err(DecodeError::Malformed { .. })));
        assert!(matches!(decode(b"[1,2,3]", at()), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_call_id_validation() {
        assert!(CallId::parse("").is_err());
        assert!(CallId::parse("   ").is_err());
        assert!(CallId::parse("a\nb").is_err());
        assert!(CallId::parse(&"x".repeat(129)).is_err());
        assert_eq!(CallId::parse("  abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_call_id_uuid_case_folding() {
        let upper = CallId::parse("7F1C4C9E-2F0E-4BB4-9A57-1C3D6F0E8A11").unwrap();
        let lower = CallId::parse("7f1c4c9e-2f0e-4bb4-9a57-1c3d6f0e8a11").unwrap();
        assert_eq!(upper, lower);
    }

    proptest! {
        #[test]
        fn prop_decode_is_deterministic(
            id in "[a-zA-Z0-9-]{1,64}",
            name in "[a-zA-Z ]{0,32}[a-zA-Z]",
            video in any::<bool>(),
            secs in 0i64..4_000_000_000,
        ) {
            let payload = serde_json::json!({
                "type": "incoming_call",
                "callId": id,
                "callerDisplayName": name,
                "hasVideo": video,
            });
            let raw = serde_json::to_vec(&payload).unwrap();
            let received_at = Utc.timestamp_opt(secs, 0).unwrap();

            let first = decode(&raw, received_at);
            let second = decode(&raw, received_at);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_decode_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&raw, Utc::now());
        }
    }
}
