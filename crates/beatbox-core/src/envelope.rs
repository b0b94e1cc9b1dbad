//! Wire envelope codec.
//!
//! Every application message is a JSON object carried in a text frame or a
//! UTF-8 binary frame:
//!
//! ```json
//! {"type": 0, "messageId": "m-1", "name": "test", "data": {"a": 1}}
//! ```
//!
//! `type` 0 is an ACTION (a `messageId` is required), `type` 1 is an EVENT.
//! Decoding validates in a fixed order and stops at the first failure so the
//! reported [`DecodeError`] is deterministic.

use std::fmt;

use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// Kind of an inbound WebSocket frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Close control frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl FrameKind {
    /// RFC 6455 opcode.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Frame kind for an RFC 6455 opcode.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope `type` field.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageType {
    /// `0`: client-invoked action, carries a message id.
    Action,
    /// `1`: fire-and-forget event.
    Event,
    /// Any other value. Decodes successfully; dispatch rejects it.
    Unknown(Value),
}

impl MessageType {
    /// Wire code for the two known types.
    pub const ACTION: u64 = 0;
    /// Wire code for events.
    pub const EVENT: u64 = 1;

    /// Integral floats (`0.0`, `1.0`) count as their integer codes.
    #[allow(clippy::float_cmp)]
    fn from_value(value: Value) -> Self {
        let code = value.as_u64().or_else(|| match value.as_f64() {
            Some(f) if f == 0.0 => Some(Self::ACTION),
            Some(f) if f == 1.0 => Some(Self::EVENT),
            _ => None,
        });
        match code {
            Some(Self::ACTION) => Self::Action,
            Some(Self::EVENT) => Self::Event,
            _ => Self::Unknown(value),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Action => Value::from(Self::ACTION),
            Self::Event => Value::from(Self::EVENT),
            Self::Unknown(v) => v.clone(),
        }
    }
}

/// Decoded application message.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Message type.
    pub kind: MessageType,
    /// Correlation id; always present for actions.
    pub message_id: Option<String>,
    /// Handler name.
    pub name: String,
    /// Handler payload, `null` when absent.
    pub data: Value,
}

impl Envelope {
    /// Build an ACTION envelope.
    pub fn action(message_id: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: MessageType::Action,
            message_id: Some(message_id.into()),
            name: name.into(),
            data,
        }
    }

    /// Build an EVENT envelope.
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: MessageType::Event,
            message_id: None,
            name: name.into(),
            data,
        }
    }
}

/// Decode an inbound frame payload.
///
/// Validation order: frame kind, UTF-8, JSON, object shape, `type` present,
/// `messageId` present for actions, `messageId` is a string, `name` is a string.
/// A `null` `messageId` counts as absent. The legacy key `message_id` is
/// accepted when `messageId` is missing.
pub fn decode(payload: &[u8], kind: FrameKind) -> Result<Envelope, DecodeError> {
    let text = match kind {
        FrameKind::Text | FrameKind::Binary => std::str::from_utf8(payload)?,
        other => return Err(DecodeError::UnsupportedFrameKind(other)),
    };

    let Value::Object(mut obj) = serde_json::from_str::<Value>(text)? else {
        return Err(DecodeError::InvalidFormat);
    };

    let message_type =
        MessageType::from_value(obj.remove("type").ok_or(DecodeError::MissingType)?);

    let message_id = obj
        .remove("messageId")
        .filter(|v| !v.is_null())
        .or_else(|| obj.remove("message_id").filter(|v| !v.is_null()));
    if message_type == MessageType::Action && message_id.is_none() {
        return Err(DecodeError::MissingMessageId);
    }
    let message_id = match message_id {
        None => None,
        Some(Value::String(id)) => Some(id),
        Some(_) => return Err(DecodeError::InvalidMessageId),
    };

    let Some(Value::String(name)) = obj.remove("name") else {
        return Err(DecodeError::MissingName);
    };

    Ok(Envelope {
        kind: message_type,
        message_id,
        name,
        data: obj.remove("data").unwrap_or(Value::Null),
    })
}

/// Encode an envelope to its JSON text form.
pub fn encode(envelope: &Envelope) -> String {
    let mut obj = Map::new();
    let _ = obj.insert("type".into(), envelope.kind.to_value());
    if let Some(id) = &envelope.message_id {
        let _ = obj.insert("messageId".into(), Value::String(id.clone()));
    }
    let _ = obj.insert("name".into(), Value::String(envelope.name.clone()));
    let _ = obj.insert("data".into(), envelope.data.clone());
    Value::Object(obj).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn text(v: &Value) -> Vec<u8> {
        v.to_string().into_bytes()
    }

    #[test]
    fn decodes_action() {
        let raw = text(&json!({"type": 0, "messageId": "m1", "name": "test", "data": {"a": 1}}));
        let env = decode(&raw, FrameKind::Text).unwrap();
        assert_eq!(env.kind, MessageType::Action);
        assert_eq!(env.message_id.as_deref(), Some("m1"));
        assert_eq!(env.name, "test");
        assert_eq!(env.data, json!({"a": 1}));
    }

    #[test]
    fn decodes_event_without_id() {
        let raw = text(&json!({"type": 1, "name": "ping"}));
        let env = decode(&raw, FrameKind::Text).unwrap();
        assert_eq!(env.kind, MessageType::Event);
        assert!(env.message_id.is_none());
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn binary_frames_are_utf8_json() {
        let raw = text(&json!({"type": 1, "name": "ping", "data": [1, 2]}));
        let env = decode(&raw, FrameKind::Binary).unwrap();
        assert_eq!(env.data, json!([1, 2]));
    }

    #[test]
    fn binary_invalid_utf8() {
        assert_matches!(
            decode(&[0xff, 0xfe, 0x00], FrameKind::Binary),
            Err(DecodeError::InvalidUtf8(_))
        );
    }

    #[test]
    fn control_frames_rejected() {
        for kind in [FrameKind::Ping, FrameKind::Pong, FrameKind::Close, FrameKind::Continuation] {
            assert_matches!(
                decode(b"{}", kind),
                Err(DecodeError::UnsupportedFrameKind(k)) if k == kind
            );
        }
    }

    #[test]
    fn invalid_json() {
        assert_matches!(decode(b"{not json", FrameKind::Text), Err(DecodeError::InvalidJson(_)));
    }

    #[test]
    fn non_object_is_invalid_format() {
        for raw in ["null", "42", "\"s\"", "[1,2]", "true"] {
            assert_matches!(
                decode(raw.as_bytes(), FrameKind::Text),
                Err(DecodeError::InvalidFormat)
            );
        }
    }

    #[test]
    fn missing_type() {
        let raw = text(&json!({"name": "x", "messageId": "1"}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingType));
    }

    #[test]
    fn action_without_id() {
        let raw = text(&json!({"type": 0, "name": "x"}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingMessageId));

        let raw = text(&json!({"type": 0, "name": "x", "messageId": null}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingMessageId));
    }

    #[test]
    fn missing_type_checked_before_message_id() {
        // Neither type nor id: type is reported first.
        let raw = text(&json!({"name": "x"}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingType));
    }

    #[test]
    fn message_id_must_be_string() {
        let raw = text(&json!({"type": 0, "name": "x", "messageId": 7}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::InvalidMessageId));
    }

    #[test]
    fn name_must_be_string() {
        let raw = text(&json!({"type": 1}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingName));
        let raw = text(&json!({"type": 1, "name": 3}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingName));
    }

    #[test]
    fn legacy_message_id_key() {
        let raw = text(&json!({"type": 0, "message_id": "old", "name": "x"}));
        let env = decode(&raw, FrameKind::Text).unwrap();
        assert_eq!(env.message_id.as_deref(), Some("old"));
    }

    #[test]
    fn unknown_type_decodes() {
        let raw = text(&json!({"type": "bogus", "name": "x"}));
        let env = decode(&raw, FrameKind::Text).unwrap();
        assert_eq!(env.kind, MessageType::Unknown(json!("bogus")));

        let raw = text(&json!({"type": 5, "name": "x"}));
        let env = decode(&raw, FrameKind::Text).unwrap();
        assert_eq!(env.kind, MessageType::Unknown(json!(5)));
    }

    #[test]
    fn integral_float_types_are_known() {
        let raw = text(&json!({"type": 0.0, "messageId": "m", "name": "x"}));
        assert_eq!(decode(&raw, FrameKind::Text).unwrap().kind, MessageType::Action);

        let raw = text(&json!({"type": 1.0, "name": "x"}));
        assert_eq!(decode(&raw, FrameKind::Text).unwrap().kind, MessageType::Event);

        let raw = text(&json!({"type": 0.0, "name": "x"}));
        assert_matches!(decode(&raw, FrameKind::Text), Err(DecodeError::MissingMessageId));

        let raw = text(&json!({"type": 0.5, "name": "x"}));
        assert_eq!(
            decode(&raw, FrameKind::Text).unwrap().kind,
            MessageType::Unknown(json!(0.5))
        );
    }

    #[test]
    fn encode_shape() {
        let encoded = encode(&Envelope::action("m", "save", json!({"k": true})));
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"type": 0, "messageId": "m", "name": "save", "data": {"k": true}}));

        let encoded = encode(&Envelope::event("tick", Value::Null));
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert!(value.get("messageId").is_none());
    }

    #[test]
    fn opcodes_match_rfc() {
        for kind in [
            FrameKind::Continuation,
            FrameKind::Text,
            FrameKind::Binary,
            FrameKind::Close,
            FrameKind::Ping,
            FrameKind::Pong,
        ] {
            assert_eq!(FrameKind::from_opcode(kind.opcode()), Some(kind));
        }
        assert_eq!(FrameKind::from_opcode(0x3), None);
        assert_eq!(FrameKind::Binary.to_string(), "binary");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_data() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-z0-9 ]{0,12}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        fn arb_envelope() -> impl Strategy<Value = Envelope> {
            prop_oneof![
                ("[a-zA-Z0-9-]{1,16}", "[a-z_]{1,12}", arb_data())
                    .prop_map(|(id, name, data)| Envelope::action(id, name, data)),
                (proptest::option::of("[a-z0-9]{1,8}"), "[a-z_]{1,12}", arb_data()).prop_map(
                    |(id, name, data)| Envelope {
                        message_id: id,
                        ..Envelope::event(name, data)
                    }
                ),
            ]
        }

        proptest! {
            #[test]
            fn decode_inverts_encode(env in arb_envelope()) {
                let encoded = encode(&env);
                prop_assert_eq!(decode(encoded.as_bytes(), FrameKind::Text).unwrap(), env.clone());
                prop_assert_eq!(decode(encoded.as_bytes(), FrameKind::Binary).unwrap(), env);
            }

            #[test]
            fn action_without_id_never_decodes(name in "[a-z]{1,8}", data in arb_data()) {
                let raw = json!({"type": 0, "name": name, "data": data}).to_string();
                prop_assert!(matches!(
                    decode(raw.as_bytes(), FrameKind::Text),
                    Err(DecodeError::MissingMessageId)
                ));
            }

            #[test]
            fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
                let _ = decode(&bytes, FrameKind::Binary);
            }
        }
    }
}
