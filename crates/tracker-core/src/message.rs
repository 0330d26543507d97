//! Hub message model and its JSON wire encoding.
//!
//! Every frame on the viewer socket is one JSON object:
//!
//! ```text
//! { "type": "connected" | "waypoint" | "error" | "ping" | "pong",
//!   "data": <payload, omitted if not applicable>,
//!   "error": <string, only for "error">,
//!   "event_id": <string, optional> }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConnectionId, EventId};
use crate::waypoint::Waypoint;

/// Greeting text carried by the `connected` frame.
pub const CONNECTED_GREETING: &str = "WebSocket connection established";

/// Discriminant of a wire frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Connected,
    Waypoint,
    Error,
    Ping,
    Pong,
}

impl FrameType {
    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "connected" => Some(Self::Connected),
            "waypoint" => Some(Self::Waypoint),
            "error" => Some(Self::Error),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Waypoint => "waypoint",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Untyped frame as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// A message flowing through the hub.
///
/// Messages are immutable once built; the hub shares one instance across all
/// mailboxes of a fan-out.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Sent once to a connection right after it is admitted.
    Connected { connection_id: ConnectionId },
    /// A batch of freshly stored waypoints.
    WaypointBatch {
        event_id: EventId,
        waypoints: Vec<Waypoint>,
    },
    /// Application-level liveness probe from a viewer.
    Ping { event_id: Option<String> },
    /// Reply to [`Message::Ping`], echoing its correlation id.
    Pong { event_id: Option<String> },
    Error { text: String },
}

/// Failure to turn inbound text into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of type '{}' is missing its data payload", .0.as_str())]
    MissingData(FrameType),
    #[error("invalid '{}' payload: {source}", .kind.as_str())]
    InvalidPayload {
        kind: FrameType,
        source: serde_json::Error,
    },
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// Envelope as read from a viewer: every field optional, `type` free-form.
#[derive(Deserialize)]
struct InboundFrame {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Connected {
        client_id: &'a ConnectionId,
        message: &'static str,
    },
    Waypoints {
        waypoints: &'a [Waypoint],
        count: usize,
    },
}

#[derive(Serialize)]
struct FrameRef<'a> {
    #[serde(rename = "type")]
    kind: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<PayloadRef<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ConnectedPayload {
    client_id: String,
}

#[derive(Deserialize)]
struct WaypointPayload {
    waypoints: Vec<Waypoint>,
}

impl Message {
    /// Wrap a batch of stored waypoints under a fresh event id.
    pub fn waypoint_batch(waypoints: Vec<Waypoint>) -> Self {
        Self::WaypointBatch {
            event_id: EventId::new(),
            waypoints,
        }
    }

    pub fn kind(&self) -> FrameType {
        match self {
            Self::Connected { .. } => FrameType::Connected,
            Self::WaypointBatch { .. } => FrameType::Waypoint,
            Self::Ping { .. } => FrameType::Ping,
            Self::Pong { .. } => FrameType::Pong,
            Self::Error { .. } => FrameType::Error,
        }
    }

    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let kind = self.kind();
        let frame = match self {
            Self::Connected { connection_id } => FrameRef {
                kind,
                data: Some(PayloadRef::Connected {
                    client_id: connection_id,
                    message: CONNECTED_GREETING,
                }),
                error: None,
                event_id: None,
            },
            Self::WaypointBatch {
                event_id,
                waypoints,
            } => FrameRef {
                kind,
                data: Some(PayloadRef::Waypoints {
                    waypoints,
                    count: waypoints.len(),
                }),
                error: None,
                event_id: Some(event_id.as_str()),
            },
            Self::Ping { event_id } | Self::Pong { event_id } => FrameRef {
                kind,
                data: None,
                error: None,
                event_id: event_id.as_deref(),
            },
            Self::Error { text } => FrameRef {
                kind,
                data: None,
                error: Some(text),
                event_id: None,
            },
        };
        serde_json::to_string(&frame)
    }

    /// Parse one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let frame: WireFrame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    /// Parse one frame sent by a viewer.
    ///
    /// Only text that is not a JSON object, or whose envelope fields have the
    /// wrong JSON type, is an error. A well-formed object with an absent or
    /// unknown `type`, or an unreadable payload, yields `Ok(None)`.
    pub fn decode_inbound(text: &str) -> Result<Option<Self>, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let inbound: InboundFrame = serde_json::from_value(value)?;
        let Some(kind) = inbound.kind.as_deref().and_then(FrameType::parse) else {
            return Ok(None);
        };
        let frame = WireFrame {
            kind,
            data: inbound.data,
            error: inbound.error,
            event_id: inbound.event_id,
        };
        Ok(Self::from_frame(frame).ok())
    }

    pub fn from_frame(frame: WireFrame) -> Result<Self, DecodeError> {
        let kind = frame.kind;
        match kind {
            FrameType::Ping => Ok(Self::Ping {
                event_id: frame.event_id,
            }),
            FrameType::Pong => Ok(Self::Pong {
                event_id: frame.event_id,
            }),
            FrameType::Error => Ok(Self::Error {
                text: frame.error.unwrap_or_default(),
            }),
            FrameType::Connected => {
                let data = frame.data.ok_or(DecodeError::MissingData(kind))?;
                let payload: ConnectedPayload = serde_json::from_value(data)
                    .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
                Ok(Self::Connected {
                    connection_id: ConnectionId::from_raw(payload.client_id),
                })
            }
            FrameType::Waypoint => {
                let data = frame.data.ok_or(DecodeError::MissingData(kind))?;
                let payload: WaypointPayload = serde_json::from_value(data)
                    .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
                Ok(Self::WaypointBatch {
                    event_id: frame.event_id.map(EventId::from_raw).unwrap_or_default(),
                    waypoints: payload.waypoints,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn waypoint(lat: f32) -> Waypoint {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Waypoint {
            id: Uuid::new_v4(),
            latitude: lat,
            longitude: 12.5,
            speed: 10,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn as_json(msg: &Message) -> Value {
        serde_json::from_str(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn connected_frame_shape() {
        let msg = Message::Connected {
            connection_id: ConnectionId::from_raw("conn_1"),
        };
        let json = as_json(&msg);
        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["client_id"], "conn_1");
        assert_eq!(json["data"]["message"], CONNECTED_GREETING);
        assert!(json.get("error").is_none());
        assert!(json.get("event_id").is_none());
    }

    #[test]
    fn waypoint_frame_carries_count_and_order() {
        let msg = Message::waypoint_batch(vec![waypoint(1.0), waypoint(2.0)]);
        let json = as_json(&msg);
        assert_eq!(json["type"], "waypoint");
        assert_eq!(json["data"]["count"], 2);
        assert_eq!(json["data"]["waypoints"][0]["latitude"], 1.0);
        assert_eq!(json["data"]["waypoints"][1]["latitude"], 2.0);
        assert!(json["event_id"].as_str().unwrap().starts_with("evt_"));
    }

    #[test]
    fn pong_echoes_event_id() {
        let msg = Message::Pong {
            event_id: Some("abc".into()),
        };
        let json = as_json(&msg);
        assert_eq!(json, serde_json::json!({"type": "pong", "event_id": "abc"}));
    }

    #[test]
    fn bare_ping_has_only_type() {
        let json = as_json(&Message::Ping { event_id: None });
        assert_eq!(json, serde_json::json!({"type": "ping"}));
    }

    #[test]
    fn error_frame_uses_error_field() {
        let json = as_json(&Message::Error {
            text: "boom".into(),
        });
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "boom");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn decode_ping() {
        let msg = Message::decode(r#"{"type":"ping","event_id":"e1"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Ping {
                event_id: Some("e1".into())
            }
        );
    }

    #[test]
    fn decode_waypoint_frame_from_encoded() {
        let original = Message::waypoint_batch(vec![waypoint(3.0)]);
        let decoded = Message::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn strict_decode_rejects_unknown_type() {
        let err = Message::decode(r#"{"type":"subscribe"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn inbound_ignores_unknown_or_missing_type() {
        assert_eq!(Message::decode_inbound(r#"{"type":"subscribe"}"#).unwrap(), None);
        assert_eq!(Message::decode_inbound(r#"{"event_id":"x"}"#).unwrap(), None);
        assert_eq!(Message::decode_inbound("{}").unwrap(), None);
    }

    #[test]
    fn inbound_ignores_bad_payload() {
        let bad = r#"{"type":"waypoint","data":{"foo":1}}"#;
        assert_eq!(Message::decode_inbound(bad).unwrap(), None);
        assert_eq!(Message::decode_inbound(r#"{"type":"waypoint"}"#).unwrap(), None);
    }

    #[test]
    fn inbound_ping_keeps_event_id() {
        assert_eq!(
            Message::decode_inbound(r#"{"type":"ping","event_id":"e7","data":[1]}"#).unwrap(),
            Some(Message::Ping {
                event_id: Some("e7".into())
            })
        );
    }

    #[test]
    fn inbound_rejects_non_objects_and_bad_json() {
        assert!(matches!(
            Message::decode_inbound("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Message::decode_inbound("[1,2]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            Message::decode_inbound("42"),
            Err(DecodeError::NotAnObject)
        ));
        // Envelope fields must still be strings.
        assert!(Message::decode_inbound(r#"{"type":7}"#).is_err());
    }

    #[test]
    fn frame_type_parse_matches_as_str() {
        for kind in [
            FrameType::Connected,
            FrameType::Waypoint,
            FrameType::Error,
            FrameType::Ping,
            FrameType::Pong,
        ] {
            assert_eq!(FrameType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FrameType::parse("PING"), None);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode("[1,2]").is_err());
    }

    #[test]
    fn decode_waypoint_without_data() {
        let err = Message::decode(r#"{"type":"waypoint"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingData(FrameType::Waypoint)));
    }

    #[test]
    fn frame_type_strings() {
        assert_eq!(FrameType::Waypoint.as_str(), "waypoint");
        assert_eq!(
            serde_json::to_string(&FrameType::Connected).unwrap(),
            "\"connected\""
        );
    }
}
