//! Line-delimited JSON framing and the wire message schema.
//!
//! A stream is a sequence of UTF-8 JSON objects, one per line. Framing
//! itself (accumulating bytes until `\n`, enforcing the 2048-byte max
//! frame) is the caller's job, typically via a
//! `tokio_util::codec::LinesCodec`; this module only owns turning a decoded
//! line into a typed [`Message`] and back. Shared here, rather than in the
//! server crate, because both the server and the drone agent speak this
//! wire format and neither should depend on the other.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::models::Coord;

/// Oversize frame: the peer sent more than 2048 bytes before a newline.
pub const ERROR_FRAME_TOO_LARGE: u16 = 413;
/// Malformed JSON, unknown message type, or a message not valid in the
/// session's current state.
pub const ERROR_BAD_REQUEST: u16 = 400;

pub const MAX_FRAME_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A location on the map. Wire-identical to [`Coord`].
pub type Location = Coord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub max_speed: f64,
    pub battery_capacity: f64,
    pub payload: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    pub status_update_interval: u64,
    pub heartbeat_interval: u64,
}

/// The drone's self-reported activity. The wire fixes `"busy"`; `"on_mission"`
/// is accepted on read as a synonym from older client builds (see the open
/// question in the design notes) but never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Idle,
    Busy,
}

impl ReportedStatus {
    pub fn is_idle(self) -> bool {
        matches!(self, ReportedStatus::Idle)
    }
}

impl Serialize for ReportedStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            ReportedStatus::Idle => "idle",
            ReportedStatus::Busy => "busy",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for ReportedStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "idle" => Ok(ReportedStatus::Idle),
            "busy" | "on_mission" => Ok(ReportedStatus::Busy),
            other => Err(D::Error::custom(format!("unknown status {other:?}"))),
        }
    }
}

/// The full wire protocol. Tagged on `type` with each variant's literal
/// message-type string, so an unrecognized `type` (or a message shape that
/// doesn't match its variant) falls out of `serde_json` as a decode error,
/// which the session turns into `ERROR code=400`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "HANDSHAKE")]
    Handshake {
        drone_id: String,
        capabilities: Capabilities,
    },
    #[serde(rename = "HANDSHAKE_ACK")]
    HandshakeAck {
        session_id: String,
        config: HandshakeConfig,
    },
    #[serde(rename = "STATUS_UPDATE")]
    StatusUpdate {
        drone_id: String,
        timestamp: DateTime<Utc>,
        location: Location,
        status: ReportedStatus,
        battery: f64,
        speed: f64,
    },
    #[serde(rename = "ASSIGN_MISSION")]
    AssignMission {
        mission_id: u64,
        priority: String,
        target: Location,
        expiry: DateTime<Utc>,
        checksum: String,
    },
    #[serde(rename = "MISSION_COMPLETE")]
    MissionComplete {
        drone_id: String,
        mission_id: u64,
        timestamp: DateTime<Utc>,
        success: bool,
        details: String,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat { timestamp: DateTime<Utc> },
    #[serde(rename = "HEARTBEAT_RESPONSE")]
    HeartbeatResponse {
        drone_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "ERROR")]
    Error {
        code: u16,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Message::Error {
            code,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// A short name for logging, independent of the serde rename.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake { .. } => "HANDSHAKE",
            Message::HandshakeAck { .. } => "HANDSHAKE_ACK",
            Message::StatusUpdate { .. } => "STATUS_UPDATE",
            Message::AssignMission { .. } => "ASSIGN_MISSION",
            Message::MissionComplete { .. } => "MISSION_COMPLETE",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::HeartbeatResponse { .. } => "HEARTBEAT_RESPONSE",
            Message::Error { .. } => "ERROR",
        }
    }
}

/// Encode a message as a single line (including the trailing `\n`).
pub fn encode(msg: &Message) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one already-delimited line (without its trailing `\n`) into a
/// [`Message`]. An unknown `type` or a field-shape mismatch surfaces as
/// [`CodecError::Malformed`].
pub fn decode(line: &str) -> Result<Message, CodecError> {
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let encoded = encode(&msg).unwrap();
        assert!(encoded.ends_with('\n'));
        let decoded = decode(encoded.trim_end_matches('\n')).unwrap();
        // Compare via re-encoding since Message has no PartialEq derive for
        // the float/DateTime mix - this is exactly the round trip property
        // under test, just expressed without needing structural equality.
        assert_eq!(encode(&decoded).unwrap(), encoded);
    }

    #[test]
    fn handshake_round_trips() {
        round_trip(Message::Handshake {
            drone_id: "D7".into(),
            capabilities: Capabilities {
                max_speed: 5.0,
                battery_capacity: 100.0,
                payload: 2.0,
            },
        });
    }

    #[test]
    fn status_update_round_trips() {
        round_trip(Message::StatusUpdate {
            drone_id: "D7".into(),
            timestamp: Utc::now(),
            location: Coord::new(3, 4),
            status: ReportedStatus::Busy,
            battery: 87.5,
            speed: 1.0,
        });
    }

    #[test]
    fn assign_mission_round_trips() {
        round_trip(Message::AssignMission {
            mission_id: 42,
            priority: "medium".into(),
            target: Coord::new(9, 9),
            expiry: Utc::now(),
            checksum: "abc123".into(),
        });
    }

    #[test]
    fn status_accepts_legacy_on_mission_synonym() {
        let decoded = decode(
            r#"{"type":"STATUS_UPDATE","drone_id":"D1","timestamp":"2024-01-01T00:00:00Z","location":{"x":0,"y":0},"status":"on_mission","battery":1.0,"speed":1.0}"#,
        )
        .unwrap();
        match decoded {
            Message::StatusUpdate { status, .. } => assert_eq!(status, ReportedStatus::Busy),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let result = decode(r#"{"type":"NONSENSE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        let result = decode(r#"{"type":"HANDSHAKE"}"#);
        assert!(result.is_err());
    }
}
