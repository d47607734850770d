//! Message Protocol
//!
//! Engine.IO v4 framing, Socket.IO v5 packets, and the typed events the
//! download backend pushes to a session room.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Separator between packets in an HTTP long-polling payload
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// The only namespace this client connects to
pub const DEFAULT_NAMESPACE: &str = "/";

/// Name of the room-join event understood by the backend
pub const JOIN_EVENT: &str = "join";

/// Upper bound on the heartbeat deadline, whatever the server announces
const MAX_HEARTBEAT_MS: u64 = 60 * 60 * 1000;

// Engine.IO

/// Engine.IO open packet payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the client waits for the next server ping before giving up
    pub fn heartbeat_deadline(&self) -> Duration {
        let millis = self.ping_interval.saturating_add(self.ping_timeout);
        Duration::from_millis(millis.min(MAX_HEARTBEAT_MS))
    }
}

/// A single Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a text frame
    pub fn decode(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RelayError::Protocol("empty engine packet".to_string()))?;
        let data = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(data)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(non_empty(data))),
            '3' => Ok(EnginePacket::Pong(non_empty(data))),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(RelayError::Unsupported("binary engine packet".to_string())),
            other => Err(RelayError::Protocol(format!(
                "unknown engine packet type {:?}",
                other
            ))),
        }
    }

    /// Encode to a text frame
    pub fn encode(&self) -> Result<String> {
        let frame = match self {
            EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        };
        Ok(frame)
    }
}

fn non_empty(data: &str) -> Option<String> {
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Split a long-polling response body into individual packet frames
pub fn split_payload(body: &str) -> Vec<String> {
    body.split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(str::to_string)
        .collect()
}

// Socket.IO

/// Socket.IO packet body
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacketKind {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack_id: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

/// A Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub namespace: String,
    pub kind: SocketPacketKind,
}

impl SocketPacket {
    /// Connect request for the default namespace
    pub fn connect() -> Self {
        Self::on_default(SocketPacketKind::Connect(None))
    }

    /// Disconnect notice for the default namespace
    pub fn disconnect() -> Self {
        Self::on_default(SocketPacketKind::Disconnect)
    }

    /// Event with a single JSON argument
    pub fn event(name: &str, data: Value) -> Self {
        Self::on_default(SocketPacketKind::Event {
            name: name.to_string(),
            args: vec![data],
            ack_id: None,
        })
    }

    fn on_default(kind: SocketPacketKind) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            kind,
        }
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }

    /// Decode the data part of an Engine.IO message
    pub fn decode(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RelayError::Protocol("empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(RelayError::Unsupported("binary socket packet".to_string()));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    let namespace = rest[..comma].to_string();
                    rest = &rest[comma + 1..];
                    namespace
                }
                None => {
                    let namespace = rest.to_string();
                    rest = "";
                    namespace
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| RelayError::Protocol(format!("invalid ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let kind = match kind {
            '0' => {
                let data = if rest.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(rest)?)
                };
                SocketPacketKind::Connect(data)
            }
            '1' => SocketPacketKind::Disconnect,
            '2' => {
                let mut args: Vec<Value> = serde_json::from_str(rest)?;
                if args.is_empty() {
                    return Err(RelayError::Protocol("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(RelayError::Protocol(format!(
                            "event name must be a string, got {}",
                            other
                        )))
                    }
                };
                SocketPacketKind::Event { name, args, ack_id }
            }
            '3' => {
                let id = ack_id
                    .ok_or_else(|| RelayError::Protocol("ack without an id".to_string()))?;
                SocketPacketKind::Ack {
                    id,
                    args: serde_json::from_str(rest)?,
                }
            }
            '4' => {
                let data = if rest.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(rest)?
                };
                SocketPacketKind::ConnectError(data)
            }
            other => {
                return Err(RelayError::Protocol(format!(
                    "unknown socket packet type {:?}",
                    other
                )))
            }
        };

        Ok(Self { namespace, kind })
    }

    /// Encode to the data part of an Engine.IO message
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        out.push(match self.kind {
            SocketPacketKind::Connect(_) => '0',
            SocketPacketKind::Disconnect => '1',
            SocketPacketKind::Event { .. } => '2',
            SocketPacketKind::Ack { .. } => '3',
            SocketPacketKind::ConnectError(_) => '4',
        });

        if !self.is_default_namespace() {
            out.push_str(&self.namespace);
            out.push(',');
        }

        match &self.kind {
            SocketPacketKind::Connect(data) => {
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
            SocketPacketKind::Disconnect => {}
            SocketPacketKind::Event { name, args, ack_id } => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                out.push_str(&serde_json::to_string(&array)?);
            }
            SocketPacketKind::Ack { id, args } => {
                out.push_str(&id.to_string());
                out.push_str(&serde_json::to_string(args)?);
            }
            SocketPacketKind::ConnectError(data) => {
                out.push_str(&serde_json::to_string(data)?);
            }
        }

        Ok(out)
    }

    /// Wrap into an Engine.IO message frame
    pub fn to_frame(&self) -> Result<String> {
        EnginePacket::Message(self.encode()?).encode()
    }
}

/// Payload of the outbound `join` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub session_id: String,
}

// Inbound events

/// Names of the events the backend emits to a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Single-player download progress
    Progress,
    /// Per-player progress during a team download
    DownloadProgress,
    /// Download finished
    DownloadComplete,
    /// Download failed
    DownloadError,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Progress,
        EventKind::DownloadProgress,
        EventKind::DownloadComplete,
        EventKind::DownloadError,
    ];

    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::DownloadProgress => "download_progress",
            EventKind::DownloadComplete => "download_complete",
            EventKind::DownloadError => "download_error",
        }
    }

    /// Look up an event by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether the event ends a download session
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::DownloadComplete | EventKind::DownloadError)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgressPayload {
    pub player_name: String,
    pub player_tag: String,
    pub progress: f64,
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    /// Older backends send `name` instead of `username`
    #[serde(default, alias = "name")]
    pub username: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub player_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub player_tag: Option<String>,
}

/// A typed event received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Progress(ProgressPayload),
    DownloadProgress(PlayerProgressPayload),
    DownloadComplete(CompletePayload),
    DownloadError(ErrorPayload),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Progress(_) => EventKind::Progress,
            ServerEvent::DownloadProgress(_) => EventKind::DownloadProgress,
            ServerEvent::DownloadComplete(_) => EventKind::DownloadComplete,
            ServerEvent::DownloadError(_) => EventKind::DownloadError,
        }
    }

    /// Decode a Socket.IO event into a typed server event.
    ///
    /// Returns `None` for event names outside the taxonomy, and
    /// `Some(Err(..))` when a known event carries a payload of the wrong shape.
    pub fn decode(name: &str, args: &[Value]) -> Option<Result<Self>> {
        let kind = EventKind::from_name(name)?;
        let payload = args.first().cloned().unwrap_or(Value::Null);

        let event = match kind {
            EventKind::Progress => serde_json::from_value(payload).map(ServerEvent::Progress),
            EventKind::DownloadProgress => {
                serde_json::from_value(payload).map(ServerEvent::DownloadProgress)
            }
            EventKind::DownloadComplete => {
                serde_json::from_value(payload).map(ServerEvent::DownloadComplete)
            }
            EventKind::DownloadError => {
                serde_json::from_value(payload).map(ServerEvent::DownloadError)
            }
        };

        Some(event.map_err(RelayError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_open_packet_decoding() {
        let raw = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

        match EnginePacket::decode(raw).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(handshake.upgrades, vec!["websocket".to_string()]);
                assert_eq!(handshake.heartbeat_deadline(), Duration::from_millis(45000));
            }
            other => panic!("Expected open packet, got {:?}", other),
        }
    }

    #[test]
    fn test_engine_control_packets() {
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(None));
        assert_eq!(
            EnginePacket::decode("2probe").unwrap(),
            EnginePacket::Ping(Some("probe".to_string()))
        );
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(EnginePacket::Pong(None).encode().unwrap(), "3");
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(matches!(
            EnginePacket::decode("bAQID"),
            Err(RelayError::Unsupported(_))
        ));
    }

    #[test]
    fn test_heartbeat_deadline_is_capped() {
        let handshake = Handshake {
            sid: "abc".to_string(),
            upgrades: Vec::new(),
            ping_interval: u64::MAX,
            ping_timeout: u64::MAX,
            max_payload: None,
        };
        assert_eq!(handshake.heartbeat_deadline(), Duration::from_secs(3600));
    }

    #[test]
    fn test_polling_payload_split() {
        let body = "0{\"sid\":\"abc\",\"pingInterval\":1,\"pingTimeout\":1}\u{1e}40\u{1e}2";
        let frames = split_payload(body);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], "40");
        assert_eq!(frames[2], "2");
        assert!(split_payload("").is_empty());
    }

    #[test]
    fn test_event_packet_decoding() {
        let packet = SocketPacket::decode(r#"2["progress",{"progress":42}]"#).unwrap();
        assert!(packet.is_default_namespace());
        assert_eq!(
            packet.kind,
            SocketPacketKind::Event {
                name: "progress".to_string(),
                args: vec![json!({"progress": 42})],
                ack_id: None,
            }
        );
    }

    #[test]
    fn test_namespace_and_ack_id_decoding() {
        let packet = SocketPacket::decode(r#"2/admin,12["hello",1]"#).unwrap();
        assert_eq!(packet.namespace, "/admin");
        match packet.kind {
            SocketPacketKind::Event { name, ack_id, .. } => {
                assert_eq!(name, "hello");
                assert_eq!(ack_id, Some(12));
            }
            other => panic!("Expected event, got {:?}", other),
        }

        let connect = SocketPacket::decode("0/admin").unwrap();
        assert_eq!(connect.namespace, "/admin");
        assert_eq!(connect.kind, SocketPacketKind::Connect(None));
    }

    #[test]
    fn test_connect_and_error_packets() {
        let connected = SocketPacket::decode(r#"0{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap();
        assert_eq!(
            connected.kind,
            SocketPacketKind::Connect(Some(json!({"sid": "wZX3oN0bSVIhsaknAAAI"})))
        );

        let rejected = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            rejected.kind,
            SocketPacketKind::ConnectError(json!({"message": "Not authorized"}))
        );

        assert_eq!(SocketPacket::decode("1").unwrap().kind, SocketPacketKind::Disconnect);
        assert!(matches!(
            SocketPacket::decode(r#"51-["x",{"_placeholder":true,"num":0}]"#),
            Err(RelayError::Unsupported(_))
        ));
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[1,2]").is_err());
    }

    #[test]
    fn test_join_frame_encoding() {
        let payload = serde_json::to_value(JoinPayload {
            session_id: "session-456".to_string(),
        })
        .unwrap();
        let frame = SocketPacket::event(JOIN_EVENT, payload).to_frame().unwrap();
        assert_eq!(frame, r#"42["join",{"session_id":"session-456"}]"#);
        assert_eq!(SocketPacket::connect().to_frame().unwrap(), "40");
        assert_eq!(SocketPacket::disconnect().to_frame().unwrap(), "41");
    }

    #[test]
    fn test_server_event_decoding() {
        let event = ServerEvent::decode("progress", &[json!({"progress": 42})])
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::Progress(ProgressPayload { progress: 42.0 }));
        assert_eq!(event.kind(), EventKind::Progress);

        let complete = ServerEvent::decode("download_complete", &[json!({"name": "alice#EUW"})])
            .unwrap()
            .unwrap();
        match complete {
            ServerEvent::DownloadComplete(payload) => {
                assert_eq!(payload.username.as_deref(), Some("alice#EUW"));
            }
            other => panic!("Expected completion, got {:?}", other),
        }

        assert!(ServerEvent::decode("chat_message", &[json!({})]).is_none());
        assert!(ServerEvent::decode("progress", &[json!({"progress": "half"})])
            .unwrap()
            .is_err());
        assert!(ServerEvent::decode("download_error", &[]).unwrap().is_err());
    }

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert!(EventKind::DownloadError.is_terminal());
        assert!(!EventKind::Progress.is_terminal());
    }
}
