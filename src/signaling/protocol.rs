//! Сообщения сигнального сервера PeerJS

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::peer::types::{IceCandidate, SessionDescription};

/// Тип соединения PeerJS для аудио/видео звонков
pub const MEDIA_CONNECTION: &str = "media";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum MessageType {
    Open,
    Error,
    IdTaken,
    InvalidKey,
    Leave,
    Expire,
    Offer,
    Answer,
    Candidate,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ServerMessage {
    pub fn heartbeat() -> Self {
        Self {
            kind: MessageType::Heartbeat,
            src: None,
            dst: None,
            payload: None,
        }
    }

    pub fn to(kind: MessageType, dst: &str, payload: ConnectionPayload) -> Self {
        Self {
            kind,
            src: None,
            dst: Some(dst.to_string()),
            payload: serde_json::to_value(payload).ok(),
        }
    }

    pub fn leave(dst: &str) -> Self {
        Self {
            kind: MessageType::Leave,
            src: None,
            dst: Some(dst.to_string()),
            payload: None,
        }
    }

    /// Полезная нагрузка OFFER/ANSWER/CANDIDATE
    pub fn connection_payload(&self) -> Option<ConnectionPayload> {
        self.payload
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
    }

    /// Текст ошибки из `{"msg": "..."}`
    pub fn error_message(&self) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPayload {
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ConnectionPayload {
    pub fn description(connection_id: &str, sdp: SessionDescription) -> Self {
        Self {
            connection_type: MEDIA_CONNECTION.into(),
            connection_id: connection_id.to_string(),
            sdp: Some(sdp),
            candidate: None,
            metadata: None,
        }
    }

    pub fn candidate(connection_id: &str, candidate: IceCandidate) -> Self {
        Self {
            connection_type: MEDIA_CONNECTION.into(),
            connection_id: connection_id.to_string(),
            sdp: None,
            candidate: Some(candidate),
            metadata: None,
        }
    }

    pub fn is_media(&self) -> bool {
        self.connection_type == MEDIA_CONNECTION
    }
}
