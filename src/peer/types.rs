use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistrationError;

/// Идентификатор участника на сигнальном сервере
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub const PRESENTER: &'static str = "presenter";
    pub const VIEWER: &'static str = "viewer";

    /// Проверяет id по грамматике PeerJS: `[A-Za-z0-9]+([ _-][A-Za-z0-9]+)*`
    pub fn new(id: impl Into<String>) -> Result<Self, RegistrationError> {
        let id = id.into();
        let mut prev_sep = true;
        for c in id.chars() {
            if c.is_ascii_alphanumeric() {
                prev_sep = false;
            } else if matches!(c, ' ' | '_' | '-') && !prev_sep {
                prev_sep = true;
            } else {
                return Err(RegistrationError::InvalidIdentity(id));
            }
        }
        if prev_sep {
            // пустая строка или разделитель в конце
            return Err(RegistrationError::InvalidIdentity(id));
        }
        Ok(Self(id))
    }

    pub fn presenter() -> Self {
        Self(Self::PRESENTER.to_string())
    }

    pub fn viewer() -> Self {
        Self(Self::VIEWER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SDP в том виде, в каком его пересылает PeerJS: `{type, sdp}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Аудио-ограничения для захвата
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    // Точный звук источника важнее качества голосового звонка
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            sample_rate: 44_100,
        }
    }
}

/// Параметры запроса захвата экрана
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: Option<AudioConstraints>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: Some(AudioConstraints::default()),
        }
    }
}
