use serde::{Serialize, Serializer};

use crate::session::Role;

/// Ошибки регистрации на сигнальном сервере
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("signaling server unreachable: {0}")]
    Unreachable(String),

    /// Идентификатор уже занят другим участником. Никогда не перезаписываем.
    #[error("peer identity '{0}' is already taken")]
    IdentityTaken(String),

    #[error("signaling server rejected registration: {0}")]
    Rejected(String),

    #[error("invalid peer identity '{0}'")]
    InvalidIdentity(String),
}

/// Ошибки захвата экрана/звука
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("no capture source available: {0}")]
    NoSource(String),

    #[error("capture constraints cannot be satisfied: {0}")]
    Unsatisfiable(String),

    #[error("capture failed: {0}")]
    Failed(String),
}

/// Ошибки установки и жизни соединения
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("peer '{0}' is unavailable")]
    PeerUnavailable(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("a call is already active")]
    AlreadyActive,

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("full screen is not supported by any available method")]
pub struct FullscreenUnsupported;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("server URL cannot be empty")]
    EmptyUrl,

    #[error("TURN server '{0}' requires username and credential")]
    MissingTurnCredentials(String),

    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Сессия уже активна в другой (или той же) роли
    #[error("a {0} session is already active")]
    Busy(Role),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Сессию сбросили, пока шаг ещё выполнялся
    #[error("session was reset before it finished starting")]
    Cancelled,
}

impl SessionError {
    /// Текст уведомления для пользователя
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Capture(e) => format!("Could not share screen: {e}"),
            SessionError::Registration(e) => format!("Could not reach the signaling service: {e}"),
            SessionError::Connection(e) => format!("Could not connect: {e}"),
            SessionError::Busy(role) => format!("Stop the current {role} session first"),
            SessionError::Cancelled => "Session stopped".to_string(),
        }
    }
}

// Tauri отдаёт ошибки команд во фронтенд через serde
impl Serialize for SessionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl Serialize for FullscreenUnsupported {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl Serialize for ConfigError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
