use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::peer::collaborators::{Connection, RegisteredPeer};
use crate::peer::media::{MediaStreamHandle, StreamInfo};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    None,
    Presenter,
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::None => "none",
            Role::Presenter => "presenter",
            Role::Viewer => "viewer",
        })
    }
}

/// Фаза жизненного цикла сессии
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Registering,
    Capturing,
    Listening,
    Connected,
    /// Удалённая сторона завершила сессию; роль уже None
    Ended,
}

/// Состояние сессии. Меняется только через [`super::SessionController`].
pub(crate) struct SessionState {
    pub(crate) role: Role,
    pub(crate) phase: SessionPhase,
    /// Растёт при каждом старте, сбросе и завершении; устаревшие шаги его не узнают
    pub(crate) epoch: u64,
    pub(crate) peer: Option<Arc<dyn RegisteredPeer>>,
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) local_stream: Option<MediaStreamHandle>,
    pub(crate) remote_stream: Option<MediaStreamHandle>,
    pub(crate) since: DateTime<Utc>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            role: Role::None,
            phase: SessionPhase::Idle,
            epoch: 0,
            peer: None,
            connection: None,
            local_stream: None,
            remote_stream: None,
            since: Utc::now(),
        }
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.since = Utc::now();
    }

    /// Забирает все ресурсы и возвращает состояние к пустому.
    /// Все незавершённые шаги после этого считаются устаревшими.
    pub(crate) fn take_resources(&mut self, phase: SessionPhase) -> Released {
        self.epoch += 1;
        self.role = Role::None;
        self.set_phase(phase);
        Released {
            connection: self.connection.take(),
            peer: self.peer.take(),
            streams: [self.local_stream.take(), self.remote_stream.take()],
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role,
            phase: self.phase,
            registered: self.peer.is_some(),
            connection_id: self.connection.as_ref().map(|c| c.id().to_string()),
            remote_identity: self
                .connection
                .as_ref()
                .map(|c| c.remote_identity().to_string()),
            local_stream: self.local_stream.as_ref().map(MediaStreamHandle::info),
            remote_stream: self.remote_stream.as_ref().map(MediaStreamHandle::info),
            since: self.since,
        }
    }
}

/// Ресурсы, изъятые из состояния; освобождаются уже без блокировки
pub(crate) struct Released {
    connection: Option<Arc<dyn Connection>>,
    peer: Option<Arc<dyn RegisteredPeer>>,
    streams: [Option<MediaStreamHandle>; 2],
}

impl Released {
    pub(crate) async fn release(self) {
        // Дорожки первыми: захват экрана/микрофона не должен ждать сеть
        for stream in self.streams.into_iter().flatten() {
            stream.stop_all();
        }
        if let Some(connection) = self.connection {
            connection.close().await;
        }
        if let Some(peer) = self.peer {
            peer.destroy().await;
        }
    }
}

/// Снимок состояния для подписчиков и фронтенда
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub role: Role,
    pub phase: SessionPhase,
    pub registered: bool,
    pub connection_id: Option<String>,
    pub remote_identity: Option<String>,
    pub local_stream: Option<StreamInfo>,
    pub remote_stream: Option<StreamInfo>,
    pub since: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Пустое состояние: нет роли, регистрации, соединения и потоков
    pub fn is_empty(&self) -> bool {
        self.role == Role::None
            && !self.registered
            && self.connection_id.is_none()
            && self.local_stream.is_none()
            && self.remote_stream.is_none()
    }
}
