//! Контракты внешних участников: сигнальный сервис, соединение, захват.
//!
//! Ядро сессии зависит только от этих трейтов. Реализация поверх PeerJS и
//! WebRTC живёт в [`crate::signaling`] и [`crate::peer::connection`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{CaptureError, ConnectionError, RegistrationError};
use crate::peer::media::MediaStreamHandle;
use crate::peer::types::{CaptureConstraints, PeerIdentity};

#[async_trait]
pub trait Signaling: Send + Sync {
    /// Регистрирует этот процесс под `identity`. Завершается, когда сервер
    /// подтвердил регистрацию (событие "open").
    async fn register(
        &self,
        identity: &PeerIdentity,
    ) -> Result<Arc<dyn RegisteredPeer>, RegistrationError>;
}

#[async_trait]
pub trait RegisteredPeer: Send + Sync {
    fn identity(&self) -> &PeerIdentity;

    /// Исходящий звонок с локальным потоком в качестве полезной нагрузки
    async fn call(
        &self,
        remote: &PeerIdentity,
        stream: &MediaStreamHandle,
    ) -> Result<Arc<dyn Connection>, ConnectionError>;

    /// Следующий входящий звонок; `None`, когда регистрация уничтожена
    async fn next_incoming(&self) -> Option<Arc<dyn Connection>>;

    /// Снимает регистрацию. Повторный вызов безопасен.
    async fn destroy(&self);
}

#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    fn remote_identity(&self) -> &PeerIdentity;

    /// Принимает входящий звонок без локального потока
    async fn accept(&self) -> Result<(), ConnectionError>;

    /// Ждёт удалённый поток (событие "stream")
    async fn remote_stream(&self) -> Result<MediaStreamHandle, ConnectionError>;

    /// Завершается, когда соединение закрыто любой из сторон
    async fn closed(&self);

    /// Закрывает соединение. Повторный вызов безопасен.
    async fn close(&self);
}

#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn request_display_capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStreamHandle, CaptureError>;
}
