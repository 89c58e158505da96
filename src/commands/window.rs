use serde::Serialize;
use tauri::{AppHandle, Emitter, Runtime, WebviewWindow};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::peer::media::{MediaStreamHandle, StreamInfo};
use crate::presentation::{FullscreenProbe, OutputSurface, ProbeOutcome};
use crate::session::SessionEvent;

pub const SESSION_EVENT: &str = "ssc-session";
pub const SURFACE_EVENT: &str = "ssc-surface";

#[derive(Debug, Clone, Serialize)]
struct SurfaceUpdate<'a> {
    surface: &'a str,
    stream: Option<StreamInfo>,
}

/// Поверхность в вебвью: фронтенд получает через событие только описание
/// потока (id, дорожки), сами кадры сюда не идут. Воспроизведение остаётся за
/// хостом: удалённые RTP-пакеты берутся из `MediaTrack::subscribe_rtp`,
/// локальное превью показывает тот, кто реализует `CaptureSource`.
pub struct WindowSurface<R: Runtime> {
    app: AppHandle<R>,
    id: String,
}

impl<R: Runtime> WindowSurface<R> {
    pub fn new(app: AppHandle<R>, id: impl Into<String>) -> Self {
        Self { app, id: id.into() }
    }
}

impl<R: Runtime> OutputSurface for WindowSurface<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn attach(&self, stream: Option<&MediaStreamHandle>) {
        let update = SurfaceUpdate {
            surface: &self.id,
            stream: stream.map(MediaStreamHandle::info),
        };
        if let Err(e) = self.app.emit(SURFACE_EVENT, update) {
            warn!(surface = %self.id, "Failed to emit surface update: {e}");
        }
    }
}

/// Полноэкранный режим всего окна приложения
pub struct WindowFullscreen<R: Runtime> {
    window: WebviewWindow<R>,
}

impl<R: Runtime> WindowFullscreen<R> {
    pub fn new(window: WebviewWindow<R>) -> Self {
        Self { window }
    }
}

impl<R: Runtime> FullscreenProbe for WindowFullscreen<R> {
    fn name(&self) -> &'static str {
        "window"
    }

    fn try_enter(&self, _surface: &dyn OutputSurface) -> ProbeOutcome {
        match self.window.set_fullscreen(true) {
            Ok(()) => ProbeOutcome::Entered,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }
}

/// Пересылает события сессии во вебвью
pub async fn forward_events<R: Runtime>(
    app: AppHandle<R>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = app.emit(SESSION_EVENT, &event) {
                    warn!("Failed to emit session event: {e}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session events lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Session event forwarding stopped");
}
