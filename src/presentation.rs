//! Привязка потоков сессии к поверхностям вывода и полноэкранный режим.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FullscreenUnsupported;
use crate::peer::media::MediaStreamHandle;
use crate::session::SessionController;

pub const FULLSCREEN_UNSUPPORTED_NOTICE: &str = "Fullscreen not supported on this device.";

/// Поверхность, на которой показывается поток (превью или воспроизведение)
pub trait OutputSurface: Send + Sync {
    fn id(&self) -> &str;

    /// `None` отвязывает поток от поверхности
    fn attach(&self, stream: Option<&MediaStreamHandle>);

    fn request_fullscreen(&self) -> ProbeOutcome {
        ProbeOutcome::Unsupported
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Entered,
    Unsupported,
    Failed(String),
}

/// Один способ войти в полноэкранный режим. Пробуются по порядку.
pub trait FullscreenProbe: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_enter(&self, surface: &dyn OutputSurface) -> ProbeOutcome;
}

/// Собственный полноэкранный режим поверхности
pub struct SurfaceFullscreen;

impl FullscreenProbe for SurfaceFullscreen {
    fn name(&self) -> &'static str {
        "surface"
    }

    fn try_enter(&self, surface: &dyn OutputSurface) -> ProbeOutcome {
        surface.request_fullscreen()
    }
}

#[derive(Default)]
struct Attached {
    local: Option<String>,
    remote: Option<String>,
}

pub struct PresentationAdapter {
    controller: SessionController,
    preview: Option<Arc<dyn OutputSurface>>,
    playback: Option<Arc<dyn OutputSurface>>,
    probes: Vec<Box<dyn FullscreenProbe>>,
    attached: Mutex<Attached>,
}

impl PresentationAdapter {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            preview: None,
            playback: None,
            probes: vec![Box::new(SurfaceFullscreen)],
            attached: Mutex::new(Attached::default()),
        }
    }

    /// Поверхность для локального превью презентера
    pub fn with_preview(mut self, surface: Arc<dyn OutputSurface>) -> Self {
        self.preview = Some(surface);
        self
    }

    /// Поверхность для удалённого потока у зрителя
    pub fn with_playback(mut self, surface: Arc<dyn OutputSurface>) -> Self {
        self.playback = Some(surface);
        self
    }

    /// Добавляет способ входа в полноэкранный режим после уже имеющихся
    pub fn with_probe(mut self, probe: Box<dyn FullscreenProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Приводит поверхности в соответствие с текущим состоянием сессии
    pub fn render(&self) {
        let local = self.controller.local_stream();
        let remote = self.controller.remote_stream();
        let mut attached = self.attached.lock();
        Self::sync(self.preview.as_deref(), &mut attached.local, local.as_ref());
        Self::sync(self.playback.as_deref(), &mut attached.remote, remote.as_ref());
    }

    fn sync(
        surface: Option<&dyn OutputSurface>,
        current: &mut Option<String>,
        stream: Option<&MediaStreamHandle>,
    ) {
        let Some(surface) = surface else { return };
        let wanted = stream.map(|s| s.id().to_string());
        if *current == wanted {
            return;
        }
        debug!(surface = surface.id(), stream = ?wanted, "Attaching stream");
        surface.attach(stream);
        *current = wanted;
    }

    /// Переводит поверхность с удалённым потоком в полноэкранный режим.
    /// Без потока или поверхности ничего не делает. `Ok(Some(name))`
    /// называет сработавший способ.
    pub fn enter_full_screen(&self) -> Result<Option<&'static str>, FullscreenUnsupported> {
        let Some(surface) = self.playback.as_deref() else {
            debug!("No playback surface, fullscreen request ignored");
            return Ok(None);
        };
        if self.controller.remote_stream().is_none() {
            debug!("No remote stream, fullscreen request ignored");
            return Ok(None);
        }

        for probe in &self.probes {
            match probe.try_enter(surface) {
                ProbeOutcome::Entered => {
                    info!(probe = probe.name(), "Entered fullscreen");
                    return Ok(Some(probe.name()));
                }
                ProbeOutcome::Unsupported => debug!(probe = probe.name(), "Fullscreen unsupported"),
                ProbeOutcome::Failed(e) => warn!(probe = probe.name(), "Fullscreen failed: {e}"),
            }
        }

        self.controller.notify(FULLSCREEN_UNSUPPORTED_NOTICE);
        Err(FullscreenUnsupported)
    }

    /// Перерисовывает поверхности при каждом изменении состояния
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let mut state = self.controller.state_watch();
        tokio::spawn(async move {
            this.render();
            while state.changed().await.is_ok() {
                this.render();
            }
        })
    }
}
