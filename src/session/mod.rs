//! Жизненный цикл сессии показа экрана.
//!
//! Контроллер единственный владелец состояния. Каждый асинхронный шаг
//! запоминает эпоху на старте и перед записью результата проверяет, что
//! сессию за это время не сбросили. Устаревший результат освобождается
//! на месте и в состояние не попадает.

pub mod events;
mod presenter;
pub mod state;
mod viewer;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::peer::collaborators::{CaptureSource, Connection, Signaling};
use crate::peer::media::MediaStreamHandle;
use crate::peer::types::CaptureConstraints;

pub use events::{EventBus, SessionEvent};
pub use state::{Role, SessionPhase, SessionSnapshot};
use state::SessionState;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    signaling: Arc<dyn Signaling>,
    capture: Arc<dyn CaptureSource>,
    constraints: CaptureConstraints,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: EventBus,
}

impl SessionController {
    pub fn new(
        signaling: Arc<dyn Signaling>,
        capture: Arc<dyn CaptureSource>,
        constraints: CaptureConstraints,
    ) -> Self {
        let state = SessionState::new();
        let (snapshot, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                signaling,
                capture,
                constraints,
                state: Mutex::new(state),
                snapshot,
                events: EventBus::new(EVENT_CAPACITY),
            }),
        }
    }

    /// Стать презентером: регистрация, захват экрана, звонок зрителю.
    /// При любой ошибке состояние откатывается к пустому.
    pub async fn start_presenter(&self) -> Result<(), SessionError> {
        let epoch = self.begin(Role::Presenter)?;
        let result = presenter::run(self, epoch).await;
        self.finish(epoch, result).await
    }

    /// Стать зрителем: регистрация и ожидание входящего звонка.
    /// Возвращается сразу после регистрации.
    pub async fn start_viewer(&self) -> Result<(), SessionError> {
        let epoch = self.begin(Role::Viewer)?;
        let result = viewer::start(self, epoch).await;
        self.finish(epoch, result).await
    }

    /// Полный сброс. Безопасен в любой момент, в том числе посреди старта.
    pub async fn reset(&self) {
        let released = self.inner.state.lock().take_resources(SessionPhase::Idle);
        info!("Session reset");
        self.publish();
        released.release().await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn role(&self) -> Role {
        self.inner.state.lock().role
    }

    pub fn local_stream(&self) -> Option<MediaStreamHandle> {
        self.inner.state.lock().local_stream.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStreamHandle> {
        self.inner.state.lock().remote_stream.clone()
    }

    pub(crate) fn notify(&self, message: impl Into<String>) {
        self.inner.events.publish(SessionEvent::Notice(message.into()));
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.inner.events.publish(event);
    }

    pub(crate) fn signaling(&self) -> &dyn Signaling {
        self.inner.signaling.as_ref()
    }

    pub(crate) fn capture(&self) -> &dyn CaptureSource {
        self.inner.capture.as_ref()
    }

    pub(crate) fn constraints(&self) -> &CaptureConstraints {
        &self.inner.constraints
    }

    fn begin(&self, role: Role) -> Result<u64, SessionError> {
        let epoch = {
            let mut state = self.inner.state.lock();
            if state.role != Role::None {
                return Err(SessionError::Busy(state.role));
            }
            state.epoch += 1;
            state.role = role;
            state.set_phase(SessionPhase::Registering);
            state.epoch
        };
        info!(%role, epoch, "Starting session");
        self.publish();
        Ok(epoch)
    }

    async fn finish(&self, epoch: u64, result: Result<(), SessionError>) -> Result<(), SessionError> {
        if let Err(err) = &result {
            self.abort(epoch, err).await;
        }
        result
    }

    /// Применяет изменение, только если эпоха не сменилась.
    /// `None` означает, что сессию уже сбросили.
    pub(crate) fn update<T>(&self, epoch: u64, f: impl FnOnce(&mut SessionState) -> T) -> Option<T> {
        let out = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return None;
            }
            f(&mut state)
        };
        self.publish();
        Some(out)
    }

    /// Откат после ошибки старта. Для устаревшей эпохи ничего не делает.
    async fn abort(&self, epoch: u64, err: &SessionError) -> bool {
        let released = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return false;
            }
            state.take_resources(SessionPhase::Idle)
        };
        warn!(error = %err, "Session failed, rolling back");
        self.publish();
        released.release().await;
        self.notify(err.user_message());
        true
    }

    /// Ошибка фоновой части потока, когда start_* уже вернул Ok
    pub(crate) async fn fail(&self, epoch: u64, err: SessionError) {
        if self.abort(epoch, &err).await {
            self.emit(SessionEvent::Failed {
                error: err.to_string(),
            });
        }
    }

    /// Удалённая сторона завершила сессию: полный сброс в фазу Ended
    pub(crate) async fn end(&self, epoch: u64, reason: &str) {
        let released = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.take_resources(SessionPhase::Ended)
        };
        info!(reason, "Session ended by the remote side");
        self.publish();
        released.release().await;
        self.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        self.notify(format!("Session ended: {reason}"));
    }

    /// Следит за концом сессии: закрытие соединения или конец всех дорожек потока.
    /// Новые дорожки потока попадают в снимок состояния.
    pub(crate) fn watch_session_end(
        &self,
        epoch: u64,
        connection: Arc<dyn Connection>,
        stream: MediaStreamHandle,
        stream_reason: &'static str,
    ) {
        let controller = self.clone();
        let mut added = stream.watch_tracks();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = connection.closed() => break "the connection was closed",
                    _ = stream.ended() => break stream_reason,
                    changed = added.changed() => {
                        if changed.is_err() || controller.update(epoch, |_| ()).is_none() {
                            return;
                        }
                        debug!(stream = stream.id(), tracks = *added.borrow(), "Stream gained a track");
                    }
                }
            };
            controller.end(epoch, reason).await;
        });
    }

    fn publish(&self) {
        let snapshot = self.inner.state.lock().snapshot();
        self.inner.snapshot.send_replace(snapshot.clone());
        self.inner.events.publish(SessionEvent::StateChanged(snapshot));
    }
}
