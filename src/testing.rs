//! Поддельные участники для тестов сессии и показа.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};

use crate::error::{CaptureError, ConnectionError, RegistrationError};
use crate::peer::collaborators::{CaptureSource, Connection, RegisteredPeer, Signaling};
use crate::peer::media::{MediaStreamHandle, MediaTrack, StreamOrigin, TrackKind};
use crate::peer::types::{CaptureConstraints, PeerIdentity};
use crate::session::{SessionController, SessionEvent, SessionSnapshot};
use crate::utils::{media_connection_id, random_id};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn screen_stream(origin: StreamOrigin) -> MediaStreamHandle {
    MediaStreamHandle::new(
        random_id(),
        origin,
        vec![
            MediaTrack::new(TrackKind::Video, "screen"),
            MediaTrack::new(TrackKind::Audio, "system audio"),
        ],
    )
}

#[derive(Default)]
pub(crate) struct FakeSignaling {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail_with: Mutex<Option<RegistrationError>>,
    call_error: Mutex<Option<ConnectionError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub entered: Notify,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: RegistrationError) -> Arc<Self> {
        let signaling = Self::default();
        *signaling.fail_with.lock() = Some(err);
        Arc::new(signaling)
    }

    /// register() ждёт, пока тест не откроет шлюз
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let signaling = Self::default();
        *signaling.gate.lock() = Some(gate.clone());
        (Arc::new(signaling), gate)
    }

    pub fn fail_calls_with(&self, err: ConnectionError) {
        *self.call_error.lock() = Some(err);
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    /// Последний зарегистрированный участник с этим идентификатором
    pub fn peer(&self, identity: &str) -> Option<Arc<FakePeer>> {
        self.peers
            .lock()
            .iter()
            .rev()
            .find(|p| p.identity.as_str() == identity)
            .cloned()
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn register(
        &self,
        identity: &PeerIdentity,
    ) -> Result<Arc<dyn RegisteredPeer>, RegistrationError> {
        self.entered.notify_one();
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        let peer = FakePeer::new(identity.clone(), self.call_error.lock().clone());
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub(crate) struct FakePeer {
    identity: PeerIdentity,
    call_error: Option<ConnectionError>,
    calls: Mutex<Vec<Arc<FakeConnection>>>,
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<Arc<dyn Connection>>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<dyn Connection>>>,
    destroyed: AtomicBool,
}

impl FakePeer {
    fn new(identity: PeerIdentity, call_error: Option<ConnectionError>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            identity,
            call_error,
            calls: Mutex::new(Vec::new()),
            incoming_tx: Mutex::new(Some(tx)),
            incoming_rx: tokio::sync::Mutex::new(rx),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<Arc<FakeConnection>> {
        self.calls.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Имитирует входящий звонок от `from`
    pub fn ring(&self, from: &str) -> Arc<FakeConnection> {
        let remote = PeerIdentity::new(from).expect("valid identity");
        let connection = FakeConnection::new(remote, None);
        if let Some(tx) = self.incoming_tx.lock().as_ref() {
            let _ = tx.send(connection.clone());
        }
        connection
    }
}

#[async_trait]
impl RegisteredPeer for FakePeer {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn call(
        &self,
        remote: &PeerIdentity,
        stream: &MediaStreamHandle,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.is_destroyed() {
            return Err(ConnectionError::PeerUnavailable(remote.to_string()));
        }
        if let Some(err) = self.call_error.clone() {
            return Err(err);
        }
        let connection = FakeConnection::new(remote.clone(), Some(stream.clone()));
        self.calls.lock().push(connection.clone());
        Ok(connection)
    }

    async fn next_incoming(&self) -> Option<Arc<dyn Connection>> {
        self.incoming_rx.lock().await.recv().await
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.incoming_tx.lock().take();
    }
}

pub(crate) struct FakeConnection {
    id: String,
    remote: PeerIdentity,
    outgoing: Option<MediaStreamHandle>,
    accepted: AtomicBool,
    close_calls: AtomicUsize,
    remote_stream: watch::Sender<Option<MediaStreamHandle>>,
    closed: watch::Sender<bool>,
}

impl FakeConnection {
    fn new(remote: PeerIdentity, outgoing: Option<MediaStreamHandle>) -> Arc<Self> {
        Arc::new(Self {
            id: media_connection_id(),
            remote,
            outgoing,
            accepted: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            remote_stream: watch::channel(None).0,
            closed: watch::channel(false).0,
        })
    }

    pub fn outgoing_stream(&self) -> Option<&MediaStreamHandle> {
        self.outgoing.as_ref()
    }

    pub fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    pub fn was_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Удалённая сторона начала передавать поток
    pub fn deliver(&self, stream: MediaStreamHandle) {
        self.remote_stream.send_replace(Some(stream));
    }

    /// Удалённая сторона закрыла соединение
    pub fn hang_up(&self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_identity(&self) -> &PeerIdentity {
        &self.remote
    }

    async fn accept(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.accepted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn remote_stream(&self) -> Result<MediaStreamHandle, ConnectionError> {
        let mut streams = self.remote_stream.subscribe();
        let mut closed = self.closed.subscribe();
        let stream = async {
            let got = streams.wait_for(Option::is_some).await;
            got.ok().and_then(|s| s.clone())
        };
        tokio::select! {
            stream = stream => stream.ok_or(ConnectionError::Closed),
            _ = closed.wait_for(|c| *c) => Err(ConnectionError::Closed),
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

#[derive(Default)]
pub(crate) struct FakeCapture {
    requests: AtomicUsize,
    fail_with: Mutex<Option<CaptureError>>,
    no_tracks: bool,
    streams: Mutex<Vec<MediaStreamHandle>>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: CaptureError) -> Arc<Self> {
        let capture = Self::default();
        *capture.fail_with.lock() = Some(err);
        Arc::new(capture)
    }

    /// Захват "успешен", но без единой дорожки
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            no_tracks: true,
            ..Default::default()
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> Vec<MediaStreamHandle> {
        self.streams.lock().clone()
    }
}

#[async_trait]
impl CaptureSource for FakeCapture {
    async fn request_display_capture(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<MediaStreamHandle, CaptureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        let stream = if self.no_tracks {
            MediaStreamHandle::new(random_id(), StreamOrigin::Local, vec![])
        } else {
            screen_stream(StreamOrigin::Local)
        };
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}

pub(crate) fn controller(
    signaling: &Arc<FakeSignaling>,
    capture: &Arc<FakeCapture>,
) -> SessionController {
    SessionController::new(
        signaling.clone(),
        capture.clone(),
        CaptureConstraints::default(),
    )
}

/// Ждёт снимок состояния, удовлетворяющий условию
pub(crate) async fn wait_state(
    controller: &SessionController,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = controller.state_watch();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for session state")
        .expect("state channel closed")
        .clone();
    snapshot
}

/// Ждёт событие, удовлетворяющее условию, пропуская остальные
pub(crate) async fn wait_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

pub(crate) async fn wait_closed(connection: &FakeConnection) {
    tokio::time::timeout(WAIT, connection.closed())
        .await
        .expect("timed out waiting for connection to close");
}
