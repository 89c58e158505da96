//! Клиент сигнального сервера PeerJS.
//!
//! Регистрация = вебсокет к серверу, который подтверждает id сообщением
//! `OPEN`. Через тот же сокет идут OFFER/ANSWER/CANDIDATE звонков, сервер
//! маршрутизирует их по `dst`.

pub mod protocol;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::config::{validate_ice_servers, PeerServerOptions, SessionConfig};
use crate::error::{ConfigError, ConnectionError, RegistrationError};
use crate::peer::collaborators::{Connection, RegisteredPeer, Signaling};
use crate::peer::connection::{RtcConnection, RtcSettings};
use crate::peer::media::MediaStreamHandle;
use crate::peer::types::{PeerIdentity, ServerConfig};
use crate::utils::{media_connection_id, random_id};
use protocol::{MessageType, ServerMessage};

/// Версия клиента, которую сообщаем серверу
pub const PROTOCOL_VERSION: &str = "1.5.4";

/// Сколько входящих звонков может ждать обработки
const INCOMING_CAPACITY: usize = 8;

/// Сколько ждём, пока писатель отправит последние сообщения при destroy()
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct PeerJsSignaling {
    options: PeerServerOptions,
    /// Пользовательские ICE серверы, применяются к новым соединениям
    ice_servers: RwLock<Vec<ServerConfig>>,
    grace_period: Duration,
}

impl PeerJsSignaling {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            options: config.server.clone(),
            ice_servers: RwLock::new(config.ice_servers.clone()),
            grace_period: Duration::from_secs(config.grace_period_secs),
        }
    }

    pub fn ice_servers(&self) -> Vec<ServerConfig> {
        self.ice_servers.read().clone()
    }

    /// Устанавливает пользовательские ICE серверы
    pub fn set_ice_servers(&self, servers: Vec<ServerConfig>) -> Result<(), ConfigError> {
        validate_ice_servers(&servers)?;
        info!("Setting {} custom ICE servers", servers.len());
        *self.ice_servers.write() = servers;
        Ok(())
    }

    fn rtc_settings(&self) -> RtcSettings {
        RtcSettings {
            ice_servers: self.ice_servers(),
            grace_period: self.grace_period,
        }
    }
}

#[async_trait]
impl Signaling for PeerJsSignaling {
    async fn register(
        &self,
        identity: &PeerIdentity,
    ) -> Result<Arc<dyn RegisteredPeer>, RegistrationError> {
        let token = random_id();
        let url = self.options.socket_url(identity.as_str(), &token);
        let connect_timeout = Duration::from_secs(self.options.connect_timeout_secs);
        info!(
            url = %url.split('?').next().unwrap_or(""),
            identity = %identity,
            "Connecting to signaling server"
        );

        let ws = match timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str())).await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return Err(RegistrationError::Unreachable(e.to_string())),
            Err(_) => {
                return Err(RegistrationError::Unreachable(format!(
                    "connection timed out after {}s",
                    connect_timeout.as_secs()
                )))
            }
        };

        let (mut write, mut read) = ws.split();
        let opened = match timeout(connect_timeout, wait_open(&mut read, identity)).await {
            Ok(res) => res,
            Err(_) => Err(RegistrationError::Unreachable(
                "server did not confirm registration".into(),
            )),
        };
        if let Err(e) = opened {
            warn!(identity = %identity, error = %e, "Registration failed");
            let _ = write.close().await;
            return Err(e);
        }
        info!(identity = %identity, "Registered on signaling server");

        let heartbeat = Duration::from_millis(self.options.heartbeat_interval_ms.max(100));
        Ok(PeerJsPeer::spawn(
            identity.clone(),
            write,
            read,
            self.rtc_settings(),
            heartbeat,
        ))
    }
}

/// Первое осмысленное сообщение сервера решает судьбу регистрации
async fn wait_open<S>(read: &mut S, identity: &PeerIdentity) -> Result<(), RegistrationError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let Ok(msg) = serde_json::from_str::<ServerMessage>(&text) else {
                    debug!(text = %text, "Unrecognized message from signaling server");
                    continue;
                };
                match msg.kind {
                    MessageType::Open => return Ok(()),
                    MessageType::IdTaken => {
                        return Err(RegistrationError::IdentityTaken(identity.to_string()))
                    }
                    MessageType::InvalidKey => {
                        return Err(RegistrationError::Rejected(format!(
                            "invalid API key: {}",
                            msg.error_message()
                        )))
                    }
                    MessageType::Error => {
                        return Err(RegistrationError::Rejected(msg.error_message()))
                    }
                    _ => continue,
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Err(e) => return Err(RegistrationError::Unreachable(e.to_string())),
            _ => {}
        }
    }
    Err(RegistrationError::Unreachable(
        "server closed the socket".into(),
    ))
}

/// Общее состояние зарегистрированного пира для читателя и звонков
struct PeerLink {
    identity: PeerIdentity,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    connections: Mutex<HashMap<String, Arc<RtcConnection>>>,
    settings: RtcSettings,
}

impl PeerLink {
    fn connection(&self, connection_id: &str) -> Option<Arc<RtcConnection>> {
        self.connections.lock().get(connection_id).cloned()
    }

    /// Запоминает соединение и забывает его после закрытия
    fn track(self: &Arc<Self>, conn: Arc<RtcConnection>) {
        let id = conn.connection_id().to_string();
        self.connections.lock().insert(id.clone(), conn.clone());
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            conn.closed().await;
            if let Some(link) = weak.upgrade() {
                link.connections.lock().remove(&id);
            }
        });
    }

    /// Соединения с удалённым пиром `src`
    fn take_connections_with(&self, src: &str) -> Vec<Arc<RtcConnection>> {
        let mut map = self.connections.lock();
        let ids: Vec<String> = map
            .iter()
            .filter(|(_, c)| c.remote_identity().as_str() == src)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| map.remove(id)).collect()
    }

    async fn handle(
        self: &Arc<Self>,
        msg: ServerMessage,
        incoming: &mpsc::Sender<Arc<dyn Connection>>,
    ) {
        match msg.kind {
            MessageType::Offer => self.handle_offer(msg, incoming).await,
            MessageType::Answer => {
                let Some(payload) = msg.connection_payload() else {
                    warn!("ANSWER without payload");
                    return;
                };
                let (Some(conn), Some(sdp)) = (self.connection(&payload.connection_id), payload.sdp)
                else {
                    debug!(connection = %payload.connection_id, "ANSWER for unknown connection");
                    return;
                };
                if let Err(e) = conn.apply_answer(sdp).await {
                    warn!(connection = %payload.connection_id, error = %e, "Failed to apply answer");
                    conn.close().await;
                }
            }
            MessageType::Candidate => {
                let Some(payload) = msg.connection_payload() else {
                    return;
                };
                let (Some(conn), Some(candidate)) =
                    (self.connection(&payload.connection_id), payload.candidate)
                else {
                    debug!(connection = %payload.connection_id, "CANDIDATE for unknown connection");
                    return;
                };
                conn.add_remote_candidate(candidate).await;
            }
            MessageType::Leave | MessageType::Expire => {
                let Some(src) = msg.src.as_deref() else {
                    return;
                };
                let reason = if msg.kind == MessageType::Leave {
                    "peer left"
                } else {
                    "peer unavailable"
                };
                for conn in self.take_connections_with(src) {
                    conn.remote_closed(reason).await;
                }
            }
            MessageType::Error => {
                warn!(identity = %self.identity, "Signaling server error: {}", msg.error_message());
            }
            other => debug!(?other, "Ignoring signaling message"),
        }
    }

    async fn handle_offer(
        self: &Arc<Self>,
        msg: ServerMessage,
        incoming: &mpsc::Sender<Arc<dyn Connection>>,
    ) {
        let Some(src) = msg.src.clone() else {
            warn!("OFFER without source");
            return;
        };
        let Some(payload) = msg.connection_payload() else {
            warn!(src = %src, "OFFER without payload");
            return;
        };
        if !payload.is_media() {
            warn!(src = %src, kind = %payload.connection_type, "Only media calls are supported, ignoring offer");
            return;
        }
        let Some(sdp) = payload.sdp else {
            warn!(src = %src, "OFFER without sdp");
            return;
        };
        let remote = match PeerIdentity::new(src) {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "OFFER from invalid peer id");
                return;
            }
        };

        let conn = match RtcConnection::incoming(
            &self.settings,
            payload.connection_id.clone(),
            remote,
            self.outbound.clone(),
            sdp,
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to create connection for incoming call");
                return;
            }
        };
        self.track(conn.clone());
        info!(connection = %payload.connection_id, remote = %conn.remote_identity(), "Incoming call");

        if incoming.try_send(conn.clone()).is_err() {
            warn!(connection = %payload.connection_id, "Incoming call queue is full, rejecting");
            conn.close().await;
        }
    }
}

/// Регистрация на сервере PeerJS
pub struct PeerJsPeer {
    link: Arc<PeerLink>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Arc<dyn Connection>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    destroyed: AtomicBool,
}

impl PeerJsPeer {
    fn spawn<W, R>(
        identity: PeerIdentity,
        write: W,
        read: R,
        settings: RtcSettings,
        heartbeat: Duration,
    ) -> Arc<dyn RegisteredPeer>
    where
        W: Sink<WsMessage> + Unpin + Send + 'static,
        R: Stream<Item = Result<WsMessage, WsError>> + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let link = Arc::new(PeerLink {
            identity,
            outbound: outbound_tx,
            connections: Mutex::new(HashMap::new()),
            settings,
        });

        let writer = tokio::spawn(write_loop(write, outbound_rx, shutdown_rx, heartbeat));
        let reader = tokio::spawn(read_loop(link.clone(), read, incoming_tx));

        Arc::new(Self {
            link,
            incoming: tokio::sync::Mutex::new(incoming_rx),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            destroyed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RegisteredPeer for PeerJsPeer {
    fn identity(&self) -> &PeerIdentity {
        &self.link.identity
    }

    async fn call(
        &self,
        remote: &PeerIdentity,
        stream: &MediaStreamHandle,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        let conn = RtcConnection::outgoing(
            &self.link.settings,
            media_connection_id(),
            remote.clone(),
            self.link.outbound.clone(),
        )
        .await?;
        // Регистрируем до OFFER, чтобы ANSWER не потерялся
        self.link.track(conn.clone());
        conn.offer(stream).await?;
        Ok(conn)
    }

    async fn next_incoming(&self) -> Option<Arc<dyn Connection>> {
        self.incoming.lock().await.recv().await
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let conns: Vec<_> = self.link.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in conns {
            conn.close().await;
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let shutdown = self.shutdown.lock().take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                debug!("Signaling writer did not finish in time");
            }
        }
        info!(identity = %self.link.identity, "Peer destroyed");
    }
}

impl Drop for PeerJsPeer {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
    }
}

async fn read_loop<R>(link: Arc<PeerLink>, mut read: R, incoming: mpsc::Sender<Arc<dyn Connection>>)
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => link.handle(msg, &incoming).await,
                Err(_) => debug!(text = %text, "Unrecognized message from signaling server"),
            },
            Ok(WsMessage::Close(_)) => {
                info!(identity = %link.identity, "Signaling server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }
}

async fn write_loop<W>(
    mut write: W,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    mut shutdown: oneshot::Receiver<()>,
    heartbeat: Duration,
) where
    W: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(heartbeat);
    // первый тик срабатывает сразу
    interval.tick().await;

    loop {
        // biased: сначала досылаем очередь, потом смотрим на shutdown
        let msg = tokio::select! {
            biased;
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = &mut shutdown => break,
            _ = interval.tick() => ServerMessage::heartbeat(),
        };
        let Ok(json) = serde_json::to_string(&msg) else {
            continue;
        };
        if write.send(WsMessage::Text(json.into())).await.is_err() {
            debug!("Signaling socket closed while sending");
            break;
        }
    }
    let _ = write.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::media::{MediaTrack, StreamOrigin, TrackKind};
    use crate::peer::types::SessionDescription;
    use protocol::ConnectionPayload;
    use std::future::Future;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::WebSocketStream;

    fn config_for(port: u16) -> SessionConfig {
        SessionConfig {
            server: PeerServerOptions {
                host: "127.0.0.1".into(),
                port,
                secure: false,
                connect_timeout_secs: 2,
                heartbeat_interval_ms: 50,
                ..Default::default()
            },
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    /// Поднимает одноразовый сервер PeerJS; `uri_tx` получает URI запроса
    async fn mock_server<F, Fut>(
        uri_tx: oneshot::Sender<String>,
        handler: F,
    ) -> (SessionConfig, JoinHandle<()>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            })
            .await
            .unwrap();
            handler(ws).await;
        });
        (config_for(port), handle)
    }

    async fn send(ws: &mut WebSocketStream<TcpStream>, json: &str) {
        ws.send(WsMessage::Text(json.to_string().into())).await.unwrap();
    }

    #[tokio::test]
    async fn open_confirms_registration() {
        let (uri_tx, uri_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel::<Vec<String>>();
        let (config, server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"OPEN"}"#).await;
            let mut seen = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    WsMessage::Text(text) => seen.push(text.as_str().to_owned()),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            let _ = done_tx.send(seen);
        })
        .await;

        let signaling = PeerJsSignaling::new(&config);
        let peer = signaling.register(&PeerIdentity::presenter()).await.unwrap();
        assert_eq!(peer.identity(), &PeerIdentity::presenter());

        let uri = uri_rx.await.unwrap();
        assert!(uri.starts_with("/peerjs?key=peerjs&id=presenter&token="));

        // даём сработать паре heartbeat-ов
        tokio::time::sleep(Duration::from_millis(150)).await;
        peer.destroy().await;
        peer.destroy().await;

        let seen = timeout(Duration::from_secs(2), done_rx).await.unwrap().unwrap();
        assert!(seen.iter().any(|m| m.contains("HEARTBEAT")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn taken_identity_is_rejected_not_overwritten() {
        let (uri_tx, _uri_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"ID-TAKEN","payload":{"msg":"ID is taken"}}"#).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let signaling = PeerJsSignaling::new(&config);
        let err = signaling.register(&PeerIdentity::viewer()).await.err().unwrap();
        assert_eq!(err, RegistrationError::IdentityTaken("viewer".into()));
    }

    #[tokio::test]
    async fn server_error_is_a_rejection() {
        let (uri_tx, _uri_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"ERROR","payload":{"msg":"Server is overloaded"}}"#).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let err = PeerJsSignaling::new(&config)
            .register(&PeerIdentity::viewer())
            .await
            .err()
            .unwrap();
        assert_eq!(err, RegistrationError::Rejected("Server is overloaded".into()));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = PeerJsSignaling::new(&config_for(port))
            .register(&PeerIdentity::presenter())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::Unreachable(_)));
    }

    #[tokio::test]
    async fn data_offers_are_ignored_and_destroy_ends_listening() {
        let (uri_tx, _uri_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"OPEN"}"#).await;
            send(
                &mut ws,
                r#"{"type":"OFFER","src":"presenter","dst":"viewer","payload":{"type":"data","connectionId":"dc_1","sdp":{"type":"offer","sdp":"v=0"}}}"#,
            )
            .await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let peer = PeerJsSignaling::new(&config)
            .register(&PeerIdentity::viewer())
            .await
            .unwrap();

        let waiting = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.next_incoming().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        peer.destroy().await;
        assert!(timeout(Duration::from_secs(2), waiting).await.unwrap().unwrap());
    }

    /// Читает сокет до первого сообщения нужного типа
    async fn next_of(
        ws: &mut WebSocketStream<TcpStream>,
        kind: MessageType,
    ) -> Option<ServerMessage> {
        while let Some(Ok(msg)) = ws.next().await {
            if let WsMessage::Text(text) = msg {
                let Ok(parsed) = serde_json::from_str::<ServerMessage>(text.as_str()) else {
                    continue;
                };
                if parsed.kind == kind {
                    return Some(parsed);
                }
            }
        }
        None
    }

    fn local_stream() -> MediaStreamHandle {
        let id = "screen";
        MediaStreamHandle::new(
            id,
            StreamOrigin::Local,
            vec![
                MediaTrack::local(TrackKind::Video, "screen", id),
                MediaTrack::local(TrackKind::Audio, "audio", id),
            ],
        )
    }

    /// Настоящее SDP-предложение от отдельного соединения
    async fn offer_sdp() -> SessionDescription {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let settings = RtcSettings {
            ice_servers: Vec::new(),
            grace_period: Duration::from_secs(1),
        };
        let conn = RtcConnection::outgoing(&settings, "mc_src".into(), PeerIdentity::viewer(), tx)
            .await
            .unwrap();
        conn.offer(&local_stream()).await.unwrap();
        let offer = rx.recv().await.unwrap();
        let sdp = offer.connection_payload().unwrap().sdp.unwrap();
        conn.close().await;
        sdp
    }

    #[tokio::test]
    async fn incoming_offer_is_answered_and_leave_closes_call() {
        let sdp = offer_sdp().await;
        let mut offer = ServerMessage::to(
            MessageType::Offer,
            "viewer",
            ConnectionPayload::description("mc_in", sdp),
        );
        offer.src = Some("presenter".into());
        let offer = serde_json::to_string(&offer).unwrap();

        let (uri_tx, _uri_rx) = oneshot::channel();
        let (answer_tx, answer_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"OPEN"}"#).await;
            send(&mut ws, &offer).await;
            let Some(answer) = next_of(&mut ws, MessageType::Answer).await else {
                return;
            };
            let _ = answer_tx.send(answer);
            send(&mut ws, r#"{"type":"LEAVE","src":"presenter","dst":"viewer"}"#).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let peer = PeerJsSignaling::new(&config)
            .register(&PeerIdentity::viewer())
            .await
            .unwrap();
        let call = timeout(Duration::from_secs(5), peer.next_incoming())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call.id(), "mc_in");
        assert_eq!(call.remote_identity().as_str(), "presenter");

        call.accept().await.unwrap();
        let answer = timeout(Duration::from_secs(5), answer_rx).await.unwrap().unwrap();
        assert_eq!(answer.dst.as_deref(), Some("presenter"));
        let payload = answer.connection_payload().unwrap();
        assert_eq!(payload.connection_id, "mc_in");
        assert!(payload.is_media());
        assert_eq!(payload.sdp.unwrap().sdp_type, "answer");

        timeout(Duration::from_secs(5), call.closed()).await.unwrap();
        peer.destroy().await;
    }

    #[tokio::test]
    async fn expire_closes_outgoing_call() {
        let (uri_tx, _uri_rx) = oneshot::channel();
        let (offer_tx, offer_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"OPEN"}"#).await;
            let Some(offer) = next_of(&mut ws, MessageType::Offer).await else {
                return;
            };
            let _ = offer_tx.send(offer);
            send(&mut ws, r#"{"type":"EXPIRE","src":"viewer","dst":"presenter"}"#).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let peer = PeerJsSignaling::new(&config)
            .register(&PeerIdentity::presenter())
            .await
            .unwrap();
        let call = peer.call(&PeerIdentity::viewer(), &local_stream()).await.unwrap();

        let offer = timeout(Duration::from_secs(5), offer_rx).await.unwrap().unwrap();
        assert_eq!(offer.dst.as_deref(), Some("viewer"));
        assert_eq!(offer.connection_payload().unwrap().connection_id, call.id());

        timeout(Duration::from_secs(5), call.closed()).await.unwrap();
        peer.destroy().await;
    }

    #[tokio::test]
    async fn answer_is_routed_by_connection_id() {
        let (uri_tx, _uri_rx) = oneshot::channel();
        let (leave_tx, leave_rx) = oneshot::channel();
        let (config, _server) = mock_server(uri_tx, |mut ws| async move {
            send(&mut ws, r#"{"type":"OPEN"}"#).await;
            let Some(offer) = next_of(&mut ws, MessageType::Offer).await else {
                return;
            };
            let id = offer.connection_payload().unwrap().connection_id;
            // чужой id не трогает звонок, битый ответ на свой закрывает его
            send(
                &mut ws,
                r#"{"type":"ANSWER","src":"viewer","dst":"presenter","payload":{"type":"media","connectionId":"mc_other","sdp":{"type":"answer","sdp":"v=0"}}}"#,
            )
            .await;
            send(
                &mut ws,
                &format!(
                    r#"{{"type":"CANDIDATE","src":"viewer","dst":"presenter","payload":{{"type":"media","connectionId":"{id}","candidate":{{"candidate":"candidate:1 1 udp 2122260223 192.0.2.1 50000 typ host","sdpMid":"0","sdpMLineIndex":0}}}}}}"#
                ),
            )
            .await;
            send(
                &mut ws,
                &format!(
                    r#"{{"type":"ANSWER","src":"viewer","dst":"presenter","payload":{{"type":"media","connectionId":"{id}","sdp":{{"type":"answer","sdp":"v=0"}}}}}}"#
                ),
            )
            .await;
            let leave = next_of(&mut ws, MessageType::Leave).await;
            let _ = leave_tx.send(leave);
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let peer = PeerJsSignaling::new(&config)
            .register(&PeerIdentity::presenter())
            .await
            .unwrap();
        let call = peer.call(&PeerIdentity::viewer(), &local_stream()).await.unwrap();

        timeout(Duration::from_secs(5), call.closed()).await.unwrap();
        let leave = timeout(Duration::from_secs(5), leave_rx).await.unwrap().unwrap().unwrap();
        assert_eq!(leave.dst.as_deref(), Some("viewer"));
        peer.destroy().await;
    }

    #[test]
    fn ice_servers_are_validated_before_use() {
        let signaling = PeerJsSignaling::new(&SessionConfig::default());
        assert_eq!(signaling.ice_servers().len(), 2);
        let bad = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "turn.example.com".into(),
            username: None,
            credential: None,
        }];
        assert!(signaling.set_ice_servers(bad).is_err());
        assert_eq!(signaling.ice_servers().len(), 2);
    }
}
