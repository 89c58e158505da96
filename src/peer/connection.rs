use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

use crate::error::ConnectionError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::collaborators::Connection;
use crate::peer::ice::{add_or_queue, apply_pending_candidates, from_rtc};
use crate::peer::media::{MediaStreamHandle, MediaTrack, StreamOrigin, TrackKind};
use crate::peer::types::{IceCandidate, PeerIdentity, ServerConfig, SessionDescription};
use crate::signaling::protocol::{ConnectionPayload, MessageType, ServerMessage};
use crate::utils::add_ice_url_scheme;

/// Настройки WebRTC для новых соединений
#[derive(Debug, Clone)]
pub struct RtcSettings {
    pub ice_servers: Vec<ServerConfig>,
    /// Период ожидания перед тем, как считать Disconnected закрытым
    pub grace_period: Duration,
}

fn negotiation(e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::Negotiation(e.to_string())
}

/// создаём RTCPeerConnection с кодеками и интерсепторами по умолчанию
pub async fn new_peer_connection(
    settings: &RtcSettings,
) -> Result<Arc<RTCPeerConnection>, ConnectionError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(negotiation)?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(negotiation)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = api
        .new_peer_connection(rtc_config(&settings.ice_servers))
        .await
        .map_err(negotiation)?;
    Ok(Arc::new(pc))
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, ConnectionError> {
    match desc.sdp_type.as_str() {
        "offer" => RTCSessionDescription::offer(desc.sdp).map_err(negotiation),
        "answer" => RTCSessionDescription::answer(desc.sdp).map_err(negotiation),
        other => Err(ConnectionError::Negotiation(format!(
            "unexpected sdp type '{other}'"
        ))),
    }
}

/// Медиа-звонок поверх WebRTC, сигнализация идёт через сокет PeerJS
pub struct RtcConnection {
    connection_id: String,
    remote: PeerIdentity,
    pc: Arc<RTCPeerConnection>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    /// OFFER входящего звонка до accept()
    pending_offer: Mutex<Option<SessionDescription>>,
    /// Кандидаты, полученные до установки remote description
    pending_candidates: Mutex<Vec<IceCandidate>>,
    remote_stream: watch::Sender<Option<MediaStreamHandle>>,
    closed: watch::Sender<bool>,
    /// Отложенная задача для graceful disconnect
    disconnect_task: Mutex<Option<JoinHandle<()>>>,
    grace_period: Duration,
}

impl RtcConnection {
    async fn create(
        settings: &RtcSettings,
        connection_id: String,
        remote: PeerIdentity,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Arc<Self>, ConnectionError> {
        let pc = new_peer_connection(settings).await?;
        let (remote_stream, _) = watch::channel(None);
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Self {
            connection_id,
            remote,
            pc,
            outbound,
            pending_offer: Mutex::new(None),
            pending_candidates: Mutex::new(Vec::new()),
            remote_stream,
            closed,
            disconnect_task: Mutex::new(None),
            grace_period: settings.grace_period,
        });
        conn.install_handlers();
        Ok(conn)
    }

    /// Исходящий звонок; OFFER отправляет [`RtcConnection::offer`]
    pub(crate) async fn outgoing(
        settings: &RtcSettings,
        connection_id: String,
        remote: PeerIdentity,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Arc<Self>, ConnectionError> {
        Self::create(settings, connection_id, remote, outbound).await
    }

    /// Входящий звонок: OFFER сохраняется до accept()
    pub(crate) async fn incoming(
        settings: &RtcSettings,
        connection_id: String,
        remote: PeerIdentity,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        offer: SessionDescription,
    ) -> Result<Arc<Self>, ConnectionError> {
        let conn = Self::create(settings, connection_id, remote, outbound).await?;
        *conn.pending_offer.lock() = Some(offer);
        Ok(conn)
    }

    pub(crate) fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Добавляем локальные дорожки и отправляем OFFER. При ошибке соединение закрывается.
    pub(crate) async fn offer(&self, stream: &MediaStreamHandle) -> Result<(), ConnectionError> {
        let res = self.send_offer(stream).await;
        if res.is_err() {
            self.mark_closed();
            self.shutdown().await;
        }
        res
    }

    async fn send_offer(&self, stream: &MediaStreamHandle) -> Result<(), ConnectionError> {
        for track in stream.tracks() {
            let Some(local) = track.transport_track() else {
                return Err(ConnectionError::Negotiation(format!(
                    "track {} is not bound to a transport",
                    track.id()
                )));
            };
            let sender = self.pc.add_track(local).await.map_err(negotiation)?;
            // RTCP нужно вычитывать, иначе интерсепторы не работают
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        debug!(connection = %self.connection_id, "Creating offer...");
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(negotiation)?;

        let local = self.local_description().await?;
        self.send(MessageType::Offer, ConnectionPayload::description(&self.connection_id, local));
        info!(connection = %self.connection_id, remote = %self.remote, "Offer sent");
        Ok(())
    }

    /// ANSWER от удалённой стороны завершает handshake
    pub(crate) async fn apply_answer(&self, answer: SessionDescription) -> Result<(), ConnectionError> {
        let desc = to_rtc_description(answer)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(negotiation)?;
        debug!(connection = %self.connection_id, "Remote description set successfully");
        apply_pending_candidates(&self.pc, &self.pending_candidates).await;
        Ok(())
    }

    pub(crate) async fn add_remote_candidate(&self, candidate: IceCandidate) {
        add_or_queue(&self.pc, &self.pending_candidates, candidate).await;
    }

    /// Удалённая сторона ушла (LEAVE) или звонок истёк (EXPIRE)
    pub(crate) async fn remote_closed(&self, reason: &str) {
        info!(connection = %self.connection_id, reason, "Call ended by remote side");
        self.mark_closed();
        self.shutdown().await;
    }

    async fn local_description(&self) -> Result<SessionDescription, ConnectionError> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ConnectionError::Negotiation("no local description".into()))?;
        Ok(SessionDescription {
            sdp_type: desc.sdp_type.to_string(),
            sdp: desc.sdp,
        })
    }

    fn send(&self, kind: MessageType, payload: ConnectionPayload) {
        let msg = ServerMessage::to(kind, self.remote.as_str(), payload);
        if self.outbound.send(msg).is_err() {
            warn!(connection = %self.connection_id, "Signaling socket is gone, message dropped");
        }
    }

    fn install_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let (Some(conn), Some(c)) = (weak.upgrade(), cand) else {
                        return;
                    };
                    dump_candidate("LOCAL", &c);
                    if let Some(candidate) = from_rtc(&c) {
                        conn.send(
                            MessageType::Candidate,
                            ConnectionPayload::candidate(&conn.connection_id, candidate),
                        );
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                if let Some(conn) = weak.upgrade() {
                    conn.on_state_change(st);
                }
                Box::pin(async {})
            }));

        let weak = Arc::downgrade(self);
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                if let Some(conn) = weak.upgrade() {
                    conn.on_remote_track(track);
                }
                Box::pin(async {})
            },
        ));
    }

    fn on_state_change(self: &Arc<Self>, st: RTCPeerConnectionState) {
        info!(connection = %self.connection_id, "Peer connection state changed to: {st}");
        match st {
            RTCPeerConnectionState::Connected => {
                // отменяем отложенный disconnect, если он был
                if let Some(handle) = self.disconnect_task.lock().take() {
                    debug!("Aborting pending disconnect task");
                    handle.abort();
                }
            }
            RTCPeerConnectionState::Disconnected => {
                let mut task = self.disconnect_task.lock();
                if task.is_some() {
                    return;
                }
                let weak: Weak<Self> = Arc::downgrade(self);
                let grace = self.grace_period;
                *task = Some(tokio::spawn(async move {
                    debug!("Grace period started, waiting {} s", grace.as_secs());
                    sleep(grace).await;
                    let Some(conn) = weak.upgrade() else { return };
                    let state_now = conn.pc.connection_state();
                    if state_now != RTCPeerConnectionState::Connected {
                        info!("Grace over ➜ state={state_now}, treating connection as closed");
                        dump_selected_pair(&conn.pc, "GRACE-OVER").await;
                        conn.mark_closed();
                    }
                }));
            }
            RTCPeerConnectionState::Failed => {
                let pc = self.pc.clone();
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
                self.mark_closed();
            }
            RTCPeerConnectionState::Closed => {
                self.mark_closed();
            }
            _ => {}
        }
    }

    fn on_remote_track(&self, track: Arc<TrackRemote>) {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => {
                warn!("Ignoring remote track of unspecified kind");
                return;
            }
        };
        let stream_id = track.stream_id();
        let media = MediaTrack::remote(track.id(), kind, format!("{} {:?}", self.remote, kind));
        info!(connection = %self.connection_id, stream = %stream_id, ?kind, "Remote track arrived");

        let for_stream = media.clone();
        self.remote_stream.send_modify(|slot| match slot {
            Some(stream) => stream.add_track(for_stream),
            None => {
                *slot = Some(MediaStreamHandle::new(
                    stream_id,
                    StreamOrigin::Remote,
                    vec![for_stream],
                ))
            }
        });

        // Дорожка заканчивается, когда удалённая сторона перестаёт слать RTP
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = media.ended() => break,
                    res = track.read_rtp() => match res {
                        Ok((packet, _)) => media.publish_rtp(packet),
                        Err(e) => {
                            debug!(track = %media.id(), "Remote track finished: {e}");
                            break;
                        }
                    },
                }
            }
            media.stop();
        });
    }

    /// Возвращает true, если соединение закрыто этим вызовом
    fn mark_closed(&self) -> bool {
        let changed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if changed {
            if let Some(handle) = self.disconnect_task.lock().take() {
                handle.abort();
            }
            let stream = self.remote_stream.borrow().clone();
            if let Some(stream) = stream {
                stream.stop_all();
            }
        }
        changed
    }

    async fn shutdown(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(connection = %self.connection_id, "Peer connection close failed: {e}");
        }
    }
}

#[async_trait]
impl Connection for RtcConnection {
    fn id(&self) -> &str {
        &self.connection_id
    }

    fn remote_identity(&self) -> &PeerIdentity {
        &self.remote
    }

    async fn accept(&self) -> Result<(), ConnectionError> {
        if *self.closed.borrow() {
            return Err(ConnectionError::Closed);
        }
        let offer = self
            .pending_offer
            .lock()
            .take()
            .ok_or_else(|| ConnectionError::Negotiation("call was already answered".into()))?;

        debug!(connection = %self.connection_id, "Setting remote description (offer)...");
        self.pc
            .set_remote_description(to_rtc_description(offer)?)
            .await
            .map_err(negotiation)?;
        apply_pending_candidates(&self.pc, &self.pending_candidates).await;

        debug!(connection = %self.connection_id, "Creating answer...");
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(negotiation)?;

        let local = self.local_description().await?;
        self.send(MessageType::Answer, ConnectionPayload::description(&self.connection_id, local));
        info!(connection = %self.connection_id, remote = %self.remote, "Call answered");
        Ok(())
    }

    async fn remote_stream(&self) -> Result<MediaStreamHandle, ConnectionError> {
        let mut stream_rx = self.remote_stream.subscribe();
        let mut closed_rx = self.closed.subscribe();
        tokio::select! {
            stream = async { stream_rx.wait_for(Option::is_some).await.ok().and_then(|s| s.clone()) } => {
                stream.ok_or(ConnectionError::Closed)
            }
            _ = async { closed_rx.wait_for(|c| *c).await.is_ok() } => Err(ConnectionError::Closed),
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    async fn close(&self) {
        if self.mark_closed() {
            // Сообщаем удалённой стороне, что звонок завершён
            let _ = self.outbound.send(ServerMessage::leave(self.remote.as_str()));
            info!(connection = %self.connection_id, "Call closed");
        }
        self.shutdown().await;
    }
}
