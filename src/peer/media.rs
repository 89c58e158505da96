//! Медиа-потоки и дорожки: локальные (захват) и удалённые (приём).

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::utils::random_id;

/// Ёмкость канала RTP-пакетов удалённой дорожки
const RTP_FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Local,
    Remote,
}

/// Чем дорожка связана с транспортом
enum TrackBinding {
    /// Локальная дорожка: захват пишет сэмплы, транспорт отправляет
    Local(Arc<TrackLocalStaticSample>),
    /// Удалённая дорожка: транспорт раздаёт принятые RTP-пакеты
    Remote(broadcast::Sender<Packet>),
    Unbound,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    state: watch::Sender<TrackState>,
    binding: TrackBinding,
}

/// Одна аудио- или видеодорожка потока
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    fn with_binding(id: String, kind: TrackKind, label: String, binding: TrackBinding) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                label,
                state,
                binding,
            }),
        }
    }

    /// Дорожка без привязки к транспорту
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_binding(random_id(), kind, label.into(), TrackBinding::Unbound)
    }

    /// Локальная дорожка захвата: VP8 для видео, Opus для звука
    pub fn local(kind: TrackKind, label: impl Into<String>, stream_id: &str) -> Self {
        let id = random_id();
        let track = Arc::new(TrackLocalStaticSample::new(
            codec_capability(kind),
            id.clone(),
            stream_id.to_string(),
        ));
        Self::with_binding(id, kind, label.into(), TrackBinding::Local(track))
    }

    /// Удалённая дорожка, в которую транспорт раздаёт RTP-пакеты
    pub(crate) fn remote(id: String, kind: TrackKind, label: String) -> Self {
        let (tx, _) = broadcast::channel(RTP_FANOUT_CAPACITY);
        Self::with_binding(id, kind, label, TrackBinding::Remote(tx))
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == TrackState::Ended
    }

    /// Останавливает дорожку. Повторный вызов ничего не делает.
    pub fn stop(&self) {
        let changed = self.inner.state.send_if_modified(|s| {
            if *s == TrackState::Ended {
                false
            } else {
                *s = TrackState::Ended;
                true
            }
        });
        if changed {
            debug!(track = %self.inner.id, kind = ?self.inner.kind, "Track stopped");
        }
    }

    /// Ждёт окончания дорожки (локальная остановка или конец приёма)
    pub async fn ended(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == TrackState::Ended).await;
    }

    /// Пишет сэмпл захвата в транспорт. Для остановленной дорожки сэмпл отбрасывается.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> webrtc::error::Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        match &self.inner.binding {
            TrackBinding::Local(track) => {
                track
                    .write_sample(&Sample {
                        data,
                        duration,
                        ..Default::default()
                    })
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Подписка на RTP-пакеты удалённой дорожки
    pub fn subscribe_rtp(&self) -> Option<broadcast::Receiver<Packet>> {
        match &self.inner.binding {
            TrackBinding::Remote(tx) => Some(tx.subscribe()),
            _ => None,
        }
    }

    pub(crate) fn publish_rtp(&self, packet: Packet) {
        if let TrackBinding::Remote(tx) = &self.inner.binding {
            // Нет подписчиков — не ошибка
            let _ = tx.send(packet);
        }
    }

    /// Транспортная дорожка для отправки
    pub(crate) fn transport_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        match &self.inner.binding {
            TrackBinding::Local(track) => Some(track.clone() as Arc<dyn TrackLocal + Send + Sync>),
            _ => None,
        }
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.inner.id.clone(),
            kind: self.inner.kind,
            label: self.inner.label.clone(),
            state: self.state(),
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

pub fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    }
}

struct StreamInner {
    id: String,
    origin: StreamOrigin,
    tracks: RwLock<Vec<MediaTrack>>,
    /// Число дорожек; меняется при add_track
    track_count: watch::Sender<usize>,
}

/// Ссылка на медиа-поток. Клоны указывают на один и тот же поток.
#[derive(Clone)]
pub struct MediaStreamHandle {
    inner: Arc<StreamInner>,
}

impl MediaStreamHandle {
    pub fn new(id: impl Into<String>, origin: StreamOrigin, tracks: Vec<MediaTrack>) -> Self {
        let (track_count, _) = watch::channel(tracks.len());
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                origin,
                tracks: RwLock::new(tracks),
                track_count,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn origin(&self) -> StreamOrigin {
        self.inner.origin
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().clone()
    }

    pub(crate) fn add_track(&self, track: MediaTrack) {
        let count = {
            let mut tracks = self.inner.tracks.write();
            tracks.push(track);
            tracks.len()
        };
        self.inner.track_count.send_replace(count);
    }

    /// Следит за появлением новых дорожек
    pub fn watch_tracks(&self) -> watch::Receiver<usize> {
        self.inner.track_count.subscribe()
    }

    /// Останавливает все дорожки потока
    pub fn stop_all(&self) {
        for track in self.inner.tracks.read().iter() {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.inner.tracks.read().iter().all(MediaTrack::is_stopped)
    }

    /// Ждёт, пока закончатся все дорожки потока, включая добавленные позже.
    /// Поток без дорожек не заканчивается.
    pub async fn ended(&self) {
        let mut added = self.watch_tracks();
        loop {
            added.borrow_and_update();
            let tracks = self.tracks();
            if tracks.is_empty() {
                let _ = added.changed().await;
                continue;
            }
            tokio::select! {
                _ = futures_util::future::join_all(tracks.iter().map(MediaTrack::ended)) => {
                    if !added.has_changed().unwrap_or(false) {
                        return;
                    }
                }
                _ = added.changed() => {}
            }
        }
    }

    pub fn same_as(&self, other: &MediaStreamHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.inner.id.clone(),
            origin: self.inner.origin,
            tracks: self.inner.tracks.read().iter().map(MediaTrack::info).collect(),
        }
    }
}

impl std::fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("tracks", &self.inner.tracks.read().len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    pub state: TrackState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: String,
    pub origin: StreamOrigin,
    pub tracks: Vec<TrackInfo>,
}
