use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{configuration::RTCConfiguration, RTCPeerConnection},
};

use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;

pub fn to_rtc_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub fn from_rtc(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    let init = candidate.to_json().ok()?;
    Some(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

/// Применяет кандидат от удалённой стороны. Если remote description ещё не
/// установлен, кандидат откладывается в `pending`.
pub async fn add_or_queue(
    pc: &RTCPeerConnection,
    pending: &parking_lot::Mutex<Vec<IceCandidate>>,
    candidate: IceCandidate,
) {
    if pc.remote_description().await.is_some() {
        match pc.add_ice_candidate(to_rtc_init(candidate)).await {
            Ok(_) => debug!("Successfully added ICE candidate"),
            Err(e) => warn!("Failed to add ICE candidate: {e}"),
        }
    } else {
        debug!("Remote description not set yet, queuing candidate");
        pending.lock().push(candidate);
    }
}

/// Применяет все отложенные кандидаты после установки remote description
pub async fn apply_pending_candidates(
    pc: &RTCPeerConnection,
    pending: &parking_lot::Mutex<Vec<IceCandidate>>,
) {
    let candidates = pending.lock().drain(..).collect::<Vec<_>>();

    for candidate in candidates {
        debug!("Applying pending candidate: {}", candidate.candidate);
        if let Err(e) = pc.add_ice_candidate(to_rtc_init(candidate)).await {
            warn!("Failed to apply pending candidate: {e}");
        }
    }
}

/// Проверяет, что ICE сервер отвечает: собираем кандидаты и ищем srflx/relay
pub async fn check_ice_server_availability(config: &ServerConfig, wait: Duration) -> bool {
    let url = add_ice_url_scheme(config);
    info!(url = %url, kind = %config.r#type, "Checking ICE server availability");

    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![url],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        }],
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    let pc = match api.new_peer_connection(rtc_config).await {
        Ok(pc) => Arc::new(pc),
        Err(e) => {
            warn!("Failed to create peer connection: {e}");
            return false;
        }
    };

    let wanted = if config.r#type == "turn" {
        RTCIceCandidateType::Relay
    } else {
        RTCIceCandidateType::Srflx
    };

    let (tx, mut rx) = mpsc::channel::<bool>(16);
    let cand_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = cand_tx.clone();
        Box::pin(async move {
            if let Some(c) = cand {
                if c.typ == wanted {
                    let _ = tx.send(true).await;
                }
            }
        })
    }));
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        let tx = tx.clone();
        Box::pin(async move {
            if state == RTCIceGathererState::Complete {
                let _ = tx.send(false).await;
            }
        })
    }));

    // Кандидаты начинают собираться только после set_local_description
    let ok = match pc.create_data_channel("probe", None).await {
        Ok(_) => match pc.create_offer(None).await {
            Ok(offer) => pc.set_local_description(offer).await.is_ok(),
            Err(_) => false,
        },
        Err(_) => false,
    };

    let available = ok && matches!(timeout(wait, rx.recv()).await, Ok(Some(true)));
    let _ = pc.close().await;
    info!(available, "ICE server check finished");
    available
}
