use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{SessionController, SessionEvent, SessionPhase};
use crate::error::{ConnectionError, SessionError};
use crate::peer::collaborators::{Connection, RegisteredPeer};
use crate::peer::types::PeerIdentity;

pub(super) async fn start(controller: &SessionController, epoch: u64) -> Result<(), SessionError> {
    let identity = PeerIdentity::viewer();
    let peer = controller.signaling().register(&identity).await?;
    let committed = controller.update(epoch, |st| {
        st.peer = Some(peer.clone());
        st.set_phase(SessionPhase::Listening);
    });
    if committed.is_none() {
        peer.destroy().await;
        return Err(SessionError::Cancelled);
    }
    info!(%identity, "Registered, waiting for the presenter to call");

    tokio::spawn(listen(controller.clone(), epoch, peer));
    Ok(())
}

/// Принимает входящие звонки, пока регистрация жива.
/// Активное соединение не вытесняется: второй звонок закрывается.
async fn listen(controller: SessionController, epoch: u64, peer: Arc<dyn RegisteredPeer>) {
    while let Some(call) = peer.next_incoming().await {
        let claimed = controller.update(epoch, |st| {
            if st.connection.is_some() {
                false
            } else {
                st.connection = Some(call.clone());
                true
            }
        });
        match claimed {
            None => {
                call.close().await;
                break;
            }
            Some(false) => {
                warn!(
                    connection = call.id(),
                    remote = %call.remote_identity(),
                    "Rejecting call, another connection is active"
                );
                controller.emit(SessionEvent::CallRejected {
                    connection_id: call.id().to_string(),
                    remote: call.remote_identity().to_string(),
                });
                call.close().await;
            }
            Some(true) => {
                info!(connection = call.id(), remote = %call.remote_identity(), "Incoming call");
                tokio::spawn(answer(controller.clone(), epoch, call));
            }
        }
    }
    debug!(epoch, "Stopped listening for calls");
}

async fn answer(controller: SessionController, epoch: u64, call: Arc<dyn Connection>) {
    if let Err(e) = call.accept().await {
        settle(&controller, epoch, e).await;
        return;
    }
    if controller
        .update(epoch, |st| st.set_phase(SessionPhase::Connected))
        .is_none()
    {
        call.close().await;
        return;
    }

    let stream = match call.remote_stream().await {
        Ok(stream) => stream,
        Err(e) => {
            settle(&controller, epoch, e).await;
            return;
        }
    };
    if controller
        .update(epoch, |st| st.remote_stream = Some(stream.clone()))
        .is_none()
    {
        stream.stop_all();
        return;
    }
    info!(stream = stream.id(), tracks = stream.tracks().len(), "Remote stream received");

    controller.watch_session_end(epoch, call, stream, "the presenter stopped sharing");
}

/// Закрытие удалённой стороной завершает сессию, остальное считается сбоем
async fn settle(controller: &SessionController, epoch: u64, err: ConnectionError) {
    match err {
        ConnectionError::Closed => controller.end(epoch, "the presenter left before sharing").await,
        e => controller.fail(epoch, e.into()).await,
    }
}
