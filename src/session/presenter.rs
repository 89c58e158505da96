use tracing::info;

use super::{SessionController, SessionPhase};
use crate::error::{CaptureError, SessionError};
use crate::peer::types::PeerIdentity;

/// Регистрация, затем захват, затем один звонок зрителю
pub(super) async fn run(controller: &SessionController, epoch: u64) -> Result<(), SessionError> {
    let identity = PeerIdentity::presenter();
    let peer = controller.signaling().register(&identity).await?;
    let committed = controller.update(epoch, |st| {
        st.peer = Some(peer.clone());
        st.set_phase(SessionPhase::Capturing);
    });
    if committed.is_none() {
        peer.destroy().await;
        return Err(SessionError::Cancelled);
    }
    info!(%identity, "Registered, requesting screen capture");

    // Захват только после подтверждённой регистрации
    let stream = controller
        .capture()
        .request_display_capture(controller.constraints())
        .await?;
    if stream.tracks().is_empty() {
        stream.stop_all();
        return Err(CaptureError::NoSource("capture returned no tracks".into()).into());
    }
    if controller
        .update(epoch, |st| st.local_stream = Some(stream.clone()))
        .is_none()
    {
        stream.stop_all();
        return Err(SessionError::Cancelled);
    }
    info!(stream = stream.id(), tracks = stream.tracks().len(), "Screen captured");

    let connection = peer.call(&PeerIdentity::viewer(), &stream).await?;
    let committed = controller.update(epoch, |st| {
        st.connection = Some(connection.clone());
        st.set_phase(SessionPhase::Connected);
    });
    if committed.is_none() {
        connection.close().await;
        return Err(SessionError::Cancelled);
    }
    info!(connection = connection.id(), "Calling viewer");

    controller.watch_session_end(epoch, connection, stream, "screen sharing stopped");
    Ok(())
}
