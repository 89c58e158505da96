//! Команды и окно Tauri (фича `desktop`).

pub mod session_api;
pub mod util_api;
pub mod window;

use std::sync::Arc;

use crate::presentation::PresentationAdapter;
use crate::session::SessionController;
use crate::signaling::PeerJsSignaling;

/// Состояние приложения, доступное командам через `State`
pub struct AppState {
    pub session: SessionController,
    pub presentation: Arc<PresentationAdapter>,
    pub signaling: Arc<PeerJsSignaling>,
}
