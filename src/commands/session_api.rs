use tauri::{command, AppHandle, Manager, State};

use super::AppState;
use crate::error::{FullscreenUnsupported, SessionError};
use crate::session::SessionSnapshot;

/// стать презентером
#[command]
pub async fn start_presenter(state: State<'_, AppState>) -> Result<SessionSnapshot, SessionError> {
    state.session.start_presenter().await?;
    Ok(state.session.snapshot())
}

/// стать зрителем и ждать звонка
#[command]
pub async fn start_viewer(state: State<'_, AppState>) -> Result<SessionSnapshot, SessionError> {
    state.session.start_viewer().await?;
    Ok(state.session.snapshot())
}

/// сброс не может завершиться ошибкой. Владеющий AppHandle вместо
/// State<'_>, иначе асинхронная команда обязана возвращать Result.
#[command]
pub async fn reset(app: AppHandle) -> SessionSnapshot {
    let session = app.state::<AppState>().session.clone();
    session.reset().await;
    session.snapshot()
}

#[command]
pub fn enter_full_screen(
    state: State<'_, AppState>,
) -> Result<Option<String>, FullscreenUnsupported> {
    Ok(state.presentation.enter_full_screen()?.map(str::to_string))
}

#[command]
pub fn session_state(state: State<'_, AppState>) -> SessionSnapshot {
    state.session.snapshot()
}
