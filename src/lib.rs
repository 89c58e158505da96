pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod presentation;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(test)]
mod testing;

pub use config::SessionConfig;
pub use error::{
    CaptureError, ConfigError, ConnectionError, FullscreenUnsupported, RegistrationError,
    SessionError,
};
pub use presentation::{FullscreenProbe, OutputSurface, PresentationAdapter, ProbeOutcome};
pub use session::{Role, SessionController, SessionEvent, SessionPhase, SessionSnapshot};
pub use signaling::PeerJsSignaling;

/// Запускает десктопное приложение. Источник захвата экрана зависит от
/// платформы и передаётся снаружи.
#[cfg(feature = "desktop")]
pub fn run(config: SessionConfig, capture: std::sync::Arc<dyn peer::CaptureSource>) {
    use commands::window::{forward_events, WindowFullscreen, WindowSurface};
    use commands::{session_api, util_api, AppState};
    use std::sync::Arc;
    use tauri::Manager;

    logger::init(&config.logging);

    let signaling = Arc::new(PeerJsSignaling::new(&config));
    let session = SessionController::new(signaling.clone(), capture, config.capture.clone());

    let result = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(move |app| {
            let handle = app.handle().clone();
            let mut presentation = PresentationAdapter::new(session.clone())
                .with_preview(Arc::new(WindowSurface::new(handle.clone(), "preview")))
                .with_playback(Arc::new(WindowSurface::new(handle.clone(), "playback")));
            if let Some(window) = app.get_webview_window("main") {
                presentation = presentation.with_probe(Box::new(WindowFullscreen::new(window)));
            }
            let presentation = Arc::new(presentation);

            let events = session.subscribe();
            let renderer = presentation.clone();
            tauri::async_runtime::spawn(async move {
                let _render = renderer.spawn();
                forward_events(handle, events).await;
            });

            app.manage(AppState {
                session: session.clone(),
                presentation,
                signaling: signaling.clone(),
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            session_api::start_presenter,
            session_api::start_viewer,
            session_api::reset,
            session_api::enter_full_screen,
            session_api::session_state,
            util_api::set_ice_servers,
            util_api::get_ice_servers,
            util_api::check_ice_server_availability,
        ])
        .run(tauri::generate_context!());

    if let Err(e) = result {
        tracing::error!("Error while running tauri application: {e}");
    }
}
