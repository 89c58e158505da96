use tauri::{command, State};
use tracing::info;

use super::AppState;
use crate::error::ConfigError;
use crate::peer::ice;
use crate::peer::types::ServerConfig;

const ICE_CHECK_WAIT_SECS: u64 = 5;

/// Заменяет ICE серверы для следующих соединений
#[command]
pub fn set_ice_servers(
    state: State<'_, AppState>,
    servers: Vec<ServerConfig>,
) -> Result<(), ConfigError> {
    info!(count = servers.len(), "Setting custom ICE servers");
    state.signaling.set_ice_servers(servers)
}

#[command]
pub fn get_ice_servers(state: State<'_, AppState>) -> Vec<ServerConfig> {
    state.signaling.ice_servers()
}

#[command]
pub async fn check_ice_server_availability(config: ServerConfig) -> bool {
    ice::check_ice_server_availability(
        &config,
        std::time::Duration::from_secs(ICE_CHECK_WAIT_SECS),
    )
    .await
}
