// Конфигурация приложения
// Файла конфигурации нет: значение собирается в коде или приходит JSON-ом от хоста

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::peer::types::{CaptureConstraints, ServerConfig};

/// Дефолтные ICE серверы
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub server: PeerServerOptions,
    pub ice_servers: Vec<ServerConfig>,
    pub capture: CaptureConstraints,
    /// Сколько ждать восстановления транспорта, прежде чем считать его закрытым
    pub grace_period_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: PeerServerOptions::default(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            capture: CaptureConstraints::default(),
            grace_period_secs: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate_ice_servers(&config.ice_servers)?;
        Ok(config)
    }
}

/// Адрес сигнального сервера PeerJS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerServerOptions {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
    pub key: String,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for PeerServerOptions {
    fn default() -> Self {
        Self {
            host: "0.peerjs.com".into(),
            port: 443,
            path: "/".into(),
            secure: true,
            key: "peerjs".into(),
            connect_timeout_secs: 15,
            heartbeat_interval_ms: 5000,
        }
    }
}

impl PeerServerOptions {
    /// URL вебсокета для регистрации `id`
    pub fn socket_url(&self, id: &str, token: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut path = self.path.clone();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        format!(
            "{scheme}://{}:{}{path}peerjs?key={}&id={id}&token={token}&version={}",
            self.host,
            self.port,
            self.key,
            crate::signaling::PROTOCOL_VERSION
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// В продакшене логирование по умолчанию выключено
    pub enabled: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            filter: "info,webrtc=warn".into(),
        }
    }
}

/// Валидация пользовательских ICE серверов
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(ConfigError::MissingTurnCredentials(server.url.clone()));
        }
    }
    Ok(())
}
