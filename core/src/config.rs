/// Configuration management
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BROADCAST_PORT: u16 = 8080;
const PROTOCOL_REVISION: u8 = 7;

/// Socket transport for the broadcast endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ws,
    Wss,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Ws => "ws",
            TransportKind::Wss => "wss",
        }
    }
}

/// Where the broadcast server lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    /// Path prefix in front of `/app/<key>` (empty for a bare server)
    pub path: String,
    pub app_key: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BROADCAST_PORT,
            transport: TransportKind::Ws,
            path: String::new(),
            app_key: "app-key".to_string(),
        }
    }
}

impl BroadcastConfig {
    /// Full socket URL, including the protocol query string the server expects
    pub fn socket_url(&self) -> String {
        let path = self.path.trim_end_matches('/');
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!(
            "{}://{}:{}{}/app/{}?protocol={}&client=estate-realtime&version={}",
            self.transport.scheme(),
            self.host,
            self.port,
            path,
            self.app_key,
            PROTOCOL_REVISION,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broadcast server endpoint
    pub broadcast: BroadcastConfig,

    /// Channel authorization endpoint (`POST {socket_id, channel_name}`)
    pub auth_url: String,

    /// Base URL of the REST API
    pub api_base_url: String,

    /// Directory holding the persisted login session
    pub session_dir: PathBuf,

    /// Socket connect + handshake timeout
    pub connect_timeout: Duration,

    /// How long a channel join may wait for the server's verdict
    pub subscribe_timeout: Duration,

    /// Client ping interval when the server does not announce one
    pub activity_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broadcast: BroadcastConfig::default(),
            auth_url: "http://127.0.0.1:8000/broadcasting/auth".to_string(),
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            session_dir: PathBuf::from(".estate"),
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
            activity_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--tls" => {
                    config.broadcast.transport = TransportKind::Wss;
                    i += 1;
                }
                "--host" | "--port" | "--key" | "--path" | "--auth-url" | "--api-url"
                | "--session-dir" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        RealtimeError::Config(format!("{} requires an argument", flag))
                    })?;
                    config.apply(flag, value)?;
                    i += 2;
                }
                other => {
                    return Err(RealtimeError::Config(format!(
                        "Unknown argument: {}\nUsage: {} [--host <host>] [--port <port>] [--key <app-key>] [--path <prefix>] [--tls] [--auth-url <url>] [--api-url <url>] [--session-dir <path>]",
                        other,
                        args.first().map(String::as_str).unwrap_or("inbox")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        for (var, flag) in [
            ("ESTATE_BROADCAST_HOST", "--host"),
            ("ESTATE_BROADCAST_PORT", "--port"),
            ("ESTATE_BROADCAST_KEY", "--key"),
            ("ESTATE_AUTH_URL", "--auth-url"),
            ("ESTATE_API_URL", "--api-url"),
        ] {
            if let Ok(value) = std::env::var(var) {
                config.apply(flag, &value)?;
            }
        }

        Ok(config)
    }

    fn apply(&mut self, flag: &str, value: &str) -> Result<()> {
        match flag {
            "--host" => self.broadcast.host = value.to_string(),
            "--port" => {
                self.broadcast.port = value.parse::<u16>().map_err(|_| {
                    RealtimeError::Config("Port must be a valid number (0-65535)".to_string())
                })?
            }
            "--key" => self.broadcast.app_key = value.to_string(),
            "--path" => self.broadcast.path = value.to_string(),
            "--auth-url" => self.auth_url = value.to_string(),
            "--api-url" => self.api_base_url = value.to_string(),
            "--session-dir" => self.session_dir = PathBuf::from(value),
            _ => return Err(RealtimeError::Config(format!("Unknown flag: {}", flag))),
        }
        Ok(())
    }
}
