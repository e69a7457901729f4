//! Gateway configuration.
//!
//! Loading flow:
//! 1. Start with compiled defaults
//! 2. Merge the JSON file at `path`, when one is given
//! 3. Merge `WSGATE_`-prefixed environment variables (highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides (`WSGATE_PORT=9000`).
pub const ENV_PREFIX: &str = "WSGATE_";

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    /// A layer could not be parsed or did not fit the target type.
    #[error(transparent)]
    Invalid(#[from] Box<figment::Error>),
}

/// Configuration for the gateway server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for connection tasks to finish.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            outbound_capacity: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load from defaults, optional JSON file and environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_layered(path)
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// File and environment layers without defaults.
///
/// Every settings type in the process reads from the same file and prefix,
/// so one JSON document can hold the server and application sections side by
/// side at the top level.
pub fn layers(path: Option<&Path>) -> Result<Figment, ConfigError> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_owned()));
        }
        figment = figment.merge(Json::file(path));
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
}

/// Extract `T` from its defaults overlaid with [`layers`].
pub fn load_layered<T>(path: Option<&Path>) -> Result<T, ConfigError>
where
    T: Default + Serialize + DeserializeOwned,
{
    Figment::from(Serialized::defaults(T::default()))
        .merge(layers(path)?)
        .extract()
        .map_err(|e| ConfigError::Invalid(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.outbound_capacity, 256);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(r#"{"port": 9000, "outbound_capacity": 8}"#);
        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.outbound_capacity, 8);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let file = write_config(r#"{"database_path": "/tmp/x.db", "max_connections": 3}"#);
        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.max_connections, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/wsgate.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn wrong_type_is_invalid() {
        let file = write_config(r#"{"port": "not a port"}"#);
        let err = ServerConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
