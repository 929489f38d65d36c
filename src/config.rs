use std::net::{IpAddr, SocketAddr};

const HOST_VAR: &str = "CONSOLIDATOR_HOST";
const PORT_VAR: &str = "CONSOLIDATOR_PORT";
const MAX_REQUEST_BYTES_VAR: &str = "CONSOLIDATOR_MAX_REQUEST_BYTES";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
/// Default cap for a whole multipart request (512 MiB)
const DEFAULT_MAX_REQUEST_BYTES: usize = 512 * 1024 * 1024;

/// Server settings read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or blank keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = ServerConfig::default();

        if let Some(host) = get(HOST_VAR) {
            host.trim().parse::<IpAddr>().map_err(|_| ConfigError::Invalid {
                var: HOST_VAR,
                expected: "IP address",
                value: host.clone(),
            })?;
            config.host = host.trim().to_string();
        }

        if let Some(port) = get(PORT_VAR) {
            config.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                var: PORT_VAR,
                expected: "port number",
                value: port.clone(),
            })?;
        }

        if let Some(limit) = get(MAX_REQUEST_BYTES_VAR) {
            config.max_request_bytes = limit.trim().parse().map_err(|_| ConfigError::Invalid {
                var: MAX_REQUEST_BYTES_VAR,
                expected: "byte count",
                value: limit.clone(),
            })?;
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.port)
    }
}
