use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for a downgate deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub billing: BillingConfig,
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 secret used to verify bearer tokens.
    #[serde(default)]
    pub token_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: String,
}

/// Development-mode settings. Must be disabled in production; enables
/// detailed 5xx error bodies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            billing: BillingConfig::default(),
            dev: DevConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `DOWNGATE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("DOWNGATE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("DOWNGATE_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("DOWNGATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = std::env::var("DOWNGATE_LOG_JSON") {
            config.logging.json = json.parse().unwrap_or(false);
        }
        if let Ok(secret) = std::env::var("DOWNGATE_TOKEN_SECRET") {
            config.auth.token_secret = secret;
        }
        if let Ok(secret) = std::env::var("DOWNGATE_WEBHOOK_SECRET") {
            config.billing.webhook_secret = secret;
        }
        if let Ok(dev) = std::env::var("DOWNGATE_DEV_MODE") {
            config.dev.enabled = dev.parse().unwrap_or(false);
        }

        config
    }

    /// Socket address the server binds to.
    pub fn bind_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .ok()
    }
}
