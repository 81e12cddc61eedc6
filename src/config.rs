use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Failed to create config directory")]
    CreateDirError,

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImapSecurity {
    /// TLS from the first byte (port 993).
    Ssl,
    /// Plain connect upgraded with STARTTLS before login.
    StartTls,
}

impl Default for ImapSecurity {
    fn default() -> Self {
        ImapSecurity::Ssl
    }
}

fn default_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_window() -> u32 {
    1
}

fn default_filter() -> String {
    "UNSEEN".to_string()
}

fn default_max_backoff_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub security: ImapSecurity,
}

impl AccountConfig {
    /// Builds an account from a `host:port` address. A bare host gets port 993.
    pub fn from_address(username: &str, password: &str, address: &str) -> Result<Self, ConfigError> {
        let (server, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("bad port in address '{}'", address)))?;
                (host.to_string(), port)
            }
            None => (address.to_string(), default_port()),
        };

        if server.is_empty() {
            return Err(ConfigError::Invalid(format!("missing host in address '{}'", address)));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            server,
            port,
            security: ImapSecurity::Ssl,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub account: AccountConfig,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Number of most recent messages requested per cycle.
    #[serde(default = "default_window")]
    pub window: u32,
    /// IMAP search criteria; empty disables the search step.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
    /// Consecutive failed cycles before the wait starts doubling. 0 disables backoff.
    #[serde(default)]
    pub backoff_after: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl WatchConfig {
    pub fn new(account: AccountConfig) -> Self {
        Self {
            account,
            mailbox: default_mailbox(),
            interval_secs: default_interval_secs(),
            window: default_window(),
            filter: default_filter(),
            io_timeout_secs: None,
            backoff_after: 0,
            max_backoff_secs: default_max_backoff_secs(),
        }
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(Path::new(path))?;
        let config: WatchConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let path = Path::new(path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::CreateDirError)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.server.is_empty() {
            return Err(ConfigError::Invalid("server must not be empty".to_string()));
        }
        if self.account.username.is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".to_string()));
        }
        if self.mailbox.is_empty() {
            return Err(ConfigError::Invalid("mailbox must not be empty".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be positive".to_string()));
        }
        if self.window == 0 {
            return Err(ConfigError::Invalid("window must be positive".to_string()));
        }
        if self.io_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("io_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
