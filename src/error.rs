use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("IMAP error: {0}")]
    Protocol(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Start-time failures: no watcher can be produced after one of these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatchError::Connection(_)
                | WatchError::Auth(_)
                | WatchError::Config(_)
                | WatchError::Tls(_)
                | WatchError::Io(_)
        )
    }
}

pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(WatchError::Connection("refused".into()).is_fatal());
        assert!(WatchError::Auth("bad password".into()).is_fatal());
        assert!(!WatchError::Protocol("NO select failed".into()).is_fatal());
        assert!(!WatchError::Decode("no uid".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = WatchError::Protocol("BAD command".to_string());
        assert_eq!(err.to_string(), "IMAP error: BAD command");
    }
}
