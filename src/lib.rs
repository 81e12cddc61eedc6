pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod sink;
pub mod watcher;

// Re-export commonly used types
pub use config::{AccountConfig, ConfigError, ImapSecurity, WatchConfig};
pub use error::{WatchError, WatchResult};
pub use message::{decode, Header, Message};
pub use session::{ImapConnection, ImapSession, MailSession, RawMessage};
pub use sink::{Callback, Delivery, SinkClosed};
pub use watcher::{MailWatcher, StopSignal, WatchHandle, WatchState};
