//! The polling loop: fetch, deduplicate against the last seen UID, deliver.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{AccountConfig, WatchConfig};
use crate::error::{WatchError, WatchResult};
use crate::message::{decode_batch, Message};
use crate::session::{ImapSession, MailSession};
use crate::sink::{self, Delivery};

/// Cooperative stop flag shared between a watcher and whoever controls it.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` or until stopped, whichever comes first.
    /// Returns true if the signal was raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchState {
    /// Highest UID seen so far. `None` until the baseline is established.
    pub last_seen: Option<u32>,
    pub window: u32,
}

impl Default for WatchState {
    fn default() -> Self {
        Self { last_seen: None, window: 1 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    after: u32,
    max: Duration,
    failures: u32,
}

impl Backoff {
    fn delay(&self, interval: Duration) -> Duration {
        if self.after == 0 || self.failures < self.after {
            return interval;
        }
        let exponent = (self.failures - self.after + 1).min(16);
        interval.saturating_mul(1u32 << exponent).min(self.max.max(interval))
    }
}

type ErrorHook = Box<dyn FnMut(&WatchError) + Send>;

pub struct MailWatcher<S: MailSession> {
    session: S,
    mailbox: String,
    filter: String,
    state: WatchState,
    backoff: Backoff,
    stop: StopSignal,
    on_error: Option<ErrorHook>,
}

impl MailWatcher<ImapSession> {
    /// Connects and logs in using a full configuration. Fails fast, no retry.
    pub fn start(config: &WatchConfig) -> WatchResult<Self> {
        config.validate()?;
        let session = ImapSession::open(&config.account, config.io_timeout())?;
        log::info!("Watcher started for {} on {}", config.mailbox, config.account.address());

        Ok(Self::from_session(session, &config.mailbox)
            .with_window(config.window)
            .with_filter(&config.filter)
            .with_backoff(config.backoff_after, config.max_backoff()))
    }

    /// Connects to `address` (`host:port`, implicit TLS) and logs in.
    pub fn connect(username: &str, password: &str, address: &str, mailbox: &str) -> WatchResult<Self> {
        let account = AccountConfig::from_address(username, password, address)?;
        let session = ImapSession::open(&account, None)?;
        log::info!("Watcher started for {} on {}", mailbox, address);
        Ok(Self::from_session(session, mailbox))
    }
}

impl<S: MailSession> MailWatcher<S> {
    /// Wraps a session that is already authenticated.
    pub fn from_session(session: S, mailbox: &str) -> Self {
        Self {
            session,
            mailbox: mailbox.to_string(),
            filter: "UNSEEN".to_string(),
            state: WatchState::default(),
            backoff: Backoff {
                after: 0,
                max: Duration::from_secs(900),
                failures: 0,
            },
            stop: StopSignal::new(),
            on_error: None,
        }
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.state.window = window.max(1);
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = filter.to_string();
        self
    }

    /// After `after` consecutive failed cycles, double the wait per further
    /// failure up to `max`. `after == 0` keeps a fixed interval.
    pub fn with_backoff(mut self, after: u32, max: Duration) -> Self {
        self.backoff.after = after;
        self.backoff.max = max;
        self
    }

    /// Called with every failed cycle. Failures never reach the message sink.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&WatchError) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn last_seen(&self) -> Option<u32> {
        self.state.last_seen
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Selects the mailbox, optionally searches with `filter`, fetches the
    /// configured window and decodes it. Order is the session's (newest first).
    pub fn fetch_cycle(&mut self, filter: &str) -> WatchResult<Vec<Message>> {
        let info = self.session.select_mailbox(&self.mailbox)?;
        log::debug!("{} has {} messages", self.mailbox, info.exists);

        let scope = if filter.is_empty() {
            None
        } else {
            Some(self.session.search(filter)?)
        };

        let raws = self.session.fetch_recent(self.state.window, scope.as_ref())?;
        Ok(decode_batch(&raws))
    }

    /// Runs one tick. Returns the message to deliver, if any.
    pub fn poll(&mut self) -> Option<Message> {
        let filter = self.filter.clone();
        match self.fetch_cycle(&filter) {
            Ok(messages) => {
                self.backoff.failures = 0;
                self.observe(messages)
            }
            Err(e) => {
                self.backoff.failures = self.backoff.failures.saturating_add(1);
                log::warn!(
                    "Fetch cycle on {} failed ({} in a row): {}",
                    self.mailbox,
                    self.backoff.failures,
                    e
                );
                if let Some(hook) = self.on_error.as_mut() {
                    hook(&e);
                }
                None
            }
        }
    }

    fn observe(&mut self, messages: Vec<Message>) -> Option<Message> {
        let candidate = messages.into_iter().next()?;
        let uid = candidate.uid();

        match self.state.last_seen {
            None => {
                log::debug!("Baseline set at UID {}", uid);
                self.state.last_seen = Some(uid);
                None
            }
            Some(last) if uid > last => {
                log::debug!("New message UID {} (previous {})", uid, last);
                self.state.last_seen = Some(uid);
                Some(candidate)
            }
            Some(last) if uid == last => None,
            Some(last) => {
                // Newest match went away (read, moved or expunged); keep the high-water mark.
                log::debug!("Ignoring UID {} below last seen {}", uid, last);
                None
            }
        }
    }

    /// Logs out of the session.
    pub fn close(mut self) -> WatchResult<()> {
        self.session.logout()
    }

    fn run<D: Delivery>(mut self, mut sink: D, interval: Duration) {
        log::info!("Watching {} every {:?}", self.mailbox, interval);

        loop {
            let wait = self.backoff.delay(interval);
            if self.stop.wait(wait) {
                log::info!("Stop requested for {}", self.mailbox);
                break;
            }

            if let Some(message) = self.poll() {
                if sink.deliver(message).is_err() {
                    log::info!("Delivery sink for {} closed", self.mailbox);
                    break;
                }
            }
        }

        let mailbox = self.mailbox.clone();
        if let Err(e) = self.close() {
            log::error!("Failed to log out of {}: {}", mailbox, e);
        }
    }
}

impl<S: MailSession + 'static> MailWatcher<S> {
    /// Polls every `interval` on a background thread and delivers new
    /// messages to `sink`. At most one message is delivered per tick.
    pub fn watch<D>(self, sink: D, interval: Duration) -> WatchHandle
    where
        D: Delivery + 'static,
    {
        let signal = self.stop.clone();
        let thread = thread::spawn(move || self.run(sink, interval));
        WatchHandle {
            signal,
            thread: Some(thread),
        }
    }

    /// Like [`watch`](Self::watch), but calls `handler` on the current thread
    /// for every delivered message. Returns once the watcher stops, either
    /// through its [`StopSignal`] or because the session loop ended.
    pub fn watch_func<F>(self, interval: Duration, mut handler: F)
    where
        F: FnMut(Message),
    {
        let (tx, rx) = sink::channel(1);
        let handle = self.watch(tx, interval);

        for message in rx.iter() {
            handler(message);
        }

        handle.stop();
    }
}

/// Controls a background watcher. Dropping it stops the watcher.
pub struct WatchHandle {
    signal: StopSignal,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }

    /// Stops the watcher and waits for its thread. A delivery blocked on a
    /// full queue has to be drained by the consumer before this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Lets the watcher run unattended until its stop signal is raised.
    pub fn detach(mut self) {
        self.thread.take();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.signal.stop();
            if let Err(e) = thread.join() {
                log::error!("Error joining watcher thread: {:?}", e);
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
