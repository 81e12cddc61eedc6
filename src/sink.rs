//! Where delivered messages go.

use std::sync::mpsc::{self, Receiver, SyncSender};

use thiserror::Error;

use crate::message::Message;

/// The consumer went away; the watcher stops producing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("delivery sink closed")]
pub struct SinkClosed;

pub trait Delivery: Send {
    fn deliver(&mut self, message: Message) -> Result<(), SinkClosed>;
}

/// Bounded queue. A full queue blocks the watcher until the consumer drains it.
impl Delivery for SyncSender<Message> {
    fn deliver(&mut self, message: Message) -> Result<(), SinkClosed> {
        self.send(message).map_err(|_| SinkClosed)
    }
}

/// Runs a handler on the polling thread, one message at a time.
pub struct Callback<F> {
    handler: F,
}

impl<F> Callback<F>
where
    F: FnMut(Message) + Send,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Delivery for Callback<F>
where
    F: FnMut(Message) + Send,
{
    fn deliver(&mut self, message: Message) -> Result<(), SinkClosed> {
        (self.handler)(message);
        Ok(())
    }
}

/// Creates a bounded message queue. A zero capacity is raised to 1.
pub fn channel(capacity: usize) -> (SyncSender<Message>, Receiver<Message>) {
    mpsc::sync_channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn message(uid: u32) -> Message {
        Message::new(uid, Header::new(), Vec::new())
    }

    #[test]
    fn test_channel_delivers_in_order() {
        let (mut tx, rx) = channel(4);
        tx.deliver(message(1)).unwrap();
        tx.deliver(message(2)).unwrap();
        assert_eq!(rx.recv().unwrap().uid(), 1);
        assert_eq!(rx.recv().unwrap().uid(), 2);
    }

    #[test]
    fn test_full_channel_blocks_instead_of_dropping() {
        let (mut tx, rx) = channel(1);
        tx.deliver(message(1)).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let producer = thread::spawn(move || {
            let result = tx.deliver(message(2));
            done_flag.store(true, Ordering::SeqCst);
            result
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!done.load(Ordering::SeqCst), "second delivery should block");

        assert_eq!(rx.recv().unwrap().uid(), 1);
        assert!(producer.join().unwrap().is_ok());
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(rx.recv().unwrap().uid(), 2);
    }

    #[test]
    fn test_closed_channel() {
        let (mut tx, rx) = channel(0);
        drop(rx);
        let err = tx.deliver(message(1)).unwrap_err();
        assert_eq!(err, SinkClosed);
        assert_eq!(err.to_string(), "delivery sink closed");
    }

    #[test]
    fn test_callback_invokes_handler() {
        let mut seen = Vec::new();
        {
            let mut sink = Callback::new(|m: Message| seen.push(m.uid()));
            sink.deliver(message(5)).unwrap();
            sink.deliver(message(6)).unwrap();
        }
        assert_eq!(seen, vec![5, 6]);
    }
}
