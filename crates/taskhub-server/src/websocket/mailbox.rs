//! Bounded per-client outbound queue.
//!
//! Producers (the hub, and the client's own read pump for pongs) enqueue
//! without waiting; the write pump is the only consumer. Closing drops the
//! sending half, so the write pump drains what was queued before the close and
//! then sees the end of the stream.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::connection::Frame;

/// Receiving half, owned by the write pump.
pub type MailboxReceiver = mpsc::Receiver<Frame>;

/// Why a frame was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The consumer is not keeping up.
    #[error("mailbox full")]
    Full,
    /// The mailbox has been closed.
    #[error("mailbox closed")]
    Closed,
}

/// Sending half of a client's outbound queue.
#[derive(Debug)]
pub struct Mailbox {
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    capacity: usize,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` frames.
    ///
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> (Self, MailboxReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let mailbox = Self {
            tx: Mutex::new(Some(tx)),
            capacity,
        };
        (mailbox, rx)
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the mailbox. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn text(s: &str) -> Frame {
        Frame::Text(s.into())
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mailbox, mut rx) = Mailbox::new(4);
        mailbox.try_enqueue(text("a")).unwrap();
        mailbox.try_enqueue(text("b")).unwrap();
        assert_eq!(rx.recv().await, Some(text("a")));
        assert_eq!(rx.recv().await, Some(text("b")));
    }

    #[test]
    fn full_mailbox_rejects() {
        let (mailbox, _rx) = Mailbox::new(1);
        mailbox.try_enqueue(text("a")).unwrap();
        assert_matches!(mailbox.try_enqueue(text("b")), Err(EnqueueError::Full));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (mailbox, mut rx) = Mailbox::new(4);
        mailbox.try_enqueue(text("a")).unwrap();
        assert!(mailbox.close());
        assert_matches!(mailbox.try_enqueue(text("b")), Err(EnqueueError::Closed));
        assert_eq!(rx.recv().await, Some(text("a")));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn close_reports_once() {
        let (mailbox, _rx) = Mailbox::new(1);
        assert!(!mailbox.is_closed());
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());
    }

    #[test]
    fn dropped_receiver_reads_as_closed() {
        let (mailbox, rx) = Mailbox::new(1);
        drop(rx);
        assert_matches!(mailbox.try_enqueue(text("a")), Err(EnqueueError::Closed));
    }

    #[test]
    fn zero_capacity_clamped() {
        let (mailbox, _rx) = Mailbox::new(0);
        assert_eq!(mailbox.capacity(), 1);
    }
}
