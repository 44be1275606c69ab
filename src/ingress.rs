//! Ingress buffer
//!
//! The [`IngressBuffer`] absorbs single device updates and releases them
//! as JSON-array batches on a bounded channel. Writers never wait: a full
//! channel drops the batch and bumps a counter. A flush happens when the
//! queue reaches `min_flush_size`, when `flush_interval` elapses, and once
//! more at shutdown.

use crate::error::IngressError;
use crate::message::{encode_batch, Message};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

/// Ingress sizing and timing
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Queue length that triggers a soft flush
    pub min_flush_size: usize,
    /// Maximum time between forced flushes
    pub flush_interval: Duration,
    /// Flusher wake-up period
    pub poll_interval: Duration,
    /// Batches the output channel holds before dropping
    pub output_capacity: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            min_flush_size: 100,
            flush_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            output_capacity: 16,
        }
    }
}

impl IngressConfig {
    /// Create a configuration with a specific output capacity
    pub fn with_capacity(output_capacity: usize) -> Self {
        Self {
            output_capacity,
            ..Default::default()
        }
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Nothing queued
    Empty,
    /// Below the soft threshold and not forced
    Deferred,
    /// Batch of this many messages handed to the output
    Sent(usize),
    /// Output full; batch of this many messages discarded
    Dropped(usize),
}

/// Ingress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngressSnapshot {
    pub accepted: u64,
    pub malformed: u64,
    pub batches_sent: u64,
    pub batches_dropped: u64,
    pub queued: usize,
}

/// Accumulates updates and releases bounded batches
#[derive(Debug)]
pub struct IngressBuffer {
    config: IngressConfig,
    queue: Mutex<Vec<Message>>,
    last_flush: Mutex<Instant>,
    output: SyncSender<String>,
    closed: AtomicBool,
    accepted: AtomicU64,
    malformed: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
}

impl IngressBuffer {
    /// Create a buffer and the receiving end of its output
    pub fn new(config: IngressConfig) -> (Self, BatchReceiver) {
        let (output, rx) = mpsc::sync_channel(config.output_capacity);
        let buffer = Self {
            queue: Mutex::new(Vec::with_capacity(config.min_flush_size)),
            last_flush: Mutex::new(Instant::now()),
            output,
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            config,
        };
        (buffer, BatchReceiver::new(rx))
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    /// Queue one update
    pub fn enqueue(&self, message: Message) -> Result<(), IngressError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngressError::Closed);
        }
        self.queue.lock().push(message);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue one raw `{address, value}` payload.
    /// Malformed payloads are logged and counted.
    pub fn enqueue_raw(&self, payload: &[u8]) -> Result<(), IngressError> {
        match serde_json::from_slice::<Message>(payload) {
            Ok(message) => self.enqueue(message),
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Discarding malformed payload {:?}: {}",
                    String::from_utf8_lossy(payload),
                    e
                );
                Err(IngressError::Malformed(e))
            }
        }
    }

    /// Messages waiting for the next flush
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Flush the queue.
    ///
    /// Unforced flushes wait for `min_flush_size` messages. The queue is
    /// swapped out under its lock and serialized after it is released.
    pub fn flush(&self, force: bool) -> FlushResult {
        let batch = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return FlushResult::Empty;
            }
            if !force && queue.len() < self.config.min_flush_size {
                return FlushResult::Deferred;
            }
            std::mem::take(&mut *queue)
        };
        *self.last_flush.lock() = Instant::now();

        let count = batch.len();
        let payload = match encode_batch(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode batch of {}: {}", count, e);
                self.batches_dropped.fetch_add(1, Ordering::Relaxed);
                return FlushResult::Dropped(count);
            }
        };

        match self.output.try_send(payload) {
            Ok(()) => {
                self.batches_sent.fetch_add(1, Ordering::Relaxed);
                log::trace!("Flushed batch of {}", count);
                FlushResult::Sent(count)
            }
            Err(TrySendError::Full(_)) => {
                self.batches_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Output full, dropped batch of {}", count);
                FlushResult::Dropped(count)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.batches_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Output closed, dropped batch of {}", count);
                FlushResult::Dropped(count)
            }
        }
    }

    /// Run the flusher until `shutdown` is set, then flush once more.
    pub fn run(&self, shutdown: &AtomicBool) {
        log::info!(
            "Ingress flusher started (min {} msgs, every {:?})",
            self.config.min_flush_size,
            self.config.flush_interval
        );
        while !shutdown.load(Ordering::Acquire) {
            thread::sleep(self.config.poll_interval);
            let due = self.last_flush.lock().elapsed() >= self.config.flush_interval;
            self.flush(due);
        }
        self.close();
    }

    /// Stop accepting updates and perform the final forced flush
    pub fn close(&self) -> FlushResult {
        self.closed.store(true, Ordering::Release);
        let result = self.flush(true);
        log::info!("Ingress closed, final flush: {:?}", result);
        result
    }

    /// Total batches dropped because the output was full
    pub fn dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IngressSnapshot {
        IngressSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            queued: self.queued(),
        }
    }
}

/// Discards queued batches
pub trait Drain {
    /// Drop everything queued, returning how many batches were dropped
    fn drain(&self) -> usize;
}

/// Receiving end of an [`IngressBuffer`]
#[derive(Debug)]
pub struct BatchReceiver {
    rx: Receiver<String>,
}

impl BatchReceiver {
    fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }

    /// Wait up to `timeout` for the next batch
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Next batch, if one is queued
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drain for BatchReceiver {
    fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_batch;

    fn small(capacity: usize) -> IngressConfig {
        IngressConfig {
            min_flush_size: 3,
            flush_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(2),
            output_capacity: capacity,
        }
    }

    #[test]
    fn test_soft_flush_threshold() {
        let (buffer, rx) = IngressBuffer::new(small(4));
        buffer.enqueue(Message::new("d1", 1.0)).unwrap();
        buffer.enqueue(Message::new("d2", 2.0)).unwrap();
        assert_eq!(buffer.flush(false), FlushResult::Deferred);

        buffer.enqueue(Message::new("d3", 3.0)).unwrap();
        assert_eq!(buffer.flush(false), FlushResult::Sent(3));
        assert_eq!(buffer.queued(), 0);

        let batch = parse_batch(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].address, "d3");
    }

    #[test]
    fn test_forced_flush() {
        let (buffer, rx) = IngressBuffer::new(small(4));
        assert_eq!(buffer.flush(true), FlushResult::Empty);
        buffer.enqueue(Message::new("d1", 1.0)).unwrap();
        assert_eq!(buffer.flush(true), FlushResult::Sent(1));
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_full_output_drops() {
        let (buffer, rx) = IngressBuffer::new(small(1));
        buffer.enqueue(Message::new("d1", 1.0)).unwrap();
        assert_eq!(buffer.flush(true), FlushResult::Sent(1));
        buffer.enqueue(Message::new("d2", 2.0)).unwrap();
        assert_eq!(buffer.flush(true), FlushResult::Dropped(1));
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(rx.drain(), 1);
    }

    #[test]
    fn test_enqueue_raw_malformed() {
        let (buffer, _rx) = IngressBuffer::new(small(1));
        assert!(buffer.enqueue_raw(br#"{"address":"d1","value":1}"#).is_ok());
        assert!(matches!(
            buffer.enqueue_raw(b"not json"),
            Err(IngressError::Malformed(_))
        ));
        assert!(buffer.enqueue_raw(br#"[{"address":"d1"}]"#).is_err());

        let snap = buffer.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.malformed, 2);
        assert_eq!(snap.queued, 1);
    }

    #[test]
    fn test_close_rejects_and_flushes() {
        let (buffer, rx) = IngressBuffer::new(small(2));
        buffer.enqueue(Message::new("d1", 1.0)).unwrap();
        assert_eq!(buffer.close(), FlushResult::Sent(1));
        assert!(matches!(
            buffer.enqueue(Message::new("d2", 1.0)),
            Err(IngressError::Closed)
        ));
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_run_final_flush() {
        let (buffer, rx) = IngressBuffer::new(IngressConfig {
            flush_interval: Duration::from_secs(60),
            ..small(4)
        });
        let shutdown = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| buffer.run(&shutdown));
            buffer.enqueue(Message::new("d1", 1.0)).unwrap();
            thread::sleep(Duration::from_millis(10));
            shutdown.store(true, Ordering::Release);
        });

        let batch = parse_batch(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(batch, vec![Message::new("d1", 1.0)]);
        assert!(rx.try_recv().is_none());
    }
}
