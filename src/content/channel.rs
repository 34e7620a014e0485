//! Transport fed over a `may` channel.
//!
//! The connection's reader (a thread or coroutine) owns a [`ContentFeeder`] and pushes
//! body chunks as they arrive; the request side owns the [`ChannelTransport`]. When the
//! request has registered read interest, every feed signals its [`ReadinessHandle`].

use super::transport::{ContentBuffer, ContentTransport, Readiness, ReadinessHandle};
use crate::error::{RequestError, Result};
use bytes::Bytes;
use may::sync::mpsc;
use parking_lot::Mutex;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug)]
enum Feed {
    Chunk(Bytes),
    End,
    Failed(String),
}

type InterestSlot = Arc<Mutex<Option<ReadinessHandle>>>;

/// Request side of a channel transport
pub struct ChannelTransport {
    rx: mpsc::Receiver<Feed>,
    pending: Option<Feed>,
    interest: InterestSlot,
    closed: bool,
}

/// Connection side of a channel transport
#[derive(Clone)]
pub struct ContentFeeder {
    tx: mpsc::Sender<Feed>,
    interest: InterestSlot,
}

/// Create a connected transport/feeder pair
#[must_use]
pub fn channel_transport() -> (ChannelTransport, ContentFeeder) {
    let (tx, rx) = mpsc::channel();
    let interest: InterestSlot = Arc::new(Mutex::new(None));
    (
        ChannelTransport {
            rx,
            pending: None,
            interest: Arc::clone(&interest),
            closed: false,
        },
        ContentFeeder { tx, interest },
    )
}

impl ChannelTransport {
    fn apply(&mut self, feed: Feed, buffer: &mut ContentBuffer) {
        match feed {
            Feed::Chunk(chunk) => buffer.push(chunk),
            Feed::End => {
                self.closed = true;
                buffer.finish();
            }
            Feed::Failed(reason) => {
                self.closed = true;
                buffer.fail(RequestError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    reason,
                )));
            }
        }
    }
}

impl ContentTransport for ChannelTransport {
    fn produce_more_content(&mut self, buffer: &mut ContentBuffer) {
        if let Some(feed) = self.pending.take() {
            self.apply(feed, buffer);
        }
        while !self.closed {
            match self.rx.try_recv() {
                Ok(feed) => self.apply(feed, buffer),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("content feeder dropped before end of content");
                    self.closed = true;
                    buffer.fail(RequestError::EarlyEof);
                }
            }
        }
    }

    fn blocking_await_readable(&mut self, timeout: Duration) -> Readiness {
        if self.pending.is_some() || self.closed {
            return Readiness::Readable;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(feed) => {
                self.pending = Some(feed);
                Readiness::Readable
            }
            Err(RecvTimeoutError::Timeout) => Readiness::TimedOut,
            // produce_more_content reports the disconnect
            Err(RecvTimeoutError::Disconnected) => Readiness::Readable,
        }
    }

    fn register_read_interest(&mut self, handle: ReadinessHandle) {
        *self.interest.lock() = Some(handle);
        // Content that arrived before interest was armed would never signal
        if self.pending.is_none() && !self.closed {
            match self.rx.try_recv() {
                Ok(feed) => self.pending = Some(feed),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {}
            }
        }
        if let Some(handle) = self.interest.lock().take() {
            trace!("content already available, signalling readable");
            handle.on_readable();
        }
    }
}

impl ContentFeeder {
    fn feed(&self, feed: Feed) -> Result<()> {
        self.tx
            .send(feed)
            .map_err(|_| RequestError::illegal_state("content transport is gone"))?;
        if let Some(handle) = self.interest.lock().take() {
            handle.on_readable();
        }
        Ok(())
    }

    /// Deliver a body chunk
    pub fn send(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.feed(Feed::Chunk(chunk.into()))
    }

    /// Signal end of content
    pub fn finish(&self) -> Result<()> {
        self.feed(Feed::End)
    }

    /// Signal that the connection failed mid-body
    pub fn abort(&self, reason: impl Into<String>) -> Result<()> {
        self.feed(Feed::Failed(reason.into()))
    }
}
