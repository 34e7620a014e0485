use crate::error::{RequestError, Result};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Chunks produced by a transport and not yet consumed by the application
#[derive(Debug, Default)]
pub struct ContentBuffer {
    chunks: VecDeque<Bytes>,
    available: usize,
    eof: bool,
    error: Option<RequestError>,
}

impl ContentBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk. Empty chunks and chunks after end-of-content are ignored.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() || self.eof {
            return;
        }
        self.available += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Mark end of content
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Record a transport failure; end of content is implied
    pub fn fail(&mut self, error: RequestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.eof = true;
    }

    /// Copy up to `buf.len()` bytes out of the queued chunks
    pub fn take_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            copied += n;
            if n == front.len() {
                self.chunks.pop_front();
            } else {
                front.advance(n);
            }
        }
        self.available -= copied;
        copied
    }

    /// Release every queued chunk
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.available = 0;
    }

    /// Bytes queued and ready to read
    #[must_use]
    pub fn available(&self) -> usize {
        self.available
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        self.available > 0
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<RequestError> {
        self.error.take()
    }
}

/// Outcome of waiting for content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    TimedOut,
}

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const READY: u8 = 2;

/// Cross-thread signal from a transport to the request that owns the content input.
///
/// The transport keeps a clone and calls [`ReadinessHandle::on_readable`] from its
/// I/O thread. The request side observes the flag with acquire ordering.
#[derive(Debug, Clone, Default)]
pub struct ReadinessHandle {
    state: Arc<AtomicU8>,
}

impl ReadinessHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that content (or end of content, or an error) can be consumed.
    /// Never blocks.
    pub fn on_readable(&self) {
        self.state.store(READY, Ordering::Release);
    }

    /// True once the transport has signalled since the last [`ReadinessHandle::take`]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// True while interest is registered and nothing has been signalled yet
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    pub(crate) fn arm(&self) {
        self.state
            .compare_exchange(IDLE, ARMED, Ordering::AcqRel, Ordering::Acquire)
            .ok();
    }

    /// Consume a pending signal, returning whether there was one
    pub(crate) fn take(&self) -> bool {
        self.state.swap(IDLE, Ordering::AcqRel) == READY
    }
}

/// The production strategy behind a [`super::ContentInput`].
///
/// A transport knows how to get more body bytes from the connection and how to wait
/// for them. The content input decides when to ask.
pub trait ContentTransport: Send {
    /// Parse or buffer whatever content is available without blocking. May add
    /// nothing.
    fn produce_more_content(&mut self, buffer: &mut ContentBuffer);

    /// Block the calling thread until content may be available or `timeout` expires
    fn blocking_await_readable(&mut self, timeout: Duration) -> Readiness;

    /// Arrange for `handle.on_readable()` to be called once content is available.
    /// If content is already available the handle may be signalled immediately.
    fn register_read_interest(&mut self, handle: ReadinessHandle);

    /// Emit an interim `100 Continue` response
    fn send_continue(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Transport for bodies that were fully read along with the request head
#[derive(Debug, Default)]
pub struct BufferedTransport {
    body: Option<Bytes>,
}

impl BufferedTransport {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
        }
    }

    /// A transport for a request without a body
    #[must_use]
    pub fn empty() -> Self {
        Self { body: None }
    }
}

impl ContentTransport for BufferedTransport {
    fn produce_more_content(&mut self, buffer: &mut ContentBuffer) {
        if let Some(body) = self.body.take() {
            buffer.push(body);
        }
        buffer.finish();
    }

    fn blocking_await_readable(&mut self, _timeout: Duration) -> Readiness {
        Readiness::Readable
    }

    fn register_read_interest(&mut self, handle: ReadinessHandle) {
        handle.on_readable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_into_splits_chunks() {
        let mut buffer = ContentBuffer::new();
        buffer.push(Bytes::from_static(b"hello "));
        buffer.push(Bytes::from_static(b"world"));
        assert_eq!(buffer.available(), 11);

        let mut out = [0u8; 8];
        assert_eq!(buffer.take_into(&mut out), 8);
        assert_eq!(&out, b"hello wo");
        assert_eq!(buffer.available(), 3);
        assert_eq!(buffer.take_into(&mut out), 3);
        assert_eq!(&out[..3], b"rld");
        assert!(!buffer.has_content());
    }

    #[test]
    fn test_push_after_eof_is_ignored() {
        let mut buffer = ContentBuffer::new();
        buffer.fail(RequestError::EarlyEof);
        buffer.push(Bytes::from_static(b"late"));
        assert!(buffer.is_eof());
        assert_eq!(buffer.available(), 0);
        assert!(matches!(buffer.take_error(), Some(RequestError::EarlyEof)));
    }

    #[test]
    fn test_readiness_handle_states() {
        let handle = ReadinessHandle::new();
        let transport_side = handle.clone();
        handle.arm();
        assert!(handle.is_armed());
        std::thread::spawn(move || transport_side.on_readable())
            .join()
            .ok();
        assert!(handle.is_ready());
        assert!(handle.take());
        assert!(!handle.take());
    }

    #[test]
    fn test_buffered_transport_signals_immediately() {
        let mut transport = BufferedTransport::new("abc");
        let handle = ReadinessHandle::new();
        transport.register_read_interest(handle.clone());
        assert!(handle.is_ready());

        let mut buffer = ContentBuffer::new();
        transport.produce_more_content(&mut buffer);
        assert_eq!(buffer.available(), 3);
        assert!(buffer.is_eof());
    }
}
