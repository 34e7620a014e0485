use super::reader::{BodyReader, CharDecoder};
use super::transport::{ContentBuffer, ContentTransport, Readiness, ReadinessHandle};
use crate::charset::Charset;
use crate::error::{RequestError, Result};
use std::fmt;
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

/// How the application consumes the body. Transitions only leave `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Idle,
    /// Raw bytes through [`ContentInput`]'s `Read` impl
    Stream,
    /// Decoded characters through [`BodyReader`]
    Reader,
}

/// Whether reads block or are driven by readiness callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionMode {
    Blocking,
    Async,
}

/// Callbacks for non-blocking body consumption.
///
/// Callbacks run on the thread that calls [`ContentInput::on_read_possible`]. While a
/// callback runs the listener is detached from the input, so it receives the input
/// mutably and may read from it.
pub trait ReadListener: Send {
    /// Content can be read without blocking. Read while
    /// [`ContentInput::is_ready`] is true.
    fn on_data_available(&mut self, input: &mut ContentInput) -> Result<()>;

    /// All content has been read
    fn on_all_data_read(&mut self, input: &mut ContentInput) -> Result<()>;

    /// The read failed, or one of the other callbacks returned an error
    fn on_error(&mut self, error: &RequestError);
}

/// Body consumption state machine of one request.
///
/// Owned by the request context and reused for every request on the connection.
/// [`ContentInput::attach`] hands it a fresh transport; [`ContentInput::recycle`]
/// returns it to the idle state.
pub struct ContentInput {
    transport: Option<Box<dyn ContentTransport>>,
    buffer: ContentBuffer,
    mode: InputMode,
    production: ProductionMode,
    listener: Option<Box<dyn ReadListener>>,
    readiness: ReadinessHandle,
    read_timeout: Duration,
    consumed: u64,
    expect_continue: bool,
    failure: Option<RequestError>,
    failure_notified: bool,
    all_read_notified: bool,
    pub(super) decoder: CharDecoder,
}

impl fmt::Debug for ContentInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentInput")
            .field("mode", &self.mode)
            .field("production", &self.production)
            .field("available", &self.buffer.available())
            .field("consumed", &self.consumed)
            .field("eof", &self.buffer.is_eof())
            .field("failed", &self.failure.is_some())
            .finish()
    }
}

impl Default for ContentInput {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn io_error_of(error: &RequestError) -> io::Error {
    match error {
        RequestError::Timeout => io::Error::new(io::ErrorKind::TimedOut, error.to_string()),
        RequestError::EarlyEof => io::Error::new(io::ErrorKind::UnexpectedEof, error.to_string()),
        RequestError::Io(e) => io::Error::new(e.kind(), e.to_string()),
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Rebuild an equivalent error, keeping the variant so status mapping survives
fn duplicate(error: &RequestError) -> RequestError {
    match error {
        RequestError::BadMessage { status, reason } => RequestError::bad_message(*status, reason.clone()),
        RequestError::IllegalState(msg) => RequestError::IllegalState(msg.clone()),
        RequestError::UnsupportedEncoding(name) => RequestError::UnsupportedEncoding(name.clone()),
        RequestError::Timeout => RequestError::Timeout,
        RequestError::EarlyEof => RequestError::EarlyEof,
        RequestError::Io(e) => RequestError::Io(io::Error::new(e.kind(), e.to_string())),
        RequestError::Handler(e) => RequestError::Handler(anyhow::anyhow!("{:#}", e)),
        RequestError::AuthenticationFailed(msg) => RequestError::AuthenticationFailed(msg.clone()),
    }
}

impl ContentInput {
    /// Create an idle input whose blocking reads give up after `read_timeout`
    #[must_use]
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            transport: None,
            buffer: ContentBuffer::new(),
            mode: InputMode::Idle,
            production: ProductionMode::Blocking,
            listener: None,
            readiness: ReadinessHandle::new(),
            read_timeout,
            consumed: 0,
            expect_continue: false,
            failure: None,
            failure_notified: false,
            all_read_notified: false,
            decoder: CharDecoder::default(),
        }
    }

    /// Attach the transport of a new request
    pub fn attach(&mut self, transport: Box<dyn ContentTransport>, expect_continue: bool) {
        self.transport = Some(transport);
        self.expect_continue = expect_continue;
    }

    #[must_use]
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    #[must_use]
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    #[must_use]
    pub fn production_mode(&self) -> ProductionMode {
        self.production
    }

    /// Select the byte-stream mode. Fails if the reader mode was chosen.
    pub fn enter_stream(&mut self) -> Result<()> {
        match self.mode {
            InputMode::Idle => {
                self.mode = InputMode::Stream;
                Ok(())
            }
            InputMode::Stream => Ok(()),
            InputMode::Reader => Err(RequestError::illegal_state("READER")),
        }
    }

    /// Select the character mode with `charset`. Fails if the stream mode was chosen.
    pub fn enter_reader(&mut self, charset: Charset) -> Result<()> {
        match self.mode {
            InputMode::Idle => {
                self.mode = InputMode::Reader;
                self.decoder.set_charset(charset);
                Ok(())
            }
            InputMode::Reader => Ok(()),
            InputMode::Stream => Err(RequestError::illegal_state("STREAMED")),
        }
    }

    /// Character reader over the body; requires [`ContentInput::enter_reader`]
    pub fn reader(&mut self) -> Result<BodyReader<'_>> {
        if self.mode != InputMode::Reader {
            return Err(RequestError::illegal_state("reader mode not selected"));
        }
        Ok(BodyReader::new(self))
    }

    /// True if the client sent `Expect: 100-continue` and nothing was read yet
    #[must_use]
    pub fn is_expecting_continue(&self) -> bool {
        self.expect_continue
    }

    /// Send `100 Continue` if the client is waiting for it and no content is buffered
    pub fn send_continue_if_expected(&mut self) -> Result<()> {
        if !self.expect_continue {
            return Ok(());
        }
        self.expect_continue = false;
        if self.buffer.has_content() {
            return Ok(());
        }
        if let Some(transport) = self.transport.as_mut() {
            debug!("sending 100 Continue");
            transport.send_continue()?;
        }
        Ok(())
    }

    /// Ask the transport for more content without blocking
    pub fn request_more_content(&mut self) {
        if self.buffer.has_content() || self.buffer.is_eof() || self.failure.is_some() {
            return;
        }
        match self.transport.as_mut() {
            Some(transport) => transport.produce_more_content(&mut self.buffer),
            None => self.buffer.finish(),
        }
    }

    /// Block until content, end of content or an error is available
    pub fn block_until_content(&mut self) -> Result<()> {
        loop {
            self.request_more_content();
            if self.buffer.has_content() || self.buffer.is_eof() || self.failure.is_some() {
                return Ok(());
            }
            let timeout = self.read_timeout;
            let Some(transport) = self.transport.as_mut() else {
                return Ok(());
            };
            if transport.blocking_await_readable(timeout) == Readiness::TimedOut {
                debug!(timeout_ms = timeout.as_millis() as u64, "blocking read timed out");
                return Err(RequestError::Timeout);
            }
        }
    }

    /// Register interest so the transport signals the readiness handle
    pub fn mark_unready(&mut self) {
        self.readiness.arm();
        if let Some(transport) = self.transport.as_mut() {
            transport.register_read_interest(self.readiness.clone());
        }
    }

    /// Handle the coordinator observes to learn when to call
    /// [`ContentInput::on_read_possible`]
    #[must_use]
    pub fn readiness(&self) -> &ReadinessHandle {
        &self.readiness
    }

    /// Switch to readiness-driven consumption
    pub fn set_read_listener(&mut self, listener: Box<dyn ReadListener>) -> Result<()> {
        if self.listener.is_some() || self.production == ProductionMode::Async {
            return Err(RequestError::illegal_state("ReadListener already set"));
        }
        if self.consumed > 0 {
            return Err(RequestError::illegal_state(
                "ReadListener set after blocking read",
            ));
        }
        self.production = ProductionMode::Async;
        self.listener = Some(listener);
        // Let the first on_read_possible decide what to deliver
        self.readiness.on_readable();
        Ok(())
    }

    /// Non-blocking check for content. In async mode a `false` result arms read
    /// interest.
    pub fn is_ready(&mut self) -> bool {
        if self.production == ProductionMode::Blocking {
            return true;
        }
        self.request_more_content();
        if self.buffer.has_content() || self.buffer.is_eof() || self.failure.is_some() {
            return true;
        }
        self.mark_unready();
        false
    }

    /// True once end of content was reached and every byte consumed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.buffer.is_eof() && !self.buffer.has_content()
    }

    /// Bytes that can be read without blocking
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.available()
    }

    /// Bytes handed to the application so far
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Abandon the read. Buffered chunks are released and the listener learns of
    /// the failure at the next [`ContentInput::on_read_possible`]. Returns false if
    /// the input had already failed.
    pub fn fail(&mut self, error: RequestError) -> bool {
        if self.failure.is_some() {
            return false;
        }
        debug!(error = %error, consumed = self.consumed, "content input failed");
        self.buffer.clear();
        self.failure = Some(error);
        self.readiness.on_readable();
        true
    }

    #[must_use]
    pub fn failure(&self) -> Option<&RequestError> {
        self.failure.as_ref()
    }

    /// Coordinator entry point once the readiness handle fired. Runs the listener
    /// callbacks that the current state calls for and returns whether one ran.
    pub fn on_read_possible(&mut self) -> bool {
        self.readiness.take();
        let Some(mut listener) = self.listener.take() else {
            return false;
        };
        let ran = self.deliver(listener.as_mut());
        if self.listener.is_none() {
            self.listener = Some(listener);
        }
        ran
    }

    fn deliver(&mut self, listener: &mut dyn ReadListener) -> bool {
        if self.failure.is_none() {
            self.request_more_content();
            if self.buffer.has_content() {
                if let Err(e) = listener.on_data_available(self) {
                    self.failure.get_or_insert(e);
                }
            }
        }

        // A transport error is reported only after the bytes queued before it
        if self.failure.is_none() && !self.buffer.has_content() {
            self.failure = self.buffer.take_error();
        }

        if let Some(failure) = &self.failure {
            if self.failure_notified {
                return false;
            }
            self.failure_notified = true;
            listener.on_error(failure);
            return true;
        }

        if self.is_finished() {
            if !self.all_read_notified {
                self.all_read_notified = true;
                if let Err(e) = listener.on_all_data_read(self) {
                    self.failure_notified = true;
                    listener.on_error(&e);
                    self.failure = Some(e);
                }
            }
            return true;
        }

        if !self.buffer.has_content() {
            self.mark_unready();
        }
        true
    }

    /// Read bytes into `buf`; `Ok(0)` at end of content
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(duplicate(failure));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match self.production {
            ProductionMode::Blocking => self.block_until_content()?,
            ProductionMode::Async => {
                self.request_more_content();
                if !self.buffer.has_content() && !self.buffer.is_eof() {
                    return Err(RequestError::illegal_state("read while not ready"));
                }
            }
        }
        if !self.buffer.has_content() {
            if let Some(error) = self.buffer.take_error() {
                let reported = duplicate(&error);
                self.failure = Some(error);
                return Err(reported);
            }
            return Ok(0);
        }
        let n = self.buffer.take_into(buf);
        self.consumed += n as u64;
        self.expect_continue = false;
        Ok(n)
    }

    /// Read and discard the rest of the body
    pub fn consume_all(&mut self) -> Result<u64> {
        let mut scratch = [0u8; 4096];
        let mut skipped = 0u64;
        loop {
            let n = self.read_bytes(&mut scratch)?;
            if n == 0 {
                return Ok(skipped);
            }
            skipped += n as u64;
        }
    }

    /// Return to the idle state for the next request on the connection
    pub fn recycle(&mut self) {
        trace!(consumed = self.consumed, "recycling content input");
        self.transport = None;
        self.buffer = ContentBuffer::new();
        self.mode = InputMode::Idle;
        self.production = ProductionMode::Blocking;
        self.listener = None;
        // Transports of the previous request may still hold the old handle
        self.readiness = ReadinessHandle::new();
        self.consumed = 0;
        self.expect_continue = false;
        self.failure = None;
        self.failure_notified = false;
        self.all_read_notified = false;
        self.decoder = CharDecoder::default();
    }
}

impl io::Read for ContentInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf).map_err(|e| io_error_of(&e))
    }
}
