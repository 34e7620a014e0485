//! # Content Module
//!
//! Request body consumption. A [`ContentInput`] is a state machine owned by the
//! request; a [`ContentTransport`] is the strategy that produces bytes for it.
//!
//! ## Blocking reads
//!
//! ```text
//! read ──▶ request_more_content ──▶ buffered? ──yes──▶ copy out
//!                                       │ no
//!                                       ▼
//!                        blocking_await_readable(timeout) ──TimedOut──▶ Err(Timeout)
//! ```
//!
//! ## Readiness-driven reads
//!
//! After [`ContentInput::set_read_listener`], nothing blocks. When the input runs dry
//! it registers a [`ReadinessHandle`] with the transport. The transport calls
//! [`ReadinessHandle::on_readable`] from its own thread; the coordinator that sees the
//! flag calls [`ContentInput::on_read_possible`], which runs the [`ReadListener`]
//! callbacks on the request's thread.
//!
//! The byte stream and the character [`BodyReader`] are mutually exclusive for a
//! request; see [`InputMode`].

mod channel;
mod input;
mod reader;
mod transport;

pub use channel::{channel_transport, ChannelTransport, ContentFeeder};
pub use input::{ContentInput, InputMode, ProductionMode, ReadListener};
pub use reader::{BodyReader, CharDecoder};
pub use transport::{BufferedTransport, ContentBuffer, ContentTransport, Readiness, ReadinessHandle};
