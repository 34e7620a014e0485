//! # reqscope
//!
//! **reqscope** is the request core of an embedded HTTP server: a recyclable request
//! object with re-entrant include / forward / error dispatch and a body input that
//! works both blocking and readiness-driven.
//!
//! ## Overview
//!
//! The crate does not parse HTTP or route requests. A connection layer hands it the
//! request line, headers and a [`content::ContentTransport`]; a routing layer
//! implements [`dispatcher::RequestHandler`]. In between, reqscope keeps the
//! request's view consistent across nested dispatches.
//!
//! ## Architecture
//!
//! - **[`request`]** - [`RequestContext`] and the per-connection [`ConnectionSlot`]
//! - **[`dispatcher`]** - include / forward / error with scoped restoration
//! - **[`attributes`]** - layered attribute view with the reserved `dispatch.*` keys
//! - **[`params`]** - multi-valued query / form parameters and their merge order
//! - **[`content`]** - body state machine, transports, character reader
//! - **[`uri`]** - rewritable request URI and path canonicalisation
//! - **[`session`]**, **[`auth`]** - session entry bookkeeping and authentication state
//! - **[`runtime_config`]** - limits and timeouts from env / YAML
//! - **[`logging`]** - `tracing` subscriber setup
//!
//! ### Request lifecycle
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Conn as Connection
//!     participant Slot as ConnectionSlot
//!     participant Req as RequestContext
//!     participant Disp as Dispatcher
//!     participant H as RequestHandler
//!
//!     Conn->>Slot: begin_request(method, target, headers, transport)
//!     Slot->>Req: set_metadata + set_content_transport
//!     Conn->>H: handle(target, req, response)
//!     H->>Disp: request_dispatcher("/b?y=2").forward(..)
//!     Disp->>Req: snapshot, rewrite URI, merge query, push overlay
//!     Disp->>H: handle("/b", req, response)
//!     H-->>Disp: Ok / Err / panic
//!     Disp->>Req: DispatchScope::drop restores the snapshot
//!     Conn->>Slot: drop ActiveRequest
//!     Slot->>Req: on_completed + recycle
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reqscope::{ConnectionSlot, RuntimeConfig};
//! use reqscope::content::BufferedTransport;
//! use std::sync::Arc;
//!
//! reqscope::logging::init_logging()?;
//! let mut slot = ConnectionSlot::new(Arc::new(RuntimeConfig::from_env()));
//! let name = slot.serve(
//!     http::Method::POST,
//!     "/greet?lang=en",
//!     http::Version::HTTP_11,
//!     headers,
//!     Box::new(BufferedTransport::new("name=world")),
//!     |req| req.parameter("name"),
//! )?;
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `REQSCOPE_MAX_FORM_CONTENT_SIZE` | `200000` | largest form body parsed into parameters |
//! | `REQSCOPE_MAX_FORM_KEYS` | `1000` | most keys accepted in a form body |
//! | `REQSCOPE_BLOCKING_READ_TIMEOUT_MS` | `30000` | blocking body read timeout |
//! | `REQSCOPE_FORM_ENCODED_METHODS` | `POST,PUT` | methods whose form bodies are parsed |
//! | `REQSCOPE_DEFAULT_READER_CHARSET` | `ISO-8859-1` | reader charset when none is declared |
//! | `REQSCOPE_LOG_LEVEL` / `REQSCOPE_LOG_FORMAT` | `info` / `json` | logging, see [`logging`] |

pub mod attributes;
pub mod auth;
pub mod charset;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod params;
pub mod request;
pub mod runtime_config;
pub mod session;
pub mod uri;

pub use attributes::{AttributeValue, Attributes, RouteMapping};
pub use dispatcher::{Dispatcher, OutputMode, RequestHandler, ResponseControl};
pub use error::{RequestError, Result};
pub use request::{ActiveRequest, ConnectionSlot, DispatchKind, RequestContext};
pub use runtime_config::RuntimeConfig;
