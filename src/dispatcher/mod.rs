//! # Dispatcher Module
//!
//! Nested dispatch of a request to another handler in the same process.
//!
//! ## Overview
//!
//! A [`Dispatcher`] names a target (a path inside a context, or a handler name) and
//! the [`RequestHandler`] that serves it. It is obtained from
//! [`crate::request::RequestContext::request_dispatcher`] or built directly with
//! [`Dispatcher::for_path`] / [`Dispatcher::named`].
//!
//! | Operation | URI and paths | Attributes | Query parameters |
//! |-----------|---------------|------------|------------------|
//! | [`Dispatcher::include`] | unchanged | `dispatch.include.*` = target | current values, then target's |
//! | [`Dispatcher::forward`] | rewritten to the target | `dispatch.forward.*` = first pre-forward location | target's values, then current |
//! | [`Dispatcher::error`] | as forward | as forward | as forward, decode failures ignored |
//! | named include / forward | unchanged | unchanged | unchanged |
//!
//! ## Restoration
//!
//! ```text
//! snapshot ──▶ DispatchScope ──▶ mutate ──▶ handler.handle(..)
//!                   │                              │
//!                   └──────── Drop (always) ◀──────┘
//! ```
//!
//! The [`DispatchScope`] guard owns the snapshot. Its `Drop` puts the request back
//! however the nested call ends, including by panic, so a handler never observes a
//! nested view after its dispatch returns.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reqscope::dispatcher::{RequestHandler, ResponseControl};
//! use reqscope::request::RequestContext;
//! use std::sync::Arc;
//!
//! let handler: Arc<dyn RequestHandler> = Arc::new(
//!     |target: &str, req: &mut RequestContext, _res: &mut dyn ResponseControl| {
//!         tracing::info!(path = target, uri = ?req.request_uri(), "serving");
//!         Ok(())
//!     },
//! );
//! if let Some(dispatcher) = req.request_dispatcher("/b?y=2", handler) {
//!     dispatcher.forward(&mut req, &mut response)?;
//! }
//! ```

mod core;
mod scope;

pub use core::{Dispatcher, OutputMode, RequestHandler, ResponseControl};
pub use scope::DispatchScope;
