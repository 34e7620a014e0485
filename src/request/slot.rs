use super::RequestContext;
use crate::content::ContentTransport;
use crate::error::Result;
use crate::runtime_config::RuntimeConfig;
use http::{HeaderMap, Method, Version};
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info};

/// Owner of the single [`RequestContext`] of a connection.
///
/// Requests on a connection are sequential. Each one is served through an
/// [`ActiveRequest`] guard, and dropping the guard always completes and recycles
/// the context, whether the request succeeded, failed or panicked.
#[derive(Debug)]
pub struct ConnectionSlot {
    request: RequestContext,
    served: u64,
}

impl ConnectionSlot {
    #[must_use]
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            request: RequestContext::new(config),
            served: 0,
        }
    }

    /// Start the next request on this connection.
    ///
    /// On a metadata error the context is already recycled when this returns.
    pub fn begin_request(
        &mut self,
        method: Method,
        target: &str,
        version: Version,
        headers: HeaderMap,
        transport: Box<dyn ContentTransport>,
    ) -> Result<ActiveRequest<'_>> {
        self.served += 1;
        let mut active = ActiveRequest { slot: self };
        active.set_metadata(method, target, version, headers)?;
        active.set_content_transport(transport);
        Ok(active)
    }

    /// Serve one request with `handle`, then complete and recycle it
    pub fn serve<T>(
        &mut self,
        method: Method,
        target: &str,
        version: Version,
        headers: HeaderMap,
        transport: Box<dyn ContentTransport>,
        handle: impl FnOnce(&mut RequestContext) -> Result<T>,
    ) -> Result<T> {
        let mut active = self.begin_request(method, target, version, headers, transport)?;
        handle(&mut active)
    }

    /// Record the peer and local addresses of the connection
    pub fn set_endpoints(&mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) {
        self.request.set_connection_endpoints(remote, local);
    }

    /// Number of requests started on this connection
    #[must_use]
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// The idle context between requests
    #[must_use]
    pub fn request(&self) -> &RequestContext {
        &self.request
    }
}

/// The request currently in flight on a [`ConnectionSlot`]
pub struct ActiveRequest<'a> {
    slot: &'a mut ConnectionSlot,
}

impl Deref for ActiveRequest<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        &self.slot.request
    }
}

impl DerefMut for ActiveRequest<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        &mut self.slot.request
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        let request = &mut self.slot.request;
        if std::thread::panicking() {
            info!(request_id = %request.request_id(), "request ended by panic, recycling");
        }
        request.on_completed();
        request.recycle();
        debug!(served = self.slot.served, "connection slot idle");
    }
}
