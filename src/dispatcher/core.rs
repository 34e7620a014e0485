//! Dispatcher core: include, forward and error dispatch.
//!
//! Every dispatch follows the same shape: snapshot, mutate, call the handler, and
//! restore through [`DispatchScope`]. Nothing between the snapshot and the return
//! may leave the request in the nested view.

use super::scope::DispatchScope;
use crate::attributes::{keys, DispatchField, DispatchRecord, OverlayKind};
use crate::charset::Charset;
use crate::error::Result;
use crate::params::{forward_merge, include_merge};
use crate::request::{DispatchKind, RequestContext};
use crate::uri::{self, HttpUri};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How the response body is being written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    None,
    Stream,
    Writer,
}

/// The response operations a dispatch needs
pub trait ResponseControl {
    /// An include is starting; headers and status become read-only
    fn mark_including(&mut self);

    /// The include has returned
    fn mark_included(&mut self);

    /// Discard buffered content and headers before a forward. Fails if the response
    /// is already committed.
    fn reset_for_forward(&mut self) -> Result<()>;

    fn is_output_closed(&self) -> bool;

    fn output_mode(&self) -> OutputMode;

    fn close_output(&mut self) -> Result<()>;

    fn close_writer(&mut self) -> Result<()>;

    fn is_committed(&self) -> bool;
}

/// Downstream routing and handling
///
/// Handlers may dispatch again from inside `handle`; the request is always in a
/// consistent view when they are called.
pub trait RequestHandler: Send + Sync {
    fn handle(
        &self,
        target: &str,
        request: &mut RequestContext,
        response: &mut dyn ResponseControl,
    ) -> Result<()>;
}

impl<F> RequestHandler for F
where
    F: Fn(&str, &mut RequestContext, &mut dyn ResponseControl) -> Result<()> + Send + Sync,
{
    fn handle(
        &self,
        target: &str,
        request: &mut RequestContext,
        response: &mut dyn ResponseControl,
    ) -> Result<()> {
        self(target, request, response)
    }
}

#[derive(Clone)]
enum Target {
    Path {
        uri: HttpUri,
        context_path: String,
        path_in_context: String,
    },
    Named(String),
}

#[derive(Clone, Copy)]
enum MergePolicy {
    Forward,
    Include,
}

/// A resolved dispatch target plus the handler that serves it
#[derive(Clone)]
pub struct Dispatcher {
    target: Target,
    handler: Arc<dyn RequestHandler>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Path { uri, context_path, .. } => f
                .debug_struct("Dispatcher")
                .field("uri", &uri.to_string())
                .field("context_path", context_path)
                .finish(),
            Target::Named(name) => f.debug_struct("Dispatcher").field("name", name).finish(),
        }
    }
}

impl Dispatcher {
    /// Dispatch to `path_in_context` (optionally with `?query`) inside `context_path`
    pub fn for_path(
        context_path: &str,
        path_in_context: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (path, query) = uri::split_query(path_in_context);
        let mut target_uri = HttpUri::default();
        target_uri.set_path_query(uri::add_paths(context_path, path), query.map(str::to_owned));
        Self {
            target: Target::Path {
                uri: target_uri,
                context_path: context_path.to_string(),
                path_in_context: path.to_string(),
            },
            handler,
        }
    }

    /// Dispatch to the handler called `name`, leaving the URI alone
    pub fn named(name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            target: Target::Named(name.into()),
            handler,
        }
    }

    /// Target URI (context path + path in context + query); `None` when named
    #[must_use]
    pub fn uri(&self) -> Option<&HttpUri> {
        match &self.target {
            Target::Path { uri, .. } => Some(uri),
            Target::Named(_) => None,
        }
    }

    #[must_use]
    pub fn path_in_context(&self) -> Option<&str> {
        match &self.target {
            Target::Path { path_in_context, .. } => Some(path_in_context),
            Target::Named(_) => None,
        }
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri().and_then(HttpUri::query)
    }

    #[must_use]
    pub fn context_path(&self) -> Option<&str> {
        match &self.target {
            Target::Path { context_path, .. } => Some(context_path),
            Target::Named(_) => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.target {
            Target::Named(name) => Some(name),
            Target::Path { .. } => None,
        }
    }

    fn target_str(&self) -> &str {
        match &self.target {
            Target::Path { path_in_context, .. } => path_in_context,
            Target::Named(name) => name,
        }
    }

    /// Run the target inside the current response. The request's URI and paths are
    /// untouched; the target's location is visible under `dispatch.include.*` and its
    /// query values are appended after the current ones. A named include leaves the
    /// attributes as they are.
    pub fn include(&self, ctx: &mut RequestContext, response: &mut dyn ResponseControl) -> Result<()> {
        let old_query = ctx.query_string().map(str::to_owned);
        let mut scope = DispatchScope::include(ctx, response);
        scope.set_dispatch_kind(DispatchKind::Include);
        scope.response().mark_including();
        debug!(
            request_id = %scope.request_id(),
            target = %self.target_str(),
            depth = scope.attributes().depth(),
            "include"
        );

        if let Target::Path {
            uri,
            context_path,
            path_in_context,
        } = &self.target
        {
            let record = DispatchRecord::new()
                .with(DispatchField::RequestUri, Some(uri.path()))
                .with(DispatchField::ContextPath, Some(context_path.as_str()))
                .with(DispatchField::PathInfo, Some(path_in_context.as_str()))
                .with(DispatchField::QueryString, uri.query());
            scope.install_overlay(OverlayKind::Include, record);
            if uri.query().is_some() {
                merge_query(&mut scope, old_query.as_deref(), uri.query(), MergePolicy::Include)?;
            }
        }

        let (ctx, response) = scope.parts();
        self.handler.handle(self.target_str(), ctx, response)
    }

    /// Hand the request over to the target. The response is reset, the URI and paths
    /// are rewritten, and the pre-forward location is visible under
    /// `dispatch.forward.*` (from the first forward of the request).
    pub fn forward(&self, ctx: &mut RequestContext, response: &mut dyn ResponseControl) -> Result<()> {
        self.forward_as(DispatchKind::Forward, ctx, response)
    }

    /// A forward for error handling: query decoding failures are logged and ignored
    pub fn error(&self, ctx: &mut RequestContext, response: &mut dyn ResponseControl) -> Result<()> {
        self.forward_as(DispatchKind::Error, ctx, response)
    }

    fn forward_as(
        &self,
        kind: DispatchKind,
        ctx: &mut RequestContext,
        response: &mut dyn ResponseControl,
    ) -> Result<()> {
        response.reset_for_forward()?;
        let old_query = ctx.query_string().map(str::to_owned);
        let mut scope = DispatchScope::forward(ctx, response);
        scope.set_dispatch_kind(kind);
        debug!(
            request_id = %scope.request_id(),
            kind = %kind,
            target = %self.target_str(),
            depth = scope.attributes().depth(),
            "forward"
        );

        match &self.target {
            // The request is handed over as it is: no rewrite, no overlay, and the
            // output stays open
            Target::Named(name) => {
                let (ctx, response) = scope.parts();
                return self.handler.handle(name, ctx, response);
            }
            Target::Path {
                uri,
                context_path,
                path_in_context,
            } => {
                let record = if scope.attribute(keys::FORWARD_REQUEST_URI).is_some() {
                    DispatchRecord::copy_from(scope.attributes(), OverlayKind::Forward)
                } else {
                    DispatchRecord::new()
                        .with(DispatchField::RequestUri, scope.request_uri())
                        .with(DispatchField::ContextPath, scope.context_path())
                        .with(DispatchField::HandlerPath, scope.handler_path())
                        .with(DispatchField::PathInfo, scope.path_info())
                        .with(DispatchField::QueryString, old_query.as_deref())
                        .with(DispatchField::Mapping, scope.mapping().cloned())
                };

                let mut new_uri = scope.http_uri().cloned().unwrap_or_default();
                new_uri.set_path_query(uri.path(), uri.query().map(str::to_owned));
                scope.set_http_uri(Some(new_uri));
                scope.set_context_path(Some(context_path.clone()));
                scope.set_handler_path(None);
                scope.set_path_info(Some(path_in_context.clone()));
                scope.set_mapping(None);

                if uri.query().is_some() || old_query.is_some() {
                    match merge_query(&mut scope, old_query.as_deref(), uri.query(), MergePolicy::Forward) {
                        Ok(()) if uri.query().is_none() => {
                            let mut current = scope.http_uri().cloned().unwrap_or_default();
                            current.set_query(old_query.clone());
                            scope.set_http_uri(Some(current));
                        }
                        Ok(()) => {}
                        Err(e) if kind == DispatchKind::Error => {
                            warn!(
                                request_id = %scope.request_id(),
                                error = %e,
                                "ignoring query merge failure during error dispatch"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                scope.install_overlay(OverlayKind::Forward, record);
            }
        }

        {
            let (ctx, response) = scope.parts();
            self.handler.handle(self.target_str(), ctx, response)?;
        }

        if !scope.is_async_started() {
            let response = scope.response();
            if !response.is_output_closed() {
                match response.output_mode() {
                    OutputMode::Writer => response.close_writer()?,
                    OutputMode::Stream | OutputMode::None => response.close_output()?,
                }
            }
        }
        Ok(())
    }
}

/// Merge the target's query into the current query parameters.
///
/// The target query is always UTF-8. The current values are the query parameters
/// already decoded for this request, or `old_query` decoded with the request's
/// query encoding.
fn merge_query(
    ctx: &mut RequestContext,
    old_query: Option<&str>,
    new_query: Option<&str>,
    policy: MergePolicy,
) -> Result<()> {
    let new_params = RequestContext::decode_query(new_query, Charset::Utf8)?;
    let old_params = match ctx.params().query() {
        Some(params) => params.clone(),
        None => RequestContext::decode_query(old_query, ctx.query_encoding())?,
    };
    let merged = match policy {
        MergePolicy::Forward => forward_merge(&new_params, &old_params),
        MergePolicy::Include => include_merge(&old_params, &new_params),
    };
    let store = ctx.params_mut();
    store.set_query(Some(merged));
    store.reset_cache();
    Ok(())
}
