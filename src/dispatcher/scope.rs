use super::core::ResponseControl;
use crate::attributes::{DispatchRecord, OverlayKind, RouteMapping};
use crate::params::Params;
use crate::request::{DispatchKind, RequestContext};
use crate::uri::HttpUri;
use std::ops::{Deref, DerefMut};
use tracing::trace;

enum Saved {
    Include {
        kind: DispatchKind,
        query: Option<Params>,
    },
    Forward {
        kind: DispatchKind,
        query: Option<Params>,
        uri: Option<HttpUri>,
        context_path: Option<String>,
        handler_path: Option<String>,
        path_info: Option<String>,
        mapping: Option<RouteMapping>,
    },
}

/// Guard around one nested dispatch.
///
/// Created from a snapshot of the request before anything is mutated; dropping it
/// puts the snapshot back, on success, on error and while unwinding from a panic.
pub struct DispatchScope<'a> {
    ctx: &'a mut RequestContext,
    response: &'a mut dyn ResponseControl,
    saved: Option<Saved>,
    overlay_installed: bool,
}

impl<'a> DispatchScope<'a> {
    pub(super) fn include(ctx: &'a mut RequestContext, response: &'a mut dyn ResponseControl) -> Self {
        let saved = Saved::Include {
            kind: ctx.dispatch_kind(),
            query: ctx.params().query().cloned(),
        };
        Self {
            ctx,
            response,
            saved: Some(saved),
            overlay_installed: false,
        }
    }

    pub(super) fn forward(ctx: &'a mut RequestContext, response: &'a mut dyn ResponseControl) -> Self {
        let saved = Saved::Forward {
            kind: ctx.dispatch_kind(),
            query: ctx.params().query().cloned(),
            uri: ctx.http_uri().cloned(),
            context_path: ctx.context_path().map(str::to_owned),
            handler_path: ctx.handler_path().map(str::to_owned),
            path_info: ctx.path_info().map(str::to_owned),
            mapping: ctx.mapping().cloned(),
        };
        Self {
            ctx,
            response,
            saved: Some(saved),
            overlay_installed: false,
        }
    }

    /// Layer a dispatch overlay over the current attributes until the scope ends
    pub(super) fn install_overlay(&mut self, kind: OverlayKind, record: DispatchRecord) {
        self.ctx.attributes_mut().push_overlay(kind, record);
        self.overlay_installed = true;
    }

    pub(super) fn response(&mut self) -> &mut dyn ResponseControl {
        &mut *self.response
    }

    /// Both halves of the dispatch, for handing to a [`super::RequestHandler`]
    pub(super) fn parts(&mut self) -> (&mut RequestContext, &mut dyn ResponseControl) {
        (&mut *self.ctx, &mut *self.response)
    }

    fn pop_overlay(&mut self) {
        if std::mem::take(&mut self.overlay_installed) {
            self.ctx.attributes_mut().pop_overlay();
        }
    }
}

impl Deref for DispatchScope<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        self.ctx
    }
}

impl DerefMut for DispatchScope<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.ctx
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(Saved::Include { kind, query }) => {
                self.pop_overlay();
                self.response.mark_included();
                self.ctx.params_mut().restore_query(query);
                self.ctx.set_dispatch_kind(kind);
            }
            Some(Saved::Forward {
                kind,
                query,
                uri,
                context_path,
                handler_path,
                path_info,
                mapping,
            }) => {
                self.ctx.set_http_uri(uri);
                self.ctx.set_context_path(context_path);
                self.ctx.set_handler_path(handler_path);
                self.ctx.set_path_info(path_info);
                self.ctx.set_mapping(mapping);
                self.ctx.params_mut().restore_query(query);
                self.pop_overlay();
                self.ctx.set_dispatch_kind(kind);
            }
            None => {}
        }
        trace!(
            request_id = %self.ctx.request_id(),
            kind = %self.ctx.dispatch_kind(),
            "dispatch scope restored"
        );
    }
}
