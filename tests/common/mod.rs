#![allow(clippy::unwrap_used, clippy::expect_used)]

use http::{HeaderMap, Method, Version};
use reqscope::content::BufferedTransport;
use reqscope::dispatcher::{OutputMode, RequestHandler, ResponseControl};
use reqscope::{DispatchKind, RequestContext, RequestError, Result};
use std::sync::{Arc, Once};

// Each test binary compiles this module; items only some binaries use carry
// `allow(dead_code)`.

static TRACING_INIT: Once = Once::new();

/// Route `tracing` output through the test harness writer
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Response stand-in that records the calls a dispatch makes
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingResponse {
    pub events: Vec<&'static str>,
    pub including: usize,
    pub committed: bool,
    pub output_closed: bool,
    pub mode: OutputMode,
}

impl ResponseControl for RecordingResponse {
    fn mark_including(&mut self) {
        self.including += 1;
        self.events.push("including");
    }

    fn mark_included(&mut self) {
        self.including -= 1;
        self.events.push("included");
    }

    fn reset_for_forward(&mut self) -> Result<()> {
        if self.committed {
            return Err(RequestError::illegal_state("Committed"));
        }
        self.events.push("reset");
        Ok(())
    }

    fn is_output_closed(&self) -> bool {
        self.output_closed
    }

    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn close_output(&mut self) -> Result<()> {
        self.output_closed = true;
        self.events.push("close_output");
        Ok(())
    }

    fn close_writer(&mut self) -> Result<()> {
        self.output_closed = true;
        self.events.push("close_writer");
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed
    }
}

pub fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(*name, value.parse().unwrap());
    }
    map
}

/// A request for `target` inside context `/app`, with an empty body
#[allow(dead_code)]
pub fn app_request(method: Method, target: &str) -> RequestContext {
    init_tracing();
    let mut req = RequestContext::default();
    req.set_metadata(method, target, Version::HTTP_11, headers(&[("host", "example.com")]))
        .unwrap();
    req.set_content_transport(Box::new(BufferedTransport::empty()));
    req.set_context_path(Some("/app".to_string()));
    let path_info = req
        .path_info()
        .and_then(|p| p.strip_prefix("/app"))
        .map(str::to_owned);
    req.set_path_info(path_info);
    req
}

#[allow(dead_code)]
pub fn handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&str, &mut RequestContext, &mut dyn ResponseControl) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Everything a handler can observe about where the request is
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub request_uri: Option<String>,
    pub query_string: Option<String>,
    pub context_path: Option<String>,
    pub handler_path: Option<String>,
    pub path_info: Option<String>,
    pub kind: DispatchKind,
    pub attribute_names: Vec<String>,
    pub params: Vec<(String, Vec<String>)>,
}

#[allow(dead_code)]
pub fn view(req: &mut RequestContext) -> View {
    let mut params: Vec<_> = req.parameter_map().unwrap().into_iter().collect();
    params.sort();
    View {
        request_uri: req.request_uri().map(str::to_owned),
        query_string: req.query_string().map(str::to_owned),
        context_path: req.context_path().map(str::to_owned),
        handler_path: req.handler_path().map(str::to_owned),
        path_info: req.path_info().map(str::to_owned),
        kind: req.dispatch_kind(),
        attribute_names: req.attribute_names(),
        params,
    }
}

#[allow(dead_code)]
pub fn text(req: &RequestContext, key: &str) -> Option<String> {
    req.attribute(key).and_then(|v| v.as_str()).map(str::to_owned)
}
