//! # Request Module
//!
//! [`RequestContext`] is the per-connection request object. One instance lives in a
//! [`ConnectionSlot`] and is reused for every request on that connection:
//!
//! ```text
//! begin_request ─▶ set_metadata + set_content_transport
//!      │
//!      ▼
//! handler(s), nested include / forward through crate::dispatcher
//!      │
//!      ▼
//! complete_request ─▶ on_completed ─▶ recycle
//! ```
//!
//! Everything that depends on the current request (URI, paths, parameters,
//! attributes, body state, sessions, authentication) is reset by
//! [`RequestContext::recycle`]. Accessors on a recycled context return `None` or
//! empty values, never data from the previous request.

mod headers;
mod slot;

pub use headers::{parse_cookies, parse_http_date, parse_locales, Cookie, Locale};
pub use slot::{ActiveRequest, ConnectionSlot};

use crate::attributes::{
    keys, AttributeChain, AttributeListener, AttributeValue, Attributes, RouteMapping,
};
use crate::auth::{Authentication, LoginService};
use crate::charset::{self, Charset};
use crate::content::{BodyReader, ContentInput, ContentTransport, InputMode, ProductionMode, ReadListener};
use crate::dispatcher::{Dispatcher, RequestHandler};
use crate::error::{RequestError, Result};
use crate::ids::RequestId;
use crate::params::{self, ParameterStore, Params};
use crate::runtime_config::RuntimeConfig;
use crate::session::{Session, SessionManager, SessionScope};
use crate::uri::{self, HttpUri};
use http::{header, HeaderMap, Method, Version};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, trace, warn};

const FORM_ENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

/// Why the request is currently being handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatchKind {
    /// The initial dispatch from the connection
    #[default]
    Request,
    Forward,
    Include,
    Error,
    Async,
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchKind::Request => "REQUEST",
            DispatchKind::Forward => "FORWARD",
            DispatchKind::Include => "INCLUDE",
            DispatchKind::Error => "ERROR",
            DispatchKind::Async => "ASYNC",
        })
    }
}

/// A recyclable HTTP request
pub struct RequestContext {
    config: Arc<RuntimeConfig>,
    request_id: RequestId,
    method: Option<Method>,
    version: Version,
    headers: HeaderMap,
    cookies: Option<Vec<Cookie>>,
    uri: Option<HttpUri>,
    original_uri: Option<String>,
    context_path: Option<String>,
    handler_path: Option<String>,
    path_info: Option<String>,
    mapping: Option<RouteMapping>,
    dispatch_kind: DispatchKind,
    attributes: AttributeChain,
    content: ContentInput,
    params: ParameterStore,
    query_encoding: Option<Charset>,
    character_encoding: Option<String>,
    content_type: Option<String>,
    sessions: SessionScope,
    requested_session_id: Option<String>,
    requested_session_id_from_cookie: bool,
    authentication: Authentication,
    login_service: Option<Arc<dyn LoginService>>,
    attribute_listeners: Vec<Arc<dyn AttributeListener>>,
    async_supported: bool,
    async_unsupported_source: Option<String>,
    async_started: bool,
    handled: bool,
    secure: bool,
    // Connection endpoints outlive recycle; the override is per request.
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    remote_override: Option<SocketAddr>,
    timestamp: Option<SystemTime>,
    started: Option<Instant>,
    response_committed: bool,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("dispatch_kind", &self.dispatch_kind)
            .field("overlays", &self.attributes.depth())
            .field("content", &self.content)
            .finish()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Arc::new(RuntimeConfig::default()))
    }
}

impl RequestContext {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let content = ContentInput::new(config.blocking_read_timeout());
        Self {
            config,
            request_id: RequestId::new(),
            method: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            cookies: None,
            uri: None,
            original_uri: None,
            context_path: None,
            handler_path: None,
            path_info: None,
            mapping: None,
            dispatch_kind: DispatchKind::Request,
            attributes: AttributeChain::default(),
            content,
            params: ParameterStore::new(),
            query_encoding: None,
            character_encoding: None,
            content_type: None,
            sessions: SessionScope::new(),
            requested_session_id: None,
            requested_session_id_from_cookie: false,
            authentication: Authentication::NotChecked,
            login_service: None,
            attribute_listeners: Vec::new(),
            async_supported: true,
            async_unsupported_source: None,
            async_started: false,
            handled: false,
            secure: false,
            remote: None,
            local: None,
            remote_override: None,
            timestamp: None,
            started: None,
            response_committed: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    /// Attach the request line and headers of a new request.
    ///
    /// Relative targets take their authority from the `Host` header and default to
    /// the `http` scheme (`https` on secure connections). The path is
    /// percent-decoded and canonicalised into the path info; a path that is empty or
    /// climbs above the root is rejected with `400 Bad URI`. `*` and `CONNECT`
    /// targets are kept verbatim.
    pub fn set_metadata(
        &mut self,
        method: Method,
        target: &str,
        version: Version,
        headers: HeaderMap,
    ) -> Result<()> {
        let verbatim = method == Method::CONNECT || target == "*";
        let mut uri = if verbatim {
            HttpUri::from_path_query(target)
        } else {
            HttpUri::parse(target)?
        };
        if uri.scheme().is_none() {
            uri.set_scheme(if self.secure { "https" } else { "http" });
        }
        if uri.host().is_none() {
            if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
                uri.set_authority(host)?;
            }
        }

        let (original_uri, path_info) = if verbatim {
            (target.to_string(), target.to_string())
        } else {
            if uri.path().is_empty() {
                return Err(RequestError::bad_request("Bad URI"));
            }
            let decoded = uri.decoded_path()?;
            let canonical = uri::canonical_path(&decoded)
                .ok_or_else(|| RequestError::bad_request("Bad URI"))?;
            (uri.path_query(), canonical)
        };

        self.request_id = RequestId::from_headers(&headers);
        self.timestamp = Some(SystemTime::now());
        self.started = Some(Instant::now());
        debug!(
            request_id = %self.request_id,
            method = %method,
            uri = %uri,
            "request metadata attached"
        );
        self.method = Some(method);
        self.version = version;
        self.headers = headers;
        self.cookies = None;
        self.uri = Some(uri);
        self.original_uri = Some(original_uri);
        self.path_info = Some(path_info);
        Ok(())
    }

    /// Attach the body transport of the current request
    pub fn set_content_transport(&mut self, transport: Box<dyn ContentTransport>) {
        let expect_continue = self.version >= Version::HTTP_11
            && self
                .header(header::EXPECT.as_str())
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        self.content.set_read_timeout(self.config.blocking_read_timeout());
        self.content.attach(transport, expect_continue);
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if it is valid text
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Header `name` as an integer; `400` if present but not a number
    pub fn int_header(&self, name: &str) -> Result<Option<i64>> {
        self.header(name)
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| RequestError::bad_request(format!("Bad {} header", name)))
            })
            .transpose()
    }

    /// Header `name` as an HTTP date; `400` if present but not a date
    pub fn date_header(&self, name: &str) -> Result<Option<SystemTime>> {
        self.header(name)
            .map(|v| {
                parse_http_date(v)
                    .ok_or_else(|| RequestError::bad_request(format!("Bad {} header", name)))
            })
            .transpose()
    }

    /// Cookies sent with the request, parsed on first access
    pub fn cookies(&mut self) -> &[Cookie] {
        self.cookies.get_or_insert_with(|| parse_cookies(&self.headers))
    }

    /// Value of the first cookie called `name`
    pub fn cookie(&mut self, name: &str) -> Option<String> {
        self.cookies()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }

    /// Locales from `Accept-Language`, most preferred first
    #[must_use]
    pub fn locales(&self) -> Vec<Locale> {
        parse_locales(&self.headers)
    }

    /// The most preferred locale, if the client sent any
    #[must_use]
    pub fn locale(&self) -> Option<Locale> {
        self.locales().into_iter().next()
    }

    #[must_use]
    pub fn http_uri(&self) -> Option<&HttpUri> {
        self.uri.as_ref()
    }

    pub(crate) fn set_http_uri(&mut self, uri: Option<HttpUri>) {
        self.uri = uri;
    }

    /// The URI of the request as it arrived, before any forward
    #[must_use]
    pub fn original_uri(&self) -> Option<&str> {
        self.original_uri.as_deref()
    }

    /// Raw path of the current URI
    #[must_use]
    pub fn request_uri(&self) -> Option<&str> {
        self.uri.as_ref().map(HttpUri::path)
    }

    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.uri.as_ref().and_then(HttpUri::query)
    }

    #[must_use]
    pub fn context_path(&self) -> Option<&str> {
        self.context_path.as_deref()
    }

    pub fn set_context_path(&mut self, context_path: Option<String>) {
        self.context_path = context_path;
    }

    #[must_use]
    pub fn handler_path(&self) -> Option<&str> {
        self.handler_path.as_deref()
    }

    pub fn set_handler_path(&mut self, handler_path: Option<String>) {
        self.handler_path = handler_path;
    }

    #[must_use]
    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    pub fn set_path_info(&mut self, path_info: Option<String>) {
        self.path_info = path_info;
    }

    #[must_use]
    pub fn mapping(&self) -> Option<&RouteMapping> {
        self.mapping.as_ref()
    }

    pub fn set_mapping(&mut self, mapping: Option<RouteMapping>) {
        self.mapping = mapping;
    }

    #[must_use]
    pub fn dispatch_kind(&self) -> DispatchKind {
        self.dispatch_kind
    }

    pub(crate) fn set_dispatch_kind(&mut self, kind: DispatchKind) {
        self.dispatch_kind = kind;
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    /// Endpoints of the underlying connection; kept across requests
    pub fn set_connection_endpoints(&mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) {
        self.remote = remote;
        self.local = local;
    }

    /// Report a different client address for this request only, as a proxy
    /// header handler would
    pub fn set_remote_addr(&mut self, remote: Option<SocketAddr>) {
        self.remote_override = remote;
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_override.or(self.remote)
    }

    /// Client port, `0` when unknown
    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_addr().map(|a| a.port()).unwrap_or_default()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Local port, `0` when unknown
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local.map(|a| a.port()).unwrap_or_default()
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.uri
            .as_ref()
            .and_then(HttpUri::scheme)
            .unwrap_or(if self.secure { "https" } else { "http" })
    }

    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.uri.as_ref().and_then(HttpUri::host)
    }

    /// Port of the current URI, or the scheme's default
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.uri
            .as_ref()
            .and_then(HttpUri::port)
            .unwrap_or(if self.scheme() == "https" { 443 } else { 80 })
    }

    /// `scheme://host[:port]`, omitting the scheme's default port
    #[must_use]
    pub fn root_url(&self) -> Option<String> {
        let host = self.server_name()?;
        let scheme = self.scheme();
        let port = self.server_port();
        let default_port = matches!((scheme, port), ("http", 80) | ("https", 443));
        Some(if default_port {
            format!("{}://{}", scheme, host)
        } else {
            format!("{}://{}:{}", scheme, host, port)
        })
    }

    /// Reconstructed URL of the current request, without the query
    #[must_use]
    pub fn request_url(&self) -> Option<String> {
        let root = self.root_url()?;
        Some(format!("{}{}", root, self.request_uri().unwrap_or_default()))
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    // ---------------------------------------------------------------------
    // Encodings
    // ---------------------------------------------------------------------

    /// Explicit content type, or the `Content-Type` header
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.header(header::CONTENT_TYPE.as_str()))
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    /// `Content-Length`, if present and valid
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Explicitly set encoding, else the `charset` of the content type
    #[must_use]
    pub fn character_encoding(&self) -> Option<&str> {
        self.character_encoding
            .as_deref()
            .or_else(|| self.content_type().and_then(charset::charset_from_content_type))
    }

    /// Override the body encoding. Ignored once the body mode has been chosen;
    /// unknown encodings are rejected.
    pub fn set_character_encoding(&mut self, encoding: &str) -> Result<()> {
        if self.content.mode() != InputMode::Idle {
            return Ok(());
        }
        Charset::for_name(encoding)?;
        self.character_encoding = Some(encoding.to_string());
        Ok(())
    }

    /// Encoding used to decode the query string (UTF-8 unless set)
    #[must_use]
    pub fn query_encoding(&self) -> Charset {
        self.query_encoding.unwrap_or(Charset::Utf8)
    }

    pub fn set_query_encoding(&mut self, encoding: Option<&str>) -> Result<()> {
        self.query_encoding = encoding.map(Charset::for_name).transpose()?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Set an attribute and notify listeners.
    ///
    /// Setting [`keys::QUERY_ENCODING`] also changes the query encoding.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        let value = value.into();
        if name == keys::QUERY_ENCODING {
            let encoding = value.as_str().map(str::to_owned);
            if let Err(e) = self.set_query_encoding(encoding.as_deref()) {
                warn!(request_id = %self.request_id, error = %e, "ignoring query encoding attribute");
            }
        }
        let old = self.attributes.set(name, Some(value));
        if self.attribute_listeners.is_empty() {
            return;
        }
        match old {
            Some(old) => {
                for listener in &self.attribute_listeners {
                    listener.attribute_replaced(name, &old);
                }
            }
            None => {
                if let Some(new) = self.attributes.get(name) {
                    for listener in &self.attribute_listeners {
                        listener.attribute_added(name, new);
                    }
                }
            }
        }
    }

    /// Remove an attribute and notify listeners
    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        if name == keys::QUERY_ENCODING {
            self.query_encoding = None;
        }
        let old = self.attributes.remove(name)?;
        for listener in &self.attribute_listeners {
            listener.attribute_removed(name, &old);
        }
        Some(old)
    }

    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.names()
    }

    /// Remove every attribute. Fails while a dispatch overlay is installed.
    pub fn clear_attributes(&mut self) -> Result<()> {
        self.attributes.clear()
    }

    #[must_use]
    pub fn attributes(&self) -> &AttributeChain {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut AttributeChain {
        &mut self.attributes
    }

    pub fn add_attribute_listener(&mut self, listener: Arc<dyn AttributeListener>) {
        self.attribute_listeners.push(listener);
    }

    // ---------------------------------------------------------------------
    // Parameters
    // ---------------------------------------------------------------------

    pub(crate) fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    /// Decode the query string with `encoding`, reporting failures as
    /// `400 Bad query encoding`
    pub(crate) fn decode_query(query: Option<&str>, encoding: Charset) -> Result<Params> {
        match query {
            Some(q) => params::decode_query(q, encoding)
                .map(Params::from_map)
                .map_err(|_| RequestError::bad_request("Bad query encoding")),
            None => Ok(Params::Empty),
        }
    }

    /// Query parameters, decoded on first access
    pub fn query_parameters(&mut self) -> Result<&Params> {
        if self.params.query().is_none() {
            let decoded = Self::decode_query(self.query_string(), self.query_encoding())?;
            self.params.set_query(Some(decoded));
        }
        Ok(self.params.query().unwrap_or(&Params::Empty))
    }

    /// Body parameters, extracted on first access and never again for this request
    pub fn content_parameters(&mut self) -> Result<&Params> {
        if !self.params.content_extracted() {
            self.params.mark_content_extracted();
            let extracted = self.extract_content_parameters()?;
            self.params.set_content(extracted);
        }
        Ok(self.params.content().unwrap_or(&Params::Empty))
    }

    fn extract_content_parameters(&mut self) -> Result<Params> {
        let Some(content_type) = self.content_type().filter(|ct| !ct.is_empty()) else {
            return Ok(Params::Empty);
        };
        let mime = charset::mime_type(content_type);
        if self.content_length() == Some(0) || self.content.mode() != InputMode::Idle {
            return Ok(Params::Empty);
        }
        let method = self.method.as_ref().map(Method::as_str).unwrap_or_default();
        if mime == FORM_ENCODED && self.config.is_form_encoded_method(method) {
            if let Some(encoding) = self.header(header::CONTENT_ENCODING.as_str()) {
                if !encoding.trim().eq_ignore_ascii_case("identity") {
                    return Err(RequestError::bad_message(501, "Unsupported Content-Encoding"));
                }
            }
            return self.extract_form_parameters();
        }
        if mime == MULTIPART_FORM {
            trace!(request_id = %self.request_id, "multipart body left to an external decoder");
        }
        Ok(Params::Empty)
    }

    fn extract_form_parameters(&mut self) -> Result<Params> {
        let unable = || RequestError::bad_request("Unable to parse form content");
        let max_size = self.config.max_form_content_size;
        if self
            .content_length()
            .is_some_and(|len| len > max_size as u64)
        {
            debug!(request_id = %self.request_id, max_size, "form content too large");
            return Err(unable());
        }
        let encoding = match self.character_encoding() {
            Some(name) => Charset::for_name(name)?,
            None => Charset::Utf8,
        };
        self.content.enter_stream()?;
        self.content.send_continue_if_expected()?;
        if self.content.production_mode() == ProductionMode::Async {
            return Err(unable());
        }

        let mut body = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.content.read_bytes(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
            if body.len() > max_size {
                debug!(request_id = %self.request_id, max_size, "form content too large");
                return Err(unable());
            }
        }
        let map = params::decode_form(&body, encoding, self.config.max_form_keys).map_err(|e| {
            debug!(request_id = %self.request_id, error = %e, "form decoding failed");
            unable()
        })?;
        Ok(Params::from_map(map))
    }

    /// Merged query and body parameters
    pub fn parameters(&mut self) -> Result<&Params> {
        if self.params.merged().is_none() {
            self.query_parameters()?;
            self.content_parameters()?;
        }
        Ok(self.params.materialize())
    }

    pub fn parameter(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.parameters()?.get_value(name).map(str::to_owned))
    }

    pub fn parameter_values(&mut self, name: &str) -> Result<Vec<String>> {
        Ok(self.parameters()?.get_values(name).to_vec())
    }

    pub fn parameter_names(&mut self) -> Result<Vec<String>> {
        Ok(self.parameters()?.names().map(str::to_owned).collect())
    }

    pub fn parameter_map(&mut self) -> Result<HashMap<String, Vec<String>>> {
        Ok(self
            .parameters()?
            .as_map()
            .map(|m| m.to_hash_map())
            .unwrap_or_default())
    }

    // ---------------------------------------------------------------------
    // Body
    // ---------------------------------------------------------------------

    /// The body as bytes. Fails if [`RequestContext::reader`] was used.
    pub fn input_stream(&mut self) -> Result<&mut ContentInput> {
        self.content.enter_stream()?;
        self.content.send_continue_if_expected()?;
        Ok(&mut self.content)
    }

    /// The body as characters. Fails if [`RequestContext::input_stream`] was used.
    ///
    /// The charset is the request's character encoding, or the configured default.
    pub fn reader(&mut self) -> Result<BodyReader<'_>> {
        if self.content.mode() == InputMode::Idle {
            let charset = match self.character_encoding() {
                Some(name) => Charset::for_name(name)?,
                None => Charset::for_name(&self.config.default_reader_charset)?,
            };
            self.content.enter_reader(charset)?;
            self.content.send_continue_if_expected()?;
        } else {
            self.content.enter_reader(Charset::Utf8)?;
        }
        self.content.reader()
    }

    /// Body bytes handed to the application so far
    #[must_use]
    pub fn content_read(&self) -> u64 {
        self.content.consumed()
    }

    /// Switch the body to readiness-driven reads
    pub fn set_read_listener(&mut self, listener: Box<dyn ReadListener>) -> Result<()> {
        self.content.set_read_listener(listener)
    }

    #[must_use]
    pub fn content(&self) -> &ContentInput {
        &self.content
    }

    /// Direct access for the connection: attaching transports, driving
    /// [`ContentInput::on_read_possible`], failing reads
    pub fn content_mut(&mut self) -> &mut ContentInput {
        &mut self.content
    }

    // ---------------------------------------------------------------------
    // Sessions and authentication
    // ---------------------------------------------------------------------

    pub fn set_session_manager(&mut self, manager: Option<Arc<dyn SessionManager>>) {
        self.sessions.set_manager(manager);
    }

    #[must_use]
    pub fn session_manager(&self) -> Option<&Arc<dyn SessionManager>> {
        self.sessions.manager()
    }

    /// Record a session this request used; the manager is told when the response
    /// commits and when the request completes.
    pub fn enter_session(&mut self, session: Arc<dyn Session>, manager: Arc<dyn SessionManager>) {
        self.sessions.enter(session, manager);
    }

    pub fn set_session(&mut self, session: Option<Arc<dyn Session>>) {
        self.sessions.set_current(session);
    }

    /// The current valid session, created on demand if `create` is set
    pub fn session(&mut self, create: bool) -> Result<Option<Arc<dyn Session>>> {
        self.sessions.get_or_create(create, self.response_committed)
    }

    /// The session this request entered for the manager called `manager_name`
    #[must_use]
    pub fn session_for(&self, manager_name: &str) -> Option<Arc<dyn Session>> {
        self.sessions.session_for(manager_name)
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionScope {
        &self.sessions
    }

    /// Give the current session a new id, returning it
    pub fn change_session_id(&mut self) -> Result<String> {
        let session = self
            .session(false)?
            .ok_or_else(|| RequestError::illegal_state("No session"))?;
        self.sessions.renew_id(&session)
    }

    /// The session id the client asked for and where it came from
    pub fn set_requested_session_id(&mut self, id: Option<String>, from_cookie: bool) {
        self.requested_session_id_from_cookie = id.is_some() && from_cookie;
        self.requested_session_id = id;
    }

    /// Find the requested session id in cookie `cookie_name`, else in the
    /// `;param_name=` parameter of the request path
    pub fn extract_requested_session_id(&mut self, cookie_name: &str, param_name: &str) -> Option<&str> {
        if let Some(id) = self.cookie(cookie_name).filter(|id| !id.is_empty()) {
            self.set_requested_session_id(Some(id), true);
        } else {
            let marker = format!(";{}=", param_name);
            let from_url = self.request_uri().and_then(|path| {
                let start = path.find(&marker)? + marker.len();
                let rest = &path[start..];
                let end = rest.find(|c| matches!(c, ';' | '/' | '?' | '#')).unwrap_or(rest.len());
                Some(rest[..end].to_string()).filter(|id| !id.is_empty())
            });
            self.set_requested_session_id(from_url, false);
        }
        self.requested_session_id.as_deref()
    }

    #[must_use]
    pub fn requested_session_id(&self) -> Option<&str> {
        self.requested_session_id.as_deref()
    }

    #[must_use]
    pub fn is_requested_session_id_from_cookie(&self) -> bool {
        self.requested_session_id_from_cookie
    }

    #[must_use]
    pub fn is_requested_session_id_from_url(&self) -> bool {
        self.requested_session_id.is_some() && !self.requested_session_id_from_cookie
    }

    /// Whether the requested id names the current, still valid session
    #[must_use]
    pub fn is_requested_session_id_valid(&self) -> bool {
        match (&self.requested_session_id, self.sessions.current()) {
            (Some(id), Some(session)) => session.is_valid() && session.id() == id,
            _ => false,
        }
    }

    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = authentication;
    }

    #[must_use]
    pub fn remote_user(&self) -> Option<&str> {
        self.authentication.remote_user()
    }

    #[must_use]
    pub fn is_user_in_role(&self, role: &str) -> bool {
        self.authentication.is_user_in_role(role)
    }

    pub fn set_login_service(&mut self, service: Option<Arc<dyn LoginService>>) {
        self.login_service = service;
    }

    /// Authenticate with a username and password through the login service
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if let Authentication::User(user) = &self.authentication {
            return Err(RequestError::AuthenticationFailed(format!(
                "Already authenticated as {}",
                user.name
            )));
        }
        let service = self
            .login_service
            .clone()
            .ok_or_else(|| RequestError::AuthenticationFailed("No login service".to_string()))?;
        match service.login(username, password)? {
            Some(user) => {
                debug!(request_id = %self.request_id, user = %user.name, "login succeeded");
                self.authentication = Authentication::User(user);
                Ok(())
            }
            None => {
                debug!(request_id = %self.request_id, username, "login refused");
                Err(RequestError::AuthenticationFailed(format!(
                    "Authentication failed for username '{}'",
                    username
                )))
            }
        }
    }

    /// Drop the authenticated user, telling the login service
    pub fn logout(&mut self) {
        if let Authentication::User(user) = &self.authentication {
            if let Some(service) = &self.login_service {
                service.logout(user);
            }
            debug!(request_id = %self.request_id, user = %user.name, "logged out");
        }
        if self.authentication != Authentication::NotChecked {
            self.authentication = Authentication::Unauthenticated;
        }
    }

    // ---------------------------------------------------------------------
    // Async and lifecycle
    // ---------------------------------------------------------------------

    /// Declare whether async handling is allowed; `source` names whoever disabled it
    pub fn set_async_supported(&mut self, supported: bool, source: Option<&str>) {
        self.async_supported = supported;
        self.async_unsupported_source = if supported {
            None
        } else {
            source.map(str::to_owned)
        };
    }

    #[must_use]
    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    /// Suspend the request past the return of its handler
    pub fn start_async(&mut self) -> Result<()> {
        if !self.async_supported {
            return Err(RequestError::illegal_state(format!(
                "!asyncSupported: {}",
                self.async_unsupported_source.as_deref().unwrap_or("unknown")
            )));
        }
        if self.async_started {
            return Err(RequestError::illegal_state("async already started"));
        }
        debug!(request_id = %self.request_id, "async started");
        self.async_started = true;
        Ok(())
    }

    #[must_use]
    pub fn is_async_started(&self) -> bool {
        self.async_started
    }

    #[must_use]
    pub fn is_response_committed(&self) -> bool {
        self.response_committed
    }

    /// The response is being committed: let session managers persist state
    pub fn on_response_commit(&mut self) {
        if self.response_committed {
            return;
        }
        self.response_committed = true;
        self.sessions.commit_all();
    }

    /// The request has completed: release entered sessions
    pub fn on_completed(&mut self) {
        self.sessions.complete_all();
        debug!(
            request_id = %self.request_id,
            elapsed_ms = self
                .started
                .map(|s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default(),
            consumed = self.content.consumed(),
            "request completed"
        );
    }

    /// Resolve `path` (absolute within the context, or relative to the current
    /// handler path and path info) to a dispatcher. `None` if the path escapes the
    /// context root.
    #[must_use]
    pub fn request_dispatcher(&self, path: &str, handler: Arc<dyn RequestHandler>) -> Option<Dispatcher> {
        let mut path = uri::compact_path(path);
        if !path.starts_with('/') {
            let rel_to = uri::add_paths(
                self.handler_path.as_deref().unwrap_or_default(),
                self.path_info.as_deref().unwrap_or_default(),
            );
            let base = match rel_to.rfind('/') {
                Some(slash) if slash > 1 => rel_to[..=slash].to_string(),
                _ => "/".to_string(),
            };
            path = uri::add_paths(&base, &path);
        }
        let (path_in_context, query) = uri::split_query(&path);
        let canonical = uri::canonical_path(path_in_context)?;
        let target = match query {
            Some(q) => format!("{}?{}", canonical, q),
            None => canonical,
        };
        Some(Dispatcher::for_path(
            self.context_path.as_deref().unwrap_or_default(),
            &target,
            handler,
        ))
    }

    /// Return every per-request field to its default for the next request
    pub fn recycle(&mut self) {
        if self.content.mode() == InputMode::Reader {
            if let Err(e) = self.content.reader().and_then(|mut r| r.read_to_string()) {
                trace!(request_id = %self.request_id, error = %e, "ignoring error draining reader");
            }
        }
        trace!(request_id = %self.request_id, "recycling request");
        self.request_id = RequestId::new();
        self.method = None;
        self.version = Version::HTTP_11;
        self.headers.clear();
        self.cookies = None;
        self.uri = None;
        self.original_uri = None;
        self.context_path = None;
        self.handler_path = None;
        self.path_info = None;
        self.mapping = None;
        self.dispatch_kind = DispatchKind::Request;
        self.attributes.reset();
        self.content.recycle();
        self.params.recycle();
        self.query_encoding = None;
        self.character_encoding = None;
        self.content_type = None;
        self.sessions.recycle();
        self.requested_session_id = None;
        self.requested_session_id_from_cookie = false;
        self.authentication = Authentication::NotChecked;
        self.login_service = None;
        self.attribute_listeners.clear();
        self.async_supported = true;
        self.async_unsupported_source = None;
        self.async_started = false;
        self.handled = false;
        self.secure = false;
        self.remote_override = None;
        self.timestamp = None;
        self.started = None;
        self.response_committed = false;
    }
}
