//! Reserved attribute names.
//!
//! Attributes under [`DISPATCH_ROOT`] describe the request as it was before a nested
//! dispatch. They are owned by the dispatch overlays and are never stored in the
//! base attribute map by the dispatcher itself.

/// Root shared by both dispatch namespaces
pub const DISPATCH_ROOT: &str = "dispatch.";
/// Namespace written by forward (and error) dispatch
pub const FORWARD_PREFIX: &str = "dispatch.forward.";
/// Namespace written by include dispatch
pub const INCLUDE_PREFIX: &str = "dispatch.include.";

pub const FORWARD_REQUEST_URI: &str = "dispatch.forward.request_uri";
pub const FORWARD_CONTEXT_PATH: &str = "dispatch.forward.context_path";
pub const FORWARD_HANDLER_PATH: &str = "dispatch.forward.handler_path";
pub const FORWARD_PATH_INFO: &str = "dispatch.forward.path_info";
pub const FORWARD_QUERY_STRING: &str = "dispatch.forward.query_string";
pub const FORWARD_MAPPING: &str = "dispatch.forward.mapping";

pub const INCLUDE_REQUEST_URI: &str = "dispatch.include.request_uri";
pub const INCLUDE_CONTEXT_PATH: &str = "dispatch.include.context_path";
pub const INCLUDE_HANDLER_PATH: &str = "dispatch.include.handler_path";
pub const INCLUDE_PATH_INFO: &str = "dispatch.include.path_info";
pub const INCLUDE_QUERY_STRING: &str = "dispatch.include.query_string";
pub const INCLUDE_MAPPING: &str = "dispatch.include.mapping";

/// Setting this attribute changes the request's query encoding
pub const QUERY_ENCODING: &str = "request.query_encoding";

/// One of the six fields an overlay records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchField {
    RequestUri,
    ContextPath,
    HandlerPath,
    PathInfo,
    QueryString,
    Mapping,
}

impl DispatchField {
    pub const ALL: [DispatchField; 6] = [
        DispatchField::RequestUri,
        DispatchField::ContextPath,
        DispatchField::HandlerPath,
        DispatchField::PathInfo,
        DispatchField::QueryString,
        DispatchField::Mapping,
    ];

    /// Key suffix shared by both namespaces
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            DispatchField::RequestUri => "request_uri",
            DispatchField::ContextPath => "context_path",
            DispatchField::HandlerPath => "handler_path",
            DispatchField::PathInfo => "path_info",
            DispatchField::QueryString => "query_string",
            DispatchField::Mapping => "mapping",
        }
    }

    /// Full forward-namespace key
    #[must_use]
    pub fn forward_key(self) -> &'static str {
        match self {
            DispatchField::RequestUri => FORWARD_REQUEST_URI,
            DispatchField::ContextPath => FORWARD_CONTEXT_PATH,
            DispatchField::HandlerPath => FORWARD_HANDLER_PATH,
            DispatchField::PathInfo => FORWARD_PATH_INFO,
            DispatchField::QueryString => FORWARD_QUERY_STRING,
            DispatchField::Mapping => FORWARD_MAPPING,
        }
    }

    /// Full include-namespace key
    #[must_use]
    pub fn include_key(self) -> &'static str {
        match self {
            DispatchField::RequestUri => INCLUDE_REQUEST_URI,
            DispatchField::ContextPath => INCLUDE_CONTEXT_PATH,
            DispatchField::HandlerPath => INCLUDE_HANDLER_PATH,
            DispatchField::PathInfo => INCLUDE_PATH_INFO,
            DispatchField::QueryString => INCLUDE_QUERY_STRING,
            DispatchField::Mapping => INCLUDE_MAPPING,
        }
    }

    /// Resolve a key within `prefix` back to its field
    #[must_use]
    pub fn from_key(prefix: &str, key: &str) -> Option<DispatchField> {
        let suffix = key.strip_prefix(prefix)?;
        Self::ALL.into_iter().find(|f| f.suffix() == suffix)
    }
}

#[must_use]
pub fn is_forward_key(key: &str) -> bool {
    key.starts_with(FORWARD_PREFIX)
}

#[must_use]
pub fn is_include_key(key: &str) -> bool {
    key.starts_with(INCLUDE_PREFIX)
}
