use std::fmt;
use std::io;

/// Result alias used across the request core
pub type Result<T> = std::result::Result<T, RequestError>;

/// Errors raised while handling, dispatching or reading a request
///
/// The variants follow three broad categories:
///
/// - **Bad input** from the client (`BadMessage`, `EarlyEof`) - reported as a 4xx/5xx
///   status and never allowed to corrupt request state
/// - **Illegal API usage** (`IllegalState`, `UnsupportedEncoding`) - a programming
///   error surfaced immediately instead of silently continuing
/// - **Transport failures** (`Timeout`, `Io`) and failures raised by nested handlers
///   (`Handler`)
/// - **Refused login** (`AuthenticationFailed`)
#[derive(Debug)]
pub enum RequestError {
    /// Malformed or over-limit client input
    BadMessage {
        /// HTTP status to report
        status: u16,
        /// Short human readable reason
        reason: String,
    },
    /// An API was used in a state that does not allow it
    IllegalState(String),
    /// A character encoding name that is not supported
    UnsupportedEncoding(String),
    /// A blocking read did not see content before the configured timeout
    Timeout,
    /// The body ended before the announced content length
    EarlyEof,
    /// Failure from the underlying transport
    Io(io::Error),
    /// Failure raised by a nested request handler
    Handler(anyhow::Error),
    /// Programmatic login was refused
    AuthenticationFailed(String),
}

impl RequestError {
    /// Build a `400 Bad Request` error
    pub fn bad_request(reason: impl Into<String>) -> Self {
        RequestError::BadMessage {
            status: 400,
            reason: reason.into(),
        }
    }

    /// Build a bad message error with an explicit status
    pub fn bad_message(status: u16, reason: impl Into<String>) -> Self {
        RequestError::BadMessage {
            status,
            reason: reason.into(),
        }
    }

    /// Build an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        RequestError::IllegalState(msg.into())
    }

    /// HTTP status code that best describes this error
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            RequestError::BadMessage { status, .. } => *status,
            RequestError::EarlyEof => 400,
            RequestError::Timeout => 408,
            RequestError::AuthenticationFailed(_) => 401,
            RequestError::IllegalState(_)
            | RequestError::UnsupportedEncoding(_)
            | RequestError::Io(_)
            | RequestError::Handler(_) => 500,
        }
    }

    /// True for errors caused by the client rather than the server
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::BadMessage { status, reason } => {
                write!(f, "bad message {}: {}", status, reason)
            }
            RequestError::IllegalState(msg) => write!(f, "illegal state: {}", msg),
            RequestError::UnsupportedEncoding(name) => {
                write!(f, "unsupported character encoding '{}'", name)
            }
            RequestError::Timeout => write!(f, "timed out waiting for request content"),
            RequestError::EarlyEof => write!(f, "early EOF while reading request content"),
            RequestError::Io(e) => write!(f, "I/O error: {}", e),
            RequestError::Handler(e) => write!(f, "handler failed: {:#}", e),
            RequestError::AuthenticationFailed(msg) => write!(f, "authentication failed: {}", msg),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Io(e) => Some(e),
            RequestError::Handler(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => RequestError::Timeout,
            io::ErrorKind::UnexpectedEof => RequestError::EarlyEof,
            _ => RequestError::Io(e),
        }
    }
}

impl From<anyhow::Error> for RequestError {
    fn from(e: anyhow::Error) -> Self {
        RequestError::Handler(e)
    }
}

impl From<RequestError> for io::Error {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Io(inner) => inner,
            RequestError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "content read timed out"),
            RequestError::EarlyEof => io::Error::new(io::ErrorKind::UnexpectedEof, "early EOF"),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
