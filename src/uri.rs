//! Mutable request URI and path helpers.
//!
//! [`HttpUri`] keeps the parts a dispatch may rewrite (path and query) separate from
//! the parts it must preserve (scheme, host, port). Parsing is delegated to
//! [`http::Uri`].

use crate::error::{RequestError, Result};
use std::fmt;

/// A request URI whose path and query can be rewritten in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpUri {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
}

fn bad_uri() -> RequestError {
    RequestError::bad_request("Bad URI")
}

impl HttpUri {
    /// Parse an absolute (`http://host/p?q`), origin (`/p?q`) or asterisk (`*`) target
    pub fn parse(target: &str) -> Result<Self> {
        let uri: http::Uri = target.parse().map_err(|_| bad_uri())?;
        Ok(Self {
            scheme: uri.scheme_str().map(str::to_owned),
            host: uri.host().map(str::to_owned),
            port: uri.port_u16(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_owned),
        })
    }

    /// Build from a path with an optional `?query` suffix, without validation
    #[must_use]
    pub fn from_path_query(path_query: &str) -> Self {
        let (path, query) = split_query(path_query);
        Self {
            path: path.to_string(),
            query: query.map(str::to_owned),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = Some(scheme.into());
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Set host and port from an authority such as `example.com:8080`
    pub fn set_authority(&mut self, authority: &str) -> Result<()> {
        let parsed: http::uri::Authority = authority.parse().map_err(|_| bad_uri())?;
        self.host = Some(parsed.host().to_string());
        self.port = parsed.port_u16();
        Ok(())
    }

    /// Raw (still percent-encoded) path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query.filter(|q| !q.is_empty());
    }

    /// Replace path and query, keeping scheme and authority
    pub fn set_path_query(&mut self, path: impl Into<String>, query: Option<String>) {
        self.path = path.into();
        self.set_query(query);
    }

    /// `path?query` as sent on the request line
    #[must_use]
    pub fn path_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Percent-decoded path
    pub fn decoded_path(&self) -> Result<String> {
        decode_path(&self.path)
    }
}

impl fmt::Display for HttpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{}://{}", self.scheme.as_deref().unwrap_or("http"), host)?;
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
        }
        f.write_str(&self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        Ok(())
    }
}

/// Split `path?query`; an empty query counts as absent
#[must_use]
pub fn split_query(path_query: &str) -> (&str, Option<&str>) {
    match path_query.split_once('?') {
        Some((path, query)) => (path, (!query.is_empty()).then_some(query)),
        None => (path_query, None),
    }
}

/// Percent-decode a path. Decoded bytes that are not UTF-8 are read as ISO-8859-1.
pub fn decode_path(path: &str) -> Result<String> {
    let raw = path.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let valid = raw
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(bad_uri());
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let bytes = urlencoding::decode_binary(raw);
    Ok(match std::str::from_utf8(&bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    })
}

/// Remove `.` and `..` segments. `None` if the path climbs above the root.
#[must_use]
pub fn canonical_path(path: &str) -> Option<String> {
    let Some(rest) = path.strip_prefix('/') else {
        return Some(path.to_string());
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len().saturating_sub(1);
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            "." => {
                if i == last {
                    out.push("");
                }
            }
            ".." => {
                out.pop()?;
                if i == last {
                    out.push("");
                }
            }
            other => out.push(other),
        }
    }
    Some(format!("/{}", out.join("/")))
}

/// Collapse runs of `/` into one
#[must_use]
pub fn compact_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

/// Join two path fragments with exactly one `/` between them
#[must_use]
pub fn add_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !base.is_empty() && !path.is_empty() => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Everything up to and including the last `/`
#[must_use]
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}
