//! Character encodings understood by the request core.
//!
//! Only two encodings are needed: UTF-8 for query strings and modern bodies, and
//! ISO-8859-1, the historic default for HTTP bodies. Decoding is strict for UTF-8 and
//! total for ISO-8859-1 (every byte maps to the code point of the same value).

use crate::error::{RequestError, Result};
use std::fmt;

/// A supported character encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Iso8859_1,
}

impl Charset {
    /// Look up a charset by any of its common names (case-insensitive)
    #[must_use]
    pub fn lookup(name: &str) -> Option<Charset> {
        let name = name.trim().trim_matches('"');
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "iso_8859_1" | "iso_8859-1" | "latin1" | "l1" => {
                Some(Charset::Iso8859_1)
            }
            _ => None,
        }
    }

    /// Like [`Charset::lookup`] but reports unknown names as
    /// [`RequestError::UnsupportedEncoding`]
    pub fn for_name(name: &str) -> Result<Charset> {
        Self::lookup(name).ok_or_else(|| RequestError::UnsupportedEncoding(name.to_string()))
    }

    /// Canonical name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso8859_1 => "ISO-8859-1",
        }
    }

    /// Decode a complete byte sequence, `None` if it is not valid in this charset
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Charset::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Charset::Iso8859_1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extract the `charset` parameter of a content type, e.g.
/// `text/plain; charset="utf-8"` → `utf-8`
#[must_use]
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}

/// The media type of a content type without parameters, lowercased
#[must_use]
pub fn mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
