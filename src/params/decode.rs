//! Strict `application/x-www-form-urlencoded` decoding.
//!
//! Unlike lenient decoders, a `%` must always be followed by two hex digits and the
//! decoded bytes must be valid in the selected charset. Anything else is reported as a
//! `400 Bad Request` so that malformed client input never reaches the application.

use super::multimap::MultiMap;
use crate::charset::Charset;
use crate::error::{RequestError, Result};
use std::borrow::Cow;

fn validate_escapes(raw: &[u8]) -> bool {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let valid = raw
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// Decode one name or value: `+` becomes a space, `%XX` a byte, then the bytes are
/// interpreted in `charset`.
pub fn decode_component(raw: &[u8], charset: Charset) -> Result<String> {
    if !validate_escapes(raw) {
        return Err(RequestError::bad_request("Bad escape sequence"));
    }
    let plus_decoded: Cow<'_, [u8]> = if raw.contains(&b'+') {
        Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        )
    } else {
        Cow::Borrowed(raw)
    };
    let bytes = urlencoding::decode_binary(&plus_decoded);
    charset
        .decode(&bytes)
        .ok_or_else(|| RequestError::bad_request(format!("Not valid {}", charset.name())))
}

/// Decode `input` and append every pair to `map`.
///
/// Empty segments (`a=1&&b=2`) are skipped; a name without `=` gets an empty value.
/// With `max_keys` set, growing the map beyond that many distinct names is an error.
pub fn decode_into(
    map: &mut MultiMap,
    input: &[u8],
    charset: Charset,
    max_keys: Option<usize>,
) -> Result<()> {
    for pair in input.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_name, raw_value) = match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &pair[pair.len()..]),
        };
        if raw_name.is_empty() {
            continue;
        }
        let name = decode_component(raw_name, charset)?;
        let value = decode_component(raw_value, charset)?;
        map.add(name, value);
        if let Some(max) = max_keys {
            if map.len() > max {
                return Err(RequestError::bad_request(format!(
                    "Too many form keys > {}",
                    max
                )));
            }
        }
    }
    Ok(())
}

/// Decode a query string (without the leading `?`)
pub fn decode_query(query: &str, charset: Charset) -> Result<MultiMap> {
    let mut map = MultiMap::new();
    decode_into(&mut map, query.as_bytes(), charset, None)?;
    Ok(map)
}

/// Decode a form body, bounded by `max_keys`
pub fn decode_form(body: &[u8], charset: Charset, max_keys: usize) -> Result<MultiMap> {
    let mut map = MultiMap::new();
    decode_into(&mut map, body, charset, Some(max_keys))?;
    Ok(map)
}
