use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a route matched the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMatch {
    /// Empty path relative to the context root
    ContextRoot,
    /// The default handler (`/`)
    Default,
    /// Exact path match
    Exact,
    /// `*.ext` style match
    Extension,
    /// `/prefix/*` style match
    Path,
}

/// Which route handled a request and how it matched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteMapping {
    /// Portion of the path that matched
    pub match_value: String,
    /// The route pattern, e.g. `/pets/*`
    pub pattern: String,
    /// Name of the handler bound to the route
    pub handler_name: String,
    pub match_kind: MappingMatch,
}

impl RouteMapping {
    pub fn new(
        match_value: impl Into<String>,
        pattern: impl Into<String>,
        handler_name: impl Into<String>,
        match_kind: MappingMatch,
    ) -> Self {
        Self {
            match_value: match_value.into(),
            pattern: pattern.into(),
            handler_name: handler_name.into(),
            match_kind,
        }
    }
}

/// A request attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Mapping(RouteMapping),
    Json(serde_json::Value),
}

impl AttributeValue {
    /// Text content, if this is a text attribute
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_mapping(&self) -> Option<&RouteMapping> {
        match self {
            AttributeValue::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Mapping(m) => write!(f, "{} ({})", m.pattern, m.handler_name),
            AttributeValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<RouteMapping> for AttributeValue {
    fn from(m: RouteMapping) -> Self {
        AttributeValue::Mapping(m)
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(v: serde_json::Value) -> Self {
        AttributeValue::Json(v)
    }
}

/// Capability shared by every attribute layer
pub trait Attributes {
    /// Look up an attribute
    fn get(&self, key: &str) -> Option<&AttributeValue>;

    /// Set (`Some`) or remove (`None`) an attribute, returning the previous value
    fn set(&mut self, key: &str, value: Option<AttributeValue>) -> Option<AttributeValue>;

    /// Remove an attribute, returning the previous value
    fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.set(key, None)
    }

    /// Names visible through this layer, sorted
    fn names(&self) -> Vec<String>;

    /// Remove every attribute
    fn clear(&mut self) -> Result<()>;
}

/// The base attribute store of a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    values: HashMap<String, AttributeValue>,
}

impl AttributeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Attributes for AttributeMap {
    fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Option<AttributeValue>) -> Option<AttributeValue> {
        match value {
            Some(v) => self.values.insert(key.to_string(), v),
            None => self.values.remove(key),
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }

    fn clear(&mut self) -> Result<()> {
        self.values.clear();
        Ok(())
    }
}
