use super::multimap::MultiMap;

/// A computed parameter set.
///
/// `Empty` is an explicit state, so "computed and empty" never needs a shared
/// sentinel. "Not yet computed" is expressed one level up as `Option::None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Params {
    #[default]
    Empty,
    Map(MultiMap),
}

impl Params {
    /// Wrap a map, collapsing an empty one into [`Params::Empty`]
    #[must_use]
    pub fn from_map(map: MultiMap) -> Self {
        if map.is_empty() {
            Params::Empty
        } else {
            Params::Map(map)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Empty => true,
            Params::Map(m) => m.is_empty(),
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&MultiMap> {
        match self {
            Params::Empty => None,
            Params::Map(m) => Some(m),
        }
    }

    #[inline]
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.as_map().and_then(|m| m.get_value(name))
    }

    #[inline]
    #[must_use]
    pub fn get_values(&self, name: &str) -> &[String] {
        self.as_map().map_or(&[], |m| m.get_values(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.as_map().into_iter().flat_map(MultiMap::names)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_map().map_or(0, MultiMap::len)
    }
}

impl From<MultiMap> for Params {
    fn from(map: MultiMap) -> Self {
        Params::from_map(map)
    }
}

/// Combine two parameter sets: all of `first`'s values, then `then`'s values
/// appended per name. An empty side yields the other side unchanged.
#[must_use]
pub fn merge_params(first: &Params, then: &Params) -> Params {
    match (first, then) {
        (Params::Empty, other) | (other, Params::Empty) => other.clone(),
        (Params::Map(a), Params::Map(b)) => {
            let mut merged = a.clone();
            merged.extend_from(b);
            Params::from_map(merged)
        }
    }
}

/// Query merge on forward: the target's values come first, the previous values are
/// appended.
#[must_use]
pub fn forward_merge(new: &Params, old: &Params) -> Params {
    merge_params(new, old)
}

/// Query merge on include: the previous values come first, the target's values are
/// appended.
#[must_use]
pub fn include_merge(old: &Params, new: &Params) -> Params {
    merge_params(old, new)
}

/// Lazily computed query, content and merged parameters of one request.
///
/// The store only holds state; decoding is driven by
/// [`crate::request::RequestContext`], which knows the URI, the encodings and the
/// body.
#[derive(Debug, Default)]
pub struct ParameterStore {
    query: Option<Params>,
    content: Option<Params>,
    merged: Option<Params>,
    content_extracted: bool,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(&self) -> Option<&Params> {
        self.query.as_ref()
    }

    pub fn set_query(&mut self, params: Option<Params>) {
        self.query = params;
    }

    #[must_use]
    pub fn content(&self) -> Option<&Params> {
        self.content.as_ref()
    }

    /// Record extracted body parameters. Body extraction never runs twice.
    pub fn set_content(&mut self, params: Params) {
        self.content = Some(params);
        self.content_extracted = true;
    }

    #[must_use]
    pub fn content_extracted(&self) -> bool {
        self.content_extracted
    }

    /// Mark body extraction as done without recording parameters
    pub fn mark_content_extracted(&mut self) {
        self.content_extracted = true;
    }

    #[must_use]
    pub fn merged(&self) -> Option<&Params> {
        self.merged.as_ref()
    }

    /// Materialise the merged view from whatever query and content parameters are
    /// present, caching the result.
    pub fn materialize(&mut self) -> &Params {
        let query = &self.query;
        let content = &self.content;
        self.merged.get_or_insert_with(|| {
            let empty = Params::Empty;
            merge_params(
                query.as_ref().unwrap_or(&empty),
                content.as_ref().unwrap_or(&empty),
            )
        })
    }

    /// Drop the merged view so it is recomputed on next access
    pub fn reset_cache(&mut self) {
        self.merged = None;
    }

    /// Restore after a nested dispatch: query parameters plus a cleared cache
    pub fn restore_query(&mut self, query: Option<Params>) {
        self.query = query;
        self.merged = None;
    }

    /// Clear everything for the next request on the connection
    pub fn recycle(&mut self) {
        *self = Self::default();
    }
}
