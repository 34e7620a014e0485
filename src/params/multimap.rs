use smallvec::SmallVec;
use std::collections::HashMap;

/// Values stored inline before spilling to the heap.
/// Nearly every parameter name carries exactly one value.
pub const MAX_INLINE_VALUES: usize = 2;

/// Ordered values of a single parameter name
pub type Values = SmallVec<[String; MAX_INLINE_VALUES]>;

/// Multi-valued map `name → [value, ...]` that remembers the order in which names
/// were first added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, Values)>,
    index: HashMap<String, usize>,
}

impl MultiMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1.push(value),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                let mut values = Values::new();
                values.push(value);
                self.entries.push((name, values));
            }
        }
    }

    /// Append every value of `values` under `name`
    pub fn add_all<'a, I>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for value in values {
            self.add(name, value.as_str());
        }
    }

    /// Append every value of `other` after this map's values
    pub fn extend_from(&mut self, other: &MultiMap) {
        for (name, values) in &other.entries {
            self.add_all(name, values);
        }
    }

    /// First value of `name`
    #[inline]
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get_values(name).first().map(String::as_str)
    }

    /// All values of `name` in insertion order (empty if absent)
    #[inline]
    #[must_use]
    pub fn get_values(&self, name: &str) -> &[String] {
        match self.index.get(name) {
            Some(&i) => &self.entries[i].1,
            None => &[],
        }
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Parameter names in first-seen order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Number of distinct names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy into a plain map of name → values
    #[must_use]
    pub fn to_hash_map(&self) -> HashMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|(n, v)| (n.clone(), v.to_vec()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = MultiMap::new();
        for (k, v) in iter {
            map.add(k, v);
        }
        map
    }
}
