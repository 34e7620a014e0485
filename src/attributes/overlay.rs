use super::keys::{self, DispatchField};
use super::store::{AttributeMap, AttributeValue, Attributes};
use crate::error::{RequestError, Result};
use std::collections::BTreeSet;

/// Which reserved namespace an overlay owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// `dispatch.forward.*`, used by forward and error dispatch
    Forward,
    /// `dispatch.include.*`
    Include,
}

impl OverlayKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            OverlayKind::Forward => keys::FORWARD_PREFIX,
            OverlayKind::Include => keys::INCLUDE_PREFIX,
        }
    }

    #[must_use]
    pub fn key(self, field: DispatchField) -> &'static str {
        match self {
            OverlayKind::Forward => field.forward_key(),
            OverlayKind::Include => field.include_key(),
        }
    }
}

/// The six reserved values recorded for one dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchRecord {
    values: [Option<AttributeValue>; 6],
}

fn slot(field: DispatchField) -> usize {
    match field {
        DispatchField::RequestUri => 0,
        DispatchField::ContextPath => 1,
        DispatchField::HandlerPath => 2,
        DispatchField::PathInfo => 3,
        DispatchField::QueryString => 4,
        DispatchField::Mapping => 5,
    }
}

impl DispatchRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`DispatchRecord::set`]
    #[must_use]
    pub fn with<V: Into<AttributeValue>>(mut self, field: DispatchField, value: Option<V>) -> Self {
        self.values[slot(field)] = value.map(Into::into);
        self
    }

    #[must_use]
    pub fn get(&self, field: DispatchField) -> Option<&AttributeValue> {
        self.values[slot(field)].as_ref()
    }

    pub fn set(&mut self, field: DispatchField, value: Option<AttributeValue>) -> Option<AttributeValue> {
        std::mem::replace(&mut self.values[slot(field)], value)
    }

    /// Copy the forward values currently visible through `view`
    pub fn copy_from(view: &dyn Attributes, kind: OverlayKind) -> Self {
        let mut record = Self::new();
        for field in DispatchField::ALL {
            record.values[slot(field)] = view.get(kind.key(field)).cloned();
        }
        record
    }
}

/// A short-lived attribute layer installed for the duration of one nested dispatch.
///
/// The overlay owns its parent. Its private [`DispatchRecord`] answers the reserved
/// keys of its own namespace, and the other kind's namespace reads as absent. All
/// other reads and every write outside its own namespace go to the parent. Dispatch
/// by handler name installs no overlay at all.
#[derive(Debug)]
pub struct DispatchOverlay {
    kind: OverlayKind,
    record: DispatchRecord,
    parent: AttributeChain,
}

impl DispatchOverlay {
    #[must_use]
    pub fn kind(&self) -> OverlayKind {
        self.kind
    }

    #[must_use]
    pub fn record(&self) -> &DispatchRecord {
        &self.record
    }

    #[must_use]
    pub fn parent(&self) -> &AttributeChain {
        &self.parent
    }

    fn own_field(&self, key: &str) -> Option<DispatchField> {
        DispatchField::from_key(self.kind.prefix(), key)
    }

    fn is_other_kind(&self, key: &str) -> bool {
        match self.kind {
            OverlayKind::Forward => keys::is_include_key(key),
            OverlayKind::Include => keys::is_forward_key(key),
        }
    }
}

impl Attributes for DispatchOverlay {
    fn get(&self, key: &str) -> Option<&AttributeValue> {
        if let Some(field) = self.own_field(key) {
            return self.record.get(field);
        }
        if self.is_other_kind(key) {
            return None;
        }
        self.parent.get(key)
    }

    fn set(&mut self, key: &str, value: Option<AttributeValue>) -> Option<AttributeValue> {
        match self.own_field(key) {
            Some(field) => self.record.set(field, value),
            None => self.parent.set(key, value),
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .parent
            .names()
            .into_iter()
            .filter(|n| !keys::is_forward_key(n) && !keys::is_include_key(n))
            .collect();
        for field in DispatchField::ALL {
            if self.record.get(field).is_some() {
                names.insert(self.kind.key(field).to_string());
            }
        }
        names.into_iter().collect()
    }

    fn clear(&mut self) -> Result<()> {
        Err(RequestError::illegal_state(
            "attributes cannot be cleared during a dispatch",
        ))
    }
}

/// The attribute view of a request: the base map, or a stack of overlays on top of it
#[derive(Debug)]
pub enum AttributeChain {
    Base(AttributeMap),
    Overlay(Box<DispatchOverlay>),
}

impl Default for AttributeChain {
    fn default() -> Self {
        AttributeChain::Base(AttributeMap::new())
    }
}

impl AttributeChain {
    /// Install an overlay on top of the current view
    pub fn push_overlay(&mut self, kind: OverlayKind, record: DispatchRecord) {
        let parent = std::mem::take(self);
        *self = AttributeChain::Overlay(Box::new(DispatchOverlay {
            kind,
            record,
            parent,
        }));
    }

    /// Remove the topmost overlay, restoring its parent as the current view
    pub fn pop_overlay(&mut self) -> Option<DispatchOverlay> {
        match std::mem::take(self) {
            AttributeChain::Overlay(overlay) => {
                let mut overlay = *overlay;
                *self = std::mem::take(&mut overlay.parent);
                Some(overlay)
            }
            base => {
                *self = base;
                None
            }
        }
    }

    /// Number of overlays above the base map
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let AttributeChain::Overlay(overlay) = current {
            depth += 1;
            current = &overlay.parent;
        }
        depth
    }

    /// The topmost overlay, if any
    #[must_use]
    pub fn top(&self) -> Option<&DispatchOverlay> {
        match self {
            AttributeChain::Overlay(overlay) => Some(overlay),
            AttributeChain::Base(_) => None,
        }
    }

    /// The base map under all overlays
    #[must_use]
    pub fn base(&self) -> &AttributeMap {
        let mut current = self;
        loop {
            match current {
                AttributeChain::Base(map) => return map,
                AttributeChain::Overlay(overlay) => current = &overlay.parent,
            }
        }
    }

    /// Drop every overlay and every attribute
    pub fn reset(&mut self) {
        *self = AttributeChain::default();
    }
}

impl Attributes for AttributeChain {
    fn get(&self, key: &str) -> Option<&AttributeValue> {
        match self {
            AttributeChain::Base(map) => map.get(key),
            AttributeChain::Overlay(overlay) => overlay.get(key),
        }
    }

    fn set(&mut self, key: &str, value: Option<AttributeValue>) -> Option<AttributeValue> {
        match self {
            AttributeChain::Base(map) => map.set(key, value),
            AttributeChain::Overlay(overlay) => overlay.set(key, value),
        }
    }

    fn names(&self) -> Vec<String> {
        match self {
            AttributeChain::Base(map) => map.names(),
            AttributeChain::Overlay(overlay) => overlay.names(),
        }
    }

    fn clear(&mut self) -> Result<()> {
        match self {
            AttributeChain::Base(map) => map.clear(),
            AttributeChain::Overlay(overlay) => overlay.clear(),
        }
    }
}
