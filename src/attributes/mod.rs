//! # Attributes Module
//!
//! Request attributes as a chain of layers. The base [`AttributeMap`] holds what the
//! application stores; each nested dispatch pushes a [`DispatchOverlay`] that answers
//! the reserved `dispatch.forward.*` or `dispatch.include.*` keys and hides the other
//! dispatch namespace where required.
//!
//! ```text
//! Overlay(Include) ──parent──▶ Overlay(Forward) ──parent──▶ Base(AttributeMap)
//! ```
//!
//! Reads walk down the chain until a layer answers. Writes to a layer's own reserved
//! keys stay in that layer and vanish when the overlay is popped; all other writes
//! land in the base map and survive the dispatch.

pub mod keys;
mod overlay;
mod store;

pub use keys::DispatchField;
pub use overlay::{AttributeChain, DispatchOverlay, DispatchRecord, OverlayKind};
pub use store::{AttributeMap, AttributeValue, Attributes, MappingMatch, RouteMapping};

/// Receives attribute change events from [`crate::request::RequestContext`]
pub trait AttributeListener: Send + Sync {
    fn attribute_added(&self, _name: &str, _value: &AttributeValue) {}

    fn attribute_replaced(&self, _name: &str, _old_value: &AttributeValue) {}

    fn attribute_removed(&self, _name: &str, _old_value: &AttributeValue) {}
}
