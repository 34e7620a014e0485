//! # Parameters Module
//!
//! Multi-valued request parameters: the query string, a form-encoded body, and the
//! merged view the application sees.
//!
//! ## Merge policy
//!
//! | Situation | Order per name |
//! |-----------|----------------|
//! | query + body (materialisation) | query values, then body values |
//! | forward | target query values, then previous values |
//! | include | previous values, then target query values |
//!
//! An empty side never allocates a new map: the other side is used as-is.

mod decode;
mod multimap;
mod store;

pub use decode::{decode_component, decode_form, decode_into, decode_query};
pub use multimap::{MultiMap, Values, MAX_INLINE_VALUES};
pub use store::{forward_merge, include_merge, merge_params, ParameterStore, Params};
