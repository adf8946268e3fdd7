//! flowgrid-affinity: label-selector and node-affinity evaluation.
//!
//! Evaluates Kubernetes-style constraints against machine labels. The
//! cost model calls [`satisfies_affinity`] to gate which machines a task
//! class may be routed to, and uses the term matchers to score preferred
//! (soft) terms.
//!
//! # Components
//!
//! - **`labels`**: single selector / selector list evaluation, selector hashing
//! - **`matcher`**: node selector terms (AND), term lists (OR), top-level gate
//! - **`error`**: configuration errors (unsupported selector type, unknown operator)

pub mod error;
pub mod labels;
pub mod matcher;

pub use error::{AffinityError, AffinityResult};
pub use labels::{LabelMap, hash_selectors, label_map, satisfies, satisfies_all, satisfies_label_selectors};
pub use matcher::{
    matches_any_term, matches_term, requirements_as_selectors, satisfies_affinity, selector_type_for_operator,
};
