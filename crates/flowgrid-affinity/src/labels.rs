//! Label selector evaluation.
//!
//! A machine's ordered label list is flattened into a key → value map
//! before evaluation. Duplicate keys keep their first value.

use std::collections::{HashMap, HashSet};

use flowgrid_core::{Label, LabelSelector, ResourceDescriptor, SelectorType};
use sha2::{Digest, Sha256};

use crate::error::{AffinityError, AffinityResult};

/// Flattened label view borrowed from a label list.
pub type LabelMap<'a> = HashMap<&'a str, &'a str>;

/// Flatten a label list. The first occurrence of a key wins.
pub fn label_map(labels: &[Label]) -> LabelMap<'_> {
    let mut map = HashMap::with_capacity(labels.len());
    for label in labels {
        map.entry(label.key.as_str()).or_insert(label.value.as_str());
    }
    map
}

/// Evaluate one selector against a flattened label map.
///
/// `NOT_IN_SET` is satisfied by an absent key, `IN_SET` is not: the two
/// are not complements.
pub fn satisfies(labels: &LabelMap<'_>, selector: &LabelSelector) -> AffinityResult<bool> {
    let kind = selector
        .kind()
        .map_err(AffinityError::UnsupportedSelectorType)?;
    let value = labels.get(selector.key.as_str());

    let satisfied = match kind {
        SelectorType::InSet => match value {
            Some(v) => value_set(selector).contains(v),
            None => false,
        },
        SelectorType::NotInSet => match value {
            Some(v) => !value_set(selector).contains(v),
            None => true,
        },
        SelectorType::ExistsKey => value.is_some(),
        SelectorType::NotExistsKey => value.is_none(),
    };
    Ok(satisfied)
}

/// AND over `selectors`, stopping at the first failure.
///
/// An unsupported selector type is reported only if evaluation reaches it.
pub fn satisfies_all(labels: &LabelMap<'_>, selectors: &[LabelSelector]) -> AffinityResult<bool> {
    for selector in selectors {
        if !satisfies(labels, selector)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate `selectors` against a resource's labels.
pub fn satisfies_label_selectors(
    rd: &ResourceDescriptor,
    selectors: &[LabelSelector],
) -> AffinityResult<bool> {
    satisfies_all(&label_map(&rd.labels), selectors)
}

fn value_set(selector: &LabelSelector) -> HashSet<&str> {
    selector.values.iter().map(String::as_str).collect()
}

/// Order-sensitive structural hash of a selector list.
///
/// Used as a dedup key for equivalence classes, not as an identifier:
/// collisions are possible but rare.
pub fn hash_selectors(selectors: &[LabelSelector]) -> u64 {
    let mut hasher = Sha256::new();
    for selector in selectors {
        hasher.update(selector.key.as_bytes());
        hasher.update([0u8]);
        hasher.update(selector.selector_type.to_le_bytes());
        for value in &selector.values {
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        // Terminates the value list so ["a"],["b"] and ["a","b"] differ.
        hasher.update([0xffu8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
