//! Node affinity matching.
//!
//! A node selector term is an AND of match expressions; a term list is an
//! OR of terms. Empty terms never match: they are skipped inside a term
//! list rather than treated as wildcards.

use flowgrid_core::{
    LabelSelector, NodeSelectorRequirement, NodeSelectorTerm, ResourceDescriptor, SelectorType,
    TaskDescriptor,
};
use tracing::trace;

use crate::error::{AffinityError, AffinityResult};
use crate::labels::{LabelMap, label_map, satisfies_all};

/// Map a Kubernetes operator name to a selector type. Exact match only.
pub fn selector_type_for_operator(operator: &str) -> AffinityResult<SelectorType> {
    match operator {
        "In" => Ok(SelectorType::InSet),
        "NotIn" => Ok(SelectorType::NotInSet),
        "Exists" => Ok(SelectorType::ExistsKey),
        "DoesNotExist" => Ok(SelectorType::NotExistsKey),
        other => Err(AffinityError::UnknownOperator(other.to_string())),
    }
}

/// Convert match expressions into the selector representation.
pub fn requirements_as_selectors(
    expressions: &[NodeSelectorRequirement],
) -> AffinityResult<Vec<LabelSelector>> {
    expressions
        .iter()
        .map(|req| {
            let kind = selector_type_for_operator(&req.operator)?;
            Ok(LabelSelector::new(req.key.clone(), kind, req.values.iter().cloned()))
        })
        .collect()
}

fn term_matches_labels(labels: &LabelMap<'_>, term: &NodeSelectorTerm) -> AffinityResult<bool> {
    if term.match_expressions.is_empty() {
        return Ok(false);
    }
    let selectors = requirements_as_selectors(&term.match_expressions)?;
    satisfies_all(labels, &selectors)
}

/// A term with zero expressions never matches.
pub fn matches_term(rd: &ResourceDescriptor, term: &NodeSelectorTerm) -> AffinityResult<bool> {
    term_matches_labels(&label_map(&rd.labels), term)
}

/// OR over `terms`; empty terms are skipped.
pub fn matches_any_term(rd: &ResourceDescriptor, terms: &[NodeSelectorTerm]) -> AffinityResult<bool> {
    let labels = label_map(&rd.labels);
    for term in terms {
        if term.match_expressions.is_empty() {
            continue;
        }
        if term_matches_labels(&labels, term)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Hard-constraint gate: may `td` be placed on `rd` at all?
///
/// Direct label selectors must all hold. When node affinity is declared,
/// a non-empty required term list must match; a missing or empty required
/// clause accepts every machine.
pub fn satisfies_affinity(rd: &ResourceDescriptor, td: &TaskDescriptor) -> AffinityResult<bool> {
    let labels = label_map(&rd.labels);

    if !td.label_selectors.is_empty() && !satisfies_all(&labels, &td.label_selectors)? {
        trace!(task = td.uid, machine = %rd.uuid, "label selectors not satisfied");
        return Ok(false);
    }

    let Some(node_affinity) = td.affinity.as_ref().and_then(|a| a.node_affinity.as_ref()) else {
        return Ok(true);
    };

    let Some(required) = node_affinity.required.as_ref() else {
        // No required clause: select all nodes.
        return Ok(true);
    };
    if required.terms.is_empty() {
        return Ok(true);
    }

    let matched = matches_any_term(rd, &required.terms)?;
    if !matched {
        trace!(task = td.uid, machine = %rd.uuid, "required node affinity not satisfied");
    }
    Ok(matched)
}
