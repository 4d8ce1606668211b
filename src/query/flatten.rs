// ============================================================================
// Disjunction Flattening
// ============================================================================
//
// Backends whose native filter form is a single AND-only attribute map cannot
// express OR directly. This pass rewrites an arbitrary AND/OR criteria tree
// into disjunctive normal form: a list of alternatives, each a flat list of
// property criteria combined with AND. The caller executes one native filter
// per alternative and unions the results.
//
// ============================================================================

use crate::core::{DbError, Result};
use crate::query::criteria::{Criterion, Junction, PropertyCriterion};

/// Flatten a criteria tree into a list of AND-only alternatives.
///
/// An empty conjunction yields one empty alternative (match all). An empty
/// disjunction yields no alternatives (match none). `Negation` has no flat
/// representation and is rejected.
pub fn flatten(junction: &Junction) -> Result<Vec<Vec<PropertyCriterion>>> {
    match junction {
        Junction::Conjunction(children) => flatten_conjunction(children),
        Junction::Disjunction(children) => flatten_disjunction(children),
        Junction::Negation(_) => Err(negation_unsupported()),
    }
}

fn negation_unsupported() -> DbError {
    DbError::UnsupportedOperation(
        "Negation is not supported by flat filter compilation".to_string(),
    )
}

/// AND node: plain criteria accumulate into every alternative; each nested
/// disjunction contributes one independent source of alternatives; a nested
/// conjunction that flattens to a single alternative folds into the plain
/// criteria, otherwise it is a source like any other.
fn flatten_conjunction(children: &[Criterion]) -> Result<Vec<Vec<PropertyCriterion>>> {
    let mut properties: Vec<PropertyCriterion> = Vec::new();
    let mut sources: Vec<Vec<Vec<PropertyCriterion>>> = Vec::new();

    for child in children {
        match child {
            Criterion::Property(p) => properties.push(p.clone()),
            Criterion::Junction(Junction::Conjunction(nested)) => {
                let mut inner = flatten_conjunction(nested)?;
                if inner.len() == 1 {
                    properties.extend(inner.remove(0));
                } else {
                    sources.push(inner);
                }
            }
            Criterion::Junction(Junction::Disjunction(nested)) => {
                sources.push(flatten_disjunction(nested)?);
            }
            Criterion::Junction(Junction::Negation(_)) => return Err(negation_unsupported()),
        }
    }

    if !properties.is_empty() || sources.is_empty() {
        // The plain criteria form one more source with a single alternative,
        // so an AND node with no disjunctions yields exactly one filter.
        sources.push(vec![properties]);
    }

    Ok(combinate(sources))
}

/// OR node: each child contributes its own alternatives independently.
fn flatten_disjunction(children: &[Criterion]) -> Result<Vec<Vec<PropertyCriterion>>> {
    let mut alternatives = Vec::new();
    for child in children {
        match child {
            Criterion::Property(p) => alternatives.push(vec![p.clone()]),
            Criterion::Junction(j) => alternatives.extend(flatten(j)?),
        }
    }
    Ok(alternatives)
}

/// Cartesian product over alternative sources: one alternative is picked from
/// every source and their criteria concatenated. Any empty source (an empty
/// disjunction) zeroes the whole product.
fn combinate(sources: Vec<Vec<Vec<PropertyCriterion>>>) -> Vec<Vec<PropertyCriterion>> {
    let mut result: Vec<Vec<PropertyCriterion>> = vec![Vec::new()];
    for source in sources {
        let mut next = Vec::with_capacity(result.len() * source.len());
        for combination in &result {
            for alternative in &source {
                let mut extended = combination.clone();
                extended.extend(alternative.iter().cloned());
                next.push(extended);
            }
        }
        result = next;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::criteria::restrict::*;

    #[test]
    fn test_disjunction_distributes_over_conjunction() {
        // (a = 1 OR b = 2) AND c = 3
        let tree = Junction::Conjunction(vec![
            disjunction(vec![eq("a", 1i64), eq("b", 2i64)]),
            eq("c", 3i64),
        ]);

        let flat = flatten(&tree).unwrap();
        assert_eq!(flat.len(), 2);
        // alternative 1: a = 1 AND c = 3
        assert_eq!(
            flat[0],
            vec![
                PropertyCriterion::Equals { property: "a".into(), value: 1i64.into() },
                PropertyCriterion::Equals { property: "c".into(), value: 3i64.into() },
            ]
        );
        // alternative 2: b = 2 AND c = 3
        assert_eq!(
            flat[1],
            vec![
                PropertyCriterion::Equals { property: "b".into(), value: 2i64.into() },
                PropertyCriterion::Equals { property: "c".into(), value: 3i64.into() },
            ]
        );
    }

    #[test]
    fn test_two_disjunctions_multiply() {
        // (a OR b) AND (c OR d) -> 4 alternatives
        let tree = Junction::Conjunction(vec![
            disjunction(vec![eq("a", 1i64), eq("b", 1i64)]),
            disjunction(vec![eq("c", 1i64), eq("d", 1i64)]),
        ]);
        let flat = flatten(&tree).unwrap();
        assert_eq!(flat.len(), 4);
        for alt in &flat {
            assert_eq!(alt.len(), 2);
        }
    }

    #[test]
    fn test_single_alternative_conjunction_folds() {
        // (a = 1 AND b = 2) AND c = 3 -> one filter with three criteria
        let tree = Junction::Conjunction(vec![
            conjunction(vec![eq("a", 1i64), eq("b", 2i64)]),
            eq("c", 3i64),
        ]);
        let flat = flatten(&tree).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].len(), 3);
    }

    #[test]
    fn test_empty_conjunction_matches_all() {
        let flat = flatten(&Junction::Conjunction(vec![])).unwrap();
        assert_eq!(flat, vec![Vec::<PropertyCriterion>::new()]);
    }

    #[test]
    fn test_empty_disjunction_matches_none() {
        let flat = flatten(&Junction::Disjunction(vec![])).unwrap();
        assert!(flat.is_empty());

        // Nested inside a conjunction it zeroes the whole product
        let tree = Junction::Conjunction(vec![eq("a", 1i64), disjunction(vec![])]);
        assert!(flatten(&tree).unwrap().is_empty());
    }

    #[test]
    fn test_negation_is_rejected() {
        let tree = Junction::Conjunction(vec![negation(Junction::Conjunction(vec![eq(
            "a", 1i64,
        )]))]);
        assert!(matches!(
            flatten(&tree),
            Err(DbError::UnsupportedOperation(_))
        ));
    }
}
