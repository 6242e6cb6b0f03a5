// SPDX-License-Identifier: Apache-2.0

//! Query slicing: before a query is handed to the solver, path constraints
//! that cannot affect the target are dropped. The target is the query's last
//! constraint (the negated branch); a path constraint is kept iff it shares a
//! variable with the target, directly or through other kept constraints.

use std::collections::BTreeSet;

use testsynth_sym::constraint::Constraint;

/// Slices `query` to the target's cone of influence, preserving constraint
/// order. An empty query stays empty.
pub fn cone_of_influence(query: &[Constraint]) -> Vec<Constraint> {
    let Some((target, path)) = query.split_last() else {
        return Vec::new();
    };
    let mut relevant: BTreeSet<String> = target.vars();
    // Grow the variable set to a fixed point; constraints chain through
    // shared variables.
    loop {
        let before = relevant.len();
        for c in path {
            let vars = c.vars();
            if !vars.is_disjoint(&relevant) {
                relevant.extend(vars);
            }
        }
        if relevant.len() == before {
            break;
        }
    }
    let mut sliced: Vec<Constraint> = path
        .iter()
        .filter(|c| !c.vars().is_disjoint(&relevant))
        .cloned()
        .collect();
    let dropped = path.len() - sliced.len();
    if dropped > 0 {
        log::trace!("cone of influence dropped {} path constraint(s)", dropped);
    }
    sliced.push(target.clone());
    sliced
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testsynth_sym::constraint::Relation;
    use testsynth_sym::expr::{Expr, Scalar};

    fn v(name: &str) -> Expr {
        Expr::var(name, Scalar::Int(0))
    }

    fn gt0(name: &str) -> Constraint {
        Constraint::new(v(name), Relation::Gt, Expr::int(0))
    }

    #[test]
    fn unrelated_path_constraints_are_dropped() {
        let query = vec![
            gt0("v0"),
            gt0("v1"),
            gt0("v2"),
            Constraint::new(v("v0"), Relation::Eq, v("v1")),
        ];
        let sliced = cone_of_influence(&query);
        assert_eq!(sliced.len(), 3);
        assert_eq!(sliced[0], query[0]);
        assert_eq!(sliced[1], query[1]);
        assert_eq!(sliced[2], query[3]);
    }

    #[test]
    fn relevance_chains_through_shared_variables() {
        // v2 touches the target only via v1.
        let query = vec![
            Constraint::new(v("v2"), Relation::Lt, v("v1")),
            gt0("v3"),
            Constraint::new(v("v1"), Relation::Ge, v("v0")),
            Constraint::new(v("v0"), Relation::Eq, Expr::int(9)),
        ];
        let sliced = cone_of_influence(&query);
        assert_eq!(sliced.len(), 3);
        assert!(!sliced.contains(&query[1]));
    }

    #[test]
    fn target_only_queries_pass_through() {
        let query = vec![gt0("v0")];
        assert_eq!(cone_of_influence(&query), query);
        assert_eq!(cone_of_influence(&[]), Vec::new());
    }
}
