// SPDX-License-Identifier: Apache-2.0

//! Variable assignments, as produced by a solver or perturbed during search.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Scalar;

/// Maps symbolic variable names to scalar values. Iteration order is the
/// lexicographic order of the names, which keeps downstream consumers
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    bindings: BTreeMap<String, Scalar>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Scalar) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Scalar> {
        self.bindings.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Keeps only the bindings whose names satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.bindings.retain(|name, _| keep(name));
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_orders_by_name() {
        let mut m = Model::new();
        m.bind("v2", Scalar::Str("ab".to_string()));
        m.bind("v0", Scalar::Int(-3));
        assert_eq!(m.to_string(), "{v0: -3, v2: \"ab\"}");
    }

    #[test]
    fn retain_drops_unwanted_bindings() {
        let mut m = Model::new();
        m.bind("v0", Scalar::Int(1));
        m.bind("v1", Scalar::Int(2));
        m.retain(|name| name == "v1");
        assert!(!m.contains("v0"));
        assert_eq!(m.get("v1"), Some(&Scalar::Int(2)));
    }
}
