// SPDX-License-Identifier: Apache-2.0

//! The constant seed pool: primitive values observed anywhere in the search
//! (seed corpus, previous tests, embedder hints), resampled by primitive
//! mutation instead of a blind perturbation. Owned and reset by the search
//! loop, never process-global.

use rand::seq::SliceRandom;
use rand::Rng;

use testsynth_tc::test::{StatementKind, TestCase};
use testsynth_tc::types::Type;
use testsynth_tc::value::PrimitiveValue;

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    ints: Vec<i64>,
    floats: Vec<f64>,
    chars: Vec<char>,
    strings: Vec<String>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Pool pre-seeded with the boundary values that show up in real code.
    pub fn with_defaults() -> ConstantPool {
        ConstantPool {
            ints: vec![0, 1, -1, 2, 10, 100, i32::MAX as i64, i32::MIN as i64],
            floats: vec![0.0, 1.0, -1.0, 0.5, 3.5],
            chars: vec!['a', 'A', '0', ' '],
            strings: vec![String::new(), "a".to_string(), "hello".to_string()],
        }
    }

    pub fn reset(&mut self) {
        *self = ConstantPool::default();
    }

    pub fn len(&self) -> usize {
        self.ints.len() + self.floats.len() + self.chars.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn observe(&mut self, value: &PrimitiveValue) {
        match value {
            PrimitiveValue::Int(_, v) => {
                if !self.ints.contains(v) {
                    self.ints.push(*v);
                }
            }
            PrimitiveValue::Float(_, v) => {
                if !self.floats.contains(v) {
                    self.floats.push(*v);
                }
            }
            PrimitiveValue::Char(c) => {
                if !self.chars.contains(c) {
                    self.chars.push(*c);
                }
            }
            PrimitiveValue::Str(s) => {
                if !self.strings.contains(s) {
                    self.strings.push(s.clone());
                }
            }
            // Bools and enum ordinals carry no information worth pooling.
            PrimitiveValue::Bool(_) | PrimitiveValue::Enum(..) => {}
        }
    }

    /// Feeds every primitive literal of `test` into the pool.
    pub fn observe_test(&mut self, test: &TestCase) {
        for s in test.statements() {
            if let StatementKind::Primitive(v) = &s.kind {
                self.observe(v);
            }
        }
    }

    /// A pooled value of type `ty`, if the pool has one. Enum and bool
    /// sampling is left to the mutator since the pool holds nothing for
    /// them.
    pub fn sample(&self, ty: &Type, rng: &mut impl Rng) -> Option<PrimitiveValue> {
        match ty {
            Type::Int(k) => self
                .ints
                .choose(rng)
                .map(|v| PrimitiveValue::Int(*k, k.clamp(*v))),
            Type::Float(k) => self
                .floats
                .choose(rng)
                .map(|v| PrimitiveValue::Float(*k, k.narrow(*v))),
            Type::Char => self.chars.choose(rng).map(|c| PrimitiveValue::Char(*c)),
            Type::Str => self
                .strings
                .choose(rng)
                .map(|s| PrimitiveValue::Str(s.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use testsynth_tc::test::Statement;
    use testsynth_tc::types::IntKind;

    #[test]
    fn observe_dedups_and_sample_respects_kind() {
        let mut pool = ConstantPool::new();
        pool.observe(&PrimitiveValue::Int(IntKind::I64, 1 << 40));
        pool.observe(&PrimitiveValue::Int(IntKind::I64, 1 << 40));
        assert_eq!(pool.len(), 1);
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        // Sampling at i8 saturates the pooled wide value into range.
        let got = pool.sample(&Type::Int(IntKind::I8), &mut rng).unwrap();
        assert_eq!(got, PrimitiveValue::Int(IntKind::I8, 127));
    }

    #[test]
    fn observe_test_collects_literals() {
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I64, 42)));
        t.push_statement(Statement::primitive(PrimitiveValue::Str("seed".into())));
        let mut pool = ConstantPool::new();
        pool.observe_test(&t);
        assert_eq!(pool.len(), 2);
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        assert_eq!(
            pool.sample(&Type::Str, &mut rng),
            Some(PrimitiveValue::Str("seed".into()))
        );
    }

    #[test]
    fn empty_pool_samples_nothing() {
        let pool = ConstantPool::new();
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        assert_eq!(pool.sample(&Type::Int(IntKind::I32), &mut rng), None);
        assert!(pool.is_empty());
    }
}
