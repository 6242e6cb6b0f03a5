// SPDX-License-Identifier: Apache-2.0

//! The fitness seam between the search operators and whatever criterion the
//! embedder optimizes. Operators only ever ask the two questions below; the
//! score itself (typically a harness run plus a branch-distance readout)
//! stays on the embedder's side of the trait.

use testsynth_tc::test::TestCase;

pub trait FitnessObjective {
    /// Whether `test` is strictly better than the best seen so far. An
    /// improvement becomes the new baseline.
    fn has_improved(&mut self, test: &TestCase) -> bool;

    /// Whether `test` is at least as good as the best seen so far. A tie
    /// keeps (and refreshes) the baseline.
    fn has_not_worsened(&mut self, test: &TestCase) -> bool;
}

/// Adapter turning an external scoring function (lower is better) into a
/// `FitnessObjective` that tracks the best score seen.
pub struct MinimizingObjective<F> {
    score: F,
    best: f64,
    evaluations: u64,
}

impl<F: FnMut(&TestCase) -> f64> MinimizingObjective<F> {
    pub fn new(score: F) -> MinimizingObjective<F> {
        MinimizingObjective {
            score,
            best: f64::INFINITY,
            evaluations: 0,
        }
    }

    /// Scores `test` and folds the result into the baseline without an
    /// improved/worsened verdict; used to seed the baseline.
    pub fn observe(&mut self, test: &TestCase) -> f64 {
        let s = self.eval(test);
        if s < self.best {
            self.best = s;
        }
        s
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn eval(&mut self, test: &TestCase) -> f64 {
        self.evaluations += 1;
        (self.score)(test)
    }
}

impl<F: FnMut(&TestCase) -> f64> FitnessObjective for MinimizingObjective<F> {
    fn has_improved(&mut self, test: &TestCase) -> bool {
        let s = self.eval(test);
        if s < self.best {
            log::debug!("fitness improved {} -> {}", self.best, s);
            self.best = s;
            true
        } else {
            false
        }
    }

    fn has_not_worsened(&mut self, test: &TestCase) -> bool {
        let s = self.eval(test);
        if s <= self.best {
            self.best = s;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_moves_the_baseline() {
        // Score = number of statements, so shorter is better.
        let mut obj = MinimizingObjective::new(|t: &TestCase| t.len() as f64);
        let mut t = TestCase::new();
        t.push_statement(testsynth_tc::test::Statement::primitive(
            testsynth_tc::value::PrimitiveValue::Bool(true),
        ));
        assert!(obj.has_improved(&t));
        // Same length again: not an improvement, but not a regression.
        assert!(!obj.has_improved(&t));
        assert!(obj.has_not_worsened(&t));
        let empty = TestCase::new();
        assert!(obj.has_improved(&empty));
        assert!(!obj.has_not_worsened(&t));
        assert_eq!(obj.best(), 0.0);
        assert_eq!(obj.evaluations(), 5);
    }
}
