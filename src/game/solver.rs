//! Reachability Solver
//!
//! Decides whether a small multiset of numbers can be combined with binary
//! arithmetic into 24. Exhaustive search over every unordered pair and every
//! operator; at four numbers the whole tree is a few thousand leaves, so no
//! memoization.

use crate::game::state::{EPSILON, TARGET};

/// Binary operators a move may apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// a + b
    Add,
    /// a - b
    Sub,
    /// a × b
    Mul,
    /// a ÷ b
    Div,
    /// a ^ b
    Pow,
}

impl Operator {
    /// Apply to an ordered pair. `None` for near-zero divisors and
    /// non-finite results.
    pub fn apply(self, a: f64, b: f64) -> Option<f64> {
        let v = match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => {
                if b.abs() <= EPSILON {
                    return None;
                }
                a / b
            }
            Operator::Pow => a.powf(b),
        };
        v.is_finite().then_some(v)
    }
}

/// 24-reachability search.
#[derive(Clone, Copy, Debug)]
pub struct Solver {
    target: f64,
    allow_power: bool,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            target: TARGET,
            allow_power: false,
        }
    }
}

impl Solver {
    /// Solver for 24 with the four basic operators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also allow exponentiation (a^b and b^a).
    pub fn with_power(mut self) -> Self {
        self.allow_power = true;
        self
    }

    /// Whether exponentiation is part of the search.
    pub fn allows_power(&self) -> bool {
        self.allow_power
    }

    /// Operators this solver tries, in both argument orders.
    pub fn operators(&self) -> &'static [Operator] {
        if self.allow_power {
            &[Operator::Add, Operator::Sub, Operator::Mul, Operator::Div, Operator::Pow]
        } else {
            &[Operator::Add, Operator::Sub, Operator::Mul, Operator::Div]
        }
    }

    /// Every value combining `a` and `b` can produce.
    pub fn candidates(&self, a: f64, b: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(10);
        for op in self.operators() {
            out.extend(op.apply(a, b));
            // a+b and a*b are symmetric
            if !matches!(op, Operator::Add | Operator::Mul) {
                out.extend(op.apply(b, a));
            }
        }
        out
    }

    /// True iff `values` can be reduced to the target.
    pub fn is_solvable(&self, values: &[f64]) -> bool {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return false;
        }
        self.search(values)
    }

    fn search(&self, nums: &[f64]) -> bool {
        if nums.len() == 1 {
            return (nums[0] - self.target).abs() < EPSILON;
        }

        for i in 0..nums.len() {
            for j in (i + 1)..nums.len() {
                let a = nums[i];
                let b = nums[j];

                let mut rest: Vec<f64> = nums
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != i && *k != j)
                    .map(|(_, v)| *v)
                    .collect();

                for v in self.candidates(a, b) {
                    rest.push(v);
                    if self.search(&rest) {
                        return true;
                    }
                    rest.pop();
                }
            }
        }
        false
    }
}

/// Convenience: can these integer card values reach 24 with + − × ÷?
pub fn can_make_24(values: &[u8]) -> bool {
    let nums: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
    Solver::new().is_solvable(&nums)
}

// =============================================================================
// TESTS
// =============================================================================
