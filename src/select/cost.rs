//! Cost model: feature vectors, symbolic costs, and the estimator.
//!
//! Costs are vectors over four features. The optimizer minimizes their weighted sum, with
//! weights chosen by [CostMode]. ABY operator and conversion costs are microbenchmark
//! estimates, scaled to integers.

use conduit_opt::CostMode;
use fxhash::FxHashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

use std::fmt::{self, Display, Formatter};
use std::ops::Add;

use super::constraint::SelectionConstraint;
use super::Assignment;
use crate::ctx::InternalError;
use crate::ir::Operator;
use crate::protocol::compose::{Composer, PortId};
use crate::protocol::{Protocol, ShareType};

/// A cost feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    /// Messages between hosts
    Messages,
    /// Local work
    Execution,
    /// MPC work on a fast network
    Lan,
    /// MPC work on a slow network
    Wan,
}

impl Feature {
    /// All four.
    pub const ALL: [Feature; 4] = [Feature::Messages, Feature::Execution, Feature::Lan, Feature::Wan];
}

/// One value per [Feature].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub struct Cost<T> {
    /// [Feature::Messages]
    pub messages: T,
    /// [Feature::Execution]
    pub execution: T,
    /// [Feature::Lan]
    pub lan: T,
    /// [Feature::Wan]
    pub wan: T,
}

impl<T> Cost<T> {
    /// Build from a function of the feature.
    pub fn from_fn(mut f: impl FnMut(Feature) -> T) -> Self {
        Cost {
            messages: f(Feature::Messages),
            execution: f(Feature::Execution),
            lan: f(Feature::Lan),
            wan: f(Feature::Wan),
        }
    }
    /// The value for one feature.
    pub fn get(&self, f: Feature) -> &T {
        match f {
            Feature::Messages => &self.messages,
            Feature::Execution => &self.execution,
            Feature::Lan => &self.lan,
            Feature::Wan => &self.wan,
        }
    }
    /// Apply `f` to each feature.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Cost<U> {
        Cost {
            messages: f(self.messages),
            execution: f(self.execution),
            lan: f(self.lan),
            wan: f(self.wan),
        }
    }
    /// Combine two costs feature by feature.
    pub fn zip<U, V>(self, other: Cost<U>, mut f: impl FnMut(T, U) -> V) -> Cost<V> {
        Cost {
            messages: f(self.messages, other.messages),
            execution: f(self.execution, other.execution),
            lan: f(self.lan, other.lan),
            wan: f(self.wan, other.wan),
        }
    }
}

impl Cost<i64> {
    /// All zero.
    pub fn zero() -> Self {
        Cost::default()
    }
    /// The weighted sum of the features.
    pub fn weighted(&self, weights: &Cost<i64>) -> i64 {
        Feature::ALL
            .iter()
            .map(|f| self.get(*f) * weights.get(*f))
            .sum()
    }
    /// Feature-wise maximum.
    pub fn max(self, other: Cost<i64>) -> Self {
        self.zip(other, i64::max)
    }
    fn execution(n: i64) -> Self {
        Cost {
            execution: n,
            ..Cost::zero()
        }
    }
    fn network(lan: i64, wan: i64) -> Self {
        Cost {
            lan,
            wan,
            ..Cost::zero()
        }
    }
}

impl Add for Cost<i64> {
    type Output = Cost<i64>;
    fn add(self, other: Cost<i64>) -> Cost<i64> {
        self.zip(other, |a, b| a + b)
    }
}

impl Display for Cost<i64> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{{messages: {}, execution: {}, lan: {}, wan: {}}}",
            self.messages, self.execution, self.lan, self.wan
        )
    }
}

/// A cost that depends on the protocol assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolicCost {
    /// A fixed cost
    Literal(Cost<i64>),
    /// Sum
    Sum(Vec<SymbolicCost>),
    /// Multiplication by a constant
    Scale(i64, Box<SymbolicCost>),
    /// Feature-wise maximum
    Max(Box<SymbolicCost>, Box<SymbolicCost>),
    /// The cost of whichever alternative's condition holds; zero if none does.
    /// The conditions are mutually exclusive.
    Choice(Vec<(SelectionConstraint, Cost<i64>)>),
}

impl SymbolicCost {
    /// Zero.
    pub fn zero() -> Self {
        SymbolicCost::Literal(Cost::zero())
    }

    /// Sum, dropping zeros.
    pub fn sum(costs: impl IntoIterator<Item = SymbolicCost>) -> Self {
        let mut terms: Vec<SymbolicCost> = costs
            .into_iter()
            .filter(|c| c != &SymbolicCost::zero())
            .collect();
        match terms.len() {
            0 => SymbolicCost::zero(),
            1 => terms.pop().unwrap_or_else(SymbolicCost::zero),
            _ => SymbolicCost::Sum(terms),
        }
    }

    /// Evaluate under a complete assignment.
    pub fn eval(&self, a: &Assignment) -> Result<Cost<i64>, InternalError> {
        Ok(match self {
            SymbolicCost::Literal(c) => *c,
            SymbolicCost::Sum(cs) => {
                let mut acc = Cost::zero();
                for c in cs {
                    acc = acc + c.eval(a)?;
                }
                acc
            }
            SymbolicCost::Scale(k, c) => c.eval(a)?.map(|x| k * x),
            SymbolicCost::Max(x, y) => x.eval(a)?.max(y.eval(a)?),
            SymbolicCost::Choice(alts) => {
                let mut acc = Cost::zero();
                for (cond, c) in alts {
                    if cond.eval(a)? {
                        acc = acc + *c;
                    }
                }
                acc
            }
        })
    }
}

impl Default for SymbolicCost {
    fn default() -> Self {
        SymbolicCost::zero()
    }
}

/// Cost of `op` in each ABY sharing, as (lan, wan).
static ABY_OPERATORS: Lazy<FxHashMap<(Operator, ShareType), (i64, i64)>> = Lazy::new(|| {
    use Operator::*;
    use ShareType::*;
    let table: &[(Operator, ShareType, i64, i64)] = &[
        (Add, Arithmetic, 4, 5),
        (Add, Boolean, 24, 31),
        (Add, Yao, 17, 15),
        (Sub, Arithmetic, 5, 5),
        (Sub, Boolean, 60, 92),
        (Sub, Yao, 16, 15),
        (Neg, Arithmetic, 5, 5),
        (Neg, Boolean, 60, 92),
        (Neg, Yao, 16, 15),
        (Mul, Arithmetic, 17, 15),
        (Mul, Boolean, 80, 102),
        (Mul, Yao, 46, 15),
        (Div, Boolean, 378, 552),
        (Div, Yao, 130, 17),
        (And, Boolean, 20, 15),
        (And, Yao, 22, 15),
        // not (and (not a) (not b))
        (Or, Boolean, 20 + 3 * 5, 15 + 3 * 5),
        (Or, Yao, 22 + 3 * 6, 15 + 3 * 5),
        (Not, Boolean, 5, 5),
        (Not, Yao, 6, 5),
        (Eq, Boolean, 25, 26),
        (Eq, Yao, 18, 15),
        (Lt, Boolean, 26, 26),
        (Lt, Yao, 18, 15),
        (Gt, Boolean, 26, 26),
        (Gt, Yao, 18, 15),
        // gt, or, eq
        (Le, Boolean, 26 + 25 + 20 + 3 * 5, 26 + 26 + 15 + 3 * 5),
        (Le, Yao, 18 + 18 + 22 + 3 * 6, 15 + 15 + 15 + 3 * 5),
        (Ge, Boolean, 26 + 25 + 20 + 3 * 5, 26 + 26 + 15 + 3 * 5),
        (Ge, Yao, 18 + 18 + 22 + 3 * 6, 15 + 15 + 15 + 3 * 5),
        (Mux, Boolean, 14, 10),
        (Mux, Yao, 9, 10),
        (Min, Boolean, 35, 36),
        (Min, Yao, 19, 15),
        (Max, Boolean, 34, 36),
        (Max, Yao, 18, 15),
    ];
    table.iter().map(|(o, s, l, w)| ((*o, *s), (*l, *w))).collect()
});

/// Cost of converting shares, as (lan, wan).
fn conversion(from: ShareType, to: ShareType) -> (i64, i64) {
    use ShareType::*;
    match (from, to) {
        (Arithmetic, Boolean) => (19, 15),
        (Arithmetic, Yao) => (18, 15),
        (Boolean, Arithmetic) => (15, 15),
        (Boolean, Yao) => (16, 15),
        (Yao, Arithmetic) => (15, 15),
        (Yao, Boolean) => (5, 5),
        _ => (0, 0),
    }
}

/// Charged when a value leaves MPC.
const MPC_EXECUTION: i64 = 10;

/// Estimates execution and communication costs.
#[derive(Clone, Copy, Debug, Default)]
pub struct CostEstimator {
    composer: Composer,
}

impl CostEstimator {
    /// An estimator using `composer`'s communication table.
    pub fn new(composer: Composer) -> Self {
        CostEstimator { composer }
    }

    /// Cost of `protocol` computing a value; `op` is the operator applied, if any.
    pub fn execution_cost(
        &self,
        op: Option<Operator>,
        protocol: &Protocol,
    ) -> Result<Cost<i64>, InternalError> {
        let base = match protocol {
            Protocol::Local { .. } => 1,
            Protocol::Replication { hosts } => hosts.len() as i64,
            Protocol::Commitment { hashes, .. } => 20 + hashes.len() as i64,
            Protocol::Zkp { verifiers, .. } => 50 + verifiers.len() as i64,
            Protocol::Aby { .. } => 100,
        };
        let op_cost = match (op, protocol.share()) {
            (Some(op), Some(share)) => {
                let (lan, wan) = ABY_OPERATORS.get(&(op, share)).copied().ok_or_else(|| {
                    InternalError::MissingCost(format!("{op:?} in {}", protocol.name()))
                })?;
                Cost::network(lan, wan)
            }
            _ => Cost::zero(),
        };
        Ok(Cost::execution(base) + op_cost)
    }

    /// Cost of moving a value from `src` to `dst`. Zero within a protocol.
    pub fn communication_cost(&self, src: &Protocol, dst: &Protocol) -> Cost<i64> {
        if src == dst {
            return Cost::zero();
        }
        let Some(events) = self.composer.communicate(src, dst) else {
            return Cost::zero();
        };
        let events: Vec<_> = events
            .into_iter()
            .filter(|e| !(e.send.id == PortId::InternalOutput && e.recv.id == PortId::InternalInput))
            .collect();
        let mut messages = events
            .iter()
            .filter(|e| e.is_remote() && !e.send.protocol.is_aby())
            .count() as i64;
        if events.iter().any(|e| {
            e.send.protocol.is_aby() && e.send.id != PortId::InternalOutput && !e.recv.protocol.is_aby()
        }) {
            messages += MPC_EXECUTION;
        }
        let mut cost = Cost {
            messages,
            ..Cost::zero()
        };
        let mut converted = Vec::new();
        for e in &events {
            if let PortId::ConversionOutput(s, t) = e.send.id {
                if !converted.contains(&(s, t)) {
                    converted.push((s, t));
                    let (lan, wan) = conversion(s, t);
                    cost = cost + Cost::network(lan, wan);
                }
            }
        }
        cost
    }

    /// How much each feature counts.
    pub fn weights(mode: CostMode) -> Cost<i64> {
        match mode {
            CostMode::Lan => Cost {
                messages: 3,
                execution: 1,
                lan: 1,
                wan: 0,
            },
            CostMode::Wan => Cost {
                messages: 5,
                execution: 1,
                lan: 0,
                wan: 1,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const E: CostEstimator = CostEstimator {
        composer: Composer,
    };

    #[test]
    fn base_execution() {
        let c = E.execution_cost(None, &Protocol::local("a")).unwrap();
        assert_eq!(c, Cost::execution(1));
        let c = E
            .execution_cost(None, &Protocol::replication(["a", "b", "c"]))
            .unwrap();
        assert_eq!(c.execution, 3);
        let c = E
            .execution_cost(None, &Protocol::zkp("a", ["b"]))
            .unwrap();
        assert_eq!(c.execution, 51);
    }

    #[test]
    fn aby_operators() {
        let yao = Protocol::aby(ShareType::Yao, "a", "b");
        let c = E.execution_cost(Some(Operator::Add), &yao).unwrap();
        assert_eq!(c, Cost { messages: 0, execution: 100, lan: 17, wan: 15 });
        let arith = Protocol::aby(ShareType::Arithmetic, "a", "b");
        assert!(matches!(
            E.execution_cost(Some(Operator::Lt), &arith),
            Err(InternalError::MissingCost(_))
        ));
    }

    #[test]
    fn remote_messages() {
        let c = E.communication_cost(&Protocol::local("a"), &Protocol::replication(["a", "b"]));
        assert_eq!(c.messages, 1);
        let p = Protocol::local("a");
        assert_eq!(E.communication_cost(&p, &p), Cost::zero());
    }

    #[test]
    fn leaving_mpc() {
        let yao = Protocol::aby(ShareType::Yao, "a", "b");
        let c = E.communication_cost(&yao, &Protocol::local("a"));
        assert_eq!(c.messages, MPC_EXECUTION);
        let bool_ = Protocol::aby(ShareType::Boolean, "a", "b");
        let c = E.communication_cost(&yao, &bool_);
        assert_eq!((c.messages, c.lan, c.wan), (0, 5, 5));
    }

    #[test]
    fn weighted_sum() {
        let c = Cost {
            messages: 2,
            execution: 10,
            lan: 4,
            wan: 7,
        };
        assert_eq!(c.weighted(&CostEstimator::weights(CostMode::Lan)), 6 + 10 + 4);
        assert_eq!(c.weighted(&CostEstimator::weights(CostMode::Wan)), 10 + 10 + 7);
    }

    #[test]
    fn symbolic_max_is_per_feature() {
        let a = SymbolicCost::Literal(Cost {
            messages: 5,
            ..Cost::zero()
        });
        let b = SymbolicCost::Literal(Cost {
            execution: 3,
            ..Cost::zero()
        });
        let m = SymbolicCost::Max(Box::new(a), Box::new(b));
        let c = m.eval(&Assignment::default()).unwrap();
        assert_eq!((c.messages, c.execution), (5, 3));
    }
}
