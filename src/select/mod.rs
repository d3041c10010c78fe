//! Protocol selection: assign every function variable a protocol at minimum cost.
//!
//! Selection runs in three steps:
//! 1. [gen] turns the labelled program and the catalog into a [gen::Problem]: viable sets,
//!    [constraint::SelectionConstraint]s, and a [cost::SymbolicCost] objective.
//! 2. [ilp] encodes the problem as a 0-1 integer program and solves it.
//! 3. [validate] re-checks the solution against the labels and constraints.

pub mod constraint;
pub mod cost;
pub mod gen;
pub mod ilp;
pub mod validate;

use log::info;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::cfg::ConduitCfg;
use crate::ctx::InternalError;
use crate::ifc::InformationFlow;
use crate::ir::names::{FunctionVar, NameAnalysis};
use crate::ir::{Host, NodeId, ProgramError};
use crate::protocol::compose::Composer;
use crate::protocol::factory::ProtocolFactory;
use crate::protocol::Protocol;
use crate::security::HostTrustConfig;
use cost::{Cost, CostEstimator};

/// Why no assignment was produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No protocol can hold {variable}, labelled {label}")]
    /// Every protocol in the catalog is too weak, or none applies syntactically
    NoApplicableProtocol {
        /// The variable
        variable: FunctionVar,
        /// Its label
        label: String,
    },
    #[error("{protocol} cannot hold {variable}, labelled {label}")]
    /// A protocol annotation names a protocol too weak for the label
    InvalidProtocolAnnotation {
        /// The variable
        variable: FunctionVar,
        /// The annotation
        protocol: Protocol,
        /// Its label
        label: String,
    },
    #[error("No protocol assignment satisfies the selection constraints")]
    /// The constraints are unsatisfiable
    NoSelectionSolution,
    #[error("Protocol selection gave up after {0:?}")]
    /// The optimizer ran out of time, or was cancelled
    SelectionTimedOut(Duration),
    #[error(transparent)]
    /// The program is malformed
    Program(#[from] ProgramError),
    #[error(transparent)]
    /// Selection itself went wrong
    Internal(#[from] InternalError),
}

/// Result of protocol selection.
pub type Result<T> = std::result::Result<T, SelectionError>;

/// A solution: protocols, guard visibility and host participation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
    /// The protocol of every function variable
    pub protocols: BTreeMap<FunctionVar, Protocol>,
    /// Whether each conditional's guard is revealed
    pub guards: BTreeMap<NodeId, bool>,
    /// Which hosts take part in which statements
    pub participants: BTreeSet<(NodeId, Host)>,
}

impl Assignment {
    /// The protocol of `fv`.
    pub fn protocol(&self, fv: &FunctionVar) -> std::result::Result<&Protocol, InternalError> {
        self.protocols
            .get(fv)
            .ok_or_else(|| InternalError::UnmappedVariable(fv.clone()))
    }
    /// Does `host` take part in the statement `id`?
    pub fn participates(&self, id: NodeId, host: &str) -> bool {
        self.participants.contains(&(id, host.to_owned()))
    }
    /// Is the guard of the conditional `id` revealed?
    pub fn guard_visible(&self, id: NodeId) -> bool {
        self.guards.get(&id).copied().unwrap_or(false)
    }
}

/// An assignment with its cost.
#[derive(Clone, Debug)]
pub struct Selection {
    /// The assignment
    pub assignment: Assignment,
    /// Evaluated cost of each statement that has one
    pub node_costs: BTreeMap<NodeId, Cost<i64>>,
    /// Evaluated cost of the whole program
    pub total: Cost<i64>,
    /// The weighted total that was minimized
    pub objective: i64,
}

/// Select protocols for the program `names` was built from.
pub fn select(
    names: &NameAnalysis,
    trust: &HostTrustConfig,
    ifc: &InformationFlow,
    catalog: &dyn ProtocolFactory,
    cfg: &ConduitCfg,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Selection> {
    let composer = Composer;
    let estimator = CostEstimator::new(composer);
    let problem = gen::generate(names, trust, ifc, catalog, &composer, &estimator)?;
    info!(
        "selection problem: {} variables, {} constraints",
        problem.domains.len(),
        problem.constraints.len()
    );
    let weights = cfg.weights();
    let assignment = ilp::solve(&problem, &weights, cfg.timeout(), cancel)?;
    if cfg.selection.validate {
        validate::validate(names, trust, ifc, catalog, &problem, &assignment)?;
    }
    let mut node_costs = BTreeMap::new();
    for (id, c) in &problem.node_costs {
        node_costs.insert(*id, c.eval(&assignment)?);
    }
    let total = problem.cost.eval(&assignment)?;
    let objective = total.weighted(&weights);
    info!("selected protocols with cost {total} (weighted {objective})");
    Ok(Selection {
        assignment,
        node_costs,
        total,
        objective,
    })
}
