//! Protocol factories: which protocols may execute each variable.
//!
//! A factory enumerates the instances of one protocol family and rules out the ones that
//! cannot implement a binding for syntactic reasons. It may also contribute
//! [SelectionConstraint]s relating the binding to its neighbours. Authority is not
//! checked here; the constraint generator filters viable sets by label.

use conduit_opt::ProtocolFamily;
use itertools::Itertools;
use log::debug;

use std::collections::BTreeSet;

use super::compose::{can_mux, Composer, PortId};
use super::{Protocol, ShareType};
use crate::ir::names::{Binding, FunctionVar, NameAnalysis, Use};
use crate::ir::*;
use crate::select::constraint::{
    and, implies, variable_in, variable_in_set, SelectionConstraint,
};

/// What factories may consult.
pub struct FactoryEnv<'a, 'p> {
    /// Name resolution for the program being compiled
    pub names: &'a NameAnalysis<'p>,
    /// The communication table
    pub composer: &'a Composer,
    /// The whole catalog, for constraints that look at other variables' options
    pub catalog: &'a dyn ProtocolFactory,
}

/// A source of protocol instances.
pub trait ProtocolFactory {
    /// Every instance this factory can produce.
    fn protocols(&self) -> &[Protocol];

    /// Instances that may execute `fv`, bound by `b`.
    fn viable(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> BTreeSet<Protocol> {
        let _ = (fv, b, env);
        self.protocols().iter().cloned().collect()
    }

    /// Extra requirements on `fv` and its neighbours.
    fn constraint(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> SelectionConstraint {
        let _ = (fv, b, env);
        SelectionConstraint::Literal(true)
    }

    /// Extra requirements for an update of the object `object`.
    fn update_constraint(
        &self,
        object: &FunctionVar,
        u: &Update,
        env: &FactoryEnv,
    ) -> SelectionConstraint {
        let _ = (object, u, env);
        SelectionConstraint::Literal(true)
    }

    /// Must the guard of `i` be revealed if it is computed by `p`?
    fn guard_visibility(&self, p: &Protocol, i: &If) -> SelectionConstraint {
        let _ = (p, i);
        SelectionConstraint::Literal(true)
    }
}

fn sorted(hosts: &[Host]) -> Vec<Host> {
    let mut hosts = hosts.to_vec();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Sets of at least two hosts.
fn groups(hosts: &[Host]) -> impl Iterator<Item = Vec<&Host>> + '_ {
    hosts.iter().powerset().filter(|s| s.len() >= 2)
}

/// Cleartext on a single host.
pub struct LocalFactory {
    protocols: Vec<Protocol>,
}

impl LocalFactory {
    /// One instance per host.
    pub fn new(hosts: &[Host]) -> Self {
        LocalFactory {
            protocols: sorted(hosts).iter().map(|h| Protocol::local(h)).collect(),
        }
    }
}

impl ProtocolFactory for LocalFactory {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }
}

/// Cleartext replicated across hosts.
pub struct ReplicationFactory {
    protocols: Vec<Protocol>,
}

impl ReplicationFactory {
    /// One instance per set of at least two hosts.
    pub fn new(hosts: &[Host]) -> Self {
        let hosts = sorted(hosts);
        ReplicationFactory {
            protocols: groups(&hosts)
                .map(|g| Protocol::replication(g.into_iter().map(String::as_str)))
                .collect(),
        }
    }
}

impl ProtocolFactory for ReplicationFactory {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }
}

/// The cleartext protocols that commitments and proofs may exchange values with.
fn cleartext_protocols(hosts: &[Host]) -> Vec<Protocol> {
    let mut ps = LocalFactory::new(hosts).protocols;
    ps.extend(ReplicationFactory::new(hosts).protocols);
    ps
}

/// Two-party MPC in all three sharings.
pub struct AbyFactory {
    protocols: Vec<Protocol>,
}

impl AbyFactory {
    /// One instance per pair of hosts and share type.
    pub fn new(hosts: &[Host]) -> Self {
        let hosts = sorted(hosts);
        let mut protocols = Vec::new();
        for (a, b) in hosts.iter().tuple_combinations() {
            for share in ShareType::ALL {
                protocols.push(Protocol::aby(share, a, b));
            }
        }
        AbyFactory { protocols }
    }

    /// Arithmetic sharing has no circuits for these.
    fn arithmetic_unsupported(op: Operator) -> bool {
        op.is_comparison()
            || op.is_logical()
            || matches!(
                op,
                Operator::Mux | Operator::Max | Operator::Min | Operator::Div
            )
    }

    /// When the vector `object` lives in MPC, the index or length `index` must be readable
    /// in the clear by it.
    fn cleartext_index(
        &self,
        object: &FunctionVar,
        index: &Atomic,
        env: &FactoryEnv,
    ) -> SelectionConstraint {
        let Some(index) = index.read() else {
            return SelectionConstraint::Literal(true);
        };
        let is_vector = env
            .names
            .binding(object)
            .map(|b| b.class() == Some(ObjectClass::Vector))
            .unwrap_or(false);
        if !is_vector {
            return SelectionConstraint::Literal(true);
        }
        let index = FunctionVar::new(&object.function, index);
        let Ok(index_binding) = env.names.binding(&index) else {
            return SelectionConstraint::Literal(true);
        };
        let index_protocols = env.catalog.viable(&index, index_binding, env);
        and(self.protocols.iter().map(|p| {
            let cleartext = index_protocols.iter().filter(|q| {
                env.composer
                    .communicate(q, p)
                    .map(|events| events.iter().all(|e| e.recv.id == PortId::CleartextInput))
                    .unwrap_or(false)
            });
            implies(variable_in(object, p), variable_in_set(&index, cleartext))
        }))
    }
}

impl ProtocolFactory for AbyFactory {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    fn viable(&self, _fv: &FunctionVar, b: Binding, _env: &FactoryEnv) -> BTreeSet<Protocol> {
        let no_arithmetic = match b {
            Binding::Let(Let {
                value: Expr::Op { op, .. },
                ..
            }) => Self::arithmetic_unsupported(*op),
            _ => false,
        };
        self.protocols
            .iter()
            .filter(|p| !(no_arithmetic && p.share() == Some(ShareType::Arithmetic)))
            .cloned()
            .collect()
    }

    fn constraint(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> SelectionConstraint {
        match b {
            Binding::Let(Let {
                value:
                    Expr::Query {
                        object,
                        query: QueryOp::Get,
                        args,
                    },
                ..
            }) => match args.first() {
                Some(i) => self.cleartext_index(&FunctionVar::new(&fv.function, object), i, env),
                None => SelectionConstraint::Literal(true),
            },
            Binding::Decl(d) if d.class == ObjectClass::Vector => match d.args.first() {
                Some(len) => self.cleartext_index(fv, len, env),
                None => SelectionConstraint::Literal(true),
            },
            _ => SelectionConstraint::Literal(true),
        }
    }

    fn update_constraint(
        &self,
        object: &FunctionVar,
        u: &Update,
        env: &FactoryEnv,
    ) -> SelectionConstraint {
        match (u.op, u.args.first()) {
            (UpdateOp::Set, Some(i)) if u.args.len() > 1 => self.cleartext_index(object, i, env),
            _ => SelectionConstraint::Literal(true),
        }
    }

    fn guard_visibility(&self, p: &Protocol, i: &If) -> SelectionConstraint {
        match (p.share(), &i.guard) {
            (Some(ShareType::Arithmetic), _) | (_, Atomic::Literal { .. }) => {
                SelectionConstraint::Literal(true)
            }
            _ => SelectionConstraint::Literal(!can_mux(i)),
        }
    }
}

/// Cleartext on one host, with hash commitments on the others.
pub struct CommitmentFactory {
    protocols: Vec<Protocol>,
    cleartext: Vec<Protocol>,
}

impl CommitmentFactory {
    /// One instance per set of at least two hosts and choice of committer in it.
    pub fn new(hosts: &[Host]) -> Self {
        let hosts = sorted(hosts);
        let mut protocols = Vec::new();
        for g in groups(&hosts) {
            for c in &g {
                protocols.push(Protocol::commitment(
                    c,
                    g.iter().filter(|h| *h != c).map(|h| h.as_str()),
                ));
            }
        }
        CommitmentFactory {
            protocols,
            cleartext: cleartext_protocols(&hosts),
        }
    }

    fn allowed<'s>(&'s self, p: &'s Protocol) -> impl Iterator<Item = &'s Protocol> {
        std::iter::once(p).chain(&self.cleartext)
    }
}

/// Does the expression only move a value around?
fn copies(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Atomic(_) | Expr::Declassify { .. } | Expr::Endorse { .. }
    )
}

/// Lets that query the object `fv`.
fn queriers<'p>(fv: &FunctionVar, names: &NameAnalysis<'p>) -> Vec<&'p Let> {
    names
        .users(fv)
        .iter()
        .filter_map(|u| match u {
            Use::Let(l) if matches!(l.value, Expr::Query { .. }) => Some(*l),
            _ => None,
        })
        .collect()
}

impl ProtocolFactory for CommitmentFactory {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    fn viable(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> BTreeSet<Protocol> {
        let ok = match b {
            Binding::Let(l) => {
                let readers_copy = env.names.readers(fv).iter().all(|u| match u {
                    Use::Let(r) => copies(&r.value),
                    _ => true,
                });
                readers_copy && (copies(&l.value) || matches!(l.value, Expr::Query { .. }))
            }
            Binding::Decl(_) => env.names.updaters(fv).next().is_none(),
            Binding::Param(_) | Binding::OutDecl { .. } => false,
        };
        if ok {
            self.protocols.iter().cloned().collect()
        } else {
            BTreeSet::new()
        }
    }

    fn constraint(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> SelectionConstraint {
        let local = |v: &str| FunctionVar::new(&fv.function, v);
        match b {
            Binding::Let(_) => and(self.protocols.iter().map(|p| {
                let readers = env.names.readers(fv).iter().flat_map(|u| {
                    let decl = match u {
                        Use::Decl(d) => Some(d.name.as_str()),
                        _ => None,
                    };
                    u.reads()
                        .into_iter()
                        .chain(decl)
                        .map(|v| variable_in_set(&local(v), self.allowed(p)))
                        .collect::<Vec<_>>()
                });
                implies(variable_in(fv, p), and(readers))
            })),
            Binding::Decl(_) => and(self.protocols.iter().map(|p| {
                let users = queriers(fv, env.names).into_iter().flat_map(|l| {
                    l.value
                        .reads()
                        .map(|v| variable_in_set(&local(v), self.allowed(p)))
                        .collect::<Vec<_>>()
                });
                implies(variable_in(fv, p), and(users))
            })),
            _ => SelectionConstraint::Literal(true),
        }
    }
}

/// Zero-knowledge proofs from one prover to the other hosts.
pub struct ZkpFactory {
    protocols: Vec<Protocol>,
    cleartext: Vec<Protocol>,
}

impl ZkpFactory {
    /// One instance per set of at least two hosts and choice of prover in it.
    pub fn new(hosts: &[Host]) -> Self {
        let hosts = sorted(hosts);
        let mut protocols = Vec::new();
        for g in groups(&hosts) {
            for prover in &g {
                protocols.push(Protocol::zkp(
                    prover,
                    g.iter().filter(|h| *h != prover).map(|h| h.as_str()),
                ));
            }
        }
        ZkpFactory {
            protocols,
            cleartext: cleartext_protocols(&hosts),
        }
    }

    /// Operators with a constraint-system encoding.
    fn supported(op: Operator) -> bool {
        use Operator::*;
        matches!(op, And | Not | Or | Mul | Add | Mux | Eq | Lt | Le)
    }
}

impl ProtocolFactory for ZkpFactory {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    fn viable(&self, _fv: &FunctionVar, b: Binding, _env: &FactoryEnv) -> BTreeSet<Protocol> {
        match b {
            Binding::Let(Let {
                value: Expr::Op { op, .. },
                ..
            }) if !Self::supported(*op) => BTreeSet::new(),
            _ => self.protocols.iter().cloned().collect(),
        }
    }

    fn constraint(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> SelectionConstraint {
        let local = |v: &str| FunctionVar::new(&fv.function, v);
        let (reads, sends): (Vec<&str>, Vec<&str>) = match b {
            Binding::Let(l) => (
                l.value.reads().collect(),
                env.names.readers(fv).iter().filter_map(Use::created).collect(),
            ),
            Binding::Decl(d) => (
                d.args.iter().filter_map(Atomic::read).collect(),
                queriers(fv, env.names).into_iter().map(|l| l.name.as_str()).collect(),
            ),
            _ => return SelectionConstraint::Literal(true),
        };
        and(self.protocols.iter().map(|p| {
            let allowed = || std::iter::once(p).chain(&self.cleartext);
            let neighbours = reads
                .iter()
                .chain(&sends)
                .map(|v| variable_in_set(&local(v), allowed()));
            implies(variable_in(fv, p), and(neighbours))
        }))
    }

    fn guard_visibility(&self, _p: &Protocol, i: &If) -> SelectionConstraint {
        match i.guard {
            Atomic::Read(_) => SelectionConstraint::Literal(!can_mux(i)),
            Atomic::Literal { .. } => SelectionConstraint::Literal(true),
        }
    }
}

/// The union of several factories, less any excluded instances.
pub struct Catalog {
    factories: Vec<Box<dyn ProtocolFactory>>,
    protocols: Vec<Protocol>,
    excluded: BTreeSet<Protocol>,
}

impl Catalog {
    /// Combine factories.
    pub fn new(factories: Vec<Box<dyn ProtocolFactory>>) -> Self {
        let protocols = factories
            .iter()
            .flat_map(|f| f.protocols().iter().cloned())
            .collect();
        Catalog {
            factories,
            protocols,
            excluded: BTreeSet::new(),
        }
    }

    /// The factories for `families` over `hosts`.
    pub fn for_families(families: &[ProtocolFamily], hosts: &[Host]) -> Self {
        let all = families.contains(&ProtocolFamily::All);
        let wants = |f: ProtocolFamily| all || families.contains(&f);
        let mut factories: Vec<Box<dyn ProtocolFactory>> = Vec::new();
        if wants(ProtocolFamily::Local) {
            factories.push(Box::new(LocalFactory::new(hosts)));
        }
        if wants(ProtocolFamily::Replication) {
            factories.push(Box::new(ReplicationFactory::new(hosts)));
        }
        if wants(ProtocolFamily::Aby) {
            factories.push(Box::new(AbyFactory::new(hosts)));
        }
        if wants(ProtocolFamily::Commitment) {
            factories.push(Box::new(CommitmentFactory::new(hosts)));
        }
        if wants(ProtocolFamily::Zkp) {
            factories.push(Box::new(ZkpFactory::new(hosts)));
        }
        let c = Catalog::new(factories);
        debug!("catalog has {} protocol instances", c.protocols.len());
        c
    }

    /// Remove one instance.
    pub fn exclude(mut self, p: Protocol) -> Self {
        self.protocols.retain(|q| q != &p);
        self.excluded.insert(p);
        self
    }
}

impl ProtocolFactory for Catalog {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    fn viable(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> BTreeSet<Protocol> {
        self.factories
            .iter()
            .flat_map(|f| f.viable(fv, b, env))
            .filter(|p| !self.excluded.contains(p))
            .collect()
    }

    fn constraint(&self, fv: &FunctionVar, b: Binding, env: &FactoryEnv) -> SelectionConstraint {
        and(self.factories.iter().map(|f| f.constraint(fv, b, env)))
    }

    fn update_constraint(
        &self,
        object: &FunctionVar,
        u: &Update,
        env: &FactoryEnv,
    ) -> SelectionConstraint {
        and(self.factories.iter().map(|f| f.update_constraint(object, u, env)))
    }

    fn guard_visibility(&self, p: &Protocol, i: &If) -> SelectionConstraint {
        self.factories
            .iter()
            .find(|f| f.protocols().contains(p))
            .map(|f| f.guard_visibility(p, i))
            .unwrap_or(SelectionConstraint::Literal(true))
    }
}
