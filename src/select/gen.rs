//! Selection constraint generation.
//!
//! One pass over every function emits, per binding, the protocols it may use and how it
//! must agree with its neighbours; per statement, which hosts take part; and for the
//! whole program, a [SymbolicCost] over the choices made.

use im::OrdMap;
use log::debug;

use std::collections::{BTreeMap, BTreeSet};

use super::constraint::{
    and, iff, implies, not, or, variable_in, SelectionConstraint, SelectionConstraint::*,
};
use super::cost::{Cost, CostEstimator, SymbolicCost};
use super::{Result, SelectionError};
use crate::ctx::InternalError;
use crate::ifc::InformationFlow;
use crate::ir::names::{Binding, FunctionVar, NameAnalysis};
use crate::ir::*;
use crate::protocol::compose::Composer;
use crate::protocol::factory::{FactoryEnv, ProtocolFactory};
use crate::protocol::{Protocol, SpecializedProtocol};
use crate::security::HostTrustConfig;

/// Everything the optimizer needs.
#[derive(Clone, Debug, Default)]
pub struct Problem {
    /// The viable protocols of every function variable
    pub domains: BTreeMap<FunctionVar, BTreeSet<Protocol>>,
    /// Constraints every solution satisfies
    pub constraints: Vec<SelectionConstraint>,
    /// Conditionals whose guard visibility is decided
    pub guards: Vec<NodeId>,
    /// The cost of the whole program
    pub cost: SymbolicCost,
    /// The cost of each simple statement
    pub node_costs: Vec<(NodeId, SymbolicCost)>,
}

/// Build the selection problem for the program behind `names`.
pub fn generate(
    names: &NameAnalysis,
    trust: &HostTrustConfig,
    ifc: &InformationFlow,
    catalog: &dyn ProtocolFactory,
    composer: &Composer,
    estimator: &CostEstimator,
) -> Result<Problem> {
    let mut g = Generator {
        names,
        trust,
        ifc,
        catalog,
        composer,
        estimator,
        function: String::new(),
        problem: Problem::default(),
    };
    let mut costs = Vec::new();
    for f in &names.program().functions {
        g.function = f.name.clone();
        for p in &f.params {
            let fv = g.fv(&p.name);
            g.declare(&fv, Binding::Param(p))?;
        }
        costs.push(g.block(&f.body)?);
    }
    g.problem.cost = SymbolicCost::sum(costs);
    Ok(g.problem)
}

/// Viable protocols of `fv`: the catalog's candidates whose authority dominates its label.
pub fn viable_protocols(
    names: &NameAnalysis,
    trust: &HostTrustConfig,
    ifc: &InformationFlow,
    catalog: &dyn ProtocolFactory,
    fv: &FunctionVar,
) -> Result<BTreeSet<Protocol>> {
    let composer = Composer;
    let env = FactoryEnv {
        names,
        composer: &composer,
        catalog,
    };
    let b = names.binding(fv)?;
    let label = ifc.binding_label(&b)?;
    if let Some(p) = b.protocol() {
        let sp = SpecializedProtocol::new(p.clone(), trust)?;
        // the annotation must also be an instance the catalog would offer here
        if !sp.protects(label, trust) || !catalog.viable(fv, b, &env).contains(p) {
            return Err(SelectionError::InvalidProtocolAnnotation {
                variable: fv.clone(),
                protocol: p.clone(),
                label: label.display(trust.atoms()).to_string(),
            });
        }
        return Ok(std::iter::once(p.clone()).collect());
    }
    let input_host = match b {
        Binding::Let(Let {
            value: Expr::Input { host, .. },
            ..
        }) => Some(host),
        _ => None,
    };
    let mut out = BTreeSet::new();
    for p in catalog.viable(fv, b, &env) {
        if input_host.map_or(false, |h| p != Protocol::local(h)) {
            continue;
        }
        if trust.acts_for(&p.authority(trust)?, label) {
            out.insert(p);
        }
    }
    if out.is_empty() {
        return Err(SelectionError::NoApplicableProtocol {
            variable: fv.clone(),
            label: label.display(trust.atoms()).to_string(),
        });
    }
    Ok(out)
}

struct Generator<'a, 'p> {
    names: &'a NameAnalysis<'p>,
    trust: &'a HostTrustConfig,
    ifc: &'a InformationFlow,
    catalog: &'a dyn ProtocolFactory,
    composer: &'a Composer,
    estimator: &'a CostEstimator,
    function: String,
    problem: Problem,
}

impl<'a, 'p> Generator<'a, 'p> {
    fn fv(&self, name: &str) -> FunctionVar {
        FunctionVar::new(&self.function, name)
    }

    fn env(&self) -> FactoryEnv<'a, 'p> {
        FactoryEnv {
            names: self.names,
            composer: self.composer,
            catalog: self.catalog,
        }
    }

    fn hosts(&self) -> &'a [Host] {
        self.trust.hosts()
    }

    fn emit(&mut self, c: SelectionConstraint) {
        if c != Literal(true) {
            debug!("constraint: {c}");
            self.problem.constraints.push(c);
        }
    }

    fn viable(&mut self, fv: &FunctionVar) -> Result<BTreeSet<Protocol>> {
        if let Some(ps) = self.problem.domains.get(fv) {
            return Ok(ps.clone());
        }
        let ps = viable_protocols(self.names, self.trust, self.ifc, self.catalog, fv)?;
        debug!("{fv}: {} viable protocols", ps.len());
        self.problem.domains.insert(fv.clone(), ps.clone());
        Ok(ps)
    }

    fn declare(&mut self, fv: &FunctionVar, b: Binding<'p>) -> Result<()> {
        let ps = self.viable(fv)?;
        self.emit(VariableIn(fv.clone(), ps));
        let env = self.env();
        let c = self.catalog.constraint(fv, b, &env);
        self.emit(c);
        Ok(())
    }

    fn participates(&self, id: NodeId, h: &str) -> SelectionConstraint {
        Participates(id, h.to_owned())
    }

    /// Hosts that must and must not take part when `fv`'s protocol runs `stmt`.
    fn participation(&mut self, fv: &FunctionVar, stmt: &Stmt) -> Result<()> {
        let id = stmt.id();
        for p in self.viable(fv)? {
            let mandatory = self.composer.mandatory_participants(&p, stmt);
            let hosts = p.hosts();
            let each = self.hosts().iter().map(|h| {
                if mandatory.contains(h) {
                    self.participates(id, h)
                } else if !hosts.contains(h) {
                    not(self.participates(id, h))
                } else {
                    Literal(true)
                }
            });
            let c = implies(variable_in(fv, &p), and(each.collect::<Vec<_>>()));
            self.emit(c);
        }
        Ok(())
    }

    /// The cost of computing `mine` at `id` from `reads`, over every protocol combination.
    fn computation(
        &mut self,
        id: NodeId,
        mine: &FunctionVar,
        op: Option<Operator>,
        reads: &[FunctionVar],
    ) -> Result<SymbolicCost> {
        let mut args = Vec::new();
        for r in reads {
            let decl = self.names.binding(r)?.id();
            args.push((r.clone(), self.viable(r)?, decl));
        }
        let decls: BTreeMap<&FunctionVar, NodeId> = args.iter().map(|(fv, _, d)| (fv, *d)).collect();
        let domains: Vec<(FunctionVar, BTreeSet<Protocol>)> =
            args.iter().map(|(fv, ps, _)| (fv.clone(), ps.clone())).collect();
        let combos = combinations(&domains);
        let mut alternatives = Vec::new();
        for p in self.viable(mine)? {
            let exec = self.estimator.execution_cost(op, &p)?;
            let mut invalid = Vec::new();
            for combo in &combos {
                let chosen: Vec<SelectionConstraint> =
                    combo.iter().map(|(fv, q)| variable_in(fv, q)).collect();
                let mut comm = Cost::zero();
                let mut senders: BTreeMap<&Host, Vec<SelectionConstraint>> = BTreeMap::new();
                let mut ok = true;
                for (fv, q) in combo.iter() {
                    let Some(events) = self.composer.communicate(q, &p) else {
                        ok = false;
                        break;
                    };
                    comm = comm + self.estimator.communication_cost(q, &p);
                    let decl = decls.get(fv).copied().ok_or(InternalError::MissingProtocolIndex)?;
                    for e in events {
                        if let Some(h) = self.hosts().iter().find(|h| **h == e.recv.host) {
                            senders
                                .entry(h)
                                .or_default()
                                .push(self.participates(decl, &e.send.host));
                        }
                    }
                }
                if !ok {
                    invalid.push(and(chosen));
                    continue;
                }
                let cond = and(std::iter::once(variable_in(mine, &p)).chain(chosen));
                let receivers = senders
                    .into_iter()
                    .map(|(h, sent)| implies(self.participates(id, h), and(sent)))
                    .collect::<Vec<_>>();
                self.emit(implies(cond.clone(), and(receivers)));
                alternatives.push((cond, exec + comm));
            }
            if !invalid.is_empty() {
                self.emit(implies(variable_in(mine, &p), not(or(invalid))));
            }
        }
        Ok(SymbolicCost::Choice(alternatives))
    }

    fn block(&mut self, block: &'p Block) -> Result<SymbolicCost> {
        let mut costs = Vec::new();
        for s in &block.stmts {
            costs.push(self.stmt(s)?);
        }
        for h in self.hosts() {
            let any = or(block.stmts.iter().map(|s| self.participates(s.id(), h)));
            self.emit(iff(any, self.participates(block.id, h)));
        }
        Ok(SymbolicCost::sum(costs))
    }

    fn read_vars(&self, atoms: impl IntoIterator<Item = &'p str>) -> Vec<FunctionVar> {
        let mut out: Vec<FunctionVar> = Vec::new();
        for n in atoms {
            let fv = self.fv(n);
            if !out.contains(&fv) {
                out.push(fv);
            }
        }
        out
    }

    fn simple(
        &mut self,
        s: &'p Stmt,
        fv: &FunctionVar,
        op: Option<Operator>,
        reads: Vec<FunctionVar>,
    ) -> Result<SymbolicCost> {
        let cost = self.computation(s.id(), fv, op, &reads)?;
        self.participation(fv, s)?;
        self.problem.node_costs.push((s.id(), cost.clone()));
        Ok(cost)
    }

    fn stmt(&mut self, s: &'p Stmt) -> Result<SymbolicCost> {
        match s {
            Stmt::Let(l) => {
                let fv = self.fv(&l.name);
                self.declare(&fv, Binding::Let(l))?;
                if let Expr::Query { object, .. } = &l.value {
                    let object = self.fv(object);
                    self.viable(&object)?;
                    self.emit(VariableEquals(object, fv.clone()));
                }
                let op = match &l.value {
                    Expr::Op { op, .. } => Some(*op),
                    _ => None,
                };
                let reads = self.read_vars(l.value.reads());
                self.simple(s, &fv, op, reads)
            }
            Stmt::Decl(d) => {
                let fv = self.fv(&d.name);
                self.declare(&fv, Binding::Decl(d))?;
                let reads = self.read_vars(d.args.iter().filter_map(Atomic::read));
                self.simple(s, &fv, None, reads)
            }
            Stmt::Update(u) => {
                let object = self.fv(&u.object);
                self.viable(&object)?;
                let env = self.env();
                let c = self.catalog.update_constraint(&object, u, &env);
                self.emit(c);
                let reads = self.read_vars(u.args.iter().filter_map(Atomic::read));
                self.simple(s, &object, None, reads)
            }
            Stmt::OutInit(o) => {
                let param = self.fv(&o.name);
                let atoms: Vec<&'p Atomic> = match &o.init {
                    Initializer::Expr(a) => vec![a],
                    Initializer::Construct { args, .. } => args.iter().collect(),
                };
                let reads = self.read_vars(atoms.into_iter().filter_map(Atomic::read));
                self.simple(s, &param, None, reads)
            }
            Stmt::Output(o) => self.output(s, o),
            Stmt::Call(c) => {
                self.call(c)?;
                Ok(SymbolicCost::zero())
            }
            Stmt::If(i) => self.conditional(i),
            Stmt::Loop(l) => {
                let body = self.block(&l.body)?;
                for h in self.hosts() {
                    self.emit(iff(
                        self.participates(l.body.id, h),
                        self.participates(l.id, h),
                    ));
                }
                Ok(SymbolicCost::Scale(LOOP_ITERATIONS, Box::new(body)))
            }
            Stmt::Break(b) => {
                let target = self
                    .names
                    .loop_of(b)
                    .ok_or_else(|| InternalError::IllegalTerm(format!("break {}", b.label)))?;
                for h in self.hosts() {
                    self.emit(iff(
                        self.participates(target.id, h),
                        self.participates(b.id, h),
                    ));
                }
                Ok(SymbolicCost::zero())
            }
            Stmt::Assert(_) => Ok(SymbolicCost::zero()),
            Stmt::Block(b) => self.block(b),
        }
    }

    fn output(&mut self, s: &'p Stmt, o: &'p Output) -> Result<SymbolicCost> {
        let mut cost = SymbolicCost::zero();
        if let Some(name) = o.message.read() {
            let msg = self.fv(name);
            let dst = Protocol::local(&o.host);
            let mut alternatives = Vec::new();
            for q in self.viable(&msg)? {
                if self.composer.can_communicate(&q, &dst) {
                    let c = self.estimator.communication_cost(&q, &dst);
                    alternatives.push((variable_in(&msg, &q), c));
                } else {
                    self.emit(not(variable_in(&msg, &q)));
                }
            }
            cost = SymbolicCost::Choice(alternatives);
            self.problem.node_costs.push((s.id(), cost.clone()));
        }
        for h in self.hosts() {
            let p = self.participates(o.id, h);
            self.emit(if *h == o.host { p } else { not(p) });
        }
        Ok(cost)
    }

    fn call(&mut self, c: &'p Call) -> Result<()> {
        let callee = self.names.function(&c.function)?;
        for (i, arg) in c.args.iter().enumerate() {
            let param = self.names.parameter(c, i)?;
            let pfv = FunctionVar::new(&callee.name, &param.name);
            let actual = match arg {
                CallArg::Expr(a) => a.read().map(|n| self.fv(n)),
                CallArg::ObjRef(n) | CallArg::OutParam(n) => Some(self.fv(n)),
                CallArg::OutDecl { id, name } => {
                    let fv = self.fv(name);
                    let b = Binding::OutDecl { call: c, id: *id, param };
                    self.declare(&fv, b)?;
                    Some(fv)
                }
            };
            if let Some(fv) = actual {
                self.viable(&fv)?;
                self.emit(VariableEquals(fv, pfv));
            }
        }
        for h in self.hosts() {
            self.emit(implies(
                self.participates(callee.body.id, h),
                self.participates(c.id, h),
            ));
        }
        Ok(())
    }

    fn conditional(&mut self, i: &'p If) -> Result<SymbolicCost> {
        let visible = GuardVisible(i.id);
        match &i.guard {
            Atomic::Literal { .. } => self.emit(visible.clone()),
            Atomic::Read(g) => {
                let guard = self.fv(g);
                let decl = self.names.binding(&guard)?.id();
                for p in self.viable(&guard)? {
                    let revealed = self.catalog.guard_visibility(&p, i);
                    self.emit(implies(variable_in(&guard, &p), iff(visible.clone(), revealed)));
                    // hosts running the branch must hold the revealed guard
                    let holders = self.composer.visible_guard_hosts(&p);
                    let each: Vec<SelectionConstraint> = self
                        .hosts()
                        .iter()
                        .map(|h| {
                            let here = self.participates(i.id, h);
                            if holders.contains(h) {
                                implies(here, self.participates(decl, h))
                            } else {
                                not(here)
                            }
                        })
                        .collect();
                    self.emit(implies(
                        and([visible.clone(), variable_in(&guard, &p)]),
                        and(each),
                    ));
                }
            }
        }
        self.problem.guards.push(i.id);
        let then = self.block(&i.then)?;
        let els = self.block(&i.els)?;
        for h in self.hosts() {
            self.emit(iff(
                or([self.participates(i.then.id, h), self.participates(i.els.id, h)]),
                self.participates(i.id, h),
            ));
        }
        Ok(SymbolicCost::Max(Box::new(then), Box::new(els)))
    }
}

/// Assumed trip count of every loop.
pub const LOOP_ITERATIONS: i64 = 10;

/// Every way of picking one protocol per variable.
fn combinations(
    domains: &[(FunctionVar, BTreeSet<Protocol>)],
) -> Vec<OrdMap<FunctionVar, Protocol>> {
    match domains.split_first() {
        None => vec![OrdMap::new()],
        Some(((fv, ps), rest)) => {
            let tails = combinations(rest);
            ps.iter()
                .flat_map(|p| tails.iter().map(move |t| t.update(fv.clone(), p.clone())))
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::*;
    use crate::protocol::factory::Catalog;
    use conduit_opt::ProtocolFamily;

    fn program(hs: &[&str], main: Function) -> Program {
        Program {
            hosts: hs
                .iter()
                .map(|h| HostDecl {
                    name: h.to_string(),
                    authority: None,
                })
                .collect(),
            delegations: vec![],
            functions: vec![main],
        }
    }

    fn problem(p: &Program, families: &[ProtocolFamily]) -> Result<Problem> {
        let names = NameAnalysis::new(p).unwrap();
        let trust = HostTrustConfig::new(p).unwrap();
        let ifc = InformationFlow::analyze(&names, &trust).unwrap();
        let catalog = Catalog::for_families(families, trust.hosts());
        let composer = Composer;
        generate(
            &names,
            &trust,
            &ifc,
            &catalog,
            &composer,
            &CostEstimator::new(composer),
        )
    }

    #[test]
    fn query_ties_reader_to_object() {
        let b = Builder::new();
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.decl("c", ObjectClass::Immutable, None, vec![read("x")]),
            b.let_("y", get("c")),
            b.output(read("y"), "alice"),
        ]);
        let p = program(&["alice"], main);
        let prob = problem(&p, &[ProtocolFamily::All]).unwrap();
        let c = FunctionVar::new("main", "c");
        let y = FunctionVar::new("main", "y");
        assert!(prob.constraints.contains(&VariableEquals(c, y)));
    }

    #[test]
    fn input_is_local_to_its_host() {
        let b = Builder::new();
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.output(read("x"), "alice"),
        ]);
        let p = program(&["alice", "bob"], main);
        let prob = problem(&p, &[ProtocolFamily::All]).unwrap();
        let x = FunctionVar::new("main", "x");
        assert_eq!(
            prob.domains[&x],
            std::iter::once(Protocol::local("alice")).collect()
        );
    }

    #[test]
    fn empty_catalog_has_no_protocol() {
        let b = Builder::new();
        let one = b.int(1);
        let main = b.main(vec![b.let_("x", Expr::Atomic(one))]);
        let p = program(&["alice"], main);
        assert!(matches!(
            problem(&p, &[]),
            Err(SelectionError::NoApplicableProtocol { .. })
        ));
    }

    #[test]
    fn weak_annotation_is_rejected() {
        let b = Builder::new();
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.let_at(
                "y",
                op(Operator::Add, vec![read("x"), read("x")]),
                Some(Protocol::local("bob")),
            ),
            b.output(read("y"), "alice"),
        ]);
        let p = program(&["alice", "bob"], main);
        assert!(matches!(
            problem(&p, &[ProtocolFamily::All]),
            Err(SelectionError::InvalidProtocolAnnotation { .. })
        ));
    }

    #[test]
    fn every_conditional_has_a_guard_decision() {
        let b = Builder::new();
        let t = b.bool(true);
        let main = b.main(vec![
            b.let_("x", input(ValueType::Bool, "alice")),
            b.if_(read("x"), vec![], vec![]),
            b.if_(t, vec![], vec![]),
        ]);
        let p = program(&["alice"], main);
        let prob = problem(&p, &[ProtocolFamily::Local]).unwrap();
        assert_eq!(prob.guards.len(), 2);
        assert!(matches!(prob.cost, SymbolicCost::Sum(_) | SymbolicCost::Choice(_)));
    }

    #[test]
    fn cross_product() {
        let a: BTreeSet<Protocol> = [Protocol::local("a"), Protocol::local("b")].into();
        let domains = vec![
            (FunctionVar::new("main", "x"), a.clone()),
            (FunctionVar::new("main", "y"), a),
        ];
        assert_eq!(combinations(&domains).len(), 4);
        assert_eq!(combinations(&[]).len(), 1);
    }
}
