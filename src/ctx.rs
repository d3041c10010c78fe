//! The compilation context and top-level driver.
//!
//! A [Compilation] owns every analysis derived from one program: name resolution, the
//! host trust configuration and the solved labels. Stages borrow it; nothing is cached
//! outside of it.

use log::info;
use serde_json::{json, Map, Value};

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::cfg::ConduitCfg;
use crate::ifc::specialize::specialize;
use crate::ifc::{IfcError, InformationFlow};
use crate::ir::build::renumber;
use crate::ir::names::{FunctionVar, NameAnalysis};
use crate::ir::{Program, ProgramError};
use crate::protocol::factory::{Catalog, ProtocolFactory};
use crate::security::{HostTrustConfig, Label};
use crate::select::{self, Selection, SelectionError};

/// A broken invariant inside the compiler, as opposed to a problem with the program.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("No label was inferred for {0}")]
    /// A binding has no label
    MissingLabel(String),
    #[error("{0} has no protocol")]
    /// A variable is missing from an assignment or a problem
    UnmappedVariable(FunctionVar),
    #[error("Illegal term: {0}")]
    /// A construct that earlier stages should have ruled out
    IllegalTerm(String),
    #[error("No function named {0} was scheduled")]
    /// The specializer lost track of a function
    MissingFunction(String),
    #[error("Missing protocol index")]
    /// A lookup into generator tables failed
    MissingProtocolIndex,
    #[error("Validation failed: {0}")]
    /// The optimizer's assignment breaks a constraint
    Validation(String),
    #[error("No cost estimate for {0}")]
    /// The cost table has no entry for an operator
    MissingCost(String),
    #[error("Solver failure: {0}")]
    /// The ILP solver failed
    Solver(String),
}

/// Any reason compilation stops.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    /// The program is malformed
    Program(#[from] ProgramError),
    #[error(transparent)]
    /// The program is insecure
    Ifc(IfcError),
    #[error(transparent)]
    /// No protocol assignment exists, or none was found in time
    Selection(SelectionError),
    #[error("Internal error: {0}")]
    /// The compiler is wrong
    Internal(#[from] InternalError),
}

impl From<IfcError> for CompileError {
    fn from(e: IfcError) -> Self {
        match e {
            IfcError::Program(e) => CompileError::Program(e),
            IfcError::Internal(e) => CompileError::Internal(e),
            e => CompileError::Ifc(e),
        }
    }
}

impl From<SelectionError> for CompileError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::Program(e) => CompileError::Program(e),
            SelectionError::Internal(e) => CompileError::Internal(e),
            e => CompileError::Selection(e),
        }
    }
}

/// Result of compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Number every node, then clone polymorphic functions if configured to.
pub fn prepare(mut program: Program, cfg: &ConduitCfg) -> Result<Program> {
    renumber(&mut program);
    if !cfg.ifc.specialize {
        return Ok(program);
    }
    let mut specialized = {
        let names = NameAnalysis::new(&program)?;
        let trust = HostTrustConfig::new(&program)?;
        let ifc = InformationFlow::analyze(&names, &trust)?;
        specialize(&names, &trust, &ifc)?
    };
    renumber(&mut specialized);
    Ok(specialized)
}

/// A checked program with its analyses.
pub struct Compilation<'p> {
    names: NameAnalysis<'p>,
    trust: HostTrustConfig,
    ifc: InformationFlow,
}

impl<'p> Compilation<'p> {
    /// Resolve names and infer labels. `program` should come from [prepare].
    pub fn new(program: &'p Program) -> Result<Self> {
        if program.function(Program::ENTRY).is_none() {
            return Err(ProgramError::MissingEntry.into());
        }
        let names = NameAnalysis::new(program)?;
        let trust = HostTrustConfig::new(program)?;
        let ifc = InformationFlow::analyze(&names, &trust)?;
        Ok(Compilation { names, trust, ifc })
    }
    /// The program.
    pub fn program(&self) -> &'p Program {
        self.names.program()
    }
    /// Name resolution.
    pub fn names(&self) -> &NameAnalysis<'p> {
        &self.names
    }
    /// Host labels and delegations.
    pub fn trust(&self) -> &HostTrustConfig {
        &self.trust
    }
    /// The label solution.
    pub fn ifc(&self) -> &InformationFlow {
        &self.ifc
    }
    /// The label of `fv`.
    pub fn label(&self, fv: &FunctionVar) -> Result<&Label> {
        Ok(self.ifc.variable_label(&self.names, fv)?)
    }
    /// The catalog `cfg` selects, over this program's hosts.
    pub fn catalog(&self, cfg: &ConduitCfg) -> Catalog {
        Catalog::for_families(&cfg.selection.protocols, self.trust.hosts())
    }
    /// Select protocols from `catalog`.
    pub fn select_with(
        &self,
        catalog: &dyn ProtocolFactory,
        cfg: &ConduitCfg,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Selection> {
        Ok(select::select(
            &self.names,
            &self.trust,
            &self.ifc,
            catalog,
            cfg,
            cancel,
        )?)
    }
    /// Select protocols from the configured catalog.
    pub fn select(&self, cfg: &ConduitCfg, cancel: Option<Arc<AtomicBool>>) -> Result<Selection> {
        self.select_with(&self.catalog(cfg), cfg, cancel)
    }
    /// Package `selection` with the labels of every selected variable.
    pub fn output(&self, selection: Selection) -> Result<CompileOutput> {
        let mut labels = BTreeMap::new();
        for fv in selection.assignment.protocols.keys() {
            let l = self.label(fv)?;
            labels.insert(fv.clone(), l.display(self.trust.atoms()).to_string());
        }
        Ok(CompileOutput {
            program: self.program().clone(),
            labels,
            selection,
        })
    }
}

/// Everything compilation produces.
#[derive(Clone, Debug)]
pub struct CompileOutput {
    /// The program, after renumbering and specialization
    pub program: Program,
    /// The label of each selected variable
    pub labels: BTreeMap<FunctionVar, String>,
    /// Protocols, guard visibility and costs
    pub selection: Selection,
}

impl CompileOutput {
    /// A JSON report keyed by variable and node.
    pub fn to_json(&self) -> Value {
        let a = &self.selection.assignment;
        let mut variables = Map::new();
        for (fv, p) in &a.protocols {
            variables.insert(
                fv.to_string(),
                json!({
                    "protocol": p.to_string(),
                    "label": self.labels.get(fv),
                }),
            );
        }
        let guards: Map<String, Value> = a
            .guards
            .iter()
            .map(|(id, v)| (id.to_string(), json!(v)))
            .collect();
        let costs: Map<String, Value> = self
            .selection
            .node_costs
            .iter()
            .map(|(id, c)| (id.to_string(), json!(c)))
            .collect();
        json!({
            "variables": variables,
            "guards": guards,
            "costs": costs,
            "total": self.selection.total,
            "objective": self.selection.objective,
        })
    }
}

/// Compile `program`: prepare it, check it, and select protocols.
pub fn compile(
    program: Program,
    cfg: &ConduitCfg,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<CompileOutput> {
    let program = prepare(program, cfg)?;
    let c = Compilation::new(&program)?;
    info!(
        "compiling {} functions over {} hosts",
        program.functions.len(),
        c.trust().hosts().len()
    );
    let selection = c.select(cfg, cancel)?;
    c.output(selection)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::*;
    use crate::protocol::compose::Composer;
    use crate::protocol::{Protocol, ShareType};
    use crate::select::cost::{Cost, CostEstimator};
    use crate::select::{ilp, validate::validate};
    use crate::select::gen;
    use conduit_opt::{ConduitOpt, ProtocolFamily};
    use quickcheck::{Arbitrary, Gen, TestResult};
    use quickcheck_macros::quickcheck;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn hosts(hs: &[&str]) -> Vec<HostDecl> {
        hs.iter()
            .map(|h| HostDecl {
                name: h.to_string(),
                authority: None,
            })
            .collect()
    }

    fn cfg(families: &[ProtocolFamily]) -> ConduitCfg {
        let mut opt = ConduitOpt::default();
        opt.selection.protocols = families.to_vec();
        ConduitCfg::from(opt)
    }

    fn labelled_literal(hs: &[&str], label: LabelExpr) -> Program {
        let b = Builder::new();
        let one = b.int(1);
        Program {
            hosts: hosts(hs),
            delegations: vec![],
            functions: vec![b.main(vec![b.decl(
                "c",
                ObjectClass::Immutable,
                Some(label),
                vec![one],
            )])],
        }
    }

    fn c() -> FunctionVar {
        FunctionVar::new("main", "c")
    }

    #[test]
    fn single_host_literal_is_local() {
        init();
        let p = labelled_literal(&["A"], LabelExpr::host("A"));
        let out = compile(p, &cfg(&[ProtocolFamily::Local]), None).unwrap();
        assert_eq!(out.selection.assignment.protocols[&c()], Protocol::local("A"));
        assert_eq!(
            out.selection.total,
            Cost {
                execution: 1,
                ..Cost::zero()
            }
        );
        assert_eq!(out.selection.total.messages, 0);
    }

    #[test]
    fn replication_when_it_suffices() {
        init();
        let a = || LabelExpr::host("A");
        let b = || LabelExpr::host("B");
        let replicated = a().or(b()).conf().and(a().and(b()).integ());
        let p = labelled_literal(&["A", "B"], replicated);
        let families = [ProtocolFamily::Replication, ProtocolFamily::Aby];
        let out = compile(p, &cfg(&families), None).unwrap();
        assert_eq!(
            out.selection.assignment.protocols[&c()],
            Protocol::replication(["A", "B"])
        );
    }

    #[test]
    fn mpc_when_replication_is_too_weak() {
        init();
        let joint = LabelExpr::host("A").and(LabelExpr::host("B"));
        let p = labelled_literal(&["A", "B"], joint);
        let families = [ProtocolFamily::Replication, ProtocolFamily::Aby];
        let out = compile(p, &cfg(&families), None).unwrap();
        assert!(out.selection.assignment.protocols[&c()].is_aby());
    }

    #[test]
    fn mismatched_declassification_stops_before_selection() {
        init();
        let b = Builder::new();
        let to = LabelExpr::host("a")
            .conf()
            .or(LabelExpr::host("b").conf())
            .and(LabelExpr::host("b").integ());
        let p = Program {
            hosts: hosts(&["a", "b"]),
            delegations: vec![],
            functions: vec![b.main(vec![
                b.let_("x", input(ValueType::Int, "a")),
                b.let_("y", declassify(read("x"), Some(LabelExpr::host("b")), to)),
            ])],
        };
        // an empty catalog would fail selection, so reaching it would be visible
        assert!(matches!(
            compile(p, &cfg(&[]), None),
            Err(CompileError::Ifc(IfcError::InsecureDataFlow(_)))
        ));
    }

    #[test]
    fn missing_entry() {
        let p = Program {
            hosts: hosts(&["a"]),
            delegations: vec![],
            functions: vec![],
        };
        let mut opt = ConduitOpt::default();
        opt.ifc.specialize = false;
        assert_eq!(
            compile(p, &ConduitCfg::from(opt), None).unwrap_err(),
            CompileError::Program(ProgramError::MissingEntry)
        );
    }

    #[test]
    fn query_shares_the_object_protocol() {
        init();
        let b = Builder::new();
        let p = Program {
            hosts: hosts(&["alice", "bob"]),
            delegations: vec![],
            functions: vec![b.main(vec![
                b.let_("x", input(ValueType::Int, "alice")),
                b.decl("c", ObjectClass::Mutable, None, vec![read("x")]),
                b.let_("y", get("c")),
                b.output(read("y"), "alice"),
            ])],
        };
        let out = compile(p, &ConduitCfg::default(), None).unwrap();
        let a = &out.selection.assignment;
        assert_eq!(
            a.protocols[&c()],
            a.protocols[&FunctionVar::new("main", "y")]
        );
        let report = out.to_json();
        assert!(report["variables"]["main::y"]["protocol"].is_string());
    }

    #[test]
    fn revealed_guard_runs_where_it_is_held() {
        init();
        let b = Builder::new();
        let p = Program {
            hosts: hosts(&["alice"]),
            delegations: vec![],
            functions: vec![b.main(vec![
                b.let_("g", input(ValueType::Bool, "alice")),
                b.if_(
                    read("g"),
                    vec![b.output(read("g"), "alice")],
                    vec![],
                ),
            ])],
        };
        let out = compile(p, &ConduitCfg::default(), None).unwrap();
        let guards: Vec<bool> = out.selection.assignment.guards.values().copied().collect();
        assert_eq!(guards, vec![true]);
    }

    #[test]
    fn annotation_outside_the_catalog_is_a_program_error() {
        init();
        let b = Builder::new();
        let p = Program {
            hosts: hosts(&["alice", "bob"]),
            delegations: vec![],
            functions: vec![b.main(vec![
                b.let_("x", input(ValueType::Int, "alice")),
                b.let_("y", input(ValueType::Int, "bob")),
                b.let_at(
                    "c",
                    op(Operator::Lt, vec![read("x"), read("y")]),
                    Some(Protocol::aby(ShareType::Arithmetic, "alice", "bob")),
                ),
            ])],
        };
        let r = compile(p, &ConduitCfg::default(), None);
        assert!(matches!(
            r,
            Err(CompileError::Selection(
                SelectionError::InvalidProtocolAnnotation { .. }
            ))
        ));
    }

    /// A random straight-line program over two hosts, with an optional delegation.
    #[derive(Clone, Debug)]
    struct Straight(Program);

    impl Arbitrary for Straight {
        fn arbitrary(g: &mut Gen) -> Self {
            let b = Builder::new();
            let names = ["a", "b"];
            let mut delegations = Vec::new();
            if bool::arbitrary(g) {
                let (from, to) = if bool::arbitrary(g) { ("a", "b") } else { ("b", "a") };
                delegations.push(Delegation {
                    kind: *g
                        .choose(&[DelegationKind::Authority, DelegationKind::Flow])
                        .unwrap(),
                    from: LabelExpr::host(from),
                    to: LabelExpr::host(to),
                    projection: *g
                        .choose(&[
                            Projection::Confidentiality,
                            Projection::Integrity,
                            Projection::Both,
                        ])
                        .unwrap(),
                });
            }
            let mut stmts = Vec::new();
            let mut vars: Vec<String> = Vec::new();
            for i in 0..(usize::arbitrary(g) % 4 + 1) {
                let kind = if vars.is_empty() { 0 } else { u8::arbitrary(g) % 3 };
                let value = match kind {
                    0 => input(ValueType::Int, g.choose(&names).unwrap()),
                    1 => {
                        let o = *g.choose(&[Operator::Add, Operator::Sub, Operator::Mul]).unwrap();
                        let x = g.choose(&vars).unwrap().clone();
                        let y = g.choose(&vars).unwrap().clone();
                        op(o, vec![read(&x), read(&y)])
                    }
                    _ => Expr::Atomic(b.int(i64::from(u8::arbitrary(g)))),
                };
                let name = format!("t{i}");
                stmts.push(b.let_(&name, value));
                vars.push(name);
            }
            if bool::arbitrary(g) {
                let last = vars.last().cloned().unwrap_or_default();
                stmts.push(b.output(read(&last), g.choose(&names).unwrap()));
            }
            Straight(Program {
                hosts: hosts(&names),
                delegations,
                functions: vec![b.main(stmts)],
            })
        }
    }

    const FAMILIES: [ProtocolFamily; 3] = [
        ProtocolFamily::Local,
        ProtocolFamily::Replication,
        ProtocolFamily::Aby,
    ];

    #[quickcheck]
    fn selected_protocols_protect_their_labels(s: Straight) -> TestResult {
        let cfg = cfg(&FAMILIES);
        let Ok(program) = prepare(s.0, &cfg) else {
            return TestResult::discard();
        };
        let Ok(c) = Compilation::new(&program) else {
            return TestResult::discard();
        };
        let selection = match c.select(&cfg, None) {
            Ok(sel) => sel,
            Err(CompileError::Selection(_)) => return TestResult::discard(),
            Err(e) => return TestResult::error(e.to_string()),
        };
        for (fv, p) in &selection.assignment.protocols {
            let authority = p.authority(c.trust()).unwrap();
            if !c.trust().acts_for(&authority, c.label(fv).unwrap()) {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }

    #[quickcheck]
    fn removing_a_protocol_never_helps(s: Straight, pick: u8) -> TestResult {
        let cfg = cfg(&FAMILIES);
        let Ok(program) = prepare(s.0, &cfg) else {
            return TestResult::discard();
        };
        let Ok(c) = Compilation::new(&program) else {
            return TestResult::discard();
        };
        let full = c.catalog(&cfg);
        let all = full.protocols().to_vec();
        let removed = all[pick as usize % all.len()].clone();
        let reduced = c.catalog(&cfg).exclude(removed);

        let problem = |catalog: &Catalog| {
            let composer = Composer;
            gen::generate(
                c.names(),
                c.trust(),
                c.ifc(),
                catalog,
                &composer,
                &CostEstimator::new(composer),
            )
        };
        if let (Ok(before), Ok(after)) = (problem(&full), problem(&reduced)) {
            for (fv, ps) in &after.domains {
                if !ps.is_subset(&before.domains[fv]) {
                    return TestResult::failed();
                }
            }
        }

        let before = c.select_with(&full, &cfg, None);
        let after = c.select_with(&reduced, &cfg, None);
        match (before, after) {
            (Ok(b), Ok(a)) => TestResult::from_bool(b.objective <= a.objective),
            (Err(CompileError::Selection(_)), Ok(_)) => TestResult::failed(),
            (Ok(_), Err(CompileError::Selection(_))) => TestResult::passed(),
            (Err(CompileError::Selection(_)), Err(CompileError::Selection(_))) => {
                TestResult::passed()
            }
            (b, a) => TestResult::error(format!("{:?} / {:?}", b.err(), a.err())),
        }
    }

    #[quickcheck]
    fn optimal_assignments_validate_every_time(s: Straight) -> TestResult {
        let cfg = cfg(&FAMILIES);
        let Ok(program) = prepare(s.0, &cfg) else {
            return TestResult::discard();
        };
        let Ok(c) = Compilation::new(&program) else {
            return TestResult::discard();
        };
        let catalog = c.catalog(&cfg);
        let composer = Composer;
        let estimator = CostEstimator::new(composer);
        let generated = gen::generate(
            c.names(),
            c.trust(),
            c.ifc(),
            &catalog,
            &composer,
            &estimator,
        );
        let Ok(problem) = generated else {
            return TestResult::discard();
        };
        let assignment = match ilp::solve(&problem, &cfg.weights(), None, None) {
            Ok(a) => a,
            Err(SelectionError::NoSelectionSolution) => return TestResult::discard(),
            Err(e) => return TestResult::error(e.to_string()),
        };
        let check = || validate(c.names(), c.trust(), c.ifc(), &catalog, &problem, &assignment);
        TestResult::from_bool(check().is_ok() && check() == check())
    }
}
