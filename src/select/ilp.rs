//! The 0-1 integer program behind protocol selection.
//!
//! Every (variable, viable protocol) pair gets a binary indicator, exactly one of which is
//! set per variable. Compound constraints are linearized with one auxiliary binary per
//! subformula; host participation and guard visibility are binaries of their own. The
//! objective maximizes the negated weighted cost.

use fxhash::FxHashMap as HashMap;
pub use good_lp::{
    variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution, Solver,
    SolverModel, Variable, VariableDefinition,
};
use log::{debug, info};

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::constraint::SelectionConstraint::{self, *};
use super::cost::{Cost, Feature, SymbolicCost};
use super::gen::Problem;
use super::{Assignment, Result, SelectionError};
use crate::ctx::InternalError;
use crate::ir::names::FunctionVar;
use crate::ir::{Host, NodeId};
use crate::protocol::Protocol;

/// A mixed 0-1 program being assembled for the solver.
///
/// Variables are registered under readable names so a solution can be decoded by name
/// once the program has been moved to the solver thread.
pub struct Ilp {
    /// Solver variables by name
    pub var_names: HashMap<String, Variable>,
    variables: ProblemVariables,
    constraints: Vec<Constraint>,
    maximize: Expression,
}

impl Debug for Ilp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ilp")
            .field("var_names", &self.var_names)
            .field("constraints", &self.constraints)
            .field("maximize", &self.maximize)
            .finish_non_exhaustive()
    }
}

impl Default for Ilp {
    fn default() -> Self {
        Self::new()
    }
}

impl Ilp {
    /// No variables, no rows, objective zero.
    pub fn new() -> Self {
        Self {
            var_names: HashMap::default(),
            variables: ProblemVariables::new(),
            constraints: Vec::new(),
            maximize: Expression::from(0),
        }
    }
    /// Register a variable named `name`, with bounds and integrality from `defn`.
    pub fn new_variable(&mut self, defn: VariableDefinition, name: String) -> Variable {
        let defn = defn.name(&name);
        let v = self.variables.add(defn);
        self.var_names.insert(name.clone(), v);
        debug!("Variable: {} -> {:?}", name, v);
        v
    }
    /// Add a row.
    pub fn new_constraint(&mut self, c: Constraint) {
        debug!("Constraint: {:?}", c);
        self.constraints.push(c);
    }
    /// Add several rows.
    pub fn new_constraints(&mut self, c: impl IntoIterator<Item = Constraint>) {
        for c in c {
            self.new_constraint(c);
        }
    }
    /// Rows added so far
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
    /// Replace the objective, which is maximized.
    pub fn maximize(&mut self, e: Expression) {
        self.maximize = e;
    }
    /// Hand the program to `s`. Returns the optimum and the value of every named variable.
    pub fn solve<M: SolverModel<Error = ResolutionError>, S: Solver<Model = M>>(
        self,
        s: S,
    ) -> std::result::Result<(f64, HashMap<String, f64>), IlpUnsat> {
        let max = self.maximize.clone();
        let mut prob = self.variables.maximise(self.maximize).using(s);
        for c in self.constraints {
            prob = prob.with(c);
        }
        match prob.solve() {
            Ok(s) => Ok((
                s.eval(max),
                self.var_names
                    .into_iter()
                    .map(|(name, v)| (name, s.value(v)))
                    .collect(),
            )),
            Err(ResolutionError::Unbounded) => Err(IlpUnsat::Unbounded),
            Err(ResolutionError::Infeasible) => Err(IlpUnsat::Infeasible),
            Err(e) => Err(IlpUnsat::Error(e.to_string())),
        }
    }
    /// [Ilp::solve] with the backend good_lp was built with (microlp here).
    pub fn default_solve(self) -> std::result::Result<(f64, HashMap<String, f64>), IlpUnsat> {
        self.solve(good_lp::default_solver)
    }
}

/// Why the solver returned no optimum
#[derive(Debug)]
pub enum IlpUnsat {
    /// The objective has no upper bound
    Unbounded,
    /// The rows contradict each other
    Infeasible,
    /// Any other solver failure, rendered
    Error(String),
}

/// How often the caller checks for cancellation while the solver runs.
const POLL: Duration = Duration::from_millis(10);

/// What an ILP variable stands for.
#[derive(Clone, Debug)]
enum Meaning {
    Choice(FunctionVar, Protocol),
    Participates(NodeId, Host),
    GuardVisible(NodeId),
}

struct Encoder<'a> {
    problem: &'a Problem,
    ilp: Ilp,
    choices: BTreeMap<&'a FunctionVar, BTreeMap<&'a Protocol, Variable>>,
    atoms: HashMap<SelectionConstraint, Variable>,
    lits: HashMap<SelectionConstraint, Expression>,
    meanings: Vec<(String, Meaning)>,
    infeasible: bool,
}

fn sum(es: impl IntoIterator<Item = Expression>) -> Expression {
    es.into_iter().fold(Expression::from(0), |acc, e| acc + e)
}

impl<'a> Encoder<'a> {
    fn new(problem: &'a Problem) -> Self {
        let mut e = Encoder {
            problem,
            ilp: Ilp::new(),
            choices: BTreeMap::new(),
            atoms: HashMap::default(),
            lits: HashMap::default(),
            meanings: Vec::new(),
            infeasible: false,
        };
        for (fv, ps) in &problem.domains {
            let mut vars = BTreeMap::new();
            for p in ps {
                let name = format!("x{}", e.meanings.len());
                let v = e.ilp.new_variable(variable().binary(), name.clone());
                debug!("{name}: {fv} in {p}");
                e.meanings.push((name, Meaning::Choice(fv.clone(), p.clone())));
                vars.insert(p, v);
            }
            let one = sum(vars.values().map(|v| Expression::from(*v)));
            e.ilp.new_constraints([one.clone() >> 1.0, one << 1.0]);
            e.choices.insert(fv, vars);
        }
        e
    }

    fn aux(&mut self) -> Variable {
        let name = format!("aux{}", self.ilp.var_names.len());
        self.ilp.new_variable(variable().binary(), name)
    }

    fn choice(&self, fv: &FunctionVar, p: &Protocol) -> Result<Expression> {
        let vars = self
            .choices
            .get(fv)
            .ok_or_else(|| InternalError::UnmappedVariable(fv.clone()))?;
        Ok(vars
            .get(p)
            .map(|v| Expression::from(*v))
            .unwrap_or_else(|| Expression::from(0)))
    }

    fn atom(&mut self, c: &SelectionConstraint, meaning: Meaning) -> Expression {
        if let Some(v) = self.atoms.get(c) {
            return Expression::from(*v);
        }
        let name = format!("a{}", self.meanings.len());
        let v = self.ilp.new_variable(variable().binary(), name.clone());
        debug!("{name}: {c}");
        self.meanings.push((name, meaning));
        self.atoms.insert(c.clone(), v);
        Expression::from(v)
    }

    /// A 0-1 expression equal to the truth value of `c`.
    fn lit(&mut self, c: &SelectionConstraint) -> Result<Expression> {
        if let Some(e) = self.lits.get(c) {
            return Ok(e.clone());
        }
        let e = match c {
            Literal(b) => Expression::from(if *b { 1 } else { 0 }),
            VariableIn(fv, ps) => {
                let mut terms = Vec::new();
                for p in ps {
                    terms.push(self.choice(fv, p)?);
                }
                sum(terms)
            }
            VariableEquals(x, y) => {
                let domains = &self.problem.domains;
                let common: Vec<&Protocol> = domains
                    .get(x)
                    .ok_or_else(|| InternalError::UnmappedVariable(x.clone()))?
                    .iter()
                    .filter(|p| domains.get(y).map_or(false, |d| d.contains(*p)))
                    .collect();
                let mut terms = Vec::new();
                for p in common {
                    let (a, b) = (self.choice(x, p)?, self.choice(y, p)?);
                    let w = self.aux();
                    self.ilp.new_constraints([
                        w << a.clone(),
                        w << b.clone(),
                        w >> (a + b - 1.0),
                    ]);
                    terms.push(Expression::from(w));
                }
                sum(terms)
            }
            Participates(id, h) => self.atom(c, Meaning::Participates(*id, h.clone())),
            GuardVisible(id) => self.atom(c, Meaning::GuardVisible(*id)),
            And(cs) => {
                let mut ls = Vec::new();
                for c in cs {
                    ls.push(self.lit(c)?);
                }
                let z = self.aux();
                let n = ls.len() as f64;
                for l in &ls {
                    self.ilp.new_constraint(z << l.clone());
                }
                self.ilp.new_constraint(z >> (sum(ls) - (n - 1.0)));
                Expression::from(z)
            }
            Or(cs) => {
                let mut ls = Vec::new();
                for c in cs {
                    ls.push(self.lit(c)?);
                }
                let z = self.aux();
                for l in &ls {
                    self.ilp.new_constraint(z >> l.clone());
                }
                self.ilp.new_constraint(z << sum(ls));
                Expression::from(z)
            }
            Not(a) => Expression::from(1) - self.lit(a)?,
            Implies(a, b) => {
                let (la, lb) = (self.lit(a)?, self.lit(b)?);
                let z = self.aux();
                self.ilp.new_constraints([
                    z >> (Expression::from(1) - la.clone()),
                    z >> lb.clone(),
                    z << (Expression::from(1) - la + lb),
                ]);
                Expression::from(z)
            }
        };
        self.lits.insert(c.clone(), e.clone());
        Ok(e)
    }

    /// Require `c` to hold.
    fn enforce(&mut self, c: &SelectionConstraint) -> Result<()> {
        match c {
            Literal(true) => {}
            Literal(false) => self.infeasible = true,
            And(cs) => {
                for c in cs {
                    self.enforce(c)?;
                }
            }
            Or(cs) => {
                let mut ls = Vec::new();
                for c in cs {
                    ls.push(self.lit(c)?);
                }
                self.ilp.new_constraint(sum(ls) >> 1.0);
            }
            Implies(a, b) => {
                let (la, lb) = (self.lit(a)?, self.lit(b)?);
                self.ilp.new_constraint(la << lb);
            }
            Not(a) => {
                let la = self.lit(a)?;
                self.ilp.new_constraint(la << 0.0);
            }
            VariableEquals(x, y) => {
                let problem = self.problem;
                let mut ps: Vec<&Protocol> = Vec::new();
                for fv in [x, y] {
                    let d = problem
                        .domains
                        .get(fv)
                        .ok_or_else(|| InternalError::UnmappedVariable(fv.clone()))?;
                    ps.extend(d.iter());
                }
                ps.sort();
                ps.dedup();
                for p in ps {
                    let (a, b) = (self.choice(x, p)?, self.choice(y, p)?);
                    self.ilp.new_constraints([a.clone() << b.clone(), a >> b]);
                }
            }
            c => {
                let l = self.lit(c)?;
                self.ilp.new_constraint(l >> 1.0);
            }
        }
        Ok(())
    }

    /// One feature of `cost`, as a linear expression.
    fn cost(&mut self, cost: &SymbolicCost, f: Feature) -> Result<Expression> {
        Ok(match cost {
            SymbolicCost::Literal(c) => Expression::from(*c.get(f) as f64),
            SymbolicCost::Sum(cs) => {
                let mut terms = Vec::new();
                for c in cs {
                    terms.push(self.cost(c, f)?);
                }
                sum(terms)
            }
            SymbolicCost::Scale(k, c) => self.cost(c, f)? * (*k as f64),
            SymbolicCost::Max(a, b) => {
                let (ea, eb) = (self.cost(a, f)?, self.cost(b, f)?);
                let name = format!("max{}", self.ilp.var_names.len());
                let m = self.ilp.new_variable(variable().min(0), name);
                self.ilp.new_constraints([m >> ea, m >> eb]);
                Expression::from(m)
            }
            SymbolicCost::Choice(alts) => {
                let mut terms = Vec::new();
                for (cond, c) in alts {
                    let k = *c.get(f);
                    if k != 0 {
                        terms.push(self.lit(cond)? * (k as f64));
                    }
                }
                sum(terms)
            }
        })
    }
}

/// Find a minimum-cost assignment for `problem`.
///
/// The solver runs on its own thread. If `cancel` is raised, or `timeout` passes first,
/// the search is abandoned with [SelectionError::SelectionTimedOut].
pub fn solve(
    problem: &Problem,
    weights: &Cost<i64>,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Assignment> {
    let mut enc = Encoder::new(problem);
    for c in &problem.constraints {
        enc.enforce(c)?;
    }
    let mut objective = Vec::new();
    for f in Feature::ALL {
        let w = *weights.get(f);
        if w != 0 {
            objective.push(enc.cost(&problem.cost, f)? * (w as f64));
        }
    }
    enc.ilp.maximize(sum(objective) * -1.0);
    if enc.infeasible {
        info!("selection constraints are trivially unsatisfiable");
        return Err(SelectionError::NoSelectionSolution);
    }
    let Encoder { ilp, meanings, .. } = enc;
    info!(
        "ILP: {} variables, {} constraints",
        ilp.var_names.len(),
        ilp.constraints().len()
    );
    let (max, values) = run(ilp, timeout, cancel)?;
    debug!("ILP optimum: {}", -max);
    let mut a = Assignment::default();
    for id in &problem.guards {
        a.guards.insert(*id, false);
    }
    for (name, meaning) in meanings {
        if values.get(&name).map_or(true, |v| *v < 0.5) {
            continue;
        }
        match meaning {
            Meaning::Choice(fv, p) => {
                a.protocols.insert(fv, p);
            }
            Meaning::Participates(id, h) => {
                a.participants.insert((id, h));
            }
            Meaning::GuardVisible(id) => {
                a.guards.insert(id, true);
            }
        }
    }
    for fv in problem.domains.keys() {
        a.protocol(fv)?;
    }
    Ok(a)
}

fn run(
    ilp: Ilp,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(f64, HashMap<String, f64>)> {
    let start = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("selection-ilp".into())
        .spawn(move || {
            // microlp has no time limit, so an abandoned search runs to completion here and
            // its result is dropped; the receiver is gone by then
            let _ = tx.send(ilp.default_solve());
        })
        .map_err(|e| InternalError::Solver(e.to_string()))?;
    loop {
        let cancelled = cancel.as_ref().map_or(false, |c| c.load(Ordering::Relaxed));
        if cancelled || timeout.map_or(false, |t| start.elapsed() >= t) {
            info!("abandoning protocol selection after {:?}", start.elapsed());
            return Err(SelectionError::SelectionTimedOut(start.elapsed()));
        }
        match rx.recv_timeout(POLL) {
            Ok(Ok(solution)) => return Ok(solution),
            Ok(Err(IlpUnsat::Infeasible)) => return Err(SelectionError::NoSelectionSolution),
            Ok(Err(IlpUnsat::Unbounded)) => {
                return Err(InternalError::Solver("unbounded objective".into()).into())
            }
            Ok(Err(IlpUnsat::Error(e))) => return Err(InternalError::Solver(e).into()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(InternalError::Solver("solver thread died".into()).into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::select::constraint::{and, implies, not, variable_in};
    use approx::assert_relative_eq;
    use good_lp::default_solver;

    #[test]
    fn test_our_ilp_with_default_solver() {
        let mut vars = Ilp::new();
        let a = vars.new_variable(variable().binary(), "a".into());
        let b = vars.new_variable(variable().integer().max(10), "b".into());
        let c = vars.new_variable(variable().max(10), "c".into());
        vars.maximize(a + b + c);
        vars.new_constraint(a << 5.0);
        vars.new_constraint(b << 5.0);
        vars.new_constraint(c << 2.0);
        let (max, solution) = vars.solve(default_solver).unwrap();
        assert_relative_eq!(max, 8.0);
        assert_eq!(solution.get("a").unwrap(), &1.0);
        assert_eq!(solution.get("b").unwrap(), &5.0);
        assert_eq!(solution.get("c").unwrap(), &2.0);
    }

    fn fv(n: &str) -> FunctionVar {
        FunctionVar::new("main", n)
    }

    fn unit(execution: i64) -> Cost<i64> {
        Cost {
            execution,
            ..Cost::zero()
        }
    }

    /// `x` and `y` may each be local to `a` or `b`; `b` is cheaper for `x`.
    fn two_hosts() -> Problem {
        let (a, b) = (Protocol::local("a"), Protocol::local("b"));
        let both: std::collections::BTreeSet<Protocol> = [a.clone(), b.clone()].into();
        let mut p = Problem::default();
        p.domains.insert(fv("x"), both.clone());
        p.domains.insert(fv("y"), both);
        p.cost = SymbolicCost::Choice(vec![
            (variable_in(&fv("x"), &a), unit(5)),
            (variable_in(&fv("x"), &b), unit(1)),
        ]);
        p
    }

    fn weights() -> Cost<i64> {
        Cost {
            messages: 1,
            execution: 1,
            lan: 1,
            wan: 1,
        }
    }

    #[test]
    fn cheapest_choice() {
        let p = two_hosts();
        let a = solve(&p, &weights(), None, None).unwrap();
        assert_eq!(a.protocols[&fv("x")], Protocol::local("b"));
        assert_eq!(p.cost.eval(&a).unwrap(), unit(1));
    }

    #[test]
    fn equality_and_implication() {
        let mut p = two_hosts();
        let a = Protocol::local("a");
        p.constraints.push(VariableEquals(fv("x"), fv("y")));
        p.constraints.push(not(variable_in(&fv("y"), &Protocol::local("b"))));
        let asg = solve(&p, &weights(), None, None).unwrap();
        assert_eq!(asg.protocols[&fv("x")], a);
        assert_eq!(asg.protocols[&fv("y")], a);
        for c in &p.constraints {
            assert!(c.eval(&asg).unwrap());
        }
    }

    #[test]
    fn participation_follows_choice() {
        let mut p = two_hosts();
        let b = Protocol::local("b");
        let here = Participates(NodeId(7), "b".into());
        p.constraints.push(implies(variable_in(&fv("x"), &b), here.clone()));
        p.constraints.push(implies(here, and([GuardVisible(NodeId(8))])));
        p.guards.push(NodeId(8));
        let asg = solve(&p, &weights(), None, None).unwrap();
        assert!(asg.participates(NodeId(7), "b"));
        assert!(asg.guard_visible(NodeId(8)));
    }

    #[test]
    fn max_is_per_feature() {
        let mut p = two_hosts();
        p.cost = SymbolicCost::Max(
            Box::new(SymbolicCost::Literal(Cost {
                messages: 4,
                ..Cost::zero()
            })),
            Box::new(p.cost.clone()),
        );
        let asg = solve(&p, &weights(), None, None).unwrap();
        assert_eq!(asg.protocols[&fv("x")], Protocol::local("b"));
    }

    #[test]
    fn infeasible() {
        let mut p = two_hosts();
        p.constraints.push(not(variable_in(&fv("x"), &Protocol::local("a"))));
        p.constraints.push(not(variable_in(&fv("x"), &Protocol::local("b"))));
        assert_eq!(
            solve(&p, &weights(), None, None).unwrap_err(),
            SelectionError::NoSelectionSolution
        );
        let mut q = two_hosts();
        q.constraints.push(Literal(false));
        assert_eq!(
            solve(&q, &weights(), None, None).unwrap_err(),
            SelectionError::NoSelectionSolution
        );
    }

    #[test]
    fn cancelled() {
        let p = two_hosts();
        let flag = Arc::new(AtomicBool::new(true));
        assert!(matches!(
            solve(&p, &weights(), None, Some(flag)),
            Err(SelectionError::SelectionTimedOut(_))
        ));
        assert!(matches!(
            solve(&p, &weights(), Some(Duration::ZERO), None),
            Err(SelectionError::SelectionTimedOut(_))
        ));
    }

    #[test]
    fn unknown_variable() {
        let mut p = two_hosts();
        p.constraints.push(variable_in(&fv("z"), &Protocol::local("a")));
        assert!(matches!(
            solve(&p, &weights(), None, None),
            Err(SelectionError::Internal(InternalError::UnmappedVariable(_)))
        ));
    }
}
