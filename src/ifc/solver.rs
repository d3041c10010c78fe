//! Solving flows-to constraints over label terms.
//!
//! Each component constraint is normalized to atomic inequalities `c ∧ x ≤ d ∨ y`, with at
//! most one variable on each side. Variables start at the top of their component lattice and
//! only descend: `x := x ∧ (c → d ∨ y)`. At the fixed point every variable is as high as the
//! atomic inequalities allow, which is the greatest (least restrictive) solution. Finally
//! every original constraint is evaluated and checked under the congruence.

use fxhash::FxHashMap;
use log::{debug, trace};

use std::collections::VecDeque;
use std::hash::Hash;

use crate::security::{Congruence, Fdl, Label, Side};

/// One component of one label variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompVar {
    var: usize,
    side: Side,
}

/// A term in one component lattice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    /// A constant
    Const(Fdl),
    /// A component of a variable
    Var(CompVar),
    /// Lattice join
    Join(Box<Component>, Box<Component>),
    /// Lattice meet
    Meet(Box<Component>, Box<Component>),
}

impl Component {
    fn join(self, other: Component) -> Component {
        Component::Join(Box::new(self), Box::new(other))
    }
    fn meet(self, other: Component) -> Component {
        Component::Meet(Box::new(self), Box::new(other))
    }
    fn eval(&self, values: &[Label]) -> Fdl {
        match self {
            Component::Const(c) => c.clone(),
            Component::Var(x) => value(values, *x).clone(),
            Component::Join(a, b) => a.eval(values).join(&b.eval(values)),
            Component::Meet(a, b) => a.eval(values).meet(&b.eval(values)),
        }
    }
}

fn value(values: &[Label], x: CompVar) -> &Fdl {
    match x.side {
        Side::Conf => &values[x.var].conf,
        Side::Integ => &values[x.var].integ,
    }
}

/// A label with unknowns: a pair of component terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTerm {
    conf: Component,
    integ: Component,
}

impl LabelTerm {
    /// A known label.
    pub fn constant(l: &Label) -> Self {
        LabelTerm {
            conf: Component::Const(l.conf.clone()),
            integ: Component::Const(l.integ.clone()),
        }
    }
    fn var(var: usize) -> Self {
        LabelTerm {
            conf: Component::Var(CompVar {
                var,
                side: Side::Conf,
            }),
            integ: Component::Var(CompVar {
                var,
                side: Side::Integ,
            }),
        }
    }
    /// Least upper bound in the flows-to order.
    pub fn join(&self, o: &LabelTerm) -> LabelTerm {
        LabelTerm {
            conf: self.conf.clone().meet(o.conf.clone()),
            integ: self.integ.clone().join(o.integ.clone()),
        }
    }
    /// Greatest lower bound in the flows-to order.
    pub fn meet(&self, o: &LabelTerm) -> LabelTerm {
        LabelTerm {
            conf: self.conf.clone().join(o.conf.clone()),
            integ: self.integ.clone().meet(o.integ.clone()),
        }
    }
    /// Conjunction of authority.
    pub fn and(&self, o: &LabelTerm) -> LabelTerm {
        LabelTerm {
            conf: self.conf.clone().meet(o.conf.clone()),
            integ: self.integ.clone().meet(o.integ.clone()),
        }
    }
    /// Disjunction of authority.
    pub fn or(&self, o: &LabelTerm) -> LabelTerm {
        LabelTerm {
            conf: self.conf.clone().join(o.conf.clone()),
            integ: self.integ.clone().join(o.integ.clone()),
        }
    }
    /// Exchange the components.
    pub fn swap(&self) -> LabelTerm {
        LabelTerm {
            conf: self.integ.clone(),
            integ: self.conf.clone(),
        }
    }
    /// Keep confidentiality; integrity becomes weakest.
    pub fn confidentiality(&self) -> LabelTerm {
        LabelTerm {
            conf: self.conf.clone(),
            integ: Component::Const(Fdl::top()),
        }
    }
    /// Keep integrity; confidentiality becomes weakest.
    pub fn integrity(&self) -> LabelTerm {
        LabelTerm {
            conf: Component::Const(Fdl::top()),
            integ: self.integ.clone(),
        }
    }
    /// The label this term denotes under `values`.
    pub fn eval(&self, values: &[Label]) -> Label {
        Label::new(self.conf.eval(values), self.integ.eval(values))
    }
}

/// Which components a flow constrains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Both
    Both,
    /// Confidentiality only
    Confidentiality,
    /// Integrity only
    Integrity,
}

/// `from` flows to `to`, tagged with what to report when it fails.
#[derive(Clone, Debug)]
pub struct Constraint<T> {
    /// Source
    pub from: LabelTerm,
    /// Sink
    pub to: LabelTerm,
    /// Components constrained
    pub flow: Flow,
    /// Reported on failure
    pub tag: T,
}

/// A constraint failed at the solution.
#[derive(Clone, Debug)]
pub enum SolveError<T> {
    /// Some constraint mixes variables in a way the solver cannot normalize
    IllegalTerm(String),
    /// The greatest solution violates this constraint
    Unsatisfied {
        /// The constraint's tag
        tag: T,
        /// The evaluated source
        from: Label,
        /// The evaluated sink
        to: Label,
    },
}

/// `c ∧ left ≤ d ∨ right`
#[derive(Clone, Debug)]
struct Atomic {
    c: Fdl,
    left: Option<CompVar>,
    d: Fdl,
    right: Option<CompVar>,
}

/// A set of flows-to constraints over variables of type `V`.
#[derive(Clone, Debug)]
pub struct ConstraintSystem<V, T> {
    vars: Vec<V>,
    index: FxHashMap<V, usize>,
    constraints: Vec<Constraint<T>>,
}

impl<V: Clone + Eq + Hash + std::fmt::Debug, T: Clone> ConstraintSystem<V, T> {
    /// An empty system.
    pub fn new() -> Self {
        ConstraintSystem {
            vars: Vec::new(),
            index: FxHashMap::default(),
            constraints: Vec::new(),
        }
    }
    /// The term for variable `v`, registering it if new.
    pub fn var(&mut self, v: V) -> LabelTerm {
        let next = self.vars.len();
        let i = *self.index.entry(v.clone()).or_insert(next);
        if i == next {
            self.vars.push(v);
        }
        LabelTerm::var(i)
    }
    /// Require `from` to flow to `to` in the components `flow` selects.
    pub fn flows(&mut self, from: LabelTerm, to: LabelTerm, flow: Flow, tag: T) {
        self.constraints.push(Constraint {
            from,
            to,
            flow,
            tag,
        });
    }
    /// Number of constraints.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }
    /// Are there no constraints?
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Find the greatest solution and check every constraint against it.
    pub fn solve(&self, congruence: &Congruence) -> Result<Vec<(V, Label)>, SolveError<T>> {
        let mut atoms = Vec::new();
        for k in &self.constraints {
            // conf: to.conf ≤ from.conf; integ: from.integ ≤ to.integ
            if k.flow != Flow::Integrity {
                normalize(&k.to.conf, &k.from.conf, &mut atoms)?;
            }
            if k.flow != Flow::Confidentiality {
                normalize(&k.from.integ, &k.to.integ, &mut atoms)?;
            }
        }
        debug!(
            "solving {} constraints over {} variables ({} atomic)",
            self.constraints.len(),
            self.vars.len(),
            atoms.len()
        );

        let mut dependents: FxHashMap<CompVar, Vec<usize>> = FxHashMap::default();
        for (i, a) in atoms.iter().enumerate() {
            if let (Some(_), Some(r)) = (a.left, a.right) {
                dependents.entry(r).or_default().push(i);
            }
        }
        let mut values = vec![Label::weakest(); self.vars.len()];
        let mut queue: VecDeque<usize> = (0..atoms.len()).collect();
        let mut queued = vec![true; atoms.len()];
        while let Some(i) = queue.pop_front() {
            queued[i] = false;
            let a = &atoms[i];
            let Some(x) = a.left else { continue };
            let bound = match a.right {
                Some(r) => a.d.join(value(&values, r)),
                None => a.d.clone(),
            };
            let old = value(&values, x).clone();
            let new = old.meet(&congruence.imply(&a.c, &bound));
            if congruence.leq(&old, &new) {
                continue;
            }
            trace!("{:?}.{:?} lowered", self.vars[x.var], x.side);
            match x.side {
                Side::Conf => values[x.var].conf = new,
                Side::Integ => values[x.var].integ = new,
            }
            for &j in dependents.get(&x).map(Vec::as_slice).unwrap_or(&[]) {
                if !queued[j] {
                    queued[j] = true;
                    queue.push_back(j);
                }
            }
        }

        for k in &self.constraints {
            let from = k.from.eval(&values);
            let to = k.to.eval(&values);
            let ok = match k.flow {
                Flow::Both => from.flows_to(&to, congruence),
                Flow::Confidentiality => congruence.leq(&to.conf, &from.conf),
                Flow::Integrity => congruence.leq(&from.integ, &to.integ),
            };
            if !ok {
                return Err(SolveError::Unsatisfied {
                    tag: k.tag.clone(),
                    from,
                    to,
                });
            }
        }
        Ok(self.vars.iter().cloned().zip(values).collect())
    }
}

impl<V: Clone + Eq + Hash + std::fmt::Debug, T: Clone> Default for ConstraintSystem<V, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A join of `c ∧ x` terms.
fn lower(t: &Component) -> Result<Vec<(Fdl, Option<CompVar>)>, String> {
    Ok(match t {
        Component::Const(c) => vec![(c.clone(), None)],
        Component::Var(x) => vec![(Fdl::top(), Some(*x))],
        Component::Join(a, b) => {
            let mut out = lower(a)?;
            out.extend(lower(b)?);
            out
        }
        Component::Meet(a, b) => cross(&lower(a)?, &lower(b)?, Fdl::meet)?,
    })
}

/// A meet of `d ∨ y` terms.
fn upper(t: &Component) -> Result<Vec<(Fdl, Option<CompVar>)>, String> {
    Ok(match t {
        Component::Const(d) => vec![(d.clone(), None)],
        Component::Var(y) => vec![(Fdl::bottom(), Some(*y))],
        Component::Meet(a, b) => {
            let mut out = upper(a)?;
            out.extend(upper(b)?);
            out
        }
        Component::Join(a, b) => cross(&upper(a)?, &upper(b)?, Fdl::join)?,
    })
}

fn cross(
    xs: &[(Fdl, Option<CompVar>)],
    ys: &[(Fdl, Option<CompVar>)],
    op: impl Fn(&Fdl, &Fdl) -> Fdl,
) -> Result<Vec<(Fdl, Option<CompVar>)>, String> {
    let mut out = Vec::new();
    for (c1, x1) in xs {
        for (c2, x2) in ys {
            let x = match (x1, x2) {
                (Some(a), Some(b)) if a != b => {
                    return Err(format!("two variables {a:?} and {b:?} on one side"))
                }
                (Some(a), _) | (None, Some(a)) => Some(*a),
                (None, None) => None,
            };
            out.push((op(c1, c2), x));
        }
    }
    Ok(out)
}

fn normalize<T>(lhs: &Component, rhs: &Component, out: &mut Vec<Atomic>) -> Result<(), SolveError<T>> {
    let ls = lower(lhs).map_err(SolveError::IllegalTerm)?;
    let rs = upper(rhs).map_err(SolveError::IllegalTerm)?;
    for (c, left) in &ls {
        for (d, right) in &rs {
            out.push(Atomic {
                c: c.clone(),
                left: *left,
                d: d.clone(),
                right: *right,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::security::Atom;

    fn host(i: u32) -> Label {
        Label::new(Fdl::atom(Atom(2 * i)), Fdl::atom(Atom(2 * i + 1)))
    }

    fn solution(s: &ConstraintSystem<&'static str, u32>, c: &Congruence) -> FxHashMap<&'static str, Label> {
        s.solve(c).unwrap().into_iter().collect()
    }

    #[test]
    fn unconstrained_is_weakest() {
        let mut s: ConstraintSystem<&str, u32> = ConstraintSystem::new();
        let x = s.var("x");
        s.flows(x, LabelTerm::constant(&Label::weakest()), Flow::Both, 0);
        assert_eq!(solution(&s, &Congruence::new())["x"], Label::weakest());
    }

    #[test]
    fn chain_propagates() {
        let c = Congruence::new();
        let mut s: ConstraintSystem<&str, u32> = ConstraintSystem::new();
        let x = s.var("x");
        let y = s.var("y");
        let a = LabelTerm::constant(&host(0));
        s.flows(a.clone(), x.clone(), Flow::Both, 0);
        s.flows(x.clone(), y.clone(), Flow::Both, 1);
        s.flows(y, a, Flow::Both, 2);
        let sol = solution(&s, &c);
        assert!(sol["x"].equiv(&host(0), &c));
        assert!(sol["y"].equiv(&host(0), &c));
    }

    #[test]
    fn violation_reports_tag() {
        let c = Congruence::new();
        let mut s: ConstraintSystem<&str, u32> = ConstraintSystem::new();
        let x = s.var("x");
        s.flows(LabelTerm::constant(&host(0)), x.clone(), Flow::Both, 7);
        s.flows(x, LabelTerm::constant(&host(1)), Flow::Both, 8);
        match s.solve(&c) {
            Err(SolveError::Unsatisfied { tag, .. }) => assert_eq!(tag, 7),
            other => panic!("expected a violation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn meet_of_variables_on_the_left_is_illegal() {
        let mut s: ConstraintSystem<&str, u32> = ConstraintSystem::new();
        let x = s.var("x");
        let y = s.var("y");
        // the integrity side of x ⊓ y is a meet of two variables
        s.flows(x.meet(&y), LabelTerm::constant(&host(0)), Flow::Integrity, 0);
        assert!(matches!(
            s.solve(&Congruence::new()),
            Err(SolveError::IllegalTerm(_))
        ));
    }

    #[test]
    fn projected_flow_ignores_other_component() {
        let c = Congruence::new();
        let mut s: ConstraintSystem<&str, u32> = ConstraintSystem::new();
        let x = s.var("x");
        s.flows(
            LabelTerm::constant(&host(0)),
            x,
            Flow::Confidentiality,
            0,
        );
        let sol = solution(&s, &c);
        assert_eq!(sol["x"].integ, Fdl::top());
        assert!(c.equiv(&sol["x"].conf, &host(0).conf));
    }
}
