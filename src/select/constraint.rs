//! Propositional constraints over protocol choices.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use crate::ctx::InternalError;
use crate::ir::names::FunctionVar;
use crate::ir::{Host, NodeId};
use crate::protocol::Protocol;

use super::Assignment;

/// A formula over protocol choices, host participation and guard visibility.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum SelectionConstraint {
    /// A constant
    Literal(bool),
    /// The variable is executed by one of the protocols
    VariableIn(FunctionVar, BTreeSet<Protocol>),
    /// Both variables are executed by the same protocol
    VariableEquals(FunctionVar, FunctionVar),
    /// The host takes part in executing the statement
    Participates(NodeId, Host),
    /// The conditional's guard is revealed to the hosts running it
    GuardVisible(NodeId),
    /// Conjunction
    And(Vec<SelectionConstraint>),
    /// Disjunction
    Or(Vec<SelectionConstraint>),
    /// Implication
    Implies(Box<SelectionConstraint>, Box<SelectionConstraint>),
    /// Negation
    Not(Box<SelectionConstraint>),
}

use SelectionConstraint::*;

/// `fv` is executed by `p`.
pub fn variable_in(fv: &FunctionVar, p: &Protocol) -> SelectionConstraint {
    VariableIn(fv.clone(), std::iter::once(p.clone()).collect())
}

/// `fv` is executed by one of `ps`. False if `ps` is empty.
pub fn variable_in_set<'a>(
    fv: &FunctionVar,
    ps: impl IntoIterator<Item = &'a Protocol>,
) -> SelectionConstraint {
    let ps: BTreeSet<Protocol> = ps.into_iter().cloned().collect();
    if ps.is_empty() {
        Literal(false)
    } else {
        VariableIn(fv.clone(), ps)
    }
}

/// Conjunction, dropping trivially true conjuncts.
pub fn and(cs: impl IntoIterator<Item = SelectionConstraint>) -> SelectionConstraint {
    let mut out = Vec::new();
    for c in cs {
        match c {
            Literal(true) => {}
            Literal(false) => return Literal(false),
            And(inner) => out.extend(inner),
            c => out.push(c),
        }
    }
    match out.len() {
        0 => Literal(true),
        1 => out.pop().unwrap_or(Literal(true)),
        _ => And(out),
    }
}

/// Disjunction, dropping trivially false disjuncts.
pub fn or(cs: impl IntoIterator<Item = SelectionConstraint>) -> SelectionConstraint {
    let mut out = Vec::new();
    for c in cs {
        match c {
            Literal(false) => {}
            Literal(true) => return Literal(true),
            Or(inner) => out.extend(inner),
            c => out.push(c),
        }
    }
    match out.len() {
        0 => Literal(false),
        1 => out.pop().unwrap_or(Literal(false)),
        _ => Or(out),
    }
}

/// `a ⇒ b`
pub fn implies(a: SelectionConstraint, b: SelectionConstraint) -> SelectionConstraint {
    match (a, b) {
        (Literal(false), _) | (_, Literal(true)) => Literal(true),
        (Literal(true), b) => b,
        (a, b) => Implies(Box::new(a), Box::new(b)),
    }
}

/// `¬a`
pub fn not(a: SelectionConstraint) -> SelectionConstraint {
    match a {
        Literal(b) => Literal(!b),
        Not(inner) => *inner,
        a => Not(Box::new(a)),
    }
}

/// `a ⇔ b`
pub fn iff(a: SelectionConstraint, b: SelectionConstraint) -> SelectionConstraint {
    and([implies(a.clone(), b.clone()), implies(b, a)])
}

impl SelectionConstraint {
    /// Evaluate under a complete assignment.
    pub fn eval(&self, a: &Assignment) -> Result<bool, InternalError> {
        Ok(match self {
            Literal(b) => *b,
            VariableIn(fv, ps) => ps.contains(a.protocol(fv)?),
            VariableEquals(x, y) => a.protocol(x)? == a.protocol(y)?,
            Participates(id, h) => a.participates(*id, h),
            GuardVisible(id) => a.guard_visible(*id),
            And(cs) => {
                for c in cs {
                    if !c.eval(a)? {
                        return Ok(false);
                    }
                }
                true
            }
            Or(cs) => {
                for c in cs {
                    if c.eval(a)? {
                        return Ok(true);
                    }
                }
                false
            }
            Implies(x, y) => !x.eval(a)? || y.eval(a)?,
            Not(x) => !x.eval(a)?,
        })
    }

    /// Every function variable mentioned.
    pub fn variables(&self) -> BTreeSet<&FunctionVar> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut BTreeSet<&'a FunctionVar>) {
        match self {
            VariableIn(fv, _) => {
                out.insert(fv);
            }
            VariableEquals(x, y) => {
                out.insert(x);
                out.insert(y);
            }
            And(cs) | Or(cs) => cs.iter().for_each(|c| c.collect_variables(out)),
            Implies(x, y) => {
                x.collect_variables(out);
                y.collect_variables(out);
            }
            Not(x) => x.collect_variables(out),
            Literal(_) | Participates(..) | GuardVisible(_) => {}
        }
    }
}

fn list(f: &mut Formatter, op: &str, cs: &[SelectionConstraint]) -> fmt::Result {
    write!(f, "(")?;
    for (i, c) in cs.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{c}")?;
    }
    write!(f, ")")
}

impl Display for SelectionConstraint {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Literal(b) => write!(f, "{b}"),
            VariableIn(fv, ps) => {
                write!(f, "{fv} in {{")?;
                for (i, p) in ps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "}}")
            }
            VariableEquals(x, y) => write!(f, "{x} == {y}"),
            Participates(id, h) => write!(f, "{h}@{id}"),
            GuardVisible(id) => write!(f, "visible{id}"),
            And(cs) => list(f, "&&", cs),
            Or(cs) => list(f, "||", cs),
            Implies(x, y) => write!(f, "({x} => {y})"),
            Not(x) => write!(f, "!{x}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn x() -> FunctionVar {
        FunctionVar::new("main", "x")
    }

    #[test]
    fn connectives_simplify() {
        let v = variable_in(&x(), &Protocol::local("a"));
        assert_eq!(and([Literal(true), v.clone()]), v);
        assert_eq!(and([Literal(false), v.clone()]), Literal(false));
        assert_eq!(or([Literal(false), v.clone()]), v);
        assert_eq!(implies(Literal(true), v.clone()), v);
        assert_eq!(not(not(v.clone())), v);
        assert_eq!(variable_in_set(&x(), &[]), Literal(false));
    }

    #[test]
    fn eval() {
        let a = Protocol::local("a");
        let b = Protocol::local("b");
        let y = FunctionVar::new("main", "y");
        let mut asg = Assignment::default();
        asg.protocols.insert(x(), a.clone());
        asg.protocols.insert(y.clone(), a.clone());
        assert!(variable_in(&x(), &a).eval(&asg).unwrap());
        assert!(!variable_in(&x(), &b).eval(&asg).unwrap());
        assert!(VariableEquals(x(), y.clone()).eval(&asg).unwrap());
        assert!(iff(variable_in(&x(), &a), variable_in(&y, &a)).eval(&asg).unwrap());
        assert!(!GuardVisible(NodeId(3)).eval(&asg).unwrap());
        let z = FunctionVar::new("main", "z");
        assert!(variable_in(&z, &a).eval(&asg).is_err());
    }
}
