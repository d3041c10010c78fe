//! Deciding the lattice order modulo delegation hypotheses.
//!
//! Read atoms as propositions, meets as conjunctions and joins as disjunctions. A hypothesis
//! `l ≤ r` then says "`l` implies `r`", and `a ≤ b` holds modulo the hypotheses iff `b` is
//! entailed by `a` in positive propositional logic. Each meet of `l` becomes a rule whose
//! premise is that meet and whose conclusion is the disjunction `r`. Entailment of a meet is
//! decided by forward chaining, splitting on disjunctive conclusions.

use log::trace;

use super::lattice::{Fdl, Meet};

#[derive(Clone, Debug)]
struct Rule {
    premise: Meet,
    /// A disjunction of meets; empty means the premise is contradictory.
    conclusion: Vec<Meet>,
}

/// A set of `≤` hypotheses over the free distributive lattice.
#[derive(Clone, Debug, Default)]
pub struct Congruence {
    rules: Vec<Rule>,
}

impl Congruence {
    /// No hypotheses: the free lattice order.
    pub fn new() -> Self {
        Self::default()
    }
    /// Assume `lhs ≤ rhs`.
    pub fn assume(&mut self, lhs: &Fdl, rhs: &Fdl) {
        for premise in lhs.meets() {
            if rhs.meets().any(|n| n.is_subset(premise)) {
                continue;
            }
            self.rules.push(Rule {
                premise: premise.clone(),
                conclusion: rhs.meets().cloned().collect(),
            });
        }
    }
    /// These hypotheses together with `other`'s.
    pub fn union(&self, other: &Congruence) -> Congruence {
        let mut rules = self.rules.clone();
        rules.extend(other.rules.iter().cloned());
        Congruence { rules }
    }
    /// Is `a ≤ b` under the hypotheses?
    pub fn leq(&self, a: &Fdl, b: &Fdl) -> bool {
        a.meets().all(|m| self.entails(m.clone(), b))
    }
    /// Is `a = b` under the hypotheses?
    pub fn equiv(&self, a: &Fdl, b: &Fdl) -> bool {
        self.leq(a, b) && self.leq(b, a)
    }
    /// `a → b`, strengthened to top when `a ≤ b` holds under the hypotheses.
    pub fn imply(&self, a: &Fdl, b: &Fdl) -> Fdl {
        if self.leq(a, b) {
            Fdl::top()
        } else {
            a.imply(b)
        }
    }

    fn entails(&self, mut facts: Meet, goal: &Fdl) -> bool {
        loop {
            if goal.meets().any(|n| n.is_subset(&facts)) {
                return true;
            }
            let mut grew = false;
            let mut split: Option<&Rule> = None;
            for rule in &self.rules {
                if !rule.premise.is_subset(&facts)
                    || rule.conclusion.iter().any(|n| n.is_subset(&facts))
                {
                    continue;
                }
                match rule.conclusion.as_slice() {
                    [] => return true,
                    [only] => {
                        facts.extend(only.iter().copied());
                        grew = true;
                    }
                    _ => {
                        split.get_or_insert(rule);
                    }
                }
            }
            if grew {
                continue;
            }
            return match split {
                None => false,
                Some(rule) => {
                    trace!("case split on {} disjuncts", rule.conclusion.len());
                    rule.conclusion.iter().all(|n| {
                        let mut branch = facts.clone();
                        branch.extend(n.iter().copied());
                        self.entails(branch, goal)
                    })
                }
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::security::lattice::Atom;

    use quickcheck_macros::quickcheck;

    fn a(i: u32) -> Fdl {
        Fdl::atom(Atom(i))
    }

    #[test]
    fn transitive_chain() {
        let mut c = Congruence::new();
        c.assume(&a(0), &a(1));
        c.assume(&a(1), &a(2));
        assert!(c.leq(&a(0), &a(2)));
        assert!(!c.leq(&a(2), &a(0)));
    }

    #[test]
    fn disjunctive_hypothesis_splits() {
        // 0 ≤ 1 | 2, 1 ≤ 3, 2 ≤ 3  ⊢  0 ≤ 3
        let mut c = Congruence::new();
        c.assume(&a(0), &a(1).join(&a(2)));
        c.assume(&a(1), &a(3));
        c.assume(&a(2), &a(3));
        assert!(c.leq(&a(0), &a(3)));
        assert!(!c.leq(&a(0), &a(1)));
    }

    #[test]
    fn contradiction_proves_anything() {
        let mut c = Congruence::new();
        c.assume(&a(0).meet(&a(1)), &Fdl::bottom());
        assert!(c.leq(&a(0).meet(&a(1)), &a(4)));
        assert!(!c.leq(&a(0), &a(4)));
    }

    #[test]
    fn imply_respects_hypotheses() {
        let mut c = Congruence::new();
        c.assume(&a(0), &a(1));
        assert!(c.imply(&a(0), &a(1)).is_top());
        assert_eq!(Congruence::new().imply(&a(0), &a(1)), a(1));
    }

    #[quickcheck]
    fn no_hypotheses_is_free_order(x: Fdl, y: Fdl) -> bool {
        Congruence::new().leq(&x, &y) == x.leq(&y)
    }

    #[quickcheck]
    fn hypotheses_only_add_facts(x: Fdl, y: Fdl, l: Fdl, r: Fdl) -> bool {
        let mut c = Congruence::new();
        c.assume(&l, &r);
        !x.leq(&y) || c.leq(&x, &y)
    }
}
