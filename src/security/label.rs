//! Confidentiality/integrity labels.
//!
//! Both components live in the same free distributive lattice. Lower confidentiality means
//! more secret, lower integrity means more trusted, so `(0, 0)` is the strongest label and
//! `(1, 1)` the weakest.

use serde::{Deserialize, Serialize};

use std::fmt::{self, Display, Formatter};

use super::congruence::Congruence;
use super::lattice::Fdl;
use super::AtomTable;

/// A security label.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct Label {
    /// Who may read
    pub conf: Fdl,
    /// Who may have influenced
    pub integ: Fdl,
}

impl Label {
    /// Build from components.
    pub fn new(conf: Fdl, integ: Fdl) -> Self {
        Label { conf, integ }
    }
    /// Public and untrusted.
    pub fn weakest() -> Self {
        Label::new(Fdl::top(), Fdl::top())
    }
    /// Secret and trusted.
    pub fn strongest() -> Self {
        Label::new(Fdl::bottom(), Fdl::bottom())
    }
    /// Public and trusted: flows anywhere.
    pub fn bottom() -> Self {
        Label::new(Fdl::top(), Fdl::bottom())
    }
    /// Secret and untrusted: everything flows here.
    pub fn top() -> Self {
        Label::new(Fdl::bottom(), Fdl::top())
    }
    /// Least upper bound in the flows-to order.
    pub fn join(&self, other: &Label) -> Label {
        Label::new(self.conf.meet(&other.conf), self.integ.join(&other.integ))
    }
    /// Greatest lower bound in the flows-to order.
    pub fn meet(&self, other: &Label) -> Label {
        Label::new(self.conf.join(&other.conf), self.integ.meet(&other.integ))
    }
    /// Conjunction of authority: acts for both.
    pub fn and(&self, other: &Label) -> Label {
        Label::new(self.conf.meet(&other.conf), self.integ.meet(&other.integ))
    }
    /// Disjunction of authority: acts for either.
    pub fn or(&self, other: &Label) -> Label {
        Label::new(self.conf.join(&other.conf), self.integ.join(&other.integ))
    }
    /// Exchange the components.
    pub fn swap(&self) -> Label {
        Label::new(self.integ.clone(), self.conf.clone())
    }
    /// Just the confidentiality; integrity set to weakest.
    pub fn confidentiality(&self) -> Label {
        Label::new(self.conf.clone(), Fdl::top())
    }
    /// Just the integrity; confidentiality set to weakest.
    pub fn integrity(&self) -> Label {
        Label::new(Fdl::top(), self.integ.clone())
    }
    /// May data labelled `self` flow to a location labelled `to`?
    pub fn flows_to(&self, to: &Label, c: &Congruence) -> bool {
        c.leq(&to.conf, &self.conf) && c.leq(&self.integ, &to.integ)
    }
    /// Is `self` at least as powerful as `other`?
    pub fn acts_for(&self, other: &Label, c: &Congruence) -> bool {
        c.leq(&self.conf, &other.conf) && c.leq(&self.integ, &other.integ)
    }
    /// Equal modulo `c`.
    pub fn equiv(&self, other: &Label, c: &Congruence) -> bool {
        c.equiv(&self.conf, &other.conf) && c.equiv(&self.integ, &other.integ)
    }
    /// Render with principal names.
    pub fn display<'a>(&'a self, atoms: &'a AtomTable) -> LabelDisplay<'a> {
        LabelDisplay { label: self, atoms }
    }
}

/// [Display]s a label as `{conf; integ}`.
pub struct LabelDisplay<'a> {
    label: &'a Label,
    atoms: &'a AtomTable,
}

impl Display for LabelDisplay<'_> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{{{}; {}}}",
            self.label.conf.display(self.atoms),
            self.label.integ.display(self.atoms)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::security::lattice::Atom;

    fn host(i: u32) -> Label {
        Label::new(Fdl::atom(Atom(2 * i)), Fdl::atom(Atom(2 * i + 1)))
    }

    #[test]
    fn hosts_do_not_flow_to_each_other() {
        let c = Congruence::new();
        assert!(host(0).flows_to(&host(0), &c));
        assert!(!host(0).flows_to(&host(1), &c));
        assert!(!host(1).flows_to(&host(0), &c));
    }

    #[test]
    fn join_is_upper_bound() {
        let c = Congruence::new();
        let j = host(0).join(&host(1));
        assert!(host(0).flows_to(&j, &c));
        assert!(host(1).flows_to(&j, &c));
        assert!(!j.flows_to(&host(0), &c));
    }

    #[test]
    fn and_acts_for_both() {
        let c = Congruence::new();
        let both = host(0).and(&host(1));
        assert!(both.acts_for(&host(0), &c));
        assert!(both.acts_for(&host(1), &c));
        assert!(!host(0).acts_for(&both, &c));
        assert!(host(0).acts_for(&host(0).or(&host(1)), &c));
    }

    #[test]
    fn extremes() {
        let c = Congruence::new();
        assert!(Label::bottom().flows_to(&host(0), &c));
        assert!(host(0).flows_to(&Label::top(), &c));
        assert!(Label::strongest().acts_for(&host(0), &c));
        assert!(host(0).acts_for(&Label::weakest(), &c));
        assert_eq!(host(0).swap().swap(), host(0));
    }
}
