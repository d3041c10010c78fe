//! The free distributive lattice over interned atoms.
//!
//! An element is kept in disjunctive normal form: a join of meets of atoms, where no meet is a
//! superset of another (such a meet would be absorbed). This form is canonical, so syntactic
//! equality is lattice equality in the *free* lattice. Equality modulo delegations is the job
//! of [super::Congruence].

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use super::{AtomTable, Side};

/// A lattice generator. See [AtomTable].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct Atom(pub u32);

/// A meet of atoms. The empty meet is top.
pub type Meet = BTreeSet<Atom>;

/// An element of the free distributive lattice: a join of meets. The empty join is bottom.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct Fdl {
    joins: BTreeSet<Meet>,
}

impl Fdl {
    /// The greatest element.
    pub fn top() -> Self {
        Fdl {
            joins: std::iter::once(Meet::new()).collect(),
        }
    }
    /// The least element.
    pub fn bottom() -> Self {
        Fdl {
            joins: BTreeSet::new(),
        }
    }
    /// A single generator.
    pub fn atom(a: Atom) -> Self {
        Fdl {
            joins: std::iter::once(std::iter::once(a).collect()).collect(),
        }
    }
    /// Build an element from arbitrary meets, dropping absorbed ones.
    pub fn from_meets(meets: impl IntoIterator<Item = Meet>) -> Self {
        let mut meets: Vec<Meet> = meets.into_iter().collect();
        // Smaller meets absorb their supersets, so visit them first.
        meets.sort_by_key(|m| m.len());
        let mut joins: BTreeSet<Meet> = BTreeSet::new();
        for m in meets {
            if !joins.iter().any(|kept| kept.is_subset(&m)) {
                joins.insert(m);
            }
        }
        Fdl { joins }
    }
    /// The meets whose join this is.
    pub fn meets(&self) -> impl Iterator<Item = &Meet> {
        self.joins.iter()
    }
    /// Is this top?
    pub fn is_top(&self) -> bool {
        self.joins.iter().any(|m| m.is_empty())
    }
    /// Is this bottom?
    pub fn is_bottom(&self) -> bool {
        self.joins.is_empty()
    }
    /// Least upper bound.
    pub fn join(&self, other: &Fdl) -> Fdl {
        Fdl::from_meets(self.joins.iter().chain(other.joins.iter()).cloned())
    }
    /// Greatest lower bound.
    pub fn meet(&self, other: &Fdl) -> Fdl {
        Fdl::from_meets(
            self.joins
                .iter()
                .flat_map(|a| other.joins.iter().map(move |b| a.union(b).copied().collect())),
        )
    }
    /// The order of the free lattice: every meet here is below some meet of `other`.
    pub fn leq(&self, other: &Fdl) -> bool {
        self.joins
            .iter()
            .all(|m| other.joins.iter().any(|n| n.is_subset(m)))
    }
    /// Relative pseudo-complement `self → other`.
    ///
    /// For a join of meets `M`, this is the meet over `M` of the join over meets `N` of
    /// `other` of `N \ M`: the weakest element that, met with `self`, lands below `other`.
    pub fn imply(&self, other: &Fdl) -> Fdl {
        self.joins.iter().fold(Fdl::top(), |acc, m| {
            let residual =
                Fdl::from_meets(other.joins.iter().map(|n| n.difference(m).copied().collect()));
            acc.meet(&residual)
        })
    }
    /// Replace atoms by lattice elements. Atoms mapped to `None` are kept.
    pub fn substitute(&self, f: &impl Fn(Atom) -> Option<Fdl>) -> Fdl {
        self.joins.iter().fold(Fdl::bottom(), |acc, m| {
            let meet = m.iter().fold(Fdl::top(), |acc, a| {
                acc.meet(&f(*a).unwrap_or_else(|| Fdl::atom(*a)))
            });
            acc.join(&meet)
        })
    }
    /// Every atom mentioned.
    pub fn atoms(&self) -> BTreeSet<Atom> {
        self.joins.iter().flatten().copied().collect()
    }
    /// Render with principal names.
    pub fn display<'a>(&'a self, atoms: &'a AtomTable) -> FdlDisplay<'a> {
        FdlDisplay { fdl: self, atoms }
    }
}

/// [Display]s a lattice element with principal names.
pub struct FdlDisplay<'a> {
    fdl: &'a Fdl,
    atoms: &'a AtomTable,
}

impl Display for FdlDisplay<'_> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.fdl.is_bottom() {
            return write!(f, "0");
        }
        if self.fdl.is_top() {
            return write!(f, "1");
        }
        for (i, m) in self.fdl.joins.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            for (j, a) in m.iter().enumerate() {
                if j > 0 {
                    write!(f, " & ")?;
                }
                let (p, side) = self.atoms.resolve(*a);
                match side {
                    Side::Conf => write!(f, "{p}->")?,
                    Side::Integ => write!(f, "{p}<-")?,
                }
            }
        }
        Ok(())
    }
}
