//! Security labels and the trust placed in hosts.
//!
//! Labels are pairs of elements of a free distributive lattice whose generators ("atoms") are
//! the confidentiality and integrity components of principals. Atoms are interned into an
//! [AtomTable] up front, so lattice elements are sets of sets of small integers.

pub mod congruence;
pub mod label;
pub mod lattice;
pub mod trust;

pub use congruence::Congruence;
pub use label::Label;
pub use lattice::{Atom, Fdl};
pub use trust::HostTrustConfig;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display, Formatter};

/// Something that can be trusted with data: a host, or a label parameter of a function.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum Principal {
    /// A host
    Host(String),
    /// A polymorphic label parameter
    Param(String),
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Principal::Host(h) => write!(f, "{h}"),
            Principal::Param(p) => write!(f, "'{p}"),
        }
    }
}

/// One dimension of a principal's authority.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum Side {
    /// Confidentiality (`->`)
    Conf,
    /// Integrity (`<-`)
    Integ,
}

/// Interns principal components as lattice [Atom]s.
///
/// Atom `2i` is the confidentiality of principal `i`, atom `2i + 1` its integrity.
#[derive(Clone, Debug, Default)]
pub struct AtomTable {
    principals: Vec<Principal>,
    index: FxHashMap<Principal, u32>,
}

impl AtomTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }
    /// Intern `p`, returning its index.
    pub fn intern(&mut self, p: Principal) -> u32 {
        if let Some(i) = self.index.get(&p) {
            return *i;
        }
        let i = self.principals.len() as u32;
        self.principals.push(p.clone());
        self.index.insert(p, i);
        i
    }
    /// The atom for one side of `p`, if `p` is interned.
    pub fn atom(&self, p: &Principal, side: Side) -> Option<Atom> {
        self.index.get(p).map(|i| match side {
            Side::Conf => Atom(2 * i),
            Side::Integ => Atom(2 * i + 1),
        })
    }
    /// Which principal and side `a` stands for.
    pub fn resolve(&self, a: Atom) -> (&Principal, Side) {
        let side = if a.0 % 2 == 0 { Side::Conf } else { Side::Integ };
        (&self.principals[(a.0 / 2) as usize], side)
    }
    /// All interned principals, in interning order.
    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }
}
