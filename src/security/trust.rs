//! The trust configuration of a program: what each host may be trusted with, and which
//! delegations hold between principals.

use fxhash::FxHashMap;
use log::debug;

use super::congruence::Congruence;
use super::label::Label;
use super::lattice::Fdl;
use super::{AtomTable, Principal, Side};
use crate::ir::{
    Delegation, DelegationKind, Function, LabelExpr, LabelFlow, Program, ProgramError, Projection,
};

/// Immutable per-program trust: host authorities, the atom table and the global congruence.
#[derive(Clone, Debug)]
pub struct HostTrustConfig {
    atoms: AtomTable,
    hosts: Vec<String>,
    authority: FxHashMap<String, Label>,
    congruence: Congruence,
    /// `l ≤ r` facts granted by delegations, for error reports.
    delegated: Vec<(Fdl, Fdl)>,
}

impl HostTrustConfig {
    /// Build the configuration. Interns every host and every label parameter of every function.
    pub fn new(program: &Program) -> Result<Self, ProgramError> {
        let mut atoms = AtomTable::new();
        let mut hosts: Vec<String> = Vec::new();
        for h in &program.hosts {
            if hosts.contains(&h.name) {
                return Err(ProgramError::DuplicateHost(h.name.clone()));
            }
            atoms.intern(Principal::Host(h.name.clone()));
            hosts.push(h.name.clone());
        }
        for f in &program.functions {
            for p in &f.label_params {
                atoms.intern(Principal::Param(p.clone()));
            }
        }
        hosts.sort();
        let mut config = HostTrustConfig {
            atoms,
            hosts,
            authority: FxHashMap::default(),
            congruence: Congruence::new(),
            delegated: Vec::new(),
        };
        // Every principal's integrity is below its confidentiality.
        for p in config.atoms.principals().to_vec() {
            let (c, i) = config.principal_components(&p);
            config.congruence.assume(&i, &c);
        }
        // Declared authorities refer to other hosts' own labels, never their authorities.
        let authorities = program
            .hosts
            .iter()
            .map(|h| match &h.authority {
                Some(e) => config.interpret(e),
                None => Ok(config.principal_label(&Principal::Host(h.name.clone()))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (h, label) in program.hosts.iter().zip(authorities) {
            debug!("host {} has authority {}", h.name, label.display(&config.atoms));
            config.authority.insert(h.name.clone(), label);
        }
        for d in &program.delegations {
            let from = config.interpret(&d.from)?;
            let to = config.interpret(&d.to)?;
            for (l, r) in delegation_hypotheses(d, &from, &to) {
                debug!("assume {} <= {}", l.display(&config.atoms), r.display(&config.atoms));
                config.congruence.assume(&l, &r);
                config.delegated.push((l, r));
            }
        }
        Ok(config)
    }
    /// The interned atoms.
    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }
    /// Host names, sorted.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
    /// The global congruence: default per-principal facts plus program delegations.
    pub fn congruence(&self) -> &Congruence {
        &self.congruence
    }
    /// The hypotheses delegations add on top of the per-principal defaults, rendered.
    pub fn delegation_context(&self) -> Vec<String> {
        self.delegated
            .iter()
            .map(|(l, r)| format!("{} <= {}", l.display(&self.atoms), r.display(&self.atoms)))
            .collect()
    }
    /// The authority of a host.
    pub fn host_label(&self, host: &str) -> Result<&Label, ProgramError> {
        self.authority
            .get(host)
            .ok_or_else(|| ProgramError::UnknownHost(host.to_owned()))
    }
    /// The congruence in force inside `function`: the global one, plus the function's label
    /// constraints as hypotheses.
    pub fn function_congruence(&self, function: &Function) -> Result<Congruence, ProgramError> {
        let mut c = self.congruence.clone();
        for LabelFlow { from, to } in &function.label_constraints {
            let from = self.interpret(from)?;
            let to = self.interpret(to)?;
            c.assume(&to.conf, &from.conf);
            c.assume(&from.integ, &to.integ);
        }
        Ok(c)
    }
    /// Interpret a label expression; parameters stand for themselves.
    pub fn interpret(&self, e: &LabelExpr) -> Result<Label, ProgramError> {
        self.interpret_with(e, &|_| None)
    }
    /// Interpret a label expression, replacing parameters for which `param` answers.
    pub fn interpret_with(
        &self,
        e: &LabelExpr,
        param: &impl Fn(&str) -> Option<Label>,
    ) -> Result<Label, ProgramError> {
        Ok(match e {
            LabelExpr::Host(h) => match self.authority.get(h) {
                Some(l) => l.clone(),
                None if self.hosts.contains(h) => self.principal_label(&Principal::Host(h.clone())),
                None => return Err(ProgramError::UnknownHost(h.clone())),
            },
            LabelExpr::Param(p) => match param(p) {
                Some(l) => l,
                None => {
                    let principal = Principal::Param(p.clone());
                    if self.atoms.atom(&principal, Side::Conf).is_none() {
                        return Err(ProgramError::UnknownLabelParam(p.clone()));
                    }
                    self.principal_label(&principal)
                }
            },
            LabelExpr::Conf(e) => self.interpret_with(e, param)?.confidentiality(),
            LabelExpr::Integ(e) => self.interpret_with(e, param)?.integrity(),
            LabelExpr::Join(a, b) => self
                .interpret_with(a, param)?
                .join(&self.interpret_with(b, param)?),
            LabelExpr::Meet(a, b) => self
                .interpret_with(a, param)?
                .meet(&self.interpret_with(b, param)?),
            LabelExpr::And(a, b) => self
                .interpret_with(a, param)?
                .and(&self.interpret_with(b, param)?),
            LabelExpr::Or(a, b) => self
                .interpret_with(a, param)?
                .or(&self.interpret_with(b, param)?),
            LabelExpr::Weakest => Label::weakest(),
            LabelExpr::Strongest => Label::strongest(),
            LabelExpr::Top => Label::top(),
            LabelExpr::Bottom => Label::bottom(),
            LabelExpr::Const(l) => l.clone(),
        })
    }
    /// `p`'s own label: its confidentiality and integrity atoms.
    pub fn principal_label(&self, p: &Principal) -> Label {
        let (c, i) = self.principal_components(p);
        Label::new(c, i)
    }
    fn principal_components(&self, p: &Principal) -> (Fdl, Fdl) {
        let atom = |side| {
            self.atoms
                .atom(p, side)
                .map(Fdl::atom)
                .unwrap_or_else(Fdl::top)
        };
        (atom(Side::Conf), atom(Side::Integ))
    }
    /// Does `a` act for `b` under the global congruence?
    pub fn acts_for(&self, a: &Label, b: &Label) -> bool {
        a.acts_for(b, &self.congruence)
    }
}

/// The `l ≤ r` hypotheses a delegation grants.
fn delegation_hypotheses(d: &Delegation, from: &Label, to: &Label) -> Vec<(Fdl, Fdl)> {
    let mut out = Vec::new();
    if matches!(d.projection, Projection::Confidentiality | Projection::Both) {
        out.push((to.conf.clone(), from.conf.clone()));
    }
    if matches!(d.projection, Projection::Integrity | Projection::Both) {
        out.push(match d.kind {
            DelegationKind::Authority => (to.integ.clone(), from.integ.clone()),
            DelegationKind::Flow => (from.integ.clone(), to.integ.clone()),
        });
    }
    out
}
