//! Cloning polymorphic functions once per distinct label instantiation.
//!
//! Starting from `main`, every call to a function with label parameters is redirected to a
//! clone whose labels are concrete. Instantiations are compared up to the global
//! congruence. A call to a function already on the current specialization path is left
//! pointing at the unspecialized original, which is then kept as it is.

use fxhash::FxHashMap;
use log::debug;

use crate::ctx::InternalError;
use crate::ir::names::NameAnalysis;
use crate::ir::*;
use crate::security::{Fdl, HostTrustConfig, Label, Principal, Side};
use crate::util::ns::Uniquer;
use crate::util::once::OnceQueue;

use super::{InformationFlow, LabelVar, Result};

struct Job<'p> {
    original: &'p Function,
    /// Values of the original's label parameters; empty for unspecialized functions
    instance: FxHashMap<String, Label>,
    /// Original names of the functions being specialized on the way here
    path: Vec<String>,
}

struct Instance {
    callee: String,
    args: Vec<Label>,
    name: String,
}

struct Specializer<'a, 'p> {
    names: &'a NameAnalysis<'p>,
    trust: &'a HostTrustConfig,
    ifc: &'a InformationFlow,
    uniquer: Uniquer,
    queue: OnceQueue<String>,
    jobs: FxHashMap<String, Job<'p>>,
    instances: Vec<Instance>,
}

/// Specialize the program `names` was built from. Labels must already be inferred.
pub fn specialize(
    names: &NameAnalysis,
    trust: &HostTrustConfig,
    ifc: &InformationFlow,
) -> Result<Program> {
    let program = names.program();
    let main = names
        .function(Program::ENTRY)
        .map_err(|_| ProgramError::MissingEntry)?;
    let mut s = Specializer {
        names,
        trust,
        ifc,
        uniquer: Uniquer::new(program.functions.iter().map(|f| f.name.clone())),
        queue: OnceQueue::new(),
        jobs: FxHashMap::default(),
        instances: Vec::new(),
    };
    s.original(main);
    let mut functions = Vec::new();
    while let Some(name) = s.queue.pop() {
        let job = s
            .jobs
            .remove(&name)
            .ok_or_else(|| InternalError::MissingFunction(name.clone()))?;
        functions.push(s.function(name, &job)?);
    }
    debug!(
        "specialized {} functions into {}",
        program.functions.len(),
        functions.len()
    );
    Ok(Program {
        hosts: program.hosts.clone(),
        delegations: program.delegations.clone(),
        functions,
    })
}

impl<'a, 'p> Specializer<'a, 'p> {
    /// Schedule `f` unchanged.
    fn original(&mut self, f: &'p Function) {
        if self.queue.push(f.name.clone()) {
            self.jobs.insert(
                f.name.clone(),
                Job {
                    original: f,
                    instance: FxHashMap::default(),
                    path: vec![f.name.clone()],
                },
            );
        }
    }

    fn function(&mut self, name: String, job: &Job<'p>) -> Result<Function> {
        let mut f = job.original.clone();
        f.name = name;
        if !job.instance.is_empty() {
            let trust = self.trust;
            let relabel = |e: &LabelExpr| -> Result<LabelExpr> {
                let l = trust.interpret_with(e, &|p| job.instance.get(p).cloned())?;
                Ok(LabelExpr::Const(l))
            };
            f.pc = relabel(&f.pc)?;
            for p in &mut f.params {
                p.label = relabel(&p.label)?;
            }
            relabel_block(&mut f.body, &relabel)?;
            f.label_params.clear();
            f.label_constraints.clear();
        }
        self.calls(&mut f.body, job)?;
        Ok(f)
    }

    fn calls(&mut self, block: &mut Block, job: &Job<'p>) -> Result<()> {
        for s in &mut block.stmts {
            match s {
                Stmt::Call(c) => c.function = self.target(c, job)?,
                Stmt::If(i) => {
                    self.calls(&mut i.then, job)?;
                    self.calls(&mut i.els, job)?;
                }
                Stmt::Loop(l) => self.calls(&mut l.body, job)?,
                Stmt::Block(b) => self.calls(b, job)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// The function a call in `job` should go to.
    fn target(&mut self, c: &Call, job: &Job<'p>) -> Result<String> {
        let callee = self.names.function(&c.function)?;
        if callee.label_params.is_empty() || job.path.contains(&callee.name) {
            self.original(callee);
            return Ok(callee.name.clone());
        }
        let mut args = Vec::new();
        for p in &callee.label_params {
            let v = LabelVar::Polymorphic {
                param: p.clone(),
                call: c.id,
            };
            let l = self
                .ifc
                .label(&v)
                .ok_or_else(|| InternalError::MissingLabel(format!("{v:?}")))?;
            args.push(self.instantiate(l, &job.instance));
        }
        let congruence = self.trust.congruence();
        let existing = self.instances.iter().find(|i| {
            i.callee == callee.name
                && i.args.iter().zip(&args).all(|(a, b)| a.equiv(b, congruence))
        });
        if let Some(i) = existing {
            return Ok(i.name.clone());
        }
        let name = self.uniquer.mk_uniq(&callee.name);
        debug!("specializing {} as {}", callee.name, name);
        let mut path = job.path.clone();
        path.push(callee.name.clone());
        self.queue.push(name.clone());
        self.jobs.insert(
            name.clone(),
            Job {
                original: callee,
                instance: callee.label_params.iter().cloned().zip(args.iter().cloned()).collect(),
                path,
            },
        );
        self.instances.push(Instance {
            callee: callee.name.clone(),
            args,
            name: name.clone(),
        });
        Ok(name)
    }

    /// Replace the caller's own label parameters in `l` by their values in `instance`.
    fn instantiate(&self, l: &Label, instance: &FxHashMap<String, Label>) -> Label {
        if instance.is_empty() {
            return l.clone();
        }
        let atoms = self.trust.atoms();
        let sub = |a| -> Option<Fdl> {
            match atoms.resolve(a) {
                (Principal::Param(p), side) => instance.get(p).map(|v| match side {
                    Side::Conf => v.conf.clone(),
                    Side::Integ => v.integ.clone(),
                }),
                _ => None,
            }
        };
        Label::new(l.conf.substitute(&sub), l.integ.substitute(&sub))
    }
}

fn relabel_block(block: &mut Block, f: &impl Fn(&LabelExpr) -> Result<LabelExpr>) -> Result<()> {
    for s in &mut block.stmts {
        match s {
            Stmt::Let(l) => match &mut l.value {
                Expr::Declassify { from, to, .. } => {
                    if let Some(e) = from {
                        *e = f(e)?;
                    }
                    *to = f(to)?;
                }
                Expr::Endorse { from, to, .. } => {
                    *from = f(from)?;
                    if let Some(e) = to {
                        *e = f(e)?;
                    }
                }
                _ => {}
            },
            Stmt::Decl(d) => {
                if let Some(e) = &mut d.label {
                    *e = f(e)?;
                }
            }
            Stmt::If(i) => {
                relabel_block(&mut i.then, f)?;
                relabel_block(&mut i.els, f)?;
            }
            Stmt::Loop(l) => relabel_block(&mut l.body, f)?,
            Stmt::Block(b) => relabel_block(b, f)?,
            _ => {}
        }
    }
    Ok(())
}
