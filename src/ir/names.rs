//! Name resolution: which declaration every name refers to, and who uses each declaration.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display, Formatter};

use super::*;

/// A variable of a function: the unit that protocol selection assigns a protocol to.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct FunctionVar {
    /// The function
    pub function: String,
    /// The variable
    pub var: String,
}

impl FunctionVar {
    /// Build one.
    pub fn new(function: &str, var: &str) -> Self {
        FunctionVar {
            function: function.to_owned(),
            var: var.to_owned(),
        }
    }
}

impl Display for FunctionVar {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.function, self.var)
    }
}

/// What declares a variable.
#[derive(Clone, Copy, Debug)]
pub enum Binding<'p> {
    /// A temporary
    Let(&'p Let),
    /// A local object
    Decl(&'p Decl),
    /// A parameter
    Param(&'p Param),
    /// An object declared by an `out val` argument
    OutDecl {
        /// The call
        call: &'p Call,
        /// The argument's node
        id: NodeId,
        /// The callee parameter it binds to
        param: &'p Param,
    },
}

impl<'p> Binding<'p> {
    /// The node that declares the variable.
    pub fn id(&self) -> NodeId {
        match self {
            Binding::Let(l) => l.id,
            Binding::Decl(d) => d.id,
            Binding::Param(p) => p.id,
            Binding::OutDecl { id, .. } => *id,
        }
    }
    /// The class of the object; `None` for temporaries.
    pub fn class(&self) -> Option<ObjectClass> {
        match self {
            Binding::Let(_) => None,
            Binding::Decl(d) => Some(d.class),
            Binding::Param(p) => Some(p.class),
            Binding::OutDecl { param, .. } => Some(param.class),
        }
    }
    /// The protocol annotation, if any.
    pub fn protocol(&self) -> Option<&'p crate::protocol::Protocol> {
        match self {
            Binding::Let(l) => l.protocol.as_ref(),
            Binding::Decl(d) => d.protocol.as_ref(),
            Binding::Param(p) => p.protocol.as_ref(),
            Binding::OutDecl { .. } => None,
        }
    }
}

/// A statement that uses a variable.
#[derive(Clone, Copy, Debug)]
pub enum Use<'p> {
    /// In its value
    Let(&'p Let),
    /// As a constructor argument
    Decl(&'p Decl),
    /// As an updated object, or as an argument
    Update(&'p Update),
    /// In the initializer
    OutInit(&'p OutInit),
    /// As the message
    Output(&'p Output),
    /// As an argument
    Call(&'p Call),
    /// As the guard
    If(&'p If),
    /// As the condition
    Assert(&'p Assert),
}

impl<'p> Use<'p> {
    /// Temporaries the statement reads.
    pub fn reads(&self) -> Vec<&'p str> {
        let atoms: Vec<&'p Atomic> = match *self {
            Use::Let(l) => return l.value.reads().collect(),
            Use::Decl(d) => d.args.iter().collect(),
            Use::Update(u) => u.args.iter().collect(),
            Use::OutInit(o) => match &o.init {
                Initializer::Expr(a) => vec![a],
                Initializer::Construct { args, .. } => args.iter().collect(),
            },
            Use::Output(o) => vec![&o.message],
            Use::Call(c) => c
                .args
                .iter()
                .filter_map(|a| match a {
                    CallArg::Expr(a) => Some(a),
                    _ => None,
                })
                .collect(),
            Use::If(i) => vec![&i.guard],
            Use::Assert(a) => vec![&a.cond],
        };
        atoms.into_iter().filter_map(Atomic::read).collect()
    }

    /// The variable the statement declares, if any.
    pub fn created(&self) -> Option<&'p str> {
        match *self {
            Use::Let(l) => Some(&l.name),
            Use::Decl(d) => Some(&d.name),
            _ => None,
        }
    }
}

/// Resolved names for a whole program.
pub struct NameAnalysis<'p> {
    program: &'p Program,
    functions: FxHashMap<&'p str, &'p Function>,
    bindings: FxHashMap<FunctionVar, Binding<'p>>,
    readers: FxHashMap<FunctionVar, Vec<Use<'p>>>,
    users: FxHashMap<FunctionVar, Vec<Use<'p>>>,
    loops: FxHashMap<NodeId, &'p Loop>,
}

impl<'p> NameAnalysis<'p> {
    /// Resolve every name in `program`.
    pub fn new(program: &'p Program) -> Result<Self, ProgramError> {
        let mut functions = FxHashMap::default();
        for f in &program.functions {
            if functions.insert(f.name.as_str(), f).is_some() {
                return Err(ProgramError::DuplicateFunction(f.name.clone()));
            }
        }
        let mut analysis = NameAnalysis {
            program,
            functions,
            bindings: FxHashMap::default(),
            readers: FxHashMap::default(),
            users: FxHashMap::default(),
            loops: FxHashMap::default(),
        };
        for f in &program.functions {
            let mut r = Resolver {
                analysis: &mut analysis,
                function: f,
                scopes: vec![vec![]],
                loops: vec![],
            };
            for p in &f.params {
                r.bind(&p.name, Binding::Param(p))?;
            }
            r.block(&f.body)?;
        }
        Ok(analysis)
    }
    /// The program analysed.
    pub fn program(&self) -> &'p Program {
        self.program
    }
    /// Look up a function.
    pub fn function(&self, name: &str) -> Result<&'p Function, ProgramError> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| ProgramError::UnknownFunction(name.to_owned()))
    }
    /// What declares `fv`.
    pub fn binding(&self, fv: &FunctionVar) -> Result<Binding<'p>, ProgramError> {
        self.bindings
            .get(fv)
            .copied()
            .ok_or_else(|| ProgramError::UnknownVariable {
                function: fv.function.clone(),
                name: fv.var.clone(),
            })
    }
    /// Statements reading the temporary `fv`.
    pub fn readers(&self, fv: &FunctionVar) -> &[Use<'p>] {
        self.readers.get(fv).map(Vec::as_slice).unwrap_or(&[])
    }
    /// Statements querying, updating, or passing on the object `fv`.
    pub fn users(&self, fv: &FunctionVar) -> &[Use<'p>] {
        self.users.get(fv).map(Vec::as_slice).unwrap_or(&[])
    }
    /// Updates of the object `fv`.
    pub fn updaters(&self, fv: &FunctionVar) -> impl Iterator<Item = &'p Update> + '_ {
        self.users(fv).iter().filter_map(|u| match u {
            Use::Update(u) => Some(*u),
            _ => None,
        })
    }
    /// The loop a `break` exits.
    pub fn loop_of(&self, brk: &Break) -> Option<&'p Loop> {
        self.loops.get(&brk.id).copied()
    }
    /// The callee parameter that argument `i` of `call` binds to.
    pub fn parameter(&self, call: &Call, i: usize) -> Result<&'p Param, ProgramError> {
        let callee = self.function(&call.function)?;
        callee.params.get(i).ok_or_else(|| ProgramError::BadCall {
            call: call.id,
            function: call.function.clone(),
            problem: format!("no parameter {i}"),
        })
    }
}

struct Resolver<'a, 'p> {
    analysis: &'a mut NameAnalysis<'p>,
    function: &'p Function,
    scopes: Vec<Vec<&'p str>>,
    loops: Vec<&'p Loop>,
}

impl<'a, 'p> Resolver<'a, 'p> {
    fn fv(&self, name: &str) -> FunctionVar {
        FunctionVar::new(&self.function.name, name)
    }

    fn bind(&mut self, name: &'p str, b: Binding<'p>) -> Result<(), ProgramError> {
        let fv = self.fv(name);
        if self.analysis.bindings.insert(fv, b).is_some() {
            return Err(ProgramError::DuplicateName {
                function: self.function.name.clone(),
                name: name.to_owned(),
            });
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Binding<'p>, ProgramError> {
        let unknown = || ProgramError::UnknownVariable {
            function: self.function.name.clone(),
            name: name.to_owned(),
        };
        if !self.scopes.iter().any(|s| s.contains(&name)) {
            return Err(unknown());
        }
        self.analysis.bindings.get(&self.fv(name)).copied().ok_or_else(unknown)
    }

    fn bad_use(&self, name: &str, problem: &'static str) -> ProgramError {
        ProgramError::BadUse {
            function: self.function.name.clone(),
            name: name.to_owned(),
            problem,
        }
    }

    fn read(&mut self, a: &'p Atomic, u: Use<'p>) -> Result<(), ProgramError> {
        if let Atomic::Read(name) = a {
            match self.lookup(name)? {
                Binding::Let(_) => {
                    let fv = self.fv(name);
                    self.analysis.readers.entry(fv).or_default().push(u);
                }
                _ => return Err(self.bad_use(name, "an object read as a temporary")),
            }
        }
        Ok(())
    }

    fn reads(&mut self, atoms: &'p [Atomic], u: Use<'p>) -> Result<(), ProgramError> {
        atoms.iter().try_for_each(|a| self.read(a, u))
    }

    fn object(&mut self, name: &str, u: Use<'p>) -> Result<Binding<'p>, ProgramError> {
        let b = self.lookup(name)?;
        match b {
            Binding::Let(_) => return Err(self.bad_use(name, "a temporary used as an object")),
            Binding::Param(p) if p.direction == ParamDirection::Out => {
                return Err(self.bad_use(name, "an out parameter used as an object"))
            }
            _ => {}
        }
        let fv = self.fv(name);
        self.analysis.users.entry(fv).or_default().push(u);
        Ok(b)
    }

    fn out_param(&self, name: &str) -> Result<&'p Param, ProgramError> {
        match self.lookup(name)? {
            Binding::Param(p) if p.direction == ParamDirection::Out => Ok(p),
            _ => Err(self.bad_use(name, "not an out parameter")),
        }
    }

    fn host(&self, h: &str) -> Result<(), ProgramError> {
        if self.analysis.program.hosts.iter().any(|d| d.name == h) {
            Ok(())
        } else {
            Err(ProgramError::UnknownHost(h.to_owned()))
        }
    }

    fn block(&mut self, block: &'p Block) -> Result<(), ProgramError> {
        self.scopes.push(vec![]);
        for s in &block.stmts {
            self.stmt(s)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, s: &'p Stmt) -> Result<(), ProgramError> {
        match s {
            Stmt::Let(l) => {
                let u = Use::Let(l);
                match &l.value {
                    Expr::Atomic(a) => self.read(a, u)?,
                    Expr::Op { args, .. } => self.reads(args, u)?,
                    Expr::Query { object, args, .. } => {
                        self.object(object, u)?;
                        self.reads(args, u)?;
                    }
                    Expr::Declassify { value, .. } | Expr::Endorse { value, .. } => {
                        self.read(value, u)?
                    }
                    Expr::Input { host, .. } => self.host(host)?,
                }
                self.bind(&l.name, Binding::Let(l))?;
            }
            Stmt::Decl(d) => {
                self.reads(&d.args, Use::Decl(d))?;
                self.bind(&d.name, Binding::Decl(d))?;
            }
            Stmt::Update(u) => {
                self.object(&u.object, Use::Update(u))?;
                self.reads(&u.args, Use::Update(u))?;
            }
            Stmt::OutInit(o) => {
                self.out_param(&o.name)?;
                match &o.init {
                    Initializer::Expr(a) => self.read(a, Use::OutInit(o))?,
                    Initializer::Construct { args, .. } => self.reads(args, Use::OutInit(o))?,
                }
            }
            Stmt::Output(o) => {
                self.host(&o.host)?;
                self.read(&o.message, Use::Output(o))?;
            }
            Stmt::Call(c) => self.call(c)?,
            Stmt::If(i) => {
                self.read(&i.guard, Use::If(i))?;
                self.block(&i.then)?;
                self.block(&i.els)?;
            }
            Stmt::Loop(l) => {
                self.loops.push(l);
                self.block(&l.body)?;
                self.loops.pop();
            }
            Stmt::Break(b) => {
                let target = self
                    .loops
                    .iter()
                    .rev()
                    .find(|l| l.label == b.label)
                    .copied()
                    .ok_or_else(|| ProgramError::UnknownLoop {
                        function: self.function.name.clone(),
                        label: b.label.clone(),
                    })?;
                self.analysis.loops.insert(b.id, target);
            }
            Stmt::Assert(a) => self.read(&a.cond, Use::Assert(a))?,
            Stmt::Block(b) => self.block(b)?,
        }
        Ok(())
    }

    fn call(&mut self, c: &'p Call) -> Result<(), ProgramError> {
        let callee = self.analysis.function(&c.function)?;
        let bad = |problem: String| ProgramError::BadCall {
            call: c.id,
            function: c.function.clone(),
            problem,
        };
        if callee.params.len() != c.args.len() {
            return Err(bad(format!(
                "expected {} arguments, got {}",
                callee.params.len(),
                c.args.len()
            )));
        }
        let mut declared = Vec::new();
        for (i, (arg, param)) in c.args.iter().zip(&callee.params).enumerate() {
            let direction_ok = match arg {
                CallArg::Expr(a) => {
                    self.read(a, Use::Call(c))?;
                    param.direction == ParamDirection::In && param.class == ObjectClass::Immutable
                }
                CallArg::ObjRef(name) => {
                    self.object(name, Use::Call(c))?;
                    param.direction == ParamDirection::In
                }
                CallArg::OutDecl { id, name } => {
                    declared.push((
                        name.as_str(),
                        Binding::OutDecl {
                            call: c,
                            id: *id,
                            param,
                        },
                    ));
                    param.direction == ParamDirection::Out
                }
                CallArg::OutParam(name) => {
                    self.out_param(name)?;
                    param.direction == ParamDirection::Out
                }
            };
            if !direction_ok {
                return Err(bad(format!(
                    "argument {i} does not match parameter '{}'",
                    param.name
                )));
            }
        }
        // Objects declared by the call are in scope after it.
        for (name, b) in declared {
            self.bind(name, b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::*;

    fn hosts() -> Vec<HostDecl> {
        vec![HostDecl {
            name: "alice".into(),
            authority: None,
        }]
    }

    fn program(functions: Vec<Function>) -> Program {
        Program {
            hosts: hosts(),
            delegations: vec![],
            functions,
        }
    }

    #[test]
    fn readers_and_users() {
        let b = Builder::new();
        let one = b.int(1);
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.decl("c", ObjectClass::Mutable, None, vec![read("x")]),
            b.update("c", UpdateOp::Set, vec![one]),
            b.let_("y", get("c")),
            b.output(read("y"), "alice"),
        ]);
        let p = program(vec![main]);
        let names = NameAnalysis::new(&p).unwrap();
        let x = FunctionVar::new("main", "x");
        let c = FunctionVar::new("main", "c");
        assert_eq!(names.readers(&x).len(), 1);
        assert!(matches!(names.readers(&x)[0], Use::Decl(_)));
        assert_eq!(names.users(&c).len(), 2);
        assert_eq!(names.updaters(&c).count(), 1);
        assert!(matches!(names.binding(&c), Ok(Binding::Decl(_))));
    }

    #[test]
    fn out_of_scope_read() {
        let b = Builder::new();
        let t = b.bool(true);
        let main = b.main(vec![
            b.if_(t, vec![b.let_("x", input(ValueType::Int, "alice"))], vec![]),
            b.output(read("x"), "alice"),
        ]);
        let p = program(vec![main]);
        assert!(matches!(
            NameAnalysis::new(&p),
            Err(ProgramError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn temporaries_are_not_objects() {
        let b = Builder::new();
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.let_("y", get("x")),
        ]);
        let p = program(vec![main]);
        assert!(matches!(
            NameAnalysis::new(&p),
            Err(ProgramError::BadUse { .. })
        ));
    }

    #[test]
    fn break_resolves_to_loop() {
        let b = Builder::new();
        let main = b.main(vec![b.loop_("l", vec![b.break_("l")])]);
        let p = program(vec![main]);
        let names = NameAnalysis::new(&p).unwrap();
        let Stmt::Loop(l) = &p.functions[0].body.stmts[0] else { panic!() };
        let Stmt::Break(brk) = &l.body.stmts[0] else { panic!() };
        assert_eq!(names.loop_of(brk).map(|l| l.id), Some(l.id));
    }

    #[test]
    fn call_arity() {
        let b = Builder::new();
        let one = b.int(1);
        let param = b.param(
            "a",
            ParamDirection::In,
            ObjectClass::Immutable,
            LabelExpr::host("alice"),
        );
        let f = b.function("f", vec![param], LabelExpr::Bottom, vec![]);
        let main = b.main(vec![b.call("f", vec![CallArg::Expr(one.clone()), CallArg::Expr(one)])]);
        let p = program(vec![main, f]);
        assert!(matches!(
            NameAnalysis::new(&p),
            Err(ProgramError::BadCall { .. })
        ));
    }
}
