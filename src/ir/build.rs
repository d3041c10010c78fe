//! Constructing programs by hand, and (re)numbering their nodes.

use super::*;

use std::cell::Cell;

/// Hands out node ids while building statements.
#[derive(Debug, Default)]
pub struct Builder {
    next: Cell<u32>,
}

/// `input ty from host`
pub fn input(ty: ValueType, host: &str) -> Expr {
    Expr::Input {
        ty,
        host: host.to_owned(),
    }
}

/// `op(args)`
pub fn op(op: Operator, args: Vec<Atomic>) -> Expr {
    Expr::Op { op, args }
}

/// `object.query(args)`
pub fn query(object: &str, query: QueryOp, args: Vec<Atomic>) -> Expr {
    Expr::Query {
        object: object.to_owned(),
        query,
        args,
    }
}

/// `x.get()`
pub fn get(object: &str) -> Expr {
    query(object, QueryOp::Get, vec![])
}

/// `declassify value [from] to`
pub fn declassify(value: Atomic, from: Option<LabelExpr>, to: LabelExpr) -> Expr {
    Expr::Declassify { value, from, to }
}

/// `endorse value from [to]`
pub fn endorse(value: Atomic, from: LabelExpr, to: Option<LabelExpr>) -> Expr {
    Expr::Endorse { value, from, to }
}

/// Read a temporary.
pub fn read(name: &str) -> Atomic {
    Atomic::Read(name.to_owned())
}

impl Builder {
    /// A fresh builder.
    pub fn new() -> Self {
        Builder { next: Cell::new(1) }
    }
    /// A fresh id.
    pub fn id(&self) -> NodeId {
        let id = self.next.get();
        self.next.set(id + 1);
        NodeId(id)
    }
    /// An integer literal.
    pub fn int(&self, v: i64) -> Atomic {
        Atomic::Literal {
            id: self.id(),
            value: Value::Int(v),
        }
    }
    /// A boolean literal.
    pub fn bool(&self, v: bool) -> Atomic {
        Atomic::Literal {
            id: self.id(),
            value: Value::Bool(v),
        }
    }
    /// `let name = value`
    pub fn let_(&self, name: &str, value: Expr) -> Stmt {
        self.let_at(name, value, None)
    }
    /// `let name@protocol = value`
    pub fn let_at(&self, name: &str, value: Expr, protocol: Option<Protocol>) -> Stmt {
        Stmt::Let(Let {
            id: self.id(),
            name: name.to_owned(),
            value,
            protocol,
        })
    }
    /// `val name: class{label}(args)`
    pub fn decl(
        &self,
        name: &str,
        class: ObjectClass,
        label: Option<LabelExpr>,
        args: Vec<Atomic>,
    ) -> Stmt {
        Stmt::Decl(Decl {
            id: self.id(),
            name: name.to_owned(),
            class,
            label,
            args,
            protocol: None,
        })
    }
    /// `object.op(args)`
    pub fn update(&self, object: &str, op: UpdateOp, args: Vec<Atomic>) -> Stmt {
        Stmt::Update(Update {
            id: self.id(),
            object: object.to_owned(),
            op,
            args,
        })
    }
    /// `out name = init`
    pub fn out_init(&self, name: &str, init: Initializer) -> Stmt {
        Stmt::OutInit(OutInit {
            id: self.id(),
            name: name.to_owned(),
            init,
        })
    }
    /// `output message to host`
    pub fn output(&self, message: Atomic, host: &str) -> Stmt {
        Stmt::Output(Output {
            id: self.id(),
            message,
            host: host.to_owned(),
        })
    }
    /// `function(args)`
    pub fn call(&self, function: &str, args: Vec<CallArg>) -> Stmt {
        Stmt::Call(Call {
            id: self.id(),
            function: function.to_owned(),
            args,
        })
    }
    /// `out val name` as a call argument
    pub fn out_decl(&self, name: &str) -> CallArg {
        CallArg::OutDecl {
            id: self.id(),
            name: name.to_owned(),
        }
    }
    /// `if guard { then } else { els }`
    pub fn if_(&self, guard: Atomic, then: Vec<Stmt>, els: Vec<Stmt>) -> Stmt {
        let id = self.id();
        Stmt::If(If {
            id,
            guard,
            then: self.block(then),
            els: self.block(els),
        })
    }
    /// `loop label { body }`
    pub fn loop_(&self, label: &str, body: Vec<Stmt>) -> Stmt {
        let id = self.id();
        Stmt::Loop(Loop {
            id,
            label: label.to_owned(),
            body: self.block(body),
        })
    }
    /// `break label`
    pub fn break_(&self, label: &str) -> Stmt {
        Stmt::Break(Break {
            id: self.id(),
            label: label.to_owned(),
        })
    }
    /// `assert cond`
    pub fn assert(&self, cond: Atomic) -> Stmt {
        Stmt::Assert(Assert {
            id: self.id(),
            cond,
        })
    }
    /// `{ stmts }`
    pub fn block(&self, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.id(),
            stmts,
        }
    }
    /// A parameter.
    pub fn param(
        &self,
        name: &str,
        direction: ParamDirection,
        class: ObjectClass,
        label: LabelExpr,
    ) -> Param {
        Param {
            id: self.id(),
            name: name.to_owned(),
            direction,
            class,
            label,
            protocol: None,
        }
    }
    /// A monomorphic function.
    pub fn function(
        &self,
        name: &str,
        params: Vec<Param>,
        pc: LabelExpr,
        stmts: Vec<Stmt>,
    ) -> Function {
        Function {
            name: name.to_owned(),
            label_params: vec![],
            params,
            label_constraints: vec![],
            pc,
            body: self.block(stmts),
        }
    }
    /// The entry function; its pc is public and trusted.
    pub fn main(&self, stmts: Vec<Stmt>) -> Function {
        self.function(Program::ENTRY, vec![], LabelExpr::Bottom, stmts)
    }
}

/// Give every node of `program` a fresh, distinct id.
pub fn renumber(program: &mut Program) {
    let b = Builder::new();
    for f in &mut program.functions {
        for p in &mut f.params {
            p.id = b.id();
        }
        renumber_block(&b, &mut f.body);
    }
}

fn renumber_atomic(b: &Builder, a: &mut Atomic) {
    if let Atomic::Literal { id, .. } = a {
        *id = b.id();
    }
}

fn renumber_atomics<'a>(b: &Builder, atoms: impl IntoIterator<Item = &'a mut Atomic>) {
    for a in atoms {
        renumber_atomic(b, a);
    }
}

fn renumber_block(b: &Builder, block: &mut Block) {
    block.id = b.id();
    for s in &mut block.stmts {
        renumber_stmt(b, s);
    }
}

fn renumber_stmt(b: &Builder, s: &mut Stmt) {
    match s {
        Stmt::Let(l) => {
            l.id = b.id();
            match &mut l.value {
                Expr::Atomic(a) => renumber_atomic(b, a),
                Expr::Op { args, .. } | Expr::Query { args, .. } => renumber_atomics(b, args),
                Expr::Declassify { value, .. } | Expr::Endorse { value, .. } => {
                    renumber_atomic(b, value)
                }
                Expr::Input { .. } => {}
            }
        }
        Stmt::Decl(d) => {
            d.id = b.id();
            renumber_atomics(b, &mut d.args);
        }
        Stmt::Update(u) => {
            u.id = b.id();
            renumber_atomics(b, &mut u.args);
        }
        Stmt::OutInit(o) => {
            o.id = b.id();
            match &mut o.init {
                Initializer::Expr(a) => renumber_atomic(b, a),
                Initializer::Construct { args, .. } => renumber_atomics(b, args),
            }
        }
        Stmt::Output(o) => {
            o.id = b.id();
            renumber_atomic(b, &mut o.message);
        }
        Stmt::Call(c) => {
            c.id = b.id();
            for arg in &mut c.args {
                match arg {
                    CallArg::Expr(a) => renumber_atomic(b, a),
                    CallArg::OutDecl { id, .. } => *id = b.id(),
                    CallArg::ObjRef(_) | CallArg::OutParam(_) => {}
                }
            }
        }
        Stmt::If(i) => {
            i.id = b.id();
            renumber_atomic(b, &mut i.guard);
            renumber_block(b, &mut i.then);
            renumber_block(b, &mut i.els);
        }
        Stmt::Loop(l) => {
            l.id = b.id();
            renumber_block(b, &mut l.body);
        }
        Stmt::Break(x) => x.id = b.id(),
        Stmt::Assert(a) => {
            a.id = b.id();
            renumber_atomic(b, &mut a.cond);
        }
        Stmt::Block(block) => renumber_block(b, block),
    }
}
