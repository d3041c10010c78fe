//! The intermediate representation: elaborated programs in A-normal form.
//!
//! Every intermediate value is bound by a `let` to a temporary, and every operand is
//! [Atomic]. Objects (cells and vectors) are declared explicitly and accessed only through
//! queries and updates.
//!
//! Node identifiers may be omitted from serialized programs; [build::renumber] assigns them.

pub mod build;
pub mod names;

use serde::{Deserialize, Serialize};

use std::fmt::{self, Display, Formatter};

use crate::protocol::Protocol;
use crate::security::Label;

/// Identifies a node; unique within a program after [build::renumber].
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A host name.
pub type Host = String;

/// A whole program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Participating hosts
    pub hosts: Vec<HostDecl>,
    /// Trust relationships between principals
    #[serde(default)]
    pub delegations: Vec<Delegation>,
    /// Functions; the entry point is called `main`
    pub functions: Vec<Function>,
}

impl Program {
    /// The name of the entry function.
    pub const ENTRY: &'static str = "main";

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A host declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDecl {
    /// Its name
    pub name: Host,
    /// The authority it holds; its own label if absent
    #[serde(default)]
    pub authority: Option<LabelExpr>,
}

/// What a delegation grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationKind {
    /// `to` acts for `from`
    Authority,
    /// `from` flows to `to`
    Flow,
}

/// Which components a delegation constrains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Projection {
    /// Confidentiality only
    Confidentiality,
    /// Integrity only
    Integrity,
    /// Both
    Both,
}

/// A trust declaration between principals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Authority or flow
    pub kind: DelegationKind,
    /// The delegating side
    pub from: LabelExpr,
    /// The receiving side
    pub to: LabelExpr,
    /// Which components
    pub projection: Projection,
}

/// A label expression as written in source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelExpr {
    /// The label of a host
    Host(Host),
    /// A label parameter of the enclosing function
    Param(String),
    /// Confidentiality projection
    Conf(Box<LabelExpr>),
    /// Integrity projection
    Integ(Box<LabelExpr>),
    /// Flows-to join
    Join(Box<LabelExpr>, Box<LabelExpr>),
    /// Flows-to meet
    Meet(Box<LabelExpr>, Box<LabelExpr>),
    /// Authority conjunction
    And(Box<LabelExpr>, Box<LabelExpr>),
    /// Authority disjunction
    Or(Box<LabelExpr>, Box<LabelExpr>),
    /// Public, untrusted
    Weakest,
    /// Secret, trusted
    Strongest,
    /// Secret, untrusted: everything flows here
    Top,
    /// Public, trusted: flows everywhere
    Bottom,
    /// An already-interpreted label
    Const(Label),
}

impl LabelExpr {
    /// `Host(h)`
    pub fn host(h: &str) -> Self {
        LabelExpr::Host(h.to_owned())
    }
    /// `Param(p)`
    pub fn param(p: &str) -> Self {
        LabelExpr::Param(p.to_owned())
    }
    /// `self ⊔ other`
    pub fn join(self, other: LabelExpr) -> Self {
        LabelExpr::Join(Box::new(self), Box::new(other))
    }
    /// `self ⊓ other`
    pub fn meet(self, other: LabelExpr) -> Self {
        LabelExpr::Meet(Box::new(self), Box::new(other))
    }
    /// `self & other`
    pub fn and(self, other: LabelExpr) -> Self {
        LabelExpr::And(Box::new(self), Box::new(other))
    }
    /// `self | other`
    pub fn or(self, other: LabelExpr) -> Self {
        LabelExpr::Or(Box::new(self), Box::new(other))
    }
    /// `self->`
    pub fn conf(self) -> Self {
        LabelExpr::Conf(Box::new(self))
    }
    /// `self<-`
    pub fn integ(self) -> Self {
        LabelExpr::Integ(Box::new(self))
    }
}

/// A function definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Its name
    pub name: String,
    /// Polymorphic label parameters
    #[serde(default)]
    pub label_params: Vec<String>,
    /// Object parameters
    #[serde(default)]
    pub params: Vec<Param>,
    /// Flows assumed in the body and checked at call sites
    #[serde(default)]
    pub label_constraints: Vec<LabelFlow>,
    /// The program counter label of the body
    pub pc: LabelExpr,
    /// The body
    pub body: Block,
}

/// A `from` flows to `to` requirement on label parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFlow {
    /// Source
    pub from: LabelExpr,
    /// Sink
    pub to: LabelExpr,
}

/// Whether a parameter passes data in or out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamDirection {
    /// Caller to callee
    In,
    /// Callee to caller
    Out,
}

/// The kind of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    /// A cell that is never updated
    Immutable,
    /// A cell
    Mutable,
    /// A fixed-length vector; constructed from its length
    Vector,
}

/// A function parameter. Parameters are objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// Its name
    pub name: String,
    /// In or out
    pub direction: ParamDirection,
    /// Object class
    pub class: ObjectClass,
    /// Its label
    pub label: LabelExpr,
    /// Protocol annotation
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// A sequence of statements.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// Statements
    pub stmts: Vec<Stmt>,
}

/// A statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    /// Bind a temporary
    Let(Let),
    /// Declare an object
    Decl(Decl),
    /// Mutate an object
    Update(Update),
    /// Initialize an out parameter
    OutInit(OutInit),
    /// Send a value to a host
    Output(Output),
    /// Call a function
    Call(Call),
    /// Branch
    If(If),
    /// Loop until broken out of
    Loop(Loop),
    /// Break out of a loop
    Break(Break),
    /// Assert a condition
    Assert(Assert),
    /// Nested block
    Block(Block),
}

impl Stmt {
    /// This statement's node id.
    pub fn id(&self) -> NodeId {
        match self {
            Stmt::Let(s) => s.id,
            Stmt::Decl(s) => s.id,
            Stmt::Update(s) => s.id,
            Stmt::OutInit(s) => s.id,
            Stmt::Output(s) => s.id,
            Stmt::Call(s) => s.id,
            Stmt::If(s) => s.id,
            Stmt::Loop(s) => s.id,
            Stmt::Break(s) => s.id,
            Stmt::Assert(s) => s.id,
            Stmt::Block(s) => s.id,
        }
    }
}

/// `let name = value`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Let {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The temporary
    pub name: String,
    /// Its value
    pub value: Expr,
    /// Protocol annotation
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// `val name: class{label}(args)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decl {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The object
    pub name: String,
    /// Object class
    pub class: ObjectClass,
    /// Its label; inferred if absent
    #[serde(default)]
    pub label: Option<LabelExpr>,
    /// Constructor arguments
    pub args: Vec<Atomic>,
    /// Protocol annotation
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// How an update mutates an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// Overwrite (for vectors the first argument is the index)
    Set,
    /// Combine the current value with the last argument
    Modify(Operator),
}

/// `object.op(args)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The object
    pub object: String,
    /// The update
    pub op: UpdateOp,
    /// Arguments
    pub args: Vec<Atomic>,
}

/// What an out parameter is initialized with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    /// A value, making the parameter an immutable cell
    Expr(Atomic),
    /// A freshly constructed object
    Construct {
        /// Object class
        class: ObjectClass,
        /// Constructor arguments
        args: Vec<Atomic>,
    },
}

/// `out name = init`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutInit {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The out parameter
    pub name: String,
    /// Its initializer
    pub init: Initializer,
}

/// `output message to host`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// What to send
    pub message: Atomic,
    /// Where
    pub host: Host,
}

/// An argument at a call site, matched positionally against the callee's parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// A value passed to an immutable in parameter
    Expr(Atomic),
    /// An existing object passed by reference
    ObjRef(String),
    /// `out val name`: declares a new object initialized by the callee
    OutDecl {
        /// Node id
        #[serde(default)]
        id: NodeId,
        /// The new object
        name: String,
    },
    /// Forward one of the caller's own out parameters
    OutParam(String),
}

/// `function(args)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// Callee
    pub function: String,
    /// Arguments
    pub args: Vec<CallArg>,
}

/// `if guard then else`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct If {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The condition
    pub guard: Atomic,
    /// Taken when the guard holds
    pub then: Block,
    /// Taken otherwise
    #[serde(default)]
    pub els: Block,
}

/// `loop label { body }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// Jump label
    pub label: String,
    /// Body
    pub body: Block,
}

/// `break label`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Break {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// Which loop
    pub label: String,
}

/// `assert cond`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assert {
    /// Node id
    #[serde(default)]
    pub id: NodeId,
    /// The condition
    pub cond: Atomic,
}

/// The right-hand side of a `let`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal or a temporary
    Atomic(Atomic),
    /// An operator application
    Op {
        /// The operator
        op: Operator,
        /// Operands
        args: Vec<Atomic>,
    },
    /// Read from an object
    Query {
        /// The object
        object: String,
        /// What to read
        query: QueryOp,
        /// Arguments (e.g., an index)
        args: Vec<Atomic>,
    },
    /// Lower confidentiality
    Declassify {
        /// The value
        value: Atomic,
        /// Expected label of the value; inferred if absent
        #[serde(default)]
        from: Option<LabelExpr>,
        /// Target label
        to: LabelExpr,
    },
    /// Raise integrity
    Endorse {
        /// The value
        value: Atomic,
        /// Expected label of the value
        from: LabelExpr,
        /// Target label; inferred if absent
        #[serde(default)]
        to: Option<LabelExpr>,
    },
    /// Read a value from a host
    Input {
        /// The type read
        ty: ValueType,
        /// From where
        host: Host,
    },
}

impl Expr {
    /// Temporaries read by this expression.
    pub fn reads(&self) -> impl Iterator<Item = &str> {
        let atoms: &[Atomic] = match self {
            Expr::Atomic(a) => std::slice::from_ref(a),
            Expr::Op { args, .. } | Expr::Query { args, .. } => args.as_slice(),
            Expr::Declassify { value, .. } | Expr::Endorse { value, .. } => {
                std::slice::from_ref(value)
            }
            Expr::Input { .. } => &[],
        };
        atoms.iter().filter_map(Atomic::read)
    }
}

/// What a query reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    /// The cell's value, or the element at an index
    Get,
    /// A vector's length
    Length,
}

/// An operand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atomic {
    /// A constant
    Literal {
        /// Node id
        #[serde(default)]
        id: NodeId,
        /// The constant
        value: Value,
    },
    /// A temporary
    Read(String),
}

impl Atomic {
    /// The temporary read, if any.
    pub fn read(&self) -> Option<&str> {
        match self {
            Atomic::Read(n) => Some(n),
            Atomic::Literal { .. } => None,
        }
    }
}

/// A constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Unit
    Unit,
}

/// The type of a constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// Integers
    Int,
    /// Booleans
    Bool,
    /// Unit
    Unit,
}

/// Pure operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    /// `+`
    Add,
    /// binary `-`
    Sub,
    /// unary `-`
    Neg,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `!`
    Not,
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `c ? a : b`
    Mux,
}

impl Operator {
    /// Comparisons, returning booleans.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }
    /// Boolean connectives.
    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Not)
    }
}

/// Malformed programs.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Unknown host '{0}'")]
    /// A host was used but never declared
    UnknownHost(String),
    #[error("Host '{0}' is declared twice")]
    /// A host was declared twice
    DuplicateHost(String),
    #[error("Unknown label parameter '{0}'")]
    /// A label parameter was used but never bound
    UnknownLabelParam(String),
    #[error("Unknown function '{0}'")]
    /// A function was called but never defined
    UnknownFunction(String),
    #[error("Function '{0}' is defined twice")]
    /// A function was defined twice
    DuplicateFunction(String),
    #[error("In '{function}': unknown variable '{name}'")]
    /// A name was used but not in scope
    UnknownVariable {
        /// Enclosing function
        function: String,
        /// The name
        name: String,
    },
    #[error("In '{function}': '{name}' is bound twice")]
    /// A name was bound twice in one function
    DuplicateName {
        /// Enclosing function
        function: String,
        /// The name
        name: String,
    },
    #[error("In '{function}': '{name}' is {problem}")]
    /// A name was used in the wrong way (e.g., a temporary updated like an object)
    BadUse {
        /// Enclosing function
        function: String,
        /// The name
        name: String,
        /// What went wrong
        problem: &'static str,
    },
    #[error("In '{function}': no enclosing loop labelled '{label}'")]
    /// A `break` names no enclosing loop
    UnknownLoop {
        /// Enclosing function
        function: String,
        /// The jump label
        label: String,
    },
    #[error("Call {call} to '{function}': {problem}")]
    /// A call does not match the callee's signature
    BadCall {
        /// The call site
        call: NodeId,
        /// The callee
        function: String,
        /// What went wrong
        problem: String,
    },
    #[error("No entry function 'main'")]
    /// There is no `main`
    MissingEntry,
}
