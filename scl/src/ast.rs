//! Abstract syntax tree.
//!
//! A closed family of tagged variants per category, consumed with
//! exhaustive matches by both the interpreter and the code generator.
use std::fmt;

use smol_str::SmolStr;

use crate::error::Pos;

/// Declared storage type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    U32,
    I32,
    /// 32-bit byte address into the simulated memory.
    Ptr,
}

impl Ty {
    /// Result type when two operands meet in an arithmetic context:
    /// `int32` on either side makes the operation signed.
    #[inline]
    pub fn combine(self, other: Ty) -> Ty {
        if self == Ty::I32 || other == Ty::I32 {
            Ty::I32
        } else {
            Ty::U32
        }
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        self == Ty::I32
    }
}

/// Root node: an ordered list of top-level definitions.
#[derive(Debug)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &FuncDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Func(func) => Some(func),
            Item::Global(_) => None,
        })
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.items.iter().filter_map(|item| match item {
            Item::Global(global) => Some(global),
            Item::Func(_) => None,
        })
    }
}

#[derive(Debug)]
pub enum Item {
    Func(FuncDef),
    Global(Global),
}

/// File-scope variable, array or pointer declaration.
#[derive(Debug)]
pub enum Global {
    Var(VarDecl),
    Array(ArrayDecl),
    Ptr(PtrDecl),
}

#[derive(Debug)]
pub struct FuncDef {
    pub name: SmolStr,
    pub params: Vec<SmolStr>,
    pub body: Block,
    /// Declared with the `interrupt` qualifier. Never scheduled
    /// automatically; runs only when called.
    pub interrupt: bool,
    pub pos: Pos,
}

#[derive(Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// Scalar declaration: `[register|volatile] uint32|int32 name [= expr];`
#[derive(Debug)]
pub struct VarDecl {
    pub name: SmolStr,
    pub ty: Ty,
    pub init: Option<Expr>,
    pub volatile: bool,
    /// Hardware register slot for `register`-qualified variables.
    pub register: Option<u8>,
    pub pos: Pos,
}

/// Array declaration: `uint32 name[len] [= { e, ... }];`
///
/// The length is an integer literal; both back ends need a static size.
#[derive(Debug)]
pub struct ArrayDecl {
    pub name: SmolStr,
    pub ty: Ty,
    pub len: u32,
    pub init: Option<Vec<Expr>>,
    pub volatile: bool,
    pub pos: Pos,
}

/// Pointer declaration: `uint32* name [= expr];`
#[derive(Debug)]
pub struct PtrDecl {
    pub name: SmolStr,
    pub init: Option<Expr>,
    pub volatile: bool,
    pub pos: Pos,
}

#[derive(Debug)]
pub enum Stmt {
    Var(VarDecl),
    Array(ArrayDecl),
    Ptr(PtrDecl),
    Assign {
        target: LValue,
        value: Expr,
        pos: Pos,
    },
    /// `target op= value`, e.g. `x += 1`.
    CompoundAssign {
        target: LValue,
        op: BinOp,
        value: Expr,
        pos: Pos,
    },
    /// `++name;` / `name++;` — statement form only.
    Incr { name: SmolStr, pos: Pos },
    Decr { name: SmolStr, pos: Pos },
    Call(FuncCall),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        pos: Pos,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        pos: Pos,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
        pos: Pos,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Box<Stmt>,
        pos: Pos,
    },
    Return { value: Option<Expr>, pos: Pos },
    Break { pos: Pos },
    Continue { pos: Pos },
    Block(Block),
    /// Inline assembly, opaque to the language.
    Asm { body: String, pos: Pos },
}

/// Storage location legal on the left of an assignment.
#[derive(Debug)]
pub enum LValue {
    Name { name: SmolStr, pos: Pos },
    Index {
        name: SmolStr,
        index: Expr,
        pos: Pos,
    },
    Deref { addr: Expr, pos: Pos },
}

impl LValue {
    pub fn pos(&self) -> &Pos {
        match self {
            LValue::Name { pos, .. } => pos,
            LValue::Index { pos, .. } => pos,
            LValue::Deref { pos, .. } => pos,
        }
    }
}

#[derive(Debug)]
pub struct FuncCall {
    pub name: SmolStr,
    pub args: Vec<Expr>,
    pub pos: Pos,
}

#[derive(Debug)]
pub enum Expr {
    Literal { value: u32, pos: Pos },
    Ident { name: SmolStr, pos: Pos },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        pos: Pos,
    },
    Call(FuncCall),
    /// `name[index]` — the base must name an array.
    Index {
        name: SmolStr,
        index: Box<Expr>,
        pos: Pos,
    },
    /// `&lvalue`.
    AddrOf { target: Box<LValue>, pos: Pos },
    /// `*addr`.
    Deref { addr: Box<Expr>, pos: Pos },
}

impl Expr {
    pub fn pos(&self) -> &Pos {
        match self {
            Expr::Literal { pos, .. } => pos,
            Expr::Ident { pos, .. } => pos,
            Expr::Binary { pos, .. } => pos,
            Expr::Unary { pos, .. } => pos,
            Expr::Call(call) => &call.pos,
            Expr::Index { pos, .. } => pos,
            Expr::AddrOf { pos, .. } => pos,
            Expr::Deref { pos, .. } => pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for BinOp {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BinOp as B;
        match self {
            B::Add        => write!(f, "+"),
            B::Sub        => write!(f, "-"),
            B::Mul        => write!(f, "*"),
            B::Div        => write!(f, "/"),
            B::Rem        => write!(f, "%"),
            B::BitAnd     => write!(f, "&"),
            B::BitOr      => write!(f, "|"),
            B::BitXor     => write!(f, "^"),
            B::Shl        => write!(f, "<<"),
            B::Shr        => write!(f, ">>"),
            B::LogicalAnd => write!(f, "&&"),
            B::LogicalOr  => write!(f, "||"),
            B::Eq         => write!(f, "=="),
            B::Ne         => write!(f, "!="),
            B::Lt         => write!(f, "<"),
            B::Le         => write!(f, "<="),
            B::Gt         => write!(f, ">"),
            B::Ge         => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical not `!`.
    Not,
    /// Bitwise not `~`.
    BitNot,
    /// Two's-complement negation `-`.
    Neg,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "!"),
            UnOp::BitNot => write!(f, "~"),
            UnOp::Neg => write!(f, "-"),
        }
    }
}
