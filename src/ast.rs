//! The statement stream and expression tree that the reducer produces and
//! every later pass (preprocessor, evaluator, code generator, printer)
//! consumes.
//!
//! Shape grounded in `examples/original_source/xcomp/model.py` and
//! `ast.py`'s statement classes, generalized from the VCPU instruction
//! model `vasm::instructions` uses into the 6502 operation shape.

use crate::error::Pos;

/// A binding name, possibly namespace-qualified with `.`.
pub type Name = String;

/// The radix a numeric literal was written in, kept around (alongside the
/// parsed value) purely so the printer can re-emit it unchanged: `$0a`,
/// `%00001010` and `10` all evaluate to the same `Expr::Int`, but a
/// faithful round-trip has to reproduce the author's own spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Radix {
    Binary,
    Decimal,
    Hex,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int { pos: Pos, value: i64, radix: Radix, width_hint: Option<u16> },
    Str { pos: Pos, value: Vec<u8> },
    Name { pos: Pos, name: Name },
    CurrentAddress { pos: Pos },
    Unary { pos: Pos, op: UnaryOp, expr: Box<Expr> },
    Binary { pos: Pos, op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Int { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Name { pos, .. }
            | Expr::CurrentAddress { pos }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. } => pos.clone(),
        }
    }
}

/// Unary operators, in the order spec.md §3 lists them: negate,
/// bitwise-not, low-byte, high-byte, width-coerce-8, width-coerce-16.
/// `Width8`/`Width16` don't change the evaluated value at all; they mark
/// the expression as explicitly 8- or 16-bit so the code generator can
/// force an addressing-mode width even when the evaluated value alone
/// would admit the narrower form (spec.md §4.2: "operands syntactically
/// containing a 16-bit expression... force absolute modes").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LowByte,
    HighByte,
    Width8,
    Width16,
}

/// Binary operators: add, subtract, multiply, divide, bitwise or/and/xor.
/// (spec.md's prose calls the last one "xor-power" because the recovered
/// Python draft spells it `ExprPow` with operator glyph `^` despite the
/// implementation being plain XOR, not exponentiation; this crate uses
/// the operation it actually performs.)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Or,
    And,
    Xor,
}

/// One field of a `.struct` definition: a name and its storage width in
/// bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct StructField {
    pub pos: Pos,
    pub name: Name,
    pub width: Expr,
}

/// One formal parameter of a `.macro` definition.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroParam {
    pub pos: Pos,
    pub name: Name,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    Byte(Vec<Expr>),
    Word(Vec<Expr>),
}

/// A single reduced unit of the source: the statement stream spec.md
/// §4.1/§4.2 describes.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// A `;`-comment. `trailing` is true when it shared a physical line
    /// with a preceding statement (spec.md §3: "trailing comments attach
    /// to the previous non-trivia statement"); the printer uses this to
    /// decide whether to start a new line before re-emitting it.
    Comment { pos: Pos, text: String, trailing: bool },
    Encoding { pos: Pos, name: String },
    Segment { pos: Pos, name: String, origin: Option<Expr> },
    Include { pos: Pos, path: String },
    BinaryInclude { pos: Pos, path: String },
    ScopeBegin { pos: Pos, name: Option<Name> },
    ScopeEnd { pos: Pos },
    Define { pos: Pos, name: Name, value: Expr },
    Label { pos: Pos, name: Name },
    Storage { pos: Pos, storage: Storage },
    /// `.dim LENGTH, INIT…` — an unnamed, tiled fill; see
    /// `codegen::CodeGen::compile_dim`.
    Dim { pos: Pos, size: Expr, init: Vec<Expr> },
    /// `.var NAME, SIZE[, INIT…]` — binds `NAME` to the current offset and
    /// `NAME.size` to `SIZE`, then fills like `.dim`.
    Var { pos: Pos, name: Name, size: Expr, init: Vec<Expr> },
    Struct { pos: Pos, name: Name, offset: Option<Expr>, fields: Vec<StructField> },
    Pragma { pos: Pos, name: String, args: Vec<Expr> },
    MacroDef { pos: Pos, name: Name, params: Vec<MacroParam>, body: Vec<Statement> },
    MacroCall { pos: Pos, name: Name, args: Vec<Expr> },
    Operation { pos: Pos, mnemonic: String, hint: OperandHint, operand: Option<Expr> },
}

/// The operand *shape* the grammar recognized, short of the final
/// zeropage-vs-absolute choice the code generator makes once operand
/// widths are known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandHint {
    Implied,
    Accumulator,
    Immediate,
    Indirect,
    IndirectX,
    IndirectY,
    /// Bare expression, no index register: zeropage or absolute, decided
    /// by the evaluated width.
    Direct,
    /// Expression indexed by X: zeropage,x or absolute,x.
    DirectX,
    /// Expression indexed by Y: zeropage,y or absolute,y.
    DirectY,
}

impl Statement {
    pub fn pos(&self) -> Pos {
        match self {
            Statement::Comment { pos, .. }
            | Statement::Encoding { pos, .. }
            | Statement::Segment { pos, .. }
            | Statement::Include { pos, .. }
            | Statement::BinaryInclude { pos, .. }
            | Statement::ScopeBegin { pos, .. }
            | Statement::ScopeEnd { pos }
            | Statement::Define { pos, .. }
            | Statement::Label { pos, .. }
            | Statement::Storage { pos, .. }
            | Statement::Dim { pos, .. }
            | Statement::Var { pos, .. }
            | Statement::Struct { pos, .. }
            | Statement::Pragma { pos, .. }
            | Statement::MacroDef { pos, .. }
            | Statement::MacroCall { pos, .. }
            | Statement::Operation { pos, .. } => pos.clone(),
        }
    }
}
