//! Expression evaluator: the scope-stack symbol table, deferred
//! ("fixup") expressions, and the `eval`/`get_expr_bytes` entry points the
//! code generator drives.
//!
//! Grounded in `examples/original_source/xcomp/eval.py`'s `Evaluator`
//! class and confirmed against `test_eval.py`'s literal scope-stack
//! dictionary assertions (qualified names are dotted strings stored flat
//! in each scope's `HashMap`, not nested maps). Cyclic-reference detection
//! there relies on Python's catchable `RecursionError`; Rust has no
//! catchable stack overflow, so this uses an explicit in-progress name set
//! instead (see `Evaluator::eval_name`).

use std::collections::{HashMap, HashSet};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{Error, Pos, Result};

#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    Expr(Expr),
    Fixup(Box<Fixup>),
}

/// A deferred expression: captures the scope stack as it stood at the
/// point of reference, so it can be evaluated later (once forward
/// references resolve) against the bindings that were actually visible
/// there, not whatever happens to be in scope when the fixup queue is
/// drained.
#[derive(Clone, Debug)]
pub struct Fixup {
    pub pos: Pos,
    scope_stack: Vec<HashMap<String, Value>>,
    pub expr: Expr,
}

type Scope = HashMap<String, Value>;

pub struct Evaluator {
    pub encoding: String,
    scope_stack: Vec<Scope>,
    namespace_stack: Vec<Option<String>>,
    in_progress: HashSet<String>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator {
            encoding: "ascii".to_owned(),
            scope_stack: Vec::new(),
            namespace_stack: Vec::new(),
            in_progress: HashSet::new(),
        }
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator::default()
    }

    pub fn start_scope(&mut self, namespace: Option<String>) {
        self.scope_stack.push(Scope::new());
        self.namespace_stack.push(namespace);
    }

    /// Pops the innermost scope. When `merge` is true its bindings are
    /// folded into the new top scope (used by named `.scope` blocks, whose
    /// qualified names should remain visible after the block closes).
    pub fn end_scope(&mut self, merge: bool) {
        let head = self.scope_stack.pop().expect("end_scope without a matching start_scope");
        self.namespace_stack.pop();
        if merge {
            if let Some(parent) = self.scope_stack.last_mut() {
                parent.extend(head);
            }
        }
    }

    /// True if the innermost scope was opened with a namespace (a named
    /// `.scope`), as opposed to an anonymous one (macro expansion). The
    /// code generator uses this to decide whether a closing scope's
    /// bindings should merge into its parent.
    pub fn current_namespace_is_some(&self) -> bool {
        matches!(self.namespace_stack.last(), Some(Some(_)))
    }

    fn active_namespace(&self) -> Vec<&str> {
        self.namespace_stack.iter().filter_map(|n| n.as_deref()).collect()
    }

    /// Binds `name` in the current scope under its namespace-qualified
    /// key. Fails if that exact qualified key is already bound in this
    /// scope frame.
    pub fn add_name(&mut self, pos: Pos, name: &str, value: Value) -> Result<()> {
        let mut parts = self.active_namespace();
        parts.push(name);
        let qualified = parts.join(".");
        let scope = self.scope_stack.last_mut().expect("add_name outside any scope");
        if scope.contains_key(&qualified) {
            return Err(Error::DuplicateName { pos, name: qualified });
        }
        scope.insert(qualified, value);
        Ok(())
    }

    /// Rebinds the unqualified `*` name to the current program counter in
    /// the outermost scope. Called by the code generator before evaluating
    /// any expression, since `*` changes with every emitted byte and must
    /// not trip the `add_name` duplicate check that ordinary bindings do.
    pub fn set_current_address(&mut self, address: i64) {
        let scope = self.scope_stack.first_mut().expect("global scope must exist");
        scope.insert("*".to_owned(), Value::Int(address));
    }

    /// Captures a fixup around `expr`, snapshotting the current scope
    /// stack so it can be retried later with the bindings visible here.
    pub fn make_fixup(&self, expr: Expr) -> Value {
        Value::Fixup(Box::new(self.capture_fixup(expr)))
    }

    /// Snapshots the current scope stack around `expr` without wrapping it
    /// as a bound `Value`. Used by the code generator to hold a pending
    /// write (an operand or storage item it could not evaluate on first
    /// sight) until a later resolution pass.
    pub fn capture_fixup(&self, expr: Expr) -> Fixup {
        Fixup { pos: expr.pos(), scope_stack: self.scope_stack.clone(), expr }
    }

    /// Retries a previously captured fixup against the scope it was
    /// captured in, not whatever scope happens to be active now.
    pub fn resolve_fixup(&mut self, fixup: &Fixup) -> Result<Value> {
        let saved = std::mem::replace(&mut self.scope_stack, fixup.scope_stack.clone());
        let result = self.eval(&fixup.expr);
        self.scope_stack = saved;
        result
    }

    /// Like [`Evaluator::resolve_fixup`] but also renders the result to
    /// bytes, mirroring [`Evaluator::get_expr_bytes`].
    pub fn resolve_fixup_bytes(&mut self, fixup: &Fixup) -> Result<(Value, Vec<u8>)> {
        let saved = std::mem::replace(&mut self.scope_stack, fixup.scope_stack.clone());
        let result = self.get_expr_bytes(&fixup.expr);
        self.scope_stack = saved;
        result
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scope_stack.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Str { value, .. } => Ok(Value::Bytes(value.clone())),
            Expr::CurrentAddress { .. } => self.eval_name(expr.pos(), "*"),
            Expr::Name { pos, name } => self.eval_name(pos.clone(), name),
            Expr::Unary { pos, op, expr: inner } => self.eval_unary(pos.clone(), *op, inner),
            Expr::Binary { pos, op, lhs, rhs } => self.eval_binary(pos.clone(), *op, lhs, rhs),
        }
    }

    fn eval_name(&mut self, pos: Pos, name: &str) -> Result<Value> {
        if self.in_progress.contains(name) {
            return Err(Error::CyclicReference { pos });
        }
        let bound = self
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedName { pos: pos.clone(), name: name.to_owned() })?;
        self.in_progress.insert(name.to_owned());
        let result = self.eval_value(bound);
        self.in_progress.remove(name);
        result
    }

    fn eval_value(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Int(_) | Value::Bytes(_) => Ok(value),
            Value::Expr(expr) => self.eval(&expr),
            Value::Fixup(fixup) => {
                let saved = std::mem::replace(&mut self.scope_stack, fixup.scope_stack.clone());
                let result = self.eval(&fixup.expr);
                self.scope_stack = saved;
                result
            }
        }
    }

    fn eval_unary(&mut self, pos: Pos, op: UnaryOp, expr: &Expr) -> Result<Value> {
        let evaluated = self.eval(expr)?;
        let value = self.as_int(pos, evaluated)?;
        let result = match op {
            UnaryOp::Neg => -value,
            UnaryOp::LowByte => value & 0xff,
            UnaryOp::HighByte => (value >> 8) & 0xff,
            // Bitwise-not masks to the operand's own width: an 8-bit
            // value's complement stays an 8-bit value, a 16-bit value's a
            // 16-bit one.
            UnaryOp::BitNot => {
                if (0..=0xff).contains(&value) || (-0x80..0).contains(&value) {
                    !value & 0xff
                } else {
                    !value & 0xffff
                }
            }
            // Width8/Width16 only mark the expression for the code
            // generator's addressing-mode selection; the value itself is
            // unchanged.
            UnaryOp::Width8 | UnaryOp::Width16 => value,
        };
        Ok(Value::Int(result))
    }

    fn eval_binary(&mut self, pos: Pos, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
        let lhs_value = self.eval(lhs)?;
        let a = self.as_int(pos.clone(), lhs_value)?;
        let rhs_value = self.eval(rhs)?;
        let b = self.as_int(pos, rhs_value)?;
        let result = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).unwrap_or(0),
            BinaryOp::Or => a | b,
            BinaryOp::And => a & b,
            BinaryOp::Xor => a ^ b,
        };
        Ok(Value::Int(result))
    }

    fn as_int(&self, pos: Pos, value: Value) -> Result<i64> {
        match value {
            Value::Int(v) => Ok(v),
            _ => Err(Error::ParseError { pos, message: "expected a numeric value".to_owned() }),
        }
    }

    /// Evaluates `expr` and renders it to its little-endian byte
    /// representation: one byte if it fits in `u8`, two otherwise.
    /// Strings are encoded per `self.encoding`.
    pub fn get_expr_bytes(&mut self, expr: &Expr) -> Result<(Value, Vec<u8>)> {
        let value = self.eval(expr)?;
        let bytes = match &value {
            Value::Int(v) => {
                if (0..=0xff).contains(v) || (-0x80..0).contains(v) {
                    vec![(*v & 0xff) as u8]
                } else {
                    vec![(*v & 0xff) as u8, ((*v >> 8) & 0xff) as u8]
                }
            }
            Value::Bytes(b) => encode(b, &self.encoding, expr.pos())?,
            Value::Expr(_) | Value::Fixup(_) => unreachable!("eval() never returns an unevaluated value"),
        };
        Ok((value, bytes))
    }
}

/// PETSCII/ASCII string encoding. No codec crate appears anywhere in the
/// example corpus, so these tables are hand-rolled domain logic rather
/// than an ambient-stack dependency. Source text is UTF-8 (the reducer
/// stores string literals as their raw UTF-8 bytes), so encoding has to
/// work over `char`s, not bytes: a handful of non-ASCII glyphs the C64
/// charset gives its own codes to (`£`, `π`, `←`, `↑`) are multi-byte in
/// UTF-8 but single bytes in PETSCII.
fn encode(bytes: &[u8], encoding: &str, pos: Pos) -> Result<Vec<u8>> {
    match encoding {
        "ascii" | "utf-8" => Ok(bytes.to_vec()),
        "petscii" | "petscii-c64en-uc" => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| Error::EncodingError { pos: pos.clone(), message: "invalid UTF-8 in string literal".to_owned() })?;
            text.chars()
                .map(|c| char_to_petscii(c).ok_or_else(|| Error::EncodingError {
                    pos: pos.clone(),
                    message: format!("character '{}' has no petscii-c64en-uc encoding", c),
                }))
                .collect()
        }
        other => Err(Error::InvalidEncoding { pos, name: other.to_owned() }),
    }
}

/// Maps a Unicode scalar onto the unshifted ("uppercase") PETSCII code
/// used by the Commodore 64 screen/keyboard charset: ASCII letters swap
/// case (lowercase becomes PETSCII's primary alphabetic range, uppercase
/// moves to PETSCII's 0xC0 range), plain ASCII otherwise passes through
/// unchanged, and the handful of glyphs the C64 font substitutes for
/// punctuation positions (`£` for backslash, `↑` for caret, `←` for
/// underscore, `π` at the top of the graphics range) are mapped
/// explicitly.
fn char_to_petscii(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 0x41),
        'A'..='Z' => Some(c as u8 - b'A' + 0xc1),
        '£' => Some(0x5c),
        '↑' => Some(0x5e),
        '←' => Some(0x5f),
        'π' => Some(0xff),
        c if c.is_ascii() => Some(c as u8),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Radix;

    fn pos() -> Pos {
        Pos::synthetic()
    }

    fn int(v: i64) -> Expr {
        Expr::Int { pos: pos(), value: v, radix: Radix::Decimal, width_hint: None }
    }

    fn name(n: &str) -> Expr {
        Expr::Name { pos: pos(), name: n.to_owned() }
    }

    #[test]
    fn evaluates_literal_int() {
        let mut ev = Evaluator::new();
        assert!(matches!(ev.eval(&int(42)).unwrap(), Value::Int(42)));
    }

    #[test]
    fn qualified_name_lookup_requires_full_key() {
        let mut ev = Evaluator::new();
        ev.start_scope(Some("ns".to_owned()));
        ev.add_name(pos(), "x", Value::Int(5)).unwrap();
        assert!(matches!(ev.eval(&name("ns.x")).unwrap(), Value::Int(5)));
        assert!(ev.eval(&name("x")).is_err());
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut ev = Evaluator::new();
        ev.start_scope(None);
        ev.add_name(pos(), "x", Value::Int(1)).unwrap();
        ev.start_scope(None);
        ev.add_name(pos(), "x", Value::Int(2)).unwrap();
        assert!(matches!(ev.eval(&name("x")).unwrap(), Value::Int(2)));
        ev.end_scope(false);
        assert!(matches!(ev.eval(&name("x")).unwrap(), Value::Int(1)));
    }

    #[test]
    fn merged_scope_survives_end_scope() {
        let mut ev = Evaluator::new();
        ev.start_scope(None);
        ev.start_scope(Some("ns".to_owned()));
        ev.add_name(pos(), "x", Value::Int(9)).unwrap();
        ev.end_scope(true);
        assert!(matches!(ev.eval(&name("ns.x")).unwrap(), Value::Int(9)));
    }

    #[test]
    fn duplicate_name_in_same_scope_fails() {
        let mut ev = Evaluator::new();
        ev.start_scope(None);
        ev.add_name(pos(), "x", Value::Int(1)).unwrap();
        assert!(ev.add_name(pos(), "x", Value::Int(2)).is_err());
    }

    #[test]
    fn fixup_reevaluates_against_captured_scope() {
        let mut ev = Evaluator::new();
        ev.start_scope(None);
        ev.add_name(pos(), "x", Value::Int(7)).unwrap();
        let fixup = ev.make_fixup(name("x"));
        ev.end_scope(false);
        ev.start_scope(None);
        // "x" is undefined in this new scope, but the fixup still resolves
        // through the scope it captured at creation time.
        assert!(matches!(ev.eval_value(fixup).unwrap(), Value::Int(7)));
    }

    #[test]
    fn self_reference_is_cyclic() {
        let mut ev = Evaluator::new();
        ev.start_scope(None);
        ev.add_name(pos(), "x", Value::Expr(name("x"))).unwrap();
        let err = ev.eval(&name("x")).unwrap_err();
        assert!(matches!(err, Error::CyclicReference { .. }));
    }

    #[test]
    fn petscii_uppercases_ascii_letters() {
        let mut ev = Evaluator::new();
        ev.encoding = "petscii".to_owned();
        let (_, bytes) = ev.get_expr_bytes(&Expr::Str { pos: pos(), value: b"Ab".to_vec() }).unwrap();
        assert_eq!(bytes, vec![0xc1, 0x42]);
    }

    #[test]
    fn petscii_encodes_c64_glyph_substitutions() {
        let mut ev = Evaluator::new();
        ev.encoding = "petscii-c64en-uc".to_owned();
        let value = "£π←↑".as_bytes().to_vec();
        let (_, bytes) = ev.get_expr_bytes(&Expr::Str { pos: pos(), value }).unwrap();
        assert_eq!(bytes, vec![0x5c, 0xff, 0x5f, 0x5e]);
    }

    #[test]
    fn bitnot_masks_to_operand_width() {
        let mut ev = Evaluator::new();
        let wide = Expr::Unary { pos: pos(), op: UnaryOp::BitNot, expr: Box::new(int(0x1234)) };
        assert!(matches!(ev.eval(&wide).unwrap(), Value::Int(v) if v == !0x1234i64 & 0xffff));
        let narrow = Expr::Unary { pos: pos(), op: UnaryOp::BitNot, expr: Box::new(int(0x12)) };
        assert!(matches!(ev.eval(&narrow).unwrap(), Value::Int(v) if v == !0x12i64 & 0xff));
    }
}
