//! PEG-based reducer: turns source text into the flat [`Statement`] stream
//! the rest of the pipeline consumes.
//!
//! `vasm`'s own parser module was never checked in ([`examples/snacchus-vcpu/vasm/src`]
//! only ships `lib.rs`'s `Rule`/`VASMParser` *usage*, not the grammar or
//! the module that derives them), so this file is original plumbing
//! around the `pest`/`pest_derive` pattern that usage implies, combined
//! with the reduction semantics recovered from
//! `examples/original_source/xcomp/reduce_parser.py` (`ReduceParser.visit`,
//! its `__ignored` rule set, and its `error_<rule>`-or-`error_generic`
//! fallback for diagnostics).

use std::rc::Rc;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::{
    BinaryOp, Expr, MacroParam, OperandHint, Radix, Statement, Storage, UnaryOp,
};
use crate::error::{Error, Pos, Result};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct XcompParser;

/// Parses `text` (logical file `context`, used both for diagnostics and
/// stamped onto every resulting position) into its flat statement stream.
pub fn reduce(text: &str, context: &str) -> Result<Vec<Statement>> {
    let ctx: Rc<str> = Rc::from(context);
    let mut pairs = XcompParser::parse(Rule::program, text).map_err(|e| {
        Error::Grammar(Box::new(
            e.with_path(context).renamed_rules(|r| format!("{:?}", r).to_lowercase()),
        ))
    })?;
    let program = pairs.next().expect("program is the root rule");

    let r = Reducer { ctx };
    let mut statements = Vec::new();
    for line in program.into_inner() {
        match line.as_rule() {
            Rule::line => statements.extend(r.reduce_line(line)?),
            Rule::EOI => {}
            _ => unreachable!("unexpected top-level rule {:?}", line.as_rule()),
        }
    }
    Ok(statements)
}

/// Bundles the logical file name every position produced in this pass
/// should carry, so it doesn't need threading through every function
/// signature by hand.
struct Reducer {
    ctx: Rc<str>,
}

impl Reducer {
    fn pos_of(&self, pair: &Pair<Rule>) -> Pos {
        let span = pair.as_span();
        Pos::new(span.start(), span.end(), self.ctx.clone())
    }

    fn reduce_line(&self, line: Pair<Rule>) -> Result<Vec<Statement>> {
        let mut out = Vec::new();
        let mut last_had_content = false;
        for part in line.into_inner() {
            match part.as_rule() {
                Rule::label_decl => {
                    let pos = self.pos_of(&part);
                    let name = part.into_inner().next().unwrap().as_str().to_owned();
                    out.push(Statement::Label { pos, name });
                    last_had_content = true;
                }
                Rule::comment => {
                    let pos = self.pos_of(&part);
                    let text = part.as_str().to_owned();
                    out.push(Statement::Comment { pos, text, trailing: last_had_content });
                }
                _ => {
                    out.push(self.reduce_statement(part)?);
                    last_had_content = true;
                }
            }
        }
        Ok(out)
    }

    fn reduce_statement(&self, stmt: Pair<Rule>) -> Result<Statement> {
        let pos = self.pos_of(&stmt);
        match stmt.as_rule() {
            Rule::directive_encoding => {
                let name = self.unquote(self.inner_string(stmt))?;
                Ok(Statement::Encoding { pos, name: String::from_utf8_lossy(&name).into_owned() })
            }
            Rule::directive_segment => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_lowercase();
                let origin = inner.next().map(|p| self.reduce_expr(p)).transpose()?;
                Ok(Statement::Segment { pos, name, origin })
            }
            Rule::directive_include => {
                let path = String::from_utf8_lossy(&self.unquote(self.inner_string(stmt))?).into_owned();
                Ok(Statement::Include { pos, path })
            }
            Rule::directive_binary_include => {
                let path = String::from_utf8_lossy(&self.unquote(self.inner_string(stmt))?).into_owned();
                Ok(Statement::BinaryInclude { pos, path })
            }
            Rule::directive_def => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let value = self.reduce_expr(inner.next().unwrap())?;
                Ok(Statement::Define { pos, name, value })
            }
            Rule::directive_pragma => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let args = inner.map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::Pragma { pos, name, args })
            }
            Rule::directive_scope_begin => {
                let name = stmt.into_inner().next().map(|p| p.as_str().to_owned());
                Ok(Statement::ScopeBegin { pos, name })
            }
            Rule::directive_scope_end => Ok(Statement::ScopeEnd { pos }),
            Rule::directive_macro_begin => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let params = inner
                    .next()
                    .map(|p| {
                        p.into_inner()
                            .map(|id| MacroParam { pos: self.pos_of(&id), name: id.as_str().to_owned() })
                            .collect()
                    })
                    .unwrap_or_default();
                // Body is accumulated by the caller; a macro definition's body is
                // everything up to the matching `.endmacro`, which the reducer
                // cannot see from a single line. The preprocessor stitches a
                // `MacroDef`'s body back together from the flat `MacroDef`/body
                // statements/`ScopeEnd`-like markers; see `preprocessor::expand`.
                Ok(Statement::MacroDef { pos, name, params, body: Vec::new() })
            }
            Rule::directive_macro_end => Ok(Statement::ScopeEnd { pos }),
            Rule::directive_dim => {
                let mut inner = stmt.into_inner();
                let size = self.reduce_expr(inner.next().unwrap())?;
                let init = inner.map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::Dim { pos, size, init })
            }
            Rule::directive_var => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let size = self.reduce_expr(inner.next().unwrap())?;
                let init = inner.map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::Var { pos, name, size, init })
            }
            Rule::directive_struct_begin => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let offset = inner.next().map(|p| self.reduce_expr(p)).transpose()?;
                Ok(Statement::Struct { pos, name, offset, fields: Vec::new() })
            }
            Rule::directive_struct_end => Ok(Statement::ScopeEnd { pos }),
            Rule::directive_storage => self.reduce_storage(stmt.into_inner().next().unwrap()),
            Rule::macro_call => {
                let mut inner = stmt.into_inner();
                let name = inner.next().unwrap().as_str().to_owned();
                let args = inner.map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::MacroCall { pos, name, args })
            }
            Rule::operation => self.reduce_operation(pos, stmt),
            other => unreachable!("unexpected statement rule {:?}", other),
        }
    }

    fn reduce_storage(&self, storage: Pair<Rule>) -> Result<Statement> {
        let pos = self.pos_of(&storage);
        match storage.as_rule() {
            Rule::storage_byte => {
                let values =
                    storage.into_inner().map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::Storage { pos, storage: Storage::Byte(values) })
            }
            Rule::storage_word => {
                let values =
                    storage.into_inner().map(|p| self.reduce_expr(p)).collect::<Result<Vec<_>>>()?;
                Ok(Statement::Storage { pos, storage: Storage::Word(values) })
            }
            other => unreachable!("unexpected storage rule {:?}", other),
        }
    }

    fn reduce_operation(&self, pos: Pos, op: Pair<Rule>) -> Result<Statement> {
        let mut inner = op.into_inner();
        let mnemonic = inner.next().unwrap().as_str().to_lowercase();
        let operand = inner.next();

        let (hint, operand_expr) = match operand {
            None => (OperandHint::Implied, None),
            Some(p) => match p.as_rule() {
                Rule::operand_accumulator => (OperandHint::Accumulator, None),
                Rule::operand_immediate => {
                    (OperandHint::Immediate, Some(self.reduce_expr(p.into_inner().next().unwrap())?))
                }
                Rule::operand_indirect_x => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::IndirectX, Some(expr))
                }
                Rule::operand_indirect_y => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::IndirectY, Some(expr))
                }
                Rule::operand_indirect => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::Indirect, Some(expr))
                }
                Rule::operand_absolute_x => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::DirectX, Some(expr))
                }
                Rule::operand_absolute_y => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::DirectY, Some(expr))
                }
                Rule::operand_bare => {
                    let expr = self.reduce_expr(p.into_inner().next().unwrap())?;
                    (OperandHint::Direct, Some(expr))
                }
                other => unreachable!("unexpected operand rule {:?}", other),
            },
        };

        Ok(Statement::Operation { pos, mnemonic, hint, operand: operand_expr })
    }

    fn inner_string<'i>(&self, pair: Pair<'i, Rule>) -> Pair<'i, Rule> {
        pair.into_inner()
            .find(|p| p.as_rule() == Rule::string)
            .expect("directive with a string argument")
    }

    fn unquote(&self, string: Pair<Rule>) -> Result<Vec<u8>> {
        let pos = self.pos_of(&string);
        let inner = string.into_inner().next().unwrap(); // string_inner
        let raw = inner.as_str();
        let mut out = Vec::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('r') => out.push(b'\r'),
                    Some('n') => out.push(b'\n'),
                    Some('t') => out.push(b'\t'),
                    Some('v') => out.push(0x0b),
                    Some('"') => out.push(b'"'),
                    Some('\\') => out.push(b'\\'),
                    Some(other) => return Err(Error::InvalidEscape { pos, ch: other }),
                    None => return Err(Error::UnterminatedString { pos }),
                }
            } else {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        Ok(out)
    }

    fn reduce_expr(&self, expr: Pair<Rule>) -> Result<Expr> {
        let pos = self.pos_of(&expr);
        let mut items: Vec<(Option<BinaryOp>, Expr)> = Vec::new();
        let mut pending_op = None;
        for part in expr.into_inner() {
            if is_binary_op_rule(part.as_rule()) {
                pending_op = Some(binary_op_of(&part));
            } else {
                let operand = self.reduce_unary_expr(part)?;
                items.push((pending_op.take(), operand));
            }
        }
        Ok(climb(items, pos))
    }

    fn reduce_unary_expr(&self, pair: Pair<Rule>) -> Result<Expr> {
        let pos = self.pos_of(&pair);
        let mut ops = Vec::new();
        let mut primary = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::neg => ops.push(UnaryOp::Neg),
                Rule::low_byte => ops.push(UnaryOp::LowByte),
                Rule::high_byte => ops.push(UnaryOp::HighByte),
                Rule::bit_not => ops.push(UnaryOp::BitNot),
                Rule::force_width16 => ops.push(UnaryOp::Width16),
                _ => primary = Some(self.reduce_primary(part)?),
            }
        }
        let mut expr = primary.expect("unary_expr always has a primary");
        for op in ops.into_iter().rev() {
            expr = Expr::Unary { pos: pos.clone(), op, expr: Box::new(expr) };
        }
        Ok(expr)
    }

    fn reduce_primary(&self, pair: Pair<Rule>) -> Result<Expr> {
        let pos = self.pos_of(&pair);
        match pair.as_rule() {
            Rule::current_address => Ok(Expr::CurrentAddress { pos }),
            Rule::number => {
                let text = pair.as_str();
                Ok(Expr::Int {
                    pos,
                    value: parse_number(text),
                    radix: radix_of(text),
                    width_hint: width_hint(text),
                })
            }
            Rule::string => Ok(Expr::Str { pos, value: self.unquote(pair)? }),
            Rule::qualified_name => Ok(Expr::Name { pos, name: pair.as_str().to_owned() }),
            Rule::expr => self.reduce_expr(pair),
            other => unreachable!("unexpected primary rule {:?}", other),
        }
    }
}

/// Precedence tier of a binary operator: higher binds tighter. spec.md
/// §4.2 lists, lowest to highest: add/subtract/or/and, multiply/divide,
/// exponent (`^`, implemented as bitwise xor — see `ast::BinaryOp::Xor`),
/// unary prefix.
fn precedence(op: BinaryOp) -> u8 {
    use BinaryOp::*;
    match op {
        Add | Sub | Or | And => 1,
        Mul | Div => 2,
        Xor => 3,
    }
}

fn binary_op_of(pair: &Pair<Rule>) -> BinaryOp {
    match pair.as_rule() {
        Rule::add => BinaryOp::Add,
        Rule::sub => BinaryOp::Sub,
        Rule::mul => BinaryOp::Mul,
        Rule::div => BinaryOp::Div,
        Rule::bit_or => BinaryOp::Or,
        Rule::bit_and => BinaryOp::And,
        Rule::bit_xor => BinaryOp::Xor,
        other => unreachable!("not a binary operator rule: {:?}", other),
    }
}

fn is_binary_op_rule(rule: Rule) -> bool {
    matches!(rule, Rule::add | Rule::sub | Rule::mul | Rule::div | Rule::bit_or | Rule::bit_and | Rule::bit_xor)
}

/// Folds the flat `(op, operand)` list `expr` collects into a tree,
/// left-associative within each precedence tier, tightest tier first.
fn climb(items: Vec<(Option<BinaryOp>, Expr)>, pos: Pos) -> Expr {
    assert!(!items.is_empty());
    let mut items = items;
    for tier in (1..=3).rev() {
        let mut folded: Vec<(Option<BinaryOp>, Expr)> = Vec::new();
        for (op, operand) in items.into_iter() {
            match op {
                Some(op) if precedence(op) == tier => {
                    let (_, lhs) = folded.pop().expect("binary op always follows an operand");
                    folded.push((
                        None,
                        Expr::Binary { pos: pos.clone(), op, lhs: Box::new(lhs), rhs: Box::new(operand) },
                    ));
                }
                _ => folded.push((op, operand)),
            }
        }
        items = folded;
    }
    let (_, result) = items.into_iter().next().expect("folding never empties the list");
    result
}

fn radix_of(text: &str) -> Radix {
    if text.starts_with('$') || text.starts_with("0x") || text.starts_with("0X") {
        Radix::Hex
    } else if text.starts_with('%') {
        Radix::Binary
    } else {
        Radix::Decimal
    }
}

fn parse_number(text: &str) -> i64 {
    if let Some(hex) = text.strip_prefix('$').or_else(|| text.strip_prefix("0x")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(bin) = text.strip_prefix('%') {
        i64::from_str_radix(bin, 2).unwrap_or(0)
    } else {
        text.parse().unwrap_or(0)
    }
}

/// Byte-width suggested by an integer literal's own magnitude: 1 for
/// anything that fits in a byte, 2 otherwise. Hex/binary literals with
/// exactly two digits after the prefix are treated as explicitly 8-bit,
/// mirroring how assembly authors write `$0A` to mean a zeropage byte.
fn width_hint(text: &str) -> Option<u16> {
    if let Some(hex) = text.strip_prefix('$').or_else(|| text.strip_prefix("0x")) {
        return Some(if hex.len() <= 2 { 1 } else { 2 });
    }
    if let Some(bin) = text.strip_prefix('%') {
        return Some(if bin.len() <= 8 { 1 } else { 2 });
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Statement;

    #[test]
    fn reduces_label_and_operation() {
        let stmts = reduce("start:\n  lda #1\n", "<test>").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Statement::Label { name, .. } if name == "start"));
        assert!(matches!(&stmts[1], Statement::Operation { mnemonic, .. } if mnemonic == "lda"));
    }

    #[test]
    fn reduces_byte_storage() {
        let stmts = reduce(".byte 1, 2, 3\n", "<test>").unwrap();
        match &stmts[0] {
            Statement::Storage { storage: Storage::Byte(values), .. } => assert_eq!(values.len(), 3),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn reduces_segment_with_origin() {
        let stmts = reduce(".text 0x0800\n", "<test>").unwrap();
        assert!(matches!(&stmts[0], Statement::Segment { name, origin: Some(_), .. } if name == "text"));
    }

    #[test]
    fn precedence_orders_mul_before_add() {
        let stmts = reduce("lda #1 + 2 * 3\n", "<test>").unwrap();
        match &stmts[0] {
            Statement::Operation { operand: Some(Expr::Binary { op: BinaryOp::Add, rhs, .. }), .. } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn or_and_add_share_the_loosest_tier() {
        // `1 | 2 + 3` groups left-to-right within the shared tier:
        // `(1 | 2) + 3`, not `1 | (2 + 3)`.
        let stmts = reduce("lda #1 | 2 + 3\n", "<test>").unwrap();
        match &stmts[0] {
            Statement::Operation { operand: Some(Expr::Binary { op: BinaryOp::Add, lhs, .. }), .. } => {
                assert!(matches!(**lhs, Expr::Binary { op: BinaryOp::Or, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn xor_binds_tighter_than_mul() {
        // `2 * 3 ^ 4` is `2 * (3 ^ 4)`, not `(2 * 3) ^ 4`.
        let stmts = reduce("lda #2 * 3 ^ 4\n", "<test>").unwrap();
        match &stmts[0] {
            Statement::Operation { operand: Some(Expr::Binary { op: BinaryOp::Mul, rhs, .. }), .. } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Xor, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn reduces_indexed_operand() {
        let stmts = reduce("lda foo, x\n", "<test>").unwrap();
        assert!(matches!(&stmts[0], Statement::Operation { operand: Some(_), .. }));
    }

    #[test]
    fn reduces_indirect_indexed_operand() {
        let stmts = reduce("lda (foo), y\n", "<test>").unwrap();
        assert!(matches!(&stmts[0], Statement::Operation { .. }));
    }

    #[test]
    fn dollar_and_percent_literals_parse() {
        let stmts = reduce("lda #$0a\nlda #%00000001\n", "<test>").unwrap();
        match &stmts[0] {
            Statement::Operation { operand: Some(Expr::Int { value, radix: Radix::Hex, .. }), .. } => {
                assert_eq!(*value, 0x0a)
            }
            other => panic!("unexpected statement: {:?}", other),
        }
        match &stmts[1] {
            Statement::Operation { operand: Some(Expr::Int { value, radix: Radix::Binary, .. }), .. } => {
                assert_eq!(*value, 1)
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn dotless_macro_call_is_distinct_from_operation() {
        let stmts = reduce("foo 123\n", "<test>").unwrap();
        assert!(matches!(&stmts[0], Statement::MacroCall { name, args, .. } if name == "foo" && args.len() == 1));
    }

    #[test]
    fn trailing_comment_attaches_to_prior_statement() {
        let stmts = reduce("nop ; does nothing\n; full line\n", "<test>").unwrap();
        assert!(matches!(&stmts[0], Statement::Operation { .. }));
        assert!(matches!(&stmts[1], Statement::Comment { trailing: true, .. }));
        assert!(matches!(&stmts[2], Statement::Comment { trailing: false, .. }));
    }
}
