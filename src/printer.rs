//! Canonical text re-emission of a statement stream: the inverse of
//! `reducer`/`preprocessor`, used to round-trip a parsed program back to
//! source for diffing and golden-file tests.
//!
//! Grounded in `examples/original_source/xcomp/decompiler.py`'s
//! `ModelPrinter` (`singledispatchmethod` over statement/expression type).
//! That file drives a `StylePrinter` that also tracks ANSI styling and
//! per-statement source-file banners; this crate has no terminal-styling
//! dependency anywhere in its stack, so `print` renders plain text and
//! drops the color/position-banner concerns, keeping only the syntax
//! shape each statement/expression type re-emits.

use std::fmt::Write as _;

use crate::ast::{BinaryOp, Expr, OperandHint, Radix, Statement, Storage, UnaryOp};

/// Renders `stmts` back to canonical source text, one statement per line.
pub fn print(stmts: &[Statement]) -> String {
    let mut out = String::new();
    print_block(&mut out, stmts, 0);
    out
}

fn print_block(out: &mut String, stmts: &[Statement], indent: usize) {
    for stmt in stmts {
        print_indent(out, indent);
        print_statement(out, stmt, indent);
        out.push('\n');
    }
}

fn print_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("    ");
    }
}

fn print_statement(out: &mut String, stmt: &Statement, indent: usize) {
    match stmt {
        Statement::Comment { text, .. } => out.push_str(text),
        Statement::Encoding { name, .. } => {
            write!(out, ".encoding \"{}\"", name).unwrap();
        }
        Statement::Segment { name, origin, .. } => {
            write!(out, ".{}", name).unwrap();
            if let Some(expr) = origin {
                out.push(' ');
                print_expr(out, expr);
            }
        }
        Statement::Include { path, .. } => {
            write!(out, ".include \"{}\"", path).unwrap();
        }
        Statement::BinaryInclude { path, .. } => {
            write!(out, ".bin \"{}\"", path).unwrap();
        }
        Statement::ScopeBegin { name, .. } => match name {
            Some(n) => write!(out, ".scope {}", n).unwrap(),
            None => out.push_str(".scope"),
        },
        Statement::ScopeEnd { .. } => out.push_str(".endscope"),
        Statement::Define { name, value, .. } => {
            write!(out, ".def {} ", name).unwrap();
            print_expr(out, value);
        }
        Statement::Label { name, .. } => {
            write!(out, "{}:", name).unwrap();
        }
        Statement::Storage { storage, .. } => match storage {
            Storage::Byte(items) => {
                out.push_str(".byte ");
                print_expr_list(out, items);
            }
            Storage::Word(items) => {
                out.push_str(".word ");
                print_expr_list(out, items);
            }
        },
        Statement::Dim { size, init, .. } => {
            out.push_str(".dim ");
            print_expr(out, size);
            if !init.is_empty() {
                out.push_str(", ");
                print_expr_list(out, init);
            }
        }
        Statement::Var { name, size, init, .. } => {
            write!(out, ".var {}, ", name).unwrap();
            print_expr(out, size);
            if !init.is_empty() {
                out.push_str(", ");
                print_expr_list(out, init);
            }
        }
        Statement::Struct { name, offset, fields, .. } => {
            write!(out, ".struct {}", name).unwrap();
            if let Some(expr) = offset {
                out.push(' ');
                print_expr(out, expr);
            }
            out.push('\n');
            for field in fields {
                print_indent(out, indent + 1);
                write!(out, ".var {}, ", field.name).unwrap();
                print_expr(out, &field.width);
                out.push('\n');
            }
            print_indent(out, indent);
            out.push_str(".end");
        }
        Statement::Pragma { name, args, .. } => {
            write!(out, ".pragma {}", name).unwrap();
            if !args.is_empty() {
                out.push(' ');
                print_expr_list(out, args);
            }
        }
        Statement::MacroDef { name, params, body, .. } => {
            write!(out, ".macro {}", name).unwrap();
            if !params.is_empty() {
                out.push_str(" (");
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&param.name);
                }
                out.push(')');
            }
            out.push('\n');
            print_block(out, body, indent + 1);
            print_indent(out, indent);
            out.push_str(".endmacro");
        }
        Statement::MacroCall { name, args, .. } => {
            out.push_str(name);
            if !args.is_empty() {
                out.push(' ');
                print_expr_list(out, args);
            }
        }
        Statement::Operation { mnemonic, hint, operand, .. } => print_operation(out, mnemonic, *hint, operand.as_ref()),
    }
}

fn print_operation(out: &mut String, mnemonic: &str, hint: OperandHint, operand: Option<&Expr>) {
    out.push_str(mnemonic);
    match hint {
        OperandHint::Implied => {}
        OperandHint::Accumulator => out.push_str(" a"),
        OperandHint::Immediate => {
            out.push_str(" #");
            print_expr(out, operand.expect("immediate operand"));
        }
        OperandHint::Indirect => {
            out.push_str(" (");
            print_expr(out, operand.expect("indirect operand"));
            out.push(')');
        }
        OperandHint::IndirectX => {
            out.push_str(" (");
            print_expr(out, operand.expect("indirect,x operand"));
            out.push_str(", x)");
        }
        OperandHint::IndirectY => {
            out.push_str(" (");
            print_expr(out, operand.expect("(indirect),y operand"));
            out.push_str("), y");
        }
        OperandHint::Direct => {
            out.push(' ');
            print_expr(out, operand.expect("direct operand"));
        }
        OperandHint::DirectX => {
            out.push(' ');
            print_expr(out, operand.expect("direct,x operand"));
            out.push_str(", x");
        }
        OperandHint::DirectY => {
            out.push(' ');
            print_expr(out, operand.expect("direct,y operand"));
            out.push_str(", y");
        }
    }
}

fn print_expr_list(out: &mut String, exprs: &[Expr]) {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_expr(out, expr);
    }
}

fn print_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Int { value, radix, width_hint, .. } => print_int(out, *value, *radix, *width_hint),
        Expr::Str { value, .. } => {
            out.push('"');
            out.push_str(&String::from_utf8_lossy(value));
            out.push('"');
        }
        Expr::Name { name, .. } => out.push_str(name),
        Expr::CurrentAddress { .. } => out.push('*'),
        Expr::Unary { op, expr, .. } => {
            out.push_str(unary_op_str(*op));
            print_expr(out, expr);
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            print_expr(out, lhs);
            write!(out, " {} ", binary_op_str(*op)).unwrap();
            print_expr(out, rhs);
        }
    }
}

fn print_int(out: &mut String, value: i64, radix: Radix, width_hint: Option<u16>) {
    let wide = width_hint == Some(2) || !(0..=0xff).contains(&value);
    match radix {
        Radix::Hex => {
            if wide {
                write!(out, "${:04x}", value & 0xffff).unwrap();
            } else {
                write!(out, "${:02x}", value & 0xff).unwrap();
            }
        }
        Radix::Binary => {
            if wide {
                write!(out, "%{:016b}", value & 0xffff).unwrap();
            } else {
                write!(out, "%{:08b}", value & 0xff).unwrap();
            }
        }
        Radix::Decimal => {
            if width_hint == Some(2) && (0..=0xff).contains(&value) {
                write!(out, "!{}", value).unwrap();
            } else {
                write!(out, "{}", value).unwrap();
            }
        }
    }
}

fn unary_op_str(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::LowByte => "<",
        UnaryOp::HighByte => ">",
        UnaryOp::BitNot => "~",
        UnaryOp::Width16 => "!",
        UnaryOp::Width8 => "",
    }
}

fn binary_op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Or => "|",
        BinaryOp::And => "&",
        BinaryOp::Xor => "^",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ContextManager;
    use crate::preprocessor::preprocess;

    fn roundtrip(src: &str) -> String {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", src);
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        print(&stmts)
    }

    #[test]
    fn prints_label_and_operation() {
        let text = roundtrip("start:\n  lda #$10\n");
        assert_eq!(text, "start:\nlda #$10\n");
    }

    #[test]
    fn prints_indexed_operand() {
        let text = roundtrip("lda foo, x\n");
        assert_eq!(text, "lda foo, x\n");
    }

    #[test]
    fn prints_storage_list() {
        let text = roundtrip(".byte 1, 2, 3\n");
        assert_eq!(text, ".byte 1, 2, 3\n");
    }

    #[test]
    fn prints_struct_fields_indented() {
        let text = roundtrip(".struct point\n.var x, 1\n.var y, 1\n.end\n");
        assert_eq!(text, ".struct point\n    .var x, 1\n    .var y, 1\n.end\n");
    }
}
