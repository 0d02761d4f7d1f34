//! Second compilation pass: walks the preprocessed statement stream,
//! drives the [`Evaluator`] to turn expressions into concrete values, and
//! writes the resulting bytes into one of four fixed memory segments.
//!
//! Grounded in `examples/original_source/xcomp/compiler.py`'s `Compiler`
//! class (the `SegmentData` model, the `_compile_*` singledispatch
//! handlers, and `resolve_expr`'s "promote and reserve" width-selection
//! algorithm for forward references) combined with the scope/fixup model
//! of `eval.rs`, which this crate uses instead of `compiler.py`'s
//! scope-stack-of-AST-nodes (an earlier, less complete draft per the
//! "competing drafts" note `spec.md` leaves as an Open Question).

use std::collections::HashMap;

use crate::ast::{Expr, OperandHint, Statement, Storage, StructField, UnaryOp};
use crate::context::ContextManager;
use crate::cpu6502::{self, AddressMode, Opcode};
use crate::error::{Error, Pos, Result};
use crate::eval::{Evaluator, Fixup, Value};

pub const MEMORY_SIZE: usize = 0x1_0000;

#[derive(Clone, Copy, Debug)]
pub struct Segment {
    pub start: u16,
    pub offset: u16,
    pub end: u16,
}

impl Segment {
    fn new(start: u16) -> Self {
        Segment { start, offset: start, end: start }
    }

    /// Moves the write cursor to `addr` (used by `.zero`/`.bss`/`.data`/
    /// `.text` origin expressions), tracking `start`/`end` exactly as
    /// spec.md §3 describes: every assignment to `offset` pulls `start`
    /// down to the minimum and `end` up to the maximum offset ever seen.
    fn seek(&mut self, addr: u16) {
        self.offset = addr;
        self.start = self.start.min(addr);
        self.end = self.end.max(addr);
    }

    fn advance(&mut self, width: u16) {
        self.seek(self.offset.wrapping_add(width));
    }
}

enum PendingKind {
    /// A storage item: emit exactly `width` bytes (zero-extended or
    /// truncated, never resized) at `addr`.
    Storage { width: u16 },
    /// An operation operand: emit `opcode.byte` at `addr`, then the
    /// operand bytes right after, sized to `opcode`'s reserved width.
    Operation { opcode: Opcode, next_addr: u16 },
}

struct Pending {
    addr: u16,
    fixup: Fixup,
    kind: PendingKind,
}

pub struct CodeGen {
    pub memory: Vec<u8>,
    pub segments: HashMap<&'static str, Segment>,
    /// Final absolute address of every label, `.var` binding, and merged
    /// struct field, keyed by its fully qualified name.
    pub symbol_map: HashMap<String, u16>,
    /// Evaluated arguments of every `.pragma` seen, keyed by pragma name.
    /// Pragma names are opaque to the core; the front-end looks these up
    /// by name for its own purposes (e.g. `c64_prg_start`).
    pub pragmas: HashMap<String, Vec<i64>>,
    current: &'static str,
    eval: Evaluator,
    pending: Vec<Pending>,
}

const SEGMENT_NAMES: [&str; 4] = ["zero", "bss", "data", "text"];

impl CodeGen {
    pub fn new() -> Self {
        let mut segments = HashMap::new();
        segments.insert("zero", Segment::new(0x0000));
        segments.insert("bss", Segment::new(0x0100));
        segments.insert("data", Segment::new(0x0200));
        segments.insert("text", Segment::new(0x0800));
        CodeGen {
            memory: vec![0u8; MEMORY_SIZE],
            segments,
            symbol_map: HashMap::new(),
            pragmas: HashMap::new(),
            current: "text",
            eval: Evaluator::new(),
            pending: Vec::new(),
        }
    }

    fn segment_mut(&mut self) -> &mut Segment {
        self.segments.get_mut(self.current).expect("segment always initialized")
    }

    pub fn compile(&mut self, ctx: &mut ContextManager, stmts: &[Statement]) -> Result<()> {
        self.eval.start_scope(None);
        self.eval.add_name(Pos::synthetic(), "byte", Value::Int(1)).expect("implicit bindings are fresh");
        self.eval.add_name(Pos::synthetic(), "word", Value::Int(2)).expect("implicit bindings are fresh");
        self.eval.add_name(Pos::synthetic(), "long", Value::Int(4)).expect("implicit bindings are fresh");
        for stmt in stmts {
            self.compile_statement(ctx, stmt)?;
        }
        self.drain_pending(true)?;
        self.eval.end_scope(false);
        log::trace!("final symbol table: {:?}", self.symbol_map);
        Ok(())
    }

    fn compile_statement(&mut self, ctx: &mut ContextManager, stmt: &Statement) -> Result<()> {
        // `*` (current address) is re-bound before every statement so an
        // expression referencing it sees the write cursor as it stands at
        // that statement, not wherever compilation happened to leave it.
        self.eval.set_current_address(i64::from(self.segments[self.current].offset));
        match stmt {
            Statement::Comment { .. } => Ok(()),
            Statement::Encoding { pos, name } => self.compile_encoding(pos.clone(), name),
            Statement::Segment { pos, name, origin } => {
                self.compile_segment(pos.clone(), name, origin.as_ref())
            }
            Statement::Include { .. } => {
                unreachable!("includes are expanded by the preprocessor before codegen sees them")
            }
            Statement::BinaryInclude { pos, path } => self.compile_binary_include(ctx, pos.clone(), path),
            Statement::ScopeBegin { name, .. } => {
                self.eval.start_scope(name.clone());
                Ok(())
            }
            Statement::ScopeEnd { .. } => {
                self.drain_pending(false)?;
                let merge = self.eval.current_namespace_is_some();
                self.eval.end_scope(merge);
                Ok(())
            }
            Statement::Define { pos, name, value } => {
                self.eval.add_name(pos.clone(), name, Value::Expr(value.clone()))
            }
            Statement::Label { pos, name } => {
                let addr = self.segments[self.current].offset;
                self.eval.add_name(pos.clone(), name, Value::Int(i64::from(addr)))?;
                self.symbol_map.insert(name.clone(), addr);
                Ok(())
            }
            Statement::Storage { pos, storage } => self.compile_storage(pos.clone(), storage),
            Statement::Dim { pos, size, init } => self.compile_dim(pos.clone(), size, init),
            Statement::Var { pos, name, size, init } => self.compile_var(pos.clone(), name, size, init),
            Statement::Struct { pos, name, offset, fields } => {
                self.compile_struct(pos.clone(), name, offset.as_ref(), fields)
            }
            Statement::Pragma { pos, name, args } => self.compile_pragma(pos.clone(), name, args),
            Statement::MacroDef { .. } | Statement::MacroCall { .. } => {
                unreachable!("macros are expanded by the preprocessor before codegen sees them")
            }
            Statement::Operation { pos, mnemonic, hint, operand } => {
                self.compile_operation(pos.clone(), mnemonic, *hint, operand.as_ref())
            }
        }
    }

    fn compile_encoding(&mut self, pos: Pos, name: &str) -> Result<()> {
        match name {
            "ascii" | "utf-8" | "petscii" | "petscii-c64en-uc" => {
                self.eval.encoding = name.to_owned();
                Ok(())
            }
            other => Err(Error::InvalidEncoding { pos, name: other.to_owned() }),
        }
    }

    fn compile_segment(&mut self, pos: Pos, name: &str, origin: Option<&Expr>) -> Result<()> {
        if !SEGMENT_NAMES.contains(&name) {
            return Err(Error::ParseError { pos, message: format!("unknown segment \"{}\"", name) });
        }
        self.current = SEGMENT_NAMES.iter().find(|&&n| n == name).unwrap();
        if let Some(expr) = origin {
            let value = self.eval.eval(expr)?;
            let addr = as_address(pos, &value)?;
            self.segment_mut().seek(addr);
        }
        Ok(())
    }

    fn compile_binary_include(&mut self, ctx: &mut ContextManager, pos: Pos, path: &str) -> Result<()> {
        let _ = &pos;
        let resolved = ctx.search_file(path).ok_or_else(|| Error::FileNotFound { name: path.to_owned() })?;
        let bytes = std::fs::read(&resolved).map_err(|_| Error::FileNotFound { name: path.to_owned() })?;
        let addr = self.segments[self.current].offset;
        self.write_bytes(addr, &bytes);
        self.segment_mut().advance(bytes.len() as u16);
        Ok(())
    }

    /// `.dim LENGTH, INIT...`: evaluates `size`, then tiles the serialized
    /// `init` bytes across that many bytes, truncating the final tile as
    /// needed. Binds no name.
    fn compile_dim(&mut self, pos: Pos, size: &Expr, init: &[Expr]) -> Result<()> {
        let value = self.eval.eval(size)?;
        let width = as_address(pos.clone(), &value)?;
        self.fill_tiled(pos, width, init)
    }

    /// `.var NAME, SIZE[, INIT...]`: binds `NAME` to the current offset and
    /// `NAME.size` to `SIZE`, then performs a `.dim`-style fill.
    fn compile_var(&mut self, pos: Pos, name: &str, size: &Expr, init: &[Expr]) -> Result<()> {
        let value = self.eval.eval(size)?;
        let width = as_address(pos.clone(), &value)?;
        let addr = self.segments[self.current].offset;
        self.eval.add_name(pos.clone(), name, Value::Int(i64::from(addr)))?;
        self.eval.add_name(pos.clone(), &format!("{}.size", name), Value::Int(i64::from(width)))?;
        self.symbol_map.insert(name.to_owned(), addr);
        self.fill_tiled(pos, width, init)
    }

    /// Shared fill logic for `.dim`/`.var`: evaluates every item in
    /// `init`, concatenates their serialized bytes into one tile, and
    /// repeats that tile across `size` bytes of the current segment,
    /// advancing it regardless of whether `init` was empty (memory starts
    /// zeroed, so an empty tile is a no-op write).
    fn fill_tiled(&mut self, pos: Pos, size: u16, init: &[Expr]) -> Result<()> {
        let addr = self.segments[self.current].offset;
        if !init.is_empty() {
            let mut tile = Vec::new();
            for item in init {
                let (_, bytes) = self.eval.get_expr_bytes(item).map_err(|e| tag_pos(e, pos.clone()))?;
                tile.extend(bytes);
            }
            if !tile.is_empty() {
                let mut out = Vec::with_capacity(size as usize);
                for i in 0..size as usize {
                    out.push(tile[i % tile.len()]);
                }
                self.write_bytes(addr, &out);
            }
        }
        self.segment_mut().advance(size);
        Ok(())
    }

    /// `.struct NAME [OFFSET] ... .end`: opens a transient offset counter
    /// at `offset` (or zero), enters a namespace scope under `name`,
    /// binds each field to its running offset, binds `name.size` to the
    /// total, then merges the namespace scope into the enclosing one so
    /// `name.field` stays visible after the struct closes. This does not
    /// touch the active segment: struct fields are symbolic offsets, not
    /// emitted bytes. Per spec.md §3's symbol map definition ("a mapping
    /// from label/variable/struct-field name to final absolute address"),
    /// every field also publishes into `self.symbol_map` under its
    /// `name.field` key, not just into the evaluator's scope.
    fn compile_struct(&mut self, pos: Pos, name: &str, offset: Option<&Expr>, fields: &[StructField]) -> Result<()> {
        let base = match offset {
            Some(expr) => {
                let value = self.eval.eval(expr)?;
                i64::from(as_address(pos.clone(), &value)?)
            }
            None => 0,
        };
        self.eval.start_scope(Some(name.to_owned()));
        let mut cursor = base;
        for field in fields {
            let value = self.eval.eval(&field.width)?;
            let width = as_address(field.pos.clone(), &value)?;
            self.eval.add_name(field.pos.clone(), &field.name, Value::Int(cursor))?;
            self.symbol_map.insert(format!("{}.{}", name, field.name), as_address(field.pos.clone(), &Value::Int(cursor))?);
            cursor += i64::from(width);
        }
        self.eval.add_name(pos, "size", Value::Int(cursor - base))?;
        self.eval.end_scope(true);
        Ok(())
    }

    /// Pragma names carry no core-level meaning; every argument that
    /// evaluates to a plain integer is recorded for the front-end to
    /// consult by name. Arguments that don't evaluate (forward references,
    /// strings) are silently skipped rather than queued as fixups — a
    /// pragma's value is never itself part of the memory image.
    fn compile_pragma(&mut self, pos: Pos, name: &str, args: &[Expr]) -> Result<()> {
        let _ = &pos;
        let values = args
            .iter()
            .filter_map(|expr| match self.eval.eval(expr) {
                Ok(Value::Int(v)) => Some(v),
                _ => None,
            })
            .collect();
        self.pragmas.insert(name.to_owned(), values);
        Ok(())
    }

    fn compile_storage(&mut self, pos: Pos, storage: &Storage) -> Result<()> {
        match storage {
            Storage::Byte(items) => {
                for item in items {
                    self.compile_storage_item(pos.clone(), item, 1)?;
                }
                Ok(())
            }
            Storage::Word(items) => {
                for item in items {
                    self.compile_storage_item(pos.clone(), item, 2)?;
                }
                Ok(())
            }
        }
    }

    fn compile_storage_item(&mut self, pos: Pos, expr: &Expr, width: u16) -> Result<()> {
        let addr = self.segments[self.current].offset;
        match self.eval.get_expr_bytes(expr) {
            Ok((_, bytes)) => {
                self.write_sized(addr, &bytes, width);
                self.segment_mut().advance(width);
                Ok(())
            }
            Err(Error::UndefinedName { .. }) => {
                let fixup = self.eval.capture_fixup(expr.clone());
                self.pending.push(Pending { addr, fixup, kind: PendingKind::Storage { width } });
                self.segment_mut().advance(width);
                Ok(())
            }
            Err(other) => Err(other),
        }
        .map_err(|e| tag_pos(e, pos))
    }

    fn compile_operation(
        &mut self,
        pos: Pos,
        mnemonic: &str,
        hint: OperandHint,
        operand: Option<&Expr>,
    ) -> Result<()> {
        if !cpu6502::is_mnemonic(mnemonic) {
            return Err(Error::ParseError { pos, message: format!("unknown mnemonic \"{}\"", mnemonic) });
        }

        let addr = self.segments[self.current].offset;
        let forced_wide = operand.map(is_forced_wide).unwrap_or(false);

        let mode = match hint {
            OperandHint::Implied => AddressMode::Implied,
            OperandHint::Accumulator => AddressMode::Accumulator,
            OperandHint::Immediate => AddressMode::Immediate,
            OperandHint::Indirect => AddressMode::Indirect,
            OperandHint::IndirectX => AddressMode::IndirectX,
            OperandHint::IndirectY => AddressMode::IndirectY,
            OperandHint::Direct | OperandHint::DirectX | OperandHint::DirectY => {
                let supported = cpu6502::modes_for(mnemonic);
                if supported.contains(&AddressMode::Relative) {
                    AddressMode::Relative
                } else {
                    let (narrow, wide) = match hint {
                        OperandHint::DirectX => (AddressMode::ZeropageX, AddressMode::AbsoluteX),
                        OperandHint::DirectY => (AddressMode::ZeropageY, AddressMode::AbsoluteY),
                        _ => (AddressMode::Zeropage, AddressMode::Absolute),
                    };
                    // An operand syntactically marked 16-bit (`!expr`, or a
                    // literal written with >2 hex/>8 binary digits) forces
                    // the wide form even though the code generator hasn't
                    // evaluated it yet and so can't know its magnitude.
                    if forced_wide && supported.contains(&wide) {
                        wide
                    } else if supported.contains(&narrow) {
                        narrow
                    } else {
                        wide
                    }
                }
            }
        };

        let opcode = cpu6502::lookup(mnemonic, mode).ok_or_else(|| Error::ParseError {
            pos: pos.clone(),
            message: format!("{} does not support this addressing mode", mnemonic),
        })?;

        if operand.is_none() {
            self.write_bytes(addr, &[opcode.byte]);
            self.segment_mut().advance(opcode.width());
            return Ok(());
        }
        let expr = operand.unwrap();

        if mode == AddressMode::Relative {
            return self.compile_relative(pos, mnemonic, opcode, addr, expr);
        }

        match self.eval.eval(expr) {
            Ok(_) => {
                let (_, mut bytes) = self.eval.get_expr_bytes(expr)?;
                let final_opcode = self.select_mode_for_bytes(pos.clone(), opcode, bytes.len())?;
                bytes.resize(final_opcode.mode.arg_width() as usize, 0);
                self.write_bytes(addr, &[final_opcode.byte]);
                self.write_bytes(addr.wrapping_add(1), &bytes);
                self.segment_mut().advance(final_opcode.width());
                Ok(())
            }
            Err(Error::UndefinedName { .. }) => {
                // Forward reference: reserve the widest form this mnemonic
                // supports so later resolution never needs to shift
                // already-emitted bytes.
                let reserved = opcode.promote16bits().unwrap_or(opcode);
                let fixup = self.eval.capture_fixup(expr.clone());
                self.pending.push(Pending {
                    addr,
                    fixup,
                    kind: PendingKind::Operation { opcode: reserved, next_addr: addr.wrapping_add(1) },
                });
                self.segment_mut().advance(reserved.width());
                Ok(())
            }
            Err(other) => Err(tag_pos(other, pos)),
        }
    }

    fn compile_relative(
        &mut self,
        pos: Pos,
        mnemonic: &str,
        opcode: Opcode,
        addr: u16,
        expr: &Expr,
    ) -> Result<()> {
        match self.eval.eval(expr) {
            Ok(Value::Int(target)) => {
                let offset = branch_offset(pos, mnemonic, target, addr)?;
                self.write_bytes(addr, &[opcode.byte, offset as u8]);
                self.segment_mut().advance(opcode.width());
                Ok(())
            }
            Ok(_) => Err(Error::ParseError { pos, message: "branch target must be numeric".to_owned() }),
            Err(Error::UndefinedName { .. }) => {
                let fixup = self.eval.capture_fixup(expr.clone());
                self.pending.push(Pending {
                    addr,
                    fixup,
                    kind: PendingKind::Operation { opcode, next_addr: addr.wrapping_add(1) },
                });
                self.segment_mut().advance(opcode.width());
                Ok(())
            }
            Err(other) => Err(tag_pos(other, pos)),
        }
    }

    /// Selects the addressing mode width for an evaluated operand based on
    /// its serialized byte length, per spec.md §4.6 steps 4-6: one byte
    /// keeps `base`'s mode as-is (already the narrow or syntactically
    /// forced-wide form the operand hint chose), two bytes promotes to the
    /// mnemonic's 16-bit mode (failing `AddressRangeError` if it has none),
    /// and anything wider (e.g. a multi-character string in operand
    /// position) fails `OperandTooLarge`.
    fn select_mode_for_bytes(&self, pos: Pos, base: Opcode, len: usize) -> Result<Opcode> {
        match len {
            0 | 1 => Ok(base),
            2 => base.promote16bits().ok_or(Error::AddressRangeError { pos }),
            len => Err(Error::OperandTooLarge { pos, len }),
        }
    }

    /// Retries every pending write. `must_pass` is set once, at the very
    /// end of compilation: a name that's still undefined there is a
    /// genuine unresolved forward reference and is reported as such. Any
    /// other failure (a branch that turned out too far, a value too wide
    /// for its operation, ...) is a real error in its own right and is
    /// surfaced unchanged rather than folded into `UnresolvedFixup`.
    fn drain_pending(&mut self, must_pass: bool) -> Result<()> {
        let mut remaining = Vec::new();
        let items = std::mem::take(&mut self.pending);
        for item in items {
            match self.try_resolve(&item) {
                Ok(()) => {}
                Err(e) if !must_pass && matches!(e, Error::UndefinedName { .. } | Error::CyclicReference { .. }) => {
                    log::trace!("fixup at {} still unresolved, retrying at next scope exit", item.fixup.pos);
                    remaining.push(item);
                }
                Err(Error::UndefinedName { .. }) if must_pass => {
                    return Err(Error::UnresolvedFixup { pos: item.fixup.pos.clone() })
                }
                Err(e) => return Err(e),
            }
        }
        self.pending = remaining;
        Ok(())
    }

    fn try_resolve(&mut self, item: &Pending) -> Result<()> {
        match &item.kind {
            PendingKind::Storage { width } => {
                let (_, bytes) = self.eval.resolve_fixup_bytes(&item.fixup)?;
                self.write_sized(item.addr, &bytes, *width);
                Ok(())
            }
            PendingKind::Operation { opcode, next_addr } => {
                if opcode.mode == AddressMode::Relative {
                    let value = self.eval.resolve_fixup(&item.fixup)?;
                    let target = match value {
                        Value::Int(v) => v,
                        _ => {
                            return Err(Error::ParseError {
                                pos: item.fixup.pos.clone(),
                                message: "branch target must be numeric".to_owned(),
                            })
                        }
                    };
                    let offset = branch_offset(item.fixup.pos.clone(), opcode.mnemonic, target, item.addr)?;
                    self.write_bytes(item.addr, &[opcode.byte, offset as u8]);
                } else {
                    let (_, mut bytes) = self.eval.resolve_fixup_bytes(&item.fixup)?;
                    bytes.resize(opcode.mode.arg_width() as usize, 0);
                    self.write_bytes(item.addr, &[opcode.byte]);
                    self.write_bytes(*next_addr, &bytes);
                }
                Ok(())
            }
        }
    }

    /// The smallest contiguous range covering every segment that actually
    /// received bytes, `(start, end)` with `end` exclusive — what a
    /// front-end writing a "raw" image should slice out of `memory`.
    /// `(0, 0)` if nothing was ever written.
    pub fn used_range(&self) -> (u16, u16) {
        let used: Vec<&Segment> = self.segments.values().filter(|s| s.end > s.start).collect();
        match (used.iter().map(|s| s.start).min(), used.iter().map(|s| s.end).max()) {
            (Some(start), Some(end)) => (start, end),
            _ => (0, 0),
        }
    }

    fn write_bytes(&mut self, addr: u16, bytes: &[u8]) {
        let start = addr as usize;
        for (i, &b) in bytes.iter().enumerate() {
            self.memory[(start + i) % MEMORY_SIZE] = b;
        }
    }

    fn write_sized(&mut self, addr: u16, bytes: &[u8], width: u16) {
        let mut sized = bytes.to_vec();
        sized.resize(width as usize, 0);
        self.write_bytes(addr, &sized);
    }
}

/// True when `expr` is syntactically marked as a 16-bit value: forced
/// with the `!` unary operator, or written as a literal wide enough
/// (`reducer::width_hint`) that the author evidently meant the absolute
/// form even though the value itself might fit in a byte.
fn is_forced_wide(expr: &Expr) -> bool {
    match expr {
        Expr::Unary { op: UnaryOp::Width16, .. } => true,
        Expr::Int { width_hint: Some(2), .. } => true,
        _ => false,
    }
}

fn as_address(pos: Pos, value: &Value) -> Result<u16> {
    match value {
        Value::Int(v) if (0..=0xffff).contains(v) => Ok(*v as u16),
        _ => Err(Error::AddressRangeError { pos }),
    }
}

fn branch_offset(pos: Pos, mnemonic: &str, target: i64, addr: u16) -> Result<i64> {
    let jump = target - (i64::from(addr) + 2);
    if !(-128..=127).contains(&jump) {
        return Err(Error::BranchOutOfRange { pos, mnemonic: mnemonic.to_owned() });
    }
    Ok(jump & 0xff)
}

fn tag_pos(err: Error, pos: Pos) -> Error {
    match err {
        Error::UndefinedName { name, .. } => Error::UndefinedName { pos, name },
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ContextManager;
    use crate::preprocessor::preprocess;
    use pretty_assertions::assert_eq;

    fn assemble(src: &str) -> CodeGen {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", src);
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        let mut gen = CodeGen::new();
        gen.compile(&mut ctx, &stmts).unwrap();
        gen
    }

    #[test]
    fn current_address_literal_resolves_to_write_cursor() {
        let gen = assemble(".text $0800\n  nop\n  adc #<*\n");
        assert_eq!(&gen.memory[0x0800..0x0803], &[0xEA, 0x69, 0x01]);
    }

    #[test]
    fn emits_implied_and_immediate() {
        let gen = assemble("nop\nadc #$80\n");
        let text = gen.segments["text"];
        assert_eq!(&gen.memory[0x0800..0x0803], &[0xEA, 0x69, 0x80]);
        assert_eq!(text.offset, 0x0803);
    }

    #[test]
    fn relative_branch_to_prior_label() {
        let gen = assemble(".text 0x0800\nloop:\n  nop\n  bcc loop\n");
        assert_eq!(&gen.memory[0x0800..0x0803], &[0xEA, 0x90, 0xFD]);
    }

    #[test]
    fn relative_branch_to_self() {
        let gen = assemble(".text 0x0800\nloop:\n  beq loop\n");
        assert_eq!(&gen.memory[0x0800..0x0802], &[0xF0, 0xFE]);
    }

    #[test]
    fn forward_reference_resolves_after_label_seen() {
        let gen = assemble("nop\n  jmp target\ntarget:\n  nop\n");
        assert_eq!(gen.memory[0x0800], 0xEA);
        assert_eq!(gen.memory[0x0801], 0x4C);
        let target_lo = gen.memory[0x0802];
        let target_hi = gen.memory[0x0803];
        let target_addr = u16::from_le_bytes([target_lo, target_hi]);
        assert_eq!(target_addr, 0x0804);
        assert_eq!(gen.memory[0x0804], 0xEA);
        assert_eq!(gen.symbol_map["target"], 0x0804);
    }

    #[test]
    fn byte_storage_matches_literal_order() {
        let gen = assemble(".data $0300\n.byte 1, 2, 3\n");
        assert_eq!(&gen.memory[0x0300..0x0303], &[1, 2, 3]);
    }

    #[test]
    fn segment_start_tracks_low_water_mark_after_lower_origin() {
        // A later `.text` origin below the segment's default start (0x0800)
        // pulls `start` down with it, not just `offset`/`end`.
        let gen = assemble(".text $0900\nnop\n.text $0700\nnop\n");
        assert_eq!(gen.segments["text"].start, 0x0700);
        assert_eq!(gen.segments["text"].end, 0x0901);
    }

    #[test]
    fn segment_bounds_track_high_water_mark() {
        let gen = assemble(".data $0300\n.byte 1,2,3,4,5\n.text $0800\n.byte 1,2,3,4,5\n");
        assert_eq!(gen.segments["text"].start, 0x0800);
        assert_eq!(gen.segments["text"].end, 0x0805);
        assert_eq!(gen.segments["data"].end, 0x0305);
    }

    #[test]
    fn zeropage_auto_selected_for_small_address() {
        let gen = assemble(".def lo 0x10\nlda lo\n");
        assert_eq!(&gen.memory[0x0800..0x0802], &[0xA5, 0x10]);
    }

    #[test]
    fn absolute_auto_selected_for_wide_address() {
        let gen = assemble(".def hi 0x1234\nlda hi\n");
        assert_eq!(&gen.memory[0x0800..0x0803], &[0xAD, 0x34, 0x12]);
    }

    #[test]
    fn force_width16_selects_absolute_even_for_byte_value() {
        let gen = assemble(".def lo 0x10\nlda !lo\n");
        assert_eq!(&gen.memory[0x0800..0x0803], &[0xAD, 0x10, 0x00]);
    }

    #[test]
    fn immediate_out_of_byte_range_fails() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", "adc #$1234\n");
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        let mut gen = CodeGen::new();
        let err = gen.compile(&mut ctx, &stmts).unwrap_err();
        assert!(matches!(err, Error::AddressRangeError { .. }));
    }

    #[test]
    fn string_operand_wider_than_two_bytes_fails() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", "lda \"abc\"\n");
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        let mut gen = CodeGen::new();
        let err = gen.compile(&mut ctx, &stmts).unwrap_err();
        assert!(matches!(err, Error::OperandTooLarge { len: 3, .. }));
    }

    #[test]
    fn dim_tiles_and_truncates_init_bytes() {
        let gen = assemble(".data $0300\n.dim 5, 1, 2\n");
        assert_eq!(&gen.memory[0x0300..0x0305], &[1, 2, 1, 2, 1]);
    }

    #[test]
    fn var_binds_name_and_size() {
        let gen = assemble(".bss $0010\n.var counter, 2\nlda counter\n");
        assert_eq!(gen.symbol_map["counter"], 0x0010);
        assert_eq!(&gen.memory[0x0800..0x0802], &[0xA5, 0x10]);
    }

    #[test]
    fn struct_fields_merge_into_enclosing_scope() {
        let gen = assemble(".struct point\n.var x, 1\n.var y, 1\n.end\nlda point.y\n");
        assert_eq!(&gen.memory[0x0800..0x0802], &[0xA5, 0x01]);
    }

    #[test]
    fn struct_fields_publish_into_symbol_map() {
        let gen = assemble(".struct point\n.var x, 1\n.var y, 1\n.end\n");
        assert_eq!(gen.symbol_map["point.x"], 0);
        assert_eq!(gen.symbol_map["point.y"], 1);
    }

    #[test]
    fn pragma_values_are_recorded_by_name() {
        let gen = assemble(".pragma c64_prg_start 0x0801\n");
        assert_eq!(gen.pragmas["c64_prg_start"], vec![0x0801]);
    }

    #[test]
    fn used_range_covers_only_written_segments() {
        let gen = assemble(".text 0x0800\nnop\n");
        assert_eq!(gen.used_range(), (0x0800, 0x0801));
    }

    #[test]
    fn implicit_byte_word_long_bindings_are_available() {
        // `.var`'s size expression can reference the implicit `byte`/
        // `word`/`long` bindings the spec installs at compilation start;
        // this only compiles at all if they resolve.
        let gen = assemble(".data $0300\n.var a, byte\n.var b, word\n.var c, long\n");
        assert_eq!(gen.symbol_map["a"], 0x0300);
        assert_eq!(gen.symbol_map["b"], 0x0301);
        assert_eq!(gen.symbol_map["c"], 0x0303);
        assert_eq!(gen.segments["data"].end, 0x0300 + 1 + 2 + 4);
    }
}
