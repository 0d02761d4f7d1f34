//! NMOS 6502 instruction table: `(mnemonic, address-mode) -> opcode byte`,
//! argument widths, and 8-to-16-bit address-mode promotion.
//!
//! Grounded in `examples/original_source/xcomp/cpu6502.py`'s `opcode_xref`,
//! `addressmode_arg_width`, and `addressmode_8to16` tables. That file's
//! `OpCode` wrapper type did not survive into the kept draft (an
//! incomplete draft per spec.md §9's "competing drafts" note), so the
//! `Opcode` struct here is original plumbing around the recovered data,
//! following the field shape `model.py::Op` expects (`op`, `arg`).

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// One of the 13 syntactic operand shapes the 6502 supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Accumulator,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Immediate,
    Implied,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
    Zeropage,
    ZeropageX,
    ZeropageY,
}

impl AddressMode {
    /// Number of argument bytes this mode encodes, excluding the opcode
    /// byte itself.
    pub fn arg_width(self) -> u16 {
        use AddressMode::*;
        match self {
            Accumulator | Implied => 0,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 2,
            Immediate | IndirectX | IndirectY | Relative | Zeropage | ZeropageX | ZeropageY => 1,
        }
    }

    /// The 16-bit mode this 8-bit mode promotes to, if any. Absolute and
    /// indirect modes map to themselves; relative has no promotion (it is
    /// fixed-width); immediate/implied/accumulator/indexed-indirect modes
    /// have no 16-bit counterpart at all.
    pub fn promote16(self) -> Option<AddressMode> {
        use AddressMode::*;
        match self {
            Zeropage => Some(Absolute),
            ZeropageX => Some(AbsoluteX),
            ZeropageY => Some(AbsoluteY),
            Absolute => Some(Absolute),
            AbsoluteX => Some(AbsoluteX),
            AbsoluteY => Some(AbsoluteY),
            Indirect => Some(Indirect),
            _ => None,
        }
    }
}

/// A resolved `(mnemonic, address-mode)` pair with its cached opcode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opcode {
    pub mnemonic: &'static str,
    pub mode: AddressMode,
    pub byte: u8,
}

impl Opcode {
    pub fn width(&self) -> u16 {
        1 + self.mode.arg_width()
    }

    /// Looks up the same mnemonic under this opcode's 16-bit-promoted
    /// address mode. Fails (returns `None`) if the mnemonic does not admit
    /// that mode.
    pub fn promote16bits(&self) -> Option<Opcode> {
        let wide_mode = self.mode.promote16()?;
        lookup(self.mnemonic, wide_mode)
    }
}

type Table = HashMap<(&'static str, AddressMode), u8>;

fn build_table() -> Table {
    use AddressMode::*;
    let mut t: Table = HashMap::new();
    macro_rules! op {
        ($mnemonic:literal, $mode:expr, $byte:literal) => {
            t.insert(($mnemonic, $mode), $byte);
        };
    }

    op!("adc", Immediate, 0x69);
    op!("adc", Zeropage, 0x65);
    op!("adc", ZeropageX, 0x75);
    op!("adc", Absolute, 0x6d);
    op!("adc", AbsoluteX, 0x7d);
    op!("adc", AbsoluteY, 0x79);
    op!("adc", IndirectX, 0x61);
    op!("adc", IndirectY, 0x71);

    op!("and", Immediate, 0x29);
    op!("and", Zeropage, 0x25);
    op!("and", ZeropageX, 0x35);
    op!("and", Absolute, 0x2d);
    op!("and", AbsoluteX, 0x3d);
    op!("and", AbsoluteY, 0x39);
    op!("and", IndirectX, 0x21);
    op!("and", IndirectY, 0x31);

    op!("asl", Accumulator, 0x0a);
    op!("asl", Zeropage, 0x06);
    op!("asl", ZeropageX, 0x16);
    op!("asl", Absolute, 0x0e);
    op!("asl", AbsoluteX, 0x1e);

    op!("bcc", Relative, 0x90);
    op!("bcs", Relative, 0xb0);
    op!("beq", Relative, 0xf0);

    op!("bit", Zeropage, 0x24);
    op!("bit", Absolute, 0x2c);

    op!("bmi", Relative, 0x30);
    op!("bne", Relative, 0xd0);
    op!("bpl", Relative, 0x10);

    op!("brk", Implied, 0x00);

    op!("bvc", Relative, 0x70);
    op!("bvs", Relative, 0x50);

    op!("clc", Implied, 0x18);
    op!("cld", Implied, 0xd8);
    op!("cli", Implied, 0x58);
    op!("clv", Implied, 0xb8);

    op!("cmp", Immediate, 0xc9);
    op!("cmp", Zeropage, 0xc5);
    op!("cmp", ZeropageX, 0xd5);
    op!("cmp", Absolute, 0xcd);
    op!("cmp", AbsoluteX, 0xdd);
    op!("cmp", AbsoluteY, 0xd9);
    op!("cmp", IndirectX, 0xc1);
    op!("cmp", IndirectY, 0xd1);

    op!("cpx", Immediate, 0xe0);
    op!("cpx", Zeropage, 0xe4);
    op!("cpx", Absolute, 0xec);

    op!("cpy", Immediate, 0xc0);
    op!("cpy", Zeropage, 0xc4);
    op!("cpy", Absolute, 0xcc);

    op!("dec", Zeropage, 0xc6);
    op!("dec", ZeropageX, 0xd6);
    op!("dec", Absolute, 0xce);
    op!("dec", AbsoluteX, 0xde);

    op!("dex", Implied, 0xca);
    op!("dey", Implied, 0x88);

    op!("eor", Immediate, 0x49);
    op!("eor", Zeropage, 0x45);
    op!("eor", ZeropageX, 0x55);
    op!("eor", Absolute, 0x4d);
    op!("eor", AbsoluteX, 0x5d);
    op!("eor", AbsoluteY, 0x59);
    op!("eor", IndirectX, 0x41);
    op!("eor", IndirectY, 0x51);

    op!("inc", Zeropage, 0xe6);
    op!("inc", ZeropageX, 0xf6);
    op!("inc", Absolute, 0xee);
    op!("inc", AbsoluteX, 0xfe);

    op!("inx", Implied, 0xe8);
    op!("iny", Implied, 0xc8);

    op!("jmp", Absolute, 0x4c);
    op!("jmp", Indirect, 0x6c);

    op!("jsr", Absolute, 0x20);

    op!("lda", Immediate, 0xa9);
    op!("lda", Zeropage, 0xa5);
    op!("lda", ZeropageX, 0xb5);
    op!("lda", Absolute, 0xad);
    op!("lda", AbsoluteX, 0xbd);
    op!("lda", AbsoluteY, 0xb9);
    op!("lda", IndirectX, 0xa1);
    op!("lda", IndirectY, 0xb1);

    op!("ldx", Immediate, 0xa2);
    op!("ldx", Zeropage, 0xa6);
    op!("ldx", ZeropageY, 0xb6);
    op!("ldx", Absolute, 0xae);
    op!("ldx", AbsoluteY, 0xbe);

    op!("ldy", Immediate, 0xa0);
    op!("ldy", Zeropage, 0xa4);
    op!("ldy", ZeropageX, 0xb4);
    op!("ldy", Absolute, 0xac);
    op!("ldy", AbsoluteX, 0xbc);

    op!("lsr", Accumulator, 0x4a);
    op!("lsr", Zeropage, 0x46);
    op!("lsr", ZeropageX, 0x56);
    op!("lsr", Absolute, 0x4e);
    op!("lsr", AbsoluteX, 0x5e);

    op!("nop", Implied, 0xea);

    op!("ora", Immediate, 0x09);
    op!("ora", Zeropage, 0x05);
    op!("ora", ZeropageX, 0x15);
    op!("ora", Absolute, 0x0d);
    op!("ora", AbsoluteX, 0x1d);
    op!("ora", AbsoluteY, 0x19);
    op!("ora", IndirectX, 0x01);
    op!("ora", IndirectY, 0x11);

    op!("pha", Implied, 0x48);
    op!("php", Implied, 0x08);
    op!("pla", Implied, 0x68);
    op!("plp", Implied, 0x28);

    op!("rol", Accumulator, 0x2a);
    op!("rol", Zeropage, 0x26);
    op!("rol", ZeropageX, 0x36);
    op!("rol", Absolute, 0x2e);
    op!("rol", AbsoluteX, 0x3e);

    op!("ror", Accumulator, 0x6a);
    op!("ror", Zeropage, 0x66);
    op!("ror", ZeropageX, 0x76);
    op!("ror", Absolute, 0x6e);
    op!("ror", AbsoluteX, 0x7e);

    op!("rti", Implied, 0x40);
    op!("rts", Implied, 0x60);

    op!("sbc", Immediate, 0xe9);
    op!("sbc", Zeropage, 0xe5);
    op!("sbc", ZeropageX, 0xf5);
    op!("sbc", Absolute, 0xed);
    op!("sbc", AbsoluteX, 0xfd);
    op!("sbc", AbsoluteY, 0xf9);
    op!("sbc", IndirectX, 0xe1);
    op!("sbc", IndirectY, 0xf1);

    op!("sec", Implied, 0x38);
    op!("sed", Implied, 0xf8);
    op!("sei", Implied, 0x78);

    op!("sta", Zeropage, 0x85);
    op!("sta", ZeropageX, 0x95);
    op!("sta", Absolute, 0x8d);
    op!("sta", AbsoluteX, 0x9d);
    op!("sta", AbsoluteY, 0x99);
    op!("sta", IndirectX, 0x81);
    op!("sta", IndirectY, 0x91);

    op!("stx", Zeropage, 0x86);
    op!("stx", ZeropageY, 0x96);
    op!("stx", Absolute, 0x8e);

    op!("sty", Zeropage, 0x84);
    op!("sty", ZeropageX, 0x94);
    op!("sty", Absolute, 0x8c);

    op!("tax", Implied, 0xaa);
    op!("tay", Implied, 0xa8);
    op!("tsx", Implied, 0xba);
    op!("txa", Implied, 0x8a);
    op!("txs", Implied, 0x9a);
    op!("tya", Implied, 0x98);

    t
}

static TABLE: Lazy<Table> = Lazy::new(build_table);

fn table() -> &'static Table {
    &TABLE
}

/// Looks up the opcode byte for `(mnemonic, mode)`, returning an `Opcode`
/// that caches the byte alongside the mnemonic (interned as the table's
/// static key) and mode.
pub fn lookup(mnemonic: &str, mode: AddressMode) -> Option<Opcode> {
    table().iter().find_map(|(&(name, m), &byte)| {
        if name.eq_ignore_ascii_case(mnemonic) && m == mode {
            Some(Opcode {
                mnemonic: name,
                mode,
                byte,
            })
        } else {
            None
        }
    })
}

/// True if `mnemonic` is a recognized operation at all, in any mode.
pub fn is_mnemonic(mnemonic: &str) -> bool {
    table()
        .keys()
        .any(|&(name, _)| name.eq_ignore_ascii_case(mnemonic))
}

/// All address modes `mnemonic` legally admits.
pub fn modes_for(mnemonic: &str) -> Vec<AddressMode> {
    table()
        .keys()
        .filter(|&&(name, _)| name.eq_ignore_ascii_case(mnemonic))
        .map(|&(_, mode)| mode)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adc_zeropage_opcode() {
        let op = lookup("adc", AddressMode::Zeropage).unwrap();
        assert_eq!(op.byte, 0x65);
        assert_eq!(op.width(), 2);
    }

    #[test]
    fn adc_zeropage_promotes_to_absolute() {
        let op = lookup("adc", AddressMode::Zeropage).unwrap();
        let wide = op.promote16bits().unwrap();
        assert_eq!(wide.mode, AddressMode::Absolute);
        assert_eq!(wide.byte, 0x6d);
        assert_eq!(wide.width(), 3);
    }

    #[test]
    fn beq_relative_does_not_promote() {
        let op = lookup("beq", AddressMode::Relative).unwrap();
        assert!(op.promote16bits().is_none());
    }

    #[test]
    fn implied_has_zero_width_argument() {
        assert_eq!(AddressMode::Implied.arg_width(), 0);
        assert_eq!(lookup("nop", AddressMode::Implied).unwrap().width(), 1);
    }

    #[test]
    fn case_insensitive_lookup() {
        assert_eq!(
            lookup("ADC", AddressMode::Immediate),
            lookup("adc", AddressMode::Immediate)
        );
    }

    #[test]
    fn indirect_x_has_no_absolute_form() {
        // indirect,x / indirect,y modes have no 16-bit counterpart at all.
        let op = lookup("lda", AddressMode::IndirectX).unwrap();
        assert!(op.promote16bits().is_none());
    }
}
