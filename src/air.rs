use std::fmt;

use crate::{
    isa::{Condition, Opcode, Register},
    symbol::Span,
};

/// Assembly intermediate representation, one statement per instruction word
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Air {
    ast: Vec<AirStmt>,
}

impl Air {
    pub fn new() -> Self {
        Air { ast: Vec::new() }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.ast.push(stmt)
    }

    /// Statement at a 1-based word address.
    pub fn at_word(&self, word_addr: u16) -> Option<&AirStmt> {
        self.ast.get((word_addr as usize).checked_sub(1)?)
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AirStmt> {
        self.ast.iter()
    }

    /// Flat machine code, each word high byte first.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.ast
            .iter()
            .flat_map(|stmt| stmt.instr.emit().to_be_bytes())
            .collect()
    }
}

/// Encoded instruction together with where it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AirStmt {
    pub instr: Instr,
    /// 1-based source line
    pub line: usize,
    pub span: Span,
}

/// A single decoded instruction. Field names follow the register slots of the encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Nop,
    /// Load an 8-bit immediate into `dest`
    Ldi { dest: Register, imm: u8 },
    /// `dest = a + b`
    Add { a: Register, b: Register, dest: Register },
    /// `dest = a - b`
    Sub { a: Register, b: Register, dest: Register },
    /// `dest = a ^ b`
    Xor { a: Register, b: Register, dest: Register },
    /// `dest = src >> 1`
    Rsh { src: Register, dest: Register },
    /// `reg = reg + imm`, the immediate taken as its two's complement byte
    Adi { reg: Register, imm: u8 },
    /// Branch to a 1-based word address if `cond` holds
    Brh { cond: Condition, addr: u16 },
    Jmp { addr: u16 },
    /// Push the return address and jump
    Cal { addr: u16 },
    Ret,
    /// `reg = mem[base + offset]`
    Lod { base: Register, reg: Register, offset: i8 },
    /// `mem[base + offset] = reg`
    Str { base: Register, reg: Register, offset: i8 },
}

/// What a single bit of an instruction word encodes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Field {
    Opcode,
    Register,
    Immediate,
    Address,
    Condition,
    Offset,
    Unused,
}

const ADDR_MASK: u16 = 0x3FF;

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Nop => Opcode::Nop,
            Instr::Ldi { .. } => Opcode::Ldi,
            Instr::Add { .. } => Opcode::Add,
            Instr::Sub { .. } => Opcode::Sub,
            Instr::Xor { .. } => Opcode::Xor,
            Instr::Rsh { .. } => Opcode::Rsh,
            Instr::Adi { .. } => Opcode::Adi,
            Instr::Brh { .. } => Opcode::Brh,
            Instr::Jmp { .. } => Opcode::Jmp,
            Instr::Cal { .. } => Opcode::Cal,
            Instr::Ret => Opcode::Ret,
            Instr::Lod { .. } => Opcode::Lod,
            Instr::Str { .. } => Opcode::Str,
        }
    }

    /// Jump, branch or call target, if this instruction has one.
    pub fn target(&self) -> Option<u16> {
        match self {
            Instr::Brh { addr, .. } | Instr::Jmp { addr } | Instr::Cal { addr } => {
                Some(*addr & ADDR_MASK)
            }
            _ => None,
        }
    }

    /// Encode into a 16-bit word. Addresses keep only their low 10 bits.
    pub fn emit(&self) -> u16 {
        let op = (self.opcode() as u16) << 12;
        let reg = |r: &Register, shift: u16| (r.index() as u16) << shift;
        op | match self {
            Instr::Nop | Instr::Ret => 0,
            Instr::Ldi { dest, imm } => reg(dest, 8) | *imm as u16,
            Instr::Add { a, b, dest } | Instr::Sub { a, b, dest } | Instr::Xor { a, b, dest } => {
                reg(a, 8) | reg(b, 4) | reg(dest, 0)
            }
            Instr::Rsh { src, dest } => reg(src, 8) | reg(dest, 0),
            Instr::Adi { reg: r, imm } => reg(r, 8) | *imm as u16,
            Instr::Brh { cond, addr } => (*cond as u16) << 10 | (addr & ADDR_MASK),
            Instr::Jmp { addr } | Instr::Cal { addr } => addr & ADDR_MASK,
            Instr::Lod { base, reg: r, offset } | Instr::Str { base, reg: r, offset } => {
                reg(base, 8) | reg(r, 4) | (*offset as u8 as u16 & 0xF)
            }
        }
    }

    /// Decode a word. Returns the opcode nibble if it is unassigned.
    pub fn decode(word: u16) -> Result<Instr, u8> {
        let nibble = (word >> 12) as u8;
        let op = Opcode::from_nibble(nibble).ok_or(nibble)?;
        let ra = Register::from_bits(word >> 8);
        let rb = Register::from_bits(word >> 4);
        let rc = Register::from_bits(word);
        let imm = (word & 0xFF) as u8;
        let addr = word & ADDR_MASK;
        // Sign-extend the low nibble
        let offset = ((word as u8) << 4) as i8 >> 4;

        Ok(match op {
            Opcode::Nop => Instr::Nop,
            Opcode::Ldi => Instr::Ldi { dest: ra, imm },
            Opcode::Add => Instr::Add { a: ra, b: rb, dest: rc },
            Opcode::Sub => Instr::Sub { a: ra, b: rb, dest: rc },
            Opcode::Xor => Instr::Xor { a: ra, b: rb, dest: rc },
            Opcode::Rsh => Instr::Rsh { src: ra, dest: rc },
            Opcode::Adi => Instr::Adi { reg: ra, imm },
            Opcode::Brh => Instr::Brh {
                cond: Condition::from_bits(word >> 10),
                addr,
            },
            Opcode::Jmp => Instr::Jmp { addr },
            Opcode::Cal => Instr::Cal { addr },
            Opcode::Ret => Instr::Ret,
            Opcode::Lod => Instr::Lod { base: ra, reg: rb, offset },
            Opcode::Str => Instr::Str { base: ra, reg: rb, offset },
        })
    }

    /// Classify every bit of a word with top nibble `nibble`, most significant bit first.
    pub fn field_layout(nibble: u8) -> [Field; 16] {
        let mut layout = [Field::Unused; 16];
        layout[..4].fill(Field::Opcode);
        let low = &mut layout[4..];
        match Opcode::from_nibble(nibble) {
            Some(Opcode::Add | Opcode::Sub | Opcode::Xor) => low.fill(Field::Register),
            Some(Opcode::Rsh) => {
                low[..4].fill(Field::Register);
                low[8..].fill(Field::Register);
            }
            Some(Opcode::Ldi | Opcode::Adi) => {
                low[..4].fill(Field::Register);
                low[4..].fill(Field::Immediate);
            }
            Some(Opcode::Jmp | Opcode::Cal) => low[2..].fill(Field::Address),
            Some(Opcode::Brh) => {
                low[..2].fill(Field::Condition);
                low[2..].fill(Field::Address);
            }
            Some(Opcode::Lod | Opcode::Str) => {
                low[..8].fill(Field::Register);
                low[8..].fill(Field::Offset);
            }
            Some(Opcode::Nop | Opcode::Ret) | None => {}
        }
        layout
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match self {
            Instr::Nop | Instr::Ret => write!(f, "{op}"),
            Instr::Ldi { dest, imm } => write!(f, "{op} {dest}, {imm}"),
            Instr::Add { a, b, dest } | Instr::Sub { a, b, dest } | Instr::Xor { a, b, dest } => {
                write!(f, "{op} {a}, {b}, {dest}")
            }
            Instr::Rsh { src, dest } => write!(f, "{op} {src}, {dest}"),
            Instr::Adi { reg, imm } => write!(f, "{op} {reg}, {}", *imm as i8),
            Instr::Brh { cond, addr } => write!(f, "{op} {cond}, {addr}"),
            Instr::Jmp { addr } | Instr::Cal { addr } => write!(f, "{op} {addr}"),
            Instr::Lod { base, reg, offset } | Instr::Str { base, reg, offset } => {
                write!(f, "{op} {base}, {reg}, {offset}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u16) -> Register {
        Register::from_bits(n)
    }

    #[test]
    fn emit_matches_encoding_table() {
        assert_eq!(Instr::Ldi { dest: r(1), imm: 5 }.emit(), 0x1105);
        assert_eq!(Instr::Add { a: r(1), b: r(2), dest: r(3) }.emit(), 0x2123);
        assert_eq!(Instr::Rsh { src: r(4), dest: r(5) }.emit(), 0x7405);
        assert_eq!(Instr::Adi { reg: r(2), imm: 0xFF }.emit(), 0x92FF);
        assert_eq!(Instr::Brh { cond: Condition::Lt, addr: 5 }.emit(), 0x4C05);
        assert_eq!(Instr::Cal { addr: 1000 }.emit(), 0xC3E8);
        assert_eq!(Instr::Ret.emit(), 0xD000);
        assert_eq!(Instr::Str { base: r(15), reg: r(8), offset: -1 }.emit(), 0xFF8F);
    }

    #[test]
    fn address_1024_wraps_to_zero() {
        let word = Instr::Jmp { addr: 1024 }.emit();
        assert_eq!(word, 0x5000);
        assert_eq!(Instr::decode(word), Ok(Instr::Jmp { addr: 0 }));
    }

    #[test]
    fn decode_sign_extends_offsets() {
        assert_eq!(
            Instr::decode(0xE128),
            Ok(Instr::Lod { base: r(1), reg: r(2), offset: -8 })
        );
        assert_eq!(
            Instr::decode(0xF127),
            Ok(Instr::Str { base: r(1), reg: r(2), offset: 7 })
        );
    }

    #[test]
    fn decode_ignores_unused_bits() {
        assert_eq!(Instr::decode(0x0FFF), Ok(Instr::Nop));
        assert_eq!(Instr::decode(0x71F2), Ok(Instr::Rsh { src: r(1), dest: r(2) }));
        assert_eq!(Instr::decode(0x5C05), Ok(Instr::Jmp { addr: 5 }));
    }

    #[test]
    fn decode_rejects_unassigned_nibbles() {
        assert_eq!(Instr::decode(0x8000), Err(0x8));
        assert_eq!(Instr::decode(0xA123), Err(0xA));
        assert_eq!(Instr::decode(0xBFFF), Err(0xB));
    }

    #[test]
    fn disassembles() {
        assert_eq!(Instr::decode(0x1105).unwrap().to_string(), "LDI R1, 5");
        assert_eq!(Instr::decode(0x91FF).unwrap().to_string(), "ADI R1, -1");
        assert_eq!(Instr::decode(0x4805).unwrap().to_string(), "BRH GE, 5");
        assert_eq!(Instr::decode(0xEF80).unwrap().to_string(), "LOD R15, R8, 0");
    }

    #[test]
    fn field_layouts() {
        use Field::*;
        let rsh = Instr::field_layout(0x7);
        assert_eq!(&rsh[..4], &[Opcode; 4]);
        assert_eq!(&rsh[4..8], &[Register; 4]);
        assert_eq!(&rsh[8..12], &[Unused; 4]);
        assert_eq!(&rsh[12..], &[Register; 4]);

        let brh = Instr::field_layout(0x4);
        assert_eq!(&brh[4..6], &[Condition; 2]);
        assert_eq!(&brh[6..], &[Address; 10]);

        let jmp = Instr::field_layout(0x5);
        assert_eq!(&jmp[4..6], &[Unused; 2]);

        let lod = Instr::field_layout(0xE);
        assert_eq!(&lod[12..], &[Offset; 4]);

        assert_eq!(&Instr::field_layout(0xD)[4..], &[Unused; 12]);
        assert_eq!(&Instr::field_layout(0xA)[4..], &[Unused; 12]);
    }

    #[test]
    fn air_bytes_are_big_endian() {
        let mut air = Air::new();
        for instr in [Instr::Ldi { dest: r(1), imm: 5 }, Instr::Ret] {
            air.add_stmt(AirStmt { instr, line: 1, span: Span::dummy() });
        }
        assert_eq!(air.to_bytes(), vec![0x11, 0x05, 0xD0, 0x00]);
        assert_eq!(air.at_word(2).map(|stmt| stmt.instr), Some(Instr::Ret));
        assert!(air.at_word(0).is_none());
    }
}
