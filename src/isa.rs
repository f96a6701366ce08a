//! Opcode and operand tables shared by the assembler and the simulator.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Instruction memory size in bytes.
pub const INST_MEM_BYTES: usize = 2048;
/// Highest addressable word. Word addresses are 1-based.
pub const INST_MEM_WORDS: u16 = (INST_MEM_BYTES / 2) as u16;
/// Data memory size in bytes.
pub const DATA_MEM_SIZE: usize = 256;
pub const NUM_REGISTERS: usize = 16;
/// Maximum depth of the return-address stack.
pub const STACK_DEPTH: usize = 16;

/// Every assigned opcode. Nibbles 0x8, 0xA and 0xB have no instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    Nop = 0x0,
    Ldi = 0x1,
    Add = 0x2,
    Sub = 0x3,
    Brh = 0x4,
    Jmp = 0x5,
    Xor = 0x6,
    Rsh = 0x7,
    Adi = 0x9,
    Cal = 0xC,
    Ret = 0xD,
    Lod = 0xE,
    Str = 0xF,
}

/// Kind of value an operand slot accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    /// `R0`..`R15`
    Register,
    /// -128..=255, stored as 8 bits
    Immediate,
    /// 1-based word address or label
    Address,
    /// `EQ`, `NE`, `GE` or `LT`
    Condition,
    /// -8..=7, stored as 4 bits
    Offset,
}

impl Opcode {
    pub const ALL: [Opcode; 13] = [
        Opcode::Nop,
        Opcode::Ldi,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Brh,
        Opcode::Jmp,
        Opcode::Xor,
        Opcode::Rsh,
        Opcode::Adi,
        Opcode::Cal,
        Opcode::Ret,
        Opcode::Lod,
        Opcode::Str,
    ];

    /// Opcode for the top nibble of an instruction word.
    pub fn from_nibble(nibble: u8) -> Option<Opcode> {
        Self::ALL.into_iter().find(|op| *op as u8 == nibble)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Ldi => "LDI",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Brh => "BRH",
            Opcode::Jmp => "JMP",
            Opcode::Xor => "XOR",
            Opcode::Rsh => "RSH",
            Opcode::Adi => "ADI",
            Opcode::Cal => "CAL",
            Opcode::Ret => "RET",
            Opcode::Lod => "LOD",
            Opcode::Str => "STR",
        }
    }

    /// Operand signature, in source order.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind as K;
        match self {
            Opcode::Nop | Opcode::Ret => &[],
            Opcode::Ldi | Opcode::Adi => &[K::Register, K::Immediate],
            Opcode::Add | Opcode::Sub | Opcode::Xor => &[K::Register, K::Register, K::Register],
            Opcode::Rsh => &[K::Register, K::Register],
            Opcode::Brh => &[K::Condition, K::Address],
            Opcode::Jmp | Opcode::Cal => &[K::Address],
            Opcode::Lod | Opcode::Str => &[K::Register, K::Register, K::Offset],
        }
    }
}

impl FromStr for Opcode {
    type Err = ();

    /// Case-insensitive lookup of a real (non-pseudo) mnemonic.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Mnemonics whose natural opcode collides with an assigned one.
/// Each entry names the opcode occupying its slot.
pub const UNAVAILABLE: [(&str, Opcode); 3] = [
    ("HLT", Opcode::Ldi),
    ("NOR", Opcode::Brh),
    ("AND", Opcode::Jmp),
];

/// Returns the opcode blocking `mnemonic`, if it is one of the unavailable ones.
pub fn unavailable(mnemonic: &str) -> Option<Opcode> {
    UNAVAILABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(mnemonic))
        .map(|(_, op)| *op)
}

/// Operand of a pseudo-instruction template.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Slot {
    /// Operand `n` as written by the user
    Arg(usize),
    /// Fixed operand text
    Fixed(&'static str),
}

/// Rewrite rule for a pseudo-instruction.
#[derive(Clone, Copy, Debug)]
pub struct Pseudo {
    pub name: &'static str,
    pub arity: usize,
    pub target: &'static str,
    pub template: &'static [Slot],
}

pub static PSEUDO_INSTRUCTIONS: [Pseudo; 7] = [
    Pseudo {
        name: "CMP",
        arity: 2,
        target: "SUB",
        template: &[Slot::Arg(0), Slot::Arg(1), Slot::Fixed("R0")],
    },
    Pseudo {
        name: "MOV",
        arity: 2,
        target: "ADD",
        template: &[Slot::Arg(1), Slot::Fixed("R0"), Slot::Arg(0)],
    },
    Pseudo {
        name: "NEG",
        arity: 2,
        target: "SUB",
        template: &[Slot::Fixed("R0"), Slot::Arg(0), Slot::Arg(1)],
    },
    Pseudo {
        name: "INC",
        arity: 1,
        target: "ADI",
        template: &[Slot::Arg(0), Slot::Fixed("1")],
    },
    Pseudo {
        name: "DEC",
        arity: 1,
        target: "ADI",
        template: &[Slot::Arg(0), Slot::Fixed("-1")],
    },
    Pseudo {
        name: "LSH",
        arity: 2,
        target: "ADD",
        template: &[Slot::Arg(0), Slot::Arg(0), Slot::Arg(1)],
    },
    Pseudo {
        name: "NOT",
        arity: 2,
        target: "NOR",
        template: &[Slot::Arg(0), Slot::Fixed("R0"), Slot::Arg(1)],
    },
];

pub fn pseudo(mnemonic: &str) -> Option<&'static Pseudo> {
    PSEUDO_INSTRUCTIONS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(mnemonic))
}

/// One of the sixteen general purpose registers. `R0` is wired to zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Register(u8);

impl Register {
    pub const ZERO: Register = Register(0);

    /// Register from the low nibble of `bits`.
    pub fn from_bits(bits: u16) -> Self {
        Register((bits & 0xF) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('R')
            .or_else(|| s.strip_prefix('r'))
            .ok_or(())?;
        // Only canonical spellings: `R7`, never `R07` or `R+7`
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || (digits.len() > 1 && digits.starts_with('0'))
        {
            return Err(());
        }
        match digits.parse::<u8>() {
            Ok(n) if (n as usize) < NUM_REGISTERS => Ok(Register(n)),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// ALU status flags.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize)]
pub struct Flags {
    /// Last arithmetic result was zero
    #[serde(rename = "Z")]
    pub zero: bool,
    /// Last arithmetic operation carried out of bit 7 (no borrow, for subtraction)
    #[serde(rename = "C")]
    pub carry: bool,
}

/// Branch condition encoded in bits 11..10 of `BRH`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Condition {
    /// Z set
    Eq = 0b00,
    /// Z clear
    Ne = 0b01,
    /// C set
    Ge = 0b10,
    /// C clear
    Lt = 0b11,
}

impl Condition {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Condition::Eq,
            0b01 => Condition::Ne,
            0b10 => Condition::Ge,
            _ => Condition::Lt,
        }
    }

    pub fn holds(self, flags: Flags) -> bool {
        match self {
            Condition::Eq => flags.zero,
            Condition::Ne => !flags.zero,
            Condition::Ge => flags.carry,
            Condition::Lt => !flags.carry,
        }
    }
}

impl FromStr for Condition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EQ" => Ok(Condition::Eq),
            "NE" => Ok(Condition::Ne),
            "GE" => Ok(Condition::Ge),
            "LT" => Ok(Condition::Lt),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Condition::Eq => "EQ",
            Condition::Ne => "NE",
            Condition::Ge => "GE",
            Condition::Lt => "LT",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_nibbles_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_nibble(op as u8), Some(op));
        }
        for nibble in [0x8, 0xA, 0xB] {
            assert_eq!(Opcode::from_nibble(nibble), None);
        }
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        assert_eq!("add".parse(), Ok(Opcode::Add));
        assert_eq!("Brh".parse(), Ok(Opcode::Brh));
        assert_eq!("HLT".parse::<Opcode>(), Err(()));
    }

    #[test]
    fn unavailable_mnemonics_name_their_collision() {
        assert_eq!(unavailable("hlt"), Some(Opcode::Ldi));
        assert_eq!(unavailable("NOR"), Some(Opcode::Brh));
        assert_eq!(unavailable("and"), Some(Opcode::Jmp));
        assert_eq!(unavailable("ADD"), None);
    }

    #[test]
    fn register_names() {
        assert_eq!("R0".parse(), Ok(Register(0)));
        assert_eq!("r15".parse(), Ok(Register(15)));
        assert_eq!("R16".parse::<Register>(), Err(()));
        assert_eq!("R07".parse::<Register>(), Err(()));
        assert_eq!("R".parse::<Register>(), Err(()));
        assert_eq!("X1".parse::<Register>(), Err(()));
        assert_eq!("R-1".parse::<Register>(), Err(()));
    }

    #[test]
    fn conditions_follow_flags() {
        let zero = Flags { zero: true, carry: false };
        let carry = Flags { zero: false, carry: true };
        assert!(Condition::Eq.holds(zero));
        assert!(!Condition::Ne.holds(zero));
        assert!(Condition::Ge.holds(carry));
        assert!(Condition::Lt.holds(zero));
        assert_eq!("lt".parse(), Ok(Condition::Lt));
        assert_eq!(Condition::from_bits(0b10), Condition::Ge);
    }

    #[test]
    fn pseudo_table_targets() {
        assert_eq!(pseudo("cmp").map(|p| p.target), Some("SUB"));
        assert_eq!(pseudo("inc").map(|p| p.arity), Some(1));
        assert!(pseudo("ADD").is_none());
        // Every pseudo target is a real mnemonic or a reserved one
        for p in &PSEUDO_INSTRUCTIONS {
            assert!(p.target.parse::<Opcode>().is_ok() || unavailable(p.target).is_some());
        }
    }
}
