use std::fmt;

use miette::{miette, Diagnostic, LabeledSpan, Report, Severity, SourceCode};
use thiserror::Error;

use crate::isa::Opcode;
use crate::symbol::Span;

/// Broad grouping of assembler failures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorCategory {
    Syntax,
    OperandRange,
    Label,
    UnavailableOpcode,
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum AsmErrorKind {
    #[error("Unknown mnemonic '{0}'")]
    UnknownMnemonic(String),
    #[error("'{mnemonic}' expects {expected} operands, got {found}")]
    OperandCount {
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid register '{0}'")]
    InvalidRegister(String),
    #[error("Invalid condition '{0}'")]
    InvalidCondition(String),
    #[error("Invalid {what} '{text}'")]
    InvalidInteger { what: &'static str, text: String },
    #[error("Immediate '{0}' out of range (-128 to 255)")]
    ImmediateOutOfRange(String),
    #[error("Offset '{0}' out of range (-8 to 7)")]
    OffsetOutOfRange(String),
    #[error("Word Address '{0}' out of range (1-1024)")]
    AddressOutOfRange(String),
    #[error("Target address {target} out of encodable range (1-1024) for {mnemonic}")]
    TargetOutOfRange { mnemonic: Opcode, target: u32 },
    #[error("Undefined label or invalid address '{0}'")]
    UndefinedLabel(String),
    #[error("Duplicate label '{name}' (first declared at Word Addr {first})")]
    DuplicateLabel { name: String, first: u32 },
    #[error("Invalid label name '{0}'")]
    InvalidLabelName(String),
    #[error("Empty label")]
    EmptyLabel,
    #[error("Mnemonic '{mnemonic}' is currently unavailable due to opcode conflict with {taken_by}")]
    UnavailableOpcode { mnemonic: String, taken_by: Opcode },
}

impl AsmErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use AsmErrorKind::*;
        match self {
            UnknownMnemonic(_)
            | OperandCount { .. }
            | InvalidRegister(_)
            | InvalidCondition(_)
            | InvalidInteger { .. } => ErrorCategory::Syntax,
            ImmediateOutOfRange(_)
            | OffsetOutOfRange(_)
            | AddressOutOfRange(_)
            | TargetOutOfRange { .. } => ErrorCategory::OperandRange,
            UndefinedLabel(_) | DuplicateLabel { .. } | InvalidLabelName(_) | EmptyLabel => {
                ErrorCategory::Label
            }
            UnavailableOpcode { .. } => ErrorCategory::UnavailableOpcode,
        }
    }

    fn code(&self) -> &'static str {
        use AsmErrorKind::*;
        match self {
            UnknownMnemonic(_) => "asm::syntax::mnemonic",
            OperandCount { .. } => "asm::syntax::operand_count",
            InvalidRegister(_) => "asm::syntax::register",
            InvalidCondition(_) => "asm::syntax::condition",
            InvalidInteger { .. } => "asm::syntax::integer",
            ImmediateOutOfRange(_) => "asm::range::immediate",
            OffsetOutOfRange(_) => "asm::range::offset",
            AddressOutOfRange(_) => "asm::range::address",
            TargetOutOfRange { .. } => "asm::range::target",
            UndefinedLabel(_) => "asm::label::undefined",
            DuplicateLabel { .. } => "asm::label::duplicate",
            InvalidLabelName(_) => "asm::label::name",
            EmptyLabel => "asm::label::empty",
            UnavailableOpcode { .. } => "asm::opcode::unavailable",
        }
    }

    fn help(&self) -> &'static str {
        use AsmErrorKind::*;
        match self {
            UnknownMnemonic(_) => "check the list of available instructions in the documentation",
            OperandCount { .. } => "check the number of operands for this instruction",
            InvalidRegister(_) => "registers are named R0 to R15",
            InvalidCondition(_) => "branch conditions are EQ, NE, GE and LT",
            InvalidInteger { .. } => "only decimal literals like 12 or -3 are accepted",
            ImmediateOutOfRange(_) => "immediates must fit in a byte, signed or unsigned",
            OffsetOutOfRange(_) => "offsets must fit in 4 signed bits",
            AddressOutOfRange(_) => "word addresses start at 1",
            TargetOutOfRange { .. } => "the program is longer than instruction memory allows",
            UndefinedLabel(_) => "declare the label on its own line, like `LOOP:`",
            DuplicateLabel { .. } => "labels may only be declared once per file",
            InvalidLabelName(_) => "labels start with a letter or `_` and contain only letters, digits and `_`",
            EmptyLabel => "give the label a name before the `:`",
            UnavailableOpcode { .. } => "this instruction has no free opcode, rewrite it using other instructions",
        }
    }

    fn label(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Syntax => "invalid syntax",
            ErrorCategory::OperandRange => "out of range",
            ErrorCategory::Label => "bad label",
            ErrorCategory::UnavailableOpcode => "reserved mnemonic",
        }
    }
}

/// Assembly failure, located at a 1-based source line.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("L{line}: {kind}")]
pub struct AsmError {
    pub kind: AsmErrorKind,
    pub line: usize,
    span: Span,
    src: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, line: usize, span: Span, src: &str) -> Self {
        AsmError {
            kind,
            line,
            span,
            src: src.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl Diagnostic for AsmError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn severity(&self) -> Option<Severity> {
        Some(Severity::Error)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.help()))
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::at(
            self.span,
            self.kind.label(),
        ))))
    }
}

/// Runtime failure. Halts the simulator, state stays inspectable.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Fault {
    #[error("PC (Word Addr {pc}) is out of bounds (1-1024)")]
    PcOutOfBounds { pc: u16 },
    #[error("Opcode 0x{opcode:x} at Word Addr {pc} is unassigned")]
    UnknownOpcode { opcode: u8, pc: u16 },
    #[error("{mnemonic} target address cannot be 0 in 1-based addressing")]
    ZeroTarget { mnemonic: Opcode },
    #[error("Stack Overflow")]
    StackOverflow,
    #[error("Stack Underflow")]
    StackUnderflow,
    #[error("Next PC target (Word Addr {target}) is out of instruction memory bounds (1-1024)")]
    NextPcOutOfBounds { target: u32 },
}

impl Fault {
    fn code(&self) -> &'static str {
        match self {
            Fault::PcOutOfBounds { .. } => "run::pc_bounds",
            Fault::UnknownOpcode { .. } => "run::opcode",
            Fault::ZeroTarget { .. } => "run::zero_target",
            Fault::StackOverflow => "run::stack_overflow",
            Fault::StackUnderflow => "run::stack_underflow",
            Fault::NextPcOutOfBounds { .. } => "run::next_pc",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum LoadError {
    #[error("Machine code too large: {len} bytes, instruction memory holds 2048")]
    TooLarge { len: usize },
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ConfigError {
    #[error("Screen {axis} {value} is outside 1-32")]
    ScreenSize { axis: &'static str, value: usize },
    #[error("Cycle limit must be at least 1")]
    NoCycles,
}

/// Render a runtime fault against the source line of the instruction that raised it.
pub fn fault_report(fault: &Fault, pc: u16, span: Option<Span>, src: &str) -> Report {
    let labels = span
        .map(|span| vec![LabeledSpan::at(span, "faulting instruction")])
        .unwrap_or_default();
    miette!(
        severity = Severity::Error,
        code = fault.code(),
        help = "the simulator halted, registers and memory are left as they were",
        labels = labels,
        "Runtime Error @ PC (Word Addr {pc}): {fault}",
    )
    .with_source_code(src.to_string())
}
