// Parsing
mod lexer;
mod parser;
pub use parser::{assemble, AsmParser, Assembly};
mod air;
pub use air::{Air, AirStmt, Field, Instr};
pub mod isa;
mod symbol;
pub use symbol::{LabelTable, Span};

// Running
mod bus;
pub use bus::{Detached, Devices, ScreenBuffer};
mod config;
pub use config::SimConfig;
mod runtime;
pub use runtime::{Halt, MachineState, RunOutcome, Simulator};
pub mod output;

mod error;
pub use error::{fault_report, AsmError, AsmErrorKind, ConfigError, ErrorCategory, Fault, LoadError};

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
