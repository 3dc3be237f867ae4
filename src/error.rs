use std::fmt::{Display, Formatter};

use crate::frame::FrameRecord;

// Trap messages. These strings are part of the public contract: they are
// what the Wasm test harness asserts against.
pub const DIVIDE_BY_ZERO: &str = "integer divide by zero";
pub const INTEGER_OVERFLOW: &str = "integer overflow";
pub const INVALID_CONV_TO_INT: &str = "invalid conversion to integer";
pub const OOB_MEMORY_ACCESS: &str = "out of bounds memory access";
pub const UNDEF_ELEM: &str = "undefined element";
pub const UNREACHABLE: &str = "Trapped on unreachable instruction";
pub const INDIRECT_CALL_MISMATCH: &str = "indirect call type mismatch";
pub const STACK_EXHAUSTED: &str = "call stack exhausted";

// Engine faults: embedder or decoder bugs, not Wasm traps.
pub const STACK_UNDERFLOW: &str = "operand stack underflow";
pub const ARG_TYPE_MISMATCH: &str = "type mismatch when extracting call arguments";
pub const INVALID_NUM_ARG: &str = "invalid number of arguments";
pub const GLOBAL_IS_IMMUTABLE: &str = "cannot set an immutable global";
pub const NO_MEMORY: &str = "instance has no memory";
pub const MALFORMED_INSTRUCTION: &str = "malformed instruction";
pub const UNKNOWN_FUNC: &str = "unknown function";
pub const UNKNOWN_TYPE: &str = "unknown type";
pub const UNKNOWN_TABLE: &str = "unknown table";
pub const UNKNOWN_GLOBAL: &str = "unknown global";
pub const UNKNOWN_LOCAL: &str = "unknown local";
pub const DATA_SEG_DNF: &str = "data segment does not fit";
pub const ELEM_SEG_DNF: &str = "elements segment does not fit";

/// A Wasm-defined runtime failure, carrying the call stack captured at the
/// point of failure. Frames are cloned metadata, not live references: the
/// machine unwinds after the trap is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trap {
    pub message: &'static str,
    pub backtrace: Vec<FrameRecord>,
}

impl Trap {
    pub fn new(message: &'static str) -> Self {
        Self { message, backtrace: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A trap per the Wasm spec; the message is canonical.
    Trap(Trap),
    /// A fault in the embedding: malformed instruction stream, argument
    /// type mismatch, unsupported construct. Never raised by valid Wasm.
    Engine(String),
}

impl Error {
    #[inline]
    pub fn trap(message: &'static str) -> Self {
        Error::Trap(Trap::new(message))
    }

    #[inline]
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }

    /// The trap message, if this is a trap.
    pub fn trap_message(&self) -> Option<&'static str> {
        match self {
            Error::Trap(t) => Some(t.message),
            Error::Engine(_) => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Trap(t) => f.write_str(t.message),
            Error::Engine(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for Error {}
