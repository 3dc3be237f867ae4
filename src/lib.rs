#![deny(unsafe_code)]

//! `wim` is a WebAssembly execution engine. It interprets pre-decoded
//! instruction streams (Wasm MVP plus the sign-extension, non-trapping
//! float-to-int and bulk-memory extensions) against an [`Instance`] holding
//! functions, linear memory, tables, globals and host imports. Decoding and
//! validation of `.wasm` binaries happen upstream; this crate starts at the
//! instruction stream.

mod error;
mod frame;
mod instance;
mod instruction;
mod machine;
mod memory;
mod stack;
mod types;
mod value;

pub use error::{Error, Trap};
pub use frame::{Frame, FrameRecord};
pub use instance::{Function, FunctionKind, Global, HostFunction, Instance, InstanceBuilder, Table};
pub use instruction::{resolve_labels, Instruction, Opcode};
pub use machine::{Machine, MAX_CALL_DEPTH};
pub use memory::LinearMemory;
pub use stack::OperandStack;
pub use types::{FunctionType, BLOCKTYPE_EMPTY};
pub use value::{val_type_from_byte, ValType, Value};

pub mod error_msg {
    //! Canonical trap and engine fault messages.
    pub use crate::error::*;
}
