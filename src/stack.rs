use crate::error::{Error, STACK_UNDERFLOW};
use crate::value::Value;

/// The operand stack. Unbounded; underflow is an engine fault (validated
/// code never underflows), not a Wasm trap.
#[derive(Debug, Default)]
pub struct OperandStack {
    values: Vec<Value>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self { values: Vec::with_capacity(64) }
    }

    #[inline]
    pub fn push(&mut self, v: Value) {
        self.values.push(v);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, Error> {
        self.values.pop().ok_or_else(|| Error::engine(STACK_UNDERFLOW))
    }

    #[inline]
    pub fn peek(&self) -> Result<Value, Error> {
        self.values.last().copied().ok_or_else(|| Error::engine(STACK_UNDERFLOW))
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.values.len()
    }
}
