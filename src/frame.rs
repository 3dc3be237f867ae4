use std::fmt::{Display, Formatter};

use crate::value::Value;

/// Execution record of one function activation.
///
/// The control-block bookkeeping (`block_depth` and friends) is a flat,
/// max-aggregated pair of fields rather than a per-block stack. Branches
/// jump straight to the END of their target construct and the END performs
/// the unwind, so the aggregate is what the transfer logic consumes.
#[derive(Debug)]
pub struct Frame {
    pub func_id: u32,
    /// Index of the next instruction to execute. Incremented before the
    /// current instruction runs so branches can overwrite it directly.
    pub pc: usize,
    /// Params first (from the call arguments), then declared locals zeroed
    /// by type.
    pub locals: Vec<Value>,
    /// 0 means "at function body level"; the END that sees 0 returns.
    pub block_depth: u32,
    /// Largest operand-stack height recorded at entry to an active block.
    pub stack_size_before_block: usize,
    /// Result arity of the deepest active block (max-aggregated).
    pub number_of_values_to_return: usize,
    /// True for BLOCK/LOOP, false for IF.
    pub is_control_frame: bool,
    /// Set by ELSE/BR/BR_IF/BR_TABLE; consumed by the next END.
    pub do_control_transfer: bool,
    /// The predicate popped by a taken BR_IF/BR_TABLE. Restored above the
    /// unwound block so downstream consumers observe it again.
    pub branch_condition_value: Option<Value>,
}

impl Frame {
    pub fn new(func_id: u32, locals: Vec<Value>) -> Self {
        Self {
            func_id,
            pc: 0,
            locals,
            block_depth: 0,
            stack_size_before_block: 0,
            number_of_values_to_return: 0,
            is_control_frame: false,
            do_control_transfer: false,
            branch_condition_value: None,
        }
    }

    pub fn record(&self) -> FrameRecord {
        FrameRecord { func_id: self.func_id, pc: self.pc }
    }
}

/// Snapshot of a frame for trap backtraces: metadata only, no live state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub func_id: u32,
    pub pc: usize,
}

impl Display for FrameRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "func={}@{}", self.func_id, self.pc)
    }
}
