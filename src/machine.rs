use std::rc::Rc;

use crate::error::*;
use crate::frame::{Frame, FrameRecord};
use crate::instance::{FunctionKind, HostFunction, Instance};
use crate::instruction::{Instruction, Opcode};
use crate::stack::OperandStack;
use crate::types::BLOCKTYPE_EMPTY;
use crate::value::{ValType, Value};

/// Wasm calls run on the native stack; this bounds the recursion before the
/// process stack does.
pub const MAX_CALL_DEPTH: usize = 1000;

// Binary op: pops the right operand first, so `a` is the deeper value.
macro_rules! binop {
    ($self:ident, $as:ident, $ctor:ident, $f:expr) => {{
        let b = $self.stack.pop()?.$as();
        let a = $self.stack.pop()?.$as();
        $self.stack.push(Value::$ctor(($f)(a, b)));
    }};
}

macro_rules! cmpop {
    ($self:ident, $as:ident, $f:expr) => {{
        let b = $self.stack.pop()?.$as();
        let a = $self.stack.pop()?.$as();
        $self.stack.push(Value::bool(($f)(a, b)));
    }};
}

macro_rules! unop {
    ($self:ident, $as:ident, $ctor:ident, $f:expr) => {{
        let v = $self.stack.pop()?.$as();
        $self.stack.push(Value::$ctor(($f)(v)));
    }};
}

// Memory load: effective address is unsigned base + static offset.
macro_rules! mem_load {
    ($self:ident, $inst:ident, $method:ident, $push:expr) => {{
        let base = $self.stack.pop()?.as_u32();
        let offset = static_offset($inst)?;
        let loaded = $self.instance.memory()?.borrow().$method(base, offset);
        match loaded {
            Ok(v) => $self.stack.push(($push)(v)),
            Err(msg) => return Err($self.trap(msg)),
        }
    }};
}

// Memory store: value is on top, base address beneath it.
macro_rules! mem_store {
    ($self:ident, $inst:ident, $as:ident, $method:ident) => {{
        let v = $self.stack.pop()?.$as();
        let base = $self.stack.pop()?.as_u32();
        let offset = static_offset($inst)?;
        let stored = $self.instance.memory()?.borrow_mut().$method(base, offset, v);
        if let Err(msg) = stored {
            return Err($self.trap(msg));
        }
    }};
}

/// The execution engine: walks pre-decoded instruction streams against an
/// [`Instance`], keeping the operand stack and call stack for the lifetime
/// of the machine. Not safe for concurrent use.
pub struct Machine {
    instance: Instance,
    stack: OperandStack,
    call_stack: Vec<Frame>,
}

impl Machine {
    pub fn new(instance: Instance) -> Self {
        Self { instance, stack: OperandStack::new(), call_stack: Vec::new() }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Current operand-stack height.
    pub fn stack_size(&self) -> usize {
        self.stack.size()
    }

    /// Invoke function `func_id` with `args`. With `pop_results` the result
    /// values are popped off the operand stack and returned; otherwise they
    /// are left on the stack for the caller (the calling convention used by
    /// CALL/CALL_INDIRECT).
    ///
    /// Argument count and tags must match the declared parameter types;
    /// a mismatch is an embedder fault, not a Wasm trap.
    pub fn call(
        &mut self,
        func_id: u32,
        args: &[Value],
        pop_results: bool,
    ) -> Result<Option<Vec<Value>>, Error> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(self.trap(STACK_EXHAUSTED));
        }

        let func_type = self.instance.function_type(func_id)?;
        if args.len() != func_type.params.len() {
            return Err(Error::engine(INVALID_NUM_ARG));
        }
        for (arg, &param) in args.iter().zip(&func_type.params) {
            if arg.ty() != param {
                return Err(Error::engine(ARG_TYPE_MISMATCH));
            }
        }
        let n_results = func_type.results.len();

        enum Callee {
            Local { locals: Vec<ValType>, body: Rc<[Instruction]> },
            Host(HostFunction),
        }
        let callee = match &self.instance.function(func_id)?.kind {
            FunctionKind::Local { locals, body } => {
                Callee::Local { locals: locals.clone(), body: body.clone() }
            }
            FunctionKind::Host(handle) => Callee::Host(handle.clone()),
        };

        log::debug!("call func={} args={:?}", func_id, args);
        match callee {
            Callee::Local { locals, body } => {
                let mut frame_locals = Vec::with_capacity(args.len() + locals.len());
                frame_locals.extend_from_slice(args);
                frame_locals.extend(locals.iter().map(|&ty| Value::zero(ty)));
                self.call_stack.push(Frame::new(func_id, frame_locals));
                if let Err(e) = self.eval(&body) {
                    self.call_stack.pop();
                    return Err(e);
                }
            }
            Callee::Host(handle) => {
                self.call_stack.push(Frame::new(func_id, args.to_vec()));
                let memory = self.instance.memory_handle().cloned();
                match handle(memory.as_deref(), args) {
                    Ok(Some(results)) => {
                        for v in results {
                            self.stack.push(v);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let e = self.fill_backtrace(e);
                        self.call_stack.pop();
                        return Err(e);
                    }
                }
            }
        }
        self.call_stack.pop();

        if !pop_results || n_results == 0 || self.stack.size() == 0 {
            return Ok(None);
        }
        let mut results = vec![Value::FALSE; n_results];
        for slot in results.iter_mut().rev() {
            *slot = self.stack.pop()?;
        }
        Ok(Some(results))
    }

    /// Emit the live call stack through the logger.
    pub fn print_stack_trace(&self) {
        log::error!("Trapped. Stacktrace:");
        for frame in self.call_stack.iter().rev() {
            log::error!("  {}", frame.record());
        }
    }

    fn backtrace(&self) -> Vec<FrameRecord> {
        self.call_stack.iter().rev().map(|f| f.record()).collect()
    }

    /// Build a trap carrying the call stack at the point of failure.
    fn trap(&self, message: &'static str) -> Error {
        Error::Trap(Trap { message, backtrace: self.backtrace() })
    }

    /// Host-raised traps come in without a backtrace; attach ours.
    fn fill_backtrace(&self, e: Error) -> Error {
        match e {
            Error::Trap(mut t) if t.backtrace.is_empty() => {
                t.backtrace = self.backtrace();
                Error::Trap(t)
            }
            other => other,
        }
    }

    fn top_frame(&mut self) -> Result<&mut Frame, Error> {
        self.call_stack.last_mut().ok_or_else(|| Error::engine("no active frame"))
    }

    /// Result arity of a block, from its raw blocktype immediate.
    fn block_arity(&self, inst: &Instruction) -> Result<usize, Error> {
        let blocktype = *inst.operands.first().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
        if blocktype == BLOCKTYPE_EMPTY {
            Ok(0)
        } else if (0x7c..=0x7f).contains(&blocktype) {
            // A plain value type.
            Ok(1)
        } else {
            Ok(self.instance.ty(blocktype as u32)?.results.len())
        }
    }

    /// Pop call arguments in reverse declaration order, checking each tag
    /// against the declared parameter type.
    fn extract_args(&mut self, type_idx: u32) -> Result<Vec<Value>, Error> {
        let params = self.instance.ty(type_idx)?.params.clone();
        let mut args = vec![Value::FALSE; params.len()];
        for i in (0..params.len()).rev() {
            let v = self.stack.pop()?;
            if v.ty() != params[i] {
                return Err(Error::engine(ARG_TYPE_MISMATCH));
            }
            args[i] = v;
        }
        Ok(args)
    }

    fn trunc_checked(&self, v: f64, min: f64, limit: f64) -> Result<f64, Error> {
        if v.is_nan() {
            return Err(self.trap(INVALID_CONV_TO_INT));
        }
        let t = v.trunc();
        if t >= min && t < limit {
            Ok(t)
        } else {
            Err(self.trap(INTEGER_OVERFLOW))
        }
    }

    fn eval(&mut self, code: &[Instruction]) -> Result<(), Error> {
        let mut should_return = false;
        loop {
            let (pc, func_id) = {
                let frame = self.top_frame()?;
                if should_return || frame.pc >= code.len() {
                    return Ok(());
                }
                let pc = frame.pc;
                frame.pc += 1;
                (pc, frame.func_id)
            };
            let inst = &code[pc];
            log::trace!("func={}@{}: {} stack={}", func_id, pc, inst, self.stack.size());

            match inst.opcode {
                // ---------------- Control ----------------
                Opcode::Unreachable => return Err(self.trap(UNREACHABLE)),
                Opcode::Nop => {}
                Opcode::Block | Opcode::Loop => {
                    let arity = self.block_arity(inst)?;
                    let height = self.stack.size();
                    let frame = self.top_frame()?;
                    frame.block_depth += 1;
                    frame.is_control_frame = true;
                    frame.stack_size_before_block = frame.stack_size_before_block.max(height);
                    frame.number_of_values_to_return = frame.number_of_values_to_return.max(arity);
                }
                Opcode::If => {
                    let pred = self.stack.pop()?.as_i32();
                    let frame = self.top_frame()?;
                    frame.block_depth += 1;
                    frame.is_control_frame = false;
                    frame.pc = if pred == 0 { inst.label_false } else { inst.label_true };
                }
                Opcode::Else | Opcode::Br => {
                    let frame = self.top_frame()?;
                    frame.do_control_transfer = true;
                    frame.pc = inst.label_true;
                }
                Opcode::BrIf => {
                    let pred = self.stack.pop()?;
                    let frame = self.top_frame()?;
                    if pred.as_i32() == 0 {
                        frame.pc = inst.label_false;
                    } else {
                        frame.do_control_transfer = true;
                        frame.branch_condition_value = Some(pred);
                        frame.pc = inst.label_true;
                    }
                }
                Opcode::BrTable => {
                    let pred = self.stack.pop()?;
                    let index = pred.as_i32();
                    if inst.label_table.is_empty() {
                        return Err(Error::engine(MALFORMED_INSTRUCTION));
                    }
                    let frame = self.top_frame()?;
                    frame.do_control_transfer = true;
                    if index < 0 || index as usize >= inst.label_table.len() - 1 {
                        frame.pc = inst.label_table[inst.label_table.len() - 1];
                    } else {
                        frame.branch_condition_value = Some(pred);
                        frame.pc = inst.label_table[index as usize];
                    }
                }
                Opcode::Return => should_return = true,
                Opcode::End => {
                    let (do_transfer, is_ctrl) = {
                        let frame = self.top_frame()?;
                        if frame.block_depth == 0 {
                            // Function-level END: evaluation is done.
                            return Ok(());
                        }
                        frame.block_depth -= 1;
                        (frame.do_control_transfer, frame.is_control_frame)
                    };
                    if do_transfer && is_ctrl {
                        let (n_ret, floor, cond) = {
                            let frame = self.top_frame()?;
                            frame.do_control_transfer = false;
                            (
                                frame.number_of_values_to_return,
                                frame.stack_size_before_block,
                                frame.branch_condition_value,
                            )
                        };
                        // Save the block results, unwind to the recorded
                        // height, then restore.
                        let take = n_ret.min(self.stack.size());
                        let mut saved = Vec::with_capacity(take);
                        for _ in 0..take {
                            saved.push(self.stack.pop()?);
                        }
                        while self.stack.size() > floor {
                            self.stack.pop()?;
                        }
                        // A taken BR_IF/BR_TABLE predicate is restored above
                        // the unwound block.
                        if let Some(c) = cond {
                            if c.as_i32() > 0 {
                                self.stack.push(c);
                            }
                        }
                        for v in saved.into_iter().rev() {
                            self.stack.push(v);
                        }
                    }
                }
                Opcode::Call => {
                    let func_id = operand(inst, 0)? as u32;
                    let type_idx = self.instance.function(func_id)?.type_idx;
                    let args = self.extract_args(type_idx)?;
                    self.call(func_id, &args, false)?;
                }
                Opcode::CallIndirect => {
                    let type_idx = operand(inst, 0)? as u32;
                    let table_idx = operand(inst, 1)? as u32;
                    let elem_idx = self.stack.pop()?.as_u32();
                    let func_id = match self.instance.table(table_idx)?.func_ref(elem_idx) {
                        Ok(id) => id,
                        Err(msg) => return Err(self.trap(msg)),
                    };
                    let actual_idx = self.instance.function(func_id)?.type_idx;
                    if self.instance.ty(actual_idx)? != self.instance.ty(type_idx)? {
                        return Err(self.trap(INDIRECT_CALL_MISMATCH));
                    }
                    let args = self.extract_args(type_idx)?;
                    self.call(func_id, &args, false)?;
                }

                // ---------------- Parametric ----------------
                Opcode::Drop => {
                    self.stack.pop()?;
                }
                Opcode::Select => {
                    let pred = self.stack.pop()?.as_i32();
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    self.stack.push(if pred != 0 { a } else { b });
                }

                // ---------------- Variable ----------------
                Opcode::LocalGet => {
                    let idx = operand(inst, 0)? as usize;
                    let v = {
                        let frame = self.top_frame()?;
                        *frame.locals.get(idx).ok_or_else(|| Error::engine(UNKNOWN_LOCAL))?
                    };
                    self.stack.push(v);
                }
                Opcode::LocalSet => {
                    let idx = operand(inst, 0)? as usize;
                    let v = self.stack.pop()?;
                    let frame = self.top_frame()?;
                    *frame.locals.get_mut(idx).ok_or_else(|| Error::engine(UNKNOWN_LOCAL))? = v;
                }
                Opcode::LocalTee => {
                    let idx = operand(inst, 0)? as usize;
                    let v = self.stack.peek()?;
                    let frame = self.top_frame()?;
                    *frame.locals.get_mut(idx).ok_or_else(|| Error::engine(UNKNOWN_LOCAL))? = v;
                }
                Opcode::GlobalGet => {
                    let idx = operand(inst, 0)? as u32;
                    let v = self.instance.global(idx)?;
                    self.stack.push(v);
                }
                Opcode::GlobalSet => {
                    let idx = operand(inst, 0)? as u32;
                    let v = self.stack.pop()?;
                    self.instance.set_global(idx, v)?;
                }

                // ---------------- Memory ----------------
                Opcode::I32Load => mem_load!(self, inst, load_u32, Value::u32),
                Opcode::I64Load => mem_load!(self, inst, load_u64, Value::u64),
                Opcode::F32Load => mem_load!(self, inst, load_f32, Value::f32),
                Opcode::F64Load => mem_load!(self, inst, load_f64, Value::f64),
                Opcode::I32Load8S => mem_load!(self, inst, load_i8, |v: i8| Value::i32(v as i32)),
                Opcode::I32Load8U => mem_load!(self, inst, load_u8, |v: u8| Value::u32(v as u32)),
                Opcode::I32Load16S => mem_load!(self, inst, load_i16, |v: i16| Value::i32(v as i32)),
                Opcode::I32Load16U => mem_load!(self, inst, load_u16, |v: u16| Value::u32(v as u32)),
                Opcode::I64Load8S => mem_load!(self, inst, load_i8, |v: i8| Value::i64(v as i64)),
                Opcode::I64Load8U => mem_load!(self, inst, load_u8, |v: u8| Value::u64(v as u64)),
                Opcode::I64Load16S => mem_load!(self, inst, load_i16, |v: i16| Value::i64(v as i64)),
                Opcode::I64Load16U => mem_load!(self, inst, load_u16, |v: u16| Value::u64(v as u64)),
                Opcode::I64Load32S => mem_load!(self, inst, load_i32, |v: i32| Value::i64(v as i64)),
                Opcode::I64Load32U => mem_load!(self, inst, load_u32, |v: u32| Value::u64(v as u64)),
                Opcode::I32Store => mem_store!(self, inst, as_u32, store_u32),
                Opcode::I64Store => mem_store!(self, inst, as_u64, store_u64),
                Opcode::F32Store => mem_store!(self, inst, as_f32, store_f32),
                Opcode::F64Store => mem_store!(self, inst, as_f64, store_f64),
                Opcode::I32Store8 | Opcode::I64Store8 => {
                    let v = self.stack.pop()?.as_u64() as u8;
                    let base = self.stack.pop()?.as_u32();
                    let offset = static_offset(inst)?;
                    let stored = self.instance.memory()?.borrow_mut().store_u8(base, offset, v);
                    if let Err(msg) = stored {
                        return Err(self.trap(msg));
                    }
                }
                Opcode::I32Store16 | Opcode::I64Store16 => {
                    let v = self.stack.pop()?.as_u64() as u16;
                    let base = self.stack.pop()?.as_u32();
                    let offset = static_offset(inst)?;
                    let stored = self.instance.memory()?.borrow_mut().store_u16(base, offset, v);
                    if let Err(msg) = stored {
                        return Err(self.trap(msg));
                    }
                }
                Opcode::I64Store32 => {
                    let v = self.stack.pop()?.as_u64() as u32;
                    let base = self.stack.pop()?.as_u32();
                    let offset = static_offset(inst)?;
                    let stored = self.instance.memory()?.borrow_mut().store_u32(base, offset, v);
                    if let Err(msg) = stored {
                        return Err(self.trap(msg));
                    }
                }
                Opcode::MemorySize => {
                    let pages = self.instance.memory()?.borrow().size();
                    self.stack.push(Value::i32(pages as i32));
                }
                Opcode::MemoryGrow => {
                    let delta = self.stack.pop()?.as_u32();
                    let old = self.instance.memory()?.borrow_mut().grow(delta);
                    self.stack.push(Value::i32(old as i32));
                }
                Opcode::MemoryInit => {
                    let segment = operand(inst, 0)? as u32;
                    let mem_idx = operand(inst, 1)?;
                    if mem_idx != 0 {
                        return Err(Error::engine(format!(
                            "non-zero memory index is not supported: {}",
                            mem_idx
                        )));
                    }
                    let n = self.stack.pop()?.as_u32();
                    let offset = self.stack.pop()?.as_u32();
                    let dst = self.stack.pop()?.as_u32();
                    let initialized = self
                        .instance
                        .memory()?
                        .borrow_mut()
                        .init_passive_segment(segment, dst, offset, n);
                    if let Err(msg) = initialized {
                        return Err(self.trap(msg));
                    }
                }
                Opcode::DataDrop => {
                    let segment = operand(inst, 0)? as u32;
                    self.instance.memory()?.borrow_mut().drop_segment(segment);
                }
                Opcode::MemoryCopy => {
                    let src_idx = operand(inst, 0)?;
                    let dst_idx = operand(inst, 1)?;
                    if src_idx != 0 || dst_idx != 0 {
                        return Err(Error::engine(format!(
                            "non-zero memory index is not supported: {} {}",
                            src_idx, dst_idx
                        )));
                    }
                    let n = self.stack.pop()?.as_u32();
                    let src = self.stack.pop()?.as_u32();
                    let dst = self.stack.pop()?.as_u32();
                    let copied = self.instance.memory()?.borrow_mut().copy(dst, src, n);
                    if let Err(msg) = copied {
                        return Err(self.trap(msg));
                    }
                }

                // ---------------- Constants ----------------
                Opcode::I32Const => {
                    self.stack.push(Value::i32(operand(inst, 0)? as i32));
                }
                Opcode::I64Const => {
                    self.stack.push(Value::i64(operand(inst, 0)?));
                }
                Opcode::F32Const => {
                    self.stack.push(Value::f32_bits(operand(inst, 0)? as u32));
                }
                Opcode::F64Const => {
                    self.stack.push(Value::f64_bits(operand(inst, 0)? as u64));
                }

                // ---------------- i32 comparison ----------------
                Opcode::I32Eqz => unop!(self, as_i32, bool, |v: i32| v == 0),
                Opcode::I32Eq => cmpop!(self, as_i32, |a, b| a == b),
                Opcode::I32Ne => cmpop!(self, as_i32, |a, b| a != b),
                Opcode::I32LtS => cmpop!(self, as_i32, |a, b| a < b),
                Opcode::I32LtU => cmpop!(self, as_u32, |a, b| a < b),
                Opcode::I32GtS => cmpop!(self, as_i32, |a, b| a > b),
                Opcode::I32GtU => cmpop!(self, as_u32, |a, b| a > b),
                Opcode::I32LeS => cmpop!(self, as_i32, |a, b| a <= b),
                Opcode::I32LeU => cmpop!(self, as_u32, |a, b| a <= b),
                Opcode::I32GeS => cmpop!(self, as_i32, |a, b| a >= b),
                Opcode::I32GeU => cmpop!(self, as_u32, |a, b| a >= b),

                // ---------------- i64 comparison ----------------
                Opcode::I64Eqz => unop!(self, as_i64, bool, |v: i64| v == 0),
                Opcode::I64Eq => cmpop!(self, as_i64, |a, b| a == b),
                Opcode::I64Ne => cmpop!(self, as_i64, |a, b| a != b),
                Opcode::I64LtS => cmpop!(self, as_i64, |a, b| a < b),
                Opcode::I64LtU => cmpop!(self, as_u64, |a, b| a < b),
                Opcode::I64GtS => cmpop!(self, as_i64, |a, b| a > b),
                Opcode::I64GtU => cmpop!(self, as_u64, |a, b| a > b),
                Opcode::I64LeS => cmpop!(self, as_i64, |a, b| a <= b),
                Opcode::I64LeU => cmpop!(self, as_u64, |a, b| a <= b),
                Opcode::I64GeS => cmpop!(self, as_i64, |a, b| a >= b),
                Opcode::I64GeU => cmpop!(self, as_u64, |a, b| a >= b),

                // ---------------- float comparison ----------------
                // Ordered comparisons are false on NaN; NE is unordered.
                Opcode::F32Eq => cmpop!(self, as_f32, |a, b| a == b),
                Opcode::F32Ne => cmpop!(self, as_f32, |a, b| a != b),
                Opcode::F32Lt => cmpop!(self, as_f32, |a, b| a < b),
                Opcode::F32Gt => cmpop!(self, as_f32, |a, b| a > b),
                Opcode::F32Le => cmpop!(self, as_f32, |a, b| a <= b),
                Opcode::F32Ge => cmpop!(self, as_f32, |a, b| a >= b),
                Opcode::F64Eq => cmpop!(self, as_f64, |a, b| a == b),
                Opcode::F64Ne => cmpop!(self, as_f64, |a, b| a != b),
                Opcode::F64Lt => cmpop!(self, as_f64, |a, b| a < b),
                Opcode::F64Gt => cmpop!(self, as_f64, |a, b| a > b),
                Opcode::F64Le => cmpop!(self, as_f64, |a, b| a <= b),
                Opcode::F64Ge => cmpop!(self, as_f64, |a, b| a >= b),

                // ---------------- i32 numeric ----------------
                Opcode::I32Clz => unop!(self, as_i32, i32, |v: i32| v.leading_zeros() as i32),
                Opcode::I32Ctz => unop!(self, as_i32, i32, |v: i32| v.trailing_zeros() as i32),
                Opcode::I32Popcnt => unop!(self, as_i32, i32, |v: i32| v.count_ones() as i32),
                Opcode::I32Add => binop!(self, as_i32, i32, |a: i32, b: i32| a.wrapping_add(b)),
                Opcode::I32Sub => binop!(self, as_i32, i32, |a: i32, b: i32| a.wrapping_sub(b)),
                Opcode::I32Mul => binop!(self, as_i32, i32, |a: i32, b: i32| a.wrapping_mul(b)),
                Opcode::I32DivS => {
                    let b = self.stack.pop()?.as_i32();
                    let a = self.stack.pop()?.as_i32();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    if a == i32::MIN && b == -1 {
                        return Err(self.trap(INTEGER_OVERFLOW));
                    }
                    self.stack.push(Value::i32(a / b));
                }
                Opcode::I32DivU => {
                    let b = self.stack.pop()?.as_u32();
                    let a = self.stack.pop()?.as_u32();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::u32(a / b));
                }
                Opcode::I32RemS => {
                    let b = self.stack.pop()?.as_i32();
                    let a = self.stack.pop()?.as_i32();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::i32(a.wrapping_rem(b)));
                }
                Opcode::I32RemU => {
                    let b = self.stack.pop()?.as_u32();
                    let a = self.stack.pop()?.as_u32();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::u32(a % b));
                }
                Opcode::I32And => binop!(self, as_i32, i32, |a, b| a & b),
                Opcode::I32Or => binop!(self, as_i32, i32, |a, b| a | b),
                Opcode::I32Xor => binop!(self, as_i32, i32, |a, b| a ^ b),
                // Shift counts are modulo the bit width.
                Opcode::I32Shl => binop!(self, as_i32, i32, |a: i32, b: i32| a.wrapping_shl(b as u32)),
                Opcode::I32ShrS => binop!(self, as_i32, i32, |a: i32, b: i32| a.wrapping_shr(b as u32)),
                Opcode::I32ShrU => binop!(self, as_u32, u32, |a: u32, b: u32| a.wrapping_shr(b)),
                Opcode::I32Rotl => binop!(self, as_u32, u32, |a: u32, b: u32| a.rotate_left(b)),
                Opcode::I32Rotr => binop!(self, as_u32, u32, |a: u32, b: u32| a.rotate_right(b)),

                // ---------------- i64 numeric ----------------
                Opcode::I64Clz => unop!(self, as_i64, i64, |v: i64| v.leading_zeros() as i64),
                Opcode::I64Ctz => unop!(self, as_i64, i64, |v: i64| v.trailing_zeros() as i64),
                Opcode::I64Popcnt => unop!(self, as_i64, i64, |v: i64| v.count_ones() as i64),
                Opcode::I64Add => binop!(self, as_i64, i64, |a: i64, b: i64| a.wrapping_add(b)),
                Opcode::I64Sub => binop!(self, as_i64, i64, |a: i64, b: i64| a.wrapping_sub(b)),
                Opcode::I64Mul => binop!(self, as_i64, i64, |a: i64, b: i64| a.wrapping_mul(b)),
                Opcode::I64DivS => {
                    let b = self.stack.pop()?.as_i64();
                    let a = self.stack.pop()?.as_i64();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    if a == i64::MIN && b == -1 {
                        return Err(self.trap(INTEGER_OVERFLOW));
                    }
                    self.stack.push(Value::i64(a / b));
                }
                Opcode::I64DivU => {
                    let b = self.stack.pop()?.as_u64();
                    let a = self.stack.pop()?.as_u64();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::u64(a / b));
                }
                Opcode::I64RemS => {
                    let b = self.stack.pop()?.as_i64();
                    let a = self.stack.pop()?.as_i64();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::i64(a.wrapping_rem(b)));
                }
                Opcode::I64RemU => {
                    let b = self.stack.pop()?.as_u64();
                    let a = self.stack.pop()?.as_u64();
                    if b == 0 {
                        return Err(self.trap(DIVIDE_BY_ZERO));
                    }
                    self.stack.push(Value::u64(a % b));
                }
                Opcode::I64And => binop!(self, as_i64, i64, |a, b| a & b),
                Opcode::I64Or => binop!(self, as_i64, i64, |a, b| a | b),
                Opcode::I64Xor => binop!(self, as_i64, i64, |a, b| a ^ b),
                Opcode::I64Shl => binop!(self, as_i64, i64, |a: i64, b: i64| a.wrapping_shl(b as u32)),
                Opcode::I64ShrS => binop!(self, as_i64, i64, |a: i64, b: i64| a.wrapping_shr(b as u32)),
                Opcode::I64ShrU => binop!(self, as_u64, u64, |a: u64, b: u64| a.wrapping_shr(b as u32)),
                Opcode::I64Rotl => binop!(self, as_u64, u64, |a: u64, b: u64| a.rotate_left(b as u32)),
                Opcode::I64Rotr => binop!(self, as_u64, u64, |a: u64, b: u64| a.rotate_right(b as u32)),

                // ---------------- f32 numeric ----------------
                Opcode::F32Abs => unop!(self, as_f32, f32, |v: f32| v.abs()),
                Opcode::F32Neg => unop!(self, as_f32, f32, |v: f32| -v),
                Opcode::F32Ceil => unop!(self, as_f32, f32, |v: f32| v.ceil()),
                Opcode::F32Floor => unop!(self, as_f32, f32, |v: f32| v.floor()),
                Opcode::F32Trunc => unop!(self, as_f32, f32, |v: f32| v.trunc()),
                Opcode::F32Nearest => unop!(self, as_f32, f32, |v: f32| v.round_ties_even()),
                Opcode::F32Sqrt => unop!(self, as_f32, f32, |v: f32| v.sqrt()),
                Opcode::F32Add => binop!(self, as_f32, f32, |a, b| a + b),
                Opcode::F32Sub => binop!(self, as_f32, f32, |a, b| a - b),
                Opcode::F32Mul => binop!(self, as_f32, f32, |a, b| a * b),
                Opcode::F32Div => binop!(self, as_f32, f32, |a, b| a / b),
                Opcode::F32Min => binop!(self, as_f32, f32, wasm_min_f32),
                Opcode::F32Max => binop!(self, as_f32, f32, wasm_max_f32),
                Opcode::F32Copysign => binop!(self, as_f32, f32, |a: f32, b: f32| a.copysign(b)),

                // ---------------- f64 numeric ----------------
                Opcode::F64Abs => unop!(self, as_f64, f64, |v: f64| v.abs()),
                Opcode::F64Neg => unop!(self, as_f64, f64, |v: f64| -v),
                Opcode::F64Ceil => unop!(self, as_f64, f64, |v: f64| v.ceil()),
                Opcode::F64Floor => unop!(self, as_f64, f64, |v: f64| v.floor()),
                Opcode::F64Trunc => unop!(self, as_f64, f64, |v: f64| v.trunc()),
                Opcode::F64Nearest => unop!(self, as_f64, f64, |v: f64| v.round_ties_even()),
                Opcode::F64Sqrt => unop!(self, as_f64, f64, |v: f64| v.sqrt()),
                Opcode::F64Add => binop!(self, as_f64, f64, |a, b| a + b),
                Opcode::F64Sub => binop!(self, as_f64, f64, |a, b| a - b),
                Opcode::F64Mul => binop!(self, as_f64, f64, |a, b| a * b),
                Opcode::F64Div => binop!(self, as_f64, f64, |a, b| a / b),
                Opcode::F64Min => binop!(self, as_f64, f64, wasm_min_f64),
                Opcode::F64Max => binop!(self, as_f64, f64, wasm_max_f64),
                Opcode::F64Copysign => binop!(self, as_f64, f64, |a: f64, b: f64| a.copysign(b)),

                // ---------------- Conversions ----------------
                Opcode::I32WrapI64 => unop!(self, as_i64, i32, |v: i64| v as i32),
                Opcode::I64ExtendI32S => unop!(self, as_i32, i64, |v: i32| v as i64),
                Opcode::I64ExtendI32U => unop!(self, as_u32, u64, |v: u32| v as u64),
                Opcode::I32TruncF32S => {
                    let v = self.stack.pop()?.as_f32();
                    let t = self.trunc_checked(v as f64, -2147483648.0, 2147483648.0)?;
                    self.stack.push(Value::i32(t as i32));
                }
                Opcode::I32TruncF32U => {
                    let v = self.stack.pop()?.as_f32();
                    let t = self.trunc_checked(v as f64, 0.0, 4294967296.0)?;
                    self.stack.push(Value::u32(t as u32));
                }
                Opcode::I32TruncF64S => {
                    let v = self.stack.pop()?.as_f64();
                    let t = self.trunc_checked(v, -2147483648.0, 2147483648.0)?;
                    self.stack.push(Value::i32(t as i32));
                }
                Opcode::I32TruncF64U => {
                    let v = self.stack.pop()?.as_f64();
                    let t = self.trunc_checked(v, 0.0, 4294967296.0)?;
                    self.stack.push(Value::u32(t as u32));
                }
                Opcode::I64TruncF32S => {
                    let v = self.stack.pop()?.as_f32();
                    let t = self.trunc_checked(v as f64, -9223372036854775808.0, 9223372036854775808.0)?;
                    self.stack.push(Value::i64(t as i64));
                }
                Opcode::I64TruncF32U => {
                    let v = self.stack.pop()?.as_f32();
                    let t = self.trunc_checked(v as f64, 0.0, 18446744073709551616.0)?;
                    self.stack.push(Value::u64(t as u64));
                }
                Opcode::I64TruncF64S => {
                    let v = self.stack.pop()?.as_f64();
                    let t = self.trunc_checked(v, -9223372036854775808.0, 9223372036854775808.0)?;
                    self.stack.push(Value::i64(t as i64));
                }
                Opcode::I64TruncF64U => {
                    let v = self.stack.pop()?.as_f64();
                    let t = self.trunc_checked(v, 0.0, 18446744073709551616.0)?;
                    self.stack.push(Value::u64(t as u64));
                }
                Opcode::F32ConvertI32S => unop!(self, as_i32, f32, |v: i32| v as f32),
                Opcode::F32ConvertI32U => unop!(self, as_u32, f32, |v: u32| v as f32),
                Opcode::F32ConvertI64S => unop!(self, as_i64, f32, |v: i64| v as f32),
                Opcode::F32ConvertI64U => unop!(self, as_u64, f32, |v: u64| v as f32),
                Opcode::F32DemoteF64 => unop!(self, as_f64, f32, |v: f64| v as f32),
                Opcode::F64ConvertI32S => unop!(self, as_i32, f64, |v: i32| v as f64),
                Opcode::F64ConvertI32U => unop!(self, as_u32, f64, |v: u32| v as f64),
                Opcode::F64ConvertI64S => unop!(self, as_i64, f64, |v: i64| v as f64),
                Opcode::F64ConvertI64U => unop!(self, as_u64, f64, |v: u64| v as f64),
                Opcode::F64PromoteF32 => unop!(self, as_f32, f64, |v: f32| v as f64),
                // Reinterprets copy raw bits; NaN payloads survive.
                Opcode::I32ReinterpretF32 => unop!(self, as_u32, u32, |v| v),
                Opcode::I64ReinterpretF64 => unop!(self, as_u64, u64, |v| v),
                Opcode::F32ReinterpretI32 => unop!(self, as_u32, f32_bits, |v| v),
                Opcode::F64ReinterpretI64 => unop!(self, as_u64, f64_bits, |v| v),

                // ---------------- Sign extension ----------------
                Opcode::I32Extend8S => unop!(self, as_i8, i32, |v: i8| v as i32),
                Opcode::I32Extend16S => unop!(self, as_i16, i32, |v: i16| v as i32),
                Opcode::I64Extend8S => unop!(self, as_i8, i64, |v: i8| v as i64),
                Opcode::I64Extend16S => unop!(self, as_i16, i64, |v: i16| v as i64),
                Opcode::I64Extend32S => unop!(self, as_i32, i64, |v: i32| v as i64),

                // ---------------- Saturating truncation ----------------
                // NaN goes to zero, out-of-range values clamp.
                Opcode::I32TruncSatF32S => unop!(self, as_f32, i32, |v: f32| v as i32),
                Opcode::I32TruncSatF32U => unop!(self, as_f32, u32, |v: f32| v as u32),
                Opcode::I32TruncSatF64S => unop!(self, as_f64, i32, |v: f64| v as i32),
                Opcode::I32TruncSatF64U => unop!(self, as_f64, u32, |v: f64| v as u32),
                Opcode::I64TruncSatF32S => unop!(self, as_f32, i64, |v: f32| v as i64),
                Opcode::I64TruncSatF32U => unop!(self, as_f32, u64, |v: f32| v as u64),
                Opcode::I64TruncSatF64S => unop!(self, as_f64, i64, |v: f64| v as i64),
                Opcode::I64TruncSatF64U => unop!(self, as_f64, u64, |v: f64| v as u64),
            }
        }
    }
}

#[inline]
fn operand(inst: &Instruction, idx: usize) -> Result<i64, Error> {
    inst.operands.get(idx).copied().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))
}

/// The static memarg offset (`operands[0]` is the alignment hint, which the
/// engine ignores).
#[inline]
fn static_offset(inst: &Instruction) -> Result<u32, Error> {
    operand(inst, 1).map(|v| v as u32)
}

// IEEE min/max with Wasm's NaN and signed-zero rules: NaN wins, and -0 is
// smaller than +0.
fn wasm_min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn wasm_max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else if a > b {
        a
    } else {
        b
    }
}

fn wasm_min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn wasm_max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else if a > b {
        a
    } else {
        b
    }
}
