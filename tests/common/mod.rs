#![allow(dead_code)]

use wim::{Error, Instance, Instruction, Machine, Opcode, ValType, Value};

pub fn op(opcode: Opcode) -> Instruction {
    Instruction::new(opcode)
}

pub fn op1(opcode: Opcode, a: i64) -> Instruction {
    Instruction::with(opcode, vec![a])
}

pub fn op2(opcode: Opcode, a: i64, b: i64) -> Instruction {
    Instruction::with(opcode, vec![a, b])
}

/// Build a single-function machine whose body loads every parameter and
/// applies `opcode`, then run it. The workhorse for numeric tests.
pub fn run_op(opcode: Opcode, args: &[Value], result_ty: ValType) -> Result<Value, Error> {
    let params: Vec<ValType> = args.iter().map(|v| v.ty()).collect();
    let mut body: Vec<Instruction> = (0..args.len())
        .map(|i| op1(Opcode::LocalGet, i as i64))
        .collect();
    body.push(op(opcode));
    body.push(op(Opcode::End));

    let instance = Instance::builder()
        .ty(params, vec![result_ty])
        .func(0, vec![], body)
        .build()?;
    let mut machine = Machine::new(instance);
    let results = machine.call(0, args, true)?;
    Ok(results.expect("operator produced no result")[0])
}

/// Like [`run_op`] but asserts the trap message of a failing operator.
pub fn expect_trap(opcode: Opcode, args: &[Value], result_ty: ValType, message: &str) {
    match run_op(opcode, args, result_ty) {
        Err(Error::Trap(t)) => assert_eq!(t.message, message),
        other => panic!("expected trap `{}`, got {:?}", message, other),
    }
}
