mod common;

use common::{op, op1, run_op};
use proptest::prelude::*;
use wim::{Error, Instance, Instruction, Machine, Opcode, ValType, Value};

fn div_rem_machine() -> Machine {
    let instance = Instance::builder()
        .ty(vec![ValType::I32, ValType::I32], vec![ValType::I32])
        .func(
            0,
            vec![],
            vec![
                op1(Opcode::LocalGet, 0),
                op1(Opcode::LocalGet, 1),
                op(Opcode::I32DivS),
                op1(Opcode::LocalGet, 1),
                op(Opcode::I32Mul),
                op1(Opcode::LocalGet, 0),
                op1(Opcode::LocalGet, 1),
                op(Opcode::I32RemS),
                op(Opcode::I32Add),
                op(Opcode::End),
            ],
        )
        .build()
        .unwrap();
    Machine::new(instance)
}

fn switch_machine() -> Machine {
    // Three br_table entries plus a default, reporting 100 + target level.
    let instance = Instance::builder()
        .ty(vec![ValType::I32], vec![ValType::I32])
        .func(
            0,
            vec![],
            vec![
                op1(Opcode::Block, 0x40),
                op1(Opcode::Block, 0x40),
                op1(Opcode::Block, 0x40),
                op1(Opcode::Block, 0x40),
                op1(Opcode::LocalGet, 0),
                Instruction::with(Opcode::BrTable, vec![0, 1, 2, 3]),
                op(Opcode::End),
                op1(Opcode::I32Const, 100),
                op(Opcode::Return),
                op(Opcode::End),
                op1(Opcode::I32Const, 101),
                op(Opcode::Return),
                op(Opcode::End),
                op1(Opcode::I32Const, 102),
                op(Opcode::Return),
                op(Opcode::End),
                op1(Opcode::I32Const, 103),
                op(Opcode::End),
            ],
        )
        .build()
        .unwrap();
    Machine::new(instance)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64, .. ProptestConfig::default()
    })]

    /// (a div_s b) * b + (a rem_s b) == a, away from the trap case.
    #[test]
    fn div_rem_identity(a in any::<i32>(), b in any::<i32>()) {
        prop_assume!(b != 0);
        prop_assume!(!(a == i32::MIN && b == -1));
        let mut machine = div_rem_machine();
        let results = machine
            .call(0, &[Value::i32(a), Value::i32(b)], true)
            .unwrap()
            .unwrap();
        prop_assert_eq!(results[0].as_i32(), a);
        prop_assert_eq!(machine.stack_size(), 0);
    }

    /// Reinterpreting there and back is the identity on raw bits.
    #[test]
    fn reinterpret_round_trip_f32(bits in any::<u32>()) {
        let v = run_op(Opcode::F32ReinterpretI32, &[Value::u32(bits)], ValType::F32).unwrap();
        prop_assert_eq!(v.ty(), ValType::F32);
        let back = run_op(Opcode::I32ReinterpretF32, &[v], ValType::I32).unwrap();
        prop_assert_eq!(back.as_u32(), bits);
    }

    #[test]
    fn reinterpret_round_trip_f64(bits in any::<u64>()) {
        let v = run_op(Opcode::F64ReinterpretI64, &[Value::u64(bits)], ValType::F64).unwrap();
        let back = run_op(Opcode::I64ReinterpretF64, &[v], ValType::I64).unwrap();
        prop_assert_eq!(back.as_u64(), bits);
    }

    /// copysign(x, x) is x, bit for bit, NaN payloads included.
    #[test]
    fn copysign_self_is_identity(bits in any::<u32>()) {
        let x = Value::f32_bits(bits);
        let v = run_op(Opcode::F32Copysign, &[x, x], ValType::F32).unwrap();
        prop_assert_eq!(v.as_f32().to_bits(), bits);
    }

    /// abs(neg(x)) always carries the sign of +0.
    #[test]
    fn abs_neg_clears_sign(bits in any::<u64>()) {
        let x = Value::f64_bits(bits);
        let negated = run_op(Opcode::F64Neg, &[x], ValType::F64).unwrap();
        let v = run_op(Opcode::F64Abs, &[negated], ValType::F64).unwrap();
        prop_assert_eq!(v.as_f64().to_bits(), bits & !(1u64 << 63));
    }

    /// Saturating truncation never traps and stays in range.
    #[test]
    fn saturating_truncation_total(bits in any::<u64>()) {
        let x = Value::f64_bits(bits);
        let v = run_op(Opcode::I32TruncSatF64S, &[x], ValType::I32).unwrap();
        prop_assert_eq!(v.ty(), ValType::I32);
        let v = run_op(Opcode::I64TruncSatF64U, &[x], ValType::I64).unwrap();
        prop_assert_eq!(v.ty(), ValType::I64);
    }

    /// br_table picks table[p] for in-range predicates, else the default.
    #[test]
    fn br_table_targets(p in any::<i32>()) {
        let expected = if (0..3).contains(&p) { 100 + p } else { 103 };
        let mut machine = switch_machine();
        let results = machine.call(0, &[Value::i32(p)], true).unwrap().unwrap();
        prop_assert_eq!(results[0].as_i32(), expected);
    }

    /// Well-typed calls return `results.len` values with matching tags, and
    /// leave the operand stack where it started.
    #[test]
    fn call_results_match_signature(n in 0u32..12) {
        let instance = Instance::builder()
            .ty(vec![ValType::I32], vec![ValType::I64])
            .func(
                0,
                vec![],
                vec![
                    op1(Opcode::LocalGet, 0),
                    op(Opcode::I64ExtendI32U),
                    op(Opcode::End),
                ],
            )
            .build()
            .unwrap();
        let mut machine = Machine::new(instance);
        let results = machine.call(0, &[Value::i32(n as i32)], true).unwrap().unwrap();
        prop_assert_eq!(results.len(), 1);
        prop_assert_eq!(results[0].ty(), ValType::I64);
        prop_assert_eq!(results[0].as_i64(), n as i64);
        prop_assert_eq!(machine.stack_size(), 0);
    }

    /// Division by zero is always the canonical trap.
    #[test]
    fn division_by_zero_always_traps(a in any::<i32>()) {
        let mut machine = div_rem_machine();
        match machine.call(0, &[Value::i32(a), Value::i32(0)], true) {
            Err(Error::Trap(t)) => prop_assert_eq!(t.message, "integer divide by zero"),
            other => prop_assert!(false, "expected trap, got {:?}", other),
        }
    }
}
