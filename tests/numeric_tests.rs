mod common;

use common::{expect_trap, op, op1, run_op};
use wim::{Instance, Machine, Opcode, ValType, Value};

fn i32_op(opcode: Opcode, args: &[Value]) -> i32 {
    run_op(opcode, args, ValType::I32).unwrap().as_i32()
}

fn i64_op(opcode: Opcode, args: &[Value]) -> i64 {
    run_op(opcode, args, ValType::I64).unwrap().as_i64()
}

fn f32_op(opcode: Opcode, args: &[Value]) -> f32 {
    run_op(opcode, args, ValType::F32).unwrap().as_f32()
}

fn f64_op(opcode: Opcode, args: &[Value]) -> f64 {
    run_op(opcode, args, ValType::F64).unwrap().as_f64()
}

#[test]
fn i32_arithmetic_wraps() {
    assert_eq!(i32_op(Opcode::I32Add, &[Value::i32(i32::MAX), Value::i32(1)]), i32::MIN);
    assert_eq!(i32_op(Opcode::I32Sub, &[Value::i32(i32::MIN), Value::i32(1)]), i32::MAX);
    assert_eq!(i32_op(Opcode::I32Mul, &[Value::i32(0x10000), Value::i32(0x10000)]), 0);
    assert_eq!(i32_op(Opcode::I32Sub, &[Value::i32(3), Value::i32(10)]), -7);
}

#[test]
fn i32_division_signed_and_unsigned() {
    assert_eq!(i32_op(Opcode::I32DivS, &[Value::i32(-7), Value::i32(2)]), -3);
    assert_eq!(i32_op(Opcode::I32DivU, &[Value::u32(0x8000_0000), Value::i32(2)]), 0x4000_0000);
    assert_eq!(i32_op(Opcode::I32RemS, &[Value::i32(-7), Value::i32(2)]), -1);
    assert_eq!(i32_op(Opcode::I32RemU, &[Value::u32(u32::MAX), Value::i32(10)]), 5);
    // MIN % -1 is 0, not a trap.
    assert_eq!(i32_op(Opcode::I32RemS, &[Value::i32(i32::MIN), Value::i32(-1)]), 0);
}

#[test]
fn i32_division_traps() {
    expect_trap(Opcode::I32DivS, &[Value::i32(1), Value::i32(0)], ValType::I32, "integer divide by zero");
    expect_trap(Opcode::I32DivU, &[Value::i32(1), Value::i32(0)], ValType::I32, "integer divide by zero");
    expect_trap(Opcode::I32RemS, &[Value::i32(1), Value::i32(0)], ValType::I32, "integer divide by zero");
    expect_trap(Opcode::I32RemU, &[Value::i32(1), Value::i32(0)], ValType::I32, "integer divide by zero");
    expect_trap(Opcode::I32DivS, &[Value::i32(i32::MIN), Value::i32(-1)], ValType::I32, "integer overflow");
    expect_trap(Opcode::I64DivS, &[Value::i64(i64::MIN), Value::i64(-1)], ValType::I64, "integer overflow");
    expect_trap(Opcode::I64DivU, &[Value::i64(1), Value::i64(0)], ValType::I64, "integer divide by zero");
}

#[test]
fn shift_counts_are_modulo_width() {
    assert_eq!(i32_op(Opcode::I32Shl, &[Value::i32(1), Value::i32(33)]), 2);
    assert_eq!(i32_op(Opcode::I32ShrS, &[Value::i32(-8), Value::i32(1)]), -4);
    assert_eq!(i32_op(Opcode::I32ShrU, &[Value::u32(0x8000_0000), Value::i32(1)]), 0x4000_0000);
    assert_eq!(i32_op(Opcode::I32ShrU, &[Value::i32(1), Value::i32(32)]), 1);
    assert_eq!(i64_op(Opcode::I64Shl, &[Value::i64(1), Value::i64(65)]), 2);
    assert_eq!(i64_op(Opcode::I64ShrS, &[Value::i64(i64::MIN), Value::i64(63)]), -1);
}

#[test]
fn rotates() {
    assert_eq!(
        i32_op(Opcode::I32Rotl, &[Value::u32(0x8000_0001), Value::i32(1)]) as u32,
        0x0000_0003
    );
    assert_eq!(
        i32_op(Opcode::I32Rotr, &[Value::u32(0x0000_0003), Value::i32(1)]) as u32,
        0x8000_0001
    );
    assert_eq!(
        i64_op(Opcode::I64Rotr, &[Value::i64(1), Value::i64(1)]) as u64,
        0x8000_0000_0000_0000
    );
    // Counts wrap at the bit width.
    assert_eq!(
        i32_op(Opcode::I32Rotl, &[Value::u32(0xdead_beef), Value::i32(32)]) as u32,
        0xdead_beef
    );
}

#[test]
fn bit_counting() {
    assert_eq!(i32_op(Opcode::I32Clz, &[Value::i32(1)]), 31);
    assert_eq!(i32_op(Opcode::I32Clz, &[Value::i32(0)]), 32);
    assert_eq!(i32_op(Opcode::I32Ctz, &[Value::u32(0x8000_0000)]), 31);
    assert_eq!(i32_op(Opcode::I32Ctz, &[Value::i32(0)]), 32);
    assert_eq!(i32_op(Opcode::I32Popcnt, &[Value::u32(0xf0f0)]), 8);
    assert_eq!(i64_op(Opcode::I64Clz, &[Value::i64(1)]), 63);
    assert_eq!(i64_op(Opcode::I64Popcnt, &[Value::i64(-1)]), 64);
}

#[test]
fn signedness_of_comparisons() {
    assert_eq!(i32_op(Opcode::I32LtS, &[Value::i32(-1), Value::i32(1)]), 1);
    assert_eq!(i32_op(Opcode::I32LtU, &[Value::i32(-1), Value::i32(1)]), 0);
    assert_eq!(i32_op(Opcode::I32GtU, &[Value::u32(u32::MAX), Value::i32(1)]), 1);
    assert_eq!(i32_op(Opcode::I32GeS, &[Value::i32(5), Value::i32(5)]), 1);
    assert_eq!(i32_op(Opcode::I32Eqz, &[Value::i32(0)]), 1);
    assert_eq!(i32_op(Opcode::I64LtU, &[Value::i64(-1), Value::i64(1)]), 0);
    assert_eq!(i32_op(Opcode::I64Eqz, &[Value::i64(0)]), 1);
}

#[test]
fn float_min_max_nan_and_zero_rules() {
    assert!(f32_op(Opcode::F32Min, &[Value::f32(f32::NAN), Value::f32(1.0)]).is_nan());
    assert!(f32_op(Opcode::F32Max, &[Value::f32(1.0), Value::f32(f32::NAN)]).is_nan());
    assert_eq!(
        f32_op(Opcode::F32Min, &[Value::f32(0.0), Value::f32(-0.0)]).to_bits(),
        0x8000_0000
    );
    assert_eq!(
        f32_op(Opcode::F32Max, &[Value::f32(-0.0), Value::f32(0.0)]).to_bits(),
        0x0000_0000
    );
    assert_eq!(f64_op(Opcode::F64Min, &[Value::f64(3.0), Value::f64(-4.0)]), -4.0);
    assert_eq!(f64_op(Opcode::F64Max, &[Value::f64(3.0), Value::f64(-4.0)]), 3.0);
}

#[test]
fn float_nearest_is_ties_to_even() {
    assert_eq!(f32_op(Opcode::F32Nearest, &[Value::f32(2.5)]), 2.0);
    assert_eq!(f32_op(Opcode::F32Nearest, &[Value::f32(3.5)]), 4.0);
    assert_eq!(f32_op(Opcode::F32Nearest, &[Value::f32(-2.5)]), -2.0);
    assert_eq!(
        f32_op(Opcode::F32Nearest, &[Value::f32(-0.4)]).to_bits(),
        0x8000_0000
    );
    assert_eq!(f64_op(Opcode::F64Nearest, &[Value::f64(4.5)]), 4.0);
}

#[test]
fn float_rounding_family() {
    assert_eq!(f32_op(Opcode::F32Trunc, &[Value::f32(-1.7)]), -1.0);
    assert_eq!(f32_op(Opcode::F32Ceil, &[Value::f32(1.1)]), 2.0);
    assert_eq!(f32_op(Opcode::F32Floor, &[Value::f32(-1.1)]), -2.0);
    assert_eq!(f64_op(Opcode::F64Sqrt, &[Value::f64(9.0)]), 3.0);
    assert!(f64_op(Opcode::F64Sqrt, &[Value::f64(-1.0)]).is_nan());
}

#[test]
fn float_sign_operations() {
    assert_eq!(f32_op(Opcode::F32Copysign, &[Value::f32(-3.0), Value::f32(4.0)]), 3.0);
    assert_eq!(f32_op(Opcode::F32Copysign, &[Value::f32(3.0), Value::f32(-4.0)]), -3.0);
    // The sign of a NaN source is honored via its bit pattern.
    assert_eq!(
        f32_op(Opcode::F32Copysign, &[Value::f32(3.0), Value::f32_bits(0xffc0_0000)]),
        -3.0
    );
    assert_eq!(f32_op(Opcode::F32Abs, &[Value::f32(-5.5)]), 5.5);
    assert_eq!(
        f32_op(Opcode::F32Neg, &[Value::f32(0.0)]).to_bits(),
        0x8000_0000
    );
    // abs and neg operate on the sign bit even for NaN.
    assert_eq!(
        f32_op(Opcode::F32Abs, &[Value::f32_bits(0xffc0_0123)]).to_bits(),
        0x7fc0_0123
    );
}

#[test]
fn float_division_produces_ieee_specials() {
    assert_eq!(f32_op(Opcode::F32Div, &[Value::f32(1.0), Value::f32(0.0)]), f32::INFINITY);
    assert_eq!(f32_op(Opcode::F32Div, &[Value::f32(-1.0), Value::f32(0.0)]), f32::NEG_INFINITY);
    assert!(f32_op(Opcode::F32Div, &[Value::f32(0.0), Value::f32(0.0)]).is_nan());
}

#[test]
fn wrap_and_extend() {
    assert_eq!(i32_op(Opcode::I32WrapI64, &[Value::i64(0x1_0000_0005)]), 5);
    assert_eq!(i32_op(Opcode::I32WrapI64, &[Value::i64(-1)]), -1);
    assert_eq!(i64_op(Opcode::I64ExtendI32S, &[Value::i32(-1)]), -1);
    assert_eq!(i64_op(Opcode::I64ExtendI32U, &[Value::i32(-1)]), 0xffff_ffff);
    assert_eq!(i32_op(Opcode::I32Extend8S, &[Value::i32(0x80)]), -128);
    assert_eq!(i32_op(Opcode::I32Extend8S, &[Value::i32(0x17f)]), 127);
    assert_eq!(i32_op(Opcode::I32Extend16S, &[Value::i32(0x8000)]), -32768);
    assert_eq!(i64_op(Opcode::I64Extend8S, &[Value::i64(0x80)]), -128);
    assert_eq!(i64_op(Opcode::I64Extend16S, &[Value::i64(0x8000)]), -32768);
    assert_eq!(i64_op(Opcode::I64Extend32S, &[Value::i64(0xffff_ffff)]), -1);
}

#[test]
fn trapping_truncation_bounds() {
    assert_eq!(i32_op(Opcode::I32TruncF64S, &[Value::f64(-2147483648.9)]), i32::MIN);
    assert_eq!(i32_op(Opcode::I32TruncF64S, &[Value::f64(2147483647.9)]), i32::MAX);
    assert_eq!(i32_op(Opcode::I32TruncF64U, &[Value::f64(4294967295.0)]), -1);
    assert_eq!(i32_op(Opcode::I32TruncF64U, &[Value::f64(-0.9)]), 0);
    assert_eq!(i32_op(Opcode::I32TruncF32S, &[Value::f32(-2147483648.0)]), i32::MIN);
    assert_eq!(i64_op(Opcode::I64TruncF64S, &[Value::f64(-9223372036854775808.0)]), i64::MIN);

    expect_trap(Opcode::I32TruncF32S, &[Value::f32(f32::NAN)], ValType::I32, "invalid conversion to integer");
    expect_trap(Opcode::I32TruncF64S, &[Value::f64(2147483648.0)], ValType::I32, "integer overflow");
    expect_trap(Opcode::I32TruncF64S, &[Value::f64(-2147483649.0)], ValType::I32, "integer overflow");
    expect_trap(Opcode::I32TruncF64U, &[Value::f64(4294967296.0)], ValType::I32, "integer overflow");
    expect_trap(Opcode::I32TruncF64U, &[Value::f64(-1.0)], ValType::I32, "integer overflow");
    // 2^31 - 1 is not representable in f32; the nearest value is 2^31.
    expect_trap(Opcode::I32TruncF32S, &[Value::f32(2147483647.0)], ValType::I32, "integer overflow");
    expect_trap(Opcode::I64TruncF64S, &[Value::f64(9223372036854775808.0)], ValType::I64, "integer overflow");
    expect_trap(Opcode::I64TruncF64U, &[Value::f64(18446744073709551616.0)], ValType::I64, "integer overflow");
    expect_trap(Opcode::I64TruncF32U, &[Value::f32(f32::INFINITY)], ValType::I64, "integer overflow");
}

#[test]
fn saturating_truncation_clamps() {
    assert_eq!(i32_op(Opcode::I32TruncSatF32S, &[Value::f32(f32::NAN)]), 0);
    assert_eq!(i32_op(Opcode::I32TruncSatF32S, &[Value::f32(f32::INFINITY)]), i32::MAX);
    assert_eq!(i32_op(Opcode::I32TruncSatF32S, &[Value::f32(f32::NEG_INFINITY)]), i32::MIN);
    assert_eq!(i32_op(Opcode::I32TruncSatF32S, &[Value::f32(-2.9)]), -2);
    assert_eq!(i32_op(Opcode::I32TruncSatF64U, &[Value::f64(-1.0)]), 0);
    assert_eq!(i32_op(Opcode::I32TruncSatF64U, &[Value::f64(1e10)]) as u32, u32::MAX);
    assert_eq!(i64_op(Opcode::I64TruncSatF64S, &[Value::f64(1e300)]), i64::MAX);
    assert_eq!(i64_op(Opcode::I64TruncSatF64S, &[Value::f64(f64::NAN)]), 0);
    assert_eq!(i64_op(Opcode::I64TruncSatF64U, &[Value::f64(1e300)]) as u64, u64::MAX);
    assert_eq!(i64_op(Opcode::I64TruncSatF64U, &[Value::f64(123.9)]), 123);
    assert_eq!(i64_op(Opcode::I64TruncSatF32U, &[Value::f32(-5.0)]), 0);
}

#[test]
fn integer_to_float_conversions() {
    assert_eq!(f64_op(Opcode::F64ConvertI32U, &[Value::i32(-1)]), 4294967295.0);
    assert_eq!(f64_op(Opcode::F64ConvertI32S, &[Value::i32(-1)]), -1.0);
    assert_eq!(f32_op(Opcode::F32ConvertI32S, &[Value::i32(16777217)]), 16777216.0);
    assert_eq!(f32_op(Opcode::F32ConvertI64U, &[Value::i64(-1)]), 18446744073709551616.0);
    assert_eq!(f64_op(Opcode::F64ConvertI64S, &[Value::i64(i64::MIN)]), -9223372036854775808.0);
}

#[test]
fn float_width_conversions() {
    assert_eq!(f64_op(Opcode::F64PromoteF32, &[Value::f32(1.5)]), 1.5);
    assert_eq!(f32_op(Opcode::F32DemoteF64, &[Value::f64(2.5)]), 2.5);
    // Demotion rounds to nearest-even.
    assert_eq!(f32_op(Opcode::F32DemoteF64, &[Value::f64(1.0000000001)]), 1.0);
}

#[test]
fn reinterpret_preserves_nan_payloads() {
    let bits: u64 = 0x7ff8_dead_beef_0001;
    let instance = Instance::builder()
        .ty(vec![ValType::I64], vec![ValType::I64])
        .func(
            0,
            vec![],
            vec![
                op1(Opcode::LocalGet, 0),
                op(Opcode::F64ReinterpretI64),
                op(Opcode::I64ReinterpretF64),
                op(Opcode::End),
            ],
        )
        .build()
        .unwrap();
    let mut machine = Machine::new(instance);
    let out = machine.call(0, &[Value::u64(bits)], true).unwrap().unwrap()[0];
    assert_eq!(out.as_u64(), bits);

    let f32_bits: u32 = 0x7fc0_1234;
    let v = run_op(Opcode::F32ReinterpretI32, &[Value::u32(f32_bits)], ValType::F32).unwrap();
    assert!(v.as_f32().is_nan());
    assert_eq!(v.as_f32().to_bits(), f32_bits);
}

#[test]
fn result_tags_match_declared_types() {
    let v = run_op(Opcode::I64ExtendI32S, &[Value::i32(3)], ValType::I64).unwrap();
    assert_eq!(v.ty(), ValType::I64);
    let v = run_op(Opcode::F32ConvertI32S, &[Value::i32(3)], ValType::F32).unwrap();
    assert_eq!(v.ty(), ValType::F32);
    let v = run_op(Opcode::I32Eqz, &[Value::i32(3)], ValType::I32).unwrap();
    assert_eq!(v.ty(), ValType::I32);
}
