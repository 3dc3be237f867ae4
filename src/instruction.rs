use std::fmt::{Display, Formatter};

use crate::error::{Error, MALFORMED_INSTRUCTION};

/// The Wasm 1.0 opcode set plus the sign-extension, non-trapping
/// float-to-int and bulk-memory extensions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Control
    Unreachable,
    Nop,
    Block,
    Loop,
    If,
    Else,
    End,
    Br,
    BrIf,
    BrTable,
    Return,
    Call,
    CallIndirect,
    // Parametric
    Drop,
    Select,
    // Variable
    LocalGet,
    LocalSet,
    LocalTee,
    GlobalGet,
    GlobalSet,
    // Memory
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
    MemorySize,
    MemoryGrow,
    MemoryInit,
    DataDrop,
    MemoryCopy,
    // Constants
    I32Const,
    I64Const,
    F32Const,
    F64Const,
    // i32 comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    // i64 comparison
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    // float comparison
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    // i32 numeric
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    // i64 numeric
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,
    // f32 numeric
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    // f64 numeric
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,
    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    // Sign extension
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
    // Saturating truncation
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

/// One pre-decoded instruction. `operands` holds the decoded immediates as
/// signed 64-bit values; consumers cast to the width they need. The label
/// fields are pc targets filled in by [`resolve_labels`] before execution;
/// the machine never scans the stream at runtime.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<i64>,
    pub label_true: usize,
    pub label_false: usize,
    /// BR_TABLE targets; the last entry is the default.
    pub label_table: Vec<usize>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self::with(opcode, Vec::new())
    }

    pub fn with(opcode: Opcode, operands: Vec<i64>) -> Self {
        Self { opcode, operands, label_true: 0, label_false: 0, label_table: Vec::new() }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.opcode)?;
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RegionKind {
    Block,
    Loop,
    If,
}

#[derive(Debug)]
struct Region {
    kind: RegionKind,
    start: usize,
    else_at: Option<usize>,
    end_at: usize,
}

/// Resolve the structured-control labels of a function body, in decoder
/// order: match every BLOCK/LOOP/IF to its ELSE/END, then point branches at
/// their targets.
///
/// Branch targets follow the machine's control model: a branch to a BLOCK
/// or IF lands *on* its END (the END performs the unwind), a branch to a
/// LOOP lands on the LOOP instruction itself, and a branch past all open
/// blocks lands on the function-level END. The body must be terminated by
/// that function-level END.
pub fn resolve_labels(code: &mut [Instruction]) -> Result<(), Error> {
    let mut regions: Vec<Region> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut func_end = None;

    for (i, inst) in code.iter().enumerate() {
        match inst.opcode {
            Opcode::Block => {
                open.push(regions.len());
                regions.push(Region { kind: RegionKind::Block, start: i, else_at: None, end_at: 0 });
            }
            Opcode::Loop => {
                open.push(regions.len());
                regions.push(Region { kind: RegionKind::Loop, start: i, else_at: None, end_at: 0 });
            }
            Opcode::If => {
                open.push(regions.len());
                regions.push(Region { kind: RegionKind::If, start: i, else_at: None, end_at: 0 });
            }
            Opcode::Else => {
                let &r = open.last().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
                if regions[r].kind != RegionKind::If || regions[r].else_at.is_some() {
                    return Err(Error::engine(MALFORMED_INSTRUCTION));
                }
                regions[r].else_at = Some(i);
            }
            Opcode::End => match open.pop() {
                Some(r) => regions[r].end_at = i,
                None => {
                    // The function-level END closes the body.
                    if i + 1 != code.len() {
                        return Err(Error::engine(MALFORMED_INSTRUCTION));
                    }
                    func_end = Some(i);
                }
            },
            _ => {}
        }
    }
    let func_end = func_end.ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
    if !open.is_empty() {
        return Err(Error::engine(MALFORMED_INSTRUCTION));
    }

    // Second walk: the region stack is live again, and every END is known.
    let branch_target = |open: &[usize], depth: u64, regions: &[Region]| -> Result<usize, Error> {
        let depth = depth as usize;
        if depth < open.len() {
            let region = &regions[open[open.len() - 1 - depth]];
            Ok(match region.kind {
                RegionKind::Loop => region.start,
                RegionKind::Block | RegionKind::If => region.end_at,
            })
        } else if depth == open.len() {
            Ok(func_end)
        } else {
            Err(Error::engine(MALFORMED_INSTRUCTION))
        }
    };

    let mut open: Vec<usize> = Vec::new();
    let mut region_at = 0usize;
    for i in 0..code.len() {
        match code[i].opcode {
            Opcode::Block | Opcode::Loop | Opcode::If => {
                debug_assert_eq!(regions[region_at].start, i);
                if code[i].opcode == Opcode::If {
                    let region = &regions[region_at];
                    code[i].label_true = i + 1;
                    code[i].label_false = match region.else_at {
                        Some(e) => e + 1,
                        None => region.end_at,
                    };
                }
                open.push(region_at);
                region_at += 1;
            }
            Opcode::Else => {
                let &r = open.last().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
                code[i].label_true = regions[r].end_at;
            }
            Opcode::End => {
                open.pop();
            }
            Opcode::Br => {
                let depth = *code[i].operands.first().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
                code[i].label_true = branch_target(&open, depth as u64, &regions)?;
            }
            Opcode::BrIf => {
                let depth = *code[i].operands.first().ok_or_else(|| Error::engine(MALFORMED_INSTRUCTION))?;
                code[i].label_true = branch_target(&open, depth as u64, &regions)?;
                code[i].label_false = i + 1;
            }
            Opcode::BrTable => {
                if code[i].operands.is_empty() {
                    return Err(Error::engine(MALFORMED_INSTRUCTION));
                }
                let depths = code[i].operands.clone();
                let mut table = Vec::with_capacity(depths.len());
                for depth in depths {
                    table.push(branch_target(&open, depth as u64, &regions)?);
                }
                code[i].label_table = table;
            }
            _ => {}
        }
    }

    Ok(())
}
