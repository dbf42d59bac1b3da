//! Instruction and terminator definitions for the IR

use crate::ir::types::{BlockId, MemInit, Operand};
use crate::term::Op;
use std::fmt;

/// Straight-line instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `dst = op(args)`
    Assign {
        dst: String,
        op: Op,
        args: Vec<Operand>,
    },
    /// `dst = cond ? then_val : else_val`
    Select {
        dst: String,
        cond: Operand,
        then_val: Operand,
        else_val: Operand,
    },
    /// Allocate a frame-local byte region.
    Alloc {
        region: String,
        size: u64,
        init: MemInit,
    },
    /// Little-endian load of `bytes` bytes.
    Load {
        dst: String,
        region: String,
        offset: Operand,
        bytes: u32,
    },
    /// Little-endian store of `bytes` bytes.
    Store {
        region: String,
        offset: Operand,
        value: Operand,
        bytes: u32,
    },
    /// Call with one destination per callee result.
    Call {
        dsts: Vec<String>,
        callee: String,
        args: Vec<Operand>,
    },
    /// Loop cut point naming every variable live across it.
    CutPoint { name: String, live: Vec<String> },
}

/// Block terminators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Vec<Operand>),
}

impl Instruction {
    /// Variables written by this instruction
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Instruction::Assign { dst, .. }
            | Instruction::Select { dst, .. }
            | Instruction::Load { dst, .. } => vec![dst.as_str()],
            Instruction::Call { dsts, .. } => dsts.iter().map(String::as_str).collect(),
            Instruction::Alloc { .. } | Instruction::Store { .. } | Instruction::CutPoint { .. } => Vec::new(),
        }
    }

    /// Variables read by this instruction
    pub fn sources(&self) -> Vec<&str> {
        let operands: Vec<&Operand> = match self {
            Instruction::Assign { args, .. } | Instruction::Call { args, .. } => args.iter().collect(),
            Instruction::Select {
                cond,
                then_val,
                else_val,
                ..
            } => vec![cond, then_val, else_val],
            Instruction::Load { offset, .. } => vec![offset],
            Instruction::Store { offset, value, .. } => vec![offset, value],
            Instruction::Alloc { .. } => Vec::new(),
            Instruction::CutPoint { live, .. } => return live.iter().map(String::as_str).collect(),
        };
        operands.into_iter().filter_map(Operand::as_var).collect()
    }
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(b) => vec![*b],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) => Vec::new(),
        }
    }

    pub fn sources(&self) -> Vec<&str> {
        match self {
            Terminator::Jump(_) => Vec::new(),
            Terminator::Branch { cond, .. } => cond.as_var().into_iter().collect(),
            Terminator::Return(values) => values.iter().filter_map(Operand::as_var).collect(),
        }
    }
}

fn join(ops: &[Operand]) -> String {
    ops.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Assign { dst, op, args } => write!(f, "%{} = {} {}", dst, op.name(), join(args)),
            Instruction::Select {
                dst,
                cond,
                then_val,
                else_val,
            } => write!(f, "%{} = select {}, {}, {}", dst, cond, then_val, else_val),
            Instruction::Alloc { region, size, init } => write!(f, "alloc {}[{}] {}", region, size, init),
            Instruction::Load {
                dst,
                region,
                offset,
                bytes,
            } => write!(f, "%{} = load{} {}[{}]", dst, bytes * 8, region, offset),
            Instruction::Store {
                region,
                offset,
                value,
                bytes,
            } => write!(f, "store{} {}[{}], {}", bytes * 8, region, offset, value),
            Instruction::Call { dsts, callee, args } => {
                let lhs = dsts.iter().map(|d| format!("%{}", d)).collect::<Vec<_>>().join(", ");
                write!(f, "{} = call {}({})", lhs, callee, join(args))
            }
            Instruction::CutPoint { name, live } => write!(f, "cut {} [{}]", name, live.join(", ")),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(b) => write!(f, "br bb{}", b),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {}, bb{}, bb{}", cond, then_block, else_block),
            Terminator::Return(values) => write!(f, "ret {}", join(values)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_defs_and_uses() {
        let i = Instruction::Assign {
            dst: "y".into(),
            op: Op::BvAdd,
            args: vec![Operand::var("x"), Operand::bv(1, 32)],
        };
        assert_eq!(i.destinations(), vec!["y"]);
        assert_eq!(i.sources(), vec!["x"]);
    }

    #[test]
    fn test_cut_point_reads_live_list() {
        let i = Instruction::CutPoint {
            name: "inv".into(),
            live: vec!["n".into(), "c".into()],
        };
        assert_eq!(i.sources(), vec!["n", "c"]);
        assert!(i.destinations().is_empty());
    }

    #[test]
    fn test_terminator_successors() {
        let t = Terminator::Branch {
            cond: Operand::var("c"),
            then_block: 1,
            else_block: 2,
        };
        assert_eq!(t.successors(), vec![1, 2]);
        assert_eq!(t.sources(), vec!["c"]);
        assert!(Terminator::Return(vec![]).successors().is_empty());
    }

    #[test]
    fn test_display() {
        let i = Instruction::Load {
            dst: "v".into(),
            region: "buf".into(),
            offset: Operand::bv(4, 32),
            bytes: 4,
        };
        assert_eq!(format!("{}", i), "%v = load32 buf[0x4:bv32]");
    }
}
