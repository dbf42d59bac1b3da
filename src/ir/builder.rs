//! Programmatic construction of functions.

use crate::error::LoadError;
use crate::ir::instructions::{Instruction, Terminator};
use crate::ir::types::{Block, BlockId, Function, MemInit, Operand};
use crate::term::{Op, Sort};

struct PendingBlock {
    label: String,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
}

/// Builder for a [`Function`]. Instructions are appended to the current
/// block; the entry block is created up front and is current initially.
pub struct FunctionBuilder {
    name: String,
    params: Vec<(String, Sort)>,
    results: Vec<Sort>,
    blocks: Vec<PendingBlock>,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionBuilder {
            name: name.into(),
            params: Vec::new(),
            results: Vec::new(),
            blocks: vec![PendingBlock {
                label: "entry".into(),
                instructions: Vec::new(),
                terminator: None,
            }],
            current: Function::ENTRY,
        }
    }

    pub fn param(mut self, name: impl Into<String>, sort: Sort) -> Self {
        self.params.push((name.into(), sort));
        self
    }

    pub fn result(mut self, sort: Sort) -> Self {
        self.results.push(sort);
        self
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        self.blocks.push(PendingBlock {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        });
        self.blocks.len() - 1
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn push(&mut self, instr: Instruction) {
        if let Some(block) = self.blocks.get_mut(self.current) {
            block.instructions.push(instr);
        }
    }

    fn terminate(&mut self, term: Terminator) {
        if let Some(block) = self.blocks.get_mut(self.current) {
            block.terminator = Some(term);
        }
    }

    pub fn assign(&mut self, dst: impl Into<String>, op: Op, args: Vec<Operand>) {
        self.push(Instruction::Assign {
            dst: dst.into(),
            op,
            args,
        });
    }

    /// `dst = src` for a bit-vector of `width` bits.
    pub fn copy(&mut self, dst: impl Into<String>, src: Operand, width: u32) {
        self.assign(dst, Op::BvOr, vec![src, Operand::bv(0, width)]);
    }

    pub fn select(&mut self, dst: impl Into<String>, cond: Operand, then_val: Operand, else_val: Operand) {
        self.push(Instruction::Select {
            dst: dst.into(),
            cond,
            then_val,
            else_val,
        });
    }

    pub fn alloc(&mut self, region: impl Into<String>, size: u64, init: MemInit) {
        self.push(Instruction::Alloc {
            region: region.into(),
            size,
            init,
        });
    }

    pub fn load(&mut self, dst: impl Into<String>, region: impl Into<String>, offset: Operand, bytes: u32) {
        self.push(Instruction::Load {
            dst: dst.into(),
            region: region.into(),
            offset,
            bytes,
        });
    }

    pub fn store(&mut self, region: impl Into<String>, offset: Operand, value: Operand, bytes: u32) {
        self.push(Instruction::Store {
            region: region.into(),
            offset,
            value,
            bytes,
        });
    }

    pub fn call(&mut self, dsts: &[&str], callee: impl Into<String>, args: Vec<Operand>) {
        self.push(Instruction::Call {
            dsts: dsts.iter().map(|d| d.to_string()).collect(),
            callee: callee.into(),
            args,
        });
    }

    pub fn cut_point(&mut self, name: impl Into<String>, live: &[&str]) {
        self.push(Instruction::CutPoint {
            name: name.into(),
            live: live.iter().map(|v| v.to_string()).collect(),
        });
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, values: Vec<Operand>) {
        self.terminate(Terminator::Return(values));
    }

    /// Finish the function; every block must be terminated.
    pub fn build(self) -> Result<Function, LoadError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (id, pending) in self.blocks.into_iter().enumerate() {
            let terminator = pending.terminator.ok_or_else(|| LoadError::Malformed {
                function: self.name.clone(),
                detail: format!("block {} ({}) has no terminator", id, pending.label),
            })?;
            blocks.push(Block {
                label: pending.label,
                instructions: pending.instructions,
                terminator,
            });
        }
        let function = Function {
            name: self.name,
            params: self.params,
            results: self.results,
            blocks,
        };
        crate::ir::cfg::validate(&function)?;
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_straight_line() {
        let mut b = FunctionBuilder::new("inc")
            .param("x", Sort::BitVec(32))
            .result(Sort::BitVec(32));
        b.assign("y", Op::BvAdd, vec![Operand::var("x"), Operand::bv(1, 32)]);
        b.ret(vec![Operand::var("y")]);
        let f = b.build().unwrap();
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.params.len(), 1);
        assert!(f.has_body());
    }

    #[test]
    fn test_unterminated_block_rejected() {
        let mut b = FunctionBuilder::new("bad");
        let other = b.new_block("other");
        b.jump(other);
        assert!(matches!(b.build(), Err(LoadError::Malformed { .. })));
    }
}
