//! Core types for the implementation control-flow graph

use crate::ir::instructions::{Instruction, Terminator};
use crate::term::Sort;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Index of a basic block within its function.
pub type BlockId = usize;

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Local variable (SSA-style or reassigned)
    Var(String),
    /// Bit-vector literal
    Const { value: u64, width: u32 },
    /// Boolean literal
    Bool(bool),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Self {
        Operand::Var(name.into())
    }

    pub fn bv(value: u64, width: u32) -> Self {
        Operand::Const { value, width }
    }

    /// Variable read by this operand, if any.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Operand::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(name) => write!(f, "%{}", name),
            Operand::Const { value, width } => write!(f, "{:#x}:bv{}", value, width),
            Operand::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Initial contents of a freshly allocated region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemInit {
    /// Never written; reads yield the `undefined` marker.
    Undefined,
    /// Contents irrelevant to the result (e.g. the unused half of a union).
    DontCare,
    /// Zero-initialised.
    Zero,
}

impl fmt::Display for MemInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemInit::Undefined => write!(f, "undef"),
            MemInit::DontCare => write!(f, "dontcare"),
            MemInit::Zero => write!(f, "zero"),
        }
    }
}

/// Basic block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// A function: typed parameters, result sorts, and an optional body.
/// A function without blocks is a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Sort)>,
    pub results: Vec<Sort>,
    pub blocks: Vec<Block>,
}

impl Function {
    /// Entry block index.
    pub const ENTRY: BlockId = 0;

    /// Body-less declaration.
    pub fn declaration(name: impl Into<String>, params: Vec<(String, Sort)>, results: Vec<Sort>) -> Self {
        Function {
            name: name.into(),
            params,
            results,
            blocks: Vec::new(),
        }
    }

    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Location `(block, instruction index)` of a named cut point.
    pub fn find_cut_point(&self, cut: &str) -> Option<(BlockId, usize)> {
        self.blocks.iter().enumerate().find_map(|(b, block)| {
            block.instructions.iter().position(|i| matches!(i, Instruction::CutPoint { name, .. } if name == cut))
                .map(|idx| (b, idx))
        })
    }

    /// Names of every cut point in the body, in block order.
    pub fn cut_points(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter_map(|i| match i {
                Instruction::CutPoint { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Constant, read-only global region such as a lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalRegion {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A whole implementation program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Program {
    pub functions: BTreeMap<String, Function>,
    pub globals: BTreeMap<String, GlobalRegion>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: Function) -> &mut Self {
        self.functions.insert(function.name.clone(), function);
        self
    }

    pub fn add_global(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        let name = name.into();
        self.globals.insert(name.clone(), GlobalRegion { name, bytes });
        self
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Content digest of one function and, transitively, every function and
    /// global it can reach.
    pub fn digest_of(&self, root: &str) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        let mut seen = std::collections::BTreeSet::new();
        let mut stack = vec![root.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            name.hash(&mut hasher);
            if let Some(f) = self.functions.get(&name) {
                f.hash(&mut hasher);
                for instr in f.blocks.iter().flat_map(|b| b.instructions.iter()) {
                    match instr {
                        Instruction::Call { callee, .. } => stack.push(callee.clone()),
                        Instruction::Load { region, .. } => {
                            if let Some(g) = self.globals.get(region) {
                                g.hash(&mut hasher);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_display() {
        assert_eq!(format!("{}", Operand::var("x")), "%x");
        assert_eq!(format!("{}", Operand::bv(255, 8)), "0xff:bv8");
        assert_eq!(format!("{}", Operand::Bool(true)), "true");
    }

    #[test]
    fn test_declaration_has_no_body() {
        let f = Function::declaration("h", vec![("x".into(), Sort::BitVec(32))], vec![Sort::BitVec(32)]);
        assert!(!f.has_body());
    }

    #[test]
    fn test_digest_tracks_callees() {
        let mut p = Program::new();
        p.add_function(Function::declaration("leaf", vec![], vec![Sort::BitVec(8)]));
        let before = p.digest_of("leaf");
        p.add_function(Function::declaration("leaf", vec![], vec![Sort::BitVec(16)]));
        assert_ne!(before, p.digest_of("leaf"));
    }
}
