//! Live-variable analysis and cut-point validation.

use crate::error::LoadError;
use crate::ir::cfg::predecessors;
use crate::ir::instructions::Instruction;
use crate::ir::types::{BlockId, Function};
use std::collections::BTreeSet;

/// Per-block live-in / live-out sets.
#[derive(Debug, Clone)]
pub struct Liveness {
    pub live_in: Vec<BTreeSet<String>>,
    pub live_out: Vec<BTreeSet<String>>,
}

/// Cut points are transparent to the analysis: their live list records what
/// the author claims, and is checked against what the code actually needs.
fn instr_uses(instr: &Instruction) -> Vec<&str> {
    match instr {
        Instruction::CutPoint { .. } => Vec::new(),
        other => other.sources(),
    }
}

fn transfer<'a>(mut live: BTreeSet<String>, instrs: impl DoubleEndedIterator<Item = &'a Instruction>) -> BTreeSet<String> {
    for instr in instrs.rev() {
        for d in instr.destinations() {
            live.remove(d);
        }
        for u in instr_uses(instr) {
            live.insert(u.to_string());
        }
    }
    live
}

/// Backward fixpoint over the CFG.
pub fn compute(function: &Function) -> Liveness {
    let n = function.blocks.len();
    let mut live_in = vec![BTreeSet::new(); n];
    let mut live_out: Vec<BTreeSet<String>> = vec![BTreeSet::new(); n];
    let preds = predecessors(function);
    let mut work: Vec<BlockId> = (0..n).collect();

    while let Some(b) = work.pop() {
        let block = &function.blocks[b];
        let mut out = BTreeSet::new();
        for succ in block.terminator.successors() {
            out.extend(live_in[succ].iter().cloned());
        }
        let mut at_end = out.clone();
        for u in block.terminator.sources() {
            at_end.insert(u.to_string());
        }
        let new_in = transfer(at_end, block.instructions.iter());
        live_out[b] = out;
        if new_in != live_in[b] {
            live_in[b] = new_in;
            work.extend(preds[b].iter().copied());
        }
    }
    Liveness { live_in, live_out }
}

impl Liveness {
    /// Variables live immediately before instruction `index` of `block`.
    pub fn live_before(&self, function: &Function, block: BlockId, index: usize) -> BTreeSet<String> {
        let b = &function.blocks[block];
        let mut at_end = self.live_out[block].clone();
        for u in b.terminator.sources() {
            at_end.insert(u.to_string());
        }
        transfer(at_end, b.instructions[index..].iter())
    }
}

/// Check that every cut point names all variables live across it. Missing
/// variables are reported in sorted order so the first one is deterministic.
pub fn check_cut_points(function: &Function) -> Result<(), LoadError> {
    let liveness = compute(function);
    for (b, block) in function.blocks.iter().enumerate() {
        for (i, instr) in block.instructions.iter().enumerate() {
            if let Instruction::CutPoint { name, live } = instr {
                let needed = liveness.live_before(function, b, i + 1);
                let supplied: BTreeSet<&str> = live.iter().map(String::as_str).collect();
                if let Some(missing) = needed.iter().find(|v| !supplied.contains(v.as_str())) {
                    return Err(LoadError::ValueNotFoundAtCutPoint {
                        function: function.name.clone(),
                        cut: name.clone(),
                        var: missing.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::types::Operand;
    use crate::term::{Op, Sort};

    fn count_n(live: &[&str]) -> Function {
        let w = Sort::BitVec(64);
        let mut b = FunctionBuilder::new("count_n").param("n", w).result(w);
        let head = b.new_block("head");
        let body = b.new_block("body");
        let exit = b.new_block("exit");
        b.copy("c", Operand::bv(0, 64), 64);
        b.copy("i", Operand::bv(0, 64), 64);
        b.jump(head);
        b.switch_to(head);
        b.cut_point("count_inv", live);
        b.assign("t", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
        b.branch(Operand::var("t"), body, exit);
        b.switch_to(body);
        b.assign("c", Op::BvAdd, vec![Operand::var("c"), Operand::bv(1, 64)]);
        b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, 64)]);
        b.jump(head);
        b.switch_to(exit);
        b.ret(vec![Operand::var("c")]);
        b.build().unwrap()
    }

    #[test]
    fn test_live_at_loop_header() {
        let f = count_n(&["n", "c", "i"]);
        let l = compute(&f);
        let expected: BTreeSet<String> = ["c", "i", "n"].iter().map(|s| s.to_string()).collect();
        assert_eq!(l.live_in[1], expected);
        assert!(l.live_in[0].contains("n"));
        assert!(!l.live_in[0].contains("c"));
    }

    #[test]
    fn test_complete_cut_point_accepted() {
        assert!(check_cut_points(&count_n(&["n", "c", "i"])).is_ok());
    }

    #[test]
    fn test_missing_live_variable_rejected() {
        let err = check_cut_points(&count_n(&["c", "i"])).unwrap_err();
        assert_eq!(
            err,
            LoadError::ValueNotFoundAtCutPoint {
                function: "count_n".into(),
                cut: "count_inv".into(),
                var: "n".into(),
            }
        );
    }

    #[test]
    fn test_missing_variable_report_is_sorted() {
        let err = check_cut_points(&count_n(&["n"])).unwrap_err();
        assert!(matches!(err, LoadError::ValueNotFoundAtCutPoint { var, .. } if var == "c"));
    }
}
