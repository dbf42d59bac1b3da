//! Control-flow structure: ordering, back edges and natural loops.

use crate::error::LoadError;
use crate::ir::types::{BlockId, Function};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Loop structure of a function body.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    /// Position of each block in reverse post-order (unreachable blocks last).
    pub rpo_index: Vec<usize>,
    /// Edges `(latch, header)` that close a loop.
    pub back_edges: BTreeSet<(BlockId, BlockId)>,
    /// Natural loop body per header, header included.
    pub bodies: BTreeMap<BlockId, BTreeSet<BlockId>>,
    /// Exploration priority: a topological order of the forward-edge graph
    /// that finishes a loop's body before any block outside it.
    pub order: Vec<usize>,
}

impl LoopInfo {
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges.contains(&(from, to))
    }

    /// Headers of every loop containing `block`.
    pub fn enclosing_headers(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.bodies
            .iter()
            .filter(move |(_, body)| body.contains(&block))
            .map(|(h, _)| *h)
    }

    pub fn in_loop(&self, header: BlockId, block: BlockId) -> bool {
        self.bodies.get(&header).is_some_and(|b| b.contains(&block))
    }
}

/// Check that every terminator targets an existing block.
pub fn validate(function: &Function) -> Result<(), LoadError> {
    let n = function.blocks.len();
    for (id, block) in function.blocks.iter().enumerate() {
        for succ in block.terminator.successors() {
            if succ >= n {
                return Err(LoadError::Malformed {
                    function: function.name.clone(),
                    detail: format!("block {} ({}) jumps to missing block {}", id, block.label, succ),
                });
            }
        }
    }
    Ok(())
}

pub fn predecessors(function: &Function) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); function.blocks.len()];
    for (id, block) in function.blocks.iter().enumerate() {
        for succ in block.terminator.successors() {
            if let Some(p) = preds.get_mut(succ) {
                p.push(id);
            }
        }
    }
    preds
}

/// Compute reverse post-order and loops with an iterative DFS from the entry.
pub fn analyze(function: &Function) -> Result<LoopInfo, LoadError> {
    validate(function)?;
    let n = function.blocks.len();
    let mut info = LoopInfo {
        rpo_index: vec![usize::MAX; n],
        ..LoopInfo::default()
    };
    if n == 0 {
        return Ok(info);
    }

    let mut on_stack = vec![false; n];
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack: Vec<(BlockId, usize)> = vec![(Function::ENTRY, 0)];
    visited[Function::ENTRY] = true;
    on_stack[Function::ENTRY] = true;

    while let Some((block, next)) = stack.pop() {
        let succs = function.blocks[block].terminator.successors();
        if next < succs.len() {
            stack.push((block, next + 1));
            let succ = succs[next];
            if on_stack[succ] {
                info.back_edges.insert((block, succ));
            } else if !visited[succ] {
                visited[succ] = true;
                on_stack[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            on_stack[block] = false;
            postorder.push(block);
        }
    }

    for (i, block) in postorder.iter().rev().enumerate() {
        info.rpo_index[*block] = i;
    }
    let reached = postorder.len();
    for (offset, idx) in info.rpo_index.iter_mut().filter(|i| **i == usize::MAX).enumerate() {
        *idx = reached + offset;
    }

    let preds = predecessors(function);
    for &(latch, header) in &info.back_edges {
        let body = info.bodies.entry(header).or_default();
        body.insert(header);
        let mut work = vec![latch];
        while let Some(b) = work.pop() {
            if body.insert(b) {
                work.extend(preds[b].iter().copied());
            }
        }
    }
    info.order = schedule(function, &info);
    Ok(info)
}

fn schedule(function: &Function, info: &LoopInfo) -> Vec<usize> {
    let n = function.blocks.len();
    let depth: Vec<usize> = (0..n).map(|b| info.enclosing_headers(b).count()).collect();
    let mut indegree = vec![0usize; n];
    for (id, block) in function.blocks.iter().enumerate() {
        for succ in block.terminator.successors() {
            if !info.is_back_edge(id, succ) {
                indegree[succ] += 1;
            }
        }
    }

    let mut order = vec![usize::MAX; n];
    let mut ready = BinaryHeap::new();
    ready.push((depth[Function::ENTRY], Reverse(info.rpo_index[Function::ENTRY]), Function::ENTRY));
    let mut next = 0;
    while let Some((_, _, block)) = ready.pop() {
        if order[block] != usize::MAX {
            continue;
        }
        order[block] = next;
        next += 1;
        for succ in function.blocks[block].terminator.successors() {
            if info.is_back_edge(block, succ) {
                continue;
            }
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.push((depth[succ], Reverse(info.rpo_index[succ]), succ));
            }
        }
    }
    // Blocks only reachable through unreachable code keep their rpo position.
    for (b, slot) in order.iter_mut().enumerate() {
        if *slot == usize::MAX {
            *slot = n + info.rpo_index[b];
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::types::Operand;
    use crate::term::{Op, Sort};

    fn counting_loop() -> Function {
        let mut b = FunctionBuilder::new("loop")
            .param("n", Sort::BitVec(8))
            .result(Sort::BitVec(8));
        let head = b.new_block("head");
        let body = b.new_block("body");
        let exit = b.new_block("exit");
        b.assign("i", Op::BvAdd, vec![Operand::bv(0, 8), Operand::bv(0, 8)]);
        b.jump(head);
        b.switch_to(head);
        b.assign("c", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
        b.branch(Operand::var("c"), body, exit);
        b.switch_to(body);
        b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, 8)]);
        b.jump(head);
        b.switch_to(exit);
        b.ret(vec![Operand::var("i")]);
        b.build().unwrap()
    }

    #[test]
    fn test_loop_detection() {
        let f = counting_loop();
        let info = analyze(&f).unwrap();
        assert!(info.is_back_edge(2, 1));
        assert_eq!(info.back_edges.len(), 1);
        let body = &info.bodies[&1];
        assert!(body.contains(&1) && body.contains(&2));
        assert!(!body.contains(&3));
    }

    #[test]
    fn test_rpo_orders_forward_edges() {
        let f = counting_loop();
        let info = analyze(&f).unwrap();
        assert_eq!(info.rpo_index[0], 0);
        assert!(info.rpo_index[1] < info.rpo_index[2]);
        assert!(info.rpo_index[1] < info.rpo_index[3]);
    }

    #[test]
    fn test_order_finishes_loop_before_exit() {
        let f = counting_loop();
        let info = analyze(&f).unwrap();
        assert!(info.order[0] < info.order[1]);
        assert!(info.order[1] < info.order[2]);
        assert!(info.order[2] < info.order[3]);
    }

    #[test]
    fn test_missing_target_is_malformed() {
        let mut f = counting_loop();
        f.blocks[0].terminator = crate::ir::Terminator::Jump(9);
        assert!(matches!(analyze(&f), Err(LoadError::Malformed { .. })));
    }
}
