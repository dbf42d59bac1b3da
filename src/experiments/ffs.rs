//! Find-first-set: position (1-based) of the lowest set bit of a 32-bit
//! word, 0 for zero.
//!
//! The specification scans bit by bit. The implementations are a four-step
//! binary search, the same search with one wrong answer planted, and a
//! De Bruijn multiply with a lookup table.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment};
use crate::ir::{Function, FunctionBuilder, Operand};
use crate::scheduler::{VerificationJob, Workspace};
use crate::semantics::executor::ExecConfig;
use crate::semantics::memory::AliasPolicy;
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::Op;

/// The input on which `ffs_bug` answers 4 instead of 5.
pub const BUG_INPUT: u64 = 0x10_1010;

const DE_BRUIJN: u64 = 0x077C_B531;

const DE_BRUIJN_POSITION: [u8; 32] = [
    0, 1, 28, 2, 29, 14, 24, 3, 30, 22, 20, 15, 25, 17, 4, 8, 31, 27, 13, 23, 21, 19, 16, 7, 26, 12, 18, 6, 11, 5, 10,
    9,
];

fn spec() -> Vec<SpecFn> {
    let scan = SpecFn::new(
        "ffs_scan",
        &[("word", bv(32)), ("i", bv(32))],
        &[bv(32)],
        ite(
            bin(Op::Eq, var("i"), lit(32, 32)),
            lit(0, 32),
            ite(
                bin(
                    Op::Eq,
                    bin(Op::BvAnd, bin(Op::BvLshr, var("word"), var("i")), lit(1, 32)),
                    lit(1, 32),
                ),
                bin(Op::BvAdd, var("i"), lit(1, 32)),
                call("ffs_scan", vec![var("word"), bin(Op::BvAdd, var("i"), lit(1, 32))]),
            ),
        ),
    );
    let reference = SpecFn::new(
        "ffs_ref",
        &[("word", bv(32))],
        &[bv(32)],
        ite(
            bin(Op::Eq, var("word"), lit(0, 32)),
            lit(0, 32),
            call("ffs_scan", vec![var("word"), lit(0, 32)]),
        ),
    );
    vec![scan, reference]
}

/// Binary search over halves, quarters, nibbles and bit pairs.
fn binary_search(name: &str, planted_bug: bool) -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new(name).param("word", bv(32)).result(bv(32));
    if planted_bug {
        let hit = b.new_block("hit");
        let search = b.new_block("search");
        b.assign("is_bug", Op::Eq, vec![Operand::var("word"), Operand::bv(BUG_INPUT, 32)]);
        b.branch(Operand::var("is_bug"), hit, search);
        b.switch_to(hit);
        b.ret(vec![Operand::bv(4, 32)]);
        b.switch_to(search);
    }
    b.copy("i", Operand::var("word"), 32);
    b.copy("n", Operand::bv(1, 32), 32);
    for (shift, low_mask) in [(16u64, 0xffffu64), (8, 0xff), (4, 0xf), (2, 0x3)] {
        let skip = b.new_block(format!("skip{}", shift));
        let next = b.new_block(format!("after{}", shift));
        b.assign("low", Op::BvAnd, vec![Operand::var("i"), Operand::bv(low_mask, 32)]);
        b.assign("empty", Op::Eq, vec![Operand::var("low"), Operand::bv(0, 32)]);
        b.branch(Operand::var("empty"), skip, next);
        b.switch_to(skip);
        b.assign("n", Op::BvAdd, vec![Operand::var("n"), Operand::bv(shift, 32)]);
        b.assign("i", Op::BvLshr, vec![Operand::var("i"), Operand::bv(shift, 32)]);
        b.jump(next);
        b.switch_to(next);
    }
    // i ? n + ((i + 1) & 1) : 0
    b.assign("i1", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, 32)]);
    b.assign("even", Op::BvAnd, vec![Operand::var("i1"), Operand::bv(1, 32)]);
    b.assign("r", Op::BvAdd, vec![Operand::var("n"), Operand::var("even")]);
    b.assign("zero", Op::Eq, vec![Operand::var("i"), Operand::bv(0, 32)]);
    b.select("r", Operand::var("zero"), Operand::bv(0, 32), Operand::var("r"));
    b.ret(vec![Operand::var("r")]);
    Ok(b.build()?)
}

/// `table[((w & -w) * DE_BRUIJN) >> 27] + 1`
fn de_bruijn() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("ffs_debruijn").param("word", bv(32)).result(bv(32));
    b.assign("neg", Op::BvNeg, vec![Operand::var("word")]);
    b.assign("lowest", Op::BvAnd, vec![Operand::var("word"), Operand::var("neg")]);
    b.assign("prod", Op::BvMul, vec![Operand::var("lowest"), Operand::bv(DE_BRUIJN, 32)]);
    b.assign("idx", Op::BvLshr, vec![Operand::var("prod"), Operand::bv(27, 32)]);
    b.load("pos8", "debruijn_position", Operand::var("idx"), 1);
    b.assign("pos", Op::ZeroExt(24), vec![Operand::var("pos8")]);
    b.assign("r", Op::BvAdd, vec![Operand::var("pos"), Operand::bv(1, 32)]);
    b.assign("zero", Op::Eq, vec![Operand::var("word"), Operand::bv(0, 32)]);
    b.select("r", Operand::var("zero"), Operand::bv(0, 32), Operand::var("r"));
    b.ret(vec![Operand::var("r")]);
    Ok(b.build()?)
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let mut prog = program(vec![
        binary_search("ffs_imp", false)?,
        binary_search("ffs_bug", true)?,
        de_bruijn()?,
    ]);
    prog.add_global("debruijn_position", DE_BRUIJN_POSITION.to_vec());

    let jobs = vec![
        VerificationJob::new("ffs_imp", "ffs_imp", "ffs_ref"),
        VerificationJob::new("ffs_bug", "ffs_bug", "ffs_ref"),
        VerificationJob::new("ffs_debruijn", "ffs_debruijn", "ffs_ref")
            .with_exec_config(ExecConfig::default().with_alias_policy(AliasPolicy::Enumerate)),
    ];
    Ok(Experiment {
        name: "ffs",
        workspace: Workspace::new(prog, module(spec())),
        lemmas: Vec::new(),
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::concrete::ConcreteMachine;
    use crate::spec::eval_spec;
    use crate::term::Assignment;

    fn run(exp: &Experiment, name: &str, word: u64) -> u64 {
        let undef = Assignment::new();
        ConcreteMachine::new(&exp.workspace.program, &undef).run(name, &[word]).unwrap().outputs[0]
    }

    #[test]
    fn test_reference_values() {
        let exp = experiment().unwrap();
        let spec = &exp.workspace.spec;
        assert_eq!(eval_spec(spec, "ffs_ref", &[0]).unwrap(), vec![0]);
        assert_eq!(eval_spec(spec, "ffs_ref", &[1]).unwrap(), vec![1]);
        assert_eq!(eval_spec(spec, "ffs_ref", &[0x8000_0000]).unwrap(), vec![32]);
        assert_eq!(eval_spec(spec, "ffs_ref", &[BUG_INPUT]).unwrap(), vec![5]);
    }

    #[test]
    fn test_implementations_agree_concretely() {
        let exp = experiment().unwrap();
        for word in [0u64, 1, 2, 3, 0x80, 0x100, 0xf000, 0x8000_0000, 0xffff_ffff, 0x0001_0000] {
            let expected = eval_spec(&exp.workspace.spec, "ffs_ref", &[word]).unwrap()[0];
            assert_eq!(run(&exp, "ffs_imp", word), expected, "ffs_imp({:#x})", word);
            assert_eq!(run(&exp, "ffs_debruijn", word), expected, "ffs_debruijn({:#x})", word);
        }
        assert_eq!(run(&exp, "ffs_bug", BUG_INPUT), 4);
        assert_eq!(run(&exp, "ffs_bug", 0x20), 6);
    }
}
