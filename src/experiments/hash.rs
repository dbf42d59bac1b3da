//! A multiply-xorshift integer hash, proved once, then used by two callers:
//! one proof treats the hash as an uninterpreted function, the other applies
//! its override.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment};
use crate::ir::{Function, FunctionBuilder, Operand};
use crate::scheduler::{VerificationJob, Workspace};
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::Op;

pub const MULTIPLIER: u64 = 0x045d_9f3b;

fn complex_hash() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("complex_hash").param("x", bv(32)).result(bv(32));
    for _ in 0..2 {
        b.assign("hi", Op::BvLshr, vec![Operand::var("x"), Operand::bv(16, 32)]);
        b.assign("x", Op::BvXor, vec![Operand::var("hi"), Operand::var("x")]);
        b.assign("x", Op::BvMul, vec![Operand::var("x"), Operand::bv(MULTIPLIER, 32)]);
    }
    b.assign("hi", Op::BvLshr, vec![Operand::var("x"), Operand::bv(16, 32)]);
    b.assign("x", Op::BvXor, vec![Operand::var("hi"), Operand::var("x")]);
    b.ret(vec![Operand::var("x")]);
    Ok(b.build()?)
}

fn hash_pair() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("hash_pair").param("a", bv(32)).param("b", bv(32)).result(bv(32));
    b.call(&["ha"], "complex_hash", vec![Operand::var("a")]);
    b.call(&["hb"], "complex_hash", vec![Operand::var("b")]);
    b.assign("r", Op::BvXor, vec![Operand::var("ha"), Operand::var("hb")]);
    b.ret(vec![Operand::var("r")]);
    Ok(b.build()?)
}

fn hash_twice() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("hash_twice").param("x", bv(32)).result(bv(32));
    b.call(&["h"], "complex_hash", vec![Operand::var("x")]);
    b.call(&["h"], "complex_hash", vec![Operand::var("h")]);
    b.ret(vec![Operand::var("h")]);
    Ok(b.build()?)
}

/// `(x >> 16) ^ x`
fn fold(x: Expr) -> Expr {
    let_in("f", x, bin(Op::BvXor, bin(Op::BvLshr, var("f"), lit(16, 32)), var("f")))
}

fn spec() -> Vec<SpecFn> {
    let round = |x: Expr| bin(Op::BvMul, fold(x), lit(MULTIPLIER, 32));
    vec![
        SpecFn::new("complex_hash", &[("x", bv(32))], &[bv(32)], fold(round(round(var("x"))))),
        SpecFn::new(
            "hash_pair_spec",
            &[("a", bv(32)), ("b", bv(32))],
            &[bv(32)],
            bin(
                Op::BvXor,
                call("complex_hash", vec![var("b")]),
                call("complex_hash", vec![var("a")]),
            ),
        ),
        SpecFn::new(
            "hash_twice_spec",
            &[("x", bv(32))],
            &[bv(32)],
            call("complex_hash", vec![call("complex_hash", vec![var("x")])]),
        ),
    ]
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let prog = program(vec![complex_hash()?, hash_pair()?, hash_twice()?]);
    let jobs = vec![
        VerificationJob::new("complex_hash", "complex_hash", "complex_hash"),
        VerificationJob::new("hash_pair", "hash_pair", "hash_pair_spec").with_uninterpreted(["complex_hash"]),
        VerificationJob::new("hash_twice", "hash_twice", "hash_twice_spec").with_overrides(["complex_hash"]),
    ];
    Ok(Experiment {
        name: "hash",
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

    fn reference(mut x: u32) -> u32 {
        x = ((x >> 16) ^ x).wrapping_mul(MULTIPLIER as u32);
        x = ((x >> 16) ^ x).wrapping_mul(MULTIPLIER as u32);
        (x >> 16) ^ x
    }

    #[test]
    fn test_hash_matches_reference() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        for x in [0u32, 1, 0xdead_beef, 0xffff_ffff, 12345] {
            let expected = reference(x) as u64;
            assert_eq!(machine.run("complex_hash", &[x as u64]).unwrap().outputs, vec![expected]);
            assert_eq!(eval_spec(&exp.workspace.spec, "complex_hash", &[x as u64]).unwrap(), vec![expected]);
        }
        let pair = machine.run("hash_pair", &[3, 5]).unwrap().outputs[0];
        assert_eq!(pair, (reference(3) ^ reference(5)) as u64);
    }

    #[test]
    fn test_hash_twice_depends_on_hash_job() {
        let exp = experiment().unwrap();
        assert_eq!(exp.job("complex_hash").unwrap().produces(), Some("complex_hash"));
        assert!(exp.job("hash_twice").unwrap().overrides.contains("complex_hash"));
        assert!(exp.job("hash_pair").unwrap().uninterpreted.contains("complex_hash"));
    }
}
