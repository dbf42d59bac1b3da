//! Loops: a straight-line cut, two counting loops proved by invariants, a
//! loop with a constant trip count that is unrolled, and a loop whose cut
//! point forgets a live value.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment};
use crate::ir::{Function, FunctionBuilder, Operand};
use crate::scheduler::{VerificationJob, Workspace};
use crate::semantics::executor::{ExecConfig, LoopStrategy};
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::{Op, Sort};

const W: u32 = 8;

fn all(mut conjuncts: Vec<Expr>) -> Expr {
    let first = conjuncts.remove(0);
    conjuncts.into_iter().fold(first, |acc, c| bin(Op::And, acc, c))
}

fn eq(a: Expr, b: Expr) -> Expr {
    bin(Op::Eq, a, b)
}

fn add2() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("add2").param("x", bv(W)).result(bv(W));
    b.assign("y", Op::BvAdd, vec![Operand::var("x"), Operand::bv(1, W)]);
    b.cut_point("mid", &["x", "y"]);
    b.assign("r", Op::BvAdd, vec![Operand::var("y"), Operand::bv(1, W)]);
    b.ret(vec![Operand::var("r")]);
    Ok(b.build()?)
}

/// c = 0; i = 0; while i < n { c += 1; cut; i += 1 } return c
fn count_n() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("count_n").param("n", bv(W)).result(bv(W));
    let head = b.new_block("head");
    let body = b.new_block("body");
    let exit = b.new_block("exit");
    b.copy("c", Operand::bv(0, W), W);
    b.copy("i", Operand::bv(0, W), W);
    b.jump(head);
    b.switch_to(head);
    b.assign("go", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
    b.branch(Operand::var("go"), body, exit);
    b.switch_to(body);
    b.assign("c", Op::BvAdd, vec![Operand::var("c"), Operand::bv(1, W)]);
    b.cut_point("count", &["n", "c", "i"]);
    b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, W)]);
    b.jump(head);
    b.switch_to(exit);
    b.ret(vec![Operand::var("c")]);
    Ok(b.build()?)
}

/// s = 0; i = 0; while i < n { s += k; cut; i += 1 } return s
fn accumulate(name: &str, live: &[&str]) -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new(name).param("n", bv(W)).param("k", bv(W)).result(bv(W));
    let head = b.new_block("head");
    let body = b.new_block("body");
    let exit = b.new_block("exit");
    b.copy("s", Operand::bv(0, W), W);
    b.copy("i", Operand::bv(0, W), W);
    b.jump(head);
    b.switch_to(head);
    b.assign("go", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
    b.branch(Operand::var("go"), body, exit);
    b.switch_to(body);
    b.assign("s", Op::BvAdd, vec![Operand::var("s"), Operand::var("k")]);
    b.cut_point("acc", live);
    b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, W)]);
    b.jump(head);
    b.switch_to(exit);
    b.ret(vec![Operand::var("s")]);
    Ok(b.build()?)
}

/// Bit count with a loop over the eight bit positions.
fn popcount8() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("popcount8").param("x", bv(W)).result(bv(W));
    let head = b.new_block("head");
    let body = b.new_block("body");
    let exit = b.new_block("exit");
    b.copy("c", Operand::bv(0, W), W);
    b.copy("i", Operand::bv(0, W), W);
    b.jump(head);
    b.switch_to(head);
    b.assign("go", Op::Ult, vec![Operand::var("i"), Operand::bv(8, W)]);
    b.branch(Operand::var("go"), body, exit);
    b.switch_to(body);
    b.assign("bit", Op::BvLshr, vec![Operand::var("x"), Operand::var("i")]);
    b.assign("bit", Op::BvAnd, vec![Operand::var("bit"), Operand::bv(1, W)]);
    b.assign("c", Op::BvAdd, vec![Operand::var("c"), Operand::var("bit")]);
    b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, W)]);
    b.jump(head);
    b.switch_to(exit);
    b.ret(vec![Operand::var("c")]);
    Ok(b.build()?)
}

fn spec() -> Vec<SpecFn> {
    let i1 = || bin(Op::BvAdd, var("i"), lit(1, W));
    vec![
        SpecFn::new("add2_spec", &[("x", bv(W))], &[bv(W)], bin(Op::BvAdd, var("x"), lit(2, W))),
        SpecFn::new(
            "add2_inv",
            &[("x0", bv(W)), ("x", bv(W)), ("y", bv(W))],
            &[Sort::Bool],
            all(vec![eq(var("x"), var("x0")), eq(var("y"), bin(Op::BvAdd, var("x"), lit(1, W)))]),
        ),
        SpecFn::new("count_spec", &[("n", bv(W))], &[bv(W)], var("n")),
        SpecFn::new(
            "count_inv",
            &[("n0", bv(W)), ("n", bv(W)), ("c", bv(W)), ("i", bv(W))],
            &[Sort::Bool],
            all(vec![
                eq(var("n"), var("n0")),
                eq(var("c"), i1()),
                bin(Op::Ult, var("i"), var("n")),
            ]),
        ),
        SpecFn::new(
            "accumulate_spec",
            &[("n", bv(W)), ("k", bv(W))],
            &[bv(W)],
            bin(Op::BvMul, var("n"), var("k")),
        ),
        SpecFn::new(
            "accumulate_inv",
            &[
                ("n0", bv(W)),
                ("k0", bv(W)),
                ("n", bv(W)),
                ("k", bv(W)),
                ("s", bv(W)),
                ("i", bv(W)),
            ],
            &[Sort::Bool],
            all(vec![
                eq(var("n"), var("n0")),
                eq(var("k"), var("k0")),
                eq(var("s"), bin(Op::BvMul, i1(), var("k"))),
                bin(Op::Ult, var("i"), var("n")),
            ]),
        ),
        SpecFn::new(
            "bits_from",
            &[("x", bv(W)), ("i", bv(W))],
            &[bv(W)],
            ite(
                eq(var("i"), lit(8, W)),
                lit(0, W),
                bin(
                    Op::BvAdd,
                    bin(Op::BvAnd, bin(Op::BvLshr, var("x"), var("i")), lit(1, W)),
                    call("bits_from", vec![var("x"), i1()]),
                ),
            ),
        ),
        SpecFn::new("popcount_spec", &[("x", bv(W))], &[bv(W)], call("bits_from", vec![var("x"), lit(0, W)])),
    ]
}

fn cut(name: &'static str, invariant: &'static str) -> ExecConfig {
    ExecConfig::default().with_loop_strategy(LoopStrategy::cut_points([(name, invariant)]))
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let prog = program(vec![
        add2()?,
        count_n()?,
        accumulate("accumulate", &["n", "k", "s", "i"])?,
        accumulate("accumulate_missing", &["n", "k", "i"])?,
        popcount8()?,
    ]);
    let jobs = vec![
        VerificationJob::new("add2", "add2", "add2_spec").with_exec_config(cut("mid", "add2_inv")),
        VerificationJob::new("count_n", "count_n", "count_spec").with_exec_config(cut("count", "count_inv")),
        VerificationJob::new("accumulate", "accumulate", "accumulate_spec")
            .with_exec_config(cut("acc", "accumulate_inv")),
        VerificationJob::new("accumulate_missing", "accumulate_missing", "accumulate_spec")
            .with_exec_config(cut("acc", "accumulate_inv")),
        VerificationJob::new("popcount8", "popcount8", "popcount_spec")
            .with_exec_config(ExecConfig::default().with_loop_strategy(LoopStrategy::unroll(16))),
    ];
    Ok(Experiment {
        name: "loops",
        workspace: Workspace::new(prog, module(spec())),
        lemmas: Vec::new(),
        jobs,
    })
}
