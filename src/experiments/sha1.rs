//! SHA-1 rounds 0..19: the choose function, one round, and four rounds
//! composed from the proved round.
//!
//! The implementation rotates with the shift-or idiom; the specification
//! uses rotate primitives. The `rotl5` and `rotl30` lemmas bridge the two
//! before the solver sees the queries.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment, LemmaDef};
use crate::ir::{Function, FunctionBuilder, Operand};
use crate::scheduler::{VerificationJob, Workspace};
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::{Op, Sort, Term};
use std::collections::BTreeMap;

/// Round constant for rounds 0..19
pub const K0: u64 = 0x5A82_7999;

const STATE: [&str; 5] = ["a", "b", "c", "d", "e"];

fn sha1_ch() -> Result<Function, VerifyError> {
    // z ^ (x & (y ^ z))
    let mut b = FunctionBuilder::new("sha1_ch")
        .param("x", bv(32))
        .param("y", bv(32))
        .param("z", bv(32))
        .result(bv(32));
    b.assign("t", Op::BvXor, vec![Operand::var("y"), Operand::var("z")]);
    b.assign("t", Op::BvAnd, vec![Operand::var("x"), Operand::var("t")]);
    b.assign("t", Op::BvXor, vec![Operand::var("z"), Operand::var("t")]);
    b.ret(vec![Operand::var("t")]);
    Ok(b.build()?)
}

fn rotl_shift_or(b: &mut FunctionBuilder, dst: &str, src: &str, n: u64) {
    let hi = format!("{}_hi", dst);
    let lo = format!("{}_lo", dst);
    b.assign(hi.as_str(), Op::BvShl, vec![Operand::var(src), Operand::bv(n, 32)]);
    b.assign(lo.as_str(), Op::BvLshr, vec![Operand::var(src), Operand::bv(32 - n, 32)]);
    b.assign(dst, Op::BvOr, vec![Operand::var(hi), Operand::var(lo)]);
}

fn sha1_round_ch() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("sha1_round_ch");
    for name in STATE.iter().chain(["w"].iter()) {
        b = b.param(*name, bv(32));
    }
    for _ in 0..5 {
        b = b.result(bv(32));
    }
    rotl_shift_or(&mut b, "a5", "a", 5);
    b.call(&["f"], "sha1_ch", vec![Operand::var("b"), Operand::var("c"), Operand::var("d")]);
    b.assign("t", Op::BvAdd, vec![Operand::var("a5"), Operand::var("f")]);
    b.assign("t", Op::BvAdd, vec![Operand::var("t"), Operand::var("e")]);
    b.assign("t", Op::BvAdd, vec![Operand::var("t"), Operand::bv(K0, 32)]);
    b.assign("t", Op::BvAdd, vec![Operand::var("t"), Operand::var("w")]);
    rotl_shift_or(&mut b, "b30", "b", 30);
    b.ret(vec![
        Operand::var("t"),
        Operand::var("a"),
        Operand::var("b30"),
        Operand::var("c"),
        Operand::var("d"),
    ]);
    Ok(b.build()?)
}

fn sha1_rounds4() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("sha1_rounds4");
    for name in STATE {
        b = b.param(name, bv(32));
    }
    for i in 0..4 {
        b = b.param(format!("w{}", i), bv(32));
    }
    for _ in 0..5 {
        b = b.result(bv(32));
    }
    for i in 0..4 {
        let mut args: Vec<Operand> = STATE.iter().map(|s| Operand::var(*s)).collect();
        args.push(Operand::var(format!("w{}", i)));
        b.call(&STATE, "sha1_round_ch", args);
    }
    b.ret(STATE.iter().map(|s| Operand::var(*s)).collect());
    Ok(b.build()?)
}

fn rotl(x: Expr, n: u64) -> Expr {
    bin(Op::BvRotl, x, lit(n, 32))
}

fn spec() -> Vec<SpecFn> {
    let ch = SpecFn::new(
        "sha1_ch_spec",
        &[("x", bv(32)), ("y", bv(32)), ("z", bv(32))],
        &[bv(32)],
        bin(
            Op::BvXor,
            bin(Op::BvAnd, var("x"), var("y")),
            bin(Op::BvAnd, prim(Op::BvNot, vec![var("x")]), var("z")),
        ),
    );

    let sum = [
        call("sha1_ch_spec", vec![var("b"), var("c"), var("d")]),
        var("e"),
        lit(K0, 32),
        var("w"),
    ]
    .into_iter()
    .fold(rotl(var("a"), 5), |acc, t| bin(Op::BvAdd, acc, t));
    let round_params: Vec<(&str, Sort)> = STATE.iter().chain(["w"].iter()).map(|n| (*n, bv(32))).collect();
    let round = SpecFn::new(
        "sha1_round_spec",
        &round_params,
        &[bv(32); 5],
        tuple(vec![sum, var("a"), rotl(var("b"), 30), var("c"), var("d")]),
    );

    let mut body = tuple(STATE.iter().map(|s| var(s)).collect());
    for i in (0..4).rev() {
        let mut args: Vec<Expr> = STATE.iter().map(|s| var(s)).collect();
        args.push(var(&format!("w{}", i)));
        body = let_tuple(&STATE, call("sha1_round_spec", args), body);
    }
    let names: Vec<String> = (0..4).map(|i| format!("w{}", i)).collect();
    let mut rounds_params: Vec<(&str, Sort)> = STATE.iter().map(|n| (*n, bv(32))).collect();
    rounds_params.extend(names.iter().map(|n| (n.as_str(), bv(32))));
    let rounds = SpecFn::new("sha1_rounds4_spec", &rounds_params, &[bv(32); 5], body);

    vec![ch, round, rounds]
}

fn rotate_lemma(n: u32) -> Result<LemmaDef, VerifyError> {
    let x = Term::var("x", bv(32));
    let lhs = Term::binary(
        Op::BvOr,
        &Term::binary(Op::BvShl, &x, &Term::bv(n as u64, 32)?)?,
        &Term::binary(Op::BvLshr, &x, &Term::bv(32 - n as u64, 32)?)?,
    )?;
    let rhs = Term::binary(Op::BvRotl, &x, &Term::bv(n as u64, 32)?)?;
    Ok(LemmaDef {
        name: format!("rotl{}", n),
        vars: BTreeMap::from([("x".to_string(), bv(32))]),
        lhs,
        rhs,
    })
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let prog = program(vec![sha1_ch()?, sha1_round_ch()?, sha1_rounds4()?]);
    let jobs = vec![
        VerificationJob::new("sha1_ch", "sha1_ch", "sha1_ch_spec"),
        VerificationJob::new("sha1_round_ch", "sha1_round_ch", "sha1_round_spec")
            .with_overrides(["sha1_ch"])
            .with_lemma("rotl5")
            .with_lemma("rotl30"),
        VerificationJob::new("sha1_rounds4", "sha1_rounds4", "sha1_rounds4_spec").with_overrides(["sha1_round_ch"]),
    ];
    Ok(Experiment {
        name: "sha1",
        workspace: Workspace::new(prog, module(spec())),
        lemmas: vec![rotate_lemma(5)?, rotate_lemma(30)?],
        jobs,
    })
}
