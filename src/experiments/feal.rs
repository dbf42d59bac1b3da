//! FEAL-8.
//!
//! The S-boxes read a rotate-by-two table; `f` and `FK` are proved against
//! byte-level specifications over the S-box overrides, and the round trip
//! `decrypt(encrypt(p)) = p` is then proved over the `f` and `FK` overrides
//! alone, so the solver never sees a table.
//!
//! `feal_make_h1` widens a 32-bit value through a union-like buffer; only
//! its low half is defined, which the job states as a narrowing.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment};
use crate::ir::{Function, FunctionBuilder, MemInit, Operand};
use crate::scheduler::{VerificationJob, Workspace};
use crate::semantics::executor::ExecConfig;
use crate::semantics::memory::AliasPolicy;
use crate::semantics::state::EquivalencePredicate;
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::{Op, Sort};

const ROUNDS: usize = 8;

/// `rot2[x] = x rotated left by two`
pub fn rot2_table() -> Vec<u8> {
    (0..=255u8).map(|x| x.rotate_left(2)).collect()
}

fn v(name: &str) -> Operand {
    Operand::var(name)
}

/// Byte `i` of a `width`-bit value, counting from the most significant.
fn byte_range(width: u32, i: u32) -> Op {
    let hi = width - 1 - 8 * i;
    Op::Extract { hi, lo: hi - 7 }
}

fn sbox(name: &str, carry: bool) -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new(name).param("a", bv(8)).param("b", bv(8)).result(bv(8));
    b.assign("t", Op::BvAdd, vec![v("a"), v("b")]);
    if carry {
        b.assign("t", Op::BvAdd, vec![v("t"), Operand::bv(1, 8)]);
    }
    b.load("r", "rot2", v("t"), 1);
    b.ret(vec![v("r")]);
    Ok(b.build()?)
}

fn split_bytes(b: &mut FunctionBuilder, src: &str, width: u32, prefix: &str) {
    for i in 0..width / 8 {
        b.assign(format!("{}{}", prefix, i), byte_range(width, i), vec![v(src)]);
    }
}

fn join_bytes(b: &mut FunctionBuilder, dst: &str, parts: [&str; 4]) {
    b.assign(dst, Op::Concat, vec![v(parts[0]), v(parts[1])]);
    b.assign(dst, Op::Concat, vec![v(dst), v(parts[2])]);
    b.assign(dst, Op::Concat, vec![v(dst), v(parts[3])]);
}

fn round_function() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("feal_f")
        .param("alpha", bv(32))
        .param("beta", bv(16))
        .result(bv(32));
    split_bytes(&mut b, "alpha", 32, "a");
    split_bytes(&mut b, "beta", 16, "b");
    b.assign("f1", Op::BvXor, vec![v("a1"), v("b0")]);
    b.assign("f2", Op::BvXor, vec![v("a2"), v("b1")]);
    b.assign("f1", Op::BvXor, vec![v("f1"), v("a0")]);
    b.assign("f2", Op::BvXor, vec![v("f2"), v("a3")]);
    b.call(&["f1"], "feal_s1", vec![v("f1"), v("f2")]);
    b.call(&["f2"], "feal_s0", vec![v("f2"), v("f1")]);
    b.call(&["f0"], "feal_s0", vec![v("a0"), v("f1")]);
    b.call(&["f3"], "feal_s1", vec![v("a3"), v("f2")]);
    join_bytes(&mut b, "r", ["f0", "f1", "f2", "f3"]);
    b.ret(vec![v("r")]);
    Ok(b.build()?)
}

fn key_function() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("feal_fk")
        .param("alpha", bv(32))
        .param("beta", bv(32))
        .result(bv(32));
    split_bytes(&mut b, "alpha", 32, "a");
    split_bytes(&mut b, "beta", 32, "b");
    b.assign("k1", Op::BvXor, vec![v("a1"), v("a0")]);
    b.assign("k2", Op::BvXor, vec![v("a2"), v("a3")]);
    b.assign("t", Op::BvXor, vec![v("k2"), v("b0")]);
    b.call(&["k1"], "feal_s1", vec![v("k1"), v("t")]);
    b.assign("t", Op::BvXor, vec![v("k1"), v("b1")]);
    b.call(&["k2"], "feal_s0", vec![v("k2"), v("t")]);
    b.assign("t", Op::BvXor, vec![v("k1"), v("b2")]);
    b.call(&["k0"], "feal_s0", vec![v("a0"), v("t")]);
    b.assign("t", Op::BvXor, vec![v("k2"), v("b3")]);
    b.call(&["k3"], "feal_s1", vec![v("a3"), v("t")]);
    join_bytes(&mut b, "r", ["k0", "k1", "k2", "k3"]);
    b.ret(vec![v("r")]);
    Ok(b.build()?)
}

fn subkey_names() -> Vec<String> {
    (1..=ROUNDS).map(|i| format!("b{}", i)).collect()
}

/// The eight 32-bit words `B1..B8`; each holds two 16-bit subkeys.
fn key_schedule() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("feal_key_schedule").param("ka", bv(32)).param("kb", bv(32));
    for _ in 0..ROUNDS {
        b = b.result(bv(32));
    }
    b.copy("a", v("ka"), 32);
    b.copy("b", v("kb"), 32);
    b.copy("d", Operand::bv(0, 32), 32);
    let names = subkey_names();
    for name in &names {
        b.assign("x", Op::BvXor, vec![v("b"), v("d")]);
        b.call(&["n"], "feal_fk", vec![v("a"), v("x")]);
        b.copy("d", v("a"), 32);
        b.copy("a", v("b"), 32);
        b.copy("b", v("n"), 32);
        b.copy(name.as_str(), v("n"), 32);
    }
    b.ret(names.iter().map(|n| v(n)).collect());
    Ok(b.build()?)
}

/// Subkey `K_round`, the high or low half of `B(round / 2 + 1)`.
fn round_key(b: &mut FunctionBuilder, round: usize) {
    let half = if round % 2 == 0 {
        Op::Extract { hi: 31, lo: 16 }
    } else {
        Op::Extract { hi: 15, lo: 0 }
    };
    b.assign("rk", half, vec![v(&format!("b{}", round / 2 + 1))]);
}

fn cipher_builder(name: &str) -> FunctionBuilder {
    let mut b = FunctionBuilder::new(name);
    for key in subkey_names() {
        b = b.param(key, bv(32));
    }
    b.param("l", bv(32)).param("r", bv(32)).result(bv(32)).result(bv(32))
}

fn encrypt() -> Result<Function, VerifyError> {
    let mut b = cipher_builder("feal_encrypt");
    b.assign("l", Op::BvXor, vec![v("l"), v("b5")]);
    b.assign("r", Op::BvXor, vec![v("r"), v("b6")]);
    b.assign("r", Op::BvXor, vec![v("r"), v("l")]);
    for round in 0..ROUNDS {
        round_key(&mut b, round);
        b.call(&["t"], "feal_f", vec![v("r"), v("rk")]);
        b.assign("n", Op::BvXor, vec![v("l"), v("t")]);
        b.copy("l", v("r"), 32);
        b.copy("r", v("n"), 32);
    }
    b.assign("l", Op::BvXor, vec![v("l"), v("r")]);
    b.assign("cl", Op::BvXor, vec![v("r"), v("b7")]);
    b.assign("cr", Op::BvXor, vec![v("l"), v("b8")]);
    b.ret(vec![v("cl"), v("cr")]);
    Ok(b.build()?)
}

fn decrypt() -> Result<Function, VerifyError> {
    let mut b = cipher_builder("feal_decrypt");
    b.assign("rr", Op::BvXor, vec![v("l"), v("b7")]);
    b.assign("l", Op::BvXor, vec![v("r"), v("b8")]);
    b.copy("r", v("rr"), 32);
    b.assign("l", Op::BvXor, vec![v("l"), v("r")]);
    for round in (0..ROUNDS).rev() {
        round_key(&mut b, round);
        b.call(&["t"], "feal_f", vec![v("l"), v("rk")]);
        b.assign("n", Op::BvXor, vec![v("r"), v("t")]);
        b.copy("r", v("l"), 32);
        b.copy("l", v("n"), 32);
    }
    b.assign("r", Op::BvXor, vec![v("r"), v("l")]);
    b.assign("l", Op::BvXor, vec![v("l"), v("b5")]);
    b.assign("r", Op::BvXor, vec![v("r"), v("b6")]);
    b.ret(vec![v("l"), v("r")]);
    Ok(b.build()?)
}

fn roundtrip() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("feal_roundtrip")
        .param("ka", bv(32))
        .param("kb", bv(32))
        .param("l", bv(32))
        .param("r", bv(32))
        .result(bv(32))
        .result(bv(32));
    let names = subkey_names();
    let keys: Vec<&str> = names.iter().map(String::as_str).collect();
    b.call(&keys, "feal_key_schedule", vec![v("ka"), v("kb")]);
    let cipher_args = |a: &str, c: &str| -> Vec<Operand> {
        keys.iter().map(|k| v(k)).chain([v(a), v(c)]).collect()
    };
    b.call(&["cl", "cr"], "feal_encrypt", cipher_args("l", "r"));
    b.call(&["pl", "pr"], "feal_decrypt", cipher_args("cl", "cr"));
    b.ret(vec![v("pl"), v("pr")]);
    Ok(b.build()?)
}

/// Store a word into the low half of an 8-byte don't-care buffer and read
/// the whole buffer back.
fn make_h1() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("feal_make_h1").param("x", bv(32)).result(bv(64));
    b.alloc("u", 8, MemInit::DontCare);
    b.store("u", Operand::bv(0, 64), v("x"), 4);
    b.load("h", "u", Operand::bv(0, 64), 8);
    b.ret(vec![v("h")]);
    Ok(b.build()?)
}

fn byte(e: Expr, width: u32, i: u32) -> Expr {
    prim(byte_range(width, i), vec![e])
}

fn xor(a: Expr, b: Expr) -> Expr {
    bin(Op::BvXor, a, b)
}

fn s(d: u32, a: Expr, b: Expr) -> Expr {
    call(if d == 0 { "feal_s0_spec" } else { "feal_s1_spec" }, vec![a, b])
}

fn concat4(parts: [Expr; 4]) -> Expr {
    let [p0, p1, p2, p3] = parts;
    bin(Op::Concat, bin(Op::Concat, bin(Op::Concat, p0, p1), p2), p3)
}

fn spec() -> Vec<SpecFn> {
    let sbox_spec = |name: &str, carry: u64| {
        let sum = bin(Op::BvAdd, bin(Op::BvAdd, var("a"), var("b")), lit(carry, 8));
        SpecFn::new(name, &[("a", bv(8)), ("b", bv(8))], &[bv(8)], bin(Op::BvRotl, sum, lit(2, 8)))
    };
    let a = |i| byte(var("alpha"), 32, i);

    let f_body = let_in(
        "f1",
        xor(xor(a(1), byte(var("beta"), 16, 0)), a(0)),
        let_in(
            "f2",
            xor(xor(a(2), byte(var("beta"), 16, 1)), a(3)),
            let_in(
                "g1",
                s(1, var("f1"), var("f2")),
                let_in(
                    "g2",
                    s(0, var("f2"), var("g1")),
                    concat4([s(0, a(0), var("g1")), var("g1"), var("g2"), s(1, a(3), var("g2"))]),
                ),
            ),
        ),
    );

    let kb = |i| byte(var("beta"), 32, i);
    let fk_body = let_in(
        "k1",
        s(1, xor(a(1), a(0)), xor(xor(a(2), a(3)), kb(0))),
        let_in(
            "k2",
            s(0, xor(a(2), a(3)), xor(var("k1"), kb(1))),
            concat4([
                s(0, a(0), xor(var("k1"), kb(2))),
                var("k1"),
                var("k2"),
                s(1, a(3), xor(var("k2"), kb(3))),
            ]),
        ),
    );

    vec![
        sbox_spec("feal_s0_spec", 0),
        sbox_spec("feal_s1_spec", 1),
        SpecFn::new("feal_f_spec", &[("alpha", bv(32)), ("beta", bv(16))], &[bv(32)], f_body),
        SpecFn::new("feal_fk_spec", &[("alpha", bv(32)), ("beta", bv(32))], &[bv(32)], fk_body),
        SpecFn::new(
            "feal_identity",
            &[("ka", bv(32)), ("kb", bv(32)), ("l", bv(32)), ("r", bv(32))],
            &[bv(32), bv(32)],
            tuple(vec![var("l"), var("r")]),
        ),
        SpecFn::new("feal_make_h1_spec", &[("x", bv(32))], &[Sort::BitVec(64)], prim(Op::ZeroExt(32), vec![var("x")])),
    ]
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let mut prog = program(vec![
        sbox("feal_s0", false)?,
        sbox("feal_s1", true)?,
        round_function()?,
        key_function()?,
        key_schedule()?,
        encrypt()?,
        decrypt()?,
        roundtrip()?,
        make_h1()?,
    ]);
    prog.add_global("rot2", rot2_table());

    let table = ExecConfig::default().with_alias_policy(AliasPolicy::Enumerate);
    let jobs = vec![
        VerificationJob::new("feal_s0", "feal_s0", "feal_s0_spec").with_exec_config(table.clone()),
        VerificationJob::new("feal_s1", "feal_s1", "feal_s1_spec").with_exec_config(table),
        VerificationJob::new("feal_f", "feal_f", "feal_f_spec").with_overrides(["feal_s0", "feal_s1"]),
        VerificationJob::new("feal_fk", "feal_fk", "feal_fk_spec").with_overrides(["feal_s0", "feal_s1"]),
        VerificationJob::new("feal_roundtrip", "feal_roundtrip", "feal_identity").with_overrides(["feal_f", "feal_fk"]),
        VerificationJob::new("feal_make_h1", "feal_make_h1", "feal_make_h1_spec")
            .with_predicate(EquivalencePredicate::full().with_narrowing(0, 31, 0, "u")),
    ];
    Ok(Experiment {
        name: "feal",
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

    #[test]
    fn test_rot2_table() {
        let t = rot2_table();
        assert_eq!(t.len(), 256);
        assert_eq!(t[0x01], 0x04);
        assert_eq!(t[0x80], 0x02);
        assert_eq!(t[0xff], 0xff);
    }

    #[test]
    fn test_round_functions_match_specs() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let spec = &exp.workspace.spec;
        for (x, y) in [(0u64, 0u64), (0x0123_4567, 0x89ab), (0xdead_beef, 0xffff), (0xffff_ffff, 0x0001)] {
            assert_eq!(
                machine.run("feal_f", &[x, y]).unwrap().outputs,
                eval_spec(spec, "feal_f_spec", &[x, y]).unwrap(),
            );
            let y32 = y << 16 | (x & 0xffff);
            assert_eq!(
                machine.run("feal_fk", &[x, y32]).unwrap().outputs,
                eval_spec(spec, "feal_fk_spec", &[x, y32]).unwrap(),
            );
        }
        for (a, b) in [(0u64, 0u64), (0x7f, 0x80), (0xff, 0xff), (0x12, 0x34)] {
            assert_eq!(machine.run("feal_s0", &[a, b]).unwrap().outputs, eval_spec(spec, "feal_s0_spec", &[a, b]).unwrap());
            assert_eq!(machine.run("feal_s1", &[a, b]).unwrap().outputs, eval_spec(spec, "feal_s1_spec", &[a, b]).unwrap());
        }
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        for (ka, kb, l, r) in [(0x0123_4567u64, 0x89ab_cdefu64, 0u64, 0u64), (1, 2, 0xcafe_babe, 0x1234_5678)] {
            let out = machine.run("feal_roundtrip", &[ka, kb, l, r]).unwrap();
            assert_eq!(out.outputs, vec![l, r]);
            let keys = machine.run("feal_key_schedule", &[ka, kb]).unwrap().outputs;
            let mut args = keys.clone();
            args.extend([l, r]);
            let cipher = machine.run("feal_encrypt", &args).unwrap().outputs;
            assert_ne!(cipher, vec![l, r]);
        }
    }
}
