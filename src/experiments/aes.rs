//! AES-128.
//!
//! The state is a 4x4 byte matrix packed into two 64-bit halves, row-major
//! and most significant byte first, the way the round helpers take it. Each
//! helper unpacks the halves into a 16-byte buffer, works on the buffer and
//! packs it back.
//!
//! The S-boxes are table lookups proved against the algebraic definition
//! (inverse in GF(2^8) followed by the affine map). The byte-level steps are
//! proved symbolically and then composed through overrides into a round. The
//! round trips of the full round and of the block cipher are only sampled.

use crate::error::VerifyError;
use crate::experiments::{bv, module, program, Experiment};
use crate::ir::{Function, FunctionBuilder, MemInit, Operand};
use crate::scheduler::{ProofMode, VerificationJob, Workspace};
use crate::semantics::executor::ExecConfig;
use crate::semantics::memory::AliasPolicy;
use crate::spec::expr::*;
use crate::spec::SpecFn;
use crate::term::Op;
use crate::validation::random::SamplingConfig;

const ROUNDS: usize = 10;

/// Round constants of the key schedule, already in the top byte.
const RCON: [u64; ROUNDS] = [
    0x0100_0000,
    0x0200_0000,
    0x0400_0000,
    0x0800_0000,
    0x1000_0000,
    0x2000_0000,
    0x4000_0000,
    0x8000_0000,
    0x1b00_0000,
    0x3600_0000,
];

/// MixColumns coefficients, by output row then input row.
const MIX: [[u32; 4]; 4] = [[2, 3, 1, 1], [1, 2, 3, 1], [1, 1, 2, 3], [3, 1, 1, 2]];
const INV_MIX: [[u32; 4]; 4] = [[14, 11, 13, 9], [9, 14, 11, 13], [13, 9, 14, 11], [11, 13, 9, 14]];

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    p
}

fn gf_inv(x: u8) -> u8 {
    (1..=255u8).find(|&y| gf_mul(x, y) == 1).unwrap_or(0)
}

pub fn sbox_table() -> Vec<u8> {
    (0..=255u8)
        .map(|x| {
            let b = gf_inv(x);
            b ^ b.rotate_left(1) ^ b.rotate_left(2) ^ b.rotate_left(3) ^ b.rotate_left(4) ^ 0x63
        })
        .collect()
}

pub fn inv_sbox_table() -> Vec<u8> {
    let mut inv = vec![0u8; 256];
    for (x, s) in sbox_table().into_iter().enumerate() {
        inv[s as usize] = x as u8;
    }
    inv
}

fn v(name: &str) -> Operand {
    Operand::var(name)
}

/// Byte `i` of a `width`-bit value, counting from the most significant.
fn byte_range(width: u32, i: u32) -> Op {
    let hi = width - 1 - 8 * i;
    Op::Extract { hi, lo: hi - 7 }
}

/// Word `i % 2` of a 64-bit half, most significant first.
fn word_range(i: usize) -> Op {
    let hi = if i % 2 == 0 { 63 } else { 31 };
    Op::Extract { hi, lo: hi - 31 }
}

/// Buffer offset of `state[row][col]`.
fn cell(row: usize, col: usize) -> Operand {
    Operand::bv((4 * row + col) as u64, 64)
}

/// Byte `k` of the block packs byte `transposed(k)` of the state: blocks are
/// column-major.
fn transposed(k: usize) -> usize {
    4 * (k % 4) + k / 4
}

fn state_builder(name: &str, keyed: bool) -> FunctionBuilder {
    let mut b = FunctionBuilder::new(name).param("lo", bv(64)).param("hi", bv(64));
    if keyed {
        b = b.param("klo", bv(64)).param("khi", bv(64));
    }
    b.result(bv(64)).result(bv(64))
}

fn unpack_state(b: &mut FunctionBuilder, region: &str) {
    b.alloc(region, 16, MemInit::Undefined);
    for k in 0..16u64 {
        let (src, i) = if k < 8 { ("lo", k) } else { ("hi", k - 8) };
        b.assign("byte", byte_range(64, i as u32), vec![v(src)]);
        b.store(region, Operand::bv(k, 64), v("byte"), 1);
    }
}

/// Read `order[k]` of the buffer into byte `k` of `out_lo`/`out_hi` and
/// return them.
fn pack_state(mut b: FunctionBuilder, region: &str, order: impl Fn(usize) -> usize) -> Result<Function, VerifyError> {
    for (dst, base) in [("out_lo", 0usize), ("out_hi", 8)] {
        b.load(dst, region, Operand::bv(order(base) as u64, 64), 1);
        for k in base + 1..base + 8 {
            b.load("byte", region, Operand::bv(order(k) as u64, 64), 1);
            b.assign(dst, Op::Concat, vec![v(dst), v("byte")]);
        }
    }
    b.ret(vec![v("out_lo"), v("out_hi")]);
    Ok(b.build()?)
}

fn sbox(name: &str, table: &str) -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new(name).param("x", bv(8)).result(bv(8));
    b.assign("row", Op::BvLshr, vec![v("x"), Operand::bv(4, 8)]);
    b.assign("col", Op::BvAnd, vec![v("x"), Operand::bv(0x0f, 8)]);
    b.assign("idx", Op::BvShl, vec![v("row"), Operand::bv(4, 8)]);
    b.assign("idx", Op::BvOr, vec![v("idx"), v("col")]);
    b.load("y", table, v("idx"), 1);
    b.ret(vec![v("y")]);
    Ok(b.build()?)
}

fn sbox_roundtrip() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("aes_sbox_roundtrip").param("x", bv(8)).result(bv(8));
    b.call(&["s"], "aes_sbox", vec![v("x")]);
    b.call(&["y"], "aes_inv_sbox", vec![v("s")]);
    b.ret(vec![v("y")]);
    Ok(b.build()?)
}

fn sub_word() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("aes_sub_word").param("w", bv(32)).result(bv(32));
    for i in 0..4 {
        let byte = format!("w{}", i);
        b.assign(byte.as_str(), byte_range(32, i), vec![v("w")]);
        b.call(&[byte.as_str()], "aes_sbox", vec![v(&byte)]);
    }
    b.assign("r", Op::Concat, vec![v("w0"), v("w1")]);
    b.assign("r", Op::Concat, vec![v("r"), v("w2")]);
    b.assign("r", Op::Concat, vec![v("r"), v("w3")]);
    b.ret(vec![v("r")]);
    Ok(b.build()?)
}

/// `w[i] = w[i - 4] ^ SubWord(RotWord(w[i - 1])) ^ rcon`
fn key_expansion_step() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("aes_key_expansion_step")
        .param("prev", bv(32))
        .param("old", bv(32))
        .param("rcon", bv(32))
        .result(bv(32));
    b.assign("t", Op::BvShl, vec![v("prev"), Operand::bv(8, 32)]);
    b.assign("u", Op::BvLshr, vec![v("prev"), Operand::bv(24, 32)]);
    b.assign("t", Op::BvOr, vec![v("t"), v("u")]);
    b.call(&["t"], "aes_sub_word", vec![v("t")]);
    b.assign("t", Op::BvXor, vec![v("t"), v("rcon")]);
    b.assign("n", Op::BvXor, vec![v("old"), v("t")]);
    b.ret(vec![v("n")]);
    Ok(b.build()?)
}

/// `k0_lo, k0_hi, ..., k10_lo, k10_hi`
fn round_key_names() -> Vec<String> {
    (0..=ROUNDS)
        .flat_map(|r| [format!("k{}_lo", r), format!("k{}_hi", r)])
        .collect()
}

/// The 44 schedule words live in a 176-byte buffer; round key `r` is words
/// `4r..4r+4` packed two per half.
fn key_schedule() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("aes_key_schedule").param("key_lo", bv(64)).param("key_hi", bv(64));
    for _ in 0..=ROUNDS {
        b = b.result(bv(64)).result(bv(64));
    }
    let word = |i: usize| Operand::bv(4 * i as u64, 64);
    b.alloc("w", 176, MemInit::Undefined);
    for i in 0..4 {
        let src = if i < 2 { "key_lo" } else { "key_hi" };
        b.assign("n", word_range(i), vec![v(src)]);
        b.store("w", word(i), v("n"), 4);
    }
    for i in 4..4 * (ROUNDS + 1) {
        b.load("prev", "w", word(i - 1), 4);
        b.load("old", "w", word(i - 4), 4);
        if i % 4 == 0 {
            let rcon = Operand::bv(RCON[i / 4 - 1], 32);
            b.call(&["n"], "aes_key_expansion_step", vec![v("prev"), v("old"), rcon]);
        } else {
            b.assign("n", Op::BvXor, vec![v("prev"), v("old")]);
        }
        b.store("w", word(i), v("n"), 4);
    }
    let names = round_key_names();
    for (j, name) in names.iter().enumerate() {
        b.load(name.as_str(), "w", word(2 * j), 4);
        b.load("low", "w", word(2 * j + 1), 4);
        b.assign(name.as_str(), Op::Concat, vec![v(name), v("low")]);
    }
    b.ret(names.iter().map(|n| v(n)).collect());
    Ok(b.build()?)
}

/// Row `r` rotates left by `r`, or right by `r` when `inverse`.
fn shift_rows(inverse: bool) -> Result<Function, VerifyError> {
    let name = if inverse { "aes_inv_shift_rows" } else { "aes_shift_rows" };
    let mut b = state_builder(name, false);
    unpack_state(&mut b, "state");
    for row in 1..4 {
        let shift = if inverse { 4 - row } else { row };
        for col in 0..4 {
            b.load(format!("r{}", col), "state", cell(row, col), 1);
        }
        for col in 0..4 {
            b.store("state", cell(row, col), v(&format!("r{}", (col + shift) % 4)), 1);
        }
    }
    pack_state(b, "state", |k| k)
}

/// Column `c` is xored with word `c` of the round key.
fn add_round_key() -> Result<Function, VerifyError> {
    let mut b = state_builder("aes_add_round_key", true);
    unpack_state(&mut b, "state");
    for col in 0..4 {
        let src = if col < 2 { "klo" } else { "khi" };
        for row in 0..4 {
            b.assign("kb", byte_range(64, (4 * (col % 2) + row) as u32), vec![v(src)]);
            b.load("sb", "state", cell(row, col), 1);
            b.assign("sb", Op::BvXor, vec![v("sb"), v("kb")]);
            b.store("state", cell(row, col), v("sb"), 1);
        }
    }
    pack_state(b, "state", |k| k)
}

fn sub_bytes(inverse: bool) -> Result<Function, VerifyError> {
    let (name, callee) = if inverse {
        ("aes_inv_sub_bytes", "aes_inv_sbox")
    } else {
        ("aes_sub_bytes", "aes_sbox")
    };
    let mut b = state_builder(name, false);
    unpack_state(&mut b, "state");
    for k in 0..16 {
        let at = Operand::bv(k, 64);
        b.load("sb", "state", at.clone(), 1);
        b.call(&["sb"], callee, vec![v("sb")]);
        b.store("state", at, v("sb"), 1);
    }
    pack_state(b, "state", |k| k)
}

fn xtime() -> Result<Function, VerifyError> {
    let mut b = FunctionBuilder::new("aes_xtime").param("x", bv(8)).result(bv(8));
    b.assign("t", Op::BvShl, vec![v("x"), Operand::bv(1, 8)]);
    b.assign("h", Op::BvLshr, vec![v("x"), Operand::bv(7, 8)]);
    b.assign("m", Op::BvMul, vec![v("h"), Operand::bv(0x1b, 8)]);
    b.assign("y", Op::BvXor, vec![v("t"), v("m")]);
    b.ret(vec![v("y")]);
    Ok(b.build()?)
}

/// Terms xored to multiply input byte `a` by `c`, from `a` and its doublings.
fn multiple_parts(c: u32) -> &'static [&'static str] {
    match c {
        1 => &["a"],
        2 => &["x2"],
        3 => &["x2", "a"],
        9 => &["x8", "a"],
        11 => &["x8", "x2", "a"],
        13 => &["x8", "x4", "a"],
        _ => &["x8", "x4", "x2"],
    }
}

fn part_name(part: &str, i: usize) -> String {
    if part == "a" {
        format!("a{}", i)
    } else {
        format!("{}_{}", part, i)
    }
}

/// Names xored into output byte `row` of a column.
fn column_terms(matrix: &[[u32; 4]; 4], row: usize) -> Vec<String> {
    (0..4)
        .flat_map(|i| multiple_parts(matrix[row][i]).iter().map(move |p| part_name(p, i)))
        .collect()
}

fn mix_column(inverse: bool) -> Result<Function, VerifyError> {
    let (name, matrix) = if inverse {
        ("aes_inv_mix_column", &INV_MIX)
    } else {
        ("aes_mix_column", &MIX)
    };
    let mut b = FunctionBuilder::new(name);
    for i in 0..4 {
        b = b.param(format!("a{}", i), bv(8));
    }
    for _ in 0..4 {
        b = b.result(bv(8));
    }
    for i in 0..4 {
        let (x2, x4, x8) = (part_name("x2", i), part_name("x4", i), part_name("x8", i));
        b.call(&[x2.as_str()], "aes_xtime", vec![v(&format!("a{}", i))]);
        if inverse {
            b.call(&[x4.as_str()], "aes_xtime", vec![v(&x2)]);
            b.call(&[x8.as_str()], "aes_xtime", vec![v(&x4)]);
        }
    }
    for row in 0..4 {
        let dst = format!("b{}", row);
        let terms = column_terms(matrix, row);
        b.copy(dst.as_str(), v(&terms[0]), 8);
        for t in &terms[1..] {
            b.assign(dst.as_str(), Op::BvXor, vec![v(&dst), v(t)]);
        }
    }
    b.ret((0..4).map(|r| v(&format!("b{}", r))).collect());
    Ok(b.build()?)
}

fn mix_columns(inverse: bool) -> Result<Function, VerifyError> {
    let (name, callee) = if inverse {
        ("aes_inv_mix_columns", "aes_inv_mix_column")
    } else {
        ("aes_mix_columns", "aes_mix_column")
    };
    let mut b = state_builder(name, false);
    unpack_state(&mut b, "state");
    for col in 0..4 {
        for row in 0..4 {
            b.load(format!("a{}", row), "state", cell(row, col), 1);
        }
        b.call(&["b0", "b1", "b2", "b3"], callee, vec![v("a0"), v("a1"), v("a2"), v("a3")]);
        for row in 0..4 {
            b.store("state", cell(row, col), v(&format!("b{}", row)), 1);
        }
    }
    pack_state(b, "state", |k| k)
}

/// Between the column-major block and the row-major state; an involution.
fn transpose() -> Result<Function, VerifyError> {
    let mut b = state_builder("aes_transpose", false);
    unpack_state(&mut b, "block");
    pack_state(b, "block", transposed)
}

/// Thread the state through `steps`; keyed steps also take the round key.
fn pipeline(name: &str, keyed: bool, steps: &[(&str, bool)]) -> Result<Function, VerifyError> {
    let mut b = state_builder(name, keyed);
    b.copy("s_lo", v("lo"), 64);
    b.copy("s_hi", v("hi"), 64);
    for (callee, with_key) in steps {
        let mut args = vec![v("s_lo"), v("s_hi")];
        if *with_key {
            args.extend([v("klo"), v("khi")]);
        }
        b.call(&["s_lo", "s_hi"], *callee, args);
    }
    b.ret(vec![v("s_lo"), v("s_hi")]);
    Ok(b.build()?)
}

const ROUND: &[(&str, bool)] = &[
    ("aes_sub_bytes", false),
    ("aes_shift_rows", false),
    ("aes_mix_columns", false),
    ("aes_add_round_key", true),
];
const FINAL_ROUND: &[(&str, bool)] = &[("aes_sub_bytes", false), ("aes_shift_rows", false), ("aes_add_round_key", true)];
const INV_ROUND: &[(&str, bool)] = &[
    ("aes_inv_shift_rows", false),
    ("aes_inv_sub_bytes", false),
    ("aes_add_round_key", true),
    ("aes_inv_mix_columns", false),
];

/// Expand the key, then run `body` with the round keys bound and the block
/// transposed into `s_lo`/`s_hi`.
fn cipher(name: &str, body: impl Fn(&mut FunctionBuilder, &dyn Fn(usize) -> [Operand; 2])) -> Result<Function, VerifyError> {
    let mut b = state_builder(name, true);
    let names = round_key_names();
    let keys: Vec<&str> = names.iter().map(String::as_str).collect();
    b.call(&keys, "aes_key_schedule", vec![v("klo"), v("khi")]);
    b.call(&["s_lo", "s_hi"], "aes_transpose", vec![v("lo"), v("hi")]);
    let round_key = |r: usize| [v(&format!("k{}_lo", r)), v(&format!("k{}_hi", r))];
    body(&mut b, &round_key);
    b.call(&["out_lo", "out_hi"], "aes_transpose", vec![v("s_lo"), v("s_hi")]);
    b.ret(vec![v("out_lo"), v("out_hi")]);
    Ok(b.build()?)
}

fn keyed_step(b: &mut FunctionBuilder, callee: &str, key: [Operand; 2]) {
    let [klo, khi] = key;
    b.call(&["s_lo", "s_hi"], callee, vec![v("s_lo"), v("s_hi"), klo, khi]);
}

fn encrypt() -> Result<Function, VerifyError> {
    cipher("aes_encrypt", |b, key| {
        keyed_step(b, "aes_add_round_key", key(0));
        for r in 1..ROUNDS {
            keyed_step(b, "aes_round", key(r));
        }
        keyed_step(b, "aes_final_round", key(ROUNDS));
    })
}

fn decrypt() -> Result<Function, VerifyError> {
    cipher("aes_decrypt", |b, key| {
        keyed_step(b, "aes_add_round_key", key(ROUNDS));
        for r in (1..ROUNDS).rev() {
            keyed_step(b, "aes_inv_round", key(r));
        }
        b.call(&["s_lo", "s_hi"], "aes_inv_shift_rows", vec![v("s_lo"), v("s_hi")]);
        b.call(&["s_lo", "s_hi"], "aes_inv_sub_bytes", vec![v("s_lo"), v("s_hi")]);
        keyed_step(b, "aes_add_round_key", key(0));
    })
}

fn implementation() -> Result<Vec<Function>, VerifyError> {
    Ok(vec![
        sbox("aes_sbox", "sbox")?,
        sbox("aes_inv_sbox", "inv_sbox")?,
        sbox_roundtrip()?,
        sub_word()?,
        key_expansion_step()?,
        key_schedule()?,
        shift_rows(false)?,
        shift_rows(true)?,
        add_round_key()?,
        sub_bytes(false)?,
        sub_bytes(true)?,
        xtime()?,
        mix_column(false)?,
        mix_column(true)?,
        mix_columns(false)?,
        mix_columns(true)?,
        transpose()?,
        pipeline("aes_round", true, ROUND)?,
        pipeline("aes_final_round", true, FINAL_ROUND)?,
        pipeline("aes_inv_round", true, INV_ROUND)?,
        encrypt()?,
        decrypt()?,
        pipeline("aes_shift_rows_roundtrip", false, &[("aes_shift_rows", false), ("aes_inv_shift_rows", false)])?,
        pipeline("aes_add_round_key_twice", true, &[("aes_add_round_key", true), ("aes_add_round_key", true)])?,
        pipeline(
            "aes_mix_columns_roundtrip",
            false,
            &[("aes_mix_columns", false), ("aes_inv_mix_columns", false)],
        )?,
        pipeline(
            "aes_round_roundtrip",
            true,
            &[
                ("aes_round", true),
                ("aes_add_round_key", true),
                ("aes_inv_mix_columns", false),
                ("aes_inv_shift_rows", false),
                ("aes_inv_sub_bytes", false),
            ],
        )?,
        pipeline("aes_encrypt_roundtrip", true, &[("aes_encrypt", true), ("aes_decrypt", true)])?,
    ])
}

fn xor(a: Expr, b: Expr) -> Expr {
    bin(Op::BvXor, a, b)
}

fn xt(e: Expr) -> Expr {
    call("aes_xtime_spec", vec![e])
}

fn gf(a: Expr, b: Expr) -> Expr {
    call("aes_gf_mul", vec![a, b])
}

fn rotl8(e: &Expr, n: u64) -> Expr {
    bin(Op::BvRotl, e.clone(), lit(n, 8))
}

fn state_byte(lo: &str, hi: &str, k: usize) -> Expr {
    let (src, i) = if k < 8 { (lo, k) } else { (hi, k - 8) };
    prim(byte_range(64, i as u32), vec![var(src)])
}

/// The packed state holding `bytes[k]` at byte `k`.
fn pack(bytes: &[Expr]) -> Expr {
    let half = |part: &[Expr]| {
        part[1..]
            .iter()
            .fold(part[0].clone(), |acc, e| bin(Op::Concat, acc, e.clone()))
    };
    tuple(vec![half(&bytes[..8]), half(&bytes[8..])])
}

fn pack_with(byte: impl Fn(usize) -> Expr) -> Expr {
    pack(&(0..16).map(byte).collect::<Vec<_>>())
}

/// Bind `p1 = a`, `p(i+1) = xtime(p(i))` and xor the `p(i)` selected by the
/// bits of `b`.
fn gf_mul_body() -> Expr {
    let mut body = lit(0, 8);
    for i in 0..8 {
        let bit = bin(Op::Eq, prim(Op::Extract { hi: i, lo: i }, vec![var("b")]), lit(1, 1));
        body = xor(body, ite(bit, var(&format!("p{}", i)), lit(0, 8)));
    }
    for i in (1..8).rev() {
        body = let_in(&format!("p{}", i), xt(var(&format!("p{}", i - 1))), body);
    }
    let_in("p0", var("a"), body)
}

/// `x^254`, from the squares `x^2 .. x^128`.
fn gf_inv_body() -> Expr {
    let mut body = var("r7");
    for i in (2..8).rev() {
        let prev = if i == 2 { var("q1") } else { var(&format!("r{}", i - 1)) };
        body = let_in(&format!("r{}", i), gf(prev, var(&format!("q{}", i))), body);
    }
    for i in (1..8).rev() {
        let prev = if i == 1 { var("x") } else { var(&format!("q{}", i - 1)) };
        body = let_in(&format!("q{}", i), gf(prev.clone(), prev), body);
    }
    body
}

fn sbox_spec_body() -> Expr {
    let b = var("b");
    let affine = (1..=4).fold(b.clone(), |acc, n| xor(acc, rotl8(&b, n)));
    let_in("b", call("aes_gf_inv", vec![var("x")]), xor(affine, lit(0x63, 8)))
}

fn inv_sbox_spec_body() -> Expr {
    let s = var("x");
    let unmixed = xor(xor(xor(rotl8(&s, 1), rotl8(&s, 3)), rotl8(&s, 6)), lit(0x05, 8));
    call("aes_gf_inv", vec![unmixed])
}

fn mix_column_spec_body(matrix: &[[u32; 4]; 4], inverse: bool) -> Expr {
    let mut body = tuple(
        (0..4)
            .map(|row| {
                let terms = column_terms(matrix, row);
                terms[1..].iter().fold(var(&terms[0]), |acc, t| xor(acc, var(t)))
            })
            .collect(),
    );
    for i in (0..4).rev() {
        let (x2, x4, x8) = (part_name("x2", i), part_name("x4", i), part_name("x8", i));
        if inverse {
            body = let_in(&x8, xt(var(&x4)), body);
            body = let_in(&x4, xt(var(&x2)), body);
        }
        body = let_in(&x2, xt(var(&format!("a{}", i))), body);
    }
    body
}

fn mix_columns_spec_body(callee: &str) -> Expr {
    let names = |col: usize| -> Vec<String> { (0..4).map(|row| format!("c{}_{}", col, row)).collect() };
    let mut body = pack_with(|k| var(&format!("c{}_{}", k % 4, k / 4)));
    for col in (0..4).rev() {
        let bound = names(col);
        let refs: Vec<&str> = bound.iter().map(String::as_str).collect();
        let column = (0..4).map(|row| state_byte("lo", "hi", 4 * row + col)).collect();
        body = let_tuple(&refs, call(callee, column), body);
    }
    body
}

/// Nested calls of `steps` on the state, the keyed ones with `klo`/`khi`.
fn spec_pipeline(steps: &[(&str, bool)]) -> Expr {
    let state = |i: usize| {
        if i == 0 {
            ("lo".to_string(), "hi".to_string())
        } else {
            (format!("s{}_lo", i), format!("s{}_hi", i))
        }
    };
    let args = |i: usize, keyed: bool| {
        let (lo, hi) = state(i);
        let mut a = vec![var(&lo), var(&hi)];
        if keyed {
            a.extend([var("klo"), var("khi")]);
        }
        a
    };
    let last = steps.len() - 1;
    let mut body = call(steps[last].0, args(last, steps[last].1));
    for i in (0..last).rev() {
        let (lo, hi) = state(i + 1);
        body = let_tuple(&[lo.as_str(), hi.as_str()], call(steps[i].0, args(i, steps[i].1)), body);
    }
    body
}

fn spec_steps(steps: &[(&str, bool)]) -> Vec<(String, bool)> {
    steps.iter().map(|(name, keyed)| (format!("{}_spec", name), *keyed)).collect()
}

fn spec_pipeline_of(steps: &[(&str, bool)]) -> Expr {
    let owned = spec_steps(steps);
    let named: Vec<(&str, bool)> = owned.iter().map(|(n, k)| (n.as_str(), *k)).collect();
    spec_pipeline(&named)
}

fn key_schedule_spec_body() -> Expr {
    let w = |i: usize| var(&format!("w{}", i));
    let words = 4 * (ROUNDS + 1);
    let mut body = tuple(
        (0..words / 2)
            .map(|j| bin(Op::Concat, w(2 * j), w(2 * j + 1)))
            .collect(),
    );
    for i in (4..words).rev() {
        let value = if i % 4 == 0 {
            call(
                "aes_key_expansion_step_spec",
                vec![w(i - 1), w(i - 4), lit(RCON[i / 4 - 1], 32)],
            )
        } else {
            xor(w(i - 1), w(i - 4))
        };
        body = let_in(&format!("w{}", i), value, body);
    }
    for i in (0..4).rev() {
        let src = if i < 2 { "key_lo" } else { "key_hi" };
        body = let_in(&format!("w{}", i), prim(word_range(i), vec![var(src)]), body);
    }
    body
}

fn encrypt_spec_body() -> Expr {
    let state = |r: usize| (format!("s{}_lo", r), format!("s{}_hi", r));
    let step = |callee: &str, r: usize, key: usize| {
        let (lo, hi) = state(r);
        call(
            callee,
            vec![var(&lo), var(&hi), var(&format!("k{}_lo", key)), var(&format!("k{}_hi", key))],
        )
    };
    let (lo, hi) = state(ROUNDS + 1);
    let mut body = call("aes_transpose_spec", vec![var(&lo), var(&hi)]);
    for r in (0..=ROUNDS).rev() {
        let callee = match r {
            0 => "aes_add_round_key_spec",
            ROUNDS => "aes_final_round_spec",
            _ => "aes_round_spec",
        };
        let (lo, hi) = state(r + 1);
        body = let_tuple(&[lo.as_str(), hi.as_str()], step(callee, r, r), body);
    }
    body = let_tuple(&["s0_lo", "s0_hi"], call("aes_transpose_spec", vec![var("lo"), var("hi")]), body);
    let names = round_key_names();
    let keys: Vec<&str> = names.iter().map(String::as_str).collect();
    let_tuple(&keys, call("aes_key_schedule_spec", vec![var("klo"), var("khi")]), body)
}

fn spec() -> Vec<SpecFn> {
    let state = [("lo", bv(64)), ("hi", bv(64))];
    let keyed = [("lo", bv(64)), ("hi", bv(64)), ("klo", bv(64)), ("khi", bv(64))];
    let halves = [bv(64), bv(64)];
    let column: Vec<(String, _)> = (0..4).map(|i| (format!("a{}", i), bv(8))).collect();
    let column: Vec<(&str, _)> = column.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    let shifted = |inverse: bool| {
        pack_with(move |k| {
            let (row, col) = (k / 4, k % 4);
            let shift = if inverse { 4 - row } else { row };
            state_byte("lo", "hi", 4 * row + (col + shift) % 4)
        })
    };
    let substituted = |callee: &'static str| pack_with(move |k| call(callee, vec![state_byte("lo", "hi", k)]));

    let xtime_body = xor(
        bin(Op::BvShl, var("x"), lit(1, 8)),
        ite(
            bin(Op::Eq, bin(Op::BvAnd, var("x"), lit(0x80, 8)), lit(0x80, 8)),
            lit(0x1b, 8),
            lit(0, 8),
        ),
    );
    let sub_word_body = (1..4).fold(call("aes_sbox_spec", vec![prim(byte_range(32, 0), vec![var("w")])]), |acc, i| {
        bin(Op::Concat, acc, call("aes_sbox_spec", vec![prim(byte_range(32, i), vec![var("w")])]))
    });
    let step_body = xor(
        var("old"),
        xor(
            call("aes_sub_word_spec", vec![bin(Op::BvRotl, var("prev"), lit(8, 32))]),
            var("rcon"),
        ),
    );
    let add_round_key_body = pack_with(|k| {
        let (row, col) = (k / 4, k % 4);
        xor(state_byte("lo", "hi", k), state_byte("klo", "khi", 4 * col + row))
    });
    let schedule_results = vec![bv(64); 2 * (ROUNDS + 1)];

    vec![
        SpecFn::new("aes_identity8", &[("x", bv(8))], &[bv(8)], var("x")),
        SpecFn::new("aes_xtime_spec", &[("x", bv(8))], &[bv(8)], xtime_body),
        SpecFn::new("aes_gf_mul", &[("a", bv(8)), ("b", bv(8))], &[bv(8)], gf_mul_body()),
        SpecFn::new("aes_gf_inv", &[("x", bv(8))], &[bv(8)], gf_inv_body()),
        SpecFn::new("aes_sbox_spec", &[("x", bv(8))], &[bv(8)], sbox_spec_body()),
        SpecFn::new("aes_inv_sbox_spec", &[("x", bv(8))], &[bv(8)], inv_sbox_spec_body()),
        SpecFn::new("aes_sub_word_spec", &[("w", bv(32))], &[bv(32)], sub_word_body),
        SpecFn::new(
            "aes_key_expansion_step_spec",
            &[("prev", bv(32)), ("old", bv(32)), ("rcon", bv(32))],
            &[bv(32)],
            step_body,
        ),
        SpecFn::new(
            "aes_key_schedule_spec",
            &[("key_lo", bv(64)), ("key_hi", bv(64))],
            &schedule_results,
            key_schedule_spec_body(),
        ),
        SpecFn::new("aes_shift_rows_spec", &state, &halves, shifted(false)),
        SpecFn::new("aes_inv_shift_rows_spec", &state, &halves, shifted(true)),
        SpecFn::new("aes_add_round_key_spec", &keyed, &halves, add_round_key_body),
        SpecFn::new("aes_sub_bytes_spec", &state, &halves, substituted("aes_sbox_spec")),
        SpecFn::new("aes_inv_sub_bytes_spec", &state, &halves, substituted("aes_inv_sbox_spec")),
        SpecFn::new("aes_mix_column_spec", &column, &[bv(8); 4], mix_column_spec_body(&MIX, false)),
        SpecFn::new("aes_inv_mix_column_spec", &column, &[bv(8); 4], mix_column_spec_body(&INV_MIX, true)),
        SpecFn::new("aes_mix_columns_spec", &state, &halves, mix_columns_spec_body("aes_mix_column_spec")),
        SpecFn::new(
            "aes_inv_mix_columns_spec",
            &state,
            &halves,
            mix_columns_spec_body("aes_inv_mix_column_spec"),
        ),
        SpecFn::new("aes_transpose_spec", &state, &halves, pack_with(|k| state_byte("lo", "hi", transposed(k)))),
        SpecFn::new("aes_round_spec", &keyed, &halves, spec_pipeline_of(ROUND)),
        SpecFn::new("aes_final_round_spec", &keyed, &halves, spec_pipeline_of(FINAL_ROUND)),
        SpecFn::new("aes_encrypt_spec", &keyed, &halves, encrypt_spec_body()),
        SpecFn::new("aes_state_identity", &state, &halves, tuple(vec![var("lo"), var("hi")])),
        SpecFn::new("aes_keyed_identity", &keyed, &halves, tuple(vec![var("lo"), var("hi")])),
    ]
}

pub fn experiment() -> Result<Experiment, VerifyError> {
    let mut prog = program(implementation()?);
    prog.add_global("sbox", sbox_table());
    prog.add_global("inv_sbox", inv_sbox_table());

    let table = ExecConfig::default().with_alias_policy(AliasPolicy::Enumerate);
    let sampled = |name: &str, spec: &str, samples: usize| {
        VerificationJob::new(name, name, spec)
            .with_mode(ProofMode::Sampling)
            .with_sampling(SamplingConfig::default().with_samples(samples))
    };
    let jobs = vec![
        VerificationJob::new("aes_sbox", "aes_sbox", "aes_sbox_spec").with_exec_config(table.clone()),
        VerificationJob::new("aes_inv_sbox", "aes_inv_sbox", "aes_inv_sbox_spec").with_exec_config(table.clone()),
        VerificationJob::new("aes_sbox_roundtrip", "aes_sbox_roundtrip", "aes_identity8").with_exec_config(table),
        VerificationJob::new("aes_sub_word", "aes_sub_word", "aes_sub_word_spec").with_overrides(["aes_sbox"]),
        VerificationJob::new("aes_key_expansion_step", "aes_key_expansion_step", "aes_key_expansion_step_spec")
            .with_overrides(["aes_sub_word"]),
        VerificationJob::new("aes_key_schedule", "aes_key_schedule", "aes_key_schedule_spec")
            .with_overrides(["aes_key_expansion_step"]),
        VerificationJob::new("aes_shift_rows", "aes_shift_rows", "aes_shift_rows_spec"),
        VerificationJob::new("aes_inv_shift_rows", "aes_inv_shift_rows", "aes_inv_shift_rows_spec"),
        VerificationJob::new("aes_shift_rows_roundtrip", "aes_shift_rows_roundtrip", "aes_state_identity"),
        VerificationJob::new("aes_add_round_key", "aes_add_round_key", "aes_add_round_key_spec"),
        VerificationJob::new("aes_add_round_key_twice", "aes_add_round_key_twice", "aes_keyed_identity"),
        VerificationJob::new("aes_sub_bytes", "aes_sub_bytes", "aes_sub_bytes_spec").with_overrides(["aes_sbox"]),
        VerificationJob::new("aes_inv_sub_bytes", "aes_inv_sub_bytes", "aes_inv_sub_bytes_spec")
            .with_overrides(["aes_inv_sbox"]),
        VerificationJob::new("aes_xtime", "aes_xtime", "aes_xtime_spec"),
        VerificationJob::new("aes_mix_column", "aes_mix_column", "aes_mix_column_spec").with_overrides(["aes_xtime"]),
        VerificationJob::new("aes_inv_mix_column", "aes_inv_mix_column", "aes_inv_mix_column_spec")
            .with_overrides(["aes_xtime"]),
        VerificationJob::new("aes_mix_columns", "aes_mix_columns", "aes_mix_columns_spec")
            .with_overrides(["aes_mix_column"]),
        VerificationJob::new("aes_inv_mix_columns", "aes_inv_mix_columns", "aes_inv_mix_columns_spec")
            .with_overrides(["aes_inv_mix_column"]),
        VerificationJob::new("aes_round", "aes_round", "aes_round_spec").with_overrides([
            "aes_sub_bytes",
            "aes_shift_rows",
            "aes_mix_columns",
            "aes_add_round_key",
        ]),
        sampled("aes_mix_columns_roundtrip", "aes_state_identity", 64),
        sampled("aes_round_roundtrip", "aes_keyed_identity", 64),
        sampled("aes_encrypt", "aes_encrypt_spec", 16),
        sampled("aes_encrypt_roundtrip", "aes_keyed_identity", 16),
    ];
    Ok(Experiment {
        name: "aes",
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

    const KEY: [u64; 2] = [0x0001_0203_0405_0607, 0x0809_0a0b_0c0d_0e0f];
    const PLAIN: [u64; 2] = [0x0011_2233_4455_6677, 0x8899_aabb_ccdd_eeff];
    const CIPHER: [u64; 2] = [0x69c4_e0d8_6a7b_0430, 0xd8cd_b780_70b4_c55a];

    #[test]
    fn test_sbox_tables() {
        let s = sbox_table();
        let inv = inv_sbox_table();
        assert_eq!(s[0x00], 0x63);
        assert_eq!(s[0x01], 0x7c);
        assert_eq!(s[0x53], 0xed);
        assert_eq!(inv[0x63], 0x00);
        for x in 0..256 {
            assert_eq!(inv[s[x] as usize] as usize, x);
        }
    }

    #[test]
    fn test_algebraic_sbox_matches_table() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let spec = &exp.workspace.spec;
        let (s, inv) = (sbox_table(), inv_sbox_table());
        for x in 0..256u64 {
            assert_eq!(eval_spec(spec, "aes_sbox_spec", &[x]).unwrap(), vec![s[x as usize] as u64]);
            assert_eq!(eval_spec(spec, "aes_inv_sbox_spec", &[x]).unwrap(), vec![inv[x as usize] as u64]);
            assert_eq!(machine.run("aes_sbox", &[x]).unwrap().outputs, vec![s[x as usize] as u64]);
        }
    }

    #[test]
    fn test_mix_column_known_answer() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let mixed = machine.run("aes_mix_column", &[0xdb, 0x13, 0x53, 0x45]).unwrap().outputs;
        assert_eq!(mixed, vec![0x8e, 0x4d, 0xa1, 0xbc]);
        assert_eq!(machine.run("aes_inv_mix_column", &mixed).unwrap().outputs, vec![0xdb, 0x13, 0x53, 0x45]);
        assert_eq!(eval_spec(&exp.workspace.spec, "aes_mix_column_spec", &[0xdb, 0x13, 0x53, 0x45]).unwrap(), mixed);
    }

    #[test]
    fn test_key_schedule_known_answer() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let key = [0x2b7e_1516_28ae_d2a6, 0xabf7_1588_09cf_4f3c];
        let keys = machine.run("aes_key_schedule", &key).unwrap().outputs;
        assert_eq!(keys.len(), 22);
        assert_eq!(&keys[..2], &key);
        assert_eq!(keys[2], 0xa0fa_fe17_8854_2cb1);
        assert_eq!(keys[21], 0xe13f_0cc8_b663_0ca6);
        assert_eq!(eval_spec(&exp.workspace.spec, "aes_key_schedule_spec", &key).unwrap(), keys);
    }

    #[test]
    fn test_round_helpers_match_specs() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let spec = &exp.workspace.spec;
        let states = [[0u64, 0u64], [0x0011_2233_4455_6677, 0x8899_aabb_ccdd_eeff], [u64::MAX, 0x0123_4567_89ab_cdef]];
        for st in states {
            for (imp, sp) in [
                ("aes_shift_rows", "aes_shift_rows_spec"),
                ("aes_inv_shift_rows", "aes_inv_shift_rows_spec"),
                ("aes_sub_bytes", "aes_sub_bytes_spec"),
                ("aes_mix_columns", "aes_mix_columns_spec"),
                ("aes_inv_mix_columns", "aes_inv_mix_columns_spec"),
                ("aes_transpose", "aes_transpose_spec"),
            ] {
                assert_eq!(machine.run(imp, &st).unwrap().outputs, eval_spec(spec, sp, &st).unwrap(), "{}", imp);
            }
            let keyed = [st[0], st[1], KEY[0], KEY[1]];
            assert_eq!(
                machine.run("aes_add_round_key", &keyed).unwrap().outputs,
                eval_spec(spec, "aes_add_round_key_spec", &keyed).unwrap(),
            );
            assert_eq!(
                machine.run("aes_round", &keyed).unwrap().outputs,
                eval_spec(spec, "aes_round_spec", &keyed).unwrap(),
            );
            assert_eq!(machine.run("aes_round_roundtrip", &keyed).unwrap().outputs, st.to_vec());
            assert_eq!(machine.run("aes_transpose", &machine.run("aes_transpose", &st).unwrap().outputs).unwrap().outputs, st.to_vec());
        }
    }

    #[test]
    fn test_block_cipher_known_answer() {
        let exp = experiment().unwrap();
        let undef = Assignment::new();
        let machine = ConcreteMachine::new(&exp.workspace.program, &undef);
        let args = [PLAIN[0], PLAIN[1], KEY[0], KEY[1]];
        assert_eq!(machine.run("aes_encrypt", &args).unwrap().outputs, CIPHER.to_vec());
        assert_eq!(eval_spec(&exp.workspace.spec, "aes_encrypt_spec", &args).unwrap(), CIPHER.to_vec());
        let back = machine.run("aes_decrypt", &[CIPHER[0], CIPHER[1], KEY[0], KEY[1]]).unwrap();
        assert_eq!(back.outputs, PLAIN.to_vec());
        assert_eq!(machine.run("aes_encrypt_roundtrip", &args).unwrap().outputs, PLAIN.to_vec());
    }
}
