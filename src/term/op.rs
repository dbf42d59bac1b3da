//! Sorts and primitive operators with fixed-width bit-vector semantics.

use crate::error::TermError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sort {
    Bool,
    BitVec(u32),
}

impl Sort {
    /// Checked bit-vector sort.
    pub fn bv(width: u32) -> Result<Sort, TermError> {
        if (1..=64).contains(&width) {
            Ok(Sort::BitVec(width))
        } else {
            Err(TermError::WidthOutOfRange(width))
        }
    }

    /// Width in bits; booleans count as one bit.
    pub fn width(&self) -> u32 {
        match self {
            Sort::Bool => 1,
            Sort::BitVec(w) => *w,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Sort::Bool)
    }

    /// All-ones mask for this sort.
    pub fn mask(&self) -> u64 {
        mask(self.width())
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "bool"),
            Sort::BitVec(w) => write!(f, "bv{}", w),
        }
    }
}

/// Low `width` bits set.
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interpret the low `width` bits of `value` as two's complement.
pub fn sign_extend(value: u64, width: u32) -> i64 {
    if width >= 64 {
        value as i64
    } else {
        let shift = 64 - width;
        ((value << shift) as i64) >> shift
    }
}

/// Primitive operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    Not,
    And,
    Or,
    Implies,
    Eq,
    Ult,
    Ule,
    Slt,
    Sle,
    BvNot,
    BvNeg,
    BvAdd,
    BvSub,
    BvMul,
    BvUdiv,
    BvUrem,
    BvAnd,
    BvOr,
    BvXor,
    BvShl,
    BvLshr,
    BvAshr,
    BvRotl,
    BvRotr,
    Extract { hi: u32, lo: u32 },
    Concat,
    ZeroExt(u32),
    SignExt(u32),
}

impl Op {
    /// Mnemonic used in printing and diagnostics.
    pub fn name(&self) -> String {
        match self {
            Op::Not => "not".into(),
            Op::And => "and".into(),
            Op::Or => "or".into(),
            Op::Implies => "=>".into(),
            Op::Eq => "=".into(),
            Op::Ult => "bvult".into(),
            Op::Ule => "bvule".into(),
            Op::Slt => "bvslt".into(),
            Op::Sle => "bvsle".into(),
            Op::BvNot => "bvnot".into(),
            Op::BvNeg => "bvneg".into(),
            Op::BvAdd => "bvadd".into(),
            Op::BvSub => "bvsub".into(),
            Op::BvMul => "bvmul".into(),
            Op::BvUdiv => "bvudiv".into(),
            Op::BvUrem => "bvurem".into(),
            Op::BvAnd => "bvand".into(),
            Op::BvOr => "bvor".into(),
            Op::BvXor => "bvxor".into(),
            Op::BvShl => "bvshl".into(),
            Op::BvLshr => "bvlshr".into(),
            Op::BvAshr => "bvashr".into(),
            Op::BvRotl => "rotl".into(),
            Op::BvRotr => "rotr".into(),
            Op::Extract { hi, lo } => format!("extract[{}:{}]", hi, lo),
            Op::Concat => "concat".into(),
            Op::ZeroExt(n) => format!("zext{}", n),
            Op::SignExt(n) => format!("sext{}", n),
        }
    }

    /// Number of operands.
    pub fn arity(&self) -> usize {
        match self {
            Op::Not | Op::BvNot | Op::BvNeg => 1,
            Op::Extract { .. } | Op::ZeroExt(_) | Op::SignExt(_) => 1,
            _ => 2,
        }
    }

    /// Operators whose operands may be swapped.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Op::And | Op::Or | Op::Eq | Op::BvAdd | Op::BvMul | Op::BvAnd | Op::BvOr | Op::BvXor
        )
    }

    /// Sort-check operands and compute the result sort.
    pub fn result_sort(&self, args: &[Sort]) -> Result<Sort, TermError> {
        if args.len() != self.arity() {
            return Err(TermError::Arity {
                op: self.name(),
                expected: self.arity(),
                actual: args.len(),
            });
        }
        let mismatch = |expected: String, actual: Sort| TermError::SortMismatch {
            op: self.name(),
            expected,
            actual: actual.to_string(),
        };
        match self {
            Op::Not | Op::And | Op::Or | Op::Implies => {
                for s in args {
                    if !s.is_bool() {
                        return Err(mismatch("bool".into(), *s));
                    }
                }
                Ok(Sort::Bool)
            }
            Op::Eq => {
                if args[0] != args[1] {
                    return Err(mismatch(args[0].to_string(), args[1]));
                }
                Ok(Sort::Bool)
            }
            Op::Ult | Op::Ule | Op::Slt | Op::Sle => {
                same_bitvec(self, args)?;
                Ok(Sort::Bool)
            }
            Op::BvNot | Op::BvNeg => match args[0] {
                Sort::BitVec(_) => Ok(args[0]),
                other => Err(mismatch("bit-vector".into(), other)),
            },
            Op::BvAdd
            | Op::BvSub
            | Op::BvMul
            | Op::BvUdiv
            | Op::BvUrem
            | Op::BvAnd
            | Op::BvOr
            | Op::BvXor
            | Op::BvShl
            | Op::BvLshr
            | Op::BvAshr
            | Op::BvRotl
            | Op::BvRotr => same_bitvec(self, args),
            Op::Extract { hi, lo } => {
                let w = bitvec_width(self, args[0])?;
                if lo > hi || *hi >= w {
                    return Err(TermError::BadParameter {
                        op: self.name(),
                        detail: format!("range [{}:{}] outside bv{}", hi, lo, w),
                    });
                }
                Sort::bv(hi - lo + 1)
            }
            Op::Concat => {
                let a = bitvec_width(self, args[0])?;
                let b = bitvec_width(self, args[1])?;
                Sort::bv(a + b)
            }
            Op::ZeroExt(n) | Op::SignExt(n) => {
                let w = bitvec_width(self, args[0])?;
                let total = w.checked_add(*n).ok_or(TermError::WidthOutOfRange(u32::MAX))?;
                Sort::bv(total)
            }
        }
    }

    /// Evaluate on concrete operands. Booleans are 0/1; results are masked to
    /// the result width. Operands must already be sort-checked.
    pub fn eval(&self, args: &[u64], sorts: &[Sort]) -> u64 {
        let w = sorts.first().map(|s| s.width()).unwrap_or(1);
        let m = mask(w);
        let a = args.first().copied().unwrap_or(0) & m;
        let b = args.get(1).copied().unwrap_or(0) & m;
        let bit = |v: bool| v as u64;
        match self {
            Op::Not => bit(a == 0),
            Op::And => bit(a != 0 && b != 0),
            Op::Or => bit(a != 0 || b != 0),
            Op::Implies => bit(a == 0 || b != 0),
            Op::Eq => bit(a == b),
            Op::Ult => bit(a < b),
            Op::Ule => bit(a <= b),
            Op::Slt => bit(sign_extend(a, w) < sign_extend(b, w)),
            Op::Sle => bit(sign_extend(a, w) <= sign_extend(b, w)),
            Op::BvNot => !a & m,
            Op::BvNeg => a.wrapping_neg() & m,
            Op::BvAdd => a.wrapping_add(b) & m,
            Op::BvSub => a.wrapping_sub(b) & m,
            Op::BvMul => a.wrapping_mul(b) & m,
            Op::BvUdiv => {
                if b == 0 {
                    m
                } else {
                    a / b
                }
            }
            Op::BvUrem => {
                if b == 0 {
                    a
                } else {
                    a % b
                }
            }
            Op::BvAnd => a & b,
            Op::BvOr => a | b,
            Op::BvXor => a ^ b,
            Op::BvShl => {
                if b >= w as u64 {
                    0
                } else {
                    (a << b) & m
                }
            }
            Op::BvLshr => {
                if b >= w as u64 {
                    0
                } else {
                    a >> b
                }
            }
            Op::BvAshr => {
                let shift = b.min(w as u64 - 1) as u32;
                (sign_extend(a, w) >> shift) as u64 & m
            }
            Op::BvRotl => rotate_left(a, (b % w as u64) as u32, w),
            Op::BvRotr => rotate_left(a, (w - (b % w as u64) as u32) % w, w),
            Op::Extract { hi, lo } => (a >> lo) & mask(hi - lo + 1),
            Op::Concat => {
                let wb = sorts.get(1).map(|s| s.width()).unwrap_or(0);
                let b = args.get(1).copied().unwrap_or(0) & mask(wb);
                (a << wb) | b
            }
            Op::ZeroExt(_) => a,
            Op::SignExt(n) => sign_extend(a, w) as u64 & mask(w + n),
        }
    }
}

fn rotate_left(value: u64, amount: u32, width: u32) -> u64 {
    if amount == 0 {
        return value;
    }
    ((value << amount) | (value >> (width - amount))) & mask(width)
}

fn bitvec_width(op: &Op, sort: Sort) -> Result<u32, TermError> {
    match sort {
        Sort::BitVec(w) => Ok(w),
        Sort::Bool => Err(TermError::SortMismatch {
            op: op.name(),
            expected: "bit-vector".into(),
            actual: sort.to_string(),
        }),
    }
}

fn same_bitvec(op: &Op, args: &[Sort]) -> Result<Sort, TermError> {
    let w = bitvec_width(op, args[0])?;
    if args[1] != Sort::BitVec(w) {
        return Err(TermError::SortMismatch {
            op: op.name(),
            expected: args[0].to_string(),
            actual: args[1].to_string(),
        });
    }
    Ok(args[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    const BV32: Sort = Sort::BitVec(32);
    const BV8: Sort = Sort::BitVec(8);

    #[test]
    fn test_division_by_zero_conventions() {
        assert_eq!(Op::BvUdiv.eval(&[7, 0], &[BV8, BV8]), 0xff);
        assert_eq!(Op::BvUrem.eval(&[7, 0], &[BV8, BV8]), 7);
    }

    #[test]
    fn test_overwide_shifts() {
        assert_eq!(Op::BvShl.eval(&[1, 32], &[BV32, BV32]), 0);
        assert_eq!(Op::BvLshr.eval(&[0x8000_0000, 40], &[BV32, BV32]), 0);
        assert_eq!(Op::BvAshr.eval(&[0x8000_0000, 40], &[BV32, BV32]), 0xffff_ffff);
    }

    #[test]
    fn test_rotates() {
        assert_eq!(Op::BvRotl.eval(&[0x81, 1], &[BV8, BV8]), 0x03);
        assert_eq!(Op::BvRotr.eval(&[0x03, 1], &[BV8, BV8]), 0x81);
        assert_eq!(Op::BvRotl.eval(&[0x12345678, 32], &[BV32, BV32]), 0x12345678);
    }

    #[test]
    fn test_signed_compare() {
        assert_eq!(Op::Slt.eval(&[0xff, 0x01], &[BV8, BV8]), 1);
        assert_eq!(Op::Ult.eval(&[0xff, 0x01], &[BV8, BV8]), 0);
    }

    #[test]
    fn test_extension_width_overflow_is_an_error() {
        assert_eq!(
            Op::ZeroExt(u32::MAX).result_sort(&[BV32]),
            Err(TermError::WidthOutOfRange(u32::MAX))
        );
        assert!(matches!(
            Op::SignExt(60).result_sort(&[BV8]),
            Err(TermError::WidthOutOfRange(68))
        ));
        assert_eq!(Op::ZeroExt(32).result_sort(&[BV32]), Ok(Sort::BitVec(64)));
    }

    #[test]
    fn test_structural_ops() {
        assert_eq!(Op::Extract { hi: 15, lo: 8 }.eval(&[0xabcd], &[BV32]), 0xab);
        assert_eq!(Op::Concat.eval(&[0xab, 0xcd], &[BV8, BV8]), 0xabcd);
        assert_eq!(Op::SignExt(8).eval(&[0x80], &[BV8]), 0xff80);
        assert_eq!(Op::ZeroExt(8).eval(&[0x80], &[BV8]), 0x80);
    }

    #[test]
    fn test_result_sort_checks() {
        assert_eq!(Op::BvAdd.result_sort(&[BV32, BV32]), Ok(BV32));
        assert!(Op::BvAdd.result_sort(&[BV32, BV8]).is_err());
        assert!(Op::And.result_sort(&[Sort::Bool, BV8]).is_err());
        assert_eq!(Op::Concat.result_sort(&[BV32, BV32]), Ok(Sort::BitVec(64)));
        assert!(Op::Concat.result_sort(&[Sort::BitVec(40), BV32]).is_err());
        assert!(Op::Extract { hi: 32, lo: 0 }.result_sort(&[BV32]).is_err());
        assert_eq!(Op::Eq.result_sort(&[BV8, BV8]), Ok(Sort::Bool));
    }
}
