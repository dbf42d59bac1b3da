//! Property tests for the term layer: hash-consing, constant folding and
//! substitution agree with concrete evaluation.

use proptest::prelude::*;
use std::collections::HashMap;

use symequiv::spec::eval_spec;
use symequiv::term::{eval_term, mask, substitute, Assignment, Op, Sort, Term};

const BINARY_OPS: [Op; 15] = [
    Op::BvAdd,
    Op::BvSub,
    Op::BvMul,
    Op::BvUdiv,
    Op::BvUrem,
    Op::BvAnd,
    Op::BvOr,
    Op::BvXor,
    Op::BvShl,
    Op::BvLshr,
    Op::BvAshr,
    Op::BvRotl,
    Op::BvRotr,
    Op::Concat,
    Op::Eq,
];

fn width() -> impl Strategy<Value = u32> {
    prop::sample::select(vec![1u32, 8, 16, 31, 32, 64])
}

fn env(pairs: &[(&str, u64)]) -> Assignment {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

proptest! {
    #[test]
    fn prop_identical_terms_are_shared(w in width(), c in any::<u64>(), op in prop::sample::select(BINARY_OPS.to_vec())) {
        let x = Term::var("prop_share_x", Sort::BitVec(w));
        let k = Term::bv(c & mask(w), w).unwrap();
        let a = Term::binary(op, &x, &k);
        let b = Term::binary(op, &x, &k);
        match (a, b) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.id(), b.id());
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "construction is deterministic"),
        }
    }

    #[test]
    fn prop_folding_matches_evaluation(
        w in width(),
        x in any::<u64>(),
        y in any::<u64>(),
        op in prop::sample::select(BINARY_OPS.to_vec()),
    ) {
        let (x, y) = (x & mask(w), y & mask(w));
        let sort = Sort::BitVec(w);
        let symbolic = match Term::binary(op, &Term::var("prop_fold_x", sort), &Term::var("prop_fold_y", sort)) {
            Ok(t) => t,
            // concat past 64 bits
            Err(_) => return Ok(()),
        };
        let folded = Term::binary(op, &Term::bv(x, w).unwrap(), &Term::bv(y, w).unwrap()).unwrap();
        let value = eval_term(&symbolic, &env(&[("prop_fold_x", x), ("prop_fold_y", y)])).unwrap();
        prop_assert_eq!(folded.as_const(), Some(value));
        prop_assert_eq!(value, op.eval(&[x, y], &[sort, sort]));
    }

    #[test]
    fn prop_local_identities_preserve_value(w in width(), x in any::<u64>(), c in any::<u64>()) {
        let (x, c) = (x & mask(w), c & mask(w));
        let v = Term::var("prop_id_x", Sort::BitVec(w));
        let k = Term::bv(c, w).unwrap();
        // (v ^ k) ^ k, (v | 0) & ones, v + 0 - 0
        let t1 = Term::binary(Op::BvXor, &Term::binary(Op::BvXor, &v, &k).unwrap(), &k).unwrap();
        let t2 = Term::binary(
            Op::BvAnd,
            &Term::binary(Op::BvOr, &v, &Term::bv(0, w).unwrap()).unwrap(),
            &Term::bv(mask(w), w).unwrap(),
        )
        .unwrap();
        prop_assert_eq!(&t1, &v);
        prop_assert_eq!(&t2, &v);
        let assignment = env(&[("prop_id_x", x)]);
        let mixed = Term::binary(Op::BvAdd, &Term::binary(Op::BvMul, &v, &k).unwrap(), &v).unwrap();
        prop_assert_eq!(
            eval_term(&mixed, &assignment).unwrap(),
            x.wrapping_mul(c).wrapping_add(x) & mask(w)
        );
    }

    #[test]
    fn prop_substitution_commutes_with_evaluation(x in any::<u32>(), y in any::<u32>()) {
        let sort = Sort::BitVec(32);
        let a = Term::var("prop_sub_a", sort);
        let b = Term::var("prop_sub_b", sort);
        let t = Term::ite(
            &Term::binary(Op::Ult, &a, &b).unwrap(),
            &Term::binary(Op::BvSub, &b, &a).unwrap(),
            &Term::binary(Op::BvXor, &a, &Term::binary(Op::BvRotl, &b, &Term::bv(7, 32).unwrap()).unwrap()).unwrap(),
        )
        .unwrap();

        let bindings: HashMap<String, Term> = [
            ("prop_sub_a".to_string(), Term::bv(x as u64, 32).unwrap()),
            ("prop_sub_b".to_string(), Term::bv(y as u64, 32).unwrap()),
        ]
        .into_iter()
        .collect();
        let closed = substitute(&t, &bindings).unwrap();
        let expected = eval_term(&t, &env(&[("prop_sub_a", x as u64), ("prop_sub_b", y as u64)])).unwrap();
        prop_assert_eq!(closed.as_const(), Some(expected));

        let direct = if x < y { y.wrapping_sub(x) } else { x ^ y.rotate_left(7) };
        prop_assert_eq!(expected, direct as u64);
    }

    #[test]
    fn prop_sbox_spec_is_rotate(a in any::<u8>(), b in any::<u8>()) {
        let exp = symequiv::experiments::feal::experiment().unwrap();
        let s0 = eval_spec(&exp.workspace.spec, "feal_s0_spec", &[a as u64, b as u64]).unwrap();
        prop_assert_eq!(s0, vec![a.wrapping_add(b).rotate_left(2) as u64]);
        let table = symequiv::experiments::feal::rot2_table();
        prop_assert_eq!(table[a.wrapping_add(b) as usize] as u64, a.wrapping_add(b).rotate_left(2) as u64);
    }
}
