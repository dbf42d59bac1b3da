//! Uninterpretation of named computations and the structural check that
//! guards it.
//!
//! Uninterpreted applications obey congruence only. That is enough when the
//! same name is applied to the same argument terms on both sides of an
//! obligation; anything else is reported, since a proof that leans on a
//! mismatched position may be vacuous.

use crate::error::{TermError, UninterpretationUnsoundnessWarning};
use crate::proof::overrides::OverrideSet;
use crate::term::{transform, visit, Memo, Term, TermNode};
use std::collections::{BTreeMap, BTreeSet};

/// Replace `Override` nodes whose name is in `names` by `Uninterp` nodes,
/// named like the executor names uninterpreted results.
pub fn uninterpret(term: &Term, names: &BTreeSet<String>, overrides: &OverrideSet) -> Result<Term, TermError> {
    if names.is_empty() {
        return Ok(term.clone());
    }
    let mut memo = Memo::new();
    transform(term, &mut memo, &mut |t| match t.node() {
        TermNode::Override { name, index, args } if names.contains(name) => {
            let results = overrides.for_impl(name).map_or(*index + 1, |o| o.results().len());
            let uname = if results == 1 {
                name.clone()
            } else {
                format!("{}.{}", name, index)
            };
            Ok(Some(Term::uninterp(uname, args.clone(), t.sort())))
        }
        _ => Ok(None),
    })
}

/// Name in `names` that an uninterpreted application belongs to.
fn owner<'n>(application: &str, names: &'n BTreeSet<String>) -> Option<&'n String> {
    if let Some(n) = names.get(application) {
        return Some(n);
    }
    application
        .rsplit_once('.')
        .and_then(|(base, index)| index.parse::<usize>().ok().and_then(|_| names.get(base)))
}

type Applications = BTreeMap<String, BTreeMap<Vec<Term>, usize>>;

fn applications(roots: &[Term], names: &BTreeSet<String>) -> Applications {
    let mut out: Applications = BTreeMap::new();
    visit(roots, |t| {
        if let TermNode::Uninterp(name, args) = t.node() {
            if let Some(base) = owner(name, names) {
                *out.entry(base.clone()).or_default().entry(args.clone()).or_default() += 1;
            }
        }
    });
    out
}

/// True when any uninterpreted application of a name in `names` occurs.
pub fn uses_uninterpreted(roots: &[Term], names: &BTreeSet<String>) -> bool {
    !names.is_empty() && !applications(roots, names).is_empty()
}

/// Compare, per name, the argument tuples the two sides apply it to.
pub fn check_structure(
    names: &BTreeSet<String>,
    impl_side: &[Term],
    spec_side: &[Term],
) -> Vec<UninterpretationUnsoundnessWarning> {
    let left = applications(impl_side, names);
    let right = applications(spec_side, names);
    let empty = BTreeMap::new();
    let mut warnings = Vec::new();
    for name in names {
        let l = left.get(name).unwrap_or(&empty);
        let r = right.get(name).unwrap_or(&empty);
        let detail = match (l.is_empty(), r.is_empty()) {
            (true, true) => continue,
            (false, true) => "occurs only in the implementation".to_string(),
            (true, false) => "occurs only in the specification".to_string(),
            (false, false) => {
                let unmatched = l.keys().filter(|k| !r.contains_key(*k)).count()
                    + r.keys().filter(|k| !l.contains_key(*k)).count();
                if unmatched > 0 {
                    format!("{} application(s) with argument terms found on one side only", unmatched)
                } else {
                    continue;
                }
            }
        };
        warnings.push(UninterpretationUnsoundnessWarning {
            name: name.clone(),
            detail,
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::overrides::Override;
    use crate::proof::token::ProofToken;
    use crate::term::{Op, Sort};
    use std::sync::Arc;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matching_positions_pass() {
        let x = Term::var("un_x", Sort::BitVec(32));
        let h = |t: &Term| Term::uninterp("hash", vec![t.clone()], Sort::BitVec(32));
        let imp = h(&h(&x));
        let spec = h(&h(&x));
        assert!(check_structure(&names(&["hash"]), &[imp], &[spec]).is_empty());
    }

    #[test]
    fn test_one_sided_and_mismatched_positions_warn() {
        let x = Term::var("un_y", Sort::BitVec(32));
        let y = Term::var("un_z", Sort::BitVec(32));
        let h = |t: &Term| Term::uninterp("hash", vec![t.clone()], Sort::BitVec(32));
        let set = names(&["hash", "other"]);
        let w = check_structure(&set, &[h(&x)], &[h(&y)]);
        assert_eq!(w.len(), 1);
        assert!(w[0].detail.contains("one side only"));

        let w = check_structure(&set, &[h(&x)], &[x.clone()]);
        assert_eq!(w[0].detail, "occurs only in the implementation");
    }

    #[test]
    fn test_multi_result_names_grouped() {
        let x = Term::var("un_m", Sort::BitVec(8));
        let a = Term::uninterp("pair.0", vec![x.clone()], Sort::BitVec(8));
        let b = Term::uninterp("pair.1", vec![x], Sort::BitVec(8));
        assert!(uses_uninterpreted(&[a.clone()], &names(&["pair"])));
        assert_eq!(check_structure(&names(&["pair"]), &[a], &[b]).len(), 0);
    }

    #[test]
    fn test_uninterpret_override_nodes() {
        let bv = Sort::BitVec(8);
        let p = Override::param_var("dbl", 0, bv);
        let ov = Arc::new(Override::new(
            "dbl".into(),
            "dbl_spec".into(),
            vec![bv],
            Term::bool(true),
            vec![Term::binary(Op::BvAdd, &p, &p).unwrap()],
            ProofToken::mint(1, 1),
        ));
        let set = OverrideSet::new(vec![Arc::clone(&ov)]);
        let x = Term::var("un_ov", bv);
        let node = ov.apply(&[x.clone()]).unwrap().remove(0);
        let r = uninterpret(&node, &names(&["dbl"]), &set).unwrap();
        assert_eq!(r, Term::uninterp("dbl", vec![x], bv));
        assert_eq!(uninterpret(&node, &BTreeSet::new(), &set).unwrap(), node);
    }
}
