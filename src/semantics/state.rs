//! Equivalence predicates: which outputs are compared, and over which bits.

use crate::error::{MemoryModelError, TermError};
use crate::term::{mask, Term};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Outputs taking part in the comparison
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputMask {
    /// Every result
    #[default]
    All,
    /// Only the listed result indices
    Indices(BTreeSet<usize>),
}

impl OutputMask {
    /// Create a mask from a list of result indices
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        OutputMask::Indices(indices.into_iter().collect())
    }

    /// Check if a result index is compared
    pub fn contains(&self, index: usize) -> bool {
        match self {
            OutputMask::All => true,
            OutputMask::Indices(set) => set.contains(&index),
        }
    }

    /// Compared indices among `count` results
    pub fn selected(&self, count: usize) -> Vec<usize> {
        (0..count).filter(|i| self.contains(*i)).collect()
    }
}

impl fmt::Display for OutputMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMask::All => write!(f, "{{all}}"),
            OutputMask::Indices(set) => {
                let names: Vec<_> = set.iter().map(|i| format!("out{}", i)).collect();
                write!(f, "{{{}}}", names.join(", "))
            }
        }
    }
}

/// Restriction of one output to bits `hi..=lo`, justified by a don't-care
/// region of the implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Narrowing {
    pub output: usize,
    pub hi: u32,
    pub lo: u32,
    pub region: String,
}

impl fmt::Display for Narrowing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out{}[{}:{}] (don't-care region {})", self.output, self.hi, self.lo, self.region)
    }
}

/// What "equivalent" means for one job. The default compares every output
/// in full; anything weaker is explicit and ends up in the report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EquivalencePredicate {
    mask: OutputMask,
    narrowings: Vec<Narrowing>,
}

impl EquivalencePredicate {
    /// Full equality of every output
    pub fn full() -> Self {
        Self::default()
    }

    /// Compare only the given outputs
    pub fn with_outputs(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.mask = OutputMask::from_indices(indices);
        self
    }

    /// Narrow `output` to bits `hi..=lo`, citing don't-care `region`
    pub fn with_narrowing(mut self, output: usize, hi: u32, lo: u32, region: impl Into<String>) -> Self {
        self.narrowings.push(Narrowing {
            output,
            hi,
            lo,
            region: region.into(),
        });
        self
    }

    pub fn mask(&self) -> &OutputMask {
        &self.mask
    }

    pub fn narrowings(&self) -> &[Narrowing] {
        &self.narrowings
    }

    pub fn is_full(&self) -> bool {
        self.mask == OutputMask::All && self.narrowings.is_empty()
    }

    fn narrowing_for(&self, output: usize) -> Option<&Narrowing> {
        self.narrowings.iter().find(|n| n.output == output)
    }

    /// Check every narrowing against the output widths and the don't-care
    /// regions the implementation actually allocated.
    pub fn validate(&self, widths: &[u32], dont_care: &BTreeSet<String>) -> Result<(), MemoryModelError> {
        let mut seen = BTreeSet::new();
        for n in &self.narrowings {
            let width = widths.get(n.output).copied().ok_or_else(|| MemoryModelError::InvalidNarrowing {
                output: n.output,
                detail: format!("only {} output(s)", widths.len()),
            })?;
            if n.lo > n.hi || n.hi >= width {
                return Err(MemoryModelError::InvalidNarrowing {
                    output: n.output,
                    detail: format!("bits {}..{} outside a {}-bit output", n.hi, n.lo, width),
                });
            }
            if !self.mask.contains(n.output) {
                return Err(MemoryModelError::InvalidNarrowing {
                    output: n.output,
                    detail: "output is not compared".to_string(),
                });
            }
            if !seen.insert(n.output) {
                return Err(MemoryModelError::InvalidNarrowing {
                    output: n.output,
                    detail: "narrowed twice".to_string(),
                });
            }
            if !dont_care.contains(&n.region) {
                return Err(MemoryModelError::UnjustifiedNarrowing {
                    region: n.region.clone(),
                });
            }
        }
        Ok(())
    }

    /// Boolean term asserting the two output vectors agree.
    pub fn build(&self, impl_out: &[Term], spec_out: &[Term]) -> Result<Term, TermError> {
        if impl_out.len() != spec_out.len() {
            return Err(TermError::Arity {
                op: "equivalence".to_string(),
                expected: spec_out.len(),
                actual: impl_out.len(),
            });
        }
        let mut conjuncts = Vec::new();
        for i in self.mask.selected(impl_out.len()) {
            let (a, b) = match self.narrowing_for(i) {
                Some(n) => (
                    Term::extract(&impl_out[i], n.hi, n.lo)?,
                    Term::extract(&spec_out[i], n.hi, n.lo)?,
                ),
                None => (impl_out[i].clone(), spec_out[i].clone()),
            };
            conjuncts.push(Term::eq(&a, &b)?);
        }
        Term::and_all(&conjuncts)
    }

    /// Concrete counterpart of [`build`](Self::build).
    pub fn holds_concrete(&self, impl_out: &[u64], spec_out: &[u64]) -> bool {
        if impl_out.len() != spec_out.len() {
            return false;
        }
        self.mask.selected(impl_out.len()).into_iter().all(|i| match self.narrowing_for(i) {
            Some(n) => {
                let m = mask(n.hi - n.lo + 1);
                (impl_out[i] >> n.lo) & m == (spec_out[i] >> n.lo) & m
            }
            None => impl_out[i] == spec_out[i],
        })
    }
}

impl fmt::Display for EquivalencePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eq {}", self.mask)?;
        for n in &self.narrowings {
            write!(f, " narrowed {}", n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Sort;

    #[test]
    fn test_output_mask_selected() {
        assert_eq!(OutputMask::All.selected(3), vec![0, 1, 2]);
        let m = OutputMask::from_indices([2, 0]);
        assert_eq!(m.selected(3), vec![0, 2]);
        assert!(!m.contains(1));
    }

    #[test]
    fn test_full_predicate_is_conjunction() {
        let a = Term::var("pred_a", Sort::BitVec(8));
        let b = Term::var("pred_b", Sort::BitVec(8));
        let p = EquivalencePredicate::full();
        assert!(p.is_full());
        assert!(p.build(&[a.clone()], &[a.clone()]).unwrap().is_true());
        assert_eq!(p.build(&[a.clone()], &[b.clone()]).unwrap(), Term::eq(&a, &b).unwrap());
    }

    #[test]
    fn test_narrowing_requires_dont_care_region() {
        let p = EquivalencePredicate::full().with_narrowing(0, 31, 0, "h");
        let none = BTreeSet::new();
        assert!(matches!(
            p.validate(&[64], &none),
            Err(MemoryModelError::UnjustifiedNarrowing { .. })
        ));
        let regions: BTreeSet<String> = ["h".to_string()].into_iter().collect();
        p.validate(&[64], &regions).unwrap();
        assert!(matches!(
            EquivalencePredicate::full()
                .with_narrowing(0, 64, 0, "h")
                .validate(&[64], &regions),
            Err(MemoryModelError::InvalidNarrowing { .. })
        ));
    }

    #[test]
    fn test_narrowed_concrete_comparison() {
        let p = EquivalencePredicate::full().with_narrowing(0, 31, 0, "h");
        assert!(p.holds_concrete(&[0xdead_0000_0000_0007], &[7]));
        assert!(!p.holds_concrete(&[8], &[7]));
        assert!(!EquivalencePredicate::full().holds_concrete(&[0xdead_0000_0000_0007], &[7]));
    }

    #[test]
    fn test_narrowed_term_ignores_high_bits() {
        let x = Term::var("pred_x", Sort::BitVec(32));
        let junk = Term::undef("pred_junk", Sort::BitVec(32), true);
        let wide = Term::concat(&junk, &x).unwrap();
        let spec = Term::prim(crate::term::Op::ZeroExt(32), vec![x]).unwrap();
        let p = EquivalencePredicate::full().with_narrowing(0, 31, 0, "h");
        assert!(p.build(&[wide], &[spec]).unwrap().is_true());
    }
}
