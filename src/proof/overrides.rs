//! Overrides: proven closed-form replacements for callees.

use crate::error::{OverrideApplicabilityError, TermError};
use crate::proof::token::ProofToken;
use crate::term::{substitute, Sort, Term, TermNode};
use std::collections::HashMap;
use std::sync::Arc;

/// A verified equivalence between implementation function `name` and
/// specification function `spec_name`, usable in place of inlining.
///
/// `precondition` and `outputs` are templates over the parameter variables
/// returned by [`Override::param_var`]; `outputs` is the specification
/// evaluated fully interpreted.
#[derive(Debug)]
pub struct Override {
    name: String,
    spec_name: String,
    params: Vec<Sort>,
    results: Vec<Sort>,
    precondition: Term,
    outputs: Vec<Term>,
    token: ProofToken,
}

impl Override {
    pub(crate) fn new(
        name: String,
        spec_name: String,
        params: Vec<Sort>,
        precondition: Term,
        outputs: Vec<Term>,
        token: ProofToken,
    ) -> Self {
        let results = outputs.iter().map(Term::sort).collect();
        Override {
            name,
            spec_name,
            params,
            results,
            precondition,
            outputs,
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec_name(&self) -> &str {
        &self.spec_name
    }

    pub fn params(&self) -> &[Sort] {
        &self.params
    }

    pub fn results(&self) -> &[Sort] {
        &self.results
    }

    pub fn token(&self) -> &ProofToken {
        &self.token
    }

    /// Template variable standing for parameter `index`.
    pub fn param_var(name: &str, index: usize, sort: Sort) -> Term {
        Term::var(format!("{}#arg{}", name, index), sort)
    }

    fn bindings(&self, args: &[Term]) -> Result<HashMap<String, Term>, OverrideApplicabilityError> {
        self.check_shape(args)?;
        Ok(args
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("{}#arg{}", self.name, i), a.clone()))
            .collect())
    }

    fn check_shape(&self, args: &[Term]) -> Result<(), OverrideApplicabilityError> {
        let sorts: Vec<Sort> = args.iter().map(Term::sort).collect();
        if sorts != self.params {
            return Err(OverrideApplicabilityError::ShapeMismatch {
                name: self.name.clone(),
                detail: format!("expected {:?}, got {:?}", self.params, sorts),
            });
        }
        Ok(())
    }

    /// Precondition instantiated at `args`.
    pub fn precondition_at(&self, args: &[Term]) -> Result<Term, OverrideApplicabilityError> {
        let map = self.bindings(args)?;
        substitute(&self.precondition, &map).map_err(|e| shape_error(&self.name, e))
    }

    /// Opaque substitution nodes, one per result.
    pub fn apply(&self, args: &[Term]) -> Result<Vec<Term>, OverrideApplicabilityError> {
        self.check_shape(args)?;
        Ok(self
            .results
            .iter()
            .enumerate()
            .map(|(i, sort)| Term::override_app(&self.name, i, args.to_vec(), *sort))
            .collect())
    }

    /// Closed form of result `index` at `args`.
    pub fn expand(&self, index: usize, args: &[Term]) -> Result<Term, OverrideApplicabilityError> {
        let map = self.bindings(args)?;
        let template = self.outputs.get(index).ok_or_else(|| OverrideApplicabilityError::ShapeMismatch {
            name: self.name.clone(),
            detail: format!("no result {}", index),
        })?;
        substitute(template, &map).map_err(|e| shape_error(&self.name, e))
    }
}

fn shape_error(name: &str, e: TermError) -> OverrideApplicabilityError {
    OverrideApplicabilityError::ShapeMismatch {
        name: name.to_string(),
        detail: e.to_string(),
    }
}

/// The overrides a job may use.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    by_name: HashMap<String, Arc<Override>>,
    by_spec: HashMap<String, Arc<Override>>,
}

impl OverrideSet {
    pub fn new(overrides: impl IntoIterator<Item = Arc<Override>>) -> Self {
        let mut set = OverrideSet::default();
        for ov in overrides {
            set.by_spec.insert(ov.spec_name.clone(), Arc::clone(&ov));
            set.by_name.insert(ov.name.clone(), ov);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Override for implementation function `name`.
    pub fn for_impl(&self, name: &str) -> Option<&Arc<Override>> {
        self.by_name.get(name)
    }

    /// Override proven against specification function `name`.
    pub fn for_spec(&self, name: &str) -> Option<&Arc<Override>> {
        self.by_spec.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Override>> {
        self.by_name.values()
    }

    /// Replace every override node in `term` by its closed form.
    pub fn expand_all(&self, term: &Term) -> Result<Term, OverrideApplicabilityError> {
        let mut memo = crate::term::Memo::new();
        let mut failure = None;
        let result = crate::term::transform(term, &mut memo, &mut |t| {
            if let TermNode::Override { name, index, args } = t.node() {
                if let Some(ov) = self.by_name.get(name) {
                    match ov.expand(*index, args) {
                        Ok(e) => return Ok(Some(e)),
                        Err(err) => failure = Some(err),
                    }
                }
            }
            Ok(None)
        });
        if let Some(err) = failure {
            return Err(err);
        }
        result.map_err(|e| shape_error("expand", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Op;

    fn double_override() -> Arc<Override> {
        let bv = Sort::BitVec(8);
        let x = Override::param_var("dbl", 0, bv);
        let out = Term::binary(Op::BvAdd, &x, &x).unwrap();
        Arc::new(Override::new(
            "dbl".into(),
            "dbl_spec".into(),
            vec![bv],
            Term::bool(true),
            vec![out],
            ProofToken::mint(1, 7),
        ))
    }

    #[test]
    fn test_apply_builds_override_nodes() {
        let ov = double_override();
        let a = Term::var("ovr_a", Sort::BitVec(8));
        let nodes = ov.apply(&[a.clone()]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0].node(), TermNode::Override { index: 0, .. }));
        assert_eq!(ov.apply(&[a]).unwrap()[0], nodes[0]);
    }

    #[test]
    fn test_expand_instantiates_template() {
        let ov = double_override();
        let three = Term::bv(3, 8).unwrap();
        assert_eq!(ov.expand(0, &[three]).unwrap().as_const(), Some(6));
    }

    #[test]
    fn test_shape_mismatch() {
        let ov = double_override();
        let wide = Term::var("ovr_w", Sort::BitVec(16));
        assert!(ov.apply(&[wide]).is_err());
    }

    #[test]
    fn test_expand_all_rewrites_nested_nodes() {
        let ov = double_override();
        let set = OverrideSet::new(vec![Arc::clone(&ov)]);
        let a = Term::var("ovr_b", Sort::BitVec(8));
        let inner = ov.apply(&[a.clone()]).unwrap().remove(0);
        let outer = ov.apply(&[inner]).unwrap().remove(0);
        let expanded = set.expand_all(&outer).unwrap();
        let two_a = Term::binary(Op::BvAdd, &a, &a).unwrap();
        assert_eq!(expanded, Term::binary(Op::BvAdd, &two_a, &two_a).unwrap());
    }
}
