//! Proved rewrite lemmas and their exhaustive bottom-up application.

use crate::error::TermError;
use crate::proof::token::ProofToken;
use crate::term::{substitute, transform, Memo, Sort, Term, TermNode};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default number of whole-term rewriting rounds before giving up on a
/// fixpoint.
pub const DEFAULT_MAX_ROUNDS: usize = 16;

/// A proved equation `lhs = rhs`, universally quantified over `vars`.
///
/// Pattern variables are ordinary `Var` terms; they match any term of the
/// same sort, consistently across repeated occurrences.
#[derive(Debug)]
pub struct Lemma {
    name: String,
    vars: BTreeMap<String, Sort>,
    lhs: Term,
    rhs: Term,
    token: ProofToken,
}

impl Lemma {
    pub(crate) fn new(name: String, vars: BTreeMap<String, Sort>, lhs: Term, rhs: Term, token: ProofToken) -> Self {
        Lemma {
            name,
            vars,
            lhs,
            rhs,
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vars(&self) -> &BTreeMap<String, Sort> {
        &self.vars
    }

    pub fn lhs(&self) -> &Term {
        &self.lhs
    }

    pub fn rhs(&self) -> &Term {
        &self.rhs
    }

    pub fn token(&self) -> &ProofToken {
        &self.token
    }

    /// Instantiate the right side if `term` matches the left side.
    pub fn rewrite_at(&self, term: &Term) -> Result<Option<Term>, TermError> {
        let mut binding = HashMap::new();
        if !self.matches(&self.lhs, term, &mut binding) {
            return Ok(None);
        }
        Ok(Some(substitute(&self.rhs, &binding)?))
    }

    fn matches(&self, pattern: &Term, term: &Term, binding: &mut HashMap<String, Term>) -> bool {
        if pattern.sort() != term.sort() {
            return false;
        }
        if let TermNode::Var(name) = pattern.node() {
            if self.vars.contains_key(name) {
                return match binding.get(name) {
                    Some(bound) => bound == term,
                    None => {
                        binding.insert(name.clone(), term.clone());
                        true
                    }
                };
            }
        }
        match (pattern.node(), term.node()) {
            (TermNode::Prim(pop, pargs), TermNode::Prim(top, targs)) if pop == top && pargs.len() == targs.len() => {
                let saved = binding.clone();
                if self.match_all(pargs, targs, binding) {
                    return true;
                }
                if pop.is_commutative() && pargs.len() == 2 {
                    *binding = saved;
                    let swapped = [targs[1].clone(), targs[0].clone()];
                    if self.match_all(pargs, &swapped, binding) {
                        return true;
                    }
                }
                false
            }
            (TermNode::Uninterp(pn, pargs), TermNode::Uninterp(tn, targs)) if pn == tn && pargs.len() == targs.len() => {
                self.match_all(pargs, targs, binding)
            }
            (
                TermNode::Override { name: pn, index: pi, args: pargs },
                TermNode::Override { name: tn, index: ti, args: targs },
            ) if pn == tn && pi == ti && pargs.len() == targs.len() => self.match_all(pargs, targs, binding),
            (TermNode::Ite(..), TermNode::Ite(..)) => self.match_all(&pattern.children(), &term.children(), binding),
            _ => pattern == term,
        }
    }

    fn match_all(&self, patterns: &[Term], terms: &[Term], binding: &mut HashMap<String, Term>) -> bool {
        patterns.iter().zip(terms).all(|(p, t)| self.matches(p, t, binding))
    }
}

impl fmt::Display for Lemma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.name, self.lhs, self.rhs)
    }
}

/// Ordered collection of lemmas applied left to right.
#[derive(Debug, Clone)]
pub struct Simpset {
    lemmas: Vec<Arc<Lemma>>,
    max_rounds: usize,
}

impl Default for Simpset {
    fn default() -> Self {
        Simpset {
            lemmas: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl Simpset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lemma(mut self, lemma: Arc<Lemma>) -> Self {
        self.lemmas.push(lemma);
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn add(&mut self, lemma: Arc<Lemma>) {
        self.lemmas.push(lemma);
    }

    pub fn lemmas(&self) -> &[Arc<Lemma>] {
        &self.lemmas
    }

    pub fn is_empty(&self) -> bool {
        self.lemmas.is_empty()
    }

    /// Rewrite `term` until no lemma applies or the round cap is hit.
    /// Returns the result and the number of lemma applications.
    pub fn rewrite(&self, term: &Term) -> Result<(Term, usize), TermError> {
        if self.lemmas.is_empty() {
            return Ok((term.clone(), 0));
        }
        let mut current = term.clone();
        let mut total = 0;
        for round in 0..self.max_rounds {
            let mut applied = 0;
            let mut memo = Memo::new();
            let next = transform(&current, &mut memo, &mut |t| {
                for lemma in &self.lemmas {
                    if let Some(r) = lemma.rewrite_at(t)? {
                        if r != *t {
                            applied += 1;
                            return Ok(Some(r));
                        }
                    }
                }
                Ok(None)
            })?;
            total += applied;
            if applied == 0 || next == current {
                debug!(rounds = round + 1, applications = total, "simpset fixpoint");
                return Ok((next, total));
            }
            current = next;
        }
        debug!(rounds = self.max_rounds, applications = total, "simpset round cap reached");
        Ok((current, total))
    }

    /// Rewrite every term of a vector.
    pub fn rewrite_all(&self, terms: &[Term]) -> Result<Vec<Term>, TermError> {
        terms.iter().map(|t| self.rewrite(t).map(|(r, _)| r)).collect()
    }
}
