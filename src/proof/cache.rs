//! Shared proof cache: registered overrides, proved lemmas, and verdicts
//! keyed by job fingerprint.
//!
//! Readers vastly outnumber writers (every job looks up its dependencies,
//! only finished jobs write), so each table sits behind its own `RwLock`.

use crate::proof::overrides::{Override, OverrideSet};
use crate::proof::token::ProofToken;
use crate::scheduler::report::VerificationReport;
use crate::semantics::smt::{Oracle, Query, SmtOutcome};
use crate::simplify::Lemma;
use crate::term::{Assignment, Sort, Term};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of proving a rewrite lemma
#[derive(Debug, Clone)]
pub enum LemmaProof {
    Proved(Arc<Lemma>),
    /// Values for the lemma variables on which the sides differ
    Refuted(Assignment),
    Undecided(String),
}

#[derive(Default)]
pub struct ProofCache {
    overrides: RwLock<FxHashMap<String, Arc<Override>>>,
    lemmas: RwLock<FxHashMap<String, Arc<Lemma>>>,
    verdicts: RwLock<FxHashMap<u64, VerificationReport>>,
    serial: AtomicU64,
    solver_calls: Arc<AtomicU64>,
}

impl ProofCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter shared with every oracle created for jobs on this cache.
    pub fn solver_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.solver_calls)
    }

    pub fn solver_calls(&self) -> u64 {
        self.solver_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn mint(&self, fingerprint: u64) -> ProofToken {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        ProofToken::mint(serial, fingerprint)
    }

    /// Register the override produced by a verified job. `precondition` and
    /// `outputs` are templates over [`Override::param_var`].
    pub(crate) fn register_override(
        &self,
        name: &str,
        spec_name: &str,
        params: Vec<Sort>,
        precondition: Term,
        outputs: Vec<Term>,
        token: ProofToken,
    ) -> Arc<Override> {
        let ov = Arc::new(Override::new(
            name.to_string(),
            spec_name.to_string(),
            params,
            precondition,
            outputs,
            token,
        ));
        info!(name, spec = spec_name, token = %ov.token(), "override registered");
        self.overrides.write().insert(name.to_string(), Arc::clone(&ov));
        ov
    }

    pub fn override_for(&self, name: &str) -> Option<Arc<Override>> {
        self.overrides.read().get(name).cloned()
    }

    pub fn has_override(&self, name: &str) -> bool {
        self.overrides.read().contains_key(name)
    }

    /// Overrides for `names`; the first missing name is the error.
    pub fn override_set<'n>(&self, names: impl IntoIterator<Item = &'n String>) -> Result<OverrideSet, String> {
        let table = self.overrides.read();
        let mut found = Vec::new();
        for name in names {
            found.push(table.get(name).cloned().ok_or_else(|| name.clone())?);
        }
        Ok(OverrideSet::new(found))
    }

    /// Prove `lhs = rhs` for all values of `vars` and keep it under `name`.
    /// An identical lemma already proved is returned without a solver call.
    pub fn prove_lemma(
        &self,
        name: &str,
        vars: BTreeMap<String, Sort>,
        lhs: Term,
        rhs: Term,
        oracle: &dyn Oracle,
    ) -> LemmaProof {
        if let Some(existing) = self.lemmas.read().get(name) {
            if existing.lhs() == &lhs && existing.rhs() == &rhs && existing.vars() == &vars {
                debug!(lemma = name, "lemma reused");
                return LemmaProof::Proved(Arc::clone(existing));
            }
        }
        let goal = match Term::eq(&lhs, &rhs) {
            Ok(g) => g,
            Err(e) => return LemmaProof::Undecided(e.to_string()),
        };
        match oracle.check(&Query::new(format!("lemma:{}", name), goal)) {
            SmtOutcome::Unsat => {
                let token = self.mint(lemma_fingerprint(name, &lhs, &rhs));
                let lemma = Arc::new(Lemma::new(name.to_string(), vars, lhs, rhs, token));
                info!(lemma = name, token = %lemma.token(), "lemma proved");
                self.lemmas.write().insert(name.to_string(), Arc::clone(&lemma));
                LemmaProof::Proved(lemma)
            }
            SmtOutcome::Sat(model) => LemmaProof::Refuted(model),
            other => LemmaProof::Undecided(other.to_string()),
        }
    }

    pub fn lemma(&self, name: &str) -> Option<Arc<Lemma>> {
        self.lemmas.read().get(name).cloned()
    }

    pub fn lookup_verdict(&self, fingerprint: u64) -> Option<VerificationReport> {
        self.verdicts.read().get(&fingerprint).cloned()
    }

    pub fn store_verdict(&self, fingerprint: u64, report: VerificationReport) {
        self.verdicts.write().insert(fingerprint, report);
    }

    pub fn verdict_count(&self) -> usize {
        self.verdicts.read().len()
    }
}

fn lemma_fingerprint(name: &str, lhs: &Term, rhs: &Term) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    lhs.to_string().hash(&mut hasher);
    rhs.to_string().hash(&mut hasher);
    hasher.finish()
}
