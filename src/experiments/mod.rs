//! Built-in experiments.
//!
//! Each experiment is a workspace (implementation program plus
//! specification module), the rewrite lemmas its jobs rely on, and a batch of
//! jobs. The CLI runs them by name; the integration tests run them directly.

pub mod aes;
pub mod feal;
pub mod ffs;
pub mod hash;
pub mod loops;
pub mod sha1;

use crate::error::{SchedulerError, VerifyError};
use crate::ir::{Function, Program};
use crate::proof::cache::{LemmaProof, ProofCache};
use crate::scheduler::{BatchResult, ProofMode, Scheduler, SchedulerConfig, VerificationJob, Workspace};
use crate::semantics::smt::Z3Oracle;
use crate::spec::{SpecFn, SpecModule};
use crate::term::{Sort, Term};
use crate::validation::random::SamplingConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Constructor of one experiment
pub type Builder = fn() -> Result<Experiment, VerifyError>;

/// Every experiment, by name, with a one-line description.
pub const CATALOG: &[(&str, &str, Builder)] = &[
    ("ffs", "lowest set bit: binary search, De Bruijn table, and a seeded bug", ffs::experiment),
    ("hash", "xor of two hashes proved with the hash uninterpreted", hash::experiment),
    ("loops", "cut-point invariants for counting and accumulating loops", loops::experiment),
    ("sha1", "SHA-1 rounds with a rotate lemma and composed round overrides", sha1::experiment),
    ("feal", "FEAL-8 round trip over overrides for f and FK", feal::experiment),
    ("aes", "AES-128 round composed from proved byte-level steps; cipher round trip sampled", aes::experiment),
];

pub fn find(name: &str) -> Option<Builder> {
    CATALOG.iter().find(|(n, _, _)| *n == name).map(|(_, _, b)| *b)
}

/// A rewrite lemma to prove before the jobs run
#[derive(Debug, Clone)]
pub struct LemmaDef {
    pub name: String,
    pub vars: BTreeMap<String, Sort>,
    pub lhs: Term,
    pub rhs: Term,
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub name: &'static str,
    pub workspace: Arc<Workspace>,
    pub lemmas: Vec<LemmaDef>,
    pub jobs: Vec<VerificationJob>,
}

/// Lemma outcomes and the batch result of one run
#[derive(Debug)]
pub struct ExperimentRun {
    pub lemmas: Vec<(String, LemmaProof)>,
    pub batch: BatchResult,
}

impl Experiment {
    pub fn job(&self, name: &str) -> Option<&VerificationJob> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Keep only the named job and the jobs it transitively depends on.
    pub fn only(mut self, name: &str) -> Self {
        let mut keep = vec![name.to_string()];
        let mut i = 0;
        while i < keep.len() {
            if let Some(job) = self.job(&keep[i]) {
                for dep in &job.overrides {
                    if let Some(producer) = self.jobs.iter().find(|j| j.produces() == Some(dep.as_str())) {
                        if !keep.contains(&producer.name) {
                            keep.push(producer.name.clone());
                        }
                    }
                }
            }
            i += 1;
        }
        self.jobs.retain(|j| keep.contains(&j.name));
        self
    }

    /// Run every job in `mode`.
    pub fn with_mode(mut self, mode: ProofMode) -> Self {
        for job in &mut self.jobs {
            job.mode = mode;
        }
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        for job in &mut self.jobs {
            job.sampling = sampling.clone();
        }
        self
    }

    /// Prove the lemmas into `cache`, then run the batch.
    pub fn run(&self, cache: Arc<ProofCache>, config: &SchedulerConfig) -> Result<ExperimentRun, SchedulerError> {
        let oracle = Z3Oracle::new(config.solver.clone()).with_counter(cache.solver_counter());
        let mut lemmas = Vec::new();
        for def in &self.lemmas {
            let proof = cache.prove_lemma(&def.name, def.vars.clone(), def.lhs.clone(), def.rhs.clone(), &oracle);
            match &proof {
                LemmaProof::Proved(l) => info!(lemma = %def.name, token = %l.token(), "lemma ready"),
                LemmaProof::Refuted(model) => warn!(lemma = %def.name, model = ?model, "lemma refuted"),
                LemmaProof::Undecided(reason) => warn!(lemma = %def.name, reason = %reason, "lemma undecided"),
            }
            lemmas.push((def.name.clone(), proof));
        }
        info!(experiment = self.name, jobs = self.jobs.len(), "running experiment");
        let scheduler = Scheduler::new(Arc::clone(&self.workspace), cache, config.clone());
        let batch = scheduler.run(self.jobs.clone())?;
        Ok(ExperimentRun { lemmas, batch })
    }
}

pub(crate) fn bv(width: u32) -> Sort {
    Sort::BitVec(width)
}

pub(crate) fn program(functions: Vec<Function>) -> Program {
    let mut p = Program::new();
    for f in functions {
        p.add_function(f);
    }
    p
}

pub(crate) fn module(functions: Vec<SpecFn>) -> SpecModule {
    let mut m = SpecModule::new();
    for f in functions {
        m.add(f);
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_experiment_builds() {
        for (name, _, build) in CATALOG {
            let exp = build().unwrap();
            assert_eq!(exp.name, *name);
            assert!(!exp.jobs.is_empty());
            for job in &exp.jobs {
                assert!(exp.workspace.program.function(&job.implementation).is_some(), "{}", job.name);
                assert!(exp.workspace.spec.get(&job.specification).is_some(), "{}", job.name);
            }
        }
    }

    #[test]
    fn test_find() {
        assert!(find("ffs").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn test_only_keeps_dependencies() {
        let exp = feal::experiment().unwrap().only("feal_roundtrip");
        let names: Vec<_> = exp.jobs.iter().map(|j| j.name.as_str()).collect();
        assert!(names.contains(&"feal_roundtrip"));
        assert!(names.contains(&"feal_f"));
        assert!(names.contains(&"feal_s0"));
        assert!(!names.contains(&"feal_make_h1"));
    }
}
