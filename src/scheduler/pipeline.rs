//! Running one job: dependency resolution, cache lookup, proof attempts,
//! fallback sampling, and override registration.

use crate::error::{LoadError, VerifyError};
use crate::proof::cache::ProofCache;
use crate::proof::overrides::{Override, OverrideSet};
use crate::proof::token::ProofToken;
use crate::scheduler::job::{ProofMode, Tactic, VerificationJob, Workspace};
use crate::scheduler::report::{InconclusiveReason, Status, VerificationReport};
use crate::semantics::equivalence::{as_condition, EquivalenceChecker, EquivalenceOutcome, EquivalenceResult};
use crate::semantics::smt::{SolverConfig, Z3Oracle};
use crate::simplify::Simpset;
use crate::spec::SpecEvaluator;
use crate::term::{Sort, Term};
use crate::validation::sampling::Sampler;
use rustc_hash::FxHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs jobs against one workspace and cache.
pub struct JobRunner<'a> {
    workspace: &'a Workspace,
    cache: &'a ProofCache,
    solver: SolverConfig,
}

impl<'a> JobRunner<'a> {
    pub fn new(workspace: &'a Workspace, cache: &'a ProofCache, solver: SolverConfig) -> Self {
        JobRunner {
            workspace,
            cache,
            solver,
        }
    }

    /// Run `job` to a report. Never fails: errors become `Inconclusive`
    /// with the error class as reason.
    pub fn run(&self, job: &VerificationJob) -> VerificationReport {
        let start = Instant::now();
        let overrides = match self.cache.override_set(&job.overrides) {
            Ok(set) => set,
            Err(missing) => {
                let mut report = VerificationReport::inconclusive(
                    &job.name,
                    InconclusiveReason::DependencyNotVerified { dependency: missing },
                );
                report.elapsed = start.elapsed();
                return report;
            }
        };

        let fingerprint = self.fingerprint(job, &overrides);
        if let Some(cached) = self.cache.lookup_verdict(fingerprint) {
            debug!(job = %job.name, "verdict from cache");
            return cached;
        }

        let mut simpset = Simpset::new();
        for name in &job.lemmas {
            match self.cache.lemma(name) {
                Some(lemma) => simpset.add(lemma),
                None => {
                    let mut report = VerificationReport::inconclusive(
                        &job.name,
                        InconclusiveReason::DependencyNotVerified {
                            dependency: format!("lemma {}", name),
                        },
                    );
                    report.elapsed = start.elapsed();
                    return report;
                }
            }
        }

        let mut report = match job.mode {
            ProofMode::Symbolic => self.symbolic(job, &overrides, &simpset),
            ProofMode::Sampling => self.sample(job, &overrides, VerificationReport::new(&job.name, Status::Inconclusive)),
            ProofMode::SymbolicWithFallback => {
                let report = self.symbolic(job, &overrides, &simpset);
                let fallback = report.status == Status::Inconclusive
                    && !matches!(
                        report.reason,
                        Some(InconclusiveReason::Error { .. })
                            | Some(InconclusiveReason::DependencyNotVerified { .. })
                            | Some(InconclusiveReason::Cancelled)
                    );
                if fallback {
                    debug!(job = %job.name, reason = ?report.reason, "symbolic attempt inconclusive, sampling");
                    self.sample(job, &overrides, report)
                } else {
                    report
                }
            }
        };

        if report.status == Status::Verified {
            let token = self.cache.mint(fingerprint);
            if job.produces().is_some() {
                if let Err(e) = self.register(job, token.clone()) {
                    warn!(job = %job.name, error = %e, "override not registered");
                }
            }
            report.proof_token = Some(token);
        }
        report.elapsed = start.elapsed();

        match &report.reason {
            Some(reason) => info!(job = %job.name, status = %report.status, reason = %reason, elapsed = ?report.elapsed, "job finished"),
            None => info!(job = %job.name, status = %report.status, elapsed = ?report.elapsed, "job finished"),
        }
        if report.status != Status::Inconclusive {
            self.cache.store_verdict(fingerprint, report.clone());
        }
        report
    }

    /// The job's own settings, then each tactic while the solver runs out
    /// of budget.
    fn symbolic(&self, job: &VerificationJob, overrides: &OverrideSet, simpset: &Simpset) -> VerificationReport {
        let tactics = std::iter::once(Tactic::default()).chain(job.tactics.iter().cloned());
        let mut last = VerificationReport::new(&job.name, Status::Inconclusive);
        for (n, tactic) in tactics.enumerate() {
            let mut solver = self.solver.clone();
            if let Some(t) = tactic.timeout.or(job.timeout) {
                solver.timeout = Some(t);
            }
            let oracle = Z3Oracle::new(solver).with_counter(self.cache.solver_counter());
            let uninterpreted = tactic.uninterpreted.clone().unwrap_or_else(|| job.uninterpreted.clone());
            let exec = match &tactic.loop_strategy {
                Some(s) => job.exec.clone().with_loop_strategy(s.clone()),
                None => job.exec.clone(),
            };
            let mut checker = EquivalenceChecker::new(&self.workspace.program, &self.workspace.spec, &oracle)
                .with_overrides(overrides.clone())
                .with_uninterpreted(uninterpreted)
                .with_simpset(simpset.clone())
                .with_exec_config(exec)
                .with_predicate(job.predicate.clone())
                .with_precondition(job.precondition.clone());
            if let Some(w) = job.crosscheck_width {
                checker = checker.with_crosscheck_width(w);
            }
            last = match checker.check(&job.implementation, &job.specification) {
                Ok(outcome) => from_outcome(&job.name, outcome),
                Err(e) => VerificationReport::from_error(&job.name, &e),
            };
            last.attempts = n + 1;
            if self.solver.is_cancelled() && last.reason.as_ref().is_some_and(InconclusiveReason::is_budget) {
                last.reason = Some(InconclusiveReason::Cancelled);
                break;
            }
            if !last.reason.as_ref().is_some_and(InconclusiveReason::is_budget) {
                break;
            }
            debug!(job = %job.name, attempt = n + 1, "retrying with next tactic");
        }
        last
    }

    /// Concrete sampling on top of `report` (which keeps its obligations
    /// and warnings from any symbolic attempt).
    fn sample(&self, job: &VerificationJob, overrides: &OverrideSet, mut report: VerificationReport) -> VerificationReport {
        let params: Vec<Sort> = match self.workspace.program.function(&job.implementation) {
            Some(f) => f.params.iter().map(|(_, s)| *s).collect(),
            None => {
                return VerificationReport::from_error(
                    &job.name,
                    &LoadError::UnknownFunction(job.implementation.clone()).into(),
                )
            }
        };
        let outcome = Sampler::new(&self.workspace.program, &self.workspace.spec, &job.predicate)
            .with_overrides(overrides)
            .with_precondition(job.precondition.as_deref())
            .run(&job.implementation, &job.specification, &params, &job.sampling);
        match outcome.counterexample {
            Some(cex) => {
                report.status = Status::Falsified;
                report.reason = None;
                report.counterexample = Some(cex);
            }
            None => {
                report.status = Status::Inconclusive;
                report.reason = Some(InconclusiveReason::NonExhaustive {
                    samples: outcome.summary.passed,
                });
            }
        }
        report.sampling = Some(outcome.summary);
        report
    }

    /// Closed-form templates of the verified specification, fully
    /// interpreted, then registration in the cache.
    fn register(&self, job: &VerificationJob, token: ProofToken) -> Result<(), VerifyError> {
        let f = self
            .workspace
            .program
            .function(&job.implementation)
            .ok_or_else(|| LoadError::UnknownFunction(job.implementation.clone()))?;
        let params: Vec<Sort> = f.params.iter().map(|(_, s)| *s).collect();
        let args: Vec<Term> = params
            .iter()
            .enumerate()
            .map(|(i, s)| Override::param_var(&job.implementation, i, *s))
            .collect();
        let none = OverrideSet::default();
        let plain = BTreeSet::new();
        let evaluator = SpecEvaluator::new(&self.workspace.spec, &none, &plain);
        let outputs = evaluator.eval_fn(&job.specification, &args)?;
        let precondition = match &job.precondition {
            Some(pre) => as_condition(pre, evaluator.eval_fn(pre, &args)?)?,
            None => Term::bool(true),
        };
        self.cache
            .register_override(&job.implementation, &job.specification, params, precondition, outputs, token);
        Ok(())
    }

    /// Content hash of everything the verdict depends on.
    fn fingerprint(&self, job: &VerificationJob, overrides: &OverrideSet) -> u64 {
        let mut h = FxHasher::default();
        job.name.hash(&mut h);
        job.implementation.hash(&mut h);
        job.specification.hash(&mut h);
        self.workspace.program.digest_of(&job.implementation).hash(&mut h);
        self.workspace.spec.digest_of(&job.specification).hash(&mut h);
        if let Some(pre) = &job.precondition {
            self.workspace.spec.digest_of(pre).hash(&mut h);
        }
        for name in &job.overrides {
            if let Some(ov) = overrides.for_impl(name) {
                ov.token().fingerprint().hash(&mut h);
            }
        }
        for name in &job.lemmas {
            if let Some(lemma) = self.cache.lemma(name) {
                lemma.token().fingerprint().hash(&mut h);
            }
        }
        job.uninterpreted.hash(&mut h);
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
            job.predicate, job.exec, job.mode, job.sampling, job.tactics, job.timeout, job.crosscheck_width, self.solver.timeout
        )
        .hash(&mut h);
        h.finish()
    }
}

fn from_outcome(job: &str, outcome: EquivalenceOutcome) -> VerificationReport {
    let (status, reason, counterexample) = match outcome.result {
        EquivalenceResult::Equivalent => (Status::Verified, None, None),
        EquivalenceResult::NotEquivalent(cex) => (Status::Falsified, None, Some(cex)),
        EquivalenceResult::Unknown(u) => (Status::Inconclusive, Some(u.into()), None),
    };
    let mut report = VerificationReport::new(job, status);
    report.reason = reason;
    report.counterexample = counterexample;
    report.obligations = outcome.obligations;
    report.warnings = outcome.warnings;
    report.narrowing = outcome.narrowing;
    report.undefined_reads = outcome.undefined_reads;
    report.overrides_applied = outcome.overrides_applied;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Operand, Program};
    use crate::spec::expr::*;
    use crate::spec::{SpecFn, SpecModule};
    use crate::term::Op;

    fn bv(w: u32) -> Sort {
        Sort::BitVec(w)
    }

    /// inc(x) = x + 1, and twice_inc calling it twice
    fn workspace(bug: bool) -> Workspace {
        let mut inc = FunctionBuilder::new("inc").param("x", bv(16)).result(bv(16));
        inc.assign("y", Op::BvAdd, vec![Operand::var("x"), Operand::bv(if bug { 2 } else { 1 }, 16)]);
        inc.ret(vec![Operand::var("y")]);
        let mut top = FunctionBuilder::new("add2").param("a", bv(16)).result(bv(16));
        top.call(&["b"], "inc", vec![Operand::var("a")]);
        top.call(&["c"], "inc", vec![Operand::var("b")]);
        top.ret(vec![Operand::var("c")]);
        let mut program = Program::new();
        program.add_function(inc.build().unwrap());
        program.add_function(top.build().unwrap());

        let mut spec = SpecModule::new();
        spec.add(SpecFn::new("inc_spec", &[("x", bv(16))], &[bv(16)], bin(Op::BvAdd, var("x"), lit(1, 16))));
        spec.add(SpecFn::new(
            "add2_spec",
            &[("a", bv(16))],
            &[bv(16)],
            call("inc_spec", vec![call("inc_spec", vec![var("a")])]),
        ));
        Workspace { program, spec }
    }

    fn runner<'a>(ws: &'a Workspace, cache: &'a ProofCache) -> JobRunner<'a> {
        JobRunner::new(ws, cache, SolverConfig::with_timeout_secs(20))
    }

    #[test]
    fn test_verified_job_registers_override() {
        let ws = workspace(false);
        let cache = ProofCache::new();
        let report = runner(&ws, &cache).run(&VerificationJob::new("inc", "inc", "inc_spec"));
        assert_eq!(report.status, Status::Verified);
        assert!(report.proof_token.is_some());
        assert!(cache.has_override("inc"));

        let top = VerificationJob::new("add2", "add2", "add2_spec").with_overrides(["inc"]);
        let report = runner(&ws, &cache).run(&top);
        assert_eq!(report.status, Status::Verified);
        assert!(report.overrides_applied.contains("inc"));
    }

    #[test]
    fn test_missing_dependency_is_inconclusive() {
        let ws = workspace(false);
        let cache = ProofCache::new();
        let top = VerificationJob::new("add2", "add2", "add2_spec").with_overrides(["inc"]);
        let report = runner(&ws, &cache).run(&top);
        assert_eq!(
            report.reason,
            Some(InconclusiveReason::DependencyNotVerified {
                dependency: "inc".into()
            })
        );
    }

    #[test]
    fn test_second_run_hits_cache() {
        let ws = workspace(false);
        let cache = ProofCache::new();
        let job = VerificationJob::new("inc", "inc", "inc_spec");
        let first = runner(&ws, &cache).run(&job);
        let calls = cache.solver_calls();
        let second = runner(&ws, &cache).run(&job);
        assert_eq!(first, second);
        assert_eq!(cache.solver_calls(), calls);
    }

    #[test]
    fn test_falsified_job() {
        let ws = workspace(true);
        let cache = ProofCache::new();
        let report = runner(&ws, &cache).run(&VerificationJob::new("inc", "inc", "inc_spec"));
        assert_eq!(report.status, Status::Falsified);
        let cex = report.counterexample.unwrap();
        assert_eq!(cex.impl_outputs[0], cex.spec_outputs[0].wrapping_add(1) & 0xffff);
        assert!(!cache.has_override("inc"));
    }

    #[test]
    fn test_errors_become_inconclusive() {
        let ws = workspace(false);
        let cache = ProofCache::new();
        let report = runner(&ws, &cache).run(&VerificationJob::new("ghost", "ghost", "inc_spec"));
        assert_eq!(report.status, Status::Inconclusive);
        assert_eq!(
            report.reason,
            Some(InconclusiveReason::Error {
                class: "LoadError".into()
            })
        );
    }

    #[test]
    fn test_cancelled_solver_reports_cancelled() {
        let exp = crate::experiments::ffs::experiment().unwrap();
        let cache = ProofCache::new();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let runner = JobRunner::new(&exp.workspace, &cache, SolverConfig::no_timeout().with_cancel(flag));
        let job = exp.job("ffs_imp").unwrap().clone().with_mode(ProofMode::SymbolicWithFallback);
        let report = runner.run(&job);
        assert_eq!(report.status, Status::Inconclusive);
        assert_eq!(report.reason, Some(InconclusiveReason::Cancelled));
        assert!(report.sampling.is_none());
        assert_eq!(cache.solver_calls(), 0);
        assert!(cache.lookup_verdict(runner.fingerprint(&job, &OverrideSet::default())).is_none());
    }

    #[test]
    fn test_sampling_mode_is_never_verified() {
        let ws = workspace(false);
        let cache = ProofCache::new();
        let job = VerificationJob::new("inc", "inc", "inc_spec").with_mode(ProofMode::Sampling);
        let report = runner(&ws, &cache).run(&job);
        assert_eq!(report.status, Status::Inconclusive);
        assert!(matches!(report.reason, Some(InconclusiveReason::NonExhaustive { .. })));
        assert_eq!(report.sampling.unwrap().failed, 0);
        assert!(!cache.has_override("inc"));
    }
}
