//! Verification jobs and the workspace they run against.

use crate::ir::Program;
use crate::semantics::executor::{ExecConfig, LoopStrategy};
use crate::semantics::state::EquivalencePredicate;
use crate::spec::SpecModule;
use crate::validation::random::SamplingConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Implementation program plus specification module, shared by every job
/// of a batch.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub program: Program,
    pub spec: SpecModule,
}

impl Workspace {
    pub fn new(program: Program, spec: SpecModule) -> Arc<Self> {
        Arc::new(Workspace { program, spec })
    }
}

/// How a job tries to reach a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofMode {
    /// Symbolic proof only
    #[default]
    Symbolic,
    /// Concrete sampling only; at best `Inconclusive(NonExhaustive)`
    Sampling,
    /// Symbolic proof, sampling when it runs out of budget
    SymbolicWithFallback,
}

/// Alternative settings to retry with when an attempt times out or the
/// solver gives up. Unset fields keep the job's own setting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tactic {
    pub uninterpreted: Option<BTreeSet<String>>,
    pub timeout: Option<Duration>,
    pub loop_strategy: Option<LoopStrategy>,
}

impl Tactic {
    pub fn with_uninterpreted<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        self.uninterpreted = Some(names.into_iter().map(str::to_string).collect());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_loop_strategy(mut self, strategy: LoopStrategy) -> Self {
        self.loop_strategy = Some(strategy);
        self
    }
}

/// One equivalence obligation: `implementation` against `specification`.
#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub name: String,
    pub implementation: String,
    pub specification: String,
    /// Implementation functions whose overrides this job may use
    pub overrides: BTreeSet<String>,
    pub uninterpreted: BTreeSet<String>,
    /// Proved lemmas (by name in the cache) used for rewriting
    pub lemmas: Vec<String>,
    pub predicate: EquivalencePredicate,
    /// Boolean specification function restricting the inputs
    pub precondition: Option<String>,
    pub exec: ExecConfig,
    /// Per-query solver timeout; `None` uses the scheduler's
    pub timeout: Option<Duration>,
    pub mode: ProofMode,
    pub sampling: SamplingConfig,
    pub tactics: Vec<Tactic>,
    pub crosscheck_width: Option<u32>,
}

impl VerificationJob {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>, specification: impl Into<String>) -> Self {
        VerificationJob {
            name: name.into(),
            implementation: implementation.into(),
            specification: specification.into(),
            overrides: BTreeSet::new(),
            uninterpreted: BTreeSet::new(),
            lemmas: Vec::new(),
            predicate: EquivalencePredicate::full(),
            precondition: None,
            exec: ExecConfig::default(),
            timeout: None,
            mode: ProofMode::default(),
            sampling: SamplingConfig::default(),
            tactics: Vec::new(),
            crosscheck_width: None,
        }
    }

    pub fn with_overrides<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        self.overrides.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_uninterpreted<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        self.uninterpreted.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_lemma(mut self, name: impl Into<String>) -> Self {
        self.lemmas.push(name.into());
        self
    }

    pub fn with_predicate(mut self, predicate: EquivalencePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_precondition(mut self, name: impl Into<String>) -> Self {
        self.precondition = Some(name.into());
        self
    }

    pub fn with_exec_config(mut self, exec: ExecConfig) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_mode(mut self, mode: ProofMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_tactic(mut self, tactic: Tactic) -> Self {
        self.tactics.push(tactic);
        self
    }

    pub fn with_crosscheck_width(mut self, width: u32) -> Self {
        self.crosscheck_width = Some(width);
        self
    }

    /// The override this job registers when verified, if any. Only a full
    /// equivalence may stand in for a callee.
    pub fn produces(&self) -> Option<&str> {
        if self.predicate.is_full() {
            Some(&self.implementation)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let job = VerificationJob::new("j", "f", "f_spec");
        assert_eq!(job.mode, ProofMode::Symbolic);
        assert!(job.overrides.is_empty());
        assert_eq!(job.produces(), Some("f"));
    }

    #[test]
    fn test_narrowed_job_produces_nothing() {
        let job = VerificationJob::new("j", "f", "f_spec")
            .with_predicate(EquivalencePredicate::full().with_narrowing(0, 7, 0, "buf"))
            .with_overrides(["g", "h"]);
        assert_eq!(job.produces(), None);
        assert_eq!(job.overrides.len(), 2);
    }
}
