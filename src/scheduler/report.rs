//! Per-job verification reports.

use crate::error::{VerifyError, Warning};
use crate::proof::token::ProofToken;
use crate::semantics::equivalence::{Counterexample, ObligationRecord, Undecided};
use crate::semantics::state::Narrowing;
use crate::validation::sampling::SamplingSummary;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Final verdict of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Verified,
    Falsified,
    Inconclusive,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Verified => write!(f, "VERIFIED"),
            Status::Falsified => write!(f, "FALSIFIED"),
            Status::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Why a job ended `Inconclusive`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconclusiveReason {
    SolverTimeout { obligation: String },
    SolverUnknown { obligation: String, reason: String },
    NotInductive { obligation: String },
    Unreproduced { obligation: String },
    CrossCheck { detail: String },
    /// Sampling passed; that is evidence, not proof.
    NonExhaustive { samples: usize },
    /// The batch deadline passed before the job ran.
    Cancelled,
    /// An override this job relies on was not verified.
    DependencyNotVerified { dependency: String },
    /// The job raised an error; the message is in the diagnostic.
    Error { class: String },
}

impl From<Undecided> for InconclusiveReason {
    fn from(u: Undecided) -> Self {
        match u {
            Undecided::SolverTimeout { obligation } => InconclusiveReason::SolverTimeout { obligation },
            Undecided::SolverUnknown { obligation, reason } => InconclusiveReason::SolverUnknown { obligation, reason },
            Undecided::NotInductive { obligation } => InconclusiveReason::NotInductive { obligation },
            Undecided::Unreproduced { obligation } => InconclusiveReason::Unreproduced { obligation },
            Undecided::CrossCheck { detail } => InconclusiveReason::CrossCheck { detail },
        }
    }
}

impl InconclusiveReason {
    /// Worth retrying with another tactic.
    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            InconclusiveReason::SolverTimeout { .. } | InconclusiveReason::SolverUnknown { .. }
        )
    }
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InconclusiveReason::SolverTimeout { obligation } => write!(f, "solver timeout on {}", obligation),
            InconclusiveReason::SolverUnknown { obligation, reason } => {
                write!(f, "solver unknown on {}: {}", obligation, reason)
            }
            InconclusiveReason::NotInductive { obligation } => {
                write!(f, "invariant not inductive ({})", obligation)
            }
            InconclusiveReason::Unreproduced { obligation } => {
                write!(f, "model for {} not reproduced concretely", obligation)
            }
            InconclusiveReason::CrossCheck { detail } => write!(f, "cross-check: {}", detail),
            InconclusiveReason::NonExhaustive { samples } => {
                write!(f, "{} samples passed, not exhaustive", samples)
            }
            InconclusiveReason::Cancelled => write!(f, "cancelled at deadline"),
            InconclusiveReason::DependencyNotVerified { dependency } => {
                write!(f, "dependency {} not verified", dependency)
            }
            InconclusiveReason::Error { class } => write!(f, "{}", class),
        }
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Everything known about one job after it ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub job: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InconclusiveReason>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_token: Option<ProofToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterexample: Option<Counterexample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub obligations: Vec<ObligationRecord>,
    pub warnings: Vec<Warning>,
    pub narrowing: Vec<Narrowing>,
    pub undefined_reads: BTreeSet<String>,
    pub overrides_applied: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingSummary>,
    /// Tactics tried, counting the first attempt
    pub attempts: usize,
}

impl VerificationReport {
    pub fn new(job: impl Into<String>, status: Status) -> Self {
        VerificationReport {
            job: job.into(),
            status,
            reason: None,
            elapsed: Duration::ZERO,
            proof_token: None,
            counterexample: None,
            diagnostic: None,
            obligations: Vec::new(),
            warnings: Vec::new(),
            narrowing: Vec::new(),
            undefined_reads: BTreeSet::new(),
            overrides_applied: BTreeSet::new(),
            sampling: None,
            attempts: 0,
        }
    }

    pub fn inconclusive(job: impl Into<String>, reason: InconclusiveReason) -> Self {
        let mut report = Self::new(job, Status::Inconclusive);
        report.reason = Some(reason);
        report
    }

    /// Inconclusive with the error class as reason and its message as
    /// diagnostic.
    pub fn from_error(job: impl Into<String>, error: &VerifyError) -> Self {
        let mut report = Self::inconclusive(
            job,
            InconclusiveReason::Error {
                class: error.class().to_string(),
            },
        );
        report.diagnostic = Some(error.to_string());
        report
    }

    pub fn is_verified(&self) -> bool {
        self.status == Status::Verified
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({:.2?})", self.job, self.status, self.elapsed)?;
        if let Some(reason) = &self.reason {
            write!(f, " - {}", reason)?;
        }
        if let Some(token) = &self.proof_token {
            write!(f, "\n  token: {}", token)?;
        }
        if let Some(cex) = &self.counterexample {
            write!(f, "\n  counterexample: {}", cex)?;
        }
        if let Some(diag) = &self.diagnostic {
            write!(f, "\n  {}", diag)?;
        }
        for n in &self.narrowing {
            write!(f, "\n  narrowed: {}", n)?;
        }
        for w in &self.warnings {
            write!(f, "\n  warning: {}", w)?;
        }
        if let Some(s) = &self.sampling {
            write!(
                f,
                "\n  sampling: {} samples, {} passed, {} failed, {} discarded",
                s.samples, s.passed, s.failed, s.discarded
            )?;
        }
        Ok(())
    }
}
