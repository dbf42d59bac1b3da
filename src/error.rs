//! Error taxonomy for the verification engine.
//!
//! Fatal conditions are errors; a `Falsified` verdict is a result, not an
//! error. Errors raised inside a job are folded into an `Inconclusive` report
//! by the pipeline, while graph-level errors reject a whole batch.

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Ill-sorted or ill-formed term construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermError {
    #[error("sort mismatch in {op}: expected {expected}, got {actual}")]
    SortMismatch {
        op: String,
        expected: String,
        actual: String,
    },

    #[error("bit-vector width {0} out of range (1..=64)")]
    WidthOutOfRange(u32),

    #[error("{op} expects {expected} operand(s), got {actual}")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid operator parameters for {op}: {detail}")]
    BadParameter { op: String, detail: String },
}

/// Malformed or unsupported control-flow constructs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("unbounded loop without cut point in {function} (header {block}, limit {limit})")]
    UnboundedLoop {
        function: String,
        block: String,
        limit: u32,
    },

    #[error("value not found at cut point {cut} in {function}: {var}")]
    ValueNotFoundAtCutPoint {
        function: String,
        cut: String,
        var: String,
    },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("function {0} has no body")]
    NoBody(String),

    #[error("unbound variable {var} in {function}")]
    UnboundVariable { function: String, var: String },

    #[error("call to {callee}: expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        actual: usize,
    },

    #[error("call depth limit {limit} exceeded calling {callee}")]
    CallDepthExceeded { callee: String, limit: usize },

    #[error("result shape mismatch: {0}")]
    ResultShape(String),

    #[error("malformed control-flow graph in {function}: {detail}")]
    Malformed { function: String, detail: String },

    #[error(transparent)]
    Term(#[from] TermError),
}

/// Memory model violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryModelError {
    #[error("ambiguous alias: symbolic offset {offset} into region {region}")]
    AmbiguousAlias { region: String, offset: String },

    #[error("out-of-bounds access to {region}: offset {offset} + {bytes} byte(s) exceeds size {size}")]
    OutOfBounds {
        region: String,
        offset: u64,
        bytes: u32,
        size: u64,
    },

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("write to constant region {0}")]
    ConstantRegion(String),

    #[error("unsupported access width {bytes} byte(s) for a {width}-bit value")]
    AccessWidth { bytes: u32, width: u32 },

    #[error("region {0} allocated with different shapes on merging paths")]
    DivergentRegion(String),

    #[error("narrowing justified by {region} does not match a declared don't-care region")]
    UnjustifiedNarrowing { region: String },

    #[error("invalid narrowing of output {output}: {detail}")]
    InvalidNarrowing { output: usize, detail: String },

    #[error(transparent)]
    Term(#[from] TermError),
}

/// Override precondition could not be discharged and no fallback exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideApplicabilityError {
    #[error("override {name}: precondition not discharged and no body to inline ({reason})")]
    NotDischarged { name: String, reason: String },

    #[error("override {name}: call shape does not match ({detail})")]
    ShapeMismatch { name: String, detail: String },
}

/// Specification evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("unknown specification function: {0}")]
    UnknownFunction(String),

    #[error("unbound name {var} in specification {function}")]
    UnboundVariable { function: String, var: String },

    #[error("specification {function}: expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("specification {function} exceeded recursion limit {limit}")]
    RecursionLimit { function: String, limit: usize },

    #[error("specification {function}: expected {expected} value(s), got {actual}")]
    TupleShape {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("specification {function}: {detail}")]
    Opaque { function: String, detail: String },

    #[error(transparent)]
    Term(#[from] TermError),
}

/// Concrete evaluation of a term under an assignment failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("no value for {0}")]
    Unbound(String),

    #[error("cannot evaluate opaque application {0}")]
    Opaque(String),
}

/// Override dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("override dependency cycle: {}", .cycle.join(" -> "))]
pub struct CycleError {
    pub cycle: Vec<String>,
}

/// Batch-level scheduling errors; the whole graph is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("job {job} requires override {name}, which no job in the batch produces and the cache does not hold")]
    MissingOverride { job: String, name: String },

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("override {0} is produced by more than one job")]
    DuplicateProducer(String),
}

/// Umbrella error for a single verification run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("LoadError: {0}")]
    Load(#[from] LoadError),

    #[error("MemoryModelError: {0}")]
    Memory(#[from] MemoryModelError),

    #[error("OverrideApplicabilityError: {0}")]
    Override(#[from] OverrideApplicabilityError),

    #[error("SpecError: {0}")]
    Spec(#[from] SpecError),

    #[error("TermError: {0}")]
    Term(#[from] TermError),

    #[error("EvalError: {0}")]
    Eval(#[from] EvalError),

    #[error("SchedulerError: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl VerifyError {
    /// Short class name used in report diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            VerifyError::Load(_) => "LoadError",
            VerifyError::Memory(_) => "MemoryModelError",
            VerifyError::Override(_) => "OverrideApplicabilityError",
            VerifyError::Spec(_) => "SpecError",
            VerifyError::Term(_) => "TermError",
            VerifyError::Eval(_) => "EvalError",
            VerifyError::Scheduler(_) => "SchedulerError",
        }
    }
}

/// Uninterpreted name used in structurally mismatched positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("uninterpreted {name}: {detail}")]
pub struct UninterpretationUnsoundnessWarning {
    pub name: String,
    pub detail: String,
}

/// Non-fatal conditions surfaced in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("{0}")]
    Uninterpretation(UninterpretationUnsoundnessWarning),

    #[error("override {name} not applied, inlined instead: {reason}")]
    OverrideFallback { name: String, reason: String },

    #[error("counterexample not reproduced under uninterpretation, re-ran fully interpreted")]
    UnconfirmedCounterexample,

    #[error("reduced-width interpreted cross-check disagreed: {detail}")]
    CrossCheckDisagreement { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_path() {
        let err = CycleError {
            cycle: vec!["g".into(), "f".into(), "g".into()],
        };
        assert_eq!(err.to_string(), "override dependency cycle: g -> f -> g");
    }

    #[test]
    fn test_verify_error_class_prefix() {
        let err: VerifyError = LoadError::ValueNotFoundAtCutPoint {
            function: "acc".into(),
            cut: "inv".into(),
            var: "n".into(),
        }
        .into();
        assert_eq!(err.class(), "LoadError");
        assert!(err.to_string().starts_with("LoadError: value not found at cut point"));
    }

    #[test]
    fn test_unbounded_loop_message() {
        let err = LoadError::UnboundedLoop {
            function: "count_n".into(),
            block: "head".into(),
            limit: 4,
        };
        assert!(err.to_string().contains("unbounded loop without cut point"));
    }
}
