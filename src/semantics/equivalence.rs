//! Semantic equivalence checking of an implementation against a specification
//!
//! The checker executes the implementation symbolically, evaluates the
//! specification on the same inputs, and turns the result into obligations:
//!
//! * `output`: every return path satisfies the equivalence predicate;
//! * `base`: every arrival at a cut from the entry establishes its invariant;
//! * `step`: every arrival at a cut from a cut, assuming the invariant at the
//!   start, re-establishes it.
//!
//! Each obligation becomes one solver query. A model is only trusted after
//! the inputs it names are replayed concretely on both sides.

use crate::error::{LoadError, SpecError, TermError, UninterpretationUnsoundnessWarning, VerifyError, Warning};
use crate::ir::{Function, Instruction, Program};
use crate::proof::overrides::OverrideSet;
use crate::semantics::concrete::ConcreteMachine;
use crate::semantics::executor::{CutArrival, ExecConfig, ExecTrace, Executor, LoopStrategy, PhaseResult, Start};
use crate::semantics::smt::{Oracle, Query, SmtOutcome};
use crate::semantics::state::{EquivalencePredicate, Narrowing};
use crate::simplify::{check_structure, uninterpret, uses_uninterpreted, Simpset};
use crate::spec::{eval_spec, SpecEvaluator, SpecFn, SpecModule};
use crate::term::{visit, Assignment, Sort, Term, TermNode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Default width of the fully interpreted cross-check.
pub const DEFAULT_CROSSCHECK_WIDTH: u32 = 8;

/// Concrete inputs on which the two sides disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counterexample {
    /// Inputs by parameter name, plus every undefined byte the run read
    pub bindings: Assignment,
    pub impl_outputs: Vec<u64>,
    pub spec_outputs: Vec<u64>,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings: Vec<_> = self.bindings.iter().map(|(k, v)| format!("{} = {:#x}", k, v)).collect();
        write!(
            f,
            "{} -> impl {:x?}, spec {:x?}",
            bindings.join(", "),
            self.impl_outputs,
            self.spec_outputs
        )
    }
}

/// One discharged (or failed) query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObligationRecord {
    pub label: String,
    pub outcome: String,
}

/// Why no verdict was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undecided {
    SolverTimeout { obligation: String },
    SolverUnknown { obligation: String, reason: String },
    /// A cut invariant is not inductive (or too weak for the output).
    NotInductive { obligation: String },
    /// The solver found a model that concrete replay does not reproduce.
    Unreproduced { obligation: String },
    /// The reduced-width interpreted re-run did not confirm the proof.
    CrossCheck { detail: String },
}

impl fmt::Display for Undecided {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Undecided::SolverTimeout { obligation } => write!(f, "solver timeout on {}", obligation),
            Undecided::SolverUnknown { obligation, reason } => {
                write!(f, "solver unknown on {}: {}", obligation, reason)
            }
            Undecided::NotInductive { obligation } => write!(f, "invariant not inductive ({})", obligation),
            Undecided::Unreproduced { obligation } => {
                write!(f, "model for {} not reproduced by concrete replay", obligation)
            }
            Undecided::CrossCheck { detail } => write!(f, "cross-check inconclusive: {}", detail),
        }
    }
}

/// Result of equivalence checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquivalenceResult {
    /// The two sides agree on every input
    Equivalent,
    /// A replayed counterexample
    NotEquivalent(Counterexample),
    /// Could not determine (timeout, unknown, weak invariant, etc.)
    Unknown(Undecided),
}

/// Everything a check produced, for the report
#[derive(Debug, Clone)]
pub struct EquivalenceOutcome {
    pub result: EquivalenceResult,
    pub obligations: Vec<ObligationRecord>,
    pub warnings: Vec<Warning>,
    pub narrowing: Vec<Narrowing>,
    pub undefined_reads: BTreeSet<String>,
    pub overrides_applied: BTreeSet<String>,
    pub uninterpreted_used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Output { resumed: bool },
    Base,
    Step,
}

struct Pending {
    label: String,
    kind: Kind,
    hypotheses: Vec<Term>,
    goal: Goal,
}

enum Goal {
    Outputs(Vec<Term>),
    Invariant(Term),
}

struct Mode<'m> {
    uninterpreted: &'m BTreeSet<String>,
    expand: bool,
    assumptions: Vec<Term>,
    tag: &'static str,
}

enum Verdict {
    Proved,
    Refuted(Counterexample),
    Unconfirmed { obligation: String, kind: Kind, opaque: bool },
    Undecided(Undecided),
}

struct Attempt {
    verdict: Verdict,
    obligations: Vec<ObligationRecord>,
    warnings: Vec<Warning>,
    trace: ExecTrace,
    uninterpreted_used: bool,
}

fn is_opaque(roots: &[Term]) -> bool {
    let mut opaque = false;
    visit(roots, |t| {
        opaque |= matches!(t.node(), TermNode::Uninterp(..) | TermNode::Override { .. });
    });
    opaque
}

fn push_unique(warnings: &mut Vec<Warning>, w: Warning) {
    if !warnings.contains(&w) {
        warnings.push(w);
    }
}

fn unconfirmed(obligation: String, kind: Kind) -> Undecided {
    match kind {
        Kind::Output { resumed: false } => Undecided::Unreproduced { obligation },
        _ => Undecided::NotInductive { obligation },
    }
}

/// Checks one implementation function against one specification function.
pub struct EquivalenceChecker<'a> {
    program: &'a Program,
    spec: &'a SpecModule,
    oracle: &'a dyn Oracle,
    overrides: OverrideSet,
    uninterpreted: BTreeSet<String>,
    simpset: Simpset,
    exec: ExecConfig,
    predicate: EquivalencePredicate,
    precondition: Option<String>,
    crosscheck_width: u32,
}

impl<'a> EquivalenceChecker<'a> {
    pub fn new(program: &'a Program, spec: &'a SpecModule, oracle: &'a dyn Oracle) -> Self {
        EquivalenceChecker {
            program,
            spec,
            oracle,
            overrides: OverrideSet::default(),
            uninterpreted: BTreeSet::new(),
            simpset: Simpset::default(),
            exec: ExecConfig::default(),
            predicate: EquivalencePredicate::full(),
            precondition: None,
            crosscheck_width: DEFAULT_CROSSCHECK_WIDTH,
        }
    }

    pub fn with_overrides(mut self, overrides: OverrideSet) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_uninterpreted(mut self, names: BTreeSet<String>) -> Self {
        self.uninterpreted = names;
        self
    }

    pub fn with_simpset(mut self, simpset: Simpset) -> Self {
        self.simpset = simpset;
        self
    }

    pub fn with_exec_config(mut self, config: ExecConfig) -> Self {
        self.exec = config;
        self
    }

    pub fn with_predicate(mut self, predicate: EquivalencePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Only inputs satisfying this boolean specification function (over the
    /// implementation's parameters) are considered.
    pub fn with_precondition(mut self, name: Option<String>) -> Self {
        self.precondition = name;
        self
    }

    pub fn with_crosscheck_width(mut self, width: u32) -> Self {
        self.crosscheck_width = width;
        self
    }

    /// Check `implementation` against `specification`.
    pub fn check(&self, implementation: &str, specification: &str) -> Result<EquivalenceOutcome, VerifyError> {
        let imp = self
            .program
            .function(implementation)
            .ok_or_else(|| LoadError::UnknownFunction(implementation.to_string()))?;
        if !imp.has_body() {
            return Err(LoadError::NoBody(implementation.to_string()).into());
        }
        let sf = self
            .spec
            .get(specification)
            .ok_or_else(|| SpecError::UnknownFunction(specification.to_string()))?;
        check_signatures(imp, sf)?;

        let first = self.attempt(
            imp,
            sf,
            Mode {
                uninterpreted: &self.uninterpreted,
                expand: false,
                assumptions: Vec::new(),
                tag: "",
            },
        )?;
        let mut obligations = first.obligations;
        let mut warnings = first.warnings;
        let mut undefined_reads = first.trace.reads.undefined.clone();
        undefined_reads.extend(first.trace.reads.dont_care.iter().cloned());

        let no_names = BTreeSet::new();
        let result = match first.verdict {
            Verdict::Proved if first.uninterpreted_used => {
                self.cross_check(imp, sf, &no_names, &mut obligations, &mut warnings)?
            }
            Verdict::Proved => EquivalenceResult::Equivalent,
            Verdict::Refuted(cex) => EquivalenceResult::NotEquivalent(cex),
            Verdict::Unconfirmed {
                obligation,
                opaque: true,
                ..
            } => {
                warn!(obligation = %obligation, "model not reproduced, re-checking fully interpreted");
                push_unique(&mut warnings, Warning::UnconfirmedCounterexample);
                let full = self.attempt(
                    imp,
                    sf,
                    Mode {
                        uninterpreted: &no_names,
                        expand: true,
                        assumptions: Vec::new(),
                        tag: "refined:",
                    },
                )?;
                obligations.extend(full.obligations);
                for w in full.warnings {
                    push_unique(&mut warnings, w);
                }
                match full.verdict {
                    Verdict::Proved => EquivalenceResult::Equivalent,
                    Verdict::Refuted(cex) => EquivalenceResult::NotEquivalent(cex),
                    Verdict::Unconfirmed { obligation, kind, .. } => {
                        EquivalenceResult::Unknown(unconfirmed(obligation, kind))
                    }
                    Verdict::Undecided(u) => EquivalenceResult::Unknown(u),
                }
            }
            Verdict::Unconfirmed { obligation, kind, .. } => EquivalenceResult::Unknown(unconfirmed(obligation, kind)),
            Verdict::Undecided(u) => EquivalenceResult::Unknown(u),
        };

        Ok(EquivalenceOutcome {
            result,
            obligations,
            warnings,
            narrowing: self.predicate.narrowings().to_vec(),
            undefined_reads,
            overrides_applied: first.trace.overrides_applied,
            uninterpreted_used: first.uninterpreted_used,
        })
    }

    /// Fully interpreted re-run with every input restricted to its low
    /// `crosscheck_width` bits.
    fn cross_check(
        &self,
        imp: &Function,
        sf: &SpecFn,
        no_names: &BTreeSet<String>,
        obligations: &mut Vec<ObligationRecord>,
        warnings: &mut Vec<Warning>,
    ) -> Result<EquivalenceResult, VerifyError> {
        let cw = self.crosscheck_width;
        let mut assumptions = Vec::new();
        for (name, sort) in &imp.params {
            if let Sort::BitVec(w) = sort {
                if *w > cw {
                    let high = Term::extract(&Term::var(name.clone(), *sort), w - 1, cw)?;
                    assumptions.push(Term::eq(&high, &Term::bv(0, w - cw)?)?);
                }
            }
        }
        debug!(function = %imp.name, width = cw, "interpreted cross-check");
        let cross = self.attempt(
            imp,
            sf,
            Mode {
                uninterpreted: no_names,
                expand: true,
                assumptions,
                tag: "crosscheck:",
            },
        )?;
        obligations.extend(cross.obligations);
        Ok(match cross.verdict {
            Verdict::Proved => EquivalenceResult::Equivalent,
            Verdict::Refuted(cex) => {
                warn!(function = %imp.name, "cross-check found a counterexample missed under uninterpretation");
                push_unique(
                    warnings,
                    Warning::CrossCheckDisagreement {
                        detail: format!("interpreted run at {} bits is falsified", cw),
                    },
                );
                EquivalenceResult::NotEquivalent(cex)
            }
            Verdict::Unconfirmed { obligation, .. } => EquivalenceResult::Unknown(Undecided::CrossCheck {
                detail: format!("model for {} not reproduced", obligation),
            }),
            Verdict::Undecided(u) => EquivalenceResult::Unknown(Undecided::CrossCheck { detail: u.to_string() }),
        })
    }

    fn attempt(&self, imp: &Function, sf: &SpecFn, mut mode: Mode<'_>) -> Result<Attempt, VerifyError> {
        let inputs: Vec<Term> = imp.params.iter().map(|(n, s)| Term::var(n.clone(), *s)).collect();
        let evaluator = SpecEvaluator::new(self.spec, &self.overrides, mode.uninterpreted);
        let spec_out = evaluator.eval_fn(&sf.name, &inputs)?;
        if let Some(pre) = &self.precondition {
            let results = evaluator.eval_fn(pre, &inputs)?;
            mode.assumptions.push(as_condition(pre, results)?);
        }

        let mut exec = Executor::new(self.program, &self.exec, &self.overrides, mode.uninterpreted, self.oracle);
        exec.set_assumptions(mode.assumptions.clone());
        let mut pending = Vec::new();
        let entry = exec.run(&imp.name, Start::Entry(inputs.clone()))?;
        let widths: Vec<u32> = imp.results.iter().map(Sort::width).collect();
        self.predicate.validate(&widths, &exec.trace().dont_care_regions)?;

        self.cut_phases(imp, &evaluator, &mut exec, &inputs, &mode.assumptions, entry, &mut pending)?;

        let mut warnings = exec.trace().warnings.clone();
        let mut records = Vec::new();
        let mut used = false;
        let mut verdict = Verdict::Proved;
        for p in pending {
            let label = format!("{}{}", mode.tag, p.label);
            let (query, structure, touched) = self.prepare(&label, p.hypotheses, p.goal, &spec_out, &mode)?;
            for w in structure {
                warn!(name = %w.name, detail = %w.detail, "uninterpretation warning");
                push_unique(&mut warnings, Warning::Uninterpretation(w));
            }
            used |= touched;
            let mut roots = query.hypotheses.clone();
            roots.push(query.goal.clone());

            let outcome = self.oracle.check(&query);
            debug!(obligation = %label, outcome = %outcome, "obligation");
            records.push(ObligationRecord {
                label: label.clone(),
                outcome: outcome.to_string(),
            });
            match outcome {
                SmtOutcome::Unsat => {}
                SmtOutcome::Sat(model) => {
                    verdict = match self.replay(imp, sf, &model) {
                        Some(cex) => Verdict::Refuted(cex),
                        None => Verdict::Unconfirmed {
                            obligation: label,
                            kind: p.kind,
                            opaque: is_opaque(&roots),
                        },
                    };
                    break;
                }
                SmtOutcome::Timeout => {
                    verdict = Verdict::Undecided(Undecided::SolverTimeout { obligation: label });
                    break;
                }
                SmtOutcome::Unknown(reason) => {
                    verdict = Verdict::Undecided(Undecided::SolverUnknown {
                        obligation: label,
                        reason,
                    });
                    break;
                }
            }
        }

        Ok(Attempt {
            verdict,
            obligations: records,
            warnings,
            trace: exec.into_trace(),
            uninterpreted_used: used,
        })
    }

    /// Collect obligations from the entry phase and every cut phase it
    /// leads to.
    #[allow(clippy::too_many_arguments)]
    fn cut_phases(
        &self,
        imp: &Function,
        evaluator: &SpecEvaluator<'_>,
        exec: &mut Executor<'_>,
        inputs: &[Term],
        assumptions: &[Term],
        entry: PhaseResult,
        pending: &mut Vec<Pending>,
    ) -> Result<(), VerifyError> {
        let strategy = &self.exec.loop_strategy;
        if let LoopStrategy::CutPoint { invariants, .. } = strategy {
            let cuts = imp.cut_points();
            if let Some(missing) = invariants.keys().find(|c| !cuts.contains(c)) {
                return Err(LoadError::Malformed {
                    function: imp.name.clone(),
                    detail: format!("invariant given for unknown cut point {}", missing),
                }
                .into());
            }
        }

        let mut queue = VecDeque::new();
        let mut started = BTreeSet::new();
        self.collect(imp, evaluator, inputs, None, entry, pending, &mut queue)?;
        while let Some(arrival) = queue.pop_front() {
            let cut = arrival.cut.clone();
            if !started.insert(cut.clone()) {
                continue;
            }
            let live = live_list(imp, &cut)?;
            let mut values = BTreeMap::new();
            for var in &live {
                let sort = arrival.values.get(var).map(Term::sort).ok_or_else(|| LoadError::ValueNotFoundAtCutPoint {
                    function: imp.name.clone(),
                    cut: cut.clone(),
                    var: var.clone(),
                })?;
                values.insert(var.clone(), Term::var(format!("{}.{}", cut, var), sort));
            }
            let assumed = self.invariant(evaluator, &cut, inputs, &live, &values)?;
            let memory = arrival.memory.havoc(format!("{}@cut.{}", imp.name, cut));
            debug!(function = %imp.name, cut = %cut, "resuming at cut point");
            let mut facts = assumptions.to_vec();
            facts.push(assumed.clone());
            exec.set_assumptions(facts);
            let phase = exec.run(
                &imp.name,
                Start::Cut {
                    name: cut.clone(),
                    values,
                    memory,
                },
            )?;
            self.collect(imp, evaluator, inputs, Some((cut.as_str(), assumed)), phase, pending, &mut queue)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        imp: &Function,
        evaluator: &SpecEvaluator<'_>,
        inputs: &[Term],
        from: Option<(&str, Term)>,
        phase: PhaseResult,
        pending: &mut Vec<Pending>,
        queue: &mut VecDeque<CutArrival>,
    ) -> Result<(), VerifyError> {
        let (origin, assumed) = match from {
            Some((cut, inv)) => (format!("@{}", cut), vec![inv]),
            None => (String::new(), Vec::new()),
        };
        let resumed = !assumed.is_empty();
        for (k, ret) in phase.returns.into_iter().enumerate() {
            let mut hypotheses = assumed.clone();
            hypotheses.push(ret.path_condition);
            pending.push(Pending {
                label: format!("output{}#{}", origin, k),
                kind: Kind::Output { resumed },
                hypotheses,
                goal: Goal::Outputs(ret.outputs),
            });
        }
        for (k, arrival) in phase.arrivals.into_iter().enumerate() {
            let live = live_list(imp, &arrival.cut)?;
            let goal = self.invariant(evaluator, &arrival.cut, inputs, &live, &arrival.values)?;
            let mut hypotheses = assumed.clone();
            hypotheses.push(arrival.path_condition.clone());
            let (label, kind) = if resumed {
                (format!("step{}->{}#{}", origin, arrival.cut, k), Kind::Step)
            } else {
                (format!("base:{}#{}", arrival.cut, k), Kind::Base)
            };
            pending.push(Pending {
                label,
                kind,
                hypotheses,
                goal: Goal::Invariant(goal),
            });
            queue.push_back(arrival);
        }
        Ok(())
    }

    /// Invariant of `cut` applied to the inputs and the live values.
    fn invariant(
        &self,
        evaluator: &SpecEvaluator<'_>,
        cut: &str,
        inputs: &[Term],
        live: &[String],
        values: &BTreeMap<String, Term>,
    ) -> Result<Term, VerifyError> {
        let name = self.exec.loop_strategy.invariant(cut).ok_or_else(|| SpecError::UnknownFunction(format!("invariant for {}", cut)))?;
        let mut args = inputs.to_vec();
        for var in live {
            args.push(values.get(var).cloned().ok_or_else(|| LoadError::ValueNotFoundAtCutPoint {
                function: name.to_string(),
                cut: cut.to_string(),
                var: var.clone(),
            })?);
        }
        let results = evaluator.eval_fn(name, &args)?;
        as_condition(name, results)
    }

    /// Simplify one obligation into a query, with the structural warnings
    /// for output obligations and whether any uninterpreted application
    /// took part. The flag is taken before the goal is built, since a goal
    /// over identical applications folds to `true`.
    fn prepare(
        &self,
        label: &str,
        hypotheses: Vec<Term>,
        goal: Goal,
        spec_out: &[Term],
        mode: &Mode<'_>,
    ) -> Result<(Query, Vec<UninterpretationUnsoundnessWarning>, bool), VerifyError> {
        let simplify = |t: &Term| -> Result<Term, VerifyError> {
            let t = if mode.expand {
                self.overrides.expand_all(t)?
            } else {
                t.clone()
            };
            let (t, _) = self.simpset.rewrite(&t)?;
            Ok(uninterpret(&t, mode.uninterpreted, &self.overrides)?)
        };
        let (goal, structure, mut touched) = match goal {
            Goal::Outputs(outputs) => {
                let imp: Vec<Term> = outputs.iter().map(&simplify).collect::<Result<_, _>>()?;
                let spec: Vec<Term> = spec_out.iter().map(&simplify).collect::<Result<_, _>>()?;
                let structure = check_structure(mode.uninterpreted, &imp, &spec);
                let touched = uses_uninterpreted(&imp, mode.uninterpreted) || uses_uninterpreted(&spec, mode.uninterpreted);
                (self.predicate.build(&imp, &spec)?, structure, touched)
            }
            Goal::Invariant(t) => {
                let t = simplify(&t)?;
                let touched = uses_uninterpreted(std::slice::from_ref(&t), mode.uninterpreted);
                (t, Vec::new(), touched)
            }
        };
        let mut query = Query::new(label, goal);
        for h in mode.assumptions.iter().cloned().chain(hypotheses) {
            let h = simplify(&h)?;
            touched |= uses_uninterpreted(std::slice::from_ref(&h), mode.uninterpreted);
            query = query.with_hypothesis(h);
        }
        Ok((query, structure, touched))
    }

    /// Run both sides concretely on the inputs of `model`. Returns a
    /// counterexample only when they really disagree.
    fn replay(&self, imp: &Function, sf: &SpecFn, model: &Assignment) -> Option<Counterexample> {
        let args: Vec<u64> = imp
            .params
            .iter()
            .map(|(n, _)| model.get(n).copied().unwrap_or(0))
            .collect();
        let run = match ConcreteMachine::new(self.program, model)
            .with_overrides(&self.overrides)
            .run(&imp.name, &args)
        {
            Ok(run) => run,
            Err(e) => {
                debug!(error = %e, "implementation replay failed");
                return None;
            }
        };
        let spec_outputs = match eval_spec(self.spec, &sf.name, &args) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "specification replay failed");
                return None;
            }
        };
        if self.predicate.holds_concrete(&run.outputs, &spec_outputs) {
            return None;
        }
        let mut bindings: Assignment = imp.params.iter().map(|(n, _)| n.clone()).zip(args).collect();
        for name in &run.undefined_reads {
            bindings.insert(name.clone(), model.get(name).copied().unwrap_or(0));
        }
        Some(Counterexample {
            bindings,
            impl_outputs: run.outputs,
            spec_outputs,
        })
    }
}

fn check_signatures(imp: &Function, sf: &SpecFn) -> Result<(), VerifyError> {
    if imp.params.len() != sf.params.len() {
        return Err(SpecError::ArityMismatch {
            function: sf.name.clone(),
            expected: imp.params.len(),
            actual: sf.params.len(),
        }
        .into());
    }
    for ((ip, is), (_, ss)) in imp.params.iter().zip(&sf.params) {
        if is != ss {
            return Err(TermError::SortMismatch {
                op: format!("parameter {} of {}", ip, sf.name),
                expected: is.to_string(),
                actual: ss.to_string(),
            }
            .into());
        }
    }
    if imp.results != sf.results {
        return Err(LoadError::ResultShape(format!(
            "{} returns {:?}, {} returns {:?}",
            imp.name, imp.results, sf.name, sf.results
        ))
        .into());
    }
    Ok(())
}

/// Single boolean (or one-bit) result of a predicate function.
pub(crate) fn as_condition(name: &str, mut results: Vec<Term>) -> Result<Term, VerifyError> {
    if results.len() != 1 {
        return Err(SpecError::TupleShape {
            function: name.to_string(),
            expected: 1,
            actual: results.len(),
        }
        .into());
    }
    let r = results.remove(0);
    match r.sort() {
        Sort::Bool => Ok(r),
        Sort::BitVec(1) => Ok(Term::eq(&r, &Term::bv(1, 1)?)?),
        other => Err(SpecError::Opaque {
            function: name.to_string(),
            detail: format!("predicate returns {}, expected bool", other),
        }
        .into()),
    }
}

/// Live variables declared at `cut`, in declaration order.
fn live_list(function: &Function, cut: &str) -> Result<Vec<String>, LoadError> {
    let (block, index) = function.find_cut_point(cut).ok_or_else(|| LoadError::Malformed {
        function: function.name.clone(),
        detail: format!("no cut point named {}", cut),
    })?;
    match function.blocks[block].instructions.get(index) {
        Some(Instruction::CutPoint { live, .. }) => Ok(live.clone()),
        _ => Err(LoadError::Malformed {
            function: function.name.clone(),
            detail: format!("no cut point named {}", cut),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Operand};
    use crate::semantics::smt::{SolverConfig, Z3Oracle};
    use crate::spec::expr::*;
    use crate::term::Op;

    fn bv(w: u32) -> Sort {
        Sort::BitVec(w)
    }

    fn oracle() -> Z3Oracle {
        Z3Oracle::new(SolverConfig::with_timeout_secs(20))
    }

    /// max(a, b) with an optional off-by-one on equal inputs
    fn max_program(bug: bool) -> Program {
        let mut b = FunctionBuilder::new("max").param("a", bv(16)).param("b", bv(16)).result(bv(16));
        b.assign("lt", Op::Ult, vec![Operand::var("a"), Operand::var("b")]);
        b.select("m", Operand::var("lt"), Operand::var("b"), Operand::var("a"));
        if bug {
            b.assign("same", Op::Eq, vec![Operand::var("a"), Operand::var("b")]);
            b.assign("inc", Op::BvAdd, vec![Operand::var("m"), Operand::bv(1, 16)]);
            b.select("m", Operand::var("same"), Operand::var("inc"), Operand::var("m"));
        }
        b.ret(vec![Operand::var("m")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());
        p
    }

    fn max_spec() -> SpecModule {
        let mut m = SpecModule::new();
        m.add(SpecFn::new(
            "max_spec",
            &[("x", bv(16)), ("y", bv(16))],
            &[bv(16)],
            ite(bin(Op::Ule, var("y"), var("x")), var("x"), var("y")),
        ));
        m
    }

    #[test]
    fn test_equivalent_straight_line() {
        let p = max_program(false);
        let s = max_spec();
        let o = oracle();
        let out = EquivalenceChecker::new(&p, &s, &o).check("max", "max_spec").unwrap();
        assert_eq!(out.result, EquivalenceResult::Equivalent);
        assert_eq!(out.obligations.len(), 1);
        assert_eq!(out.obligations[0].outcome, "unsat");
    }

    #[test]
    fn test_counterexample_is_replayed() {
        let p = max_program(true);
        let s = max_spec();
        let o = oracle();
        let out = EquivalenceChecker::new(&p, &s, &o).check("max", "max_spec").unwrap();
        match out.result {
            EquivalenceResult::NotEquivalent(cex) => {
                assert_eq!(cex.bindings["a"], cex.bindings["b"]);
                assert_eq!(cex.impl_outputs[0], cex.spec_outputs[0].wrapping_add(1) & 0xffff);
            }
            other => panic!("expected a counterexample, got {:?}", other),
        }
    }

    #[test]
    fn test_signature_mismatch_rejected() {
        let p = max_program(false);
        let mut s = SpecModule::new();
        s.add(SpecFn::new("narrow", &[("x", bv(8)), ("y", bv(8))], &[bv(8)], var("x")));
        let o = oracle();
        let err = EquivalenceChecker::new(&p, &s, &o).check("max", "narrow").unwrap_err();
        assert_eq!(err.class(), "TermError");
    }

    /// c = 0; i = 0; while i < n { c += 2; cut(n, c, i); i += 1 } return c
    fn twice_program() -> Program {
        let mut b = FunctionBuilder::new("twice").param("n", bv(8)).result(bv(8));
        let head = b.new_block("head");
        let body = b.new_block("body");
        let exit = b.new_block("exit");
        b.copy("c", Operand::bv(0, 8), 8);
        b.copy("i", Operand::bv(0, 8), 8);
        b.jump(head);
        b.switch_to(head);
        b.assign("go", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
        b.branch(Operand::var("go"), body, exit);
        b.switch_to(body);
        b.assign("c", Op::BvAdd, vec![Operand::var("c"), Operand::bv(2, 8)]);
        b.cut_point("inv", &["n", "c", "i"]);
        b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, 8)]);
        b.jump(head);
        b.switch_to(exit);
        b.ret(vec![Operand::var("c")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());
        p
    }

    fn twice_spec(strong: bool) -> SpecModule {
        let mut m = SpecModule::new();
        m.add(SpecFn::new("twice_spec", &[("n", bv(8))], &[bv(8)], bin(Op::BvMul, var("n"), lit(2, 8))));
        let i1 = bin(Op::BvAdd, var("i"), lit(1, 8));
        let mut inv = bin(
            Op::And,
            bin(Op::Eq, var("n"), var("n0")),
            bin(Op::Eq, var("c"), bin(Op::BvMul, i1, lit(2, 8))),
        );
        if strong {
            inv = bin(Op::And, inv, bin(Op::Ult, var("i"), var("n")));
        }
        m.add(SpecFn::new(
            "twice_inv",
            &[("n0", bv(8)), ("n", bv(8)), ("c", bv(8)), ("i", bv(8))],
            &[Sort::Bool],
            inv,
        ));
        m
    }

    fn cut_config() -> ExecConfig {
        ExecConfig::default().with_loop_strategy(LoopStrategy::cut_points([("inv", "twice_inv")]))
    }

    #[test]
    fn test_cut_point_invariant_proves_loop() {
        let p = twice_program();
        let s = twice_spec(true);
        let o = oracle();
        let out = EquivalenceChecker::new(&p, &s, &o)
            .with_exec_config(cut_config())
            .check("twice", "twice_spec")
            .unwrap();
        assert_eq!(out.result, EquivalenceResult::Equivalent);
        let labels: Vec<_> = out.obligations.iter().map(|r| r.label.as_str()).collect();
        assert!(labels.iter().any(|l| l.starts_with("base:inv")));
        assert!(labels.iter().any(|l| l.starts_with("step@inv->inv")));
        assert!(labels.iter().any(|l| l.starts_with("output@inv")));
    }

    #[test]
    fn test_weak_invariant_is_not_inductive() {
        let p = twice_program();
        let s = twice_spec(false);
        let o = oracle();
        let out = EquivalenceChecker::new(&p, &s, &o)
            .with_exec_config(cut_config())
            .check("twice", "twice_spec")
            .unwrap();
        assert!(matches!(
            out.result,
            EquivalenceResult::Unknown(Undecided::NotInductive { .. })
        ));
    }

    #[test]
    fn test_unroll_without_cut_is_load_error() {
        let p = twice_program();
        let s = twice_spec(true);
        let o = oracle();
        let err = EquivalenceChecker::new(&p, &s, &o)
            .with_exec_config(ExecConfig::default().with_loop_strategy(LoopStrategy::unroll(4)))
            .check("twice", "twice_spec")
            .unwrap_err();
        assert!(matches!(err, VerifyError::Load(LoadError::UnboundedLoop { .. })));
    }

    fn mix_program() -> Program {
        let mut mix = FunctionBuilder::new("mix").param("x", bv(32)).result(bv(32));
        mix.assign("y", Op::BvMul, vec![Operand::var("x"), Operand::bv(0x45d9f3b, 32)]);
        mix.ret(vec![Operand::var("y")]);
        let mut top = FunctionBuilder::new("mix2").param("a", bv(32)).param("b", bv(32)).result(bv(32));
        top.call(&["p"], "mix", vec![Operand::var("a")]);
        top.call(&["q"], "mix", vec![Operand::var("b")]);
        top.assign("r", Op::BvXor, vec![Operand::var("p"), Operand::var("q")]);
        top.ret(vec![Operand::var("r")]);
        let mut p = Program::new();
        p.add_function(mix.build().unwrap());
        p.add_function(top.build().unwrap());
        p
    }

    fn mix_spec(swap: bool) -> SpecModule {
        let mut m = SpecModule::new();
        m.add(SpecFn::new("mix", &[("x", bv(32))], &[bv(32)], bin(Op::BvMul, var("x"), lit(0x45d9f3b, 32))));
        let (l, r) = if swap { ("b", "a") } else { ("a", "b") };
        m.add(SpecFn::new(
            "mix2_spec",
            &[("a", bv(32)), ("b", bv(32))],
            &[bv(32)],
            bin(Op::BvXor, call("mix", vec![var(l)]), call("mix", vec![var(r)])),
        ));
        m
    }

    #[test]
    fn test_uninterpreted_proof_is_cross_checked() {
        let p = mix_program();
        let s = mix_spec(true);
        let o = oracle();
        let names: BTreeSet<String> = ["mix".to_string()].into_iter().collect();
        let out = EquivalenceChecker::new(&p, &s, &o)
            .with_uninterpreted(names)
            .check("mix2", "mix2_spec")
            .unwrap();
        assert_eq!(out.result, EquivalenceResult::Equivalent);
        assert!(out.uninterpreted_used);
        assert!(out.obligations.iter().any(|r| r.label.starts_with("crosscheck:")));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_uninterpreted_proof_with_different_bodies_is_refuted() {
        // `mix` means x * K in the program and x + K in the specification;
        // with `mix` uninterpreted both sides are the same term.
        let p = mix_program();
        let mut s = SpecModule::new();
        s.add(SpecFn::new("mix", &[("x", bv(32))], &[bv(32)], bin(Op::BvAdd, var("x"), lit(0x45d9f3b, 32))));
        s.add(SpecFn::new(
            "mix2_spec",
            &[("a", bv(32)), ("b", bv(32))],
            &[bv(32)],
            bin(Op::BvXor, call("mix", vec![var("a")]), call("mix", vec![var("b")])),
        ));
        let o = oracle();
        let names: BTreeSet<String> = ["mix".to_string()].into_iter().collect();
        let out = EquivalenceChecker::new(&p, &s, &o)
            .with_uninterpreted(names)
            .check("mix2", "mix2_spec")
            .unwrap();
        assert!(out.uninterpreted_used);
        assert!(matches!(out.result, EquivalenceResult::NotEquivalent(_)), "{:?}", out.result);
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::CrossCheckDisagreement { .. })));
        if let EquivalenceResult::NotEquivalent(cex) = &out.result {
            assert_ne!(cex.impl_outputs, cex.spec_outputs);
        }
    }

    #[test]
    fn test_mismatched_application_positions_warn() {
        // mix(a + b) against mix(a) + mix(b): true for a linear mix, but the
        // uninterpreted applications do not line up.
        let mut mix = FunctionBuilder::new("mix").param("x", bv(32)).result(bv(32));
        mix.assign("y", Op::BvMul, vec![Operand::var("x"), Operand::bv(0x45d9f3b, 32)]);
        mix.ret(vec![Operand::var("y")]);
        let mut top = FunctionBuilder::new("mix_sum").param("a", bv(32)).param("b", bv(32)).result(bv(32));
        top.assign("s", Op::BvAdd, vec![Operand::var("a"), Operand::var("b")]);
        top.call(&["r"], "mix", vec![Operand::var("s")]);
        top.ret(vec![Operand::var("r")]);
        let mut p = Program::new();
        p.add_function(mix.build().unwrap());
        p.add_function(top.build().unwrap());

        let mut s = SpecModule::new();
        s.add(SpecFn::new("mix", &[("x", bv(32))], &[bv(32)], bin(Op::BvMul, var("x"), lit(0x45d9f3b, 32))));
        s.add(SpecFn::new(
            "mix_sum_spec",
            &[("a", bv(32)), ("b", bv(32))],
            &[bv(32)],
            bin(Op::BvAdd, call("mix", vec![var("a")]), call("mix", vec![var("b")])),
        ));
        let o = oracle();
        let names: BTreeSet<String> = ["mix".to_string()].into_iter().collect();
        let out = EquivalenceChecker::new(&p, &s, &o)
            .with_uninterpreted(names)
            .check("mix_sum", "mix_sum_spec")
            .unwrap();
        assert!(out.warnings.iter().any(|w| matches!(
            w,
            Warning::Uninterpretation(u) if u.name == "mix" && u.detail.contains("one side only")
        )));
        assert!(!matches!(out.result, EquivalenceResult::NotEquivalent(_)), "{:?}", out.result);
    }

    #[test]
    fn test_precondition_restricts_inputs() {
        let mut b = FunctionBuilder::new("ident").param("x", bv(8)).result(bv(8));
        b.ret(vec![Operand::var("x")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());
        let mut s = SpecModule::new();
        s.add(SpecFn::new("set_low", &[("x", bv(8))], &[bv(8)], bin(Op::BvOr, var("x"), lit(1, 8))));
        s.add(SpecFn::new(
            "odd",
            &[("x", bv(8))],
            &[bv(1)],
            prim(Op::Extract { hi: 0, lo: 0 }, vec![var("x")]),
        ));
        let o = oracle();
        let plain = EquivalenceChecker::new(&p, &s, &o).check("ident", "set_low").unwrap();
        assert!(matches!(plain.result, EquivalenceResult::NotEquivalent(_)));
        let guarded = EquivalenceChecker::new(&p, &s, &o)
            .with_precondition(Some("odd".into()))
            .check("ident", "set_low")
            .unwrap();
        assert_eq!(guarded.result, EquivalenceResult::Equivalent);
    }
}
