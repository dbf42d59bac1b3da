//! Concrete sampling of both sides: the non-exhaustive fallback when a
//! symbolic proof is off or out of budget.

use crate::proof::overrides::OverrideSet;
use crate::semantics::concrete::ConcreteMachine;
use crate::semantics::equivalence::Counterexample;
use crate::semantics::state::EquivalencePredicate;
use crate::spec::{eval_spec, SpecModule};
use crate::ir::Program;
use crate::term::{Assignment, Sort};
use crate::validation::random::{generate_inputs, SamplingConfig};
use serde::Serialize;
use tracing::debug;

/// Pass/fail tally of a sampling run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplingSummary {
    pub samples: usize,
    pub passed: usize,
    pub failed: usize,
    /// Inputs outside the precondition, or on which either side failed to
    /// evaluate
    pub discarded: usize,
}

/// Tally plus the first failing input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingOutcome {
    pub summary: SamplingSummary,
    pub counterexample: Option<Counterexample>,
}

/// Samples one implementation against one specification.
pub struct Sampler<'a> {
    program: &'a Program,
    spec: &'a SpecModule,
    overrides: Option<&'a OverrideSet>,
    predicate: &'a EquivalencePredicate,
    precondition: Option<&'a str>,
}

impl<'a> Sampler<'a> {
    pub fn new(program: &'a Program, spec: &'a SpecModule, predicate: &'a EquivalencePredicate) -> Self {
        Sampler {
            program,
            spec,
            overrides: None,
            predicate,
            precondition: None,
        }
    }

    /// Let body-less callees run through their override closed forms.
    pub fn with_overrides(mut self, overrides: &'a OverrideSet) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Discard inputs on which this boolean specification function is false.
    pub fn with_precondition(mut self, name: Option<&'a str>) -> Self {
        self.precondition = name;
        self
    }

    pub fn run(&self, implementation: &str, specification: &str, params: &[Sort], config: &SamplingConfig) -> SamplingOutcome {
        let undef = Assignment::new();
        let mut machine = ConcreteMachine::new(self.program, &undef);
        if let Some(ov) = self.overrides {
            machine = machine.with_overrides(ov);
        }

        let mut summary = SamplingSummary::default();
        let mut counterexample = None;
        for args in generate_inputs(config, params) {
            summary.samples += 1;
            if let Some(pre) = self.precondition {
                match eval_spec(self.spec, pre, &args) {
                    Ok(v) if v.first().copied().unwrap_or(0) != 0 => {}
                    _ => {
                        summary.discarded += 1;
                        continue;
                    }
                }
            }
            let run = match machine.run(implementation, &args) {
                Ok(run) => run,
                Err(e) => {
                    debug!(error = %e, "sample discarded");
                    summary.discarded += 1;
                    continue;
                }
            };
            let expected = match eval_spec(self.spec, specification, &args) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "sample discarded");
                    summary.discarded += 1;
                    continue;
                }
            };
            if self.predicate.holds_concrete(&run.outputs, &expected) {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                if counterexample.is_none() {
                    let mut bindings: Assignment = self
                        .program
                        .function(implementation)
                        .map(|f| f.params.iter().map(|(n, _)| n.clone()).zip(args.iter().copied()).collect())
                        .unwrap_or_default();
                    for name in &run.undefined_reads {
                        bindings.insert(name.clone(), 0);
                    }
                    counterexample = Some(Counterexample {
                        bindings,
                        impl_outputs: run.outputs,
                        spec_outputs: expected,
                    });
                }
            }
        }
        SamplingOutcome {
            summary,
            counterexample,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Operand};
    use crate::spec::expr::*;
    use crate::spec::SpecFn;
    use crate::term::Op;

    fn clear_low(bug_at: Option<u64>) -> (Program, SpecModule) {
        // x & (x - 1), optionally wrong on one input
        let mut b = FunctionBuilder::new("clear_low").param("x", Sort::BitVec(8)).result(Sort::BitVec(8));
        b.assign("m", Op::BvSub, vec![Operand::var("x"), Operand::bv(1, 8)]);
        b.assign("r", Op::BvAnd, vec![Operand::var("x"), Operand::var("m")]);
        if let Some(v) = bug_at {
            b.assign("hit", Op::Eq, vec![Operand::var("x"), Operand::bv(v, 8)]);
            b.select("r", Operand::var("hit"), Operand::bv(0x42, 8), Operand::var("r"));
        }
        b.ret(vec![Operand::var("r")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());
        let mut s = SpecModule::new();
        s.add(SpecFn::new(
            "clear_low_spec",
            &[("x", Sort::BitVec(8))],
            &[Sort::BitVec(8)],
            bin(Op::BvAnd, var("x"), bin(Op::BvSub, var("x"), lit(1, 8))),
        ));
        (p, s)
    }

    #[test]
    fn test_all_samples_pass() {
        let (p, s) = clear_low(None);
        let pred = EquivalencePredicate::full();
        let config = SamplingConfig::default().with_samples(50);
        let out = Sampler::new(&p, &s, &pred).run("clear_low", "clear_low_spec", &[Sort::BitVec(8)], &config);
        assert_eq!(out.summary.failed, 0);
        assert_eq!(out.summary.passed, out.summary.samples);
        assert!(out.counterexample.is_none());
    }

    #[test]
    fn test_edge_case_failure_reported() {
        let (p, s) = clear_low(Some(0xff));
        let pred = EquivalencePredicate::full();
        let config = SamplingConfig::default().with_samples(10);
        let out = Sampler::new(&p, &s, &pred).run("clear_low", "clear_low_spec", &[Sort::BitVec(8)], &config);
        assert!(out.summary.failed >= 1);
        let cex = out.counterexample.unwrap();
        assert_eq!(cex.bindings["x"], 0xff);
        assert_eq!(cex.impl_outputs, vec![0x42]);
    }

    #[test]
    fn test_precondition_discards() {
        let (p, mut s) = clear_low(Some(0x00));
        s.add(SpecFn::new(
            "nonzero",
            &[("x", Sort::BitVec(8))],
            &[Sort::Bool],
            prim(Op::Not, vec![bin(Op::Eq, var("x"), lit(0, 8))]),
        ));
        let pred = EquivalencePredicate::full();
        let config = SamplingConfig::default().with_samples(30);
        let out = Sampler::new(&p, &s, &pred)
            .with_precondition(Some("nonzero"))
            .run("clear_low", "clear_low_spec", &[Sort::BitVec(8)], &config);
        assert!(out.summary.discarded >= 1);
        assert_eq!(out.summary.failed, 0);
    }
}
