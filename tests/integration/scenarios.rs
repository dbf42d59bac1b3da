//! End-to-end runs of the built-in experiments through the scheduler.

use std::sync::Arc;

use symequiv::experiments::{self, Experiment, ExperimentRun};
use symequiv::ir::{FunctionBuilder, Operand, Program};
use symequiv::proof::{LemmaProof, ProofCache};
use symequiv::scheduler::{
    BatchResult, InconclusiveReason, ProofMode, Scheduler, SchedulerConfig, Status, VerificationJob, Workspace,
};
use symequiv::spec::expr::{bin, lit, var};
use symequiv::spec::{SpecFn, SpecModule};
use symequiv::term::{Op, Sort};
use symequiv::validation::SamplingConfig;

fn config() -> SchedulerConfig {
    SchedulerConfig::default().with_workers(2)
}

fn run(exp: Experiment) -> ExperimentRun {
    exp.run(Arc::new(ProofCache::new()), &config())
        .expect("batch should be accepted")
}

fn status(run: &ExperimentRun, job: &str) -> Status {
    run.batch
        .report(job)
        .unwrap_or_else(|| panic!("no report for {}", job))
        .status
}

#[test]
fn test_ffs_binary_search_verified() {
    let exp = experiments::ffs::experiment().unwrap().only("ffs_imp");
    let run = run(exp);
    let report = run.batch.report("ffs_imp").unwrap();
    assert_eq!(report.status, Status::Verified, "{}", report);
    assert!(report.proof_token.is_some());
}

#[test]
fn test_ffs_seeded_bug_falsified() {
    let exp = experiments::ffs::experiment().unwrap().only("ffs_bug");
    let run = run(exp);
    let report = run.batch.report("ffs_bug").unwrap();
    assert_eq!(report.status, Status::Falsified, "{}", report);
    let cex = report.counterexample.as_ref().expect("falsified report carries a counterexample");
    assert_eq!(cex.bindings.get("word"), Some(&experiments::ffs::BUG_INPUT));
    assert_eq!(cex.impl_outputs, vec![4]);
    assert_eq!(cex.spec_outputs, vec![5]);
}

#[test]
fn test_ffs_table_lookup_verified() {
    let exp = experiments::ffs::experiment().unwrap().only("ffs_debruijn");
    let run = run(exp);
    assert_eq!(status(&run, "ffs_debruijn"), Status::Verified);
}

#[test]
fn test_feal_round_trip_over_overrides() {
    let exp = experiments::feal::experiment().unwrap().only("feal_roundtrip");
    let run = run(exp);
    for job in ["feal_s0", "feal_s1", "feal_f", "feal_fk", "feal_roundtrip"] {
        assert_eq!(status(&run, job), Status::Verified, "{}", job);
    }
    let report = run.batch.report("feal_roundtrip").unwrap();
    assert!(report.overrides_applied.contains("feal_f"));
    assert!(report.overrides_applied.contains("feal_fk"));
}

#[test]
fn test_feal_make_h1_narrowed() {
    let exp = experiments::feal::experiment().unwrap().only("feal_make_h1");
    let run = run(exp);
    let report = run.batch.report("feal_make_h1").unwrap();
    assert_eq!(report.status, Status::Verified, "{}", report);
    assert_eq!(report.narrowing.len(), 1);
    assert!(!report.undefined_reads.is_empty());
}

#[test]
fn test_missing_live_value_is_load_error() {
    let exp = experiments::loops::experiment().unwrap().only("accumulate_missing");
    let run = run(exp);
    let report = run.batch.report("accumulate_missing").unwrap();
    assert_eq!(report.status, Status::Inconclusive);
    assert_eq!(
        report.reason,
        Some(InconclusiveReason::Error {
            class: "LoadError".to_string()
        })
    );
    assert!(report.diagnostic.as_deref().unwrap_or("").contains("acc"));
}

#[test]
fn test_loop_invariants_verified() {
    let run = run(experiments::loops::experiment().unwrap());
    for job in ["add2", "count_n", "accumulate", "popcount8"] {
        assert_eq!(status(&run, job), Status::Verified, "{}", job);
    }
    assert_eq!(status(&run, "accumulate_missing"), Status::Inconclusive);
}

#[test]
fn test_hash_override_and_uninterpretation() {
    let run = run(experiments::hash::experiment().unwrap());
    assert_eq!(status(&run, "complex_hash"), Status::Verified);

    let twice = run.batch.report("hash_twice").unwrap();
    assert_eq!(twice.status, Status::Verified, "{}", twice);
    assert!(twice.overrides_applied.contains("complex_hash"));

    let pair = run.batch.report("hash_pair").unwrap();
    assert_eq!(pair.status, Status::Verified, "{}", pair);
    assert!(pair.obligations.iter().any(|o| o.label.starts_with("crosscheck:")));
}

/// Clear the override list of `job`, so its callees are inlined.
fn without_overrides(mut exp: Experiment, job: &str) -> Experiment {
    for j in exp.jobs.iter_mut().filter(|j| j.name == job) {
        j.overrides.clear();
    }
    exp
}

#[test]
fn test_override_verdict_matches_inlining() {
    let exp = experiments::hash::experiment().unwrap().only("hash_twice");
    let summarized = run(exp.clone());
    let inlined = run(without_overrides(exp, "hash_twice"));

    let with = summarized.batch.report("hash_twice").unwrap();
    let without = inlined.batch.report("hash_twice").unwrap();
    assert_eq!(with.status, Status::Verified, "{}", with);
    assert_eq!(with.status, without.status, "{}", without);
    assert!(with.overrides_applied.contains("complex_hash"));
    assert!(without.overrides_applied.is_empty());
}

/// `step` adds 2 and is proved against its own specification; the caller's
/// specification expects the pair of calls to add 2 in total.
fn stepper() -> Arc<Workspace> {
    let w = Sort::BitVec(16);
    let mut step = FunctionBuilder::new("step").param("x", w).result(w);
    step.assign("y", Op::BvAdd, vec![Operand::var("x"), Operand::bv(2, 16)]);
    step.ret(vec![Operand::var("y")]);
    let mut top = FunctionBuilder::new("step_twice").param("x", w).result(w);
    top.call(&["a"], "step", vec![Operand::var("x")]);
    top.call(&["b"], "step", vec![Operand::var("a")]);
    top.ret(vec![Operand::var("b")]);
    let mut program = Program::new();
    program.add_function(step.build().unwrap());
    program.add_function(top.build().unwrap());

    let mut spec = SpecModule::new();
    spec.add(SpecFn::new("step_spec", &[("x", w)], &[w], bin(Op::BvAdd, var("x"), lit(2, 16))));
    spec.add(SpecFn::new("step_twice_spec", &[("x", w)], &[w], bin(Op::BvAdd, var("x"), lit(2, 16))));
    Workspace::new(program, spec)
}

fn schedule(workspace: Arc<Workspace>, jobs: Vec<VerificationJob>) -> BatchResult {
    Scheduler::new(workspace, Arc::new(ProofCache::new()), config())
        .run(jobs)
        .expect("batch should be accepted")
}

#[test]
fn test_faulty_callee_falsified_with_and_without_override() {
    let summarized = schedule(
        stepper(),
        vec![
            VerificationJob::new("step", "step", "step_spec"),
            VerificationJob::new("step_twice", "step_twice", "step_twice_spec").with_overrides(["step"]),
        ],
    );
    let inlined = schedule(
        stepper(),
        vec![VerificationJob::new("step_twice", "step_twice", "step_twice_spec")],
    );

    assert_eq!(summarized.report("step").unwrap().status, Status::Verified);
    let with = summarized.report("step_twice").unwrap();
    let without = inlined.report("step_twice").unwrap();
    assert_eq!(with.status, Status::Falsified, "{}", with);
    assert_eq!(without.status, Status::Falsified, "{}", without);
    assert!(with.overrides_applied.contains("step"));
    for report in [with, without] {
        let cex = report.counterexample.as_ref().unwrap();
        assert_eq!(cex.impl_outputs[0], (cex.spec_outputs[0] + 2) & 0xffff);
    }
}

#[test]
fn test_rerun_with_shared_cache_is_free() {
    let cache = Arc::new(ProofCache::new());
    let exp = experiments::hash::experiment().unwrap();
    let first = exp.run(Arc::clone(&cache), &config()).unwrap();
    assert!(first.batch.solver_calls > 0);

    let second = exp.run(Arc::clone(&cache), &config()).unwrap();
    assert_eq!(second.batch.solver_calls, 0);
    for (a, b) in first.batch.reports.iter().zip(&second.batch.reports) {
        assert_eq!(a.job, b.job);
        assert_eq!(a.status, b.status);
        assert_eq!(a.proof_token, b.proof_token);
    }
}

#[test]
fn test_sha1_rounds_with_lemmas() {
    let run = run(experiments::sha1::experiment().unwrap());
    assert_eq!(run.lemmas.len(), 2);
    for (name, proof) in &run.lemmas {
        assert!(matches!(proof, LemmaProof::Proved(_)), "{}: {:?}", name, proof);
    }
    for job in ["sha1_ch", "sha1_round_ch", "sha1_rounds4"] {
        assert_eq!(status(&run, job), Status::Verified, "{}", job);
    }
}

#[test]
fn test_sampling_never_verifies() {
    let exp = experiments::ffs::experiment()
        .unwrap()
        .with_mode(ProofMode::Sampling)
        .with_sampling(SamplingConfig::default().with_samples(64));
    let run = run(exp);
    assert_eq!(run.batch.count(Status::Verified), 0);
    let report = run.batch.report("ffs_imp").unwrap();
    assert!(matches!(report.reason, Some(InconclusiveReason::NonExhaustive { .. })));
    assert!(report.sampling.is_some());
}

#[test]
fn test_zero_deadline_cancels_batch() {
    let exp = experiments::loops::experiment().unwrap();
    let config = config().with_deadline(std::time::Duration::ZERO);
    let run = exp.run(Arc::new(ProofCache::new()), &config).unwrap();
    assert_eq!(run.batch.count(Status::Verified), 0);
    assert!(run
        .batch
        .reports
        .iter()
        .all(|r| r.reason == Some(InconclusiveReason::Cancelled)));
}

fn retain(mut exp: Experiment, names: &[&str]) -> Experiment {
    exp.jobs.retain(|j| names.contains(&j.name.as_str()));
    exp
}

#[test]
fn test_aes_byte_steps_verified() {
    let names = [
        "aes_sbox_roundtrip",
        "aes_shift_rows",
        "aes_inv_shift_rows",
        "aes_shift_rows_roundtrip",
        "aes_add_round_key",
        "aes_add_round_key_twice",
    ];
    let run = run(retain(experiments::aes::experiment().unwrap(), &names));
    for job in names {
        assert_eq!(status(&run, job), Status::Verified, "{}", job);
    }
}

#[test]
fn test_aes_cipher_round_trips_sampled() {
    let names = ["aes_round_roundtrip", "aes_encrypt", "aes_encrypt_roundtrip"];
    let run = run(retain(experiments::aes::experiment().unwrap(), &names));
    assert_eq!(run.batch.count(Status::Falsified), 0);
    for job in names {
        let report = run.batch.report(job).unwrap();
        assert_eq!(report.status, Status::Inconclusive, "{}", report);
        assert!(
            matches!(report.reason, Some(InconclusiveReason::NonExhaustive { samples }) if samples > 0),
            "{}",
            report
        );
    }
}
