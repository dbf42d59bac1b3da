//! SMT backend adapter: term translation to Z3 and isolated query execution
//!
//! Every query runs on its own thread, which owns its own Z3 context, and
//! reports back over a channel. A wall-clock bound on the receive side keeps
//! a stuck solver from blocking the caller; a panic inside the solver thread
//! surfaces as a disconnected channel.

use crate::term::{visit, Assignment, Op, Sort, Term, TermNode};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use z3::ast::{Bool, BV};
use z3::{FuncDecl, Params, SatResult, Solver};

/// Stack size of solver threads; translation recurses over term depth.
const SOLVER_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Extra wall-clock allowance on top of the solver's own timeout.
const GRACE: Duration = Duration::from_secs(1);

/// How often a waiting caller re-checks the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the SMT solver
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Timeout for SMT solving (None means no timeout)
    pub timeout: Option<Duration>,
    /// Once set, pending queries are abandoned and new ones are not started
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            cancel: None,
        }
    }
}

impl SolverConfig {
    /// Create a config with no timeout
    pub fn no_timeout() -> Self {
        Self {
            timeout: None,
            cancel: None,
        }
    }

    /// Create a config with a specific timeout in seconds
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: Some(Duration::from_secs(secs)),
            cancel: None,
        }
    }

    /// Create a config with a specific timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Abandon queries once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::SeqCst))
    }
}

/// Create a Z3 solver with the given configuration
pub fn create_solver_with_config(cfg: &SolverConfig) -> Solver {
    let solver = Solver::new();
    if let Some(timeout) = cfg.timeout {
        let mut params = Params::new();
        params.set_u32("timeout", timeout.as_millis().min(u32::MAX as u128) as u32);
        solver.set_params(&params);
    }
    solver
}

/// A validity question: do the hypotheses entail the goal?
///
/// The solver is asked for a model of `hypotheses ∧ ¬goal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub label: String,
    pub hypotheses: Vec<Term>,
    pub goal: Term,
}

impl Query {
    pub fn new(label: impl Into<String>, goal: Term) -> Self {
        Query {
            label: label.into(),
            hypotheses: Vec::new(),
            goal,
        }
    }

    pub fn with_hypothesis(mut self, hypothesis: Term) -> Self {
        if !hypothesis.is_true() {
            self.hypotheses.push(hypothesis);
        }
        self
    }

    /// Answer decided by constant folding alone, if any.
    pub fn decided(&self) -> Option<bool> {
        if self.goal.is_true() || self.hypotheses.iter().any(Term::is_false) {
            return Some(true);
        }
        if self.goal.is_false() && self.hypotheses.iter().all(Term::is_true) {
            return Some(false);
        }
        None
    }

    /// Free variables and undefined cells, by name.
    pub fn leaves(&self) -> BTreeMap<String, Sort> {
        let mut roots = self.hypotheses.clone();
        roots.push(self.goal.clone());
        let mut out = BTreeMap::new();
        visit(&roots, |t| {
            if let TermNode::Var(name) | TermNode::Undef { name, .. } = t.node() {
                out.insert(name.clone(), t.sort());
            }
        });
        out
    }
}

/// Solver verdict on a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtOutcome {
    /// The goal holds under the hypotheses.
    Unsat,
    /// Bindings for every leaf of the query falsifying the goal.
    Sat(Assignment),
    Timeout,
    Unknown(String),
}

impl fmt::Display for SmtOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtOutcome::Unsat => write!(f, "unsat"),
            SmtOutcome::Sat(_) => write!(f, "sat"),
            SmtOutcome::Timeout => write!(f, "timeout"),
            SmtOutcome::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

/// Anything that can decide queries. The executor and obligation checker
/// only see this trait.
pub trait Oracle: Send + Sync {
    fn check(&self, query: &Query) -> SmtOutcome;
}

/// Z3-backed oracle. Each call counts toward `calls` unless folding already
/// decided the query.
#[derive(Debug, Clone, Default)]
pub struct Z3Oracle {
    config: SolverConfig,
    calls: Arc<AtomicU64>,
}

impl Z3Oracle {
    pub fn new(config: SolverConfig) -> Self {
        Z3Oracle {
            config,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Share an invocation counter (the proof cache's).
    pub fn with_counter(mut self, calls: Arc<AtomicU64>) -> Self {
        self.calls = calls;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Oracle for Z3Oracle {
    fn check(&self, query: &Query) -> SmtOutcome {
        match query.decided() {
            Some(true) => return SmtOutcome::Unsat,
            Some(false) if query.leaves().is_empty() => return SmtOutcome::Sat(Assignment::new()),
            _ => {}
        }
        if self.config.is_cancelled() {
            return SmtOutcome::Timeout;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        check_isolated(query, &self.config)
    }
}

/// Run `query` on a dedicated solver thread.
///
/// The caller waits at most the configured timeout plus a grace period, and
/// gives up as soon as the cancellation flag is raised. An abandoned solver
/// thread runs to its own timeout in the background.
pub fn check_isolated(query: &Query, cfg: &SolverConfig) -> SmtOutcome {
    if cfg.is_cancelled() {
        return SmtOutcome::Timeout;
    }
    let (tx, rx) = bounded(1);
    let owned = query.clone();
    let config = cfg.clone();
    let spawned = thread::Builder::new()
        .name(format!("smt-{}", query.label))
        .stack_size(SOLVER_STACK_SIZE)
        .spawn(move || {
            let outcome = solve(&owned, &config);
            let _ = tx.send(outcome);
        });
    if let Err(e) = spawned {
        warn!(label = %query.label, error = %e, "could not spawn solver thread");
        return SmtOutcome::Unknown(format!("solver thread: {}", e));
    }

    let started = Instant::now();
    let bound = cfg.timeout.map(|t| t + GRACE);
    let outcome = loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(o) => break o,
            Err(RecvTimeoutError::Disconnected) => break SmtOutcome::Unknown("solver crashed".to_string()),
            Err(RecvTimeoutError::Timeout) => {
                if cfg.is_cancelled() {
                    debug!(label = %query.label, "query abandoned, batch cancelled");
                    break SmtOutcome::Timeout;
                }
                if bound.is_some_and(|b| started.elapsed() >= b) {
                    break SmtOutcome::Timeout;
                }
            }
        }
    };
    debug!(label = %query.label, outcome = %outcome, elapsed_ms = started.elapsed().as_millis() as u64, "smt query");
    outcome
}

/// Translate and solve on the current thread.
pub fn solve(query: &Query, cfg: &SolverConfig) -> SmtOutcome {
    let solver = create_solver_with_config(cfg);
    let mut tr = Translator::default();
    for h in &query.hypotheses {
        match tr.bool(h) {
            Some(b) => solver.assert(&b),
            None => return SmtOutcome::Unknown(format!("untranslatable hypothesis {}", h)),
        }
    }
    match tr.bool(&query.goal) {
        Some(g) => solver.assert(&g.not()),
        None => return SmtOutcome::Unknown(format!("untranslatable goal {}", query.goal)),
    }

    match solver.check() {
        SatResult::Unsat => SmtOutcome::Unsat,
        SatResult::Sat => {
            let Some(model) = solver.get_model() else {
                return SmtOutcome::Unknown("sat without model".to_string());
            };
            let mut bindings = Assignment::new();
            for (name, sort) in query.leaves() {
                let value = match tr.leaf(&name, sort) {
                    Z3Term::Bool(b) => model.eval(&b, true).and_then(|v| v.as_bool()).map(|v| v as u64),
                    Z3Term::Bv(v) => model.eval(&v, true).and_then(|v| v.as_u64()),
                };
                bindings.insert(name, value.unwrap_or(0));
            }
            SmtOutcome::Sat(bindings)
        }
        SatResult::Unknown => {
            let reason = solver.get_reason_unknown().unwrap_or_else(|| "unknown".to_string());
            if reason.contains("timeout") || reason.contains("canceled") {
                SmtOutcome::Timeout
            } else {
                SmtOutcome::Unknown(reason)
            }
        }
    }
}

#[derive(Clone)]
enum Z3Term {
    Bool(Bool),
    Bv(BV),
}

/// Memoized term-to-Z3 translation. Opaque applications become
/// uninterpreted functions keyed by name and signature.
#[derive(Default)]
struct Translator {
    memo: HashMap<u64, Z3Term>,
    funcs: HashMap<(String, Vec<Sort>, Sort), FuncDecl>,
}

fn z3_sort(sort: Sort) -> z3::Sort {
    match sort {
        Sort::Bool => z3::Sort::bool(),
        Sort::BitVec(w) => z3::Sort::bitvector(w),
    }
}

impl Translator {
    fn bool(&mut self, term: &Term) -> Option<Bool> {
        match self.translate(term)? {
            Z3Term::Bool(b) => Some(b),
            Z3Term::Bv(_) => None,
        }
    }

    fn bv(&mut self, term: &Term) -> Option<BV> {
        match self.translate(term)? {
            Z3Term::Bv(v) => Some(v),
            Z3Term::Bool(_) => None,
        }
    }

    fn leaf(&self, name: &str, sort: Sort) -> Z3Term {
        match sort {
            Sort::Bool => Z3Term::Bool(Bool::new_const(name)),
            Sort::BitVec(w) => Z3Term::Bv(BV::new_const(name, w)),
        }
    }

    fn apply_opaque(&mut self, key: String, args: &[Term], sort: Sort) -> Option<Z3Term> {
        let mut translated = Vec::with_capacity(args.len());
        for a in args {
            translated.push(self.translate(a)?);
        }
        let domain: Vec<Sort> = args.iter().map(Term::sort).collect();
        let decl = self
            .funcs
            .entry((key.clone(), domain.clone(), sort))
            .or_insert_with(|| {
                let sorts: Vec<z3::Sort> = domain.iter().map(|s| z3_sort(*s)).collect();
                let refs: Vec<&z3::Sort> = sorts.iter().collect();
                FuncDecl::new(format!("uf!{}", key), &refs, &z3_sort(sort))
            });
        let arg_refs: Vec<&dyn z3::ast::Ast> = translated
            .iter()
            .map(|t| match t {
                Z3Term::Bool(b) => b as &dyn z3::ast::Ast,
                Z3Term::Bv(v) => v as &dyn z3::ast::Ast,
            })
            .collect();
        let applied = decl.apply(&arg_refs);
        match sort {
            Sort::Bool => applied.as_bool().map(Z3Term::Bool),
            Sort::BitVec(_) => applied.as_bv().map(Z3Term::Bv),
        }
    }

    fn translate(&mut self, term: &Term) -> Option<Z3Term> {
        if let Some(t) = self.memo.get(&term.id()) {
            return Some(t.clone());
        }
        let out = match term.node() {
            TermNode::Const(v) => match term.sort() {
                Sort::Bool => Z3Term::Bool(Bool::from_bool(*v != 0)),
                Sort::BitVec(w) => Z3Term::Bv(BV::from_u64(*v, w)),
            },
            TermNode::Var(name) | TermNode::Undef { name, .. } => self.leaf(name, term.sort()),
            TermNode::Ite(c, t, e) => {
                let c = self.bool(c)?;
                match (self.translate(t)?, self.translate(e)?) {
                    (Z3Term::Bool(a), Z3Term::Bool(b)) => Z3Term::Bool(c.ite(&a, &b)),
                    (Z3Term::Bv(a), Z3Term::Bv(b)) => Z3Term::Bv(c.ite(&a, &b)),
                    _ => return None,
                }
            }
            TermNode::Uninterp(name, args) => self.apply_opaque(name.clone(), args, term.sort())?,
            TermNode::Override { name, index, args } => {
                self.apply_opaque(format!("{}.{}", name, index), args, term.sort())?
            }
            TermNode::Prim(op, args) => self.prim(*op, args)?,
        };
        self.memo.insert(term.id(), out.clone());
        Some(out)
    }

    fn prim(&mut self, op: Op, args: &[Term]) -> Option<Z3Term> {
        let bool_args = |tr: &mut Translator| -> Option<Vec<Bool>> { args.iter().map(|a| tr.bool(a)).collect() };
        let bv_args = |tr: &mut Translator| -> Option<Vec<BV>> { args.iter().map(|a| tr.bv(a)).collect() };
        let out = match op {
            Op::Not => Z3Term::Bool(self.bool(&args[0])?.not()),
            Op::And => {
                let b = bool_args(self)?;
                Z3Term::Bool(Bool::and(&[&b[0], &b[1]]))
            }
            Op::Or => {
                let b = bool_args(self)?;
                Z3Term::Bool(Bool::or(&[&b[0], &b[1]]))
            }
            Op::Implies => {
                let b = bool_args(self)?;
                Z3Term::Bool(b[0].implies(&b[1]))
            }
            Op::Eq => match (self.translate(&args[0])?, self.translate(&args[1])?) {
                (Z3Term::Bool(a), Z3Term::Bool(b)) => Z3Term::Bool(a.eq(&b)),
                (Z3Term::Bv(a), Z3Term::Bv(b)) => Z3Term::Bool(a.eq(&b)),
                _ => return None,
            },
            Op::BvNot => Z3Term::Bv(self.bv(&args[0])?.bvnot()),
            Op::BvNeg => Z3Term::Bv(self.bv(&args[0])?.bvneg()),
            Op::Extract { hi, lo } => Z3Term::Bv(self.bv(&args[0])?.extract(hi, lo)),
            Op::ZeroExt(n) => Z3Term::Bv(self.bv(&args[0])?.zero_ext(n)),
            Op::SignExt(n) => Z3Term::Bv(self.bv(&args[0])?.sign_ext(n)),
            _ => {
                let v = bv_args(self)?;
                let (a, b) = (&v[0], &v[1]);
                match op {
                    Op::Ult => Z3Term::Bool(a.bvult(b)),
                    Op::Ule => Z3Term::Bool(a.bvule(b)),
                    Op::Slt => Z3Term::Bool(a.bvslt(b)),
                    Op::Sle => Z3Term::Bool(a.bvsle(b)),
                    Op::BvAdd => Z3Term::Bv(a.bvadd(b)),
                    Op::BvSub => Z3Term::Bv(a.bvsub(b)),
                    Op::BvMul => Z3Term::Bv(a.bvmul(b)),
                    Op::BvUdiv => Z3Term::Bv(a.bvudiv(b)),
                    Op::BvUrem => Z3Term::Bv(a.bvurem(b)),
                    Op::BvAnd => Z3Term::Bv(a.bvand(b)),
                    Op::BvOr => Z3Term::Bv(a.bvor(b)),
                    Op::BvXor => Z3Term::Bv(a.bvxor(b)),
                    Op::BvShl => Z3Term::Bv(a.bvshl(b)),
                    Op::BvLshr => Z3Term::Bv(a.bvlshr(b)),
                    Op::BvAshr => Z3Term::Bv(a.bvashr(b)),
                    Op::BvRotl => Z3Term::Bv(a.bvrotl(b)),
                    Op::BvRotr => Z3Term::Bv(a.bvrotr(b)),
                    Op::Concat => Z3Term::Bv(a.concat(b)),
                    _ => return None,
                }
            }
        };
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(name: &str) -> Term {
        Term::var(name, Sort::BitVec(32))
    }

    #[test]
    fn test_xor_swap_is_valid() {
        let a = x("smt_a");
        let b = x("smt_b");
        let t = Term::binary(Op::BvXor, &a, &b).unwrap();
        let u = Term::binary(Op::BvXor, &t, &b).unwrap();
        // Folding already proves (a^b)^b = a.
        let q = Query::new("swap", Term::eq(&u, &a).unwrap());
        assert_eq!(q.decided(), Some(true));
    }

    #[test]
    fn test_solver_finds_counterexample() {
        let a = x("smt_c");
        let goal = Term::binary(Op::Ult, &a, &Term::bv(0x101010, 32).unwrap()).unwrap();
        let q = Query::new("lt", goal.clone());
        match solve(&q, &SolverConfig::default()) {
            SmtOutcome::Sat(model) => {
                assert!(model["smt_c"] >= 0x101010);
                assert_eq!(crate::term::eval_term(&goal, &model).unwrap(), 0);
            }
            other => panic!("expected sat, got {}", other),
        }
    }

    #[test]
    fn test_hypothesis_makes_goal_valid() {
        let a = x("smt_d");
        let small = Term::binary(Op::Ult, &a, &Term::bv(4, 32).unwrap()).unwrap();
        let shifted = Term::binary(Op::BvShl, &a, &Term::bv(2, 32).unwrap()).unwrap();
        let goal = Term::binary(Op::Ult, &shifted, &Term::bv(16, 32).unwrap()).unwrap();
        let q = Query::new("bounded", goal).with_hypothesis(small);
        let oracle = Z3Oracle::new(SolverConfig::with_timeout_secs(10));
        assert_eq!(oracle.check(&q), SmtOutcome::Unsat);
        assert_eq!(oracle.calls(), 1);
    }

    #[test]
    fn test_cancelled_config_skips_solver() {
        let flag = Arc::new(AtomicBool::new(true));
        let a = x("smt_k");
        let goal = Term::binary(Op::Ult, &a, &Term::bv(9, 32).unwrap()).unwrap();
        let q = Query::new("cancelled", goal);
        let oracle = Z3Oracle::new(SolverConfig::no_timeout().with_cancel(flag));
        assert_eq!(oracle.check(&q), SmtOutcome::Timeout);
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn test_unbounded_query_stops_on_cancel() {
        // 64-bit factoring: slow enough that the flag is raised first
        let a = Term::var("smt_p", Sort::BitVec(64));
        let b = Term::var("smt_q", Sort::BitVec(64));
        let one = Term::bv(1, 64).unwrap();
        let limit = Term::bv(1u64 << 32, 64).unwrap();
        let product = Term::binary(Op::BvMul, &a, &b).unwrap();
        let goal = Term::not(&Term::eq(&product, &Term::bv(0xd4b5_c2f1_9a3e_6b07, 64).unwrap()).unwrap()).unwrap();
        let q = Query::new("factor", goal)
            .with_hypothesis(Term::binary(Op::Ult, &one, &a).unwrap())
            .with_hypothesis(Term::binary(Op::Ult, &one, &b).unwrap())
            .with_hypothesis(Term::binary(Op::Ult, &a, &limit).unwrap())
            .with_hypothesis(Term::binary(Op::Ult, &b, &limit).unwrap());

        let flag = Arc::new(AtomicBool::new(false));
        let config = SolverConfig::no_timeout().with_cancel(Arc::clone(&flag));
        let raiser = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
            })
        };
        let started = Instant::now();
        let _ = check_isolated(&q, &config);
        raiser.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_uninterpreted_congruence() {
        let a = x("smt_e");
        let b = x("smt_f");
        let fa = Term::uninterp("smt_h", vec![a.clone()], Sort::BitVec(32));
        let fb = Term::uninterp("smt_h", vec![b.clone()], Sort::BitVec(32));
        let q = Query::new("cong", Term::eq(&fa, &fb).unwrap()).with_hypothesis(Term::eq(&a, &b).unwrap());
        assert_eq!(check_isolated(&q, &SolverConfig::default()), SmtOutcome::Unsat);

        let q2 = Query::new("free", Term::eq(&fa, &fb).unwrap());
        assert!(matches!(check_isolated(&q2, &SolverConfig::default()), SmtOutcome::Sat(_)));
    }

    #[test]
    fn test_undef_cells_are_decoded() {
        let u = Term::undef("smt_g@0:h#0[4]", Sort::BitVec(8), false);
        let goal = Term::eq(&u, &Term::bv(0, 8).unwrap()).unwrap();
        match solve(&Query::new("undef", goal), &SolverConfig::default()) {
            SmtOutcome::Sat(model) => assert_ne!(model["smt_g@0:h#0[4]"], 0),
            other => panic!("expected sat, got {}", other),
        }
    }

    #[test]
    fn test_folded_oracle_skips_solver() {
        let oracle = Z3Oracle::new(SolverConfig::default());
        assert_eq!(oracle.check(&Query::new("t", Term::bool(true))), SmtOutcome::Unsat);
        assert_eq!(oracle.calls(), 0);
    }
}
