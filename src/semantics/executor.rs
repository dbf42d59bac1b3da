//! Symbolic executor over implementation control-flow graphs.
//!
//! States wait in a worklist ordered by the loop-aware block order and their
//! loop iteration vector. In merge mode, states that reach the same block
//! with the same iteration vector are joined into one: path conditions are
//! or-ed, variables and memory cells become `ite` terms. In fork mode every
//! path is kept separate.
//!
//! Loops are either unrolled up to a bound or cut at named cut points. With
//! cut points the function runs in phases: from the entry, and from each cut
//! with fresh values for everything live there. Each phase stops whenever it
//! reaches a cut and reports the arrival.
//!
//! Calls are resolved in this order: uninterpreted name, override (when its
//! precondition is discharged), inlining.

use crate::error::{LoadError, OverrideApplicabilityError, TermError, VerifyError, Warning};
use crate::ir::cfg::{self, LoopInfo};
use crate::ir::liveness;
use crate::ir::{BlockId, Function, Instruction, MemInit, Operand, Program, Terminator};
use crate::proof::overrides::{Override, OverrideSet};
use crate::semantics::memory::{AliasPolicy, Memory, ReadLog};
use crate::semantics::smt::{Oracle, Query, SmtOutcome};
use crate::spec::evaluator::uninterpreted_results;
use crate::term::{Op, Term, TermNode};
use im::OrdMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default unrolling bound per loop.
pub const DEFAULT_MAX_ITERATIONS: u32 = 64;

/// Default bound on nested inlined calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 32;

/// How diverging paths are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    /// Join states at common blocks with `ite` terms.
    #[default]
    Merge,
    /// Explore every path separately.
    Fork,
}

/// How loops are handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStrategy {
    /// Unroll each loop at most `max_iterations` times.
    Unroll { max_iterations: u32 },
    /// Split at cut points. `invariants` maps a cut name to the specification
    /// function relating the inputs and the live values there.
    CutPoint {
        invariants: BTreeMap<String, String>,
        max_iterations: u32,
    },
}

impl Default for LoopStrategy {
    fn default() -> Self {
        LoopStrategy::Unroll {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl LoopStrategy {
    pub fn unroll(max_iterations: u32) -> Self {
        LoopStrategy::Unroll { max_iterations }
    }

    /// Cut-point strategy from `(cut, invariant)` pairs
    pub fn cut_points<'s>(invariants: impl IntoIterator<Item = (&'s str, &'s str)>) -> Self {
        LoopStrategy::CutPoint {
            invariants: invariants
                .into_iter()
                .map(|(c, i)| (c.to_string(), i.to_string()))
                .collect(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        match self {
            LoopStrategy::Unroll { max_iterations } | LoopStrategy::CutPoint { max_iterations, .. } => {
                *max_iterations
            }
        }
    }

    /// Invariant attached to `cut`, if this strategy cuts there.
    pub fn invariant(&self, cut: &str) -> Option<&str> {
        match self {
            LoopStrategy::Unroll { .. } => None,
            LoopStrategy::CutPoint { invariants, .. } => invariants.get(cut).map(String::as_str),
        }
    }

    pub fn is_cut_point(&self) -> bool {
        matches!(self, LoopStrategy::CutPoint { .. })
    }
}

/// Configuration for symbolic execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub path_mode: PathMode,
    pub loop_strategy: LoopStrategy,
    pub alias_policy: AliasPolicy,
    pub max_call_depth: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            path_mode: PathMode::Merge,
            loop_strategy: LoopStrategy::default(),
            alias_policy: AliasPolicy::Reject,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl ExecConfig {
    pub fn with_path_mode(mut self, mode: PathMode) -> Self {
        self.path_mode = mode;
        self
    }

    pub fn with_loop_strategy(mut self, strategy: LoopStrategy) -> Self {
        self.loop_strategy = strategy;
        self
    }

    pub fn with_alias_policy(mut self, policy: AliasPolicy) -> Self {
        self.alias_policy = policy;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

/// One path (or merged bundle of paths) reaching a return
#[derive(Debug, Clone)]
pub struct PathResult {
    pub path_condition: Term,
    pub outputs: Vec<Term>,
}

/// A state reaching a cut point
#[derive(Debug, Clone)]
pub struct CutArrival {
    pub cut: String,
    pub path_condition: Term,
    /// Values of the cut's live variables
    pub values: BTreeMap<String, Term>,
    pub memory: Memory,
}

/// Everything one phase produced
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub returns: Vec<PathResult>,
    pub arrivals: Vec<CutArrival>,
}

/// Where a phase starts
#[derive(Debug, Clone)]
pub enum Start {
    Entry(Vec<Term>),
    /// Just after cut `name`, with the given live values and memory.
    Cut {
        name: String,
        values: BTreeMap<String, Term>,
        memory: Memory,
    },
}

/// Side information gathered while executing
#[derive(Debug, Clone, Default)]
pub struct ExecTrace {
    pub warnings: Vec<Warning>,
    pub reads: ReadLog,
    pub dont_care_regions: BTreeSet<String>,
    pub overrides_applied: BTreeSet<String>,
    pub inlined: BTreeSet<String>,
    pub blocks: usize,
    pub merges: usize,
}

#[derive(Debug, Clone)]
struct State {
    block: BlockId,
    index: usize,
    pc: Term,
    vars: OrdMap<String, Term>,
    memory: Memory,
    iterations: Vec<(BlockId, u32)>,
}

type Key = (usize, Vec<(BlockId, u32)>, usize, u64);

struct Frame<'a> {
    function: &'a Function,
    loops: Arc<LoopInfo>,
    depth: usize,
    stop_at_cuts: bool,
    resumed: Option<String>,
}

enum Flow {
    Continue,
    Arrive(CutArrival),
}

/// Symbolic executor for one job
pub struct Executor<'a> {
    program: &'a Program,
    config: &'a ExecConfig,
    overrides: &'a OverrideSet,
    uninterpreted: &'a BTreeSet<String>,
    oracle: &'a dyn Oracle,
    /// Facts about the inputs that hold on every path of the current phase
    assumptions: Vec<Term>,
    loops: HashMap<String, Arc<LoopInfo>>,
    activations: u64,
    trace: ExecTrace,
}

/// Top-level conjuncts of a path condition.
pub fn conjuncts(term: &Term) -> Vec<Term> {
    let mut out = Vec::new();
    let mut stack = vec![term.clone()];
    while let Some(t) = stack.pop() {
        match t.node() {
            TermNode::Prim(Op::And, args) => stack.extend(args.iter().rev().cloned()),
            _ if t.is_true() => {}
            _ => out.push(t),
        }
    }
    out
}

/// Condition distinguishing `pc` from its `base` prefix.
fn residual(pc: &Term, base: &HashSet<Term>) -> Result<Term, TermError> {
    let rest: Vec<Term> = conjuncts(pc).into_iter().filter(|c| !base.contains(c)).collect();
    Term::and_all(&rest)
}

/// For two disjoint path conditions, a selector that is true on the first
/// and false on the second, and their disjunction.
fn split_condition(pc1: &Term, pc2: &Term) -> Result<(Term, Term), TermError> {
    let c1 = conjuncts(pc1);
    let c2 = conjuncts(pc2);
    let s1: HashSet<Term> = c1.iter().cloned().collect();
    let s2: HashSet<Term> = c2.iter().cloned().collect();
    let common: Vec<Term> = c1.iter().filter(|c| s2.contains(c)).cloned().collect();
    let r1: Vec<Term> = c1.iter().filter(|c| !s2.contains(c)).cloned().collect();
    let r2: Vec<Term> = c2.iter().filter(|c| !s1.contains(c)).cloned().collect();

    let selector = Term::and_all(&r1)?;
    let complementary = r1.len() == 1 && r2.len() == 1 && Term::not(&r1[0])? == r2[0];
    let either = if complementary {
        Term::bool(true)
    } else {
        Term::or(&selector, &Term::and_all(&r2)?)?
    };
    let pc = Term::and(&Term::and_all(&common)?, &either)?;
    Ok((selector, pc))
}

impl<'a> Executor<'a> {
    pub fn new(
        program: &'a Program,
        config: &'a ExecConfig,
        overrides: &'a OverrideSet,
        uninterpreted: &'a BTreeSet<String>,
        oracle: &'a dyn Oracle,
    ) -> Self {
        Executor {
            program,
            config,
            overrides,
            uninterpreted,
            oracle,
            assumptions: Vec::new(),
            loops: HashMap::new(),
            activations: 0,
            trace: ExecTrace::default(),
        }
    }

    /// Assume `facts` (a precondition, an invariant at the resumed cut)
    /// when discharging override preconditions in later runs.
    pub fn set_assumptions(&mut self, facts: Vec<Term>) {
        self.assumptions = facts.into_iter().filter(|f| !f.is_true()).collect();
    }

    pub fn trace(&self) -> &ExecTrace {
        &self.trace
    }

    pub fn into_trace(self) -> ExecTrace {
        self.trace
    }

    fn lookup(&self, name: &str) -> Result<&'a Function, LoadError> {
        let program: &'a Program = self.program;
        program
            .function(name)
            .ok_or_else(|| LoadError::UnknownFunction(name.to_string()))
    }

    fn loop_info(&mut self, function: &Function) -> Result<Arc<LoopInfo>, LoadError> {
        if let Some(info) = self.loops.get(&function.name) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(cfg::analyze(function)?);
        self.loops.insert(function.name.clone(), Arc::clone(&info));
        Ok(info)
    }

    /// Run one phase of `name`.
    pub fn run(&mut self, name: &str, start: Start) -> Result<PhaseResult, VerifyError> {
        let function = self.lookup(name)?;
        if !function.has_body() {
            return Err(LoadError::NoBody(name.to_string()).into());
        }
        liveness::check_cut_points(function)?;
        let loops = self.loop_info(function)?;
        let stop_at_cuts = self.config.loop_strategy.is_cut_point();

        let (state, resumed) = match start {
            Start::Entry(args) => (self.entry_state(function, args, Term::bool(true))?, None),
            Start::Cut { name: cut, values, memory } => {
                let (block, index) = function.find_cut_point(&cut).ok_or_else(|| LoadError::Malformed {
                    function: name.to_string(),
                    detail: format!("no cut point named {}", cut),
                })?;
                let state = State {
                    block,
                    index: index + 1,
                    pc: Term::bool(true),
                    vars: values.into_iter().collect(),
                    memory,
                    iterations: Vec::new(),
                };
                (state, Some(cut))
            }
        };
        let frame = Frame {
            function,
            loops,
            depth: 0,
            stop_at_cuts,
            resumed,
        };
        self.explore(&frame, state)
    }

    /// Run `name` from its entry; every path must return.
    pub fn execute(&mut self, name: &str, args: Vec<Term>) -> Result<Vec<PathResult>, VerifyError> {
        Ok(self.run(name, Start::Entry(args))?.returns)
    }

    fn entry_state(&mut self, function: &Function, args: Vec<Term>, pc: Term) -> Result<State, VerifyError> {
        if args.len() != function.params.len() {
            return Err(LoadError::ArityMismatch {
                callee: function.name.clone(),
                expected: function.params.len(),
                actual: args.len(),
            }
            .into());
        }
        let mut vars = OrdMap::new();
        for ((param, sort), arg) in function.params.iter().zip(args) {
            if arg.sort() != *sort {
                return Err(TermError::SortMismatch {
                    op: format!("argument {} of {}", param, function.name),
                    expected: sort.to_string(),
                    actual: arg.sort().to_string(),
                }
                .into());
            }
            vars.insert(param.clone(), arg);
        }
        let scope = format!("{}@{}", function.name, self.activations);
        self.activations += 1;
        Ok(State {
            block: Function::ENTRY,
            index: 0,
            pc,
            vars,
            memory: Memory::new(scope, self.program),
            iterations: Vec::new(),
        })
    }

    fn explore(&mut self, frame: &Frame<'a>, start: State) -> Result<PhaseResult, VerifyError> {
        let mut work: BTreeMap<Key, State> = BTreeMap::new();
        let mut seq = 0u64;
        self.push(frame, &mut work, &mut seq, start)?;
        let mut out = PhaseResult::default();
        while let Some((_, state)) = work.pop_first() {
            self.trace.blocks += 1;
            self.step_block(frame, state, &mut work, &mut seq, &mut out)?;
        }
        Ok(out)
    }

    fn push(&mut self, frame: &Frame<'a>, work: &mut BTreeMap<Key, State>, seq: &mut u64, state: State) -> Result<(), VerifyError> {
        if state.pc.is_false() {
            return Ok(());
        }
        let position = frame.loops.order.get(state.block).copied().unwrap_or(usize::MAX);
        let tiebreak = match self.config.path_mode {
            PathMode::Merge => 0,
            PathMode::Fork => {
                *seq += 1;
                *seq
            }
        };
        let key = (position, state.iterations.clone(), state.index, tiebreak);
        let merged = match work.remove(&key) {
            Some(existing) => self.merge(frame, existing, state)?,
            None => state,
        };
        work.insert(key, merged);
        Ok(())
    }

    fn merge(&mut self, frame: &Frame<'a>, a: State, b: State) -> Result<State, VerifyError> {
        let (selector, pc) = split_condition(&a.pc, &b.pc)?;
        let mut vars = a.vars.clone();
        for (name, vb) in b.vars.iter() {
            match a.vars.get(name) {
                Some(va) if va == vb => {}
                Some(va) if va.sort() == vb.sort() => {
                    vars.insert(name.clone(), Term::ite(&selector, va, vb)?);
                }
                Some(_) => {
                    vars.remove(name);
                }
                None => {
                    vars.insert(name.clone(), vb.clone());
                }
            }
        }
        let memory = a.memory.merge(&selector, &b.memory)?;
        self.trace.merges += 1;
        debug!(
            function = %frame.function.name,
            block = %frame.function.blocks[a.block].label,
            "merged states"
        );
        Ok(State {
            block: a.block,
            index: a.index,
            pc,
            vars,
            memory,
            iterations: a.iterations,
        })
    }

    fn step_block(
        &mut self,
        frame: &Frame<'a>,
        mut state: State,
        work: &mut BTreeMap<Key, State>,
        seq: &mut u64,
        out: &mut PhaseResult,
    ) -> Result<(), VerifyError> {
        let function = frame.function;
        let block = function.block(state.block).ok_or_else(|| LoadError::Malformed {
            function: function.name.clone(),
            detail: format!("missing block {}", state.block),
        })?;
        debug!(function = %function.name, block = %block.label, depth = frame.depth, "execute block");

        let start = state.index;
        state.index = 0;
        for instr in block.instructions.iter().skip(start) {
            trace!(instr = %instr, "step");
            if let Flow::Arrive(arrival) = self.step_instr(frame, &mut state, instr)? {
                debug!(function = %function.name, cut = %arrival.cut, "reached cut point");
                out.arrivals.push(arrival);
                return Ok(());
            }
        }

        let from = state.block;
        match &block.terminator {
            Terminator::Jump(target) => self.follow(frame, work, seq, state, from, *target),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let c = self.operand(frame, &state, cond)?;
                match c.as_bool() {
                    Some(true) => self.follow(frame, work, seq, state, from, *then_block),
                    Some(false) => self.follow(frame, work, seq, state, from, *else_block),
                    None => {
                        let mut taken = state.clone();
                        taken.pc = Term::and(&state.pc, &c)?;
                        state.pc = Term::and(&state.pc, &Term::not(&c)?)?;
                        self.follow(frame, work, seq, taken, from, *then_block)?;
                        self.follow(frame, work, seq, state, from, *else_block)
                    }
                }
            }
            Terminator::Return(values) => {
                if values.len() != function.results.len() {
                    return Err(LoadError::ResultShape(format!(
                        "{} returns {} value(s), declares {}",
                        function.name,
                        values.len(),
                        function.results.len()
                    ))
                    .into());
                }
                let mut outputs = Vec::with_capacity(values.len());
                for (v, sort) in values.iter().zip(&function.results) {
                    let t = self.operand(frame, &state, v)?;
                    if t.sort() != *sort {
                        return Err(LoadError::ResultShape(format!(
                            "{} returns {} where {} is declared",
                            function.name,
                            t.sort(),
                            sort
                        ))
                        .into());
                    }
                    outputs.push(t);
                }
                out.returns.push(PathResult {
                    path_condition: state.pc,
                    outputs,
                });
                Ok(())
            }
        }
    }

    fn follow(
        &mut self,
        frame: &Frame<'a>,
        work: &mut BTreeMap<Key, State>,
        seq: &mut u64,
        mut state: State,
        from: BlockId,
        to: BlockId,
    ) -> Result<(), VerifyError> {
        if state.pc.is_false() {
            return Ok(());
        }
        let loops = &frame.loops;
        if loops.is_back_edge(from, to) {
            let limit = self.config.loop_strategy.max_iterations();
            let count = match state.iterations.iter_mut().find(|(h, _)| *h == to) {
                Some((_, n)) => {
                    *n += 1;
                    *n
                }
                None => {
                    state.iterations.push((to, 1));
                    state.iterations.sort();
                    1
                }
            };
            if count > limit {
                return Err(LoadError::UnboundedLoop {
                    function: frame.function.name.clone(),
                    block: frame.function.blocks[to].label.clone(),
                    limit,
                }
                .into());
            }
        }
        state.iterations.retain(|(h, _)| loops.in_loop(*h, to));
        state.block = to;
        state.index = 0;
        self.push(frame, work, seq, state)
    }

    fn unbound(&self, frame: &Frame<'a>, var: &str) -> LoadError {
        match &frame.resumed {
            Some(cut) => LoadError::ValueNotFoundAtCutPoint {
                function: frame.function.name.clone(),
                cut: cut.clone(),
                var: var.to_string(),
            },
            None => LoadError::UnboundVariable {
                function: frame.function.name.clone(),
                var: var.to_string(),
            },
        }
    }

    fn operand(&self, frame: &Frame<'a>, state: &State, operand: &Operand) -> Result<Term, VerifyError> {
        match operand {
            Operand::Var(name) => state
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| self.unbound(frame, name).into()),
            Operand::Const { value, width } => Ok(Term::bv(*value, *width)?),
            Operand::Bool(b) => Ok(Term::bool(*b)),
        }
    }

    fn operands(&self, frame: &Frame<'a>, state: &State, operands: &[Operand]) -> Result<Vec<Term>, VerifyError> {
        operands.iter().map(|o| self.operand(frame, state, o)).collect()
    }

    fn step_instr(&mut self, frame: &Frame<'a>, state: &mut State, instr: &Instruction) -> Result<Flow, VerifyError> {
        match instr {
            Instruction::Assign { dst, op, args } => {
                let terms = self.operands(frame, state, args)?;
                state.vars.insert(dst.clone(), Term::prim(*op, terms)?);
            }
            Instruction::Select {
                dst,
                cond,
                then_val,
                else_val,
            } => {
                let c = self.operand(frame, state, cond)?;
                let t = self.operand(frame, state, then_val)?;
                let e = self.operand(frame, state, else_val)?;
                state.vars.insert(dst.clone(), Term::ite(&c, &t, &e)?);
            }
            Instruction::Alloc { region, size, init } => {
                state.memory.alloc(region, *size, *init)?;
                if *init == MemInit::DontCare {
                    self.trace.dont_care_regions.insert(region.clone());
                }
            }
            Instruction::Load {
                dst,
                region,
                offset,
                bytes,
            } => {
                let at = self.operand(frame, state, offset)?;
                let mut log = ReadLog::default();
                let value = state.memory.read(region, &at, *bytes, self.config.alias_policy, &mut log)?;
                self.trace.reads.extend(log);
                state.vars.insert(dst.clone(), value);
            }
            Instruction::Store {
                region,
                offset,
                value,
                bytes,
            } => {
                let at = self.operand(frame, state, offset)?;
                let v = self.operand(frame, state, value)?;
                state.memory.write(region, &at, &v, *bytes, self.config.alias_policy)?;
            }
            Instruction::Call { dsts, callee, args } => {
                let terms = self.operands(frame, state, args)?;
                let results = self.call(frame, state, callee, terms)?;
                if results.len() != dsts.len() {
                    return Err(LoadError::ResultShape(format!(
                        "call to {} binds {} of {} result(s)",
                        callee,
                        dsts.len(),
                        results.len()
                    ))
                    .into());
                }
                for (dst, t) in dsts.iter().zip(results) {
                    state.vars.insert(dst.clone(), t);
                }
            }
            Instruction::CutPoint { name, live } => {
                if frame.stop_at_cuts && self.config.loop_strategy.invariant(name).is_some() {
                    let mut values = BTreeMap::new();
                    for var in live {
                        let t = state.vars.get(var).cloned().ok_or_else(|| self.unbound(frame, var))?;
                        values.insert(var.clone(), t);
                    }
                    return Ok(Flow::Arrive(CutArrival {
                        cut: name.clone(),
                        path_condition: state.pc.clone(),
                        values,
                        memory: state.memory.clone(),
                    }));
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn call(&mut self, frame: &Frame<'a>, state: &State, callee: &str, args: Vec<Term>) -> Result<Vec<Term>, VerifyError> {
        let function = self.lookup(callee)?;
        if args.len() != function.params.len() {
            return Err(LoadError::ArityMismatch {
                callee: callee.to_string(),
                expected: function.params.len(),
                actual: args.len(),
            }
            .into());
        }
        if self.uninterpreted.contains(callee) {
            trace!(callee, "uninterpreted call");
            return Ok(uninterpreted_results(callee, &function.results, args));
        }
        if let Some(ov) = self.overrides.for_impl(callee) {
            let ov = Arc::clone(ov);
            match self.discharge(&ov, &state.pc, &args)? {
                None => {
                    debug!(callee, token = %ov.token(), "override applied");
                    self.trace.overrides_applied.insert(callee.to_string());
                    return Ok(ov.apply(&args)?);
                }
                Some(reason) if function.has_body() => {
                    warn!(callee, %reason, "override not applicable, inlining");
                    self.trace.warnings.push(Warning::OverrideFallback {
                        name: callee.to_string(),
                        reason,
                    });
                }
                Some(reason) => {
                    return Err(OverrideApplicabilityError::NotDischarged {
                        name: callee.to_string(),
                        reason,
                    }
                    .into())
                }
            }
        }
        self.inline(frame, state, function, args)
    }

    /// `None` when the precondition holds on the current path, otherwise the
    /// reason it could not be shown.
    fn discharge(&self, ov: &Override, pc: &Term, args: &[Term]) -> Result<Option<String>, VerifyError> {
        let pre = ov.precondition_at(args)?;
        if pre.is_true() {
            return Ok(None);
        }
        if pre.is_false() {
            return Ok(Some("precondition is false".to_string()));
        }
        let query = self
            .assumptions
            .iter()
            .fold(Query::new(format!("pre:{}", ov.name()), pre), |q, a| q.with_hypothesis(a.clone()))
            .with_hypothesis(pc.clone());
        Ok(match self.oracle.check(&query) {
            SmtOutcome::Unsat => None,
            SmtOutcome::Sat(_) => Some("path condition does not imply the precondition".to_string()),
            SmtOutcome::Timeout => Some("precondition check timed out".to_string()),
            SmtOutcome::Unknown(r) => Some(format!("precondition check unknown: {}", r)),
        })
    }

    fn inline(&mut self, frame: &Frame<'a>, state: &State, function: &'a Function, args: Vec<Term>) -> Result<Vec<Term>, VerifyError> {
        if !function.has_body() {
            return Err(LoadError::NoBody(function.name.clone()).into());
        }
        if frame.depth + 1 > self.config.max_call_depth {
            return Err(LoadError::CallDepthExceeded {
                callee: function.name.clone(),
                limit: self.config.max_call_depth,
            }
            .into());
        }
        let entry = self.entry_state(function, args, state.pc.clone())?;
        let sub = Frame {
            function,
            loops: self.loop_info(function)?,
            depth: frame.depth + 1,
            stop_at_cuts: false,
            resumed: None,
        };
        self.trace.inlined.insert(function.name.clone());
        let mut returns = self.explore(&sub, entry)?.returns;

        let base: HashSet<Term> = conjuncts(&state.pc).into_iter().collect();
        let last = returns.pop().ok_or_else(|| {
            LoadError::ResultShape(format!("no feasible return from {}", function.name))
        })?;
        let mut acc = last.outputs;
        for path in returns.into_iter().rev() {
            let cond = residual(&path.path_condition, &base)?;
            for (slot, value) in acc.iter_mut().zip(&path.outputs) {
                *slot = Term::ite(&cond, value, slot)?;
            }
        }
        Ok(acc)
    }
}
