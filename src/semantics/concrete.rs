//! Concrete interpreter for implementation functions.
//!
//! Used to replay solver counterexamples and to evaluate sampled inputs.
//! Byte naming matches the symbolic memory model, so an assignment decoded
//! from a model supplies exactly the undefined bytes the executor saw.

use crate::error::{LoadError, MemoryModelError, VerifyError};
use crate::ir::{BlockId, Function, Instruction, MemInit, Operand, Program, Terminator};
use crate::proof::overrides::OverrideSet;
use crate::semantics::memory::{region_tag, undef_name};
use crate::term::{eval_term, Assignment, Op, Sort, Term};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Default bound on executed blocks per run.
pub const DEFAULT_STEP_LIMIT: u64 = 1 << 20;

/// A concrete value with its sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Value {
    bits: u64,
    sort: Sort,
}

impl Value {
    fn new(bits: u64, sort: Sort) -> Self {
        Value {
            bits: bits & sort.mask(),
            sort,
        }
    }
}

#[derive(Debug, Clone)]
struct RegionBytes {
    tag: String,
    bytes: Vec<Option<u8>>,
    read_only: bool,
}

/// Result of one concrete run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteRun {
    pub outputs: Vec<u64>,
    /// Undefined or don't-care bytes read, by name
    pub undefined_reads: BTreeSet<String>,
}

/// Concrete interpreter over a program
pub struct ConcreteMachine<'a> {
    program: &'a Program,
    overrides: Option<&'a OverrideSet>,
    undef: &'a Assignment,
    step_limit: u64,
    max_call_depth: usize,
}

struct Frame<'f> {
    function: &'f Function,
    vars: HashMap<String, Value>,
    regions: HashMap<String, RegionBytes>,
    instances: HashMap<String, u32>,
    scope: String,
}

impl<'a> ConcreteMachine<'a> {
    pub fn new(program: &'a Program, undef: &'a Assignment) -> Self {
        ConcreteMachine {
            program,
            overrides: None,
            undef,
            step_limit: DEFAULT_STEP_LIMIT,
            max_call_depth: 64,
        }
    }

    /// Evaluate body-less callees through their override closed forms.
    pub fn with_overrides(mut self, overrides: &'a OverrideSet) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Run `name` on `args` (masked to the parameter widths).
    pub fn run(&self, name: &str, args: &[u64]) -> Result<ConcreteRun, VerifyError> {
        let mut activations = 0u64;
        let mut reads = BTreeSet::new();
        let mut steps = 0u64;
        let outputs = self.call(name, args, 0, &mut activations, &mut reads, &mut steps)?;
        Ok(ConcreteRun {
            outputs,
            undefined_reads: reads,
        })
    }

    fn call(
        &self,
        name: &str,
        args: &[u64],
        depth: usize,
        activations: &mut u64,
        reads: &mut BTreeSet<String>,
        steps: &mut u64,
    ) -> Result<Vec<u64>, VerifyError> {
        let function = self
            .program
            .function(name)
            .ok_or_else(|| LoadError::UnknownFunction(name.to_string()))?;
        if args.len() != function.params.len() {
            return Err(LoadError::ArityMismatch {
                callee: name.to_string(),
                expected: function.params.len(),
                actual: args.len(),
            }
            .into());
        }
        if depth > self.max_call_depth {
            return Err(LoadError::CallDepthExceeded {
                callee: name.to_string(),
                limit: self.max_call_depth,
            }
            .into());
        }
        if !function.has_body() {
            return self.call_override(function, args);
        }

        let scope = format!("{}@{}", name, *activations);
        *activations += 1;
        let mut frame = Frame {
            function,
            vars: function
                .params
                .iter()
                .zip(args)
                .map(|((p, sort), v)| (p.clone(), Value::new(*v, *sort)))
                .collect(),
            regions: HashMap::new(),
            instances: HashMap::new(),
            scope,
        };
        for (gname, g) in &self.program.globals {
            frame.regions.insert(
                gname.clone(),
                RegionBytes {
                    tag: format!("global:{}", gname),
                    bytes: g.bytes.iter().map(|b| Some(*b)).collect(),
                    read_only: true,
                },
            );
        }

        let mut block: BlockId = Function::ENTRY;
        loop {
            *steps += 1;
            if *steps > self.step_limit {
                return Err(LoadError::UnboundedLoop {
                    function: name.to_string(),
                    block: function.blocks[block].label.clone(),
                    limit: self.step_limit.min(u32::MAX as u64) as u32,
                }
                .into());
            }
            let b = function.block(block).ok_or_else(|| LoadError::Malformed {
                function: name.to_string(),
                detail: format!("missing block {}", block),
            })?;
            trace!(function = name, block = %b.label, "concrete step");
            for instr in &b.instructions {
                self.step(&mut frame, instr, depth, activations, reads, steps)?;
            }
            match &b.terminator {
                Terminator::Jump(t) => block = *t,
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    block = if frame.operand(cond)?.bits != 0 {
                        *then_block
                    } else {
                        *else_block
                    };
                }
                Terminator::Return(values) => {
                    let mut out = Vec::with_capacity(values.len());
                    for (v, sort) in values.iter().zip(&function.results) {
                        let value = frame.operand(v)?;
                        if value.sort != *sort {
                            return Err(LoadError::ResultShape(format!(
                                "{} returns {} where {} is declared",
                                name, value.sort, sort
                            ))
                            .into());
                        }
                        out.push(value.bits);
                    }
                    if values.len() != function.results.len() {
                        return Err(LoadError::ResultShape(format!(
                            "{} returns {} value(s), declares {}",
                            name,
                            values.len(),
                            function.results.len()
                        ))
                        .into());
                    }
                    return Ok(out);
                }
            }
        }
    }

    fn call_override(&self, function: &Function, args: &[u64]) -> Result<Vec<u64>, VerifyError> {
        let ov = self
            .overrides
            .and_then(|set| set.for_impl(&function.name))
            .ok_or_else(|| LoadError::NoBody(function.name.clone()))?;
        let terms: Vec<Term> = function
            .params
            .iter()
            .zip(args)
            .map(|((_, sort), v)| Term::constant(*v, *sort))
            .collect();
        let env = Assignment::new();
        let mut out = Vec::with_capacity(ov.results().len());
        for i in 0..ov.results().len() {
            let t = ov.expand(i, &terms)?;
            out.push(eval_term(&t, &env)?);
        }
        Ok(out)
    }

    fn step(
        &self,
        frame: &mut Frame<'_>,
        instr: &Instruction,
        depth: usize,
        activations: &mut u64,
        reads: &mut BTreeSet<String>,
        steps: &mut u64,
    ) -> Result<(), VerifyError> {
        match instr {
            Instruction::Assign { dst, op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(frame.operand(a)?);
                }
                let v = apply_op(*op, &values)?;
                frame.vars.insert(dst.clone(), v);
            }
            Instruction::Select {
                dst,
                cond,
                then_val,
                else_val,
            } => {
                let v = if frame.operand(cond)?.bits != 0 {
                    frame.operand(then_val)?
                } else {
                    frame.operand(else_val)?
                };
                frame.vars.insert(dst.clone(), v);
            }
            Instruction::Alloc { region, size, init } => {
                if frame.regions.get(region).is_some_and(|r| r.read_only) {
                    return Err(MemoryModelError::ConstantRegion(region.clone()).into());
                }
                let instance = frame.instances.get(region).copied().unwrap_or(0);
                frame.instances.insert(region.clone(), instance + 1);
                let fill = if *init == MemInit::Zero { Some(0) } else { None };
                frame.regions.insert(
                    region.clone(),
                    RegionBytes {
                        tag: region_tag(&frame.scope, region, instance),
                        bytes: vec![fill; *size as usize],
                        read_only: false,
                    },
                );
            }
            Instruction::Load {
                dst,
                region,
                offset,
                bytes,
            } => {
                let at = frame.operand(offset)?.bits;
                let r = frame
                    .regions
                    .get(region)
                    .ok_or_else(|| MemoryModelError::UnknownRegion(region.clone()))?;
                check_bounds(region, r, at, *bytes)?;
                let mut value = 0u64;
                for i in (0..*bytes as u64).rev() {
                    let byte = match r.bytes[(at + i) as usize] {
                        Some(b) => b as u64,
                        None => {
                            let name = undef_name(&r.tag, at + i);
                            let b = self.undef.get(&name).copied().unwrap_or(0) & 0xff;
                            reads.insert(name);
                            b
                        }
                    };
                    value = (value << 8) | byte;
                }
                frame.vars.insert(dst.clone(), Value::new(value, Sort::BitVec(bytes * 8)));
            }
            Instruction::Store {
                region,
                offset,
                value,
                bytes,
            } => {
                let at = frame.operand(offset)?.bits;
                let v = frame.operand(value)?;
                if v.sort != Sort::BitVec(bytes * 8) {
                    return Err(MemoryModelError::AccessWidth {
                        bytes: *bytes,
                        width: v.sort.width(),
                    }
                    .into());
                }
                let r = frame
                    .regions
                    .get_mut(region)
                    .ok_or_else(|| MemoryModelError::UnknownRegion(region.clone()))?;
                if r.read_only {
                    return Err(MemoryModelError::ConstantRegion(region.clone()).into());
                }
                check_bounds(region, r, at, *bytes)?;
                for i in 0..*bytes as u64 {
                    r.bytes[(at + i) as usize] = Some((v.bits >> (8 * i)) as u8);
                }
            }
            Instruction::Call { dsts, callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(frame.operand(a)?.bits);
                }
                let out = self.call(callee, &values, depth + 1, activations, reads, steps)?;
                let callee_fn = self
                    .program
                    .function(callee)
                    .ok_or_else(|| LoadError::UnknownFunction(callee.clone()))?;
                if out.len() != dsts.len() {
                    return Err(LoadError::ResultShape(format!(
                        "call to {} binds {} of {} result(s)",
                        callee,
                        dsts.len(),
                        out.len()
                    ))
                    .into());
                }
                for ((dst, bits), sort) in dsts.iter().zip(out).zip(&callee_fn.results) {
                    frame.vars.insert(dst.clone(), Value::new(bits, *sort));
                }
            }
            Instruction::CutPoint { .. } => {}
        }
        Ok(())
    }
}

fn check_bounds(name: &str, r: &RegionBytes, at: u64, bytes: u32) -> Result<(), MemoryModelError> {
    let size = r.bytes.len() as u64;
    if !matches!(bytes, 1 | 2 | 4 | 8) {
        return Err(MemoryModelError::AccessWidth { bytes, width: bytes * 8 });
    }
    if !matches!(at.checked_add(bytes as u64), Some(end) if end <= size) {
        return Err(MemoryModelError::OutOfBounds {
            region: name.to_string(),
            offset: at,
            bytes,
            size,
        });
    }
    Ok(())
}

fn apply_op(op: Op, values: &[Value]) -> Result<Value, VerifyError> {
    let sorts: Vec<Sort> = values.iter().map(|v| v.sort).collect();
    let sort = op.result_sort(&sorts)?;
    let bits: Vec<u64> = values.iter().map(|v| v.bits).collect();
    Ok(Value::new(op.eval(&bits, &sorts), sort))
}

impl Frame<'_> {
    fn operand(&self, operand: &Operand) -> Result<Value, VerifyError> {
        match operand {
            Operand::Var(name) => self.vars.get(name).copied().ok_or_else(|| {
                LoadError::UnboundVariable {
                    function: self.function.name.clone(),
                    var: name.clone(),
                }
                .into()
            }),
            Operand::Const { value, width } => Ok(Value::new(*value, Sort::bv(*width)?)),
            Operand::Bool(b) => Ok(Value::new(*b as u64, Sort::Bool)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;

    fn bv(w: u32) -> Sort {
        Sort::BitVec(w)
    }

    fn sum_to_n() -> Program {
        // s = 0; i = 0; while i < n { s += i; i += 1 } return s
        let mut b = FunctionBuilder::new("sum").param("n", bv(8)).result(bv(8));
        let head = b.new_block("head");
        let body = b.new_block("body");
        let exit = b.new_block("exit");
        b.copy("s", Operand::bv(0, 8), 8);
        b.copy("i", Operand::bv(0, 8), 8);
        b.jump(head);
        b.switch_to(head);
        b.assign("c", Op::Ult, vec![Operand::var("i"), Operand::var("n")]);
        b.branch(Operand::var("c"), body, exit);
        b.switch_to(body);
        b.assign("s", Op::BvAdd, vec![Operand::var("s"), Operand::var("i")]);
        b.assign("i", Op::BvAdd, vec![Operand::var("i"), Operand::bv(1, 8)]);
        b.jump(head);
        b.switch_to(exit);
        b.ret(vec![Operand::var("s")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());
        p
    }

    #[test]
    fn test_loop_runs_to_completion() {
        let p = sum_to_n();
        let env = Assignment::new();
        let run = ConcreteMachine::new(&p, &env).run("sum", &[5]).unwrap();
        assert_eq!(run.outputs, vec![10]);
        assert!(run.undefined_reads.is_empty());
    }

    #[test]
    fn test_step_limit() {
        let p = sum_to_n();
        let env = Assignment::new();
        let err = ConcreteMachine::new(&p, &env).with_step_limit(10).run("sum", &[200]).unwrap_err();
        assert!(matches!(err, VerifyError::Load(LoadError::UnboundedLoop { .. })));
    }

    #[test]
    fn test_undefined_bytes_come_from_assignment() {
        let mut b = FunctionBuilder::new("peek").param("x", bv(32)).result(bv(64));
        b.alloc("h", 8, MemInit::DontCare);
        b.store("h", Operand::bv(0, 32), Operand::var("x"), 4);
        b.load("r", "h", Operand::bv(0, 32), 8);
        b.ret(vec![Operand::var("r")]);
        let mut p = Program::new();
        p.add_function(b.build().unwrap());

        let mut env = Assignment::new();
        env.insert("peek@0:h#0[4]".into(), 0xab);
        let run = ConcreteMachine::new(&p, &env).run("peek", &[0x1234]).unwrap();
        assert_eq!(run.outputs, vec![0xab_0000_1234]);
        assert_eq!(run.undefined_reads.len(), 4);
    }

    #[test]
    fn test_calls_and_global_table() {
        let mut sq = FunctionBuilder::new("lookup").param("i", bv(8)).result(bv(8));
        sq.load("v", "tbl", Operand::var("i"), 1);
        sq.ret(vec![Operand::var("v")]);
        let mut top = FunctionBuilder::new("twice").param("i", bv(8)).result(bv(8));
        top.call(&["a"], "lookup", vec![Operand::var("i")]);
        top.assign("r", Op::BvAdd, vec![Operand::var("a"), Operand::var("a")]);
        top.ret(vec![Operand::var("r")]);
        let mut p = Program::new();
        p.add_global("tbl", vec![1, 2, 3, 4]);
        p.add_function(sq.build().unwrap());
        p.add_function(top.build().unwrap());
        let env = Assignment::new();
        let m = ConcreteMachine::new(&p, &env);
        assert_eq!(m.run("twice", &[3]).unwrap().outputs, vec![8]);
        assert!(matches!(
            m.run("twice", &[4]),
            Err(VerifyError::Memory(MemoryModelError::OutOfBounds { .. }))
        ));
    }
}
