//! Hash-consed term store.
//!
//! Every term is interned in a process-wide concurrent table keyed by its
//! sort and its node (whose children are already-interned terms). Two
//! structurally equal terms therefore share one allocation and one id, and
//! term equality is an id comparison. The table is append-only: lookups of
//! existing terms take a shard read lock, and inserting a new node holds a
//! single shard's write lock for the duration of one map insertion.

use crate::error::TermError;
use crate::term::op::{mask, Op, Sort};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Node payload of a term. Children are interned terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermNode {
    /// Free symbolic variable.
    Var(String),
    /// Constant; booleans are 0 or 1.
    Const(u64),
    /// Primitive operation.
    Prim(Op, Vec<Term>),
    /// Uninterpreted application, constrained only by congruence.
    Uninterp(String, Vec<Term>),
    /// Conditional merge.
    Ite(Term, Term, Term),
    /// Result `index` of a proven override applied to `args`.
    Override {
        name: String,
        index: usize,
        args: Vec<Term>,
    },
    /// Value of an undefined or don't-care memory cell.
    Undef { name: String, dont_care: bool },
}

#[derive(Debug)]
pub struct TermData {
    id: u64,
    sort: Sort,
    node: TermNode,
}

/// Immutable, shared, hash-consed term.
#[derive(Clone)]
pub struct Term(Arc<TermData>);

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

/// Concurrent interning table.
pub struct TermStore {
    table: DashMap<(Sort, TermNode), Term, FxBuildHasher>,
    next_id: AtomicU64,
}

impl Default for TermStore {
    fn default() -> Self {
        TermStore {
            table: DashMap::with_hasher(FxBuildHasher::default()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl TermStore {
    /// Return the unique term for `(sort, node)`, creating it if needed.
    pub fn intern(&self, sort: Sort, node: TermNode) -> Term {
        let key = (sort, node);
        if let Some(existing) = self.table.get(&key) {
            return existing.value().clone();
        }
        let node = key.1.clone();
        self.table
            .entry(key)
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
                Term(Arc::new(TermData { id, sort, node }))
            })
            .value()
            .clone()
    }

    /// Number of distinct terms interned so far.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// The process-wide store shared by all jobs.
pub fn store() -> &'static TermStore {
    static STORE: OnceLock<TermStore> = OnceLock::new();
    STORE.get_or_init(TermStore::default)
}

fn sort_error(op: &str, expected: impl fmt::Display, actual: Sort) -> TermError {
    TermError::SortMismatch {
        op: op.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

impl Term {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn sort(&self) -> Sort {
        self.0.sort
    }

    pub fn node(&self) -> &TermNode {
        &self.0.node
    }

    pub fn width(&self) -> u32 {
        self.0.sort.width()
    }

    pub fn as_const(&self) -> Option<u64> {
        match self.node() {
            TermNode::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (self.sort(), self.node()) {
            (Sort::Bool, TermNode::Const(v)) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    fn prim_parts(&self) -> Option<(Op, &[Term])> {
        match self.node() {
            TermNode::Prim(op, args) => Some((*op, args.as_slice())),
            _ => None,
        }
    }

    /// Immediate children in a fixed order.
    pub fn children(&self) -> Vec<Term> {
        match self.node() {
            TermNode::Var(_) | TermNode::Const(_) | TermNode::Undef { .. } => Vec::new(),
            TermNode::Prim(_, args) | TermNode::Uninterp(_, args) => args.clone(),
            TermNode::Override { args, .. } => args.clone(),
            TermNode::Ite(c, t, e) => vec![c.clone(), t.clone(), e.clone()],
        }
    }

    /// Rebuild this node over new children (same count and order as
    /// [`Term::children`]), re-running the smart constructors.
    pub fn with_children(&self, children: Vec<Term>) -> Result<Term, TermError> {
        match self.node() {
            TermNode::Var(_) | TermNode::Const(_) | TermNode::Undef { .. } => Ok(self.clone()),
            TermNode::Prim(op, _) => Term::prim(*op, children),
            TermNode::Uninterp(name, _) => Ok(Term::uninterp(name, children, self.sort())),
            TermNode::Override { name, index, .. } => {
                Ok(Term::override_app(name, *index, children, self.sort()))
            }
            TermNode::Ite(..) => {
                let mut it = children.into_iter();
                match (it.next(), it.next(), it.next()) {
                    (Some(c), Some(t), Some(e)) => Term::ite(&c, &t, &e),
                    _ => Err(TermError::Arity {
                        op: "ite".into(),
                        expected: 3,
                        actual: 0,
                    }),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    pub fn var(name: impl Into<String>, sort: Sort) -> Term {
        store().intern(sort, TermNode::Var(name.into()))
    }

    /// Bit-vector constant; the value is masked to `width`.
    pub fn bv(value: u64, width: u32) -> Result<Term, TermError> {
        let sort = Sort::bv(width)?;
        Ok(Term::constant(value, sort))
    }

    pub fn bool(value: bool) -> Term {
        store().intern(Sort::Bool, TermNode::Const(value as u64))
    }

    pub fn constant(value: u64, sort: Sort) -> Term {
        store().intern(sort, TermNode::Const(value & sort.mask()))
    }

    pub fn undef(name: impl Into<String>, sort: Sort, dont_care: bool) -> Term {
        store().intern(
            sort,
            TermNode::Undef {
                name: name.into(),
                dont_care,
            },
        )
    }

    pub fn uninterp(name: impl Into<String>, args: Vec<Term>, sort: Sort) -> Term {
        store().intern(sort, TermNode::Uninterp(name.into(), args))
    }

    pub fn override_app(name: impl Into<String>, index: usize, args: Vec<Term>, sort: Sort) -> Term {
        store().intern(
            sort,
            TermNode::Override {
                name: name.into(),
                index,
                args,
            },
        )
    }

    // ------------------------------------------------------------------
    // Conditional
    // ------------------------------------------------------------------

    pub fn ite(cond: &Term, then_t: &Term, else_t: &Term) -> Result<Term, TermError> {
        if !cond.sort().is_bool() {
            return Err(sort_error("ite", "bool", cond.sort()));
        }
        if then_t.sort() != else_t.sort() {
            return Err(sort_error("ite", then_t.sort(), else_t.sort()));
        }
        if let Some(c) = cond.as_bool() {
            return Ok(if c { then_t.clone() } else { else_t.clone() });
        }
        if then_t == else_t {
            return Ok(then_t.clone());
        }
        if then_t.sort().is_bool() {
            match (then_t.as_bool(), else_t.as_bool()) {
                (Some(true), Some(false)) => return Ok(cond.clone()),
                (Some(false), Some(true)) => return Term::not(cond),
                _ => {}
            }
        }
        // ite(c, ite(c, a, _), b) = ite(c, a, b)
        if let TermNode::Ite(c2, a, _) = then_t.node() {
            if c2 == cond {
                return Term::ite(cond, a, else_t);
            }
        }
        if let TermNode::Ite(c2, _, b) = else_t.node() {
            if c2 == cond {
                return Term::ite(cond, then_t, b);
            }
        }
        Ok(store().intern(
            then_t.sort(),
            TermNode::Ite(cond.clone(), then_t.clone(), else_t.clone()),
        ))
    }

    // ------------------------------------------------------------------
    // Primitive operations
    // ------------------------------------------------------------------

    /// Sort-checked primitive application with constant folding and local
    /// identities. The result always denotes the same value as the plain
    /// application.
    pub fn prim(op: Op, args: Vec<Term>) -> Result<Term, TermError> {
        let sorts: Vec<Sort> = args.iter().map(Term::sort).collect();
        let sort = op.result_sort(&sorts)?;

        if let Some(values) = args.iter().map(Term::as_const).collect::<Option<Vec<_>>>() {
            return Ok(Term::constant(op.eval(&values, &sorts), sort));
        }
        if let Some(t) = simplify_prim(op, &args, sort)? {
            return Ok(t);
        }
        Ok(store().intern(sort, TermNode::Prim(op, args)))
    }

    pub fn not(a: &Term) -> Result<Term, TermError> {
        Term::prim(Op::Not, vec![a.clone()])
    }

    pub fn and(a: &Term, b: &Term) -> Result<Term, TermError> {
        Term::prim(Op::And, vec![a.clone(), b.clone()])
    }

    pub fn or(a: &Term, b: &Term) -> Result<Term, TermError> {
        Term::prim(Op::Or, vec![a.clone(), b.clone()])
    }

    pub fn implies(a: &Term, b: &Term) -> Result<Term, TermError> {
        Term::prim(Op::Implies, vec![a.clone(), b.clone()])
    }

    pub fn eq(a: &Term, b: &Term) -> Result<Term, TermError> {
        Term::prim(Op::Eq, vec![a.clone(), b.clone()])
    }

    pub fn binary(op: Op, a: &Term, b: &Term) -> Result<Term, TermError> {
        Term::prim(op, vec![a.clone(), b.clone()])
    }

    pub fn extract(a: &Term, hi: u32, lo: u32) -> Result<Term, TermError> {
        Term::prim(Op::Extract { hi, lo }, vec![a.clone()])
    }

    pub fn concat(hi: &Term, lo: &Term) -> Result<Term, TermError> {
        Term::prim(Op::Concat, vec![hi.clone(), lo.clone()])
    }

    /// Conjunction of all terms (true when empty).
    pub fn and_all<'a>(terms: impl IntoIterator<Item = &'a Term>) -> Result<Term, TermError> {
        let mut acc = Term::bool(true);
        for t in terms {
            acc = Term::and(&acc, t)?;
        }
        Ok(acc)
    }

    /// Disjunction of all terms (false when empty).
    pub fn or_all<'a>(terms: impl IntoIterator<Item = &'a Term>) -> Result<Term, TermError> {
        let mut acc = Term::bool(false);
        for t in terms {
            acc = Term::or(&acc, t)?;
        }
        Ok(acc)
    }

    /// Number of distinct nodes reachable from this term.
    pub fn dag_size(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(t) = stack.pop() {
            if seen.insert(t.id()) {
                stack.extend(t.children());
            }
        }
        seen.len()
    }
}

fn is_zero(t: &Term) -> bool {
    t.as_const() == Some(0)
}

fn is_ones(t: &Term) -> bool {
    t.as_const() == Some(t.sort().mask())
}

fn simplify_prim(op: Op, args: &[Term], sort: Sort) -> Result<Option<Term>, TermError> {
    let zero = || Term::constant(0, sort);
    let out = match op {
        Op::Not => match args[0].prim_parts() {
            Some((Op::Not, inner)) => Some(inner[0].clone()),
            _ => None,
        },
        Op::And => {
            let (a, b) = (&args[0], &args[1]);
            if a.is_false() || b.is_false() {
                Some(Term::bool(false))
            } else if a.is_true() || a == b {
                Some(b.clone())
            } else if b.is_true() {
                Some(a.clone())
            } else {
                None
            }
        }
        Op::Or => {
            let (a, b) = (&args[0], &args[1]);
            if a.is_true() || b.is_true() {
                Some(Term::bool(true))
            } else if a.is_false() || a == b {
                Some(b.clone())
            } else if b.is_false() {
                Some(a.clone())
            } else {
                None
            }
        }
        Op::Implies => {
            let (a, b) = (&args[0], &args[1]);
            if a.is_false() || b.is_true() || a == b {
                Some(Term::bool(true))
            } else if a.is_true() {
                Some(b.clone())
            } else if b.is_false() {
                Some(Term::not(a)?)
            } else {
                None
            }
        }
        Op::Eq => {
            let (a, b) = (&args[0], &args[1]);
            if a == b {
                Some(Term::bool(true))
            } else if a.sort().is_bool() {
                match (a.as_bool(), b.as_bool()) {
                    (Some(true), _) => Some(b.clone()),
                    (_, Some(true)) => Some(a.clone()),
                    (Some(false), _) => Some(Term::not(b)?),
                    (_, Some(false)) => Some(Term::not(a)?),
                    _ => None,
                }
            } else {
                None
            }
        }
        Op::BvXor => {
            let (a, b) = (&args[0], &args[1]);
            if a == b {
                Some(zero())
            } else if is_zero(a) {
                Some(b.clone())
            } else if is_zero(b) {
                Some(a.clone())
            } else if let Some(t) = xor_cancel(a, b) {
                Some(t)
            } else {
                xor_cancel(b, a)
            }
        }
        Op::BvAnd => {
            let (a, b) = (&args[0], &args[1]);
            if is_zero(a) || is_zero(b) {
                Some(zero())
            } else if is_ones(a) || a == b {
                Some(b.clone())
            } else if is_ones(b) {
                Some(a.clone())
            } else {
                None
            }
        }
        Op::BvOr => {
            let (a, b) = (&args[0], &args[1]);
            if is_ones(a) || is_ones(b) {
                Some(Term::constant(sort.mask(), sort))
            } else if is_zero(a) || a == b {
                Some(b.clone())
            } else if is_zero(b) {
                Some(a.clone())
            } else {
                None
            }
        }
        Op::BvAdd => {
            if is_zero(&args[0]) {
                Some(args[1].clone())
            } else if is_zero(&args[1]) {
                Some(args[0].clone())
            } else {
                None
            }
        }
        Op::BvSub => {
            if args[0] == args[1] {
                Some(zero())
            } else if is_zero(&args[1]) {
                Some(args[0].clone())
            } else {
                None
            }
        }
        Op::BvMul => {
            let (a, b) = (&args[0], &args[1]);
            if is_zero(a) || is_zero(b) {
                Some(zero())
            } else if a.as_const() == Some(1) {
                Some(b.clone())
            } else if b.as_const() == Some(1) {
                Some(a.clone())
            } else {
                None
            }
        }
        Op::BvShl | Op::BvLshr => match args[1].as_const() {
            Some(0) => Some(args[0].clone()),
            Some(n) if n >= sort.width() as u64 => Some(zero()),
            _ => None,
        },
        Op::BvAshr | Op::BvRotl | Op::BvRotr => match args[1].as_const() {
            Some(0) => Some(args[0].clone()),
            Some(n) if op != Op::BvAshr && n % sort.width() as u64 == 0 => Some(args[0].clone()),
            _ => None,
        },
        Op::ZeroExt(0) | Op::SignExt(0) => Some(args[0].clone()),
        Op::Extract { hi, lo } => simplify_extract(&args[0], hi, lo)?,
        Op::Concat => simplify_concat(&args[0], &args[1])?,
        _ => None,
    };
    Ok(out)
}

/// `(x ^ y) ^ y = x` and `(x ^ y) ^ x = y`.
fn xor_cancel(outer: &Term, other: &Term) -> Option<Term> {
    match outer.prim_parts() {
        Some((Op::BvXor, inner)) if inner[1] == *other => Some(inner[0].clone()),
        Some((Op::BvXor, inner)) if inner[0] == *other => Some(inner[1].clone()),
        _ => None,
    }
}

fn simplify_extract(a: &Term, hi: u32, lo: u32) -> Result<Option<Term>, TermError> {
    if lo == 0 && hi + 1 == a.width() {
        return Ok(Some(a.clone()));
    }
    let Some((op, inner)) = a.prim_parts() else {
        return Ok(None);
    };
    match op {
        Op::Extract { lo: lo2, .. } => Ok(Some(Term::extract(&inner[0], hi + lo2, lo + lo2)?)),
        Op::Concat => {
            let low_w = inner[1].width();
            if hi < low_w {
                Ok(Some(Term::extract(&inner[1], hi, lo)?))
            } else if lo >= low_w {
                Ok(Some(Term::extract(&inner[0], hi - low_w, lo - low_w)?))
            } else {
                Ok(None)
            }
        }
        Op::ZeroExt(_) => {
            let w = inner[0].width();
            if hi < w {
                Ok(Some(Term::extract(&inner[0], hi, lo)?))
            } else if lo >= w {
                Ok(Some(Term::bv(0, hi - lo + 1)?))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

/// Re-merge adjacent slices of one term, including through a left-nested
/// concatenation, so that byte-wise stores followed by a wide load collapse.
fn simplify_concat(hi_t: &Term, lo_t: &Term) -> Result<Option<Term>, TermError> {
    if let (Some((Op::Extract { hi: h1, lo: l1 }, x)), Some((Op::Extract { hi: h2, lo: l2 }, y))) =
        (hi_t.prim_parts(), lo_t.prim_parts())
    {
        if x[0] == y[0] && l1 == h2 + 1 {
            return Ok(Some(Term::extract(&x[0], h1, l2)?));
        }
    }
    if let Some((Op::Concat, parts)) = hi_t.prim_parts() {
        if let Some(merged) = simplify_concat(&parts[1], lo_t)? {
            return Ok(Some(Term::concat(&parts[0], &merged)?));
        }
    }
    if let (Some(a), Some(b)) = (hi_t.as_const(), lo_t.as_const()) {
        let w = lo_t.width();
        return Ok(Some(Term::bv((a << w) | (b & mask(w)), hi_t.width() + w)?));
    }
    Ok(None)
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(self, f, 6)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(self, f, 6)
    }
}

fn write_args(args: &[Term], f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for a in args {
        write!(f, " ")?;
        write_term(a, f, depth)?;
    }
    Ok(())
}

fn write_term(t: &Term, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match t.node() {
        TermNode::Var(name) => write!(f, "{}", name),
        TermNode::Const(v) => match t.sort() {
            Sort::Bool => write!(f, "{}", *v != 0),
            Sort::BitVec(w) => write!(f, "{:#x}:{}", v, w),
        },
        TermNode::Undef { name, dont_care } => {
            write!(f, "{}{}", if *dont_care { "?dc:" } else { "?undef:" }, name)
        }
        _ if depth == 0 => write!(f, "#{}", t.id()),
        TermNode::Prim(op, args) => {
            write!(f, "({}", op.name())?;
            write_args(args, f, depth - 1)?;
            write!(f, ")")
        }
        TermNode::Uninterp(name, args) => {
            write!(f, "({}", name)?;
            write_args(args, f, depth - 1)?;
            write!(f, ")")
        }
        TermNode::Override { name, index, args } => {
            write!(f, "(override {}.{}", name, index)?;
            write_args(args, f, depth - 1)?;
            write!(f, ")")
        }
        TermNode::Ite(c, a, b) => {
            write!(f, "(ite")?;
            write_args(&[c.clone(), a.clone(), b.clone()], f, depth - 1)?;
            write!(f, ")")
        }
    }
}
