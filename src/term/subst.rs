//! Bottom-up term rewriting and variable substitution.

use crate::error::TermError;
use crate::term::store::{Term, TermNode};
use std::collections::HashMap;

/// Memo table keyed by term id.
pub type Memo = HashMap<u64, Term>;

/// Rebuild `term` bottom-up, offering every rebuilt node to `f`. A node
/// replaced by `f` is not revisited. Results are memoized by id so shared
/// subterms are rewritten once.
pub fn transform<F>(term: &Term, memo: &mut Memo, f: &mut F) -> Result<Term, TermError>
where
    F: FnMut(&Term) -> Result<Option<Term>, TermError>,
{
    if let Some(done) = memo.get(&term.id()) {
        return Ok(done.clone());
    }
    let children = term.children();
    let rebuilt = if children.is_empty() {
        term.clone()
    } else {
        let mut changed = false;
        let mut next = Vec::with_capacity(children.len());
        for child in &children {
            let c = transform(child, memo, f)?;
            changed |= c != *child;
            next.push(c);
        }
        if changed {
            term.with_children(next)?
        } else {
            term.clone()
        }
    };
    let result = f(&rebuilt)?.unwrap_or(rebuilt);
    memo.insert(term.id(), result.clone());
    Ok(result)
}

/// Replace free variables by name.
pub fn substitute(term: &Term, bindings: &HashMap<String, Term>) -> Result<Term, TermError> {
    if bindings.is_empty() {
        return Ok(term.clone());
    }
    let mut memo = Memo::new();
    transform(term, &mut memo, &mut |t| match t.node() {
        TermNode::Var(name) => Ok(bindings.get(name).filter(|b| b.sort() == t.sort()).cloned()),
        _ => Ok(None),
    })
}

/// Visit every distinct node reachable from `roots` once.
pub fn visit<F: FnMut(&Term)>(roots: &[Term], mut f: F) {
    let mut seen = std::collections::HashSet::new();
    let mut stack: Vec<Term> = roots.to_vec();
    while let Some(t) = stack.pop() {
        if seen.insert(t.id()) {
            f(&t);
            stack.extend(t.children());
        }
    }
}
