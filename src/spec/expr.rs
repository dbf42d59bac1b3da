//! Pure specification language: total functions over bit-vectors.

use crate::term::{Op, Sort};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Specification expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Var(String),
    Lit { value: u64, width: u32 },
    Bool(bool),
    Prim(Op, Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Let(String, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    /// Several results; only valid as a function body or call result.
    Tuple(Vec<Expr>),
    /// Destructure a multi-result call.
    LetTuple(Vec<String>, Box<Expr>, Box<Expr>),
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn lit(value: u64, width: u32) -> Expr {
    Expr::Lit { value, width }
}

pub fn prim(op: Op, args: Vec<Expr>) -> Expr {
    Expr::Prim(op, args)
}

pub fn bin(op: Op, a: Expr, b: Expr) -> Expr {
    Expr::Prim(op, vec![a, b])
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(name.to_string(), args)
}

pub fn ite(c: Expr, t: Expr, e: Expr) -> Expr {
    Expr::If(Box::new(c), Box::new(t), Box::new(e))
}

pub fn let_in(name: &str, value: Expr, body: Expr) -> Expr {
    Expr::Let(name.to_string(), Box::new(value), Box::new(body))
}

pub fn let_tuple(names: &[&str], value: Expr, body: Expr) -> Expr {
    Expr::LetTuple(
        names.iter().map(|n| n.to_string()).collect(),
        Box::new(value),
        Box::new(body),
    )
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    Expr::Tuple(items)
}

/// A named specification function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecFn {
    pub name: String,
    pub params: Vec<(String, Sort)>,
    pub results: Vec<Sort>,
    pub body: Expr,
}

impl SpecFn {
    pub fn new(name: &str, params: &[(&str, Sort)], results: &[Sort], body: Expr) -> Self {
        SpecFn {
            name: name.to_string(),
            params: params.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            results: results.to_vec(),
            body,
        }
    }
}

/// Collection of specification functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecModule {
    pub functions: BTreeMap<String, SpecFn>,
}

impl SpecModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, function: SpecFn) -> &mut Self {
        self.functions.insert(function.name.clone(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SpecFn> {
        self.functions.get(name)
    }

    /// Content digest of `root` and every specification function it calls.
    pub fn digest_of(&self, root: &str) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        let mut seen = std::collections::BTreeSet::new();
        let mut stack = vec![root.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            name.hash(&mut hasher);
            if let Some(f) = self.functions.get(&name) {
                f.hash(&mut hasher);
                collect_calls(&f.body, &mut stack);
            }
        }
        hasher.finish()
    }
}

fn collect_calls(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Var(_) | Expr::Lit { .. } | Expr::Bool(_) => {}
        Expr::Prim(_, args) | Expr::Tuple(args) => args.iter().for_each(|a| collect_calls(a, out)),
        Expr::Call(name, args) => {
            out.push(name.clone());
            args.iter().for_each(|a| collect_calls(a, out));
        }
        Expr::If(c, t, e) => {
            collect_calls(c, out);
            collect_calls(t, out);
            collect_calls(e, out);
        }
        Expr::Let(_, v, b) | Expr::LetTuple(_, v, b) => {
            collect_calls(v, out);
            collect_calls(b, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_follows_calls() {
        let bv = Sort::BitVec(8);
        let mut m = SpecModule::new();
        m.add(SpecFn::new("leaf", &[("x", bv)], &[bv], var("x")));
        m.add(SpecFn::new("top", &[("x", bv)], &[bv], call("leaf", vec![var("x")])));
        let before = m.digest_of("top");
        m.add(SpecFn::new("leaf", &[("x", bv)], &[bv], lit(0, 8)));
        assert_ne!(before, m.digest_of("top"));
    }
}
