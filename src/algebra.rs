//! # Relational Algebra
//!
//! Operator nodes form a tree built once per function (by the program
//! parser) and evaluated per invocation. Evaluation recursively drives the
//! children, streams their tuples and produces a fresh [`TupleBuf`];
//! child buffers are consumed by value, so tuple ownership always moves
//! from child to parent. Nodes themselves stay immutable: aggregator state
//! is cloned per evaluation, which keeps shared function bodies reentrant
//! across calls.
//!
//! Operators on empty inputs are valid and produce well-typed empty
//! bodies.

use std::collections::HashMap;
use std::rc::Rc;

use crate::env::Func;
use crate::expr::{Expr, Params};
use crate::head::{Head, JoinSrc};
use crate::index;
use crate::summary::Summary;
use crate::tuple::{Tuple, TupleBuf};

/// Variables visible to one evaluation: globals materialized by the
/// processor plus temporaries and the relational parameter
#[derive(Debug, Default)]
pub struct VarScope {
    vals: HashMap<String, TupleBuf>,
}

impl VarScope {
    pub fn new() -> VarScope {
        VarScope::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, buf: TupleBuf) {
        self.vals.insert(name.into(), buf);
    }

    pub fn get(&self, name: &str) -> Option<&TupleBuf> {
        self.vals.get(name)
    }

    pub fn take(&mut self, name: &str) -> Option<TupleBuf> {
        self.vals.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vals.contains_key(name)
    }
}

/// A relational operator node
#[derive(Debug, Clone)]
pub enum Rel {
    /// Copy of a variable's current body
    Load { head: Head, name: String },
    /// Evaluate the child and replace the variable's body with the result
    Store { head: Head, name: String, child: Box<Rel> },
    Join {
        head: Head,
        common: Vec<(usize, usize)>,
        map: Vec<JoinSrc>,
        left: Box<Rel>,
        right: Box<Rel>,
    },
    Union {
        head: Head,
        common: Vec<(usize, usize)>,
        left: Box<Rel>,
        right: Box<Rel>,
    },
    Diff {
        head: Head,
        common: Vec<(usize, usize)>,
        left: Box<Rel>,
        right: Box<Rel>,
    },
    Project {
        head: Head,
        common: Vec<(usize, usize)>,
        child: Box<Rel>,
    },
    Rename { head: Head, map: Vec<usize>, child: Box<Rel> },
    Select { head: Head, pred: Expr, child: Box<Rel> },
    Extend {
        head: Head,
        exprs: Vec<Expr>,
        map: Vec<JoinSrc>,
        child: Box<Rel>,
    },
    Summarize {
        head: Head,
        common: Vec<(usize, usize)>,
        map: Vec<JoinSrc>,
        sums: Vec<Summary>,
        data: Box<Rel>,
        per: Box<Rel>,
    },
    SummarizeUnary { head: Head, sums: Vec<Summary>, child: Box<Rel> },
    /// Function call: a fresh parameter record and variable scope, the
    /// callee's statements, then write variables move back to the caller
    Call {
        func: Rc<Func>,
        args: Vec<Expr>,
        rel_arg: Option<Box<Rel>>,
    },
}

impl Rel {
    /// Result head; `None` only for calls to functions without a return
    pub fn head(&self) -> Option<&Head> {
        match self {
            Rel::Load { head, .. }
            | Rel::Store { head, .. }
            | Rel::Join { head, .. }
            | Rel::Union { head, .. }
            | Rel::Diff { head, .. }
            | Rel::Project { head, .. }
            | Rel::Rename { head, .. }
            | Rel::Select { head, .. }
            | Rel::Extend { head, .. }
            | Rel::Summarize { head, .. }
            | Rel::SummarizeUnary { head, .. } => Some(head),
            Rel::Call { func, .. } => func.ret.as_ref(),
        }
    }

    pub fn load(head: Head, name: impl Into<String>) -> Rel {
        Rel::Load { head, name: name.into() }
    }

    pub fn store(name: impl Into<String>, child: Rel) -> Rel {
        let head = child.head().expect("store of a headless relation").clone();
        Rel::Store { head, name: name.into(), child: Box::new(child) }
    }

    pub fn join(left: Rel, right: Rel) -> Rel {
        let lh = left.head().expect("join operand head");
        let rh = right.head().expect("join operand head");
        let (head, map) = lh.join(rh);
        let common = lh.common(rh);
        Rel::Join { head, common, map, left: Box::new(left), right: Box::new(right) }
    }

    /// Schema-equal union without duplicates
    pub fn union(left: Rel, right: Rel) -> Rel {
        let lh = left.head().expect("union operand head");
        let rh = right.head().expect("union operand head");
        let common = lh.common(rh);
        Rel::Union {
            head: lh.clone(),
            common,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Semidifference on the attributes shared by both operands
    pub fn diff(left: Rel, right: Rel) -> Rel {
        let lh = left.head().expect("diff operand head");
        let rh = right.head().expect("diff operand head");
        let common = lh.common(rh);
        Rel::Diff {
            head: lh.clone(),
            common,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `None` when a projected name is not in the child's head
    pub fn project(child: Rel, names: &[String]) -> Option<Rel> {
        let ch = child.head().expect("project operand head");
        let head = ch.project(names)?;
        let common = ch.common(&head);
        Some(Rel::Project { head, common, child: Box::new(child) })
    }

    /// `None` when a source name is missing or the renaming collides
    pub fn rename(child: Rel, from: &[String], to: &[String]) -> Option<Rel> {
        let ch = child.head().expect("rename operand head");
        let (head, map) = ch.rename(from, to)?;
        Some(Rel::Rename { head, map, child: Box::new(child) })
    }

    pub fn select(child: Rel, pred: Expr) -> Rel {
        let head = child.head().expect("select operand head").clone();
        Rel::Select { head, pred, child: Box::new(child) }
    }

    /// Extend with computed attributes; `None` on a name collision
    pub fn extend(child: Rel, attrs: Vec<(String, Expr)>) -> Option<Rel> {
        let ch = child.head().expect("extend operand head");

        let mut attrs = attrs;
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        if attrs.windows(2).any(|w| w[0].0 == w[1].0)
            || attrs.iter().any(|(n, _)| ch.find(n).is_some())
        {
            return None;
        }

        let synth = Head::new(
            attrs
                .iter()
                .map(|(n, e)| (n.clone(), e.data_type()))
                .collect(),
        );
        let (head, map) = ch.join(&synth);
        let exprs = attrs.into_iter().map(|(_, e)| e).collect();
        Some(Rel::Extend { head, exprs, map, child: Box::new(child) })
    }

    /// Grouped summarize: one output row per `per` row; `None` when an
    /// aggregate name collides with a `per` attribute
    pub fn summarize(data: Rel, per: Rel, sums: Vec<(String, Summary)>) -> Option<Rel> {
        let dh = data.head().expect("summarize operand head");
        let ph = per.head().expect("summarize per head");

        let mut sums = sums;
        sums.sort_by(|a, b| a.0.cmp(&b.0));
        if sums.windows(2).any(|w| w[0].0 == w[1].0)
            || sums.iter().any(|(n, _)| ph.find(n).is_some())
        {
            return None;
        }

        let shead = Head::new(
            sums.iter()
                .map(|(n, s)| (n.clone(), s.output_type()))
                .collect(),
        );
        let common = dh.common(ph);
        let (head, map) = ph.join(&shead);
        let sums = sums.into_iter().map(|(_, s)| s).collect();
        Some(Rel::Summarize {
            head,
            common,
            map,
            sums,
            data: Box::new(data),
            per: Box::new(per),
        })
    }

    /// Unary summarize: aggregators over the whole input, single output row
    pub fn summarize_unary(child: Rel, sums: Vec<(String, Summary)>) -> Option<Rel> {
        let mut sums = sums;
        sums.sort_by(|a, b| a.0.cmp(&b.0));
        if sums.windows(2).any(|w| w[0].0 == w[1].0) {
            return None;
        }

        let head = Head::new(
            sums.iter()
                .map(|(n, s)| (n.clone(), s.output_type()))
                .collect(),
        );
        let sums = sums.into_iter().map(|(_, s)| s).collect();
        Some(Rel::SummarizeUnary { head, sums, child: Box::new(child) })
    }

    pub fn call(func: Rc<Func>, args: Vec<Expr>, rel_arg: Option<Rel>) -> Rel {
        Rel::Call { func, args, rel_arg: rel_arg.map(Box::new) }
    }

    /// Evaluate the node against the variable scope and parameter record
    pub fn eval(&self, vars: &mut VarScope, params: &Params) -> TupleBuf {
        match self {
            Rel::Load { name, .. } => {
                let src = vars.get(name).expect("load of an unbound variable");
                src.iter().cloned().collect()
            }

            Rel::Store { name, child, .. } => {
                let body = child.eval(vars, params);
                vars.insert(name.clone(), body);
                TupleBuf::new()
            }

            Rel::Join { common, map, left, right, .. } => {
                let mut lb = left.eval(vars, params);
                let rb = right.eval(vars, params);

                let lpos: Vec<usize> = common.iter().map(|c| c.0).collect();
                let rpos: Vec<usize> = common.iter().map(|c| c.1).collect();
                index::sort(&mut lb, &lpos);

                let mut out = TupleBuf::new();
                for rt in rb {
                    for i in index::match_range(&lb, &rt, &lpos, &rpos) {
                        out.push(Tuple::join(lb.get(i), &rt, map));
                    }
                }
                out
            }

            Rel::Union { common, left, right, .. } => {
                let lb = left.eval(vars, params);
                let mut rb = right.eval(vars, params);

                let lpos: Vec<usize> = common.iter().map(|c| c.0).collect();
                let rpos: Vec<usize> = common.iter().map(|c| c.1).collect();
                index::sort(&mut rb, &rpos);

                let mut out = TupleBuf::new();
                for lt in lb {
                    if !index::has(&rb, &lt, &rpos, &lpos) {
                        out.push(lt);
                    }
                }
                for rt in rb {
                    out.push(rt);
                }
                out
            }

            Rel::Diff { common, left, right, .. } => {
                let lb = left.eval(vars, params);
                let mut rb = right.eval(vars, params);

                let lpos: Vec<usize> = common.iter().map(|c| c.0).collect();
                let rpos: Vec<usize> = common.iter().map(|c| c.1).collect();
                index::sort(&mut rb, &rpos);

                let mut out = TupleBuf::new();
                for lt in lb {
                    if !index::has(&rb, &lt, &rpos, &lpos) {
                        out.push(lt);
                    }
                }
                out
            }

            Rel::Project { common, child, .. } => {
                let mut cb = child.eval(vars, params);

                // child and output are both name-sorted, so the common
                // pairs arrive in output order and the output stays sorted:
                // dedup is a binary search against what was emitted so far
                let lpos: Vec<usize> = common.iter().map(|c| c.0).collect();
                let rpos: Vec<usize> = common.iter().map(|c| c.1).collect();
                index::sort(&mut cb, &lpos);

                let mut out = TupleBuf::new();
                for t in cb {
                    if !index::has(&out, &t, &rpos, &lpos) {
                        out.push(t.reorder(&lpos));
                    }
                }
                out
            }

            Rel::Rename { map, child, .. } => {
                let cb = child.eval(vars, params);
                cb.into_iter().map(|t| t.reorder(map)).collect()
            }

            Rel::Select { pred, child, .. } => {
                let cb = child.eval(vars, params);
                cb.into_iter()
                    .filter(|t| pred.eval_bool(Some(t), params))
                    .collect()
            }

            Rel::Extend { exprs, map, child, .. } => {
                let cb = child.eval(vars, params);
                let mut out = TupleBuf::new();
                for t in cb {
                    let vals = exprs.iter().map(|e| e.eval(Some(&t), params)).collect();
                    let synth = Tuple::new(vals);
                    out.push(Tuple::join(&t, &synth, map));
                }
                out
            }

            Rel::Summarize { common, map, sums, data, per, .. } => {
                let mut db = data.eval(vars, params);
                let pb = per.eval(vars, params);

                let lpos: Vec<usize> = common.iter().map(|c| c.0).collect();
                let rpos: Vec<usize> = common.iter().map(|c| c.1).collect();
                index::sort(&mut db, &lpos);

                let mut sums = sums.clone();
                let mut out = TupleBuf::new();
                for pt in pb {
                    for s in &mut sums {
                        s.reset();
                    }
                    for i in index::match_range(&db, &pt, &lpos, &rpos) {
                        for s in &mut sums {
                            s.update(db.get(i));
                        }
                    }
                    let vals = sums.iter().map(Summary::value).collect();
                    let st = Tuple::new(vals);
                    out.push(Tuple::join(&pt, &st, map));
                }
                out
            }

            Rel::SummarizeUnary { sums, child, .. } => {
                let cb = child.eval(vars, params);
                let mut sums = sums.clone();
                for s in &mut sums {
                    s.reset();
                }
                for t in cb {
                    for s in &mut sums {
                        s.update(&t);
                    }
                }
                let vals = sums.iter().map(Summary::value).collect();
                let mut out = TupleBuf::new();
                out.push(Tuple::new(vals));
                out
            }

            Rel::Call { func, args, rel_arg } => {
                let call_params =
                    Params::new(args.iter().map(|e| e.eval(None, params)).collect());

                // read variables move into the callee, write and temp
                // variables start empty
                let mut inner = VarScope::new();
                for name in &func.read {
                    if !inner.contains(name) {
                        let body = vars.take(name).expect("read variable missing in caller");
                        inner.insert(name.clone(), body);
                    }
                }
                for name in func.write.iter().chain(&func.temp) {
                    if !inner.contains(name) {
                        inner.insert(name.clone(), TupleBuf::new());
                    }
                }
                if let (Some(rel), Some(rp)) = (rel_arg, &func.rel_param) {
                    let body = rel.eval(vars, params);
                    inner.insert(rp.name.clone(), body);
                }

                let mut last = TupleBuf::new();
                for stmt in &func.stmts {
                    last = stmt.eval(&mut inner, &call_params);
                }
                let result = if func.ret.is_some() { last } else { TupleBuf::new() };

                // write variables move back; untouched read variables
                // return too so the caller can keep using them
                for name in &func.write {
                    let body = inner.take(name).expect("write variable missing in callee");
                    vars.insert(name.clone(), body);
                }
                for name in &func.read {
                    if let Some(body) = inner.take(name) {
                        vars.insert(name.clone(), body);
                    }
                }

                result
            }
        }
    }
}

/// Set equality of two bodies under a shared head; used by tests
pub fn body_eq(head: &Head, left: &TupleBuf, right: &TupleBuf) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let pos: Vec<usize> = (0..head.len()).collect();
    let mut idx = left.clone();
    index::sort(&mut idx, &pos);
    right.iter().all(|t| index::has(&idx, t, &pos, &pos))
}
