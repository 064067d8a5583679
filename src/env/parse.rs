//! Program source parser and type checker.
//!
//! Hand-written scanner and recursive descent over the declaration forms
//! (`type`, `var`, `fn`) producing operator trees directly. Read, write and
//! temporary variable sets are inferred from the statements: a global read
//! before any assignment to it joins the read set, an assigned global joins
//! the write set, and calls pull the callee's sets into the caller.
//! `#` starts a line comment.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::algebra::Rel;
use crate::error::{ParseError, ParseResult};
use crate::expr::{ArithOp, CmpOp, Expr};
use crate::head::Head;
use crate::limits::{MAX_ATTRS, MAX_NAME, MAX_STMTS, MAX_STRING, MAX_TYPES, MAX_VARS};
use crate::summary::Summary;
use crate::value::{DataType, Value};

use super::{Environment, Func, RelParam};

const RESERVED: &[&str] = &[
    "type", "var", "fn", "return", "join", "union", "minus", "project", "rename", "select",
    "extend", "summary", "per", "cnt", "min", "max", "avg", "add", "time", "index", "int", "long",
    "real", "string",
];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(String),
    Str(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn err(line: usize, msg: impl Into<String>) -> ParseError {
    ParseError::new(line, msg)
}

fn lex(src: &str) -> ParseResult<Vec<Token>> {
    let mut toks = Vec::new();
    let bytes: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut line = 1;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '_') {
                    i += 1;
                }
                let name: String = bytes[start..i].iter().collect();
                if name.len() >= MAX_NAME {
                    return Err(err(line, format!("identifier '{name}' is too long")));
                }
                toks.push(Token { tok: Tok::Ident(name), line });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == '.' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                toks.push(Token {
                    tok: Tok::Num(bytes[start..i].iter().collect()),
                    line,
                });
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    match bytes.get(i) {
                        None | Some('\n') => return Err(err(line, "unterminated string")),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            if let Some(&esc) = bytes.get(i + 1) {
                                s.push(esc);
                                i += 2;
                            } else {
                                return Err(err(line, "unterminated string"));
                            }
                        }
                        Some(&c) => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                if s.len() > MAX_STRING {
                    return Err(err(line, "string literal is too long"));
                }
                toks.push(Token { tok: Tok::Str(s), line });
            }
            _ => {
                let two: String = bytes[i..bytes.len().min(i + 2)].iter().collect();
                let punct = match two.as_str() {
                    "==" | "!=" | "<=" | ">=" | "&&" | "||" => {
                        i += 2;
                        match two.as_str() {
                            "==" => "==",
                            "!=" => "!=",
                            "<=" => "<=",
                            ">=" => ">=",
                            "&&" => "&&",
                            _ => "||",
                        }
                    }
                    _ => {
                        let single = match c {
                            '=' => "=",
                            '(' => "(",
                            ')' => ")",
                            '{' => "{",
                            '}' => "}",
                            ',' => ",",
                            ';' => ";",
                            ':' => ":",
                            '<' => "<",
                            '>' => ">",
                            '!' => "!",
                            '+' => "+",
                            '-' => "-",
                            '*' => "*",
                            '/' => "/",
                            _ => return Err(err(line, format!("unexpected character '{c}'"))),
                        };
                        i += 1;
                        single
                    }
                };
                toks.push(Token { tok: Tok::Punct(punct), line });
            }
        }
    }

    toks.push(Token { tok: Tok::Eof, line });
    Ok(toks)
}

pub(super) fn parse_program(source: &str) -> ParseResult<Environment> {
    let toks = lex(source)?;
    let mut p = Parser { toks, pos: 0, env: Environment::default() };
    p.program()?;
    Ok(p.env)
}

/// Inference state while checking one function body
struct BodyCtx {
    prim_params: Vec<(String, DataType)>,
    rel_param: Option<RelParam>,
    /// heads of temporaries, by name
    locals: HashMap<String, Head>,
    /// names assigned so far; a later load reads the local value
    written: HashSet<String>,
    read: Vec<String>,
    write: Vec<String>,
    temp: Vec<String>,
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
    env: Environment,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn line(&self) -> usize {
        self.toks[self.pos].line
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, p: &'static str) -> bool {
        if self.peek() == &Tok::Punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> ParseResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(err(self.line(), format!("expected '{p}'")))
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        let line = self.line();
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            _ => Err(err(line, "expected an identifier")),
        }
    }

    /// An identifier usable as a declared name
    fn fresh_ident(&mut self) -> ParseResult<String> {
        let line = self.line();
        let name = self.ident()?;
        if RESERVED.contains(&name.as_str()) {
            return Err(err(line, format!("'{name}' is a reserved word")));
        }
        Ok(name)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Tok::Ident(name) => Some(name),
            _ => None,
        }
    }

    fn program(&mut self) -> ParseResult<()> {
        loop {
            let line = self.line();
            match self.peek_ident() {
                Some("type") => self.type_decl()?,
                Some("var") => self.var_decl()?,
                Some("fn") => self.fn_decl()?,
                _ => {
                    if self.peek() == &Tok::Eof {
                        return Ok(());
                    }
                    return Err(err(line, "expected 'type', 'var' or 'fn'"));
                }
            }
        }
    }

    fn scalar_type(&mut self) -> ParseResult<DataType> {
        let line = self.line();
        let name = self.ident()?;
        DataType::from_name(&name)
            .ok_or_else(|| err(line, format!("'{name}' is not a scalar type")))
    }

    fn type_decl(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.advance(); // type
        let name = self.fresh_ident()?;
        if self.env.type_head(&name).is_some() {
            return Err(err(line, format!("type '{name}' is already defined")));
        }
        if self.env.types.len() >= MAX_TYPES {
            return Err(err(line, "too many type declarations"));
        }

        self.expect_punct("{")?;
        let mut attrs: Vec<(String, DataType)> = Vec::new();
        loop {
            let aline = self.line();
            let attr = self.fresh_ident()?;
            if attrs.iter().any(|(n, _)| n == &attr) {
                return Err(err(aline, format!("duplicate attribute '{attr}'")));
            }
            let ty = self.scalar_type()?;
            attrs.push((attr, ty));
            if attrs.len() > MAX_ATTRS {
                return Err(err(aline, "too many attributes"));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;

        self.env.types.push((name, Head::new(attrs)));
        Ok(())
    }

    fn var_decl(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.advance(); // var
        let name = self.fresh_ident()?;
        if self.env.head(&name).is_some() {
            return Err(err(line, format!("variable '{name}' is already defined")));
        }
        if self.env.vars.len() >= MAX_VARS {
            return Err(err(line, "too many variables"));
        }

        let tline = self.line();
        let tname = self.ident()?;
        let head = self
            .env
            .type_head(&tname)
            .ok_or_else(|| err(tline, format!("unknown type '{tname}'")))?
            .clone();
        self.expect_punct(";")?;

        self.env.vars.push((name, head));
        Ok(())
    }

    fn fn_decl(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.advance(); // fn
        let name = self.fresh_ident()?;
        if self.env.func(&name).is_some() {
            return Err(err(line, format!("function '{name}' is already defined")));
        }

        self.expect_punct("(")?;
        let mut ctx = BodyCtx {
            prim_params: Vec::new(),
            rel_param: None,
            locals: HashMap::new(),
            written: HashSet::new(),
            read: Vec::new(),
            write: Vec::new(),
            temp: Vec::new(),
        };

        let mut param_pos = 0usize;
        if !self.eat_punct(")") {
            loop {
                let pline = self.line();
                let pname = self.fresh_ident()?;
                if ctx.prim_params.iter().any(|(n, _)| n == &pname)
                    || ctx.rel_param.as_ref().is_some_and(|rp| rp.name == pname)
                {
                    return Err(err(pline, format!("duplicate parameter '{pname}'")));
                }

                let tline = self.line();
                let tname = self.ident()?;
                match DataType::from_name(&tname) {
                    Some(ty) => ctx.prim_params.push((pname, ty)),
                    None => {
                        let head = self
                            .env
                            .type_head(&tname)
                            .ok_or_else(|| err(tline, format!("unknown type '{tname}'")))?
                            .clone();
                        if ctx.rel_param.is_some() {
                            return Err(err(pline, "at most one relational parameter"));
                        }
                        ctx.rel_param = Some(RelParam { name: pname, head, pos: param_pos });
                    }
                }
                param_pos += 1;
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }

        let ret = if self.eat_punct(":") {
            let tline = self.line();
            let tname = self.ident()?;
            let head = self
                .env
                .type_head(&tname)
                .ok_or_else(|| err(tline, format!("unknown type '{tname}'")))?
                .clone();
            Some(head)
        } else {
            None
        };

        self.expect_punct("{")?;
        let mut stmts: Vec<Rel> = Vec::new();
        let mut returned = false;
        while !self.eat_punct("}") {
            let sline = self.line();
            if returned {
                return Err(err(sline, "'return' must be the last statement"));
            }
            if stmts.len() >= MAX_STMTS {
                return Err(err(sline, "too many statements"));
            }

            if self.peek_ident() == Some("return") {
                self.advance();
                let node = self.rexpr(&mut ctx)?;
                self.expect_punct(";")?;
                let want = ret
                    .as_ref()
                    .ok_or_else(|| err(sline, "function declares no return type"))?;
                let got = node.head().ok_or_else(|| err(sline, "returning nothing"))?;
                if got != want {
                    return Err(err(
                        sline,
                        format!("return head {got} does not match declared {want}"),
                    ));
                }
                stmts.push(node);
                returned = true;
            } else {
                let name = self.fresh_ident()?;
                if self.eat_punct("=") {
                    let node = self.assignment(&mut ctx, &name, sline)?;
                    self.expect_punct(";")?;
                    stmts.push(node);
                } else if self.peek() == &Tok::Punct("(") {
                    let node = self.call(&mut ctx, &name, sline, false)?;
                    self.expect_punct(";")?;
                    stmts.push(node);
                } else {
                    return Err(err(sline, "expected '=' or '(' after identifier"));
                }
            }
        }

        if ret.is_some() && !returned {
            return Err(err(line, format!("function '{name}' must end with 'return'")));
        }

        self.env.funcs.push(Rc::new(Func {
            name,
            ret,
            read: ctx.read,
            write: ctx.write,
            temp: ctx.temp,
            prim_params: ctx.prim_params,
            rel_param: ctx.rel_param,
            stmts,
        }));
        Ok(())
    }

    fn assignment(&mut self, ctx: &mut BodyCtx, name: &str, line: usize) -> ParseResult<Rel> {
        if ctx.prim_params.iter().any(|(n, _)| n == name)
            || ctx.rel_param.as_ref().is_some_and(|rp| rp.name == name)
        {
            return Err(err(line, format!("cannot assign to parameter '{name}'")));
        }

        let node = self.rexpr(ctx)?;
        let got = node.head().ok_or_else(|| err(line, "assigning nothing"))?;

        if let Some(head) = self.env.head(name) {
            if got != head {
                return Err(err(
                    line,
                    format!("'{name}' has head {head}, assigned {got}"),
                ));
            }
            if !ctx.write.iter().any(|w| w == name) {
                ctx.write.push(name.to_string());
            }
        } else {
            match ctx.locals.get(name) {
                Some(head) if head != got => {
                    return Err(err(
                        line,
                        format!("'{name}' has head {head}, assigned {got}"),
                    ));
                }
                Some(_) => {}
                None => {
                    ctx.locals.insert(name.to_string(), got.clone());
                    ctx.temp.push(name.to_string());
                }
            }
        }

        ctx.written.insert(name.to_string());
        Ok(Rel::store(name, node))
    }

    /// A variable read joins the read set unless an earlier statement
    /// already assigned it
    fn mark_read(ctx: &mut BodyCtx, name: &str) {
        if !ctx.written.contains(name) && !ctx.read.iter().any(|r| r == name) {
            ctx.read.push(name.to_string());
        }
    }

    fn rexpr(&mut self, ctx: &mut BodyCtx) -> ParseResult<Rel> {
        let line = self.line();
        let name = self.ident()?;
        match name.as_str() {
            "join" | "union" | "minus" => {
                self.expect_punct("(")?;
                let left = self.rexpr(ctx)?;
                self.expect_punct(",")?;
                let right = self.rexpr(ctx)?;
                self.expect_punct(")")?;

                match name.as_str() {
                    "join" => Ok(Rel::join(left, right)),
                    "minus" => Ok(Rel::diff(left, right)),
                    _ => {
                        if left.head() != right.head() {
                            return Err(err(line, "union operands must have equal heads"));
                        }
                        Ok(Rel::union(left, right))
                    }
                }
            }

            "project" => {
                self.expect_punct("(")?;
                let child = self.rexpr(ctx)?;
                let mut names = Vec::new();
                while self.eat_punct(",") {
                    names.push(self.fresh_ident()?);
                }
                self.expect_punct(")")?;
                if names.is_empty() {
                    return Err(err(line, "project needs at least one attribute"));
                }
                Rel::project(child, &names)
                    .ok_or_else(|| err(line, "project of an unknown attribute"))
            }

            "rename" => {
                self.expect_punct("(")?;
                let child = self.rexpr(ctx)?;
                let mut from = Vec::new();
                let mut to = Vec::new();
                while self.eat_punct(",") {
                    from.push(self.fresh_ident()?);
                    self.expect_punct("=")?;
                    to.push(self.fresh_ident()?);
                }
                self.expect_punct(")")?;
                if from.is_empty() {
                    return Err(err(line, "rename needs at least one pair"));
                }
                Rel::rename(child, &from, &to)
                    .ok_or_else(|| err(line, "invalid rename (unknown source or collision)"))
            }

            "select" => {
                self.expect_punct("(")?;
                let child = self.rexpr(ctx)?;
                self.expect_punct(",")?;
                let head = child.head().expect("select operand head").clone();
                let pred = self.pexpr(ctx, Some(&head))?;
                self.expect_punct(")")?;
                if pred.data_type() != DataType::Int {
                    return Err(err(line, "selection predicate must be boolean"));
                }
                Ok(Rel::select(child, pred))
            }

            "extend" => {
                self.expect_punct("(")?;
                let child = self.rexpr(ctx)?;
                let head = child.head().expect("extend operand head").clone();
                let mut attrs = Vec::new();
                while self.eat_punct(",") {
                    let aname = self.fresh_ident()?;
                    self.expect_punct("=")?;
                    attrs.push((aname, self.pexpr(ctx, Some(&head))?));
                }
                self.expect_punct(")")?;
                if attrs.is_empty() {
                    return Err(err(line, "extend needs at least one attribute"));
                }
                Rel::extend(child, attrs)
                    .ok_or_else(|| err(line, "extend attribute collides with the input"))
            }

            "summary" => {
                self.expect_punct("(")?;
                let data = self.rexpr(ctx)?;
                let dhead = data.head().expect("summary operand head").clone();

                let mut per = None;
                self.expect_punct(",")?;
                if self.peek_ident() == Some("per") {
                    self.advance();
                    per = Some(self.rexpr(ctx)?);
                    self.expect_punct(",")?;
                }

                let mut sums = Vec::new();
                loop {
                    let sname = self.fresh_ident()?;
                    self.expect_punct("=")?;
                    sums.push((sname, self.aggregate(&dhead)?));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;

                match per {
                    Some(per) => Rel::summarize(data, per, sums)
                        .ok_or_else(|| err(line, "summary attribute collides with 'per'")),
                    None => Rel::summarize_unary(data, sums)
                        .ok_or_else(|| err(line, "duplicate summary attribute")),
                }
            }

            _ => {
                if self.peek() == &Tok::Punct("(") {
                    return self.call(ctx, &name, line, true);
                }
                self.var_ref(ctx, &name, line)
            }
        }
    }

    fn var_ref(&mut self, ctx: &mut BodyCtx, name: &str, line: usize) -> ParseResult<Rel> {
        if let Some(rp) = &ctx.rel_param {
            if rp.name == name {
                return Ok(Rel::load(rp.head.clone(), name));
            }
        }
        if let Some(head) = ctx.locals.get(name) {
            if !ctx.written.contains(name) {
                return Err(err(line, format!("'{name}' is used before assignment")));
            }
            return Ok(Rel::load(head.clone(), name));
        }
        if let Some(head) = self.env.head(name) {
            let head = head.clone();
            Self::mark_read(ctx, name);
            return Ok(Rel::load(head, name));
        }
        Err(err(line, format!("unknown variable '{name}'")))
    }

    /// Call to a previously defined function. `as_expr` requires a return
    /// head; a bare call statement accepts either.
    fn call(&mut self, ctx: &mut BodyCtx, name: &str, line: usize, as_expr: bool) -> ParseResult<Rel> {
        let func = self
            .env
            .func(name)
            .ok_or_else(|| err(line, format!("unknown function '{name}'")))?
            .clone();
        if as_expr && func.ret.is_none() {
            return Err(err(line, format!("function '{name}' returns nothing")));
        }

        self.expect_punct("(")?;
        let total = func.prim_params.len() + usize::from(func.rel_param.is_some());
        let mut args = Vec::new();
        let mut rel_arg = None;
        let mut prim_idx = 0;
        for i in 0..total {
            if i > 0 {
                self.expect_punct(",")?;
            }
            let aline = self.line();
            if func.rel_param.as_ref().is_some_and(|rp| rp.pos == i) {
                let node = self.rexpr(ctx)?;
                let rp = func.rel_param.as_ref().expect("relational parameter");
                let got = node.head().ok_or_else(|| err(aline, "passing nothing"))?;
                if got != &rp.head {
                    return Err(err(
                        aline,
                        format!("argument head {got} does not match {}", rp.head),
                    ));
                }
                rel_arg = Some(node);
            } else {
                let want = func.prim_params[prim_idx].1;
                prim_idx += 1;
                let e = self.pexpr(ctx, None)?;
                if e.data_type() != want {
                    return Err(err(
                        aline,
                        format!("argument is {}, expected {want}", e.data_type()),
                    ));
                }
                args.push(e);
            }
        }
        self.expect_punct(")")?;

        // the callee's globals flow through the caller's transaction
        for r in func.read.clone() {
            Self::mark_read(ctx, &r);
        }
        for w in func.write.clone() {
            if !ctx.write.iter().any(|x| x == &w) {
                ctx.write.push(w.clone());
            }
            ctx.written.insert(w);
        }

        Ok(Rel::call(func, args, rel_arg))
    }

    fn aggregate(&mut self, data_head: &Head) -> ParseResult<Summary> {
        let line = self.line();
        let name = self.ident()?;
        self.expect_punct("(")?;

        if name == "cnt" {
            self.expect_punct(")")?;
            return Ok(Summary::cnt());
        }

        let aline = self.line();
        let attr = self.ident()?;
        let (pos, ty) = data_head
            .attr(&attr)
            .ok_or_else(|| err(aline, format!("unknown attribute '{attr}'")))?;
        if !ty.is_numeric() {
            return Err(err(aline, format!("'{attr}' is not numeric")));
        }
        self.expect_punct(",")?;
        let def = self.literal()?;
        self.expect_punct(")")?;

        match name.as_str() {
            "min" | "max" | "add" => {
                if def.data_type() != ty {
                    return Err(err(
                        line,
                        format!("default is {}, expected {ty}", def.data_type()),
                    ));
                }
                Ok(match name.as_str() {
                    "min" => Summary::min(pos, def),
                    "max" => Summary::max(pos, def),
                    _ => Summary::add(pos, ty, def),
                })
            }
            "avg" => match def {
                Value::Real(d) => Ok(Summary::avg(pos, ty, d)),
                _ => Err(err(line, "avg default must be a real")),
            },
            _ => Err(err(line, format!("unknown aggregate '{name}'"))),
        }
    }

    fn literal(&mut self) -> ParseResult<Value> {
        let line = self.line();
        let neg = self.eat_punct("-");
        match self.advance() {
            Tok::Num(raw) => num_literal(&raw, neg, line),
            Tok::Str(s) if !neg => Ok(Value::Str(s)),
            _ => Err(err(line, "expected a literal")),
        }
    }

    // ---- primitive expressions ----------------------------------------

    fn pexpr(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        self.p_or(ctx, head)
    }

    fn p_or(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let mut left = self.p_and(ctx, head)?;
        while self.peek() == &Tok::Punct("||") {
            let line = self.line();
            self.advance();
            let right = self.p_and(ctx, head)?;
            check_bool(&left, line)?;
            check_bool(&right, line)?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn p_and(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let mut left = self.p_cmp(ctx, head)?;
        while self.peek() == &Tok::Punct("&&") {
            let line = self.line();
            self.advance();
            let right = self.p_cmp(ctx, head)?;
            check_bool(&left, line)?;
            check_bool(&right, line)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn p_cmp(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let left = self.p_add(ctx, head)?;
        let op = match self.peek() {
            Tok::Punct("==") => Some(CmpOp::Eq),
            Tok::Punct("!=") => None, // negated equality
            Tok::Punct("<") => Some(CmpOp::Lt),
            Tok::Punct(">") => Some(CmpOp::Gt),
            Tok::Punct("<=") => Some(CmpOp::Le),
            Tok::Punct(">=") => Some(CmpOp::Ge),
            _ => return Ok(left),
        };
        let neq = op.is_none();
        let line = self.line();
        self.advance();
        let right = self.p_add(ctx, head)?;
        if left.data_type() != right.data_type() {
            return Err(err(
                line,
                format!(
                    "cannot compare {} with {}",
                    left.data_type(),
                    right.data_type()
                ),
            ));
        }
        let cmp = Expr::Cmp {
            op: op.unwrap_or(CmpOp::Eq),
            left: Box::new(left),
            right: Box::new(right),
        };
        Ok(if neq { Expr::Not(Box::new(cmp)) } else { cmp })
    }

    fn p_add(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let mut left = self.p_mul(ctx, head)?;
        loop {
            let op = match self.peek() {
                Tok::Punct("+") => ArithOp::Add,
                Tok::Punct("-") => ArithOp::Sub,
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.p_mul(ctx, head)?;
            check_arith(&left, &right, line)?;
            left = Expr::Arith { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn p_mul(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let mut left = self.p_unary(ctx, head)?;
        loop {
            let op = match self.peek() {
                Tok::Punct("*") => ArithOp::Mul,
                Tok::Punct("/") => ArithOp::Div,
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.p_unary(ctx, head)?;
            check_arith(&left, &right, line)?;
            left = Expr::Arith { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn p_unary(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        if self.peek() == &Tok::Punct("!") {
            let line = self.line();
            self.advance();
            let e = self.p_unary(ctx, head)?;
            check_bool(&e, line)?;
            return Ok(Expr::Not(Box::new(e)));
        }
        if self.peek() == &Tok::Punct("-") {
            let line = self.line();
            self.advance();
            let e = self.p_unary(ctx, head)?;
            return match e {
                Expr::Const(Value::Int(v)) => Ok(Expr::Const(Value::Int(-v))),
                Expr::Const(Value::Long(v)) => Ok(Expr::Const(Value::Long(-v))),
                Expr::Const(Value::Real(v)) => Ok(Expr::Const(Value::Real(-v))),
                e if e.data_type().is_numeric() => {
                    let zero = match e.data_type() {
                        DataType::Int => Value::Int(0),
                        DataType::Long => Value::Long(0),
                        _ => Value::Real(0.0),
                    };
                    Ok(Expr::Arith {
                        op: ArithOp::Sub,
                        left: Box::new(Expr::Const(zero)),
                        right: Box::new(e),
                    })
                }
                _ => Err(err(line, "cannot negate a string")),
            };
        }
        self.p_primary(ctx, head)
    }

    fn p_primary(&mut self, ctx: &BodyCtx, head: Option<&Head>) -> ParseResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Num(raw) => num_literal(&raw, false, line).map(Expr::Const),
            Tok::Str(s) => Ok(Expr::Const(Value::Str(s))),
            Tok::Punct("(") => {
                let e = self.pexpr(ctx, head)?;
                self.expect_punct(")")?;
                Ok(e)
            }
            Tok::Ident(name) => match name.as_str() {
                "time" => {
                    self.expect_punct("(")?;
                    self.expect_punct(")")?;
                    Ok(Expr::Time)
                }
                "index" => {
                    self.expect_punct("(")?;
                    let hay = self.pexpr(ctx, head)?;
                    self.expect_punct(",")?;
                    let needle = self.pexpr(ctx, head)?;
                    self.expect_punct(")")?;
                    if hay.data_type() != DataType::Str || needle.data_type() != DataType::Str {
                        return Err(err(line, "index operands must be strings"));
                    }
                    Ok(Expr::StrIndex { hay: Box::new(hay), needle: Box::new(needle) })
                }
                "int" | "long" | "real" | "string" => {
                    let to = DataType::from_name(&name).expect("scalar keyword");
                    self.expect_punct("(")?;
                    let inner = self.pexpr(ctx, head)?;
                    self.expect_punct(")")?;
                    if inner.data_type() == DataType::Str && to != DataType::Str {
                        return Err(err(line, "cannot convert a string to a number"));
                    }
                    Ok(Expr::Conv { to, inner: Box::new(inner) })
                }
                _ => {
                    if let Some((pos, ty)) = head.and_then(|h| h.attr(&name)) {
                        return Ok(Expr::Attr { pos, ty });
                    }
                    if let Some(pos) =
                        ctx.prim_params.iter().position(|(n, _)| n == &name)
                    {
                        let ty = ctx.prim_params[pos].1;
                        return Ok(Expr::Param { pos, ty });
                    }
                    Err(err(line, format!("unknown name '{name}'")))
                }
            },
            _ => Err(err(line, "expected an expression")),
        }
    }
}

fn check_bool(e: &Expr, line: usize) -> ParseResult<()> {
    if e.data_type() == DataType::Int {
        Ok(())
    } else {
        Err(err(line, "boolean operand must be int"))
    }
}

fn check_arith(l: &Expr, r: &Expr, line: usize) -> ParseResult<()> {
    let (lt, rt) = (l.data_type(), r.data_type());
    if lt != rt {
        return Err(err(line, format!("mixed arithmetic on {lt} and {rt}")));
    }
    if !lt.is_numeric() {
        return Err(err(line, "arithmetic on strings"));
    }
    Ok(())
}

/// Numbers without a fraction are `int` when they fit, `long` otherwise;
/// with a fraction they are `real`
fn num_literal(raw: &str, neg: bool, line: usize) -> ParseResult<Value> {
    let text = if neg { format!("-{raw}") } else { raw.to_string() };
    let parsed = if raw.contains('.') {
        DataType::Real.parse(&text)
    } else if let Ok(v) = DataType::Int.parse(&text) {
        Ok(v)
    } else {
        DataType::Long.parse(&text)
    };
    parsed.map_err(|e| err(line, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParseResult<Environment> {
        parse_program(src)
    }

    const BASE: &str = "type T { a int, b real }\nvar data T;\n";

    #[test]
    fn test_empty_source() {
        let env = parse("").unwrap();
        assert!(env.vars().is_empty());
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(parse("var x Missing;").is_err());
    }

    #[test]
    fn test_rejects_duplicate_attr() {
        assert!(parse("type T { a int, a real }").is_err());
    }

    #[test]
    fn test_rejects_reserved_names() {
        assert!(parse("type union { a int }").is_err());
    }

    #[test]
    fn test_temp_variables() {
        let src = format!(
            "{BASE}fn F(): T {{\n  t = select(data, a > 0);\n  return t;\n}}"
        );
        let env = parse(&src).unwrap();
        let f = env.func("F").unwrap();
        assert_eq!(f.temp, vec!["t".to_string()]);
        assert_eq!(f.read, vec!["data".to_string()]);
        assert!(f.write.is_empty());
        assert_eq!(f.stmts.len(), 2);
    }

    #[test]
    fn test_write_before_read_skips_read_set() {
        let src = format!(
            "{BASE}fn F(x T) {{\n  data = x;\n  t = data;\n}}"
        );
        let env = parse(&src).unwrap();
        let f = env.func("F").unwrap();
        assert_eq!(f.write, vec!["data".to_string()]);
        assert!(f.read.is_empty());
    }

    #[test]
    fn test_return_head_must_match() {
        let src = format!("{BASE}fn F(): T {{ return project(data, a); }}");
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_return_required_and_last() {
        assert!(parse(&format!("{BASE}fn F(): T {{ t = data; }}")).is_err());
        assert!(parse(&format!(
            "{BASE}fn F(): T {{ return data; t = data; }}"
        ))
        .is_err());
    }

    #[test]
    fn test_expression_typing() {
        let ok = format!(
            "{BASE}fn F(lim real): T {{ return select(data, b < lim && a >= 1); }}"
        );
        assert!(parse(&ok).is_ok());

        let mixed = format!("{BASE}fn F(): T {{ return select(data, a < 1.5); }}");
        assert!(parse(&mixed).is_err());

        let conv = format!(
            "{BASE}fn F(): T {{ return select(data, real(a) < 1.5); }}"
        );
        assert!(parse(&conv).is_ok());

        let str_conv = format!(
            "{BASE}fn F(s string): T {{ return select(data, int(s) > 0); }}"
        );
        assert!(parse(&str_conv).is_err());
    }

    #[test]
    fn test_extend_and_summary() {
        let src = format!(
            "{BASE}fn F(): T {{\n\
               e = project(extend(data, c = a * a), a, b);\n\
               return e;\n\
             }}\n\
             type S {{ a int, n int, total real }}\n\
             fn G(): S {{\n\
               return summary(data, per project(data, a), n = cnt(), total = add(b, 0.0));\n\
             }}"
        );
        let env = parse(&src).unwrap();
        assert!(env.func("G").is_some());
    }

    #[test]
    fn test_call_merges_sets() {
        let src = format!(
            "{BASE}fn Put(x T) {{\n  data = union(data, x);\n}}\n\
             fn F(x T) {{\n  Put(x);\n}}"
        );
        let env = parse(&src).unwrap();
        let f = env.func("F").unwrap();
        assert_eq!(f.read, vec!["data".to_string()]);
        assert_eq!(f.write, vec!["data".to_string()]);
    }

    #[test]
    fn test_call_as_expression() {
        let src = format!(
            "{BASE}fn All(): T {{ return data; }}\n\
             fn F(): T {{ return select(All(), a == 1); }}"
        );
        let env = parse(&src).unwrap();
        assert_eq!(env.func("F").unwrap().read, vec!["data".to_string()]);
    }

    #[test]
    fn test_call_arg_types() {
        let src = format!(
            "{BASE}fn Take(n int): T {{ return select(data, a < n); }}\n\
             fn F(): T {{ return Take(1.5); }}"
        );
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_literal_widths() {
        assert_eq!(num_literal("5", false, 1).unwrap(), Value::Int(5));
        assert_eq!(
            num_literal("4294967296", false, 1).unwrap(),
            Value::Long(4294967296)
        );
        assert_eq!(num_literal("1.25", true, 1).unwrap(), Value::Real(-1.25));
    }

    #[test]
    fn test_comments() {
        let src = format!("# header\n{BASE}# trailing\n");
        assert!(parse(&src).is_ok());
    }
}
