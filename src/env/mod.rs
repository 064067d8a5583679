//! # Compiled Programs
//!
//! An [`Environment`] is the in-memory form of one program source: named
//! relational types, global variables with their heads, and functions with
//! their inferred read/write/temp sets, parameters and statement trees.
//! The coordinator distributes the source bytes; every process builds its
//! own environment from them, so the whole cluster runs against one
//! authoritative program.

mod parse;

use std::rc::Rc;

use crate::algebra::Rel;
use crate::error::ParseResult;
use crate::head::Head;
use crate::value::DataType;

/// The relational input parameter of a function
#[derive(Debug, Clone)]
pub struct RelParam {
    pub name: String,
    pub head: Head,
    /// Position among the function's declared parameters; call arguments
    /// are matched by declaration order
    pub pos: usize,
}

/// One compiled function
#[derive(Debug)]
pub struct Func {
    pub name: String,
    /// Head of the returned relation; `None` for functions without a
    /// return
    pub ret: Option<Head>,
    /// Global variables read from their committed versions
    pub read: Vec<String>,
    /// Global variables replaced on commit
    pub write: Vec<String>,
    /// Function-local temporaries
    pub temp: Vec<String>,
    /// Scalar parameters in declaration order, addressed by position
    pub prim_params: Vec<(String, DataType)>,
    pub rel_param: Option<RelParam>,
    /// Statement sequence; the last statement produces the return value
    /// when `ret` is set
    pub stmts: Vec<Rel>,
}

/// A compiled program
#[derive(Debug, Default)]
pub struct Environment {
    types: Vec<(String, Head)>,
    vars: Vec<(String, Head)>,
    funcs: Vec<Rc<Func>>,
}

impl Environment {
    /// Compile program source. An empty source yields an empty
    /// environment.
    pub fn parse(source: &str) -> ParseResult<Environment> {
        parse::parse_program(source)
    }

    pub fn func(&self, name: &str) -> Option<&Rc<Func>> {
        self.funcs.iter().find(|f| f.name == name)
    }

    /// Functions whose name starts with `prefix`, in definition order
    pub fn funcs_with_prefix(&self, prefix: &str) -> Vec<&Rc<Func>> {
        self.funcs
            .iter()
            .filter(|f| f.name.starts_with(prefix))
            .collect()
    }

    /// Head of a global variable
    pub fn head(&self, var: &str) -> Option<&Head> {
        self.vars
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, head)| head)
    }

    pub fn type_head(&self, name: &str) -> Option<&Head> {
        self.types
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, head)| head)
    }

    /// Global variable names and heads, in declaration order
    pub fn vars(&self) -> &[(String, Head)] {
        &self.vars
    }

    pub fn var_names(&self) -> Vec<String> {
        self.vars.iter().map(|(n, _)| n.clone()).collect()
    }

    /// True when every variable present in both environments carries the
    /// same head. Added and removed variables are compatible; their files
    /// are reconciled at the next volume sync.
    pub fn compat(old: &Environment, new: &Environment) -> bool {
        old.vars.iter().all(|(name, head)| match new.head(name) {
            Some(other) => head == other,
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
        type Book { title string, price real }

        var books Book;

        fn Echo(b Book): Book {
            return b;
        }

        fn Append(b Book) {
            books = union(books, b);
        }

        fn Cheap(limit real): Book {
            return select(books, price < limit);
        }
    "#;

    #[test]
    fn test_parse_program() {
        let env = Environment::parse(PROGRAM).unwrap();
        assert_eq!(env.vars().len(), 1);
        assert!(env.head("books").is_some());
        assert!(env.func("Echo").is_some());
        assert!(env.func("Nope").is_none());
        assert_eq!(env.funcs_with_prefix("").len(), 3);
        assert_eq!(env.funcs_with_prefix("C").len(), 1);
    }

    #[test]
    fn test_read_write_inference() {
        let env = Environment::parse(PROGRAM).unwrap();

        let echo = env.func("Echo").unwrap();
        assert!(echo.read.is_empty() && echo.write.is_empty());
        assert!(echo.rel_param.is_some());
        assert!(echo.ret.is_some());

        let append = env.func("Append").unwrap();
        assert_eq!(append.read, vec!["books".to_string()]);
        assert_eq!(append.write, vec!["books".to_string()]);
        assert!(append.ret.is_none());

        let cheap = env.func("Cheap").unwrap();
        assert_eq!(cheap.read, vec!["books".to_string()]);
        assert!(cheap.write.is_empty());
        assert_eq!(cheap.prim_params.len(), 1);
    }

    #[test]
    fn test_call_moves_writes_back_to_the_caller() {
        use crate::algebra::VarScope;
        use crate::expr::Params;
        use crate::tuple::Tuple;
        use crate::value::Value;

        let env = Environment::parse(
            "type T { a int }\n\
             var data T;\n\
             fn Put(x T) { data = union(data, x); }\n\
             fn Wrap(x T) { Put(x); }",
        )
        .unwrap();

        let wrap = env.func("Wrap").unwrap();
        assert_eq!(wrap.read, vec!["data".to_string()]);
        assert_eq!(wrap.write, vec!["data".to_string()]);

        let one = |v: i32| Tuple::new(vec![Value::Int(v)]);
        let mut scope = VarScope::new();
        scope.insert("data", [one(1)].into_iter().collect());
        scope.insert("x", [one(2)].into_iter().collect());

        for stmt in &wrap.stmts {
            stmt.eval(&mut scope, &Params::default());
        }

        let data = scope.get("data").unwrap();
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_compat() {
        let old = Environment::parse(PROGRAM).unwrap();
        let same = Environment::parse(PROGRAM).unwrap();
        assert!(Environment::compat(&old, &same));

        // added variable is fine
        let extended = Environment::parse(
            "type Book { title string, price real }\n\
             type T { x int }\n\
             var books Book;\n\
             var extra T;",
        )
        .unwrap();
        assert!(Environment::compat(&old, &extended));

        // changed head is not
        let changed =
            Environment::parse("type Book { title string, price int }\nvar books Book;").unwrap();
        assert!(!Environment::compat(&old, &changed));

        // removed variable is fine
        let empty = Environment::parse("").unwrap();
        assert!(Environment::compat(&old, &empty));
    }
}
