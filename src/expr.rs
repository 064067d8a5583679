//! # Primitive Expressions
//!
//! Tree-evaluated typed expressions over the current tuple and the
//! invocation's parameter record. Each node is one variant of [`Expr`];
//! evaluation is pull-based recursion dispatched over the sum type.
//! Comparisons are type-directed, arithmetic preserves the operand type,
//! and boolean results are `int` values `0`/`1`.

use std::cmp::Ordering;

use crate::tuple::Tuple;
use crate::value::{DataType, Value};

/// Parameter record of one function invocation, addressed by position
#[derive(Debug, Default, Clone)]
pub struct Params {
    vals: Vec<Value>,
}

impl Params {
    pub fn new(vals: Vec<Value>) -> Params {
        Params { vals }
    }

    pub fn get(&self, pos: usize) -> &Value {
        &self.vals[pos]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A typed expression node
#[derive(Debug, Clone)]
pub enum Expr {
    Const(Value),
    /// Attribute of the current tuple
    Attr { pos: usize, ty: DataType },
    /// Primitive parameter of the enclosing function
    Param { pos: usize, ty: DataType },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
    Arith { op: ArithOp, left: Box<Expr>, right: Box<Expr> },
    /// Numeric conversion, or rendering to string
    Conv { to: DataType, inner: Box<Expr> },
    /// Wall clock in milliseconds since the epoch, as `long`
    Time,
    /// Byte position of the needle in the haystack, or -1
    StrIndex { hay: Box<Expr>, needle: Box<Expr> },
}

impl Expr {
    /// Static result type of the node
    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Const(v) => v.data_type(),
            Expr::Attr { ty, .. } | Expr::Param { ty, .. } => *ty,
            Expr::Not(_) | Expr::And(..) | Expr::Or(..) | Expr::Cmp { .. } => DataType::Int,
            Expr::Arith { left, .. } => left.data_type(),
            Expr::Conv { to, .. } => *to,
            Expr::Time => DataType::Long,
            Expr::StrIndex { .. } => DataType::Int,
        }
    }

    /// Evaluate against the current tuple (absent for parameter-only
    /// contexts such as call arguments) and the parameter record.
    pub fn eval(&self, t: Option<&Tuple>, params: &Params) -> Value {
        match self {
            Expr::Const(v) => v.clone(),
            Expr::Attr { pos, .. } => t.expect("attribute without tuple").attr(*pos).clone(),
            Expr::Param { pos, .. } => params.get(*pos).clone(),
            Expr::Not(e) => Value::Int(i32::from(!e.eval_bool(t, params))),
            Expr::And(l, r) => {
                Value::Int(i32::from(l.eval_bool(t, params) && r.eval_bool(t, params)))
            }
            Expr::Or(l, r) => {
                Value::Int(i32::from(l.eval_bool(t, params) || r.eval_bool(t, params)))
            }
            Expr::Cmp { op, left, right } => {
                let l = left.eval(t, params);
                let r = right.eval(t, params);
                let ord = l.cmp_value(&r);
                let res = match op {
                    CmpOp::Eq => ord == Ordering::Equal,
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Le => ord != Ordering::Greater,
                    CmpOp::Ge => ord != Ordering::Less,
                };
                Value::Int(i32::from(res))
            }
            Expr::Arith { op, left, right } => {
                arith(*op, left.eval(t, params), right.eval(t, params))
            }
            Expr::Conv { to, inner } => convert(inner.eval(t, params), *to),
            Expr::Time => Value::Long(chrono::Utc::now().timestamp_millis()),
            Expr::StrIndex { hay, needle } => {
                let hay = as_str(hay.eval(t, params));
                let needle = as_str(needle.eval(t, params));
                let pos = hay.find(&needle).map_or(-1, |p| p as i32);
                Value::Int(pos)
            }
        }
    }

    /// Evaluate a boolean node: any non-zero `int` is true
    pub fn eval_bool(&self, t: Option<&Tuple>, params: &Params) -> bool {
        match self.eval(t, params) {
            Value::Int(v) => v != 0,
            _ => unreachable!("boolean expression of non-int type"),
        }
    }
}

fn as_str(v: Value) -> String {
    match v {
        Value::Str(s) => s,
        _ => unreachable!("string operand expected"),
    }
}

/// Type-preserving arithmetic; integer wrap-around is silent, division by
/// zero carries the numeric type's own failure semantics
fn arith(op: ArithOp, l: Value, r: Value) -> Value {
    match (l, r) {
        (Value::Int(l), Value::Int(r)) => Value::Int(match op {
            ArithOp::Add => l.wrapping_add(r),
            ArithOp::Sub => l.wrapping_sub(r),
            ArithOp::Mul => l.wrapping_mul(r),
            ArithOp::Div => l / r,
        }),
        (Value::Long(l), Value::Long(r)) => Value::Long(match op {
            ArithOp::Add => l.wrapping_add(r),
            ArithOp::Sub => l.wrapping_sub(r),
            ArithOp::Mul => l.wrapping_mul(r),
            ArithOp::Div => l / r,
        }),
        (Value::Real(l), Value::Real(r)) => Value::Real(match op {
            ArithOp::Add => l + r,
            ArithOp::Sub => l - r,
            ArithOp::Mul => l * r,
            ArithOp::Div => l / r,
        }),
        _ => unreachable!("arithmetic on mixed or string operands"),
    }
}

/// Numeric conversions always succeed; converting to `string` renders the
/// value. `string` sources are rejected by the type checker.
fn convert(v: Value, to: DataType) -> Value {
    if v.data_type() == to {
        return v;
    }
    match to {
        DataType::Int => Value::Int(match v {
            Value::Long(x) => x as i32,
            Value::Real(x) => x as i32,
            _ => unreachable!("conversion from string"),
        }),
        DataType::Long => Value::Long(match v {
            Value::Int(x) => i64::from(x),
            Value::Real(x) => x as i64,
            _ => unreachable!("conversion from string"),
        }),
        DataType::Real => Value::Real(match v {
            Value::Int(x) => f64::from(x),
            Value::Long(x) => x as f64,
            _ => unreachable!("conversion from string"),
        }),
        DataType::Str => Value::Str(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> Expr {
        Expr::Const(Value::Int(v))
    }

    fn none() -> Params {
        Params::default()
    }

    #[test]
    fn test_comparisons() {
        let le = Expr::Cmp {
            op: CmpOp::Le,
            left: Box::new(int(2)),
            right: Box::new(int(2)),
        };
        assert!(le.eval_bool(None, &none()));

        let gt = Expr::Cmp {
            op: CmpOp::Gt,
            left: Box::new(Expr::Const(Value::Str("b".into()))),
            right: Box::new(Expr::Const(Value::Str("a".into()))),
        };
        assert!(gt.eval_bool(None, &none()));
    }

    #[test]
    fn test_boolean_ops() {
        let e = Expr::And(
            Box::new(Expr::Or(Box::new(int(0)), Box::new(int(1)))),
            Box::new(Expr::Not(Box::new(int(0)))),
        );
        assert_eq!(e.eval(None, &none()), Value::Int(1));
    }

    #[test]
    fn test_arith_preserves_type() {
        let e = Expr::Arith {
            op: ArithOp::Mul,
            left: Box::new(Expr::Const(Value::Long(1 << 40))),
            right: Box::new(Expr::Const(Value::Long(4))),
        };
        assert_eq!(e.eval(None, &none()), Value::Long(1 << 42));
        assert_eq!(e.data_type(), DataType::Long);
    }

    #[test]
    fn test_attr_and_param() {
        let t = Tuple::new(vec![Value::Int(5), Value::Str("x".into())]);
        let params = Params::new(vec![Value::Real(2.5)]);

        let attr = Expr::Attr { pos: 0, ty: DataType::Int };
        assert_eq!(attr.eval(Some(&t), &params), Value::Int(5));

        let param = Expr::Param { pos: 0, ty: DataType::Real };
        assert_eq!(param.eval(Some(&t), &params), Value::Real(2.5));
    }

    #[test]
    fn test_conversions() {
        let to_real = Expr::Conv { to: DataType::Real, inner: Box::new(int(3)) };
        assert_eq!(to_real.eval(None, &none()), Value::Real(3.0));

        let to_str = Expr::Conv {
            to: DataType::Str,
            inner: Box::new(Expr::Const(Value::Long(-9))),
        };
        assert_eq!(to_str.eval(None, &none()), Value::Str("-9".into()));
    }

    #[test]
    fn test_str_index() {
        let e = Expr::StrIndex {
            hay: Box::new(Expr::Const(Value::Str("hello".into()))),
            needle: Box::new(Expr::Const(Value::Str("llo".into()))),
        };
        assert_eq!(e.eval(None, &none()), Value::Int(2));

        let miss = Expr::StrIndex {
            hay: Box::new(Expr::Const(Value::Str("hello".into()))),
            needle: Box::new(Expr::Const(Value::Str("z".into()))),
        };
        assert_eq!(miss.eval(None, &none()), Value::Int(-1));
    }

    #[test]
    fn test_time_is_long() {
        assert_eq!(Expr::Time.data_type(), DataType::Long);
        match Expr::Time.eval(None, &none()) {
            Value::Long(ms) => assert!(ms > 0),
            other => panic!("unexpected {other:?}"),
        }
    }
}
