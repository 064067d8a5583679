//! # Summary Operators
//!
//! Stateful aggregators used by summarize: `cnt`, `min`, `max`, `avg` and
//! `add`. Each exposes reset/update/value; when no row was seen the
//! caller-supplied default is returned (`cnt` defaults to 0, `avg` always
//! yields a `real`).

use crate::tuple::Tuple;
use crate::value::{DataType, Value};

#[derive(Debug, Clone)]
enum AvgAcc {
    Int(i32),
    Long(i64),
    Real(f64),
}

/// One aggregator instance; cloned per evaluation so operator nodes stay
/// immutable
#[derive(Debug, Clone)]
pub enum Summary {
    Cnt { cnt: i32 },
    Min { pos: usize, def: Value, cnt: usize, cur: Option<Value> },
    Max { pos: usize, def: Value, cnt: usize, cur: Option<Value> },
    Avg { pos: usize, def: f64, cnt: i64, acc: AvgState },
    Add { pos: usize, def: Value, cnt: usize, acc: Value },
}

/// Accumulator for `avg`: integral operands widen into their own type
#[derive(Debug, Clone)]
pub struct AvgState {
    ty: DataType,
    acc: AvgAcc,
}

impl Summary {
    pub fn cnt() -> Summary {
        Summary::Cnt { cnt: 0 }
    }

    pub fn min(pos: usize, def: Value) -> Summary {
        Summary::Min { pos, def, cnt: 0, cur: None }
    }

    pub fn max(pos: usize, def: Value) -> Summary {
        Summary::Max { pos, def, cnt: 0, cur: None }
    }

    pub fn avg(pos: usize, ty: DataType, def: f64) -> Summary {
        let acc = match ty {
            DataType::Int => AvgAcc::Int(0),
            DataType::Long => AvgAcc::Long(0),
            DataType::Real => AvgAcc::Real(0.0),
            DataType::Str => unreachable!("avg over strings"),
        };
        Summary::Avg { pos, def, cnt: 0, acc: AvgState { ty, acc } }
    }

    pub fn add(pos: usize, ty: DataType, def: Value) -> Summary {
        let acc = match ty {
            DataType::Int => Value::Int(0),
            DataType::Long => Value::Long(0),
            DataType::Real => Value::Real(0.0),
            DataType::Str => unreachable!("add over strings"),
        };
        Summary::Add { pos, def, cnt: 0, acc }
    }

    /// Result type of the aggregator
    pub fn output_type(&self) -> DataType {
        match self {
            Summary::Cnt { .. } => DataType::Int,
            Summary::Avg { .. } => DataType::Real,
            Summary::Min { def, .. } | Summary::Max { def, .. } | Summary::Add { def, .. } => {
                def.data_type()
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Summary::Cnt { cnt } => *cnt = 0,
            Summary::Min { cnt, cur, .. } | Summary::Max { cnt, cur, .. } => {
                *cnt = 0;
                *cur = None;
            }
            Summary::Avg { cnt, acc, .. } => {
                *cnt = 0;
                acc.acc = match acc.ty {
                    DataType::Int => AvgAcc::Int(0),
                    DataType::Long => AvgAcc::Long(0),
                    _ => AvgAcc::Real(0.0),
                };
            }
            Summary::Add { cnt, acc, .. } => {
                *cnt = 0;
                *acc = match acc.data_type() {
                    DataType::Int => Value::Int(0),
                    DataType::Long => Value::Long(0),
                    _ => Value::Real(0.0),
                };
            }
        }
    }

    pub fn update(&mut self, t: &Tuple) {
        match self {
            Summary::Cnt { cnt } => *cnt += 1,
            Summary::Min { pos, cnt, cur, .. } => {
                let v = t.attr(*pos);
                let keep = match cur.as_ref() {
                    Some(c) => v.cmp_value(c).is_lt(),
                    None => true,
                };
                if keep {
                    *cur = Some(v.clone());
                }
                *cnt += 1;
            }
            Summary::Max { pos, cnt, cur, .. } => {
                let v = t.attr(*pos);
                let keep = match cur.as_ref() {
                    Some(c) => v.cmp_value(c).is_gt(),
                    None => true,
                };
                if keep {
                    *cur = Some(v.clone());
                }
                *cnt += 1;
            }
            Summary::Avg { pos, cnt, acc, .. } => {
                *cnt += 1;
                match (&mut acc.acc, t.attr(*pos)) {
                    (AvgAcc::Int(a), Value::Int(v)) => *a = a.wrapping_add(*v),
                    (AvgAcc::Long(a), Value::Long(v)) => *a = a.wrapping_add(*v),
                    (AvgAcc::Real(a), Value::Real(v)) => *a += v,
                    _ => unreachable!("avg operand type mismatch"),
                }
            }
            Summary::Add { pos, cnt, acc, .. } => {
                *cnt += 1;
                match (acc, t.attr(*pos)) {
                    (Value::Int(a), Value::Int(v)) => *a = a.wrapping_add(*v),
                    (Value::Long(a), Value::Long(v)) => *a = a.wrapping_add(*v),
                    (Value::Real(a), Value::Real(v)) => *a += v,
                    _ => unreachable!("add operand type mismatch"),
                }
            }
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Summary::Cnt { cnt } => Value::Int(*cnt),
            Summary::Min { def, cnt, cur, .. } | Summary::Max { def, cnt, cur, .. } => {
                if *cnt == 0 {
                    def.clone()
                } else {
                    cur.clone().expect("seen rows imply a current value")
                }
            }
            Summary::Avg { def, cnt, acc, .. } => {
                if *cnt == 0 {
                    Value::Real(*def)
                } else {
                    let sum = match acc.acc {
                        AvgAcc::Int(a) => f64::from(a),
                        AvgAcc::Long(a) => a as f64,
                        AvgAcc::Real(a) => a,
                    };
                    Value::Real(sum / *cnt as f64)
                }
            }
            Summary::Add { def, cnt, acc, .. } => {
                if *cnt == 0 {
                    def.clone()
                } else {
                    acc.clone()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(vals: &[i32]) -> Vec<Tuple> {
        vals.iter().map(|&v| Tuple::new(vec![Value::Int(v)])).collect()
    }

    fn run(mut s: Summary, vals: &[i32]) -> Value {
        s.reset();
        for t in rows(vals) {
            s.update(&t);
        }
        s.value()
    }

    #[test]
    fn test_cnt() {
        assert_eq!(run(Summary::cnt(), &[5, 5, 5]), Value::Int(3));
        assert_eq!(run(Summary::cnt(), &[]), Value::Int(0));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(run(Summary::min(0, Value::Int(-1)), &[3, 1, 2]), Value::Int(1));
        assert_eq!(run(Summary::max(0, Value::Int(-1)), &[3, 1, 2]), Value::Int(3));
        assert_eq!(run(Summary::min(0, Value::Int(-1)), &[]), Value::Int(-1));
    }

    #[test]
    fn test_avg() {
        assert_eq!(
            run(Summary::avg(0, DataType::Int, 0.0), &[1, 2, 3, 4]),
            Value::Real(2.5)
        );
        assert_eq!(run(Summary::avg(0, DataType::Int, -1.0), &[]), Value::Real(-1.0));
    }

    #[test]
    fn test_add() {
        assert_eq!(
            run(Summary::add(0, DataType::Int, Value::Int(7)), &[1, 2, 3]),
            Value::Int(6)
        );
        assert_eq!(
            run(Summary::add(0, DataType::Int, Value::Int(7)), &[]),
            Value::Int(7)
        );
    }

    #[test]
    fn test_reset_between_groups() {
        let mut s = Summary::add(0, DataType::Int, Value::Int(0));
        s.reset();
        for t in rows(&[1, 2]) {
            s.update(&t);
        }
        assert_eq!(s.value(), Value::Int(3));
        s.reset();
        assert_eq!(s.value(), Value::Int(0));
    }
}
