//! Property-based relational algebra tests (proptest).
//!
//! The classic identities over arbitrary finite relations: idempotent
//! union, self-difference, self-join, identity projection, constant
//! selections, and distribution of join over union.

use proptest::prelude::*;

use relata::algebra::{body_eq, Rel, VarScope};
use relata::expr::{Expr, Params};
use relata::head::Head;
use relata::tuple::{Tuple, TupleBuf};
use relata::value::{DataType, Value};

fn ab_head() -> Head {
    Head::new(vec![
        ("a".to_string(), DataType::Int),
        ("b".to_string(), DataType::Int),
    ])
}

fn bc_head() -> Head {
    Head::new(vec![
        ("b".to_string(), DataType::Int),
        ("c".to_string(), DataType::Int),
    ])
}

fn buf(rows: &[(i32, i32)]) -> TupleBuf {
    rows.iter()
        .map(|&(x, y)| Tuple::new(vec![Value::Int(x), Value::Int(y)]))
        .collect()
}

/// Deduplicated relation over a small value domain, so collisions and
/// joins actually happen
fn relation() -> impl Strategy<Value = Vec<(i32, i32)>> {
    proptest::collection::vec((0..8i32, 0..8i32), 0..24).prop_map(|mut rows| {
        rows.sort_unstable();
        rows.dedup();
        rows
    })
}

fn eval(node: &Rel, vars: &mut VarScope) -> TupleBuf {
    node.eval(vars, &Params::default())
}

proptest! {
    #[test]
    fn union_is_idempotent(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));
        let node = Rel::union(Rel::load(ab_head(), "r"), Rel::load(ab_head(), "r"));
        let out = eval(&node, &mut vars);
        prop_assert!(body_eq(&ab_head(), &out, &buf(&rows)));
    }

    #[test]
    fn union_with_empty_is_identity(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));
        vars.insert("e", TupleBuf::new());
        let node = Rel::union(Rel::load(ab_head(), "r"), Rel::load(ab_head(), "e"));
        let out = eval(&node, &mut vars);
        prop_assert!(body_eq(&ab_head(), &out, &buf(&rows)));
    }

    #[test]
    fn self_difference_is_empty(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));
        let node = Rel::diff(Rel::load(ab_head(), "r"), Rel::load(ab_head(), "r"));
        prop_assert!(eval(&node, &mut vars).is_empty());
    }

    #[test]
    fn self_join_is_identity(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));
        let node = Rel::join(Rel::load(ab_head(), "r"), Rel::load(ab_head(), "r"));
        let out = eval(&node, &mut vars);
        prop_assert!(body_eq(&ab_head(), &out, &buf(&rows)));
    }

    #[test]
    fn full_projection_is_identity(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));
        let names: Vec<String> = ab_head().attrs().iter().map(|(n, _)| n.clone()).collect();
        let node = Rel::project(Rel::load(ab_head(), "r"), &names).unwrap();
        let out = eval(&node, &mut vars);
        prop_assert!(body_eq(&ab_head(), &out, &buf(&rows)));
    }

    #[test]
    fn constant_selections(rows in relation()) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&rows));

        let all = Rel::select(Rel::load(ab_head(), "r"), Expr::Const(Value::Int(1)));
        let out = eval(&all, &mut vars);
        prop_assert!(body_eq(&ab_head(), &out, &buf(&rows)));

        let none = Rel::select(Rel::load(ab_head(), "r"), Expr::Const(Value::Int(0)));
        prop_assert!(eval(&none, &mut vars).is_empty());
    }

    #[test]
    fn join_distributes_over_union(
        r in relation(),
        s in relation(),
        t in relation(),
    ) {
        let mut vars = VarScope::new();
        vars.insert("r", buf(&r));
        vars.insert("s", buf(&s));
        vars.insert("t", buf(&t));

        let lhs = Rel::join(
            Rel::load(ab_head(), "r"),
            Rel::union(Rel::load(bc_head(), "s"), Rel::load(bc_head(), "t")),
        );
        let rhs = Rel::union(
            Rel::join(Rel::load(ab_head(), "r"), Rel::load(bc_head(), "s")),
            Rel::join(Rel::load(ab_head(), "r"), Rel::load(bc_head(), "t")),
        );

        let l = eval(&lhs, &mut vars);
        let rr = eval(&rhs, &mut vars);
        prop_assert!(body_eq(lhs.head().unwrap(), &l, &rr));
    }

    #[test]
    fn tuple_encoding_roundtrips(rows in relation()) {
        let body = buf(&rows);
        let types = [DataType::Int, DataType::Int];

        let mut bytes = Vec::new();
        body.write_blocks(&mut bytes).unwrap();
        let read = TupleBuf::read_blocks(&mut bytes.as_slice(), &types).unwrap();
        prop_assert_eq!(read, body);
    }

    #[test]
    fn csv_roundtrips(rows in relation()) {
        let body = buf(&rows);
        let text = relata::csv::encode_relation(&ab_head(), &body);
        let decoded = relata::csv::decode_relation(&text, &ab_head()).unwrap();
        prop_assert_eq!(decoded, body);
    }
}
