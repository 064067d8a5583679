//! # CSV Relations
//!
//! The external representation of a relation: a header line of
//! whitespace-separated `name type` pairs, then one tuple per line with
//! attribute order matching the header. `\` is the sole escape; a literal
//! `\` before a delimiter suppresses the split and stays part of the data.
//! Trailing blank lines are ignored. Decode errors carry the 1-based line
//! number and the offending attribute.

use crate::error::{CsvError, CsvResult};
use crate::head::Head;
use crate::tuple::{Tuple, TupleBuf};
use crate::value::{DataType, Value};

/// Split on `delim`, honoring the `\` escape. The escape character is not
/// consumed; an escaped escape does not protect the character after it.
pub fn split_escaped(s: &str, delim: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_esc = false;
    for (i, c) in s.char_indices() {
        if c == delim && !prev_esc {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
        prev_esc = if prev_esc { false } else { c == '\\' };
    }
    parts.push(&s[start..]);
    parts
}

fn valid_id(name: &str) -> bool {
    !name.is_empty()
        && name.len() < crate::limits::MAX_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse the header line against the expected head. The header must carry
/// exactly the expected `(name, type)` pairs (in any order); the returned
/// vector maps each header column to its position in the head.
fn decode_header(line: &str, expected: &Head) -> CsvResult<Vec<usize>> {
    let fields = split_escaped(line, ',');
    let mut attrs: Vec<(String, DataType)> = Vec::new();
    let mut order: Vec<String> = Vec::new();

    for field in &fields {
        let field = field.trim();
        let (name, tyname) = field
            .split_once(char::is_whitespace)
            .ok_or_else(|| CsvError::BadHeader(format!("'{field}' is not 'name type'")))?;
        let name = name.trim();
        let tyname = tyname.trim();
        if !valid_id(name) {
            return Err(CsvError::BadHeader(format!(
                "invalid attribute name: '{name}'"
            )));
        }
        let ty = DataType::from_name(tyname)
            .ok_or_else(|| CsvError::BadHeader(format!("unknown type '{tyname}'")))?;
        attrs.push((name.to_string(), ty));
        order.push(name.to_string());
    }

    let got = Head::new(attrs);
    if &got != expected {
        return Err(CsvError::BadHeader(format!(
            "expected {expected} got {got}"
        )));
    }

    Ok(order
        .iter()
        .map(|name| expected.find(name).expect("validated header attr"))
        .collect())
}

fn decode_tuple(
    line: &str,
    lineno: usize,
    order: &[usize],
    head: &Head,
) -> CsvResult<Tuple> {
    let fields = split_escaped(line, ',');
    if fields.len() != head.len() {
        return Err(CsvError::BadTuple {
            line: lineno,
            detail: format!("expected {} attributes, got {}", head.len(), fields.len()),
        });
    }

    let mut vals: Vec<Option<Value>> = vec![None; head.len()];
    for (field, &pos) in fields.iter().zip(order) {
        let name = head.name(pos);
        let ty = head.attrs()[pos].1;
        let v = ty.parse(field).map_err(|_| CsvError::BadTuple {
            line: lineno,
            detail: format!("value '{field}' (attribute '{name}') is not of type '{ty}'"),
        })?;
        vals[pos] = Some(v);
    }

    Ok(Tuple::new(
        vals.into_iter().map(|v| v.expect("all positions filled")).collect(),
    ))
}

/// Decode a CSV document into a body of `expected`-typed tuples
pub fn decode_relation(text: &str, expected: &Head) -> CsvResult<TupleBuf> {
    let mut lines = split_escaped(text, '\n');
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return Err(CsvError::MissingHeader);
    }

    let order = decode_header(lines[0], expected)?;

    let mut body = TupleBuf::new();
    for (i, line) in lines[1..].iter().enumerate() {
        body.push(decode_tuple(line, i + 2, &order, expected)?);
    }
    Ok(body)
}

/// `a int,b real` header line, newline-terminated
pub fn header_line(head: &Head) -> String {
    let mut out = String::new();
    for (i, (name, ty)) in head.attrs().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push(' ');
        out.push_str(&ty.to_string());
    }
    out.push('\n');
    out
}

/// One tuple line in head order, newline-terminated
pub fn row_line(t: &Tuple) -> String {
    let mut out = String::new();
    for (i, v) in t.values().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push('\n');
    out
}

/// Whole-relation encoding, used by tests and the volume tools
pub fn encode_relation(head: &Head, body: &TupleBuf) -> String {
    let mut out = header_line(head);
    for t in body.iter() {
        out.push_str(&row_line(t));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head() -> Head {
        Head::new(vec![
            ("title".to_string(), DataType::Str),
            ("price".to_string(), DataType::Real),
        ])
    }

    #[test]
    fn test_roundtrip() {
        let mut body = TupleBuf::new();
        body.push(Tuple::new(vec![Value::Real(1.5), Value::Str("A".into())]));
        body.push(Tuple::new(vec![Value::Real(2.0), Value::Str("B".into())]));

        let text = encode_relation(&head(), &body);
        assert_eq!(text, "price real,title string\n1.5,A\n2,B\n");

        let decoded = decode_relation(&text, &head()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_header_order_is_free() {
        let text = "title string, price real\nA,0.5\n";
        let body = decode_relation(text, &head()).unwrap();
        // values land at head positions: price first
        assert_eq!(
            body.get(0),
            &Tuple::new(vec![Value::Real(0.5), Value::Str("A".into())])
        );
    }

    #[test]
    fn test_header_mismatch() {
        let text = "title string,cost real\nA,0.5\n";
        assert!(matches!(
            decode_relation(text, &head()),
            Err(CsvError::BadHeader(_))
        ));

        let text = "title string\nA\n";
        assert!(decode_relation(text, &head()).is_err());
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(decode_relation("", &head()), Err(CsvError::MissingHeader));
        assert_eq!(
            decode_relation("\n\n", &head()),
            Err(CsvError::MissingHeader)
        );
    }

    #[test]
    fn test_bad_value_reports_line_and_attr() {
        let text = "price real,title string\n1.5,A\nx,B\n";
        match decode_relation(text, &head()) {
            Err(CsvError::BadTuple { line, detail }) => {
                assert_eq!(line, 3);
                assert!(detail.contains("'price'"), "{detail}");
                assert!(detail.contains("'real'"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_arity_mismatch() {
        let text = "price real,title string\n1.5\n";
        match decode_relation(text, &head()) {
            Err(CsvError::BadTuple { line, detail }) => {
                assert_eq!(line, 2);
                assert!(detail.contains("expected 2 attributes"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_escaped_delimiter_stays_in_data() {
        let text = "price real,title string\n0.5,a\\,b\n";
        let body = decode_relation(text, &head()).unwrap();
        assert_eq!(body.get(0).attr(1), &Value::Str("a\\,b".into()));
    }

    #[test]
    fn test_split_escaped() {
        assert_eq!(split_escaped("a,b,c", ','), vec!["a", "b", "c"]);
        assert_eq!(split_escaped("a\\,b,c", ','), vec!["a\\,b", "c"]);
        // an escaped escape does not protect the delimiter after it
        assert_eq!(split_escaped("a\\\\,b", ','), vec!["a\\\\", "b"]);
        assert_eq!(split_escaped("", ','), vec![""]);
    }

    #[test]
    fn test_trailing_blank_lines_ignored() {
        let text = "price real,title string\n1.5,A\n\n\n";
        let body = decode_relation(text, &head()).unwrap();
        assert_eq!(body.len(), 1);
    }
}
