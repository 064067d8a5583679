//! # Transient Sort-Merge Index
//!
//! Equality matching for join, union, semidifference, projection and
//! summarize: sort a tuple buffer on a composite key once, then answer
//! membership and equal-range queries by binary search. Ties in the search
//! are resolved by scanning both directions, so every equal-key tuple is
//! collected in index order.

use std::cmp::Ordering;

use crate::tuple::{Tuple, TupleBuf};

/// Stable sort of `buf` on the composite key at `pos`
pub fn sort(buf: &mut TupleBuf, pos: &[usize]) {
    buf.sort_by(|a, b| Tuple::cmp_on(a, b, pos, pos));
}

fn find(idx: &TupleBuf, t: &Tuple, ipos: &[usize], tpos: &[usize]) -> Option<usize> {
    let mut low = 0i64;
    let mut high = idx.len() as i64 - 1;

    while low <= high {
        let mid = ((low + high) / 2) as usize;
        match Tuple::cmp_on(t, idx.get(mid), tpos, ipos) {
            Ordering::Less => high = mid as i64 - 1,
            Ordering::Greater => low = mid as i64 + 1,
            Ordering::Equal => return Some(mid),
        }
    }

    None
}

/// True when a tuple with `t`'s key exists in the sorted `idx`
pub fn has(idx: &TupleBuf, t: &Tuple, ipos: &[usize], tpos: &[usize]) -> bool {
    find(idx, t, ipos, tpos).is_some()
}

/// Indices of every tuple in the sorted `idx` whose key equals `t`'s, in
/// index order. Empty when there is no match.
pub fn match_range(idx: &TupleBuf, t: &Tuple, ipos: &[usize], tpos: &[usize]) -> std::ops::Range<usize> {
    let Some(hit) = find(idx, t, ipos, tpos) else {
        return 0..0;
    };

    let mut start = hit;
    while start > 0 && Tuple::cmp_on(idx.get(start - 1), t, ipos, tpos) == Ordering::Equal {
        start -= 1;
    }

    let mut end = hit + 1;
    while end < idx.len() && Tuple::cmp_on(idx.get(end), t, ipos, tpos) == Ordering::Equal {
        end += 1;
    }

    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn buf(rows: &[(i32, i32)]) -> TupleBuf {
        rows.iter()
            .map(|&(a, b)| Tuple::new(vec![Value::Int(a), Value::Int(b)]))
            .collect()
    }

    fn key(a: i32) -> Tuple {
        Tuple::new(vec![Value::Int(a)])
    }

    #[test]
    fn test_sort_is_stable() {
        let mut b = buf(&[(2, 0), (1, 0), (2, 1), (1, 1), (2, 2)]);
        sort(&mut b, &[0]);
        let snd: Vec<i32> = b
            .iter()
            .map(|t| match t.attr(1) {
                Value::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(snd, vec![0, 1, 0, 1, 2]);
    }

    #[test]
    fn test_has() {
        let mut b = buf(&[(3, 0), (1, 0), (2, 0)]);
        sort(&mut b, &[0]);
        assert!(has(&b, &key(2), &[0], &[0]));
        assert!(!has(&b, &key(9), &[0], &[0]));
        assert!(!has(&TupleBuf::new(), &key(1), &[0], &[0]));
    }

    #[test]
    fn test_match_range_collects_all_equal_keys() {
        let mut b = buf(&[(2, 0), (1, 0), (2, 1), (2, 2), (3, 0)]);
        sort(&mut b, &[0]);
        let range = match_range(&b, &key(2), &[0], &[0]);
        assert_eq!(range.len(), 3);
        for i in range {
            assert_eq!(b.get(i).attr(0), &Value::Int(2));
        }
        assert!(match_range(&b, &key(4), &[0], &[0]).is_empty());
    }
}
