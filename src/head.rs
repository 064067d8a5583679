//! # Relation Schemas
//!
//! A [`Head`] is the ordered, named, typed schema of a relation. Attributes
//! are kept in name-sorted order, so two heads compare equal whenever they
//! carry the same `(name, type)` pairs regardless of the order the caller
//! supplied them in. All position vectors handed to the tuple layer are
//! positions into this sorted order.

use std::fmt;

use crate::value::DataType;

/// Where a joined output attribute is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSrc {
    /// Position in the left tuple
    Left(usize),
    /// Position in the right tuple
    Right(usize),
}

/// A name-sorted list of `(name, type)` attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    attrs: Vec<(String, DataType)>,
}

impl Head {
    /// Build a head from attributes in any order. Names must be unique;
    /// the caller (parser, CSV decoder) validates that before construction.
    pub fn new(mut attrs: Vec<(String, DataType)>) -> Head {
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        Head { attrs }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn attrs(&self) -> &[(String, DataType)] {
        &self.attrs
    }

    pub fn name(&self, pos: usize) -> &str {
        &self.attrs[pos].0
    }

    pub fn types(&self) -> Vec<DataType> {
        self.attrs.iter().map(|(_, t)| *t).collect()
    }

    /// Sorted position of `name`
    pub fn find(&self, name: &str) -> Option<usize> {
        self.attrs
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
    }

    /// Position and type of `name`
    pub fn attr(&self, name: &str) -> Option<(usize, DataType)> {
        self.find(name).map(|pos| (pos, self.attrs[pos].1))
    }

    /// Positions of the attributes present in both heads with the same
    /// type, as `(left_pos, right_pos)` pairs in left order.
    pub fn common(&self, other: &Head) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (lpos, (name, ty)) in self.attrs.iter().enumerate() {
            if let Some((rpos, rty)) = other.attr(name) {
                if *ty == rty {
                    out.push((lpos, rpos));
                }
            }
        }
        out
    }

    /// Union head of a natural join, plus for each output position the
    /// source tuple position. Attributes present on the left are always
    /// taken from the left.
    pub fn join(&self, other: &Head) -> (Head, Vec<JoinSrc>) {
        let mut attrs = self.attrs.clone();
        for (name, ty) in &other.attrs {
            if self.find(name).is_none() {
                attrs.push((name.clone(), *ty));
            }
        }
        let head = Head::new(attrs);

        let map = head
            .attrs
            .iter()
            .map(|(name, _)| match self.find(name) {
                Some(lpos) => JoinSrc::Left(lpos),
                None => JoinSrc::Right(other.find(name).expect("join attr source")),
            })
            .collect();

        (head, map)
    }

    /// Reduce the head to the given attribute names. `None` when a name is
    /// not present or listed twice.
    pub fn project(&self, names: &[String]) -> Option<Head> {
        let mut attrs = Vec::with_capacity(names.len());
        for name in names {
            if attrs.iter().any(|(n, _): &(String, _)| n == name) {
                return None;
            }
            let (_, ty) = self.attr(name)?;
            attrs.push((name.clone(), ty));
        }
        Some(Head::new(attrs))
    }

    /// Rename `from[i]` to `to[i]`, keeping types. Returns the new head and
    /// for each new position the position in `self` the attribute came
    /// from. `None` when a source name is missing or the result has
    /// duplicate names.
    pub fn rename(&self, from: &[String], to: &[String]) -> Option<(Head, Vec<usize>)> {
        for name in from {
            self.find(name)?;
        }

        let renamed: Vec<(String, DataType)> = self
            .attrs
            .iter()
            .map(|(name, ty)| {
                let new = match from.iter().position(|f| f == name) {
                    Some(i) => to[i].clone(),
                    None => name.clone(),
                };
                (new, *ty)
            })
            .collect();

        let mut names: Vec<&str> = renamed.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return None;
        }

        let head = Head::new(renamed.clone());
        let map = head
            .attrs
            .iter()
            .map(|(name, _)| {
                renamed
                    .iter()
                    .position(|(n, _)| n == name)
                    .expect("renamed attr source")
            })
            .collect();

        Some((head, map))
    }
}

impl fmt::Display for Head {
    /// `{a int, b string}` form used in diagnostics
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, ty)) in self.attrs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} {ty}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(attrs: &[(&str, DataType)]) -> Head {
        Head::new(
            attrs
                .iter()
                .map(|(n, t)| ((*n).to_string(), *t))
                .collect(),
        )
    }

    #[test]
    fn test_eq_ignores_insertion_order() {
        let a = head(&[("b", DataType::Int), ("a", DataType::Str)]);
        let b = head(&[("a", DataType::Str), ("b", DataType::Int)]);
        assert_eq!(a, b);
        assert_eq!(a.name(0), "a");
    }

    #[test]
    fn test_common_requires_matching_type() {
        let l = head(&[("a", DataType::Int), ("b", DataType::Str)]);
        let r = head(&[("b", DataType::Str), ("a", DataType::Long)]);
        assert_eq!(l.common(&r), vec![(1, 1)]);
    }

    #[test]
    fn test_join_prefers_left() {
        let l = head(&[("a", DataType::Int), ("b", DataType::Str)]);
        let r = head(&[("b", DataType::Str), ("c", DataType::Real)]);
        let (h, map) = l.join(&r);
        assert_eq!(
            h,
            head(&[("a", DataType::Int), ("b", DataType::Str), ("c", DataType::Real)])
        );
        assert_eq!(
            map,
            vec![JoinSrc::Left(0), JoinSrc::Left(1), JoinSrc::Right(1)]
        );
    }

    #[test]
    fn test_self_join_is_identity() {
        let h = head(&[("x", DataType::Int), ("y", DataType::Real)]);
        let (joined, map) = h.join(&h);
        assert_eq!(joined, h);
        assert_eq!(map, vec![JoinSrc::Left(0), JoinSrc::Left(1)]);
    }

    #[test]
    fn test_project() {
        let h = head(&[("a", DataType::Int), ("b", DataType::Str), ("c", DataType::Real)]);
        let p = h.project(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(p, head(&[("a", DataType::Int), ("c", DataType::Real)]));
        assert!(h.project(&["zzz".to_string()]).is_none());
    }

    #[test]
    fn test_project_all_names_is_identity() {
        let h = head(&[("a", DataType::Int), ("b", DataType::Str)]);
        let names: Vec<String> = h.attrs().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(h.project(&names).unwrap(), h);
    }

    #[test]
    fn test_rename_map() {
        let h = head(&[("a", DataType::Int), ("b", DataType::Str)]);
        let (renamed, map) = h
            .rename(&["a".to_string()], &["z".to_string()])
            .unwrap();
        assert_eq!(renamed, head(&[("b", DataType::Str), ("z", DataType::Int)]));
        // output position 0 = "b" (old pos 1), position 1 = "z" (old pos 0)
        assert_eq!(map, vec![1, 0]);
    }

    #[test]
    fn test_rename_rejects_collision() {
        let h = head(&[("a", DataType::Int), ("b", DataType::Int)]);
        assert!(h.rename(&["a".to_string()], &["b".to_string()]).is_none());
    }
}
