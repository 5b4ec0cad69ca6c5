//! Arities: the interned, sorted, duplicate-free feature sets of records.
//!
//! Like atoms, arities are interned globally: two feature sets that sort to
//! the same sequence always produce the same `Arity` (pointer-equal). This
//! is what lets `unify` compare two records' arities with a single pointer
//! comparison instead of a structural walk.

use crate::error::ValueError;
use crate::literal::Literal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

struct ArityData {
    features: Vec<Literal>,
}

#[derive(Clone)]
pub struct Arity(Arc<ArityData>);

fn table() -> &'static Mutex<HashMap<Vec<Literal>, Arity>> {
    static TABLE: OnceLock<Mutex<HashMap<Vec<Literal>, Arity>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Arity {
    /// Intern the arity of `features`, deduping and sorting first.
    pub fn get(features: impl IntoIterator<Item = Literal>) -> Arity {
        let mut sorted: Vec<Literal> = features.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        Arity::get_sorted(sorted)
    }

    fn get_sorted(sorted: Vec<Literal>) -> Arity {
        let mut table = table().lock().expect("arity table poisoned");
        if let Some(existing) = table.get(&sorted) {
            return existing.clone();
        }
        let arity = Arity(Arc::new(ArityData { features: sorted.clone() }));
        table.insert(sorted, arity.clone());
        arity
    }

    /// The specialized tuple arity `{1, 2, ..., n}`.
    pub fn tuple(n: usize) -> Arity {
        Arity::get_sorted((1..=n as i64).map(Literal::Int).collect())
    }

    /// The empty arity (width 0), shared by atoms and names.
    pub fn empty() -> Arity {
        Arity::get_sorted(Vec::new())
    }

    pub fn features(&self) -> &[Literal] {
        &self.0.features
    }

    pub fn width(&self) -> usize {
        self.0.features.len()
    }

    pub fn has(&self, feature: &Literal) -> bool {
        self.0.features.binary_search(feature).is_ok()
    }

    /// Dense position of `feature`, or `FeatureNotFound`.
    pub fn map(&self, feature: &Literal) -> Result<usize, ValueError> {
        self.0
            .features
            .binary_search(feature)
            .map_err(|_| ValueError::FeatureNotFound)
    }

    /// Whether this is the specialized tuple arity `{1..n}` for its width.
    ///
    /// Mirrors the source implementation's shortcut: an empty arity is
    /// (vacuously) a tuple arity, and otherwise it suffices to check that
    /// the last (largest) feature is the small integer equal to the width —
    /// sortedness plus the total literal order rule out any other shape
    /// reaching that same last feature with that same width.
    pub fn is_tuple(&self) -> bool {
        match self.0.features.last() {
            None => true,
            Some(Literal::Int(n)) => *n == self.width() as i64,
            Some(_) => false,
        }
    }

    pub fn subtract(&self, feature: &Literal) -> Result<Arity, ValueError> {
        let idx = self.map(feature)?;
        let mut features = self.0.features.clone();
        features.remove(idx);
        Ok(Arity::get_sorted(features))
    }

    pub fn extend(&self, feature: Literal) -> Result<Arity, ValueError> {
        match self.0.features.binary_search(&feature) {
            Ok(_) => Err(ValueError::DuplicateFeature),
            Err(idx) => {
                let mut features = self.0.features.clone();
                features.insert(idx, feature);
                Ok(Arity::get_sorted(features))
            }
        }
    }

    /// Validate that `features` is a subset of this arity and return its
    /// (interned) arity.
    pub fn project(&self, features: &[Literal]) -> Result<Arity, ValueError> {
        for f in features {
            if !self.has(f) {
                return Err(ValueError::FeatureNotFound);
            }
        }
        Ok(Arity::get(features.iter().cloned()))
    }

    /// Bitmask whose bit `i` is set iff `self.features[i]` also appears in `other`.
    ///
    /// Assumes a width small enough to fit in a `u64`, matching the small-integer
    /// immediate the VM would report this as.
    pub fn compute_subset_mask(&self, other: &Arity) -> u64 {
        let mut mask = 0u64;
        for (i, f) in self.0.features.iter().enumerate() {
            if other.has(f) {
                mask |= 1 << i;
            }
        }
        mask
    }

    pub fn less_than(&self, other: &Arity) -> bool {
        match self.width().cmp(&other.width()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.0.features < other.0.features,
        }
    }

    fn identity(&self) -> *const ArityData {
        Arc::as_ptr(&self.0)
    }
}

impl PartialEq for Arity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Arity {}

impl std::hash::Hash for Arity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arity{:?}", self.0.features)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{NewArity {} features(", self.width())?;
        for (i, feat) in self.0.features.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{feat}")?;
        }
        write!(f, ")}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;

    fn lit(a: &str) -> Literal {
        Literal::Atom(Atom::get(a))
    }

    #[test]
    fn interning_is_order_independent() {
        let a = Arity::get(vec![lit("b"), lit("a"), lit("c")]);
        let b = Arity::get(vec![lit("c"), lit("b"), lit("a")]);
        assert_eq!(a, b);
    }

    #[test]
    fn extend_then_subtract_round_trips() {
        let base = Arity::get(vec![lit("a"), lit("b")]);
        let extended = base.extend(lit("c")).unwrap();
        let back = extended.subtract(&lit("c")).unwrap();
        assert_eq!(base, back);
    }

    #[test]
    fn tuple_arity_is_specialized() {
        let t = Arity::tuple(3);
        assert!(t.is_tuple());
        assert_eq!(t.features(), &[Literal::Int(1), Literal::Int(2), Literal::Int(3)]);
    }

    #[test]
    fn map_and_has() {
        let a = Arity::get(vec![lit("x"), lit("y")]);
        assert!(a.has(&lit("x")));
        assert_eq!(a.map(&lit("y")), Ok(1));
        assert_eq!(a.map(&lit("z")), Err(ValueError::FeatureNotFound));
    }

    #[test]
    fn subset_mask() {
        let a = Arity::get(vec![lit("x"), lit("y"), lit("z")]);
        let b = Arity::get(vec![lit("x"), lit("z")]);
        assert_eq!(a.compute_subset_mask(&b), 0b101);
    }
}
