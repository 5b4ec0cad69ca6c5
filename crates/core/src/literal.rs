//! Literals: the feature keys of records, and the values arities are built from.
//!
//! Atoms, integers, and names form a single totally-ordered class:
//! `Integer < Atom < Name`, with value-wise ordering inside each class.
//! This total order is what makes arities binary-searchable and what lets
//! `test_less_than`/`test_less_or_equal` operate uniformly over the three
//! kinds.

use crate::atom::Atom;
use crate::name::Name;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Atom(Atom),
    Name(Name),
}

impl Literal {
    fn class(&self) -> u8 {
        match self {
            Literal::Int(_) => 0,
            Literal::Atom(_) => 1,
            Literal::Name(_) => 2,
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "Int({n})"),
            Literal::Atom(a) => write!(f, "Atom({a:?})"),
            Literal::Name(n) => write!(f, "{n:?}"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) if *n < 0 => write!(f, "~{}", -n),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Atom(a) => write!(f, "{a}"),
            Literal::Name(n) => write!(f, "{n}"),
        }
    }
}

impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Literal {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.class().cmp(&other.class()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a.cmp(b),
            (Literal::Atom(a), Literal::Atom(b)) => a.cmp(b),
            (Literal::Name(a), Literal::Name(b)) => a.cmp(b),
            _ => unreachable!("class() partitions the three variants"),
        }
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}
impl From<Atom> for Literal {
    fn from(a: Atom) -> Self {
        Literal::Atom(a)
    }
}
impl From<Name> for Literal {
    fn from(n: Name) -> Self {
        Literal::Name(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_order_is_int_atom_name() {
        let i = Literal::Int(1_000_000);
        let a = Literal::Atom(Atom::get("a"));
        let n = Literal::Name(Name::fresh());
        assert!(i < a);
        assert!(a < n);
        assert!(i < n);
    }

    #[test]
    fn total_order_is_total() {
        let a = Literal::Int(3);
        let b = Literal::Atom(Atom::get("x"));
        assert!(a < b || a == b || b < a);
    }
}
