//! Names: unforgeable identities.
//!
//! A `Name` carries a globally unique id handed out by a monotone counter.
//! Unlike atoms, names are not keyed by any text the program supplies —
//! there is no `Name::get(text)` — so two `new_name` instructions always
//! produce distinct names.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Name {
    id: u64,
}

impl Name {
    /// Allocate a fresh, globally unique name.
    pub fn fresh() -> Name {
        let id = NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed);
        Name { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.id)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{NewName}}")
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_distinct() {
        let a = Name::fresh();
        let b = Name::fresh();
        assert_ne!(a, b);
        assert!(a.id() < b.id());
    }
}
