//! Global atom interning.
//!
//! Atoms are immutable interned strings: `Atom::get(s) == Atom::get(s)` by
//! pointer identity for any two calls with equal `s`. The table is a
//! process-global, append-only map behind a mutex (see the design note in
//! the crate root on why interning needs `Sync` storage even though the
//! rest of the value graph is single-threaded).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

struct AtomData {
    text: String,
}

/// A reference to an interned atom. Cloning is cheap (refcount bump);
/// equality and hashing are by interned identity, not by string content,
/// though in practice the two coincide because of interning.
#[derive(Clone)]
pub struct Atom(Arc<AtomData>);

fn table() -> &'static Mutex<HashMap<String, Atom>> {
    static TABLE: OnceLock<Mutex<HashMap<String, Atom>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Atom {
    /// Intern `text`, returning the process-wide unique atom for it.
    pub fn get(text: impl AsRef<str>) -> Atom {
        let text = text.as_ref();
        let mut table = table().lock().expect("atom table poisoned");
        if let Some(existing) = table.get(text) {
            return existing.clone();
        }
        let atom = Atom(Arc::new(AtomData {
            text: text.to_string(),
        }));
        table.insert(text.to_string(), atom.clone());
        atom
    }

    /// The singleton `true` atom.
    pub fn truth() -> Atom {
        Atom::get("true")
    }

    /// The singleton `false` atom.
    pub fn falsehood() -> Atom {
        Atom::get("false")
    }

    /// The `nil` atom used to terminate proper lists.
    pub fn nil() -> Atom {
        Atom::get("nil")
    }

    /// The `|` atom used as the label of cons cells.
    pub fn cons() -> Atom {
        Atom::get("|")
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Raw pointer used for interning/identity comparisons; stable for the
    /// lifetime of the process since atoms are never freed.
    fn identity(&self) -> *const AtomData {
        Arc::as_ptr(&self.0)
    }

    fn needs_quoting(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return true,
        }
        !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.as_str();
        if !Atom::needs_quoting(text) {
            return write!(f, "{text}");
        }
        write!(f, "'")?;
        for c in text.chars() {
            if c == '\\' || c == '\'' {
                write!(f, "\\")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "'")
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({})", self)
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_by_identity() {
        let a = Atom::get("hello");
        let b = Atom::get("hello");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn distinct_text_is_distinct_atom() {
        assert_ne!(Atom::get("foo"), Atom::get("bar"));
    }

    #[test]
    fn display_quotes_when_needed() {
        assert_eq!(Atom::get("ok").to_string(), "ok");
        assert_eq!(Atom::get("Ok").to_string(), "'Ok'");
        assert_eq!(Atom::get("has space").to_string(), "'has space'");
        assert_eq!(Atom::get("it's").to_string(), "'it\\'s'");
        assert_eq!(Atom::get("|").to_string(), "'|'");
    }

    #[test]
    fn lexical_order() {
        assert!(Atom::get("aaa") < Atom::get("aab"));
    }
}
