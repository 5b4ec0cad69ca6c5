//! The tagged `Value` reference, the heap it points into, and stop-and-copy
//! move between stores.
//!
//! `Value` is a small, `Clone`-cheap tag: either a small integer, one of the
//! three interned literal kinds, or a [`Ptr`] into a [`Store`]. Every other
//! heap shape (records, cells, arrays, closures, variables, ...) lives
//! behind a `Ptr` as a [`HeapKind`] so that mutation (binding a variable,
//! assigning a cell) is a single `RefCell` borrow rather than something
//! that has to thread through the whole value graph.
//!
//! Atoms, names and arities are *not* stored in any `Store` — they are
//! process-global interned singletons (see [`crate::atom`], [`crate::name`],
//! [`crate::arity`]) and a [`Store::move_value`] leaves them untouched,
//! exactly as the spec requires.

use crate::closure::ClosureData;
use crate::error::StoreError;
use crate::literal::Literal;
use crate::record::{ListData, OpenRecordData, RecordData, TupleData};
use crate::variable::VariableData;
use crate::{arity::Arity, atom::Atom, name::Name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A value reference: an immediate small integer, an interned literal, or a
/// pointer into a store's heap.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Atom(Atom),
    Name(Name),
    Arity(Arity),
    Ref(Ptr),
}

/// The closed set of values that live behind a heap pointer.
pub enum HeapKind {
    String(Rc<str>),
    Float(f64),
    Tuple(TupleData),
    Record(RecordData),
    List(ListData),
    OpenRecord(OpenRecordData),
    Cell(Value),
    Array(Vec<Value>),
    Closure(ClosureData),
    Variable(VariableData),
    Thread(ThreadRef),
}

/// Minimal capability a heap `Thread` value needs to expose to `oz-core`.
/// The concrete call-stack/scheduler machinery lives in the runtime crate,
/// which implements this trait on its own `Thread` type; `oz-core` only
/// needs an identity and a way to know the thread is still referenced.
pub trait ThreadObject: std::fmt::Debug {
    fn thread_id(&self) -> u64;
}

pub type ThreadRef = Rc<dyn ThreadObject>;

enum Slot {
    Live(HeapKind),
    /// Forwarding pointer left behind by a stop-and-copy move.
    Moved(Ptr),
}

struct StoreInner {
    slots: RefCell<Vec<Slot>>,
    /// `None` for an unbounded heap store; `Some(cap)` for a fixed-size
    /// static store that refuses allocation past `cap` live slots.
    capacity: Option<usize>,
}

/// A store: either an unbounded heap or a fixed-capacity bump region.
/// Neither flavor ever frees a slot; a static store's only way to reclaim
/// space is [`Store::move_value`]ing its live set into a fresh store.
#[derive(Clone)]
pub struct Store(Rc<StoreInner>);

impl Store {
    pub fn heap() -> Store {
        Store(Rc::new(StoreInner {
            slots: RefCell::new(Vec::new()),
            capacity: None,
        }))
    }

    pub fn bounded(capacity: usize) -> Store {
        Store(Rc::new(StoreInner {
            slots: RefCell::new(Vec::with_capacity(capacity)),
            capacity: Some(capacity),
        }))
    }

    /// Number of live-or-moved slots ever allocated in this store.
    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alloc(&self, kind: HeapKind) -> Result<Ptr, StoreError> {
        let mut slots = self.0.slots.borrow_mut();
        if let Some(capacity) = self.0.capacity {
            if slots.len() >= capacity {
                return Err(StoreError::Exhausted { capacity });
            }
        }
        let index = slots.len();
        slots.push(Slot::Live(kind));
        Ok(Ptr {
            store: self.clone(),
            index,
        })
    }
}

/// A heap pointer into a specific store.
#[derive(Clone)]
pub struct Ptr {
    store: Store,
    index: usize,
}

impl Ptr {
    /// Follow a chain of `Moved` forwarders (left behind by prior
    /// [`Store::move_value`] calls) to the slot that actually holds data.
    pub fn resolve(&self) -> Ptr {
        let mut current = self.clone();
        loop {
            let next = {
                let slots = current.store.0.slots.borrow();
                match &slots[current.index] {
                    Slot::Live(_) => None,
                    Slot::Moved(forward) => Some(forward.clone()),
                }
            };
            match next {
                Some(forward) => current = forward,
                None => return current,
            }
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&HeapKind) -> R) -> R {
        let resolved = self.resolve();
        let slots = resolved.store.0.slots.borrow();
        match &slots[resolved.index] {
            Slot::Live(kind) => f(kind),
            Slot::Moved(_) => unreachable!("resolve() already followed moved slots"),
        }
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut HeapKind) -> R) -> R {
        let resolved = self.resolve();
        let mut slots = resolved.store.0.slots.borrow_mut();
        match &mut slots[resolved.index] {
            Slot::Live(kind) => f(kind),
            Slot::Moved(_) => unreachable!("resolve() already followed moved slots"),
        }
    }

    /// A hashable identity for this pointer's resolved slot, for use as a
    /// map/set key by callers (e.g. the unification trail) that cannot
    /// depend on `Store`'s internals directly.
    pub(crate) fn key(&self) -> (usize, usize) {
        let resolved = self.resolve();
        (Rc::as_ptr(&resolved.store.0) as usize, resolved.index)
    }
}

impl PartialEq for Ptr {
    fn eq(&self, other: &Self) -> bool {
        let a = self.resolve();
        let b = other.resolve();
        Rc::ptr_eq(&a.store.0, &b.store.0) && a.index == b.index
    }
}
impl Eq for Ptr {}

impl std::hash::Hash for Ptr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let resolved = self.resolve();
        (Rc::as_ptr(&resolved.store.0) as usize, resolved.index).hash(state);
    }
}

impl std::fmt::Debug for Ptr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resolved = self.resolve();
        write!(f, "Ptr(store={:p}, index={})", Rc::as_ptr(&resolved.store.0), resolved.index)
    }
}

impl Value {
    pub fn boolean(b: bool) -> Value {
        Value::Atom(if b { Atom::truth() } else { Atom::falsehood() })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.deref() {
            Value::Atom(a) if a == Atom::truth() => Some(true),
            Value::Atom(a) if a == Atom::falsehood() => Some(false),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self.deref() {
            Value::Int(n) => Some(Literal::Int(n)),
            Value::Atom(a) => Some(Literal::Atom(a)),
            Value::Name(n) => Some(Literal::Name(n)),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<&Ptr> {
        match self {
            Value::Ref(p) => Some(p),
            _ => None,
        }
    }

    /// Walk bound-variable links — and, transparently, bound open records'
    /// internal variable — until reaching a free variable or a determined
    /// value. Idempotent: `deref(deref(v)) == deref(v)`.
    ///
    /// An open record whose internal variable is still free derefs to
    /// itself (it is the "determined enough" terminal the rest of the
    /// engine sees); once that variable is bound — by [`unify`](crate::variable::unify)
    /// closing the record — it derefs straight through to whatever it was
    /// closed onto, exactly as if it had never been open.
    pub fn deref(&self) -> Value {
        let mut current = self.clone();
        loop {
            let Value::Ref(ptr) = &current else {
                return current;
            };
            let resolved = ptr.resolve();
            let next = resolved.with(|kind| match kind {
                HeapKind::Variable(v) => v.binding.clone(),
                HeapKind::OpenRecord(o) => o.var.as_unbound_var().is_none().then(|| o.var.clone()),
                _ => None,
            });
            match next {
                Some(next) => current = next,
                None => return Value::Ref(resolved),
            }
        }
    }

    /// `Some(self.deref())` if this dereferences to a free (unbound) variable.
    pub fn as_unbound_var(&self) -> Option<Value> {
        let d = self.deref();
        if let Value::Ref(ptr) = &d {
            let is_var = ptr.with(|k| matches!(k, HeapKind::Variable(_)));
            if is_var {
                return Some(d);
            }
        }
        None
    }

    pub fn is_determined(&self) -> bool {
        self.as_unbound_var().is_none()
    }

    /// Identity/structural equality on *references*, not the deep structural
    /// equality the spec calls `equals` (see [`crate::variable::equals`]).
    /// Two `Value`s compare equal here only if they are literally the same
    /// small int, the same interned atom/name/arity, or the same heap slot.
    pub fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Atom(a), Value::Atom(b)) => a == b,
            (Value::Name(a), Value::Name(b)) => a == b,
            (Value::Arity(a), Value::Arity(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

/// Stop-and-copy move of `value` into `dest`, per §4.1: interned literals
/// return themselves untouched; heap values are shallow-copied into `dest`
/// and the source slot is overwritten with a forwarder, then referenced
/// values are moved recursively. `moved` memoizes source-slot identity to
/// destination pointer so cyclic and shared graphs are moved exactly once.
pub fn move_value(
    value: &Value,
    dest: &Store,
    moved: &mut HashMap<(usize, usize), Ptr>,
) -> Result<Value, StoreError> {
    let ptr = match value {
        Value::Ref(p) => p.resolve(),
        _ => return Ok(value.clone()),
    };
    let key = (Rc::as_ptr(&ptr.store.0) as usize, ptr.index);
    if let Some(existing) = moved.get(&key) {
        return Ok(Value::Ref(existing.clone()));
    }

    // Placeholder so a cycle reached while moving this value's own fields
    // resolves back to the destination slot we are about to fill in.
    let placeholder = dest.alloc(HeapKind::Array(Vec::new()))?;
    moved.insert(key, placeholder.clone());

    let shallow = ptr.with(|k| clone_shape(k));
    let moved_kind = move_kind(shallow, dest, moved)?;
    placeholder.with_mut(|slot| *slot = moved_kind);

    {
        let mut slots = ptr.store.0.slots.borrow_mut();
        slots[ptr.index] = Slot::Moved(placeholder.clone());
    }
    Ok(Value::Ref(placeholder))
}

/// A shallow, un-recursed copy of a heap shape: values inside it are still
/// pointers into the *source* store, to be rewritten by [`move_kind`].
fn clone_shape(kind: &HeapKind) -> HeapKind {
    match kind {
        HeapKind::String(s) => HeapKind::String(s.clone()),
        HeapKind::Float(f) => HeapKind::Float(*f),
        HeapKind::Tuple(t) => HeapKind::Tuple(TupleData {
            label: t.label.clone(),
            values: t.values.clone(),
        }),
        HeapKind::Record(r) => HeapKind::Record(RecordData {
            label: r.label.clone(),
            arity: r.arity.clone(),
            values: r.values.clone(),
        }),
        HeapKind::List(l) => HeapKind::List(ListData {
            head: l.head.clone(),
            tail: l.tail.clone(),
        }),
        HeapKind::OpenRecord(o) => HeapKind::OpenRecord(OpenRecordData {
            label: o.label.clone(),
            features: o.features.clone(),
            var: o.var.clone(),
        }),
        HeapKind::Cell(v) => HeapKind::Cell(v.clone()),
        HeapKind::Array(a) => HeapKind::Array(a.clone()),
        HeapKind::Closure(c) => HeapKind::Closure(c.clone()),
        HeapKind::Variable(v) => HeapKind::Variable(VariableData {
            binding: v.binding.clone(),
            suspensions: v.suspensions.clone(),
        }),
        HeapKind::Thread(t) => HeapKind::Thread(t.clone()),
    }
}

fn move_kind(
    kind: HeapKind,
    dest: &Store,
    moved: &mut HashMap<(usize, usize), Ptr>,
) -> Result<HeapKind, StoreError> {
    Ok(match kind {
        HeapKind::String(s) => HeapKind::String(s),
        HeapKind::Float(f) => HeapKind::Float(f),
        HeapKind::Tuple(t) => HeapKind::Tuple(TupleData {
            label: t.label,
            values: move_all(&t.values, dest, moved)?,
        }),
        HeapKind::Record(r) => HeapKind::Record(RecordData {
            label: r.label,
            arity: r.arity,
            values: move_all(&r.values, dest, moved)?,
        }),
        HeapKind::List(l) => HeapKind::List(ListData {
            head: move_value(&l.head, dest, moved)?,
            tail: move_value(&l.tail, dest, moved)?,
        }),
        HeapKind::OpenRecord(o) => HeapKind::OpenRecord(OpenRecordData {
            label: o.label,
            features: o
                .features
                .into_iter()
                .map(|(f, v)| Ok((f, move_value(&v, dest, moved)?)))
                .collect::<Result<_, StoreError>>()?,
            var: move_value(&o.var, dest, moved)?,
        }),
        HeapKind::Cell(v) => HeapKind::Cell(move_value(&v, dest, moved)?),
        HeapKind::Array(a) => HeapKind::Array(move_all(&a, dest, moved)?),
        HeapKind::Closure(c) => HeapKind::Closure(c.move_env(dest, moved)?),
        HeapKind::Variable(v) => HeapKind::Variable(VariableData {
            binding: v.binding.map(|b| move_value(&b, dest, moved)).transpose()?,
            suspensions: v.suspensions,
        }),
        HeapKind::Thread(t) => HeapKind::Thread(t),
    })
}

fn move_all(
    values: &[Value],
    dest: &Store,
    moved: &mut HashMap<(usize, usize), Ptr>,
) -> Result<Vec<Value>, StoreError> {
    values.iter().map(|v| move_value(v, dest, moved)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deref_is_idempotent_on_plain_values() {
        let v = Value::Int(5);
        assert!(v.deref().same_ref(&v.deref().deref()));
    }

    #[test]
    fn alloc_respects_capacity() {
        let store = Store::bounded(1);
        assert!(store.alloc(HeapKind::Float(1.0)).is_ok());
        assert!(store.alloc(HeapKind::Float(2.0)).is_err());
    }

    #[test]
    fn move_value_preserves_shared_structure() {
        let src = Store::heap();
        let dest = Store::heap();
        let shared = src.alloc(HeapKind::Float(1.5)).unwrap();
        let tuple = src
            .alloc(HeapKind::Tuple(TupleData {
                label: Literal::Atom(Atom::get("p")),
                values: vec![Value::Ref(shared.clone()), Value::Ref(shared.clone())],
            }))
            .unwrap();

        let mut memo = HashMap::new();
        let moved = move_value(&Value::Ref(tuple), &dest, &mut memo).unwrap();
        let Value::Ref(moved_ptr) = moved else { panic!() };
        moved_ptr.with(|k| {
            let HeapKind::Tuple(t) = k else { panic!() };
            let (Value::Ref(a), Value::Ref(b)) = (&t.values[0], &t.values[1]) else {
                panic!()
            };
            assert_eq!(a, b, "shared substructure must still be shared after move");
        });
    }

    #[test]
    fn interned_atoms_are_unmoved() {
        let dest = Store::heap();
        let mut memo = HashMap::new();
        let a = Value::Atom(Atom::get("x"));
        let moved = move_value(&a, &dest, &mut memo).unwrap();
        assert!(moved.same_ref(&a));
    }
}
