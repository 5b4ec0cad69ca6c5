//! Records, tuples, lists and open records: the "record capability" (§3, §4.4).
//!
//! Atoms, names, tuples, records, lists and *closed* open records all
//! expose the same surface — label, arity, width, `has`/`get`, and ordered
//! iteration — even though only tuples/records/lists/open-records actually
//! live on the heap. [`resolve_record`] is the single dispatcher every
//! accessor in this module goes through; it is also the thing that decides
//! whether an access has to suspend on an open record's internal variable.

use crate::arity::Arity;
use crate::atom::Atom;
use crate::error::ValueError;
use crate::literal::Literal;
use crate::value::{HeapKind, Value};

pub struct TupleData {
    pub label: Literal,
    pub values: Vec<Value>,
}

pub struct RecordData {
    pub label: Literal,
    pub arity: Arity,
    pub values: Vec<Value>,
}

pub struct ListData {
    pub head: Value,
    pub tail: Value,
}

/// A record whose feature set may still grow. `features` is kept in
/// ascending literal order so it can serve as an `OpenRecordData::arity`
/// without re-sorting, and `var` is the embedded free variable that gets
/// bound when the record closes.
pub struct OpenRecordData {
    pub label: Literal,
    pub features: Vec<(Literal, Value)>,
    pub var: Value,
}

impl OpenRecordData {
    pub fn new(label: Literal, var: Value) -> OpenRecordData {
        OpenRecordData {
            label,
            features: Vec::new(),
            var,
        }
    }

    pub fn has(&self, feature: &Literal) -> bool {
        self.features.iter().any(|(f, _)| f == feature)
    }

    pub fn get(&self, feature: &Literal) -> Option<Value> {
        self.features.iter().find(|(f, _)| f == feature).map(|(_, v)| v.clone())
    }

    pub fn width(&self) -> usize {
        self.features.len()
    }

    pub fn arity(&self) -> Arity {
        Arity::get(self.features.iter().map(|(f, _)| f.clone()))
    }

    pub fn items(&self) -> Vec<(Literal, Value)> {
        self.features.clone()
    }

    /// Insert a feature not already present, keeping ascending order.
    pub fn import(&mut self, feature: Literal, value: Value) {
        debug_assert!(!self.has(&feature));
        let idx = self.features.partition_point(|(f, _)| *f < feature);
        self.features.insert(idx, (feature, value));
    }
}

/// Outcome of a record-capability access: the value may simply not be
/// record-capable, or — for an open record whose internal variable is still
/// free — the caller must suspend on that variable and retry.
pub enum Access<T> {
    Ok(T),
    Suspend(Value),
    Err(ValueError),
}

impl<T> Access<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Access<U> {
        match self {
            Access::Ok(v) => Access::Ok(f(v)),
            Access::Suspend(v) => Access::Suspend(v),
            Access::Err(e) => Access::Err(e),
        }
    }
}

/// Materialize `(label, arity, values-in-arity-order)` for any
/// record-capable *determined* value, blocking (suspending) on an open
/// record until it closes.
pub fn resolve_record(value: &Value) -> Access<(Literal, Arity, Vec<Value>)> {
    let value = value.deref();
    match &value {
        Value::Atom(a) => Access::Ok((Literal::Atom(a.clone()), Arity::empty(), Vec::new())),
        Value::Name(n) => Access::Ok((Literal::Name(n.clone()), Arity::empty(), Vec::new())),
        Value::Ref(ptr) => ptr.with(|kind| match kind {
            HeapKind::Tuple(t) => {
                Access::Ok((t.label.clone(), Arity::tuple(t.values.len()), t.values.clone()))
            }
            HeapKind::Record(r) => Access::Ok((r.label.clone(), r.arity.clone(), r.values.clone())),
            HeapKind::List(l) => Access::Ok((
                Literal::Atom(Atom::cons()),
                Arity::tuple(2),
                vec![l.head.clone(), l.tail.clone()],
            )),
            // `value.deref()` above already follows a *closed* open record
            // through to whatever it was closed onto, so reaching this arm
            // means the open record's internal variable is still free.
            HeapKind::OpenRecord(o) => Access::Suspend(o.var.clone()),
            _ => Access::Err(ValueError::NotARecord),
        }),
        _ => Access::Err(ValueError::NotARecord),
    }
}

pub fn label(value: &Value) -> Access<Literal> {
    resolve_record(value).map(|(l, _, _)| l)
}

pub fn arity(value: &Value) -> Access<Arity> {
    resolve_record(value).map(|(_, a, _)| a)
}

pub fn width(value: &Value) -> Access<usize> {
    resolve_record(value).map(|(_, a, _)| a.width())
}

pub fn has(value: &Value, feature: &Literal) -> Access<bool> {
    resolve_record(value).map(|(_, a, _)| a.has(feature))
}

pub fn get(value: &Value, feature: &Literal) -> Access<Value> {
    match resolve_record(value) {
        Access::Ok((_, a, values)) => match a.map(feature) {
            Ok(idx) => Access::Ok(values[idx].clone()),
            Err(e) => Access::Err(e),
        },
        Access::Suspend(v) => Access::Suspend(v),
        Access::Err(e) => Access::Err(e),
    }
}

pub fn items(value: &Value) -> Access<Vec<(Literal, Value)>> {
    resolve_record(value).map(|(_, a, values)| a.features().iter().cloned().zip(values).collect())
}

pub fn values(value: &Value) -> Access<Vec<Value>> {
    resolve_record(value).map(|(_, _, values)| values)
}

/// Normalizing tuple constructor: a width-2 tuple labeled `|` is always a
/// list instead (§3 invariant).
pub fn make_tuple(label: Literal, values: Vec<Value>) -> TupleOrList {
    if values.len() == 2 {
        if let Literal::Atom(a) = &label {
            if *a == Atom::cons() {
                let mut it = values.into_iter();
                let head = it.next().unwrap();
                let tail = it.next().unwrap();
                return TupleOrList::List(ListData { head, tail });
            }
        }
    }
    TupleOrList::Tuple(TupleData { label, values })
}

pub enum TupleOrList {
    Tuple(TupleData),
    List(ListData),
}

/// Normalizing record constructor: a record built over a tuple-shaped
/// arity is always a tuple instead (§4.4).
pub fn make_record(label: Literal, arity: Arity, values: Vec<Value>) -> RecordOrTuple {
    if arity.is_tuple() {
        return RecordOrTuple::Tuple(match make_tuple(label, values) {
            TupleOrList::Tuple(t) => t,
            TupleOrList::List(_) => unreachable!("tuple arities never have width 2 with label |"),
        });
    }
    RecordOrTuple::Record(RecordData { label, arity, values })
}

pub enum RecordOrTuple {
    Tuple(TupleData),
    Record(RecordData),
}

impl RecordData {
    /// `self.arity` restricted to `subset`, which must already be a subset
    /// of `self.arity`.
    pub fn project(&self, subset: &Arity) -> Result<RecordData, ValueError> {
        for f in subset.features() {
            if !self.arity.has(f) {
                return Err(ValueError::FeatureNotFound);
            }
        }
        let values = subset
            .features()
            .iter()
            .map(|f| self.values[self.arity.map(f).unwrap()].clone())
            .collect();
        Ok(RecordData {
            label: self.label.clone(),
            arity: subset.clone(),
            values,
        })
    }

    pub fn subtract(&self, feature: &Literal) -> Result<RecordData, ValueError> {
        let idx = self.arity.map(feature)?;
        let mut values = self.values.clone();
        values.remove(idx);
        Ok(RecordData {
            label: self.label.clone(),
            arity: self.arity.subtract(feature)?,
            values,
        })
    }
}

impl ListData {
    /// Count head values following `.tail` until reaching a non-list value,
    /// a free variable, or a previously-visited list node (cycle). Returns
    /// the count and the terminator/cause via `last`.
    pub fn get_values_count(head: &Value) -> (usize, Value) {
        let mut seen: Vec<Value> = Vec::new();
        let mut count = 0usize;
        let mut current = head.deref();
        loop {
            if let Some(var) = current.as_unbound_var() {
                return (count, var);
            }
            let Value::Ref(ptr) = &current else {
                return (count, current);
            };
            let is_list = ptr.with(|k| matches!(k, HeapKind::List(_)));
            if !is_list {
                return (count, current);
            }
            if seen.iter().any(|v| v.same_ref(&current)) {
                return (count, current);
            }
            seen.push(current.clone());
            let (next_head_counts, tail) = ptr.with(|k| {
                let HeapKind::List(l) = k else { unreachable!() };
                (true, l.tail.clone())
            });
            debug_assert!(next_head_counts);
            count += 1;
            current = tail.deref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Store, Value};

    #[test]
    fn tuple_label_bar_becomes_list() {
        let v = make_tuple(Literal::Atom(Atom::cons()), vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(v, TupleOrList::List(_)));
    }

    #[test]
    fn record_over_tuple_arity_becomes_tuple() {
        let v = make_record(Literal::Atom(Atom::get("p")), Arity::tuple(2), vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(v, RecordOrTuple::Tuple(_)));
    }

    #[test]
    fn list_values_count_stops_at_nil() {
        let store = Store::heap();
        let nil = Value::Atom(Atom::nil());
        let cons2 = Value::Ref(
            store
                .alloc(HeapKind::List(ListData { head: Value::Int(2), tail: nil }))
                .unwrap(),
        );
        let cons1 = Value::Ref(
            store
                .alloc(HeapKind::List(ListData { head: Value::Int(1), tail: cons2 }))
                .unwrap(),
        );
        let (count, last) = ListData::get_values_count(&cons1);
        assert_eq!(count, 2);
        assert!(last.same_ref(&Value::Atom(Atom::nil())));
    }
}
