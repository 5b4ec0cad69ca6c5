//! Printable, shared-reference-aware text form (§4.9).
//!
//! A first `explore` pass walks the value graph and marks every heap
//! pointer reached more than once (cycles included — a node that points
//! back to itself is, by definition, reached twice). Every value marked
//! that way except atoms and integers is pre-emitted as a `V<n>=<form>`
//! line before the root expression, and every *other* occurrence of it is
//! printed as a bare `V<n>` reference instead of being inlined again.

use crate::atom::Atom;
use crate::literal::Literal;
use crate::value::{HeapKind, Ptr, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

type PtrKey = (usize, usize);

struct Explored {
    seen: HashMap<PtrKey, bool>,
    order: Vec<Ptr>,
}

fn explore(value: &Value, st: &mut Explored) {
    let value = value.deref();
    let Value::Ref(ptr) = &value else { return };
    let key = ptr.key();
    if let Some(seen_before) = st.seen.get_mut(&key) {
        *seen_before = true;
        return;
    }
    st.seen.insert(key, false);
    st.order.push(ptr.clone());

    ptr.with(|kind| match kind {
        HeapKind::Tuple(t) => t.values.iter().for_each(|v| explore(v, st)),
        HeapKind::Record(r) => r.values.iter().for_each(|v| explore(v, st)),
        HeapKind::List(l) => {
            explore(&l.head, st);
            explore(&l.tail, st);
        }
        // The open record's internal variable is plumbing, not part of the
        // printed form, so it is never explored.
        HeapKind::OpenRecord(o) => o.features.iter().for_each(|(_, v)| explore(v, st)),
        HeapKind::Cell(v) => explore(v, st),
        HeapKind::Array(a) => a.iter().for_each(|v| explore(v, st)),
        HeapKind::String(_)
        | HeapKind::Float(_)
        | HeapKind::Closure(_)
        | HeapKind::Variable(_)
        | HeapKind::Thread(_) => {}
    });
}

/// Render `root` to its printable text form.
pub fn serialize(root: &Value) -> String {
    let mut st = Explored {
        seen: HashMap::new(),
        order: Vec::new(),
    };
    explore(root, &mut st);

    let mut shared: HashMap<PtrKey, u64> = HashMap::new();
    let mut next_id = 1u64;
    for ptr in &st.order {
        if st.seen[&ptr.key()] {
            shared.insert(ptr.key(), next_id);
            next_id += 1;
        }
    }

    let mut out = String::new();
    for ptr in &st.order {
        let key = ptr.key();
        if let Some(&id) = shared.get(&key) {
            write!(out, "V{id}=").unwrap();
            render(&Value::Ref(ptr.clone()), &shared, Some(key), &mut out);
            out.push('\n');
        }
    }
    // The root expression always expands in full, even if it happens to be
    // reachable from elsewhere too — only *other* occurrences of it get
    // collapsed to `V<n>`, exactly like each pre-emitted definition expands
    // in full at its own `V<n>=` line.
    let root = root.deref();
    let root_defining = match &root {
        Value::Ref(p) => Some(p.key()),
        _ => None,
    };
    render(&root, &shared, root_defining, &mut out);
    out
}

/// Render `value`, substituting `V<n>` for any shared pointer except the
/// one currently being defined (`defining`), which must expand in full.
fn render(value: &Value, shared: &HashMap<PtrKey, u64>, defining: Option<PtrKey>, out: &mut String) {
    let value = value.deref();
    if let Value::Ref(ptr) = &value {
        let key = ptr.key();
        if let Some(&id) = shared.get(&key) {
            if Some(key) != defining {
                write!(out, "V{id}").unwrap();
                return;
            }
        }
    }
    render_inline(&value, shared, out);
}

fn render_inline(value: &Value, shared: &HashMap<PtrKey, u64>, out: &mut String) {
    match value {
        Value::Int(n) => render_int(*n, out),
        Value::Atom(a) => {
            write!(out, "{a}").unwrap();
        }
        Value::Name(_) => out.push_str("{NewName}"),
        Value::Arity(a) => {
            write!(out, "{a}").unwrap();
        }
        Value::Ref(ptr) => ptr.with(|kind| match kind {
            HeapKind::String(s) => render_string(s, out),
            HeapKind::Float(f) => {
                write!(out, "{f:.6}").unwrap();
            }
            HeapKind::Tuple(t) => {
                if matches!(&t.label, Literal::Atom(a) if *a == hash_atom()) {
                    render(&t.values[0], shared, None, out);
                    for v in &t.values[1..] {
                        out.push('#');
                        render(v, shared, None, out);
                    }
                } else {
                    write!(out, "{}", t.label).unwrap();
                    out.push('(');
                    render(&t.values[0], shared, None, out);
                    for v in &t.values[1..] {
                        out.push(' ');
                        render(v, shared, None, out);
                    }
                    out.push(')');
                }
            }
            HeapKind::Record(r) => {
                write!(out, "{}", r.label).unwrap();
                if r.values.is_empty() {
                    return;
                }
                out.push('(');
                let features = r.arity.features();
                for (i, (f, v)) in features.iter().zip(&r.values).enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    write!(out, "{f}:").unwrap();
                    render(v, shared, None, out);
                }
                out.push(')');
            }
            HeapKind::List(l) => render_list(l, shared, out),
            HeapKind::OpenRecord(o) => {
                write!(out, "{}", o.label).unwrap();
                out.push('(');
                for (f, v) in &o.features {
                    write!(out, "{f}:").unwrap();
                    render(v, shared, None, out);
                    out.push(' ');
                }
                out.push_str("...)");
            }
            HeapKind::Cell(v) => {
                out.push_str("{NewCell ");
                render(v, shared, None, out);
                out.push('}');
            }
            HeapKind::Array(a) => {
                out.push_str("{NewArray array(");
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    render(v, shared, None, out);
                }
                out.push_str(")}");
            }
            HeapKind::Closure(c) => {
                write!(out, "<P/{}>", c.code.nparams).unwrap();
            }
            HeapKind::Variable(_) => out.push('_'),
            HeapKind::Thread(t) => {
                write!(out, "{{Thread {}}}", t.thread_id()).unwrap();
            }
        }),
    }
}

fn hash_atom() -> Atom {
    Atom::get("#")
}

fn render_int(n: i64, out: &mut String) {
    if n < 0 {
        write!(out, "~{}", n.unsigned_abs()).unwrap();
    } else {
        write!(out, "{n}").unwrap();
    }
}

fn render_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

/// A list is rendered `[v1 v2 …]` if it is `nil`-terminated and
/// `v1|v2|…|tail` (tail inlined, possibly itself a `V<n>`) otherwise.
/// Walks through shared list cells using the same `shared`/`render`
/// machinery a nested nonlinear structure would.
fn render_list(l: &crate::record::ListData, shared: &HashMap<PtrKey, u64>, out: &mut String) {
    let mut heads = vec![l.head.clone()];
    let mut tail = l.tail.deref();
    loop {
        let Value::Ref(ptr) = &tail else { break };
        if shared.contains_key(&ptr.key()) {
            break;
        }
        let is_list = ptr.with(|k| matches!(k, HeapKind::List(_)));
        if !is_list {
            break;
        }
        let (next_head, next_tail) = ptr.with(|k| {
            let HeapKind::List(l) = k else { unreachable!() };
            (l.head.clone(), l.tail.clone())
        });
        heads.push(next_head);
        tail = next_tail.deref();
    }

    if let Value::Atom(a) = &tail {
        if *a == Atom::nil() {
            out.push('[');
            for (i, h) in heads.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                render(h, shared, None, out);
            }
            out.push(']');
            return;
        }
    }

    for h in &heads {
        render(h, shared, None, out);
        out.push('|');
    }
    render(&tail, shared, None, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;
    use crate::record::{ListData, RecordData, TupleData};
    use crate::value::{HeapKind, Store};

    #[test]
    fn small_ints_print_with_tilde_for_negatives() {
        assert_eq!(serialize(&Value::Int(-3)), "~3");
        assert_eq!(serialize(&Value::Int(3)), "3");
    }

    #[test]
    fn nil_terminated_list_uses_brackets() {
        let store = Store::heap();
        let nil = Value::Atom(Atom::nil());
        let tail = Value::Ref(
            store
                .alloc(HeapKind::List(ListData { head: Value::Int(2), tail: nil }))
                .unwrap(),
        );
        let head = Value::Ref(
            store
                .alloc(HeapKind::List(ListData { head: Value::Int(1), tail }))
                .unwrap(),
        );
        assert_eq!(serialize(&head), "[1 2]");
    }

    #[test]
    fn open_tail_list_uses_bar_notation() {
        let store = Store::heap();
        let var = Value::Ref(
            store
                .alloc(HeapKind::Variable(crate::variable::VariableData::fresh()))
                .unwrap(),
        );
        let list = Value::Ref(
            store
                .alloc(HeapKind::List(ListData { head: Value::Int(1), tail: var }))
                .unwrap(),
        );
        assert_eq!(serialize(&list), "1|_");
    }

    #[test]
    fn record_prints_sorted_features() {
        let store = Store::heap();
        let arity = crate::arity::Arity::get(vec![
            Literal::Atom(Atom::get("x")),
            Literal::Atom(Atom::get("y")),
        ]);
        let record = Value::Ref(
            store
                .alloc(HeapKind::Record(RecordData {
                    label: Literal::Atom(Atom::get("point")),
                    arity,
                    values: vec![Value::Int(1), Value::Int(2)],
                }))
                .unwrap(),
        );
        assert_eq!(serialize(&record), "point(x:1 y:2)");
    }

    #[test]
    fn hash_labeled_tuple_uses_infix_form() {
        let store = Store::heap();
        let tuple = Value::Ref(
            store
                .alloc(HeapKind::Tuple(TupleData {
                    label: Literal::Atom(Atom::get("#")),
                    values: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                }))
                .unwrap(),
        );
        assert_eq!(serialize(&tuple), "1#2#3");
    }

    #[test]
    fn shared_substructure_is_pre_emitted() {
        let store = Store::heap();
        let shared = store
            .alloc(HeapKind::Tuple(TupleData {
                label: Literal::Atom(Atom::get("p")),
                values: vec![Value::Int(9)],
            }))
            .unwrap();
        let root = Value::Ref(
            store
                .alloc(HeapKind::Tuple(TupleData {
                    label: Literal::Atom(Atom::get("pair")),
                    values: vec![Value::Ref(shared.clone()), Value::Ref(shared)],
                }))
                .unwrap(),
        );
        let text = serialize(&root);
        assert!(text.starts_with("V1=p(9)\n"));
        assert_eq!(text, "V1=p(9)\npair(V1 V1)");
    }

    #[test]
    fn self_referential_list_terminates() {
        let store = Store::heap();
        let cell = store
            .alloc(HeapKind::List(ListData {
                head: Value::Int(1),
                tail: Value::Atom(Atom::nil()),
            }))
            .unwrap();
        cell.with_mut(|k| {
            let HeapKind::List(l) = k else { panic!() };
            l.tail = Value::Ref(cell.clone());
        });
        let text = serialize(&Value::Ref(cell));
        assert_eq!(text, "V1=1|V1\n1|V1");
    }
}
