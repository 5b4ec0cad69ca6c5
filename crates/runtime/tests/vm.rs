//! End-to-end scenarios run through `oz_compiler::assemble` + `oz_runtime::Engine`.

use oz_compiler::assemble;
use oz_core::{
    Arity, Atom, HeapKind, Literal, OpenRecordData, Store, Value, VariableData,
};
use oz_runtime::Engine;

fn fresh_var(store: &Store) -> Value {
    Value::Ref(store.alloc(HeapKind::Variable(VariableData::fresh())).unwrap())
}

/// A self-recursive closure: `code`'s own env array holds itself at `e0`,
/// the way a letrec-bound procedure's capture would be wired by a lowering
/// pass that closes over its own name.
fn self_closure(store: &Store, code: std::rc::Rc<oz_core::CodeSegment>) -> Value {
    let env_ptr = store.alloc(HeapKind::Array(vec![Value::Int(0)])).unwrap();
    let closure_ptr = store
        .alloc(HeapKind::Closure(oz_core::ClosureData::with_env(code, Value::Ref(env_ptr.clone()))))
        .unwrap();
    env_ptr.with_mut(|k| {
        let HeapKind::Array(a) = k else { unreachable!() };
        a[0] = Value::Ref(closure_ptr.clone());
    });
    Value::Ref(closure_ptr)
}

#[test]
fn factorial_via_tail_recursion() {
    let store = Store::heap();
    let src = "proc(nparams:3 nlocals:4 nclosures:1 bytecode:segment(\
        test_equality(dst:l0 v1:p0 v2:0)\
        branch_if(cond:l0 to:Base)\
        number_int_subtract(dst:l1 v1:p0 v2:1)\
        number_int_multiply(dst:l2 v1:p1 v2:p0)\
        new_array(dst:l3 size:3 init:0)\
        assign_array(array:l3 index:0 value:l1)\
        assign_array(array:l3 index:1 value:l2)\
        assign_array(array:l3 index:2 value:p2)\
        call_tail(proc:e0 params:l3)\
        Base: unify(v1:p2 v2:p1)\
        return()\
    ))";
    let code = assemble("Factorial", src).unwrap();
    let proc = self_closure(&store, code);

    let result = fresh_var(&store);
    let mut engine = Engine::new(store);
    engine.spawn(proc, vec![Value::Int(5), Value::Int(1), result.clone()]).unwrap();
    engine.run();

    assert!(result.deref().same_ref(&Value::Int(120)));
}

/// `call_tail` reuses the current activation record; it must not reset the
/// locals array the way a fresh `call` does. A local written before the
/// tail call and read only after it (on the next trip through the same
/// code, before that local would be rewritten) must still hold its value.
#[test]
fn call_tail_preserves_locals_written_before_it() {
    let store = Store::heap();
    let src = "proc(nparams:2 nlocals:2 nclosures:1 bytecode:segment(\
        test_equality(dst:l0 v1:p0 v2:0)\
        branch_if(cond:l0 to:First)\
        unify(v1:p1 v2:l1)\
        return()\
        First: load(dst:l1 src:99)\
        new_array(dst:l0 size:2 init:0)\
        assign_array(array:l0 index:0 value:1)\
        assign_array(array:l0 index:1 value:p1)\
        call_tail(proc:e0 params:l0)\
    ))";
    let code = assemble("TailLocals", src).unwrap();
    let proc = self_closure(&store, code);

    let result = fresh_var(&store);
    let mut engine = Engine::new(store);
    engine.spawn(proc, vec![Value::Int(0), result.clone()]).unwrap();
    engine.run();

    assert!(result.deref().same_ref(&Value::Int(99)));
}

#[test]
fn branch_then_unify_leaves_one_variable_undetermined() {
    let store = Store::heap();
    let src = "proc(nparams:2 nlocals:1 nclosures:0 bytecode:segment(\
        test_equality(dst:l0 v1:p0 v2:p0)\
        branch_if(cond:l0 to:Bind)\
        return()\
        Bind: unify(v1:p1 v2:3)\
        return()\
    ))";
    let code = assemble("BranchUnify", src).unwrap();
    let proc = Value::Ref(store.alloc(HeapKind::Closure(oz_core::ClosureData::abstract_proc(code))).unwrap());

    let a = fresh_var(&store);
    let b = fresh_var(&store);
    let mut engine = Engine::new(store);
    engine.spawn(proc, vec![a.clone(), b.clone()]).unwrap();
    engine.run();

    assert!(b.deref().same_ref(&Value::Int(3)));
    assert!(!a.is_determined());
}

#[test]
fn open_record_closes_via_unification_with_a_matching_closed_record() {
    let store = Store::heap();
    let src = "proc(nparams:2 nlocals:0 nclosures:0 bytecode:segment(\
        unify_record_field(record:p0 feature:'x' value:1)\
        unify(v1:p0 v2:p1)\
        return()\
    ))";
    let code = assemble("CloseRecord", src).unwrap();
    let proc = Value::Ref(store.alloc(HeapKind::Closure(oz_core::ClosureData::abstract_proc(code))).unwrap());

    let open_var = fresh_var(&store);
    let open_record = Value::Ref(
        store
            .alloc(HeapKind::OpenRecord(OpenRecordData::new(Literal::Atom(Atom::get("point")), open_var)))
            .unwrap(),
    );
    let closed = match oz_core::make_record(
        Literal::Atom(Atom::get("point")),
        Arity::get(vec![Literal::Atom(Atom::get("x")), Literal::Atom(Atom::get("y"))]),
        vec![Value::Int(1), Value::Int(2)],
    ) {
        oz_core::RecordOrTuple::Record(r) => Value::Ref(store.alloc(HeapKind::Record(r)).unwrap()),
        oz_core::RecordOrTuple::Tuple(_) => unreachable!("point/{x,y} is not a tuple arity"),
    };

    let mut engine = Engine::new(store);
    engine.spawn(proc, vec![open_record.clone(), closed.clone()]).unwrap();
    engine.run();

    // Closed onto `closed`: features the open record never imported (`y`)
    // are now visible through it too, exactly as if it had never been open.
    let y = Literal::Atom(Atom::get("y"));
    let got = match oz_core::record_get(&open_record, &y) {
        oz_core::Access::Ok(v) => v,
        _ => panic!("open record did not close onto the matching closed record"),
    };
    assert!(got.same_ref(&Value::Int(2)));
}

#[test]
fn a_thread_suspended_on_a_stream_resumes_once_the_producer_binds_it() {
    let store = Store::heap();
    let consumer_src = "proc(nparams:2 nlocals:0 nclosures:0 bytecode:segment(\
        access_array(dst:p1 array:p0 index:0)\
        return()\
    ))";
    let consumer_code = assemble("Consumer", consumer_src).unwrap();
    let consumer = Value::Ref(
        store
            .alloc(HeapKind::Closure(oz_core::ClosureData::abstract_proc(consumer_code)))
            .unwrap(),
    );

    let producer_src = "proc(nparams:1 nlocals:1 nclosures:0 bytecode:segment(\
        new_array(dst:l0 size:1 init:42)\
        unify(v1:p0 v2:l0)\
        return()\
    ))";
    let producer_code = assemble("Producer", producer_src).unwrap();
    let producer = Value::Ref(
        store
            .alloc(HeapKind::Closure(oz_core::ClosureData::abstract_proc(producer_code)))
            .unwrap(),
    );

    let stream = fresh_var(&store);
    let result = fresh_var(&store);

    let mut engine = Engine::new(store);
    engine.spawn(consumer, vec![stream.clone(), result.clone()]).unwrap();
    engine.run();
    assert!(!result.is_determined(), "consumer must suspend before the stream is bound");

    engine.spawn(producer, vec![stream]).unwrap();
    engine.run();

    assert!(result.deref().same_ref(&Value::Int(42)));
}

/// Two `pair/2` tuples whose first fields can unify but whose second
/// fields cannot: the overall `try_unify` must fail and leave `x`, the
/// free variable standing in the first tuple's first field, unbound —
/// not partially bound to what the first field alone would have agreed to.
#[test]
fn failed_unification_rolls_back_every_binding_made_along_the_way() {
    let store = Store::heap();
    let src = "proc(nparams:3 nlocals:0 nclosures:0 bytecode:segment(\
        try_unify(v1:p0 v2:p1 success:p2)\
        return()\
    ))";
    let code = assemble("Rollback", src).unwrap();
    let proc = Value::Ref(store.alloc(HeapKind::Closure(oz_core::ClosureData::abstract_proc(code))).unwrap());

    let x = fresh_var(&store);
    let pair = |a: Value, b: Value| {
        let oz_core::TupleOrList::Tuple(t) = oz_core::make_tuple(Literal::Atom(Atom::get("pair")), vec![a, b]) else {
            unreachable!("pair/2 is never the cons tuple shape");
        };
        Value::Ref(store.alloc(HeapKind::Tuple(t)).unwrap())
    };
    let left = pair(x.clone(), Value::Int(2));
    let right = pair(Value::Int(1), Value::Int(3));

    let ok = fresh_var(&store);
    let mut engine = Engine::new(store);
    engine.spawn(proc, vec![left, right, ok.clone()]).unwrap();
    engine.run();

    assert_eq!(ok.deref().as_bool(), Some(false));
    assert!(!x.is_determined(), "x must not still be bound to 1 after the second field mismatched");
}

#[test]
fn cyclic_list_serializes_without_looping_forever() {
    let store = Store::heap();
    let tail_var = fresh_var(&store);
    let list = Value::Ref(
        store
            .alloc(HeapKind::List(oz_core::ListData { head: Value::Int(1), tail: tail_var.clone() }))
            .unwrap(),
    );
    let mut runnable = Vec::new();
    assert!(oz_core::unify(&tail_var, &list, &mut runnable));

    let text = oz_core::serialize(&list);
    assert!(text.contains('1'));
}
