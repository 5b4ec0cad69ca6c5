//! The instruction dispatch loop: one [`step`] executes exactly one
//! instruction of the thread's current top frame (§4.7, §6).
//!
//! Grounded on `store/thread.cc`'s `Thread::Run`: every suspend point there
//! (`WaitOn`) becomes a `StepOutcome::Suspended` return here, after the
//! thread has registered itself on the blocking variable's waiter list.
//! Bad operands and unknown natives become `StepOutcome::Fault`, matching
//! the original's `bad_operand`/`terminated` labels.

use crate::engine::NativeRegistry;
use crate::error::ThreadFault;
use crate::thread::{self, CallFrame, Handler, HandlerKind, ThreadInner};
use oz_core::bytecode::{Instruction, Operand, Register};
use oz_core::{
    equals, record_arity, record_get, record_label, unify, Access, Arity, Atom, HeapKind, Literal,
    Store, ThreadRef, Value, ValueError,
};

pub(crate) enum StepOutcome {
    Continue,
    Suspended,
    Terminated,
    Fault(ThreadFault),
}

/// Execute the instruction at the current top frame's `ip`.
pub(crate) fn step(
    inner: &mut ThreadInner,
    store: &Store,
    natives: &NativeRegistry,
    self_ref: &ThreadRef,
    runnable: &mut Vec<ThreadRef>,
    spawn: &mut dyn FnMut(Value, Vec<Value>) -> Result<Value, ThreadFault>,
) -> StepOutcome {
    let frame_idx = inner.frames.len() - 1;
    let ip = inner.frames[frame_idx].ip;
    let instr = match inner.frames[frame_idx].code.fetch(ip) {
        Some(instr) => instr.clone(),
        None => return StepOutcome::Terminated,
    };

    macro_rules! determined {
        ($v:expr) => {{
            let v = $v;
            if let Some(var) = v.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            v
        }};
    }
    macro_rules! lit {
        ($v:expr) => {
            match $v.as_literal() {
                Some(l) => l,
                None => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        };
    }
    macro_rules! int_lit {
        ($v:expr) => {
            match lit!($v) {
                Literal::Int(n) => n,
                _ => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        };
    }
    macro_rules! bool_val {
        ($v:expr) => {
            match $v.as_bool() {
                Some(b) => b,
                None => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        };
    }
    macro_rules! read {
        ($op:expr) => {
            match read_operand(&inner.frames[frame_idx], &inner.exn, store, ip, $op) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            }
        };
    }
    macro_rules! write {
        ($reg:expr, $val:expr) => {{
            let ThreadInner { frames, exn } = &mut *inner;
            if let Err(f) = write_register(&mut frames[frame_idx], exn, ip, $reg, $val) {
                return StepOutcome::Fault(f);
            }
        }};
    }
    macro_rules! advance {
        () => {{
            inner.frames[frame_idx].ip += 1;
            StepOutcome::Continue
        }};
    }
    macro_rules! jump {
        ($to:expr) => {{
            inner.frames[frame_idx].ip = $to;
            StepOutcome::Continue
        }};
    }

    match &instr {
        Instruction::Nop => advance!(),

        Instruction::Load { dst, src } => {
            let v = read!(src);
            write!(dst, v);
            advance!()
        }

        Instruction::Branch { to } => jump!(*to),
        Instruction::BranchIf { cond, to } => {
            let c = determined!(read!(cond));
            if bool_val!(c) {
                jump!(*to)
            } else {
                advance!()
            }
        }
        Instruction::BranchUnless { cond, to } => {
            let c = determined!(read!(cond));
            if !bool_val!(c) {
                jump!(*to)
            } else {
                advance!()
            }
        }
        Instruction::BranchSwitchLiteral { value, branches } => {
            let v = determined!(read!(value));
            let l = lit!(v);
            match branches.lookup(&l) {
                Some(to) => jump!(to),
                None => advance!(),
            }
        }

        Instruction::Call { proc, params } => {
            let p = determined!(read!(proc));
            let (code, closures) = match thread::closure_parts(&p, ip) {
                Ok(cc) => cc,
                Err(f) => return StepOutcome::Fault(f),
            };
            let params_val = read!(params);
            let params_vec = match thread::array_values(&params_val, ip) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            inner.frames[frame_idx].ip += 1;
            let frame = CallFrame::new(store, code, params_vec, closures);
            inner.frames.push(frame);
            StepOutcome::Continue
        }
        Instruction::CallTail { proc, params } => {
            let p = determined!(read!(proc));
            let (code, closures) = match thread::closure_parts(&p, ip) {
                Ok(cc) => cc,
                Err(f) => return StepOutcome::Fault(f),
            };
            let params_val = read!(params);
            let params_vec = match thread::array_values(&params_val, ip) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            // Keep the existing frame's `locals` untouched — a tail call
            // reuses the current activation record rather than pushing a
            // new one, so locals already written by the caller survive.
            let frame = &mut inner.frames[frame_idx];
            frame.code = code;
            frame.params = params_vec;
            frame.closures = closures;
            frame.array = None;
            frame.handlers.clear();
            frame.ip = 0;
            StepOutcome::Continue
        }
        Instruction::CallNative { name, params } => {
            let n = determined!(read!(name));
            let name_str = match n {
                Value::Atom(a) => a.as_str().to_string(),
                _ => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            };
            let params_val = read!(params);
            let args = match thread::array_values(&params_val, ip) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            let native = match natives.lookup(&name_str) {
                Some(n) => n,
                None => return StepOutcome::Fault(ThreadFault::UnknownNative(name_str)),
            };
            if let Err(f) = native.call(store, &args, runnable) {
                return StepOutcome::Fault(f);
            }
            advance!()
        }
        Instruction::Return => {
            inner.frames.pop();
            if inner.frames.is_empty() {
                StepOutcome::Terminated
            } else {
                StepOutcome::Continue
            }
        }

        Instruction::ExnPushCatch { to } => {
            inner.frames[frame_idx].handlers.push(Handler {
                kind: HandlerKind::Catch,
                to: *to,
            });
            advance!()
        }
        Instruction::ExnPushFinally { to } => {
            inner.frames[frame_idx].handlers.push(Handler {
                kind: HandlerKind::Finally,
                to: *to,
            });
            advance!()
        }
        Instruction::ExnPop => {
            if inner.frames[frame_idx].handlers.pop().is_none() {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            advance!()
        }
        Instruction::ExnRaise { exn } => {
            let v = read!(exn);
            inner.frames[frame_idx].ip += 1;
            do_raise(inner, v)
        }
        Instruction::ExnReraise { exn } => {
            let v = read!(exn);
            inner.frames[frame_idx].ip += 1;
            do_raise(inner, v)
        }
        Instruction::ExnReset { dst } => {
            let current = inner.exn.clone();
            inner.exn = thread::fresh_var(store);
            write!(dst, current);
            advance!()
        }

        Instruction::NewVariable { dst } => {
            let v = thread::fresh_var(store);
            write!(dst, v);
            advance!()
        }
        Instruction::NewName { dst } => {
            let v = Value::Name(oz_core::Name::fresh());
            write!(dst, v);
            advance!()
        }
        Instruction::NewCell { dst, init } => {
            let v = read!(init);
            let cell = Value::Ref(store.alloc(HeapKind::Cell(v)).expect("heap store never exhausted"));
            write!(dst, cell);
            advance!()
        }
        Instruction::NewArray { dst, size, init } => {
            let size_v = determined!(read!(size));
            let n = int_lit!(size_v);
            if n < 0 {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            let init_v = read!(init);
            let values = vec![init_v; n as usize];
            let arr = Value::Ref(store.alloc(HeapKind::Array(values)).expect("heap store never exhausted"));
            write!(dst, arr);
            advance!()
        }
        Instruction::NewArity { dst, features } => {
            let feats_v = determined!(read!(features));
            let values = match thread::array_values(&feats_v, ip) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            let mut lits = Vec::with_capacity(values.len());
            for v in values {
                let v = determined!(v);
                lits.push(lit!(v));
            }
            write!(dst, Value::Arity(Arity::get(lits)));
            advance!()
        }
        Instruction::NewList { dst, head, tail } => {
            let h = read!(head);
            let t = read!(tail);
            let list = Value::Ref(
                store
                    .alloc(HeapKind::List(oz_core::record::ListData { head: h, tail: t }))
                    .expect("heap store never exhausted"),
            );
            write!(dst, list);
            advance!()
        }
        Instruction::NewTuple { dst, size, label } => {
            let size_v = determined!(read!(size));
            let n = int_lit!(size_v);
            if n < 0 {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            let label_v = determined!(read!(label));
            let label_lit = lit!(label_v);
            let values = (0..n).map(|_| thread::fresh_var(store)).collect();
            let built = oz_core::make_tuple(label_lit, values);
            let v = alloc_tuple_or_list(store, built);
            write!(dst, v);
            advance!()
        }
        Instruction::NewRecord { dst, arity, label } => {
            let arity_v = determined!(read!(arity));
            let arity = match arity_v {
                Value::Arity(a) => a,
                _ => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            };
            let label_v = determined!(read!(label));
            let label_lit = lit!(label_v);
            let values = (0..arity.width()).map(|_| thread::fresh_var(store)).collect();
            let built = oz_core::make_record(label_lit, arity, values);
            let v = alloc_record_or_tuple(store, built);
            write!(dst, v);
            advance!()
        }
        Instruction::NewProc { dst, proc, env } => {
            let p = determined!(read!(proc));
            let code = match &p {
                Value::Ref(ptr) => ptr.with(|k| match k {
                    HeapKind::Closure(c) => Some(c.code.clone()),
                    _ => None,
                }),
                _ => None,
            };
            let code = match code {
                Some(c) => c,
                None => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            };
            let env_v = read!(env);
            let closure = Value::Ref(
                store
                    .alloc(HeapKind::Closure(oz_core::ClosureData::with_env(code, env_v)))
                    .expect("heap store never exhausted"),
            );
            write!(dst, closure);
            advance!()
        }
        Instruction::NewThread { dst, proc, params } => {
            let p = determined!(read!(proc));
            let params_v = read!(params);
            let params_vec = match thread::array_values(&params_v, ip) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            let thread_val = match spawn(p, params_vec) {
                Ok(v) => v,
                Err(f) => return StepOutcome::Fault(f),
            };
            write!(dst, thread_val);
            advance!()
        }

        Instruction::GetValueType { dst, value } => {
            let v = determined!(read!(value));
            let tag = value_type_tag(&v);
            write!(dst, Value::Int(tag));
            advance!()
        }
        Instruction::AccessCell { dst, cell } => {
            let c = determined!(read!(cell));
            let v = match &c {
                Value::Ref(ptr) => ptr.with(|k| match k {
                    HeapKind::Cell(v) => Some(v.clone()),
                    _ => None,
                }),
                _ => None,
            };
            match v {
                Some(v) => {
                    write!(dst, v);
                    advance!()
                }
                None => StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        }
        Instruction::AccessArray { dst, array, index } => {
            let a = determined!(read!(array));
            let i = determined!(read!(index));
            let idx = int_lit!(i);
            if idx < 0 {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            match thread::array_get(&a, idx as usize, ip) {
                Ok(v) => {
                    write!(dst, v);
                    advance!()
                }
                Err(f) => StepOutcome::Fault(f),
            }
        }
        Instruction::AccessRecord { dst, record, feature } => {
            let r = read!(record);
            if let Some(var) = r.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            let f = determined!(read!(feature));
            let feature_lit = lit!(f);
            match record_get(&r, &feature_lit) {
                Access::Ok(v) => {
                    write!(dst, v);
                    advance!()
                }
                Access::Suspend(var) => {
                    suspend(&var, self_ref);
                    StepOutcome::Suspended
                }
                Access::Err(ValueError::FeatureNotFound) => {
                    let exn = Value::Atom(Atom::get("feature_not_found"));
                    inner.frames[frame_idx].ip += 1;
                    do_raise(inner, exn)
                }
                Access::Err(_) => StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        }
        Instruction::AccessRecordLabel { dst, record } => {
            let r = read!(record);
            if let Some(var) = r.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            match record_label(&r) {
                Access::Ok(l) => {
                    write!(dst, thread::literal_to_value(l));
                    advance!()
                }
                Access::Suspend(var) => {
                    suspend(&var, self_ref);
                    StepOutcome::Suspended
                }
                Access::Err(_) => StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        }
        Instruction::AccessRecordArity { dst, record } => {
            let r = read!(record);
            if let Some(var) = r.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            match record_arity(&r) {
                Access::Ok(a) => {
                    write!(dst, Value::Arity(a));
                    advance!()
                }
                Access::Suspend(var) => {
                    suspend(&var, self_ref);
                    StepOutcome::Suspended
                }
                Access::Err(_) => StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            }
        }
        Instruction::AccessOpenRecordArity { dst, record } => {
            let r = read!(record);
            if let Some(var) = r.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            let r = r.deref();
            let arity = match &r {
                Value::Ref(ptr) => ptr.with(|k| match k {
                    HeapKind::OpenRecord(o) => Some(o.arity()),
                    _ => None,
                }),
                _ => None,
            };
            let arity = match arity {
                Some(a) => a,
                None => match record_arity(&r) {
                    Access::Ok(a) => a,
                    Access::Suspend(var) => {
                        suspend(&var, self_ref);
                        return StepOutcome::Suspended;
                    }
                    Access::Err(_) => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
                },
            };
            write!(dst, Value::Arity(arity));
            advance!()
        }

        Instruction::AssignCell { cell, value } => {
            let c = determined!(read!(cell));
            let v = read!(value);
            let ok = match &c {
                Value::Ref(ptr) => ptr.with_mut(|k| match k {
                    HeapKind::Cell(slot) => {
                        *slot = v;
                        true
                    }
                    _ => false,
                }),
                _ => false,
            };
            if ok {
                advance!()
            } else {
                StepOutcome::Fault(ThreadFault::BadOperand { ip })
            }
        }
        Instruction::AssignArray { array, index, value } => {
            let a = determined!(read!(array));
            let i = determined!(read!(index));
            let idx = int_lit!(i);
            if idx < 0 {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            let v = read!(value);
            match thread::array_set(&a, idx as usize, v, ip) {
                Ok(()) => advance!(),
                Err(f) => StepOutcome::Fault(f),
            }
        }

        Instruction::Unify { v1, v2 } => {
            let a = read!(v1);
            let b = read!(v2);
            if unify(&a, &b, runnable) {
                advance!()
            } else {
                let exn = Value::Atom(Atom::get("unification_failure"));
                inner.frames[frame_idx].ip += 1;
                do_raise(inner, exn)
            }
        }
        Instruction::TryUnify { v1, v2, success } => {
            let a = read!(v1);
            let b = read!(v2);
            let ok = unify(&a, &b, runnable);
            write!(success, Value::boolean(ok));
            advance!()
        }
        Instruction::UnifyRecordField { record, feature, value } => {
            let r = read!(record);
            if let Some(var) = r.as_unbound_var() {
                suspend(&var, self_ref);
                return StepOutcome::Suspended;
            }
            let f = determined!(read!(feature));
            let feature_lit = lit!(f);
            let v = read!(value);
            let r = r.deref();
            let open_ptr = match &r {
                Value::Ref(ptr) if ptr.with(|k| matches!(k, HeapKind::OpenRecord(_))) => Some(ptr.clone()),
                _ => None,
            };
            if let Some(ptr) = open_ptr {
                let existing = ptr.with(|k| {
                    let HeapKind::OpenRecord(o) = k else { unreachable!() };
                    o.get(&feature_lit)
                });
                match existing {
                    Some(cur) => {
                        if unify(&cur, &v, runnable) {
                            advance!()
                        } else {
                            let exn = Value::Atom(Atom::get("unification_failure"));
                            inner.frames[frame_idx].ip += 1;
                            do_raise(inner, exn)
                        }
                    }
                    None => {
                        ptr.with_mut(|k| {
                            let HeapKind::OpenRecord(o) = k else { unreachable!() };
                            o.import(feature_lit, v);
                        });
                        advance!()
                    }
                }
            } else {
                match record_get(&r, &feature_lit) {
                    Access::Ok(existing) => {
                        if unify(&existing, &v, runnable) {
                            advance!()
                        } else {
                            let exn = Value::Atom(Atom::get("unification_failure"));
                            inner.frames[frame_idx].ip += 1;
                            do_raise(inner, exn)
                        }
                    }
                    Access::Suspend(var) => {
                        suspend(&var, self_ref);
                        StepOutcome::Suspended
                    }
                    Access::Err(ValueError::FeatureNotFound) => {
                        let exn = Value::Atom(Atom::get("feature_not_found"));
                        inner.frames[frame_idx].ip += 1;
                        do_raise(inner, exn)
                    }
                    Access::Err(_) => StepOutcome::Fault(ThreadFault::BadOperand { ip }),
                }
            }
        }

        Instruction::TestIsDet { dst, value } => {
            let v = read!(value);
            write!(dst, Value::boolean(v.is_determined()));
            advance!()
        }
        Instruction::TestIsRecord { dst, value } => {
            let v = read!(value).deref();
            let is_rec = match &v {
                Value::Atom(_) | Value::Name(_) => true,
                Value::Ref(ptr) => ptr.with(|k| {
                    matches!(
                        k,
                        HeapKind::Tuple(_) | HeapKind::Record(_) | HeapKind::List(_) | HeapKind::OpenRecord(_)
                    )
                }),
                _ => false,
            };
            write!(dst, Value::boolean(is_rec));
            advance!()
        }
        Instruction::TestEquality { dst, v1, v2 } => {
            let a = read!(v1);
            let b = read!(v2);
            write!(dst, Value::boolean(equals(&a, &b)));
            advance!()
        }
        Instruction::TestLessThan { dst, v1, v2 } => {
            let a = determined!(read!(v1));
            let b = determined!(read!(v2));
            let la = lit!(a);
            let lb = lit!(b);
            write!(dst, Value::boolean(la < lb));
            advance!()
        }
        Instruction::TestLessOrEqual { dst, v1, v2 } => {
            let a = determined!(read!(v1));
            let b = determined!(read!(v2));
            let la = lit!(a);
            let lb = lit!(b);
            write!(dst, Value::boolean(la <= lb));
            advance!()
        }
        Instruction::TestArityExtends { dst, sup, sub } => {
            let a = determined!(read!(sup));
            let b = determined!(read!(sub));
            let (sup_a, sub_a) = match (a, b) {
                (Value::Arity(s), Value::Arity(u)) => (s, u),
                _ => return StepOutcome::Fault(ThreadFault::BadOperand { ip }),
            };
            let extends = sub_a.features().iter().all(|f| sup_a.has(f));
            write!(dst, Value::boolean(extends));
            advance!()
        }

        Instruction::NumberIntInverse { dst, v } => {
            let v = determined!(read!(v));
            let n = int_lit!(v);
            write!(dst, Value::Int(n.wrapping_neg()));
            advance!()
        }
        Instruction::NumberIntAdd { dst, v1, v2 } => {
            let a = int_lit!(determined!(read!(v1)));
            let b = int_lit!(determined!(read!(v2)));
            write!(dst, Value::Int(a.wrapping_add(b)));
            advance!()
        }
        Instruction::NumberIntSubtract { dst, v1, v2 } => {
            let a = int_lit!(determined!(read!(v1)));
            let b = int_lit!(determined!(read!(v2)));
            write!(dst, Value::Int(a.wrapping_sub(b)));
            advance!()
        }
        Instruction::NumberIntMultiply { dst, v1, v2 } => {
            let a = int_lit!(determined!(read!(v1)));
            let b = int_lit!(determined!(read!(v2)));
            write!(dst, Value::Int(a.wrapping_mul(b)));
            advance!()
        }
        Instruction::NumberIntDivide { dst, v1, v2 } => {
            let a = int_lit!(determined!(read!(v1)));
            let b = int_lit!(determined!(read!(v2)));
            // A runtime-supplied divisor of zero faults rather than trapping the process.
            if b == 0 {
                return StepOutcome::Fault(ThreadFault::BadOperand { ip });
            }
            write!(dst, Value::Int(a.wrapping_div(b)));
            advance!()
        }

        Instruction::NumberBoolNegate { dst, v } => {
            let b = bool_val!(determined!(read!(v)));
            write!(dst, Value::boolean(!b));
            advance!()
        }
        Instruction::NumberBoolAndThen { dst, v1, v2 } => {
            let _b1 = bool_val!(determined!(read!(v1)));
            let b2 = bool_val!(determined!(read!(v2)));
            // Always ends up holding v2's value, matching the original's
            // unconditional final write regardless of v1's truth value.
            write!(dst, Value::boolean(b2));
            advance!()
        }
        Instruction::NumberBoolOrElse { dst, v1, v2 } => {
            let _b1 = bool_val!(determined!(read!(v1)));
            let b2 = bool_val!(determined!(read!(v2)));
            write!(dst, Value::boolean(b2));
            advance!()
        }
        Instruction::NumberBoolXor { dst, v1, v2 } => {
            let a = bool_val!(determined!(read!(v1)));
            let b = bool_val!(determined!(read!(v2)));
            write!(dst, Value::boolean(a ^ b));
            advance!()
        }
    }
}

fn value_type_tag(v: &Value) -> i64 {
    match v {
        Value::Int(_) => 0,
        Value::Atom(_) => 1,
        Value::Name(_) => 2,
        Value::Arity(_) => 3,
        Value::Ref(ptr) => ptr.with(|k| match k {
            HeapKind::Float(_) => 4,
            HeapKind::String(_) => 5,
            HeapKind::Tuple(_) => 6,
            HeapKind::Record(_) => 7,
            HeapKind::List(_) => 8,
            HeapKind::OpenRecord(_) => 9,
            HeapKind::Cell(_) => 10,
            HeapKind::Array(_) => 11,
            HeapKind::Closure(_) => 12,
            HeapKind::Variable(_) => 13,
            HeapKind::Thread(_) => 14,
        }),
    }
}

fn alloc_tuple_or_list(store: &Store, built: oz_core::TupleOrList) -> Value {
    match built {
        oz_core::TupleOrList::Tuple(t) => {
            Value::Ref(store.alloc(HeapKind::Tuple(t)).expect("heap store never exhausted"))
        }
        oz_core::TupleOrList::List(l) => {
            Value::Ref(store.alloc(HeapKind::List(l)).expect("heap store never exhausted"))
        }
    }
}

fn alloc_record_or_tuple(store: &Store, built: oz_core::RecordOrTuple) -> Value {
    match built {
        oz_core::RecordOrTuple::Tuple(t) => {
            Value::Ref(store.alloc(HeapKind::Tuple(t)).expect("heap store never exhausted"))
        }
        oz_core::RecordOrTuple::Record(r) => {
            Value::Ref(store.alloc(HeapKind::Record(r)).expect("heap store never exhausted"))
        }
    }
}

fn suspend(var: &Value, on: &ThreadRef) {
    if let Value::Ref(ptr) = var {
        ptr.with_mut(|k| {
            if let HeapKind::Variable(v) = k {
                v.suspensions.push(on.clone());
            }
        });
    }
}

/// Unwind to the nearest catch/finally handler, truncating frames above it
/// and setting the thread-level exception slot. Terminates the thread if no
/// handler remains anywhere on the call stack.
fn do_raise(inner: &mut ThreadInner, exn_value: Value) -> StepOutcome {
    for fi in (0..inner.frames.len()).rev() {
        if let Some(handler) = inner.frames[fi].handlers.pop() {
            inner.frames.truncate(fi + 1);
            inner.exn = exn_value;
            inner.frames[fi].ip = handler.to;
            return StepOutcome::Continue;
        }
    }
    StepOutcome::Terminated
}

fn read_register(frame: &CallFrame, exn: &Value, store: &Store, ip: u32, reg: &Register) -> Result<Value, ThreadFault> {
    match reg {
        Register::Local(i) => frame
            .locals
            .get(*i as usize)
            .cloned()
            .ok_or(ThreadFault::BadOperand { ip }),
        Register::Param(i) => frame
            .params
            .get(*i as usize)
            .cloned()
            .ok_or(ThreadFault::BadOperand { ip }),
        Register::Closure(i) => frame
            .closures
            .get(*i as usize)
            .cloned()
            .ok_or(ThreadFault::BadOperand { ip }),
        Register::Array(i) => {
            let arr = frame.array.as_ref().ok_or(ThreadFault::BadOperand { ip })?;
            thread::array_get(arr, *i as usize, ip)
        }
        Register::LocalArray => Ok(Value::Ref(
            store
                .alloc(HeapKind::Array(frame.locals.clone()))
                .expect("heap store never exhausted"),
        )),
        Register::ParamArray => Ok(Value::Ref(
            store
                .alloc(HeapKind::Array(frame.params.clone()))
                .expect("heap store never exhausted"),
        )),
        Register::ClosureArray => Ok(Value::Ref(
            store
                .alloc(HeapKind::Array(frame.closures.clone()))
                .expect("heap store never exhausted"),
        )),
        Register::ArrayArray => frame.array.clone().ok_or(ThreadFault::BadOperand { ip }),
        Register::Exn => Ok(exn.clone()),
    }
}

fn write_register(frame: &mut CallFrame, exn: &mut Value, ip: u32, reg: &Register, value: Value) -> Result<(), ThreadFault> {
    match reg {
        Register::Local(i) => {
            let slot = frame.locals.get_mut(*i as usize).ok_or(ThreadFault::BadOperand { ip })?;
            *slot = value;
            Ok(())
        }
        Register::Param(i) => {
            let slot = frame.params.get_mut(*i as usize).ok_or(ThreadFault::BadOperand { ip })?;
            *slot = value;
            Ok(())
        }
        Register::Closure(i) => {
            let slot = frame.closures.get_mut(*i as usize).ok_or(ThreadFault::BadOperand { ip })?;
            *slot = value;
            Ok(())
        }
        Register::Array(i) => {
            let arr = frame.array.clone().ok_or(ThreadFault::BadOperand { ip })?;
            thread::array_set(&arr, *i as usize, value, ip)
        }
        Register::LocalArray => {
            frame.locals = thread::array_values(&value, ip)?;
            Ok(())
        }
        Register::ParamArray => {
            frame.params = thread::array_values(&value, ip)?;
            Ok(())
        }
        Register::ClosureArray => {
            frame.closures = thread::array_values(&value, ip)?;
            Ok(())
        }
        Register::ArrayArray => {
            frame.array = Some(value);
            Ok(())
        }
        Register::Exn => {
            *exn = value;
            Ok(())
        }
    }
}

fn read_operand(frame: &CallFrame, exn: &Value, store: &Store, ip: u32, op: &Operand) -> Result<Value, ThreadFault> {
    match op {
        Operand::Register(r) => read_register(frame, exn, store, ip, r),
        Operand::Immediate(v) => Ok(v.clone()),
    }
}
