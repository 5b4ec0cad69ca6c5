//! Call stacks and the thread object itself (§4.7).
//!
//! A [`Thread`] is a call stack of [`CallFrame`]s plus a single per-thread
//! exception slot (`exn_reset` reads it, then resets it to a fresh free
//! variable — it is not per-frame). `Thread::run` executes a bounded number
//! of instructions via [`crate::dispatch::step`] before yielding back to the
//! engine, exactly the original's `steps_count` time-sliced `Run`.
//!
//! Grounded on `store/thread.h`/`thread.cc`: `CallStackEntry` becomes
//! [`CallFrame`], `ExnStackEntry` becomes [`Handler`], and the free-standing
//! `exception_`/`call_stack_` fields become [`ThreadInner`].

use crate::error::ThreadFault;
use oz_core::bytecode::CodeSegment;
use oz_core::{HeapKind, Store, ThreadObject, ThreadRef, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub enum HandlerKind {
    Catch,
    Finally,
}

/// One entry of a frame's exception-handler stack (`exn_push_catch`/`exn_push_finally`).
pub struct Handler {
    pub kind: HandlerKind,
    pub to: u32,
}

/// One activation record: the registers a closure body's bytecode addresses,
/// plus its exception-handler stack. `array` is the frame's currently
/// selected whole-array value, addressed indirectly by `Register::Array`.
pub struct CallFrame {
    pub(crate) code: Rc<CodeSegment>,
    pub(crate) params: Vec<Value>,
    pub(crate) locals: Vec<Value>,
    pub(crate) closures: Vec<Value>,
    pub(crate) array: Option<Value>,
    pub(crate) ip: u32,
    pub(crate) handlers: Vec<Handler>,
}

impl CallFrame {
    /// A fresh frame for `code`, called with `params`/`closures`. Locals are
    /// not zero-valued — each starts as its own fresh free variable, so a
    /// local read before its defining instruction executes suspends rather
    /// than panicking, matching a free variable's role everywhere else.
    pub(crate) fn new(store: &Store, code: Rc<CodeSegment>, params: Vec<Value>, closures: Vec<Value>) -> CallFrame {
        let locals = (0..code.nlocals).map(|_| fresh_var(store)).collect();
        CallFrame {
            code,
            params,
            locals,
            closures,
            array: None,
            ip: 0,
            handlers: Vec::new(),
        }
    }
}

pub(crate) struct ThreadInner {
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) exn: Value,
}

/// A cooperative-scheduling thread: a call stack and an exception slot. Runs
/// in bounded time slices ([`Thread::run`]); between slices it sits either in
/// the engine's runnable queue or on some variable's suspension list.
pub struct Thread {
    id: u64,
    self_ref: Weak<Thread>,
    inner: RefCell<ThreadInner>,
}

/// What a time slice ended with.
pub enum RunOutcome {
    /// The slice ran out with more instructions left to execute.
    Runnable,
    /// The thread suspended on a free variable; it is now on that
    /// variable's suspension list and will be woken when it is bound.
    Waiting,
    /// The call stack emptied out (`return` from the outermost frame) or an
    /// uncaught exception walked off the top of the stack.
    Terminated,
    /// The current instruction could not be executed as written.
    Faulted(ThreadFault),
}

impl Thread {
    /// Build a thread whose single initial frame calls `proc` with `params`.
    /// `proc` must already be a determined closure value — top-level thread
    /// creation (unlike `new_thread`/`call`) never suspends waiting for it.
    pub fn new(id: u64, store: &Store, proc: &Value, params: Vec<Value>) -> Result<Rc<Thread>, ThreadFault> {
        let determined = proc.deref();
        let (code, closures) = closure_parts(&determined, 0)?;
        let frame = CallFrame::new(store, code, params, closures);
        Ok(Rc::new_cyclic(|weak| Thread {
            id,
            self_ref: weak.clone(),
            inner: RefCell::new(ThreadInner {
                frames: vec![frame],
                exn: fresh_var(store),
            }),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execute up to `budget` instructions, or until the thread suspends,
    /// terminates, or faults. `spawn` materializes a `new_thread` request
    /// into the heap `Value` that names the new thread — the engine decides
    /// how the underlying `Thread` gets registered and scheduled.
    pub fn run(
        &self,
        budget: u32,
        store: &Store,
        natives: &crate::engine::NativeRegistry,
        runnable: &mut Vec<ThreadRef>,
        spawn: &mut dyn FnMut(Value, Vec<Value>) -> Result<Value, ThreadFault>,
    ) -> RunOutcome {
        let self_ref: ThreadRef = self.self_ref.upgrade().expect("thread dropped while running");
        let mut inner = self.inner.borrow_mut();
        for _ in 0..budget {
            match crate::dispatch::step(&mut inner, store, natives, &self_ref, runnable, spawn) {
                crate::dispatch::StepOutcome::Continue => continue,
                crate::dispatch::StepOutcome::Suspended => return RunOutcome::Waiting,
                crate::dispatch::StepOutcome::Terminated => return RunOutcome::Terminated,
                crate::dispatch::StepOutcome::Fault(f) => return RunOutcome::Faulted(f),
            }
        }
        RunOutcome::Runnable
    }
}

impl ThreadObject for Thread {
    fn thread_id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// Shared value-shape helpers used by both `dispatch` and `engine`.

pub(crate) fn fresh_var(store: &Store) -> Value {
    Value::Ref(
        store
            .alloc(HeapKind::Variable(oz_core::VariableData::fresh()))
            .expect("heap store never exhausted"),
    )
}

/// Unpack a determined closure value into its code segment and captured
/// environment (flattened from the closure's `env` array, empty for an
/// abstract closure with no environment yet).
pub(crate) fn closure_parts(value: &Value, ip: u32) -> Result<(Rc<CodeSegment>, Vec<Value>), ThreadFault> {
    let Value::Ref(ptr) = value else {
        return Err(ThreadFault::BadOperand { ip });
    };
    ptr.with(|k| match k {
        HeapKind::Closure(c) => {
            let closures = match &c.env {
                Some(env) => array_values(env, ip)?,
                None => Vec::new(),
            };
            Ok((c.code.clone(), closures))
        }
        _ => Err(ThreadFault::BadOperand { ip }),
    })
}

/// The values of a determined `Array` value, or `BadOperand` if it isn't one.
pub(crate) fn array_values(value: &Value, ip: u32) -> Result<Vec<Value>, ThreadFault> {
    let Value::Ref(ptr) = value.deref() else {
        return Err(ThreadFault::BadOperand { ip });
    };
    ptr.with(|k| match k {
        HeapKind::Array(a) => Ok(a.clone()),
        _ => Err(ThreadFault::BadOperand { ip }),
    })
}

pub(crate) fn array_get(value: &Value, index: usize, ip: u32) -> Result<Value, ThreadFault> {
    let Value::Ref(ptr) = value.deref() else {
        return Err(ThreadFault::BadOperand { ip });
    };
    ptr.with(|k| match k {
        HeapKind::Array(a) => a.get(index).cloned().ok_or(ThreadFault::BadOperand { ip }),
        _ => Err(ThreadFault::BadOperand { ip }),
    })
}

pub(crate) fn array_set(value: &Value, index: usize, new_value: Value, ip: u32) -> Result<(), ThreadFault> {
    let Value::Ref(ptr) = value.deref() else {
        return Err(ThreadFault::BadOperand { ip });
    };
    ptr.with_mut(|k| match k {
        HeapKind::Array(a) => {
            let slot = a.get_mut(index).ok_or(ThreadFault::BadOperand { ip })?;
            *slot = new_value;
            Ok(())
        }
        _ => Err(ThreadFault::BadOperand { ip }),
    })
}

pub(crate) fn literal_to_value(l: oz_core::Literal) -> Value {
    match l {
        oz_core::Literal::Int(n) => Value::Int(n),
        oz_core::Literal::Atom(a) => Value::Atom(a),
        oz_core::Literal::Name(n) => Value::Name(n),
    }
}
