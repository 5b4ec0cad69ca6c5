//! Native procedures and the cooperative round-robin scheduler (§4.8, §8).
//!
//! Grounded on `store/engine.cc`'s `Engine::Run`: a fixed per-slice
//! instruction budget, a FIFO runnable queue, and a small table of built-in
//! natives invoked by name via `call_native`. `get_label`'s internal
//! `Unify` call discards any threads it would have woken, reproducing a
//! limitation the original leaves as a TODO rather than fixing it.

use crate::error::ThreadFault;
use crate::thread::{RunOutcome, Thread};
use oz_core::{unify, HeapKind, Literal, Store, ThreadObject, ThreadRef, Value};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Steps executed per thread before yielding back to the scheduler, matching
/// the original's fixed time slice.
const STEPS_PER_SLICE: u32 = 1000;

/// A callable built-in. Natives follow the same parameter-passing
/// convention as user procedures: results are reported by unifying into
/// one of `args`, not by a separate return value.
pub trait Native {
    fn call(&self, store: &Store, args: &[Value], runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault>;
}

fn int_arg(args: &[Value], i: usize) -> Result<i64, ThreadFault> {
    match args.get(i).map(|v| v.deref()) {
        Some(Value::Int(n)) => Ok(n),
        _ => Err(ThreadFault::BadOperand { ip: 0 }),
    }
}

struct Println;
impl Native for Println {
    fn call(&self, _store: &Store, args: &[Value], _runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let v = args.first().ok_or(ThreadFault::BadOperand { ip: 0 })?;
        println!("{}", oz_core::serialize(v));
        Ok(())
    }
}

struct Print;
impl Native for Print {
    fn call(&self, _store: &Store, args: &[Value], _runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let v = args.first().ok_or(ThreadFault::BadOperand { ip: 0 })?;
        print!("{}", oz_core::serialize(v));
        Ok(())
    }
}

struct Decrement;
impl Native for Decrement {
    fn call(&self, _store: &Store, args: &[Value], runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let n = int_arg(args, 0)?;
        let result = args.get(1).ok_or(ThreadFault::BadOperand { ip: 0 })?;
        unify(result, &Value::Int(n.wrapping_sub(1)), runnable);
        Ok(())
    }
}

struct IsZero;
impl Native for IsZero {
    fn call(&self, _store: &Store, args: &[Value], runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let n = int_arg(args, 0)?;
        let result = args.get(1).ok_or(ThreadFault::BadOperand { ip: 0 })?;
        unify(result, &Value::boolean(n == 0), runnable);
        Ok(())
    }
}

struct Multiply;
impl Native for Multiply {
    fn call(&self, _store: &Store, args: &[Value], runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let a = int_arg(args, 0)?;
        let b = int_arg(args, 1)?;
        let result = args.get(2).ok_or(ThreadFault::BadOperand { ip: 0 })?;
        unify(result, &Value::Int(a.wrapping_mul(b)), runnable);
        Ok(())
    }
}

/// `{GetLabel Record Result}`. Note: the internal `unify` call's own
/// `runnable` output is discarded rather than forwarded to the caller's
/// scheduler — any thread waiting specifically on `Result` will not be
/// woken by this call, a limitation carried over unfixed from the original.
struct GetLabel;
impl Native for GetLabel {
    fn call(&self, _store: &Store, args: &[Value], _runnable: &mut Vec<ThreadRef>) -> Result<(), ThreadFault> {
        let record = args.first().ok_or(ThreadFault::BadOperand { ip: 0 })?;
        let result = args.get(1).ok_or(ThreadFault::BadOperand { ip: 0 })?;
        let label = match oz_core::record_label(record) {
            oz_core::Access::Ok(l) => l,
            _ => return Err(ThreadFault::BadOperand { ip: 0 }),
        };
        let label_val = match label {
            Literal::Int(n) => Value::Int(n),
            Literal::Atom(a) => Value::Atom(a),
            Literal::Name(n) => Value::Name(n),
        };
        let mut discarded = Vec::new();
        unify(result, &label_val, &mut discarded);
        Ok(())
    }
}

pub struct NativeRegistry {
    natives: HashMap<String, Box<dyn Native>>,
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRegistry {
    pub fn new() -> NativeRegistry {
        let mut registry = NativeRegistry {
            natives: HashMap::new(),
        };
        registry.register("println", Box::new(Println));
        registry.register("print", Box::new(Print));
        registry.register("decrement", Box::new(Decrement));
        registry.register("is_zero", Box::new(IsZero));
        registry.register("multiply", Box::new(Multiply));
        registry.register("get_label", Box::new(GetLabel));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, native: Box<dyn Native>) {
        self.natives.insert(name.into(), native);
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Native> {
        self.natives.get(name).map(|n| n.as_ref())
    }
}

/// The scheduler: a heap, a native table, and a runnable queue of threads
/// that have neither suspended nor terminated. Threads not in `runnable`
/// are assumed to be parked on some variable's suspension list.
pub struct Engine {
    store: Store,
    natives: NativeRegistry,
    threads: HashMap<u64, Rc<Thread>>,
    runnable: VecDeque<Rc<Thread>>,
    next_id: u64,
}

impl Engine {
    pub fn new(store: Store) -> Engine {
        Engine {
            store,
            natives: NativeRegistry::new(),
            threads: HashMap::new(),
            runnable: VecDeque::new(),
            next_id: 1,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// Spawn a thread that calls `proc` with `params`, enqueueing it as
    /// runnable, and return the heap value naming it.
    pub fn spawn(&mut self, proc: Value, params: Vec<Value>) -> Result<Value, ThreadFault> {
        let id = self.next_id;
        self.next_id += 1;
        let thread = Thread::new(id, &self.store, &proc, params)?;
        self.threads.insert(id, thread.clone());
        self.runnable.push_back(thread.clone());
        let ptr = self
            .store
            .alloc(HeapKind::Thread(thread))
            .expect("heap store never exhausted");
        Ok(Value::Ref(ptr))
    }

    /// Run every runnable thread to quiescence: every thread has either
    /// terminated or is parked waiting on a variable. Returns the number of
    /// time slices executed.
    pub fn run(&mut self) -> u32 {
        let mut slices = 0u32;
        while let Some(thread) = self.runnable.pop_front() {
            slices += 1;
            let mut woken = Vec::new();
            let store = self.store.clone();
            let next_id = &mut self.next_id;
            let mut spawned: Vec<Rc<Thread>> = Vec::new();
            let mut spawn_cb = |proc: Value, params: Vec<Value>| -> Result<Value, ThreadFault> {
                let id = *next_id;
                *next_id += 1;
                let new_thread = Thread::new(id, &store, &proc, params)?;
                let ptr = store
                    .alloc(HeapKind::Thread(new_thread.clone()))
                    .expect("heap store never exhausted");
                spawned.push(new_thread);
                Ok(Value::Ref(ptr))
            };

            let outcome = thread.run(STEPS_PER_SLICE, &store, &self.natives, &mut woken, &mut spawn_cb);

            for t in spawned {
                self.threads.insert(t.id(), t.clone());
                self.runnable.push_back(t);
            }
            for t in woken {
                if let Some(thread) = self.threads.get(&t.thread_id()) {
                    self.runnable.push_back(thread.clone());
                }
            }

            match outcome {
                RunOutcome::Runnable => self.runnable.push_back(thread),
                RunOutcome::Waiting => {}
                RunOutcome::Terminated => {
                    self.threads.remove(&thread.id());
                }
                RunOutcome::Faulted(_fault) => {
                    self.threads.remove(&thread.id());
                }
            }
        }
        slices
    }
}
