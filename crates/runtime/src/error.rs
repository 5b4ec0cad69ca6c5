//! Runtime failure shape (§4.10).
//!
//! A [`ThreadFault`] never unwinds — it is the value `RunOutcome::Faulted`
//! carries back to the engine when a thread's current instruction cannot be
//! executed as written. This mirrors the original's `bad_operand`/`terminated`
//! labels: a fault always ends the thread; it is never automatically turned
//! into a raised exception value (raising is a separate control path, taken
//! explicitly by `exn_raise` and by `access_record`'s feature-not-found case).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadFault {
    /// An operand was the wrong shape for the instruction at `ip`, or named
    /// an out-of-range register/array index.
    BadOperand { ip: u32 },
    /// `call_native` named an atom with no registered native.
    UnknownNative(String),
}

impl fmt::Display for ThreadFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadFault::BadOperand { ip } => write!(f, "bad operand at ip={ip}"),
            ThreadFault::UnknownNative(name) => write!(f, "unknown native `{name}`"),
        }
    }
}

impl std::error::Error for ThreadFault {}

