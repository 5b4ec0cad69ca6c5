//! Closures: a shared code segment plus an optional captured environment.
//!
//! A closure with `env: None` is "abstract": it has no captured values yet,
//! the shape the compiler emits as a constant. `new_proc` pairs it with a
//! concrete environment `Array` value to produce the closure that gets
//! unified into a variable and called.

use crate::bytecode::CodeSegment;
use crate::error::StoreError;
use crate::value::{Ptr, Store, Value};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone)]
pub struct ClosureData {
    pub code: Rc<CodeSegment>,
    pub env: Option<Value>,
}

impl ClosureData {
    pub fn abstract_proc(code: Rc<CodeSegment>) -> ClosureData {
        ClosureData { code, env: None }
    }

    pub fn with_env(code: Rc<CodeSegment>, env: Value) -> ClosureData {
        ClosureData { code, env: Some(env) }
    }

    pub(crate) fn move_env(
        self,
        dest: &Store,
        moved: &mut HashMap<(usize, usize), Ptr>,
    ) -> Result<ClosureData, StoreError> {
        let env = match self.env {
            Some(v) => Some(crate::value::move_value(&v, dest, moved)?),
            None => None,
        };
        Ok(ClosureData { code: self.code, env })
    }
}

impl std::fmt::Debug for ClosureData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Closure({}, nparams={}, env={})",
            self.code.name,
            self.code.nparams,
            if self.env.is_some() { "bound" } else { "abstract" }
        )
    }
}
