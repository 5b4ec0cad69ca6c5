//! Symbol tables and register allocation (§4.6/§4.6a).
//!
//! This is the half of "the compiler" this workspace actually builds: given
//! a name, say which register holds it, and — when the name lives in an
//! enclosing scope — record that it must be captured into the closure's
//! environment array, in the order capture happened. Lexing, parsing and
//! AST-to-bytecode lowering are someone else's problem; this module is the
//! contract a lowering pass would be written against.

use oz_core::{Operand, Register};
use oz_core::Value;
use std::collections::HashMap;

/// Where a name is bound: a parameter, a local, an imported closure slot, or
/// a compile-time constant visible everywhere.
#[derive(Clone, Debug)]
pub enum Symbol {
    Param(u32),
    Local(u32),
    Closure(u32),
    Global(Value),
}

impl Symbol {
    /// The operand a lowering pass would emit to read this symbol.
    pub fn operand(&self) -> Operand {
        match self {
            Symbol::Param(i) => Operand::Register(Register::Param(*i)),
            Symbol::Local(i) => Operand::Register(Register::Local(*i)),
            Symbol::Closure(i) => Operand::Register(Register::Closure(*i)),
            Symbol::Global(v) => Operand::Immediate(v.clone()),
        }
    }
}

/// Reusable-index register allocator: `free`d indices are handed back out
/// before the count grows. Construct with [`RegisterAllocator::non_reusable`]
/// for parameter/closure registers, which the original never frees — `free`
/// on one of those is simply a no-op, matching the source's rule that
/// "param and closure registers are never freed" without needing a second
/// type for it.
pub struct RegisterAllocator {
    reusable: bool,
    nregisters: u32,
    returned: Vec<u32>,
}

impl RegisterAllocator {
    pub fn reusable() -> RegisterAllocator {
        RegisterAllocator {
            reusable: true,
            nregisters: 0,
            returned: Vec::new(),
        }
    }

    pub fn non_reusable() -> RegisterAllocator {
        RegisterAllocator {
            reusable: false,
            nregisters: 0,
            returned: Vec::new(),
        }
    }

    /// Allocate the next index, preferring a previously-freed one.
    pub fn allocate(&mut self) -> u32 {
        if let Some(index) = self.returned.pop() {
            return index;
        }
        let index = self.nregisters;
        self.nregisters += 1;
        index
    }

    pub fn free(&mut self, index: u32) {
        if self.reusable {
            self.returned.push(index);
        }
    }

    /// High-water mark: the `nlocals`/`nparams`/`nclosures` a `CodeSegment` needs.
    pub fn count(&self) -> u32 {
        self.nregisters
    }
}

struct Scope {
    symbols: HashMap<String, Symbol>,
    locals: RegisterAllocator,
    params: RegisterAllocator,
    closures: RegisterAllocator,
    /// Names imported from an enclosing scope, in the order `get` first
    /// needed them — this is the order `new_proc`'s environment array must
    /// be assembled in.
    capture_names: Vec<String>,
}

impl Scope {
    fn root() -> Scope {
        Scope {
            symbols: HashMap::new(),
            locals: RegisterAllocator::reusable(),
            params: RegisterAllocator::non_reusable(),
            closures: RegisterAllocator::non_reusable(),
            capture_names: Vec::new(),
        }
    }
}

/// A chain of lexical scopes: one per enclosing closure body, root at the end.
/// `get` resolves a name against the innermost scope first; if it is not
/// local and not a root global, it is imported (captured) into every scope
/// between here and wherever it was actually found.
pub struct Environment {
    chain: Vec<Scope>,
    /// Indices into `chain` at which a nested-local bracket (`begin_nested_locals`)
    /// started, so `end_nested_locals` knows exactly which locals to free.
    nested_marks: Vec<Vec<u32>>,
}

impl Environment {
    /// A fresh top-level environment; the sole owner of globals.
    pub fn root() -> Environment {
        Environment {
            chain: vec![Scope::root()],
            nested_marks: Vec::new(),
        }
    }

    /// Push a new closure-body scope on top of the current chain.
    pub fn enter_closure(&mut self) {
        self.chain.push(Scope::root());
    }

    /// Pop the innermost closure-body scope, returning its ordered capture
    /// list — the order a `new_proc` environment array must be built in.
    pub fn exit_closure(&mut self) -> Vec<String> {
        let scope = self.chain.pop().expect("exit_closure without enter_closure");
        scope.capture_names
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: Value) {
        self.chain[0].symbols.insert(name.into(), Symbol::Global(value));
    }

    pub fn add_param(&mut self, name: impl Into<String>) -> Symbol {
        let scope = self.chain.last_mut().expect("environment has no scope");
        let index = scope.params.allocate();
        let symbol = Symbol::Param(index);
        scope.symbols.insert(name.into(), symbol.clone());
        symbol
    }

    pub fn add_local(&mut self, name: impl Into<String>) -> Symbol {
        let scope = self.chain.last_mut().expect("environment has no scope");
        let index = scope.locals.allocate();
        let symbol = Symbol::Local(index);
        scope.symbols.insert(name.into(), symbol.clone());
        if let Some(mark) = self.nested_marks.last_mut() {
            mark.push(index);
        }
        symbol
    }

    /// Remove a local binding (e.g. a temporary whose scope ended) and free
    /// its register for reuse.
    pub fn remove_local(&mut self, name: &str) {
        let scope = self.chain.last_mut().expect("environment has no scope");
        if let Some(Symbol::Local(index)) = scope.symbols.remove(name) {
            scope.locals.free(index);
        }
    }

    /// Bracket a lexical block: locals allocated after this call are freed
    /// automatically by the matching `end_nested_locals`.
    pub fn begin_nested_locals(&mut self) {
        self.nested_marks.push(Vec::new());
    }

    pub fn end_nested_locals(&mut self) {
        let freed = self.nested_marks.pop().expect("end_nested_locals without begin");
        let scope = self.chain.last_mut().expect("environment has no scope");
        for index in freed {
            scope.locals.free(index);
        }
    }

    /// Resolve `name`, importing it into every scope between the innermost
    /// and wherever it was found (root globals excepted — those need no
    /// capture, they are visible everywhere as an immediate).
    pub fn get(&mut self, name: &str) -> Option<Symbol> {
        let depth = self.chain.len();
        for i in (0..depth).rev() {
            if let Some(symbol) = self.chain[i].symbols.get(name) {
                let symbol = symbol.clone();
                if i == 0 {
                    if let Symbol::Global(_) = &symbol {
                        return Some(symbol);
                    }
                }
                if i == depth - 1 {
                    return Some(symbol);
                }
                return Some(self.import_into_closure(name, i, depth - 1));
            }
        }
        None
    }

    /// Walk scopes `found_at + 1 ..= target`, recording `name` into each
    /// one's capture list and binding it to a fresh `Closure` register,
    /// exactly the original's `ImportIntoClosure`.
    fn import_into_closure(&mut self, name: &str, found_at: usize, target: usize) -> Symbol {
        let mut symbol = self.chain[found_at].symbols[name].clone();
        for i in (found_at + 1)..=target {
            let scope = &mut self.chain[i];
            if let Some(existing) = scope.symbols.get(name) {
                symbol = existing.clone();
                continue;
            }
            scope.capture_names.push(name.to_string());
            let index = scope.closures.allocate();
            symbol = Symbol::Closure(index);
            scope.symbols.insert(name.to_string(), symbol.clone());
        }
        symbol
    }

    pub fn nlocals(&self) -> u32 {
        self.chain.last().expect("environment has no scope").locals.count()
    }

    pub fn nparams(&self) -> u32 {
        self.chain.last().expect("environment has no scope").params.count()
    }

    pub fn nclosures(&self) -> u32 {
        self.chain.last().expect("environment has no scope").closures.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_reuse_freed_indices() {
        let mut alloc = RegisterAllocator::reusable();
        let a = alloc.allocate();
        let b = alloc.allocate();
        alloc.free(a);
        let c = alloc.allocate();
        assert_eq!(a, c);
        assert_ne!(b, c);
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn non_reusable_allocator_never_shrinks() {
        let mut alloc = RegisterAllocator::non_reusable();
        let a = alloc.allocate();
        alloc.free(a);
        let b = alloc.allocate();
        assert_ne!(a, b);
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn local_in_same_scope_resolves_directly() {
        let mut env = Environment::root();
        env.enter_closure();
        env.add_local("x");
        assert!(matches!(env.get("x"), Some(Symbol::Local(0))));
    }

    #[test]
    fn name_in_enclosing_scope_is_imported_as_closure_register() {
        let mut env = Environment::root();
        env.enter_closure();
        env.add_local("x");
        env.enter_closure();
        let resolved = env.get("x");
        assert!(matches!(resolved, Some(Symbol::Closure(0))));
        let captures = env.exit_closure();
        assert_eq!(captures, vec!["x".to_string()]);
    }

    #[test]
    fn global_is_visible_everywhere_without_capture() {
        let mut env = Environment::root();
        env.add_global("pi", Value::Int(3));
        env.enter_closure();
        env.enter_closure();
        assert!(matches!(env.get("pi"), Some(Symbol::Global(_))));
        assert!(env.exit_closure().is_empty());
    }

    #[test]
    fn nested_locals_bracket_frees_on_exit() {
        let mut env = Environment::root();
        env.enter_closure();
        env.add_local("outer");
        env.begin_nested_locals();
        env.add_local("inner");
        env.end_nested_locals();
        let reused = env.add_local("after");
        assert!(matches!(reused, Symbol::Local(1)), "inner's register 1 must be reused");
    }
}
