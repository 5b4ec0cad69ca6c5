//! Oz Core: the tagged value store and unification engine underneath the runtime.
//!
//! This crate provides the language-agnostic data model shared by the
//! compiler and runtime crates: the heap, the tagged `Value` reference, the
//! record/tuple/list capability, destructive unification with rollback, and
//! the printable text form used for debugging and tests.
//!
//! # Modules
//!
//! - `error`: `StoreError`/`ValueError`, the two store-level failure shapes
//! - `atom`: interned atom table
//! - `name`: unforgeable fresh identities
//! - `literal`: the totally-ordered Int/Atom/Name feature-key class
//! - `arity`: interned, sorted feature sets
//! - `bytecode`: instruction set and code-segment shape (no execution)
//! - `closure`: code segment + captured environment
//! - `value`: the `Value` tag, the `Store`/`Ptr` heap, stop-and-copy move
//! - `record`: tuples, records, lists, open records and the record capability
//! - `variable`: free variables, destructive `unify`, non-mutating `equals`
//! - `serialize`: the shared-reference-aware printable text form

pub mod arity;
pub mod atom;
pub mod bytecode;
pub mod closure;
pub mod error;
pub mod literal;
pub mod name;
pub mod record;
pub mod serialize;
pub mod value;
pub mod variable;

pub use arity::Arity;
pub use atom::Atom;
pub use bytecode::{BranchTable, CodeSegment, Instruction, Operand, Register};
pub use closure::ClosureData;
pub use error::{StoreError, ValueError};
pub use literal::Literal;
pub use name::Name;
pub use record::{
    arity as record_arity, get as record_get, has as record_has, items as record_items,
    label as record_label, make_record, make_tuple, resolve_record, values as record_values,
    width as record_width, Access, ListData, OpenRecordData, RecordData, RecordOrTuple, TupleData,
    TupleOrList,
};
pub use serialize::serialize;
pub use value::{move_value, HeapKind, Ptr, Store, ThreadObject, ThreadRef, Value};
pub use variable::{equals, unify, VariableData};
