//! Oz Compiler: environment/register allocation and a textual bytecode assembler.
//!
//! This crate does not parse or lower an Oz-like source language — that
//! front end is an external collaborator. What it provides is the half of
//! "the compiler" that a bytecode-emitting lowering pass is written
//! against: a name-to-register environment with closure capture, and a
//! textual surface syntax for the instruction set in `oz_core::bytecode`,
//! used to build test fixtures without hand-writing `Instruction` vectors.
//!
//! # Modules
//!
//! - `error`: `AssembleError`, the assembler's failure shape
//! - `environment`: `Symbol`, `RegisterAllocator`, `Environment`
//! - `assembler`: the `proc(...)` textual bytecode surface syntax

pub mod assembler;
pub mod environment;
pub mod error;

pub use assembler::assemble;
pub use environment::{Environment, RegisterAllocator, Symbol};
pub use error::AssembleError;
