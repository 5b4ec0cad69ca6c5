//! Assembler failure shape.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    UnexpectedEnd,
    Unexpected { found: String, wanted: &'static str },
    UnknownMnemonic(String),
    UnknownRegister(String),
    UnknownLabel(String),
    MissingField(&'static str),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::UnexpectedEnd => write!(f, "unexpected end of input"),
            AssembleError::Unexpected { found, wanted } => {
                write!(f, "expected {wanted}, found `{found}`")
            }
            AssembleError::UnknownMnemonic(m) => write!(f, "unknown instruction mnemonic `{m}`"),
            AssembleError::UnknownRegister(r) => write!(f, "unknown register `{r}`"),
            AssembleError::UnknownLabel(l) => write!(f, "branch target `{l}` was never defined"),
            AssembleError::MissingField(name) => write!(f, "missing field `{name}`"),
        }
    }
}

impl std::error::Error for AssembleError {}
