use std::collections::BTreeSet;

use derive_more::Display;
use itertools::Itertools;
use thiserror::Error;

use crate::{expr::Expr, var::Variable};

pub type Result<T, E = FunctionError> = core::result::Result<T, E>;

/// Which side of a call disagrees with its callee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Port {
    #[display("assigned variables")]
    Assigned,
    #[display("arguments")]
    Arguments,
}

/// Violations of the structural invariants, detected at construction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Variable `{0}` is bound more than once")]
    DuplicateAssignment(Variable),

    #[error("Call {call} has {found} {port} but its callee expects {expected}")]
    ArityMismatch {
        call: usize,
        port: Port,
        expected: usize,
        found: usize,
    },

    #[error("Binder `{var}` cannot be replaced by expression `{replacement}`")]
    NonVariableBinder { var: Variable, replacement: Expr },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FunctionError {
    #[error("Building function failed: {0}")]
    Build(#[from] BuildError),

    #[error(
        "Inputs don't match: ({}) != ({})",
        .left.iter().join(", "),
        .right.iter().join(", ")
    )]
    InputMismatch {
        left: Vec<Variable>,
        right: Vec<Variable>,
    },

    #[error("Output lengths don't match: {left} != {right}")]
    OutputLengthMismatch { left: usize, right: usize },

    #[error("Cannot compose: {inputs} inputs against {outputs} outputs")]
    ComposeArity { inputs: usize, outputs: usize },

    #[error("Calls assign to overlapping variables: {}", .0.iter().join(", "))]
    CallCollision(BTreeSet<Variable>),

    #[error("Output index {index} out of range for {len} outputs")]
    OutputIndex { index: usize, len: usize },

    #[error("Variable `{0}` is used before it is bound")]
    Unbound(Variable),

    #[error("Cartesian product of no functions")]
    EmptyProduct,
}
