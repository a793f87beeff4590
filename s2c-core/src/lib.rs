pub mod adapter;
pub mod error;
pub mod expr;
pub mod function;
pub mod reachability;
pub mod var;

pub use crate::{
    adapter::{AdaptError, AdapterRegistry, Fitted, InputSize, Method, feature_union},
    error::{BuildError, FunctionError, Port},
    expr::{BinOp, Builtin, Expr},
    function::{Call, Function, InOut, cart},
    reachability::reachable,
    var::{DEFAULT_BASE, FreshVars, Variable, input_symbols},
};
