use std::{
    collections::{BTreeSet, HashMap},
    fmt::{Display, Write},
    ops::{Add, Div, Mul, Neg, Sub},
    sync::Arc,
};

use derive_more::Display;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::var::Variable;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum BinOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }

    /// Whether an operand of equal precedence on the right needs brackets.
    fn brackets_right(self) -> bool {
        matches!(self, Self::Sub | Self::Div)
    }
}

/// Functions available to leaf computations.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum Builtin {
    Exp,
    Log,
    Expit,
    Abs,
    Max,
    Min,
}

impl Builtin {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Expit => "expit",
            Self::Abs => "abs",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

impl Display for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An algebraic expression over variables.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Expr {
    Var(Variable),
    Const(OrderedFloat<f64>),
    Neg(Arc<Expr>),
    Binary(BinOp, Arc<Expr>, Arc<Expr>),
    Apply(Builtin, Vec<Expr>),
}

impl Expr {
    pub fn var(var: impl Into<Variable>) -> Self {
        Expr::Var(var.into())
    }

    #[must_use]
    pub fn constant(value: f64) -> Self {
        Expr::Const(OrderedFloat(value))
    }

    #[must_use]
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Arc::new(lhs), Arc::new(rhs))
    }

    pub fn apply(builtin: Builtin, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Apply(builtin, args.into_iter().collect())
    }

    #[must_use]
    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Self::Var(var) => Some(var),
            _ => None,
        }
    }

    /// Every variable occurring in this expression.
    #[must_use]
    pub fn free_vars(&self) -> BTreeSet<Variable> {
        let mut vars = BTreeSet::new();
        self.collect_free_vars(&mut vars);
        vars
    }

    pub(crate) fn collect_free_vars(&self, vars: &mut BTreeSet<Variable>) {
        match self {
            Self::Var(var) => {
                vars.insert(var.clone());
            }
            Self::Const(_) => {}
            Self::Neg(inner) => inner.collect_free_vars(vars),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_free_vars(vars);
                rhs.collect_free_vars(vars);
            }
            Self::Apply(_, args) => {
                for arg in args {
                    arg.collect_free_vars(vars);
                }
            }
        }
    }

    /// Simultaneous substitution. Variables missing from `mapping` are left alone.
    #[must_use]
    pub fn subs(&self, mapping: &HashMap<Variable, Expr>) -> Expr {
        self.map_vars(&|var| mapping.get(var).cloned())
    }

    /// Simultaneous renaming. Variables missing from `mapping` are left alone.
    #[must_use]
    pub fn rename(&self, mapping: &HashMap<Variable, Variable>) -> Expr {
        self.map_vars(&|var| mapping.get(var).cloned().map(Expr::Var))
    }

    fn map_vars(&self, f: &impl Fn(&Variable) -> Option<Expr>) -> Expr {
        match self {
            Self::Var(var) => f(var).unwrap_or_else(|| self.clone()),
            Self::Const(_) => self.clone(),
            Self::Neg(inner) => Expr::Neg(Arc::new(inner.map_vars(f))),
            Self::Binary(op, lhs, rhs) => Expr::binary(*op, lhs.map_vars(f), rhs.map_vars(f)),
            Self::Apply(builtin, args) => {
                Expr::Apply(*builtin, args.iter().map(|arg| arg.map_vars(f)).collect())
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary(op, ..) => op.precedence(),
            Self::Neg(_) => 3,
            Self::Const(value) if value.0.is_sign_negative() => 3,
            Self::Var(_) | Self::Const(_) | Self::Apply(..) => 4,
        }
    }

    fn fmt_operand(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        parent: u8,
        strict: bool,
    ) -> std::fmt::Result {
        let precedence = self.precedence();
        if precedence < parent || (strict && precedence == parent) {
            f.write_char('(')?;
            self.fmt(f)?;
            f.write_char(')')
        } else {
            self.fmt(f)
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Var(var) => var.fmt(f),
            Self::Const(value) => value.fmt(f),
            Self::Neg(inner) => {
                f.write_char('-')?;
                inner.fmt_operand(f, 3, true)
            }
            Self::Binary(op, lhs, rhs) => {
                lhs.fmt_operand(f, op.precedence(), false)?;
                write!(f, " {op} ")?;
                rhs.fmt_operand(f, op.precedence(), op.brackets_right())
            }
            Self::Apply(builtin, args) => write!(f, "{builtin}({})", args.iter().join(", ")),
        }
    }
}

impl From<Variable> for Expr {
    fn from(value: Variable) -> Self {
        Expr::Var(value)
    }
}

impl From<&Variable> for Expr {
    fn from(value: &Variable) -> Self {
        Expr::Var(value.clone())
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Var(value.into())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl From<&Expr> for Expr {
    fn from(value: &Expr) -> Self {
        value.clone()
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        Expr::Neg(Arc::new(self))
    }
}

impl Neg for &Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        -self.clone()
    }
}

macro_rules! expr_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Self::Output {
                Expr::binary($op, self, rhs.into())
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Self::Output {
                Expr::binary($op, self.clone(), rhs.into())
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Self::Output {
                Expr::binary($op, Expr::constant(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Self::Output {
                Expr::binary($op, Expr::constant(self), rhs.clone())
            }
        }
    };
}

expr_op!(Add, add, BinOp::Add);
expr_op!(Sub, sub, BinOp::Sub);
expr_op!(Mul, mul, BinOp::Mul);
expr_op!(Div, div, BinOp::Div);
