use std::{
    collections::{BTreeSet, HashMap, HashSet},
    hash::{DefaultHasher, Hash, Hasher},
    ops::{Add, Div, Mul, Neg, Sub},
    sync::{Arc, OnceLock},
};

use by_address::ByThinAddress;
use derivative::Derivative;
use itertools::Itertools;

use crate::{
    error::{BuildError, FunctionError, Port, Result},
    expr::{BinOp, Expr},
    var::{DEFAULT_BASE, FreshVars, Variable},
};

/// Specifies something which has inputs and outputs.
pub trait InOut {
    fn number_of_inputs(&self) -> usize;
    fn number_of_outputs(&self) -> usize;
}

/// One invocation of a sub-function.
///
/// The callee's outputs are bound to `assigned` and its inputs to `arguments`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Call {
    assigned: Vec<Variable>,
    callee: Arc<Function>,
    arguments: Vec<Expr>,
}

impl Call {
    /// Arities are checked once the call is placed in a [`Function`].
    pub fn new(
        assigned: impl IntoIterator<Item = impl Into<Variable>>,
        callee: impl Into<Arc<Function>>,
        arguments: impl IntoIterator<Item = impl Into<Expr>>,
    ) -> Self {
        Call {
            assigned: assigned.into_iter().map(Into::into).collect(),
            callee: callee.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn assigned(&self) -> &[Variable] {
        &self.assigned
    }

    #[must_use]
    pub fn callee(&self) -> &Arc<Function> {
        &self.callee
    }

    #[must_use]
    pub fn arguments(&self) -> &[Expr] {
        &self.arguments
    }
}

impl InOut for Call {
    fn number_of_inputs(&self) -> usize {
        self.arguments.len()
    }

    fn number_of_outputs(&self) -> usize {
        self.assigned.len()
    }
}

type TrimMemo = HashMap<(ByThinAddress<Arc<Function>>, BTreeSet<usize>), Arc<Function>>;

/// A node of the intermediate representation: a pure computation with
/// ordered inputs, an ordered sequence of calls and ordered outputs.
///
/// Functions are immutable. Every transformation returns a new function, and
/// callees are shared between call sites through [`Arc`].
///
/// Calls are stored in evaluation order, each one reading only inputs and
/// variables assigned by earlier calls. Equality and hashing ignore that
/// order and compare the calls as a multiset; single assignment guarantees
/// that any two equal functions admit the same evaluation orders.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Function {
    inputs: Vec<Variable>,
    calls: Vec<Call>,
    outputs: Vec<Expr>,
    #[derivative(Debug = "ignore")]
    digest: OnceLock<u64>,
}

impl Function {
    /// Build a function, checking that every variable is bound once and that
    /// every call agrees with the arity of its callee.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DuplicateAssignment`] or
    /// [`BuildError::ArityMismatch`] when the invariants are violated.
    pub fn new(
        inputs: impl IntoIterator<Item = impl Into<Variable>>,
        calls: impl IntoIterator<Item = Call>,
        outputs: impl IntoIterator<Item = impl Into<Expr>>,
    ) -> Result<Self, BuildError> {
        let function = Self::from_parts(
            inputs.into_iter().map(Into::into).collect(),
            calls.into_iter().collect(),
            outputs.into_iter().map(Into::into).collect(),
        );
        function.validate()?;
        Ok(function)
    }

    /// The pass-through function returning its inputs.
    ///
    /// # Errors
    ///
    /// Fails if `vars` contains duplicates.
    pub fn identity(
        vars: impl IntoIterator<Item = impl Into<Variable>>,
    ) -> Result<Self, BuildError> {
        let inputs: Vec<Variable> = vars.into_iter().map(Into::into).collect();
        let outputs: Vec<Expr> = inputs.iter().map(Expr::from).collect();
        Self::new(inputs, [], outputs)
    }

    fn from_parts(inputs: Vec<Variable>, calls: Vec<Call>, outputs: Vec<Expr>) -> Self {
        Function {
            inputs,
            calls,
            outputs,
            digest: OnceLock::new(),
        }
    }

    fn validate(&self) -> Result<(), BuildError> {
        let mut bound: HashSet<&Variable> = HashSet::new();
        for var in &self.inputs {
            if !bound.insert(var) {
                return Err(BuildError::DuplicateAssignment(var.clone()));
            }
        }
        for (index, call) in self.calls.iter().enumerate() {
            for var in &call.assigned {
                if !bound.insert(var) {
                    return Err(BuildError::DuplicateAssignment(var.clone()));
                }
            }
            if call.assigned.len() != call.callee.outputs.len() {
                return Err(BuildError::ArityMismatch {
                    call: index,
                    port: Port::Assigned,
                    expected: call.callee.outputs.len(),
                    found: call.assigned.len(),
                });
            }
            if call.arguments.len() != call.callee.inputs.len() {
                return Err(BuildError::ArityMismatch {
                    call: index,
                    port: Port::Arguments,
                    expected: call.callee.inputs.len(),
                    found: call.arguments.len(),
                });
            }
        }
        Ok(())
    }

    /// Check that every argument and output only reads inputs or variables
    /// assigned by an earlier call.
    ///
    /// # Errors
    ///
    /// Returns [`FunctionError::Unbound`] with the first offending variable.
    pub fn check_scope(&self) -> Result<()> {
        let mut scope: HashSet<&Variable> = self.inputs.iter().collect();
        let mut used = BTreeSet::new();
        for call in &self.calls {
            for arg in &call.arguments {
                arg.collect_free_vars(&mut used);
            }
            if let Some(var) = used.iter().find(|var| !scope.contains(var)) {
                return Err(FunctionError::Unbound(var.clone()));
            }
            scope.extend(&call.assigned);
        }
        for output in &self.outputs {
            output.collect_free_vars(&mut used);
        }
        match used.iter().find(|var| !scope.contains(var)) {
            Some(var) => Err(FunctionError::Unbound(var.clone())),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    #[must_use]
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    #[must_use]
    pub fn outputs(&self) -> &[Expr] {
        &self.outputs
    }

    /// Whether this function has no calls and returns its inputs in order.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.calls.is_empty()
            && self.inputs.len() == self.outputs.len()
            && self
                .inputs
                .iter()
                .zip(&self.outputs)
                .all(|(input, output)| output.as_var() == Some(input))
    }

    /// Inputs followed by call-assigned variables, in binding order.
    fn own_vars(&self) -> impl Iterator<Item = &Variable> {
        self.inputs
            .iter()
            .chain(self.calls.iter().flat_map(|call| &call.assigned))
    }

    /// The variables bound by this function: its inputs and everything its
    /// calls assign. Callees are opaque and contribute nothing.
    #[must_use]
    pub fn vars(&self) -> BTreeSet<Variable> {
        self.own_vars().cloned().collect()
    }

    /// Substitute variables throughout the function.
    ///
    /// Variables missing from `mapping` are kept. Binders (inputs and
    /// assigned variables) may only be replaced by variables.
    ///
    /// # Errors
    ///
    /// Fails if a binder is mapped to a compound expression or if the
    /// substitution binds a variable twice.
    pub fn map_symbols(&self, mapping: &HashMap<Variable, Expr>) -> Result<Self, BuildError> {
        let binder = |var: &Variable| match mapping.get(var) {
            None => Ok(var.clone()),
            Some(Expr::Var(replacement)) => Ok(replacement.clone()),
            Some(replacement) => Err(BuildError::NonVariableBinder {
                var: var.clone(),
                replacement: replacement.clone(),
            }),
        };
        let inputs = self.inputs.iter().map(&binder).collect::<Result<_, _>>()?;
        let calls = self
            .calls
            .iter()
            .map(|call| -> Result<Call, BuildError> {
                Ok(Call {
                    assigned: call.assigned.iter().map(&binder).collect::<Result<_, _>>()?,
                    callee: call.callee.clone(),
                    arguments: call.arguments.iter().map(|arg| arg.subs(mapping)).collect(),
                })
            })
            .collect::<Result<_, _>>()?;
        let outputs = self.outputs.iter().map(|output| output.subs(mapping)).collect();
        let function = Self::from_parts(inputs, calls, outputs);
        function.validate()?;
        Ok(function)
    }

    /// Rename variables. Only sound for injective mappings whose targets do
    /// not collide with unmapped variables.
    fn rename(&self, mapping: &HashMap<Variable, Variable>) -> Self {
        let rename_var = |var: &Variable| mapping.get(var).unwrap_or(var).clone();
        Self::from_parts(
            self.inputs.iter().map(rename_var).collect(),
            self.calls
                .iter()
                .map(|call| Call {
                    assigned: call.assigned.iter().map(rename_var).collect(),
                    callee: call.callee.clone(),
                    arguments: call.arguments.iter().map(|arg| arg.rename(mapping)).collect(),
                })
                .collect(),
            self.outputs.iter().map(|output| output.rename(mapping)).collect(),
        )
    }

    /// Rename every variable bound by this function to a fresh name that
    /// occurs neither in `existing` nor in the function itself.
    #[must_use]
    pub fn revar<'a>(&self, existing: impl IntoIterator<Item = &'a Variable>) -> Self {
        let reserved: BTreeSet<Variable> = existing
            .into_iter()
            .cloned()
            .chain(self.own_vars().cloned())
            .collect();
        let mapping: HashMap<Variable, Variable> = self
            .own_vars()
            .cloned()
            .zip(FreshVars::new(DEFAULT_BASE, &reserved))
            .collect();
        tracing::trace!(renamed = mapping.len(), "revar");
        self.rename(&mapping)
    }

    /// Remove every call and input which cannot influence the outputs at
    /// the indices in `used`. Only the selected outputs are kept, in order.
    ///
    /// # Errors
    ///
    /// Returns [`FunctionError::OutputIndex`] if an index is out of range.
    pub fn trim(&self, used: impl IntoIterator<Item = usize>) -> Result<Self> {
        let used: BTreeSet<usize> = used.into_iter().collect();
        if let Some(&index) = used.iter().find(|&&index| index >= self.outputs.len()) {
            return Err(FunctionError::OutputIndex {
                index,
                len: self.outputs.len(),
            });
        }
        Ok(self.trim_unchecked(&used))
    }

    /// [`Function::trim`] keeping every output.
    #[must_use]
    pub fn trim_all(&self) -> Self {
        self.trim_unchecked(&(0..self.outputs.len()).collect())
    }

    #[tracing::instrument(skip_all)]
    fn trim_unchecked(&self, used: &BTreeSet<usize>) -> Self {
        let trimmed = self.trim_with(used, &mut TrimMemo::default());
        tracing::debug!(
            calls = self.calls.len(),
            kept = trimmed.calls.len(),
            inputs = self.inputs.len(),
            kept_inputs = trimmed.inputs.len(),
            "trimmed function"
        );
        trimmed
    }

    fn trim_with(&self, used: &BTreeSet<usize>, memo: &mut TrimMemo) -> Self {
        let outputs: Vec<Expr> = used.iter().map(|&i| self.outputs[i].clone()).collect();
        let mut live = BTreeSet::new();
        for output in &outputs {
            output.collect_free_vars(&mut live);
        }

        let mut calls = Vec::new();
        for call in self.calls.iter().rev() {
            let kept: BTreeSet<usize> = call
                .assigned
                .iter()
                .positions(|var| live.contains(var))
                .collect();
            if kept.is_empty() {
                continue;
            }

            let callee = Self::trim_callee(&call.callee, &kept, memo);
            let retained: HashSet<&Variable> = callee.inputs.iter().collect();
            let arguments: Vec<Expr> = call
                .callee
                .inputs
                .iter()
                .zip(&call.arguments)
                .filter(|(input, _)| retained.contains(input))
                .map(|(_, arg)| arg.clone())
                .collect();
            for arg in &arguments {
                arg.collect_free_vars(&mut live);
            }

            calls.push(Call {
                assigned: kept.iter().map(|&i| call.assigned[i].clone()).collect(),
                callee,
                arguments,
            });
        }
        calls.reverse();

        let inputs = self
            .inputs
            .iter()
            .filter(|var| live.contains(*var))
            .cloned()
            .collect();
        Self::from_parts(inputs, calls, outputs)
    }

    /// Trim a callee, sharing the result between call sites that keep the
    /// same outputs of the same callee.
    fn trim_callee(
        callee: &Arc<Function>,
        kept: &BTreeSet<usize>,
        memo: &mut TrimMemo,
    ) -> Arc<Function> {
        let key = (ByThinAddress(callee.clone()), kept.clone());
        if let Some(trimmed) = memo.get(&key) {
            return trimmed.clone();
        }
        let trimmed = callee.trim_with(kept, memo);
        let trimmed = if trimmed == **callee {
            callee.clone()
        } else {
            Arc::new(trimmed)
        };
        memo.insert(key, trimmed.clone());
        trimmed
    }

    /// Sequential composition: feed the outputs of `right` into the inputs of
    /// `self`.
    ///
    /// The result takes the inputs of `right`, calls `right` once and then
    /// runs the calls of `self`. If variables of `self` clash with the inputs
    /// of `right`, `self` is renamed first. Identity operands are eliminated.
    ///
    /// # Errors
    ///
    /// Fails if the number of inputs of `self` differs from the number of
    /// outputs of `right`.
    pub fn compose(&self, right: impl Into<Arc<Function>>) -> Result<Self> {
        let right = right.into();
        if self.inputs.len() != right.outputs.len() {
            return Err(FunctionError::ComposeArity {
                inputs: self.inputs.len(),
                outputs: right.outputs.len(),
            });
        }
        if self.is_identity() {
            return Ok(Arc::unwrap_or_clone(right));
        }

        let left = if self.own_vars().any(|var| right.inputs.contains(var)) {
            self.revar(&right.inputs)
        } else {
            self.clone()
        };

        if right.is_identity() {
            let mapping = left
                .inputs
                .iter()
                .cloned()
                .zip(right.inputs.iter().cloned())
                .collect();
            return Ok(left.rename(&mapping));
        }

        let call = Call {
            assigned: left.inputs.clone(),
            callee: right.clone(),
            arguments: right.inputs.iter().map(Expr::from).collect(),
        };
        Ok(Self::new(
            right.inputs.clone(),
            std::iter::once(call).chain(left.calls),
            left.outputs,
        )?)
    }

    /// # Errors
    ///
    /// Fails if an input of `other` is already bound in `self`.
    pub fn concat_inputs(&self, other: &Function) -> Result<Self, BuildError> {
        Self::new(
            self.inputs.iter().chain(&other.inputs).cloned(),
            self.calls.clone(),
            self.outputs.clone(),
        )
    }

    /// # Errors
    ///
    /// Fails if the calls of `other` rebind a variable of `self`.
    pub fn concat_calls(&self, other: &Function) -> Result<Self, BuildError> {
        Self::new(
            self.inputs.clone(),
            self.calls.iter().chain(&other.calls).cloned(),
            self.outputs.clone(),
        )
    }

    #[must_use]
    pub fn concat_outputs(&self, other: &Function) -> Self {
        Self::from_parts(
            self.inputs.clone(),
            self.calls.clone(),
            self.outputs.iter().chain(&other.outputs).cloned().collect(),
        )
    }

    /// The calls of `self` followed by those calls of `other` which `self`
    /// does not already make.
    ///
    /// # Errors
    ///
    /// Returns [`FunctionError::CallCollision`] if a remaining call of
    /// `other` assigns a variable that a call of `self` assigns too.
    pub fn merge_calls(&self, other: &Function) -> Result<Vec<Call>> {
        let present: HashSet<&Call> = self.calls.iter().collect();
        let extra: Vec<&Call> = other
            .calls
            .iter()
            .filter(|call| !present.contains(call))
            .collect();

        let assigned: HashSet<&Variable> = self
            .calls
            .iter()
            .flat_map(|call| &call.assigned)
            .collect();
        let overlap: BTreeSet<Variable> = extra
            .iter()
            .flat_map(|call| &call.assigned)
            .filter(|var| assigned.contains(var))
            .cloned()
            .collect();
        if !overlap.is_empty() {
            return Err(FunctionError::CallCollision(overlap));
        }

        tracing::trace!(
            shared = other.calls.len() - extra.len(),
            added = extra.len(),
            "merged calls"
        );
        Ok(self.calls.iter().chain(extra).cloned().collect())
    }

    fn ensure_same_inputs(&self, other: &Function) -> Result<()> {
        if self.inputs == other.inputs {
            Ok(())
        } else {
            Err(FunctionError::InputMismatch {
                left: self.inputs.clone(),
                right: other.inputs.clone(),
            })
        }
    }

    fn ensure_same_output_length(&self, other: &Function) -> Result<()> {
        if self.outputs.len() == other.outputs.len() {
            Ok(())
        } else {
            Err(FunctionError::OutputLengthMismatch {
                left: self.outputs.len(),
                right: other.outputs.len(),
            })
        }
    }

    /// Combine two functions over the same inputs into one returning the
    /// outputs of both. Calls made by both are made once.
    ///
    /// # Errors
    ///
    /// Fails if the inputs differ or the calls collide.
    pub fn cartesian_product(&self, other: &Function) -> Result<Self> {
        self.ensure_same_inputs(other)?;
        let calls = self.merge_calls(other)?;
        Ok(Self::new(
            self.inputs.clone(),
            calls,
            self.outputs.iter().chain(&other.outputs).cloned(),
        )?)
    }

    /// Elementwise combination of the outputs of two functions over the same
    /// inputs.
    ///
    /// # Errors
    ///
    /// Fails if the inputs or the number of outputs differ, or the calls
    /// collide.
    pub fn zip_with(&self, other: &Function, op: BinOp) -> Result<Self> {
        self.ensure_same_inputs(other)?;
        self.ensure_same_output_length(other)?;
        let calls = self.merge_calls(other)?;
        let outputs = self
            .outputs
            .iter()
            .zip(&other.outputs)
            .map(|(lhs, rhs)| Expr::binary(op, lhs.clone(), rhs.clone()));
        Ok(Self::new(self.inputs.clone(), calls, outputs)?)
    }

    /// Combine every output with `operand`. With `flip` the operand is the
    /// left-hand side.
    #[must_use]
    pub fn scalar(&self, op: BinOp, operand: impl Into<Expr>, flip: bool) -> Self {
        let operand = operand.into();
        self.apply(|output| {
            if flip {
                Expr::binary(op, operand.clone(), output.clone())
            } else {
                Expr::binary(op, output.clone(), operand.clone())
            }
        })
    }

    /// Map every output expression.
    #[must_use]
    pub fn apply(&self, f: impl Fn(&Expr) -> Expr) -> Self {
        Self::from_parts(
            self.inputs.clone(),
            self.calls.clone(),
            self.outputs.iter().map(f).collect(),
        )
    }

    /// Order-independent digest of the calls, computed once.
    fn calls_digest(&self) -> u64 {
        *self.digest.get_or_init(|| {
            let mut digests: Vec<u64> = self
                .calls
                .iter()
                .map(|call| {
                    let mut hasher = DefaultHasher::new();
                    call.hash(&mut hasher);
                    hasher.finish()
                })
                .collect();
            digests.sort_unstable();
            let mut hasher = DefaultHasher::new();
            digests.hash(&mut hasher);
            hasher.finish()
        })
    }
}

/// Cartesian product of any number of functions over the same inputs.
///
/// # Errors
///
/// Fails if `funs` is empty or if any pair fails
/// [`Function::cartesian_product`].
pub fn cart<'a>(funs: impl IntoIterator<Item = &'a Function>) -> Result<Function> {
    let mut funs = funs.into_iter();
    let first = funs.next().ok_or(FunctionError::EmptyProduct)?;
    funs.try_fold(first.clone(), |product, fun| product.cartesian_product(fun))
}

impl InOut for Function {
    fn number_of_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn number_of_outputs(&self) -> usize {
        self.outputs.len()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || (self.inputs == other.inputs
                && self.outputs == other.outputs
                && self.calls.len() == other.calls.len()
                && self.calls_digest() == other.calls_digest()
                && self.calls.iter().counts() == other.calls.iter().counts())
    }
}

impl Eq for Function {}

impl Hash for Function {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inputs.hash(state);
        state.write_u64(self.calls_digest());
        self.outputs.hash(state);
    }
}

impl Neg for &Function {
    type Output = Function;

    fn neg(self) -> Self::Output {
        self.apply(|output| -output)
    }
}

macro_rules! function_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&Function> for &Function {
            type Output = Result<Function>;

            fn $method(self, rhs: &Function) -> Self::Output {
                self.zip_with(rhs, $op)
            }
        }

        impl $trait<f64> for &Function {
            type Output = Function;

            fn $method(self, rhs: f64) -> Self::Output {
                self.scalar($op, rhs, false)
            }
        }

        impl $trait<Expr> for &Function {
            type Output = Function;

            fn $method(self, rhs: Expr) -> Self::Output {
                self.scalar($op, rhs, false)
            }
        }

        impl $trait<&Function> for f64 {
            type Output = Function;

            fn $method(self, rhs: &Function) -> Self::Output {
                rhs.scalar($op, self, true)
            }
        }

        impl $trait<&Function> for Expr {
            type Output = Function;

            fn $method(self, rhs: &Function) -> Self::Output {
                rhs.scalar($op, self, true)
            }
        }
    };
}

function_op!(Add, add, BinOp::Add);
function_op!(Sub, sub, BinOp::Sub);
function_op!(Mul, mul, BinOp::Mul);
function_op!(Div, div, BinOp::Div);
