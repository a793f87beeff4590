use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use by_address::ByThinAddress;
use derivative::Derivative;
use indexmap::IndexMap;
use itertools::Itertools;
use pretty::RcDoc;
use s2c_core::{Function, FunctionError, Variable, reachable};
use thiserror::Error;

use crate::{
    naming::{NamingScheme, Names, Sequential},
    prettyprinter::{paran_list, tuple},
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SerializeError {
    #[error("No name for function with inputs ({})", .0.iter().join(", "))]
    Unnamed(Vec<Variable>),

    #[error("Name `{0}` is given to more than one function")]
    DuplicateName(String),

    #[error("Function is requested both as `{first}` and as `{second}`")]
    Aliased { first: String, second: String },

    #[error("Function `{name}` is not well scoped: {source}")]
    Scope { name: String, source: FunctionError },
}

/// Renders a collection of named functions as source text.
pub trait Serializer {
    /// Render every function in `functions` together with everything they
    /// call. Each distinct function is emitted once, after its callees.
    ///
    /// # Errors
    ///
    /// Fails if a function cannot be named unambiguously or reads a
    /// variable it does not bind.
    fn serialize(
        &self,
        functions: &IndexMap<String, Arc<Function>>,
    ) -> Result<String, SerializeError>;
}

/// Prints the intermediate representation itself:
///
/// ```text
/// predict(x0, x1) {
///     x2 = fun0(x0 + 1)
///     return x2 * 2
/// }
/// ```
#[derive(Clone, Debug, Derivative)]
#[derivative(Default(bound = "N: Default"))]
pub struct IrSerializer<N = Sequential> {
    naming: N,
    #[derivative(Default(value = "4"))]
    indent: isize,
}

impl<N> IrSerializer<N> {
    pub fn new(naming: N) -> Self {
        Self { naming, indent: 4 }
    }

    #[must_use]
    pub fn with_indent(self, indent: isize) -> Self {
        Self { indent, ..self }
    }
}

impl<N: NamingScheme> IrSerializer<N> {
    /// Generated names, overridden by the requested ones. A function
    /// requested under two names is rejected since it is emitted once.
    fn names(
        &self,
        functions: &IndexMap<String, Arc<Function>>,
    ) -> Result<Names, SerializeError> {
        let roots: Vec<Arc<Function>> = functions.values().cloned().collect();
        let mut names = self.naming.name(&roots);
        let mut requested = HashMap::new();
        for (name, fun) in functions {
            let key = ByThinAddress(fun.clone());
            if let Some(first) = requested.insert(key.clone(), name) {
                return Err(SerializeError::Aliased {
                    first: first.clone(),
                    second: name.clone(),
                });
            }
            names.insert(key, name.clone());
        }

        let mut taken = HashSet::new();
        for name in names.values() {
            if !taken.insert(name.as_str()) {
                return Err(SerializeError::DuplicateName(name.clone()));
            }
        }
        Ok(names)
    }

    fn function_doc<'a>(
        &self,
        fun: &'a Arc<Function>,
        names: &'a Names,
    ) -> Result<RcDoc<'a, ()>, SerializeError> {
        let name = lookup(fun, names)?;
        fun.check_scope().map_err(|source| SerializeError::Scope {
            name: name.to_owned(),
            source,
        })?;

        let calls = fun
            .calls()
            .iter()
            .map(|call| -> Result<RcDoc<'a, ()>, SerializeError> {
                Ok(RcDoc::hardline()
                    .append(tuple(call.assigned()))
                    .append(RcDoc::text(" = "))
                    .append(RcDoc::text(lookup(call.callee(), names)?))
                    .append(paran_list(call.arguments())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = RcDoc::concat(calls)
            .append(RcDoc::hardline())
            .append(RcDoc::text("return "))
            .append(tuple(fun.outputs()))
            .nest(self.indent);

        Ok(RcDoc::text(name)
            .append(paran_list(fun.inputs()))
            .append(RcDoc::text(" {"))
            .append(body)
            .append(RcDoc::hardline())
            .append(RcDoc::text("}")))
    }
}

fn lookup<'a>(fun: &Arc<Function>, names: &'a Names) -> Result<&'a str, SerializeError> {
    names
        .get(&ByThinAddress(fun.clone()))
        .map(String::as_str)
        .ok_or_else(|| SerializeError::Unnamed(fun.inputs().to_vec()))
}

impl<N: NamingScheme> Serializer for IrSerializer<N> {
    #[tracing::instrument(skip_all, fields(functions = functions.len()))]
    fn serialize(
        &self,
        functions: &IndexMap<String, Arc<Function>>,
    ) -> Result<String, SerializeError> {
        let names = self.names(functions)?;
        let order = reachable(functions.values());
        let docs = order
            .iter()
            .map(|fun| self.function_doc(fun, &names))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(emitted = docs.len(), "serialized functions");

        let doc = RcDoc::intersperse(docs, RcDoc::hardline().append(RcDoc::hardline()));
        Ok(doc.pretty(usize::MAX).to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use indexmap::IndexMap;
    use insta::assert_snapshot;
    use rstest::{fixture, rstest};
    use s2c_core::{Builtin, Call, Expr, Function, FunctionError, cart};

    use super::{IrSerializer, SerializeError, Serializer};
    use crate::naming::{NamingScheme, Names, Sequential};

    /// `(x0) -> x0 * 2` after `(x0) -> x0 + 1`
    #[fixture]
    fn composed() -> Arc<Function> {
        let double = Function::new(["x0"], [], [Expr::var("x0") * 2.0]).unwrap();
        let succ = Function::new(["x0"], [], [Expr::var("x0") + 1.0]).unwrap();
        Arc::new(double.compose(succ).unwrap())
    }

    fn named(
        entries: impl IntoIterator<Item = (&'static str, Arc<Function>)>,
    ) -> IndexMap<String, Arc<Function>> {
        entries
            .into_iter()
            .map(|(name, fun)| (name.to_owned(), fun))
            .collect()
    }

    #[rstest]
    fn composition(composed: Arc<Function>) -> Result<()> {
        let text =
            IrSerializer::<Sequential>::default().serialize(&named([("predict", composed)]))?;
        assert_snapshot!(text, @r"
        fun0(x0) {
            return x0 + 1
        }

        predict(x0) {
            x1 = fun0(x0)
            return x1 * 2
        }
        ");
        Ok(())
    }

    #[test]
    fn tuples_and_indent() -> Result<()> {
        let pair = Arc::new(Function::new(
            ["a"],
            [],
            [Expr::var("a") + 1.0, Expr::var("a") * 2.0],
        )?);
        let fun = Function::new(
            ["x0", "x1"],
            [Call::new(["x2", "x3"], pair, [Expr::var("x0") - Expr::var("x1")])],
            [
                Expr::apply(Builtin::Expit, [Expr::var("x2")]),
                Expr::var("x3"),
            ],
        )?;
        let text = IrSerializer::new(Sequential::new("f"))
            .with_indent(2)
            .serialize(&named([("score", Arc::new(fun))]))?;
        assert_snapshot!(text, @r"
        f0(a) {
          return (a + 1, a * 2)
        }

        score(x0, x1) {
          (x2, x3) = f0(x0 - x1)
          return (expit(x2), x3)
        }
        ");
        Ok(())
    }

    #[rstest]
    fn shared_callees_printed_once(composed: Arc<Function>) -> Result<()> {
        let callee = composed.calls()[0].callee().clone();
        let sibling = Function::new(
            ["x0"],
            [Call::new(["x1"], callee, ["x0"])],
            [-Expr::var("x1")],
        )?;
        let both = cart([composed.as_ref(), &sibling])?;

        let functions = named([("both", Arc::new(both)), ("first", composed)]);
        let text = IrSerializer::<Sequential>::default().serialize(&functions)?;
        assert_eq!(text.matches("fun0(x0) {").count(), 1);
        assert_eq!(text.matches('{').count(), 3);
        assert!(text.find("fun0(x0) {") < text.find("both(x0) {"));
        Ok(())
    }

    #[rstest]
    fn duplicate_name(composed: Arc<Function>) {
        let serializer = IrSerializer::<Sequential>::default();
        assert_eq!(
            serializer.serialize(&named([("fun0", composed)])),
            Err(SerializeError::DuplicateName("fun0".to_owned()))
        );
    }

    #[rstest]
    fn one_function_under_two_names(composed: Arc<Function>) -> Result<()> {
        let serializer = IrSerializer::<Sequential>::default();
        let aliased = named([("predict", composed.clone()), ("decision", composed.clone())]);
        assert_eq!(
            serializer.serialize(&aliased),
            Err(SerializeError::Aliased {
                first: "predict".to_owned(),
                second: "decision".to_owned(),
            })
        );

        let copy = Arc::new(Function::clone(&composed));
        let text = serializer.serialize(&named([("predict", composed), ("decision", copy)]))?;
        assert!(text.contains("predict(x0) {"));
        assert!(text.contains("decision(x0) {"));
        Ok(())
    }

    #[test]
    fn unbound_variable() -> Result<()> {
        let fun = Function::new(["x0"], [], [Expr::var("x0") + Expr::var("y")])?;
        let result =
            IrSerializer::<Sequential>::default().serialize(&named([("bad", Arc::new(fun))]));
        assert_eq!(
            result,
            Err(SerializeError::Scope {
                name: "bad".to_owned(),
                source: FunctionError::Unbound("y".into()),
            })
        );
        Ok(())
    }

    #[rstest]
    fn unnamed(composed: Arc<Function>) {
        struct Nameless;

        impl NamingScheme for Nameless {
            fn name(&self, _roots: &[Arc<Function>]) -> Names {
                Names::default()
            }
        }

        assert!(matches!(
            IrSerializer::new(Nameless).serialize(&named([("predict", composed)])),
            Err(SerializeError::Unnamed(_))
        ));
    }
}
