use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
};

use derivative::Derivative;
use derive_more::Display;
use thiserror::Error;

use crate::{
    error::{BuildError, FunctionError},
    function::{Function, cart},
    var::{Variable, input_symbols},
};

/// The model methods an adapter can translate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum Method {
    #[display("predict")]
    Predict,
    #[display("predict_proba")]
    PredictProba,
    #[display("decision_function")]
    DecisionFunction,
    #[display("transform")]
    Transform,
    #[display("score_to_decision")]
    ScoreToDecision,
    #[display("score_to_proba")]
    ScoreToProba,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdaptError {
    #[error("No {method} adapter registered for `{type_name}`")]
    Unsupported {
        method: Method,
        type_name: &'static str,
    },

    #[error("Model `{0}` has not been fitted")]
    NotFitted(&'static str),

    #[error("Input size of `{0}` is unknown")]
    UnknownInputSize(&'static str),

    #[error("Building function failed: {0}")]
    Build(#[from] BuildError),

    #[error("Combining functions failed: {0}")]
    Function(#[from] FunctionError),
}

/// Models which can report whether they carry fitted parameters.
pub trait Fitted {
    fn is_fitted(&self) -> bool;

    /// # Errors
    ///
    /// Returns [`AdaptError::NotFitted`] when [`Fitted::is_fitted`] is false.
    fn ensure_fitted(&self) -> Result<(), AdaptError> {
        if self.is_fitted() {
            Ok(())
        } else {
            Err(AdaptError::NotFitted(type_name::<Self>()))
        }
    }
}

/// Models which know the width of their own feature vector.
pub trait InputSize {
    /// # Errors
    ///
    /// Fails if the model has not been fitted.
    fn input_size(&self) -> Result<usize, AdaptError>;
}

type Adapter = Box<dyn Fn(&dyn Any) -> Result<Function, AdaptError> + Send + Sync>;
type Sizer = Box<dyn Fn(&dyn Any) -> Result<usize, AdaptError> + Send + Sync>;

/// Open table of adapters, keyed by method and concrete model type.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct AdapterRegistry {
    #[derivative(Debug = "ignore")]
    adapters: HashMap<(Method, TypeId), Adapter>,
    #[derivative(Debug = "ignore")]
    sizers: HashMap<TypeId, Sizer>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter translating `method` of models of type `M`,
    /// replacing any previous one.
    pub fn register<M: Any>(
        &mut self,
        method: Method,
        adapter: impl Fn(&M) -> Result<Function, AdaptError> + Send + Sync + 'static,
    ) -> &mut Self {
        let erased: Adapter = Box::new(move |model: &dyn Any| {
            let model = model
                .downcast_ref::<M>()
                .ok_or(AdaptError::Unsupported {
                    method,
                    type_name: type_name::<M>(),
                })?;
            adapter(model)
        });
        self.adapters.insert((method, TypeId::of::<M>()), erased);
        self
    }

    /// Register how to find the feature vector width of models of type `M`.
    pub fn register_input_size<M: Any>(
        &mut self,
        sizer: impl Fn(&M) -> Result<usize, AdaptError> + Send + Sync + 'static,
    ) -> &mut Self {
        let erased: Sizer = Box::new(move |model: &dyn Any| {
            let model = model
                .downcast_ref::<M>()
                .ok_or(AdaptError::UnknownInputSize(type_name::<M>()))?;
            sizer(model)
        });
        self.sizers.insert(TypeId::of::<M>(), erased);
        self
    }

    /// Register models which report their own width through [`InputSize`].
    pub fn register_sized<M: InputSize + Any>(&mut self) -> &mut Self {
        self.register_input_size(M::input_size)
    }

    /// # Errors
    ///
    /// Returns [`AdaptError::UnknownInputSize`] if nothing is registered for
    /// the model type, or whatever the registered sizer reports.
    pub fn input_size<M: Any>(&self, model: &M) -> Result<usize, AdaptError> {
        let sizer = self
            .sizers
            .get(&TypeId::of::<M>())
            .ok_or(AdaptError::UnknownInputSize(type_name::<M>()))?;
        sizer(model as &dyn Any)
    }

    /// The feature vector `x0, ..., x{n-1}` of `model`.
    ///
    /// # Errors
    ///
    /// Fails like [`AdapterRegistry::input_size`].
    pub fn input_symbols<M: Any>(&self, model: &M) -> Result<Vec<Variable>, AdaptError> {
        Ok(input_symbols(self.input_size(model)?))
    }

    #[must_use]
    pub fn supports<M: Any>(&self, method: Method) -> bool {
        self.adapters.contains_key(&(method, TypeId::of::<M>()))
    }

    /// Translate `method` of `model` into a function over its feature vector.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Unsupported`] if no adapter is registered for the
    /// model type, or whatever the adapter itself reports.
    pub fn adapt<M: Any>(&self, method: Method, model: &M) -> Result<Function, AdaptError> {
        let adapter = self
            .adapters
            .get(&(method, TypeId::of::<M>()))
            .ok_or(AdaptError::Unsupported {
                method,
                type_name: type_name::<M>(),
            })?;
        let fun = adapter(model as &dyn Any)?;
        tracing::debug!(
            %method,
            model = type_name::<M>(),
            inputs = fun.inputs().len(),
            outputs = fun.outputs().len(),
            "adapted model"
        );
        Ok(fun)
    }
}

/// Concatenate the outputs of transformers sharing one feature vector,
/// scaling each by its weight if it has one.
///
/// # Errors
///
/// Fails if `parts` is empty or the transformers disagree on their inputs.
pub fn feature_union(
    parts: impl IntoIterator<Item = (Option<f64>, Function)>,
) -> Result<Function, FunctionError> {
    let weighted: Vec<Function> = parts
        .into_iter()
        .map(|(weight, fun)| match weight {
            Some(weight) => weight * &fun,
            None => fun,
        })
        .collect();
    cart(&weighted)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rstest::{fixture, rstest};

    use super::{AdaptError, AdapterRegistry, Fitted, InputSize, Method, feature_union};
    use crate::{
        error::FunctionError,
        expr::{Builtin, Expr},
        function::Function,
        var::input_symbols,
    };

    #[derive(Debug)]
    struct Linear {
        coef: Option<Vec<f64>>,
        intercept: f64,
    }

    impl Fitted for Linear {
        fn is_fitted(&self) -> bool {
            self.coef.is_some()
        }
    }

    struct Unknown;

    struct Forest {
        n_features: Option<usize>,
    }

    impl InputSize for Forest {
        fn input_size(&self) -> Result<usize, AdaptError> {
            self.n_features.ok_or(AdaptError::NotFitted("Forest"))
        }
    }

    fn input_size_from_coef(model: &Linear) -> Result<usize, AdaptError> {
        model.ensure_fitted()?;
        Ok(model.coef.as_ref().map_or(0, Vec::len))
    }

    fn decision(model: &Linear) -> Result<Function, AdaptError> {
        model.ensure_fitted()?;
        let coef = model.coef.as_deref().unwrap_or_default();
        let inputs = input_symbols(coef.len());
        let output = inputs
            .iter()
            .zip(coef)
            .fold(Expr::constant(model.intercept), |acc, (x, c)| {
                acc + Expr::from(x) * *c
            });
        Ok(Function::new(inputs, [], [output])?)
    }

    fn proba(model: &Linear) -> Result<Function, AdaptError> {
        let p = Expr::apply(Builtin::Expit, [Expr::var("x0")]);
        let link = Function::new(["x0"], [], [1.0 - &p, p])?;
        Ok(link.compose(decision(model)?)?)
    }

    #[fixture]
    fn registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry
            .register::<Linear>(Method::DecisionFunction, decision)
            .register::<Linear>(Method::PredictProba, proba)
            .register_input_size(input_size_from_coef)
            .register_sized::<Forest>();
        registry
    }

    #[fixture]
    fn fitted() -> Linear {
        Linear {
            coef: Some(vec![2.0, -1.0]),
            intercept: 0.5,
        }
    }

    #[rstest]
    fn adapts_registered_method(registry: AdapterRegistry, fitted: Linear) -> Result<()> {
        let fun = registry.adapt(Method::DecisionFunction, &fitted)?;
        assert_eq!(fun.inputs(), input_symbols(2).as_slice());
        assert_eq!(fun.outputs()[0].to_string(), "0.5 + x0 * 2 + x1 * -1");
        Ok(())
    }

    #[rstest]
    fn adapters_compose(registry: AdapterRegistry, fitted: Linear) -> Result<()> {
        let fun = registry.adapt(Method::PredictProba, &fitted)?;
        assert_eq!(fun.inputs(), input_symbols(2).as_slice());
        assert_eq!(fun.outputs().len(), 2);
        assert_eq!(fun.calls().len(), 1);
        assert!(fun.check_scope().is_ok());
        Ok(())
    }

    #[rstest]
    fn unsupported(registry: AdapterRegistry, fitted: Linear) {
        assert!(!registry.supports::<Linear>(Method::Transform));
        assert!(matches!(
            registry.adapt(Method::Transform, &fitted),
            Err(AdaptError::Unsupported {
                method: Method::Transform,
                ..
            })
        ));
        assert!(matches!(
            registry.adapt(Method::DecisionFunction, &Unknown),
            Err(AdaptError::Unsupported { .. })
        ));
    }

    #[rstest]
    fn not_fitted(registry: AdapterRegistry) {
        let model = Linear {
            coef: None,
            intercept: 0.0,
        };
        assert!(matches!(
            registry.adapt(Method::DecisionFunction, &model),
            Err(AdaptError::NotFitted(_))
        ));
    }

    #[rstest]
    fn input_sizes(registry: AdapterRegistry, fitted: Linear) -> Result<()> {
        assert_eq!(registry.input_size(&fitted)?, 2);
        assert_eq!(registry.input_symbols(&fitted)?, input_symbols(2));

        let forest = Forest {
            n_features: Some(3),
        };
        assert_eq!(registry.input_symbols(&forest)?, input_symbols(3));
        assert_eq!(
            registry.input_size(&Forest { n_features: None }),
            Err(AdaptError::NotFitted("Forest"))
        );

        let unfitted = Linear {
            coef: None,
            intercept: 0.0,
        };
        assert!(matches!(
            registry.input_size(&unfitted),
            Err(AdaptError::NotFitted(_))
        ));
        assert!(matches!(
            registry.input_size(&Unknown),
            Err(AdaptError::UnknownInputSize(_))
        ));
        Ok(())
    }

    #[test]
    fn union_of_transformers() -> Result<()> {
        let first = Function::new(input_symbols(2), [], [Expr::var("x0")])?;
        let second = Function::new(input_symbols(2), [], [Expr::var("x1") * Expr::var("x1")])?;
        let union = feature_union([(Some(2.0), first), (None, second)])?;
        assert_eq!(union.inputs(), input_symbols(2).as_slice());
        assert_eq!(
            union.outputs(),
            &[2.0 * Expr::var("x0"), Expr::var("x1") * Expr::var("x1")]
        );
        assert_eq!(feature_union([]), Err(FunctionError::EmptyProduct));
        Ok(())
    }

    #[test]
    fn registry_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AdapterRegistry>();
    }
}
