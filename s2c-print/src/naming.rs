use std::sync::Arc;

use by_address::ByThinAddress;
use derivative::Derivative;
use indexmap::IndexMap;
use s2c_core::{Function, reachable};

/// Display names of functions, keyed by identity.
pub type Names = IndexMap<ByThinAddress<Arc<Function>>, String>;

/// Assigns a unique name to every function reachable from a set of roots.
pub trait NamingScheme {
    fn name(&self, roots: &[Arc<Function>]) -> Names;
}

/// Names functions `prefix0`, `prefix1`, ... with callees numbered before
/// their callers.
#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub struct Sequential {
    #[derivative(Default(value = "\"fun\".to_owned()"))]
    prefix: String,
}

impl Sequential {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl NamingScheme for Sequential {
    fn name(&self, roots: &[Arc<Function>]) -> Names {
        reachable(roots)
            .into_iter()
            .enumerate()
            .map(|(i, fun)| (ByThinAddress(fun), format!("{}{i}", self.prefix)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use by_address::ByThinAddress;
    use s2c_core::{Call, Expr, Function};

    use super::{NamingScheme, Sequential};

    #[test]
    fn sequential() -> Result<()> {
        let leaf = Arc::new(Function::new(["a"], [], [Expr::var("a") + 1.0])?);
        let first = Arc::new(Function::new(
            ["x0"],
            [Call::new(["x1"], leaf.clone(), ["x0"])],
            ["x1"],
        )?);
        let second = Arc::new(Function::new(
            ["x0"],
            [Call::new(["x1"], leaf.clone(), ["x0"])],
            [Expr::var("x1") * 2.0],
        )?);

        let names = Sequential::default().name(&[first.clone(), second.clone()]);
        assert_eq!(names.len(), 3);
        assert_eq!(names[&ByThinAddress(leaf)], "fun0");
        assert_eq!(names[&ByThinAddress(first)], "fun1");
        assert_eq!(names[&ByThinAddress(second.clone())], "fun2");

        let names = Sequential::new("f_").name(&[second]);
        assert_eq!(names.values().collect::<Vec<_>>(), ["f_0", "f_1"]);
        Ok(())
    }
}
