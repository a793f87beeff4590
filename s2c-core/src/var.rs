use std::{collections::BTreeSet, sync::Arc};

use derive_more::{Display, From};

/// Default prefix of generated variable names.
pub const DEFAULT_BASE: &str = "x";

/// A symbolic variable.
///
/// Variables are compared by name. They are used both as binders (function
/// inputs and call outputs) and as leaves of expressions.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From)]
pub struct Variable(Arc<str>);

impl Variable {
    /// Coerce a raw token into a variable. Canonicalizing a variable returns it unchanged.
    pub fn canonicalize(token: impl Into<Self>) -> Self {
        token.into()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric suffix of this variable if its name is exactly `base` followed by digits.
    fn suffix(&self, base: &str) -> Option<usize> {
        self.0
            .strip_prefix(base)
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Variable(value.into())
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Variable(value.into())
    }
}

impl From<&Variable> for Variable {
    fn from(value: &Variable) -> Self {
        value.clone()
    }
}

/// Generator of variables `base0`, `base1`, ... which never collide with a
/// reserved set.
///
/// Numbering starts one past the largest suffix found among the reserved
/// variables sharing `base`. If that suffix is `usize::MAX`, numbering starts
/// at zero and skips every reserved suffix instead. The generator ends once
/// the suffixes are exhausted; it never wraps around.
#[derive(Clone, Debug)]
pub struct FreshVars {
    base: String,
    next: Option<usize>,
    reserved: BTreeSet<usize>,
}

impl FreshVars {
    pub fn new<'a>(
        base: impl Into<String>,
        existing: impl IntoIterator<Item = &'a Variable>,
    ) -> Self {
        let base = base.into();
        let reserved: BTreeSet<usize> = existing
            .into_iter()
            .filter_map(|var| var.suffix(&base))
            .collect();
        let next = reserved
            .last()
            .map_or(0, |&max| max.checked_add(1).unwrap_or(0));
        FreshVars {
            base,
            next: Some(next),
            reserved,
        }
    }
}

impl Iterator for FreshVars {
    type Item = Variable;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let n = self.next?;
            self.next = n.checked_add(1);
            if !self.reserved.contains(&n) {
                return Some(Variable::from(format!("{}{n}", self.base)));
            }
        }
    }
}

/// The conventional feature vector `x0, ..., x{n-1}`.
#[must_use]
pub fn input_symbols(n: usize) -> Vec<Variable> {
    (0..n)
        .map(|i| Variable::from(format!("{DEFAULT_BASE}{i}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{FreshVars, Variable, input_symbols};

    fn vars(names: &[&str]) -> Vec<Variable> {
        names.iter().copied().map(Variable::from).collect()
    }

    #[rstest]
    #[case(&[], &["x0", "x1", "x2"])]
    #[case(&["x0", "x3", "y7"], &["x4", "x5", "x6"])]
    #[case(&["x", "xa1", "x1b", "y0"], &["x0", "x1", "x2"])]
    #[case(&["x01"], &["x2", "x3", "x4"])]
    #[case(&["x0", "x2", "x18446744073709551615"], &["x1", "x3", "x4"])]
    fn fresh_skips_reserved(#[case] existing: &[&str], #[case] expected: &[&str]) {
        let existing = vars(existing);
        let generated: Vec<Variable> = FreshVars::new("x", &existing).take(3).collect();
        assert_eq!(generated, vars(expected));
        assert!(generated.iter().all(|var| !existing.contains(var)));
    }

    #[test]
    fn fresh_respects_base() {
        let existing = vars(&["tmp4", "x9"]);
        let mut fresh = FreshVars::new("tmp", &existing);
        assert_eq!(fresh.next(), Some(Variable::from("tmp5")));
        assert_eq!(fresh.next(), Some(Variable::from("tmp6")));
    }

    #[test]
    fn fresh_never_wraps() {
        let existing = vec![Variable::from("x0"), Variable::from(format!("x{}", usize::MAX))];
        let generated: Vec<Variable> = FreshVars::new("x", &existing).take(2).collect();
        assert_eq!(generated, vars(&["x1", "x2"]));

        let mut last = FreshVars::new("x", &vars(&["x3"]));
        last.next = Some(usize::MAX);
        assert_eq!(last.next(), Some(Variable::from(format!("x{}", usize::MAX))));
        assert_eq!(last.next(), None);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let var = Variable::canonicalize("x0");
        assert_eq!(Variable::canonicalize(var.clone()), var);
        assert_eq!(Variable::canonicalize(&var), var);
        assert_eq!(Variable::canonicalize(String::from("x0")), var);
        assert_eq!(var.to_string(), "x0");
    }

    #[test]
    fn feature_vector() {
        assert_eq!(input_symbols(3), vars(&["x0", "x1", "x2"]));
        assert!(input_symbols(0).is_empty());
    }
}
