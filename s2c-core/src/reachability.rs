use std::{collections::HashSet, sync::Arc};

use by_address::ByThinAddress;

use crate::function::Function;

/// Every function reachable from `roots` through calls, callees before their
/// callers. A function shared by several call sites is listed once.
#[must_use]
pub fn reachable<'a>(roots: impl IntoIterator<Item = &'a Arc<Function>>) -> Vec<Arc<Function>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for root in roots {
        visit(root, &mut seen, &mut order);
    }
    order
}

fn visit(
    fun: &Arc<Function>,
    seen: &mut HashSet<ByThinAddress<Arc<Function>>>,
    order: &mut Vec<Arc<Function>>,
) {
    if !seen.insert(ByThinAddress(fun.clone())) {
        return;
    }
    for call in fun.calls() {
        visit(call.callee(), seen, order);
    }
    order.push(fun.clone());
}
