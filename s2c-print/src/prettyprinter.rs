use pretty::RcDoc;
use s2c_core::{Expr, Variable};

pub trait PrettyPrint {
    fn to_doc(&self) -> RcDoc<'_, ()>;

    fn to_pretty(&self) -> String {
        self.to_doc().pretty(usize::MAX).to_string()
    }
}

/// Comma-separated list.
pub fn list<'a, T: 'a + PrettyPrint>(ts: impl IntoIterator<Item = &'a T>) -> RcDoc<'a, ()> {
    RcDoc::intersperse(
        ts.into_iter().map(PrettyPrint::to_doc),
        RcDoc::text(",").append(RcDoc::space()),
    )
}

/// Comma-separated list with parentheses around it.
pub fn paran_list<'a, T: 'a + PrettyPrint>(ts: impl IntoIterator<Item = &'a T>) -> RcDoc<'a, ()> {
    RcDoc::text("(").append(list(ts)).append(RcDoc::text(")"))
}

/// A single element on its own, anything else as a parenthesised list.
pub fn tuple<'a, T: 'a + PrettyPrint>(ts: &'a [T]) -> RcDoc<'a, ()> {
    match ts {
        [t] => t.to_doc(),
        _ => paran_list(ts),
    }
}

impl<T: PrettyPrint> PrettyPrint for Vec<T> {
    fn to_doc(&self) -> RcDoc<'_, ()> {
        list(self)
    }
}

impl PrettyPrint for Variable {
    fn to_doc(&self) -> RcDoc<'_, ()> {
        RcDoc::text(self.as_str())
    }
}

impl PrettyPrint for Expr {
    fn to_doc(&self) -> RcDoc<'_, ()> {
        RcDoc::as_string(self)
    }
}
