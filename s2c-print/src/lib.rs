pub mod naming;
pub mod prettyprinter;
pub mod serialize;

pub use crate::{
    naming::{NamingScheme, Names, Sequential},
    prettyprinter::PrettyPrint,
    serialize::{IrSerializer, SerializeError, Serializer},
};
