//! Exported runtime variables.
//!
//! A [`Var`] is a cell with two capabilities: `read` renders the current value
//! as bytes and `write` decodes text into a new value. The [`Registry`] maps
//! names to variables and is shared by every transport.

pub mod registry;
pub mod var;

/// Concurrent name -> variable mapping.
pub use registry::Registry;
/// The read/write capability trait.
pub use var::Var;
/// Primitive-backed, read-only and function-backed variants.
pub use var::{
    BoolVar, BytesVar, FuncVar, GetOnly, I8Var, I32Var, I64Var, ReadOnly, SetOnly, StringVar,
    U8Var, U64Var,
};
/// Errors from `Var::write`.
pub use varex_types::error::VarError;
