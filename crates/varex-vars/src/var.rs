//! The `Var` capability trait and its concrete variants.
//!
//! Primitive-backed variables share caller-owned storage through an `Arc`
//! to an atomic or internally locked cell. The registry lock only guards the
//! name mapping, so the cell itself must be safe to read and write from
//! several sessions at once.
//!
//! Every successful `write` returns the previous value in its canonical
//! encoding.

use std::sync::atomic::{AtomicBool, AtomicI8, AtomicI32, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use varex_types::error::VarError;

/// Reply of `read` on a set-only variable.
pub const SET_ONLY_PLACEHOLDER: &[u8] = b"set only";

/// A named cell exposing read and write.
pub trait Var: Send + Sync {
    /// Render the current value.
    fn read(&self) -> Vec<u8>;

    /// Decode `text` and replace the value, returning the previous encoding.
    fn write(&self, text: &str) -> Result<Vec<u8>, VarError>;
}

// ---------------------------------------------------------------------------
// Primitive-backed
// ---------------------------------------------------------------------------

fn encode_bool(v: bool) -> Vec<u8> {
    if v { b"true".to_vec() } else { b"false".to_vec() }
}

fn parse_bool(text: &str) -> Result<bool, VarError> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(VarError::Parse(format!("invalid boolean: {text:?}"))),
    }
}

/// Boolean variable over a shared `AtomicBool`.
#[derive(Debug, Clone)]
pub struct BoolVar(Arc<AtomicBool>);

impl BoolVar {
    pub fn new(cell: Arc<AtomicBool>) -> Self {
        Self(cell)
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Var for BoolVar {
    fn read(&self) -> Vec<u8> {
        encode_bool(self.get())
    }

    fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
        let value = parse_bool(text)?;
        Ok(encode_bool(self.0.swap(value, Ordering::SeqCst)))
    }
}

macro_rules! atomic_int_var {
    ($(#[$doc:meta])* $name:ident, $atomic:ty, $int:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name(Arc<$atomic>);

        impl $name {
            pub fn new(cell: Arc<$atomic>) -> Self {
                Self(cell)
            }

            pub fn get(&self) -> $int {
                self.0.load(Ordering::SeqCst)
            }
        }

        impl Var for $name {
            fn read(&self) -> Vec<u8> {
                self.get().to_string().into_bytes()
            }

            fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
                let value: $int = text.parse().map_err(VarError::parse)?;
                Ok(self.0.swap(value, Ordering::SeqCst).to_string().into_bytes())
            }
        }
    };
}

atomic_int_var!(
    /// Signed 8-bit integer variable.
    I8Var, AtomicI8, i8
);
atomic_int_var!(
    /// Signed 32-bit integer variable.
    I32Var, AtomicI32, i32
);
atomic_int_var!(
    /// Signed 64-bit integer variable.
    I64Var, AtomicI64, i64
);
atomic_int_var!(
    /// Byte variable, rendered as an unsigned decimal.
    U8Var, AtomicU8, u8
);
atomic_int_var!(
    /// Unsigned 64-bit integer variable.
    U64Var, AtomicU64, u64
);

/// String variable over a shared lock. Reads return the raw bytes.
#[derive(Debug, Clone)]
pub struct StringVar(Arc<RwLock<String>>);

impl StringVar {
    pub fn new(cell: Arc<RwLock<String>>) -> Self {
        Self(cell)
    }
}

impl Var for StringVar {
    fn read(&self) -> Vec<u8> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_bytes()
            .to_vec()
    }

    fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
        let mut value = self.0.write().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::replace(&mut *value, text.to_string()).into_bytes())
    }
}

/// Byte-buffer variable over a shared lock.
#[derive(Debug, Clone)]
pub struct BytesVar(Arc<RwLock<Vec<u8>>>);

impl BytesVar {
    pub fn new(cell: Arc<RwLock<Vec<u8>>>) -> Self {
        Self(cell)
    }
}

impl Var for BytesVar {
    fn read(&self) -> Vec<u8> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
        let mut value = self.0.write().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::replace(&mut *value, text.as_bytes().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Read-only
// ---------------------------------------------------------------------------

/// Immutable snapshot captured at registration. Writes always fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnly(Vec<u8>);

impl ReadOnly {
    /// Raw bytes, returned as-is.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// A string constant, rendered as a quoted string literal.
    pub fn quoted(s: &str) -> Self {
        Self(format!("{s:?}").into_bytes())
    }
}

impl Var for ReadOnly {
    fn read(&self) -> Vec<u8> {
        self.0.clone()
    }

    fn write(&self, _text: &str) -> Result<Vec<u8>, VarError> {
        Err(VarError::WriteUnsupported)
    }
}

// ---------------------------------------------------------------------------
// Function-backed
// ---------------------------------------------------------------------------

/// Variable computed on every read. Writes always fail.
pub struct GetOnly<F>(F);

impl<F> GetOnly<F>
where
    F: Fn() -> Vec<u8> + Send + Sync,
{
    pub fn new(get: F) -> Self {
        Self(get)
    }
}

impl<F> Var for GetOnly<F>
where
    F: Fn() -> Vec<u8> + Send + Sync,
{
    fn read(&self) -> Vec<u8> {
        (self.0)()
    }

    fn write(&self, _text: &str) -> Result<Vec<u8>, VarError> {
        Err(VarError::WriteUnsupported)
    }
}

/// Write-only variable. Reads return [`SET_ONLY_PLACEHOLDER`].
pub struct SetOnly<F>(F);

impl<F> SetOnly<F>
where
    F: Fn(&str) -> Result<(), VarError> + Send + Sync,
{
    pub fn new(set: F) -> Self {
        Self(set)
    }
}

impl<F> Var for SetOnly<F>
where
    F: Fn(&str) -> Result<(), VarError> + Send + Sync,
{
    fn read(&self) -> Vec<u8> {
        SET_ONLY_PLACEHOLDER.to_vec()
    }

    fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
        (self.0)(text)?;
        Ok(Vec::new())
    }
}

/// Variable backed by a getter and a setter.
///
/// The setter returns the previous encoding, like the primitive variants.
pub struct FuncVar<G, S> {
    get: G,
    set: S,
}

impl<G, S> FuncVar<G, S>
where
    G: Fn() -> Vec<u8> + Send + Sync,
    S: Fn(&str) -> Result<Vec<u8>, VarError> + Send + Sync,
{
    pub fn new(get: G, set: S) -> Self {
        Self { get, set }
    }
}

impl<G, S> Var for FuncVar<G, S>
where
    G: Fn() -> Vec<u8> + Send + Sync,
    S: Fn(&str) -> Result<Vec<u8>, VarError> + Send + Sync,
{
    fn read(&self) -> Vec<u8> {
        (self.get)()
    }

    fn write(&self, text: &str) -> Result<Vec<u8>, VarError> {
        (self.set)(text)
    }
}
