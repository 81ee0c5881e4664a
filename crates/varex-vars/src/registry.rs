//! Concurrent name -> variable registry.
//!
//! One reader/writer lock guards the map. Lookups take a shared hold and
//! return a cloned `Arc`, so no lock is held while a variable is read or
//! written. The lock never covers the values the variables point to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicI32, AtomicI64, AtomicU8, AtomicU64};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use varex_types::error::VarError;

use crate::var::{
    BoolVar, BytesVar, FuncVar, GetOnly, I8Var, I32Var, I64Var, ReadOnly, SetOnly, StringVar,
    U8Var, U64Var, Var,
};

/// Registry of exported variables.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
#[derive(Default)]
pub struct Registry {
    vars: RwLock<HashMap<String, Arc<dyn Var>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Every operation leaves the map consistent, so a poisoned lock is safe
    // to keep using.
    fn map(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Var>>> {
        self.vars.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Var>>> {
        self.vars.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `name` to a variable, replacing any previous binding.
    pub fn register(&self, name: impl Into<String>, var: impl Var + 'static) {
        self.register_shared(name, Arc::new(var));
    }

    /// Bind `name` to an already shared variable.
    pub fn register_shared(&self, name: impl Into<String>, var: Arc<dyn Var>) {
        let name = name.into();
        log::trace!("register {name}");
        self.map_mut().insert(name, var);
    }

    /// Remove the binding for `name`, returning it if present.
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn Var>> {
        let removed = self.map_mut().remove(name);
        if removed.is_some() {
            log::trace!("deregister {name}");
        }
        removed
    }

    /// Look up a variable by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Var>> {
        self.map().get(name).cloned()
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.map().contains_key(name)
    }

    /// All registered names in ascending lexicographic order.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    // -- Typed registration --

    pub fn register_bool(&self, name: impl Into<String>, cell: &Arc<AtomicBool>) {
        self.register(name, BoolVar::new(Arc::clone(cell)));
    }

    pub fn register_i8(&self, name: impl Into<String>, cell: &Arc<AtomicI8>) {
        self.register(name, I8Var::new(Arc::clone(cell)));
    }

    pub fn register_i32(&self, name: impl Into<String>, cell: &Arc<AtomicI32>) {
        self.register(name, I32Var::new(Arc::clone(cell)));
    }

    pub fn register_i64(&self, name: impl Into<String>, cell: &Arc<AtomicI64>) {
        self.register(name, I64Var::new(Arc::clone(cell)));
    }

    pub fn register_u8(&self, name: impl Into<String>, cell: &Arc<AtomicU8>) {
        self.register(name, U8Var::new(Arc::clone(cell)));
    }

    pub fn register_u64(&self, name: impl Into<String>, cell: &Arc<AtomicU64>) {
        self.register(name, U64Var::new(Arc::clone(cell)));
    }

    pub fn register_string(&self, name: impl Into<String>, cell: &Arc<RwLock<String>>) {
        self.register(name, StringVar::new(Arc::clone(cell)));
    }

    pub fn register_bytes(&self, name: impl Into<String>, cell: &Arc<RwLock<Vec<u8>>>) {
        self.register(name, BytesVar::new(Arc::clone(cell)));
    }

    /// Register an immutable snapshot of `bytes`.
    pub fn register_read_only(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.register(name, ReadOnly::new(bytes));
    }

    pub fn register_get_only<F>(&self, name: impl Into<String>, get: F)
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.register(name, GetOnly::new(get));
    }

    pub fn register_set_only<F>(&self, name: impl Into<String>, set: F)
    where
        F: Fn(&str) -> Result<(), VarError> + Send + Sync + 'static,
    {
        self.register(name, SetOnly::new(set));
    }

    pub fn register_func<G, S>(&self, name: impl Into<String>, get: G, set: S)
    where
        G: Fn() -> Vec<u8> + Send + Sync + 'static,
        S: Fn(&str) -> Result<Vec<u8>, VarError> + Send + Sync + 'static,
    {
        self.register(name, FuncVar::new(get, set));
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.list_names())
            .finish()
    }
}
