//! Process introspection published as `debug.*` variables.

pub mod debug;
pub mod services;

pub use debug::register_debug_vars;
pub use services::{DesktopIntrospection, IntrospectionProvider, MemoryStats};
