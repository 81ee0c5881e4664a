//! `debug.*` variables backed by an [`IntrospectionProvider`].
//!
//! The TCP session limit, `debug.runtime.maxthreads`, belongs to the listener
//! and is published by `LineListener::export_limit` in `varex-net`.
//!
//! Provider failures are returned as the value text rather than hidden, so
//! an operator reading `debug.runtime.threads` on a platform without
//! `/proc` sees why.

use std::fmt::Display;
use std::sync::Arc;

use log::LevelFilter;
use serde::Serialize;
use varex_types::error::{Result, VarError};
use varex_vars::{ReadOnly, Registry};

use crate::services::IntrospectionProvider;

/// Every name registered by [`register_debug_vars`].
pub const DEBUG_VARS: &[&str] = &[
    "debug.log.level",
    "debug.os.arch",
    "debug.os.args",
    "debug.os.name",
    "debug.process.id",
    "debug.process.uptime",
    "debug.runtime.memstats",
    "debug.runtime.parallelism",
    "debug.runtime.stack",
    "debug.runtime.threads",
    "debug.runtime.version",
];

/// Publish the `debug.*` variables into `registry`.
pub fn register_debug_vars(registry: &Registry, provider: Arc<dyn IntrospectionProvider>) {
    registry.register("debug.os.name", ReadOnly::quoted(std::env::consts::OS));
    registry.register("debug.os.arch", ReadOnly::quoted(std::env::consts::ARCH));
    registry.register(
        "debug.runtime.version",
        ReadOnly::quoted(concat!("varex ", env!("CARGO_PKG_VERSION"))),
    );

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.os.args", move || to_json(&p.args()));

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.process.id", move || p.pid().to_string().into_bytes());

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.process.uptime", move || {
        p.uptime_secs().to_string().into_bytes()
    });

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.runtime.threads", move || render(p.thread_count()));

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.runtime.parallelism", move || render(p.parallelism()));

    let p = Arc::clone(&provider);
    registry.register_get_only("debug.runtime.memstats", move || {
        match p.memory_stats() {
            Ok(stats) => to_json(&stats),
            Err(e) => e.to_string().into_bytes(),
        }
    });

    registry.register_get_only("debug.runtime.stack", move || provider.stack().into_bytes());

    registry.register_func(
        "debug.log.level",
        || log::max_level().to_string().into_bytes(),
        |text| {
            let level = text.trim().parse::<LevelFilter>().map_err(VarError::parse)?;
            let previous = log::max_level();
            log::set_max_level(level);
            log::info!("log level changed from {previous} to {level}");
            Ok(previous.to_string().into_bytes())
        },
    );

    log::debug!("registered {} debug variables", DEBUG_VARS.len());
}

fn render<T: Display>(value: Result<T>) -> Vec<u8> {
    match value {
        Ok(v) => v.to_string().into_bytes(),
        Err(e) => e.to_string().into_bytes(),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| e.to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use varex_types::error::VarexError;

    use super::*;
    use crate::services::MemoryStats;

    struct MockProvider {
        has_proc: bool,
    }

    impl MockProvider {
        fn new(has_proc: bool) -> Arc<Self> {
            Arc::new(Self { has_proc })
        }

        fn proc<T>(&self, value: T) -> Result<T> {
            if self.has_proc {
                Ok(value)
            } else {
                Err(VarexError::Platform("no /proc here".into()))
            }
        }
    }

    impl IntrospectionProvider for MockProvider {
        fn args(&self) -> Vec<String> {
            vec!["varex".into(), "a \"b\"".into()]
        }
        fn pid(&self) -> u32 {
            4242
        }
        fn uptime_secs(&self) -> u64 {
            90
        }
        fn thread_count(&self) -> Result<usize> {
            self.proc(7)
        }
        fn parallelism(&self) -> Result<usize> {
            Ok(8)
        }
        fn memory_stats(&self) -> Result<MemoryStats> {
            self.proc(MemoryStats {
                vm_rss_kb: 100,
                ..Default::default()
            })
        }
        fn stack(&self) -> String {
            "frame 0\nframe 1".into()
        }
    }

    fn read(registry: &Registry, name: &str) -> String {
        String::from_utf8(registry.lookup(name).unwrap().read()).unwrap()
    }

    #[test]
    fn registers_every_listed_name() {
        let registry = Registry::new();
        register_debug_vars(&registry, MockProvider::new(true));
        assert_eq!(registry.list_names(), DEBUG_VARS);
    }

    #[test]
    fn provider_values() {
        let registry = Registry::new();
        register_debug_vars(&registry, MockProvider::new(true));
        assert_eq!(read(&registry, "debug.os.args"), r#"["varex","a \"b\""]"#);
        assert_eq!(read(&registry, "debug.process.id"), "4242");
        assert_eq!(read(&registry, "debug.process.uptime"), "90");
        assert_eq!(read(&registry, "debug.runtime.threads"), "7");
        assert_eq!(read(&registry, "debug.runtime.parallelism"), "8");
        assert_eq!(read(&registry, "debug.runtime.stack"), "frame 0\nframe 1");
        let stats: serde_json::Value =
            serde_json::from_str(&read(&registry, "debug.runtime.memstats")).unwrap();
        assert_eq!(stats["vm_rss_kb"], 100);
    }

    #[test]
    fn constants_are_quoted() {
        let registry = Registry::new();
        register_debug_vars(&registry, MockProvider::new(true));
        assert_eq!(
            read(&registry, "debug.os.name"),
            format!("\"{}\"", std::env::consts::OS)
        );
        assert!(read(&registry, "debug.runtime.version").starts_with("\"varex "));
        let err = registry.lookup("debug.os.arch").unwrap().write("x").unwrap_err();
        assert_eq!(err, VarError::WriteUnsupported);
    }

    #[test]
    fn provider_errors_render_as_text() {
        let registry = Registry::new();
        register_debug_vars(&registry, MockProvider::new(false));
        assert_eq!(
            read(&registry, "debug.runtime.threads"),
            "platform error: no /proc here"
        );
        assert_eq!(
            read(&registry, "debug.runtime.memstats"),
            "platform error: no /proc here"
        );
    }

    #[test]
    fn log_level_round_trip() {
        let registry = Registry::new();
        register_debug_vars(&registry, MockProvider::new(true));
        let var = registry.lookup("debug.log.level").unwrap();
        let before = log::max_level();
        let previous = var.write("debug").unwrap();
        assert_eq!(previous, before.to_string().into_bytes());
        assert_eq!(var.read(), b"DEBUG");
        assert!(matches!(var.write("loud"), Err(VarError::Parse(_))));
        assert_eq!(log::max_level(), LevelFilter::Debug);
        log::set_max_level(before);
    }
}
