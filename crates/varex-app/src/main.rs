//! varex demo process.
//!
//! Exports a `test` integer and the `debug.*` variables, then serves them
//! over one transport:
//!
//! ```text
//! varex [stdio|tcp|http] [config.toml]
//! ```
//!
//! The config path may also come from `VAREX_CONFIG`. Without one, defaults
//! apply.
//!
//! `RUST_LOG` sets the starting log level; `debug.log.level` changes it at
//! runtime.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Context, Result, bail};
use env_logger::Env;
use log::LevelFilter;

use varex_net::{HttpHandler, HttpServer, LineListener, Response, serve_stdio};
use varex_platform::{DesktopIntrospection, register_debug_vars};
use varex_terminal::{FnCommand, LineProcessor, line_processor};
use varex_types::config::VarexConfig;
use varex_vars::Registry;

fn main() -> Result<()> {
    init_logging(Env::default().default_filter_or("info"));

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "stdio".to_string());
    let config = load_config(args.next().or_else(|| std::env::var("VAREX_CONFIG").ok()))?;

    let registry = Arc::new(Registry::new());
    let test = Arc::new(AtomicI64::new(1));
    registry.register_i64("test", &test);
    register_debug_vars(&registry, Arc::new(DesktopIntrospection::new()));
    log::info!("exporting {} variables", registry.len());

    match mode.as_str() {
        "stdio" => {
            let processor = build_processor(&registry, &config, &test);
            serve_stdio(&processor)?;
        },
        "tcp" => {
            let processor = Arc::new(build_processor(&registry, &config, &test));
            let listener = LineListener::bind(config.listener.clone(), processor)?;
            listener.export_limit(&registry);
            listener.serve();
        },
        "http" => {
            let handler = build_http_handler(&registry, &config, &test);
            let server = HttpServer::bind(&config.http, handler)?;
            server.serve();
        },
        other => bail!("unknown mode {other:?} (expected stdio, tcp or http)"),
    }
    Ok(())
}

fn load_config(path: Option<String>) -> Result<VarexConfig> {
    let Some(path) = path else {
        return Ok(VarexConfig::default());
    };
    let config = VarexConfig::load(Path::new(&path))
        .with_context(|| format!("loading config from {path}"))?;
    log::info!("loaded config from {path}");
    Ok(config)
}

/// Install env_logger with its own filter wide open and gate records with
/// `log::max_level` instead, starting from the level `env` names.
fn init_logging(env: Env<'_>) {
    let level = startup_level(env);
    logger_builder().init();
    log::set_max_level(level);
}

/// Most verbose level named by the filter in `env`.
fn startup_level(env: Env<'_>) -> LevelFilter {
    env_logger::Builder::from_env(env).build().filter()
}

/// Logger that passes every record on to its writer.
fn logger_builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Trace);
    builder
}

/// Built-in commands, `PRINT` (logs the current `test` value) and `HELP`.
fn build_processor(
    registry: &Arc<Registry>,
    config: &VarexConfig,
    test: &Arc<AtomicI64>,
) -> LineProcessor {
    let mut processor = line_processor(registry, &config.line);
    let table = processor.table_mut();
    let test = Arc::clone(test);
    table.register(
        FnCommand::new("PRINT", 0, move |_: &[String]| {
            log::info!("print test={}", test.load(Ordering::Relaxed));
            Ok(Vec::new())
        })
        .with_description("Log the test variable"),
    );
    // Rebuild HELP so it lists PRINT.
    table.register_help();
    processor
}

/// Registry routes under `[http] prefix` plus `GET /print`, which logs the
/// current `test` value.
fn build_http_handler(
    registry: &Arc<Registry>,
    config: &VarexConfig,
    test: &Arc<AtomicI64>,
) -> HttpHandler {
    let mut handler = HttpHandler::new(Arc::clone(registry), &config.http.prefix);
    let test = Arc::clone(test);
    handler.add_route("GET", "/print", move |_| {
        log::info!("print test={}", test.load(Ordering::Relaxed));
        Response::ok(Vec::new())
    });
    handler
}
