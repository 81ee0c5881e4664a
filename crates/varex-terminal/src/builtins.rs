//! Built-in `GET`, `SET` and `LIST` commands over a variable registry.

use std::sync::Arc;

use varex_types::config::LineConfig;
use varex_types::error::Result;
use varex_vars::Registry;

use crate::processor::{Command, CommandTable, LineProcessor};

/// Reply when the named variable does not exist.
pub const NO_SUCH_KEY: &[u8] = b"NO SUCH KEY";

/// Reply to a successful `SET`.
pub const OK: &[u8] = b"OK";

/// Register `GET`, `SET` and `LIST` into a table.
pub fn register_builtins(table: &mut CommandTable, registry: &Arc<Registry>, echo_previous: bool) {
    table.register(GetCmd {
        registry: Arc::clone(registry),
    });
    table.register(SetCmd {
        registry: Arc::clone(registry),
        echo_previous,
    });
    table.register(ListCmd {
        registry: Arc::clone(registry),
    });
}

/// A processor serving the built-in commands and `HELP`, configured from
/// `[line]`.
///
/// With the default configuration `GET` is the default command, so a bare
/// variable name reads that variable.
pub fn line_processor(registry: &Arc<Registry>, config: &LineConfig) -> LineProcessor {
    let mut table = CommandTable::new();
    register_builtins(&mut table, registry, config.echo_previous);
    table.register_help();
    LineProcessor::with_config(table, config)
}

// ---------------------------------------------------------------------------
// GET
// ---------------------------------------------------------------------------

struct GetCmd {
    registry: Arc<Registry>,
}

impl Command for GetCmd {
    fn name(&self) -> &str {
        "GET"
    }
    fn arity(&self) -> usize {
        1
    }
    fn description(&self) -> &str {
        "Read a variable"
    }
    fn execute(&self, args: &[String]) -> Result<Vec<u8>> {
        Ok(match self.registry.lookup(&args[0]) {
            Some(var) => var.read(),
            None => NO_SUCH_KEY.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// SET
// ---------------------------------------------------------------------------

struct SetCmd {
    registry: Arc<Registry>,
    echo_previous: bool,
}

impl Command for SetCmd {
    fn name(&self) -> &str {
        "SET"
    }
    fn arity(&self) -> usize {
        2
    }
    fn description(&self) -> &str {
        "Write a variable"
    }
    fn execute(&self, args: &[String]) -> Result<Vec<u8>> {
        let Some(var) = self.registry.lookup(&args[0]) else {
            return Ok(NO_SUCH_KEY.to_vec());
        };
        let previous = var.write(&args[1])?;
        log::debug!("SET {}", args[0]);
        Ok(if self.echo_previous {
            previous
        } else {
            OK.to_vec()
        })
    }
}

// ---------------------------------------------------------------------------
// LIST
// ---------------------------------------------------------------------------

struct ListCmd {
    registry: Arc<Registry>,
}

impl Command for ListCmd {
    fn name(&self) -> &str {
        "LIST"
    }
    fn arity(&self) -> usize {
        0
    }
    fn description(&self) -> &str {
        "List variable names"
    }
    fn execute(&self, _args: &[String]) -> Result<Vec<u8>> {
        Ok(self.registry.list_names().join("\n").into_bytes())
    }
}
