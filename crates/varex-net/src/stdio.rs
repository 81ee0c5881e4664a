//! Line protocol over the process's standard streams.

use std::io;

use varex_terminal::LineProcessor;

/// Run one session over locked stdin/stdout until end of input.
pub fn serve_stdio(processor: &LineProcessor) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    log::info!("serving line protocol on stdio");
    let result = processor.execute(stdin.lock(), stdout.lock());
    match &result {
        Ok(()) => log::info!("stdin closed"),
        Err(e) => log::warn!("stdio session ended: {e}"),
    }
    result
}
