//! Line protocol over TCP.
//!
//! Each accepted client gets its own thread running one
//! [`LineProcessor::execute`] session. Clients beyond `max_connections` are
//! told `BUSY` and closed. A silent client is dropped after
//! `idle_timeout_secs`.
//!
//! The limit starts at `max_connections` and can be changed while serving,
//! either directly or through the `debug.runtime.maxthreads` variable
//! published by [`LineListener::export_limit`].

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use varex_terminal::LineProcessor;
use varex_types::config::ListenerConfig;
use varex_types::error::{Result, VarError};
use varex_vars::Registry;

use crate::accept::Acceptor;

/// Sent to a client refused because the listener is full.
pub const BUSY_REPLY: &[u8] = b"BUSY\n";

/// Variable through which [`LineListener::export_limit`] exposes the limit.
pub const LIMIT_VAR: &str = "debug.runtime.maxthreads";

/// TCP server for the line protocol.
pub struct LineListener {
    acceptor: Acceptor,
    processor: Arc<LineProcessor>,
    config: ListenerConfig,
    max_connections: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl LineListener {
    /// Bind `config.addr`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub fn bind(config: ListenerConfig, processor: Arc<LineProcessor>) -> Result<Self> {
        let acceptor = Acceptor::bind(&config.addr)?;
        log::info!("line listener bound to {}", acceptor.local_addr());
        Ok(Self {
            acceptor,
            processor,
            max_connections: Arc::new(AtomicUsize::new(config.max_connections)),
            config,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Number of sessions currently running.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Current session limit.
    pub fn max_connections(&self) -> usize {
        self.max_connections.load(Ordering::Acquire)
    }

    /// Change the session limit. Sessions already running are kept; only new
    /// clients see the new limit. Returns the previous limit.
    pub fn set_max_connections(&self, limit: usize) -> usize {
        let previous = self.max_connections.swap(limit, Ordering::AcqRel);
        log::info!("max connections changed from {previous} to {limit}");
        previous
    }

    /// Publish the session limit as the set-only [`LIMIT_VAR`] in `registry`.
    ///
    /// Writes must be a positive integer.
    pub fn export_limit(&self, registry: &Registry) {
        let limit = Arc::clone(&self.max_connections);
        registry.register_set_only(LIMIT_VAR, move |text: &str| {
            let value = text.trim().parse::<usize>().map_err(VarError::parse)?;
            if value == 0 {
                return Err(VarError::Parse("limit must be at least 1".into()));
            }
            let previous = limit.swap(value, Ordering::AcqRel);
            log::info!("max connections changed from {previous} to {value}");
            Ok(())
        });
    }

    /// Accept clients until [`stop`](Self::stop) is called.
    ///
    /// Sessions already running are not interrupted by `stop`.
    pub fn serve(&self) {
        self.acceptor.run(|stream, peer| self.admit(stream, peer));
    }

    pub fn stop(&self) {
        self.acceptor.stop();
    }

    fn admit(&self, mut stream: TcpStream, peer: SocketAddr) {
        // Only this thread increments, so the check cannot overshoot.
        let limit = self.max_connections();
        if self.active.load(Ordering::Acquire) >= limit {
            log::warn!("refusing {peer}: {limit} sessions active");
            let _ = stream.write_all(BUSY_REPLY);
            return;
        }
        if self.config.idle_timeout_secs > 0 {
            let timeout = Duration::from_secs(self.config.idle_timeout_secs);
            if let Err(e) = stream.set_read_timeout(Some(timeout)) {
                log::warn!("{peer}: cannot set idle timeout: {e}");
            }
        }

        let guard = ActiveGuard::enter(&self.active);
        let processor = Arc::clone(&self.processor);
        let spawned = std::thread::Builder::new()
            .name(format!("varex-line-{peer}"))
            .spawn(move || {
                let _guard = guard;
                run_session(&processor, stream, peer);
            });
        if let Err(e) = spawned {
            log::error!("cannot spawn session thread for {peer}: {e}");
        }
    }
}

/// Counts a session for as long as it is alive.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn run_session(processor: &LineProcessor, stream: TcpStream, peer: SocketAddr) {
    log::info!("{peer} connected");
    let reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            log::warn!("{peer}: cannot clone stream: {e}");
            return;
        },
    };
    match processor.execute(reader, stream) {
        Ok(()) => log::info!("{peer} disconnected"),
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            log::info!("{peer} idle timeout");
        },
        Err(e) => log::debug!("{peer} session ended: {e}"),
    }
}
