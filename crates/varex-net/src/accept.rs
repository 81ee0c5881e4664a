//! Blocking accept loop shared by the TCP transports.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};

use varex_types::error::{Result, VarexError};

pub(crate) struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: AtomicBool,
}

impl Acceptor {
    pub(crate) fn bind(addr: &str) -> Result<Self> {
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| VarexError::Config(format!("address {addr:?} resolves to nothing")))?;
        let listener = TcpListener::bind(resolved)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hand every accepted stream to `on_accept` until [`stop`](Self::stop).
    pub(crate) fn run(&self, mut on_accept: impl FnMut(TcpStream, SocketAddr)) {
        loop {
            let accepted = self.listener.accept();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match accepted {
                Ok((stream, peer)) => on_accept(stream, peer),
                Err(e) => log::warn!("accept error on {}: {e}", self.local_addr),
            }
        }
        log::info!("stopped listening on {}", self.local_addr);
    }

    /// Make [`run`](Self::run) return after its current accept.
    pub(crate) fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblock the pending accept.
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(e) = TcpStream::connect(wake) {
            log::debug!("wake connect to {wake} failed: {e}");
        }
    }
}
