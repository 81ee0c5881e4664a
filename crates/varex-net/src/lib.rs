//! Transports that expose a variable registry to the outside world.
//!
//! - [`serve_stdio`]: one line-protocol session over stdin/stdout.
//! - [`LineListener`]: line protocol over TCP, one thread per client.
//! - [`HttpServer`]: `GET`/`PUT` routes over HTTP/1.1.

mod accept;
pub mod http;
pub mod listener;
pub mod stdio;

pub use http::{HttpHandler, HttpServer, Request, Response};
pub use listener::LineListener;
pub use stdio::serve_stdio;
