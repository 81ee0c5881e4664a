//! HTTP/1.1 adapter over the registry.
//!
//! Routes, relative to the configured prefix:
//!
//! | Method | Path          | Result                                        |
//! |--------|---------------|-----------------------------------------------|
//! | GET    | `/vars`       | JSON array of variable names, sorted          |
//! | GET    | `/var/{name}` | raw value, or 404                             |
//! | PUT    | `/var/{name}` | body is the new value; 404, 403 on write error |
//!
//! Extra exact-path routes can be added with [`HttpHandler::add_route`]; they
//! are matched before the prefix routes.
//!
//! One request per connection, answered with `Connection: close`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use varex_types::config::HttpConfig;
use varex_types::error::Result;
use varex_vars::Registry;

use crate::accept::Acceptor;

/// Maximum bytes in the request line or a single header line.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Maximum number of request headers.
const MAX_HEADERS: usize = 100;

/// Per-connection read timeout (seconds).
const REQUEST_TIMEOUT_SECS: u64 = 30;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// A parsed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target without the query string.
    pub path: String,
    pub body: Vec<u8>,
}

/// An HTTP response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    /// `200 OK` with a plain-text body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: TEXT_PLAIN,
            body,
        }
    }

    /// Error response; the message gets a trailing newline.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: TEXT_PLAIN,
            body: format!("{message}\n").into_bytes(),
        }
    }

    fn not_found() -> Self {
        Self::error(404, "404 page not found")
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            _ => "",
        }
    }
}

/// Why a request could not be read.
#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request body of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

type RouteFn = Box<dyn Fn(&Request) -> Response + Send + Sync>;

/// An exact-path route added beside the registry routes.
struct Route {
    method: String,
    path: String,
    handler: RouteFn,
}

/// Maps requests to registry operations.
pub struct HttpHandler {
    registry: Arc<Registry>,
    prefix: String,
    routes: Vec<Route>,
}

impl HttpHandler {
    /// `prefix` is stripped of trailing slashes; `"/"` and `""` mount at the root.
    pub fn new(registry: Arc<Registry>, prefix: &str) -> Self {
        Self {
            registry,
            prefix: prefix.trim_end_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    /// Answer `method path` with `handler`. The path is matched exactly,
    /// without the query string; other methods on it get 405.
    pub fn add_route<F>(&mut self, method: &str, path: &str, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method: method.to_string(),
            path: path.to_string(),
            handler: Box::new(handler),
        });
    }

    pub fn handle(&self, req: &Request) -> Response {
        let mut path_matched = false;
        for route in self.routes.iter().filter(|r| r.path == req.path) {
            if route.method == req.method {
                return (route.handler)(req);
            }
            path_matched = true;
        }
        if path_matched {
            return Response::error(405, "Method Not Allowed");
        }

        let Some(route) = req.path.strip_prefix(self.prefix.as_str()) else {
            return Response::not_found();
        };

        if route == "/vars" {
            return match req.method.as_str() {
                "GET" => self.list(),
                _ => Response::error(405, "Method Not Allowed"),
            };
        }

        let Some(raw_name) = route.strip_prefix("/var/") else {
            return Response::not_found();
        };
        if raw_name.is_empty() || raw_name.contains('/') {
            return Response::not_found();
        }
        let Some(name) = percent_decode(raw_name) else {
            return Response::error(400, "invalid escape in variable name");
        };

        match req.method.as_str() {
            "GET" => self.get(&name),
            "PUT" => self.put(&name, &req.body),
            _ => Response::error(405, "Method Not Allowed"),
        }
    }

    fn list(&self) -> Response {
        match serde_json::to_vec(&self.registry.list_names()) {
            Ok(mut body) => {
                body.push(b'\n');
                Response {
                    status: 200,
                    content_type: APPLICATION_JSON,
                    body,
                }
            },
            Err(e) => {
                log::error!("json encode: {e}");
                Response::error(500, &e.to_string())
            },
        }
    }

    fn get(&self, name: &str) -> Response {
        match self.registry.lookup(name) {
            Some(var) => Response::ok(var.read()),
            None => Response::error(404, "No such key"),
        }
    }

    fn put(&self, name: &str, body: &[u8]) -> Response {
        let Some(var) = self.registry.lookup(name) else {
            return Response::error(404, "No such key");
        };
        let Ok(value) = std::str::from_utf8(body) else {
            return Response::error(400, "body is not valid UTF-8");
        };
        match var.write(value) {
            Ok(_) => {
                log::debug!("PUT {name}");
                Response::ok(Vec::new())
            },
            Err(e) => Response::error(403, &e.to_string()),
        }
    }
}

/// Decode `%XX` escapes. `None` on a truncated or non-hex escape, or if the
/// result is not UTF-8.
pub fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Read one line (without CRLF), bounded by [`MAX_HEADER_LINE`].
fn read_header_line<R: BufRead>(reader: &mut R) -> std::result::Result<String, RequestError> {
    let mut buf = Vec::new();
    let limit = (MAX_HEADER_LINE + 1) as u64;
    Read::take(&mut *reader, limit).read_until(b'\n', &mut buf)?;
    if !buf.ends_with(b"\n") {
        return Err(if buf.len() > MAX_HEADER_LINE {
            RequestError::Malformed("header line too long".into())
        } else {
            RequestError::Malformed("unexpected end of request".into())
        });
    }
    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| RequestError::Malformed("header is not UTF-8".into()))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Read the request line, headers and body.
fn read_request<R: BufRead>(
    reader: &mut R,
    max_body: usize,
) -> std::result::Result<Request, RequestError> {
    let request_line = read_header_line(reader)?;
    let mut parts = request_line.splitn(3, ' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed(format!(
            "bad request line: {request_line:?}"
        )));
    };
    if method.is_empty() || !target.starts_with('/') || !version.starts_with("HTTP/1.") {
        return Err(RequestError::Malformed(format!(
            "bad request line: {request_line:?}"
        )));
    }
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_header_line(reader)?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(RequestError::Malformed("too many headers".into()));
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(RequestError::Malformed(format!("bad header: {line:?}")));
        };
        headers.push((key.trim().to_lowercase(), value.trim().to_string()));
    }

    if find_header(&headers, "transfer-encoding").is_some() {
        return Err(RequestError::Malformed(
            "transfer-encoding is not supported".into(),
        ));
    }
    let length = match find_header(&headers, "content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length: {v:?}")))?,
        None => 0,
    };
    if length > max_body {
        return Err(RequestError::TooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    Ok(Request {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_response<W: Write>(writer: &mut W, resp: &Response) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        resp.status,
        resp.reason(),
        resp.content_type,
        resp.body.len(),
    )?;
    writer.write_all(&resp.body)?;
    writer.flush()
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP server, one thread per connection.
pub struct HttpServer {
    acceptor: Acceptor,
    handler: Arc<HttpHandler>,
    max_body_size: usize,
}

impl HttpServer {
    /// Bind `config.addr` and serve `handler`, which should have been built
    /// with `config.prefix`.
    pub fn bind(config: &HttpConfig, handler: HttpHandler) -> Result<Self> {
        let acceptor = Acceptor::bind(&config.addr)?;
        log::info!(
            "http listening on {} under {:?}",
            acceptor.local_addr(),
            config.prefix
        );
        Ok(Self {
            acceptor,
            handler: Arc::new(handler),
            max_body_size: config.max_body_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Accept connections until [`stop`](Self::stop) is called.
    pub fn serve(&self) {
        self.acceptor.run(|stream, peer| {
            let handler = Arc::clone(&self.handler);
            let max_body = self.max_body_size;
            let spawned = std::thread::Builder::new()
                .name(format!("varex-http-{peer}"))
                .spawn(move || serve_connection(&handler, stream, peer, max_body));
            if let Err(e) = spawned {
                log::error!("cannot spawn http thread for {peer}: {e}");
            }
        });
    }

    pub fn stop(&self) {
        self.acceptor.stop();
    }
}

fn serve_connection(handler: &HttpHandler, stream: TcpStream, peer: SocketAddr, max_body: usize) {
    if let Err(e) = stream.set_read_timeout(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS))) {
        log::warn!("{peer}: cannot set read timeout: {e}");
    }
    let mut writer = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("{peer}: cannot clone stream: {e}");
            return;
        },
    };
    let mut reader = BufReader::new(stream);

    let resp = match read_request(&mut reader, max_body) {
        Ok(req) => {
            let resp = handler.handle(&req);
            log::debug!("{peer} {} {} -> {}", req.method, req.path, resp.status);
            resp
        },
        Err(RequestError::Malformed(msg)) => {
            log::debug!("{peer}: {msg}");
            Response::error(400, "Bad Request")
        },
        Err(e @ RequestError::TooLarge(_)) => {
            log::debug!("{peer}: {e}");
            Response::error(413, "Payload Too Large")
        },
        Err(RequestError::Io(e)) => {
            log::debug!("{peer}: read failed: {e}");
            return;
        },
    };
    if let Err(e) = write_response(&mut writer, &resp) {
        log::debug!("{peer}: write failed: {e}");
    }
}
