//! A minimal in-process HTTP server for exercising remote readers.
//!
//! The server answers HEAD and GET requests (including `Range` requests and
//! proxy-style absolute-form targets) for a fixed set of paths, one request
//! per connection, and records every request it sees so tests can assert on
//! the wire behavior.

use std::collections::HashMap;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::Write as _;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

/// One observed request.
#[derive(Clone, Debug)]
pub struct Request {
    /// The request method.
    pub method: String,

    /// The request target exactly as sent (origin-form or absolute-form).
    pub target: String,

    /// The `Range` header value, if any.
    pub range: Option<String>,
}

/// A running test server.
pub struct Server {
    /// The bound port on localhost.
    port: u16,

    /// Every request handled so far.
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Server {
    /// Starts a server for a set of `path -> body` entries.
    pub fn serve(files: HashMap<String, Vec<u8>>) -> Server {
        Self::start(files, true)
    }

    /// Starts a server that ignores `Range` headers, answering every GET
    /// with a `200` and the whole body.
    pub fn serve_without_ranges(files: HashMap<String, Vec<u8>>) -> Server {
        Self::start(files, false)
    }

    /// Starts a server, with or without `Range` support.
    fn start(files: HashMap<String, Vec<u8>>, ranges: bool) -> Server {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let handled = requests.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let _ = handle(stream, &files, &handled, ranges);
            }
        });

        Server { port, requests }
    }

    /// The URL of a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A snapshot of the requests handled so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

/// Handles a single request on a fresh connection.
fn handle(
    mut stream: TcpStream,
    files: &HashMap<String, Vec<u8>>,
    requests: &Arc<Mutex<Vec<Request>>>,
    ranges: bool,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut range = None;

    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(());
        }

        let header = header.trim_end();
        if header.is_empty() {
            break;
        }

        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    requests.lock().unwrap().push(Request {
        method: method.clone(),
        target: target.clone(),
        range: range.clone(),
    });

    let path = resolve_path(&target);

    let Some(body) = files.get(path) else {
        return write_response(&mut stream, "404 Not Found", &[], None);
    };

    match (method.as_str(), range) {
        ("HEAD", _) => write_head(&mut stream, body.len()),
        ("GET", None) => write_response(&mut stream, "200 OK", body, None),
        ("GET", Some(_)) if !ranges => write_response(&mut stream, "200 OK", body, None),
        ("GET", Some(range)) => match parse_range(&range, body.len()) {
            Some((start, end)) => {
                let content_range = format!("bytes {start}-{end}/{}", body.len());
                write_response(
                    &mut stream,
                    "206 Partial Content",
                    &body[start..=end],
                    Some(&content_range),
                )
            }
            None => write_response(&mut stream, "416 Range Not Satisfiable", &[], None),
        },
        _ => write_response(&mut stream, "405 Method Not Allowed", &[], None),
    }
}

/// Resolves a request target to a file path, stripping the scheme and host
/// of proxy-style absolute-form targets and any query string.
fn resolve_path(target: &str) -> &str {
    let mut path = target;

    for scheme in ["http://", "https://"] {
        if let Some(rest) = path.strip_prefix(scheme) {
            path = match rest.find('/') {
                Some(at) => &rest[at..],
                None => "/",
            };
        }
    }

    match path.split_once('?') {
        Some((path, _)) => path,
        None => path,
    }
}

/// Parses a `bytes=start-end` range, clamping the end to the body length.
fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;

    let start = start.parse::<usize>().ok()?;
    if start >= len {
        return None;
    }

    let end = match end {
        "" => len - 1,
        end => end.parse::<usize>().ok()?.min(len - 1),
    };

    (start <= end).then_some((start, end))
}

/// Writes a response to a HEAD request: headers only, full content length.
fn write_head(stream: &mut TcpStream, len: usize) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
    )?;
    stream.flush()
}

/// Writes a full response with a body.
fn write_response(
    stream: &mut TcpStream,
    status: &str,
    body: &[u8],
    content_range: Option<&str>,
) -> std::io::Result<()> {
    write!(stream, "HTTP/1.1 {status}\r\nContent-Length: {}\r\n", body.len())?;

    if let Some(content_range) = content_range {
        write!(stream, "Content-Range: {content_range}\r\n")?;
    }

    write!(stream, "Connection: close\r\n\r\n")?;
    stream.write_all(body)?;
    stream.flush()
}
