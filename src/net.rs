//! Blocking HTTP(S) access for remote files.
//!
//! Every request runs synchronously from the caller's perspective and returns
//! the status code, headers, and body explicitly, since size discovery (via
//! `Content-Length`) and partial-content semantics (HTTP 206) are load-bearing
//! for the file layer. HTTP status codes are data here, not errors: the
//! caller decides which codes constitute a failure.

use std::collections::BTreeMap;

use reqwest::Method;
use tracing::debug;
use tracing::warn;

/// The `User-Agent` sent with every request.
const USER_AGENT: &str = "versatilefile";

/// The identifying header sent with every request alongside the user agent.
const CUSTOM_AGENT_HEADER: &str = "X-Custom-User-Agent";

/// The number of attempts made for requests that retry transient network
/// errors.
const RETRY_ATTEMPTS: u32 = 5;

/// HTTP headers as a name-to-value map with lowercased names.
pub type Headers = BTreeMap<String, String>;

/// An error related to a [`Client`].
#[derive(Debug)]
pub enum Error {
    /// The underlying HTTP client could not be built.
    Build(reqwest::Error),

    /// The proxy configuration was rejected.
    Proxy(reqwest::Error),

    /// A request failed with a network error after exhausting its retry
    /// attempts.
    Request {
        /// The requested URL.
        url: String,

        /// The number of attempts made.
        attempts: u32,

        /// The final network error.
        source: reqwest::Error,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Build(err) => write!(f, "building http client: {err}"),
            Error::Proxy(err) => write!(f, "invalid proxy configuration: {err}"),
            Error::Request {
                url,
                attempts,
                source,
            } => {
                write!(f, "request to `{url}` failed after {attempts} attempt(s): {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Build(err) | Error::Proxy(err) | Error::Request { source: err, .. } => Some(err),
        }
    }
}

/// A completed server response: status code, headers, and body.
#[derive(Clone, Debug, Default)]
pub struct ServerReply {
    /// The HTTP status code.
    pub status: u16,

    /// The response headers, with lowercased names.
    pub headers: Headers,

    /// The response body.
    pub body: Vec<u8>,
}

impl ServerReply {
    /// Parses the `Content-Length` header, if present and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }
}

/// An explicit proxy through which all requests are routed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Proxy {
    /// The proxy host.
    host: String,

    /// The proxy port.
    port: u16,

    /// The proxy username, if authentication is required.
    username: Option<String>,

    /// The proxy password, if authentication is required.
    password: Option<String>,
}

impl Proxy {
    /// Creates a proxy without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attaches basic-auth credentials to the proxy.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Resolves a proxy from a key-value settings lookup.
    ///
    /// The lookup is consulted for the optional keys `proxy_host`,
    /// `proxy_port`, `proxy_user`, and `proxy_password`; an absent key is not
    /// an error. [`None`] is returned when no usable host/port pair is
    /// configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use versatilefile::net::Proxy;
    ///
    /// let proxy = Proxy::from_settings(|key| match key {
    ///     "proxy_host" => Some(String::from("proxy.internal")),
    ///     "proxy_port" => Some(String::from("3128")),
    ///     _ => None,
    /// });
    ///
    /// assert_eq!(proxy, Some(Proxy::new("proxy.internal", 3128)));
    /// ```
    pub fn from_settings(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let host = lookup("proxy_host")?;
        let port = lookup("proxy_port")?.trim().parse().ok()?;

        let mut proxy = Proxy::new(host, port);

        if let (Some(username), Some(password)) = (lookup("proxy_user"), lookup("proxy_password")) {
            proxy = proxy.with_credentials(username, password);
        }

        Some(proxy)
    }

    /// The URL the underlying client routes requests through.
    fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Configuration for a [`Client`].
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// An explicit proxy override. [`None`] means no proxy.
    pub proxy: Option<Proxy>,

    /// Whether to accept invalid TLS certificates (e.g., self-signed
    /// certificates on internal servers).
    ///
    /// This is an explicit opt-in; the default is to validate certificates.
    pub accept_invalid_certs: bool,
}

/// A blocking HTTP(S) client for HEAD, GET, and ranged GET requests.
#[derive(Debug)]
pub struct Client {
    /// The underlying `reqwest` client.
    inner: reqwest::blocking::Client,
}

impl Client {
    /// Creates a client from a configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(proxy) = &config.proxy {
            let mut proxy_config = reqwest::Proxy::all(proxy.url()).map_err(Error::Proxy)?;

            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                proxy_config = proxy_config.basic_auth(username, password);
            }

            builder = builder.proxy(proxy_config);
        }

        let inner = builder.build().map_err(Error::Build)?;

        Ok(Self { inner })
    }

    /// Performs a HEAD request.
    ///
    /// Used purely for existence checks and `Content-Length` discovery; the
    /// body of the reply is always empty.
    pub fn head(&self, url: &str, extra_headers: &Headers) -> Result<ServerReply, Error> {
        self.execute(Method::HEAD, url, extra_headers, 1)
    }

    /// Performs a whole-body GET request.
    ///
    /// Transient network errors (timeouts, connection failures, interrupted
    /// bodies) are retried up to five attempts before the error is surfaced.
    pub fn get(&self, url: &str, extra_headers: &Headers) -> Result<ServerReply, Error> {
        self.execute(Method::GET, url, extra_headers, RETRY_ATTEMPTS)
    }

    /// Performs a GET request for the byte range `start..=end`.
    ///
    /// An open-ended range is requested by passing [`None`] for `end`. The
    /// reply carries whatever status the server chose; callers should accept
    /// `200` (whole body) and `206` (partial content) only.
    pub fn get_range(&self, url: &str, start: u64, end: Option<u64>) -> Result<ServerReply, Error> {
        let mut headers = Headers::new();
        headers.insert(String::from("Range"), range_header(start, end));

        self.execute(Method::GET, url, &headers, RETRY_ATTEMPTS)
    }

    /// Issues a request, retrying transient network errors up to `attempts`
    /// times.
    fn execute(
        &self,
        method: Method,
        url: &str,
        extra_headers: &Headers,
        attempts: u32,
    ) -> Result<ServerReply, Error> {
        for attempt in 1..=attempts {
            let mut request = self
                .inner
                .request(method.clone(), url)
                .header(CUSTOM_AGENT_HEADER, USER_AGENT);

            for (name, value) in extra_headers {
                request = request.header(name.as_str(), value.as_str());
            }

            debug!(%method, url, attempt, "issuing http request");

            let result = request.send().and_then(|response| {
                let status = response.status().as_u16();

                let mut headers = Headers::new();
                for (name, value) in response.headers() {
                    if let Ok(value) = value.to_str() {
                        headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
                    }
                }

                let body = response.bytes()?.to_vec();

                Ok(ServerReply {
                    status,
                    headers,
                    body,
                })
            });

            match result {
                Ok(reply) => {
                    debug!(status = reply.status, bytes = reply.body.len(), "http reply");
                    return Ok(reply);
                }
                Err(err) if is_transient(&err) && attempt < attempts => {
                    warn!(url, attempt, %err, "transient network error, retrying");
                }
                Err(err) => {
                    return Err(Error::Request {
                        url: url.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }

        unreachable!("the final attempt either returns a reply or an error")
    }
}

/// Returns whether a network error is worth retrying.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body()
}

/// Formats a `Range` header value for the byte range `start..=end`.
fn range_header(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={start}-{end}"),
        None => format!("bytes={start}-"),
    }
}
