//! The versatile file reader.
//!
//! A [`VersatileFile`] serves bytes and lines from one of four backing
//! stores, chosen once at construction from the source string: a local
//! plain-text file, a local gzip-compressed file, a remote file accessed over
//! HTTP(S) byte-range requests, or a remote gzip-compressed file decompressed
//! on the fly as compressed chunks arrive.
//!
//! All four variants sit behind a single open/read/read_line/seek/size
//! contract. The remote variants own an internal chunk buffer and cursor
//! bookkeeping: the logical cursor position seen by the caller lags the
//! number of bytes fetched from the network, since fetched-but-unconsumed
//! bytes sit in the buffer.
//!
//! A reader is not safe to share across threads: it owns mutable cursor,
//! buffer, and decompression state with no internal locking. Parallel reads
//! of the same source require separate readers.

use std::fs;
use std::io;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::gzip;
use crate::gzip::StreamDecompressor;
use crate::net;
use crate::net::Client;
use crate::net::ClientConfig;
use crate::net::Headers;
use crate::net::Proxy;
use crate::net::ServerReply;
use crate::source::Mode;

/// The default upper bound on the number of bytes requested per ranged GET.
///
/// Large enough to amortize request overhead for whole-file scans while still
/// bounding peak memory per request.
const DEFAULT_CHUNK_SIZE: u64 = 200 * 1024 * 1024;

/// The default capacity of the local gzip line buffer.
const DEFAULT_GZ_BUFFER_CAPACITY: usize = 64 * 1024;

/// HTTP status codes accepted for content-bearing replies.
const ACCEPTED_STATUS: [u16; 2] = [200, 206];

/// An error related to a [`VersatileFile`].
#[derive(Debug)]
pub enum Error {
    /// An I/O error from a local backing store.
    Io(io::Error),

    /// A network error from the HTTP range client.
    Net(net::Error),

    /// A streaming decompression error.
    Gzip(gzip::Error),

    /// The server answered with a status code other than `200` or `206`.
    Status {
        /// The requested URL.
        url: String,

        /// The status code the server answered with.
        status: u16,
    },

    /// A malformed payload, from a local gzip stream or from a server reply
    /// that cannot be reconciled with the bytes already read.
    Parse(String),

    /// The operation is intentionally unsupported for the current mode.
    NotSupported {
        /// The operation that was attempted.
        operation: &'static str,

        /// The mode of the reader.
        mode: Mode,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o error: {err}"),
            Error::Net(err) => write!(f, "network error: {err}"),
            Error::Gzip(err) => write!(f, "gzip error: {err}"),
            Error::Status { url, status } => {
                write!(f, "unexpected HTTP status {status} for `{url}`")
            }
            Error::Parse(reason) => write!(f, "parse error: {reason}"),
            Error::NotSupported { operation, mode } => {
                write!(f, "`{operation}` is not supported for a {mode} source")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Net(err) => Some(err),
            Error::Gzip(err) => Some(err),
            _ => None,
        }
    }
}

/// Existence and size of a remote resource, resolved once at construction
/// via a HEAD request and cached thereafter.
#[derive(Clone, Copy, Debug)]
struct RemoteInfo {
    /// The `Content-Length` reported by the server, or `0` when the HEAD
    /// request failed or the resource does not exist.
    size: u64,

    /// Whether the HEAD request succeeded.
    exists: bool,
}

/// An accumulating byte buffer with a read index into it.
///
/// The consumed prefix is dropped once the read index passes the halfway
/// point, bounding memory growth without paying for compaction on every
/// read.
#[derive(Debug, Default)]
struct ChunkBuffer {
    /// The buffered bytes.
    data: Vec<u8>,

    /// The index of the first unconsumed byte. Invariant:
    /// `read_pos <= data.len()`.
    read_pos: usize,
}

impl ChunkBuffer {
    /// The number of unconsumed bytes.
    fn available(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Appends freshly fetched bytes.
    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Extracts the next line (including its terminator) if a newline is
    /// buffered.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let relative = self.data[self.read_pos..]
            .iter()
            .position(|&byte| byte == b'\n')?;

        let end = self.read_pos + relative + 1;
        let line = self.data[self.read_pos..end].to_vec();
        self.read_pos = end;

        Some(line)
    }

    /// Extracts up to `max` unconsumed bytes.
    fn take(&mut self, max: usize) -> Vec<u8> {
        let take = max.min(self.available());
        let out = self.data[self.read_pos..self.read_pos + take].to_vec();
        self.read_pos += take;
        out
    }

    /// Extracts everything that remains.
    fn take_tail(&mut self) -> Vec<u8> {
        self.take(self.available())
    }

    /// Returns a copy of everything that remains without consuming it.
    fn peek_tail(&self) -> Vec<u8> {
        self.data[self.read_pos..].to_vec()
    }

    /// Drops the consumed prefix once more than half the buffer has been
    /// read.
    fn compact(&mut self) {
        if self.read_pos > 0 && self.read_pos > self.data.len() / 2 {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }

    /// Resets the buffer to empty.
    fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}

/// Cursor state for a remote plain source.
#[derive(Debug, Default)]
struct RemoteState {
    /// The fetched-but-unconsumed bytes.
    buf: ChunkBuffer,

    /// The logical position as seen by the caller.
    cursor: u64,

    /// The number of bytes fetched from the network so far.
    fetched: u64,

    /// Whether no more remote bytes remain to fetch.
    finished: bool,
}

/// Cursor and decompression state for a remote gzip source.
#[derive(Debug)]
struct RemoteGzState {
    /// The decompressed-but-unconsumed bytes.
    buf: ChunkBuffer,

    /// The logical (decompressed) position as seen by the caller.
    cursor: u64,

    /// The number of compressed bytes fetched from the network so far.
    fetched: u64,

    /// The streaming decompressor fed with fetched chunks.
    decoder: StreamDecompressor,

    /// Whether all compressed input has been consumed and only the
    /// decompressed tail remains to drain.
    finished: bool,
}

impl RemoteGzState {
    /// Creates fresh state positioned at the start of the stream.
    fn new() -> Self {
        Self {
            buf: ChunkBuffer::default(),
            cursor: 0,
            fetched: 0,
            decoder: StreamDecompressor::new(),
            finished: false,
        }
    }
}

/// State for a local gzip source.
#[derive(Debug)]
struct LocalGzState {
    /// The line-oriented decompressing reader.
    reader: BufReader<MultiGzDecoder<fs::File>>,

    /// The logical (decompressed) position as seen by the caller.
    cursor: u64,
}

/// The mode-specific backing store of an open reader.
#[derive(Debug)]
enum Backend {
    /// Not open.
    Closed,

    /// A local plain-text file.
    Local(BufReader<fs::File>),

    /// A local gzip-compressed file.
    LocalGz(LocalGzState),

    /// A remote file read via byte-range requests.
    Remote(RemoteState),

    /// A remote gzip-compressed file read via byte-range requests through
    /// the streaming decompressor.
    RemoteGz(RemoteGzState),
}

/// A builder for a [`VersatileFile`].
#[derive(Debug)]
pub struct Builder {
    /// The source string.
    source: String,

    /// The HTTP client configuration for remote modes.
    config: ClientConfig,

    /// The upper bound on bytes requested per ranged GET.
    chunk_size: u64,

    /// The capacity of the local gzip line buffer.
    gz_buffer_capacity: usize,
}

impl Builder {
    /// Creates a builder for a source string.
    fn new(source: String) -> Self {
        Self {
            source,
            config: ClientConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            gz_buffer_capacity: DEFAULT_GZ_BUFFER_CAPACITY,
        }
    }

    /// Routes all remote requests through the given proxy.
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Accepts invalid TLS certificates on remote requests.
    ///
    /// Off by default; turn this on only for internal servers with
    /// self-signed certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.accept_invalid_certs = accept;
        self
    }

    /// Bounds the number of bytes requested per ranged GET.
    ///
    /// The sequence of bytes and lines a reader produces is independent of
    /// this value; it only trades request overhead against peak memory.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    pub fn chunk_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "the fetch chunk size must be positive");
        self.chunk_size = bytes;
        self
    }

    /// Sets the capacity of the local gzip line buffer.
    pub fn gz_buffer_capacity(mut self, bytes: usize) -> Self {
        self.gz_buffer_capacity = bytes;
        self
    }

    /// Builds the reader.
    ///
    /// For remote modes, this performs the HEAD request that resolves
    /// existence and size; a failing HEAD (including a `404`) yields a reader
    /// whose [`exists()`](VersatileFile::exists) is `false` and whose
    /// [`size()`](VersatileFile::size) is `0`, not an error. The reader still
    /// needs [`open()`](VersatileFile::open) before reading.
    pub fn build(self) -> Result<VersatileFile, Error> {
        let mode = Mode::detect(&self.source);

        let (client, remote) = if mode.is_remote() {
            let client = Client::new(&self.config).map_err(Error::Net)?;
            let remote = resolve_remote_info(&client, &self.source);
            (Some(client), Some(remote))
        } else {
            (None, None)
        };

        Ok(VersatileFile {
            source: self.source,
            mode,
            chunk_size: self.chunk_size,
            gz_buffer_capacity: self.gz_buffer_capacity,
            client,
            remote,
            backend: Backend::Closed,
        })
    }
}

/// A unified reader over local, remote, and gzip-compressed sources.
///
/// # Examples
///
/// Reading a local file line by line:
///
/// ```no_run
/// use versatilefile::VersatileFile;
///
/// let mut file = VersatileFile::new("variants.tsv.gz")?;
/// file.open()?;
///
/// while let Some(line) = file.read_line(true)? {
///     println!("{}", String::from_utf8_lossy(&line));
/// }
///
/// # Ok::<(), versatilefile::file::Error>(())
/// ```
///
/// Reading a remote file through a proxy:
///
/// ```no_run
/// use versatilefile::VersatileFile;
/// use versatilefile::net::Proxy;
///
/// let mut file = VersatileFile::builder("https://example.com/regions.bed")
///     .proxy(Proxy::new("proxy.internal", 3128))
///     .build()?;
///
/// assert!(file.exists());
/// file.open()?;
/// let content = file.read_all()?;
///
/// # Ok::<(), versatilefile::file::Error>(())
/// ```
#[derive(Debug)]
pub struct VersatileFile {
    /// The source string the reader was constructed from.
    source: String,

    /// The backing store strategy, fixed at construction.
    mode: Mode,

    /// The upper bound on bytes requested per ranged GET.
    chunk_size: u64,

    /// The capacity of the local gzip line buffer.
    gz_buffer_capacity: usize,

    /// The HTTP client (remote modes only).
    client: Option<Client>,

    /// Cached existence/size from the construction-time HEAD request
    /// (remote modes only).
    remote: Option<RemoteInfo>,

    /// The mode-specific backing store.
    backend: Backend,
}

impl VersatileFile {
    /// Creates a builder for a source string.
    pub fn builder(source: impl Into<String>) -> Builder {
        Builder::new(source.into())
    }

    /// Creates a reader with the default configuration.
    ///
    /// Equivalent to `VersatileFile::builder(source).build()`.
    pub fn new(source: impl Into<String>) -> Result<Self, Error> {
        Self::builder(source).build()
    }

    /// The source string the reader was constructed from.
    pub fn file_name(&self) -> &str {
        &self.source
    }

    /// The backing store strategy of this reader.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns whether the reader is open.
    pub fn is_open(&self) -> bool {
        !matches!(self.backend, Backend::Closed)
    }

    /// Opens the reader for reading, resetting all cursor and buffer state.
    ///
    /// For remote modes this does not re-issue the HEAD request: existence
    /// and size were resolved at construction. Opening an already-open reader
    /// restarts it from the beginning.
    pub fn open(&mut self) -> Result<(), Error> {
        self.backend = match self.mode {
            Mode::Local => {
                let file = fs::File::open(&self.source).map_err(Error::Io)?;
                Backend::Local(BufReader::new(file))
            }
            Mode::LocalGz => {
                let file = fs::File::open(&self.source).map_err(Error::Io)?;
                Backend::LocalGz(LocalGzState {
                    reader: BufReader::with_capacity(
                        self.gz_buffer_capacity,
                        MultiGzDecoder::new(file),
                    ),
                    cursor: 0,
                })
            }
            Mode::Url => Backend::Remote(RemoteState::default()),
            Mode::UrlGz => Backend::RemoteGz(RemoteGzState::new()),
        };

        Ok(())
    }

    /// Sets the capacity of the local gzip line buffer.
    ///
    /// # Panics
    ///
    /// Panics if the reader is open: the capacity is configurable only
    /// before opening.
    pub fn set_gz_buffer_capacity(&mut self, bytes: usize) {
        assert!(
            !self.is_open(),
            "the gzip buffer capacity cannot be changed while `{}` is open",
            self.source
        );

        self.gz_buffer_capacity = bytes;
    }

    /// Returns whether the source can be read at all.
    ///
    /// For local modes, the filesystem is consulted without disturbing any
    /// open handle. For remote modes, this reflects the size resolved at
    /// construction.
    pub fn is_readable(&self) -> bool {
        match self.mode {
            Mode::Local | Mode::LocalGz => fs::metadata(&self.source)
                .map(|metadata| metadata.is_file())
                .unwrap_or(false),
            Mode::Url | Mode::UrlGz => self.remote_info().size > 0,
        }
    }

    /// Returns whether the source exists.
    ///
    /// Local modes check the filesystem on every call. Remote modes return
    /// the cached result of the construction-time HEAD request; any HEAD
    /// failure counts as "does not exist" by design.
    pub fn exists(&self) -> bool {
        match self.mode {
            Mode::Local | Mode::LocalGz => Path::new(&self.source).exists(),
            Mode::Url | Mode::UrlGz => self.remote_info().exists,
        }
    }

    /// Reads up to `maxlen` bytes.
    ///
    /// Remote modes pull successive byte ranges of at most the configured
    /// chunk size until `maxlen` bytes are collected or the source is
    /// exhausted. Not supported for local gzip sources, which are
    /// line-oriented only.
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn read(&mut self, maxlen: usize) -> Result<Vec<u8>, Error> {
        self.assert_open("read");

        let chunk_size = self.chunk_size;
        let info = self.remote;

        match &mut self.backend {
            Backend::Local(reader) => {
                let mut out = Vec::new();
                reader
                    .take(maxlen as u64)
                    .read_to_end(&mut out)
                    .map_err(Error::Io)?;
                Ok(out)
            }
            Backend::LocalGz(_) => Err(Error::NotSupported {
                operation: "read",
                mode: self.mode,
            }),
            Backend::Remote(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = info.expect("remote mode implies resolved info").size;

                while state.buf.available() < maxlen && !state.finished {
                    state.buf.compact();
                    fetch_plain_chunk(client, &self.source, chunk_size, size, state)?;
                }

                let out = state.buf.take(maxlen);
                state.cursor += out.len() as u64;
                Ok(out)
            }
            Backend::RemoteGz(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = info.expect("remote mode implies resolved info").size;

                while state.buf.available() < maxlen && !state.finished {
                    state.buf.compact();
                    fetch_gz_chunk(client, &self.source, chunk_size, size, state)?;
                }

                let out = state.buf.take(maxlen);
                state.cursor += out.len() as u64;
                Ok(out)
            }
            // `assert_open` rules out `Closed`.
            Backend::Closed => unreachable!(),
        }
    }

    /// Reads everything the source still holds.
    ///
    /// Remote modes continue from the current position: the buffered tail is
    /// combined with the rest of the body, fetched in one open-ended range
    /// request. For remote gzip sources the remainder is decompressed into
    /// the internal buffer first, so subsequent line reads drain
    /// already-decompressed content.
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn read_all(&mut self) -> Result<Vec<u8>, Error> {
        self.assert_open("read_all");

        if self.mode == Mode::LocalGz {
            // The line-oriented gzip reader has no whole-file primitive, so
            // concatenate lines until the stream ends.
            let mut out = Vec::new();

            while let Some(line) = self.read_line(false)? {
                out.extend_from_slice(&line);
            }

            return Ok(out);
        }

        match &mut self.backend {
            Backend::Local(reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).map_err(Error::Io)?;
                Ok(out)
            }
            Backend::Remote(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = self.remote.expect("remote mode implies resolved info").size;

                let mut out = state.buf.take_tail();

                if !state.finished && state.fetched < size {
                    let reply = client
                        .get_range(&self.source, state.fetched, None)
                        .map_err(Error::Net)?;
                    expect_content_status(&self.source, reply.status)?;

                    let body = range_reply_body(&self.source, reply, state.fetched)?;
                    state.fetched += body.len() as u64;
                    out.extend_from_slice(&body);
                }

                state.cursor += out.len() as u64;
                state.finished = true;

                Ok(out)
            }
            Backend::RemoteGz(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = self.remote.expect("remote mode implies resolved info").size;

                if !state.finished && state.fetched < size {
                    let reply = client
                        .get_range(&self.source, state.fetched, None)
                        .map_err(Error::Net)?;
                    expect_content_status(&self.source, reply.status)?;

                    let body = range_reply_body(&self.source, reply, state.fetched)?;
                    state.fetched += body.len() as u64;

                    let decompressed = state.decoder.feed(&body).map_err(Error::Gzip)?;
                    state.buf.push(&decompressed);
                }

                state.finished = true;

                Ok(state.buf.peek_tail())
            }
            // `LocalGz` returned early; `assert_open` rules out `Closed`.
            Backend::LocalGz(_) | Backend::Closed => unreachable!(),
        }
    }

    /// Reads the next line.
    ///
    /// The returned line includes its terminator unless `trim_line_endings`
    /// is set, in which case trailing `\r` and `\n` bytes are stripped
    /// repeatedly. Returns [`None`] once the source is exhausted — and keeps
    /// returning [`None`] on every subsequent call.
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn read_line(&mut self, trim_line_endings: bool) -> Result<Option<Vec<u8>>, Error> {
        self.assert_open("read_line");

        let chunk_size = self.chunk_size;
        let info = self.remote;

        let line = match &mut self.backend {
            Backend::Local(reader) => {
                let mut line = Vec::new();
                let read = reader.read_until(b'\n', &mut line).map_err(Error::Io)?;

                match read {
                    0 => None,
                    _ => Some(line),
                }
            }
            Backend::LocalGz(state) => {
                let mut line = Vec::new();
                let read = state
                    .reader
                    .read_until(b'\n', &mut line)
                    .map_err(local_gz_error)?;

                match read {
                    0 => None,
                    _ => {
                        state.cursor += read as u64;
                        Some(line)
                    }
                }
            }
            Backend::Remote(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = info.expect("remote mode implies resolved info").size;

                loop {
                    if let Some(line) = state.buf.take_line() {
                        state.cursor += line.len() as u64;
                        break Some(line);
                    }

                    if state.finished || state.fetched >= size {
                        match state.buf.available() {
                            0 => break None,
                            _ => {
                                let tail = state.buf.take_tail();
                                state.cursor += tail.len() as u64;
                                break Some(tail);
                            }
                        }
                    }

                    state.buf.compact();
                    fetch_plain_chunk(client, &self.source, chunk_size, size, state)?;
                }
            }
            Backend::RemoteGz(state) => {
                let client = self.client.as_ref().expect("remote mode implies a client");
                let size = info.expect("remote mode implies resolved info").size;

                loop {
                    if let Some(line) = state.buf.take_line() {
                        state.cursor += line.len() as u64;
                        break Some(line);
                    }

                    if state.finished {
                        match state.buf.available() {
                            0 => break None,
                            _ => {
                                let tail = state.buf.take_tail();
                                state.cursor += tail.len() as u64;
                                break Some(tail);
                            }
                        }
                    }

                    state.buf.compact();
                    fetch_gz_chunk(client, &self.source, chunk_size, size, state)?;
                }
            }
            // `assert_open` rules out `Closed`.
            Backend::Closed => unreachable!(),
        };

        match line {
            Some(line) if trim_line_endings => Ok(Some(trim_endings(line))),
            other => Ok(other),
        }
    }

    /// Returns whether the source is exhausted.
    ///
    /// Once true, this stays true, and further [`read_line()`] calls return
    /// [`None`] without error.
    ///
    /// [`read_line()`]: VersatileFile::read_line
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn at_end(&mut self) -> bool {
        self.assert_open("at_end");

        match &mut self.backend {
            Backend::Local(reader) => reader.fill_buf().map(|buf| buf.is_empty()).unwrap_or(true),
            Backend::LocalGz(state) => state
                .reader
                .fill_buf()
                .map(|buf| buf.is_empty())
                .unwrap_or(true),
            Backend::Remote(state) => {
                let size = self.remote.expect("remote mode implies resolved info").size;

                // The cursor check is a defensive double check against
                // bookkeeping drift.
                ((state.finished || state.fetched >= size) && state.buf.available() == 0)
                    || state.cursor >= size
            }
            Backend::RemoteGz(state) => state.finished && state.buf.available() == 0,
            // `assert_open` rules out `Closed`.
            Backend::Closed => unreachable!(),
        }
    }

    /// The logical position of the caller within the (decompressed) content.
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn pos(&mut self) -> Result<u64, Error> {
        self.assert_open("pos");

        match &mut self.backend {
            Backend::Local(reader) => reader.stream_position().map_err(Error::Io),
            Backend::LocalGz(state) => Ok(state.cursor),
            Backend::Remote(state) => Ok(state.cursor),
            Backend::RemoteGz(state) => Ok(state.cursor),
            // `assert_open` rules out `Closed`.
            Backend::Closed => unreachable!(),
        }
    }

    /// Seeks to a byte position.
    ///
    /// Local plain files and remote plain files support arbitrary positions;
    /// for remote plain files the cursor and fetch position are reset and the
    /// buffer cleared, so subsequent range fetches resume at `pos`. Gzip
    /// modes support only position `0`, implemented as close-and-reopen;
    /// every other position is [`Error::NotSupported`].
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn seek(&mut self, pos: u64) -> Result<(), Error> {
        self.assert_open("seek");

        if self.mode.is_gz() {
            return match pos {
                0 => {
                    self.close();
                    self.open()
                }
                _ => Err(Error::NotSupported {
                    operation: "seek to a non-zero position",
                    mode: self.mode,
                }),
            };
        }

        match &mut self.backend {
            Backend::Local(reader) => {
                reader.seek(SeekFrom::Start(pos)).map_err(Error::Io)?;
                Ok(())
            }
            Backend::Remote(state) => {
                let size = self.remote.expect("remote mode implies resolved info").size;

                state.buf.clear();
                state.cursor = pos;
                state.fetched = pos;
                state.finished = pos >= size;

                Ok(())
            }
            // Gzip modes returned early; `assert_open` rules out `Closed`.
            Backend::LocalGz(_) | Backend::RemoteGz(_) | Backend::Closed => unreachable!(),
        }
    }

    /// The size of the source in bytes.
    ///
    /// For remote modes this is the `Content-Length` resolved at
    /// construction. For local gzip sources the decompressed size is unknown
    /// without decompressing everything, and the compressed size would be
    /// misleading, so the operation is refused.
    ///
    /// # Panics
    ///
    /// Panics if the reader is not open.
    pub fn size(&mut self) -> Result<u64, Error> {
        self.assert_open("size");

        match &self.backend {
            Backend::Local(reader) => {
                let metadata = reader.get_ref().metadata().map_err(Error::Io)?;
                Ok(metadata.len())
            }
            Backend::LocalGz(_) => Err(Error::NotSupported {
                operation: "size",
                mode: self.mode,
            }),
            Backend::Remote(_) | Backend::RemoteGz(_) => Ok(self.remote_info().size),
            // `assert_open` rules out `Closed`.
            Backend::Closed => unreachable!(),
        }
    }

    /// Closes the reader, releasing the local handle, the decompression
    /// state, and all buffers, and resetting every cursor to its
    /// construction-time default.
    ///
    /// Closing is unconditional across modes, and a closed reader can be
    /// [`open()`](VersatileFile::open)ed again to restart from the beginning.
    pub fn close(&mut self) {
        self.backend = Backend::Closed;
    }

    /// The cached remote info.
    fn remote_info(&self) -> RemoteInfo {
        self.remote.expect("remote mode implies resolved info")
    }

    /// Asserts that the reader is open; calling a read operation on a closed
    /// reader is a defect in the calling code.
    fn assert_open(&self, operation: &str) {
        assert!(
            self.is_open(),
            "`{operation}` called on `{}` before `open()`",
            self.source
        );
    }
}

/// Resolves existence and size for a remote source with a HEAD request.
///
/// Any failure — network error or non-success status — resolves to "does not
/// exist" with size zero rather than an error, by design.
fn resolve_remote_info(client: &Client, url: &str) -> RemoteInfo {
    match client.head(url, &Headers::new()) {
        Ok(reply) if (200..300).contains(&reply.status) => RemoteInfo {
            size: reply.content_length().unwrap_or(0),
            exists: true,
        },
        Ok(reply) => {
            tracing::debug!(url, status = reply.status, "remote source not available");
            RemoteInfo {
                size: 0,
                exists: false,
            }
        }
        Err(err) => {
            tracing::warn!(url, %err, "HEAD request failed, treating source as absent");
            RemoteInfo {
                size: 0,
                exists: false,
            }
        }
    }
}

/// Fetches the next bounded byte range of a remote plain source into its
/// buffer.
fn fetch_plain_chunk(
    client: &Client,
    url: &str,
    chunk_size: u64,
    size: u64,
    state: &mut RemoteState,
) -> Result<(), Error> {
    if state.fetched >= size {
        state.finished = true;
        return Ok(());
    }

    let len = (size - state.fetched).min(chunk_size);
    let end = state.fetched + len - 1;

    let reply = client
        .get_range(url, state.fetched, Some(end))
        .map_err(Error::Net)?;
    expect_content_status(url, reply.status)?;

    let body = range_reply_body(url, reply, state.fetched)?;

    if body.is_empty() {
        // An empty range reply means there is nothing left to fetch.
        state.finished = true;
        return Ok(());
    }

    state.fetched += body.len() as u64;
    state.buf.push(&body);

    if state.fetched >= size {
        state.finished = true;
    }

    Ok(())
}

/// Fetches the next bounded compressed byte range of a remote gzip source and
/// feeds it through the streaming decompressor into the buffer.
fn fetch_gz_chunk(
    client: &Client,
    url: &str,
    chunk_size: u64,
    size: u64,
    state: &mut RemoteGzState,
) -> Result<(), Error> {
    if state.fetched >= size {
        state.finished = true;
        return Ok(());
    }

    let len = (size - state.fetched).min(chunk_size);
    let end = state.fetched + len - 1;

    let reply = client
        .get_range(url, state.fetched, Some(end))
        .map_err(Error::Net)?;
    expect_content_status(url, reply.status)?;

    let body = range_reply_body(url, reply, state.fetched)?;

    if body.is_empty() {
        state.finished = true;
        return Ok(());
    }

    state.fetched += body.len() as u64;

    let decompressed = state.decoder.feed(&body).map_err(Error::Gzip)?;
    state.buf.push(&decompressed);

    if state.fetched >= size {
        state.finished = true;
    }

    Ok(())
}

/// Extracts the payload of a ranged reply beginning at `offset`.
///
/// A `206` body already starts at the requested offset. A `200` reply comes
/// from a server that ignored the `Range` header and answered with the whole
/// resource, so the already-read prefix is sliced off; a whole-body reply
/// shorter than that prefix cannot be reconciled with the bytes already
/// served.
fn range_reply_body(url: &str, reply: ServerReply, offset: u64) -> Result<Vec<u8>, Error> {
    if reply.status != 200 || offset == 0 {
        return Ok(reply.body);
    }

    if (reply.body.len() as u64) < offset {
        return Err(Error::Parse(format!(
            "`{url}` ignored a range request and returned {} byte(s), fewer than the {offset} already read",
            reply.body.len()
        )));
    }

    Ok(reply.body[offset as usize..].to_vec())
}

/// Fails with [`Error::Status`] unless the status code carries content.
fn expect_content_status(url: &str, status: u16) -> Result<(), Error> {
    if ACCEPTED_STATUS.contains(&status) {
        return Ok(());
    }

    Err(Error::Status {
        url: url.to_string(),
        status,
    })
}

/// Maps an I/O error from the local gzip reader: a malformed stream is a
/// parse error, anything else stays an I/O error.
fn local_gz_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Error::Parse(err.to_string()),
        _ => Error::Io(err),
    }
}

/// Strips trailing `\r` and `\n` bytes repeatedly.
fn trim_endings(mut line: Vec<u8>) -> Vec<u8> {
    while line
        .last()
        .is_some_and(|byte| *byte == b'\n' || *byte == b'\r')
    {
        line.pop();
    }

    line
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempdir::TempDir;

    use super::*;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn write_gz_file(dir: &TempDir, name: &str, content: &[u8]) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        write_file(dir, name, &encoder.finish().unwrap())
    }

    #[test]
    fn local_lines_without_trailing_newline() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "three.txt", b"a\nb\nc");

        let mut file = VersatileFile::new(path).unwrap();
        assert_eq!(file.mode(), Mode::Local);
        file.open().unwrap();

        assert_eq!(file.read_line(true).unwrap(), Some(b"a".to_vec()));
        assert_eq!(file.read_line(true).unwrap(), Some(b"b".to_vec()));
        assert_eq!(file.read_line(true).unwrap(), Some(b"c".to_vec()));
        assert_eq!(file.read_line(true).unwrap(), None);
        assert!(file.at_end());
        assert!(file.at_end());
    }

    #[test]
    fn local_and_local_gz_yield_identical_lines() {
        let content = b"first line\nsecond line\r\nthird\n";

        let dir = TempDir::new("versatilefile").unwrap();
        let plain = write_file(&dir, "data.txt", content);
        let gz = write_gz_file(&dir, "data.txt.gz", content);

        let mut plain_file = VersatileFile::new(plain).unwrap();
        let mut gz_file = VersatileFile::new(gz).unwrap();
        assert_eq!(gz_file.mode(), Mode::LocalGz);

        plain_file.open().unwrap();
        gz_file.open().unwrap();

        loop {
            let a = plain_file.read_line(true).unwrap();
            let b = gz_file.read_line(true).unwrap();
            assert_eq!(a, b);

            if a.is_none() {
                break;
            }
        }
    }

    #[test]
    fn untrimmed_lines_keep_their_terminators() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "crlf.txt", b"a\r\nb\n");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        assert_eq!(file.read_line(false).unwrap(), Some(b"a\r\n".to_vec()));
        assert_eq!(file.read_line(false).unwrap(), Some(b"b\n".to_vec()));
    }

    #[test]
    fn pathological_terminators_are_fully_trimmed() {
        assert_eq!(trim_endings(b"x\r\r\n\n".to_vec()), b"x");
        assert_eq!(trim_endings(b"\n".to_vec()), b"");
        assert_eq!(trim_endings(b"x".to_vec()), b"x");
    }

    #[test]
    fn local_read_and_read_all() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "bytes.bin", b"0123456789");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        assert_eq!(file.read(4).unwrap(), b"0123");
        assert_eq!(file.read_all().unwrap(), b"456789");
        assert!(file.at_end());
    }

    #[test]
    fn local_gz_read_all_concatenates_lines() {
        let content = b"alpha\nbeta\ngamma";

        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_gz_file(&dir, "data.gz", content);

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        assert_eq!(file.read_all().unwrap(), content);
    }

    #[test]
    fn local_gz_refuses_byte_reads_and_size() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_gz_file(&dir, "data.gz", b"content\n");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        assert!(matches!(
            file.read(16),
            Err(Error::NotSupported {
                operation: "read",
                ..
            })
        ));
        assert!(matches!(
            file.size(),
            Err(Error::NotSupported {
                operation: "size",
                ..
            })
        ));
    }

    #[test]
    fn gz_seek_to_zero_restarts_and_other_positions_fail() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_gz_file(&dir, "data.gz", b"one\ntwo\n");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        assert_eq!(file.read_line(true).unwrap(), Some(b"one".to_vec()));

        file.seek(0).unwrap();
        assert_eq!(file.read_line(true).unwrap(), Some(b"one".to_vec()));

        assert!(matches!(file.seek(1), Err(Error::NotSupported { .. })));
    }

    #[test]
    fn local_seek_supports_random_access() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "data.txt", b"0123456789");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        file.seek(5).unwrap();
        assert_eq!(file.read(2).unwrap(), b"56");
        assert_eq!(file.pos().unwrap(), 7);
    }

    #[test]
    fn local_size_and_existence() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "data.txt", b"0123456789");

        let mut file = VersatileFile::new(path.clone()).unwrap();
        assert!(file.exists());
        assert!(file.is_readable());

        file.open().unwrap();
        assert_eq!(file.size().unwrap(), 10);

        let mut absent = VersatileFile::new(format!("{path}.missing")).unwrap();
        assert!(!absent.exists());
        assert!(!absent.is_readable());
        assert!(absent.open().is_err());
    }

    #[test]
    fn close_then_reopen_restarts_from_the_beginning() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "data.txt", b"one\ntwo\n");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();
        assert_eq!(file.read_line(true).unwrap(), Some(b"one".to_vec()));

        file.close();
        assert!(!file.is_open());

        file.open().unwrap();
        assert_eq!(file.read_line(true).unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    #[should_panic(expected = "before `open()`")]
    fn reading_before_open_is_a_programming_error() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "data.txt", b"content\n");

        let mut file = VersatileFile::new(path).unwrap();
        let _ = file.read_line(true);
    }

    #[test]
    #[should_panic(expected = "cannot be changed")]
    fn resizing_the_gz_buffer_after_open_is_a_programming_error() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_gz_file(&dir, "data.gz", b"content\n");

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();
        file.set_gz_buffer_capacity(1024);
    }

    #[test]
    fn corrupt_local_gz_is_a_parse_error() {
        let dir = TempDir::new("versatilefile").unwrap();

        let mut bytes = {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(b"some content that compresses\n").unwrap();
            encoder.finish().unwrap()
        };

        // Corrupt the deflate stream past the header.
        let at = bytes.len() / 2;
        bytes[at] ^= 0xff;
        let path = write_file(&dir, "corrupt.gz", &bytes);

        let mut file = VersatileFile::new(path).unwrap();
        file.open().unwrap();

        let mut result = Ok(Some(Vec::new()));
        while matches!(result, Ok(Some(_))) {
            result = file.read_line(false);
        }

        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn chunk_buffer_compaction_preserves_content() {
        let mut buf = ChunkBuffer::default();
        buf.push(b"aaaa\nbbbb\ncccc\n");

        assert_eq!(buf.take_line(), Some(b"aaaa\n".to_vec()));
        assert_eq!(buf.take_line(), Some(b"bbbb\n".to_vec()));

        buf.compact();
        assert_eq!(buf.read_pos, 0);
        assert_eq!(buf.take_line(), Some(b"cccc\n".to_vec()));
        assert_eq!(buf.take_line(), None);
        assert_eq!(buf.available(), 0);
    }
}
