//! Streaming decompression of gzip data.
//!
//! The decompressor accepts compressed input in chunks of arbitrary size, as
//! they arrive from disk or from the network, and produces decompressed bytes
//! without ever requiring the whole compressed payload in memory. Gzip member
//! headers and trailers may be split across chunks, and multiple concatenated
//! members decompress to the concatenation of their contents.

use flate2::Decompress;
use flate2::FlushDecompress;
use flate2::Status;

/// The size of the fixed output buffer drained on each inflate call.
const OUT_CHUNK: usize = 64 * 1024;

/// The length of a gzip member trailer (CRC32 plus ISIZE).
const TRAILER_LEN: usize = 8;

/// The length of the fixed portion of a gzip member header.
const HEADER_LEN: usize = 10;

/// The `FHCRC` header flag.
const FHCRC: u8 = 0x02;

/// The `FEXTRA` header flag.
const FEXTRA: u8 = 0x04;

/// The `FNAME` header flag.
const FNAME: u8 = 0x08;

/// The `FCOMMENT` header flag.
const FCOMMENT: u8 = 0x10;

/// An error related to a [`StreamDecompressor`].
#[derive(Debug)]
pub enum Error {
    /// The inflate state machine reported an error.
    Inflate(flate2::DecompressError),

    /// A malformed gzip member header.
    Header(&'static str),

    /// The CRC32 recorded in a member trailer does not match the
    /// decompressed data.
    Checksum {
        /// The CRC32 recorded in the trailer.
        expected: u32,

        /// The CRC32 computed over the decompressed data.
        found: u32,
    },

    /// The size recorded in a member trailer does not match the decompressed
    /// data.
    Length {
        /// The size recorded in the trailer.
        expected: u32,

        /// The number of bytes actually decompressed (modulo 2^32).
        found: u32,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Inflate(err) => write!(f, "inflate error: {err}"),
            Error::Header(reason) => write!(f, "malformed gzip header: {reason}"),
            Error::Checksum { expected, found } => {
                write!(
                    f,
                    "gzip checksum mismatch: expected {expected:#010x}, found {found:#010x}"
                )
            }
            Error::Length { expected, found } => {
                write!(f, "gzip length mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// The position of the decompressor within the current gzip member.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Waiting for (the rest of) a member header.
    Header,

    /// Inflating the deflate stream of the current member.
    Body,

    /// Collecting the eight trailer bytes of the current member.
    Trailer,
}

/// A streaming, multi-member gzip decompressor.
///
/// Compressed bytes are pushed in via [`feed()`](StreamDecompressor::feed) in
/// chunks of any size; decompressed bytes come back out. When one member ends
/// and more input follows, the inflate state is reset in place and decoding
/// continues with the remaining bytes of the same chunk, so files produced by
/// concatenating independently-compressed members read back as one stream.
///
/// The inflate context is released when the decompressor is dropped,
/// regardless of whether a previous feed failed.
///
/// # Examples
///
/// ```
/// use std::io::Write as _;
///
/// use flate2::Compression;
/// use flate2::write::GzEncoder;
/// use versatilefile::gzip::StreamDecompressor;
///
/// let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
/// encoder.write_all(b"hello\n")?;
/// let compressed = encoder.finish()?;
///
/// let mut decompressor = StreamDecompressor::new();
/// let decompressed = decompressor.feed(&compressed)?;
///
/// assert_eq!(decompressed, b"hello\n");
/// assert!(decompressor.at_member_boundary());
///
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct StreamDecompressor {
    /// The raw deflate state machine. Gzip member headers and trailers are
    /// handled by this struct, not by the inflater.
    inflate: Decompress,

    /// Where we are within the current member.
    state: State,

    /// Compressed bytes received but not yet consumed.
    input: Vec<u8>,

    /// Trailer bytes collected so far for the current member.
    trailer: Vec<u8>,

    /// Running CRC32 of the decompressed bytes of the current member.
    crc: flate2::Crc,

    /// Scratch output buffer drained into the caller's buffer.
    scratch: Box<[u8; OUT_CHUNK]>,
}

impl StreamDecompressor {
    /// Creates a new decompressor positioned at the start of a gzip stream.
    pub fn new() -> Self {
        Self {
            inflate: Decompress::new(false),
            state: State::Header,
            input: Vec::new(),
            trailer: Vec::with_capacity(TRAILER_LEN),
            crc: flate2::Crc::new(),
            scratch: Box::new([0; OUT_CHUNK]),
        }
    }

    /// Pushes a chunk of compressed bytes into the decompressor and returns
    /// the bytes decompressed so far.
    ///
    /// The chunk may start or end anywhere: mid-header, mid-block, or
    /// mid-trailer. Bytes that cannot be decoded yet are retained and picked
    /// up by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<u8>, Error> {
        self.input.extend_from_slice(chunk);

        let mut out = Vec::new();

        loop {
            match self.state {
                State::Header => {
                    if self.input.is_empty() {
                        break;
                    }

                    match parse_member_header(&self.input)? {
                        Some(consumed) => {
                            self.input.drain(..consumed);
                            self.inflate.reset(false);
                            self.crc.reset();
                            self.state = State::Body;
                        }
                        // The rest of the header is in a later chunk.
                        None => break,
                    }
                }
                State::Body => {
                    let before_in = self.inflate.total_in();
                    let before_out = self.inflate.total_out();

                    let status = self
                        .inflate
                        .decompress(&self.input, &mut self.scratch[..], FlushDecompress::None)
                        .map_err(Error::Inflate)?;

                    let consumed = (self.inflate.total_in() - before_in) as usize;
                    let produced = (self.inflate.total_out() - before_out) as usize;

                    self.input.drain(..consumed);

                    if produced > 0 {
                        self.crc.update(&self.scratch[..produced]);
                        out.extend_from_slice(&self.scratch[..produced]);
                    }

                    match status {
                        Status::StreamEnd => {
                            self.trailer.clear();
                            self.state = State::Trailer;
                        }
                        Status::Ok | Status::BufError => {
                            if consumed == 0 && produced == 0 {
                                // The inflater needs input we don't have yet.
                                break;
                            }
                        }
                    }
                }
                State::Trailer => {
                    let take = (TRAILER_LEN - self.trailer.len()).min(self.input.len());
                    self.trailer.extend_from_slice(&self.input[..take]);
                    self.input.drain(..take);

                    if self.trailer.len() < TRAILER_LEN {
                        break;
                    }

                    self.check_trailer()?;
                    self.state = State::Header;
                }
            }
        }

        Ok(out)
    }

    /// Returns whether the decompressor sits cleanly between gzip members
    /// with no compressed bytes pending.
    ///
    /// When all input has been fed, this indicates that the stream ended on a
    /// complete member rather than being truncated mid-member.
    pub fn at_member_boundary(&self) -> bool {
        self.state == State::Header && self.input.is_empty()
    }

    /// Validates the collected trailer against the decompressed member data.
    ///
    /// Only called once all eight trailer bytes are collected.
    fn check_trailer(&self) -> Result<(), Error> {
        let crc = u32::from_le_bytes([
            self.trailer[0],
            self.trailer[1],
            self.trailer[2],
            self.trailer[3],
        ]);
        let length = u32::from_le_bytes([
            self.trailer[4],
            self.trailer[5],
            self.trailer[6],
            self.trailer[7],
        ]);

        if crc != self.crc.sum() {
            return Err(Error::Checksum {
                expected: crc,
                found: self.crc.sum(),
            });
        }

        if length != self.crc.amount() {
            return Err(Error::Length {
                expected: length,
                found: self.crc.amount(),
            });
        }

        Ok(())
    }
}

impl Default for StreamDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecompressor")
            .field("state", &self.state)
            .field("pending_input", &self.input.len())
            .finish()
    }
}

/// Attempts to parse one gzip member header at the start of `input`.
///
/// Returns the number of bytes the header occupies, or [`None`] if the header
/// continues beyond the available input.
fn parse_member_header(input: &[u8]) -> Result<Option<usize>, Error> {
    if input.len() < HEADER_LEN {
        return Ok(None);
    }

    if input[0] != 0x1f || input[1] != 0x8b {
        return Err(Error::Header("missing gzip magic bytes"));
    }

    if input[2] != 8 {
        return Err(Error::Header("unsupported compression method"));
    }

    let flags = input[3];

    if flags & 0xe0 != 0 {
        return Err(Error::Header("reserved flag bits set"));
    }

    let mut at = HEADER_LEN;

    if flags & FEXTRA != 0 {
        if input.len() < at + 2 {
            return Ok(None);
        }

        let len = u16::from_le_bytes([input[at], input[at + 1]]) as usize;
        at += 2;

        if input.len() < at + len {
            return Ok(None);
        }

        at += len;
    }

    if flags & FNAME != 0 {
        match input[at..].iter().position(|&b| b == 0) {
            Some(end) => at += end + 1,
            None => return Ok(None),
        }
    }

    if flags & FCOMMENT != 0 {
        match input[at..].iter().position(|&b| b == 0) {
            Some(end) => at += end + 1,
            None => return Ok(None),
        }
    }

    if flags & FHCRC != 0 {
        if input.len() < at + 2 {
            return Ok(None);
        }

        at += 2;
    }

    Ok(Some(at))
}
