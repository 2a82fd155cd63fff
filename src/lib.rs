//! `versatilefile` is a support crate for command-line bioinformatics tools
//! that need to read input files no matter where they live: a unified reader
//! that transparently serves bytes and lines from a local plain-text file, a
//! local gzip-compressed file, a remote file accessed over HTTP(S) byte-range
//! requests, or a remote gzip-compressed file decompressed on the fly as
//! chunks arrive.
//!
//! The crate provides two main points of entry:
//!
//! - [`VersatileFile`], the byte-level reader with the full
//!   open/read/read_line/seek/size/exists contract.
//! - [`TextStream`], a thin UTF-8 decoding layer over [`VersatileFile`] for
//!   line-oriented consumers such as TSV parsers.
//!
//! The backing store strategy — the [`Mode`] — is derived from the source
//! string exactly once, at construction: a string beginning with `http://` or
//! `https://` is remote, and a `.gz` suffix selects streaming decompression.
//! Callers read lines the same way regardless of the mode.
//!
//! ```no_run
//! use versatilefile::TextStream;
//!
//! let mut stream = TextStream::new("https://example.com/annotations.tsv.gz")?;
//!
//! while let Some(line) = stream.read_line(true)? {
//!     println!("{line}");
//! }
//!
//! # Ok::<(), versatilefile::stream::Error>(())
//! ```
//!
//! ## Remote sources
//!
//! Remote readers resolve existence and size with a single HEAD request at
//! construction and then pull bounded byte ranges on demand, reassembling
//! lines across chunk boundaries. Remote gzip sources feed those ranges
//! through a streaming, multi-member decompressor
//! ([`gzip::StreamDecompressor`]) and extract lines from the decompressed
//! buffer. The sequence of lines a reader produces is independent of the
//! fetch chunk size.
//!
//! All network access is synchronous and blocking, which matches the
//! sequential file-processing loop of a command-line tool. A reader owns
//! mutable cursor and decompression state with no internal locking, so
//! parallel reads of one source require one reader each.
//!
//! Proxy settings and TLS behavior are injected explicitly at construction
//! via [`VersatileFile::builder()`]; there is no hidden global state.
//!
//! ```no_run
//! use versatilefile::VersatileFile;
//! use versatilefile::net::Proxy;
//!
//! let mut file = VersatileFile::builder("https://example.com/cohort.vcf.gz")
//!     .proxy(Proxy::new("proxy.internal", 3128))
//!     .build()?;
//!
//! if file.exists() {
//!     file.open()?;
//!     while let Some(line) = file.read_line(true)? {
//!         // raw bytes, decompressed transparently
//!     }
//! }
//!
//! # Ok::<(), versatilefile::file::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod file;
pub mod gzip;
pub mod net;
pub mod source;
pub mod stream;

pub use file::VersatileFile;
pub use source::Mode;
pub use stream::TextStream;
