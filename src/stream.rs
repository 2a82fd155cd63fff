//! A text stream wrapper around [`VersatileFile`].
//!
//! Downstream line-oriented parsers (TSV readers, list files) want decoded
//! [`String`] lines rather than raw bytes. This wrapper decodes lines as
//! UTF-8 and otherwise passes `at_end`/`read_line`/`mode` straight through to
//! the underlying reader.

use crate::file;
use crate::file::VersatileFile;
use crate::source::Mode;

/// An error related to a [`TextStream`].
#[derive(Debug)]
pub enum Error {
    /// An error from the underlying versatile file.
    File(file::Error),

    /// The source uses an unsupported text encoding.
    Encoding(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::File(err) => write!(f, "file error: {err}"),
            Error::Encoding(encoding) => {
                write!(f, "unsupported text encoding `{encoding}`")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::File(err) => Some(err),
            Error::Encoding(_) => None,
        }
    }
}

/// A line-oriented UTF-8 text stream over any versatile source.
///
/// Construction opens the source, rejects UTF-16/UTF-32 content by
/// inspecting the first bytes for a byte order mark, and rewinds to the
/// start, so the first [`read_line()`](TextStream::read_line) returns the
/// first line of the file.
///
/// # Examples
///
/// ```no_run
/// use versatilefile::TextStream;
///
/// let mut stream = TextStream::new("https://example.com/samples.tsv.gz")?;
///
/// while !stream.at_end() {
///     if let Some(line) = stream.read_line(true)? {
///         let fields = line.split('\t').collect::<Vec<_>>();
///         println!("{fields:?}");
///     }
/// }
///
/// # Ok::<(), versatilefile::stream::Error>(())
/// ```
#[derive(Debug)]
pub struct TextStream {
    /// The underlying versatile file.
    file: VersatileFile,
}

impl TextStream {
    /// Opens a text stream over a source string with the default reader
    /// configuration.
    pub fn new(source: impl Into<String>) -> Result<Self, Error> {
        let file = VersatileFile::new(source).map_err(Error::File)?;
        Self::from_file(file)
    }

    /// Opens a text stream over an already-configured reader.
    ///
    /// The reader is (re)opened from the start regardless of its prior
    /// state.
    pub fn from_file(mut file: VersatileFile) -> Result<Self, Error> {
        file.open().map_err(Error::File)?;

        if let Some(first) = file.read_line(false).map_err(Error::File)? {
            check_bom(&first)?;
        }

        // Rewind so the caller sees the file from the first line.
        file.seek(0).map_err(Error::File)?;

        Ok(Self { file })
    }

    /// Returns whether the source is exhausted.
    pub fn at_end(&mut self) -> bool {
        self.file.at_end()
    }

    /// Reads the next line as UTF-8 text.
    ///
    /// Invalid UTF-8 sequences are replaced with `U+FFFD`. Returns [`None`]
    /// once the source is exhausted.
    pub fn read_line(&mut self, trim_line_endings: bool) -> Result<Option<String>, Error> {
        let line = self.file.read_line(trim_line_endings).map_err(Error::File)?;
        Ok(line.map(|line| String::from_utf8_lossy(&line).into_owned()))
    }

    /// The backing store strategy of the underlying reader.
    pub fn mode(&self) -> Mode {
        self.file.mode()
    }

    /// Consumes the stream and returns the underlying reader.
    pub fn into_inner(self) -> VersatileFile {
        self.file
    }
}

/// Rejects UTF-16/UTF-32 byte order marks at the start of a file.
///
/// The UTF-32 marks must be checked before their UTF-16 prefixes.
fn check_bom(first: &[u8]) -> Result<(), Error> {
    if first.starts_with(&[0xff, 0xfe, 0x00, 0x00]) {
        return Err(Error::Encoding("UTF-32LE"));
    }

    if first.starts_with(&[0x00, 0x00, 0xfe, 0xff]) {
        return Err(Error::Encoding("UTF-32BE"));
    }

    if first.starts_with(&[0xff, 0xfe]) {
        return Err(Error::Encoding("UTF-16LE"));
    }

    if first.starts_with(&[0xfe, 0xff]) {
        return Err(Error::Encoding("UTF-16BE"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
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

    #[test]
    fn lines_are_decoded_from_the_first_line() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "data.tsv", b"id\tname\n1\tsample\n");

        let mut stream = TextStream::new(path).unwrap();
        assert_eq!(stream.mode(), Mode::Local);

        assert_eq!(stream.read_line(true).unwrap().as_deref(), Some("id\tname"));
        assert_eq!(
            stream.read_line(true).unwrap().as_deref(),
            Some("1\tsample")
        );
        assert_eq!(stream.read_line(true).unwrap(), None);
        assert!(stream.at_end());
    }

    #[test]
    fn gz_sources_rewind_through_reopen() {
        let content = b"header\nrow\n";

        let dir = TempDir::new("versatilefile").unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        let path = write_file(&dir, "data.tsv.gz", &encoder.finish().unwrap());

        let mut stream = TextStream::new(path).unwrap();
        assert_eq!(stream.mode(), Mode::LocalGz);

        assert_eq!(stream.read_line(true).unwrap().as_deref(), Some("header"));
        assert_eq!(stream.read_line(true).unwrap().as_deref(), Some("row"));
        assert_eq!(stream.read_line(true).unwrap(), None);
    }

    #[test]
    fn utf16_content_is_rejected() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "utf16.txt", &[0xff, 0xfe, 0x61, 0x00, 0x0a, 0x00]);

        let err = TextStream::new(path).unwrap_err();
        assert!(matches!(err, Error::Encoding("UTF-16LE")));
    }

    #[test]
    fn utf32_is_distinguished_from_utf16() {
        assert!(matches!(
            check_bom(&[0xff, 0xfe, 0x00, 0x00]),
            Err(Error::Encoding("UTF-32LE"))
        ));
        assert!(matches!(
            check_bom(&[0x00, 0x00, 0xfe, 0xff]),
            Err(Error::Encoding("UTF-32BE"))
        ));
        assert!(matches!(
            check_bom(&[0xfe, 0xff, 0x00, 0x61]),
            Err(Error::Encoding("UTF-16BE"))
        ));
        assert!(check_bom(b"plain ascii").is_ok());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let dir = TempDir::new("versatilefile").unwrap();
        let path = write_file(&dir, "latin1.txt", b"caf\xe9\n");

        let mut stream = TextStream::new(path).unwrap();
        let line = stream.read_line(true).unwrap().unwrap();

        assert_eq!(line, "caf\u{fffd}");
    }
}
