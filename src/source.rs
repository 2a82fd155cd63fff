//! Source descriptors for versatile files.
//!
//! A source is described by a single path-or-URL string. The backing store
//! strategy is derived from that string exactly once, at construction, and
//! never revisited afterwards.

/// The backing store strategy for a source.
///
/// The mode is derived from the source string: a string beginning with
/// `http://` or `https://` (case-insensitive) is remote, everything else is a
/// local filesystem path. Within each of those, a `.gz` suffix
/// (case-insensitive, ignoring any query string or fragment for URLs) selects
/// the gzip-decompressing variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// A local plain-text file.
    Local,

    /// A local gzip-compressed file.
    LocalGz,

    /// A remote file accessed over HTTP(S).
    Url,

    /// A remote gzip-compressed file accessed over HTTP(S).
    UrlGz,
}

impl Mode {
    /// Detects the mode for a source string.
    ///
    /// # Examples
    ///
    /// ```
    /// use versatilefile::Mode;
    ///
    /// assert_eq!(Mode::detect("/data/variants.tsv"), Mode::Local);
    /// assert_eq!(Mode::detect("/data/variants.tsv.GZ"), Mode::LocalGz);
    /// assert_eq!(Mode::detect("https://example.com/a.bed"), Mode::Url);
    /// assert_eq!(Mode::detect("HTTP://example.com/a.bed.gz?token=1"), Mode::UrlGz);
    /// ```
    pub fn detect(source: &str) -> Mode {
        let remote = is_remote_source(source);

        let mut path = source;

        if remote {
            // The query string and fragment play no part in suffix detection.
            if let Some((prefix, _)) = path.split_once('?') {
                path = prefix;
            }

            if let Some((prefix, _)) = path.split_once('#') {
                path = prefix;
            }
        }

        let gz = path.to_ascii_lowercase().ends_with(".gz");

        match (remote, gz) {
            (false, false) => Mode::Local,
            (false, true) => Mode::LocalGz,
            (true, false) => Mode::Url,
            (true, true) => Mode::UrlGz,
        }
    }

    /// Returns whether this mode is backed by a remote HTTP(S) resource.
    pub fn is_remote(&self) -> bool {
        matches!(self, Mode::Url | Mode::UrlGz)
    }

    /// Returns whether this mode decompresses gzip content.
    pub fn is_gz(&self) -> bool {
        matches!(self, Mode::LocalGz | Mode::UrlGz)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::LocalGz => write!(f, "local gzip"),
            Mode::Url => write!(f, "remote"),
            Mode::UrlGz => write!(f, "remote gzip"),
        }
    }
}

/// Returns whether the source string names a remote HTTP(S) resource.
fn is_remote_source(source: &str) -> bool {
    let lower = source
        .get(..8)
        .map(|prefix| prefix.to_ascii_lowercase())
        .unwrap_or_else(|| source.to_ascii_lowercase());

    lower.starts_with("http://") || lower.starts_with("https://")
}
