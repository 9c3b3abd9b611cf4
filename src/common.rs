use std::{
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Total width of a header block.
pub const HEADER_SIZE: usize = 4377;
pub const FILENAME_SIZE: usize = 255;
pub const CONTENT_SIZE: usize = 14;
pub const MTIME_SIZE: usize = 12;
pub const PREFIX_SIZE: usize = 4096;
const SIZE_BEGIN: usize = FILENAME_SIZE;
const MTIME_BEGIN: usize = SIZE_BEGIN + CONTENT_SIZE;
const PREFIX_BEGIN: usize = MTIME_BEGIN + MTIME_SIZE;

/// The sentinel block terminating every non-empty archive.
pub const EOF_BLOCK: &[u8] = &[0; HEADER_SIZE];

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Errors raised while building or parsing a single header block.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("file has no associated name")]
    NameIsNone,
    #[error("member name must not be empty")]
    NameIsEmpty,
    #[error("filename `{0}` is longer than the maximum of 255 bytes")]
    NameLengthExceeded(String),
    #[error("string representation of the size {0} exceeds the maximum of 14 bytes")]
    SizeLengthExceeded(u64),
    #[error("string representation of the modified time {0} exceeds the maximum of 12 bytes")]
    MtimeLengthExceeded(i64),
    #[error("prefix `{0}` is longer than the maximum of 4096 bytes")]
    PrefixLengthExceeded(String),
    #[error("`{0}` contains a NUL byte")]
    NulByte(String),
    #[error("header field `{field}` holds invalid value {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("header block must be 4377 bytes long, got {0}")]
    BlockSize(usize),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create file: {0}")]
    FileCreation(#[source] io::Error),
    #[error("failed to read: {0}")]
    FileRead(#[source] io::Error),
    #[error("failed to write: {0}")]
    FileWrite(#[source] io::Error),
    #[error("failed to add entry: {0}")]
    EntryAddition(#[source] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("archive is truncated: expected {expected} more bytes, found {found}")]
    Truncated { expected: u64, found: u64 },
    #[error("no member named `{0}` in the archive")]
    NotFound(String),
    #[error("member path `{0}` does not resolve to a file below the destination")]
    InvalidPath(String),
}

/// Metadata of a single archive member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Header {
    name: String,
    size: u64,
    mtime: i64,
    prefix: String,
}

impl Header {
    /// Builds a header, checking that every field fits its fixed width.
    pub fn new<S: Into<String>, T: Into<String>>(
        name: S,
        size: u64,
        mtime: i64,
        prefix: T,
    ) -> Result<Header, HeaderError> {
        let name = name.into();
        let prefix = prefix.into();
        if name.is_empty() {
            return Err(HeaderError::NameIsEmpty);
        }
        check_text(&name, FILENAME_SIZE, HeaderError::NameLengthExceeded)?;
        check_text(&prefix, PREFIX_SIZE, HeaderError::PrefixLengthExceeded)?;
        if size.to_string().len() > CONTENT_SIZE {
            return Err(HeaderError::SizeLengthExceeded(size));
        }
        if mtime.to_string().len() > MTIME_SIZE {
            return Err(HeaderError::MtimeLengthExceeded(mtime));
        }
        Ok(Header {
            name,
            size,
            mtime,
            prefix,
        })
    }

    /// The end of archive marker.
    pub fn eof() -> Header {
        Header::default()
    }

    pub fn is_eof(&self) -> bool {
        self.size == 0 && self.name.is_empty()
    }

    /// Reads the size and modification time of the file at `path`. The prefix is the parent
    /// directory exactly as it appears in `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Header> {
        let path = path.as_ref();
        let name = path.file_name().ok_or(HeaderError::NameIsNone)?;
        let prefix = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = fs::metadata(path).map_err(ArchiveError::FileRead)?;
        Header::from_metadata(name.to_string_lossy(), prefix, &metadata)
    }

    pub(crate) fn from_metadata<S: Into<String>, T: Into<String>>(
        name: S,
        prefix: T,
        metadata: &fs::Metadata,
    ) -> Result<Header> {
        let modified = metadata.modified().map_err(ArchiveError::FileRead)?;
        Ok(Header::new(
            name,
            metadata.len(),
            unix_seconds(modified),
            prefix,
        )?)
    }

    /// Decodes a header block. An all-zero block decodes to [`Header::eof`].
    pub fn from_bytes(block: &[u8]) -> Result<Header, HeaderError> {
        if block.len() != HEADER_SIZE {
            return Err(HeaderError::BlockSize(block.len()));
        }
        let name = text(&block[..SIZE_BEGIN]);
        let size = number("size", &block[SIZE_BEGIN..MTIME_BEGIN])?;
        let mtime = number("mtime", &block[MTIME_BEGIN..PREFIX_BEGIN])?;
        let prefix = text(&block[PREFIX_BEGIN..]);
        if name.is_empty() && size != 0 {
            return Err(HeaderError::Malformed {
                field: "name",
                value: name,
            });
        }
        Ok(Header {
            name,
            size,
            mtime,
            prefix,
        })
    }

    /// Encodes the header into a block of exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.is_eof() {
            return EOF_BLOCK.to_vec();
        }
        let mut block = vec![0; HEADER_SIZE];
        put(&mut block[..SIZE_BEGIN], self.name.as_bytes());
        put(
            &mut block[SIZE_BEGIN..MTIME_BEGIN],
            self.size.to_string().as_bytes(),
        );
        put(
            &mut block[MTIME_BEGIN..PREFIX_BEGIN],
            self.mtime.to_string().as_bytes(),
        );
        put(&mut block[PREFIX_BEGIN..], self.prefix.as_bytes());
        block
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of the payload following the header.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time in seconds relative to the UNIX epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The prefix joined with the name, as stored in the archive.
    pub fn path(&self) -> PathBuf {
        [&self.prefix, &self.name].iter().collect()
    }

    pub fn modified(&self) -> SystemTime {
        let offset = Duration::from_secs(self.mtime.unsigned_abs());
        if self.mtime < 0 {
            UNIX_EPOCH - offset
        } else {
            UNIX_EPOCH + offset
        }
    }
}

fn check_text(
    value: &str,
    width: usize,
    too_long: fn(String) -> HeaderError,
) -> Result<(), HeaderError> {
    if value.as_bytes().contains(&0) {
        return Err(HeaderError::NulByte(value.to_owned()));
    }
    if value.len() > width {
        return Err(too_long(value.to_owned()));
    }
    Ok(())
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs())
            .map(|secs| -secs)
            .unwrap_or(i64::MIN),
    }
}

fn put(field: &mut [u8], value: &[u8]) {
    field[..value.len()].copy_from_slice(value);
}

fn until_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

fn text(field: &[u8]) -> String {
    String::from_utf8_lossy(until_nul(field)).into_owned()
}

// Empty numeric fields decode to zero, as in the sentinel.
fn number<T: FromStr + Default>(field: &'static str, raw: &[u8]) -> Result<T, HeaderError> {
    let raw = until_nul(raw);
    if raw.is_empty() {
        return Ok(T::default());
    }
    let malformed = || HeaderError::Malformed {
        field,
        value: String::from_utf8_lossy(raw).into_owned(),
    };
    let digits = raw.strip_prefix(&b"-"[..]).unwrap_or(raw);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)
}
