use crate::common::{ArchiveError, Header, Result, HEADER_SIZE};
use clean_path::Clean;
use filetime::{set_file_mtime, FileTime};
use std::{
    fs::{create_dir_all, File},
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::{Component, Path, PathBuf},
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Sequential reader over the members of a wpress archive.
///
/// The reader keeps a single stream offset. [`Reader::next_entry`] walks forward from it, while
/// [`Reader::files_count`], [`Reader::headers`], [`Reader::extract_to`] and
/// [`Reader::extract_file`] always start over from the beginning of the archive.
pub struct Reader<R: Read + Seek = BufReader<File>> {
    file: R,
    length: u64,
    position: u64,
    unread: u64,
    exhausted: bool,
}

/// Resolves a member path to a relative path that cannot leave the extraction directory.
fn trim_clean<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let trimmed: PathBuf = path
        .clean()
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if trimmed.as_os_str().is_empty() {
        return Err(ArchiveError::InvalidPath(path.display().to_string()));
    }
    Ok(trimmed)
}

impl Reader {
    /// Creates a new `Reader` with the path supplied as the source file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Reader> {
        let file = File::open(path).map_err(ArchiveError::FileRead)?;
        Reader::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> Reader<R> {
    pub fn from_reader(mut file: R) -> Result<Reader<R>> {
        let length = file.seek(SeekFrom::End(0)).map_err(ArchiveError::FileRead)?;
        file.rewind().map_err(ArchiveError::FileRead)?;
        Ok(Reader {
            file,
            length,
            position: 0,
            unread: 0,
            exhausted: false,
        })
    }

    /// Moves back to the first header of the archive.
    pub fn rewind(&mut self) -> Result<()> {
        self.file.rewind().map_err(ArchiveError::FileRead)?;
        self.position = 0;
        self.unread = 0;
        self.exhausted = false;
        Ok(())
    }

    /// Current offset into the archive.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads the next header, skipping whatever is left of the previous member's payload.
    ///
    /// Returns `None` at the end of archive marker, or when the archive ends cleanly without
    /// one, as empty archives do. The stream is left at the start of the returned member's
    /// payload.
    pub fn next_entry(&mut self) -> Result<Option<Header>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.unread > 0 {
            self.skip(self.unread)?;
            self.unread = 0;
        }

        let remaining = self.remaining();
        if remaining == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return Err(ArchiveError::Truncated {
                expected: HEADER_SIZE as u64,
                found: remaining,
            });
        }

        let mut block = vec![0; HEADER_SIZE];
        self.file
            .read_exact(&mut block)
            .map_err(ArchiveError::FileRead)?;
        self.position += HEADER_SIZE as u64;
        let header = Header::from_bytes(&block)?;
        if header.is_eof() {
            tracing::trace!(offset = self.position, "reached end of archive");
            self.exhausted = true;
            return Ok(None);
        }
        tracing::trace!(name = header.name(), size = header.size(), "read header");
        self.unread = header.size();
        Ok(Some(header))
    }

    /// Moves past what is left of the payload of `header` without reading it. Bytes already
    /// consumed by [`Reader::read_payload`] are not skipped again.
    pub fn skip_payload(&mut self, header: &Header) -> Result<()> {
        let bytes = header.size().min(self.unread);
        self.skip(bytes)?;
        self.unread = 0;
        Ok(())
    }

    /// Copies what is left of the payload of `header` into `destination`.
    pub fn read_payload<W: Write + ?Sized>(
        &mut self,
        header: &Header,
        destination: &mut W,
    ) -> Result<()> {
        let expected = header.size().min(self.unread);
        let mut buf = vec![0; COPY_BUFFER_SIZE];
        let mut copied = 0;
        while copied < expected {
            let want = (expected - copied).min(COPY_BUFFER_SIZE as u64) as usize;
            let read = match self.file.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::FileRead(e)),
            };
            self.position += read as u64;
            self.unread -= read as u64;
            copied += read as u64;
            destination
                .write_all(&buf[..read])
                .map_err(ArchiveError::FileWrite)?;
        }
        if copied < expected {
            return Err(ArchiveError::Truncated {
                expected,
                found: copied,
            });
        }
        Ok(())
    }

    /// Returns number of files in the archive. This walks every header in the archive.
    pub fn files_count(&mut self) -> Result<usize> {
        Ok(self.headers()?.len())
    }

    /// Returns the headers of all the members in archive order.
    pub fn headers(&mut self) -> Result<Vec<Header>> {
        self.rewind()?;
        let mut headers = Vec::new();
        while let Some(header) = self.next_entry()? {
            self.skip_payload(&header)?;
            headers.push(header);
        }
        Ok(headers)
    }

    /// Extracts all the files inside the archive to the provided destination directory and
    /// returns how many were written.
    pub fn extract_to<P: AsRef<Path>>(&mut self, destination: P) -> Result<usize> {
        let destination = destination.as_ref();
        self.rewind()?;
        let mut extracted = 0;
        while let Some(header) = self.next_entry()? {
            let path = destination.join(trim_clean(header.path())?);
            self.write_member(&header, &path)?;
            extracted += 1;
        }
        Ok(extracted)
    }

    /// Extracts all the files inside the archive to the current directory.
    pub fn extract(&mut self) -> Result<usize> {
        self.extract_to(".")
    }

    /// Extract a single file or path to a destination directory preserving the directory
    /// hierarchy. `filename` may be the bare member name or its full path within the archive;
    /// the first matching member is extracted.
    pub fn extract_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        filename: P,
        destination: Q,
    ) -> Result<()> {
        let q = filename.as_ref();
        let destination = destination.as_ref();
        self.rewind()?;
        while let Some(header) = self.next_entry()? {
            let original_path = header.path();
            let matches = Path::new(header.name()) == q
                || original_path == q
                || trim_clean(&original_path).map_or(false, |clean| clean == q);
            if matches {
                let path = destination.join(trim_clean(&original_path)?);
                return self.write_member(&header, &path);
            }
        }
        Err(ArchiveError::NotFound(q.display().to_string()))
    }

    fn write_member(&mut self, header: &Header, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir).map_err(ArchiveError::FileCreation)?;
        }
        let mut handle = File::create(path).map_err(ArchiveError::FileCreation)?;
        self.read_payload(header, &mut handle)?;
        drop(handle);
        set_file_mtime(path, FileTime::from_unix_time(header.mtime(), 0))
            .map_err(ArchiveError::FileWrite)?;
        tracing::debug!(path = %path.display(), size = header.size(), "extracted member");
        Ok(())
    }

    fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    fn skip(&mut self, bytes: u64) -> Result<()> {
        let remaining = self.remaining();
        if bytes > remaining {
            return Err(ArchiveError::Truncated {
                expected: bytes,
                found: remaining,
            });
        }
        self.position += bytes;
        self.file
            .seek(SeekFrom::Start(self.position))
            .map_err(ArchiveError::FileRead)?;
        Ok(())
    }
}
