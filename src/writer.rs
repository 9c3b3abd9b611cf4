use crate::common::{ArchiveError, Header, HeaderError, Result, EOF_BLOCK};
use std::{
    fs::{self, DirEntry, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    vec,
};

/// Structure to write multiple files and corresponding metadata into a wpress archive.
///
/// Members are written as soon as they are added. [`Writer::close`] consumes the writer, so an
/// archive cannot be terminated twice or written to after it was terminated.
pub struct Writer<W: Write = BufWriter<File>> {
    file: W,
    files_added: usize,
    sorted: bool,
}

impl Writer {
    /// Creates a new `Writer` with the destination being the path supplied. An existing file is
    /// truncated.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Writer> {
        let file = File::create(path).map_err(ArchiveError::FileCreation)?;
        Ok(Writer::from_writer(BufWriter::new(file)))
    }
}

impl<W: Write> Writer<W> {
    pub fn from_writer(file: W) -> Writer<W> {
        Writer {
            file,
            files_added: 0,
            sorted: false,
        }
    }

    /// Visit directory listings in file name order instead of the order the filesystem
    /// reports them in, making archives of the same tree reproducible. Subdirectories are
    /// still entered at their place in the listing, so `a.txt`, `b/x.txt`, `c.txt` are
    /// written in that order.
    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    /// Writes `header` followed by exactly `header.size()` bytes taken from `data`.
    pub fn append<R: Read>(&mut self, header: &Header, data: R) -> Result<()> {
        if header.is_eof() {
            return Err(HeaderError::NameIsEmpty.into());
        }
        self.file
            .write_all(&header.to_bytes())
            .map_err(ArchiveError::FileWrite)?;
        let copied =
            io::copy(&mut data.take(header.size()), &mut self.file).map_err(ArchiveError::FileWrite)?;
        // The header is already out, so the archive is left inconsistent.
        if copied != header.size() {
            return Err(ArchiveError::FileWrite(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "`{}` supplied {} of {} bytes",
                    header.name(),
                    copied,
                    header.size()
                ),
            )));
        }
        self.files_added += 1;
        tracing::debug!(
            name = header.name(),
            prefix = header.prefix(),
            size = header.size(),
            "appended member"
        );
        Ok(())
    }

    /// Adds a single file. Its parent directory, exactly as written in `path`, becomes the
    /// prefix: an absolute path stores the absolute parent, which extraction later re-roots
    /// under the destination. Use [`Writer::add_directory`] or [`Writer::append`] to control
    /// the stored prefix.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let header = Header::from_file(path)?;
        self.append_file(path, &header)
    }

    /// Adds every file below `path`, depth first. Prefixes are relative to `path`, so files
    /// directly inside it have an empty prefix.
    pub fn add_directory<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let root = path.as_ref();
        let mut pending = vec![(PathBuf::new(), self.list(root)?)];
        while let Some((relative, entries)) = pending.last_mut() {
            let Some(entry) = entries.next() else {
                pending.pop();
                continue;
            };
            let file_type = entry.file_type().map_err(ArchiveError::EntryAddition)?;
            if file_type.is_dir() {
                let child = relative.join(entry.file_name());
                let listing = self.list(&root.join(&child))?;
                pending.push((child, listing));
            } else if file_type.is_file() {
                let metadata = entry.metadata().map_err(ArchiveError::EntryAddition)?;
                let header = Header::from_metadata(
                    entry.file_name().to_string_lossy(),
                    relative.to_string_lossy(),
                    &metadata,
                )?;
                self.append_file(&entry.path(), &header)?;
            } else {
                skip(&entry.path());
            }
        }
        Ok(())
    }

    /// Adds `path` as a file or, if it is a directory, everything below it.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file_type = fs::symlink_metadata(path)
            .map_err(ArchiveError::EntryAddition)?
            .file_type();
        if file_type.is_dir() {
            self.add_directory(path)
        } else if file_type.is_file() {
            self.add_file(path)
        } else {
            skip(path);
            Ok(())
        }
    }

    pub fn files_count(&self) -> usize {
        self.files_added
    }

    /// Terminates the archive and hands back the underlying sink. Nothing is written when no
    /// member was added, leaving an empty archive.
    pub fn finish(mut self) -> Result<W> {
        if self.files_added > 0 {
            self.file
                .write_all(EOF_BLOCK)
                .map_err(ArchiveError::FileWrite)?;
        }
        self.file.flush().map_err(ArchiveError::FileWrite)?;
        tracing::debug!(members = self.files_added, "archive finished");
        Ok(self.file)
    }

    /// Terminates the archive and closes the underlying sink.
    pub fn close(self) -> Result<()> {
        self.finish().map(drop)
    }

    fn list(&self, directory: &Path) -> Result<vec::IntoIter<DirEntry>> {
        tracing::trace!(directory = %directory.display(), "listing");
        let mut entries = fs::read_dir(directory)
            .map_err(ArchiveError::EntryAddition)?
            .collect::<io::Result<Vec<_>>>()
            .map_err(ArchiveError::EntryAddition)?;
        if self.sorted {
            entries.sort_by_key(|entry| entry.file_name());
        }
        Ok(entries.into_iter())
    }

    fn append_file(&mut self, path: &Path, header: &Header) -> Result<()> {
        let handle = File::open(path).map_err(ArchiveError::FileRead)?;
        self.append(header, handle)
    }
}

// Symbolic links and devices are never archived.
fn skip(path: &Path) {
    tracing::warn!(path = %path.display(), "skipping entry that is neither a file nor a directory");
}
