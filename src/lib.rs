//! Create, list and extract wpress archives.
//!
//! A wpress archive is a plain concatenation of members. Each member is a fixed width
//! [`Header`] of [`HEADER_SIZE`] bytes followed by the raw file contents, and the archive ends
//! with an all-zero header block. Archives without members are empty files.
//!
//! ```no_run
//! use wpress::{Reader, Writer};
//!
//! let mut w = Writer::new("site.wpress")?;
//! w.add("wp-content")?;
//! w.close()?;
//!
//! let mut r = Reader::new("site.wpress")?;
//! println!("{} files", r.files_count()?);
//! r.extract_to("restored")?;
//! # Ok::<(), wpress::ArchiveError>(())
//! ```
mod common;
mod reader;
mod writer;

pub use crate::common::{
    ArchiveError, Header, HeaderError, Result, CONTENT_SIZE, EOF_BLOCK, FILENAME_SIZE,
    HEADER_SIZE, MTIME_SIZE, PREFIX_SIZE,
};
pub use crate::reader::Reader;
pub use crate::writer::Writer;

#[cfg(test)]
mod tests {
    use crate::common::Result;
    use std::fs::{create_dir_all, read, write};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn extract_testdata() -> Result<()> {
        let dir = tempdir().map_err(ArchiveError::FileCreation)?;
        let source = dir.path().join("writer");
        create_dir_all(source.join("subdirectory")).map_err(ArchiveError::FileCreation)?;
        write(source.join("file.txt"), "top").map_err(ArchiveError::FileWrite)?;
        write(source.join("subdirectory/file.txt"), "nested").map_err(ArchiveError::FileWrite)?;

        let archive = dir.path().join("archive.wpress");
        let mut w = Writer::new(&archive)?;
        w.add(&source)?;
        w.close()?;

        let mut r = Reader::new(&archive)?;
        assert_eq!(r.extract_to(dir.path().join("output"))?, 2);
        let nested = read(dir.path().join("output/subdirectory/file.txt"))
            .map_err(ArchiveError::FileRead)?;
        assert_eq!(nested, b"nested");
        Ok(())
    }

    #[test]
    // extracts the first member with the name file.txt
    fn extract_single_filename() -> Result<()> {
        let dir = tempdir().map_err(ArchiveError::FileCreation)?;
        let archive = dir.path().join("archive.wpress");
        let mut w = Writer::new(&archive)?;
        w.append(&Header::new("file.txt", 5, 0, "a/b")?, &b"first"[..])?;
        w.append(&Header::new("file.txt", 6, 0, "c")?, &b"second"[..])?;
        w.close()?;

        let mut r = Reader::new(&archive)?;
        r.extract_file("file.txt", dir.path().join("output"))?;
        let data = read(dir.path().join("output/a/b/file.txt")).map_err(ArchiveError::FileRead)?;
        assert_eq!(data, b"first");
        assert!(!dir.path().join("output/c/file.txt").exists());
        Ok(())
    }

    #[test]
    fn extract_single_path() -> Result<()> {
        let dir = tempdir().map_err(ArchiveError::FileCreation)?;
        let archive = dir.path().join("archive.wpress");
        let mut w = Writer::new(&archive)?;
        w.append(&Header::new("file.txt", 5, 0, "a/b")?, &b"first"[..])?;
        w.append(&Header::new("file.txt", 6, 0, "/c")?, &b"second"[..])?;
        w.close()?;

        let mut r = Reader::new(&archive)?;
        r.extract_file("c/file.txt", dir.path().join("output"))?;
        let data = read(dir.path().join("output/c/file.txt")).map_err(ArchiveError::FileRead)?;
        assert_eq!(data, b"second");
        Ok(())
    }

    #[test]
    fn create_archive() -> Result<()> {
        let dir = tempdir().map_err(ArchiveError::FileCreation)?;
        write(dir.path().join("lipsum.txt"), "lorem ipsum").map_err(ArchiveError::FileWrite)?;
        let archive = dir.path().join("writer_output.wpress");
        let mut w = Writer::new(&archive)?;
        w.add(dir.path().join("lipsum.txt"))?;
        assert_eq!(w.files_count(), 1);
        w.close()?;
        assert_eq!(Reader::new(&archive)?.files_count()?, 1);
        Ok(())
    }
}
