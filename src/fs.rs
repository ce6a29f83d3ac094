//! File system access, behind a trait so incremental state can be tested
//! against an in-memory file system.

use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the Unix epoch.
    Stamp(u64),
}

pub trait FileSystem: Sync {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    /// Replaces the content of `path`, creating parent directories.
    fn write(&self, path: &str, content: &[u8]) -> std::io::Result<()>;
    fn remove(&self, path: &str) -> std::io::Result<()>;

    fn exists(&self, path: &str) -> bool {
        matches!(self.stat(path), Ok(MTime::Stamp(_)))
    }
}

#[derive(Default)]
pub struct RealFileSystem {}
impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(MTime::Missing),
            Err(err) => return Err(err),
        };
        let nanos = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(MTime::Stamp(nanos))
    }

    fn write(&self, path: &str, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
