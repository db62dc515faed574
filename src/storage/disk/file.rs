use crate::storage::backend::{Backend, BackendHandle};
use crate::storage::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Backend over a raw regular file.
///
/// Reads must stay inside the current file length; a read that runs past the
/// end fails with `UnexpectedEof` instead of returning zeros.
pub struct FileBackend {
    file: File,
    path: PathBuf,
}

impl FileBackend {
    /// Create a new, empty file, truncating any existing content.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| unavailable(path, e))?;

        Self::from_file(file, path)
    }

    /// Open a file for reading and writing, creating it if missing.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| unavailable(path, e))?;

        Self::from_file(file, path)
    }

    /// Open an existing file. Fails if the file does not exist.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| unavailable(path, e))?;

        Self::from_file(file, path)
    }

    fn from_file(file: File, path: &Path) -> StorageResult<Self> {
        // Positional I/O only works on something seekable.
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(StorageError::BackendUnavailable {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

fn unavailable(path: &Path, error: io::Error) -> StorageError {
    StorageError::BackendUnavailable {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

impl Backend for FileBackend {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let file_size = self.file.metadata()?.len();
        if offset + buf.len() as u64 > file_size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {} past end of file ({} bytes)",
                    buf.len(),
                    offset,
                    file_size
                ),
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;

        Ok(buf.len())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn handle(&self) -> BackendHandle {
        BackendHandle::File(self.path.clone())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            log::error!("Failed to sync {:?} on close: {}", self.path, e);
        }
    }
}
