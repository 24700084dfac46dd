//! Content-addressed blob files.
//!
//! Blobs live at `<dir>/<first two hex chars>/<remaining 38>`, the same fan
//! out git uses for loose objects. A blob file is only ever created whole:
//! bytes go to a temp file in the target directory, get fsynced and are
//! then renamed into place.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{VcsError, VcsResult};
use crate::model::BlobId;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    /// open (creating if needed) an object directory
    pub fn open(dir: impl Into<PathBuf>) -> VcsResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// where the blob lives (whether or not it exists)
    pub fn path_for(&self, id: &BlobId) -> PathBuf {
        let hex = id.to_string();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.path_for(id).is_file()
    }

    /// durably store `content` under `id`
    ///
    /// returns false if the blob was already present
    pub fn write(&self, id: &BlobId, content: &[u8]) -> VcsResult<bool> {
        let actual = BlobId::for_content(content)?;
        if actual != *id {
            return Err(VcsError::InvalidBundle(format!(
                "blob {} does not match its content (hashes to {})",
                id, actual
            )));
        }

        if self.contains(id) {
            return Ok(false);
        }
        let path = self.path_for(id);

        let fan_out = path
            .parent()
            .ok_or_else(|| VcsError::Internal(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(fan_out)?;

        let mut tmp = NamedTempFile::new_in(fan_out)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        sync_dir(fan_out)?;

        debug!("stored blob {} ({} bytes)", id.short(), content.len());
        Ok(true)
    }

    /// read and verify a blob
    pub fn read(&self, id: &BlobId) -> VcsResult<Option<Vec<u8>>> {
        let path = self.path_for(id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if BlobId::for_content(&content)? != *id {
            return Err(VcsError::corrupted(path, "blob content does not match its id"));
        }
        Ok(Some(content))
    }

    /// delete a blob file, returns false if it was already gone
    pub fn remove(&self, id: &BlobId) -> VcsResult<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// make a rename inside `dir` durable
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    // directories can't be opened for syncing on windows
    if cfg!(unix) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}
