use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use atelier_contracts::error::StudioError;
use atelier_contracts::naming::{is_image_name, is_plain_name, media_type_for};
use tempfile::NamedTempFile;

/// Flat directory of image artifacts addressed by bare file name.
///
/// Only names with a known image extension are listed. Writes go through a
/// hidden temp file in the same directory that is synced and then renamed
/// over the target, so a listing never sees half an image.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub name: String,
    pub media_type: &'static str,
    pub modified: SystemTime,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StudioError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| StudioError::storage(&root, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `name`, refusing anything that would resolve outside the
    /// store.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StudioError> {
        if !is_plain_name(name) {
            return Err(StudioError::NotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, StudioError> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(StudioError::NotFound(name.to_string()));
        }
        fs::read(&path).map_err(|err| StudioError::storage(path, err))
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StudioError> {
        let path = self.path_for(name)?;
        let mut partial =
            NamedTempFile::new_in(&self.root).map_err(|err| StudioError::storage(&self.root, err))?;
        let staged = partial
            .write_all(bytes)
            .and_then(|()| partial.as_file().sync_all());
        if let Err(err) = staged {
            return Err(StudioError::storage(partial.path(), err));
        }
        // A failed persist drops the temp file, which removes it.
        partial
            .persist(&path)
            .map_err(|err| StudioError::storage(&path, err.error))?;
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<(), StudioError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|err| StudioError::storage(path, err))
    }

    pub fn entry(&self, name: &str) -> Result<ArtifactEntry, StudioError> {
        let path = self.path_for(name)?;
        let meta = fs::metadata(&path).map_err(|_| StudioError::NotFound(name.to_string()))?;
        let modified = meta
            .modified()
            .map_err(|err| StudioError::storage(&path, err))?;
        Ok(ArtifactEntry {
            name: name.to_string(),
            media_type: media_type_for(name),
            modified,
        })
    }

    /// Every artifact whose name starts with `prefix`, newest first. Ties on
    /// modification time fall back to name, descending.
    pub fn entries(&self, prefix: &str) -> Result<Vec<ArtifactEntry>, StudioError> {
        let reader = fs::read_dir(&self.root).map_err(|err| StudioError::storage(&self.root, err))?;
        let mut entries = Vec::new();
        for item in reader {
            let Ok(item) = item else {
                continue;
            };
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(prefix) || !is_image_name(&name) || name.starts_with('.') {
                continue;
            }
            let Ok(meta) = item.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(ArtifactEntry {
                media_type: media_type_for(&name),
                name,
                modified,
            });
        }
        entries.sort_by(|left, right| {
            right
                .modified
                .cmp(&left.modified)
                .then_with(|| right.name.cmp(&left.name))
        });
        Ok(entries)
    }

    pub fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StudioError> {
        Ok(self
            .entries(prefix)?
            .into_iter()
            .take(limit)
            .map(|entry| entry.name)
            .collect())
    }

    pub fn list_since(
        &self,
        prefix: &str,
        since: Option<SystemTime>,
        limit: usize,
    ) -> Result<Vec<String>, StudioError> {
        Ok(self
            .entries(prefix)?
            .into_iter()
            .filter(|entry| since.map(|floor| entry.modified >= floor).unwrap_or(true))
            .take(limit)
            .map(|entry| entry.name)
            .collect())
    }
}
