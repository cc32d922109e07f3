//! File-backed row storage shared by the cache and the cookie jar.
//!
//! Rows are kept as a JSON array and every mutation rewrites the whole file
//! through a temporary file in the same directory, so a crash never leaves a
//! half-written file behind.

use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// The per-user data directory for this library.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "gap", "HoodiesNetwork").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Replace the contents of `path` with `contents`, creating parent directories.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A JSON file holding a list of rows.
pub(crate) struct RowFile<R> {
    path: PathBuf,
    _rows: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> RowFile<R> {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _rows: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load every row; a missing file is an empty table.
    pub(crate) fn load(&self) -> std::io::Result<Vec<R>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Replace every row.
    pub(crate) fn save<'a>(&self, rows: impl IntoIterator<Item = &'a R>) -> std::io::Result<()>
    where
        R: 'a,
    {
        let rows: Vec<&R> = rows.into_iter().collect();
        let bytes = serde_json::to_vec(&rows)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomically(&self.path, &bytes)
    }
}
