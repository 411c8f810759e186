//! pointer files: a single manifest hash plus newline

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::fs::atomic_write;
use crate::hash::Hash;

/// write a pointer (create or update)
pub fn write_pointer(tmp_dir: &Path, path: &Path, hash: &Hash) -> Result<()> {
    atomic_write(tmp_dir, path, format!("{}\n", hash.to_hex()).as_bytes())?;
    tracing::debug!(path = %path.display(), hash = %hash.short(), "pointer updated");
    Ok(())
}

/// read a pointer; `None` when the file does not exist
pub fn read_pointer(path: &Path) -> Result<Option<Hash>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    Hash::from_hex(content.trim()).map(Some)
}

/// validate an organization or dataset name
///
/// names become path components, so no separators, traversal or null bytes.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidDatasetName("empty name".to_string()));
    }

    if name == "." || name == ".." {
        return Err(Error::InvalidDatasetName(format!(
            "name cannot be '.' or '..': {}",
            name
        )));
    }

    if name.starts_with('.') {
        return Err(Error::InvalidDatasetName(format!(
            "name cannot start with '.': {}",
            name
        )));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidDatasetName(format!(
            "name contains {:?}: {}",
            c, name
        )));
    }

    Ok(())
}
