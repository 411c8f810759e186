use std::fs::{self, File};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::atomic_write;
use crate::hash::Hash;

/// reference-counted pins, one file per pinned hash at `pins/XX/YYYY`
///
/// counts only change while `pins/.lock` is held, so pin and unpin calls
/// from any thread or process sharing the store never lose an update.
#[derive(Debug)]
pub struct PinSet {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl PinSet {
    pub fn new(dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self { dir, tmp_dir }
    }

    fn guard(&self) -> Result<Flock<File>> {
        fs::create_dir_all(&self.dir).with_path(&self.dir)?;
        let path = self.dir.join(".lock");
        let file = File::create(&path).with_path(&path)?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| Error::Io {
            path,
            source: errno.into(),
        })
    }

    /// add one reference, returning the new count
    pub fn increment(&self, hash: &Hash) -> Result<u64> {
        let _guard = self.guard()?;
        let count = self.read_count(hash)? + 1;
        self.write_count(hash, count)?;
        Ok(count)
    }

    /// drop one reference, returning the new count
    ///
    /// unpinning an unpinned hash is a no-op.
    pub fn decrement(&self, hash: &Hash) -> Result<u64> {
        let _guard = self.guard()?;
        let count = self.read_count(hash)?;
        match count {
            0 => Ok(0),
            1 => {
                let path = self.path(hash);
                fs::remove_file(&path).with_path(&path)?;
                Ok(0)
            }
            n => {
                self.write_count(hash, n - 1)?;
                Ok(n - 1)
            }
        }
    }

    pub fn count(&self, hash: &Hash) -> Result<u64> {
        let _guard = self.guard()?;
        self.read_count(hash)
    }

    /// all hashes with a non-zero count
    pub fn list(&self) -> Result<Vec<Hash>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let _guard = self.guard()?;

        let mut pins = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| walk_error(&self.dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(hash) = hash_from_object_path(entry.path()) {
                pins.push(hash);
            }
        }
        pins.sort();
        Ok(pins)
    }

    fn path(&self, hash: &Hash) -> PathBuf {
        let (dir, file) = hash.to_path_components();
        self.dir.join(dir).join(file)
    }

    fn read_count(&self, hash: &Hash) -> Result<u64> {
        let path = self.path(hash);
        match fs::read_to_string(&path) {
            Ok(content) => content.trim().parse().map_err(|_| {
                Error::CorruptObjectMessage(format!("bad pin count for {}", hash))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn write_count(&self, hash: &Hash, count: u64) -> Result<()> {
        atomic_write(&self.tmp_dir, &self.path(hash), format!("{}\n", count).as_bytes())
    }
}

/// reconstruct a hash from an `XX/YYYY...` store path
pub(crate) fn hash_from_object_path(path: &Path) -> Option<Hash> {
    let file_name = path.file_name()?.to_str()?;
    let parent_name = path.parent()?.file_name()?.to_str()?;
    Hash::from_hex(&format!("{}{}", parent_name, file_name)).ok()
}

pub(crate) fn walk_error(dir: &Path, e: walkdir::Error) -> Error {
    Error::Io {
        path: dir.to_path_buf(),
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("walkdir error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hash(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    fn pin_set() -> (tempfile::TempDir, PinSet) {
        let dir = tempdir().unwrap();
        let pins = PinSet::new(dir.path().join("pins"), dir.path().join("tmp"));
        (dir, pins)
    }

    #[test]
    fn test_pins_are_counted() {
        let (_dir, pins) = pin_set();
        let h = hash(1);

        assert_eq!(pins.increment(&h).unwrap(), 1);
        assert_eq!(pins.increment(&h).unwrap(), 2);
        assert_eq!(pins.decrement(&h).unwrap(), 1);
        assert_eq!(pins.count(&h).unwrap(), 1);
        assert_eq!(pins.decrement(&h).unwrap(), 0);
        assert_eq!(pins.count(&h).unwrap(), 0);
    }

    #[test]
    fn test_unpin_unpinned_is_noop() {
        let (_dir, pins) = pin_set();
        assert_eq!(pins.decrement(&hash(9)).unwrap(), 0);
    }

    #[test]
    fn test_list_pins() {
        let (_dir, pins) = pin_set();
        pins.increment(&hash(2)).unwrap();
        pins.increment(&hash(1)).unwrap();
        pins.increment(&hash(3)).unwrap();
        pins.decrement(&hash(3)).unwrap();

        assert_eq!(pins.list().unwrap(), vec![hash(1), hash(2)]);
    }

    #[test]
    fn test_concurrent_increments() {
        let (_dir, pins) = pin_set();
        let h = hash(4);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        pins.increment(&h).unwrap();
                    }
                });
            }
        });

        assert_eq!(pins.count(&h).unwrap(), 80);
    }

    #[test]
    fn test_separate_handles_share_counts() {
        let (dir, pins) = pin_set();
        let other = PinSet::new(dir.path().join("pins"), dir.path().join("tmp"));
        let h = hash(5);

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20 {
                    pins.increment(&h).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..20 {
                    other.increment(&h).unwrap();
                }
            });
        });

        assert_eq!(pins.count(&h).unwrap(), 40);
        assert_eq!(other.list().unwrap(), vec![h]);
    }
}
