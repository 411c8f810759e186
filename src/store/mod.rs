//! content-addressed object storage
//!
//! objects are immutable and named by the SHA-256 of their encoded form.
//! files become blobs, directories become trees of named entries, so equal
//! directory contents always produce the same root hash.

mod gc;
mod local;
pub mod object;
pub(crate) mod peer;
mod pins;
pub mod tree;

use std::path::Path;

pub use gc::GcStats;
pub use local::LocalStore;
pub use object::{Object, ObjectKind};
pub use peer::{Peer, PeerId};
pub use pins::PinSet;
pub use tree::{EntryKind, Tree, TreeEntry};

use crate::deadline::Deadline;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::manifest::PathType;

/// immutable content-addressed byte storage with pinning and peers
pub trait ContentStore: Send + Sync {
    /// address other nodes use to reach this store
    fn identity(&self) -> PeerId;

    /// store bytes as a blob; same bytes always give the same hash
    fn put(&self, bytes: &[u8]) -> Result<Hash>;

    /// blob bytes for `hash`, asking connected peers when missing locally
    fn get(&self, hash: &Hash, deadline: &Deadline) -> Result<Vec<u8>>;

    /// is `hash` available locally
    fn has(&self, hash: &Hash) -> bool;

    /// make `hash` and everything it references local, then protect it
    /// from gc. pins are counted, each pin needs its own unpin.
    fn pin(&self, hash: &Hash, deadline: &Deadline) -> Result<()>;

    /// drop one pin; never deletes anything by itself
    fn unpin(&self, hash: &Hash) -> Result<()>;

    fn is_pinned(&self, hash: &Hash) -> Result<bool>;

    /// remember a peer so later gets can resolve what it holds
    fn connect_to_peer(&self, peer: &PeerId, deadline: &Deadline) -> Result<()>;

    /// store a single file
    fn add_file(&self, path: &Path) -> Result<Hash>;

    /// store a directory recursively, returning the root tree hash
    fn add_directory(&self, path: &Path) -> Result<Hash>;

    /// store a file or directory, reporting which one it was
    fn add_path(&self, path: &Path) -> Result<(Hash, PathType)> {
        let meta = std::fs::metadata(path).with_path(path)?;
        if meta.is_dir() {
            Ok((self.add_directory(path)?, PathType::Directory))
        } else if meta.is_file() {
            Ok((self.add_file(path)?, PathType::File))
        } else {
            Err(Error::UnsupportedFileType(path.to_path_buf()))
        }
    }

    /// materialise `hash` at `dest`
    fn export(&self, hash: &Hash, dest: &Path, deadline: &Deadline) -> Result<PathType>;

    /// encoded object bytes, for copying between stores
    fn read_raw(&self, hash: &Hash, deadline: &Deadline) -> Result<Vec<u8>>;

    /// store encoded object bytes after checking them against `hash`
    fn write_raw(&self, hash: &Hash, encoded: &[u8]) -> Result<()>;

    /// every hash reachable from `root`, root first
    fn closure(&self, root: &Hash, deadline: &Deadline) -> Result<Vec<Hash>>;
}

/// a store kept in a directory
///
/// setup happens once, explicitly, through `initialize`.
pub trait StoreBackend: ContentStore + Sized {
    /// create the on-disk layout at `path` and open it
    fn initialize(path: &Path) -> Result<Self>;

    /// open an existing store
    fn open(path: &Path) -> Result<Self>;
}
