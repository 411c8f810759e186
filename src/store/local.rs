use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::is_empty_dir;
use crate::hash::{compute_object_hash, Hash};
use crate::manifest::PathType;
use crate::store::object::{self, Object, ObjectKind};
use crate::store::peer::{Peer, PeerId};
use crate::store::pins::PinSet;
use crate::store::tree::{EntryKind, Tree, TreeEntry};
use crate::store::{ContentStore, StoreBackend};

/// a content store in a local directory
///
/// layout: `objects/XX/YYYY` (zstd compressed encoded objects),
/// `pins/XX/YYYY` (pin counts), `tmp/` (staging for atomic writes).
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    identity: PeerId,
    peers: Mutex<Vec<Peer>>,
    pins: PinSet,
}

impl LocalStore {
    fn at(root: PathBuf) -> Result<Self> {
        let identity = PeerId::for_path(&root)?;
        let pins = PinSet::new(root.join("pins"), root.join("tmp"));
        Ok(Self {
            root,
            identity,
            peers: Mutex::new(Vec::new()),
            pins,
        })
    }

    /// advertise a different identity, e.g. the public url of a server
    pub fn with_identity(mut self, identity: PeerId) -> Self {
        self.identity = identity;
        self
    }

    /// another handle on the same directory
    ///
    /// peers connected through it are forgotten when it drops, so a server
    /// can reach one client for one request without keeping it around.
    pub fn session(&self) -> LocalStore {
        let peers = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        LocalStore {
            root: self.root.clone(),
            identity: self.identity.clone(),
            peers: Mutex::new(peers),
            pins: PinSet::new(self.root.join("pins"), self.root.join("tmp")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn objects_path(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn pins(&self) -> &PinSet {
        &self.pins
    }

    /// identities of connected peers
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.id().clone())
            .collect()
    }

    /// make `hash` local, fetching it from a connected peer if needed
    fn ensure_local(&self, hash: &Hash, deadline: &Deadline) -> Result<()> {
        if self.has(hash) {
            return Ok(());
        }

        // snapshot so no lock is held across network calls
        let peers = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for peer in &peers {
            match peer.fetch(hash, deadline) {
                Ok(Some(encoded)) => {
                    if compute_object_hash(&encoded) != *hash {
                        warn!(peer = %peer.id(), hash = %hash.short(), "peer sent corrupt object");
                        continue;
                    }
                    object::write_encoded(&self.objects_path(), &self.tmp_path(), &encoded)?;
                    debug!(peer = %peer.id(), hash = %hash.short(), "fetched object");
                    return Ok(());
                }
                Ok(None) => continue,
                Err(e @ (Error::Timeout | Error::Cancelled)) => return Err(e),
                Err(e) => {
                    warn!(peer = %peer.id(), hash = %hash.short(), error = %e, "peer fetch failed");
                }
            }
        }

        Err(Error::ObjectNotFound(*hash))
    }

    /// store a directory, returning (tree hash, total bytes)
    fn store_directory(&self, path: &Path) -> Result<(Hash, u64)> {
        let mut children: Vec<_> = fs::read_dir(path)
            .with_path(path)?
            .collect::<std::io::Result<_>>()
            .with_path(path)?;
        children.sort_by_key(|e| e.file_name());

        let mut entries = Vec::with_capacity(children.len());
        let mut total = 0u64;
        for child in children {
            let child_path = child.path();
            let name = child
                .file_name()
                .into_string()
                .map_err(|n| Error::InvalidEntryName(n.to_string_lossy().into_owned()))?;

            // symlink_metadata: links are not followed
            let meta = fs::symlink_metadata(&child_path).with_path(&child_path)?;
            let entry = if meta.is_dir() {
                let (hash, size) = self.store_directory(&child_path)?;
                TreeEntry::new(name, EntryKind::Directory, hash, size)
            } else if meta.is_file() {
                let (hash, size) = self.store_file(&child_path)?;
                TreeEntry::new(name, EntryKind::File, hash, size)
            } else {
                return Err(Error::UnsupportedFileType(child_path));
            };

            total += entry.size;
            entries.push(entry);
        }

        let tree = Tree::new(entries)?;
        let encoded = Object::Tree(tree).encode()?;
        let hash = object::write_encoded(&self.objects_path(), &self.tmp_path(), &encoded)?;
        Ok((hash, total))
    }

    fn store_file(&self, path: &Path) -> Result<(Hash, u64)> {
        let mut file = File::open(path).with_path(path)?;
        object::write_blob_streaming(&self.objects_path(), &self.tmp_path(), &mut file)
    }

    fn export_tree(&self, tree: &Tree, dest: &Path) -> Result<()> {
        for entry in tree.entries() {
            let target = dest.join(&entry.name);
            match entry.kind {
                EntryKind::File => self.export_blob(&entry.hash, &target)?,
                EntryKind::Directory => {
                    fs::create_dir(&target).with_path(&target)?;
                    let child = self.read_tree(&entry.hash)?;
                    self.export_tree(&child, &target)?;
                }
            }
        }
        Ok(())
    }

    fn export_blob(&self, hash: &Hash, dest: &Path) -> Result<()> {
        let mut file = File::create_new(dest).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::TargetNotEmpty(dest.to_path_buf())
            } else {
                Error::Io {
                    path: dest.to_path_buf(),
                    source: e,
                }
            }
        })?;
        object::read_blob_to(&self.objects_path(), hash, &mut file)?;
        file.sync_all().with_path(dest)?;
        Ok(())
    }

    fn read_tree(&self, hash: &Hash) -> Result<Tree> {
        match object::read_object(&self.objects_path(), hash)? {
            Object::Tree(tree) => Ok(tree),
            Object::Blob(_) => Err(Error::UnexpectedObjectKind {
                hash: *hash,
                expected: ObjectKind::Tree.name(),
            }),
        }
    }
}

impl StoreBackend for LocalStore {
    fn initialize(path: &Path) -> Result<Self> {
        for dir in ["objects", "pins", "tmp"] {
            let p = path.join(dir);
            fs::create_dir_all(&p).with_path(&p)?;
        }
        Self::open(path)
    }

    fn open(path: &Path) -> Result<Self> {
        if !path.join("objects").is_dir() {
            return Err(Error::NotInitialized(path.to_path_buf()));
        }
        let root = fs::canonicalize(path).with_path(path)?;
        Self::at(root)
    }
}

impl ContentStore for LocalStore {
    fn identity(&self) -> PeerId {
        self.identity.clone()
    }

    fn put(&self, bytes: &[u8]) -> Result<Hash> {
        let encoded = Object::Blob(bytes.to_vec()).encode()?;
        object::write_encoded(&self.objects_path(), &self.tmp_path(), &encoded)
    }

    fn get(&self, hash: &Hash, deadline: &Deadline) -> Result<Vec<u8>> {
        self.ensure_local(hash, deadline)?;
        match object::read_object(&self.objects_path(), hash)? {
            Object::Blob(bytes) => Ok(bytes),
            Object::Tree(_) => Err(Error::UnexpectedObjectKind {
                hash: *hash,
                expected: ObjectKind::Blob.name(),
            }),
        }
    }

    fn has(&self, hash: &Hash) -> bool {
        object::object_exists(&self.objects_path(), hash)
    }

    fn pin(&self, hash: &Hash, deadline: &Deadline) -> Result<()> {
        let reachable = self.closure(hash, deadline)?;
        let count = self.pins.increment(hash)?;
        debug!(hash = %hash.short(), objects = reachable.len(), count, "pinned");
        Ok(())
    }

    fn unpin(&self, hash: &Hash) -> Result<()> {
        let count = self.pins.decrement(hash)?;
        debug!(hash = %hash.short(), count, "unpinned");
        Ok(())
    }

    fn is_pinned(&self, hash: &Hash) -> Result<bool> {
        Ok(self.pins.count(hash)? > 0)
    }

    fn connect_to_peer(&self, peer: &PeerId, deadline: &Deadline) -> Result<()> {
        if *peer == self.identity {
            return Ok(());
        }
        if self.peers().contains(peer) {
            return Ok(());
        }

        let connected = Peer::connect(peer, deadline)?;
        debug!(peer = %peer, "connected to peer");

        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if !peers.iter().any(|p| p.id() == peer) {
            peers.push(connected);
        }
        Ok(())
    }

    fn add_file(&self, path: &Path) -> Result<Hash> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        if !meta.is_file() {
            return Err(Error::UnsupportedFileType(path.to_path_buf()));
        }
        let (hash, size) = self.store_file(path)?;
        debug!(path = %path.display(), hash = %hash.short(), size, "added file");
        Ok(hash)
    }

    fn add_directory(&self, path: &Path) -> Result<Hash> {
        let (hash, size) = self.store_directory(path)?;
        debug!(path = %path.display(), hash = %hash.short(), size, "added directory");
        Ok(hash)
    }

    fn export(&self, hash: &Hash, dest: &Path, deadline: &Deadline) -> Result<PathType> {
        self.closure(hash, deadline)?;

        match object::read_kind(&self.objects_path(), hash)? {
            ObjectKind::Blob => {
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).with_path(parent)?;
                }
                self.export_blob(hash, dest)?;
                Ok(PathType::File)
            }
            ObjectKind::Tree => {
                if !is_empty_dir(dest)? {
                    return Err(Error::TargetNotEmpty(dest.to_path_buf()));
                }
                fs::create_dir_all(dest).with_path(dest)?;
                let tree = self.read_tree(hash)?;
                self.export_tree(&tree, dest)?;
                Ok(PathType::Directory)
            }
        }
    }

    fn read_raw(&self, hash: &Hash, deadline: &Deadline) -> Result<Vec<u8>> {
        self.ensure_local(hash, deadline)?;
        object::read_encoded(&self.objects_path(), hash)
    }

    fn write_raw(&self, hash: &Hash, encoded: &[u8]) -> Result<()> {
        if compute_object_hash(encoded) != *hash {
            return Err(Error::CorruptObject(*hash));
        }
        object::write_encoded(&self.objects_path(), &self.tmp_path(), encoded)?;
        Ok(())
    }

    fn closure(&self, root: &Hash, deadline: &Deadline) -> Result<Vec<Hash>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![*root];

        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            deadline.check()?;
            self.ensure_local(&hash, deadline)?;
            order.push(hash);

            if object::read_kind(&self.objects_path(), &hash)? == ObjectKind::Tree {
                let tree = self.read_tree(&hash)?;
                // reversed so children pop in name order
                stack.extend(tree.entries().iter().rev().map(|e| e.hash));
            }
        }

        Ok(order)
    }
}
