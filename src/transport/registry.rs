//! server side datasets kept on the local filesystem
//!
//! layout under the registry root:
//!
//! ```text
//! store/                    shared content store
//! datasets/<org>/<name>     pointer to the dataset's current manifest
//! locks/<org>/<name>        flock serializing updates of one dataset
//! tmp/                      staging for atomic pointer writes
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::manifest::persist::{load_manifest, merge_and_pin, save_manifest};
use crate::manifest::Manifest;
use crate::pointer::{read_pointer, validate_name, write_pointer};
use crate::store::{ContentStore, LocalStore, PeerId, StoreBackend};
use crate::transport::{Payload, Remote};

/// a set of datasets sharing one content store
#[derive(Debug)]
pub struct DatasetRegistry {
    root: PathBuf,
    store: LocalStore,
}

impl DatasetRegistry {
    /// create the registry layout at `root`
    pub fn initialize(root: &Path) -> Result<Self> {
        for dir in ["datasets", "locks", "tmp"] {
            let p = root.join(dir);
            fs::create_dir_all(&p).with_path(&p)?;
        }
        LocalStore::initialize(&root.join("store"))?;
        info!(root = %root.display(), "initialized registry");
        Self::open(root)
    }

    pub fn open(root: &Path) -> Result<Self> {
        if !root.join("datasets").is_dir() {
            return Err(Error::NotInitialized(root.to_path_buf()));
        }
        let root = fs::canonicalize(root).with_path(root)?;
        let store = LocalStore::open(&root.join("store"))?;
        Ok(Self { root, store })
    }

    /// advertise `identity` instead of the store path, e.g. a public url
    pub fn with_identity(mut self, identity: PeerId) -> Self {
        self.store = self.store.with_identity(identity);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn dataset_path(&self, org: &str, name: &str) -> Result<PathBuf> {
        validate_name(org)?;
        validate_name(name)?;
        Ok(self.root.join("datasets").join(org).join(name))
    }

    /// hold the update lock of one dataset until the guard drops
    fn lock_dataset(&self, org: &str, name: &str) -> Result<Flock<File>> {
        let dir = self.root.join("locks").join(org);
        fs::create_dir_all(&dir).with_path(&dir)?;

        let path = dir.join(name);
        let file = File::create(&path).with_path(&path)?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| Error::Io {
            path,
            source: errno.into(),
        })
    }

    /// create an empty dataset
    pub fn create_dataset(&self, org: &str, name: &str) -> Result<Payload> {
        let path = self.dataset_path(org, name)?;
        let _lock = self.lock_dataset(org, name)?;

        if path.exists() {
            return Err(Error::DatasetExists(format!("{}/{}", org, name)));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        let mut empty = Manifest::default();
        let hash = save_manifest(&self.store, &mut empty, &Deadline::never())?;
        write_pointer(&self.tmp_path(), &path, &hash)?;

        info!(dataset = %format!("{}/{}", org, name), "created dataset");
        Ok(self.payload(hash))
    }

    /// all datasets as `(org, name)`, sorted
    pub fn datasets(&self) -> Result<Vec<(String, String)>> {
        let base = self.root.join("datasets");
        let mut found = Vec::new();
        for org in fs::read_dir(&base).with_path(&base)? {
            let org = org.with_path(&base)?;
            let org_path = org.path();
            if !org_path.is_dir() {
                continue;
            }
            for dataset in fs::read_dir(&org_path).with_path(&org_path)? {
                let dataset = dataset.with_path(&org_path)?;
                found.push((
                    org.file_name().to_string_lossy().into_owned(),
                    dataset.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        found.sort();
        Ok(found)
    }

    /// current pointer of a dataset
    pub fn pointer(&self, org: &str, name: &str) -> Result<Payload> {
        let hash = self.head(org, name)?;
        Ok(self.payload(hash))
    }

    fn head(&self, org: &str, name: &str) -> Result<Hash> {
        let path = self.dataset_path(org, name)?;
        read_pointer(&path)?.ok_or_else(|| Error::DatasetNotFound(format!("{}/{}", org, name)))
    }

    fn payload(&self, hash: Hash) -> Payload {
        Payload {
            hash,
            identity: self.store.identity(),
        }
    }

    /// merge the manifest a client advertises into a dataset
    ///
    /// the client's peer is connected when reachable; an http client may
    /// instead have uploaded the objects beforehand.
    pub fn receive(
        &self,
        org: &str,
        name: &str,
        incoming: &Payload,
        deadline: &Deadline,
    ) -> Result<Payload> {
        let path = self.dataset_path(org, name)?;
        let _lock = self.lock_dataset(org, name)?;

        let head = self.head(org, name)?;
        if incoming.hash == head {
            return Ok(self.payload(head));
        }
        // the client is reachable for this request only
        let store = self.store.session();
        let current = load_manifest(&store, &head, deadline)?;

        if let Err(e) = store.connect_to_peer(&incoming.identity, deadline) {
            if !store.has(&incoming.hash) {
                return Err(e);
            }
            debug!(peer = %incoming.identity, error = %e, "client not reachable, using uploaded objects");
        }

        let theirs = load_manifest(&store, &incoming.hash, deadline)?;
        let mut merged = merge_and_pin(&store, &current, &theirs, deadline)?;

        let new_head = if theirs.diff(&current)?.is_empty() {
            store.pin(&incoming.hash, deadline)?;
            incoming.hash
        } else if current.diff(&theirs)?.is_empty() {
            return Ok(self.payload(head));
        } else {
            save_manifest(&store, &mut merged, deadline)?
        };

        write_pointer(&self.tmp_path(), &path, &new_head)?;
        if let Err(e) = store.unpin(&head) {
            warn!(hash = %head.short(), error = %e, "failed to unpin previous manifest");
        }

        info!(
            dataset = %format!("{}/{}", org, name),
            from = %head.short(),
            to = %new_head.short(),
            "dataset updated"
        );
        Ok(self.payload(new_head))
    }
}

/// a dataset in a registry on this machine
pub struct LocalRemote {
    registry: DatasetRegistry,
    org: String,
    dataset: String,
}

impl LocalRemote {
    pub fn new(registry: DatasetRegistry, org: &str, dataset: &str) -> Self {
        Self {
            registry,
            org: org.to_string(),
            dataset: dataset.to_string(),
        }
    }
}

impl Remote for LocalRemote {
    fn pointer(&self, _deadline: &Deadline) -> Result<Payload> {
        self.registry.pointer(&self.org, &self.dataset)
    }

    fn receive(&self, payload: &Payload, deadline: &Deadline) -> Result<Payload> {
        self.registry
            .receive(&self.org, &self.dataset, payload, deadline)
    }
}
