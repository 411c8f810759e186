use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::info;

use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{Error, IoResultExt, Result};
use crate::manifest::persist::save_manifest;
use crate::manifest::Manifest;
use crate::pointer::write_pointer;
use crate::repository::Repository;
use crate::store::{LocalStore, StoreBackend};

/// name of the metadata directory at the repository root
pub const DSV_DIR: &str = ".dsv";

/// an initialized repository, not yet bound to its store
///
/// call [`Repo::connect`] to get a [`Repository`] that can commit and sync.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    config: Config,
}

impl Repo {
    /// initialize a new repository rooted at the given path
    ///
    /// creates the store and records an empty manifest as the current one.
    pub fn init(root: &Path) -> Result<Self> {
        let dsv = root.join(DSV_DIR);
        let config_path = dsv.join("config.toml");
        if config_path.exists() {
            return Err(Error::AlreadyInitialized(root.to_path_buf()));
        }

        std::fs::create_dir_all(dsv.join("tmp")).with_path(&dsv)?;
        let root = std::fs::canonicalize(root).with_path(root)?;

        let repo = Self {
            root,
            config: Config::default(),
        };

        let store = LocalStore::initialize(&repo.store_path())?;
        let mut empty = Manifest::default();
        let hash = save_manifest(&store, &mut empty, &Deadline::never())?;
        write_pointer(&repo.tmp_path(), &repo.manifest_pointer_path(), &hash)?;

        // config last: its presence marks the repository as initialized
        repo.config.save(&repo.config_path())?;

        info!(root = %repo.root.display(), "initialized repository");
        Ok(repo)
    }

    /// open the repository rooted at the given path
    pub fn open(root: &Path) -> Result<Self> {
        let config_path = root.join(DSV_DIR).join("config.toml");
        if !config_path.exists() {
            return Err(Error::NotInitialized(root.to_path_buf()));
        }

        let config = Config::load(&config_path)?;
        let root = std::fs::canonicalize(root).with_path(root)?;

        Ok(Self { root, config })
    }

    /// open the repository containing `start`, searching upwards
    pub fn find(start: &Path) -> Result<Self> {
        let start = std::fs::canonicalize(start).with_path(start)?;
        for dir in start.ancestors() {
            if Self::is_initialized(dir) {
                return Self::open(dir);
            }
        }
        Err(Error::NotInitialized(start))
    }

    pub fn is_initialized(root: &Path) -> bool {
        root.join(DSV_DIR).join("config.toml").is_file()
    }

    /// bind the repository to its store and load the current manifest
    pub fn connect(self) -> Result<Repository<LocalStore>> {
        let store = LocalStore::open(&self.store_path())?;
        Repository::with_store(self, store)
    }

    /// repository root path (the directory holding `.dsv`)
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    pub fn dsv_path(&self) -> PathBuf {
        self.root.join(DSV_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dsv_path().join("config.toml")
    }

    /// pointer file holding the current manifest hash
    pub fn manifest_pointer_path(&self) -> PathBuf {
        self.dsv_path().join("MANIFEST")
    }

    pub fn store_path(&self) -> PathBuf {
        self.dsv_path().join("store")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.dsv_path().join("tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dsv_path().join("lock")
    }

    /// acquire exclusive lock on repository
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<RepoLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;

        Ok(RepoLock { _flock: flock })
    }
}

/// guard that holds repository lock until dropped
pub struct RepoLock {
    _flock: Flock<File>,
}
