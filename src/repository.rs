use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::persist::{load_manifest, merge_and_pin, save_manifest};
use crate::manifest::Manifest;
use crate::pointer::{read_pointer, write_pointer};
use crate::repo::{Repo, RepoLock};
use crate::store::ContentStore;
use crate::transport::Payload;

/// a repository bound to a live content store
pub struct Repository<S: ContentStore> {
    repo: Repo,
    store: S,
    manifest: Manifest,
    head: Hash,
}

impl<S: ContentStore> Repository<S> {
    /// bind `repo` to `store`: connect configured peers, load the manifest
    pub fn with_store(repo: Repo, store: S) -> Result<Self> {
        let deadline = Deadline::after(repo.config().timeout());

        for peer in &repo.config().store.peers {
            if let Err(e) = store.connect_to_peer(peer, &deadline) {
                warn!(peer = %peer, error = %e, "could not connect to configured peer");
            }
        }

        let pointer = repo.manifest_pointer_path();
        let head = read_pointer(&pointer)?
            .ok_or_else(|| Error::NotInitialized(repo.root().to_path_buf()))?;
        let manifest = load_manifest(&store, &head, &deadline)?;
        debug!(head = %head.short(), versions = manifest.len(), "loaded manifest");

        Ok(Self {
            repo,
            store,
            manifest,
            head,
        })
    }

    /// current manifest, read only
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// hash of the current manifest
    pub fn head(&self) -> Hash {
        self.head
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn repo_mut(&mut self) -> &mut Repo {
        &mut self.repo
    }

    /// fresh deadline from the configured timeout
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.repo.config().timeout())
    }

    /// what this repository advertises to remotes
    pub fn payload(&self) -> Payload {
        Payload {
            hash: self.head,
            identity: self.store.identity(),
        }
    }

    /// lock the repository and catch up with the pointer on disk
    ///
    /// another handle or process may have moved the pointer since this one
    /// was opened. every change to the manifest goes through here first.
    pub(crate) fn lock(&mut self, deadline: &Deadline) -> Result<RepoLock> {
        let lock = self.repo.lock()?;

        let head = read_pointer(&self.repo.manifest_pointer_path())?
            .ok_or_else(|| Error::NotInitialized(self.repo.root().to_path_buf()))?;
        if head != self.head {
            let manifest = load_manifest(&self.store, &head, deadline)?;
            debug!(
                from = %self.head.short(),
                to = %head.short(),
                versions = manifest.len(),
                "manifest moved on disk, reloaded"
            );
            self.manifest = manifest;
            self.head = head;
        }
        Ok(lock)
    }

    /// store and pin `manifest`, then make it current
    pub(crate) fn persist(&mut self, mut manifest: Manifest, deadline: &Deadline) -> Result<Hash> {
        let hash = save_manifest(&self.store, &mut manifest, deadline)?;
        self.install(manifest, hash)?;
        Ok(hash)
    }

    /// merge the manifest a remote advertises into ours
    ///
    /// when the remote already holds everything we have, its manifest is
    /// taken as is so both sides end up on the same hash. when it has
    /// nothing new the head stays. otherwise the merged manifest is stored.
    pub(crate) fn integrate(&mut self, payload: &Payload, deadline: &Deadline) -> Result<Hash> {
        if payload.hash == self.head {
            return Ok(self.head);
        }

        self.store.connect_to_peer(&payload.identity, deadline)?;
        let remote = load_manifest(&self.store, &payload.hash, deadline)?;
        let merged = merge_and_pin(&self.store, &self.manifest, &remote, deadline)?;

        if remote.diff(&self.manifest)?.is_empty() {
            self.store.pin(&payload.hash, deadline)?;
            self.install(remote, payload.hash)?;
            Ok(payload.hash)
        } else if self.manifest.diff(&remote)?.is_empty() {
            debug!(remote = %payload.hash.short(), "remote has nothing new");
            Ok(self.head)
        } else {
            self.persist(merged, deadline)
        }
    }

    /// point at an already stored and pinned manifest, releasing the old one
    fn install(&mut self, mut manifest: Manifest, hash: Hash) -> Result<()> {
        write_pointer(
            &self.repo.tmp_path(),
            &self.repo.manifest_pointer_path(),
            &hash,
        )?;

        let old = self.head;
        if let Err(e) = self.store.unpin(&old) {
            warn!(hash = %old.short(), error = %e, "failed to unpin previous manifest");
        }

        manifest.set_hash(hash);
        info!(
            from = %old.short(),
            to = %hash.short(),
            versions = manifest.len(),
            "manifest updated"
        );
        self.manifest = manifest;
        self.head = hash;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::version;
    use crate::manifest::{PathType, Version};
    use crate::store::{LocalStore, PeerId};
    use tempfile::tempdir;

    fn test_repository() -> (tempfile::TempDir, Repository<LocalStore>) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        (dir, repo.connect().unwrap())
    }

    fn stored(repository: &Repository<LocalStore>, content: &[u8], day: u32) -> Version {
        let mut v = version(0, day, &[]);
        v.hash = repository.store().put(content).unwrap();
        v.path_type = PathType::File;
        v
    }

    #[test]
    fn test_connect_loads_empty_manifest() {
        let (_dir, repository) = test_repository();
        assert!(repository.manifest().is_empty());
        assert_eq!(repository.manifest().hash(), Some(repository.head()));
    }

    #[test]
    fn test_persist_moves_pointer_and_pins() {
        let (_dir, mut repository) = test_repository();
        let old_head = repository.head();
        let v = stored(&repository, b"content", 1);

        let deadline = repository.deadline();
        let hash = repository
            .persist(Manifest::new(vec![v]), &deadline)
            .unwrap();

        assert_eq!(repository.head(), hash);
        assert_eq!(
            read_pointer(&repository.repo().manifest_pointer_path()).unwrap(),
            Some(hash)
        );
        assert!(repository.store().is_pinned(&hash).unwrap());
        assert!(!repository.store().is_pinned(&old_head).unwrap());

        // reopening sees the same state
        let root = repository.repo().root().to_path_buf();
        drop(repository);
        let reopened = Repo::open(&root).unwrap().connect().unwrap();
        assert_eq!(reopened.head(), hash);
        assert_eq!(reopened.manifest().len(), 1);
    }

    #[test]
    fn test_lock_reloads_moved_pointer() {
        let (dir, mut first) = test_repository();
        let mut second = Repo::open(dir.path()).unwrap().connect().unwrap();
        let deadline = first.deadline();

        let v1 = stored(&first, b"one", 1);
        let _lock = first.lock(&deadline).unwrap();
        first.persist(Manifest::new(vec![v1.clone()]), &deadline).unwrap();
        drop(_lock);

        // the second handle still holds the empty manifest until it locks
        assert!(second.manifest().is_empty());
        let _lock = second.lock(&deadline).unwrap();
        assert_eq!(second.head(), first.head());
        assert!(second.manifest().contains(&v1.hash));
    }

    #[test]
    fn test_integrate_adopts_superset() {
        let (_dir_a, mut a) = test_repository();
        let (_dir_b, mut b) = test_repository();

        let v1 = stored(&a, b"one", 1);
        let deadline = a.deadline();
        a.persist(Manifest::new(vec![v1]), &deadline).unwrap();

        b.integrate(&a.payload(), &deadline).unwrap();

        assert_eq!(b.head(), a.head());
        assert_eq!(b.manifest(), a.manifest());
    }

    #[test]
    fn test_integrate_merges_divergent() {
        let (_dir_a, mut a) = test_repository();
        let (_dir_b, mut b) = test_repository();
        let deadline = a.deadline();

        let va = stored(&a, b"from a", 1);
        a.persist(Manifest::new(vec![va]), &deadline).unwrap();
        let vb = stored(&b, b"from b", 2);
        b.persist(Manifest::new(vec![vb]), &deadline).unwrap();

        b.integrate(&a.payload(), &deadline).unwrap();

        assert_eq!(b.manifest().len(), 2);
        assert_ne!(b.head(), a.head());
        // content fetched from a is pinned locally
        let from_a = a.manifest().versions[0].hash;
        assert!(b.store().is_pinned(&from_a).unwrap());
    }

    #[test]
    fn test_integrate_subset_keeps_head() {
        let (_dir_a, mut a) = test_repository();
        let (_dir_b, mut b) = test_repository();
        let deadline = a.deadline();

        let v1 = stored(&a, b"one", 1);
        a.persist(Manifest::new(vec![v1]), &deadline).unwrap();
        b.integrate(&a.payload(), &deadline).unwrap();

        let v2 = stored(&b, b"two", 2);
        let mut versions = b.manifest().versions.clone();
        versions.push(v2);
        b.persist(Manifest::new(versions), &deadline).unwrap();
        let head = b.head();

        assert_eq!(b.integrate(&a.payload(), &deadline).unwrap(), head);
        assert_eq!(b.head(), head);
        assert_eq!(b.manifest().len(), 2);
    }

    #[test]
    fn test_integrate_unreachable_peer() {
        let (dir, mut repository) = test_repository();
        let payload = Payload {
            hash: Hash::ZERO,
            identity: PeerId::for_path(&dir.path().join("nowhere")).unwrap(),
        };

        let deadline = repository.deadline();
        let result = repository.integrate(&payload, &deadline);
        assert!(matches!(result, Err(Error::Unreachable(_))));
    }
}
