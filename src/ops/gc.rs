use tracing::info;

use crate::error::Result;
use crate::repository::Repository;
use crate::store::{GcStats, LocalStore};

/// garbage collect objects the repository no longer needs
///
/// roots are every pin plus the current manifest and all its versions.
pub fn gc(repository: &mut Repository<LocalStore>, dry_run: bool) -> Result<GcStats> {
    let deadline = repository.deadline();
    let _lock = repository.lock(&deadline)?;

    let mut roots = vec![repository.head()];
    roots.extend(repository.manifest().versions.iter().map(|v| v.hash));

    let stats = repository.store().gc(&roots, dry_run)?;
    info!(
        removed = stats.objects_removed,
        kept = stats.objects_kept,
        bytes = stats.bytes_freed,
        dry_run,
        "gc finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, PathType, Version};
    use crate::repo::Repo;
    use crate::store::ContentStore;
    use tempfile::tempdir;

    #[test]
    fn test_gc_keeps_unpinned_versions() {
        let dir = tempdir().unwrap();
        let mut repository = Repo::init(dir.path()).unwrap().connect().unwrap();

        // tracked by the manifest but never pinned
        let tracked = repository.store().put(b"tracked").unwrap();
        let garbage = repository.store().put(b"garbage").unwrap();
        let v = Version::new("Ada <ada@example.com>", "m", tracked, PathType::File, vec![]);
        let deadline = repository.deadline();
        repository.persist(Manifest::new(vec![v]), &deadline).unwrap();

        // the garbage blob and the replaced empty manifest
        let stats = gc(&mut repository, true).unwrap();
        assert_eq!(stats.objects_removed, 2);
        assert!(repository.store().has(&garbage));

        gc(&mut repository, false).unwrap();
        assert!(repository.store().has(&tracked));
        assert!(repository.store().has(&repository.head()));
        assert!(!repository.store().has(&garbage));
    }

    #[test]
    fn test_gc_sees_versions_from_other_handles() {
        let dir = tempdir().unwrap();
        let mut stale = Repo::init(dir.path()).unwrap().connect().unwrap();
        let mut other = Repo::open(dir.path()).unwrap().connect().unwrap();

        let tracked = other.store().put(b"committed elsewhere").unwrap();
        let v = Version::new("Ada <ada@example.com>", "m", tracked, PathType::File, vec![]);
        let deadline = other.deadline();
        other.persist(Manifest::new(vec![v]), &deadline).unwrap();

        gc(&mut stale, false).unwrap();
        assert_eq!(stale.head(), other.head());
        assert!(stale.store().has(&tracked));
    }
}
