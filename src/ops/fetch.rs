use tracing::info;

use crate::error::Result;
use crate::hash::Hash;
use crate::ops::configured_remote;
use crate::repository::Repository;
use crate::store::ContentStore;
use crate::transport::Remote;

/// merge the configured remote's manifest into ours
///
/// returns the resulting manifest hash.
pub fn fetch<S: ContentStore>(repository: &mut Repository<S>) -> Result<Hash> {
    let remote = configured_remote(repository.repo())?;
    fetch_from(repository, remote.as_ref())
}

/// fetch from an already opened remote
///
/// every added version is pinned before the merged manifest is persisted.
pub fn fetch_from<S: ContentStore>(
    repository: &mut Repository<S>,
    remote: &dyn Remote,
) -> Result<Hash> {
    let deadline = repository.deadline();
    let _lock = repository.lock(&deadline)?;

    let payload = remote.pointer(&deadline)?;
    let before = repository.head();
    let head = repository.integrate(&payload, &deadline)?;

    info!(
        remote = %payload.hash.short(),
        from = %before.short(),
        to = %head.short(),
        "fetched"
    );
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repo::Repo;
    use crate::transport::{DatasetRegistry, LocalRemote};
    use tempfile::tempdir;

    #[test]
    fn test_fetch_without_remote() {
        let dir = tempdir().unwrap();
        let mut repository = Repo::init(dir.path()).unwrap().connect().unwrap();

        let result = fetch(&mut repository);
        assert!(matches!(result, Err(Error::NoRemoteConfigured)));
    }

    #[test]
    fn test_fetch_empty_dataset() {
        let dir = tempdir().unwrap();
        let registry = DatasetRegistry::initialize(&dir.path().join("registry")).unwrap();
        let created = registry.create_dataset("acme", "weather").unwrap();
        let remote = LocalRemote::new(registry, "acme", "weather");

        let mut repository = Repo::init(&dir.path().join("repo"))
            .unwrap()
            .connect()
            .unwrap();
        let head = fetch_from(&mut repository, &remote).unwrap();

        // both sides hold the same empty manifest
        assert_eq!(head, created.hash);
        assert!(repository.manifest().is_empty());
    }

    #[test]
    fn test_fetch_missing_dataset() {
        let dir = tempdir().unwrap();
        let registry = DatasetRegistry::initialize(&dir.path().join("registry")).unwrap();
        let remote = LocalRemote::new(registry, "acme", "weather");

        let mut repository = Repo::init(&dir.path().join("repo"))
            .unwrap()
            .connect()
            .unwrap();
        let result = fetch_from(&mut repository, &remote);
        assert!(matches!(result, Err(Error::DatasetNotFound(_))));
    }
}
