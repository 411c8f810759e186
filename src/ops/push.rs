use tracing::{debug, info};

use crate::error::Result;
use crate::hash::Hash;
use crate::ops::configured_remote;
use crate::repository::Repository;
use crate::store::ContentStore;
use crate::transport::Remote;

/// send our manifest to the configured remote
///
/// returns the resulting manifest hash, which matches the remote's.
pub fn push<S: ContentStore>(repository: &mut Repository<S>) -> Result<Hash> {
    let remote = configured_remote(repository.repo())?;
    push_to(repository, remote.as_ref())
}

/// push to an already opened remote
///
/// the remote merges our pointer into its dataset; we then adopt whatever
/// it reports back, so local state never runs ahead of what it accepted.
pub fn push_to<S: ContentStore>(
    repository: &mut Repository<S>,
    remote: &dyn Remote,
) -> Result<Hash> {
    let deadline = repository.deadline();
    let _lock = repository.lock(&deadline)?;

    // the manifest goes last, after everything it refers to
    let mut roots: Vec<_> = repository.manifest().versions.iter().map(|v| v.hash).collect();
    roots.push(repository.head());
    let sent = remote.offer(repository.store(), &roots, &deadline)?;
    debug!(sent, "uploaded objects");

    let result = remote.receive(&repository.payload(), &deadline)?;
    let head = repository.integrate(&result, &deadline)?;

    info!(remote = %result.hash.short(), head = %head.short(), "pushed");
    Ok(head)
}
