use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::manifest::Version;
use crate::repository::Repository;
use crate::store::ContentStore;

/// materialise the version named by a full hash or unique prefix at `dest`
///
/// a directory version needs `dest` missing or empty; a file version needs
/// `dest` not to exist.
pub fn checkout<S: ContentStore>(
    repository: &Repository<S>,
    hash_or_prefix: &str,
    dest: &Path,
) -> Result<Version> {
    let version = repository.manifest().resolve_prefix(hash_or_prefix)?.clone();

    let deadline = repository.deadline();
    let kind = repository.store().export(&version.hash, dest, &deadline)?;
    if kind != version.path_type {
        warn!(
            hash = %version.hash.short(),
            recorded = %version.path_type,
            stored = %kind,
            "version type does not match stored content"
        );
    }

    info!(hash = %version.hash.short(), dest = %dest.display(), "checked out");
    Ok(version)
}
