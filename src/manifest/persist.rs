//! storing manifests in a content store

use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::Result;
use crate::hash::Hash;
use crate::manifest::Manifest;
use crate::store::ContentStore;

/// store `manifest` as JSON and pin it, recording the hash on the value
pub fn save_manifest<S: ContentStore + ?Sized>(
    store: &S,
    manifest: &mut Manifest,
    deadline: &Deadline,
) -> Result<Hash> {
    let hash = store.put(&manifest.to_json()?)?;
    store.pin(&hash, deadline)?;
    manifest.set_hash(hash);
    debug!(hash = %hash.short(), versions = manifest.len(), "saved manifest");
    Ok(hash)
}

/// load the manifest stored under `hash`, asking peers if needed
pub fn load_manifest<S: ContentStore + ?Sized>(
    store: &S,
    hash: &Hash,
    deadline: &Deadline,
) -> Result<Manifest> {
    let bytes = store.get(hash, deadline)?;
    let mut manifest = Manifest::from_json(&bytes)?;
    manifest.set_hash(*hash);
    Ok(manifest)
}

/// merge `new` into `old`, then pin the content of every added version
///
/// the merged manifest is only returned once all new content is local and
/// pinned; if any pin fails the ones already taken are released and the
/// error is returned, so nothing refers to content that never arrived.
pub fn merge_and_pin<S: ContentStore + ?Sized>(
    store: &S,
    old: &Manifest,
    new: &Manifest,
    deadline: &Deadline,
) -> Result<Manifest> {
    let merged = old.merge(new)?;
    let delta = old.diff(new)?;

    let mut pinned = Vec::with_capacity(delta.len());
    for version in &delta {
        if let Err(e) = store.pin(&version.hash, deadline) {
            for hash in &pinned {
                if let Err(unpin_err) = store.unpin(hash) {
                    warn!(hash = %hash.short(), error = %unpin_err, "failed to release pin");
                }
            }
            return Err(e);
        }
        pinned.push(version.hash);
    }

    debug!(pinned = pinned.len(), "pinned new versions");
    Ok(merged)
}
