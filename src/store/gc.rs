use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{IoResultExt, Result};
use crate::hash::Hash;
use crate::store::local::LocalStore;
use crate::store::object::{self, Object};
use crate::store::pins::{hash_from_object_path, walk_error};

/// gc statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub objects_kept: usize,
    pub objects_removed: usize,
    pub bytes_freed: u64,
}

impl LocalStore {
    /// remove every object not reachable from a pin or from `extra_roots`
    ///
    /// this is the only operation that deletes objects.
    pub fn gc(&self, extra_roots: &[Hash], dry_run: bool) -> Result<GcStats> {
        let objects_dir = self.objects_path();

        // mark phase: collect all reachable objects
        let mut reachable = HashSet::new();
        let mut roots = self.pins().list()?;
        roots.extend_from_slice(extra_roots);
        for root in &roots {
            mark(&objects_dir, root, &mut reachable)?;
        }

        // sweep phase: remove unmarked objects
        let mut stats = GcStats {
            objects_kept: reachable.len(),
            ..GcStats::default()
        };
        sweep(&objects_dir, &reachable, dry_run, &mut stats)?;

        info!(
            removed = stats.objects_removed,
            bytes = stats.bytes_freed,
            dry_run,
            "gc finished"
        );
        Ok(stats)
    }
}

/// mark `root` and everything below it, skipping objects not held locally
fn mark(objects_dir: &Path, root: &Hash, reachable: &mut HashSet<Hash>) -> Result<()> {
    let mut stack = vec![*root];
    while let Some(hash) = stack.pop() {
        if reachable.contains(&hash) {
            continue;
        }
        if !object::object_exists(objects_dir, &hash) {
            warn!(hash = %hash.short(), "gc root references missing object");
            continue;
        }
        reachable.insert(hash);

        if object::read_kind(objects_dir, &hash)? == object::ObjectKind::Tree {
            if let Object::Tree(tree) = object::read_object(objects_dir, &hash)? {
                stack.extend(tree.entries().iter().map(|e| e.hash));
            }
        }
    }
    Ok(())
}

/// sweep the object directory, removing objects not in the reachable set
fn sweep(
    dir: &Path,
    reachable: &HashSet<Hash>,
    dry_run: bool,
    stats: &mut GcStats,
) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(hash) = hash_from_object_path(path) {
            if !reachable.contains(&hash) {
                let meta = fs::metadata(path).with_path(path)?;
                stats.bytes_freed += meta.len();
                stats.objects_removed += 1;

                if !dry_run {
                    fs::remove_file(path).with_path(path)?;
                }
            }
        }
    }

    // clean up empty fan-out directories
    if !dry_run {
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| walk_error(dir, e))?;
            if entry.file_type().is_dir() {
                // fails harmlessly when not empty
                let _ = fs::remove_dir(entry.path());
            }
        }
    }

    Ok(())
}
