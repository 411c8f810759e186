use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::toposort::toposort;
use crate::manifest::{Conflict, Manifest, Version};

impl Manifest {
    /// every pair of versions sharing a hash without being equal
    ///
    /// pairs are (ours, theirs). beyond those, incoming versions that
    /// disagree with an earlier incoming version are reported as well, since
    /// merging both would leave two records for one hash. so an inconsistent
    /// `new` conflicts even with an empty manifest.
    pub fn conflicts(&self, new: &Manifest) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (i, theirs) in new.versions.iter().enumerate() {
            for ours in self.versions.iter().chain(&new.versions[..i]) {
                if ours.same_hash(theirs) && ours != theirs {
                    conflicts.push(Conflict::new(ours.clone(), theirs.clone()));
                }
            }
        }
        conflicts
    }

    pub fn is_mergeable(&self, new: &Manifest) -> bool {
        self.conflicts(new).is_empty()
    }

    /// incoming versions not already recorded here
    pub fn diff(&self, new: &Manifest) -> Result<Vec<Version>> {
        let conflicts = self.conflicts(new);
        if !conflicts.is_empty() {
            return Err(Error::MergeConflict(conflicts));
        }
        Ok(self.novel(new))
    }

    /// union of both histories, sorted ancestors first
    ///
    /// nothing is merged when any conflict exists.
    pub fn merge(&self, new: &Manifest) -> Result<Manifest> {
        let conflicts = self.conflicts(new);
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "merge refused");
            return Err(Error::MergeConflict(conflicts));
        }

        let novel = self.novel(new);
        let added = novel.len();

        let mut candidates = self.versions.clone();
        candidates.extend(novel);
        let versions = toposort(candidates)?;

        debug!(
            ours = self.len(),
            theirs = new.len(),
            added,
            total = versions.len(),
            "merged manifests"
        );
        Ok(Manifest::new(versions))
    }

    /// versions whose hash no other version lists as a parent
    pub fn leaf_versions(&self) -> Vec<&Version> {
        let referenced: HashSet<Hash> = self
            .versions
            .iter()
            .flat_map(|v| v.parents.iter().copied())
            .collect();

        self.versions
            .iter()
            .filter(|v| !referenced.contains(&v.hash))
            .collect()
    }

    /// the given hashes that no version here records
    pub fn unknown_commits(&self, hashes: &[Hash]) -> Vec<Hash> {
        hashes
            .iter()
            .filter(|h| !self.contains(h))
            .copied()
            .collect()
    }

    /// incoming versions not equal to any version here, first copy only
    fn novel(&self, new: &Manifest) -> Vec<Version> {
        let mut out: Vec<Version> = Vec::new();
        for v in &new.versions {
            if !self.versions.contains(v) && !out.contains(v) {
                out.push(v.clone());
            }
        }
        out
    }
}

/// default parents for the next commit: the current leaves
pub fn suggest_parents(manifest: &Manifest) -> Vec<Hash> {
    manifest.leaf_versions().iter().map(|v| v.hash).collect()
}
