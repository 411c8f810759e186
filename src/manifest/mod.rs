//! version history of one dataset
//!
//! a manifest is an append-only list of versions kept in topological order
//! (ancestors first). everything here is pure; persisting a manifest is
//! done through [`persist`].

mod conflict;
mod merge;
pub mod persist;
mod toposort;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use conflict::Conflict;
pub use merge::suggest_parents;

use crate::error::{Error, Result};
use crate::hash::Hash;

/// whether a version addresses a single file or a directory tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    #[serde(rename = "FILE")]
    File,
    #[serde(rename = "DIRECTORY")]
    Directory,
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathType::File => f.write_str("FILE"),
            PathType::Directory => f.write_str("DIRECTORY"),
        }
    }
}

/// one committed snapshot of a dataset
///
/// `hash` addresses the snapshot content, not this record, so two versions
/// can share a hash while disagreeing on metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub hash: Hash,
    pub path_type: PathType,
    #[serde(default)]
    pub parents: Vec<Hash>,
}

impl Version {
    /// a version dated now
    pub fn new(
        author: impl Into<String>,
        message: impl Into<String>,
        hash: Hash,
        path_type: PathType,
        parents: Vec<Hash>,
    ) -> Self {
        Self {
            author: author.into(),
            date: Utc::now(),
            message: message.into(),
            hash,
            path_type,
            parents,
        }
    }

    pub fn same_hash(&self, other: &Version) -> bool {
        self.hash == other.hash
    }

    /// parent hashes as a set
    pub fn parent_set(&self) -> BTreeSet<Hash> {
        self.parents.iter().copied().collect()
    }
}

/// full equality: same hash and same metadata, parents compared as sets
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.same_hash(other)
            && self.author == other.author
            && self.date == other.date
            && self.message == other.message
            && self.path_type == other.path_type
            && self.parent_set() == other.parent_set()
    }
}

impl Eq for Version {}

/// topologically ordered version list plus the hash it was stored under
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub versions: Vec<Version>,
    #[serde(skip)]
    hash: Option<Hash>,
}

impl Manifest {
    /// an unsorted, unpersisted manifest; `merge` sorts
    pub fn new(versions: Vec<Version>) -> Self {
        Self {
            versions,
            hash: None,
        }
    }

    /// hash of the stored form, once persisted
    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    pub(crate) fn set_hash(&mut self, hash: Hash) {
        self.hash = Some(hash);
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// version with exactly this hash
    pub fn find(&self, hash: &Hash) -> Option<&Version> {
        self.versions.iter().find(|v| v.hash == *hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.find(hash).is_some()
    }

    /// resolve a full hash or unique hex prefix to a version
    pub fn resolve_prefix(&self, prefix: &str) -> Result<&Version> {
        if prefix.is_empty() {
            return Err(Error::NotFound("(empty prefix)".to_string()));
        }

        if let Ok(hash) = Hash::from_hex(prefix) {
            if let Some(version) = self.find(&hash) {
                return Ok(version);
            }
        }

        let matches: Vec<&Version> = self
            .versions
            .iter()
            .filter(|v| v.hash.has_prefix(prefix))
            .collect();

        match matches.as_slice() {
            [] => Err(Error::NotFound(prefix.to_string())),
            [only] => Ok(only),
            many => Err(Error::AmbiguousHash {
                prefix: prefix.to_string(),
                matches: many.iter().map(|v| v.hash).collect(),
            }),
        }
    }

    /// stored form: `{"versions": [...]}`
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// manifests are equal when they hold equal versions in the same order
impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.versions == other.versions
    }
}
