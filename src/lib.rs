//! dsv - decentralized dataset versioning
//!
//! records snapshots of files and directories in a content-addressed store
//! and keeps their history in a manifest that merges across repositories
//! without a central authority.
//!
//! # Core concepts
//!
//! - **Object**: content-addressed blob or tree (zstd on disk, trees in CBOR)
//! - **Version**: one committed snapshot plus author, date, message and parents
//! - **Manifest**: the topologically sorted versions of a dataset, stored as
//!   a JSON blob; its hash is the only pointer a repository keeps
//! - **Pin**: reference count keeping content safe from gc
//! - **Remote**: one dataset on a server, synced by exchanging
//!   `{hash, identity}` pointers
//!
//! # Hash format
//!
//! object hash = SHA256(kind tag | payload)
//!
//! where the tag is 0x01 for blobs (payload = file bytes) and 0x02 for trees
//! (payload = CBOR of the sorted entry list).
//!
//! # Example usage
//!
//! ```no_run
//! use dsv::ops::{self, CommitOptions};
//! use dsv::Repo;
//! use std::path::Path;
//!
//! // initialize a repository and bind it to its store
//! let mut repository = Repo::init(Path::new("/path/to/repo"))?.connect()?;
//!
//! // commit a directory
//! let version = ops::commit(&mut repository, Path::new("/data"), &CommitOptions::new("raw readings"))?;
//!
//! // checkout to a directory
//! ops::checkout(&repository, &version.hash.to_hex(), Path::new("/destination"))?;
//! # Ok::<(), dsv::Error>(())
//! ```

mod error;
mod hash;
mod repo;
mod repository;

pub mod config;
pub mod deadline;
pub mod fs;
pub mod manifest;
pub mod ops;
pub mod pointer;
pub mod store;
pub mod transport;

pub use config::{Author, Config};
pub use deadline::{CancelToken, Deadline};
pub use error::{Error, Result};
pub use hash::{compute_object_hash, Hash};
pub use manifest::{suggest_parents, Conflict, Manifest, PathType, Version};
pub use repo::{Repo, RepoLock, DSV_DIR};
pub use repository::Repository;
pub use store::{ContentStore, LocalStore, PeerId, StoreBackend};
pub use transport::{Payload, Remote, RemoteUrl};
