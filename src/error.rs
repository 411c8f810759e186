use std::path::PathBuf;

use crate::manifest::Conflict;
use crate::Hash;

/// error type for dsv operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a dsv repository: {0}")]
    NotInitialized(PathBuf),

    #[error("repository already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("author not configured; set user.name and user.email")]
    NotConfigured,

    #[error("no remote configured")]
    NoRemoteConfigured,

    #[error("invalid remote {url}: {reason}")]
    InvalidRemote { url: String, reason: String },

    #[error("merge failed with {} conflict(s)", .0.len())]
    MergeConflict(Vec<Conflict>),

    #[error("cycle detected in manifest")]
    CycleDetected,

    #[error("version {0} not found in manifest")]
    NotFound(String),

    #[error("hash prefix {prefix} matches {} versions", .matches.len())]
    AmbiguousHash { prefix: String, matches: Vec<Hash> },

    #[error("version {0} is already tracked")]
    AlreadyTracked(Hash),

    #[error("empty commit message")]
    EmptyMessage,

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("corrupt object: hash mismatch for {0}")]
    CorruptObject(Hash),

    #[error("corrupt object: {0}")]
    CorruptObjectMessage(String),

    #[error("object {hash} is not a {expected}")]
    UnexpectedObjectKind { hash: Hash, expected: &'static str },

    #[error("unsupported file type at {0}")]
    UnsupportedFileType(PathBuf),

    #[error("checkout target not empty: {0}")]
    TargetNotEmpty(PathBuf),

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("duplicate tree entry name: {0}")]
    DuplicateEntryName(String),

    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("refusing to commit {0}: it contains the repository metadata")]
    ContainsRepository(PathBuf),

    #[error("lock contention on repository")]
    LockContention,

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("invalid peer identity: {0}")]
    InvalidPeer(String),

    #[error("configuration property not found: {0}")]
    ConfigKey(String),

    #[error("remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// classify a reqwest failure against `target`
    pub(crate) fn from_http(err: reqwest::Error, target: &str) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_connect() {
            Error::Unreachable(target.to_string())
        } else {
            Error::Transport {
                message: format!("{}: {}", target, err),
            }
        }
    }
}

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
