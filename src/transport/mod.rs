//! transport layer for remote operations
//!
//! a remote is one dataset on a server, addressed as
//! `http(s)://host/<org>/<dataset>` or `file:///<registry>/<org>/<dataset>`.
//! both sides exchange a [`Payload`]: a manifest hash and the identity of a
//! peer that can serve it.

pub mod http;
pub mod registry;
pub mod serve;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::pointer::validate_name;
use crate::store::{ContentStore, PeerId};

pub use http::HttpRemote;
pub use registry::{DatasetRegistry, LocalRemote};
pub use serve::Server;

/// pointer exchanged with remotes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub hash: Hash,
    pub identity: PeerId,
}

/// parsed remote address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteUrl {
    url: Url,
    org: String,
    dataset: String,
}

impl RemoteUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRemote {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "http" | "https" | "file" => {}
            other => return Err(invalid(&format!("unsupported scheme {}", other))),
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let [.., org, dataset] = segments.as_slice() else {
            return Err(invalid("expected <org>/<dataset> at the end of the path"));
        };
        validate_name(org).map_err(|e| invalid(&e.to_string()))?;
        validate_name(dataset).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            org: org.to_string(),
            dataset: dataset.to_string(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn is_local(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// the url with `org/dataset` removed
    pub fn server_base(&self) -> Url {
        let mut base = self.url.clone();
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop_if_empty().pop().pop();
            segments.push("");
        }
        base
    }

    /// registry directory of a `file://` remote
    pub fn registry_root(&self) -> Result<PathBuf> {
        self.server_base()
            .to_file_path()
            .map_err(|_| Error::InvalidRemote {
                url: self.url.to_string(),
                reason: "not a local path".to_string(),
            })
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// one dataset on a server
pub trait Remote {
    /// the dataset's current pointer
    fn pointer(&self, deadline: &Deadline) -> Result<Payload>;

    /// ask the server to merge `payload` into the dataset
    ///
    /// returns the dataset's pointer after the merge.
    fn receive(&self, payload: &Payload, deadline: &Deadline) -> Result<Payload>;

    /// upload objects the server may be unable to fetch from us
    ///
    /// returns how many objects were sent.
    fn offer(
        &self,
        _store: &dyn ContentStore,
        _roots: &[Hash],
        _deadline: &Deadline,
    ) -> Result<usize> {
        Ok(0)
    }
}

/// open the remote at `url`
pub fn open_remote(url: &RemoteUrl) -> Result<Box<dyn Remote>> {
    if url.is_local() {
        let registry = DatasetRegistry::open(&url.registry_root()?)?;
        Ok(Box::new(LocalRemote::new(registry, url.org(), url.dataset())))
    } else {
        Ok(Box::new(HttpRemote::new(url.clone())?))
    }
}
