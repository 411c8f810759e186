use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::object;

/// address of a node that can serve objects
///
/// `file:///path/to/store` for a store on this machine, or the base
/// `http(s)://` url of a dataset server.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// identity of a store directory on this machine
    pub fn for_path(path: &Path) -> Result<Self> {
        Url::from_directory_path(path)
            .map(|url| Self(url.to_string()))
            .map_err(|_| Error::InvalidPeer(path.display().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// a connected peer
#[derive(Clone, Debug)]
pub enum Peer {
    Local {
        id: PeerId,
        objects: PathBuf,
    },
    Http {
        id: PeerId,
        base: Url,
        client: reqwest::blocking::Client,
    },
}

impl Peer {
    /// resolve `id` and check the peer answers before `deadline`
    pub fn connect(id: &PeerId, deadline: &Deadline) -> Result<Self> {
        deadline.check()?;
        let url = Url::parse(id.as_str()).map_err(|_| Error::InvalidPeer(id.to_string()))?;

        match url.scheme() {
            "file" => {
                let root = url
                    .to_file_path()
                    .map_err(|_| Error::InvalidPeer(id.to_string()))?;
                let objects = root.join("objects");
                if !objects.is_dir() {
                    return Err(Error::Unreachable(id.to_string()));
                }
                Ok(Peer::Local {
                    id: id.clone(),
                    objects,
                })
            }
            "http" | "https" => {
                let base = with_trailing_slash(url);
                let client = reqwest::blocking::Client::builder()
                    .build()
                    .map_err(|e| Error::from_http(e, id.as_str()))?;

                let probe = base
                    .join("id")
                    .map_err(|_| Error::InvalidPeer(id.to_string()))?;
                let resp = timed(client.get(probe), deadline)?
                    .send()
                    .map_err(|e| Error::from_http(e, id.as_str()))?;
                if !resp.status().is_success() {
                    return Err(Error::Unreachable(format!(
                        "{} (status {})",
                        id,
                        resp.status()
                    )));
                }

                Ok(Peer::Http {
                    id: id.clone(),
                    base,
                    client,
                })
            }
            _ => Err(Error::InvalidPeer(id.to_string())),
        }
    }

    pub fn id(&self) -> &PeerId {
        match self {
            Peer::Local { id, .. } | Peer::Http { id, .. } => id,
        }
    }

    /// fetch the encoded form of `hash`; `None` when the peer lacks it
    ///
    /// the bytes are unverified, callers check them against `hash`.
    pub fn fetch(&self, hash: &Hash, deadline: &Deadline) -> Result<Option<Vec<u8>>> {
        deadline.check()?;
        match self {
            Peer::Local { objects, .. } => match object::read_encoded(objects, hash) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(Error::ObjectNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            Peer::Http { id, base, client } => {
                let url = base
                    .join(&format!("objects/{}", hash.to_hex()))
                    .map_err(|_| Error::InvalidPeer(id.to_string()))?;
                let resp = timed(client.get(url), deadline)?
                    .send()
                    .map_err(|e| Error::from_http(e, id.as_str()))?;

                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !resp.status().is_success() {
                    return Err(Error::Remote {
                        status: resp.status().as_u16(),
                        message: format!("fetching {} from {}", hash.short(), id),
                    });
                }

                let bytes = resp.bytes().map_err(|e| Error::from_http(e, id.as_str()))?;
                Ok(Some(bytes.to_vec()))
            }
        }
    }
}

/// apply the deadline's remaining time as a request timeout
pub(crate) fn timed(
    request: reqwest::blocking::RequestBuilder,
    deadline: &Deadline,
) -> Result<reqwest::blocking::RequestBuilder> {
    Ok(match deadline.remaining()? {
        Some(left) => request.timeout(left),
        None => request,
    })
}

/// `Url::join` replaces the last segment unless the base ends in '/'
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
