//! remote datasets served over http

use std::collections::HashSet;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::Conflict;
use crate::store::peer::{timed, with_trailing_slash};
use crate::store::{ContentStore, Object, ObjectKind};
use crate::transport::{Payload, Remote, RemoteUrl};

/// error body returned by the server
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

/// client for one dataset on an http server
pub struct HttpRemote {
    remote: RemoteUrl,
    endpoint: Url,
    objects: Url,
    client: Client,
}

impl HttpRemote {
    pub fn new(remote: RemoteUrl) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::from_http(e, remote.url().as_str()))?;

        let endpoint = remote.url().clone();
        let objects = with_trailing_slash(remote.server_base())
            .join("objects/")
            .map_err(|e| Error::InvalidRemote {
                url: remote.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            remote,
            endpoint,
            objects,
            client,
        })
    }

    fn object_url(&self, hash: &Hash) -> Result<Url> {
        self.objects
            .join(&hash.to_hex())
            .map_err(|e| Error::InvalidRemote {
                url: self.remote.to_string(),
                reason: e.to_string(),
            })
    }

    fn target(&self) -> &str {
        self.endpoint.as_str()
    }

    /// decode a successful pointer response, or turn a failure into an error
    fn payload_from(&self, resp: Response) -> Result<Payload> {
        let status = resp.status();
        if status.is_success() {
            return resp.json().map_err(|e| Error::from_http(e, self.target()));
        }

        let text = resp.text().unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();

        match (status, body) {
            (StatusCode::CONFLICT, Some(body)) if !body.conflicts.is_empty() => {
                Err(Error::MergeConflict(body.conflicts))
            }
            (StatusCode::NOT_FOUND, _) => Err(Error::DatasetNotFound(format!(
                "{}/{}",
                self.remote.org(),
                self.remote.dataset()
            ))),
            (_, Some(body)) => Err(Error::Remote {
                status: status.as_u16(),
                message: body.error,
            }),
            (_, None) => Err(Error::Remote {
                status: status.as_u16(),
                message: text,
            }),
        }
    }

    /// upload `hash` and whatever the server lacks below it
    ///
    /// children go up before their tree, so an object the server already
    /// holds has its whole subtree there too and is skipped unread.
    fn upload(
        &self,
        store: &dyn ContentStore,
        hash: &Hash,
        seen: &mut HashSet<Hash>,
        deadline: &Deadline,
    ) -> Result<usize> {
        if !seen.insert(*hash) {
            return Ok(0);
        }
        let url = self.object_url(hash)?;

        let head = timed(self.client.head(url.clone()), deadline)?
            .send()
            .map_err(|e| Error::from_http(e, self.target()))?;
        if head.status().is_success() {
            return Ok(0);
        }

        let encoded = store.read_raw(hash, deadline)?;
        let mut sent = 0;
        if encoded.first() == Some(&ObjectKind::Tree.tag()) {
            if let Object::Tree(tree) = Object::decode(hash, &encoded)? {
                for entry in tree.entries() {
                    sent += self.upload(store, &entry.hash, seen, deadline)?;
                }
            }
        }

        let resp = timed(self.client.put(url), deadline)?
            .body(encoded)
            .send()
            .map_err(|e| Error::from_http(e, self.target()))?;
        if !resp.status().is_success() {
            return Err(Error::Remote {
                status: resp.status().as_u16(),
                message: format!("upload of {} rejected", hash.short()),
            });
        }
        Ok(sent + 1)
    }
}

impl Remote for HttpRemote {
    fn pointer(&self, deadline: &Deadline) -> Result<Payload> {
        let resp = timed(self.client.get(self.endpoint.clone()), deadline)?
            .send()
            .map_err(|e| Error::from_http(e, self.target()))?;
        self.payload_from(resp)
    }

    fn receive(&self, payload: &Payload, deadline: &Deadline) -> Result<Payload> {
        let resp = timed(self.client.post(self.endpoint.clone()), deadline)?
            .json(payload)
            .send()
            .map_err(|e| Error::from_http(e, self.target()))?;
        self.payload_from(resp)
    }

    /// upload every object reachable from `roots` the server lacks
    fn offer(&self, store: &dyn ContentStore, roots: &[Hash], deadline: &Deadline) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut sent = 0;
        for root in roots {
            sent += self.upload(store, root, &mut seen, deadline)?;
        }

        debug!(remote = %self.remote, sent, "offered objects");
        Ok(sent)
    }
}
