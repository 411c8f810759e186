//! http server exposing a dataset registry
//!
//! routes:
//!
//! ```text
//! GET  /id                   identity of the server's store
//! HEAD /objects/<hash>       200 when the object is present
//! GET  /objects/<hash>       encoded object bytes
//! PUT  /objects/<hash>       upload encoded object bytes
//! GET  /<org>/<dataset>      current pointer
//! POST /<org>/<dataset>      merge a client pointer, returns the new one
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::deadline::Deadline;
use crate::error::Error;
use crate::hash::Hash;
use crate::manifest::Conflict;
use crate::store::{ContentStore, PeerId};
use crate::transport::{DatasetRegistry, Payload};

/// shared state of a running server
#[derive(Debug)]
pub struct Server {
    registry: DatasetRegistry,
    timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Id,
    Object(Hash),
    Dataset { org: String, name: String },
}

#[derive(Serialize)]
struct IdBody {
    identity: PeerId,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    conflicts: &'a [Conflict],
}

impl Server {
    /// serve `registry`; `timeout` bounds the work done for one request
    pub fn new(registry: DatasetRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    fn handle(&self, method: &Method, route: Route, body: Bytes) -> Response<Full<Bytes>> {
        let store = self.registry.store();
        match (method, route) {
            (&Method::GET, Route::Id) => json_ok(&IdBody {
                identity: store.identity(),
            }),

            (&Method::HEAD, Route::Object(hash)) => {
                if store.has(&hash) {
                    respond(StatusCode::OK, "application/octet-stream", Bytes::new())
                } else {
                    respond(StatusCode::NOT_FOUND, "application/octet-stream", Bytes::new())
                }
            }
            (&Method::GET, Route::Object(hash)) => {
                // only what is held here, never proxied from other peers
                if !store.has(&hash) {
                    return plain_error(StatusCode::NOT_FOUND, "object not found");
                }
                match store.read_raw(&hash, &Deadline::never()) {
                    Ok(bytes) => respond(StatusCode::OK, "application/octet-stream", bytes),
                    Err(e) => json_error(&e),
                }
            }
            (&Method::PUT, Route::Object(hash)) => match store.write_raw(&hash, &body) {
                Ok(()) => {
                    debug!(hash = %hash.short(), bytes = body.len(), "object uploaded");
                    respond(StatusCode::OK, "application/json", Bytes::from_static(b"{}"))
                }
                Err(e) => json_error(&e),
            },

            (&Method::GET, Route::Dataset { org, name }) => {
                match self.registry.pointer(&org, &name) {
                    Ok(payload) => json_ok(&payload),
                    Err(e) => json_error(&e),
                }
            }
            (&Method::POST, Route::Dataset { org, name }) => {
                let payload: Payload = match serde_json::from_slice(&body) {
                    Ok(payload) => payload,
                    Err(e) => return json_error(&Error::Json(e)),
                };
                let deadline = Deadline::after(self.timeout);
                match self.registry.receive(&org, &name, &payload, &deadline) {
                    Ok(result) => json_ok(&result),
                    Err(e) => {
                        warn!(dataset = %format!("{}/{}", org, name), error = %e, "receive failed");
                        json_error(&e)
                    }
                }
            }

            _ => plain_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        }
    }
}

fn parse_route(path: &str) -> Result<Route, Response<Full<Bytes>>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["id"] => Ok(Route::Id),
        ["objects", hex] => Hash::from_hex(hex)
            .map(Route::Object)
            .map_err(|e| json_error(&e)),
        [org, name] => Ok(Route::Dataset {
            org: org.to_string(),
            name: name.to_string(),
        }),
        _ => Err(plain_error(StatusCode::NOT_FOUND, "not found")),
    }
}

/// route one request; blocking store work runs off the async workers
pub async fn dispatch(
    server: Arc<Server>,
    method: Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let route = match parse_route(path) {
        Ok(route) => route,
        Err(resp) => return resp,
    };

    let joined = tokio::task::spawn_blocking(move || server.handle(&method, route, body)).await;
    match joined {
        Ok(resp) => resp,
        Err(e) => {
            error!(error = %e, "request handler failed");
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    server: Arc<Server>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes();

    let resp = dispatch(server, method.clone(), &path, body).await;
    debug!(%method, %path, status = resp.status().as_u16(), "request");
    Ok(resp)
}

/// accept connections on `listener` until an accept fails
pub async fn serve(server: Arc<Server>, listener: TcpListener) -> std::io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        identity = %server.registry().store().identity(),
        "serving registry"
    );

    loop {
        let (stream, _) = listener.accept().await?;
        let server = server.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(move |req| handle_request(req, server.clone())))
                .await
            {
                error!(error = ?e, "error serving connection");
            }
        });
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::MergeConflict(_) => StatusCode::CONFLICT,
        Error::DatasetNotFound(_) => StatusCode::NOT_FOUND,
        // content a manifest refers to could not be obtained
        Error::ObjectNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::InvalidDatasetName(_)
        | Error::InvalidHashHex(_)
        | Error::InvalidPeer(_)
        | Error::CorruptObject(_)
        | Error::CorruptObjectMessage(_)
        | Error::CycleDetected
        | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Unreachable(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json_ok<T: Serialize>(data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();
    respond(StatusCode::OK, "application/json", body)
}

fn json_error(err: &Error) -> Response<Full<Bytes>> {
    let conflicts: &[Conflict] = match err {
        Error::MergeConflict(conflicts) => conflicts.as_slice(),
        _ => &[],
    };
    let body = serde_json::to_vec(&ErrorBody {
        error: err.to_string(),
        conflicts,
    })
    .unwrap_or_default();
    respond(status_for(err), "application/json", body)
}

fn plain_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ErrorBody {
        error: message.to_string(),
        conflicts: &[],
    })
    .unwrap_or_default();
    respond(status, "application/json", body)
}
