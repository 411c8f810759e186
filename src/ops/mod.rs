//! high-level operations on dsv repositories

mod checkout;
mod clone;
mod commit;
mod fetch;
mod gc;
mod log;
mod push;

pub use checkout::checkout;
pub use clone::clone;
pub use commit::{commit, CommitOptions};
pub use fetch::{fetch, fetch_from};
pub use gc::gc;
pub use log::{log, log_manifest, LogEntry};
pub use push::{push, push_to};

use crate::error::{Error, Result};
use crate::transport::{open_remote, Remote};

/// the remote configured for this repository
pub(crate) fn configured_remote(repo: &crate::repo::Repo) -> Result<Box<dyn Remote>> {
    let url = repo.config().remote()?.ok_or(Error::NoRemoteConfigured)?;
    open_remote(&url)
}
