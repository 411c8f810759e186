use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::ops::fetch;
use crate::repo::Repo;
use crate::repository::Repository;
use crate::store::LocalStore;
use crate::transport::RemoteUrl;

/// create a repository at `dest` tracking `url` and fetch it
///
/// a failure after initialization leaves the partial repository in place.
pub fn clone(url: &str, dest: &Path) -> Result<Repository<LocalStore>> {
    let remote = RemoteUrl::parse(url)?;

    let mut repo = Repo::init(dest)?;
    repo.config_mut().remote = Some(remote.to_string());
    repo.save_config()?;

    let mut repository = repo.connect()?;
    let head = fetch(&mut repository)?;

    info!(remote = %remote, dest = %dest.display(), head = %head.short(), "cloned");
    Ok(repository)
}
