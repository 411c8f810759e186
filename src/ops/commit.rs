use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::manifest::{suggest_parents, Manifest, Version};
use crate::repository::Repository;
use crate::store::ContentStore;

/// what to record with a commit
#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub message: String,
    /// explicit parents; `None` uses the current leaf versions
    pub parents: Option<Vec<Hash>>,
    /// pin the committed content so gc keeps it
    pub pin: bool,
}

impl CommitOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parents: None,
            pin: true,
        }
    }

    pub fn parents(mut self, parents: Vec<Hash>) -> Self {
        self.parents = Some(parents);
        self
    }
}

/// record `path` as a new version of the dataset
///
/// the content is stored, a version is merged into the current manifest and
/// the result persisted. on conflict nothing is written and the conflicts
/// are returned in the error. the merged manifest is then
/// `repository.manifest()`.
pub fn commit<S: ContentStore>(
    repository: &mut Repository<S>,
    path: &Path,
    options: &CommitOptions,
) -> Result<Version> {
    let message = options.message.trim();
    if message.is_empty() {
        return Err(Error::EmptyMessage);
    }
    let author = repository
        .repo()
        .config()
        .author()
        .ok_or(Error::NotConfigured)?;

    let path = std::fs::canonicalize(path).with_path(path)?;
    let dsv = repository.repo().dsv_path();
    if dsv.starts_with(&path) || path.starts_with(&dsv) {
        return Err(Error::ContainsRepository(path));
    }

    let deadline = repository.deadline();
    let _lock = repository.lock(&deadline)?;

    let (hash, path_type) = repository.store().add_path(&path)?;
    if repository.manifest().contains(&hash) {
        return Err(Error::AlreadyTracked(hash));
    }

    let parents = match &options.parents {
        Some(parents) => parents.clone(),
        None => suggest_parents(repository.manifest()),
    };
    for unknown in repository.manifest().unknown_commits(&parents) {
        warn!(parent = %unknown, "parent is not a known version");
    }

    let version = Version::new(author.to_string(), message, hash, path_type, parents);
    let merged = repository
        .manifest()
        .merge(&Manifest::new(vec![version.clone()]))?;

    if options.pin {
        repository.store().pin(&hash, &deadline)?;
    }
    let head = repository.persist(merged, &deadline)?;

    info!(
        path = %path.display(),
        hash = %hash.short(),
        manifest = %head.short(),
        "committed"
    );
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use crate::repo::Repo;
    use crate::store::LocalStore;
    use std::fs;
    use tempfile::tempdir;

    fn test_repository() -> (tempfile::TempDir, Repository<LocalStore>) {
        let dir = tempdir().unwrap();
        let mut repo = Repo::init(&dir.path().join("repo")).unwrap();
        repo.config_mut().user = Some(UserConfig {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        });
        repo.save_config().unwrap();
        (dir, repo.connect().unwrap())
    }

    fn write_dataset(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("data.csv"), content).unwrap();
        path
    }

    #[test]
    fn test_commit_directory() {
        let (dir, mut repository) = test_repository();
        let data = write_dataset(dir.path(), "data", "a,b\n1,2\n");

        let version = commit(&mut repository, &data, &CommitOptions::new("first")).unwrap();

        assert_eq!(version.author, "Ada <ada@example.com>");
        assert_eq!(version.message, "first");
        assert_eq!(version.path_type, crate::manifest::PathType::Directory);
        assert!(version.parents.is_empty());
        assert_eq!(repository.manifest().versions, vec![version.clone()]);
        assert!(repository.store().is_pinned(&version.hash).unwrap());
    }

    #[test]
    fn test_commit_chains_parents() {
        let (dir, mut repository) = test_repository();
        let first = write_dataset(dir.path(), "v1", "1\n");
        let second = write_dataset(dir.path(), "v2", "2\n");

        let v1 = commit(&mut repository, &first, &CommitOptions::new("one")).unwrap();
        let v2 = commit(&mut repository, &second, &CommitOptions::new("two")).unwrap();

        assert_eq!(v2.parents, vec![v1.hash]);
        assert_eq!(repository.manifest().len(), 2);
        assert_eq!(repository.manifest().versions[0].hash, v1.hash);
    }

    #[test]
    fn test_commit_from_two_handles_keeps_both() {
        let (dir, mut first) = test_repository();
        let root = first.repo().root().to_path_buf();
        let mut second = Repo::open(&root).unwrap().connect().unwrap();
        let a = write_dataset(dir.path(), "a", "a\n");
        let b = write_dataset(dir.path(), "b", "b\n");

        let va = commit(&mut first, &a, &CommitOptions::new("from first")).unwrap();
        let vb = commit(&mut second, &b, &CommitOptions::new("from second")).unwrap();
        assert_eq!(vb.parents, vec![va.hash]);

        let reopened = Repo::open(&root).unwrap().connect().unwrap();
        assert_eq!(reopened.manifest().len(), 2);
        assert!(reopened.manifest().contains(&va.hash));
        assert!(reopened.manifest().contains(&vb.hash));
        assert!(first.store().is_pinned(&reopened.head()).unwrap());
    }

    #[test]
    fn test_commit_explicit_parents() {
        let (dir, mut repository) = test_repository();
        let data = write_dataset(dir.path(), "data", "x\n");
        let stranger = Hash::from_bytes([7; 32]);

        let options = CommitOptions::new("orphan").parents(vec![stranger]);
        let version = commit(&mut repository, &data, &options).unwrap();
        assert_eq!(version.parents, vec![stranger]);
    }

    #[test]
    fn test_commit_without_pin() {
        let (dir, mut repository) = test_repository();
        let data = write_dataset(dir.path(), "data", "x\n");

        let mut options = CommitOptions::new("unpinned");
        options.pin = false;
        let version = commit(&mut repository, &data, &options).unwrap();
        assert!(!repository.store().is_pinned(&version.hash).unwrap());
    }

    #[test]
    fn test_commit_requires_author() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        let mut repository = repo.connect().unwrap();
        let data = write_dataset(dir.path(), "data", "x\n");

        let result = commit(&mut repository, &data, &CommitOptions::new("msg"));
        assert!(matches!(result, Err(Error::NotConfigured)));
        assert!(repository.manifest().is_empty());
    }

    #[test]
    fn test_commit_empty_message() {
        let (dir, mut repository) = test_repository();
        let data = write_dataset(dir.path(), "data", "x\n");

        let result = commit(&mut repository, &data, &CommitOptions::new("   "));
        assert!(matches!(result, Err(Error::EmptyMessage)));
    }

    #[test]
    fn test_commit_same_content_twice() {
        let (dir, mut repository) = test_repository();
        let data = write_dataset(dir.path(), "data", "x\n");

        commit(&mut repository, &data, &CommitOptions::new("one")).unwrap();
        let head = repository.head();

        let result = commit(&mut repository, &data, &CommitOptions::new("again"));
        assert!(matches!(result, Err(Error::AlreadyTracked(_))));
        assert_eq!(repository.head(), head);
    }

    #[test]
    fn test_commit_refuses_repository_root() {
        let (_dir, mut repository) = test_repository();
        let root = repository.repo().root().to_path_buf();

        let result = commit(&mut repository, &root, &CommitOptions::new("everything"));
        assert!(matches!(result, Err(Error::ContainsRepository(_))));

        let inner = repository.repo().store_path();
        let result = commit(&mut repository, &inner, &CommitOptions::new("store"));
        assert!(matches!(result, Err(Error::ContainsRepository(_))));
    }

    #[test]
    fn test_commit_missing_path() {
        let (dir, mut repository) = test_repository();
        let result = commit(
            &mut repository,
            &dir.path().join("absent"),
            &CommitOptions::new("nothing"),
        );
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
