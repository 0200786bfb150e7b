use std::path::{Path, PathBuf};

use git2::{AutotagOption, Config, Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository};
use log::{debug, info, trace};
use regex_lite::Regex;
use thiserror::Error;

use crate::{flock::FileLock, git::repository::GitRepository};

const REPOS_DIR: &str = "repos";
const WORKTREES_DIR: &str = "worktrees";

/// Bare-clone cache for every repository the orchestrator materializes.
/// Clones live under `<location>/repos`, working trees under
/// `<location>/worktrees`. Holding the cache implies holding its file lock.
pub struct GitCache {
    location: PathBuf,
    worktrees: PathBuf,
    git_config: Config,
    _lock: FileLock,
}

impl std::fmt::Debug for GitCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCache")
            .field("location", &self.location)
            .field("worktrees", &self.worktrees)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("Cache lock cannot be acquired")]
    Lock(#[from] crate::flock::Error),
    #[error("Cannot derive a cache path from remote url `{url}`")]
    RemoteUrl { url: String },
    #[error("Worktree {name} already exists at {existing_path} but we need it at {wanted_path}")]
    WorktreeExists {
        name: String,
        existing_path: String,
        wanted_path: String,
    },
    #[error("Error while canonicalizing path {path}: {error}")]
    Canonicalization { path: String, error: std::io::Error },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl GitCache {
    pub fn new(location: PathBuf) -> Result<GitCache, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_str().unwrap_or("").to_string(),
                });
            }
        } else {
            std::fs::create_dir_all(&location)?;
        }

        let lock = Self::acquire_lock(&location)?;
        let git_config = Config::open_default()?;

        let worktrees = location.join(WORKTREES_DIR);
        Ok(GitCache {
            location,
            worktrees,
            git_config,
            _lock: lock,
        })
    }

    /// Materializes a working tree for `url` at `reference`, reusing the
    /// bare clone and any worktree left by a previous run.
    pub fn materialize(
        &self,
        name: &str,
        url: &str,
        reference: &str,
        sparse_paths: &[String],
    ) -> Result<PathBuf, CacheError> {
        let repository = self.repository(url)?;
        repository.fetch_reference(reference)?;
        let commit_hash = repository.resolve_commit(reference)?;
        info!("Materializing {name} at {commit_hash}");
        repository.create_worktree(name, &commit_hash, sparse_paths)
    }

    pub fn repository(&self, url: &str) -> Result<GitRepository<'_>, CacheError> {
        let mut path = self.location.join(REPOS_DIR);
        path.push(remote_cache_path(url)?);

        let repo = if path.exists() {
            self.open_entry(&path, url)?
        } else {
            self.create_repo(&path, url)?
        };

        Ok(GitRepository::new(self, repo))
    }

    pub fn worktrees_path(&self) -> &Path {
        &self.worktrees
    }

    fn acquire_lock(location: &Path) -> Result<FileLock, CacheError> {
        let location = location.join(".lock");
        debug!("Acquiring a lock on the cache location: {}", location.display());
        let lock = FileLock::new(&location)?;
        debug!("Acquired a lock on the cache location");
        Ok(lock)
    }

    fn open_entry(&self, path: &Path, url: &str) -> Result<Repository, CacheError> {
        trace!("Opening existing repository at {}", path.display());

        let repo = Repository::open(path)?;

        {
            let remote = repo.find_remote("origin")?;
            if remote.url() != Some(url) {
                trace!(
                    "Updating remote existing url {:?} to new url {}",
                    remote.url(),
                    url
                );
                repo.remote_set_url("origin", url)?;
            }
        }

        Ok(repo)
    }

    fn create_repo(&self, path: &Path, url: &str) -> Result<Repository, CacheError> {
        trace!("Creating a new repository at {}", path.display());

        let repo = Repository::init_bare(path)?;
        repo.remote_with_fetch("origin", url, "+refs/heads/*:refs/remotes/origin/*")?;

        Ok(repo)
    }

    pub(super) fn fetch_options(&self) -> Result<FetchOptions<'_>, CacheError> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username, allowed_types| {
            trace!(
                "Requested credentials for {}, username {:?}, allowed types {:?}",
                url,
                username,
                allowed_types
            );
            if allowed_types.contains(CredentialType::USERNAME) {
                return Cred::username("git");
            }
            if allowed_types.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username.unwrap_or("git"));
            }
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Cred::credential_helper(&self.git_config, url, username);
            }
            Err(git2::Error::from_str("no valid authentication available"))
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(callbacks)
            .download_tags(AutotagOption::All);

        Ok(fetch_options)
    }
}

/// Derives the cache directory for a remote url:
/// `https://github.com/ROCm/TheRock.git` becomes `github.com/ROCm/TheRock`.
fn remote_cache_path(url: &str) -> Result<PathBuf, CacheError> {
    let re = Regex::new(r"^(?:[a-z+]+://)?(?:[^/@]+@)?(?P<host>[^/:]+)[/:](?P<path>.+?)(?:\.git)?/?$")
        .unwrap();
    let captures = re.captures(url).ok_or_else(|| CacheError::RemoteUrl {
        url: url.to_string(),
    })?;
    let host = &captures["host"];
    let path = &captures["path"];
    if path.is_empty() || path.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(CacheError::RemoteUrl {
            url: url.to_string(),
        });
    }
    let mut result = PathBuf::from(host);
    for segment in path.split('/') {
        result.push(segment);
    }
    Ok(result)
}
