use std::path::PathBuf;

use git2::{build::CheckoutBuilder, Repository, ResetType};
use log::{debug, info, warn};

use super::cache::{CacheError, GitCache};

/// One cached bare clone. Working trees are checked out under the cache's
/// worktrees directory, keyed by component name and commit hash.
pub struct GitRepository<'a> {
    cache: &'a GitCache,
    git_repo: Repository,
}

impl<'a> GitRepository<'a> {
    pub(super) fn new(cache: &'a GitCache, git_repo: Repository) -> GitRepository<'a> {
        GitRepository { cache, git_repo }
    }

    /// Fetches `reference` from origin. Tries the single ref first and falls
    /// back to a full fetch for remotes that refuse direct object fetches.
    pub fn fetch_reference(&self, reference: &str) -> Result<(), CacheError> {
        let mut remote = self.git_repo.find_remote("origin")?;

        if let Err(error) =
            remote.fetch(&[reference], Some(&mut self.cache.fetch_options()?), None)
        {
            warn!(
                "Failed to fetch {} directly, falling back to a full fetch: {}",
                reference, error
            );
            let refspecs: Vec<String> = remote
                .refspecs()
                .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
                .collect();
            remote.fetch(&refspecs, Some(&mut self.cache.fetch_options()?), None)?;
        }

        Ok(())
    }

    /// Resolves a ref, tag or commit hash to a full commit hash.
    pub fn resolve_commit(&self, reference: &str) -> Result<String, CacheError> {
        let object = self
            .git_repo
            .revparse_single(reference)
            .or_else(|_| self.git_repo.revparse_single(&format!("origin/{reference}")))?;
        Ok(object.peel_to_commit()?.id().to_string())
    }

    /// Checks out `commit_hash` as a worktree named after the component.
    /// When `sparse_paths` is non-empty only those paths are checked out.
    pub fn create_worktree(
        &self,
        name: &str,
        commit_hash: &str,
        sparse_paths: &[String],
    ) -> Result<PathBuf, CacheError> {
        let base_path = self.cache.worktrees_path().join(name);

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        let worktree_path = base_path.join(commit_hash);
        let worktree_name = format!("{name}-{commit_hash}");

        debug!("Finding worktree {} for {}.", worktree_name, name);

        match self.git_repo.find_worktree(&worktree_name) {
            Ok(worktree) => {
                let canonical_existing_path = worktree.path().canonicalize().map_err(|e| {
                    CacheError::Canonicalization {
                        path: worktree.path().to_string_lossy().to_string(),
                        error: e,
                    }
                })?;

                let canonical_wanted_path =
                    worktree_path
                        .canonicalize()
                        .map_err(|e| CacheError::Canonicalization {
                            path: worktree_path.to_string_lossy().to_string(),
                            error: e,
                        })?;

                if canonical_existing_path != canonical_wanted_path {
                    return Err(CacheError::WorktreeExists {
                        name: worktree_name,
                        existing_path: worktree.path().to_str().unwrap_or("").to_string(),
                        wanted_path: worktree_path.to_str().unwrap_or("").to_string(),
                    });
                }
                info!(
                    "Found existing worktree for {} at {}.",
                    name,
                    canonical_wanted_path.to_string_lossy()
                );
            }
            Err(_) => {
                info!(
                    "Creating new worktree for {} at {}.",
                    name,
                    worktree_path.to_string_lossy()
                );

                self.git_repo
                    .worktree(&worktree_name, &worktree_path, None)?;
            }
        };

        let worktree_repo = Repository::open(&worktree_path)?;
        let object = worktree_repo.revparse_single(commit_hash)?;

        if sparse_paths.is_empty() {
            worktree_repo.reset(&object, ResetType::Hard, None)?;
        } else {
            worktree_repo.set_head_detached(object.peel_to_commit()?.id())?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            for path in sparse_paths {
                checkout.path(path);
            }
            worktree_repo.checkout_tree(&object, Some(&mut checkout))?;
        }

        Ok(worktree_path)
    }
}
