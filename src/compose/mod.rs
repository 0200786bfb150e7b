pub mod fingerprint;
pub mod generate;
pub mod sources;
pub mod target;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

use crate::{
    exec::{ExecError, Tool},
    git::{CacheError, GitCache},
    model::{
        env::{ArtifactConfig, CompositionConfig, MergeMode},
        version::PinnedVersions,
        ParseError,
    },
};
use sources::{ArtifactSource, SourceLocation, Symlink};
use target::TargetTree;

const ENV_DIR: &str = "env";
const GIT_DIR: &str = "git";
const VENV_DIR: &str = "venv";
const STAGING_DIR: &str = "staging";
const BUILD_DIR: &str = "build";

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot derive an owner/repo slug from `{url}`")]
    RepoSlug { url: String },
    #[error("Compiler link source `{path}` has no file name")]
    BadLinkPath { path: PathBuf },
    #[error("[test] runner is empty; configure the integration test command")]
    EmptyTestRunner,
    #[error("No environment fingerprint found at {path}; run `envfetch setup` first")]
    FingerprintMissing { path: PathBuf },
    #[error(
        "envfetch.toml has drifted from the last full setup; run `envfetch setup` to rebuild the environment"
    )]
    FingerprintMismatch,
}

/// Everything an install strategy needs: the git cache, the target tree and
/// the scratch directories, all owned by one run.
pub struct ComposeContext<'a> {
    pub cache: &'a GitCache,
    pub target: TargetTree,
    pub venv_dir: PathBuf,
    pub staging_root: PathBuf,
    pub build_root: PathBuf,
    /// `owner/repo` slug the artifact fetcher downloads CI runs from.
    pub artifact_repo: String,
}

/// Drives the stage sequence into the shared target tree. Strictly
/// sequential; the first failing stage aborts the run, and the fingerprint
/// is written only after the final stage of a full setup.
pub struct Orchestrator<'a> {
    config: &'a CompositionConfig,
    versions: &'a PinnedVersions,
    project_root: PathBuf,
    cache_root: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a CompositionConfig,
        versions: &'a PinnedVersions,
        project_root: impl Into<PathBuf>,
        cache_root: impl Into<PathBuf>,
    ) -> Orchestrator<'a> {
        Orchestrator {
            config,
            versions,
            project_root: project_root.into(),
            cache_root: cache_root.into(),
        }
    }

    /// Full setup: destroys and rebuilds the whole environment, recording
    /// the configuration fingerprint as the last step.
    pub fn run_setup(&self) -> Result<(), ComposeError> {
        self.reset()?;
        let cache = GitCache::new(self.cache_root.join(GIT_DIR))?;
        let ctx = self.context(&cache)?;

        let _toolchain_src = self.toolchain_setup(&ctx)?;
        self.dependency_install(&ctx)?;
        let runtime_src = self.source_build_runtime(&ctx)?;
        self.artifact_generation(&ctx, &runtime_src)?;

        fingerprint::write(&self.cache_root, self.config)?;
        info!(
            "Environment setup complete at {}",
            ctx.target.root().display()
        );
        Ok(())
    }

    /// Incremental entry point: validates the fingerprint, builds the
    /// plugin against the existing environment and runs the integration
    /// tests. Never reconciles a drifted environment.
    pub fn run_build_and_test(&self) -> Result<(), ComposeError> {
        fingerprint::validate(&self.cache_root, self.config)?;

        let cache = GitCache::new(self.cache_root.join(GIT_DIR))?;
        let ctx = self.context(&cache)?;

        ctx.target.write_version_marker(&self.versions.iree)?;
        self.source_build_plugin(&ctx)?;
        self.run_tests(&ctx)?;
        Ok(())
    }

    /// Destroys the cache directory, taking the target tree and any stale
    /// fingerprint with it.
    fn reset(&self) -> Result<(), ComposeError> {
        if self.cache_root.exists() {
            info!("Resetting environment cache at {}", self.cache_root.display());
            std::fs::remove_dir_all(&self.cache_root)?;
        }
        std::fs::create_dir_all(&self.cache_root)?;
        Ok(())
    }

    fn context<'c>(&self, cache: &'c GitCache) -> Result<ComposeContext<'c>, ComposeError> {
        let target = TargetTree::new(self.cache_root.join(ENV_DIR));
        target.ensure_layout()?;
        let staging_root = self.cache_root.join(STAGING_DIR);
        let build_root = self.cache_root.join(BUILD_DIR);
        std::fs::create_dir_all(&staging_root)?;
        std::fs::create_dir_all(&build_root)?;
        Ok(ComposeContext {
            cache,
            target,
            venv_dir: self.cache_root.join(VENV_DIR),
            staging_root,
            build_root,
            artifact_repo: repo_slug(&self.config.toolchain.repo)?,
        })
    }

    /// Materializes the toolchain's working tree at its pinned ref and
    /// provisions the isolated package environment.
    fn toolchain_setup(&self, ctx: &ComposeContext) -> Result<PathBuf, ComposeError> {
        let toolchain = &self.config.toolchain;
        info!(
            "Setting up toolchain from {} at {} (TheRock {})",
            toolchain.repo, toolchain.reference, self.versions.therock
        );
        let worktree = ctx.cache.materialize(
            "toolchain",
            &toolchain.repo,
            &toolchain.reference,
            &toolchain.sparse_paths,
        )?;

        info!(
            "Creating isolated package environment at {}",
            ctx.venv_dir.display()
        );
        Tool::new("python3")
            .args(["-m", "venv"])
            .arg(&ctx.venv_dir)
            .run_checked()?;
        if !toolchain.requirements.is_empty() {
            let pip = ctx.venv_dir.join("bin").join("pip");
            Tool::new(pip.to_string_lossy().into_owned())
                .arg("install")
                .args(&toolchain.requirements)
                .run_checked()?;
        }
        Ok(worktree)
    }

    /// Executes the declared artifact sources in configuration order. The
    /// replace-before-flatten ordering within a subtree is a
    /// configuration-time contract; violations are surfaced but the
    /// declared order is never changed.
    fn dependency_install(&self, ctx: &ComposeContext) -> Result<(), ComposeError> {
        let mut flattened: BTreeSet<PathBuf> = BTreeSet::new();
        for artifact in &self.config.artifacts {
            if artifact.merge == MergeMode::Replace && flattened.contains(&artifact.dest) {
                warn!(
                    "replace-mode artifact `{}` wipes {} after a flatten-mode artifact already \
                     merged into it; check the [[artifact]] order",
                    artifact.filter,
                    artifact.dest.display()
                );
            }
            if artifact.merge == MergeMode::Flatten {
                flattened.insert(artifact.dest.clone());
            }

            let source = ArtifactSource::from(artifact);
            info!("Installing {}", source.describe());
            source.execute(ctx)?;
        }
        Ok(())
    }

    /// Builds the runtime library from its pinned ref into the target tree.
    /// Returns the runtime's working tree for the generated presets.
    fn source_build_runtime(&self, ctx: &ComposeContext) -> Result<PathBuf, ComposeError> {
        let runtime = &self.config.runtime;
        sources::source_build(
            ctx,
            "runtime",
            &SourceLocation::Remote {
                repo: runtime.repo.clone(),
                reference: runtime.reference.clone(),
                sparse_paths: runtime.sparse_paths.clone(),
            },
            &runtime.options,
        )
    }

    fn source_build_plugin(&self, ctx: &ComposeContext) -> Result<(), ComposeError> {
        let plugin = &self.config.plugin;
        ArtifactSource::SourceBuild {
            name: "plugin".to_string(),
            location: SourceLocation::Local {
                dir: self.project_root.join(&plugin.source_dir),
            },
            options: plugin.options.clone(),
        }
        .execute(ctx)
    }

    /// Writes the generated presets and activation script, then provisions
    /// the compiler by installing its published wheel and symlinking the
    /// shared library and driver into the target tree. The compiler is
    /// never built here; it ships independently as a package.
    fn artifact_generation(
        &self,
        ctx: &ComposeContext,
        runtime_source_dir: &Path,
    ) -> Result<(), ComposeError> {
        let plugin_dir = self.project_root.join(&self.config.plugin.source_dir);
        generate::write_cmake_presets(&plugin_dir, &ctx.target, runtime_source_dir)?;
        generate::write_activation_script(&self.cache_root, &ctx.target)?;

        let compiler = &self.config.compiler;
        let links = vec![
            Symlink {
                from: compiler.lib.clone(),
                to: Path::new("lib").join(link_file_name(&compiler.lib)?),
            },
            Symlink {
                from: compiler.driver.clone(),
                to: Path::new("bin").join(link_file_name(&compiler.driver)?),
            },
        ];
        ArtifactSource::PackageInstall {
            package: compiler.package.clone(),
            version: self.versions.iree.clone(),
            index: compiler.index.clone(),
            links,
        }
        .execute(ctx)
    }

    /// Invokes the external test runner with the target tree's subpaths
    /// prepended to the search paths.
    fn run_tests(&self, ctx: &ComposeContext) -> Result<(), ComposeError> {
        let (program, args) = self
            .config
            .test
            .runner
            .split_first()
            .ok_or(ComposeError::EmptyTestRunner)?;

        info!("Running integration tests (IREE {})", self.versions.iree);
        let mut tool = Tool::new(program.clone())
            .args(args)
            .args(&self.config.test.tags)
            .cwd(&self.project_root);
        for (key, value) in ctx.target.search_path_env() {
            tool = tool.env(key, value);
        }
        tool.run_streaming()?;
        Ok(())
    }
}

impl From<&ArtifactConfig> for ArtifactSource {
    fn from(artifact: &ArtifactConfig) -> ArtifactSource {
        ArtifactSource::ArtifactFetch {
            run_id: artifact.run_id.clone(),
            group: artifact.group.clone(),
            filter: artifact.filter.clone(),
            merge: artifact.merge,
            dest: artifact.dest.clone(),
        }
    }
}

fn link_file_name(path: &Path) -> Result<&std::ffi::OsStr, ComposeError> {
    path.file_name().ok_or_else(|| ComposeError::BadLinkPath {
        path: path.to_path_buf(),
    })
}

/// `https://github.com/ROCm/TheRock` becomes `ROCm/TheRock`.
fn repo_slug(url: &str) -> Result<String, ComposeError> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let segments: Vec<&str> = trimmed
        .split(['/', ':'])
        .filter(|segment| !segment.is_empty())
        .collect();
    match segments[..] {
        [.., owner, repo] if segments.len() > 2 => Ok(format!("{owner}/{repo}")),
        _ => Err(ComposeError::RepoSlug {
            url: url.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::env::SAMPLE_CONFIG;

    use pretty_assertions::assert_eq;

    fn sample() -> CompositionConfig {
        CompositionConfig::from_toml_str(SAMPLE_CONFIG).unwrap()
    }

    fn versions() -> PinnedVersions {
        PinnedVersions {
            iree: "3.11.0rc20260301".to_string(),
            therock: "7.12.0a20260228".to_string(),
        }
    }

    #[test]
    fn repo_slug_takes_the_last_two_segments() {
        assert_eq!(
            repo_slug("https://github.com/ROCm/TheRock").unwrap(),
            "ROCm/TheRock"
        );
        assert_eq!(
            repo_slug("git@github.com:iree-org/iree.git").unwrap(),
            "iree-org/iree"
        );
        repo_slug("https://github.com").unwrap_err();
    }

    #[test]
    fn build_and_test_requires_a_fingerprint() {
        let project = tempfile::tempdir().unwrap();
        let cache_root = project.path().join("cache");
        let config = sample();
        let versions = versions();
        let orchestrator = Orchestrator::new(&config, &versions, project.path(), &cache_root);

        let error = orchestrator.run_build_and_test().unwrap_err();
        assert!(matches!(error, ComposeError::FingerprintMissing { .. }));
        // The gate fires before the target tree is touched.
        assert!(!cache_root.exists());
    }

    #[test]
    fn build_and_test_rejects_a_drifted_configuration() {
        let project = tempfile::tempdir().unwrap();
        let cache_root = project.path().join("cache");
        std::fs::create_dir_all(&cache_root).unwrap();
        fingerprint::write(&cache_root, &sample()).unwrap();

        let mut drifted = sample();
        drifted.artifacts[0].run_id = "99999999".to_string();
        let versions = versions();
        let orchestrator = Orchestrator::new(&drifted, &versions, project.path(), &cache_root);

        let error = orchestrator.run_build_and_test().unwrap_err();
        assert!(matches!(error, ComposeError::FingerprintMismatch));
    }

    #[test]
    fn failed_setup_leaves_no_fingerprint() {
        let project = tempfile::tempdir().unwrap();
        let cache_root = project.path().join("cache");

        // An unreachable toolchain repository fails TOOLCHAIN_SETUP.
        let mut config = sample();
        config.toolchain.repo = "file:///nonexistent/toolchain".to_string();
        let versions = versions();
        let orchestrator = Orchestrator::new(&config, &versions, project.path(), &cache_root);

        orchestrator.run_setup().unwrap_err();
        assert!(!fingerprint::fingerprint_path(&cache_root).exists());

        let error = orchestrator.run_build_and_test().unwrap_err();
        assert!(matches!(error, ComposeError::FingerprintMissing { .. }));
    }

    #[test]
    fn setup_reset_destroys_previous_state() {
        let project = tempfile::tempdir().unwrap();
        let cache_root = project.path().join("cache");
        let stale = cache_root.join("env").join("lib").join("stale.so");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "stale").unwrap();
        fingerprint::write(&cache_root, &sample()).unwrap();

        let mut config = sample();
        config.toolchain.repo = "file:///nonexistent/toolchain".to_string();
        let versions = versions();
        let orchestrator = Orchestrator::new(&config, &versions, project.path(), &cache_root);

        // The run fails later, but RESET has already destroyed old state,
        // stale fingerprint included.
        orchestrator.run_setup().unwrap_err();
        assert!(!stale.exists());
        assert!(!fingerprint::fingerprint_path(&cache_root).exists());
    }
}
