use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use super::{ComposeContext, ComposeError};
use crate::{exec::Tool, model::env::MergeMode};

/// Where a source-built component's tree comes from: a remote repository
/// materialized through the git cache, or a directory that already exists
/// (the plugin under test lives in the consuming project).
#[derive(Debug, Clone)]
pub enum SourceLocation {
    Remote {
        repo: String,
        reference: String,
        sparse_paths: Vec<String>,
    },
    Local {
        dir: PathBuf,
    },
}

impl SourceLocation {
    fn materialize(&self, name: &str, ctx: &ComposeContext) -> Result<PathBuf, ComposeError> {
        match self {
            SourceLocation::Remote {
                repo,
                reference,
                sparse_paths,
            } => Ok(ctx.cache.materialize(name, repo, reference, sparse_paths)?),
            SourceLocation::Local { dir } => Ok(dir.clone()),
        }
    }
}

/// Exposes one file from the isolated package environment inside the target
/// tree by reference rather than by copy.
#[derive(Debug, Clone)]
pub struct Symlink {
    /// Relative to the package environment root.
    pub from: PathBuf,
    /// Relative to the target tree root.
    pub to: PathBuf,
}

/// One install strategy feeding the shared target tree. A closed union so
/// the orchestrator's sequencing logic stays independent of how each kind
/// installs.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    SourceBuild {
        name: String,
        location: SourceLocation,
        options: BTreeMap<String, String>,
    },
    ArtifactFetch {
        run_id: String,
        group: String,
        filter: String,
        merge: MergeMode,
        dest: PathBuf,
    },
    PackageInstall {
        package: String,
        version: String,
        index: String,
        links: Vec<Symlink>,
    },
}

impl ArtifactSource {
    pub fn describe(&self) -> String {
        match self {
            ArtifactSource::SourceBuild { name, .. } => format!("source build `{name}`"),
            ArtifactSource::ArtifactFetch {
                run_id,
                group,
                filter,
                merge,
                ..
            } => format!("artifact `{filter}_{group}` from run {run_id} ({merge})"),
            ArtifactSource::PackageInstall {
                package, version, ..
            } => format!("package {package}=={version}"),
        }
    }

    pub fn execute(&self, ctx: &ComposeContext) -> Result<(), ComposeError> {
        match self {
            ArtifactSource::SourceBuild {
                name,
                location,
                options,
            } => source_build(ctx, name, location, options).map(|_| ()),
            ArtifactSource::ArtifactFetch {
                run_id,
                group,
                filter,
                merge,
                dest,
            } => artifact_fetch(ctx, run_id, group, filter, *merge, dest),
            ArtifactSource::PackageInstall {
                package,
                version,
                index,
                links,
            } => package_install(ctx, package, version, index, links),
        }
    }
}

/// Materializes the component's sources and drives the build tool through
/// configure, build and install against an ephemeral build directory, with
/// the target tree as install prefix. Returns the source tree.
pub fn source_build(
    ctx: &ComposeContext,
    name: &str,
    location: &SourceLocation,
    options: &BTreeMap<String, String>,
) -> Result<PathBuf, ComposeError> {
    let source_dir = location.materialize(name, ctx)?;
    info!("Building {name} from {}", source_dir.display());

    let build_dir = ctx.build_root.join(name);
    if build_dir.exists() {
        std::fs::remove_dir_all(&build_dir)?;
    }
    std::fs::create_dir_all(&build_dir)?;

    let result = run_build_steps(ctx, &source_dir, &build_dir, options);

    // The build directory is disposable regardless of outcome.
    if let Err(error) = std::fs::remove_dir_all(&build_dir) {
        warn!(
            "Could not remove build directory {}: {error}",
            build_dir.display()
        );
    }

    result?;
    Ok(source_dir)
}

fn run_build_steps(
    ctx: &ComposeContext,
    source_dir: &Path,
    build_dir: &Path,
    options: &BTreeMap<String, String>,
) -> Result<(), ComposeError> {
    let mut configure = Tool::new("cmake")
        .arg("-S")
        .arg(source_dir)
        .arg("-B")
        .arg(build_dir)
        .arg(format!(
            "-DCMAKE_INSTALL_PREFIX={}",
            ctx.target.root().display()
        ));
    for (key, value) in options {
        configure = configure.arg(format!("-D{key}={value}"));
    }
    configure.run_streaming()?;

    Tool::new("cmake")
        .arg("--build")
        .arg(build_dir)
        .run_streaming()?;

    Tool::new("cmake")
        .arg("--install")
        .arg(build_dir)
        .run_streaming()?;

    Ok(())
}

/// Downloads one artifact group from a remote CI run and merges its contents
/// into the destination subtree of the target tree.
pub fn artifact_fetch(
    ctx: &ComposeContext,
    run_id: &str,
    group: &str,
    filter: &str,
    merge: MergeMode,
    dest: &Path,
) -> Result<(), ComposeError> {
    let artifact_name = format!("{filter}_{group}");
    let staging = ctx.staging_root.join(format!("{run_id}-{artifact_name}"));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    info!("Fetching artifact {artifact_name} from run {run_id}");
    Tool::new("gh")
        .args(["run", "download", run_id])
        .args(["--repo", &ctx.artifact_repo])
        .args(["--pattern", &artifact_name])
        .arg("--dir")
        .arg(&staging)
        .run_checked()?;

    merge_into(&staging, &ctx.target.subtree(dest), merge)?;
    Ok(())
}

/// Installs a pinned package version into the isolated package environment
/// and exposes selected files inside the target tree via symlinks.
pub fn package_install(
    ctx: &ComposeContext,
    package: &str,
    version: &str,
    index: &str,
    links: &[Symlink],
) -> Result<(), ComposeError> {
    info!("Installing {package}=={version} into the package environment");
    let pip = ctx.venv_dir.join("bin").join("pip");
    Tool::new(pip.to_string_lossy().into_owned())
        .args(["install", "--find-links", index])
        .arg(format!("{package}=={version}"))
        .run_checked()?;

    link_into(&ctx.venv_dir, ctx.target.root(), links)
}

pub(super) fn link_into(
    env_root: &Path,
    target_root: &Path,
    links: &[Symlink],
) -> Result<(), ComposeError> {
    for link in links {
        let origin = env_root.join(&link.from);
        let destination = target_root.join(&link.to);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if std::fs::symlink_metadata(&destination).is_ok() {
            std::fs::remove_file(&destination)?;
        }
        std::os::unix::fs::symlink(&origin, &destination)?;
        debug!("Linked {} -> {}", destination.display(), origin.display());
    }
    Ok(())
}

/// Merges `source`'s contents into `dest`. `Replace` wipes the destination
/// subtree first, so it must run before any `Flatten` source targeting the
/// same subtree; `Flatten` writes on top without deleting siblings.
pub fn merge_into(source: &Path, dest: &Path, merge: MergeMode) -> Result<(), ComposeError> {
    match merge {
        MergeMode::Replace => {
            if dest.exists() {
                debug!("Replacing contents of {}", dest.display());
                std::fs::remove_dir_all(dest)?;
            }
        }
        MergeMode::Flatten => {
            debug!("Merging into {}", dest.display());
        }
    }
    copy_tree(source, dest)?;
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}
