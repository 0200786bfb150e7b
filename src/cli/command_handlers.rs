use std::{error::Error, path::Path};

use chrono::Utc;
use log::info;

use crate::{
    compose::Orchestrator,
    model::{env::CompositionConfig, version::PinnedVersions},
    resolver::{self, HttpProbe, RemoteTagSource},
};

/// Handler to setup command
pub fn do_setup(
    root: &Path,
    config_file: &Path,
    versions_file: &Path,
    cache_directory: &Path,
) -> Result<(), Box<dyn Error>> {
    let (config, versions) = load_inputs(root, config_file, versions_file)?;
    let orchestrator = Orchestrator::new(&config, &versions, root, cache_directory);
    orchestrator.run_setup()?;
    Ok(())
}

/// Handler to test command
pub fn do_test(
    root: &Path,
    config_file: &Path,
    versions_file: &Path,
    cache_directory: &Path,
) -> Result<(), Box<dyn Error>> {
    let (config, versions) = load_inputs(root, config_file, versions_file)?;
    let orchestrator = Orchestrator::new(&config, &versions, root, cache_directory);
    orchestrator.run_build_and_test()?;
    Ok(())
}

/// Handler to bump command
/// Resolves the latest verified upstream versions against the published
/// release artifacts and rewrites the pin file only when something changed.
pub fn do_bump(
    root: &Path,
    config_file: &Path,
    versions_file: &Path,
    env_file: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let (config, current) = load_inputs(root, config_file, versions_file)?;

    let tags = RemoteTagSource::new(&config.compiler.repo);
    let probe = HttpProbe::new(&config.compiler, &config.toolchain);

    let resolved = PinnedVersions {
        iree: resolver::resolve_iree(&tags, &probe)?,
        therock: resolver::resolve_therock(&probe, &current.therock, Utc::now().date_naive()),
    };

    resolver::export_versions(env_file, &current, &resolved)?;

    let versions_path = root.join(versions_file);
    if resolver::compare_and_persist(&versions_path, &current, &resolved)? {
        info!(
            "Updated {} (IREE {}, TheRock {})",
            versions_path.display(),
            resolved.iree,
            resolved.therock
        );
    }
    Ok(())
}

fn load_inputs(
    root: &Path,
    config_file: &Path,
    versions_file: &Path,
) -> Result<(CompositionConfig, PinnedVersions), Box<dyn Error>> {
    let config = CompositionConfig::from_file(&root.join(config_file))?;
    let versions = PinnedVersions::from_file(&root.join(versions_file))?;
    Ok((config, versions))
}
