use std::{
    error::Error,
    path::{Path, PathBuf},
};

use crate::cli::command_handlers::{do_bump, do_setup, do_test};

mod builder;

pub use builder::EnvfetchBuilder;

pub struct Envfetch {
    root: PathBuf,
    config_file_name: PathBuf,
    versions_file_name: PathBuf,
    cache_directory: PathBuf,
}

impl Envfetch {
    pub fn builder() -> EnvfetchBuilder {
        EnvfetchBuilder::default()
    }

    /// Rebuilds the full development environment from scratch
    pub fn setup(&self) -> Result<(), Box<dyn Error>> {
        do_setup(
            &self.root,
            &self.config_file_name,
            &self.versions_file_name,
            &self.cache_directory,
        )
    }

    /// Builds the plugin against the composed environment and runs the
    /// integration tests
    pub fn test(&self) -> Result<(), Box<dyn Error>> {
        do_test(
            &self.root,
            &self.config_file_name,
            &self.versions_file_name,
            &self.cache_directory,
        )
    }

    /// Resolves the latest verified upstream versions and updates the pin
    /// file, optionally exporting the outcome to a CI environment file
    pub fn bump(&self, env_file: Option<impl AsRef<Path>>) -> Result<(), Box<dyn Error>> {
        do_bump(
            &self.root,
            &self.config_file_name,
            &self.versions_file_name,
            env_file.as_ref().map(AsRef::as_ref),
        )
    }
}
