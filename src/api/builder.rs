use std::{env, error::Error, path::PathBuf};

use home::home_dir;

use crate::Envfetch;

#[derive(Default)]
pub struct EnvfetchBuilder {
    // All other paths are relative to `root`
    root: Option<PathBuf>,
    config_file_name: Option<PathBuf>,
    versions_file_name: Option<PathBuf>,
    cache_directory: Option<PathBuf>,
}

impl EnvfetchBuilder {
    /// Project root directory.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Name of the environment composition toml file.
    ///
    /// Defaults to `envfetch.toml`.
    pub fn config_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file_name = Some(path.into());
        self
    }

    /// Name of the pinned upstream versions file.
    ///
    /// Defaults to `version.json`.
    pub fn versions_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.versions_file_name = Some(path.into());
        self
    }

    /// Location of the environment cache directory.
    ///
    /// Defaults to `$HOME/.envfetch/cache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(path.into());
        self
    }

    pub fn try_build(self) -> Result<Envfetch, Box<dyn Error>> {
        let Self {
            root,
            config_file_name,
            versions_file_name,
            cache_directory,
        } = self;

        let root = match root {
            Some(root) => root,
            None => env::current_dir()?,
        };

        let config_file_name = config_file_name.unwrap_or_else(|| PathBuf::from("envfetch.toml"));

        let versions_file_name = versions_file_name.unwrap_or_else(|| PathBuf::from("version.json"));

        let cache_directory = match cache_directory {
            Some(dir) => root.join(dir),
            None => default_cache_directory()?,
        };

        Ok(Envfetch {
            root,
            config_file_name,
            versions_file_name,
            cache_directory,
        })
    }
}

fn default_cache_directory() -> Result<PathBuf, Box<dyn Error>> {
    let mut cache_directory =
        home_dir().ok_or("Could not find home dir. Please define $HOME env variable.")?;
    cache_directory.push(".envfetch/cache");
    Ok(cache_directory)
}
