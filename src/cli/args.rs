use std::path::PathBuf;

use clap::Parser;

/// Composes pinned GPU compiler/runtime development environments.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Project root directory; all other paths are resolved against it.
    #[clap(short, long)]
    pub root: Option<PathBuf>,
    /// Environment composition file.
    #[clap(short, long, default_value = "envfetch.toml")]
    pub config_file: PathBuf,
    /// Pinned upstream versions file.
    #[clap(short, long, default_value = "version.json")]
    pub versions_file: PathBuf,
    /// Environment cache directory.
    #[clap(long)]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Rebuilds the full development environment from scratch
    Setup,
    /// Builds the plugin against the composed environment and runs the integration tests
    Test,
    /// Resolves the latest verified upstream versions and updates the pin file
    Bump {
        /// Environment file to export CURRENT_*/LATEST_* version variables to
        #[clap(long, env = "GITHUB_ENV")]
        env_file: Option<PathBuf>,
    },
}
