use std::error::Error;

use clap::Parser;

use envfetch::{
    cli::args::{CliArgs, Command},
    config::EnvfetchConfig,
    Envfetch,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    let config = EnvfetchConfig::load()?;

    let mut builder = Envfetch::builder()
        .config_file_name(&args.config_file)
        .versions_file_name(&args.versions_file);
    if let Some(root) = &args.root {
        builder = builder.root(root);
    }
    // CLI flag wins over the ENVFETCH_CACHE_DIR environment override.
    if let Some(cache_directory) = args.cache_directory.or(config.cache_dir) {
        builder = builder.cache_directory(cache_directory);
    }
    let envfetch = builder.try_build()?;

    match args.cmd {
        Command::Setup => envfetch.setup(),
        Command::Test => envfetch.test(),
        Command::Bump { env_file } => {
            envfetch.bump(env_file.or(config.github_env_file).as_deref())
        }
    }
}
