pub mod cli;
pub mod compose;
pub mod config;
pub mod exec;
pub mod flock;
pub mod git;
pub mod model;
pub mod resolver;

mod api;

pub use api::{Envfetch, EnvfetchBuilder};
