use thiserror::Error;

pub mod env;
pub mod version;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading configuration: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
