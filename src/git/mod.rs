pub mod cache;
pub mod repository;

pub use cache::{CacheError, GitCache};
pub use repository::GitRepository;
