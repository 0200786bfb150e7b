use anyhow::Context;
use log::debug;

use super::TagSource;

/// Lists tags straight off the remote, without cloning. The releases feed
/// misses rc tags, so the raw tag refs are the source of truth here.
pub struct RemoteTagSource {
    url: String,
}

impl RemoteTagSource {
    pub fn new(url: impl Into<String>) -> RemoteTagSource {
        RemoteTagSource { url: url.into() }
    }
}

impl TagSource for RemoteTagSource {
    fn release_tags(&self) -> anyhow::Result<Vec<String>> {
        debug!("Listing remote tags for {}", self.url);
        let mut remote = git2::Remote::create_detached(self.url.as_str())
            .with_context(|| format!("creating remote for {}", self.url))?;
        remote
            .connect(git2::Direction::Fetch)
            .with_context(|| format!("connecting to {}", self.url))?;
        let tags = remote
            .list()
            .context("listing remote refs")?
            .iter()
            .map(|head| head.name().to_string())
            .collect();
        Ok(tags)
    }
}
