use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};

use super::ArtifactProbe;
use crate::model::env::{CompilerConfig, ToolchainConfig};

const WHEEL_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const TARBALL_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Probes the two publication channels over HTTP: the compiler's find-links
/// page (a GET, searched for the wheel file name) and the nightly tarball
/// store (a HEAD per candidate).
pub struct HttpProbe {
    agent: ureq::Agent,
    package: String,
    index_url: String,
    cdn_base_url: String,
    group: String,
}

impl HttpProbe {
    pub fn new(compiler: &CompilerConfig, toolchain: &ToolchainConfig) -> HttpProbe {
        HttpProbe {
            agent: ureq::AgentBuilder::new()
                .timeout(WHEEL_PROBE_TIMEOUT)
                .build(),
            package: compiler.package.clone(),
            index_url: compiler.index.clone(),
            cdn_base_url: toolchain.cdn.clone(),
            group: toolchain.group.clone(),
        }
    }

    /// Wheel file names use underscores where the package name has hyphens.
    fn wheel_needle(&self, version: &str) -> String {
        format!("{}-{version}", self.package.replace('-', "_"))
    }

    fn tarball_url(&self, version: &str) -> String {
        format!(
            "{}/therock-dist-linux-{}-{}.tar.gz",
            self.cdn_base_url, self.group, version
        )
    }
}

impl ArtifactProbe for HttpProbe {
    fn compiler_wheel_exists(&self, version: &str) -> anyhow::Result<bool> {
        debug!("Verifying {} wheel availability for {version}...", self.package);
        let body = self
            .agent
            .get(&self.index_url)
            .call()
            .with_context(|| format!("fetching release links from {}", self.index_url))?
            .into_string()
            .context("reading release links page")?;

        let needle = self.wheel_needle(version);
        let found = body.contains(&needle);
        if found {
            info!("  OK: {needle} is available");
        } else {
            info!("  MISSING: {needle} is NOT available");
        }
        Ok(found)
    }

    fn runtime_tarball_exists(&self, version: &str) -> anyhow::Result<bool> {
        let url = self.tarball_url(version);
        match self
            .agent
            .head(&url)
            .timeout(TARBALL_PROBE_TIMEOUT)
            .call()
        {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(status, _)) => {
                debug!("  {url} -> {status}");
                Ok(false)
            }
            Err(error) => {
                warn!("  {url} unreachable: {error}");
                Ok(false)
            }
        }
    }
}
