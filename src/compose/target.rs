use std::{
    io,
    path::{Path, PathBuf},
};

use crate::exec::prepend_search_path;

pub const VERSION_MARKER_FILE: &str = ".iree-version";

/// Handle to the shared installation tree every install strategy writes
/// into. A single orchestrator run owns it exclusively for its duration;
/// there is no locking below this level.
pub struct TargetTree {
    root: PathBuf,
}

impl TargetTree {
    pub fn new(root: impl Into<PathBuf>) -> TargetTree {
        TargetTree { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn subtree(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn ensure_layout(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.bin_dir())?;
        std::fs::create_dir_all(self.lib_dir())?;
        Ok(())
    }

    /// Records the exact compiler version composed into the tree so the
    /// external test runner can self-report what it exercised.
    pub fn write_version_marker(&self, version: &str) -> io::Result<PathBuf> {
        let path = self.root.join(VERSION_MARKER_FILE);
        std::fs::write(&path, format!("{version}\n"))?;
        Ok(path)
    }

    /// Search-path variables with the tree's subpaths prepended to any
    /// caller-supplied value.
    pub fn search_path_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "PATH".to_string(),
                prepend_search_path(&self.bin_dir(), std::env::var("PATH").ok().as_deref()),
            ),
            (
                "LD_LIBRARY_PATH".to_string(),
                prepend_search_path(
                    &self.lib_dir(),
                    std::env::var("LD_LIBRARY_PATH").ok().as_deref(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn layout_creates_bin_and_lib() {
        let dir = tempfile::tempdir().unwrap();
        let target = TargetTree::new(dir.path().join("env"));
        target.ensure_layout().unwrap();
        assert!(target.bin_dir().is_dir());
        assert!(target.lib_dir().is_dir());
    }

    #[test]
    fn version_marker_holds_the_pinned_version() {
        let dir = tempfile::tempdir().unwrap();
        let target = TargetTree::new(dir.path());
        let path = target.write_version_marker("3.11.0rc20260301").unwrap();
        assert_eq!(path.file_name().unwrap(), VERSION_MARKER_FILE);
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "3.11.0rc20260301\n"
        );
    }

    #[test]
    fn search_paths_start_with_the_tree_subpaths() {
        let target = TargetTree::new("/opt/cache/env");
        let env = target.search_path_env();
        let path = env.iter().find(|(k, _)| k == "PATH").unwrap();
        assert!(path.1.starts_with("/opt/cache/env/bin"));
        let ld = env.iter().find(|(k, _)| k == "LD_LIBRARY_PATH").unwrap();
        assert!(ld.1.starts_with("/opt/cache/env/lib"));
    }
}
