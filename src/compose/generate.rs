use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use log::info;

use super::{target::TargetTree, ComposeError};

pub const PRESETS_FILE: &str = "CMakeUserPresets.json";
pub const ACTIVATE_SCRIPT_FILE: &str = "activate_env.sh";

/// Writes the build preset consumed by the plugin's own cmake runs: the
/// composed toolchain binaries, the target tree as install prefix, and the
/// runtime's working tree.
pub fn write_cmake_presets(
    project_dir: &Path,
    target: &TargetTree,
    runtime_source_dir: &Path,
) -> Result<PathBuf, ComposeError> {
    let presets = serde_json::json!({
        "version": 6,
        "configurePresets": [
            {
                "name": "envfetch",
                "displayName": "envfetch composed environment",
                "binaryDir": "${sourceDir}/build",
                "cacheVariables": {
                    "CMAKE_C_COMPILER": target.bin_dir().join("amdclang").display().to_string(),
                    "CMAKE_CXX_COMPILER": target.bin_dir().join("amdclang++").display().to_string(),
                    "CMAKE_PREFIX_PATH": target.root().display().to_string(),
                    "ENVFETCH_RUNTIME_SOURCE_DIR": runtime_source_dir.display().to_string(),
                }
            }
        ]
    });

    let path = project_dir.join(PRESETS_FILE);
    let mut content = serde_json::to_string_pretty(&presets)?;
    content.push('\n');
    std::fs::write(&path, content)?;
    info!("Wrote build presets to {}", path.display());
    Ok(path)
}

/// Writes the shell fragment that exposes the composed environment. The
/// fragment only makes sense when sourced (it mutates the caller's search
/// paths), so it refuses to run as a plain executable.
pub fn write_activation_script(
    cache_root: &Path,
    target: &TargetTree,
) -> Result<PathBuf, ComposeError> {
    let script = format!(
        r#"#!/bin/bash
# Generated by envfetch. Source this file; do not execute it.
if [[ "${{BASH_SOURCE[0]}}" == "${{0}}" ]]; then
    echo "Usage: source ${{0}}" >&2
    exit 1
fi
export PATH="{bin}:${{PATH}}"
export LD_LIBRARY_PATH="{lib}:${{LD_LIBRARY_PATH:-}}"
"#,
        bin = target.bin_dir().display(),
        lib = target.lib_dir().display(),
    );

    let path = cache_root.join(ACTIVATE_SCRIPT_FILE);
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    info!("Wrote activation script to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::exec::Tool;
    use pretty_assertions::assert_eq;

    #[test]
    fn presets_point_at_the_composed_environment() {
        let dir = tempfile::tempdir().unwrap();
        let target = TargetTree::new("/opt/cache/env");
        let path =
            write_cmake_presets(dir.path(), &target, Path::new("/opt/cache/git/worktrees/runtime/abc"))
                .unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let vars = &parsed["configurePresets"][0]["cacheVariables"];
        assert_eq!(vars["CMAKE_CXX_COMPILER"], "/opt/cache/env/bin/amdclang++");
        assert_eq!(vars["CMAKE_PREFIX_PATH"], "/opt/cache/env");
        assert_eq!(
            vars["ENVFETCH_RUNTIME_SOURCE_DIR"],
            "/opt/cache/git/worktrees/runtime/abc"
        );
        assert_eq!(path.file_name().unwrap(), PRESETS_FILE);
    }

    #[test]
    fn activation_script_refuses_to_be_executed() {
        let dir = tempfile::tempdir().unwrap();
        let target = TargetTree::new(dir.path().join("env"));
        let path = write_activation_script(dir.path(), &target).unwrap();

        let output = Tool::new("bash").arg(&path).run().unwrap();
        assert_eq!(output.status, 1);
        assert!(output.stderr.contains("Usage: source"));
    }

    #[test]
    fn activation_script_prepends_search_paths_when_sourced() {
        let dir = tempfile::tempdir().unwrap();
        let target = TargetTree::new(dir.path().join("env"));
        let path = write_activation_script(dir.path(), &target).unwrap();

        let output = Tool::new("bash")
            .args(["-c"])
            .arg(format!(
                "source {} && echo \"$PATH\" && echo \"$LD_LIBRARY_PATH\"",
                path.display()
            ))
            .run_checked()
            .unwrap();
        let mut lines = output.stdout.lines();
        assert!(lines
            .next()
            .unwrap()
            .starts_with(&target.bin_dir().display().to_string()));
        assert!(lines
            .next()
            .unwrap()
            .starts_with(&target.lib_dir().display().to_string()));
    }
}
