use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::model::ParseError;

/// The composition configuration, read once per invocation from
/// `envfetch.toml` in the project root. Immutable after loading; structural
/// equality against the persisted fingerprint is the gate for the
/// build-and-test entry point.
///
/// Unknown fields are rejected at load time so that a typo fails here rather
/// than deep inside a later stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompositionConfig {
    pub toolchain: ToolchainConfig,
    pub compiler: CompilerConfig,
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<ArtifactConfig>,
    pub runtime: RuntimeConfig,
    pub plugin: PluginConfig,
    pub test: TestConfig,
}

/// The toolchain repository (TheRock) and its nightly distribution channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    pub repo: String,
    #[serde(rename = "ref")]
    pub reference: String,
    /// GPU family the nightly tarballs are published for, e.g. `gfx94X-dcgpu`.
    pub group: String,
    /// Base URL of the nightly tarball content store.
    pub cdn: String,
    #[serde(default, rename = "sparse-paths")]
    pub sparse_paths: Vec<String>,
    /// Packages installed into the isolated python environment.
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// The independently published compiler package (IREE). The compiler is
/// never built from source; its wheel is installed into the isolated package
/// environment and selected artifacts are symlinked into the target tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Repository whose release tags drive version discovery.
    pub repo: String,
    pub package: String,
    /// Find-links page used both to install the wheel and to verify that a
    /// candidate version has actually been published.
    pub index: String,
    /// Compiler shared library, relative to the package environment root.
    pub lib: PathBuf,
    /// Command-line driver, relative to the package environment root.
    pub driver: PathBuf,
}

/// One prebuilt artifact group fetched from a remote CI run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    #[serde(rename = "run-id")]
    pub run_id: String,
    pub group: String,
    pub filter: String,
    pub merge: MergeMode,
    /// Subtree of the target tree the artifact contents land in.
    pub dest: PathBuf,
}

/// How fetched artifact contents are merged into their destination subtree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Wipe the destination subtree before writing.
    Replace,
    /// Write on top of existing content without deleting siblings.
    Flatten,
}

impl Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Replace => f.write_str("replace"),
            MergeMode::Flatten => f.write_str("flatten"),
        }
    }
}

/// The runtime library built from source during full setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub repo: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, rename = "sparse-paths")]
    pub sparse_paths: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// The plugin under test, built from the consuming project's own sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[serde(rename = "source-dir")]
    pub source_dir: PathBuf,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// External integration-test runner invoked by the build-and-test entry
/// point. Tags are appended to the runner's argument list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    pub runner: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CompositionConfig {
    pub fn from_file(path: &Path) -> Result<CompositionConfig, ParseError> {
        CompositionConfig::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_toml_str(content: &str) -> Result<CompositionConfig, ParseError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[toolchain]
repo = "https://github.com/ROCm/TheRock"
ref = "5ca35f9"
group = "gfx94X-dcgpu"
cdn = "https://rocm.nightlies.amd.com/tarball"
sparse-paths = ["base", "compiler-interfaces"]
requirements = ["CppHeaderParser", "meson"]

[compiler]
repo = "https://github.com/iree-org/iree"
package = "iree-base-compiler"
index = "https://iree.dev/pip-release-links.html"
lib = "lib/libIREECompiler.so"
driver = "bin/iree-compile"

[[artifact]]
run-id = "19283746"
group = "gfx94X-dcgpu"
filter = "core-runtime"
merge = "replace"
dest = "lib"

[[artifact]]
run-id = "19283746"
group = "gfx94X-dcgpu"
filter = "blas"
merge = "flatten"
dest = "lib"

[runtime]
repo = "https://github.com/iree-org/iree"
ref = "candidate-20260301.1500"
sparse-paths = ["runtime"]

[runtime.options]
IREE_BUILD_COMPILER = "OFF"

[plugin]
source-dir = "."

[plugin.options]
BUILD_TESTING = "ON"

[test]
runner = ["pytest", "tests/integration"]
tags = ["smoke"]
"#;
