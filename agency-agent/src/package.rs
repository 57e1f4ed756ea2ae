// ABOUTME: Test package, filter and engine result values exchanged between agency and agents.
// ABOUTME: Opaque to the transport, but must survive a wire round trip structurally intact.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Well-known package setting keys read by the launcher and the agent
pub mod settings {
    /// Target runtime, e.g. "native", "netcore-2.1", "mono-4.0"
    pub const RUNTIME_FRAMEWORK: &str = "TargetRuntimeFramework";
    /// Prefer the 32-bit agent build
    pub const RUN_AS_X86: &str = "RunAsX86";
    /// Launch the runtime with debugging enabled for the tests
    pub const DEBUG_TESTS: &str = "DebugTests";
    /// Ask the agent itself to wait for a debugger
    pub const DEBUG_AGENT: &str = "DebugAgent";
    /// Agent trace verbosity (Off, Error, Warning, Info, Debug, Verbose)
    pub const INTERNAL_TRACE_LEVEL: &str = "InternalTraceLevel";
    /// Load the user profile when launching the agent
    pub const LOAD_USER_PROFILE: &str = "LoadUserProfile";
    /// Working directory handed to the agent
    pub const WORK_DIRECTORY: &str = "WorkDirectory";
}

static NEXT_PACKAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_package_id() -> String {
    NEXT_PACKAGE_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

/// A set of test files plus the settings that control how they are loaded and run.
///
/// A package built from a single file carries that file's name; a package
/// built from several files is anonymous and holds one sub-package per file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPackage {
    pub id: String,
    pub name: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub sub_packages: Vec<TestPackage>,
}

impl TestPackage {
    /// Create a package for a single test file
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let full_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            id: next_package_id(),
            name: full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            full_name: Some(full_path.to_string_lossy().into_owned()),
            settings: BTreeMap::new(),
            sub_packages: Vec::new(),
        }
    }

    /// Create an anonymous package holding one sub-package per file
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            id: next_package_id(),
            name: None,
            full_name: None,
            settings: BTreeMap::new(),
            sub_packages: files.into_iter().map(TestPackage::new).collect(),
        }
    }

    /// Add a setting to this package and every sub-package below it
    pub fn add_setting(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        for sub in &mut self.sub_packages {
            sub.add_setting(key, value.clone());
        }
        self.settings.insert(key.to_string(), value);
    }

    /// Builder form of [`TestPackage::add_setting`]
    pub fn with_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.add_setting(key, value);
        self
    }

    pub fn add_sub_package(&mut self, package: TestPackage) {
        self.sub_packages.push(package);
    }

    /// Read a typed setting, falling back to `default` when absent or mistyped
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.settings.get(key) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "Ignoring package setting with unexpected type");
                default
            }),
            None => default,
        }
    }

    pub fn has_setting(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    /// Full paths of every leaf package, depth first
    pub fn files(&self) -> Vec<PathBuf> {
        if self.sub_packages.is_empty() {
            return self.full_name.iter().map(PathBuf::from).collect();
        }
        self.sub_packages.iter().flat_map(|p| p.files()).collect()
    }
}

/// Selection expression passed through to the runner untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestFilter(String);

impl TestFilter {
    /// The filter that selects every test
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Structured result returned by load, reload, explore and run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub nodes: Vec<String>,
}

impl EngineResult {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            nodes: vec![node.into()],
        }
    }

    pub fn from_nodes(nodes: Vec<String>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_file_package_has_name() {
        let package = TestPackage::new("/tmp/tests/mock-assembly.dll");
        assert_eq!(package.name.as_deref(), Some("mock-assembly.dll"));
        assert_eq!(
            package.full_name.as_deref(),
            Some("/tmp/tests/mock-assembly.dll")
        );
        assert!(package.sub_packages.is_empty());
    }

    #[test]
    fn test_multi_file_package_is_anonymous() {
        let package = TestPackage::from_files(["/a/one.dll", "/b/two.dll"]);
        assert!(package.name.is_none());
        assert_eq!(package.sub_packages.len(), 2);
        assert_eq!(
            package.files(),
            vec![PathBuf::from("/a/one.dll"), PathBuf::from("/b/two.dll")]
        );
    }

    #[test]
    fn test_package_ids_are_unique() {
        let a = TestPackage::new("/a.dll");
        let b = TestPackage::new("/a.dll");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_settings_propagate_to_sub_packages() {
        let package = TestPackage::from_files(["/a.dll", "/b.dll"])
            .with_setting(settings::RUN_AS_X86, true);
        assert!(package.get_setting(settings::RUN_AS_X86, false));
        for sub in &package.sub_packages {
            assert!(sub.get_setting(settings::RUN_AS_X86, false));
        }
    }

    #[test]
    fn test_get_setting_falls_back_on_type_mismatch() {
        let package = TestPackage::new("/a.dll").with_setting(settings::RUN_AS_X86, "yes");
        assert!(!package.get_setting(settings::RUN_AS_X86, false));
        assert_eq!(
            package.get_setting(settings::INTERNAL_TRACE_LEVEL, "Off".to_string()),
            "Off"
        );
    }

    #[test]
    fn test_empty_filter() {
        assert!(TestFilter::empty().is_empty());
        assert!(!TestFilter::new("tests::smoke").is_empty());
    }
}
