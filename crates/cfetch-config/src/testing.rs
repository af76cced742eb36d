//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary mirror root laid out as `<host>/<path>`
//! - A temporary output directory
//! - Environment variables for spawning `cfetch` against both
//!
//! # Usage
//!
//! ```ignore
//! use cfetch_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! env.create_blob("cdn.example", "blobs/a", &payload)?;
//! // env.mirror_root, env.output_dir, env.project_root are all isolated
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Mirror of remote hosts, one directory per host
    pub mirror_root: PathBuf,
    /// Where restored signatures are written
    pub output_dir: PathBuf,
    /// Working directory for the test; holds `.cfetch/config.toml` if any
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let project_root = root.join(format!("project-{}", test_id));
        let mirror_root = root.join("mirror");
        let output_dir = root.join("out");

        std::fs::create_dir_all(&project_root)?;
        std::fs::create_dir_all(&mirror_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            mirror_root,
            output_dir,
            project_root,
            test_id,
        })
    }

    /// Place a container payload where a mirror fetcher will look for it
    pub fn create_blob(&self, host: &str, path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.mirror_root.join(host).join(path.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a file relative to the project root
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.project_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Restored file for a signature given as hex
    pub fn output_path(&self, signature_hex: &str) -> PathBuf {
        self.output_dir.join(signature_hex)
    }

    /// Environment for spawning `cfetch` with this layout.
    ///
    /// Pins HOME to the temp dir so a developer's global config never leaks in.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        let home = self.project_root.parent().unwrap_or(&self.project_root);
        vec![
            ("HOME".to_string(), home.display().to_string()),
            (
                "CFETCH_OUTPUT_DIR".to_string(),
                self.output_dir.display().to_string(),
            ),
            ("CFETCH_LOG".to_string(), "warn".to_string()),
        ]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.project_root.exists());
        assert!(env.mirror_root.exists());
        assert!(!env.output_dir.exists());
    }

    #[test]
    fn test_environment_ids_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_create_blob_under_host() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_blob("cdn.example", "/a/b.bin", b"xyz").unwrap();
        assert_eq!(path, env.mirror_root.join("cdn.example/a/b.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"xyz");
    }

    #[test]
    fn test_cli_env() {
        let env = TestEnvironment::new().unwrap();
        let vars = env.cli_env();
        assert!(vars.iter().any(|(k, _)| k == "HOME"));
        assert!(vars.iter().any(|(k, _)| k == "CFETCH_OUTPUT_DIR"));
    }
}
