use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use rvstore_dualwrite::DualWriterConfig;
use rvstore_file::FileStoreConfig;

/// Contents of the `--config` TOML file.
///
/// ```toml
/// legacy_root = "/var/lib/legacy"
///
/// [store]
/// root = "/var/lib/rvstore"
///
/// [store.allocator]
/// strategy = "counter"
///
/// [dualwrite]
/// default_mode = "dual-legacy"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: FileStoreConfig,
    /// When set, the CLI talks to a dual writer over this store and `store`.
    pub legacy_root: Option<PathBuf>,
    pub dualwrite: DualWriterConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The settings of the legacy store: the main store's settings rooted
    /// elsewhere.
    pub fn legacy_store(&self) -> Option<FileStoreConfig> {
        self.legacy_root.as_ref().map(|root| FileStoreConfig {
            root: root.clone(),
            ..self.store.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvstore_dualwrite::Mode;
    use rvstore_file::AllocationStrategy;

    #[test]
    fn empty_file_is_default() {
        let cfg = CliConfig::parse("").unwrap();
        assert_eq!(cfg, CliConfig::default());
        assert!(cfg.legacy_store().is_none());
    }

    #[test]
    fn parses_nested_sections() {
        let cfg = CliConfig::parse(
            r#"
legacy_root = "/old"

[store]
root = "/new"

[store.allocator]
strategy = "counter"
lease_size = 10

[dualwrite]
default_mode = "dual-unified"
"#,
        )
        .unwrap();
        assert_eq!(cfg.store.root, PathBuf::from("/new"));
        assert_eq!(cfg.store.allocator.strategy, AllocationStrategy::Counter);
        assert_eq!(cfg.dualwrite.default_mode, Mode::DualUnified);

        let legacy = cfg.legacy_store().unwrap();
        assert_eq!(legacy.root, PathBuf::from("/old"));
        assert_eq!(legacy.allocator.lease_size, 10);
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = CliConfig::load(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));

        let path = dir.path().join("rvstore.toml");
        std::fs::write(&path, "[store]\nmax_update_attempts = 9\n").unwrap();
        assert_eq!(CliConfig::load(&path).unwrap().store.max_update_attempts, 9);
    }
}
