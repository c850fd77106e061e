use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rvstore_types::ResourceKind;

use crate::mode::Mode;

/// Per-kind migration modes.
///
/// ```toml
/// default_mode = "legacy"
///
/// [overrides]
/// "dashboards.dashboard.grafana.app" = "dual-legacy"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualWriterConfig {
    pub default_mode: Mode,
    /// Keyed by `resource.group` (see [`ResourceKind::group_resource`]).
    pub overrides: BTreeMap<String, Mode>,
    /// Entries kept by the reconcile log before the oldest are dropped.
    pub reconcile_capacity: usize,
}

impl Default for DualWriterConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::Legacy,
            overrides: BTreeMap::new(),
            reconcile_capacity: 1024,
        }
    }
}

impl DualWriterConfig {
    pub fn with_override(mut self, kind: &ResourceKind, mode: Mode) -> Self {
        self.overrides.insert(kind.group_resource(), mode);
        self
    }

    pub fn mode_for(&self, kind: &ResourceKind) -> Mode {
        self.overrides
            .get(&kind.group_resource())
            .copied()
            .unwrap_or(self.default_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_ignore_version() {
        let v1 = ResourceKind::new("dashboard.grafana.app", "v1", "dashboards");
        let v2 = ResourceKind::new("dashboard.grafana.app", "v2", "dashboards");
        let cfg = DualWriterConfig::default().with_override(&v1, Mode::DualUnified);
        assert_eq!(cfg.mode_for(&v2), Mode::DualUnified);
        assert_eq!(cfg.mode_for(&ResourceKind::new("", "v1", "configmaps")), Mode::Legacy);
    }

    #[test]
    fn from_toml() {
        let cfg: DualWriterConfig = toml::from_str(
            r#"
            default_mode = "dual-legacy"

            [overrides]
            "folders.folder.grafana.app" = "unified"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.default_mode, Mode::DualLegacy);
        assert_eq!(cfg.overrides["folders.folder.grafana.app"], Mode::Unified);
        assert_eq!(cfg.reconcile_capacity, 1024);
    }
}
