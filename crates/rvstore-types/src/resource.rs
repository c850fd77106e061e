use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::ResourceVersion;

/// Annotation set on the bookmark that closes the initial snapshot of a
/// zero-cursor watch.
pub const INITIAL_EVENTS_END_ANNOTATION: &str = "rvstore.io/initial-events-end";

/// The `(group, version, resource)` discriminator of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// `group/version`, or just `version` for the core (empty) group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Inverse of [`ResourceKind::api_version`].
    pub fn from_api_version(api_version: &str, resource: impl Into<String>) -> Self {
        match api_version.rsplit_once('/') {
            Some((group, version)) => Self::new(group, version, resource),
            None => Self::new("", api_version, resource),
        }
    }

    /// `resource.group`, the version-independent identity used to pick
    /// per-kind settings such as the migration mode.
    pub fn group_resource(&self) -> String {
        if self.group.is_empty() {
            self.resource.clone()
        } else {
            format!("{}.{}", self.resource, self.group)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// Storage key of a single object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, Some(namespace.into()), name)
    }

    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, None, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.group_resource(), ns, self.name),
            None => write!(f, "{}/{}", self.kind.group_resource(), self.name),
        }
    }
}

/// Metadata envelope carried by every object.
///
/// Fields the store does not interpret are kept in `extra` so that a
/// read-modify-write cycle never drops them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub resource_version: ResourceVersion,
    #[serde(skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// A named, namespaced, typed object.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    /// Opaque payload; the store never looks inside.
    pub body: Value,
    /// Top-level envelope fields this version of the store does not know.
    pub extra: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: &str, body: Value) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                ..ObjectMeta::default()
            },
            body,
            extra: BTreeMap::new(),
        }
    }

    /// An object with no body, used as the mutator input when an update is
    /// allowed to create a missing object.
    pub fn empty(key: &ObjectKey) -> Self {
        Self::new(key.kind.clone(), key.namespace.as_deref(), &key.name, Value::Null)
    }

    /// Synthetic object carried by a bookmark event: only the watermark
    /// version is meaningful.
    pub fn bookmark(kind: ResourceKind, resource_version: ResourceVersion) -> Self {
        let mut obj = Self::new(kind, None, "", Value::Null);
        obj.metadata.resource_version = resource_version;
        obj
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.kind.clone(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn resource_version(&self) -> ResourceVersion {
        self.metadata.resource_version
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// Equality ignoring `resourceVersion`. An update whose result is
    /// semantically equal to the stored object is a no-op.
    pub fn semantically_equal(&self, other: &Self) -> bool {
        let mut a = self.metadata.clone();
        let mut b = other.metadata.clone();
        a.resource_version = ResourceVersion::ZERO;
        b.resource_version = ResourceVersion::ZERO;
        self.kind == other.kind && a == b && self.body == other.body && self.extra == other.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dashboards() -> ResourceKind {
        ResourceKind::new("dashboard.grafana.app", "v1", "dashboards")
    }

    #[test]
    fn api_version_roundtrip() {
        let kind = dashboards();
        assert_eq!(kind.api_version(), "dashboard.grafana.app/v1");
        assert_eq!(ResourceKind::from_api_version(&kind.api_version(), "dashboards"), kind);

        let core = ResourceKind::new("", "v1", "configmaps");
        assert_eq!(core.api_version(), "v1");
        assert_eq!(ResourceKind::from_api_version("v1", "configmaps"), core);
    }

    #[test]
    fn group_resource_ignores_version() {
        let v1 = dashboards();
        let v2 = ResourceKind::new("dashboard.grafana.app", "v2", "dashboards");
        assert_eq!(v1.group_resource(), v2.group_resource());
        assert_eq!(v1.group_resource(), "dashboards.dashboard.grafana.app");
    }

    #[test]
    fn key_display() {
        let key = ObjectKey::namespaced(dashboards(), "ns", "a");
        assert_eq!(key.to_string(), "dashboards.dashboard.grafana.app/ns/a");
        let cluster = ObjectKey::cluster(dashboards(), "a");
        assert_eq!(cluster.to_string(), "dashboards.dashboard.grafana.app/a");
    }

    #[test]
    fn key_from_resource() {
        let obj = Resource::new(dashboards(), Some("ns"), "a", json!({}));
        assert_eq!(obj.key(), ObjectKey::namespaced(dashboards(), "ns", "a"));
        assert_eq!(obj.namespace(), Some("ns"));
        assert_eq!(obj.name(), "a");
    }

    #[test]
    fn semantic_equality_ignores_resource_version() {
        let mut a = Resource::new(dashboards(), Some("ns"), "a", json!({"title": "x"}));
        let mut b = a.clone();
        a.metadata.resource_version = ResourceVersion::new(1);
        b.metadata.resource_version = ResourceVersion::new(2);
        assert!(a.semantically_equal(&b));

        b.body = json!({"title": "y"});
        assert!(!a.semantically_equal(&b));
    }

    #[test]
    fn metadata_keeps_unknown_fields() {
        let raw = json!({
            "name": "a",
            "resourceVersion": "12",
            "managedFields": [{"manager": "kubectl"}],
        });
        let meta: ObjectMeta = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.resource_version, ResourceVersion::new(12));
        assert!(meta.extra.contains_key("managedFields"));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["managedFields"][0]["manager"], "kubectl");
    }

    #[test]
    fn bookmark_carries_only_version() {
        let bm = Resource::bookmark(dashboards(), ResourceVersion::new(9));
        assert_eq!(bm.resource_version(), ResourceVersion::new(9));
        assert!(bm.name().is_empty());
        assert!(bm.body.is_null());
    }
}
