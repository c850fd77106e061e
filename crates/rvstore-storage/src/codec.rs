//! Object codec: [`Resource`] to and from its on-disk JSON envelope.
//!
//! ```text
//! {
//!   "apiVersion": "<group>/<version>",
//!   "kind": "<resource>",
//!   "metadata": { ... },
//!   "body": <any>,
//!   ...unknown top-level fields
//! }
//! ```
//!
//! Encoding is deterministic: envelope fields are written in a fixed order
//! and every map (labels, annotations, unknown fields, the body's own
//! objects) is written with sorted keys. Unknown fields at the top level and
//! inside `metadata` survive a decode/encode cycle untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rvstore_types::{ObjectMeta, Resource, ResourceKind};

use crate::error::{StorageError, StorageResult};

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: &'a str,
    metadata: &'a ObjectMeta,
    #[serde(skip_serializing_if = "Value::is_null")]
    body: &'a Value,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    body: Value,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn envelope(obj: &Resource) -> EnvelopeRef<'_> {
    EnvelopeRef {
        api_version: obj.kind.api_version(),
        kind: &obj.kind.resource,
        metadata: &obj.metadata,
        body: &obj.body,
        extra: &obj.extra,
    }
}

/// Serialize an object to its compact envelope bytes.
pub fn encode(obj: &Resource) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(&envelope(obj))
        .map_err(|e| StorageError::Internal(format!("encode {}: {e}", obj.key())))
}

/// Serialize an object as indented JSON, for human consumption.
pub fn encode_pretty(obj: &Resource) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(&envelope(obj))
        .map_err(|e| StorageError::Internal(format!("encode {}: {e}", obj.key())))
}

/// Render an object as a JSON value.
pub fn to_value(obj: &Resource) -> StorageResult<Value> {
    serde_json::to_value(envelope(obj))
        .map_err(|e| StorageError::Internal(format!("encode {}: {e}", obj.key())))
}

/// Deserialize envelope bytes. `origin` names the source (usually a file
/// path) in the error.
pub fn decode(bytes: &[u8], origin: &str) -> StorageResult<Resource> {
    let env: Envelope = serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt {
        location: origin.to_string(),
        reason: e.to_string(),
    })?;
    if env.kind.is_empty() || env.api_version.is_empty() {
        return Err(StorageError::Corrupt {
            location: origin.to_string(),
            reason: "missing apiVersion or kind".into(),
        });
    }
    Ok(Resource {
        kind: ResourceKind::from_api_version(&env.api_version, env.kind),
        metadata: env.metadata,
        body: env.body,
        extra: env.extra,
    })
}

/// Build an object from a JSON value in envelope form.
pub fn from_value(value: Value, origin: &str) -> StorageResult<Resource> {
    let bytes = serde_json::to_vec(&value).map_err(|e| StorageError::Corrupt {
        location: origin.to_string(),
        reason: e.to_string(),
    })?;
    decode(&bytes, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvstore_types::ResourceVersion;
    use serde_json::json;

    fn sample() -> Resource {
        let mut obj = Resource::new(
            ResourceKind::new("dashboard.grafana.app", "v1", "dashboards"),
            Some("default"),
            "a",
            json!({"title": "Overview", "panels": [1, 2]}),
        )
        .with_label("team", "infra");
        obj.metadata.uid = "uid-1".into();
        obj.metadata.resource_version = ResourceVersion::new(100);
        obj
    }

    #[test]
    fn encode_then_decode_is_lossless() {
        let obj = sample();
        let bytes = encode(&obj).unwrap();
        let back = decode(&bytes, "test").unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode(&sample()).unwrap();
        let b = encode(&sample()).unwrap();
        assert_eq!(a, b);

        let text = String::from_utf8(a).unwrap();
        assert!(text.starts_with("{\"apiVersion\":\"dashboard.grafana.app/v1\",\"kind\":\"dashboards\""));
    }

    #[test]
    fn unknown_fields_survive() {
        let raw = json!({
            "apiVersion": "dashboard.grafana.app/v1",
            "kind": "dashboards",
            "metadata": {"name": "a", "resourceVersion": "7", "finalizers": ["x"]},
            "body": {"title": "t"},
            "status": {"phase": "ready"},
        });
        let obj = from_value(raw, "test").unwrap();
        assert!(obj.extra.contains_key("status"));
        assert!(obj.metadata.extra.contains_key("finalizers"));

        let back = to_value(&obj).unwrap();
        assert_eq!(back["status"]["phase"], "ready");
        assert_eq!(back["metadata"]["finalizers"][0], "x");
        assert_eq!(back["metadata"]["resourceVersion"], "7");
    }

    #[test]
    fn core_group_uses_bare_version() {
        let obj = Resource::new(ResourceKind::new("", "v1", "configmaps"), None, "cfg", Value::Null);
        let value = to_value(&obj).unwrap();
        assert_eq!(value["apiVersion"], "v1");
        assert!(value.get("body").is_none());
        let back = from_value(value, "test").unwrap();
        assert_eq!(back.kind, obj.kind);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode(b"{not json", "/tmp/x.json").unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("/tmp/x.json"));

        let err = decode(br#"{"apiVersion":"","kind":""}"#, "x").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
