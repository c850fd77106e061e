//! Validation and stamping shared by every backend's write path.

use chrono::Utc;
use uuid::Uuid;

use rvstore_types::{validate_name, validate_namespace, ObjectKey, Resource, ResourceVersion};

use crate::error::{StorageError, StorageResult};
use crate::traits::same_kind;

/// Reject keys that cannot be stored.
pub fn validate_key(key: &ObjectKey) -> StorageResult<()> {
    if key.kind.resource.is_empty() || key.kind.version.is_empty() {
        return Err(StorageError::BadRequest(format!(
            "{key}: kind needs a version and a resource"
        )));
    }
    validate_name(&key.name)?;
    if let Some(ref ns) = key.namespace {
        validate_namespace(ns)?;
    }
    Ok(())
}

/// Prepare a new object for its first write. The version is stamped by the
/// caller once allocated.
///
/// A caller-supplied `uid` and `creationTimestamp` are kept so that a copy
/// mirrored from another store keeps its identity.
pub fn prepare_create(mut obj: Resource) -> StorageResult<Resource> {
    let key = obj.key();
    validate_key(&key)?;
    if !obj.resource_version().is_zero() {
        return Err(StorageError::BadRequest(format!(
            "{key}: resourceVersion must not be set on create"
        )));
    }
    if obj.metadata.uid.is_empty() {
        obj.metadata.uid = Uuid::now_v7().to_string();
    }
    if obj.metadata.creation_timestamp.is_none() {
        obj.metadata.creation_timestamp = Some(Utc::now());
    }
    if obj.metadata.generation <= 0 {
        obj.metadata.generation = 1;
    }
    obj.metadata.deletion_timestamp = None;
    Ok(obj)
}

/// Check an update result against the stored object.
///
/// Returns `None` when the result is semantically equal to `current`, in
/// which case nothing is written and no version is spent. Otherwise returns
/// the object to write, with identity fields carried over and `generation`
/// bumped when the body changed.
pub fn prepare_update(
    key: &ObjectKey,
    current: &Resource,
    mut updated: Resource,
) -> StorageResult<Option<Resource>> {
    if updated.name() != key.name || updated.namespace() != key.namespace.as_deref() {
        return Err(StorageError::BadRequest(format!(
            "{key}: name and namespace are immutable"
        )));
    }
    if !same_kind(&updated.kind, &current.kind) {
        return Err(StorageError::BadRequest(format!(
            "{key}: kind is immutable (stored {}, got {})",
            current.kind, updated.kind
        )));
    }
    if !updated.uid().is_empty() && updated.uid() != current.uid() {
        return Err(StorageError::BadRequest(format!("{key}: uid is immutable")));
    }

    updated.metadata.uid = current.metadata.uid.clone();
    updated.metadata.creation_timestamp = current.metadata.creation_timestamp;
    updated.metadata.deletion_timestamp = None;
    updated.metadata.resource_version = current.resource_version();
    updated.metadata.generation = current.metadata.generation;
    if updated.semantically_equal(current) {
        return Ok(None);
    }
    if updated.body != current.body {
        updated.metadata.generation = current.metadata.generation + 1;
    }
    Ok(Some(updated))
}

/// Apply a caller's update function, turning its failure into
/// `MutatorFailed` unless it already speaks the storage vocabulary.
pub fn apply_update(
    key: &ObjectKey,
    input: Resource,
    update: &mut crate::traits::UpdateFn<'_>,
) -> StorageResult<Resource> {
    match update(input) {
        Ok(obj) => Ok(obj),
        Err(e @ StorageError::MutatorFailed { .. }) => Err(e),
        Err(e @ (StorageError::Conflict { .. } | StorageError::BadRequest(_))) => Err(e),
        Err(e) => Err(StorageError::mutator_failed(key, e.to_string())),
    }
}

/// Stamp the object that a delete hands back and publishes.
pub fn stamp_deleted(mut obj: Resource, rv: ResourceVersion) -> Resource {
    obj.metadata.resource_version = rv;
    obj.metadata.deletion_timestamp = Some(Utc::now());
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvstore_types::ResourceKind;
    use serde_json::json;

    fn kind() -> ResourceKind {
        ResourceKind::new("g", "v1", "things")
    }

    fn stored() -> Resource {
        let mut o = prepare_create(Resource::new(kind(), Some("ns"), "a", json!({"x": 1}))).unwrap();
        o.metadata.resource_version = ResourceVersion::new(10);
        o
    }

    #[test]
    fn create_assigns_identity() {
        let o = stored();
        assert!(!o.uid().is_empty());
        assert!(o.metadata.creation_timestamp.is_some());
        assert_eq!(o.metadata.generation, 1);
    }

    #[test]
    fn create_keeps_supplied_uid() {
        let mut o = Resource::new(kind(), Some("ns"), "a", json!({}));
        o.metadata.uid = "mirrored".into();
        assert_eq!(prepare_create(o).unwrap().uid(), "mirrored");
    }

    #[test]
    fn create_rejects_version_and_bad_names() {
        let mut o = Resource::new(kind(), Some("ns"), "a", json!({}));
        o.metadata.resource_version = ResourceVersion::new(3);
        assert!(prepare_create(o).unwrap_err().is_bad_request());

        let bad = Resource::new(kind(), Some("ns"), "Not_Valid", json!({}));
        assert!(prepare_create(bad).unwrap_err().is_bad_request());
    }

    #[test]
    fn unchanged_update_is_noop() {
        let cur = stored();
        let mut same = cur.clone();
        same.metadata.resource_version = ResourceVersion::ZERO;
        assert!(prepare_update(&cur.key(), &cur, same).unwrap().is_none());
    }

    #[test]
    fn body_change_bumps_generation() {
        let cur = stored();
        let mut next = cur.clone();
        next.body = json!({"x": 2});
        let out = prepare_update(&cur.key(), &cur, next).unwrap().unwrap();
        assert_eq!(out.metadata.generation, 2);

        let labelled = cur.clone().with_label("k", "v");
        let out = prepare_update(&cur.key(), &cur, labelled).unwrap().unwrap();
        assert_eq!(out.metadata.generation, 1);
    }

    #[test]
    fn identity_fields_are_immutable() {
        let cur = stored();
        let mut renamed = cur.clone();
        renamed.metadata.name = "b".into();
        assert!(prepare_update(&cur.key(), &cur, renamed).unwrap_err().is_bad_request());

        let mut reuid = cur.clone();
        reuid.metadata.uid = "other".into();
        assert!(prepare_update(&cur.key(), &cur, reuid).unwrap_err().is_bad_request());

        // An empty uid in the result means "keep".
        let mut blank = cur.clone();
        blank.metadata.uid.clear();
        blank.body = json!({"x": 3});
        let out = prepare_update(&cur.key(), &cur, blank).unwrap().unwrap();
        assert_eq!(out.uid(), cur.uid());
    }

    #[test]
    fn mutator_errors_are_wrapped() {
        let cur = stored();
        let key = cur.key();
        let mut fail = |_: Resource| -> StorageResult<Resource> { Err(StorageError::Internal("nope".into())) };
        let err = apply_update(&key, cur.clone(), &mut fail).unwrap_err();
        assert!(matches!(err, StorageError::MutatorFailed { .. }));

        let mut conflict = |_: Resource| -> StorageResult<Resource> { Err(StorageError::conflict(&key, "mine")) };
        assert!(apply_update(&key, cur, &mut conflict).unwrap_err().is_conflict());
    }
}
