//! Foundation types for rvstore.
//!
//! This crate provides the resource, version, selector, and event types shared
//! by every storage backend. Every other rvstore crate depends on
//! `rvstore-types`.
//!
//! # Key Types
//!
//! - [`Resource`]: A named, namespaced, typed object with its metadata envelope
//! - [`ResourceKind`]: The `(group, version, resource)` discriminator
//! - [`ObjectKey`]: Storage key: kind plus optional namespace plus name
//! - [`ResourceVersion`]: Store-wide monotonic mutation token
//! - [`LabelSelector`] / [`FieldSelector`] / [`Predicate`]: List and watch filters
//! - [`WatchEvent`]: Change-feed event delivered to watchers

pub mod error;
pub mod event;
pub mod names;
pub mod resource;
pub mod selector;
pub mod version;

pub use error::TypeError;
pub use event::{EventType, StatusReason, WatchEvent, WatchStatus};
pub use names::{validate_name, validate_namespace};
pub use resource::{ObjectKey, ObjectMeta, Resource, ResourceKind, INITIAL_EVENTS_END_ANNOTATION};
pub use selector::{FieldSelector, LabelSelector, Operator, Predicate, Requirement};
pub use version::ResourceVersion;
