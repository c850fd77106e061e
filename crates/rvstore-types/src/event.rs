use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;
use crate::version::ResourceVersion;

/// Classification of watch events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Bookmark => "BOOKMARK",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Why a watch was terminated by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusReason {
    /// The requested resume version is no longer retained.
    Expired,
    /// The consumer fell behind and its queue overflowed.
    TooSlow,
    /// The store failed while serving the watch.
    Internal,
}

/// Terminal status carried by an [`WatchEvent::Error`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchStatus {
    pub reason: StatusReason,
    pub message: String,
}

impl WatchStatus {
    pub fn new(reason: StatusReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.message)
    }
}

/// A single change-feed event.
///
/// Events for a given object are totally ordered by the `resourceVersion` of
/// the carried object. `Deleted` carries the final version assigned by the
/// delete itself, not the last live version.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Added(Resource),
    Modified(Resource),
    Deleted(Resource),
    /// Watermark advance with no object change.
    Bookmark(Resource),
    /// Terminal error; the stream ends after it.
    Error(WatchStatus),
}

impl WatchEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Modified(_) => EventType::Modified,
            Self::Deleted(_) => EventType::Deleted,
            Self::Bookmark(_) => EventType::Bookmark,
            Self::Error(_) => EventType::Error,
        }
    }

    pub fn object(&self) -> Option<&Resource> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) | Self::Bookmark(o) => Some(o),
            Self::Error(_) => None,
        }
    }

    pub fn into_object(self) -> Option<Resource> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) | Self::Bookmark(o) => Some(o),
            Self::Error(_) => None,
        }
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.object().map(Resource::resource_version)
    }

    pub fn is_bookmark(&self) -> bool {
        matches!(self, Self::Bookmark(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use serde_json::json;

    fn sample(rv: u64) -> Resource {
        let mut obj = Resource::new(ResourceKind::new("g", "v1", "things"), Some("ns"), "a", json!({}));
        obj.metadata.resource_version = ResourceVersion::new(rv);
        obj
    }

    #[test]
    fn event_type_and_version() {
        let ev = WatchEvent::Modified(sample(105));
        assert_eq!(ev.event_type(), EventType::Modified);
        assert_eq!(ev.resource_version(), Some(ResourceVersion::new(105)));
        assert!(!ev.is_bookmark());
    }

    #[test]
    fn error_has_no_object() {
        let ev = WatchEvent::Error(WatchStatus::new(StatusReason::TooSlow, "queue full"));
        assert!(ev.is_error());
        assert!(ev.object().is_none());
        assert!(ev.resource_version().is_none());
        assert_eq!(ev.event_type().to_string(), "ERROR");
    }

    #[test]
    fn into_object_moves_payload() {
        let ev = WatchEvent::Deleted(sample(110));
        let obj = ev.into_object().unwrap();
        assert_eq!(obj.resource_version(), ResourceVersion::new(110));
    }
}
