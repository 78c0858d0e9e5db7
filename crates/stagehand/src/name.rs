// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

/// The canonical name of a service: a dotted path such as `db.pool.primary`.
///
/// Names are immutable and cheap to clone; the segment storage is shared. Two
/// names are equal exactly when their segment vectors are equal, and names
/// order lexicographically by segment.
///
/// # Examples
///
/// ```
/// use stagehand::ServiceName;
///
/// let name = ServiceName::of("db.pool");
/// let child = name.append("primary");
///
/// assert_eq!(child.to_string(), "db.pool.primary");
/// assert_eq!(ServiceName::of("db.pool.primary"), child);
/// assert!(name < child);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceName {
    segments: Arc<[Box<str>]>,
}

impl ServiceName {
    /// Creates a name from a dotted path, splitting on `.`.
    #[must_use]
    pub fn of(name: impl AsRef<str>) -> Self {
        let segments: Vec<Box<str>> = name.as_ref().split('.').map(Box::from).collect();
        Self {
            segments: segments.into(),
        }
    }

    /// Returns a new name with `segment` appended as one additional path element.
    #[must_use]
    pub fn append(&self, segment: impl AsRef<str>) -> Self {
        let mut segments: Vec<Box<str>> = self.segments.to_vec();
        segments.push(Box::from(segment.as_ref()));
        Self {
            segments: segments.into(),
        }
    }

    /// The path elements of this name, in order.
    #[must_use]
    pub fn segments(&self) -> &[Box<str>] {
        &self.segments
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ServiceName: Send, Sync, Clone);
    }

    #[test]
    fn equality_is_by_segments() {
        assert_eq!(ServiceName::of("a.b.c"), ServiceName::of("a.b.c"));
        assert_ne!(ServiceName::of("a.b"), ServiceName::of("a.b.c"));
        assert_ne!(ServiceName::of("a.bc"), ServiceName::of("a.b.c"));
    }

    #[test]
    fn append_extends_the_path() {
        let name = ServiceName::of("net").append("listener");
        assert_eq!(name, ServiceName::of("net.listener"));
        assert_eq!(name.segments().len(), 2);
    }

    #[test]
    fn ordering_is_lexicographic_by_segment() {
        assert!(ServiceName::of("a") < ServiceName::of("a.b"));
        assert!(ServiceName::of("a.b") < ServiceName::of("b"));
    }

    #[test]
    fn display_round_trips() {
        let name = ServiceName::of("x.y.z");
        assert_eq!(ServiceName::of(name.to_string()), name);
        assert_eq!(format!("{name:?}"), "x.y.z");
    }
}
