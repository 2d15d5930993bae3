//! String metadata attached to instructions and globals.
//!
//! The pass communicates results exclusively through three metadata keys,
//! each holding a single string node:
//!
//! - [`TAINT`] (`mkint.taint`) - participation in a source-to-sink flow;
//!   the string is `"source"` on the originating synthetic source call and
//!   empty elsewhere
//! - [`SINK`] (`mkint.sink`) - a value consumed by a sink; the string is
//!   the sink's name (or `"return"` for source-function returns)
//! - [`ERR`] (`mkint.err`) - a diagnosed integer bug; the string is one of
//!   the six canonical error-kind names
//!
//! A downstream harness re-reads these annotations from the printed module,
//! so iteration order is kept deterministic.

use std::collections::BTreeMap;
use std::fmt;

/// Metadata key for taint annotations.
pub const TAINT: &str = "mkint.taint";

/// Metadata key for sink annotations.
pub const SINK: &str = "mkint.sink";

/// Metadata key for diagnosed integer bugs.
pub const ERR: &str = "mkint.err";

/// A small ordered table of string metadata nodes.
///
/// Keys are the static metadata key names; a `BTreeMap` keeps rendering
/// deterministic across runs, which the idempotence guarantee relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: BTreeMap<&'static str, String>,
}

impl MetadataMap {
    /// Creates an empty metadata table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous node.
    pub fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.entries.insert(key, value.into());
    }

    /// Returns the string node for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns `true` if a node exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns `true` if no metadata is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl fmt::Display for MetadataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            write!(f, ", !{key} !\"{value}\"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_set_get() {
        let mut md = MetadataMap::new();
        assert!(md.is_empty());
        assert!(!md.contains(TAINT));

        md.set(TAINT, "source");
        assert!(md.contains(TAINT));
        assert_eq!(md.get(TAINT), Some("source"));
        assert_eq!(md.get(SINK), None);
    }

    #[test]
    fn test_metadata_overwrite() {
        let mut md = MetadataMap::new();
        md.set(SINK, "malloc");
        md.set(SINK, "kzalloc");
        assert_eq!(md.get(SINK), Some("kzalloc"));
    }

    #[test]
    fn test_metadata_display_is_key_ordered() {
        let mut md = MetadataMap::new();
        md.set(TAINT, "");
        md.set(ERR, "divide by zero");
        md.set(SINK, "malloc");

        // BTreeMap order: mkint.err < mkint.sink < mkint.taint
        assert_eq!(
            format!("{md}"),
            ", !mkint.err !\"divide by zero\", !mkint.sink !\"malloc\", !mkint.taint !\"\""
        );
    }
}
