//! Detection of legacy on-disk and in-document shapes.
//!
//! Two generations predate the current format and are still loadable:
//! project files written before the container header existed (a bare
//! binary document with no magic), and undo/redo entries written before
//! the patch variant existed (a bare snapshot object with no `kind` tag).
//! Both sniffs live here, away from the steady-state decode paths, so the
//! common case stays simple.

use serde_json::Value;

use crate::CONTAINER_MAGIC;

/// Returns `true` when `bytes` start with the container magic; anything
/// else is treated as a pre-container bare document.
#[must_use]
pub fn has_container_header(bytes: &[u8]) -> bool {
    bytes.len() >= CONTAINER_MAGIC.len() && &bytes[..CONTAINER_MAGIC.len()] == CONTAINER_MAGIC
}

/// Recognizes an undo/redo entry written before entries were tagged.
///
/// Old files stored raw snapshots in the history arrays. Patch entries
/// also carry `columns` and `layers`, so shape alone cannot distinguish
/// the two; an entry counts as a legacy bare snapshot only when it has
/// both fields and **no** `kind` tag. A present `kind` is always trusted
/// instead of this sniff.
#[must_use]
pub fn is_legacy_bare_snapshot(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        !obj.contains_key("kind") && obj.contains_key("columns") && obj.contains_key("layers")
    })
}
