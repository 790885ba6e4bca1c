//! Undo/redo history: full snapshots, row-page patches, and replay.
//!
//! Every history entry is either a complete [`ProjectSnapshot`] or a
//! [`ProjectPatch`] that records only the pages of rows that actually
//! changed, so history memory tracks edit size rather than canvas size.
//! A patch is only meaningful against the exact state it was captured
//! from; that state is named by an opaque `state_token` which is verified
//! before replay.

use std::collections::HashSet;
use std::ops::Range;

use thiserror::Error;

use crate::state::ProjectLayer;
use crate::state::ProjectSnapshot;
use crate::state::ProjectState;

/// Row-page granularity used when the caller does not pick one.
pub const DEFAULT_PAGE_ROWS: i32 = 64;

/// Errors from replaying history entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The patch was captured against a different base state and must not
    /// be replayed.
    #[error("patch does not match its base state: captured against token {captured}, applied against token {base}")]
    StateTokenMismatch { captured: u64, base: u64 },

    /// A captured page names a layer that does not exist after the
    /// patch's layer list is restored.
    #[error("patch page references layer {layer} outside the restored layer list")]
    PageLayerOutOfRange { layer: i32 },
}

/// One history entry. The kind is fixed at construction; consumers match
/// exhaustively so both kinds are always handled.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    Snapshot(ProjectSnapshot),
    Patch(ProjectPatch),
}

impl UndoEntry {
    /// Rebuilds the state this entry was captured from.
    ///
    /// `current` is the state being undone and `base_token` the caller's
    /// record of the token the entry was captured against. Snapshot
    /// entries restore wholesale and never fail; patch entries verify the
    /// token first.
    pub fn restore(
        &self,
        current: &ProjectSnapshot,
        base_token: u64,
    ) -> Result<ProjectSnapshot, HistoryError> {
        match self {
            Self::Snapshot(snapshot) => Ok(snapshot.clone()),
            Self::Patch(patch) => patch.apply_to(current, base_token),
        }
    }
}

/// Layer metadata mirrored into a patch (everything except cell planes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchLayerMeta {
    pub name: String,
    pub visible: bool,
    pub lock_transparency: bool,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl PatchLayerMeta {
    #[must_use]
    pub fn of(layer: &ProjectLayer) -> Self {
        Self {
            name: layer.name.clone(),
            visible: layer.visible,
            lock_transparency: layer.lock_transparency,
            offset_x: layer.offset_x,
            offset_y: layer.offset_y,
        }
    }

    fn write_to(&self, layer: &mut ProjectLayer) {
        layer.name = self.name.clone();
        layer.visible = self.visible;
        layer.lock_transparency = self.lock_transparency;
        layer.offset_x = self.offset_x;
        layer.offset_y = self.offset_y;
    }
}

/// The pre-edit contents of one page of rows in one layer.
///
/// Covers rows `page * page_rows .. page * page_rows + row_count` of
/// `layer`; every plane holds `row_count * columns` entries, where
/// `columns` comes from the owning patch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchPage {
    pub layer: i32,
    pub page: i32,
    pub page_rows: i32,
    pub row_count: i32,
    pub cells: Vec<u32>,
    pub fg: Vec<u32>,
    pub bg: Vec<u32>,
    pub attrs: Vec<u16>,
}

/// A partial record of a previous state: full metadata, but cell content
/// only for the pages that were edited.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectPatch {
    pub columns: i32,
    pub rows: i32,
    pub active_layer: i32,
    pub caret_row: i32,
    pub caret_col: i32,
    /// Token of the state this patch was captured from.
    pub state_token: u64,
    pub page_rows: i32,
    pub layers: Vec<PatchLayerMeta>,
    pub pages: Vec<PatchPage>,
}

impl ProjectPatch {
    /// Rebuilds the captured base state by replaying this patch over
    /// `current`.
    ///
    /// `base_token` must equal the patch's `state_token`; on mismatch the
    /// patch is not applied and `current` is untouched.
    pub fn apply_to(
        &self,
        current: &ProjectSnapshot,
        base_token: u64,
    ) -> Result<ProjectSnapshot, HistoryError> {
        if self.state_token != base_token {
            return Err(HistoryError::StateTokenMismatch {
                captured: self.state_token,
                base: base_token,
            });
        }

        let mut restored = current.clone();
        restored.columns = if self.columns > 0 {
            self.columns
        } else {
            current.columns
        };
        restored.rows = if self.rows > 0 { self.rows } else { 1 };
        restored.active_layer = self.active_layer;
        restored.caret_row = self.caret_row;
        restored.caret_col = self.caret_col;

        // Restore the layer list shape and metadata, then bring every
        // plane to the restored geometry before overlaying page content.
        restored
            .layers
            .resize_with(self.layers.len(), ProjectLayer::default);
        for (layer, meta) in restored.layers.iter_mut().zip(&self.layers) {
            meta.write_to(layer);
        }
        restored.normalize();

        let columns = usize::try_from(restored.columns).unwrap_or(0);
        let rows = restored.rows;
        for page in &self.pages {
            let layer = usize::try_from(page.layer)
                .ok()
                .and_then(|index| restored.layers.get_mut(index))
                .ok_or(HistoryError::PageLayerOutOfRange { layer: page.layer })?;

            let page_rows = if page.page_rows > 0 {
                page.page_rows
            } else {
                self.page_rows.max(1)
            };
            let start_row = page.page * page_rows;
            for r in 0..page.row_count {
                let row = start_row + r;
                if row < 0 || row >= rows {
                    continue;
                }
                let src = usize::try_from(r).unwrap_or(0) * columns;
                let dst = usize::try_from(row).unwrap_or(0) * columns;
                for c in 0..columns {
                    if let (Some(&value), Some(slot)) =
                        (page.cells.get(src + c), layer.cells.get_mut(dst + c))
                    {
                        *slot = value;
                    }
                    if let (Some(&value), Some(slot)) =
                        (page.fg.get(src + c), layer.fg.get_mut(dst + c))
                    {
                        *slot = value;
                    }
                    if let (Some(&value), Some(slot)) =
                        (page.bg.get(src + c), layer.bg.get_mut(dst + c))
                    {
                        *slot = value;
                    }
                    if let (Some(&value), Some(slot)) =
                        (page.attrs.get(src + c), layer.attrs.get_mut(dst + c))
                    {
                        *slot = value;
                    }
                }
            }
        }

        Ok(restored)
    }
}

/// Builds a [`ProjectPatch`] against a base snapshot as edits are
/// reported.
///
/// The editing layer reports each row it is about to modify; the builder
/// captures the page containing that row at most once, copying its
/// pre-edit contents from the base. Pages wholly beyond the base height
/// are skipped (undoing will shrink the document anyway).
pub struct PatchBuilder<'a> {
    base: &'a ProjectSnapshot,
    patch: ProjectPatch,
    captured: HashSet<(i32, i32)>,
}

impl<'a> PatchBuilder<'a> {
    /// Builder with the default page granularity.
    #[must_use]
    pub fn new(base: &'a ProjectSnapshot, state_token: u64) -> Self {
        Self::with_page_rows(base, state_token, DEFAULT_PAGE_ROWS)
    }

    /// Builder with an explicit page granularity (values < 1 fall back to
    /// the default).
    #[must_use]
    pub fn with_page_rows(base: &'a ProjectSnapshot, state_token: u64, page_rows: i32) -> Self {
        let page_rows = if page_rows > 0 {
            page_rows
        } else {
            DEFAULT_PAGE_ROWS
        };
        Self {
            base,
            captured: HashSet::new(),
            patch: ProjectPatch {
                columns: base.columns,
                rows: base.rows,
                active_layer: base.active_layer,
                caret_row: base.caret_row,
                caret_col: base.caret_col,
                state_token,
                page_rows,
                layers: base.layers.iter().map(PatchLayerMeta::of).collect(),
                pages: Vec::new(),
            },
        }
    }

    /// Records that `row` of `layer` is about to change.
    pub fn touch_row(&mut self, layer: usize, row: i32) {
        let Some(base_layer) = self.base.layers.get(layer) else {
            return;
        };
        let layer_index = i32::try_from(layer).unwrap_or(i32::MAX);
        let page_rows = self.patch.page_rows;
        let page = row.max(0) / page_rows;
        if !self.captured.insert((layer_index, page)) {
            return;
        }

        let start_row = page * page_rows;
        if start_row >= self.patch.rows {
            return;
        }
        let row_count = page_rows.min(self.patch.rows - start_row);
        if row_count <= 0 {
            return;
        }

        let columns = usize::try_from(self.patch.columns).unwrap_or(0);
        let count = usize::try_from(row_count).unwrap_or(0) * columns;
        let mut page_data = PatchPage {
            layer: layer_index,
            page,
            page_rows,
            row_count,
            cells: vec![0; count],
            fg: vec![0; count],
            bg: vec![0; count],
            attrs: vec![0; count],
        };

        for r in 0..usize::try_from(row_count).unwrap_or(0) {
            let src = (usize::try_from(start_row).unwrap_or(0) + r) * columns;
            let dst = r * columns;
            for c in 0..columns {
                if let Some(&value) = base_layer.cells.get(src + c) {
                    page_data.cells[dst + c] = value;
                }
                if let Some(&value) = base_layer.fg.get(src + c) {
                    page_data.fg[dst + c] = value;
                }
                if let Some(&value) = base_layer.bg.get(src + c) {
                    page_data.bg[dst + c] = value;
                }
                if let Some(&value) = base_layer.attrs.get(src + c) {
                    page_data.attrs[dst + c] = value;
                }
            }
        }

        self.patch.pages.push(page_data);
    }

    /// Records a contiguous range of rows in `layer`.
    pub fn touch_rows(&mut self, layer: usize, rows: Range<i32>) {
        for row in rows {
            self.touch_row(layer, row);
        }
    }

    /// Finishes capture and yields the history entry.
    #[must_use]
    pub fn finish(self) -> UndoEntry {
        UndoEntry::Patch(self.patch)
    }
}

impl ProjectState {
    /// Pushes a history entry for the state being replaced, trimming the
    /// oldest entries past `undo_limit` (0 = unlimited) and invalidating
    /// the redo stack.
    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
        if self.undo_limit > 0 && self.undo.len() > self.undo_limit {
            let excess = self.undo.len() - self.undo_limit;
            self.undo.drain(..excess);
        }
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot(columns: i32, rows: i32, layer_count: usize) -> ProjectSnapshot {
        let cell_count = (columns * rows) as usize;
        let mut snapshot = ProjectSnapshot {
            columns,
            rows,
            active_layer: 0,
            caret_row: 0,
            caret_col: 0,
            layers: Vec::new(),
        };
        for i in 0..layer_count {
            let mut layer = ProjectLayer::new(format!("Layer {}", i + 1), cell_count);
            for (index, cell) in layer.cells.iter_mut().enumerate() {
                *cell = u32::try_from(index % 97).unwrap_or(0) + 32;
            }
            snapshot.layers.push(layer);
        }
        snapshot
    }

    #[test]
    fn push_undo_trims_to_limit() {
        let mut state = ProjectState {
            undo_limit: 3,
            ..Default::default()
        };
        for i in 0..5 {
            let mut snap = snapshot(2, 1, 1);
            snap.caret_col = i;
            state.push_undo(UndoEntry::Snapshot(snap));
        }
        assert_eq!(state.undo.len(), 3);
        let carets: Vec<i32> = state
            .undo
            .iter()
            .map(|entry| match entry {
                UndoEntry::Snapshot(s) => s.caret_col,
                UndoEntry::Patch(_) => panic!("expected snapshots"),
            })
            .collect();
        assert_eq!(carets, vec![2, 3, 4]);
    }

    #[test]
    fn push_undo_unlimited_when_zero() {
        let mut state = ProjectState {
            undo_limit: 0,
            ..Default::default()
        };
        for _ in 0..1000 {
            state.push_undo(UndoEntry::Snapshot(ProjectSnapshot::default()));
        }
        assert_eq!(state.undo.len(), 1000);
    }

    #[test]
    fn push_undo_clears_redo() {
        let mut state = ProjectState::default();
        state
            .redo
            .push(UndoEntry::Snapshot(ProjectSnapshot::default()));
        state.push_undo(UndoEntry::Snapshot(ProjectSnapshot::default()));
        assert!(state.redo.is_empty());
    }

    #[test]
    fn builder_captures_only_touched_pages() {
        let base = snapshot(80, 1000, 1);
        let mut builder = PatchBuilder::with_page_rows(&base, 11, 5);
        builder.touch_rows(0, 10..15);
        let entry = builder.finish();

        let UndoEntry::Patch(patch) = entry else {
            panic!("expected a patch");
        };
        assert_eq!(patch.pages.len(), 1);
        let page = &patch.pages[0];
        assert_eq!(page.page, 2);
        assert_eq!(page.row_count, 5);
        assert_eq!(page.cells.len(), 5 * 80);
        assert_eq!(page.fg.len(), 5 * 80);
    }

    #[test]
    fn builder_captures_each_page_once() {
        let base = snapshot(10, 100, 1);
        let mut builder = PatchBuilder::with_page_rows(&base, 1, 8);
        builder.touch_row(0, 3);
        builder.touch_row(0, 4);
        builder.touch_row(0, 3);
        let UndoEntry::Patch(patch) = builder.finish() else {
            panic!("expected a patch");
        };
        assert_eq!(patch.pages.len(), 1);
    }

    #[test]
    fn builder_skips_pages_beyond_base_height() {
        let base = snapshot(10, 4, 1);
        let mut builder = PatchBuilder::with_page_rows(&base, 1, 4);
        builder.touch_row(0, 9);
        let UndoEntry::Patch(patch) = builder.finish() else {
            panic!("expected a patch");
        };
        assert!(patch.pages.is_empty());
    }

    #[test]
    fn builder_bounds_last_page_to_base_height() {
        let base = snapshot(10, 6, 1);
        let mut builder = PatchBuilder::with_page_rows(&base, 1, 4);
        builder.touch_row(0, 5);
        let UndoEntry::Patch(patch) = builder.finish() else {
            panic!("expected a patch");
        };
        assert_eq!(patch.pages[0].row_count, 2);
        assert_eq!(patch.pages[0].cells.len(), 20);
    }

    #[test]
    fn patch_restores_edited_rows() {
        let base = snapshot(8, 32, 2);
        let mut builder = PatchBuilder::new(&base, 42);
        builder.touch_rows(1, 3..5);
        let entry = builder.finish();

        let mut edited = base.clone();
        for c in 0..8 {
            edited.layers[1].cells[3 * 8 + c] = 0x2588;
            edited.layers[1].fg[3 * 8 + c] = 0xFF00_FF00;
        }
        edited.caret_row = 4;

        let restored = entry.restore(&edited, 42).expect("token matches");
        assert_eq!(restored, base);
    }

    #[test]
    fn patch_rejects_mismatched_token() {
        let base = snapshot(4, 4, 1);
        let mut builder = PatchBuilder::new(&base, 7);
        builder.touch_row(0, 0);
        let entry = builder.finish();

        let err = entry.restore(&base, 8).expect_err("token differs");
        assert_eq!(
            err,
            HistoryError::StateTokenMismatch {
                captured: 7,
                base: 8
            }
        );
    }

    #[test]
    fn patch_restores_layer_count_and_metadata() {
        let base = snapshot(4, 4, 2);
        let mut builder = PatchBuilder::new(&base, 5);
        builder.touch_row(0, 0);
        let entry = builder.finish();

        // Simulate deleting a layer and renaming the survivor.
        let mut edited = base.clone();
        edited.layers.pop();
        edited.layers[0].name = "Renamed".to_string();

        let restored = entry.restore(&edited, 5).expect("token matches");
        assert_eq!(restored.layers.len(), 2);
        assert_eq!(restored.layers[0].name, base.layers[0].name);
        assert_eq!(restored.layers[1].name, base.layers[1].name);
    }

    #[test]
    fn snapshot_entry_restores_wholesale() {
        let base = snapshot(4, 4, 1);
        let entry = UndoEntry::Snapshot(base.clone());
        let current = snapshot(2, 2, 1);
        // Snapshot restore ignores the token.
        let restored = entry.restore(&current, 999).expect("never fails");
        assert_eq!(restored, base);
    }

    #[test]
    fn patch_page_out_of_range_layer_is_an_error() {
        let patch = ProjectPatch {
            columns: 2,
            rows: 2,
            page_rows: 2,
            layers: vec![PatchLayerMeta::default()],
            pages: vec![PatchPage {
                layer: 5,
                page: 0,
                page_rows: 2,
                row_count: 1,
                cells: vec![0, 0],
                fg: vec![0, 0],
                bg: vec![0, 0],
                attrs: vec![0, 0],
            }],
            ..Default::default()
        };
        let err = patch
            .apply_to(&ProjectSnapshot::default(), 0)
            .expect_err("layer 5 does not exist");
        assert_eq!(err, HistoryError::PageLayerOutOfRange { layer: 5 });
    }
}
