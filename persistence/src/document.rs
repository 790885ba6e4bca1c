//! The document schema: `ProjectState` ⇄ a structured document.
//!
//! The document is a tree of ordered-key maps, arrays, and scalars
//! ([`serde_json::Value`]), serialized to bytes as MessagePack. The
//! mapping is written out field by field rather than derived because the
//! compatibility rules are part of the format: every optional field
//! tolerates absence or a wrong type by taking its default, unknown
//! fields from newer writers are ignored, and only the handful of
//! structurally mandatory fields can fail a parse.
//!
//! Glyphs are encoded as unsigned 32-bit scalar values, never as a native
//! character type, to keep the encoded form unambiguous.

use phosphor_project::PaletteRef;
use phosphor_project::PatchLayerMeta;
use phosphor_project::PatchPage;
use phosphor_project::ProjectLayer;
use phosphor_project::ProjectPatch;
use phosphor_project::ProjectSnapshot;
use phosphor_project::ProjectState;
use phosphor_project::SauceMeta;
use phosphor_project::UndoEntry;
use serde_json::Map;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::error::Result;
use crate::migration;

/// Discriminator stored in the document's top-level `magic` field.
pub const DOCUMENT_MAGIC: &str = "utf8-art-editor";

/// Serialize a document to its canonical compact binary form.
pub fn encode_document(doc: &Value) -> Result<Vec<u8>> {
    rmp_serde::to_vec(doc)
        .map_err(|e| PersistenceError::Schema(format!("document encode failed: {e}")))
}

/// Decode the canonical binary form back into a document.
pub fn decode_document(bytes: &[u8]) -> Result<Value> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| PersistenceError::Corruption(format!("document decode failed: {e}")))
}

// ---------------------------------------------------------------------------
// Tolerant field readers
// ---------------------------------------------------------------------------

fn get_i32(obj: &Map<String, Value>, key: &str) -> Option<i32> {
    obj.get(key)?.as_i64().and_then(|v| i32::try_from(v).ok())
}

fn get_u64(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key)?.as_u64()
}

fn get_bool(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key)?.as_bool()
}

fn get_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)?.as_str()
}

fn get_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key)?.as_array()
}

/// Reads an integer plane. Every element must be an integer in `0..=max`;
/// anything else is a schema error, since silently mangled cell data is
/// worse than a failed load.
fn int_plane(items: &[Value], max: u64, what: &str) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let value = if let Some(unsigned) = item.as_u64() {
            unsigned
        } else if item.as_i64().is_some() {
            return Err(PersistenceError::Schema(format!(
                "{what} contains a negative value"
            )));
        } else {
            return Err(PersistenceError::Schema(format!(
                "{what} contains a non-integer value"
            )));
        };
        if value > max {
            return Err(PersistenceError::Schema(format!(
                "{what} contains an out-of-range value {value}"
            )));
        }
        out.push(value);
    }
    Ok(out)
}

fn u32_plane(items: &[Value], what: &str) -> Result<Vec<u32>> {
    Ok(int_plane(items, u64::from(u32::MAX), what)?
        .into_iter()
        .map(|v| v as u32)
        .collect())
}

fn u16_plane(items: &[Value], what: &str) -> Result<Vec<u16>> {
    Ok(int_plane(items, u64::from(u16::MAX), what)?
        .into_iter()
        .map(|v| v as u16)
        .collect())
}

fn u32_array(values: &[u32]) -> Value {
    Value::Array(values.iter().map(|&v| Value::from(v)).collect())
}

fn u16_array(values: &[u16]) -> Value {
    Value::Array(values.iter().map(|&v| Value::from(v)).collect())
}

// ---------------------------------------------------------------------------
// Palette reference
// ---------------------------------------------------------------------------

fn palette_ref_to_value(palette_ref: PaletteRef) -> Value {
    let mut obj = Map::new();
    obj.insert("builtin".to_string(), Value::from(palette_ref.builtin_id()));
    Value::Object(obj)
}

fn palette_ref_from_value(value: &Value) -> PaletteRef {
    let Some(obj) = value.as_object() else {
        return PaletteRef::default();
    };
    match get_u64(obj, "builtin").and_then(|id| u32::try_from(id).ok()) {
        Some(id) => PaletteRef::Builtin(id),
        None => PaletteRef::default(),
    }
}

// ---------------------------------------------------------------------------
// SAUCE metadata
// ---------------------------------------------------------------------------

fn sauce_to_value(sauce: &SauceMeta) -> Value {
    let mut obj = Map::new();
    obj.insert("present".to_string(), Value::from(sauce.present));
    obj.insert("title".to_string(), Value::from(sauce.title.clone()));
    obj.insert("author".to_string(), Value::from(sauce.author.clone()));
    obj.insert("group".to_string(), Value::from(sauce.group.clone()));
    obj.insert("date".to_string(), Value::from(sauce.date.clone()));
    obj.insert("file_size".to_string(), Value::from(sauce.file_size));
    obj.insert("data_type".to_string(), Value::from(sauce.data_type));
    obj.insert("file_type".to_string(), Value::from(sauce.file_type));
    obj.insert("tinfo1".to_string(), Value::from(sauce.tinfo1));
    obj.insert("tinfo2".to_string(), Value::from(sauce.tinfo2));
    obj.insert("tinfo3".to_string(), Value::from(sauce.tinfo3));
    obj.insert("tinfo4".to_string(), Value::from(sauce.tinfo4));
    obj.insert("tflags".to_string(), Value::from(sauce.tflags));
    obj.insert("tinfos".to_string(), Value::from(sauce.tinfos.clone()));
    obj.insert(
        "comments".to_string(),
        Value::Array(
            sauce
                .comments
                .iter()
                .map(|c| Value::from(c.clone()))
                .collect(),
        ),
    );
    Value::Object(obj)
}

fn sauce_from_value(value: &Value) -> SauceMeta {
    let mut sauce = SauceMeta::default();
    let Some(obj) = value.as_object() else {
        return sauce;
    };
    if let Some(present) = get_bool(obj, "present") {
        sauce.present = present;
    }
    if let Some(title) = get_str(obj, "title") {
        sauce.title = title.to_string();
    }
    if let Some(author) = get_str(obj, "author") {
        sauce.author = author.to_string();
    }
    if let Some(group) = get_str(obj, "group") {
        sauce.group = group.to_string();
    }
    if let Some(date) = get_str(obj, "date") {
        sauce.date = date.to_string();
    }
    if let Some(file_size) = get_u64(obj, "file_size").and_then(|v| u32::try_from(v).ok()) {
        sauce.file_size = file_size;
    }
    if let Some(data_type) = get_u64(obj, "data_type").and_then(|v| u8::try_from(v).ok()) {
        sauce.data_type = data_type;
    }
    if let Some(file_type) = get_u64(obj, "file_type").and_then(|v| u8::try_from(v).ok()) {
        sauce.file_type = file_type;
    }
    if let Some(tinfo1) = get_u64(obj, "tinfo1").and_then(|v| u16::try_from(v).ok()) {
        sauce.tinfo1 = tinfo1;
    }
    if let Some(tinfo2) = get_u64(obj, "tinfo2").and_then(|v| u16::try_from(v).ok()) {
        sauce.tinfo2 = tinfo2;
    }
    if let Some(tinfo3) = get_u64(obj, "tinfo3").and_then(|v| u16::try_from(v).ok()) {
        sauce.tinfo3 = tinfo3;
    }
    if let Some(tinfo4) = get_u64(obj, "tinfo4").and_then(|v| u16::try_from(v).ok()) {
        sauce.tinfo4 = tinfo4;
    }
    if let Some(tflags) = get_u64(obj, "tflags").and_then(|v| u8::try_from(v).ok()) {
        sauce.tflags = tflags;
    }
    if let Some(tinfos) = get_str(obj, "tinfos") {
        sauce.tinfos = tinfos.to_string();
    }
    if let Some(comments) = get_array(obj, "comments") {
        sauce.comments = comments
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    sauce
}

// ---------------------------------------------------------------------------
// Layers and snapshots
// ---------------------------------------------------------------------------

fn layer_to_value(layer: &ProjectLayer) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::from(layer.name.clone()));
    obj.insert("visible".to_string(), Value::from(layer.visible));
    obj.insert(
        "lock_transparency".to_string(),
        Value::from(layer.lock_transparency),
    );
    obj.insert("offset_x".to_string(), Value::from(layer.offset_x));
    obj.insert("offset_y".to_string(), Value::from(layer.offset_y));
    obj.insert("cells".to_string(), u32_array(&layer.cells));
    obj.insert("fg".to_string(), u32_array(&layer.fg));
    obj.insert("bg".to_string(), u32_array(&layer.bg));
    obj.insert("attrs".to_string(), u16_array(&layer.attrs));
    Value::Object(obj)
}

fn layer_from_value(value: &Value) -> Result<ProjectLayer> {
    let Some(obj) = value.as_object() else {
        return Err(PersistenceError::Schema("layer is not a map".to_string()));
    };

    let mut layer = ProjectLayer {
        visible: true,
        ..Default::default()
    };
    if let Some(name) = get_str(obj, "name") {
        layer.name = name.to_string();
    }
    if let Some(visible) = get_bool(obj, "visible") {
        layer.visible = visible;
    }
    if let Some(lock) = get_bool(obj, "lock_transparency") {
        layer.lock_transparency = lock;
    }
    if let Some(offset_x) = get_i32(obj, "offset_x") {
        layer.offset_x = offset_x;
    }
    if let Some(offset_y) = get_i32(obj, "offset_y") {
        layer.offset_y = offset_y;
    }

    let Some(cells) = get_array(obj, "cells") else {
        return Err(PersistenceError::Schema(
            "layer missing 'cells' array".to_string(),
        ));
    };
    layer.cells = u32_plane(cells, "layer 'cells'")?;

    // Missing planes default to all-zero sized from the cells, never to a
    // length mismatch.
    layer.fg = match get_array(obj, "fg") {
        Some(items) => u32_plane(items, "layer 'fg'")?,
        None => vec![0; layer.cells.len()],
    };
    layer.bg = match get_array(obj, "bg") {
        Some(items) => u32_plane(items, "layer 'bg'")?,
        None => vec![0; layer.cells.len()],
    };
    layer.attrs = match get_array(obj, "attrs") {
        Some(items) => u16_plane(items, "layer 'attrs'")?,
        None => vec![0; layer.cells.len()],
    };
    Ok(layer)
}

fn snapshot_to_value(snapshot: &ProjectSnapshot) -> Value {
    let mut obj = Map::new();
    obj.insert("columns".to_string(), Value::from(snapshot.columns));
    obj.insert("rows".to_string(), Value::from(snapshot.rows));
    obj.insert(
        "active_layer".to_string(),
        Value::from(snapshot.active_layer),
    );
    obj.insert("caret_row".to_string(), Value::from(snapshot.caret_row));
    obj.insert("caret_col".to_string(), Value::from(snapshot.caret_col));
    obj.insert(
        "layers".to_string(),
        Value::Array(snapshot.layers.iter().map(layer_to_value).collect()),
    );
    Value::Object(obj)
}

pub(crate) fn snapshot_from_value(value: &Value) -> Result<ProjectSnapshot> {
    let Some(obj) = value.as_object() else {
        return Err(PersistenceError::Schema(
            "snapshot is not a map".to_string(),
        ));
    };

    let mut snapshot = ProjectSnapshot {
        columns: get_i32(obj, "columns").ok_or_else(|| {
            PersistenceError::Schema("snapshot missing integer 'columns'".to_string())
        })?,
        rows: get_i32(obj, "rows").ok_or_else(|| {
            PersistenceError::Schema("snapshot missing integer 'rows'".to_string())
        })?,
        ..Default::default()
    };
    if let Some(active_layer) = get_i32(obj, "active_layer") {
        snapshot.active_layer = active_layer;
    }
    if let Some(caret_row) = get_i32(obj, "caret_row") {
        snapshot.caret_row = caret_row;
    }
    if let Some(caret_col) = get_i32(obj, "caret_col") {
        snapshot.caret_col = caret_col;
    }

    let Some(layers) = get_array(obj, "layers") else {
        return Err(PersistenceError::Schema(
            "snapshot missing 'layers' array".to_string(),
        ));
    };
    for layer in layers {
        snapshot.layers.push(layer_from_value(layer)?);
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Undo entries
// ---------------------------------------------------------------------------

fn patch_layer_meta_to_value(meta: &PatchLayerMeta) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::from(meta.name.clone()));
    obj.insert("visible".to_string(), Value::from(meta.visible));
    obj.insert(
        "lock_transparency".to_string(),
        Value::from(meta.lock_transparency),
    );
    obj.insert("offset_x".to_string(), Value::from(meta.offset_x));
    obj.insert("offset_y".to_string(), Value::from(meta.offset_y));
    Value::Object(obj)
}

fn patch_layer_meta_from_value(value: &Value) -> Option<PatchLayerMeta> {
    let obj = value.as_object()?;
    let mut meta = PatchLayerMeta {
        visible: true,
        ..Default::default()
    };
    if let Some(name) = get_str(obj, "name") {
        meta.name = name.to_string();
    }
    if let Some(visible) = get_bool(obj, "visible") {
        meta.visible = visible;
    }
    if let Some(lock) = get_bool(obj, "lock_transparency") {
        meta.lock_transparency = lock;
    }
    if let Some(offset_x) = get_i32(obj, "offset_x") {
        meta.offset_x = offset_x;
    }
    if let Some(offset_y) = get_i32(obj, "offset_y") {
        meta.offset_y = offset_y;
    }
    Some(meta)
}

fn patch_page_to_value(page: &PatchPage) -> Value {
    let mut obj = Map::new();
    obj.insert("layer".to_string(), Value::from(page.layer));
    obj.insert("page".to_string(), Value::from(page.page));
    obj.insert("page_rows".to_string(), Value::from(page.page_rows));
    obj.insert("row_count".to_string(), Value::from(page.row_count));
    obj.insert("cells".to_string(), u32_array(&page.cells));
    obj.insert("fg".to_string(), u32_array(&page.fg));
    obj.insert("bg".to_string(), u32_array(&page.bg));
    obj.insert("attrs".to_string(), u16_array(&page.attrs));
    Value::Object(obj)
}

fn patch_page_from_value(value: &Value) -> Result<Option<PatchPage>> {
    let Some(obj) = value.as_object() else {
        return Ok(None);
    };
    let mut page = PatchPage::default();
    if let Some(layer) = get_i32(obj, "layer") {
        page.layer = layer;
    }
    if let Some(index) = get_i32(obj, "page") {
        page.page = index;
    }
    if let Some(page_rows) = get_i32(obj, "page_rows") {
        page.page_rows = page_rows;
    }
    if let Some(row_count) = get_i32(obj, "row_count") {
        page.row_count = row_count;
    }

    let Some(cells) = get_array(obj, "cells") else {
        return Err(PersistenceError::Schema(
            "undo patch page missing 'cells' array".to_string(),
        ));
    };
    page.cells = u32_plane(cells, "undo patch page 'cells'")?;
    page.fg = match get_array(obj, "fg") {
        Some(items) => u32_plane(items, "undo patch page 'fg'")?,
        None => vec![0; page.cells.len()],
    };
    page.bg = match get_array(obj, "bg") {
        Some(items) => u32_plane(items, "undo patch page 'bg'")?,
        None => vec![0; page.cells.len()],
    };
    page.attrs = match get_array(obj, "attrs") {
        Some(items) => u16_plane(items, "undo patch page 'attrs'")?,
        None => vec![0; page.cells.len()],
    };
    Ok(Some(page))
}

fn undo_entry_to_value(entry: &UndoEntry) -> Value {
    let mut obj = Map::new();
    match entry {
        UndoEntry::Patch(patch) => {
            obj.insert("kind".to_string(), Value::from("patch"));
            obj.insert("columns".to_string(), Value::from(patch.columns));
            obj.insert("rows".to_string(), Value::from(patch.rows));
            obj.insert("active_layer".to_string(), Value::from(patch.active_layer));
            obj.insert("caret_row".to_string(), Value::from(patch.caret_row));
            obj.insert("caret_col".to_string(), Value::from(patch.caret_col));
            obj.insert("state_token".to_string(), Value::from(patch.state_token));
            obj.insert("page_rows".to_string(), Value::from(patch.page_rows));
            obj.insert(
                "layers".to_string(),
                Value::Array(patch.layers.iter().map(patch_layer_meta_to_value).collect()),
            );
            obj.insert(
                "pages".to_string(),
                Value::Array(patch.pages.iter().map(patch_page_to_value).collect()),
            );
        }
        UndoEntry::Snapshot(snapshot) => {
            obj.insert("kind".to_string(), Value::from("snapshot"));
            obj.insert("snapshot".to_string(), snapshot_to_value(snapshot));
        }
    }
    Value::Object(obj)
}

fn patch_from_value(obj: &Map<String, Value>) -> Result<ProjectPatch> {
    let mut patch = ProjectPatch::default();
    if let Some(columns) = get_i32(obj, "columns") {
        patch.columns = columns;
    }
    if let Some(rows) = get_i32(obj, "rows") {
        patch.rows = rows;
    }
    if let Some(active_layer) = get_i32(obj, "active_layer") {
        patch.active_layer = active_layer;
    }
    if let Some(caret_row) = get_i32(obj, "caret_row") {
        patch.caret_row = caret_row;
    }
    if let Some(caret_col) = get_i32(obj, "caret_col") {
        patch.caret_col = caret_col;
    }
    if let Some(state_token) = get_u64(obj, "state_token") {
        patch.state_token = state_token;
    }
    if let Some(page_rows) = get_i32(obj, "page_rows") {
        patch.page_rows = page_rows;
    }
    if let Some(layers) = get_array(obj, "layers") {
        patch.layers = layers
            .iter()
            .filter_map(patch_layer_meta_from_value)
            .collect();
    }
    if let Some(pages) = get_array(obj, "pages") {
        for page in pages {
            if let Some(page) = patch_page_from_value(page)? {
                patch.pages.push(page);
            }
        }
    }
    Ok(patch)
}

/// Decodes one entry of the `undo`/`redo` arrays.
///
/// The legacy bare-snapshot shape is handled by
/// [`migration::is_legacy_bare_snapshot`] before the tagged decode; a
/// present `kind` field is always trusted over structural shape.
fn undo_entry_from_value(value: &Value) -> Result<UndoEntry> {
    if migration::is_legacy_bare_snapshot(value) {
        return Ok(UndoEntry::Snapshot(snapshot_from_value(value)?));
    }

    let Some(obj) = value.as_object() else {
        return Err(PersistenceError::Schema(
            "undo entry is not a map".to_string(),
        ));
    };
    let kind = get_str(obj, "kind").unwrap_or("snapshot");
    if kind == "patch" {
        return Ok(UndoEntry::Patch(patch_from_value(obj)?));
    }
    let Some(snapshot) = obj.get("snapshot") else {
        return Err(PersistenceError::Schema(
            "undo snapshot entry missing 'snapshot'".to_string(),
        ));
    };
    Ok(UndoEntry::Snapshot(snapshot_from_value(snapshot)?))
}

// ---------------------------------------------------------------------------
// The project root
// ---------------------------------------------------------------------------

/// Builds the document form of a whole project.
#[must_use]
pub fn to_document(state: &ProjectState) -> Value {
    let mut doc = Map::new();
    doc.insert("magic".to_string(), Value::from(DOCUMENT_MAGIC));
    doc.insert("version".to_string(), Value::from(state.version));
    doc.insert(
        "undo_limit".to_string(),
        Value::from(state.undo_limit as u64),
    );
    doc.insert(
        "palette_ref".to_string(),
        palette_ref_to_value(state.palette_ref),
    );
    if !state.colour_palette_title.is_empty() {
        doc.insert(
            "colour_palette_title".to_string(),
            Value::from(state.colour_palette_title.clone()),
        );
    }
    doc.insert("sauce".to_string(), sauce_to_value(&state.sauce));
    doc.insert("current".to_string(), snapshot_to_value(&state.current));
    doc.insert(
        "undo".to_string(),
        Value::Array(state.undo.iter().map(undo_entry_to_value).collect()),
    );
    doc.insert(
        "redo".to_string(),
        Value::Array(state.redo.iter().map(undo_entry_to_value).collect()),
    );
    Value::Object(doc)
}

/// Rebuilds a project from its document form.
///
/// Builds a fresh `ProjectState` and only returns it on full success;
/// a failure at any nesting level aborts the whole parse.
pub fn from_document(doc: &Value) -> Result<ProjectState> {
    let Some(obj) = doc.as_object() else {
        return Err(PersistenceError::Schema(
            "project document root is not a map".to_string(),
        ));
    };

    // Older documents lack the discriminator entirely; only a present and
    // wrong value is fatal.
    if let Some(magic) = get_str(obj, "magic")
        && magic != DOCUMENT_MAGIC
    {
        return Err(PersistenceError::Format(format!(
            "not a {DOCUMENT_MAGIC} project document"
        )));
    }

    let mut state = ProjectState::default();
    if let Some(version) = get_i32(obj, "version") {
        state.version = version;
    }
    if let Some(value) = obj.get("undo_limit") {
        if let Some(unsigned) = value.as_u64() {
            state.undo_limit = usize::try_from(unsigned).unwrap_or(usize::MAX);
        } else if value.as_i64().is_some() {
            // Signed and negative: unlimited.
            state.undo_limit = 0;
        }
    }
    if let Some(value) = obj.get("palette_ref") {
        state.palette_ref = palette_ref_from_value(value);
    }
    if let Some(title) = get_str(obj, "colour_palette_title") {
        state.colour_palette_title = title.to_string();
    }
    if let Some(value) = obj.get("sauce") {
        state.sauce = sauce_from_value(value);
    }

    let Some(current) = obj.get("current") else {
        return Err(PersistenceError::Schema(
            "project missing 'current' snapshot".to_string(),
        ));
    };
    state.current = snapshot_from_value(current)?;

    if let Some(entries) = get_array(obj, "undo") {
        for entry in entries {
            state.undo.push(undo_entry_from_value(entry)?);
        }
    }
    if let Some(entries) = get_array(obj, "redo") {
        for entry in entries {
            state.redo.push(undo_entry_from_value(entry)?);
        }
    }

    state.normalize();
    Ok(state)
}
