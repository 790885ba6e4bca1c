//! The session canvas cache: one container file per open canvas.
//!
//! Canvases are addressed by integer id under a caller-supplied cache
//! root; the layout is `session_canvases/canvas_<id>.phos`. Save and load
//! are ordinary fallible operations, but delete and prune are
//! opportunistic cleanup: their I/O errors are swallowed (and logged)
//! because a leftover cache file is harmless.
//!
//! The cache performs no locking. One process owns a cache root; callers
//! serialize access per canvas themselves.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use phosphor_project::ProjectState;
use tracing::debug;
use tracing::warn;

use crate::compression::CompressionLevel;
use crate::compression::Compressor;
use crate::container;
use crate::error::Result;

/// Subdirectory of the cache root that holds per-canvas containers.
pub const CACHE_SUBDIR: &str = "session_canvases";

/// Extension of cached canvas containers.
pub const CACHE_EXTENSION: &str = "phos";

/// File-backed cache of open-canvas state.
#[derive(Debug, Clone)]
pub struct SessionCanvasCache {
    root: PathBuf,
    compressor: Compressor,
}

impl SessionCanvasCache {
    /// Cache over an explicit root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compressor: Compressor::default(),
        }
    }

    /// Replaces the compression level used for saves.
    #[must_use]
    pub const fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compressor = Compressor::new(level);
        self
    }

    /// Default process-wide cache root (`<user cache dir>/phosphor`), when
    /// the platform reports one.
    #[must_use]
    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("phosphor"))
    }

    /// Cache-relative path for a canvas id.
    #[must_use]
    pub fn relative_path(canvas_id: u32) -> String {
        format!("{CACHE_SUBDIR}/canvas_{canvas_id}.{CACHE_EXTENSION}")
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_SUBDIR)
    }

    fn resolve(&self, rel_or_abs: &str) -> PathBuf {
        let path = Path::new(rel_or_abs);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Saves a canvas's state, returning the cache-relative path it landed
    /// at.
    pub fn save(&self, canvas_id: u32, state: &ProjectState) -> Result<String> {
        let rel = Self::relative_path(canvas_id);
        let abs = self.root.join(&rel);
        container::save_to_path(&abs, state, &self.compressor)?;
        debug!(canvas_id, path = %rel, "cached canvas state");
        Ok(rel)
    }

    /// Loads a canvas from a cache-relative or absolute path.
    pub fn load(&self, rel_or_abs: &str) -> Result<ProjectState> {
        container::load_from_path(&self.resolve(rel_or_abs), &self.compressor)
    }

    /// Best-effort delete. Success when the file is already absent;
    /// other failures are logged and swallowed.
    pub fn delete(&self, rel_or_abs: &str) {
        let path = self.resolve(rel_or_abs);
        if let Err(error) = fs::remove_file(&path)
            && error.kind() != ErrorKind::NotFound
        {
            warn!("failed to delete cached canvas {}: {error}", path.display());
        }
    }

    /// Deletes every cached container whose cache-relative name is not in
    /// `keep`. Opportunistic garbage collection: every I/O error here is
    /// swallowed.
    pub fn prune(&self, keep: &HashSet<String>) {
        let dir = self.cache_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let rel = format!("{CACHE_SUBDIR}/{name}");
            if keep.contains(&rel) {
                continue;
            }
            if let Err(error) = fs::remove_file(&path) {
                debug!("prune failed to remove {}: {error}", path.display());
            }
        }
    }
}
