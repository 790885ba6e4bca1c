//! Durable file I/O: bounded whole-file reads and atomic replace writes.

use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::error::IoOp;
use crate::error::PersistenceError;
use crate::error::Result;

/// Reads an entire file, sizing the buffer from the file's metadata.
/// A zero-length file is valid and yields an empty buffer.
pub fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| PersistenceError::io(IoOp::Open, path, e))?;
    let len = file
        .metadata()
        .map_err(|e| PersistenceError::io(IoOp::Read, path, e))?
        .len();
    let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.read_to_end(&mut bytes)
        .map_err(|e| PersistenceError::io(IoOp::Read, path, e))?;
    Ok(bytes)
}

/// Temp-file name for an atomic write: the suffix is appended, not
/// substituted, so `a.phos` and `a.idx` cannot collide on one temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()
}

/// Writes `bytes` to `path` atomically: the data goes to `<path>.tmp`
/// first and is renamed over the destination only once fully written.
/// On any failure the destination is left exactly as it was and the temp
/// file is removed.
pub fn write_all_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| PersistenceError::io(IoOp::CreateDir, parent, e))?;
    }

    let tmp = temp_path(path);
    if let Err(e) = write_bytes(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::io(IoOp::Write, &tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::io(IoOp::Rename, path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canvas.phos");
        write_all_atomic(&path, b"payload").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"payload");
    }

    #[test]
    fn zero_length_file_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.phos");
        write_all_atomic(&path, b"").unwrap();
        assert_eq!(read_all(&path).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn missing_file_reports_open_failure() {
        let dir = TempDir::new().unwrap();
        let err = read_all(&dir.path().join("absent.phos")).unwrap_err();
        match err {
            PersistenceError::Io { op, .. } => assert_eq!(op, IoOp::Open),
            other => panic!("expected an I/O error, got {other}"),
        }
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/canvas.phos");
        write_all_atomic(&path, b"x").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"x");
    }

    #[test]
    fn successful_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canvas.phos");
        write_all_atomic(&path, b"data").unwrap();
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn replace_overwrites_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canvas.phos");
        write_all_atomic(&path, b"old").unwrap();
        write_all_atomic(&path, b"new").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"new");
    }

    #[test]
    fn interrupted_write_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canvas.phos");
        write_all_atomic(&path, b"original").unwrap();

        // Occupy the temp path with a directory so the temp write cannot
        // even start, standing in for an interrupted write.
        fs::create_dir(temp_path(&path)).unwrap();
        let err = write_all_atomic(&path, b"replacement").unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }), "{err}");
        assert_eq!(read_all(&path).unwrap(), b"original");
    }

    #[test]
    fn failed_write_to_new_path_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh.phos");
        fs::create_dir(temp_path(&path)).unwrap();
        assert!(write_all_atomic(&path, b"data").is_err());
        assert!(!path.exists());
    }
}
