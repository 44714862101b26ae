//! Atomic file writes for rendered destinations.

use std::io;
use std::path::{Path, PathBuf};

/// Atomically write raw bytes to a file.
///
/// Writes to a hidden temporary sibling, then renames over the target path.
/// Creates parent directories if they don't exist. When `mode` is given the
/// temporary file gets those permission bits before the rename.
pub fn atomic_write(path: &Path, data: &[u8], mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    if let Some(mode) = mode {
        set_mode(&tmp, mode)?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Write `data` only when it differs from what is already on disk.
///
/// Returns `true` if the file was (re)written.
pub fn write_if_changed(path: &Path, data: &[u8], mode: Option<u32>) -> io::Result<bool> {
    match std::fs::read(path) {
        Ok(existing) if existing == data => Ok(false),
        Ok(_) => atomic_write(path, data, mode).map(|_| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => atomic_write(path, data, mode).map(|_| true),
        Err(e) => Err(e),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.confsync.tmp"))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("app.conf");

        atomic_write(&path, b"port = 80\n", None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "port = 80\n");
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.conf");
        atomic_write(&path, b"a", None).unwrap();
        atomic_write(&path, b"b", None).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["app.conf"]);
        assert_eq!(std::fs::read(&path).unwrap(), b"b");
    }

    #[test]
    fn test_write_if_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.conf");

        assert!(write_if_changed(&path, b"one", None).unwrap());
        assert!(!write_if_changed(&path, b"one", None).unwrap());
        assert!(write_if_changed(&path, b"two", None).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.conf");
        atomic_write(&path, b"x", Some(0o600)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
