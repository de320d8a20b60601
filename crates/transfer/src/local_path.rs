use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates a server-supplied file name before it touches the local disk.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    let path = Path::new(name);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
        }
    }

    if normal == 0 {
        return Err(TransferError::InvalidPath(format!(
            "no file component in {name}"
        )));
    }

    Ok(())
}

/// Joins a validated `name` onto `dir`.
pub fn resolve_local_path(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    validate_file_name(name)?;
    Ok(dir.join(name))
}
