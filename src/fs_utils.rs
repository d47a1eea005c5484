use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    set_dir_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = fs::Permissions::from_mode(0o700);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn set_file_permissions(path: &Path) -> Result<()> {
    set_file_permissions_impl(path)
}

#[cfg(unix)]
fn set_file_permissions_impl(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions_impl(_path: &Path) -> Result<()> {
    Ok(())
}

/// Sibling path used while a file is being written: `clip.mp4` -> `clip.mp4.tmp`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Serializes `value` as pretty JSON into `path` via a temp file and rename,
/// restricting the result to the current user.
pub fn write_json_private<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .context("path should have a parent directory")?;
    ensure_dir(dir)?;

    let json = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    let tmp_path = partial_path(path);
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to move file to {}", path.display()))?;
        } else {
            return Err(err).with_context(|| format!("failed to move file to {}", path.display()));
        }
    }
    set_file_permissions(path)?;
    Ok(())
}
