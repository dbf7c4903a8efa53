// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

pub fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))
}

fn temp_sibling(path: &Path) -> Result<PathBuf> {
    // Same directory keeps the rename on one filesystem
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
    let random_suffix: u64 = rand::Rng::random(&mut rand::rng());
    Ok(parent.join(format!(".tmp-{:x}", random_suffix)))
}

/// Write `contents` to `path` with `mode`, via a temp file and rename so readers
/// never observe a half-written file.
pub fn atomic_write_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let temp_path = temp_sibling(path)?;

    write_file_mode(&temp_path, contents, mode)?;

    fs::rename(&temp_path, path).map_err(|e| {
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    atomic_write_mode(path, contents, 0o644)
}

pub fn atomic_write_secret(path: &Path, contents: &[u8]) -> Result<()> {
    atomic_write_mode(path, contents, 0o600)
}

/// Create or truncate `path` with the given permission bits and flush it to disk.
pub fn write_file_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let write_err = |e: std::io::Error| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(write_err)?;

    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    // mode() only applies on creation
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(write_err)?;

    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
