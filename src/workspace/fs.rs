//! Filesystem primitives for staging: clearing a directory, flat archive
//! extraction and recursive copy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;

use zip::ZipArchive;

use crate::workspace::StagingError;

/// Remove every direct entry of `dir`, recursively. A missing `dir` is not an
/// error. Returns the number of entries removed.
pub fn clear_contents(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Last path component of an archive entry name, accepting either separator.
fn base_name(entry_name: &str) -> Option<&str> {
    let base = entry_name.rsplit(['/', '\\']).next()?;
    match base {
        "" | "." | ".." => None,
        base => Some(base),
    }
}

/// Extract every file entry of `archive` directly into `dest`, keyed by its
/// base name. Directory structure is dropped; on a name collision the later
/// entry (or a later archive) wins.
pub fn extract_flat(archive: &Path, dest: &Path) -> Result<usize, StagingError> {
    let extract_err = |source: zip::result::ZipError| StagingError::Extract {
        archive: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(|e| extract_err(e.into()))?;
    let mut zip = ZipArchive::new(file).map_err(extract_err)?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(extract_err)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = base_name(entry.name()).map(str::to_owned) else {
            tracing::debug!("Skipping unnamed entry {}", entry.name());
            continue;
        };

        let target = dest.join(&name);
        tracing::debug!("Extracting {} -> {}", entry.name(), target.display());

        let write_err = |source: io::Error| StagingError::Write {
            path: target.clone(),
            source,
        };

        remove_existing(&target).map_err(write_err)?;
        // create_new never follows a link planted at the target.
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(write_err)?;
        io::copy(&mut entry, &mut out).map_err(write_err)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            out.set_permissions(fs::Permissions::from_mode(mode & 0o777))
                .map_err(write_err)?;
        }

        extracted += 1;
    }
    Ok(extracted)
}

/// Remove whatever sits at `path` without following it: a symlink is
/// unlinked, a real directory removed recursively.
fn remove_existing(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Recursively copy the contents of `src` into `dest`, keeping structure.
/// Returns the number of non-directory entries copied.
pub fn copy_dir_contents(src: &Path, dest: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_dir_contents(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    remove_existing(dest)?;
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest).map(|_| ())
}
