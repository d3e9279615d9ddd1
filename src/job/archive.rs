//! Archive integrity checks.

use std::fs::File;
use std::path::Path;

use zip::ZipArchive;

/// Yes/no integrity check for an archive on disk.
pub trait ArchiveValidator: Send + Sync {
    fn is_valid(&self, path: &Path) -> bool;
}

/// Accepts a file if it opens as a zip archive and every entry header reads.
pub struct ZipArchiveValidator;

impl ZipArchiveValidator {
    fn check(path: &Path) -> zip::result::ZipResult<usize> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        for i in 0..archive.len() {
            archive.by_index_raw(i)?;
        }
        Ok(archive.len())
    }
}

impl ArchiveValidator for ZipArchiveValidator {
    fn is_valid(&self, path: &Path) -> bool {
        match Self::check(path) {
            Ok(entries) => {
                tracing::debug!("{} is a zip archive with {} entries", path.display(), entries);
                true
            }
            Err(e) => {
                tracing::debug!("{} is not a usable zip archive: {}", path.display(), e);
                false
            }
        }
    }
}
