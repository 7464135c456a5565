//! Staging-directory archive builder.
//!
//! Entries are written to a staging tree on disk as they are produced, one
//! file per `put`, and packed into a gzipped tarball only at finalize. A
//! crashed or interrupted run leaves the staging tree behind; the next run's
//! initialization calls [`ArchiveBuilder::clear`] before starting over.
//!
//! The container is append-only. Writing the same entry path twice is a
//! bookkeeping bug upstream and fails with
//! [`ExportError::DuplicateEntry`].

use std::io::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::ExportError;

/// Builds the export package in a staging tree and packs it on demand.
#[derive(Debug)]
pub struct ArchiveBuilder {
    staging: Utf8PathBuf,
    tarball: Utf8PathBuf,
}

impl ArchiveBuilder {
    /// Creates a builder staging under `<base>/<name>.staging` and packing
    /// into `<base>/<name>.tar.gz`.
    pub fn new(base: impl AsRef<Utf8Path>, name: &str) -> Self {
        let base = base.as_ref();
        Self {
            staging: base.join(format!("{name}.staging")),
            tarball: base.join(format!("{name}.tar.gz")),
        }
    }

    /// Returns the staging directory path.
    #[must_use]
    pub fn staging_dir(&self) -> &Utf8Path {
        &self.staging
    }

    /// Returns the path of the packed tarball.
    #[must_use]
    pub fn archive_path(&self) -> &Utf8Path {
        &self.tarball
    }

    /// Writes one entry into the staging tree.
    ///
    /// # Errors
    ///
    /// Fails with [`ExportError::DuplicateEntry`] when the path was already
    /// written, and [`ExportError::ArchiveWrite`] on path escapes or I/O
    /// failures.
    pub fn put(&self, path: &str, bytes: &[u8], mode: u32) -> Result<(), ExportError> {
        let entry = Utf8PathBuf::from(path);
        if entry.is_absolute() || entry.components().any(|c| c.as_str() == "..") {
            return Err(ExportError::archive(
                entry,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "entry paths must be archive-relative",
                ),
            ));
        }
        let target = self.staging.join(&entry);
        if target.as_std_path().exists() {
            return Err(ExportError::DuplicateEntry(entry));
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|e| ExportError::archive(entry.clone(), e))?;
        }
        std::fs::write(target.as_std_path(), bytes)
            .map_err(|e| ExportError::archive(entry.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(
                target.as_std_path(),
                std::fs::Permissions::from_mode(mode),
            )
            .map_err(|e| ExportError::archive(entry, e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    /// Returns `true` if the entry path was already written.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.staging.join(path).as_std_path().exists()
    }

    /// Counts the staged entries (files, not directories).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        fn count(dir: &std::path::Path) -> usize {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() { count(&path) } else { 1 }
                })
                .sum()
        }
        count(self.staging.as_std_path())
    }

    /// Removes the staging tree and any previously packed tarball.
    ///
    /// Safe to call when neither exists.
    pub fn clear(&self) -> Result<(), ExportError> {
        match std::fs::remove_dir_all(self.staging.as_std_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ExportError::archive(self.staging.clone(), e)),
        }
        match std::fs::remove_file(self.tarball.as_std_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExportError::archive(self.tarball.clone(), e)),
        }
    }

    /// Packs the staging tree into the gzipped tarball.
    ///
    /// Entry metadata (including unix modes) is taken from the staged files.
    pub fn finish(&self) -> Result<&Utf8Path, ExportError> {
        let file = std::fs::File::create(self.tarball.as_std_path())
            .map_err(|e| ExportError::archive(self.tarball.clone(), e))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all("", self.staging.as_std_path())
            .map_err(|e| ExportError::archive(self.tarball.clone(), e))?;
        let encoder = builder
            .into_inner()
            .map_err(|e| ExportError::archive(self.tarball.clone(), e))?;
        encoder
            .finish()
            .and_then(|mut f| f.flush().map(|()| f))
            .map_err(|e| ExportError::archive(self.tarball.clone(), e))?;
        Ok(&self.tarball)
    }

    /// Unpacks the packed tarball into the given destination directory.
    ///
    /// # Errors
    ///
    /// Fails with [`ExportError::Extraction`]; the tarball itself is left
    /// intact for manual retry.
    pub fn extract_to(&self, destination: &Utf8Path) -> Result<(), ExportError> {
        std::fs::create_dir_all(destination.as_std_path())
            .map_err(|e| ExportError::extraction(destination.to_owned(), e))?;
        let file = std::fs::File::open(self.tarball.as_std_path())
            .map_err(|e| ExportError::extraction(destination.to_owned(), e))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(destination.as_std_path())
            .map_err(|e| ExportError::extraction(destination.to_owned(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn builder() -> (tempfile::TempDir, ArchiveBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let archive = ArchiveBuilder::new(&base, "content_export");
        (dir, archive)
    }

    #[test]
    fn test_put_and_contains() {
        let (_dir, archive) = builder();
        assert!(!archive.contains("data/node/node-2.json"));
        archive.put("data/node/node-2.json", b"[{}]", 0o644).unwrap();
        assert!(archive.contains("data/node/node-2.json"));
        assert_eq!(archive.entry_count(), 1);
    }

    #[test]
    fn test_duplicate_entry_is_rejected() {
        let (_dir, archive) = builder();
        archive.put("a.json", b"1", 0o644).unwrap();
        let error = archive.put("a.json", b"2", 0o644).unwrap_err();
        assert!(matches!(error, ExportError::DuplicateEntry(_)));
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let (_dir, archive) = builder();
        assert!(archive.put("../escape.txt", b"x", 0o644).is_err());
        assert!(archive.put("/abs.txt", b"x", 0o644).is_err());
    }

    #[test]
    fn test_pack_and_extract_byte_exact() {
        let (dir, archive) = builder();
        let binary: Vec<u8> = (0u16..512).map(|b| (b % 251) as u8).collect();
        archive.put("module.info.json", b"{\"name\":\"Demo\"}", 0o644).unwrap();
        archive.put("assets/public/pic.png", &binary, 0o644).unwrap();
        archive.finish().unwrap();

        let dest = Utf8PathBuf::from_path_buf(dir.path().join("out")).unwrap();
        archive.extract_to(&dest).unwrap();

        let mut text = String::new();
        std::fs::File::open(dest.join("module.info.json").as_std_path())
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "{\"name\":\"Demo\"}");
        let bytes = std::fs::read(dest.join("assets/public/pic.png").as_std_path()).unwrap();
        assert_eq!(bytes, binary);
    }

    #[test]
    fn test_clear_removes_staging_and_tarball() {
        let (_dir, archive) = builder();
        archive.put("a.json", b"1", 0o644).unwrap();
        archive.finish().unwrap();
        assert!(archive.archive_path().as_std_path().exists());

        archive.clear().unwrap();
        assert_eq!(archive.entry_count(), 0);
        assert!(!archive.archive_path().as_std_path().exists());
        // Clearing an already clean builder is fine.
        archive.clear().unwrap();
        // And the path can be written again afterwards.
        archive.put("a.json", b"2", 0o644).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt as _;
        let (_dir, archive) = builder();
        archive.put("data/a.json", b"1", 0o644).unwrap();
        let staged = archive.staging_dir().join("data/a.json");
        let mode = std::fs::metadata(staged.as_std_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
