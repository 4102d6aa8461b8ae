use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    photo_id::{ContentId, content_hash},
    vector_store::VectorStore,
};

/// Supported image extensions, matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];

/// Characters never accepted in a user-supplied relative path.
const FORBIDDEN_PATH_CHARS: &[char] = &['*', '?', '<', '>', '|', '\0'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Skip files whose content hash is already indexed under another path.
    pub check_duplicates: bool,
    /// Fully decode every candidate to catch truncated or corrupt files.
    pub verify_images: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            check_duplicates: true,
            verify_images: true,
        }
    }
}

/// A photo that passed every scan check and is ready to be indexed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannedPhoto {
    pub path: PathBuf,
    pub filename: String,
    pub content_hash: String,
    pub file_size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    pub content_id: ContentId,
}

/// Classification of a scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
    Valid,
    Duplicate { existing_path: String },
    Unreadable,
    AccessDenied,
    Corrupt,
}

impl ScanStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Duplicate { .. } => "duplicate",
            Self::Unreadable => "unreadable",
            Self::AccessDenied => "access denied",
            Self::Corrupt => "corrupt",
        }
    }
}

/// A file (or directory) the scanner could not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub status: ScanStatus,
    pub message: String,
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.path.display(),
            self.status.label(),
            self.message
        )
    }
}

/// A file skipped because its content is already known under another path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFile {
    pub path: PathBuf,
    pub existing_path: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    pub valid: Vec<ScannedPhoto>,
    pub duplicates: Vec<DuplicateFile>,
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    /// Number of supported files the scan looked at.
    pub fn candidates(&self) -> usize {
        self.valid.len() + self.duplicates.len() + self.errors.len()
    }
}

/// Walks a photo tree and turns it into indexable candidates.
///
/// Hashing and decode verification run in parallel; classification and
/// duplicate detection run afterwards in sorted path order, so the same tree
/// always produces the same report.
pub struct Scanner<'a> {
    store: &'a VectorStore,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a VectorStore, options: ScanOptions) -> Self {
        Self { store, options }
    }

    /// Scan `root` recursively.
    ///
    /// Fails only when `root` itself is unusable; every per-file problem is
    /// recorded in [`ScanReport::errors`].
    pub fn scan(&self, root: &Path) -> Result<ScanReport> {
        let root = checked_root(root)?;
        tracing::info!(root = %root.display(), "scanning folder");

        let mut report = ScanReport::default();
        let mut candidates = Vec::new();
        walk(&root, &mut candidates, &mut report.errors);
        candidates.sort();

        let verify = self.options.verify_images;
        let inspected: Vec<_> = candidates
            .par_iter()
            .map(|path| inspect(path, verify))
            .collect();

        // Hash -> first path claiming it within this scan.
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for result in inspected {
            let photo = match result {
                Ok(photo) => photo,
                Err(err) => {
                    tracing::warn!(
                        path = %err.path.display(),
                        status = err.status.label(),
                        "skipping file"
                    );
                    report.errors.push(err);
                    continue;
                }
            };

            if self.options.check_duplicates
                && let Some(existing_path) = self.duplicate_of(&photo, &seen)?
            {
                tracing::debug!(
                    path = %photo.path.display(),
                    existing = %existing_path,
                    "skipping duplicate"
                );
                report.duplicates.push(DuplicateFile {
                    path: photo.path,
                    existing_path,
                });
                continue;
            }

            seen.entry(photo.content_hash.clone())
                .or_insert_with(|| photo.path.clone());
            report.valid.push(photo);
        }

        tracing::info!(
            root = %root.display(),
            valid = report.valid.len(),
            duplicates = report.duplicates.len(),
            errors = report.errors.len(),
            "scan finished"
        );
        Ok(report)
    }

    /// The path already holding `photo`'s content, if it is not `photo`
    /// itself. Re-scanning an indexed file is not a duplicate.
    fn duplicate_of(
        &self,
        photo: &ScannedPhoto,
        seen: &HashMap<String, PathBuf>,
    ) -> Result<Option<String>> {
        if let Some(earlier) = seen.get(&photo.content_hash) {
            return Ok(Some(earlier.to_string_lossy().into_owned()));
        }

        let current = photo.path.to_string_lossy();
        let indexed = self.store.find_by_content_hash(&photo.content_hash)?;
        if indexed.iter().any(|(_, path)| *path == current) {
            return Ok(None);
        }
        Ok(indexed.into_iter().next().map(|(_, path)| path))
    }
}

/// Count supported files under `root` without opening them.
pub fn quick_count(root: &Path) -> Result<usize> {
    let root = checked_root(root)?;
    let mut candidates = Vec::new();
    let mut errors = Vec::new();
    walk(&root, &mut candidates, &mut errors);
    Ok(candidates.len())
}

/// Whether `path` carries one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Resolve a user-supplied relative path inside `base`.
///
/// Rejects absolute paths, parent references, wildcard characters and
/// anything that resolves (through symlinks) outside `base`.
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim();
    let invalid = |reason: &str| {
        Error::InvalidPath(format!("{relative}: {reason}"))
    };

    if relative.starts_with('~') || Path::new(relative).is_absolute() {
        return Err(invalid("only relative paths are allowed"));
    }
    if Path::new(relative)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid("parent directory references are not allowed"));
    }
    if relative.contains(FORBIDDEN_PATH_CHARS) {
        return Err(invalid("path contains forbidden characters"));
    }

    let full = base.join(relative);
    if !full.exists() {
        return Err(Error::NotFound {
            kind: "folder",
            name: relative.to_string(),
        });
    }

    let base = base.canonicalize()?;
    let resolved = full.canonicalize()?;
    if !resolved.starts_with(&base) {
        return Err(invalid("path escapes the photo directory"));
    }
    if !resolved.is_dir() {
        return Err(invalid("not a directory"));
    }
    Ok(resolved)
}

fn checked_root(root: &Path) -> Result<PathBuf> {
    if !root.exists() {
        return Err(Error::InvalidPath(format!(
            "folder does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(Error::InvalidPath(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    Ok(root.canonicalize()?)
}

fn walk(root: &Path, candidates: &mut Vec<PathBuf>, errors: &mut Vec<ScanError>) {
    let mut visited = HashSet::new();
    visited.insert(root.to_path_buf());
    walk_dir(root, candidates, errors, &mut visited);
}

fn walk_dir(
    current: &Path,
    candidates: &mut Vec<PathBuf>,
    errors: &mut Vec<ScanError>,
    visited: &mut HashSet<PathBuf>,
) {
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(io_error(current, &e));
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(io_error(current, &e));
                continue;
            }
        };

        // Skip hidden files and directories.
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if let Ok(canonical) = path.canonicalize()
                && visited.insert(canonical)
            {
                walk_dir(&path, candidates, errors, visited);
            }
        } else if file_type.is_symlink() {
            // Broken links are silently ignored.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_dir() {
                if visited.insert(resolved) {
                    walk_dir(&path, candidates, errors, visited);
                }
            } else if resolved.is_file() && is_supported(&path) {
                candidates.push(path);
            }
        } else if file_type.is_file() && is_supported(&path) {
            candidates.push(path);
        }
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ScanError {
    let status = if e.kind() == ErrorKind::PermissionDenied {
        ScanStatus::AccessDenied
    } else {
        ScanStatus::Unreadable
    };
    ScanError {
        path: path.to_path_buf(),
        status,
        message: e.to_string(),
    }
}

/// Run the per-file checks: access, optional decode, fingerprint.
fn inspect(path: &Path, verify: bool) -> std::result::Result<ScannedPhoto, ScanError> {
    if let Err(e) = File::open(path) {
        return Err(io_error(path, &e));
    }

    if verify && let Err(e) = image::open(path) {
        return Err(ScanError {
            path: path.to_path_buf(),
            status: ScanStatus::Corrupt,
            message: e.to_string(),
        });
    }

    let hash = content_hash(path).map_err(|e| ScanError {
        path: path.to_path_buf(),
        status: ScanStatus::Unreadable,
        message: e.to_string(),
    })?;

    let metadata = std::fs::metadata(path).map_err(|e| io_error(path, &e))?;
    let last_modified = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(ScannedPhoto {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        content_hash: hash,
        file_size: metadata.len(),
        last_modified,
        content_id: ContentId::from_path(path),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{BaseRecord, PhotoMetadata},
        vector_store::Collection,
    };

    fn test_store() -> (tempfile::TempDir, VectorStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            VectorStore::open(&tmp.path().join("vectors.redb"), true).unwrap();
        (tmp, store)
    }

    fn write_png(path: &Path, shade: u8) {
        image::RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 0]))
            .save(path)
            .unwrap();
    }

    fn names(photos: &[ScannedPhoto]) -> Vec<String> {
        photos.iter().map(|p| p.filename.clone()).collect()
    }

    #[test]
    fn finds_supported_images_recursively() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        let sub = photos.path().join("2023");
        std::fs::create_dir(&sub).unwrap();
        write_png(&photos.path().join("a.png"), 10);
        write_png(&sub.join("b.PNG"), 20);
        std::fs::write(photos.path().join("notes.txt"), "text").unwrap();

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();

        assert_eq!(names(&report.valid), vec!["b.PNG", "a.png"]);
        assert!(report.errors.is_empty());
        assert!(report.valid.iter().all(|p| p.path.is_absolute()));
    }

    #[test]
    fn skips_hidden_entries() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        let hidden = photos.path().join(".thumbnails");
        std::fs::create_dir(&hidden).unwrap();
        write_png(&hidden.join("t.png"), 1);
        write_png(&photos.path().join(".secret.png"), 2);
        write_png(&photos.path().join("shown.png"), 3);

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert_eq!(names(&report.valid), vec!["shown.png"]);
    }

    #[test]
    fn corrupt_files_are_reported_when_verifying() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        std::fs::write(photos.path().join("broken.png"), b"not an image")
            .unwrap();
        write_png(&photos.path().join("fine.png"), 5);

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert_eq!(names(&report.valid), vec!["fine.png"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].status, ScanStatus::Corrupt);
        assert!(report.errors[0].to_string().contains("broken.png"));

        let lenient = ScanOptions {
            verify_images: false,
            ..Default::default()
        };
        let report = Scanner::new(&store, lenient).scan(photos.path()).unwrap();
        assert_eq!(report.valid.len(), 2);
    }

    #[test]
    fn duplicate_content_within_scan() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        write_png(&photos.path().join("a.png"), 7);
        std::fs::copy(photos.path().join("a.png"), photos.path().join("b.png"))
            .unwrap();

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert_eq!(names(&report.valid), vec!["a.png"]);
        assert_eq!(report.duplicates.len(), 1);
        assert!(report.duplicates[0].existing_path.ends_with("a.png"));

        let keep_all = ScanOptions {
            check_duplicates: false,
            ..Default::default()
        };
        let report = Scanner::new(&store, keep_all).scan(photos.path()).unwrap();
        assert_eq!(report.valid.len(), 2);
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn duplicate_against_store_but_not_self() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        let original = photos.path().join("a.png");
        write_png(&original, 9);
        let hash = content_hash(&original).unwrap();

        // Same content indexed under a different path.
        let elsewhere = BaseRecord {
            path: "/elsewhere/a.png".to_string(),
            filename: "a.png".to_string(),
            content_hash: hash.clone(),
            file_size: 1,
            last_modified: 1,
            exists: true,
            folder_id: None,
        };
        store
            .upsert(
                &ContentId::from_path("/elsewhere/a.png"),
                &[1.0],
                &PhotoMetadata::Base(elsewhere),
                Collection::Visual,
            )
            .unwrap();

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert!(report.valid.is_empty());
        assert_eq!(report.duplicates[0].existing_path, "/elsewhere/a.png");

        // Re-scanning the indexed path itself is not a duplicate.
        let (_db2, store2) = test_store();
        let canonical = original.canonicalize().unwrap();
        let own = BaseRecord {
            path: canonical.to_string_lossy().into_owned(),
            filename: "a.png".to_string(),
            content_hash: hash,
            file_size: 1,
            last_modified: 1,
            exists: true,
            folder_id: None,
        };
        store2
            .upsert(
                &ContentId::from_path(&canonical),
                &[1.0],
                &PhotoMetadata::Base(own),
                Collection::Visual,
            )
            .unwrap();
        let report = Scanner::new(&store2, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert_eq!(report.valid.len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let (_db, store) = test_store();
        let tmp = tempfile::tempdir().unwrap();
        let result = Scanner::new(&store, ScanOptions::default())
            .scan(&tmp.path().join("missing"));
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn scan_is_deterministic() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        for (i, name) in ["z.png", "a.png", "m.png"].iter().enumerate() {
            write_png(&photos.path().join(name), i as u8 * 40);
        }
        let scanner = Scanner::new(&store, ScanOptions::default());
        let first = names(&scanner.scan(photos.path()).unwrap().valid);
        let second = names(&scanner.scan(photos.path()).unwrap().valid);
        assert_eq!(first, vec!["a.png", "m.png", "z.png"]);
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate() {
        let (_db, store) = test_store();
        let photos = tempfile::tempdir().unwrap();
        let sub = photos.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        write_png(&sub.join("x.png"), 1);
        std::os::unix::fs::symlink(photos.path(), sub.join("loop")).unwrap();

        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        assert_eq!(names(&report.valid), vec!["x.png"]);
    }

    #[test]
    fn quick_count_counts_extensions_only() {
        let photos = tempfile::tempdir().unwrap();
        std::fs::write(photos.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(photos.path().join("b.TIFF"), b"x").unwrap();
        std::fs::write(photos.path().join("c.heic"), b"x").unwrap();
        assert_eq!(quick_count(photos.path()).unwrap(), 2);
    }

    #[test]
    fn resolve_within_accepts_subfolder() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("2023/summer")).unwrap();
        let resolved = resolve_within(base.path(), "2023/summer").unwrap();
        assert!(resolved.ends_with("2023/summer"));
    }

    #[test]
    fn resolve_within_rejects_traversal() {
        let base = tempfile::tempdir().unwrap();
        for bad in ["../etc", "/etc", "~/photos", "a/../../b", "star*"] {
            assert!(
                matches!(resolve_within(base.path(), bad), Err(Error::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn resolve_within_reports_missing() {
        let base = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_within(base.path(), "nope"),
            Err(Error::NotFound { .. })
        ));
        std::fs::write(base.path().join("file.jpg"), b"x").unwrap();
        assert!(matches!(
            resolve_within(base.path(), "file.jpg"),
            Err(Error::InvalidPath(_))
        ));
    }
}
