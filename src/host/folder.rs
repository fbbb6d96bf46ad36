//! File-holding location backed by a local directory.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::model::StoredFile;

use super::FileLocation;

/// Length of the hex id derived from a stored file's relative path.
const ID_LEN: usize = 16;

/// Stores files flat in one directory.
///
/// Names are sanitized for the filesystem and never overwrite: a clash gets
/// a `_1`, `_2`, … suffix. Image files serve as their own thumbnails.
#[derive(Debug, Clone)]
pub struct DirectoryLocation {
    dir: PathBuf,
}

impl DirectoryLocation {
    /// Use `dir` as the location, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| ExtractError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, file: &StoredFile) -> PathBuf {
        self.dir.join(&file.name)
    }
}

impl FileLocation for DirectoryLocation {
    fn create_file(&self, name: &str, content_type: &str, data: &[u8]) -> Result<StoredFile> {
        let filename = sanitize_filename(name, 200);
        let target = self.dir.join(&filename);
        let path = write_new_file(&target, data).map_err(|e| ExtractError::io(&target, e))?;

        let stored_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);
        debug!(path = %path.display(), bytes = data.len(), "Created file");

        Ok(StoredFile {
            id: file_id(&stored_name),
            url: file_url(&path),
            name: stored_name,
            content_type: content_type.to_string(),
        })
    }

    fn read_file(&self, file: &StoredFile) -> Result<Vec<u8>> {
        let path = self.path_of(file);
        std::fs::read(&path).map_err(|e| ExtractError::io(&path, e))
    }

    fn thumbnail(&self, file: &StoredFile) -> Result<Option<Vec<u8>>> {
        if !file.content_type.starts_with("image/") {
            return Ok(None);
        }
        self.read_file(file).map(Some)
    }
}

/// Replace characters that are unsafe in filenames with `_` and truncate.
///
/// Spaces are kept so that `"{timestamp} {name}"` survives.
pub fn sanitize_filename(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '@' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    let trimmed = sanitized.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write `data` to `path`, or to the first free `{stem}_{i}.{ext}` next to
/// it. A name is claimed with `create_new`, so an existing file is never
/// truncated.
fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<PathBuf> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut candidate = path.to_path_buf();
    let mut i = 0;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(data)?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                i += 1;
                candidate = if ext.is_empty() {
                    parent.join(format!("{stem}_{i}"))
                } else {
                    parent.join(format!("{stem}_{i}.{ext}"))
                };
            }
            Err(e) => return Err(e),
        }
    }
}

fn file_id(stored_name: &str) -> String {
    let digest = Sha256::digest(stored_name.as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..ID_LEN]
        .to_string()
}

fn file_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let display = absolute.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("20241228 report.pdf", 50), "20241228 report.pdf");
        assert_eq!(sanitize_filename("a/b\\c:d*e", 20), "a_b_c_d_e");
        assert_eq!(sanitize_filename("", 20), "unknown");
        assert_eq!(sanitize_filename("..", 20), "unknown");
    }

    #[test]
    fn test_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let location = DirectoryLocation::open(dir.path()).unwrap();
        let a = location.create_file("scan.pdf", "application/pdf", b"one").unwrap();
        let b = location.create_file("scan.pdf", "application/pdf", b"two").unwrap();

        assert_eq!(a.name, "scan.pdf");
        assert_eq!(b.name, "scan_1.pdf");
        assert_ne!(a.id, b.id);
        assert_eq!(location.read_file(&a).unwrap(), b"one");
        assert_eq!(location.read_file(&b).unwrap(), b"two");
        assert!(a.url.starts_with("file://"));
    }

    #[test]
    fn test_existing_files_are_left_intact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"first").unwrap();
        std::fs::write(dir.path().join("scan_1.pdf"), b"second").unwrap();
        std::fs::write(dir.path().join("notes"), b"plain").unwrap();
        let location = DirectoryLocation::open(dir.path()).unwrap();

        let file = location.create_file("scan.pdf", "application/pdf", b"third").unwrap();
        assert_eq!(file.name, "scan_2.pdf");
        let bare = location.create_file("notes", "text/plain", b"more").unwrap();
        assert_eq!(bare.name, "notes_1");

        assert_eq!(std::fs::read(dir.path().join("scan.pdf")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("scan_1.pdf")).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.path().join("notes")).unwrap(), b"plain");
        assert_eq!(location.read_file(&file).unwrap(), b"third");
    }

    #[test]
    fn test_thumbnail_only_for_images() {
        let dir = tempfile::tempdir().unwrap();
        let location = DirectoryLocation::open(dir.path()).unwrap();
        let doc = location.create_file("a.pdf", "application/pdf", b"%PDF").unwrap();
        let img = location.create_file("a.png", "image/png", b"\x89PNG").unwrap();
        assert_eq!(location.thumbnail(&doc).unwrap(), None);
        assert_eq!(location.thumbnail(&img).unwrap(), Some(b"\x89PNG".to_vec()));
    }
}
