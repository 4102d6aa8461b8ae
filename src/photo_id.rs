use std::{fs::File, io::Read, path::Path};

use serde::Serialize;

use crate::error::Result;

/// Read buffer size used when fingerprinting file contents.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// A stable photo identifier derived from the absolute path of the file.
///
/// The value is a BLAKE3 digest of the normalized path string, so it is the
/// same across process restarts and platforms. Re-indexing a path always
/// lands on the same key, which is what makes upserts idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentId {
    /// The numeric ID used as the key in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl ContentId {
    /// Generate a stable content ID from an absolute path.
    ///
    /// # Examples
    ///
    /// ```
    /// use photosearch::ContentId;
    ///
    /// let a = ContentId::from_path("/photos/2023/beach.jpg");
    /// let b = ContentId::from_path("/photos/2023/beach.jpg");
    /// assert_eq!(a, b);
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let normalized = normalize_path(path.as_ref());
        let digest = blake3::hash(normalized.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        let numeric = u64::from_le_bytes(head);
        Self::from_numeric(numeric)
    }

    /// Rebuild an ID from its numeric key (as read back from storage).
    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    fn short_hex(value: u64, len: usize) -> String {
        let full = format!("{value:016x}");
        full[..len].to_string()
    }

    /// Extend the short ID to avoid collisions.
    /// Returns a new ContentId with a longer short hex string.
    pub fn extend_short(&self, len: usize) -> Self {
        let len = len.clamp(6, 16);
        Self {
            numeric: self.numeric,
            short: Self::short_hex(self.numeric, len),
        }
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

/// Path string fed into the identity digest. Separators are unified so
/// the same logical path hashes identically on every platform.
fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Compute the content fingerprint of a file, reading it in bounded chunks.
///
/// The result is a lowercase hex BLAKE3 digest and depends only on the
/// bytes, never on the path.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Fingerprint an in-memory buffer. Matches [`content_hash`] for the same
/// bytes.
pub fn content_hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
