//! Filesystem helpers shared by the download worker and the quota check:
//! filename sanitisation and download-directory size accounting.

use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 100;
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Replaces illegal filesystem characters with `_`; names over 100 chars
/// collapse to the MD5 hex digest of the original name, keeping the
/// extension when one is present.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if cleaned.len() <= MAX_NAME_LEN {
        return cleaned;
    }

    let ext = Path::new(&cleaned)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"));

    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());

    match ext {
        Some(ext) => format!("{digest}{ext}"),
        None => digest,
    }
}

/// Filesystem-safe encoding of an album id (or single-message id) for use
/// as the per-group temp directory name.
pub fn group_dir_name(group_key: i64) -> String {
    format!("grp_{}", group_key.unsigned_abs())
}

/// Recursively sums file sizes under `root`. Used by the download-directory
/// quota check; errors reading individual entries are skipped rather than
/// propagated, since a best-effort total is all the quota check needs.
pub async fn directory_size(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => stack.push(path),
                Ok(ft) if ft.is_file() => {
                    if let Ok(meta) = entry.metadata().await {
                        total += meta.len();
                    }
                    let _ = ft;
                }
                _ => {}
            }
        }
    }
    total
}

/// Root directory names that cleanup must never remove, even if they are
/// (transiently) empty.
const PROTECTED_ROOTS: &[&str] = &["tmp", "monitor", "forward"];

/// Removes `dir` and then walks upward removing now-empty parents, stopping
/// at the first non-empty parent or at a protected root name.
pub async fn cleanup_empty_parents(dir: &Path) {
    if tokio::fs::remove_dir_all(dir).await.is_err() {
        return;
    }
    let mut current = dir.parent().map(PathBuf::from);
    while let Some(parent) = current {
        let name = parent
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if PROTECTED_ROOTS.contains(&name) {
            break;
        }
        match tokio::fs::remove_dir(&parent).await {
            Ok(()) => current = parent.parent().map(PathBuf::from),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_illegal_characters() {
        assert_eq!(sanitize_filename("foo/bar:baz?.mp4"), "foo_bar_baz_.mp4");
    }

    #[test]
    fn collapses_long_names_to_md5() {
        let long_name = format!("{}.mp4", "a".repeat(300));
        let out = sanitize_filename(&long_name);
        assert!(out.ends_with(".mp4"));
        assert_eq!(out.len(), 32 + 4);
    }
}
