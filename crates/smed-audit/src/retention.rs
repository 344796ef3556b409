// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

/// Age/size-based cleanup of audit log files.
///
/// Files older than `max_age_days` go first; if the directory still exceeds
/// `max_size_mb`, the oldest remaining files follow until it fits. A limit
/// of 0 disables that dimension. With `archive` set, files are gzipped in
/// place instead of deleted.
pub struct RetentionPolicy {
    audit_dir: PathBuf,
    max_age_days: u64,
    max_size_mb: u64,
    archive: bool,
}

impl RetentionPolicy {
    pub fn new(audit_dir: PathBuf, max_age_days: u64, max_size_mb: u64, archive: bool) -> Self {
        Self {
            audit_dir,
            max_age_days,
            max_size_mb,
            archive,
        }
    }

    /// Apply the policy. Returns the number of files removed or archived.
    pub fn enforce_retention(&self) -> usize {
        let Ok(read_dir) = std::fs::read_dir(&self.audit_dir) else {
            return 0;
        };

        // Snapshot metadata once so the two passes agree on what they saw.
        let mut files: Vec<(PathBuf, SystemTime, u64)> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("audit-") && n.ends_with(".jsonl"))
            })
            .filter_map(|p| {
                let meta = std::fs::metadata(&p).ok()?;
                let mtime = meta.modified().ok()?;
                Some((p, mtime, meta.len()))
            })
            .collect();
        files.sort_by_key(|(_, mtime, _)| *mtime);

        let mut removed = 0usize;

        if self.max_age_days > 0 {
            let cutoff = SystemTime::now() - Duration::from_secs(self.max_age_days * 86_400);
            files.retain(|(path, mtime, _)| {
                if *mtime < cutoff {
                    self.remove_or_archive(path);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        if self.max_size_mb > 0 {
            let max_bytes = self.max_size_mb * 1024 * 1024;
            let mut total: u64 = files.iter().map(|(_, _, size)| size).sum();
            for (path, _, size) in &files {
                if total <= max_bytes {
                    break;
                }
                self.remove_or_archive(path);
                total -= size;
                removed += 1;
            }
        }

        removed
    }

    fn remove_or_archive(&self, path: &Path) {
        let result = if self.archive {
            gzip_file(path)
        } else {
            std::fs::remove_file(path).map_err(anyhow::Error::from)
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "retention cleanup failed");
        }
    }
}

fn gzip_file(path: &Path) -> anyhow::Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let mut input = std::fs::File::open(path)?;
    let output = std::fs::File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;
    encoder.write_all(&buf)?;
    encoder.finish()?;
    std::fs::remove_file(path)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![b'x'; bytes]).unwrap();
        path
    }

    fn age(path: &Path, days: u64) {
        // Backdate the mtime by rewriting via filetime-free approach:
        // set the file's modified time using the OS utility.
        let secs = days * 86_400;
        let status = std::process::Command::new("touch")
            .arg("-d")
            .arg(format!("@{}", now_epoch() - secs))
            .arg(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    fn now_epoch() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn old_files_are_deleted_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "audit-old0000.jsonl", 10);
        let fresh = touch(dir.path(), "audit-new0000.jsonl", 10);
        age(&old, 100);

        let policy = RetentionPolicy::new(dir.path().to_path_buf(), 30, 0, false);
        assert_eq!(policy.enforce_retention(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn size_cap_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "audit-a.jsonl", 600 * 1024);
        let b = touch(dir.path(), "audit-b.jsonl", 600 * 1024);
        age(&a, 2);
        age(&b, 1);

        // 1 MB cap with ~1.2 MB present: the older file goes.
        let policy = RetentionPolicy::new(dir.path().to_path_buf(), 0, 1, false);
        assert_eq!(policy.enforce_retention(), 1);
        assert!(!a.exists());
        assert!(b.exists());
    }

    #[test]
    fn archive_gzips_instead_of_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "audit-arch000.jsonl", 64);
        age(&old, 100);

        let policy = RetentionPolicy::new(dir.path().to_path_buf(), 30, 0, true);
        assert_eq!(policy.enforce_retention(), 1);
        assert!(!old.exists());
        assert!(dir.path().join("audit-arch000.jsonl.gz").exists());
    }

    #[test]
    fn non_audit_files_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let other = touch(dir.path(), "notes.txt", 10);
        age(&other, 400);
        let policy = RetentionPolicy::new(dir.path().to_path_buf(), 30, 0, false);
        assert_eq!(policy.enforce_retention(), 0);
        assert!(other.exists());
    }

    #[test]
    fn missing_dir_is_noop() {
        let policy =
            RetentionPolicy::new(PathBuf::from("/tmp/smed_no_audit_dir_here"), 30, 10, false);
        assert_eq!(policy.enforce_retention(), 0);
    }
}
