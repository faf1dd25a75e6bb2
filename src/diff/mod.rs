//! File-level diff between two archive readers.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::archive::{ArchiveError, ArchiveReader};

/// How many bytes to scan for NUL when deciding text vs binary.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Unified-diff context lines on each side of a hunk.
const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    /// Reserved; rename detection is not inferred here.
    Renamed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub is_binary: bool,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffTotals {
    pub files_added: u64,
    pub files_deleted: u64,
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub files: Vec<FileDiff>,
    pub totals: DiffTotals,
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

fn line_count(text: &str) -> u64 {
    text.lines().count() as u64
}

fn unified(old_text: &str, new_text: &str, old_name: &str, new_name: &str) -> (String, u64, u64) {
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut added = 0u64;
    let mut deleted = 0u64;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    let mut out = diff.unified_diff();
    out.context_radius(CONTEXT_LINES).header(old_name, new_name);
    (out.to_string(), added, deleted)
}

fn sorted_file_paths(reader: &dyn ArchiveReader) -> Vec<String> {
    let mut paths: Vec<String> = reader
        .list()
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.path)
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Compare every non-directory path across two archives.
///
/// Identical bytes are skipped entirely. A NUL byte in the first 8 KiB of
/// either side marks the pair binary, with no textual diff. Everything
/// else gets a unified diff with three lines of context.
pub fn compare(old: &dyn ArchiveReader, new: &dyn ArchiveReader) -> Result<Comparison, ArchiveError> {
    let old_paths = sorted_file_paths(old);
    let new_paths = sorted_file_paths(new);

    let mut union: Vec<&String> = old_paths.iter().chain(new_paths.iter()).collect();
    union.sort();
    union.dedup();

    let mut files = Vec::new();
    let mut totals = DiffTotals::default();

    for path in union {
        let in_old = old_paths.binary_search(path).is_ok();
        let in_new = new_paths.binary_search(path).is_ok();

        match (in_old, in_new) {
            (true, true) => {
                let old_bytes = old.extract(path)?;
                let new_bytes = new.extract(path)?;
                if old_bytes == new_bytes {
                    continue;
                }
                if looks_binary(&old_bytes) || looks_binary(&new_bytes) {
                    files.push(FileDiff {
                        path: path.clone(),
                        kind: ChangeKind::Modified,
                        old_path: None,
                        diff: None,
                        is_binary: true,
                        lines_added: 0,
                        lines_deleted: 0,
                    });
                    totals.files_changed += 1;
                    continue;
                }
                let old_text = String::from_utf8_lossy(&old_bytes);
                let new_text = String::from_utf8_lossy(&new_bytes);
                let (diff, added, deleted) = unified(
                    &old_text,
                    &new_text,
                    &format!("a/{path}"),
                    &format!("b/{path}"),
                );
                totals.files_changed += 1;
                totals.lines_added += added;
                totals.lines_deleted += deleted;
                files.push(FileDiff {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                    old_path: None,
                    diff: Some(diff),
                    is_binary: false,
                    lines_added: added,
                    lines_deleted: deleted,
                });
            }
            (true, false) => {
                let old_bytes = old.extract(path)?;
                let lines = if looks_binary(&old_bytes) {
                    0
                } else {
                    line_count(&String::from_utf8_lossy(&old_bytes))
                };
                totals.files_deleted += 1;
                totals.lines_deleted += lines;
                files.push(FileDiff {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                    old_path: None,
                    diff: None,
                    is_binary: looks_binary(&old_bytes),
                    lines_added: 0,
                    lines_deleted: lines,
                });
            }
            (false, true) => {
                let new_bytes = new.extract(path)?;
                totals.files_added += 1;
                if looks_binary(&new_bytes) {
                    files.push(FileDiff {
                        path: path.clone(),
                        kind: ChangeKind::Added,
                        old_path: None,
                        diff: Some(String::new()),
                        is_binary: true,
                        lines_added: 0,
                        lines_deleted: 0,
                    });
                    continue;
                }
                let new_text = String::from_utf8_lossy(&new_bytes);
                let (diff, added, _) =
                    unified("", &new_text, "/dev/null", &format!("b/{path}"));
                totals.lines_added += added;
                files.push(FileDiff {
                    path: path.clone(),
                    kind: ChangeKind::Added,
                    old_path: None,
                    diff: Some(diff),
                    is_binary: false,
                    lines_added: added,
                    lines_deleted: 0,
                });
            }
            (false, false) => unreachable!("path came from the union"),
        }
    }

    Ok(Comparison { files, totals })
}

#[cfg(test)]
mod tests {
    use crate::archive::{fixtures::tar_gz_bytes, open_archive, MemArchive};

    use super::*;

    fn archive(files: &[(&str, &[u8])]) -> MemArchive {
        open_archive("fixture.tar.gz", tar_gz_bytes(files)).unwrap()
    }

    #[test]
    fn test_identical_archives_diff_empty() {
        let files: &[(&str, &[u8])] = &[("a.txt", b"one\ntwo\n"), ("b/c.txt", b"three\n")];
        let result = compare(&archive(files), &archive(files)).unwrap();
        assert!(result.files.is_empty());
        assert_eq!(result.totals.files_changed, 0);
    }

    #[test]
    fn test_added_deleted_modified() {
        let old = archive(&[
            ("README.md", b"# title\nline one\nline two\n"),
            ("old.txt", b"going away\n"),
        ]);
        let new = archive(&[
            ("README.md", b"# title\nline one\nline 2\n"),
            ("new.txt", b"brand new\n"),
        ]);

        let result = compare(&old, &new).unwrap();
        assert_eq!(result.totals.files_changed, 1);
        assert_eq!(result.totals.files_added, 1);
        assert_eq!(result.totals.files_deleted, 1);

        let readme = result
            .files
            .iter()
            .find(|f| f.path == "README.md")
            .unwrap();
        assert_eq!(readme.kind, ChangeKind::Modified);
        let diff = readme.diff.as_ref().unwrap();
        assert!(diff.contains("--- a/README.md"));
        assert!(diff.contains("+++ b/README.md"));
        assert!(diff.contains("-line two"));
        assert!(diff.contains("+line 2"));
        assert_eq!(readme.lines_added, 1);
        assert_eq!(readme.lines_deleted, 1);

        let added = result.files.iter().find(|f| f.path == "new.txt").unwrap();
        assert_eq!(added.kind, ChangeKind::Added);
        let diff = added.diff.as_ref().unwrap();
        assert!(diff.contains("--- /dev/null"));
        assert!(diff.contains("+++ b/new.txt"));
        assert_eq!(added.lines_added, 1);

        let deleted = result.files.iter().find(|f| f.path == "old.txt").unwrap();
        assert_eq!(deleted.kind, ChangeKind::Deleted);
        assert_eq!(deleted.lines_deleted, 1);
    }

    #[test]
    fn test_binary_detection_by_nul_byte() {
        let old = archive(&[("blob.bin", &b"text\x00more"[..])]);
        let new = archive(&[("blob.bin", &b"text\x00less"[..])]);
        let result = compare(&old, &new).unwrap();
        let diff = &result.files[0];
        assert!(diff.is_binary);
        assert_eq!(diff.kind, ChangeKind::Modified);
        assert!(diff.diff.is_none());

        // Binary adds carry the flag and an empty diff body.
        let empty = archive(&[]);
        let result = compare(&empty, &old).unwrap();
        let added = &result.files[0];
        assert_eq!(added.kind, ChangeKind::Added);
        assert!(added.is_binary);
        assert_eq!(added.diff.as_deref(), Some(""));
    }

    #[test]
    fn test_text_with_late_nul_is_still_text() {
        let mut body = vec![b'a'; BINARY_SNIFF_LEN];
        body.push(b'\n');
        let mut body2 = body.clone();
        body2.push(0); // NUL beyond the sniff window
        body2.push(b'b');
        let old = archive(&[("f.txt", &body[..])]);
        let new = archive(&[("f.txt", &body2[..])]);
        let result = compare(&old, &new).unwrap();
        assert!(!result.files[0].is_binary);
    }
}
