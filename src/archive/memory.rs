//! The buffered archive representation shared by every format.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;

use super::{ArchiveError, ArchiveFormat, ArchiveReader, FileInfo};

/// An archive fully loaded into memory: entry metadata plus file bytes
/// keyed by normalized path.
#[derive(Debug, Default)]
pub struct MemArchive {
    entries: Vec<FileInfo>,
    data: HashMap<String, Vec<u8>>,
}

/// Strip leading `./`, surrounding slashes and whitespace.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.trim_matches('/').to_string()
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl MemArchive {
    pub(super) fn open(format: ArchiveFormat, bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        match format {
            ArchiveFormat::Zip => Self::from_zip(bytes),
            ArchiveFormat::Tar => Self::from_tar(Cursor::new(bytes)),
            ArchiveFormat::TarGz => Self::from_tar(GzDecoder::new(Cursor::new(bytes))),
            ArchiveFormat::TarBz2 => {
                Self::from_tar(bzip2::read::BzDecoder::new(Cursor::new(bytes)))
            }
            ArchiveFormat::TarXz => Self::from_tar(xz2::read::XzDecoder::new(Cursor::new(bytes))),
            ArchiveFormat::Gem => Self::from_gem(bytes),
        }
    }

    fn from_zip(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
        let mut archive = Self::default();

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
            let path = normalize_path(entry.name());
            if path.is_empty() {
                continue;
            }
            let is_dir = entry.is_dir();
            let mod_time = entry.last_modified().and_then(zip_datetime);
            let mode = entry
                .unix_mode()
                .unwrap_or(if is_dir { 0o755 } else { 0o644 });

            if is_dir {
                archive.push_dir(&path, mod_time, mode);
                continue;
            }

            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut contents)?;
            archive.push_file(
                &path,
                contents,
                mod_time,
                mode,
                Some(entry.compressed_size()),
            );
        }
        Ok(archive)
    }

    fn from_tar<R: Read>(reader: R) -> Result<Self, ArchiveError> {
        let mut tar = tar::Archive::new(reader);
        let mut archive = Self::default();

        for entry in tar.entries()? {
            let mut entry = entry?;
            let path = normalize_path(&entry.path()?.to_string_lossy());
            if path.is_empty() {
                continue;
            }
            let header = entry.header();
            let mode = header.mode().unwrap_or(0o644);
            let mod_time = header
                .mtime()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

            let kind = header.entry_type();
            if kind.is_dir() {
                archive.push_dir(&path, mod_time, mode);
            } else if kind.is_file() {
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut contents)?;
                archive.push_file(&path, contents, mod_time, mode, None);
            }
            // Links and special entries are not browsable; skipped.
        }
        Ok(archive)
    }

    /// RubyGems packages are a plain outer tar whose `data.tar.gz` member
    /// holds the real files; the other members (metadata, checksums) are
    /// ignored.
    fn from_gem(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        let mut outer = tar::Archive::new(Cursor::new(bytes));
        for entry in outer.entries()? {
            let mut entry = entry?;
            let path = normalize_path(&entry.path()?.to_string_lossy());
            if path == "data.tar.gz" {
                let mut inner = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut inner)?;
                return Self::from_tar(GzDecoder::new(Cursor::new(inner)));
            }
        }
        Err(ArchiveError::Malformed(
            "gem has no data.tar.gz member".to_string(),
        ))
    }

    fn push_dir(&mut self, path: &str, mod_time: Option<DateTime<Utc>>, mode: u32) {
        self.entries.push(FileInfo {
            path: path.to_string(),
            name: file_name(path),
            size: 0,
            mod_time,
            is_dir: true,
            mode,
            compressed_size: None,
        });
    }

    fn push_file(
        &mut self,
        path: &str,
        contents: Vec<u8>,
        mod_time: Option<DateTime<Utc>>,
        mode: u32,
        compressed_size: Option<u64>,
    ) {
        self.entries.push(FileInfo {
            path: path.to_string(),
            name: file_name(path),
            size: contents.len() as u64,
            mod_time,
            is_dir: false,
            mode,
            compressed_size,
        });
        self.data.insert(path.to_string(), contents);
    }

    fn is_dir_path(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.entries
            .iter()
            .any(|e| (e.is_dir && e.path == path) || e.path.starts_with(&prefix))
    }
}

fn zip_datetime(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    let date = chrono::NaiveDate::from_ymd_opt(
        i32::from(dt.year()),
        u32::from(dt.month()),
        u32::from(dt.day()),
    )?;
    let naive = date.and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )?;
    Some(Utc.from_utc_datetime(&naive))
}

impl ArchiveReader for MemArchive {
    fn list(&self) -> Vec<FileInfo> {
        self.entries.clone()
    }

    fn list_dir(&self, dir: &str) -> Vec<FileInfo> {
        let dir = normalize_path(dir);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut out = Vec::new();
        let mut seen_dirs: HashSet<String> = HashSet::new();

        for entry in &self.entries {
            let Some(rest) = entry.path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                // Directly inside `dir`.
                None => {
                    if entry.is_dir {
                        if seen_dirs.insert(rest.to_string()) {
                            out.push(entry.clone());
                        }
                    } else {
                        out.push(entry.clone());
                    }
                }
                // Strictly below: surface the first component as a
                // synthetic directory, once.
                Some((first, _)) => {
                    if !first.is_empty() && seen_dirs.insert(first.to_string()) {
                        out.push(FileInfo {
                            path: format!("{prefix}{first}"),
                            name: first.to_string(),
                            size: 0,
                            mod_time: None,
                            is_dir: true,
                            mode: 0o755,
                            compressed_size: None,
                        });
                    }
                }
            }
        }

        out.sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));
        out
    }

    fn extract(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let path = normalize_path(path);
        if let Some(contents) = self.data.get(&path) {
            return Ok(contents.clone());
        }
        if self.is_dir_path(&path) {
            return Err(ArchiveError::IsDirectory(path));
        }
        Err(ArchiveError::NotFound(path))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::super::open_archive;
    use super::*;

    const FILES: &[(&str, &[u8])] = &[
        ("README.md", b"# readme\n"),
        ("src/lib.rs", b"pub fn lib() {}\n"),
        ("src/nested/deep.rs", b"// deep\n"),
        ("Cargo.toml", b"[package]\n"),
    ];

    fn assert_round_trip(archive: &dyn ArchiveReader) {
        // Every file written is listed with its exact bytes.
        let listed = archive.list();
        for (path, contents) in FILES {
            assert!(
                listed.iter().any(|e| e.path == *path && !e.is_dir),
                "missing {path}"
            );
            assert_eq!(&archive.extract(path).unwrap(), contents, "{path}");
        }

        // Root listing: files directly, subtrees as a synthetic dir, once.
        let root = archive.list_dir("");
        let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "src").count(), 1);
        assert!(root.iter().any(|e| e.name == "src" && e.is_dir));
        assert!(root.iter().any(|e| e.name == "README.md" && !e.is_dir));
        assert!(root.iter().any(|e| e.name == "Cargo.toml" && !e.is_dir));
        assert_eq!(root.len(), 3);
    }

    #[test]
    fn test_round_trip_all_formats() {
        let cases: Vec<(&str, Vec<u8>)> = vec![
            ("pkg.tar", tar_bytes(FILES)),
            ("pkg.tar.gz", tar_gz_bytes(FILES)),
            ("pkg.tar.bz2", tar_bz2_bytes(FILES)),
            ("pkg.tar.xz", tar_xz_bytes(FILES)),
            ("pkg.zip", zip_bytes(FILES)),
            ("pkg-1.0.0.gem", gem_bytes(FILES)),
        ];
        for (name, bytes) in cases {
            let archive = open_archive(name, bytes).unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_round_trip(&archive);
        }
    }

    #[test]
    fn test_list_dir_normalizes_and_descends() {
        let archive = open_archive("pkg.tar.gz", tar_gz_bytes(FILES)).unwrap();

        let src = archive.list_dir(" /src/ ");
        let names: Vec<&str> = src.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["nested", "lib.rs"]);
        assert!(src[0].is_dir);

        let nested = archive.list_dir("src/nested");
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, "deep.rs");

        assert!(archive.list_dir("no/such/dir").is_empty());
    }

    #[test]
    fn test_extract_errors() {
        let archive = open_archive("pkg.tar.gz", tar_gz_bytes(FILES)).unwrap();
        assert!(matches!(
            archive.extract("src"),
            Err(ArchiveError::IsDirectory(_))
        ));
        assert!(matches!(
            archive.extract("nope.txt"),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn test_gem_ignores_sibling_members() {
        let archive = open_archive("x.gem", gem_bytes(FILES)).unwrap();
        assert!(archive.extract("metadata.gz").is_err());
        assert_eq!(archive.extract("README.md").unwrap(), b"# readme\n");
    }

    #[test]
    fn test_tar_with_dot_prefixed_paths() {
        let bytes = tar_gz_bytes(&[("./package/index.js", b"module.exports = 1;\n")]);
        let archive = open_archive("p.tgz", bytes).unwrap();
        assert_eq!(
            archive.extract("package/index.js").unwrap(),
            b"module.exports = 1;\n"
        );
    }
}
