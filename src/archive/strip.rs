//! Prefix-stripping decorator.
//!
//! Ecosystems that wrap every file inside a literal top-level directory
//! (npm tarballs put everything under `package/`) get transparent
//! browsing: the wrapper hides entries outside the prefix and strips it
//! from every returned path, forwarding queries with the prefix re-added.

use super::{ArchiveError, ArchiveReader, FileInfo};

pub struct PrefixStripped<R> {
    inner: R,
    /// Normalized to end with `/`; empty means pass-through.
    prefix: String,
}

impl<R> std::fmt::Debug for PrefixStripped<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixStripped")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<R: ArchiveReader> PrefixStripped<R> {
    pub fn new(inner: R, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self { inner, prefix }
    }

    fn strip(&self, info: FileInfo) -> Option<FileInfo> {
        let path = info.path.strip_prefix(&self.prefix)?;
        // The prefix directory itself strips to nothing and is dropped.
        if path.is_empty() {
            return None;
        }
        Some(FileInfo {
            path: path.to_string(),
            ..info
        })
    }
}

impl<R: ArchiveReader> ArchiveReader for PrefixStripped<R> {
    fn list(&self) -> Vec<FileInfo> {
        self.inner
            .list()
            .into_iter()
            .filter_map(|info| self.strip(info))
            .collect()
    }

    fn list_dir(&self, dir: &str) -> Vec<FileInfo> {
        let dir = dir.trim().trim_matches('/');
        let inner_dir = format!("{}{dir}", self.prefix);
        self.inner
            .list_dir(&inner_dir)
            .into_iter()
            .filter_map(|info| self.strip(info))
            .collect()
    }

    fn extract(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let path = path.trim().trim_matches('/');
        self.inner.extract(&format!("{}{path}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::tar_gz_bytes;
    use super::super::open_archive;
    use super::*;

    const WRAPPED: &[(&str, &[u8])] = &[
        ("package/index.js", b"module.exports = 1;\n"),
        ("package/lib/util.js", b"exports.u = 1;\n"),
        ("package/package.json", b"{}\n"),
    ];

    const BARE: &[(&str, &[u8])] = &[
        ("index.js", b"module.exports = 1;\n"),
        ("lib/util.js", b"exports.u = 1;\n"),
        ("package.json", b"{}\n"),
    ];

    /// A wrapped archive behind the stripper is indistinguishable from the
    /// same archive without the prefix.
    #[test]
    fn test_prefix_transparency() {
        let wrapped = PrefixStripped::new(
            open_archive("a.tgz", tar_gz_bytes(WRAPPED)).unwrap(),
            "package/",
        );
        let bare = open_archive("b.tgz", tar_gz_bytes(BARE)).unwrap();

        let mut wrapped_paths: Vec<String> =
            wrapped.list().into_iter().map(|e| e.path).collect();
        let mut bare_paths: Vec<String> = bare.list().into_iter().map(|e| e.path).collect();
        wrapped_paths.sort();
        bare_paths.sort();
        assert_eq!(wrapped_paths, bare_paths);

        for dir in ["", "lib"] {
            let w: Vec<(String, bool)> = wrapped
                .list_dir(dir)
                .into_iter()
                .map(|e| (e.path, e.is_dir))
                .collect();
            let b: Vec<(String, bool)> = bare
                .list_dir(dir)
                .into_iter()
                .map(|e| (e.path, e.is_dir))
                .collect();
            assert_eq!(w, b, "list_dir({dir:?})");
        }

        for (path, contents) in BARE {
            assert_eq!(&wrapped.extract(path).unwrap(), contents);
        }
    }

    #[test]
    fn test_hides_entries_outside_prefix() {
        let files: &[(&str, &[u8])] = &[
            ("package/index.js", b"inside\n"),
            ("stray.txt", b"outside\n"),
        ];
        let stripped = PrefixStripped::new(
            open_archive("a.tgz", tar_gz_bytes(files)).unwrap(),
            "package",
        );
        let paths: Vec<String> = stripped.list().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["index.js"]);
        assert!(stripped.extract("stray.txt").is_err());
    }

    #[test]
    fn test_empty_prefix_is_identity() {
        let archive = open_archive("a.tgz", tar_gz_bytes(BARE)).unwrap();
        let identity = PrefixStripped::new(archive, "");
        assert_eq!(identity.extract("index.js").unwrap(), b"module.exports = 1;\n");
        assert_eq!(identity.list().len(), 3);
    }
}
