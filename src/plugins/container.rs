//! Sources of named histogram objects for the file browser.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path;

use crate::histogram::HistogramObject;
use crate::text;

/// A browsable collection of histogram objects, addressed by key
pub trait HistogramContainer {
    /// Where the container was opened from
    fn location(&self) -> &path::Path;

    /// All keys, sorted
    fn keys(&self) -> Vec<String>;

    fn get(&self, key: &str) -> io::Result<HistogramObject>;

    fn contains(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }
}

/// A directory of histogram text files. Each regular file is one object keyed by its
/// file stem; hidden files and subdirectories are ignored.
#[derive(Debug, Clone)]
pub struct DirectoryContainer {
    root: path::PathBuf,
    entries: BTreeMap<String, path::PathBuf>,
}

impl DirectoryContainer {
    pub fn open<P: AsRef<path::Path>>(path: P) -> io::Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        let mut entries = BTreeMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            if let Some(previous) = entries.insert(stem.clone(), path) {
                log::warn!("{stem} is provided by more than one file, ignoring {}", previous.display());
            }
        }
        log::debug!("Opened {} with {} objects", root.display(), entries.len());
        Ok(Self { root, entries })
    }
}

impl HistogramContainer for DirectoryContainer {
    fn location(&self) -> &path::Path {
        &self.root
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn get(&self, key: &str) -> io::Result<HistogramObject> {
        let path = self.entries.get(key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{key}: no such object"))
        })?;
        text::read_object(path)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::histogram::ObjectKind;

    #[test]
    fn test_directory_container() {
        let container = DirectoryContainer::open("./test/data/container").unwrap();
        assert_eq!(container.keys(), vec!["co60", "eu152", "gg_matrix"]);
        assert!(container.contains("co60"));
        assert!(!container.contains("co"));
        assert_eq!(container.get("co60").unwrap().kind(), ObjectKind::Histogram1D);
        assert_eq!(container.get("gg_matrix").unwrap().kind(), ObjectKind::Histogram2D);
        let err = container.get("missing").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_not_a_directory() {
        let err = DirectoryContainer::open("./test/data/calibrations.txt").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(DirectoryContainer::open("./test/data/nowhere").is_err());
    }
}
