use std::path::{Path, PathBuf};

use crate::{file::ClassReader, ir::Class, resolver::ClassResolver};

/// A classpath directory holding `<internal name>.class` files.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    /// Creates a resolver rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        DirectoryResolver {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The classpath root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn class_path(&self, name: &str) -> Option<PathBuf> {
        if name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return None;
        }
        Some(self.root.join(format!("{}.class", name)))
    }
}

impl ClassResolver for DirectoryResolver {
    fn resolve(&self, name: &str) -> Option<Class> {
        let path = self.class_path(name)?;
        if !path.is_file() {
            return None;
        }
        match ClassReader::from_file(&path) {
            Ok(class) => Some(class),
            Err(error) => {
                log::warn!("Failed to read {}: {}", path.display(), error);
                None
            }
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_invalid_classes_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/Broken.class"), b"\xCA\xFE\xBA\xBE").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert!(resolver.resolve("a/Missing").is_none());
        assert!(resolver.resolve("a/Broken").is_none());
        assert!(resolver.resolve("../a/Broken").is_none());
        assert_eq!(resolver.root(), dir.path());
    }
}
