//! Jar and zip containers.

use std::{
    fs,
    io::{Cursor, Read, Seek, Write},
    path::Path,
};

use zip::{
    write::{SimpleFileOptions, ZipWriter},
    CompressionMethod, ZipArchive,
};

use crate::Result;

/// One file stored in an [`Archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/` separated
    pub name: String,
    /// Uncompressed contents
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    /// Whether the entry holds a class file.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.name.ends_with(".class")
    }

    /// Internal class name derived from the entry path (`a/b/C.class` is `a/b/C`).
    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        self.name.strip_suffix(".class")
    }
}

/// The file entries of a jar, in the order they are stored.
///
/// Directory entries are not kept.
#[derive(Debug, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Reads every entry of the archive at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Archive`] if it is not a valid zip container.
    pub fn open(path: &Path) -> Result<Archive> {
        let file = fs::File::open(path)?;
        let archive = Self::read_from(file)?;
        log::debug!(
            "Read {} entries ({} classes) from {}",
            archive.len(),
            archive.classes().count(),
            path.display()
        );
        Ok(archive)
    }

    /// Reads every entry of an in-memory archive.
    ///
    /// # Errors
    /// Returns [`crate::Error::Archive`] if `data` is not a valid zip container.
    pub fn from_bytes(data: Vec<u8>) -> Result<Archive> {
        Self::read_from(Cursor::new(data))
    }

    fn read_from<R: Read + Seek>(reader: R) -> Result<Archive> {
        let mut zip = ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry.read_to_end(&mut data)?;
            entries.push(ArchiveEntry {
                name: entry.name().to_string(),
                data,
            });
        }
        Ok(Archive { entries })
    }

    /// Writes every entry, in order, to a new jar at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be created and
    /// [`crate::Error::Archive`] if the container cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        self.write_to(file)?;
        log::debug!("Wrote {} entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Writes every entry, in order, as a zip container into `writer`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Archive`] if the container cannot be written.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(writer);
        for entry in &self.entries {
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
        Ok(zip.finish()?)
    }

    /// Builds an archive from entries.
    #[must_use]
    pub fn from_entries(entries: Vec<ArchiveEntry>) -> Self {
        Archive { entries }
    }

    /// All entries in stored order.
    #[must_use]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Mutable access to the entries, used to write processed classes back.
    pub fn entries_mut(&mut self) -> &mut [ArchiveEntry] {
        &mut self.entries
    }

    /// The class file entries.
    pub fn classes(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|entry| entry.is_class())
    }

    /// Looks an entry up by path.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("META-INF/", SimpleFileOptions::default())
            .unwrap();
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_entries_keep_order() {
        let data = jar(&[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ("demo/B.class", &[0xCA, 0xFE]),
            ("demo/A.class", &[0xBA, 0xBE]),
        ]);
        let archive = Archive::from_bytes(data).unwrap();

        let names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["META-INF/MANIFEST.MF", "demo/B.class", "demo/A.class"]
        );
        assert_eq!(archive.classes().count(), 2);
        let a = archive.entry("demo/A.class").unwrap();
        assert_eq!(a.class_name(), Some("demo/A"));
        assert_eq!(a.data, vec![0xBA, 0xBE]);
        assert!(!archive.entries()[0].is_class());
    }

    #[test]
    fn test_invalid_archive() {
        assert!(matches!(
            Archive::from_bytes(b"not a zip".to_vec()),
            Err(crate::Error::Archive(_))
        ));
    }

    #[test]
    fn test_write_keeps_entries() {
        let archive = Archive::from_entries(vec![
            ArchiveEntry {
                name: "META-INF/MANIFEST.MF".to_string(),
                data: b"Manifest-Version: 1.0\n".to_vec(),
            },
            ArchiveEntry {
                name: "demo/A.class".to_string(),
                data: vec![0xCA, 0xFE, 0xBA, 0xBE],
            },
        ]);
        let written = archive.write_to(Cursor::new(Vec::new())).unwrap();
        let reread = Archive::from_bytes(written.into_inner()).unwrap();
        assert_eq!(reread.entries(), archive.entries());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jar");
        archive.save(&path).unwrap();
        assert_eq!(Archive::open(&path).unwrap().entries(), archive.entries());
    }
}
