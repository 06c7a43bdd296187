use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::Mutex,
};

use zip::{result::ZipError, ZipArchive};

use crate::{file::ClassReader, ir::Class, resolver::ClassResolver, Result};

/// A jar on the classpath.
///
/// The archive stays open; entries are read on demand.
pub struct ArchiveResolver {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl ArchiveResolver {
    /// Opens the jar at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and
    /// [`crate::Error::Archive`] if it is not a zip container.
    pub fn open(path: &Path) -> Result<Self> {
        let archive = ZipArchive::new(File::open(path)?)?;
        Ok(ArchiveResolver {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
        })
    }

    fn read_entry(&self, entry: &str) -> std::result::Result<Option<Vec<u8>>, ZipError> {
        let mut archive = lock!(self.archive);
        let mut file = match archive.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }
}

impl ClassResolver for ArchiveResolver {
    fn resolve(&self, name: &str) -> Option<Class> {
        let entry = format!("{}.class", name);
        let data = match self.read_entry(&entry) {
            Ok(data) => data?,
            Err(error) => {
                log::warn!("Failed to read {}!{}: {}", self.path.display(), entry, error);
                return None;
            }
        };
        match ClassReader::parse(&data) {
            Ok(class) => Some(class),
            Err(error) => {
                log::warn!("Failed to parse {}!{}: {}", self.path.display(), entry, error);
                None
            }
        }
    }

    fn describe(&self) -> String {
        format!("archive {}", self.path.display())
    }
}
