use std::path::{Path, PathBuf};

use anyhow::Context;
use dekotlin::{
    engine::{Engine, EngineConfig},
    file::{Archive, ClassReader},
    ir::Class,
};

/// Load the classes of a `.class` file or of every class entry in a jar.
pub fn load_classes(path: &Path) -> anyhow::Result<Vec<Class>> {
    if is_class_file(path) {
        let class = ClassReader::from_file(path)
            .with_context(|| format!("failed to read class file: {}", path.display()))?;
        return Ok(vec![class]);
    }

    let archive = Archive::open(path)
        .with_context(|| format!("failed to open archive: {}", path.display()))?;
    archive
        .classes()
        .map(|entry| {
            ClassReader::parse(&entry.data)
                .with_context(|| format!("failed to read {}!{}", path.display(), entry.name))
        })
        .collect()
}

/// Build an engine and register the classpath entries with its resolver.
pub fn build_engine(config: EngineConfig, classpath: &[PathBuf]) -> anyhow::Result<Engine> {
    let engine = Engine::new(config);
    for entry in classpath {
        engine
            .resolver()
            .add_classpath_entry(entry)
            .with_context(|| format!("invalid classpath entry: {}", entry.display()))?;
    }
    Ok(engine)
}

/// Returns true if the path has a `.class` extension.
pub fn is_class_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("class")
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}
