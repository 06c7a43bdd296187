//! Class processing pipeline.
//!
//! The [`Engine`] runs a fixed sequence of [`ClassPass`]es over each class, then
//! re-analyzes every method body it touched. Any analysis failure aborts the class:
//! the error is logged, the failing method is optionally dumped to disk, and the error
//! is returned to the caller. No partially rewritten class is ever handed back as a
//! success.
//!
//! # Pipeline
//!
//! 1. [`StripMetadataPass`] - drops the configured visible annotations
//! 2. [`InlinePass`] - inlines calls into trusted namespaces (when enabled)
//! 3. Validation - every method with a body is analyzed again, and `max_locals` and
//!    `max_stack` are written back from the result
//!
//! [`Engine::process_archive_to`] then encodes the changed classes again with
//! [`ClassWriter`] and writes a new jar.
//!
//! Classes are independent of each other, so [`Engine::process_classes`] distributes
//! them over the rayon thread pool when [`EngineConfig::parallel`] is set. The resolver
//! cache and the inliner memo are concurrent maps shared by all workers; analysis
//! caches are created per class.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dekotlin::engine::{Engine, EngineConfig};
//! use dekotlin::file::Archive;
//! use std::path::Path;
//!
//! let engine = Engine::new(EngineConfig::default().with_dump_path("failures"));
//! engine
//!     .resolver()
//!     .add_classpath_entry(Path::new("lib/kotlin-stdlib.jar"))?;
//!
//! let archive = Archive::open(Path::new("app.jar"))?;
//! let (classes, report) = engine.process_archive(&archive)?;
//! println!(
//!     "{} classes ({} changed), {} other entries",
//!     report.classes, report.changed, report.other_entries
//! );
//! # let _ = classes;
//! # Ok::<(), dekotlin::Error>(())
//! ```

mod config;
mod pass;
mod passes;

use std::{fs, path::Path, sync::Arc};

use rayon::prelude::*;

use crate::{
    analysis::FrameCache,
    file::{Archive, ArchiveEntry, ClassReader, ClassWriter},
    ir::{Class, MethodListing},
    resolver::ResolverChain,
    rewrite::{FunctionInliner, TrustPolicy},
    Error, Result,
};

pub use config::{EngineConfig, DEFAULT_CACHE_CAPACITY, SURROGATE_NAMESPACE};
pub use pass::{ClassPass, PassContext};
pub use passes::{InlinePass, StripMetadataPass};

/// Counts reported by [`Engine::process_archive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Class entries processed
    pub classes: usize,
    /// Classes a pass changed
    pub changed: usize,
    /// Entries that are not classes, passed through untouched
    pub other_entries: usize,
}

/// Runs the class pipeline.
pub struct Engine {
    config: EngineConfig,
    resolver: Arc<ResolverChain>,
    inliner: Arc<FunctionInliner>,
    passes: Vec<Box<dyn ClassPass>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Creates an engine with an empty resolver chain.
    ///
    /// Add resolvers through [`Engine::resolver`] before processing classes.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let resolver = Arc::new(ResolverChain::new(config.cache_capacity));
        let inliner = Arc::new(FunctionInliner::new(
            resolver.clone(),
            TrustPolicy::new(config.trusted_prefixes.iter().cloned()),
        ));

        let mut passes: Vec<Box<dyn ClassPass>> = Vec::new();
        if !config.strip_annotations.is_empty() {
            passes.push(Box::new(StripMetadataPass::new(
                config.strip_annotations.clone(),
            )));
        }
        if config.enable_inlining {
            passes.push(Box::new(InlinePass::new(inliner.clone())));
        }

        Engine {
            config,
            resolver,
            inliner,
            passes,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The resolver chain used to find inlining targets.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ResolverChain> {
        &self.resolver
    }

    /// The shared inliner.
    #[must_use]
    pub fn inliner(&self) -> &Arc<FunctionInliner> {
        &self.inliner
    }

    /// Appends a pass after the built-in ones.
    pub fn add_pass(&mut self, pass: Box<dyn ClassPass>) {
        self.passes.push(pass);
    }

    /// Names of the passes, in run order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Runs the pipeline on one class. Returns whether any pass changed it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if a method cannot be analyzed before or after
    /// rewriting, and editor errors from the passes. The class is left in an
    /// unspecified state and must be discarded.
    pub fn process_class(&self, class: &mut Class) -> Result<bool> {
        let frames = FrameCache::new();
        let result = self.run_passes(class, &frames);
        if let Err(error @ Error::Analysis { .. }) = &result {
            self.report_failure(class, error);
        }
        result
    }

    fn run_passes(&self, class: &mut Class, frames: &FrameCache) -> Result<bool> {
        let ctx = PassContext::new(frames, &self.config);
        let mut changed = false;
        for pass in &self.passes {
            if !pass.should_run(class, &ctx) {
                continue;
            }
            let pass_changed = pass.run(class, &ctx)?;
            log::trace!(
                "Pass {} on {}: {}",
                pass.name(),
                class.name,
                if pass_changed { "changed" } else { "unchanged" }
            );
            changed |= pass_changed;
        }

        for method in &mut class.methods {
            if method.instructions.is_empty() {
                continue;
            }
            let analysis = frames.frames(&class.name, method)?;
            method.max_locals = analysis.max_locals();
            method.max_stack = Some(analysis.max_stack());
        }
        Ok(changed)
    }

    fn report_failure(&self, class: &Class, error: &Error) {
        log::error!("{}", error);
        let Error::Analysis { method, .. } = error else {
            return;
        };
        let Some(dump_path) = &self.config.dump_path else {
            return;
        };
        let Some(failing) = class.methods.iter().find(|m| m.signature() == *method) else {
            return;
        };

        let file_name: String = format!("{}.{}.txt", class.name, failing.signature())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        let path = dump_path.join(file_name);
        let listing = MethodListing::new(&class.name, failing).to_string();
        let written = fs::create_dir_all(dump_path).and_then(|()| fs::write(&path, listing));
        match written {
            Ok(()) => log::error!(
                "Disassembly of the failing method written to {}",
                path.display()
            ),
            Err(io) => log::warn!("Could not write {}: {}", path.display(), io),
        }
    }

    /// Runs the pipeline on every class, in parallel when configured. Returns the number
    /// of classes that changed.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Engine::process_class`]; classes are processed
    /// independently, so others may have been rewritten already.
    pub fn process_classes(&self, classes: &mut [Class]) -> Result<usize> {
        let changed = self.process_each(classes)?;
        Ok(changed.into_iter().filter(|c| *c).count())
    }

    /// Whether each class changed, in input order.
    fn process_each(&self, classes: &mut [Class]) -> Result<Vec<bool>> {
        if self.config.parallel {
            classes
                .par_iter_mut()
                .map(|class| self.process_class(class))
                .collect()
        } else {
            classes
                .iter_mut()
                .map(|class| self.process_class(class))
                .collect()
        }
    }

    /// Encodes `class` as a class file, resolving superclasses for frame merging
    /// through the engine's resolver chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the class cannot be encoded.
    pub fn write_class(&self, class: &Class) -> Result<Vec<u8>> {
        ClassWriter::new(&self.resolver).write(class)
    }

    /// Parses and processes every class entry of `archive`.
    ///
    /// Returns the processed classes in entry order. Other entries are only counted.
    ///
    /// # Errors
    ///
    /// Returns parse errors of the class entries and the errors of
    /// [`Engine::process_classes`].
    pub fn process_archive(&self, archive: &Archive) -> Result<(Vec<Class>, ArchiveReport)> {
        let mut classes = archive
            .classes()
            .map(|entry| ClassReader::parse(&entry.data))
            .collect::<Result<Vec<Class>>>()?;
        let changed = self.process_classes(&mut classes)?;

        let report = ArchiveReport {
            classes: classes.len(),
            changed,
            other_entries: archive.len() - classes.len(),
        };
        log::info!(
            "Processed {} classes ({} changed), passed through {} other entries",
            report.classes,
            report.changed,
            report.other_entries
        );
        Ok((classes, report))
    }

    /// Processes `archive` and writes the result as a new jar at `output`.
    ///
    /// Entries keep their order. Classes a pass changed are encoded again; unchanged
    /// classes and every other entry are copied byte for byte.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Engine::process_archive`], [`Error::Write`] if a changed
    /// class cannot be encoded, and I/O or archive errors from writing `output`.
    pub fn process_archive_to(&self, archive: &Archive, output: &Path) -> Result<ArchiveReport> {
        let mut classes = archive
            .classes()
            .map(|entry| ClassReader::parse(&entry.data))
            .collect::<Result<Vec<Class>>>()?;
        let changed = self.process_each(&mut classes)?;

        let encode = |(class, changed): (&Class, &bool)| -> Result<Option<Vec<u8>>> {
            if *changed {
                self.write_class(class).map(Some)
            } else {
                Ok(None)
            }
        };
        let encoded = if self.config.parallel {
            classes
                .par_iter()
                .zip(changed.par_iter())
                .map(encode)
                .collect::<Result<Vec<Option<Vec<u8>>>>>()?
        } else {
            classes
                .iter()
                .zip(changed.iter())
                .map(encode)
                .collect::<Result<Vec<Option<Vec<u8>>>>>()?
        };

        let mut encoded = encoded.into_iter();
        let entries: Vec<ArchiveEntry> = archive
            .entries()
            .iter()
            .map(|entry| {
                let rewritten = if entry.is_class() {
                    encoded.next().flatten()
                } else {
                    None
                };
                ArchiveEntry {
                    name: entry.name.clone(),
                    data: rewritten.unwrap_or_else(|| entry.data.clone()),
                }
            })
            .collect();
        Archive::from_entries(entries).save(output)?;

        let report = ArchiveReport {
            classes: classes.len(),
            changed: changed.iter().filter(|c| **c).count(),
            other_entries: archive.len() - classes.len(),
        };
        log::info!(
            "Wrote {} with {} classes ({} changed) and {} other entries",
            output.display(),
            report.classes,
            report.changed,
            report.other_entries
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{opcodes::*, Insn, Method, MethodAccess};

    fn class_with(name: &str, insns: Vec<Insn>) -> Class {
        let mut class = Class::new(name, Some("java/lang/Object"));
        let mut method = Method::new(MethodAccess::STATIC, "run", "()I");
        for insn in insns {
            method.instructions.push(insn);
        }
        class.methods.push(method);
        class
    }

    #[test]
    fn test_writes_back_maxs() {
        let engine = Engine::new(EngineConfig::default().with_parallel(false));
        let mut class = class_with(
            "demo/A",
            vec![
                Insn::simple(ICONST_1),
                Insn::simple(ICONST_2),
                Insn::simple(IADD),
                Insn::simple(IRETURN),
            ],
        );
        class.methods[0].max_stack = None;

        assert!(!engine.process_class(&mut class).unwrap());
        assert_eq!(class.methods[0].max_stack, Some(2));
        assert_eq!(class.methods[0].max_locals, 0);
    }

    #[test]
    fn test_failure_is_dumped_and_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            EngineConfig::default()
                .with_parallel(false)
                .with_dump_path(dir.path()),
        );
        // falls off the end of the code
        let mut class = class_with("demo/Broken", vec![Insn::simple(ICONST_1)]);

        let error = engine.process_class(&mut class).unwrap_err();
        assert!(matches!(error, Error::Analysis { ref class, .. } if class == "demo/Broken"));

        let dumps: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(dumps.len(), 1);
        let text = fs::read_to_string(dumps[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("ICONST_1"));
    }

    #[test]
    fn test_process_classes_parallel() {
        let engine = Engine::default();
        let mut classes: Vec<Class> = (0..8)
            .map(|i| {
                class_with(
                    &format!("demo/C{}", i),
                    vec![Insn::push_int(i), Insn::simple(IRETURN)],
                )
            })
            .collect();
        assert_eq!(engine.process_classes(&mut classes).unwrap(), 0);
        assert!(classes.iter().all(|c| c.methods[0].max_stack == Some(1)));
        assert_eq!(engine.pass_names(), vec!["strip-metadata", "inline"]);
    }
}
