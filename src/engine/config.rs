//! Configuration for the rewriting engine.

use std::path::PathBuf;

/// Default number of classes kept by the resolver cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Namespace of the surrogate classes standing in for runtime helpers.
pub const SURROGATE_NAMESPACE: &str = "dekotlin/surrogate/";

/// Configuration for the rewriting engine.
///
/// Controls which classes are trusted for inlining, which annotations are stripped,
/// and how classes are scheduled.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Internal-name prefixes whose methods may be inlined (default: `kotlin/` and
    /// the surrogate namespace).
    pub trusted_prefixes: Vec<String>,

    /// Descriptors of the visible annotations removed from every class (default:
    /// `Lkotlin/Metadata;`).
    pub strip_annotations: Vec<String>,

    /// Run the inlining pass (default: true).
    pub enable_inlining: bool,

    /// Process independent classes in parallel (default: true).
    pub parallel: bool,

    /// Maximum number of resolved classes kept in memory.
    pub cache_capacity: usize,

    /// Directory receiving the disassembly of methods that fail analysis.
    pub dump_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trusted_prefixes: vec!["kotlin/".to_string(), SURROGATE_NAMESPACE.to_string()],
            strip_annotations: vec!["Lkotlin/Metadata;".to_string()],
            enable_inlining: true,
            parallel: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            dump_path: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the trusted namespaces.
    #[must_use]
    pub fn with_trusted_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one trusted namespace.
    #[must_use]
    pub fn with_trusted_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trusted_prefixes.push(prefix.into());
        self
    }

    /// Replaces the list of annotations to strip.
    #[must_use]
    pub fn with_strip_annotations<I, S>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strip_annotations = descriptors.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables inlining.
    #[must_use]
    pub fn with_inlining(mut self, enable: bool) -> Self {
        self.enable_inlining = enable;
        self
    }

    /// Enables or disables parallel processing of classes.
    #[must_use]
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.parallel = enable;
        self
    }

    /// Sets the resolver cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the directory receiving failure dumps.
    #[must_use]
    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }
}
