//! Lookup of classes by internal name.
//!
//! The inliner needs the bodies of the functions it inlines, which live in classes other
//! than the one being rewritten. A [`ResolverChain`] asks its [`ClassResolver`]s in
//! order and caches what they find, so every class is parsed at most once while it stays
//! in the cache.
//!
//! # Key Components
//!
//! - [`ClassResolver`] - one source of classes
//! - [`MemoryResolver`] - classes held in memory, e.g. a surrogate set
//! - [`DirectoryResolver`] - a classpath directory of `.class` files
//! - [`ArchiveResolver`] - a jar on the classpath
//! - [`ResolverChain`] - ordered, cached composition of resolvers
//!
//! # Examples
//!
//! ```rust,no_run
//! use dekotlin::resolver::{DirectoryResolver, ResolverChain};
//!
//! let chain = ResolverChain::new(1024);
//! chain.add_resolver(DirectoryResolver::new("build/classes"));
//! if let Some(class) = chain.resolve("kotlin/collections/CollectionsKt") {
//!     println!("{} methods", class.methods.len());
//! }
//! ```

mod archive;
mod directory;
mod memory;

use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use dashmap::DashMap;

use crate::{ir::Class, Result};

pub use archive::ArchiveResolver;
pub use directory::DirectoryResolver;
pub use memory::MemoryResolver;

/// A source of classes.
///
/// Implementations report classes they cannot read as misses; they never fail.
pub trait ClassResolver: Send + Sync {
    /// Returns the class with internal name `name`, if this resolver knows it.
    fn resolve(&self, name: &str) -> Option<Class>;

    /// Short description for diagnostics.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Ordered list of resolvers with a shared, bounded cache.
///
/// The first resolver that knows a class wins. Hits are cached by name; misses are not,
/// so a resolver added later can still answer. When the cache is full an arbitrary
/// entry is evicted.
pub struct ResolverChain {
    resolvers: RwLock<Vec<Box<dyn ClassResolver>>>,
    cache: DashMap<String, Arc<Class>>,
    capacity: usize,
}

impl ResolverChain {
    /// Creates an empty chain whose cache holds at most `capacity` classes.
    /// A capacity of zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        ResolverChain {
            resolvers: RwLock::new(Vec::new()),
            cache: DashMap::new(),
            capacity,
        }
    }

    /// Appends `resolver`, consulted after every resolver already present.
    pub fn add_resolver(&self, resolver: impl ClassResolver + 'static) {
        write_lock!(self.resolvers).push(Box::new(resolver));
    }

    /// Prepends `resolver`, consulted before every resolver already present.
    ///
    /// Cached classes may shadow the new resolver; call [`ResolverChain::clear_cache`]
    /// if that matters.
    pub fn add_resolver_first(&self, resolver: impl ClassResolver + 'static) {
        write_lock!(self.resolvers).insert(0, Box::new(resolver));
    }

    /// Adds a classpath entry: a directory of class files or a jar.
    ///
    /// # Errors
    /// Returns an error if `path` is a file that cannot be opened as an archive.
    pub fn add_classpath_entry(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            self.add_resolver(DirectoryResolver::new(path));
        } else {
            self.add_resolver(ArchiveResolver::open(path)?);
        }
        Ok(())
    }

    /// Removes every resolver and empties the cache.
    pub fn clear_resolvers(&self) {
        write_lock!(self.resolvers).clear();
        self.clear_cache();
    }

    /// Empties the cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of resolvers in the chain.
    #[must_use]
    pub fn resolver_count(&self) -> usize {
        read_lock!(self.resolvers).len()
    }

    /// Number of cached classes.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Looks `name` up in the cache, then in each resolver in order.
    pub fn resolve(&self, name: &str) -> Option<Arc<Class>> {
        if let Some(class) = self.cache.get(name) {
            return Some(class.value().clone());
        }

        let class = {
            let resolvers = read_lock!(self.resolvers);
            resolvers.iter().find_map(|resolver| {
                let class = resolver.resolve(name)?;
                log::trace!("Resolved {} from {}", name, resolver.describe());
                Some(Arc::new(class))
            })
        };

        match &class {
            Some(class) => self.remember(name, class.clone()),
            None => log::trace!("No resolver knows {}", name),
        }
        class
    }

    fn remember(&self, name: &str, class: Arc<Class>) {
        if self.capacity == 0 {
            return;
        }
        while self.cache.len() >= self.capacity {
            let victim = self.cache.iter().next().map(|entry| entry.key().clone());
            match victim {
                Some(victim) => {
                    self.cache.remove(&victim);
                }
                None => break,
            }
        }
        self.cache.insert(name.to_string(), class);
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        ResolverChain::new(crate::engine::DEFAULT_CACHE_CAPACITY)
    }
}
