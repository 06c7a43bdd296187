use std::collections::HashMap;

use crate::{ir::Class, resolver::ClassResolver};

/// Classes held in memory.
///
/// Used for the surrogate set shipped with the host application and in tests. Every
/// lookup hands out a deep copy, so callers may edit what they receive.
#[derive(Debug, Default, Clone)]
pub struct MemoryResolver {
    classes: HashMap<String, Class>,
}

impl MemoryResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `class`, replacing any class with the same name.
    pub fn add(&mut self, class: Class) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Builder form of [`MemoryResolver::add`].
    #[must_use]
    pub fn with_class(mut self, class: Class) -> Self {
        self.add(class);
        self
    }

    /// Number of classes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no class is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<Class> for MemoryResolver {
    fn from_iter<I: IntoIterator<Item = Class>>(iter: I) -> Self {
        let mut resolver = MemoryResolver::new();
        for class in iter {
            resolver.add(class);
        }
        resolver
    }
}

impl ClassResolver for MemoryResolver {
    fn resolve(&self, name: &str) -> Option<Class> {
        self.classes.get(name).cloned()
    }

    fn describe(&self) -> String {
        format!("memory ({} classes)", self.classes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{opcodes::RETURN, Insn, Method, MethodAccess};

    #[test]
    fn test_resolve_returns_independent_copies() {
        let mut class = Class::new("a/A", Some("java/lang/Object"));
        let mut method = Method::new(MethodAccess::STATIC, "f", "()V");
        method.instructions.push(Insn::simple(RETURN));
        class.methods.push(method);

        let resolver: MemoryResolver = [class].into_iter().collect();
        assert_eq!(resolver.len(), 1);

        let first = resolver.resolve("a/A").unwrap();
        let second = resolver.resolve("a/A").unwrap();
        assert_ne!(first.methods[0].id(), second.methods[0].id());
        assert!(resolver.resolve("b/B").is_none());
    }
}
