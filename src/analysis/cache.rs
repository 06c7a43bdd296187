//! Per-thread memoization of analysis results.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    analysis::analyzer::{Analyzer, Frames},
    ir::{Method, MethodId},
    Result,
};

/// Caches [`Frames`] by method identity and revision.
///
/// An entry is valid as long as the method's revision is unchanged; any call to
/// [`Method::mark_modified`] makes the next lookup recompute. Frames hold reference
/// counted values and are therefore confined to the thread that computed them; use
/// one cache per worker.
#[derive(Debug, Default)]
pub struct FrameCache {
    entries: RefCell<HashMap<MethodId, (u64, Rc<Frames>)>>,
}

impl FrameCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames for the current revision of `method`, computing them if needed.
    ///
    /// # Errors
    /// Propagates analysis failures. Also fails when the method was edited without
    /// [`Method::mark_modified`] and the cached frames no longer line up with the body.
    pub fn frames(&self, owner: &str, method: &Method) -> Result<Rc<Frames>> {
        if let Some((revision, frames)) = self.entries.borrow().get(&method.id()) {
            if *revision == method.revision() {
                if frames.len() != method.instructions.len() {
                    return Err(analysis_error!(
                        owner,
                        method.signature(),
                        "instructions changed without a revision bump ({} cached, {} now)",
                        frames.len(),
                        method.instructions.len()
                    ));
                }
                return Ok(frames.clone());
            }
        }

        let frames = Rc::new(Analyzer::new(owner, method).analyze()?);
        self.entries
            .borrow_mut()
            .insert(method.id(), (method.revision(), frames.clone()));
        Ok(frames)
    }

    /// Drops the entry of one method.
    pub fn invalidate(&self, method: MethodId) {
        self.entries.borrow_mut().remove(&method);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of cached methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{opcodes::*, Insn, MethodAccess};

    fn returning_method() -> Method {
        let mut method = Method::new(MethodAccess::STATIC, "f", "()V");
        method.instructions.push(Insn::simple(RETURN));
        method
    }

    #[test]
    fn test_hit_and_revision_miss() {
        let cache = FrameCache::new();
        let mut method = returning_method();

        let first = cache.frames("T", &method).unwrap();
        let second = cache.frames("T", &method).unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        method.mark_modified();
        let third = cache.frames("T", &method).unwrap();
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_body_is_detected() {
        let cache = FrameCache::new();
        let mut method = returning_method();
        cache.frames("T", &method).unwrap();

        let body = method.instructions.take();
        method
            .instructions
            .extend(std::iter::once(Insn::simple(NOP)).chain(body));
        assert!(cache.frames("T", &method).is_err());

        cache.invalidate(method.id());
        assert!(cache.is_empty());
        assert!(cache.frames("T", &method).is_ok());
    }
}
