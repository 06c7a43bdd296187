//! Pass trait for the class pipeline.

use crate::{analysis::FrameCache, engine::EngineConfig, ir::Class, Result};

/// State shared by the passes processing one class.
///
/// The frame cache is not thread-safe; every worker creates its own context.
pub struct PassContext<'a> {
    /// Analysis results of the methods of the class being processed
    pub frames: &'a FrameCache,
    /// Engine configuration
    pub config: &'a EngineConfig,
}

impl<'a> PassContext<'a> {
    /// Creates a context over `frames`.
    #[must_use]
    pub fn new(frames: &'a FrameCache, config: &'a EngineConfig) -> Self {
        PassContext { frames, config }
    }
}

/// A rewriting step applied to whole classes.
///
/// Passes must be thread-safe (Send + Sync) because the engine runs them on several
/// classes at once. A pass receives exclusive access to the class it rewrites.
pub trait ClassPass: Send + Sync {
    /// Unique name for logging.
    fn name(&self) -> &'static str;

    /// What the pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Should this pass run on `class`?
    fn should_run(&self, _class: &Class, _ctx: &PassContext<'_>) -> bool {
        true
    }

    /// Rewrites `class`. Returns `true` if anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a method cannot be analyzed or edited. The class must then
    /// be discarded.
    fn run(&self, class: &mut Class, ctx: &PassContext<'_>) -> Result<bool>;
}
