//! Built-in class passes.

use std::sync::Arc;

use crate::{
    engine::{ClassPass, PassContext},
    ir::Class,
    rewrite::FunctionInliner,
    Result,
};

/// Removes compiler metadata annotations.
///
/// Once helpers are inlined the metadata no longer describes the class, so the
/// configured visible annotations are dropped.
#[derive(Debug, Clone)]
pub struct StripMetadataPass {
    descriptors: Vec<String>,
}

impl StripMetadataPass {
    /// Strips visible annotations whose descriptor is one of `descriptors`.
    #[must_use]
    pub fn new(descriptors: Vec<String>) -> Self {
        StripMetadataPass { descriptors }
    }
}

impl ClassPass for StripMetadataPass {
    fn name(&self) -> &'static str {
        "strip-metadata"
    }

    fn description(&self) -> &'static str {
        "Removes compiler metadata annotations"
    }

    fn should_run(&self, class: &Class, _ctx: &PassContext<'_>) -> bool {
        !self.descriptors.is_empty() && !class.visible_annotations.is_empty()
    }

    fn run(&self, class: &mut Class, _ctx: &PassContext<'_>) -> Result<bool> {
        let before = class.visible_annotations.len();
        class
            .visible_annotations
            .retain(|annotation| !self.descriptors.contains(&annotation.desc));
        Ok(class.visible_annotations.len() != before)
    }
}

/// Runs the [`FunctionInliner`] on every method with a body.
pub struct InlinePass {
    inliner: Arc<FunctionInliner>,
}

impl InlinePass {
    /// Creates the pass around a shared inliner.
    #[must_use]
    pub fn new(inliner: Arc<FunctionInliner>) -> Self {
        InlinePass { inliner }
    }
}

impl ClassPass for InlinePass {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn description(&self) -> &'static str {
        "Inlines calls into trusted namespaces"
    }

    fn run(&self, class: &mut Class, ctx: &PassContext<'_>) -> Result<bool> {
        let mut inlined = 0;
        for method in &mut class.methods {
            if method.instructions.is_empty() {
                continue;
            }
            let count = self
                .inliner
                .inline_method(ctx.frames, &class.name, method)?;
            if count > 0 {
                log::debug!(
                    "Inlined {} call sites into {}.{}",
                    count,
                    class.name,
                    method.signature()
                );
            }
            inlined += count;
        }
        Ok(inlined > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::FrameCache, engine::EngineConfig, ir::Annotation};

    #[test]
    fn test_strip_metadata() {
        let mut class = Class::new("demo/A", Some("java/lang/Object"));
        for desc in ["Lkotlin/Metadata;", "Ljava/lang/Deprecated;"] {
            class.visible_annotations.push(Annotation {
                desc: desc.to_string(),
                body: vec![0, 0],
            });
        }
        class.invisible_annotations.push(Annotation {
            desc: "Lkotlin/Metadata;".to_string(),
            body: vec![0, 0],
        });

        let frames = FrameCache::new();
        let config = EngineConfig::default();
        let ctx = PassContext::new(&frames, &config);
        let pass = StripMetadataPass::new(config.strip_annotations.clone());

        assert!(pass.should_run(&class, &ctx));
        assert!(pass.run(&mut class, &ctx).unwrap());
        assert_eq!(class.visible_annotations.len(), 1);
        assert_eq!(class.visible_annotations[0].desc, "Ljava/lang/Deprecated;");
        assert_eq!(class.invisible_annotations.len(), 1);
        assert!(!pass.run(&mut class, &ctx).unwrap());
    }
}
