//! Inlining of calls into trusted library code.
//!
//! Every call whose owner lies in a trusted namespace is replaced by a private copy of
//! the callee body:
//!
//! 1. the arguments (and receiver) on the stack are stored into fresh locals above
//!    everything the caller uses,
//! 2. the body follows with its locals renumbered into that range and its line
//!    markers removed,
//! 3. every return stores the result into a dedicated slot and jumps to a shared
//!    exit label, after which the result is loaded back onto the stack.
//!
//! Callee bodies are themselves fully inlined before use and memoized per target,
//! keyed by `owner.name+desc` since resolvers may hand out a freshly parsed class on
//! every lookup. A target that is reached again while it is being inlined is
//! recursive; it is marked non-inlinable for the rest of the run and its call sites
//! stay untouched.

use std::{collections::HashSet, sync::Arc};

use dashmap::{DashMap, DashSet};
use strum::Display;

use crate::{
    analysis::{Analysis, FrameCache},
    ir::{
        opcodes::*, Class, Insn, InsnKind, LabelId, LocalVariable, Method, MethodDescriptor,
        TryCatchBlock, Type,
    },
    resolver::ResolverChain,
    rewrite::EditBatch,
    Result,
};

/// Namespaces whose code may be copied into callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    prefixes: Vec<String>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        TrustPolicy::new(["kotlin/", "dekotlin/surrogate/"])
    }
}

impl TrustPolicy {
    /// Trusts every internal name starting with one of `prefixes`.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TrustPolicy {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Trusted namespace prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether `class` lies in a trusted namespace.
    #[must_use]
    pub fn is_trusted(&self, class: &str) -> bool {
        self.prefixes.iter().any(|prefix| class.starts_with(prefix.as_str()))
    }

    /// Whether calls to `name` declared in `class` are inlining candidates.
    /// Constructors and static initializers never are.
    #[must_use]
    pub fn should_inline(&self, class: &str, name: &str) -> bool {
        !name.starts_with('<') && self.is_trusted(class)
    }
}

/// Why a call site was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InlineSkip {
    /// The owner is outside the trusted namespaces, or the target is a constructor
    #[strum(serialize = "untrusted target")]
    Untrusted,
    /// No class in the lookup chain declares the method
    #[strum(serialize = "unresolved target")]
    Unresolved,
    /// The resolved method has no body
    #[strum(serialize = "target has no body")]
    NoBody,
    /// The target is already being inlined further up the chain
    #[strum(serialize = "recursive call")]
    Recursive,
    /// The target was found to be recursive earlier
    #[strum(serialize = "target marked non-inlinable")]
    NonInlinable,
}

/// One planned splice.
struct Splice {
    insns: Vec<Insn>,
    try_catch_blocks: Vec<TryCatchBlock>,
    local_variables: Vec<LocalVariable>,
}

/// Inlines calls into trusted namespaces.
///
/// The memo of inlined bodies and the set of recursive targets are shared and may be
/// used from several threads; analysis caches are passed in per call.
pub struct FunctionInliner {
    resolver: Arc<ResolverChain>,
    policy: TrustPolicy,
    memo: DashMap<String, Arc<Method>>,
    non_inlinable: DashSet<String>,
}

impl FunctionInliner {
    /// Creates an inliner resolving targets through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<ResolverChain>, policy: TrustPolicy) -> Self {
        FunctionInliner {
            resolver,
            policy,
            memo: DashMap::new(),
            non_inlinable: DashSet::new(),
        }
    }

    /// The trust policy in use.
    #[must_use]
    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Whether the method `name` + `desc` declared in `owner` was found to be recursive.
    #[must_use]
    pub fn is_non_inlinable(&self, owner: &str, name: &str, desc: &str) -> bool {
        self.non_inlinable.contains(&target_key(owner, name, desc))
    }

    /// Drops memoized bodies and recursion marks.
    pub fn clear(&self) {
        self.memo.clear();
        self.non_inlinable.clear();
    }

    /// Inlines every eligible call in `method`, declared in `owner`, until none is
    /// left. Returns the number of call sites replaced.
    ///
    /// # Errors
    /// Returns [`crate::Error::Analysis`] if the caller or a callee body cannot be
    /// analyzed, and editor errors if a splice cannot be applied.
    pub fn inline_method(
        &self,
        cache: &FrameCache,
        owner: &str,
        method: &mut Method,
    ) -> Result<usize> {
        let mut chain = HashSet::new();
        self.inline_into(cache, owner, method, &mut chain)
    }

    fn inline_into(
        &self,
        cache: &FrameCache,
        owner: &str,
        method: &mut Method,
        chain: &mut HashSet<String>,
    ) -> Result<usize> {
        let mut total = 0;
        loop {
            let inlined = self.inline_round(cache, owner, method, chain)?;
            if inlined == 0 {
                return Ok(total);
            }
            total += inlined;
        }
    }

    /// One traversal of `method`, splicing every call site that can be inlined now.
    fn inline_round(
        &self,
        cache: &FrameCache,
        owner: &str,
        method: &mut Method,
        chain: &mut HashSet<String>,
    ) -> Result<usize> {
        if !method
            .instructions
            .iter()
            .any(|insn| {
                matches!(
                    &insn.kind,
                    InsnKind::Method { owner, name, .. } if self.policy.should_inline(owner, name)
                )
            })
        {
            return Ok(0);
        }

        let mut try_catch_blocks = Vec::new();
        let mut local_variables = Vec::new();
        let mut inlined = 0;

        let batch = {
            let analysis = Analysis::new(cache, owner, method)?;
            EditBatch::collect(&method.instructions, |cursor, insn, _| {
                let InsnKind::Method {
                    opcode,
                    owner: target_owner,
                    name,
                    desc,
                    ..
                } = &insn.kind
                else {
                    return Ok(());
                };

                let body = match self.prepare(cache, *opcode, target_owner, name, desc, chain)? {
                    Ok(body) => body,
                    Err(InlineSkip::Untrusted) => return Ok(()),
                    Err(skip) => {
                        log::debug!(
                            "not inlining {}.{}{} into {}.{}: {}",
                            target_owner,
                            name,
                            desc,
                            owner,
                            method.signature(),
                            skip
                        );
                        return Ok(());
                    }
                };

                let splice = self.splice(&analysis, insn, *opcode, desc, body)?;
                cursor.replace(splice.insns)?;
                try_catch_blocks.extend(splice.try_catch_blocks);
                local_variables.extend(splice.local_variables);
                inlined += 1;
                log::debug!(
                    "inlined {}.{}{} into {}.{}",
                    target_owner,
                    name,
                    desc,
                    owner,
                    method.signature()
                );
                Ok(())
            })?
        };

        if inlined > 0 {
            batch.apply(&mut method.instructions)?;
            // Callee handlers are nested inside any caller handler covering the call
            // site, so they must be matched first.
            try_catch_blocks.append(&mut method.try_catch_blocks);
            method.try_catch_blocks = try_catch_blocks;
            method.local_variables.append(&mut local_variables);
            method.mark_modified();
        }
        Ok(inlined)
    }

    /// Resolves a call target and returns a private, fully inlined copy of its body.
    fn prepare(
        &self,
        cache: &FrameCache,
        opcode: u8,
        owner: &str,
        name: &str,
        desc: &str,
        chain: &mut HashSet<String>,
    ) -> Result<std::result::Result<Method, InlineSkip>> {
        if !self.policy.should_inline(owner, name) {
            return Ok(Err(InlineSkip::Untrusted));
        }
        let (class, index) = match self.resolve(opcode, owner, name, desc) {
            Ok(found) => found,
            Err(skip) => return Ok(Err(skip)),
        };
        let key = target_key(&class.name, name, desc);
        if self.non_inlinable.contains(&key) {
            return Ok(Err(InlineSkip::NonInlinable));
        }
        if chain.contains(&key) {
            self.non_inlinable.insert(key);
            return Ok(Err(InlineSkip::Recursive));
        }

        chain.insert(key.clone());
        let body = self.inlined_body(cache, &class, index, &key, chain);
        chain.remove(&key);
        Ok(Ok(Method::clone(&*body?)))
    }

    fn inlined_body(
        &self,
        cache: &FrameCache,
        class: &Class,
        index: usize,
        key: &str,
        chain: &mut HashSet<String>,
    ) -> Result<Arc<Method>> {
        if let Some(body) = self.memo.get(key) {
            return Ok(body.clone());
        }
        let mut body = class.methods[index].clone();
        let inlined = self.inline_into(cache, &class.name, &mut body, chain);
        cache.invalidate(body.id());
        inlined?;
        let body = Arc::new(body);
        self.memo.insert(key.to_string(), body.clone());
        Ok(body)
    }

    /// Finds the declaration a call dispatches to, walking up trusted superclasses for
    /// virtual calls.
    fn resolve(
        &self,
        opcode: u8,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> std::result::Result<(Arc<Class>, usize), InlineSkip> {
        let mut class = self.resolver.resolve(owner).ok_or(InlineSkip::Unresolved)?;
        loop {
            if let Some(index) = class
                .methods
                .iter()
                .position(|method| method.name == name && method.desc == desc)
            {
                if class.methods[index].instructions.is_empty() {
                    return Err(InlineSkip::NoBody);
                }
                return Ok((class, index));
            }

            if opcode == INVOKESTATIC || opcode == INVOKESPECIAL {
                return Err(InlineSkip::Unresolved);
            }
            let super_name = class.super_name.clone().ok_or(InlineSkip::Unresolved)?;
            if !self.policy.should_inline(&super_name, name) {
                return Err(InlineSkip::Unresolved);
            }
            class = self
                .resolver
                .resolve(&super_name)
                .ok_or(InlineSkip::Unresolved)?;
        }
    }

    /// Builds the replacement for `call` from a private copy of the callee body.
    fn splice(
        &self,
        analysis: &Analysis<'_>,
        call: &Insn,
        opcode: u8,
        desc: &str,
        mut body: Method,
    ) -> Result<Splice> {
        let descriptor = MethodDescriptor::parse(desc)?;
        let return_type = &descriptor.return_type;
        let returns_value = *return_type != Type::Void;
        let return_slot = analysis.next_free_local(call.id());
        let offset = return_slot + return_type.size();
        let relocate = |var: u16| {
            var.checked_add(offset).ok_or_else(|| {
                malformed_error!("Local {} cannot be moved past slot {}", var, offset)
            })
        };

        let exit = LabelId::new();
        let mut exit_used = false;
        let callee = body.instructions.take();
        let last = callee.len().saturating_sub(1);
        let mut insns = Vec::with_capacity(callee.len() + descriptor.arguments.len() + 3);

        let receiver = opcode != INVOKESTATIC;
        let mut slot = offset + u16::from(receiver);
        let mut stores: Vec<Insn> = descriptor
            .arguments
            .iter()
            .map(|argument| {
                let store = Insn::var(argument.store_opcode(), slot);
                slot += argument.size();
                store
            })
            .collect();
        stores.reverse();
        insns.extend(stores);
        if receiver {
            insns.push(Insn::var(ASTORE, offset));
        }

        for (index, mut insn) in callee.into_iter().enumerate() {
            match &mut insn.kind {
                InsnKind::Simple(op) if is_return(*op) => {
                    if returns_value {
                        insns.push(Insn::var(return_type.store_opcode(), return_slot));
                    }
                    if index != last {
                        exit_used = true;
                        insns.push(Insn::jump(GOTO, exit));
                    }
                    continue;
                }
                InsnKind::Var { var, .. } | InsnKind::Iinc { var, .. } => *var = relocate(*var)?,
                InsnKind::LineNumber { .. } => continue,
                _ => {}
            }
            insns.push(insn);
        }

        if exit_used {
            insns.push(Insn::label(exit));
        }
        if returns_value {
            insns.push(Insn::var(return_type.load_opcode(), return_slot));
        }

        let mut local_variables = std::mem::take(&mut body.local_variables);
        for local in &mut local_variables {
            local.index = relocate(local.index)?;
        }

        Ok(Splice {
            insns,
            try_catch_blocks: std::mem::take(&mut body.try_catch_blocks),
            local_variables,
        })
    }
}

fn target_key(owner: &str, name: &str, desc: &str) -> String {
    format!("{}.{}{}", owner, name, desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_policy() {
        let policy = TrustPolicy::default();
        assert!(policy.should_inline("kotlin/collections/CollectionsKt", "listOf"));
        assert!(policy.should_inline("dekotlin/surrogate/Intrinsics", "check"));
        assert!(!policy.should_inline("kotlin/Pair", "<init>"));
        assert!(!policy.should_inline("java/lang/String", "length"));
        assert!(!policy.is_trusted("kotlinx/coroutines/Job"));
    }

    #[test]
    fn test_skip_reasons_display() {
        assert_eq!(InlineSkip::Recursive.to_string(), "recursive call");
        assert_eq!(InlineSkip::NoBody.to_string(), "target has no body");
    }
}
