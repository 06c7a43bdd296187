//! Methods, their exception tables and debug local-variable tables.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;

use crate::{
    ir::{Attribute, InsnList, LabelId, MethodDescriptor},
    Result,
};

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method access and property flags
    pub struct MethodAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final
        const FINAL = 0x0010;
        /// Declared synchronized
        const SYNCHRONIZED = 0x0020;
        /// Compiler generated bridge method
        const BRIDGE = 0x0040;
        /// Variable arity
        const VARARGS = 0x0080;
        /// Implemented in native code
        const NATIVE = 0x0100;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Declared strictfp
        const STRICT = 0x0800;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
    }
}

/// Identity of one [`Method`] object.
///
/// Analysis results and inlined bodies are cached by this identity. Cloning a method
/// produces a new object and therefore a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

impl MethodId {
    fn next() -> Self {
        MethodId(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// One entry of the exception table. The range covers `start` up to, not including, `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// First covered position
    pub start: LabelId,
    /// End of the covered range (exclusive)
    pub end: LabelId,
    /// Handler entry point
    pub handler: LabelId,
    /// Internal name of the caught type, `None` catches everything
    pub catch_type: Option<String>,
}

/// One entry of the debug local-variable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Source name
    pub name: String,
    /// Field descriptor
    pub desc: String,
    /// Generic signature, if recorded
    pub signature: Option<String>,
    /// Start of the live range
    pub start: LabelId,
    /// End of the live range (exclusive)
    pub end: LabelId,
    /// Local slot
    pub index: u16,
}

/// A method and its body.
///
/// `max_stack == None` means the stack height is unknown and must be recomputed; this
/// is the state after any structural edit. Call [`Method::mark_modified`] after editing
/// [`Method::instructions`] so cached analysis results are dropped.
#[derive(Debug)]
pub struct Method {
    id: MethodId,
    revision: u64,
    /// Access flags
    pub access: MethodAccess,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub desc: String,
    /// Body, empty for abstract and native methods
    pub instructions: InsnList,
    /// Number of local slots
    pub max_locals: u16,
    /// Maximum operand stack height, `None` when unknown
    pub max_stack: Option<u16>,
    /// Exception table in declaration order
    pub try_catch_blocks: Vec<TryCatchBlock>,
    /// Debug local-variable table
    pub local_variables: Vec<LocalVariable>,
    /// Attributes other than `Code`, kept opaque
    pub attributes: Vec<Attribute>,
}

impl Method {
    /// Creates a method without a body.
    #[must_use]
    pub fn new(access: MethodAccess, name: &str, desc: &str) -> Self {
        Method {
            id: MethodId::next(),
            revision: 0,
            access,
            name: name.to_string(),
            desc: desc.to_string(),
            instructions: InsnList::new(),
            max_locals: 0,
            max_stack: None,
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Identity of this method object.
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Incremented by every [`Method::mark_modified`].
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// Parses [`Method::desc`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn descriptor(&self) -> Result<MethodDescriptor> {
        MethodDescriptor::parse(&self.desc)
    }

    /// Records a structural edit: cached analysis becomes stale and the maximum
    /// stack height unknown.
    pub fn mark_modified(&mut self) {
        self.revision += 1;
        self.max_stack = None;
    }

    /// `name` followed by `desc`, the form used in diagnostics.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.desc)
    }
}

impl Clone for Method {
    /// Deep copy with fresh instruction and label identities.
    ///
    /// Labels are remapped consistently through jumps, switches, line numbers, the
    /// exception table and the local-variable table.
    fn clone(&self) -> Self {
        let mut labels: HashMap<LabelId, LabelId> = HashMap::new();
        let mut remap = |label: LabelId| *labels.entry(label).or_insert_with(LabelId::new);

        let instructions = self
            .instructions
            .iter()
            .map(|insn| {
                let mut copy = insn.fresh();
                copy.remap_labels(&mut remap);
                copy
            })
            .collect();

        let try_catch_blocks = self
            .try_catch_blocks
            .iter()
            .map(|tcb| TryCatchBlock {
                start: remap(tcb.start),
                end: remap(tcb.end),
                handler: remap(tcb.handler),
                catch_type: tcb.catch_type.clone(),
            })
            .collect();

        let local_variables = self
            .local_variables
            .iter()
            .map(|local| LocalVariable {
                start: remap(local.start),
                end: remap(local.end),
                ..local.clone()
            })
            .collect();

        Method {
            id: MethodId::next(),
            revision: 0,
            access: self.access,
            name: self.name.clone(),
            desc: self.desc.clone(),
            instructions,
            max_locals: self.max_locals,
            max_stack: self.max_stack,
            try_catch_blocks,
            local_variables,
            attributes: self.attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{opcodes, Insn, InsnKind};

    #[test]
    fn test_clone_remaps_identities() {
        let (start, end, handler) = (LabelId::new(), LabelId::new(), LabelId::new());
        let mut method = Method::new(MethodAccess::STATIC, "f", "()V");
        method.instructions.extend([
            Insn::label(start),
            Insn::jump(opcodes::GOTO, end),
            Insn::label(end),
            Insn::simple(opcodes::RETURN),
            Insn::label(handler),
            Insn::simple(opcodes::ATHROW),
        ]);
        method.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: None,
        });

        let copy = method.clone();
        assert_ne!(copy.id(), method.id());
        for (a, b) in method.instructions.iter().zip(copy.instructions.iter()) {
            assert_ne!(a.id(), b.id());
        }

        let InsnKind::Jump { target, .. } = copy.instructions.get(1).unwrap().kind else {
            panic!("expected jump");
        };
        assert_ne!(target, end);
        assert_eq!(copy.instructions.label_index(target), Some(2));

        let tcb = &copy.try_catch_blocks[0];
        assert_eq!(tcb.end, target);
        assert_eq!(copy.instructions.label_index(tcb.start), Some(0));
        assert_eq!(copy.instructions.label_index(tcb.handler), Some(4));
    }

    #[test]
    fn test_mark_modified() {
        let mut method = Method::new(MethodAccess::empty(), "g", "(I)I");
        method.max_stack = Some(3);
        let before = method.revision();
        method.mark_modified();
        assert_eq!(method.max_stack, None);
        assert_eq!(method.revision(), before + 1);
        assert!(!method.is_static());
        assert_eq!(method.signature(), "g(I)I");
    }
}
