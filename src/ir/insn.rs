//! Instructions and instruction sequences.
//!
//! Instructions follow the tree model of the class file format: one node per
//! bytecode instruction plus pseudo nodes for labels and line numbers. Every node
//! carries an [`InsnId`] allocated when it is constructed. The analyzer and the
//! rewriter key everything by that identity; two structurally equal nodes are still
//! two different instructions.
//!
//! # Key Components
//!
//! - [`InsnId`] / [`LabelId`] - process-unique identities
//! - [`Insn`] / [`InsnKind`] - one node and its operands
//! - [`InsnList`] - the ordered instruction sequence of a method body

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::ir::opcodes;

static NEXT_INSN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LABEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one instruction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(u64);

impl InsnId {
    /// Allocates a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        InsnId(NEXT_INSN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InsnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a code position that jumps, handlers and debug ranges refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u64);

impl LabelId {
    /// Allocates a fresh label.
    #[must_use]
    pub fn new() -> Self {
        LabelId(NEXT_LABEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LabelId {
    fn default() -> Self {
        Self::new()
    }
}

/// Method handle reference kinds (`REF_getField` .. `REF_invokeInterface`).
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    /// Reference kind, 1..=9
    pub kind: u8,
    /// Internal name of the owning class
    pub owner: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub desc: String,
    /// Whether the owner is an interface
    pub is_interface: bool,
}

/// A loadable constant, used by `LDC` and bootstrap arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum LdcValue {
    /// `int`, also used for `boolean`, `byte`, `char` and `short`
    Int(i32),
    /// `float`
    Float(f32),
    /// `long`
    Long(i64),
    /// `double`
    Double(f64),
    /// `java.lang.String`
    String(String),
    /// Class literal, as a descriptor or internal name
    Class(String),
    /// `java.lang.invoke.MethodType`
    MethodType(String),
    /// `java.lang.invoke.MethodHandle`
    Handle(Handle),
    /// Dynamically computed constant
    Dynamic {
        /// Constant name
        name: String,
        /// Field descriptor of the constant
        desc: String,
        /// Bootstrap method
        bsm: Handle,
        /// Static bootstrap arguments
        bsm_args: Vec<LdcValue>,
    },
}

/// Operands of one instruction node.
#[derive(Debug, Clone, PartialEq)]
pub enum InsnKind {
    /// Instruction without operands (`IADD`, `DUP`, `ARETURN`, ...).
    Simple(u8),
    /// `BIPUSH`, `SIPUSH` or `NEWARRAY`.
    Int {
        /// Opcode
        opcode: u8,
        /// Immediate value or array type code
        operand: i32,
    },
    /// Local variable load, store or `RET`.
    Var {
        /// Opcode (`xLOAD`, `xSTORE`, `RET`), never the `_<n>` short forms
        opcode: u8,
        /// Local slot
        var: u16,
    },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST`, `INSTANCEOF`.
    Type {
        /// Opcode
        opcode: u8,
        /// Internal name or array descriptor
        desc: String,
    },
    /// Field access.
    Field {
        /// Opcode
        opcode: u8,
        /// Owner internal name
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        desc: String,
    },
    /// `INVOKEVIRTUAL`, `INVOKESPECIAL`, `INVOKESTATIC` or `INVOKEINTERFACE`.
    Method {
        /// Opcode
        opcode: u8,
        /// Owner internal name
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        desc: String,
        /// Whether the owner is an interface
        is_interface: bool,
    },
    /// `INVOKEDYNAMIC`.
    InvokeDynamic {
        /// Call site name
        name: String,
        /// Call site descriptor
        desc: String,
        /// Bootstrap method
        bsm: Handle,
        /// Static bootstrap arguments
        bsm_args: Vec<LdcValue>,
    },
    /// Conditional or unconditional branch.
    Jump {
        /// Opcode
        opcode: u8,
        /// Branch target
        target: LabelId,
    },
    /// A position other nodes can refer to.
    Label(LabelId),
    /// `LDC`, `LDC_W` and `LDC2_W`.
    Ldc(LdcValue),
    /// `IINC`.
    Iinc {
        /// Local slot
        var: u16,
        /// Signed increment
        incr: i16,
    },
    /// `TABLESWITCH`.
    TableSwitch {
        /// Lowest key
        min: i32,
        /// Highest key
        max: i32,
        /// Default target
        default: LabelId,
        /// One target per key in `min..=max`
        targets: Vec<LabelId>,
    },
    /// `LOOKUPSWITCH`.
    LookupSwitch {
        /// Default target
        default: LabelId,
        /// Sorted keys
        keys: Vec<i32>,
        /// One target per key
        targets: Vec<LabelId>,
    },
    /// `MULTIANEWARRAY`.
    MultiANewArray {
        /// Array descriptor
        desc: String,
        /// Number of dimensions popped
        dims: u8,
    },
    /// Source line marker starting at a label.
    LineNumber {
        /// Source line
        line: u16,
        /// First instruction of the line
        start: LabelId,
    },
}

/// One instruction node.
///
/// Cloning an `Insn` keeps its identity. Use [`Insn::fresh`] to obtain a copy that is
/// a different instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    id: InsnId,
    /// Opcode and operands
    pub kind: InsnKind,
}

impl Insn {
    /// Wraps `kind` into a node with a fresh identity.
    #[must_use]
    pub fn new(kind: InsnKind) -> Self {
        Insn {
            id: InsnId::new(),
            kind,
        }
    }

    /// A copy of this node with a new identity.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Insn::new(self.kind.clone())
    }

    /// Identity of this node.
    #[must_use]
    pub fn id(&self) -> InsnId {
        self.id
    }

    /// The opcode, or `None` for labels and line numbers.
    #[must_use]
    pub fn opcode(&self) -> Option<u8> {
        match &self.kind {
            InsnKind::Simple(op) => Some(*op),
            InsnKind::Int { opcode, .. }
            | InsnKind::Var { opcode, .. }
            | InsnKind::Type { opcode, .. }
            | InsnKind::Field { opcode, .. }
            | InsnKind::Method { opcode, .. }
            | InsnKind::Jump { opcode, .. } => Some(*opcode),
            InsnKind::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            InsnKind::Ldc(_) => Some(opcodes::LDC),
            InsnKind::Iinc { .. } => Some(opcodes::IINC),
            InsnKind::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            InsnKind::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            InsnKind::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
            InsnKind::Label(_) | InsnKind::LineNumber { .. } => None,
        }
    }

    /// Returns `true` for labels and line numbers.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    /// Zero-operand instruction.
    #[must_use]
    pub fn simple(opcode: u8) -> Self {
        Insn::new(InsnKind::Simple(opcode))
    }

    /// `BIPUSH`, `SIPUSH` or `NEWARRAY`.
    #[must_use]
    pub fn int(opcode: u8, operand: i32) -> Self {
        Insn::new(InsnKind::Int { opcode, operand })
    }

    /// Local variable instruction.
    #[must_use]
    pub fn var(opcode: u8, var: u16) -> Self {
        Insn::new(InsnKind::Var { opcode, var })
    }

    /// Type instruction.
    #[must_use]
    pub fn type_insn(opcode: u8, desc: &str) -> Self {
        Insn::new(InsnKind::Type {
            opcode,
            desc: desc.to_string(),
        })
    }

    /// Field instruction.
    #[must_use]
    pub fn field(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Insn::new(InsnKind::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }

    /// Method invocation on a class owner.
    #[must_use]
    pub fn method(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Insn::new(InsnKind::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            is_interface: opcode == opcodes::INVOKEINTERFACE,
        })
    }

    /// Branch to `target`.
    #[must_use]
    pub fn jump(opcode: u8, target: LabelId) -> Self {
        Insn::new(InsnKind::Jump { opcode, target })
    }

    /// Label node.
    #[must_use]
    pub fn label(label: LabelId) -> Self {
        Insn::new(InsnKind::Label(label))
    }

    /// `LDC` of `value`.
    #[must_use]
    pub fn ldc(value: LdcValue) -> Self {
        Insn::new(InsnKind::Ldc(value))
    }

    /// `IINC`.
    #[must_use]
    pub fn iinc(var: u16, incr: i16) -> Self {
        Insn::new(InsnKind::Iinc { var, incr })
    }

    /// Pushes the int constant `value` with the shortest encoding.
    #[must_use]
    pub fn push_int(value: i32) -> Self {
        match value {
            -1..=5 => Insn::simple((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => Insn::int(opcodes::BIPUSH, value),
            -32768..=32767 => Insn::int(opcodes::SIPUSH, value),
            _ => Insn::ldc(LdcValue::Int(value)),
        }
    }

    /// Labels this node may transfer control to, in encounter order.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<LabelId> {
        match &self.kind {
            InsnKind::Jump { target, .. } => vec![*target],
            InsnKind::TableSwitch {
                default, targets, ..
            }
            | InsnKind::LookupSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrites every label this node refers to through `map`.
    pub fn remap_labels(&mut self, map: &mut impl FnMut(LabelId) -> LabelId) {
        match &mut self.kind {
            InsnKind::Jump { target, .. } => *target = map(*target),
            InsnKind::Label(label) => *label = map(*label),
            InsnKind::LineNumber { start, .. } => *start = map(*start),
            InsnKind::TableSwitch {
                default, targets, ..
            }
            | InsnKind::LookupSwitch {
                default, targets, ..
            } => {
                *default = map(*default);
                for target in targets.iter_mut() {
                    *target = map(*target);
                }
            }
            _ => {}
        }
    }
}

/// The ordered instruction sequence of a method body.
///
/// Positions are never cached across edits: [`InsnList::index_of`] searches the current
/// sequence. Structural edits are made through [`crate::rewrite::EditBatch`]; the
/// construction helpers here only append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsnList {
    insns: Vec<Insn>,
}

impl InsnList {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes, pseudo nodes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Returns `true` if the sequence holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Node at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Insn> {
        self.insns.get(index)
    }

    /// Current position of the node `id`.
    #[must_use]
    pub fn index_of(&self, id: InsnId) -> Option<usize> {
        self.insns.iter().position(|insn| insn.id == id)
    }

    /// Position of the label node for `label`.
    #[must_use]
    pub fn label_index(&self, label: LabelId) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| matches!(insn.kind, InsnKind::Label(l) if l == label))
    }

    /// Iterates the nodes in program order.
    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    /// The nodes as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Insn] {
        &self.insns
    }

    /// Appends a node.
    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Insn> {
        self.insns.iter_mut()
    }

    pub(crate) fn replace_all(&mut self, insns: Vec<Insn>) {
        self.insns = insns;
    }

    pub(crate) fn take(&mut self) -> Vec<Insn> {
        std::mem::take(&mut self.insns)
    }
}

impl Extend<Insn> for InsnList {
    fn extend<T: IntoIterator<Item = Insn>>(&mut self, iter: T) {
        self.insns.extend(iter);
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        InsnList {
            insns: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Insn;
    type IntoIter = std::slice::Iter<'a, Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.iter()
    }
}

impl IntoIterator for InsnList {
    type Item = Insn;
    type IntoIter = std::vec::IntoIter<Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_not_structural() {
        let a = Insn::simple(opcodes::NOP);
        let b = Insn::simple(opcodes::NOP);
        assert_eq!(a.kind, b.kind);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.fresh().id(), a.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_push_int_encodings() {
        assert_eq!(Insn::push_int(-1).kind, InsnKind::Simple(opcodes::ICONST_M1));
        assert_eq!(Insn::push_int(5).kind, InsnKind::Simple(opcodes::ICONST_5));
        assert_eq!(
            Insn::push_int(100).kind,
            InsnKind::Int {
                opcode: opcodes::BIPUSH,
                operand: 100
            }
        );
        assert_eq!(
            Insn::push_int(-300).kind,
            InsnKind::Int {
                opcode: opcodes::SIPUSH,
                operand: -300
            }
        );
        assert_eq!(Insn::push_int(1 << 20).kind, InsnKind::Ldc(LdcValue::Int(1 << 20)));
    }

    #[test]
    fn test_index_lookup_and_labels() {
        let label = LabelId::new();
        let list: InsnList = vec![
            Insn::simple(opcodes::ICONST_0),
            Insn::jump(opcodes::IFEQ, label),
            Insn::label(label),
            Insn::simple(opcodes::RETURN),
        ]
        .into_iter()
        .collect();

        let jump = list.get(1).unwrap();
        assert_eq!(list.index_of(jump.id()), Some(1));
        assert_eq!(list.label_index(label), Some(2));
        assert_eq!(jump.branch_targets(), vec![label]);
        assert!(list.get(2).unwrap().is_pseudo());
        assert_eq!(list.get(3).unwrap().opcode(), Some(opcodes::RETURN));
    }

    #[test]
    fn test_remap_switch_labels() {
        let (a, b, c) = (LabelId::new(), LabelId::new(), LabelId::new());
        let mut insn = Insn::new(InsnKind::TableSwitch {
            min: 0,
            max: 1,
            default: a,
            targets: vec![b, c],
        });
        let replacement = LabelId::new();
        insn.remap_labels(&mut |l| if l == b { replacement } else { l });
        assert_eq!(insn.branch_targets(), vec![a, replacement, c]);
    }
}
