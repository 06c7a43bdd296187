//! Abstract values tracked by the analyzer.
//!
//! An [`AbstractValue`] combines three views of one stack or local slot:
//!
//! - its verifier-level kind ([`BasicType`]),
//! - the instructions that may have produced it (its sources),
//! - a statically known literal, if any ([`Constant`]).
//!
//! The instructions consuming a value are not stored on the value itself. Values point
//! into a [`crate::analysis::UsageTable`] through a [`UsageKey`], so values merged at a
//! control-flow join share one usage set.

use std::{cell::RefCell, collections::BTreeSet, fmt, rc::Rc};

use strum::Display;

use crate::{
    analysis::usages::UsageKey,
    ir::{opcodes, InsnId, Type},
};

/// Shared handle to an abstract value. Frames compare values by pointer identity.
pub type ValueRef = Rc<AbstractValue>;

/// Verifier-level kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BasicType {
    /// Unknown, or the result of merging different kinds
    Uninitialized,
    /// `int` and the smaller integral types
    Int,
    /// `float`
    Float,
    /// `long`
    Long,
    /// `double`
    Double,
    /// Any object or array reference, including `null`
    Reference,
    /// Subroutine return address
    ReturnAddress,
}

impl BasicType {
    /// Maps a descriptor type to its kind, `None` for void.
    #[must_use]
    pub fn of(ty: &Type) -> Option<BasicType> {
        Some(match ty {
            Type::Void => return None,
            Type::Boolean | Type::Char | Type::Byte | Type::Short | Type::Int => BasicType::Int,
            Type::Float => BasicType::Float,
            Type::Long => BasicType::Long,
            Type::Double => BasicType::Double,
            Type::Object(_) | Type::Array(_) => BasicType::Reference,
        })
    }

    /// Stack words occupied by a value of this kind.
    #[must_use]
    pub fn size(self) -> u16 {
        match self {
            BasicType::Long | BasicType::Double => 2,
            _ => 1,
        }
    }

    /// Opcode storing this kind to a local, `None` if it has no store form.
    #[must_use]
    pub fn store_opcode(self) -> Option<u8> {
        self.opcode_offset().map(|off| opcodes::ISTORE + off)
    }

    /// Opcode loading this kind from a local, `None` if it has no load form.
    #[must_use]
    pub fn load_opcode(self) -> Option<u8> {
        self.opcode_offset().map(|off| opcodes::ILOAD + off)
    }

    fn opcode_offset(self) -> Option<u8> {
        match self {
            BasicType::Int => Some(0),
            BasicType::Long => Some(1),
            BasicType::Float => Some(2),
            BasicType::Double => Some(3),
            BasicType::Reference => Some(4),
            BasicType::Uninitialized | BasicType::ReturnAddress => None,
        }
    }
}

/// A string builder under construction.
///
/// Copies of the handle share the buffer. Appends made through one handle are visible
/// through all of them, which is how the analyzer follows `new StringBuilder().append(..)`
/// chains.
#[derive(Clone, Default)]
pub struct StringBuilderLiteral(Rc<RefCell<String>>);

impl StringBuilderLiteral {
    /// Creates a builder holding `initial`.
    #[must_use]
    pub fn new(initial: &str) -> Self {
        StringBuilderLiteral(Rc::new(RefCell::new(initial.to_string())))
    }

    /// Appends `text` to the shared buffer.
    pub fn append(&self, text: &str) {
        self.0.borrow_mut().push_str(text);
    }

    /// Current contents of the buffer.
    #[must_use]
    pub fn contents(&self) -> String {
        self.0.borrow().clone()
    }

    /// A builder with the same contents and its own buffer.
    #[must_use]
    pub fn detached(&self) -> Self {
        StringBuilderLiteral::new(&self.0.borrow())
    }

    /// Whether both handles share one buffer.
    #[must_use]
    pub fn same_buffer(&self, other: &StringBuilderLiteral) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for StringBuilderLiteral {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other) || *self.0.borrow() == *other.0.borrow()
    }
}

impl fmt::Debug for StringBuilderLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringBuilder({:?})", self.0.borrow())
    }
}

/// A literal known at analysis time.
#[derive(Debug, Clone)]
pub enum Constant {
    /// `int` (also `boolean`, `byte`, `char`, `short`)
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// A string
    String(Rc<str>),
    /// A class literal
    Class(String),
    /// The `null` reference
    Null,
    /// A string builder accumulator
    Builder(StringBuilderLiteral),
}

impl PartialEq for Constant {
    /// Exact equality. Floating point literals compare by bit pattern, so `NaN` equals
    /// itself and `0.0` differs from `-0.0`.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Class(a), Constant::Class(b)) => a == b,
            (Constant::Null, Constant::Null) => true,
            (Constant::Builder(a), Constant::Builder(b)) => a == b,
            _ => false,
        }
    }
}

impl Constant {
    /// Creates a string literal.
    #[must_use]
    pub fn string(value: &str) -> Constant {
        Constant::String(Rc::from(value))
    }

    /// The string literal, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    /// The int literal, if this is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Constant::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// One tracked stack or local slot.
#[derive(Debug)]
pub struct AbstractValue {
    pub(crate) ty: BasicType,
    pub(crate) sources: BTreeSet<InsnId>,
    pub(crate) usages: UsageKey,
    pub(crate) constant: Option<Constant>,
}

impl AbstractValue {
    /// Verifier-level kind.
    #[must_use]
    pub fn basic_type(&self) -> BasicType {
        self.ty
    }

    /// Stack words occupied.
    #[must_use]
    pub fn size(&self) -> u16 {
        self.ty.size()
    }

    /// Instructions that may have produced this value.
    #[must_use]
    pub fn sources(&self) -> &BTreeSet<InsnId> {
        &self.sources
    }

    /// Key of this value's usage class in the owning [`crate::analysis::UsageTable`].
    #[must_use]
    pub fn usage_key(&self) -> UsageKey {
        self.usages
    }

    /// Statically known literal.
    #[must_use]
    pub fn constant(&self) -> Option<&Constant> {
        self.constant.as_ref()
    }

    /// Equality as seen by the fixpoint: kind, sources and literal. Usage sets are
    /// unified by merging and never make two values differ.
    #[must_use]
    pub fn same_state(&self, other: &AbstractValue) -> bool {
        self.ty == other.ty && self.sources == other.sources && self.constant == other.constant
    }
}
