//! Field and method descriptors.
//!
//! A [`Type`] is parsed from the class file descriptor grammar (`I`, `J`,
//! `Ljava/lang/String;`, `[[D`, ...). Besides parsing it answers the questions the
//! rewriter keeps asking of a type: how many local slots it occupies and which load,
//! store or return opcode moves it.

use std::fmt;

use crate::{ir::opcodes, Result};

/// A JVM value type as named by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// `V`, only valid as a method return type
    Void,
    /// `Z`
    Boolean,
    /// `C`
    Char,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// `L<internal name>;`
    Object(String),
    /// `[<component>`, stored as the full array descriptor
    Array(String),
}

impl Type {
    /// Parses a single field descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is not exactly one type.
    pub fn parse(descriptor: &str) -> Result<Type> {
        let (ty, rest) = Self::parse_prefix(descriptor)?;
        if !rest.is_empty() {
            return Err(malformed_error!("Trailing data in descriptor '{}'", descriptor));
        }
        Ok(ty)
    }

    /// Shorthand for `Type::Object`.
    #[must_use]
    pub fn object(internal_name: &str) -> Type {
        Type::Object(internal_name.to_string())
    }

    fn parse_prefix(descriptor: &str) -> Result<(Type, &str)> {
        let Some(first) = descriptor.chars().next() else {
            return Err(malformed_error!("Empty descriptor"));
        };
        let rest = &descriptor[first.len_utf8()..];
        let ty = match first {
            'V' => Type::Void,
            'Z' => Type::Boolean,
            'C' => Type::Char,
            'B' => Type::Byte,
            'S' => Type::Short,
            'I' => Type::Int,
            'F' => Type::Float,
            'J' => Type::Long,
            'D' => Type::Double,
            'L' => {
                let Some(end) = rest.find(';') else {
                    return Err(malformed_error!("Unterminated object type in '{}'", descriptor));
                };
                return Ok((Type::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (component, after) = Self::parse_prefix(rest)?;
                if component == Type::Void {
                    return Err(malformed_error!("Array of void in '{}'", descriptor));
                }
                let consumed = descriptor.len() - after.len();
                return Ok((Type::Array(descriptor[..consumed].to_string()), after));
            }
            other => {
                return Err(malformed_error!(
                    "Unknown descriptor character '{}' in '{}'",
                    other,
                    descriptor
                ))
            }
        };
        Ok((ty, rest))
    }

    /// Number of local variable slots (and stack words) a value of this type occupies.
    #[must_use]
    pub fn size(&self) -> u16 {
        match self {
            Type::Void => 0,
            Type::Long | Type::Double => 2,
            _ => 1,
        }
    }

    /// Returns `true` for object and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Object(_) | Type::Array(_))
    }

    fn opcode_offset(&self) -> u8 {
        match self {
            Type::Long => 1,
            Type::Float => 2,
            Type::Double => 3,
            Type::Object(_) | Type::Array(_) => 4,
            _ => 0,
        }
    }

    /// The `xLOAD` opcode for this type.
    #[must_use]
    pub fn load_opcode(&self) -> u8 {
        opcodes::ILOAD + self.opcode_offset()
    }

    /// The `xSTORE` opcode for this type.
    #[must_use]
    pub fn store_opcode(&self) -> u8 {
        opcodes::ISTORE + self.opcode_offset()
    }

    /// The `xRETURN` opcode for this type, `RETURN` for void.
    #[must_use]
    pub fn return_opcode(&self) -> u8 {
        match self {
            Type::Void => opcodes::RETURN,
            _ => opcodes::IRETURN + self.opcode_offset(),
        }
    }

    /// The descriptor form of this type.
    #[must_use]
    pub fn descriptor(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("V"),
            Type::Boolean => f.write_str("Z"),
            Type::Char => f.write_str("C"),
            Type::Byte => f.write_str("B"),
            Type::Short => f.write_str("S"),
            Type::Int => f.write_str("I"),
            Type::Float => f.write_str("F"),
            Type::Long => f.write_str("J"),
            Type::Double => f.write_str("D"),
            Type::Object(name) => write!(f, "L{};", name),
            Type::Array(desc) => f.write_str(desc),
        }
    }
}

/// A parsed method descriptor `(<args>)<return>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Argument types in declaration order
    pub arguments: Vec<Type>,
    /// Return type, [`Type::Void`] for none
    pub return_type: Type,
}

impl MethodDescriptor {
    /// Parses a method descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on syntax errors or void arguments.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let Some(mut rest) = descriptor.strip_prefix('(') else {
            return Err(malformed_error!("Method descriptor '{}' lacks '('", descriptor));
        };

        let mut arguments = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            let (ty, after) = Type::parse_prefix(rest)?;
            if ty == Type::Void {
                return Err(malformed_error!("Void argument in '{}'", descriptor));
            }
            arguments.push(ty);
            rest = after;
        }

        Ok(MethodDescriptor {
            arguments,
            return_type: Type::parse(rest)?,
        })
    }

    /// Number of local slots the arguments occupy, including the receiver when
    /// `is_static` is false.
    #[must_use]
    pub fn argument_slots(&self, is_static: bool) -> u16 {
        let receiver = u16::from(!is_static);
        receiver + self.arguments.iter().map(Type::size).sum::<u16>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives_and_objects() {
        assert_eq!(Type::parse("I").unwrap(), Type::Int);
        assert_eq!(Type::parse("J").unwrap(), Type::Long);
        assert_eq!(
            Type::parse("Ljava/lang/String;").unwrap(),
            Type::object("java/lang/String")
        );
        assert_eq!(
            Type::parse("[[Ljava/lang/Object;").unwrap(),
            Type::Array("[[Ljava/lang/Object;".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Type::parse("").is_err());
        assert!(Type::parse("Q").is_err());
        assert!(Type::parse("Ljava/lang/String").is_err());
        assert!(Type::parse("II").is_err());
        assert!(Type::parse("[V").is_err());
    }

    #[test]
    fn test_method_descriptor() {
        let desc = MethodDescriptor::parse("(IJLjava/lang/String;[D)Z").unwrap();
        assert_eq!(desc.arguments.len(), 4);
        assert_eq!(desc.return_type, Type::Boolean);
        assert_eq!(desc.argument_slots(true), 5);
        assert_eq!(desc.argument_slots(false), 6);

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.arguments.is_empty());
        assert_eq!(void.return_type.size(), 0);

        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(V)V").is_err());
    }

    #[test]
    fn test_opcodes_for_types() {
        assert_eq!(Type::Int.load_opcode(), opcodes::ILOAD);
        assert_eq!(Type::Boolean.store_opcode(), opcodes::ISTORE);
        assert_eq!(Type::Long.store_opcode(), opcodes::LSTORE);
        assert_eq!(Type::Double.load_opcode(), opcodes::DLOAD);
        assert_eq!(Type::object("a/B").load_opcode(), opcodes::ALOAD);
        assert_eq!(Type::Float.return_opcode(), opcodes::FRETURN);
        assert_eq!(Type::Void.return_opcode(), opcodes::RETURN);
        assert_eq!(Type::Array("[I".into()).return_opcode(), opcodes::ARETURN);
    }

    #[test]
    fn test_display_round_trips() {
        for desc in ["I", "Ljava/lang/Object;", "[J", "V"] {
            assert_eq!(Type::parse(desc).unwrap().to_string(), desc);
        }
    }
}
