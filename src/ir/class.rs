//! Classes, their fields and class-level annotations.

use std::sync::Arc;

use bitflags::bitflags;

use crate::ir::Method;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Class access and property flags
    pub struct ClassAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final
        const FINAL = 0x0010;
        /// Treat superclass methods specially on `INVOKESPECIAL`
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Is an annotation interface
        const ANNOTATION = 0x2000;
        /// Is an enum class
        const ENUM = 0x4000;
        /// Is a module descriptor
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field access and property flags
    pub struct FieldAccess: u16 {
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
        /// Declared volatile
        const VOLATILE = 0x0040;
        /// Declared transient
        const TRANSIENT = 0x0080;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Element of an enum class
        const ENUM = 0x4000;
    }
}

/// An attribute the model does not interpret.
///
/// Constant pool indices inside `data` refer to the pool of the class file the
/// attribute was read from, which the writer keeps in place (see [`ClassSource`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name, e.g. `Signature`
    pub name: String,
    /// Attribute body, after the name and length
    pub data: Vec<u8>,
}

/// A declared field. Fields are carried through rewriting unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Access flags
    pub access: FieldAccess,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub desc: String,
    /// Attributes, kept opaque
    pub attributes: Vec<Attribute>,
}

/// Constant pool and bootstrap table of the class file a [`Class`] was parsed from.
///
/// When a class is written back, this pool is emitted first and unchanged, and new
/// constants are appended after it. Opaque attributes and annotation bodies therefore
/// stay valid.
#[derive(Debug, Clone, Default)]
pub struct ClassSource {
    /// `constant_pool_count` followed by the raw entries
    pub(crate) pool: Vec<u8>,
    /// `BootstrapMethods` entries: handle index and argument indices
    pub(crate) bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

/// A class-level annotation. Only the type is decoded; the element values stay raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Annotation type descriptor, e.g. `Lkotlin/Metadata;`
    pub desc: String,
    /// Encoded `element_value_pairs`
    pub body: Vec<u8>,
}

/// A parsed class.
#[derive(Debug, Clone)]
pub struct Class {
    /// Class file major version
    pub major_version: u16,
    /// Class file minor version
    pub minor_version: u16,
    /// Access flags
    pub access: ClassAccess,
    /// Internal name (`a/b/C`)
    pub name: String,
    /// Internal name of the superclass, `None` only for `java/lang/Object`
    pub super_name: Option<String>,
    /// Directly implemented interfaces
    pub interfaces: Vec<String>,
    /// Declared fields
    pub fields: Vec<Field>,
    /// Declared methods
    pub methods: Vec<Method>,
    /// `RuntimeVisibleAnnotations`
    pub visible_annotations: Vec<Annotation>,
    /// `RuntimeInvisibleAnnotations`
    pub invisible_annotations: Vec<Annotation>,
    /// Other class attributes, kept opaque
    pub attributes: Vec<Attribute>,
    /// Pool of the parsed class file, `None` for classes built in memory
    pub source: Option<Arc<ClassSource>>,
}

impl Class {
    /// Creates an empty class extending `super_name`.
    #[must_use]
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        Class {
            major_version: 52,
            minor_version: 0,
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            attributes: Vec::new(),
            source: None,
        }
    }

    /// Finds a declared method by name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, desc: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.desc == desc)
    }

    /// Mutable variant of [`Class::method`].
    pub fn method_mut(&mut self, name: &str, desc: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.desc == desc)
    }

    /// Package part of the internal name, with its trailing `/`, empty for the default package.
    #[must_use]
    pub fn package(&self) -> &str {
        self.name.rfind('/').map_or("", |pos| &self.name[..=pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::MethodAccess;

    #[test]
    fn test_method_lookup() {
        let mut class = Class::new("kotlin/collections/ArraysKt", Some("java/lang/Object"));
        class
            .methods
            .push(Method::new(MethodAccess::STATIC, "first", "([I)I"));
        class
            .methods
            .push(Method::new(MethodAccess::STATIC, "first", "([J)J"));

        assert_eq!(class.method("first", "([J)J").unwrap().desc, "([J)J");
        assert!(class.method("first", "([D)D").is_none());
        assert_eq!(class.package(), "kotlin/collections/");
        assert_eq!(Class::new("Main", None).package(), "");
    }
}
