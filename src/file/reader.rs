//! Class file parsing.
//!
//! [`ClassReader`] turns the bytes of a class file into a [`Class`]. Method bodies are
//! decoded into instruction lists. Fields and the attributes the rewriting engine has
//! no use for are kept as raw bytes, together with the constant pool they refer to, so
//! that [`crate::file::ClassWriter`] can emit them again.

use std::{path::Path, sync::Arc};

use crate::{
    file::{
        code::{BootstrapMethod, CodeAttribute},
        constpool::ConstantPool,
        Parser,
    },
    ir::{
        Annotation, Attribute, Class, ClassAccess, ClassSource, Field, FieldAccess, Method,
        MethodAccess,
    },
    Error, Result,
};

const MAGIC: u32 = 0xCAFE_BABE;

/// Parser for the class file format.
///
/// ```rust,no_run
/// use dekotlin::file::ClassReader;
///
/// let class = ClassReader::from_file("build/classes/Example.class".as_ref())?;
/// for method in &class.methods {
///     println!("{}{}: {} instructions", method.name, method.desc, method.instructions.len());
/// }
/// # Ok::<(), dekotlin::Error>(())
/// ```
pub struct ClassReader<'a> {
    parser: Parser<'a>,
    pool: ConstantPool,
    pool_bytes: &'a [u8],
}

impl<'a> ClassReader<'a> {
    /// Parses a class from its bytes.
    ///
    /// # Errors
    /// Returns [`Error::Empty`] for empty input, [`Error::Malformed`] if the bytes are
    /// not a class file or a method body cannot be decoded, and
    /// [`Error::OutOfBounds`] for truncated input.
    pub fn parse(data: &'a [u8]) -> Result<Class> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid magic {:#010x}", magic));
        }
        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        let pool_start = parser.pos();
        let pool = ConstantPool::parse(&mut parser)?;
        let pool_bytes = &data[pool_start..parser.pos()];

        let mut reader = ClassReader {
            parser,
            pool,
            pool_bytes,
        };
        reader.read_class(major_version, minor_version)
    }

    /// Reads and parses a class file from disk.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read, otherwise see
    /// [`ClassReader::parse`].
    pub fn from_file(path: &Path) -> Result<Class> {
        let data = std::fs::read(path)?;
        ClassReader::parse(&data)
    }

    fn read_class(&mut self, major_version: u16, minor_version: u16) -> Result<Class> {
        let access = ClassAccess::from_bits_retain(self.parser.read_be()?);
        let name = self.pool.class_name(self.parser.read_be()?)?.to_string();
        let super_name = match self.parser.read_be::<u16>()? {
            0 => None,
            index => Some(self.pool.class_name(index)?.to_string()),
        };

        let interface_count = self.parser.read_be::<u16>()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(self.pool.class_name(self.parser.read_be()?)?.to_string());
        }

        let field_count = self.parser.read_be::<u16>()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            fields.push(Field {
                access: FieldAccess::from_bits_retain(self.parser.read_be()?),
                name: self.pool.utf8(self.parser.read_be()?)?.to_string(),
                desc: self.pool.utf8(self.parser.read_be()?)?.to_string(),
                attributes: self.read_opaque_attributes()?,
            });
        }

        let method_count = self.parser.read_be::<u16>()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        let mut bodies = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            let (method, code) = self.read_method()?;
            methods.push(method);
            bodies.push(code);
        }

        let mut class = Class::new(&name, super_name.as_deref());
        class.major_version = major_version;
        class.minor_version = minor_version;
        class.access = access;
        class.interfaces = interfaces;
        class.fields = fields;

        let mut bootstraps = Vec::new();
        let attribute_count = self.parser.read_be::<u16>()?;
        for _ in 0..attribute_count {
            let (attribute, body) = self.read_attribute()?;
            match self.pool.utf8(attribute)? {
                "BootstrapMethods" => bootstraps = read_bootstrap_methods(body)?,
                "RuntimeVisibleAnnotations" => {
                    class.visible_annotations = read_annotations(body, &self.pool)?;
                }
                "RuntimeInvisibleAnnotations" => {
                    class.invisible_annotations = read_annotations(body, &self.pool)?;
                }
                name => class.attributes.push(Attribute {
                    name: name.to_string(),
                    data: body.to_vec(),
                }),
            }
        }

        for (method, code) in methods.iter_mut().zip(&bodies) {
            if let Some(code) = code {
                code.decode_into(&self.pool, &bootstraps, method)?;
            }
        }
        class.methods = methods;
        class.source = Some(Arc::new(ClassSource {
            pool: self.pool_bytes.to_vec(),
            bootstrap_methods: bootstraps
                .into_iter()
                .map(|entry| (entry.handle, entry.arguments))
                .collect(),
        }));

        log::trace!(
            "Parsed class {} ({} methods, {} constant pool slots)",
            class.name,
            class.methods.len(),
            self.pool.len()
        );
        Ok(class)
    }

    fn read_method(&mut self) -> Result<(Method, Option<CodeAttribute<'a>>)> {
        let access = MethodAccess::from_bits_retain(self.parser.read_be()?);
        let name = self.pool.utf8(self.parser.read_be()?)?;
        let desc = self.pool.utf8(self.parser.read_be()?)?;
        let mut method = Method::new(access, name, desc);

        let mut code = None;
        let attribute_count = self.parser.read_be::<u16>()?;
        for _ in 0..attribute_count {
            let (attribute, body) = self.read_attribute()?;
            if self.pool.utf8(attribute)? == "Code" {
                if code.is_some() {
                    return Err(malformed_error!(
                        "Method {}{} has more than one Code attribute",
                        method.name,
                        method.desc
                    ));
                }
                code = Some(CodeAttribute::parse(body, &self.pool)?);
            } else {
                method.attributes.push(Attribute {
                    name: self.pool.utf8(attribute)?.to_string(),
                    data: body.to_vec(),
                });
            }
        }
        Ok((method, code))
    }

    fn read_attribute(&mut self) -> Result<(u16, &'a [u8])> {
        let name = self.parser.read_be::<u16>()?;
        let length = self.parser.read_be::<u32>()? as usize;
        let body = self.parser.read_bytes(length)?;
        Ok((name, body))
    }

    fn read_opaque_attributes(&mut self) -> Result<Vec<Attribute>> {
        let count = self.parser.read_be::<u16>()?;
        (0..count)
            .map(|_| {
                let (name, body) = self.read_attribute()?;
                Ok(Attribute {
                    name: self.pool.utf8(name)?.to_string(),
                    data: body.to_vec(),
                })
            })
            .collect()
    }
}

fn read_bootstrap_methods(data: &[u8]) -> Result<Vec<BootstrapMethod>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut methods = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let handle = parser.read_be::<u16>()?;
        let argument_count = parser.read_be::<u16>()?;
        let arguments = (0..argument_count)
            .map(|_| parser.read_be::<u16>())
            .collect::<Result<Vec<u16>>>()?;
        methods.push(BootstrapMethod { handle, arguments });
    }
    Ok(methods)
}

fn read_annotations(data: &[u8], pool: &ConstantPool) -> Result<Vec<Annotation>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut annotations = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let desc = pool.utf8(parser.read_be()?)?.to_string();
        let start = parser.pos();
        skip_element_pairs(&mut parser)?;
        annotations.push(Annotation {
            desc,
            body: data[start..parser.pos()].to_vec(),
        });
    }
    Ok(annotations)
}

fn skip_element_pairs(parser: &mut Parser<'_>) -> Result<()> {
    let pairs = parser.read_be::<u16>()?;
    for _ in 0..pairs {
        parser.advance_by(2)?;
        skip_element_value(parser)?;
    }
    Ok(())
}

fn skip_element_value(parser: &mut Parser<'_>) -> Result<()> {
    match parser.read_be::<u8>()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            parser.advance_by(2)
        }
        b'e' => parser.advance_by(4),
        b'@' => {
            parser.advance_by(2)?;
            skip_element_pairs(parser)
        }
        b'[' => {
            let count = parser.read_be::<u16>()?;
            for _ in 0..count {
                skip_element_value(parser)?;
            }
            Ok(())
        }
        tag => Err(malformed_error!("Invalid element value tag {:#04x}", tag)),
    }
}
