//! Class file emission.
//!
//! [`ClassWriter`] turns a [`Class`] back into class file bytes. When the class was
//! parsed from a file, its original constant pool is emitted first and unchanged and
//! every constant the rewritten bodies need is appended after it, so opaque
//! attributes and annotation bodies keep pointing at the right entries.
//!
//! Method bodies are re-encoded from their instruction lists. Operand stack depth,
//! local count and the `StackMapTable` are recomputed; class hierarchy questions
//! raised by frame merging are answered through a [`ResolverChain`].

mod code;
mod frames;
mod pool;

use crate::{
    file::io::write_be,
    ir::{Annotation, Attribute, Class},
    resolver::ResolverChain,
    Result,
};

use self::{frames::Hierarchy, pool::PoolWriter};

const MAGIC: u32 = 0xCAFE_BABE;

/// Serializer for the class file format.
///
/// ```rust,no_run
/// use dekotlin::{file::{ClassReader, ClassWriter}, resolver::ResolverChain};
///
/// let data = std::fs::read("build/classes/Example.class")?;
/// let class = ClassReader::parse(&data)?;
/// let resolver = ResolverChain::new(64);
/// let bytes = ClassWriter::new(&resolver).write(&class)?;
/// std::fs::write("out/Example.class", bytes)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ClassWriter<'a> {
    resolver: &'a ResolverChain,
}

impl<'a> ClassWriter<'a> {
    /// Creates a writer that looks up superclasses through `resolver`.
    #[must_use]
    pub fn new(resolver: &'a ResolverChain) -> Self {
        ClassWriter { resolver }
    }

    /// Encodes `class` as a class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Write`] if the constant pool overflows, a method body
    /// exceeds the size limits of the format, a branch offset does not fit its operand,
    /// or a body cannot be given consistent frames.
    pub fn write(&self, class: &Class) -> Result<Vec<u8>> {
        let mut pool = match &class.source {
            Some(source) => PoolWriter::from_source(&class.name, source)?,
            None => PoolWriter::new(&class.name),
        };
        let hierarchy = Hierarchy::new(class, self.resolver);

        let mut body = Vec::with_capacity(1024);
        write_be(&mut body, class.access.bits());
        write_be(&mut body, pool.class(&class.name)?);
        match &class.super_name {
            Some(super_name) => write_be(&mut body, pool.class(super_name)?),
            None => write_be(&mut body, 0_u16),
        }
        write_be(&mut body, class.interfaces.len() as u16);
        for interface in &class.interfaces {
            write_be(&mut body, pool.class(interface)?);
        }

        write_be(&mut body, class.fields.len() as u16);
        for field in &class.fields {
            write_be(&mut body, field.access.bits());
            write_be(&mut body, pool.utf8(&field.name)?);
            write_be(&mut body, pool.utf8(&field.desc)?);
            write_attributes(&mut body, &mut pool, &field.attributes, Vec::new())?;
        }

        write_be(&mut body, class.methods.len() as u16);
        for method in &class.methods {
            write_be(&mut body, method.access.bits());
            write_be(&mut body, pool.utf8(&method.name)?);
            write_be(&mut body, pool.utf8(&method.desc)?);
            let mut extra = Vec::new();
            if !method.instructions.is_empty() {
                let code = code::write_code(
                    method,
                    class.major_version,
                    &hierarchy,
                    &mut pool,
                    &class.name,
                )?;
                extra.push(("Code", code));
            }
            write_attributes(&mut body, &mut pool, &method.attributes, extra)?;
        }

        let mut extra = Vec::new();
        if !class.visible_annotations.is_empty() {
            let data = annotations(&mut pool, &class.visible_annotations)?;
            extra.push(("RuntimeVisibleAnnotations", data));
        }
        if !class.invisible_annotations.is_empty() {
            let data = annotations(&mut pool, &class.invisible_annotations)?;
            extra.push(("RuntimeInvisibleAnnotations", data));
        }
        let bootstrap_methods = pool.bootstrap_methods();
        let attributes = class
            .attributes
            .iter()
            .filter(|attribute| attribute.name != "BootstrapMethods");

        let count = attributes.clone().count()
            + extra.len()
            + usize::from(bootstrap_methods.is_some());
        write_be(&mut body, count as u16);
        for attribute in attributes {
            write_attribute(&mut body, pool.utf8(&attribute.name)?, &attribute.data);
        }
        for (name, data) in extra {
            write_attribute(&mut body, pool.utf8(name)?, &data);
        }
        if let Some(table) = bootstrap_methods {
            write_attribute(&mut body, pool.utf8("BootstrapMethods")?, &table);
        }

        let pool_len = pool.len();
        let pool_bytes = pool.finish();
        log::trace!(
            "Wrote {} with {} pool bytes ({} slots) and {} body bytes",
            class.name,
            pool_bytes.len(),
            pool_len,
            body.len()
        );

        let mut out = Vec::with_capacity(8 + pool_bytes.len() + body.len());
        write_be(&mut out, MAGIC);
        write_be(&mut out, class.minor_version);
        write_be(&mut out, class.major_version);
        out.extend_from_slice(&pool_bytes);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn write_attribute(out: &mut Vec<u8>, name: u16, data: &[u8]) {
    write_be(out, name);
    write_be(out, data.len() as u32);
    out.extend_from_slice(data);
}

/// Writes the generated `extra` attributes followed by the opaque `attributes`.
fn write_attributes(
    out: &mut Vec<u8>,
    pool: &mut PoolWriter,
    attributes: &[Attribute],
    extra: Vec<(&str, Vec<u8>)>,
) -> Result<()> {
    write_be(out, (attributes.len() + extra.len()) as u16);
    for (name, data) in extra {
        write_attribute(out, pool.utf8(name)?, &data);
    }
    for attribute in attributes {
        write_attribute(out, pool.utf8(&attribute.name)?, &attribute.data);
    }
    Ok(())
}

fn annotations(pool: &mut PoolWriter, annotations: &[Annotation]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    write_be(&mut data, annotations.len() as u16);
    for annotation in annotations {
        write_be(&mut data, pool.utf8(&annotation.desc)?);
        data.extend_from_slice(&annotation.body);
    }
    Ok(data)
}
