//! Constant pool assembly.
//!
//! A [`PoolWriter`] starts either empty or from the pool of the class file a class was
//! parsed from. Existing entries keep their indices and are reused when an identical
//! constant is requested; everything else is appended. The `BootstrapMethods` table is
//! handled the same way.

use std::collections::HashMap;

use crate::{
    file::{
        constpool::{encode_modified_utf8, ConstantPool, CpEntry},
        io::write_be,
        Parser,
    },
    ir::{ClassSource, Handle, LdcValue},
    Result,
};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD: u8 = 9;
const TAG_METHOD: u8 = 10;
const TAG_INTERFACE_METHOD: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Structural identity of an entry. References compare by the indices they hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Ref(u8, u16, u16),
}

impl Key {
    fn of(entry: &CpEntry) -> Option<Key> {
        Some(match entry {
            CpEntry::Unusable => return None,
            CpEntry::Utf8(text) => Key::Utf8(text.clone()),
            CpEntry::Integer(value) => Key::Integer(*value),
            CpEntry::Float(value) => Key::Float(value.to_bits()),
            CpEntry::Long(value) => Key::Long(*value),
            CpEntry::Double(value) => Key::Double(value.to_bits()),
            CpEntry::Class(name) => Key::Ref(TAG_CLASS, *name, 0),
            CpEntry::String(text) => Key::Ref(TAG_STRING, *text, 0),
            CpEntry::FieldRef {
                class,
                name_and_type,
            } => Key::Ref(TAG_FIELD, *class, *name_and_type),
            CpEntry::MethodRef {
                class,
                name_and_type,
                interface,
            } => {
                let tag = if *interface {
                    TAG_INTERFACE_METHOD
                } else {
                    TAG_METHOD
                };
                Key::Ref(tag, *class, *name_and_type)
            }
            CpEntry::NameAndType { name, desc } => Key::Ref(TAG_NAME_AND_TYPE, *name, *desc),
            CpEntry::MethodHandle { kind, reference } => {
                Key::Ref(TAG_METHOD_HANDLE, u16::from(*kind), *reference)
            }
            CpEntry::MethodType(desc) => Key::Ref(TAG_METHOD_TYPE, *desc, 0),
            CpEntry::Dynamic {
                bootstrap,
                name_and_type,
            } => Key::Ref(TAG_DYNAMIC, *bootstrap, *name_and_type),
            CpEntry::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => Key::Ref(TAG_INVOKE_DYNAMIC, *bootstrap, *name_and_type),
            CpEntry::Module(name) => Key::Ref(TAG_MODULE, *name, 0),
            CpEntry::Package(name) => Key::Ref(TAG_PACKAGE, *name, 0),
        })
    }
}

/// Builds the constant pool and bootstrap table of one class file.
pub(crate) struct PoolWriter {
    /// Internal name of the class being written, for diagnostics
    owner: String,
    /// Encoded entries, without the count
    bytes: Vec<u8>,
    /// Next free slot; also the `constant_pool_count` to emit
    next: usize,
    index: HashMap<Key, u16>,
    bootstraps: Vec<(u16, Vec<u16>)>,
    bootstrap_index: HashMap<(u16, Vec<u16>), u16>,
}

impl PoolWriter {
    /// An empty pool for `owner`.
    pub(crate) fn new(owner: &str) -> Self {
        PoolWriter {
            owner: owner.to_string(),
            bytes: Vec::new(),
            next: 1,
            index: HashMap::new(),
            bootstraps: Vec::new(),
            bootstrap_index: HashMap::new(),
        }
    }

    /// A pool that starts with the entries and bootstrap methods of `source`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the recorded pool cannot be parsed.
    pub(crate) fn from_source(owner: &str, source: &ClassSource) -> Result<Self> {
        let mut parser = Parser::new(&source.pool);
        let pool = ConstantPool::parse(&mut parser)?;

        let mut writer = PoolWriter::new(owner);
        writer.bytes = source.pool.get(2..).unwrap_or_default().to_vec();
        writer.next = pool.len();
        for (index, entry) in pool.entries() {
            if let Some(key) = Key::of(entry) {
                writer.index.entry(key).or_insert(index);
            }
        }
        for (position, entry) in source.bootstrap_methods.iter().enumerate() {
            let Ok(position) = u16::try_from(position) else {
                break;
            };
            writer.bootstrap_index.entry(entry.clone()).or_insert(position);
            writer.bootstraps.push(entry.clone());
        }
        Ok(writer)
    }

    /// Number of slots, including slot 0.
    pub(crate) fn len(&self) -> usize {
        self.next
    }

    fn put(&mut self, key: Key, encoded: &[u8]) -> Result<u16> {
        if let Some(index) = self.index.get(&key) {
            return Ok(*index);
        }
        let width = if matches!(key, Key::Long(_) | Key::Double(_)) {
            2
        } else {
            1
        };
        if self.next + width > usize::from(u16::MAX) {
            return Err(write_error!(
                self.owner,
                "constant pool exceeds {} slots",
                u16::MAX
            ));
        }

        let index = u16::try_from(self.next)
            .map_err(|_| write_error!(self.owner, "constant pool index overflow"))?;
        self.bytes.extend_from_slice(encoded);
        self.next += width;
        self.index.insert(key, index);
        Ok(index)
    }

    fn put_ref(&mut self, tag: u8, first: u16, second: Option<u16>) -> Result<u16> {
        let mut encoded = vec![tag];
        write_be(&mut encoded, first);
        if let Some(second) = second {
            write_be(&mut encoded, second);
        }
        self.put(Key::Ref(tag, first, second.unwrap_or(0)), &encoded)
    }

    pub(crate) fn utf8(&mut self, text: &str) -> Result<u16> {
        let key = Key::Utf8(text.to_string());
        if let Some(index) = self.index.get(&key) {
            return Ok(*index);
        }
        let bytes = encode_modified_utf8(text);
        let length = u16::try_from(bytes.len()).map_err(|_| {
            write_error!(
                self.owner,
                "string constant of {} bytes exceeds {}",
                bytes.len(),
                u16::MAX
            )
        })?;
        let mut encoded = Vec::with_capacity(bytes.len() + 3);
        encoded.push(TAG_UTF8);
        write_be(&mut encoded, length);
        encoded.extend_from_slice(&bytes);
        self.put(key, &encoded)
    }

    /// A `CONSTANT_Class` for an internal name or array descriptor.
    pub(crate) fn class(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        self.put_ref(TAG_CLASS, name, None)
    }

    pub(crate) fn string(&mut self, text: &str) -> Result<u16> {
        let text = self.utf8(text)?;
        self.put_ref(TAG_STRING, text, None)
    }

    pub(crate) fn integer(&mut self, value: i32) -> Result<u16> {
        let mut encoded = vec![TAG_INTEGER];
        write_be(&mut encoded, value);
        self.put(Key::Integer(value), &encoded)
    }

    pub(crate) fn float(&mut self, value: f32) -> Result<u16> {
        let mut encoded = vec![TAG_FLOAT];
        write_be(&mut encoded, value);
        self.put(Key::Float(value.to_bits()), &encoded)
    }

    pub(crate) fn long(&mut self, value: i64) -> Result<u16> {
        let mut encoded = vec![TAG_LONG];
        write_be(&mut encoded, value);
        self.put(Key::Long(value), &encoded)
    }

    pub(crate) fn double(&mut self, value: f64) -> Result<u16> {
        let mut encoded = vec![TAG_DOUBLE];
        write_be(&mut encoded, value);
        self.put(Key::Double(value.to_bits()), &encoded)
    }

    pub(crate) fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let desc = self.utf8(desc)?;
        self.put_ref(TAG_NAME_AND_TYPE, name, Some(desc))
    }

    pub(crate) fn field(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, desc)?;
        self.put_ref(TAG_FIELD, class, Some(name_and_type))
    }

    pub(crate) fn method(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<u16> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, desc)?;
        let tag = if interface {
            TAG_INTERFACE_METHOD
        } else {
            TAG_METHOD
        };
        self.put_ref(tag, class, Some(name_and_type))
    }

    pub(crate) fn method_type(&mut self, desc: &str) -> Result<u16> {
        let desc = self.utf8(desc)?;
        self.put_ref(TAG_METHOD_TYPE, desc, None)
    }

    pub(crate) fn handle(&mut self, handle: &Handle) -> Result<u16> {
        // REF_getField .. REF_putStatic refer to fields, the rest to methods
        let reference = if handle.kind <= 4 {
            self.field(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method(&handle.owner, &handle.name, &handle.desc, handle.is_interface)?
        };
        let mut encoded = vec![TAG_METHOD_HANDLE, handle.kind];
        write_be(&mut encoded, reference);
        self.put(
            Key::Ref(TAG_METHOD_HANDLE, u16::from(handle.kind), reference),
            &encoded,
        )
    }

    /// The entry `LDC` or a bootstrap argument loads `value` from.
    pub(crate) fn loadable(&mut self, value: &LdcValue) -> Result<u16> {
        match value {
            LdcValue::Int(value) => self.integer(*value),
            LdcValue::Float(value) => self.float(*value),
            LdcValue::Long(value) => self.long(*value),
            LdcValue::Double(value) => self.double(*value),
            LdcValue::String(text) => self.string(text),
            LdcValue::Class(name) => self.class(name),
            LdcValue::MethodType(desc) => self.method_type(desc),
            LdcValue::Handle(handle) => self.handle(handle),
            LdcValue::Dynamic {
                name,
                desc,
                bsm,
                bsm_args,
            } => {
                let bootstrap = self.bootstrap(bsm, bsm_args)?;
                let name_and_type = self.name_and_type(name, desc)?;
                self.put_ref(TAG_DYNAMIC, bootstrap, Some(name_and_type))
            }
        }
    }

    /// Position of `bsm` with `arguments` in the `BootstrapMethods` table.
    pub(crate) fn bootstrap(&mut self, bsm: &Handle, arguments: &[LdcValue]) -> Result<u16> {
        let handle = self.handle(bsm)?;
        let arguments = arguments
            .iter()
            .map(|argument| self.loadable(argument))
            .collect::<Result<Vec<u16>>>()?;
        let entry = (handle, arguments);
        if let Some(position) = self.bootstrap_index.get(&entry) {
            return Ok(*position);
        }

        let position = u16::try_from(self.bootstraps.len())
            .map_err(|_| write_error!(self.owner, "too many bootstrap methods"))?;
        self.bootstrap_index.insert(entry.clone(), position);
        self.bootstraps.push(entry);
        Ok(position)
    }

    pub(crate) fn invoke_dynamic(
        &mut self,
        name: &str,
        desc: &str,
        bsm: &Handle,
        arguments: &[LdcValue],
    ) -> Result<u16> {
        let bootstrap = self.bootstrap(bsm, arguments)?;
        let name_and_type = self.name_and_type(name, desc)?;
        self.put_ref(TAG_INVOKE_DYNAMIC, bootstrap, Some(name_and_type))
    }

    /// Body of the `BootstrapMethods` attribute, `None` when the table is empty.
    pub(crate) fn bootstrap_methods(&self) -> Option<Vec<u8>> {
        if self.bootstraps.is_empty() {
            return None;
        }
        let mut body = Vec::new();
        write_be(&mut body, self.bootstraps.len() as u16);
        for (handle, arguments) in &self.bootstraps {
            write_be(&mut body, *handle);
            write_be(&mut body, arguments.len() as u16);
            for argument in arguments {
                write_be(&mut body, *argument);
            }
        }
        Some(body)
    }

    /// `constant_pool_count` followed by the entries.
    pub(crate) fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes.len() + 2);
        write_be(&mut out, self.next as u16);
        out.extend_from_slice(&self.bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn reparse(writer: PoolWriter) -> ConstantPool {
        let bytes = writer.finish();
        ConstantPool::parse(&mut Parser::new(&bytes)).unwrap()
    }

    #[test]
    fn test_entries_are_shared() {
        let mut writer = PoolWriter::new("demo/A");
        let first = writer.method("demo/B", "run", "()V", false).unwrap();
        let again = writer.method("demo/B", "run", "()V", false).unwrap();
        let interface = writer.method("demo/B", "run", "()V", true).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, interface);
        let class = writer.class("demo/B").unwrap();

        let long = writer.long(7).unwrap();
        let after = writer.integer(7).unwrap();
        assert_eq!(after, long + 2);

        let pool = reparse(writer);
        let member = pool.member(first).unwrap();
        assert_eq!((member.owner, member.name, member.desc), ("demo/B", "run", "()V"));
        assert!(pool.member(interface).unwrap().interface);
        assert_eq!(pool.class_name(class).unwrap(), "demo/B");
        assert_eq!(pool.loadable(long, &[]).unwrap(), LdcValue::Long(7));
    }

    #[test]
    fn test_source_entries_are_kept_in_place() {
        let mut seed = PoolWriter::new("demo/A");
        let text = seed.string("hello").unwrap();
        let count = seed.len();
        let source = ClassSource {
            pool: seed.finish(),
            bootstrap_methods: Vec::new(),
        };

        let mut writer = PoolWriter::from_source("demo/A", &source).unwrap();
        assert_eq!(writer.string("hello").unwrap(), text);
        let added = writer.string("world").unwrap();
        assert_eq!(usize::from(added), count + 1);

        let pool = reparse(writer);
        assert_eq!(
            pool.loadable(text, &[]).unwrap(),
            LdcValue::String("hello".into())
        );
        assert_eq!(
            pool.loadable(added, &[]).unwrap(),
            LdcValue::String("world".into())
        );
    }

    #[test]
    fn test_bootstraps_are_shared() {
        let bsm = Handle {
            kind: 6,
            owner: "java/lang/invoke/StringConcatFactory".into(),
            name: "makeConcatWithConstants".into(),
            desc: "()Ljava/lang/invoke/CallSite;".into(),
            is_interface: false,
        };
        let args = [LdcValue::String("\u{1}!".into())];
        let mut writer = PoolWriter::new("demo/A");
        assert!(writer.bootstrap_methods().is_none());
        let first = writer.invoke_dynamic("concat", "(I)Ljava/lang/String;", &bsm, &args);
        let second = writer.invoke_dynamic("concat", "(J)Ljava/lang/String;", &bsm, &args);
        assert_ne!(first.unwrap(), second.unwrap());

        let table = writer.bootstrap_methods().unwrap();
        assert_eq!(&table[..2], &[0, 1]);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut writer = PoolWriter::new("demo/Huge");
        let mut result = Ok(0);
        for value in 0..i32::from(u16::MAX) {
            result = writer.integer(value);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::Write { ref class, .. }) if class == "demo/Huge"));
        assert_eq!(writer.len(), usize::from(u16::MAX));
    }
}
