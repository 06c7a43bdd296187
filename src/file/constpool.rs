//! Constant pool decoding.

use crate::{
    file::{code::BootstrapMethod, Parser},
    ir::{Handle, LdcValue},
    Result,
};

/// Dynamic constants may take other dynamic constants as bootstrap arguments.
const MAX_CONSTANT_NESTING: usize = 16;

/// One constant pool slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CpEntry {
    /// Slot 0 and the second slot of long and double entries
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef {
        class: u16,
        name_and_type: u16,
    },
    MethodRef {
        class: u16,
        name_and_type: u16,
        interface: bool,
    },
    NameAndType {
        name: u16,
        desc: u16,
    },
    MethodHandle {
        kind: u8,
        reference: u16,
    },
    MethodType(u16),
    Dynamic {
        bootstrap: u16,
        name_and_type: u16,
    },
    InvokeDynamic {
        bootstrap: u16,
        name_and_type: u16,
    },
    Module(u16),
    Package(u16),
}

/// A resolved member reference.
pub(crate) struct MemberRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub desc: &'a str,
    pub interface: bool,
}

/// The constant pool of one class file.
#[derive(Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    /// Reads `constant_pool_count` followed by the entries.
    pub(crate) fn parse(parser: &mut Parser<'_>) -> Result<ConstantPool> {
        let count = usize::from(parser.read_be::<u16>()?);
        let mut entries = Vec::with_capacity(count);
        entries.push(CpEntry::Unusable);

        while entries.len() < count {
            let tag = parser.read_be::<u8>()?;
            let entry = match tag {
                1 => {
                    let len = usize::from(parser.read_be::<u16>()?);
                    CpEntry::Utf8(decode_modified_utf8(parser.read_bytes(len)?)?)
                }
                3 => CpEntry::Integer(parser.read_be()?),
                4 => CpEntry::Float(parser.read_be()?),
                5 => CpEntry::Long(parser.read_be()?),
                6 => CpEntry::Double(parser.read_be()?),
                7 => CpEntry::Class(parser.read_be()?),
                8 => CpEntry::String(parser.read_be()?),
                9 => CpEntry::FieldRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                10 | 11 => CpEntry::MethodRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                    interface: tag == 11,
                },
                12 => CpEntry::NameAndType {
                    name: parser.read_be()?,
                    desc: parser.read_be()?,
                },
                15 => CpEntry::MethodHandle {
                    kind: parser.read_be()?,
                    reference: parser.read_be()?,
                },
                16 => CpEntry::MethodType(parser.read_be()?),
                17 => CpEntry::Dynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                18 => CpEntry::InvokeDynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                19 => CpEntry::Module(parser.read_be()?),
                20 => CpEntry::Package(parser.read_be()?),
                _ => {
                    return Err(malformed_error!(
                        "Unknown constant pool tag {} at entry {}",
                        tag,
                        entries.len()
                    ))
                }
            };
            let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(CpEntry::Unusable);
            }
        }

        Ok(ConstantPool { entries })
    }

    /// Number of slots, including slot 0.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Usable entries with their indices.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (u16, &CpEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| **entry != CpEntry::Unusable)
            .filter_map(|(index, entry)| Some((u16::try_from(index).ok()?, entry)))
    }

    pub(crate) fn entry(&self, index: u16) -> Result<&CpEntry> {
        match self.entries.get(usize::from(index)) {
            Some(CpEntry::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool has {} slots)",
                index,
                self.entries.len()
            )),
            Some(entry) => Ok(entry),
        }
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            CpEntry::Utf8(s) => Ok(s),
            other => Err(malformed_error!("Expected Utf8 at {}, found {:?}", index, other)),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            CpEntry::Class(name) => self.utf8(*name),
            other => Err(malformed_error!("Expected Class at {}, found {:?}", index, other)),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index)? {
            CpEntry::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            other => Err(malformed_error!(
                "Expected NameAndType at {}, found {:?}",
                index,
                other
            )),
        }
    }

    pub(crate) fn member(&self, index: u16) -> Result<MemberRef<'_>> {
        let (class, name_and_type, interface) = match self.entry(index)? {
            CpEntry::FieldRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            CpEntry::MethodRef {
                class,
                name_and_type,
                interface,
            } => (*class, *name_and_type, *interface),
            other => {
                return Err(malformed_error!(
                    "Expected member reference at {}, found {:?}",
                    index,
                    other
                ))
            }
        };
        let (name, desc) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            owner: self.class_name(class)?,
            name,
            desc,
            interface,
        })
    }

    /// Bootstrap table index, name and descriptor of an `InvokeDynamic` entry.
    pub(crate) fn invoke_dynamic(&self, index: u16) -> Result<(u16, &str, &str)> {
        match self.entry(index)? {
            CpEntry::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(*name_and_type)?;
                Ok((*bootstrap, name, desc))
            }
            other => Err(malformed_error!(
                "Expected InvokeDynamic at {}, found {:?}",
                index,
                other
            )),
        }
    }

    pub(crate) fn handle(&self, index: u16) -> Result<Handle> {
        match self.entry(index)? {
            CpEntry::MethodHandle { kind, reference } => {
                let member = self.member(*reference)?;
                Ok(Handle {
                    kind: *kind,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                    is_interface: member.interface,
                })
            }
            other => Err(malformed_error!(
                "Expected MethodHandle at {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// The loadable constant at `index`, as used by `LDC` and bootstrap arguments.
    pub(crate) fn loadable(&self, index: u16, bootstraps: &[BootstrapMethod]) -> Result<LdcValue> {
        self.loadable_nested(index, bootstraps, 0)
    }

    /// Bootstrap handle and arguments of entry `bootstrap` of the `BootstrapMethods` table.
    pub(crate) fn bootstrap(
        &self,
        bootstrap: u16,
        bootstraps: &[BootstrapMethod],
    ) -> Result<(Handle, Vec<LdcValue>)> {
        self.bootstrap_nested(bootstrap, bootstraps, 0)
    }

    fn bootstrap_nested(
        &self,
        bootstrap: u16,
        bootstraps: &[BootstrapMethod],
        depth: usize,
    ) -> Result<(Handle, Vec<LdcValue>)> {
        let entry = bootstraps
            .get(usize::from(bootstrap))
            .ok_or_else(|| malformed_error!("Missing bootstrap method {}", bootstrap))?;
        let arguments = entry
            .arguments
            .iter()
            .map(|index| self.loadable_nested(*index, bootstraps, depth + 1))
            .collect::<Result<Vec<LdcValue>>>()?;
        Ok((self.handle(entry.handle)?, arguments))
    }

    fn loadable_nested(
        &self,
        index: u16,
        bootstraps: &[BootstrapMethod],
        depth: usize,
    ) -> Result<LdcValue> {
        if depth > MAX_CONSTANT_NESTING {
            return Err(malformed_error!(
                "Dynamic constant {} nests deeper than {} levels",
                index,
                MAX_CONSTANT_NESTING
            ));
        }
        Ok(match self.entry(index)? {
            CpEntry::Integer(v) => LdcValue::Int(*v),
            CpEntry::Float(v) => LdcValue::Float(*v),
            CpEntry::Long(v) => LdcValue::Long(*v),
            CpEntry::Double(v) => LdcValue::Double(*v),
            CpEntry::String(s) => LdcValue::String(self.utf8(*s)?.to_string()),
            CpEntry::Class(name) => LdcValue::Class(self.utf8(*name)?.to_string()),
            CpEntry::MethodType(desc) => LdcValue::MethodType(self.utf8(*desc)?.to_string()),
            CpEntry::MethodHandle { .. } => LdcValue::Handle(self.handle(index)?),
            CpEntry::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(*name_and_type)?;
                let (bsm, bsm_args) = self.bootstrap_nested(*bootstrap, bootstraps, depth)?;
                LdcValue::Dynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bsm,
                    bsm_args,
                }
            }
            other => {
                return Err(malformed_error!(
                    "Entry {} is not loadable: {:?}",
                    index,
                    other
                ))
            }
        })
    }
}

/// Decodes the modified UTF-8 used by class files: NUL is encoded in two bytes and
/// supplementary characters as two encoded surrogates.
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if bytes.iter().all(|b| *b != 0 && *b < 0x80) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|_| malformed_error!("Invalid ASCII string"));
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = u16::from(bytes[i]);
        let continuation = |offset: usize| -> Result<u16> {
            match bytes.get(i + offset) {
                Some(c) if c & 0xC0 == 0x80 => Ok(u16::from(c & 0x3F)),
                _ => Err(malformed_error!("Truncated modified UTF-8 sequence at {}", i)),
            }
        };
        let (unit, len) = match b {
            0x01..=0x7F => (b, 1),
            _ if b & 0xE0 == 0xC0 => (((b & 0x1F) << 6) | continuation(1)?, 2),
            _ if b & 0xF0 == 0xE0 => (
                ((b & 0x0F) << 12) | (continuation(1)? << 6) | continuation(2)?,
                3,
            ),
            _ => return Err(malformed_error!("Invalid modified UTF-8 byte {:#x} at {}", b, i)),
        };
        units.push(unit);
        i += len;
    }
    String::from_utf16(&units)
        .map_err(|_| malformed_error!("Unpaired surrogate in string constant"))
}

/// Encodes `text` as modified UTF-8, the inverse of [`decode_modified_utf8`].
pub(crate) fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_with_wide_entries() {
        #[rustfmt::skip]
        let data = [
            0x00, 0x06,                               // count
            0x01, 0x00, 0x01, b'A',                   // #1 Utf8 "A"
            0x07, 0x00, 0x01,                         // #2 Class #1
            0x05, 0, 0, 0, 0, 0, 0, 0, 0x2A,          // #3 Long 42 (+#4)
            0x08, 0x00, 0x01,                         // #5 String #1
        ];
        let mut parser = Parser::new(&data);
        let pool = ConstantPool::parse(&mut parser).unwrap();
        assert_eq!(pool.len(), 6);
        assert_eq!(pool.class_name(2).unwrap(), "A");
        assert_eq!(pool.loadable(3, &[]).unwrap(), LdcValue::Long(42));
        assert!(pool.entry(4).is_err());
        assert_eq!(pool.loadable(5, &[]).unwrap(), LdcValue::String("A".into()));
        assert_eq!(pool.entries().count(), 4);
        assert!(pool.utf8(2).is_err());
    }

    #[test]
    fn test_modified_utf8() {
        assert_eq!(decode_modified_utf8(b"kotlin/Unit").unwrap(), "kotlin/Unit");
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\0");
        assert_eq!(decode_modified_utf8(&[0xC3, 0xA9]).unwrap(), "é");
        // U+1F600 as two encoded surrogates
        let emoji = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&emoji).unwrap(), "\u{1F600}");
        assert!(decode_modified_utf8(&[0xE0, 0x80]).is_err());
    }

    #[test]
    fn test_encode_modified_utf8() {
        assert_eq!(encode_modified_utf8("kotlin/Unit"), b"kotlin/Unit");
        assert_eq!(encode_modified_utf8("\0"), [0xC0, 0x80]);
        let emoji = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(encode_modified_utf8("\u{1F600}"), emoji);
        for text in ["é", "a\0b", "\u{FFFF}", "日本"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(text)).unwrap(), text);
        }
    }
}
