//! Helpers shared by the integration tests.
//!
//! [`ClassFile`] writes minimal but well-formed class files, so tests can exercise
//! the reader and the classpath resolvers without checked-in binaries. [`method`]
//! builds in-memory method bodies for tests that start from the IR directly.

#![allow(dead_code)]

use std::collections::HashMap;

use dekotlin::ir::{Class, Insn, Method, MethodAccess};

/// One exception table entry, in code offsets.
pub struct Handler {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    pub catch_type: Option<&'static str>,
}

/// Writer for a class file with a constant pool deduplicated by content.
pub struct ClassFile {
    name: String,
    super_name: String,
    pool: Vec<u8>,
    count: u16,
    entries: HashMap<(u8, Vec<u8>), u16>,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
    attributes: Vec<u8>,
    attribute_count: u16,
}

impl ClassFile {
    pub fn new(name: &str) -> Self {
        ClassFile {
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            pool: Vec::new(),
            count: 0,
            entries: HashMap::new(),
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
            attributes: Vec::new(),
            attribute_count: 0,
        }
    }

    fn entry(&mut self, tag: u8, body: Vec<u8>) -> u16 {
        if let Some(index) = self.entries.get(&(tag, body.clone())) {
            return *index;
        }
        self.pool.push(tag);
        self.pool.extend(&body);
        self.count += 1;
        self.entries.insert((tag, body), self.count);
        self.count
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut body = (s.len() as u16).to_be_bytes().to_vec();
        body.extend(s.as_bytes());
        self.entry(1, body)
    }

    pub fn int(&mut self, value: i32) -> u16 {
        self.entry(3, value.to_be_bytes().to_vec())
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.entry(7, name.to_be_bytes().to_vec())
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let s = self.utf8(s);
        self.entry(8, s.to_be_bytes().to_vec())
    }

    fn name_and_type(&mut self, name: &str, desc: &str) -> u16 {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let mut body = name.to_be_bytes().to_vec();
        body.extend(desc.to_be_bytes());
        self.entry(12, body)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        let owner = self.class(owner);
        let nat = self.name_and_type(name, desc);
        let mut body = owner.to_be_bytes().to_vec();
        body.extend(nat.to_be_bytes());
        self.entry(10, body)
    }

    /// Adds a field, with a `ConstantValue` attribute when `constant` is set.
    pub fn field(&mut self, access: u16, name: &str, desc: &str, constant: Option<i32>) -> &mut Self {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        self.fields.extend(access.to_be_bytes());
        self.fields.extend(name.to_be_bytes());
        self.fields.extend(desc.to_be_bytes());
        match constant {
            Some(value) => {
                let attr_name = self.utf8("ConstantValue");
                let value = self.int(value);
                self.fields.extend(1_u16.to_be_bytes());
                self.fields.extend(attr_name.to_be_bytes());
                self.fields.extend(2_u32.to_be_bytes());
                self.fields.extend(value.to_be_bytes());
            }
            None => self.fields.extend(0_u16.to_be_bytes()),
        }
        self.field_count += 1;
        self
    }

    /// Adds a class attribute with a raw body.
    pub fn attribute(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let name = self.utf8(name);
        self.attributes.extend(name.to_be_bytes());
        self.attributes.extend((data.len() as u32).to_be_bytes());
        self.attributes.extend(data);
        self.attribute_count += 1;
        self
    }

    /// Adds a method with a `Code` attribute.
    pub fn method(
        &mut self,
        access: u16,
        name: &str,
        desc: &str,
        (max_stack, max_locals): (u16, u16),
        code: &[u8],
        handlers: &[Handler],
    ) -> &mut Self {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let code_name = self.utf8("Code");

        let mut attr = Vec::new();
        attr.extend(max_stack.to_be_bytes());
        attr.extend(max_locals.to_be_bytes());
        attr.extend((code.len() as u32).to_be_bytes());
        attr.extend(code);
        attr.extend((handlers.len() as u16).to_be_bytes());
        for handler in handlers {
            let catch_type = handler.catch_type.map_or(0, |name| self.class(name));
            attr.extend(handler.start.to_be_bytes());
            attr.extend(handler.end.to_be_bytes());
            attr.extend(handler.handler.to_be_bytes());
            attr.extend(catch_type.to_be_bytes());
        }
        attr.extend(0_u16.to_be_bytes());

        self.methods.extend(access.to_be_bytes());
        self.methods.extend(name.to_be_bytes());
        self.methods.extend(desc.to_be_bytes());
        self.methods.extend(1_u16.to_be_bytes());
        self.methods.extend(code_name.to_be_bytes());
        self.methods.extend((attr.len() as u32).to_be_bytes());
        self.methods.extend(attr);
        self.method_count += 1;
        self
    }

    /// Adds a method without a body.
    pub fn abstract_method(&mut self, name: &str, desc: &str) -> &mut Self {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        self.methods.extend(0x0401_u16.to_be_bytes());
        self.methods.extend(name.to_be_bytes());
        self.methods.extend(desc.to_be_bytes());
        self.methods.extend(0_u16.to_be_bytes());
        self.method_count += 1;
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        let this = self.class(&self.name.clone());
        let super_class = self.class(&self.super_name.clone());

        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        out.extend((self.count + 1).to_be_bytes());
        out.extend(&self.pool);
        out.extend(0x0021_u16.to_be_bytes());
        out.extend(this.to_be_bytes());
        out.extend(super_class.to_be_bytes());
        out.extend(0_u16.to_be_bytes()); // interfaces
        out.extend(self.field_count.to_be_bytes());
        out.extend(&self.fields);
        out.extend(self.method_count.to_be_bytes());
        out.extend(&self.methods);
        out.extend(self.attribute_count.to_be_bytes());
        out.extend(&self.attributes);
        out
    }
}

/// A static method with the given body.
pub fn method(name: &str, desc: &str, insns: Vec<Insn>) -> Method {
    let mut method = Method::new(MethodAccess::PUBLIC | MethodAccess::STATIC, name, desc);
    method.instructions.extend(insns);
    method
}

/// A class holding `methods`.
pub fn class(name: &str, methods: Vec<Method>) -> Class {
    let mut class = Class::new(name, Some("java/lang/Object"));
    class.methods = methods;
    class
}
