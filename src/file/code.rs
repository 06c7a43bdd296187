//! `Code` attribute decoding.
//!
//! Bytecode addresses are replaced by labels: a [`LabelId`] is synthesised for every
//! offset that a branch, a switch, an exception handler, a line number or a local
//! variable range refers to, and the decoded instruction list carries a label node
//! in front of the instruction at that offset.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    file::{constpool::ConstantPool, Parser},
    ir::{opcodes::*, Insn, InsnKind, InsnList, LabelId, LocalVariable, Method, TryCatchBlock},
    Result,
};

/// One `BootstrapMethods` entry: method handle index and argument indices.
#[derive(Debug, Clone, Default)]
pub(crate) struct BootstrapMethod {
    pub handle: u16,
    pub arguments: Vec<u16>,
}

#[derive(Debug, Clone, Copy)]
struct ExceptionEntry {
    start: u16,
    end: u16,
    handler: u16,
    catch_type: u16,
}

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    start: u16,
    length: u16,
    name: u16,
    desc: u16,
    index: u16,
}

/// A `Code` attribute whose bytecode has not been decoded yet.
///
/// Decoding needs the class-level `BootstrapMethods` table, which follows the methods
/// in the class file, so the reader keeps the raw attribute until then.
#[derive(Debug)]
pub(crate) struct CodeAttribute<'a> {
    max_stack: u16,
    max_locals: u16,
    code: &'a [u8],
    exceptions: Vec<ExceptionEntry>,
    line_numbers: Vec<(u16, u16)>,
    locals: Vec<LocalEntry>,
    local_types: Vec<LocalEntry>,
}

fn read_locals(parser: &mut Parser<'_>) -> Result<Vec<LocalEntry>> {
    let count = parser.read_be::<u16>()?;
    (0..count)
        .map(|_| {
            Ok(LocalEntry {
                start: parser.read_be()?,
                length: parser.read_be()?,
                name: parser.read_be()?,
                desc: parser.read_be()?,
                index: parser.read_be()?,
            })
        })
        .collect()
}

impl<'a> CodeAttribute<'a> {
    /// Parses the body of a `Code` attribute (after its name and length).
    pub(crate) fn parse(data: &'a [u8], pool: &ConstantPool) -> Result<CodeAttribute<'a>> {
        let mut parser = Parser::new(data);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()? as usize;
        if code_length == 0 || code_length > usize::from(u16::MAX) {
            return Err(malformed_error!("Invalid code length {}", code_length));
        }
        let code = parser.read_bytes(code_length)?;

        let exception_count = parser.read_be::<u16>()?;
        let mut exceptions = Vec::with_capacity(usize::from(exception_count));
        for _ in 0..exception_count {
            exceptions.push(ExceptionEntry {
                start: parser.read_be()?,
                end: parser.read_be()?,
                handler: parser.read_be()?,
                catch_type: parser.read_be()?,
            });
        }

        let mut attribute = CodeAttribute {
            max_stack,
            max_locals,
            code,
            exceptions,
            line_numbers: Vec::new(),
            locals: Vec::new(),
            local_types: Vec::new(),
        };

        let attribute_count = parser.read_be::<u16>()?;
        for _ in 0..attribute_count {
            let name = pool.utf8(parser.read_be()?)?;
            let length = parser.read_be::<u32>()? as usize;
            let mut body = Parser::new(parser.read_bytes(length)?);
            match name {
                "LineNumberTable" => {
                    let count = body.read_be::<u16>()?;
                    for _ in 0..count {
                        let pc = body.read_be::<u16>()?;
                        let line = body.read_be::<u16>()?;
                        attribute.line_numbers.push((pc, line));
                    }
                }
                "LocalVariableTable" => attribute.locals.extend(read_locals(&mut body)?),
                "LocalVariableTypeTable" => attribute.local_types.extend(read_locals(&mut body)?),
                _ => {}
            }
        }

        Ok(attribute)
    }

    /// Decodes the bytecode into `method`, replacing its body.
    pub(crate) fn decode_into(
        &self,
        pool: &ConstantPool,
        bootstraps: &[BootstrapMethod],
        method: &mut Method,
    ) -> Result<()> {
        let mut decoder = Decoder {
            pool,
            bootstraps,
            code_len: self.code.len(),
            labels: BTreeMap::new(),
        };
        let decoded = decoder.decode(self.code)?;
        let boundaries: BTreeSet<usize> = decoded.iter().map(|(pc, _)| *pc).collect();

        let is_boundary = |pc: usize| boundaries.contains(&pc);
        let is_end = |pc: usize| pc == self.code.len() || boundaries.contains(&pc);

        if let Some(pc) = decoder.labels.keys().find(|pc| !is_boundary(**pc)) {
            return Err(malformed_error!(
                "Branch target {} is not an instruction boundary in {}{}",
                pc,
                method.name,
                method.desc
            ));
        }

        let mut try_catch_blocks = Vec::with_capacity(self.exceptions.len());
        for entry in &self.exceptions {
            let (start, end, handler) = (
                usize::from(entry.start),
                usize::from(entry.end),
                usize::from(entry.handler),
            );
            if !is_boundary(start) || !is_end(end) || start >= end || !is_boundary(handler) {
                return Err(malformed_error!(
                    "Invalid exception range [{}, {}) -> {} in {}{}",
                    start,
                    end,
                    handler,
                    method.name,
                    method.desc
                ));
            }
            try_catch_blocks.push(TryCatchBlock {
                start: decoder.label(start),
                end: decoder.label(end),
                handler: decoder.label(handler),
                catch_type: match entry.catch_type {
                    0 => None,
                    index => Some(pool.class_name(index)?.to_string()),
                },
            });
        }

        let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
        for (pc, line) in &self.line_numbers {
            let pc = usize::from(*pc);
            if is_boundary(pc) {
                decoder.label(pc);
                lines.entry(pc).or_default().push(*line);
            } else {
                log::debug!("Ignoring line number {} at offset {}", line, pc);
            }
        }

        let mut local_variables = Vec::with_capacity(self.locals.len());
        for entry in &self.locals {
            let start = usize::from(entry.start);
            let end = start + usize::from(entry.length);
            if !is_boundary(start) || !is_end(end) {
                log::debug!(
                    "Ignoring local variable {} with range [{}, {})",
                    entry.index,
                    start,
                    end
                );
                continue;
            }
            let signature = self
                .local_types
                .iter()
                .find(|t| {
                    t.start == entry.start && t.length == entry.length && t.index == entry.index
                })
                .map(|t| pool.utf8(t.desc).map(str::to_string))
                .transpose()?;
            local_variables.push(LocalVariable {
                name: pool.utf8(entry.name)?.to_string(),
                desc: pool.utf8(entry.desc)?.to_string(),
                signature,
                start: decoder.label(start),
                end: decoder.label(end),
                index: entry.index,
            });
        }

        let mut instructions = InsnList::new();
        for (pc, kind) in decoded {
            if let Some(label) = decoder.labels.get(&pc) {
                instructions.push(Insn::label(*label));
                for line in lines.get(&pc).into_iter().flatten() {
                    instructions.push(Insn::new(InsnKind::LineNumber {
                        line: *line,
                        start: *label,
                    }));
                }
            }
            instructions.push(Insn::new(kind));
        }
        if let Some(label) = decoder.labels.get(&self.code.len()) {
            instructions.push(Insn::label(*label));
        }

        method.instructions = instructions;
        method.max_stack = Some(self.max_stack);
        method.max_locals = self.max_locals;
        method.try_catch_blocks = try_catch_blocks;
        method.local_variables = local_variables;
        Ok(())
    }
}

struct Decoder<'p> {
    pool: &'p ConstantPool,
    bootstraps: &'p [BootstrapMethod],
    code_len: usize,
    labels: BTreeMap<usize, LabelId>,
}

impl Decoder<'_> {
    fn label(&mut self, pc: usize) -> LabelId {
        *self.labels.entry(pc).or_insert_with(LabelId::new)
    }

    fn branch(&mut self, pc: usize, offset: i32) -> Result<LabelId> {
        let target = i64::try_from(pc).unwrap_or(i64::MAX) + i64::from(offset);
        match usize::try_from(target) {
            Ok(target) if target < self.code_len => Ok(self.label(target)),
            _ => Err(malformed_error!(
                "Branch at {} jumps outside the code to {}",
                pc,
                target
            )),
        }
    }

    fn decode(&mut self, code: &[u8]) -> Result<Vec<(usize, InsnKind)>> {
        let mut parser = Parser::new(code);
        let mut decoded = Vec::with_capacity(code.len() / 2);
        while parser.has_more_data() {
            let pc = parser.pos();
            let opcode = parser.read_be::<u8>()?;
            let kind = self.decode_one(&mut parser, pc, opcode)?;
            decoded.push((pc, kind));
        }
        Ok(decoded)
    }

    fn decode_one(&mut self, parser: &mut Parser<'_>, pc: usize, opcode: u8) -> Result<InsnKind> {
        Ok(match opcode {
            NOP..=DCONST_1
            | IALOAD..=SALOAD
            | IASTORE..=LXOR
            | I2L..=DCMPG
            | IRETURN..=RETURN
            | ARRAYLENGTH
            | ATHROW
            | MONITORENTER
            | MONITOREXIT => InsnKind::Simple(opcode),
            BIPUSH => InsnKind::Int {
                opcode,
                operand: i32::from(parser.read_be::<i8>()?),
            },
            SIPUSH => InsnKind::Int {
                opcode,
                operand: i32::from(parser.read_be::<i16>()?),
            },
            NEWARRAY => InsnKind::Int {
                opcode,
                operand: i32::from(parser.read_be::<u8>()?),
            },
            LDC => InsnKind::Ldc(
                self.pool
                    .loadable(u16::from(parser.read_be::<u8>()?), self.bootstraps)?,
            ),
            LDC_W | LDC2_W => {
                InsnKind::Ldc(self.pool.loadable(parser.read_be()?, self.bootstraps)?)
            }
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => InsnKind::Var {
                opcode,
                var: u16::from(parser.read_be::<u8>()?),
            },
            ILOAD_0..=ALOAD_3 => {
                let n = opcode - ILOAD_0;
                InsnKind::Var {
                    opcode: ILOAD + n / 4,
                    var: u16::from(n % 4),
                }
            }
            ISTORE_0..=ASTORE_3 => {
                let n = opcode - ISTORE_0;
                InsnKind::Var {
                    opcode: ISTORE + n / 4,
                    var: u16::from(n % 4),
                }
            }
            IINC => InsnKind::Iinc {
                var: u16::from(parser.read_be::<u8>()?),
                incr: i16::from(parser.read_be::<i8>()?),
            },
            WIDE => {
                let inner = parser.read_be::<u8>()?;
                let var = parser.read_be::<u16>()?;
                match inner {
                    IINC => InsnKind::Iinc {
                        var,
                        incr: parser.read_be()?,
                    },
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => InsnKind::Var { opcode: inner, var },
                    _ => {
                        return Err(malformed_error!(
                            "Invalid WIDE operand {:#04x} at {}",
                            inner,
                            pc
                        ))
                    }
                }
            }
            IFEQ..=JSR | IFNULL | IFNONNULL => InsnKind::Jump {
                opcode,
                target: self.branch(pc, i32::from(parser.read_be::<i16>()?))?,
            },
            GOTO_W | JSR_W => InsnKind::Jump {
                opcode: if opcode == GOTO_W { GOTO } else { JSR },
                target: self.branch(pc, parser.read_be()?)?,
            },
            TABLESWITCH => {
                parser.align(4)?;
                let default = self.branch(pc, parser.read_be()?)?;
                let min = parser.read_be::<i32>()?;
                let max = parser.read_be::<i32>()?;
                if max < min {
                    return Err(malformed_error!("Invalid TABLESWITCH range at {}", pc));
                }
                let count = usize::try_from(i64::from(max) - i64::from(min) + 1)
                    .map_err(|_| malformed_error!("Invalid TABLESWITCH range at {}", pc))?;
                if count > self.code_len {
                    return Err(out_of_bounds_error!());
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(self.branch(pc, parser.read_be()?)?);
                }
                InsnKind::TableSwitch {
                    min,
                    max,
                    default,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                parser.align(4)?;
                let default = self.branch(pc, parser.read_be()?)?;
                let count = usize::try_from(parser.read_be::<i32>()?)
                    .map_err(|_| malformed_error!("Negative LOOKUPSWITCH size at {}", pc))?;
                if count > self.code_len {
                    return Err(out_of_bounds_error!());
                }
                let mut keys = Vec::with_capacity(count);
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(parser.read_be::<i32>()?);
                    targets.push(self.branch(pc, parser.read_be()?)?);
                }
                InsnKind::LookupSwitch {
                    default,
                    keys,
                    targets,
                }
            }
            GETSTATIC..=PUTFIELD => {
                let member = self.pool.member(parser.read_be()?)?;
                InsnKind::Field {
                    opcode,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                }
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let member = self.pool.member(parser.read_be()?)?;
                if opcode == INVOKEINTERFACE {
                    // count and a reserved zero byte
                    parser.advance_by(2)?;
                }
                InsnKind::Method {
                    opcode,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                    is_interface: member.interface,
                }
            }
            INVOKEDYNAMIC => {
                let (bootstrap, name, desc) = self.pool.invoke_dynamic(parser.read_be()?)?;
                parser.advance_by(2)?;
                let (bsm, bsm_args) = self.pool.bootstrap(bootstrap, self.bootstraps)?;
                InsnKind::InvokeDynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bsm,
                    bsm_args,
                }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => InsnKind::Type {
                opcode,
                desc: self.pool.class_name(parser.read_be()?)?.to_string(),
            },
            MULTIANEWARRAY => InsnKind::MultiANewArray {
                desc: self.pool.class_name(parser.read_be()?)?.to_string(),
                dims: parser.read_be()?,
            },
            _ => return Err(malformed_error!("Unknown opcode {:#04x} at {}", opcode, pc)),
        })
    }
}
