//! `Code` attribute encoding.
//!
//! Instructions are emitted in one forward pass. Every opcode has a fixed size once
//! its operands are known, and branches always use 16-bit offsets, so label positions
//! can be recorded as they are passed and branch operands patched afterwards.
//! Unreachable instructions are not emitted; exception ranges that end up empty are
//! dropped with them.

use std::collections::{BTreeSet, HashMap};

use crate::{
    file::{
        io::{write_be, write_be_at},
        writer::{
            frames::{self, Hierarchy, MethodFrames, VerificationType},
            pool::PoolWriter,
        },
    },
    ir::{opcodes::*, InsnKind, LabelId, LdcValue, Method, MethodDescriptor},
    Result,
};

/// First class file version that requires `StackMapTable` frames.
const STACK_MAP_VERSION: u16 = 50;

/// A branch operand to patch once all labels are placed.
struct Fixup {
    /// Offset of the operand in the code
    at: usize,
    /// Offset of the branching instruction
    from: usize,
    label: LabelId,
    wide: bool,
}

/// Encodes the body of `method` as the contents of a `Code` attribute.
pub(crate) fn write_code(
    method: &Method,
    major_version: u16,
    hierarchy: &Hierarchy<'_>,
    pool: &mut PoolWriter,
    owner: &str,
) -> Result<Vec<u8>> {
    let frames = frames::compute(method, hierarchy)?;
    let mut emitter = Emitter {
        owner,
        method,
        pool,
        code: Vec::new(),
        labels: HashMap::new(),
        fixups: Vec::new(),
        lines: Vec::new(),
        offsets: HashMap::new(),
    };
    emitter.emit_instructions(&frames)?;
    emitter.patch_branches()?;

    let code_length = u32::try_from(emitter.code.len())
        .ok()
        .filter(|len| *len <= u32::from(u16::MAX))
        .ok_or_else(|| {
            write_error!(
                owner,
                "code of {} is {} bytes long",
                method.signature(),
                emitter.code.len()
            )
        })?;

    let mut body = Vec::with_capacity(emitter.code.len() + 64);
    write_be(&mut body, frames.max_stack);
    write_be(&mut body, frames.max_locals);
    write_be(&mut body, code_length);
    body.extend_from_slice(&emitter.code);
    emitter.write_exception_table(&mut body)?;

    let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
    if let Some(lines) = emitter.line_number_table() {
        attributes.push((emitter.pool.utf8("LineNumberTable")?, lines));
    }
    if let Some(locals) = emitter.local_variable_table(false)? {
        attributes.push((emitter.pool.utf8("LocalVariableTable")?, locals));
    }
    if let Some(types) = emitter.local_variable_table(true)? {
        attributes.push((emitter.pool.utf8("LocalVariableTypeTable")?, types));
    }
    if major_version >= STACK_MAP_VERSION {
        if let Some(table) = emitter.stack_map_table(&frames)? {
            attributes.push((emitter.pool.utf8("StackMapTable")?, table));
        }
    }

    write_be(&mut body, attributes.len() as u16);
    for (name, data) in attributes {
        write_be(&mut body, name);
        write_be(&mut body, data.len() as u32);
        body.extend_from_slice(&data);
    }
    Ok(body)
}

struct Emitter<'a> {
    owner: &'a str,
    method: &'a Method,
    pool: &'a mut PoolWriter,
    code: Vec<u8>,
    labels: HashMap<LabelId, usize>,
    fixups: Vec<Fixup>,
    /// Line number and the label it starts at
    lines: Vec<(u16, LabelId)>,
    /// Code offset of each emitted instruction, by position in the body
    offsets: HashMap<usize, usize>,
}

impl Emitter<'_> {
    fn emit_instructions(&mut self, frames: &MethodFrames) -> Result<()> {
        let method = self.method;
        for (index, insn) in method.instructions.iter().enumerate() {
            match &insn.kind {
                InsnKind::Label(label) => {
                    self.labels.insert(*label, self.code.len());
                }
                InsnKind::LineNumber { line, start } => self.lines.push((*line, *start)),
                kind => {
                    if frames.frames.get(index).map_or(true, Option::is_none) {
                        log::trace!(
                            "Dropping unreachable {} at {} in {}.{}",
                            insn.opcode().map_or("?", mnemonic),
                            index,
                            self.owner,
                            method.signature()
                        );
                        continue;
                    }
                    self.offsets.insert(index, self.code.len());
                    self.emit(kind)?;
                }
            }
        }
        Ok(())
    }

    fn u8(&mut self, value: u8) {
        self.code.push(value);
    }

    fn u16(&mut self, value: u16) {
        write_be(&mut self.code, value);
    }

    fn branch(&mut self, from: usize, label: LabelId, wide: bool) {
        self.fixups.push(Fixup {
            at: self.code.len(),
            from,
            label,
            wide,
        });
        if wide {
            write_be(&mut self.code, 0_i32);
        } else {
            write_be(&mut self.code, 0_i16);
        }
    }

    fn align_switch(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn emit(&mut self, kind: &InsnKind) -> Result<()> {
        let start = self.code.len();
        match kind {
            InsnKind::Simple(op) => self.u8(*op),
            InsnKind::Int { opcode, operand } => {
                self.u8(*opcode);
                if *opcode == SIPUSH {
                    write_be(&mut self.code, *operand as i16);
                } else {
                    self.u8(*operand as u8);
                }
            }
            InsnKind::Var { opcode, var } => match (*opcode, u8::try_from(*var)) {
                (ILOAD..=ALOAD, Ok(short @ 0..=3)) => self.u8(ILOAD_0 + (opcode - ILOAD) * 4 + short),
                (ISTORE..=ASTORE, Ok(short @ 0..=3)) => {
                    self.u8(ISTORE_0 + (opcode - ISTORE) * 4 + short);
                }
                (_, Ok(var)) => {
                    self.u8(*opcode);
                    self.u8(var);
                }
                (_, Err(_)) => {
                    self.u8(WIDE);
                    self.u8(*opcode);
                    self.u16(*var);
                }
            },
            InsnKind::Iinc { var, incr } => match (u8::try_from(*var), i8::try_from(*incr)) {
                (Ok(var), Ok(incr)) => {
                    self.u8(IINC);
                    self.u8(var);
                    write_be(&mut self.code, incr);
                }
                _ => {
                    self.u8(WIDE);
                    self.u8(IINC);
                    self.u16(*var);
                    write_be(&mut self.code, *incr);
                }
            },
            InsnKind::Type { opcode, desc } => {
                let class = self.pool.class(desc)?;
                self.u8(*opcode);
                self.u16(class);
            }
            InsnKind::Field {
                opcode,
                owner,
                name,
                desc,
            } => {
                let field = self.pool.field(owner, name, desc)?;
                self.u8(*opcode);
                self.u16(field);
            }
            InsnKind::Method {
                opcode,
                owner,
                name,
                desc,
                is_interface,
            } => {
                let method = self.pool.method(owner, name, desc, *is_interface)?;
                self.u8(*opcode);
                self.u16(method);
                if *opcode == INVOKEINTERFACE {
                    let count = MethodDescriptor::parse(desc)?.argument_slots(false);
                    self.u8(u8::try_from(count).unwrap_or(u8::MAX));
                    self.u8(0);
                }
            }
            InsnKind::InvokeDynamic {
                name,
                desc,
                bsm,
                bsm_args,
            } => {
                let call_site = self.pool.invoke_dynamic(name, desc, bsm, bsm_args)?;
                self.u8(INVOKEDYNAMIC);
                self.u16(call_site);
                self.u16(0);
            }
            InsnKind::Jump { opcode, target } => {
                self.u8(*opcode);
                self.branch(start, *target, false);
            }
            InsnKind::Ldc(value) => {
                let index = self.pool.loadable(value)?;
                let wide = match value {
                    LdcValue::Long(_) | LdcValue::Double(_) => true,
                    LdcValue::Dynamic { desc, .. } => matches!(desc.as_str(), "J" | "D"),
                    _ => false,
                };
                match u8::try_from(index) {
                    _ if wide => {
                        self.u8(LDC2_W);
                        self.u16(index);
                    }
                    Ok(short) => {
                        self.u8(LDC);
                        self.u8(short);
                    }
                    Err(_) => {
                        self.u8(LDC_W);
                        self.u16(index);
                    }
                }
            }
            InsnKind::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                self.u8(TABLESWITCH);
                self.align_switch();
                self.branch(start, *default, true);
                write_be(&mut self.code, *min);
                write_be(&mut self.code, *max);
                for target in targets {
                    self.branch(start, *target, true);
                }
            }
            InsnKind::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                self.u8(LOOKUPSWITCH);
                self.align_switch();
                self.branch(start, *default, true);
                write_be(&mut self.code, keys.len() as i32);
                for (key, target) in keys.iter().zip(targets) {
                    write_be(&mut self.code, *key);
                    self.branch(start, *target, true);
                }
            }
            InsnKind::MultiANewArray { desc, dims } => {
                let class = self.pool.class(desc)?;
                self.u8(MULTIANEWARRAY);
                self.u16(class);
                self.u8(*dims);
            }
            InsnKind::Label(_) | InsnKind::LineNumber { .. } => {}
        }
        Ok(())
    }

    fn label(&self, label: LabelId) -> Result<usize> {
        self.labels.get(&label).copied().ok_or_else(|| {
            write_error!(
                self.owner,
                "{} refers to a label that is not in its body",
                self.method.signature()
            )
        })
    }

    fn patch_branches(&mut self) -> Result<()> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.label(fixup.label)?;
            let offset = target as i64 - fixup.from as i64;
            let mut at = fixup.at;
            if fixup.wide {
                let offset = i32::try_from(offset).map_err(|_| self.too_far(fixup.from))?;
                write_be_at(&mut self.code, &mut at, offset)?;
            } else {
                let offset = i16::try_from(offset).map_err(|_| self.too_far(fixup.from))?;
                write_be_at(&mut self.code, &mut at, offset)?;
            }
        }
        Ok(())
    }

    fn too_far(&self, from: usize) -> crate::Error {
        write_error!(
            self.owner,
            "branch at offset {} of {} does not fit in 16 bits",
            from,
            self.method.signature()
        )
    }

    fn write_exception_table(&mut self, body: &mut Vec<u8>) -> Result<()> {
        let method = self.method;
        let mut entries = Vec::with_capacity(method.try_catch_blocks.len());
        for tcb in &method.try_catch_blocks {
            let (start, end, handler) = (
                self.label(tcb.start)?,
                self.label(tcb.end)?,
                self.label(tcb.handler)?,
            );
            if start >= end {
                log::debug!(
                    "Dropping empty exception range in {}.{}",
                    self.owner,
                    self.method.signature()
                );
                continue;
            }
            let catch_type = match &tcb.catch_type {
                Some(name) => self.pool.class(name)?,
                None => 0,
            };
            entries.push([start as u16, end as u16, handler as u16, catch_type]);
        }

        write_be(body, entries.len() as u16);
        for entry in entries {
            for value in entry {
                write_be(body, value);
            }
        }
        Ok(())
    }

    fn line_number_table(&self) -> Option<Vec<u8>> {
        let lines: Vec<(u16, u16)> = self
            .lines
            .iter()
            .filter_map(|(line, label)| {
                let pc = *self.labels.get(label)?;
                (pc < self.code.len()).then_some((pc as u16, *line))
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        let mut table = Vec::with_capacity(2 + lines.len() * 4);
        write_be(&mut table, lines.len() as u16);
        for (pc, line) in lines {
            write_be(&mut table, pc);
            write_be(&mut table, line);
        }
        Some(table)
    }

    /// `LocalVariableTable`, or `LocalVariableTypeTable` when `signatures` is set.
    fn local_variable_table(&mut self, signatures: bool) -> Result<Option<Vec<u8>>> {
        let method = self.method;
        let mut entries = Vec::new();
        for local in &method.local_variables {
            let desc = if signatures {
                match &local.signature {
                    Some(signature) => signature,
                    None => continue,
                }
            } else {
                &local.desc
            };
            let (Some(start), Some(end)) =
                (self.labels.get(&local.start), self.labels.get(&local.end))
            else {
                continue;
            };
            if end < start {
                continue;
            }
            entries.push([
                *start as u16,
                (end - start) as u16,
                self.pool.utf8(&local.name)?,
                self.pool.utf8(desc)?,
                local.index,
            ]);
        }
        if entries.is_empty() {
            return Ok(None);
        }
        let mut table = Vec::with_capacity(2 + entries.len() * 10);
        write_be(&mut table, entries.len() as u16);
        for entry in entries {
            for value in entry {
                write_be(&mut table, value);
            }
        }
        Ok(Some(table))
    }

    /// Offsets that need a frame: branch targets, handler entries, and instructions
    /// after an unconditional transfer.
    fn frame_offsets(&self) -> Result<BTreeSet<usize>> {
        let mut offsets = BTreeSet::new();
        let mut after_transfer = false;
        for (index, insn) in self.method.instructions.iter().enumerate() {
            let Some(offset) = self.offsets.get(&index) else {
                continue;
            };
            if after_transfer {
                offsets.insert(*offset);
            }
            for target in insn.branch_targets() {
                offsets.insert(self.label(target)?);
            }
            after_transfer = match &insn.kind {
                InsnKind::Jump { opcode, .. } => *opcode == GOTO,
                InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => true,
                InsnKind::Simple(op) => is_return(*op) || *op == ATHROW,
                _ => false,
            };
        }
        for tcb in &self.method.try_catch_blocks {
            let (start, end) = (self.label(tcb.start)?, self.label(tcb.end)?);
            if start < end {
                offsets.insert(self.label(tcb.handler)?);
            }
        }
        offsets.retain(|offset| *offset < self.code.len());
        Ok(offsets)
    }

    fn stack_map_table(&mut self, frames: &MethodFrames) -> Result<Option<Vec<u8>>> {
        let offsets = self.frame_offsets()?;
        if offsets.is_empty() {
            return Ok(None);
        }
        let at_offset: HashMap<usize, usize> = self
            .offsets
            .iter()
            .map(|(index, offset)| (*offset, *index))
            .collect();

        let mut table = Vec::new();
        write_be(&mut table, offsets.len() as u16);
        let mut previous: Option<usize> = None;
        for offset in offsets {
            let frame = at_offset
                .get(&offset)
                .and_then(|index| frames.frames.get(*index))
                .and_then(Option::as_ref)
                .ok_or_else(|| {
                    write_error!(
                        self.owner,
                        "no frame at offset {} of {}",
                        offset,
                        self.method.signature()
                    )
                })?;
            let delta = match previous {
                None => offset,
                Some(previous) => offset - previous - 1,
            };
            previous = Some(offset);

            // full_frame
            table.push(255);
            write_be(&mut table, delta as u16);
            self.write_types(&mut table, &compact(&frame.locals, true))?;
            self.write_types(&mut table, &compact(&frame.stack, false))?;
        }
        Ok(Some(table))
    }

    fn write_types(&mut self, out: &mut Vec<u8>, types: &[&VerificationType]) -> Result<()> {
        write_be(out, types.len() as u16);
        for ty in types {
            match ty {
                VerificationType::Top => out.push(0),
                VerificationType::Integer => out.push(1),
                VerificationType::Float => out.push(2),
                VerificationType::Double => out.push(3),
                VerificationType::Long => out.push(4),
                VerificationType::Null => out.push(5),
                VerificationType::UninitializedThis => out.push(6),
                VerificationType::Object(name) => {
                    let class = self.pool.class(name)?;
                    out.push(7);
                    write_be(out, class);
                }
                VerificationType::Uninitialized(index) => {
                    let offset = self.offsets.get(index).copied().ok_or_else(|| {
                        write_error!(
                            self.owner,
                            "uninitialized value of an unreachable NEW in {}",
                            self.method.signature()
                        )
                    })?;
                    out.push(8);
                    write_be(out, offset as u16);
                }
            }
        }
        Ok(())
    }
}

/// Frame entries for a word list: the second word of `long` and `double` values is
/// implied, and trailing unusable locals are left out.
fn compact(words: &[VerificationType], trim: bool) -> Vec<&VerificationType> {
    let mut entries = Vec::with_capacity(words.len());
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        entries.push(word);
        if word.is_wide() {
            iter.next();
        }
    }
    if trim {
        while entries.last() == Some(&&VerificationType::Top) {
            entries.pop();
        }
    }
    entries
}
