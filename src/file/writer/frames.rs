//! Verification types for `StackMapTable` frames.
//!
//! Any edit invalidates the frames a class file carried, so the writer infers the
//! verification type of every local and stack word from scratch, the way the
//! verifier itself does. Two reference types meeting at a join are merged into their
//! closest common superclass, which is looked up through the [`ResolverChain`]; the
//! class being written answers for itself. Interfaces and classes that cannot be
//! resolved merge to `java/lang/Object`.
//!
//! Values are tracked per word: a `long` or `double` occupies its own entry followed
//! by [`VerificationType::Top`], on the stack as well as in the locals, which turns the
//! `DUP` family into plain word shuffles.

use std::collections::{HashMap, VecDeque};

use crate::{
    analysis::required_locals,
    ir::{
        opcodes::{array_type::*, *},
        Class, ClassAccess, Insn, InsnKind, LabelId, LdcValue, Method, MethodDescriptor, Type,
    },
    resolver::ResolverChain,
    Result,
};

const OBJECT: &str = "java/lang/Object";

/// Longest superclass chain followed before giving up.
const MAX_HIERARCHY_DEPTH: usize = 256;

/// One entry of a `StackMapTable` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Result of the `NEW` instruction at this index, not yet constructed
    Uninitialized(usize),
    /// Internal name or array descriptor
    Object(String),
}

impl VerificationType {
    fn of(ty: &Type) -> Option<VerificationType> {
        Some(match ty {
            Type::Void => return None,
            Type::Boolean | Type::Char | Type::Byte | Type::Short | Type::Int => {
                VerificationType::Integer
            }
            Type::Float => VerificationType::Float,
            Type::Long => VerificationType::Long,
            Type::Double => VerificationType::Double,
            Type::Object(name) => VerificationType::Object(name.clone()),
            Type::Array(desc) => VerificationType::Object(desc.clone()),
        })
    }

    fn object(name: &str) -> VerificationType {
        VerificationType::Object(name.to_string())
    }

    pub(crate) fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }
}

/// Verification types of the locals and the operand stack before one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeFrame {
    pub(crate) locals: Vec<VerificationType>,
    pub(crate) stack: Vec<VerificationType>,
}

type Step<T = ()> = std::result::Result<T, String>;

impl TypeFrame {
    fn push(&mut self, value: VerificationType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(VerificationType::Top);
        }
    }

    fn push_type(&mut self, desc: &str) -> Step {
        let ty = Type::parse(desc).map_err(|e| e.to_string())?;
        if let Some(value) = VerificationType::of(&ty) {
            self.push(value);
        }
        Ok(())
    }

    fn pop_word(&mut self) -> Step<VerificationType> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_string())
    }

    fn pop(&mut self, words: usize) -> Step {
        if self.stack.len() < words {
            return Err("stack underflow".to_string());
        }
        self.stack.truncate(self.stack.len() - words);
        Ok(())
    }

    /// Copies the top `take` words beneath the `under` words below them.
    fn dup(&mut self, take: usize, under: usize) -> Step {
        let len = self.stack.len();
        if len < take + under {
            return Err("stack underflow".to_string());
        }
        let copied = self.stack[len - take..].to_vec();
        let at = len - take - under;
        self.stack.splice(at..at, copied);
        Ok(())
    }

    fn local(&self, var: u16) -> Step<VerificationType> {
        self.locals
            .get(usize::from(var))
            .cloned()
            .ok_or_else(|| format!("local {} out of range", var))
    }

    fn set_local(&mut self, var: u16, value: VerificationType) -> Step {
        let var = usize::from(var);
        let end = var + if value.is_wide() { 2 } else { 1 };
        if end > self.locals.len() {
            return Err(format!("local {} out of range", var));
        }
        if var > 0 && self.locals[var - 1].is_wide() {
            self.locals[var - 1] = VerificationType::Top;
        }
        if end == var + 2 {
            self.locals[var + 1] = VerificationType::Top;
        }
        self.locals[var] = value;
        Ok(())
    }

    fn replace(&mut self, from: &VerificationType, to: &VerificationType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }
}

/// Superclass lookups for merging reference types.
pub(crate) struct Hierarchy<'a> {
    class: &'a Class,
    resolver: &'a ResolverChain,
}

impl<'a> Hierarchy<'a> {
    pub(crate) fn new(class: &'a Class, resolver: &'a ResolverChain) -> Self {
        Hierarchy { class, resolver }
    }

    /// `None` when `name` cannot be resolved.
    fn super_name(&self, name: &str) -> Option<Option<String>> {
        if name == self.class.name {
            return Some(self.class.super_name.clone());
        }
        self.resolver
            .resolve(name)
            .map(|class| class.super_name.clone())
    }

    fn is_interface(&self, name: &str) -> bool {
        if name == self.class.name {
            return self.class.access.contains(ClassAccess::INTERFACE);
        }
        self.resolver
            .resolve(name)
            .is_some_and(|class| class.access.contains(ClassAccess::INTERFACE))
    }

    fn ancestors(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut current = name.to_string();
        while chain.len() < MAX_HIERARCHY_DEPTH {
            match self.super_name(&current) {
                Some(Some(parent)) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                _ => break,
            }
        }
        chain
    }

    /// Closest class both `a` and `b` extend.
    pub(crate) fn common_superclass(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if self.is_interface(a) || self.is_interface(b) {
            return OBJECT.to_string();
        }
        let ancestors = self.ancestors(a);
        self.ancestors(b)
            .into_iter()
            .find(|candidate| ancestors.contains(candidate))
            .unwrap_or_else(|| OBJECT.to_string())
    }

    /// Merges two internal names or array descriptors.
    fn merge_references(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        match (a.strip_prefix('['), b.strip_prefix('[')) {
            (Some(left), Some(right)) => match (component(left), component(right)) {
                (Some(left), Some(right)) => {
                    let merged = self.merge_references(left, right);
                    if merged.starts_with('[') {
                        format!("[{}", merged)
                    } else {
                        format!("[L{};", merged)
                    }
                }
                _ => OBJECT.to_string(),
            },
            (None, None) => self.common_superclass(a, b),
            _ => OBJECT.to_string(),
        }
    }

    fn merge(&self, a: &VerificationType, b: &VerificationType) -> VerificationType {
        use VerificationType as V;
        if a == b {
            return a.clone();
        }
        match (a, b) {
            (V::Null, V::Object(_)) => b.clone(),
            (V::Object(_), V::Null) => a.clone(),
            (V::Object(left), V::Object(right)) => V::Object(self.merge_references(left, right)),
            _ => V::Top,
        }
    }
}

/// Reference component of an array descriptor's element, `None` for primitives.
fn component(element: &str) -> Option<&str> {
    if element.starts_with('[') {
        Some(element)
    } else {
        element.strip_prefix('L')?.strip_suffix(';')
    }
}

/// Frames of every instruction of one method body.
#[derive(Debug)]
pub(crate) struct MethodFrames {
    /// Frame before each node; `None` for unreachable nodes
    pub(crate) frames: Vec<Option<TypeFrame>>,
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
}

/// Infers the verification types of `method`, declared in the class `hierarchy` is for.
pub(crate) fn compute(method: &Method, hierarchy: &Hierarchy<'_>) -> Result<MethodFrames> {
    FrameComputer {
        owner: &hierarchy.class.name,
        method,
        hierarchy,
    }
    .run()
}

struct FrameComputer<'a> {
    owner: &'a str,
    method: &'a Method,
    hierarchy: &'a Hierarchy<'a>,
}

impl FrameComputer<'_> {
    fn fail(&self, index: usize, insn: &Insn, message: &str) -> crate::Error {
        write_error!(
            self.owner,
            "{} at instruction {} of {}: {}",
            insn.opcode().map_or("label", mnemonic),
            index,
            self.method.signature(),
            message
        )
    }

    fn run(&self) -> Result<MethodFrames> {
        let method = self.method;
        let insns = method.instructions.as_slice();
        let descriptor = method.descriptor()?;
        let max_locals = method
            .max_locals
            .max(descriptor.argument_slots(method.is_static()))
            .max(required_locals(insns));
        if insns.is_empty() {
            return Ok(MethodFrames {
                frames: Vec::new(),
                max_stack: 0,
                max_locals,
            });
        }

        let labels: HashMap<LabelId, usize> = insns
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn.kind {
                InsnKind::Label(label) => Some((label, i)),
                _ => None,
            })
            .collect();
        let handlers = self.handlers(insns.len(), &labels)?;

        let mut frames: Vec<Option<TypeFrame>> = vec![None; insns.len()];
        frames[0] = Some(self.entry_frame(&descriptor, max_locals));
        let mut max_stack = 0;
        let mut worklist = VecDeque::from([0usize]);
        let mut queued = vec![false; insns.len()];
        queued[0] = true;

        while let Some(i) = worklist.pop_front() {
            queued[i] = false;
            let Some(before) = frames[i].clone() else {
                continue;
            };
            let insn = &insns[i];
            max_stack = max_stack.max(before.stack.len());

            let mut after = before.clone();
            self.execute(&mut after, i, insn, insns)
                .map_err(|message| self.fail(i, insn, &message))?;
            max_stack = max_stack.max(after.stack.len());

            let mut edges: Vec<(usize, TypeFrame)> = self
                .successors(i, insn, &labels)?
                .into_iter()
                .map(|target| (target, after.clone()))
                .collect();
            for (handler, catch_type) in &handlers[i] {
                let exception = catch_type.as_deref().unwrap_or("java/lang/Throwable");
                edges.push((
                    *handler,
                    TypeFrame {
                        locals: before.locals.clone(),
                        stack: vec![VerificationType::object(exception)],
                    },
                ));
            }

            for (target, incoming) in edges {
                let changed = match frames[target].as_mut() {
                    None => {
                        frames[target] = Some(incoming);
                        true
                    }
                    Some(existing) => self
                        .merge(existing, &incoming)
                        .map_err(|message| self.fail(target, &insns[target], &message))?,
                };
                if changed && !queued[target] {
                    queued[target] = true;
                    worklist.push_back(target);
                }
            }
        }

        Ok(MethodFrames {
            frames,
            max_stack: u16::try_from(max_stack)
                .map_err(|_| write_error!(self.owner, "operand stack exceeds {} words", u16::MAX))?,
            max_locals,
        })
    }

    fn entry_frame(&self, descriptor: &MethodDescriptor, max_locals: u16) -> TypeFrame {
        let method = self.method;
        let mut frame = TypeFrame {
            locals: Vec::with_capacity(usize::from(max_locals)),
            stack: Vec::new(),
        };
        if !method.is_static() {
            frame.locals.push(if method.name == "<init>" && self.owner != OBJECT {
                VerificationType::UninitializedThis
            } else {
                VerificationType::object(self.owner)
            });
        }
        for argument in descriptor.arguments.iter().filter_map(VerificationType::of) {
            let wide = argument.is_wide();
            frame.locals.push(argument);
            if wide {
                frame.locals.push(VerificationType::Top);
            }
        }
        frame
            .locals
            .resize(usize::from(max_locals), VerificationType::Top);
        frame
    }

    fn handlers(
        &self,
        len: usize,
        labels: &HashMap<LabelId, usize>,
    ) -> Result<Vec<Vec<(usize, Option<String>)>>> {
        let mut handlers = vec![Vec::new(); len];
        for tcb in &self.method.try_catch_blocks {
            let position = |label: LabelId| {
                labels.get(&label).copied().ok_or_else(|| {
                    write_error!(
                        self.owner,
                        "exception range of {} refers to a missing label",
                        self.method.signature()
                    )
                })
            };
            let (start, end, handler) = (
                position(tcb.start)?,
                position(tcb.end)?,
                position(tcb.handler)?,
            );
            for covered in handlers.iter_mut().take(end).skip(start) {
                covered.push((handler, tcb.catch_type.clone()));
            }
        }
        Ok(handlers)
    }

    fn successors(
        &self,
        i: usize,
        insn: &Insn,
        labels: &HashMap<LabelId, usize>,
    ) -> Result<Vec<usize>> {
        let falls_through = match &insn.kind {
            InsnKind::Jump { opcode, .. } => *opcode != GOTO,
            InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => false,
            InsnKind::Simple(op) => !(is_return(*op) || *op == ATHROW),
            _ => true,
        };
        let mut successors = insn
            .branch_targets()
            .iter()
            .map(|label| {
                labels
                    .get(label)
                    .copied()
                    .ok_or_else(|| self.fail(i, insn, "branch to a label outside the method"))
            })
            .collect::<Result<Vec<usize>>>()?;
        if falls_through {
            if i + 1 >= self.method.instructions.len() {
                return Err(self.fail(i, insn, "execution can fall off the end of the code"));
            }
            successors.push(i + 1);
        }
        Ok(successors)
    }

    fn merge(&self, existing: &mut TypeFrame, incoming: &TypeFrame) -> Step<bool> {
        if existing.stack.len() != incoming.stack.len() {
            return Err(format!(
                "stack heights {} and {} meet",
                existing.stack.len(),
                incoming.stack.len()
            ));
        }
        let mut changed = false;
        let slots = existing
            .locals
            .iter_mut()
            .zip(&incoming.locals)
            .chain(existing.stack.iter_mut().zip(&incoming.stack));
        for (slot, other) in slots {
            let merged = self.hierarchy.merge(slot, other);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn execute(&self, frame: &mut TypeFrame, index: usize, insn: &Insn, insns: &[Insn]) -> Step {
        use VerificationType as V;
        match &insn.kind {
            InsnKind::Label(_) | InsnKind::LineNumber { .. } | InsnKind::Iinc { .. } => {}
            InsnKind::Simple(op) => execute_simple(frame, *op)?,
            InsnKind::Int { opcode, operand } => {
                if *opcode == NEWARRAY {
                    frame.pop(1)?;
                    frame.push(V::Object(primitive_array(*operand)?.to_string()));
                } else {
                    frame.push(V::Integer);
                }
            }
            InsnKind::Ldc(value) => match value {
                LdcValue::Int(_) => frame.push(V::Integer),
                LdcValue::Float(_) => frame.push(V::Float),
                LdcValue::Long(_) => frame.push(V::Long),
                LdcValue::Double(_) => frame.push(V::Double),
                LdcValue::String(_) => frame.push(V::object("java/lang/String")),
                LdcValue::Class(_) => frame.push(V::object("java/lang/Class")),
                LdcValue::MethodType(_) => frame.push(V::object("java/lang/invoke/MethodType")),
                LdcValue::Handle(_) => frame.push(V::object("java/lang/invoke/MethodHandle")),
                LdcValue::Dynamic { desc, .. } => frame.push_type(desc)?,
            },
            InsnKind::Var { opcode, var } => match *opcode {
                ILOAD => frame.push(V::Integer),
                LLOAD => frame.push(V::Long),
                FLOAD => frame.push(V::Float),
                DLOAD => frame.push(V::Double),
                ALOAD => frame.push(frame.local(*var)?),
                ISTORE | FSTORE | ASTORE => {
                    let value = frame.pop_word()?;
                    frame.set_local(*var, value)?;
                }
                LSTORE | DSTORE => {
                    frame.pop(2)?;
                    let value = if *opcode == LSTORE { V::Long } else { V::Double };
                    frame.set_local(*var, value)?;
                }
                _ => return Err("subroutines are not supported".to_string()),
            },
            InsnKind::Type { opcode, desc } => match *opcode {
                NEW => frame.push(V::Uninitialized(index)),
                ANEWARRAY => {
                    frame.pop(1)?;
                    let element = if desc.starts_with('[') {
                        desc.clone()
                    } else {
                        format!("L{};", desc)
                    };
                    frame.push(V::Object(format!("[{}", element)));
                }
                CHECKCAST => {
                    frame.pop(1)?;
                    frame.push(V::Object(desc.clone()));
                }
                _ => {
                    frame.pop(1)?;
                    frame.push(V::Integer);
                }
            },
            InsnKind::Field { opcode, desc, .. } => {
                let size = usize::from(Type::parse(desc).map_err(|e| e.to_string())?.size());
                match *opcode {
                    GETSTATIC => frame.push_type(desc)?,
                    PUTSTATIC => frame.pop(size)?,
                    GETFIELD => {
                        frame.pop(1)?;
                        frame.push_type(desc)?;
                    }
                    _ => frame.pop(size + 1)?,
                }
            }
            InsnKind::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } => {
                let descriptor = MethodDescriptor::parse(desc).map_err(|e| e.to_string())?;
                frame.pop(usize::from(descriptor.argument_slots(true)))?;
                if *opcode != INVOKESTATIC {
                    let receiver = frame.pop_word()?;
                    if *opcode == INVOKESPECIAL && name == "<init>" {
                        let constructed = match &receiver {
                            V::UninitializedThis => V::object(self.owner),
                            V::Uninitialized(at) => match insns.get(*at).map(|i| &i.kind) {
                                Some(InsnKind::Type { desc, .. }) => V::Object(desc.clone()),
                                _ => V::Object(owner.clone()),
                            },
                            _ => return Err("constructor called on an initialized value".into()),
                        };
                        frame.replace(&receiver, &constructed);
                    }
                }
                if let Some(value) = VerificationType::of(&descriptor.return_type) {
                    frame.push(value);
                }
            }
            InsnKind::InvokeDynamic { desc, .. } => {
                let descriptor = MethodDescriptor::parse(desc).map_err(|e| e.to_string())?;
                frame.pop(usize::from(descriptor.argument_slots(true)))?;
                if let Some(value) = VerificationType::of(&descriptor.return_type) {
                    frame.push(value);
                }
            }
            InsnKind::Jump { opcode, .. } => match *opcode {
                IFEQ..=IFLE | IFNULL | IFNONNULL => frame.pop(1)?,
                IF_ICMPEQ..=IF_ACMPNE => frame.pop(2)?,
                GOTO => {}
                _ => return Err("subroutines are not supported".to_string()),
            },
            InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => frame.pop(1)?,
            InsnKind::MultiANewArray { desc, dims } => {
                frame.pop(usize::from(*dims))?;
                frame.push(V::Object(desc.clone()));
            }
        }
        Ok(())
    }
}

fn primitive_array(code: i32) -> Step<&'static str> {
    Ok(match code {
        T_BOOLEAN => "[Z",
        T_CHAR => "[C",
        T_FLOAT => "[F",
        T_DOUBLE => "[D",
        T_BYTE => "[B",
        T_SHORT => "[S",
        T_INT => "[I",
        T_LONG => "[J",
        other => return Err(format!("invalid array type {}", other)),
    })
}

fn execute_simple(frame: &mut TypeFrame, op: u8) -> Step {
    use VerificationType as V;
    let numeric = |offset: u8| match offset % 4 {
        0 => V::Integer,
        1 => V::Long,
        2 => V::Float,
        _ => V::Double,
    };
    let words = |value: &V| if value.is_wide() { 2 } else { 1 };

    match op {
        NOP => {}
        ACONST_NULL => frame.push(V::Null),
        ICONST_M1..=ICONST_5 => frame.push(V::Integer),
        LCONST_0 | LCONST_1 => frame.push(V::Long),
        FCONST_0..=FCONST_2 => frame.push(V::Float),
        DCONST_0 | DCONST_1 => frame.push(V::Double),
        IALOAD | BALOAD | CALOAD | SALOAD => {
            frame.pop(2)?;
            frame.push(V::Integer);
        }
        LALOAD | FALOAD | DALOAD => {
            frame.pop(2)?;
            frame.push(numeric(op - IALOAD));
        }
        AALOAD => {
            frame.pop(1)?;
            let element = match frame.pop_word()? {
                V::Object(desc) => desc
                    .strip_prefix('[')
                    .and_then(component)
                    .map_or_else(|| V::object(OBJECT), V::object),
                V::Null => V::Null,
                _ => V::object(OBJECT),
            };
            frame.push(element);
        }
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => frame.pop(3)?,
        LASTORE | DASTORE => frame.pop(4)?,
        POP => frame.pop(1)?,
        POP2 => frame.pop(2)?,
        DUP => frame.dup(1, 0)?,
        DUP_X1 => frame.dup(1, 1)?,
        DUP_X2 => frame.dup(1, 2)?,
        DUP2 => frame.dup(2, 0)?,
        DUP2_X1 => frame.dup(2, 1)?,
        DUP2_X2 => frame.dup(2, 2)?,
        SWAP => {
            let top = frame.pop_word()?;
            let below = frame.pop_word()?;
            frame.stack.push(top);
            frame.stack.push(below);
        }
        IADD..=DREM => {
            let value = numeric(op - IADD);
            frame.pop(2 * words(&value))?;
            frame.push(value);
        }
        INEG..=DNEG => {
            let value = numeric(op - INEG);
            frame.pop(words(&value))?;
            frame.push(value);
        }
        ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
            frame.pop(2)?;
            frame.push(V::Integer);
        }
        LSHL | LSHR | LUSHR => {
            frame.pop(3)?;
            frame.push(V::Long);
        }
        LAND | LOR | LXOR => {
            frame.pop(4)?;
            frame.push(V::Long);
        }
        I2L..=I2S => {
            let (from, to) = match op {
                I2L => (1, V::Long),
                I2F => (1, V::Float),
                I2D => (1, V::Double),
                L2I => (2, V::Integer),
                L2F => (2, V::Float),
                L2D => (2, V::Double),
                F2I => (1, V::Integer),
                F2L => (1, V::Long),
                F2D => (1, V::Double),
                D2I => (2, V::Integer),
                D2L => (2, V::Long),
                D2F => (2, V::Float),
                _ => (1, V::Integer),
            };
            frame.pop(from)?;
            frame.push(to);
        }
        LCMP | DCMPL | DCMPG => {
            frame.pop(4)?;
            frame.push(V::Integer);
        }
        FCMPL | FCMPG => {
            frame.pop(2)?;
            frame.push(V::Integer);
        }
        IRETURN | FRETURN | ARETURN | ATHROW | MONITORENTER | MONITOREXIT => frame.pop(1)?,
        LRETURN | DRETURN => frame.pop(2)?,
        RETURN => {}
        ARRAYLENGTH => {
            frame.pop(1)?;
            frame.push(V::Integer);
        }
        other => return Err(format!("unexpected opcode {:#04x}", other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{MethodAccess, TryCatchBlock},
        resolver::MemoryResolver,
    };

    fn body(class: &Class, method: &Method) -> MethodFrames {
        let resolver = ResolverChain::new(0);
        compute(method, &Hierarchy::new(class, &resolver)).unwrap()
    }

    fn method(access: MethodAccess, name: &str, desc: &str, insns: Vec<Insn>) -> Method {
        let mut method = Method::new(access, name, desc);
        method.instructions.extend(insns);
        method
    }

    #[test]
    fn test_words_and_locals() {
        let class = Class::new("demo/A", Some(OBJECT));
        let m = method(
            MethodAccess::STATIC,
            "f",
            "(JI)J",
            vec![
                Insn::var(LLOAD, 0),
                Insn::simple(DUP2),
                Insn::simple(LADD),
                Insn::var(LSTORE, 3),
                Insn::var(LLOAD, 3),
                Insn::simple(LRETURN),
            ],
        );
        let frames = body(&class, &m);
        assert_eq!(frames.max_stack, 4);
        assert_eq!(frames.max_locals, 5);

        use VerificationType as V;
        let entry = frames.frames[0].as_ref().unwrap();
        assert_eq!(entry.locals, vec![V::Long, V::Top, V::Integer, V::Top, V::Top]);
        let at_load = frames.frames[4].as_ref().unwrap();
        assert_eq!(at_load.locals[3..], [V::Long, V::Top]);
        assert!(at_load.stack.is_empty());
    }

    #[test]
    fn test_constructor_initializes_this() {
        let class = Class::new("demo/A", Some(OBJECT));
        let m = method(
            MethodAccess::PUBLIC,
            "<init>",
            "()V",
            vec![
                Insn::var(ALOAD, 0),
                Insn::method(INVOKESPECIAL, OBJECT, "<init>", "()V"),
                Insn::type_insn(NEW, "demo/B"),
                Insn::simple(DUP),
                Insn::method(INVOKESPECIAL, "demo/B", "<init>", "()V"),
                Insn::simple(POP),
                Insn::simple(RETURN),
            ],
        );
        let frames = body(&class, &m);

        use VerificationType as V;
        assert_eq!(frames.frames[1].as_ref().unwrap().stack, vec![V::UninitializedThis]);
        assert_eq!(frames.frames[2].as_ref().unwrap().locals, vec![V::object("demo/A")]);
        assert_eq!(
            frames.frames[4].as_ref().unwrap().stack,
            vec![V::Uninitialized(2), V::Uninitialized(2)]
        );
        assert_eq!(frames.frames[5].as_ref().unwrap().stack, vec![V::object("demo/B")]);
    }

    #[test]
    fn test_join_merges_to_common_superclass() {
        let resolver = ResolverChain::new(16);
        resolver.add_resolver(
            MemoryResolver::new()
                .with_class(Class::new("demo/Base", Some(OBJECT)))
                .with_class(Class::new("demo/Left", Some("demo/Base")))
                .with_class(Class::new("demo/Right", Some("demo/Base"))),
        );

        let class = Class::new("demo/A", Some(OBJECT));
        let (other, join) = (LabelId::new(), LabelId::new());
        let m = method(
            MethodAccess::STATIC,
            "pick",
            "(Z)Ljava/lang/Object;",
            vec![
                Insn::var(ILOAD, 0),
                Insn::jump(IFEQ, other),
                Insn::type_insn(NEW, "demo/Left"),
                Insn::simple(DUP),
                Insn::method(INVOKESPECIAL, "demo/Left", "<init>", "()V"),
                Insn::jump(GOTO, join),
                Insn::label(other),
                Insn::simple(ACONST_NULL),
                Insn::type_insn(CHECKCAST, "demo/Right"),
                Insn::label(join),
                Insn::simple(ARETURN),
            ],
        );
        let frames = compute(&m, &Hierarchy::new(&class, &resolver)).unwrap();
        assert_eq!(
            frames.frames[9].as_ref().unwrap().stack,
            vec![VerificationType::object("demo/Base")]
        );

        let hierarchy = Hierarchy::new(&class, &resolver);
        assert_eq!(hierarchy.common_superclass("demo/Left", "demo/Unknown"), OBJECT);
        assert_eq!(
            hierarchy.merge_references("[Ldemo/Left;", "[Ldemo/Right;"),
            "[Ldemo/Base;"
        );
        assert_eq!(hierarchy.merge_references("[I", "[Ldemo/Left;"), OBJECT);
    }

    #[test]
    fn test_unreachable_code_and_handlers() {
        let class = Class::new("demo/A", Some(OBJECT));
        let (start, end, handler) = (LabelId::new(), LabelId::new(), LabelId::new());
        let mut m = method(
            MethodAccess::STATIC,
            "guarded",
            "()I",
            vec![
                Insn::label(start),
                Insn::method(INVOKESTATIC, "demo/B", "risky", "()I"),
                Insn::simple(IRETURN),
                Insn::simple(NOP),
                Insn::label(end),
                Insn::label(handler),
                Insn::simple(POP),
                Insn::simple(ICONST_0),
                Insn::simple(IRETURN),
            ],
        );
        m.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: Some("java/lang/RuntimeException".into()),
        });
        let frames = body(&class, &m);

        assert!(frames.frames[3].is_none());
        assert_eq!(
            frames.frames[6].as_ref().unwrap().stack,
            vec![VerificationType::object("java/lang/RuntimeException")]
        );
    }
}
