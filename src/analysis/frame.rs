//! Abstract frames: the local slots and operand stack before one instruction.
//!
//! [`Frame::execute`] simulates one instruction the way the JVM verifier does,
//! delegating every value computation to the [`Interpreter`]. Long and double values
//! occupy a single stack entry; their second local slot holds an empty value.

use std::rc::Rc;

use thiserror::Error;

use crate::{
    analysis::{interpreter::Interpreter, value::ValueRef},
    ir::{opcodes::*, Insn, InsnKind, MethodDescriptor},
};

/// Why an instruction could not be simulated.
#[derive(Debug, Error)]
pub(crate) enum FrameError {
    #[error("operand stack underflow")]
    Underflow,

    #[error("operand stack exceeds the declared maximum of {0}")]
    Overflow(usize),

    #[error("local {0} is outside the frame")]
    Local(u16),

    #[error("stack heights {0} and {1} differ at a join")]
    HeightMismatch(usize, usize),

    #[error("{0} expects a {1}-word value on top of the stack")]
    WordSize(&'static str, u16),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("malformed call descriptor '{0}'")]
    Descriptor(String),
}

type FrameResult<T> = std::result::Result<T, FrameError>;

/// Local slots and operand stack at one program point.
///
/// Stack entry 0 is the bottom of the stack.
#[derive(Debug, Clone)]
pub struct Frame {
    locals: Vec<ValueRef>,
    stack: Vec<ValueRef>,
    stack_limit: Option<usize>,
}

impl Frame {
    pub(crate) fn new(locals: Vec<ValueRef>, stack_limit: Option<usize>) -> Self {
        Frame {
            locals,
            stack: Vec::new(),
            stack_limit,
        }
    }

    /// All local slots.
    #[must_use]
    pub fn locals(&self) -> &[ValueRef] {
        &self.locals
    }

    /// The local in slot `index`.
    #[must_use]
    pub fn local(&self, index: usize) -> Option<&ValueRef> {
        self.locals.get(index)
    }

    /// The operand stack, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[ValueRef] {
        &self.stack
    }

    /// Number of stack entries (not words).
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Stack entry `index`, counted from the bottom.
    #[must_use]
    pub fn stack_value(&self, index: usize) -> Option<&ValueRef> {
        self.stack.get(index)
    }

    /// Stack words in use.
    #[must_use]
    pub fn stack_words(&self) -> usize {
        self.stack.iter().map(|value| usize::from(value.size())).sum()
    }

    pub(crate) fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn push(&mut self, value: ValueRef) -> FrameResult<()> {
        if let Some(limit) = self.stack_limit {
            if self.stack_words() + usize::from(value.size()) > limit {
                return Err(FrameError::Overflow(limit));
            }
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_opt(&mut self, value: Option<ValueRef>) -> FrameResult<()> {
        match value {
            Some(value) => self.push(value),
            None => Ok(()),
        }
    }

    fn pop(&mut self) -> FrameResult<ValueRef> {
        self.stack.pop().ok_or(FrameError::Underflow)
    }

    fn pop_many(&mut self, count: usize) -> FrameResult<Vec<ValueRef>> {
        if count > self.stack.len() {
            return Err(FrameError::Underflow);
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn get_local(&self, var: u16) -> FrameResult<&ValueRef> {
        self.locals.get(usize::from(var)).ok_or(FrameError::Local(var))
    }

    fn set_local(&mut self, var: u16, value: ValueRef) -> FrameResult<()> {
        let slot = self
            .locals
            .get_mut(usize::from(var))
            .ok_or(FrameError::Local(var))?;
        *slot = value;
        Ok(())
    }

    /// Simulates the instruction at `index`, turning this frame into the frame after it.
    pub(crate) fn execute(
        &mut self,
        index: usize,
        insn: &Insn,
        interp: &mut Interpreter<'_>,
    ) -> FrameResult<()> {
        match &insn.kind {
            InsnKind::Label(_) | InsnKind::LineNumber { .. } => Ok(()),
            InsnKind::Simple(op) => self.execute_simple(*op, index, insn, interp),
            InsnKind::Int { opcode, .. } => {
                if *opcode == NEWARRAY {
                    let count = self.pop()?;
                    let array = interp.unary_operation(insn, &count);
                    self.push_opt(array)
                } else {
                    let value = interp.new_operation(insn);
                    self.push(value)
                }
            }
            InsnKind::Ldc(_) => {
                let value = interp.new_operation(insn);
                self.push(value)
            }
            InsnKind::Var { opcode, var } => match *opcode {
                ILOAD..=ALOAD => {
                    let local = self.get_local(*var)?.clone();
                    let value = interp.copy_operation(index, &local);
                    self.push(value)
                }
                ISTORE..=ASTORE => {
                    let top = self.pop()?;
                    let value = interp.copy_operation(index, &top);
                    self.store(*var, value, interp)
                }
                _ => Err(FrameError::Unsupported("RET")),
            },
            InsnKind::Iinc { var, .. } => {
                let local = self.get_local(*var)?.clone();
                match interp.unary_operation(insn, &local) {
                    Some(value) => self.set_local(*var, value),
                    None => Ok(()),
                }
            }
            InsnKind::Jump { opcode, .. } => match *opcode {
                GOTO | GOTO_W => Ok(()),
                JSR | JSR_W => Err(FrameError::Unsupported("JSR")),
                IF_ICMPEQ..=IF_ACMPNE => {
                    let value2 = self.pop()?;
                    let value1 = self.pop()?;
                    interp.binary_operation(insn, &value1, &value2);
                    Ok(())
                }
                _ => {
                    let value = self.pop()?;
                    interp.unary_operation(insn, &value);
                    Ok(())
                }
            },
            InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => {
                let key = self.pop()?;
                interp.unary_operation(insn, &key);
                Ok(())
            }
            InsnKind::Field { opcode, .. } => match *opcode {
                GETSTATIC => {
                    let value = interp.new_operation(insn);
                    self.push(value)
                }
                PUTSTATIC => {
                    let value = self.pop()?;
                    interp.unary_operation(insn, &value);
                    Ok(())
                }
                GETFIELD => {
                    let receiver = self.pop()?;
                    let value = interp.unary_operation(insn, &receiver);
                    self.push_opt(value)
                }
                _ => {
                    let value = self.pop()?;
                    let receiver = self.pop()?;
                    interp.binary_operation(insn, &receiver, &value);
                    Ok(())
                }
            },
            InsnKind::Method { opcode, desc, .. } => {
                let receiver = usize::from(*opcode != INVOKESTATIC);
                let count = argument_count(desc)? + receiver;
                let values = self.pop_many(count)?;
                let result = interp.nary_operation(insn, &values);
                self.push_opt(result)
            }
            InsnKind::InvokeDynamic { desc, .. } => {
                let values = self.pop_many(argument_count(desc)?)?;
                let result = interp.nary_operation(insn, &values);
                self.push_opt(result)
            }
            InsnKind::Type { opcode, .. } => {
                if *opcode == NEW {
                    let value = interp.new_operation(insn);
                    self.push(value)
                } else {
                    let value = self.pop()?;
                    let result = interp.unary_operation(insn, &value);
                    self.push_opt(result)
                }
            }
            InsnKind::MultiANewArray { dims, .. } => {
                let values = self.pop_many(usize::from(*dims))?;
                let result = interp.nary_operation(insn, &values);
                self.push_opt(result)
            }
        }
    }

    fn store(
        &mut self,
        var: u16,
        value: ValueRef,
        interp: &mut Interpreter<'_>,
    ) -> FrameResult<()> {
        let wide = value.size() == 2;
        self.set_local(var, value)?;
        if wide {
            let empty = interp.empty();
            self.set_local(var + 1, empty)?;
        }
        // Overwriting the second half of a wide local invalidates the whole local.
        if var > 0 {
            if let Some(previous) = self.locals.get(usize::from(var - 1)) {
                if previous.size() == 2 {
                    let empty = interp.empty();
                    self.set_local(var - 1, empty)?;
                }
            }
        }
        Ok(())
    }

    fn execute_simple(
        &mut self,
        op: u8,
        index: usize,
        insn: &Insn,
        interp: &mut Interpreter<'_>,
    ) -> FrameResult<()> {
        match op {
            NOP | RETURN => Ok(()),
            ACONST_NULL..=DCONST_1 => {
                let value = interp.new_operation(insn);
                self.push(value)
            }
            IALOAD..=SALOAD => {
                let array_index = self.pop()?;
                let array = self.pop()?;
                let value = interp.binary_operation(insn, &array, &array_index);
                self.push_opt(value)
            }
            IASTORE..=SASTORE => {
                let value = self.pop()?;
                let array_index = self.pop()?;
                let array = self.pop()?;
                interp.ternary_operation(insn, &array, &array_index, &value);
                Ok(())
            }
            POP => {
                let value = self.pop()?;
                if value.size() == 2 {
                    return Err(FrameError::WordSize("POP", 1));
                }
                Ok(())
            }
            POP2 => {
                let value = self.pop()?;
                if value.size() == 1 {
                    let second = self.pop()?;
                    if second.size() == 2 {
                        return Err(FrameError::WordSize("POP2", 1));
                    }
                }
                Ok(())
            }
            DUP..=SWAP => self.execute_shuffle(op, index, interp),
            IADD..=DREM | ISHL..=LXOR | LCMP..=DCMPG => {
                let value2 = self.pop()?;
                let value1 = self.pop()?;
                let result = interp.binary_operation(insn, &value1, &value2);
                self.push_opt(result)
            }
            INEG..=DNEG | I2L..=I2S | ARRAYLENGTH => {
                let value = self.pop()?;
                let result = interp.unary_operation(insn, &value);
                self.push_opt(result)
            }
            IRETURN..=ARETURN => {
                let value = self.pop()?;
                interp.return_operation(insn, &value);
                Ok(())
            }
            ATHROW | MONITORENTER | MONITOREXIT => {
                let value = self.pop()?;
                interp.unary_operation(insn, &value);
                Ok(())
            }
            _ => Err(FrameError::Unsupported(mnemonic(op))),
        }
    }

    fn execute_shuffle(
        &mut self,
        op: u8,
        index: usize,
        interp: &mut Interpreter<'_>,
    ) -> FrameResult<()> {
        let mut copy = |value: &ValueRef| interp.copy_operation(index, value);
        match op {
            DUP => {
                let value1 = self.pop()?;
                if value1.size() != 1 {
                    return Err(FrameError::WordSize("DUP", 1));
                }
                let dup = copy(&value1);
                self.push(value1)?;
                self.push(dup)
            }
            DUP_X1 => {
                let value1 = self.pop()?;
                let value2 = self.pop()?;
                if value1.size() != 1 || value2.size() != 1 {
                    return Err(FrameError::WordSize("DUP_X1", 1));
                }
                let dup = copy(&value1);
                self.push(dup)?;
                self.push(value2)?;
                self.push(value1)
            }
            DUP_X2 => {
                let value1 = self.pop()?;
                if value1.size() != 1 {
                    return Err(FrameError::WordSize("DUP_X2", 1));
                }
                let value2 = self.pop()?;
                let dup = copy(&value1);
                if value2.size() == 1 {
                    let value3 = self.pop()?;
                    if value3.size() != 1 {
                        return Err(FrameError::WordSize("DUP_X2", 1));
                    }
                    self.push(dup)?;
                    self.push(value3)?;
                } else {
                    self.push(dup)?;
                }
                self.push(value2)?;
                self.push(value1)
            }
            DUP2 => {
                let value1 = self.pop()?;
                if value1.size() == 1 {
                    let value2 = self.pop()?;
                    if value2.size() != 1 {
                        return Err(FrameError::WordSize("DUP2", 1));
                    }
                    let dup2 = copy(&value2);
                    let dup1 = copy(&value1);
                    self.push(value2)?;
                    self.push(value1)?;
                    self.push(dup2)?;
                    self.push(dup1)
                } else {
                    let dup = copy(&value1);
                    self.push(value1)?;
                    self.push(dup)
                }
            }
            DUP2_X1 => {
                let value1 = self.pop()?;
                if value1.size() == 1 {
                    let value2 = self.pop()?;
                    let value3 = self.pop()?;
                    if value2.size() != 1 || value3.size() != 1 {
                        return Err(FrameError::WordSize("DUP2_X1", 1));
                    }
                    let dup2 = copy(&value2);
                    let dup1 = copy(&value1);
                    self.push(dup2)?;
                    self.push(dup1)?;
                    self.push(value3)?;
                    self.push(value2)?;
                    self.push(value1)
                } else {
                    let value2 = self.pop()?;
                    if value2.size() != 1 {
                        return Err(FrameError::WordSize("DUP2_X1", 1));
                    }
                    let dup = copy(&value1);
                    self.push(dup)?;
                    self.push(value2)?;
                    self.push(value1)
                }
            }
            DUP2_X2 => {
                let value1 = self.pop()?;
                if value1.size() == 1 {
                    let value2 = self.pop()?;
                    if value2.size() != 1 {
                        return Err(FrameError::WordSize("DUP2_X2", 1));
                    }
                    let value3 = self.pop()?;
                    let dup2 = copy(&value2);
                    let dup1 = copy(&value1);
                    if value3.size() == 1 {
                        let value4 = self.pop()?;
                        if value4.size() != 1 {
                            return Err(FrameError::WordSize("DUP2_X2", 1));
                        }
                        self.push(dup2)?;
                        self.push(dup1)?;
                        self.push(value4)?;
                    } else {
                        self.push(dup2)?;
                        self.push(dup1)?;
                    }
                    self.push(value3)?;
                    self.push(value2)?;
                    self.push(value1)
                } else {
                    let value2 = self.pop()?;
                    let dup = copy(&value1);
                    if value2.size() == 1 {
                        let value3 = self.pop()?;
                        if value3.size() != 1 {
                            return Err(FrameError::WordSize("DUP2_X2", 1));
                        }
                        self.push(dup)?;
                        self.push(value3)?;
                    } else {
                        self.push(dup)?;
                    }
                    self.push(value2)?;
                    self.push(value1)
                }
            }
            SWAP => {
                let value2 = self.pop()?;
                let value1 = self.pop()?;
                if value1.size() != 1 || value2.size() != 1 {
                    return Err(FrameError::WordSize("SWAP", 1));
                }
                let top = copy(&value2);
                let below = copy(&value1);
                self.push(top)?;
                self.push(below)
            }
            _ => Err(FrameError::Unsupported(mnemonic(op))),
        }
    }

    /// Merges `incoming` into this frame. Returns whether any slot changed.
    pub(crate) fn merge(
        &mut self,
        incoming: &Frame,
        interp: &mut Interpreter<'_>,
    ) -> FrameResult<bool> {
        if self.stack.len() != incoming.stack.len() {
            return Err(FrameError::HeightMismatch(
                self.stack.len(),
                incoming.stack.len(),
            ));
        }

        let mut changed = false;
        let slots = self
            .locals
            .iter_mut()
            .zip(&incoming.locals)
            .chain(self.stack.iter_mut().zip(&incoming.stack));
        for (old, new) in slots {
            let merged = interp.merge(old, new);
            if !Rc::ptr_eq(&merged, old) {
                *old = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn argument_count(desc: &str) -> FrameResult<usize> {
    MethodDescriptor::parse(desc)
        .map(|parsed| parsed.arguments.len())
        .map_err(|_| FrameError::Descriptor(desc.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{usages::UsageTable, value::Constant, BasicType};

    fn run(insns: &[Insn], locals: usize) -> FrameResult<(Frame, UsageTable)> {
        let mut usages = UsageTable::new();
        let frame = {
            let mut interp = Interpreter::new(insns, &mut usages);
            let locals = (0..locals).map(|_| interp.empty()).collect();
            let mut frame = Frame::new(locals, None);
            for (index, insn) in insns.iter().enumerate() {
                frame.execute(index, insn, &mut interp)?;
            }
            frame
        };
        Ok((frame, usages))
    }

    #[test]
    fn test_dup_x1_copies_top() {
        let insns = vec![
            Insn::simple(ICONST_1),
            Insn::simple(ICONST_2),
            Insn::simple(DUP_X1),
        ];
        let (frame, _) = run(&insns, 0).unwrap();
        let stack = frame.stack();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[0].constant(), Some(&Constant::Int(2)));
        assert!(stack[0].sources().contains(&insns[2].id()));
        assert_eq!(stack[1].constant(), Some(&Constant::Int(1)));
        assert!(stack[2].sources().contains(&insns[1].id()));
    }

    #[test]
    fn test_dup2_on_wide_value() {
        let insns = vec![Insn::simple(LCONST_1), Insn::simple(DUP2)];
        let (frame, _) = run(&insns, 0).unwrap();
        assert_eq!(frame.stack_size(), 2);
        assert_eq!(frame.stack_words(), 4);
        assert_eq!(frame.stack()[1].basic_type(), BasicType::Long);
    }

    #[test]
    fn test_wide_store_clears_second_slot() {
        let insns = vec![
            Insn::simple(DCONST_1),
            Insn::var(DSTORE, 0),
            Insn::simple(ICONST_0),
            Insn::var(ISTORE, 1),
        ];
        let (frame, _) = run(&insns, 2).unwrap();
        assert_eq!(frame.locals()[0].basic_type(), BasicType::Uninitialized);
        assert_eq!(frame.locals()[1].constant(), Some(&Constant::Int(0)));
    }

    #[test]
    fn test_invoke_pops_arguments_and_receiver() {
        let insns = vec![
            Insn::simple(ACONST_NULL),
            Insn::simple(ICONST_1),
            Insn::simple(LCONST_0),
            Insn::method(INVOKEVIRTUAL, "a/B", "f", "(IJ)Ljava/lang/String;"),
        ];
        let (frame, usages) = run(&insns, 0).unwrap();
        assert_eq!(frame.stack_size(), 1);
        assert_eq!(frame.stack()[0].basic_type(), BasicType::Reference);
        assert!(usages.usages(frame.stack()[0].usage_key()).is_empty());
    }

    #[test]
    fn test_underflow_and_overflow() {
        let insns = vec![Insn::simple(POP)];
        assert!(matches!(run(&insns, 0), Err(FrameError::Underflow)));

        let insns = vec![Insn::simple(ICONST_0), Insn::simple(ICONST_1)];
        let mut usages = UsageTable::new();
        let mut interp = Interpreter::new(&insns, &mut usages);
        let mut frame = Frame::new(Vec::new(), Some(1));
        frame.execute(0, &insns[0], &mut interp).unwrap();
        assert!(matches!(
            frame.execute(1, &insns[1], &mut interp),
            Err(FrameError::Overflow(1))
        ));
    }

    #[test]
    fn test_overflow_counts_words() {
        let insns = vec![Insn::simple(ICONST_0), Insn::simple(LCONST_1)];
        let mut usages = UsageTable::new();
        let mut interp = Interpreter::new(&insns, &mut usages);
        let mut frame = Frame::new(Vec::new(), Some(2));
        frame.execute(0, &insns[0], &mut interp).unwrap();
        assert!(matches!(
            frame.execute(1, &insns[1], &mut interp),
            Err(FrameError::Overflow(2))
        ));

        let mut frame = Frame::new(Vec::new(), Some(2));
        frame.execute(1, &insns[1], &mut interp).unwrap();
        assert_eq!(frame.stack_words(), 2);
    }

    #[test]
    fn test_jsr_is_rejected() {
        let label = crate::ir::LabelId::new();
        let insns = vec![Insn::jump(JSR, label)];
        assert!(matches!(run(&insns, 0), Err(FrameError::Unsupported("JSR"))));
    }
}
