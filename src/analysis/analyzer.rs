//! Fixpoint computation of frames for one method body.
//!
//! The analyzer is a worklist algorithm over instruction indices. Starting from the
//! entry frame, each reachable instruction is simulated and the resulting frame merged
//! into every successor: the fall-through instruction, branch and switch targets, and
//! the handlers of every exception range covering the instruction. Handler entry
//! frames are derived from the frame *before* the covered instruction with its stack
//! replaced by the caught exception.
//!
//! Merging only ever grows source sets, unifies usage classes and drops literals, so
//! the iteration terminates.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::{
    analysis::{
        frame::Frame,
        interpreter::Interpreter,
        usages::UsageTable,
        value::{AbstractValue, ValueRef},
    },
    ir::{opcodes::*, Insn, InsnId, InsnKind, LabelId, Method, Type},
    Result,
};

/// Frames of every instruction of one method revision.
#[derive(Debug)]
pub struct Frames {
    frames: Vec<Option<Frame>>,
    usages: UsageTable,
    index: HashMap<InsnId, usize>,
    max_locals: u16,
    max_stack: u16,
}

impl Frames {
    /// Number of instructions analyzed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` for a method without a body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame before `insn`, `None` if the instruction is unreachable or unknown.
    #[must_use]
    pub fn frame(&self, insn: InsnId) -> Option<&Frame> {
        self.frame_at(self.index_of(insn)?)
    }

    /// Frame before the instruction at `index`.
    #[must_use]
    pub fn frame_at(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)?.as_ref()
    }

    /// Position of `insn` in the analyzed sequence.
    #[must_use]
    pub fn index_of(&self, insn: InsnId) -> Option<usize> {
        self.index.get(&insn).copied()
    }

    /// Instructions consuming `value` or any value merged with it.
    #[must_use]
    pub fn usages(&self, value: &AbstractValue) -> &BTreeSet<InsnId> {
        self.usages.usages(value.usage_key())
    }

    /// The usage table backing [`Frames::usages`].
    #[must_use]
    pub fn usage_table(&self) -> &UsageTable {
        &self.usages
    }

    /// Local slots needed by the body.
    #[must_use]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    /// Largest operand stack height in words over all reachable instructions.
    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }
}

/// Computes [`Frames`] for method bodies.
pub struct Analyzer<'a> {
    owner: &'a str,
    method: &'a Method,
}

impl<'a> Analyzer<'a> {
    /// Prepares an analysis of `method` declared in `owner`.
    #[must_use]
    pub fn new(owner: &'a str, method: &'a Method) -> Self {
        Analyzer { owner, method }
    }

    /// Runs the analysis to a fixpoint.
    ///
    /// # Errors
    /// Returns [`crate::Error::Analysis`] when the body cannot be simulated: stack
    /// underflow or overflow, mismatched stack heights at a join, subroutines, dangling
    /// labels, or control falling off the end of the code.
    pub fn analyze(&self) -> Result<Frames> {
        let method = self.method;
        let insns = method.instructions.as_slice();
        let index: HashMap<InsnId, usize> = insns
            .iter()
            .enumerate()
            .map(|(i, insn)| (insn.id(), i))
            .collect();

        let descriptor = method.descriptor()?;
        let argument_slots = descriptor.argument_slots(method.is_static());
        let max_locals = if method.max_stack.is_none() {
            required_locals(insns).max(argument_slots)
        } else {
            method.max_locals.max(argument_slots)
        };

        if insns.is_empty() {
            return Ok(Frames {
                frames: Vec::new(),
                usages: UsageTable::new(),
                index,
                max_locals,
                max_stack: 0,
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
        let handlers = self.handler_ranges(insns.len(), &labels)?;

        let mut usages = UsageTable::new();
        let mut frames: Vec<Option<Frame>> = vec![None; insns.len()];
        {
            let mut interp = Interpreter::new(insns, &mut usages);
            let stack_limit = method.max_stack.map(usize::from);
            frames[0] = Some(self.entry_frame(&mut interp, max_locals, stack_limit)?);

            let mut worklist = VecDeque::from([0usize]);
            let mut in_worklist = vec![false; insns.len()];
            in_worklist[0] = true;

            while let Some(i) = worklist.pop_front() {
                in_worklist[i] = false;
                let Some(before) = frames[i].clone() else {
                    continue;
                };
                let insn = &insns[i];

                let mut after = before.clone();
                after
                    .execute(i, insn, &mut interp)
                    .map_err(|e| self.error(i, insn, &e.to_string()))?;

                for successor in self.successors(i, insn, &labels)? {
                    self.merge_into(
                        &mut frames,
                        successor,
                        &after,
                        &mut interp,
                        &mut worklist,
                        &mut in_worklist,
                    )?;
                }

                for (handler, catch_type) in &handlers[i] {
                    let mut entry = before.clone();
                    entry.clear_stack();
                    let catch_type = catch_type.as_deref().unwrap_or("java/lang/Throwable");
                    let exception = interp
                        .for_type(&Type::object(catch_type))
                        .unwrap_or_else(|| interp.empty());
                    entry
                        .push(exception)
                        .map_err(|e| self.error(i, insn, &e.to_string()))?;
                    self.merge_into(
                        &mut frames,
                        *handler,
                        &entry,
                        &mut interp,
                        &mut worklist,
                        &mut in_worklist,
                    )?;
                }
            }
        }

        let max_stack = frames
            .iter()
            .flatten()
            .map(Frame::stack_words)
            .max()
            .unwrap_or(0);
        log::trace!(
            "analyzed {}.{}: {} instructions, max_stack {}, max_locals {}",
            self.owner,
            method.signature(),
            insns.len(),
            max_stack,
            max_locals
        );

        Ok(Frames {
            frames,
            usages,
            index,
            max_locals,
            max_stack: u16::try_from(max_stack).unwrap_or(u16::MAX),
        })
    }

    fn error(&self, index: usize, insn: &Insn, message: &str) -> crate::Error {
        let name = insn.opcode().map_or("label", mnemonic);
        analysis_error!(
            self.owner,
            self.method.signature(),
            "{} at instruction {}: {}",
            name,
            index,
            message
        )
    }

    fn entry_frame(
        &self,
        interp: &mut Interpreter<'_>,
        max_locals: u16,
        stack_limit: Option<usize>,
    ) -> Result<Frame> {
        let method = self.method;
        let mut locals: Vec<ValueRef> = Vec::with_capacity(usize::from(max_locals));
        if !method.is_static() {
            if let Some(this) = interp.for_type(&Type::object(self.owner)) {
                locals.push(this);
            }
        }
        for argument in method.descriptor()?.arguments {
            let value = interp.for_type(&argument).unwrap_or_else(|| interp.empty());
            let wide = value.size() == 2;
            locals.push(value);
            if wide {
                locals.push(interp.empty());
            }
        }
        while locals.len() < usize::from(max_locals) {
            locals.push(interp.empty());
        }
        Ok(Frame::new(locals, stack_limit))
    }

    /// Handlers covering each instruction, in exception table order.
    fn handler_ranges(
        &self,
        len: usize,
        labels: &HashMap<LabelId, usize>,
    ) -> Result<Vec<Vec<(usize, Option<String>)>>> {
        let mut handlers = vec![Vec::new(); len];
        for tcb in &self.method.try_catch_blocks {
            let position = |label: LabelId| {
                labels.get(&label).copied().ok_or_else(|| {
                    analysis_error!(
                        self.owner,
                        self.method.signature(),
                        "exception range refers to a missing label"
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
        let target = |label: &LabelId| {
            labels.get(label).copied().ok_or_else(|| {
                self.error(i, insn, "branch to a label outside the method")
            })
        };

        let falls_through = match &insn.kind {
            InsnKind::Jump { opcode, .. } => !matches!(*opcode, GOTO | GOTO_W),
            InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => false,
            InsnKind::Simple(op) => !(is_return(*op) || *op == ATHROW),
            _ => true,
        };

        let mut successors = insn
            .branch_targets()
            .iter()
            .map(target)
            .collect::<Result<Vec<_>>>()?;
        if falls_through {
            if i + 1 >= self.method.instructions.len() {
                return Err(self.error(i, insn, "execution can fall off the end of the code"));
            }
            successors.push(i + 1);
        }
        Ok(successors)
    }

    fn merge_into(
        &self,
        frames: &mut [Option<Frame>],
        target: usize,
        incoming: &Frame,
        interp: &mut Interpreter<'_>,
        worklist: &mut VecDeque<usize>,
        in_worklist: &mut [bool],
    ) -> Result<()> {
        let changed = if let Some(existing) = frames[target].as_mut() {
            existing.merge(incoming, interp).map_err(|e| {
                analysis_error!(
                    self.owner,
                    self.method.signature(),
                    "merging into instruction {}: {}",
                    target,
                    e
                )
            })?
        } else {
            frames[target] = Some(incoming.clone());
            true
        };
        if changed && !in_worklist[target] {
            in_worklist[target] = true;
            worklist.push_back(target);
        }
        Ok(())
    }
}

/// Local slots referenced by the body.
pub(crate) fn required_locals(insns: &[Insn]) -> u16 {
    insns
        .iter()
        .filter_map(|insn| match insn.kind {
            InsnKind::Var { opcode, var } => {
                let size = if matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE) {
                    2
                } else {
                    1
                };
                Some(var.saturating_add(size))
            }
            InsnKind::Iinc { var, .. } => Some(var.saturating_add(1)),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{value::Constant, BasicType},
        ir::{MethodAccess, TryCatchBlock},
    };

    fn method(desc: &str, insns: Vec<Insn>) -> Method {
        let mut method = Method::new(MethodAccess::STATIC, "test", desc);
        method.instructions.extend(insns);
        method
    }

    #[test]
    fn test_every_reachable_insn_has_a_frame() {
        let skip = LabelId::new();
        let m = method(
            "(I)I",
            vec![
                Insn::var(ILOAD, 0),
                Insn::jump(IFEQ, skip),
                Insn::simple(ICONST_1),
                Insn::simple(IRETURN),
                Insn::label(skip),
                Insn::simple(ICONST_2),
                Insn::simple(IRETURN),
            ],
        );
        let frames = Analyzer::new("T", &m).analyze().unwrap();
        assert_eq!(frames.len(), 7);
        for insn in m.instructions.iter() {
            assert!(frames.frame(insn.id()).is_some());
        }
        assert_eq!(frames.max_stack(), 1);
        assert_eq!(frames.max_locals(), 1);
    }

    #[test]
    fn test_join_unions_sources_and_drops_differing_constants() {
        let (other, join) = (LabelId::new(), LabelId::new());
        let one = Insn::simple(ICONST_1);
        let two = Insn::simple(ICONST_2);
        let ret = Insn::simple(IRETURN);
        let (one_id, two_id, ret_id) = (one.id(), two.id(), ret.id());
        let m = method(
            "(Z)I",
            vec![
                Insn::var(ILOAD, 0),
                Insn::jump(IFEQ, other),
                one,
                Insn::jump(GOTO, join),
                Insn::label(other),
                two,
                Insn::label(join),
                ret,
            ],
        );
        let frames = Analyzer::new("T", &m).analyze().unwrap();
        let top = frames.frame(ret_id).unwrap().stack()[0].clone();
        assert_eq!(top.sources(), &BTreeSet::from([one_id, two_id]));
        assert_eq!(top.constant(), None);
        assert_eq!(top.basic_type(), BasicType::Int);
        assert!(frames.usages(&top).contains(&ret_id));

        let pushed_one = frames.frame_at(3).unwrap().stack()[0].clone();
        assert_eq!(pushed_one.constant(), Some(&Constant::Int(1)));
        assert!(frames.usages(&pushed_one).contains(&ret_id));
    }

    #[test]
    fn test_unreachable_code_has_no_frame() {
        let m = method(
            "()V",
            vec![Insn::simple(RETURN), Insn::simple(NOP), Insn::simple(RETURN)],
        );
        let frames = Analyzer::new("T", &m).analyze().unwrap();
        assert!(frames.frame_at(0).is_some());
        assert!(frames.frame_at(1).is_none());
    }

    #[test]
    fn test_handler_frame_holds_exception() {
        let (start, end, handler) = (LabelId::new(), LabelId::new(), LabelId::new());
        let mut m = method(
            "()V",
            vec![
                Insn::label(start),
                Insn::method(INVOKESTATIC, "a/B", "f", "()V"),
                Insn::label(end),
                Insn::simple(RETURN),
                Insn::label(handler),
                Insn::simple(ATHROW),
            ],
        );
        m.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: Some("java/lang/Exception".into()),
        });
        let frames = Analyzer::new("T", &m).analyze().unwrap();
        let entry = frames.frame_at(4).unwrap();
        assert_eq!(entry.stack_size(), 1);
        assert_eq!(entry.stack()[0].basic_type(), BasicType::Reference);
        assert!(entry.stack()[0].sources().is_empty());
    }

    #[test]
    fn test_falling_off_the_end_is_an_error() {
        let m = method("()V", vec![Insn::simple(NOP)]);
        let err = Analyzer::new("T", &m).analyze().unwrap_err();
        assert!(matches!(err, crate::Error::Analysis { .. }));
        assert!(err.to_string().contains("fall off"));
    }

    #[test]
    fn test_stack_height_mismatch_is_an_error() {
        let join = LabelId::new();
        let m = method(
            "(I)V",
            vec![
                Insn::var(ILOAD, 0),
                Insn::jump(IFEQ, join),
                Insn::simple(ICONST_0),
                Insn::label(join),
                Insn::simple(RETURN),
            ],
        );
        assert!(Analyzer::new("T", &m).analyze().is_err());
    }

    #[test]
    fn test_loop_reaches_fixpoint() {
        let head = LabelId::new();
        let m = method(
            "()V",
            vec![
                Insn::simple(ICONST_0),
                Insn::var(ISTORE, 0),
                Insn::label(head),
                Insn::iinc(0, 1),
                Insn::var(ILOAD, 0),
                Insn::int(BIPUSH, 10),
                Insn::jump(IF_ICMPLT, head),
                Insn::simple(RETURN),
            ],
        );
        let frames = Analyzer::new("T", &m).analyze().unwrap();
        let at_head = frames.frame_at(3).unwrap();
        assert_eq!(at_head.locals()[0].sources().len(), 2);
        assert_eq!(at_head.locals()[0].constant(), None);
        assert_eq!(frames.max_stack(), 2);
    }
}
