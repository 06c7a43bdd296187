//! Safety queries answered from cached frames.
//!
//! Rewrite rules ask two kinds of questions before touching a method body: *where*
//! can code that must observe a particular stack value be placed, and *what* is known
//! about a value. [`Analysis`] answers both for one method revision.
//!
//! Two depth conventions are used:
//!
//! - push queries ([`Analysis::safe_push_locations`], [`Analysis::fallback_spill`])
//!   count how many top entries the insertion goes beneath, so depth 0 means "right
//!   here, on top of everything";
//! - value queries ([`Analysis::safe_modify_locations`], [`Analysis::constant_at`])
//!   name a stack entry, with depth 0 being the top.
//!
//! Queries about unreachable instructions, or depths beyond the stack, return empty
//! results rather than errors.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    analysis::{
        analyzer::Frames,
        cache::FrameCache,
        frame::Frame,
        value::{Constant, ValueRef},
    },
    ir::{Insn, InsnId, Method},
    Result,
};

/// Query interface over the frames of one method revision.
pub struct Analysis<'a> {
    owner: &'a str,
    method: &'a Method,
    frames: Rc<Frames>,
}

impl<'a> Analysis<'a> {
    /// Fetches (or computes) the frames of `method` through `cache`.
    ///
    /// # Errors
    /// Propagates [`crate::Error::Analysis`] from the analyzer.
    pub fn new(cache: &FrameCache, owner: &'a str, method: &'a Method) -> Result<Self> {
        let frames = cache.frames(owner, method)?;
        Ok(Analysis {
            owner,
            method,
            frames,
        })
    }

    /// The underlying frames.
    #[must_use]
    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    /// Frame before `insn`.
    #[must_use]
    pub fn frame(&self, insn: InsnId) -> Option<&Frame> {
        self.frames.frame(insn)
    }

    /// Stack entry `depth` below the top (0 = top) before `insn`.
    fn value_at(&self, insn: InsnId, depth: usize) -> Option<&ValueRef> {
        let frame = self.frames.frame(insn)?;
        let size = frame.stack_size();
        if depth >= size {
            return None;
        }
        frame.stack_value(size - 1 - depth)
    }

    /// Places where code can be inserted with the same effect as inserting it before
    /// `insn` beneath its top `depth` stack entries.
    ///
    /// Depth 0 answers `insn` itself. Otherwise the value sitting under the top
    /// `depth` entries must have a single consumer. Its producers are followed
    /// backwards (through copies and merges) until frames are reached where that
    /// value is about to be pushed onto a stack whose lower entries are the very same
    /// values as at `insn`. Any intermediate value consumed elsewhere, or any producer
    /// seeing a different stack below, makes relocation unsafe and the result empty.
    ///
    /// The returned locations are in program order.
    #[must_use]
    pub fn safe_push_locations(&self, insn: InsnId, depth: usize) -> Vec<InsnId> {
        let Some(frame) = self.frames.frame(insn) else {
            return Vec::new();
        };
        if depth > frame.stack_size() {
            return Vec::new();
        }
        if depth == 0 {
            return vec![insn];
        }

        let stack_index = frame.stack_size() - depth;
        let below = &frame.stack()[..stack_index];
        let target = &frame.stack()[stack_index];
        let consumers = self.frames.usages(target);
        if consumers.len() > 1 {
            return Vec::new();
        }

        let mut processed: BTreeSet<InsnId> = BTreeSet::new();
        let mut pending: BTreeSet<InsnId> = target.sources().clone();
        let mut locations: BTreeSet<InsnId> = BTreeSet::new();
        let mut extra_usages: BTreeSet<InsnId> = BTreeSet::new();

        while !pending.is_empty() {
            processed.extend(pending.iter().copied());
            let mut next = BTreeSet::new();
            for source in &pending {
                let Some(source_frame) = self.frames.frame(*source) else {
                    return Vec::new();
                };
                if source_frame.stack_size() < stack_index {
                    return Vec::new();
                }
                let same_below = below
                    .iter()
                    .zip(source_frame.stack())
                    .all(|(a, b)| Rc::ptr_eq(a, b));
                if !same_below {
                    return Vec::new();
                }

                if source_frame.stack_size() == stack_index {
                    locations.insert(*source);
                } else {
                    let intermediate = &source_frame.stack()[stack_index];
                    extra_usages.extend(self.frames.usages(intermediate).iter().copied());
                    next.extend(
                        intermediate
                            .sources()
                            .iter()
                            .filter(|s| !processed.contains(s))
                            .copied(),
                    );
                }
            }
            pending = next;
        }

        if let Some(consumer) = consumers.iter().next() {
            extra_usages.remove(consumer);
        }
        extra_usages.retain(|usage| !processed.contains(usage));
        if !extra_usages.is_empty() {
            return Vec::new();
        }

        let mut locations: Vec<InsnId> = locations.into_iter().collect();
        locations.sort_by_key(|id| self.frames.index_of(*id));
        locations
    }

    /// Points right after each producer of the stack entry `depth` (0 = top) before
    /// `insn`, where the value can be consumed or replaced in place.
    ///
    /// Empty unless the value has a single consumer.
    #[must_use]
    pub fn safe_modify_locations(&self, insn: InsnId, depth: usize) -> Vec<InsnId> {
        let Some(value) = self.value_at(insn, depth) else {
            return Vec::new();
        };
        if self.frames.usages(value).len() > 1 {
            return Vec::new();
        }

        let mut producers: Vec<usize> = value
            .sources()
            .iter()
            .filter_map(|source| self.frames.index_of(*source))
            .collect();
        producers.sort_unstable();
        producers
            .into_iter()
            .filter_map(|index| self.method.instructions.get(index + 1))
            .map(Insn::id)
            .collect()
    }

    /// Spills the top `depth` entries before `insn` into fresh locals.
    ///
    /// Appends one store per entry to `stores`, top entry first, using slots from
    /// [`Analysis::next_free_local`] upwards. Returns the matching loads in the same
    /// order; inserting them in reverse rebuilds the original stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::Analysis`] when an entry has no store form, such as a
    /// value merged from incompatible kinds.
    pub fn fallback_spill(
        &self,
        insn: InsnId,
        depth: usize,
        stores: &mut Vec<Insn>,
    ) -> Result<Vec<Insn>> {
        let Some(frame) = self.frames.frame(insn) else {
            return Ok(Vec::new());
        };
        if depth == 0 || depth > frame.stack_size() {
            return Ok(Vec::new());
        }

        let mut var = self.next_free_local(insn);
        let mut loads = Vec::with_capacity(depth);
        for value in frame.stack().iter().rev().take(depth) {
            let ty = value.basic_type();
            let (Some(store), Some(load)) = (ty.store_opcode(), ty.load_opcode()) else {
                return Err(analysis_error!(
                    self.owner,
                    self.method.signature(),
                    "cannot spill a stack value of kind {}",
                    ty
                ));
            };
            stores.push(Insn::var(store, var));
            loads.push(Insn::var(load, var));
            var += value.size();
        }
        Ok(loads)
    }

    /// Literal of the stack entry `depth` (0 = top) before `insn`.
    ///
    /// String builder accumulators are returned as [`Constant::Builder`], sharing the
    /// analyzed buffer.
    #[must_use]
    pub fn constant_at(&self, insn: InsnId, depth: usize) -> Option<Constant> {
        self.value_at(insn, depth)?.constant().cloned()
    }

    /// First local slot guaranteed unused at `insn`.
    #[must_use]
    pub fn next_free_local(&self, insn: InsnId) -> u16 {
        self.frames.frame(insn).map_or(self.frames.max_locals(), |frame| {
            u16::try_from(frame.locals().len()).unwrap_or(u16::MAX)
        })
    }
}
