//! Transactional batch editing of instruction sequences.
//!
//! Rewrite rules never mutate an [`InsnList`] while walking it. Instead, a single
//! forward traversal collects edit requests keyed by the identity of the instruction
//! they target, and the whole batch is applied afterwards in one pass:
//!
//! ```rust
//! use dekotlin::ir::{opcodes::*, Insn, InsnKind, InsnList};
//! use dekotlin::rewrite::rewrite;
//!
//! let mut list: InsnList = vec![Insn::simple(ICONST_1), Insn::simple(IRETURN)]
//!     .into_iter()
//!     .collect();
//! rewrite(&mut list, |cursor, insn, _| {
//!     if insn.kind == InsnKind::Simple(ICONST_1) {
//!         cursor.replace([Insn::simple(ICONST_2)])?;
//!     }
//!     Ok(())
//! })?;
//! assert_eq!(list.get(0).unwrap().kind, InsnKind::Simple(ICONST_2));
//! # Ok::<(), dekotlin::Error>(())
//! ```
//!
//! Because edits are resolved against identities, the order in which they are
//! requested never matters, and a request may refer to instructions before or after
//! the one being visited.

use std::collections::{HashMap, HashSet};

use strum::Display;

use crate::{
    ir::{Insn, InsnId, InsnList},
    Error, Result,
};

/// Kind of an edit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EditKind {
    /// Insert a block immediately before the target
    #[strum(serialize = "insert-before")]
    InsertBefore,
    /// Replace the target with a block
    #[strum(serialize = "replace")]
    Replace,
}

/// Edit requests collected for one instruction sequence.
#[derive(Debug, Default)]
pub struct EditBatch {
    inserts: HashMap<InsnId, Vec<Insn>>,
    replacements: HashMap<InsnId, Vec<Insn>>,
    stopped: bool,
}

impl EditBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Visits every instruction of `list` in order, letting `visit` record edits.
    ///
    /// The traversal ends early once the visitor calls [`EditCursor::stop`].
    ///
    /// # Errors
    /// Returns the first error reported by `visit`, including
    /// [`Error::EditConflict`] for a duplicate request.
    pub fn collect<F>(list: &InsnList, mut visit: F) -> Result<EditBatch>
    where
        F: FnMut(&mut EditCursor<'_>, &Insn, usize) -> Result<()>,
    {
        let mut batch = EditBatch::new();
        for (index, insn) in list.iter().enumerate() {
            let mut cursor = EditCursor {
                batch: &mut batch,
                current: insn.id(),
            };
            visit(&mut cursor, insn, index)?;
            if batch.stopped {
                break;
            }
        }
        Ok(batch)
    }

    /// Requests `block` to be inserted immediately before `target`.
    ///
    /// # Errors
    /// Returns [`Error::EditConflict`] if an insertion before `target` was already
    /// requested.
    pub fn insert_before(
        &mut self,
        target: InsnId,
        block: impl IntoIterator<Item = Insn>,
    ) -> Result<()> {
        Self::request(&mut self.inserts, EditKind::InsertBefore, target, block)
    }

    /// Requests `target` to be replaced by `block`. An empty block deletes it.
    ///
    /// # Errors
    /// Returns [`Error::EditConflict`] if `target` already has a replacement.
    pub fn replace(&mut self, target: InsnId, block: impl IntoIterator<Item = Insn>) -> Result<()> {
        Self::request(&mut self.replacements, EditKind::Replace, target, block)
    }

    fn request(
        edits: &mut HashMap<InsnId, Vec<Insn>>,
        kind: EditKind,
        target: InsnId,
        block: impl IntoIterator<Item = Insn>,
    ) -> Result<()> {
        if edits.contains_key(&target) {
            return Err(Error::EditConflict { target, kind });
        }
        edits.insert(target, block.into_iter().collect());
        Ok(())
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserts.len() + self.replacements.len()
    }

    /// Returns `true` if nothing was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every request to `list`.
    ///
    /// The result is the same as applying insertions and then replacements from the
    /// end of the sequence towards its start at their pre-edit positions. Returns
    /// whether the sequence changed.
    ///
    /// # Errors
    /// Returns [`Error::EditTarget`] if a request targets an instruction that is not
    /// part of `list`; `list` is left untouched in that case.
    pub fn apply(mut self, list: &mut InsnList) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let present: HashSet<InsnId> = list.iter().map(Insn::id).collect();
        if let Some(missing) = self
            .inserts
            .keys()
            .chain(self.replacements.keys())
            .find(|target| !present.contains(target))
        {
            return Err(Error::EditTarget(*missing));
        }

        let grown: usize = self.inserts.values().map(Vec::len).sum::<usize>()
            + self.replacements.values().map(Vec::len).sum::<usize>();
        let mut edited = Vec::with_capacity(list.len() + grown);
        for insn in list.take() {
            if let Some(block) = self.inserts.remove(&insn.id()) {
                edited.extend(block);
            }
            match self.replacements.remove(&insn.id()) {
                Some(block) => edited.extend(block),
                None => edited.push(insn),
            }
        }
        list.replace_all(edited);
        Ok(true)
    }
}

/// Handle given to the visitor of [`EditBatch::collect`] for the instruction being
/// visited.
pub struct EditCursor<'b> {
    batch: &'b mut EditBatch,
    current: InsnId,
}

impl EditCursor<'_> {
    /// Identity of the instruction being visited.
    #[must_use]
    pub fn current(&self) -> InsnId {
        self.current
    }

    /// Inserts `block` before the current instruction.
    ///
    /// # Errors
    /// See [`EditBatch::insert_before`].
    pub fn insert_before(&mut self, block: impl IntoIterator<Item = Insn>) -> Result<()> {
        self.batch.insert_before(self.current, block)
    }

    /// Replaces the current instruction with `block`.
    ///
    /// # Errors
    /// See [`EditBatch::replace`].
    pub fn replace(&mut self, block: impl IntoIterator<Item = Insn>) -> Result<()> {
        self.batch.replace(self.current, block)
    }

    /// Inserts `block` before any instruction of the sequence.
    ///
    /// # Errors
    /// See [`EditBatch::insert_before`].
    pub fn insert_before_at(
        &mut self,
        target: InsnId,
        block: impl IntoIterator<Item = Insn>,
    ) -> Result<()> {
        self.batch.insert_before(target, block)
    }

    /// Replaces any instruction of the sequence with `block`.
    ///
    /// # Errors
    /// See [`EditBatch::replace`].
    pub fn replace_at(
        &mut self,
        target: InsnId,
        block: impl IntoIterator<Item = Insn>,
    ) -> Result<()> {
        self.batch.replace(target, block)
    }

    /// Ends the traversal after the current instruction.
    pub fn stop(&mut self) {
        self.batch.stopped = true;
    }
}

/// Collects edits with `visit` and applies them to `list`. Returns whether anything
/// changed.
///
/// # Errors
/// See [`EditBatch::collect`] and [`EditBatch::apply`].
pub fn rewrite<F>(list: &mut InsnList, visit: F) -> Result<bool>
where
    F: FnMut(&mut EditCursor<'_>, &Insn, usize) -> Result<()>,
{
    EditBatch::collect(list, visit)?.apply(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{opcodes::*, InsnKind};

    fn nops(n: usize) -> InsnList {
        (0..n).map(|_| Insn::simple(NOP)).collect()
    }

    fn kinds(list: &InsnList) -> Vec<InsnKind> {
        list.iter().map(|insn| insn.kind.clone()).collect()
    }

    #[test]
    fn test_edits_resolve_against_pre_edit_positions() {
        let mut list = nops(4);
        let ids: Vec<InsnId> = list.iter().map(Insn::id).collect();

        // Requested from the last instruction, backwards in program order.
        let changed = rewrite(&mut list, |cursor, _, index| {
            if index == 3 {
                cursor.replace_at(ids[2], [Insn::simple(ICONST_2), Insn::simple(POP)])?;
                cursor.insert_before_at(ids[0], [Insn::simple(ICONST_0), Insn::simple(POP)])?;
                cursor.insert_before_at(ids[2], [Insn::simple(ACONST_NULL), Insn::simple(POP)])?;
                cursor.replace([])?;
            }
            Ok(())
        })
        .unwrap();

        assert!(changed);
        assert_eq!(
            kinds(&list),
            vec![
                InsnKind::Simple(ICONST_0),
                InsnKind::Simple(POP),
                InsnKind::Simple(NOP),
                InsnKind::Simple(NOP),
                InsnKind::Simple(ACONST_NULL),
                InsnKind::Simple(POP),
                InsnKind::Simple(ICONST_2),
                InsnKind::Simple(POP),
            ]
        );
        assert_eq!(list.get(2).unwrap().id(), ids[0]);
    }

    #[test]
    fn test_duplicate_request_is_a_conflict() {
        let mut list = nops(2);
        let first = list.get(0).unwrap().id();
        let result = rewrite(&mut list, |cursor, _, _| {
            cursor.replace_at(first, [Insn::simple(ICONST_0)])
        });
        match result {
            Err(Error::EditConflict { target, kind }) => {
                assert_eq!(target, first);
                assert_eq!(kind, EditKind::Replace);
                assert_eq!(kind.to_string(), "replace");
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
        assert_eq!(kinds(&list), kinds(&nops(2)));
    }

    #[test]
    fn test_insert_and_replace_same_target_compose() {
        let mut list = nops(1);
        rewrite(&mut list, |cursor, _, _| {
            cursor.insert_before([Insn::simple(ICONST_1)])?;
            cursor.replace([Insn::simple(POP)])
        })
        .unwrap();
        assert_eq!(
            kinds(&list),
            vec![InsnKind::Simple(ICONST_1), InsnKind::Simple(POP)]
        );
    }

    #[test]
    fn test_stop_ends_traversal() {
        let mut list = nops(5);
        let mut visited = 0;
        let batch = EditBatch::collect(&list, |cursor, _, index| {
            visited += 1;
            if index == 1 {
                cursor.stop();
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, 2);
        assert!(!batch.apply(&mut list).unwrap());
    }

    #[test]
    fn test_foreign_target_is_rejected() {
        let mut list = nops(2);
        let stranger = Insn::simple(NOP);
        let mut batch = EditBatch::new();
        batch.insert_before(stranger.id(), [Insn::simple(NOP)]).unwrap();
        assert!(matches!(
            batch.apply(&mut list),
            Err(Error::EditTarget(id)) if id == stranger.id()
        ));
        assert_eq!(list.len(), 2);
    }
}
