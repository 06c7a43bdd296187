//! Batch editing driven by analysis results.

mod common;

use common::method;
use dekotlin::{
    analysis::{Analysis, FrameCache},
    ir::{opcodes::*, Insn, InsnKind, InsnList, LabelId, LdcValue},
    rewrite::{rewrite, EditBatch},
    Error, Result,
};

fn kinds(list: &InsnList) -> Vec<InsnKind> {
    list.iter().map(|insn| insn.kind.clone()).collect()
}

#[test]
fn test_modify_at_safe_locations() -> Result<()> {
    // Wrap the receiver of length() in a call to trim(), placed right after each
    // branch pushes its string.
    let (other, join) = (LabelId::new(), LabelId::new());
    let a = Insn::ldc(LdcValue::String(" a".into()));
    let b = Insn::ldc(LdcValue::String("b ".into()));
    let call = Insn::method(INVOKEVIRTUAL, "java/lang/String", "length", "()I");
    let (a_id, b_id, call_id) = (a.id(), b.id(), call.id());
    let mut m = method(
        "pick",
        "(Z)I",
        vec![
            Insn::var(ILOAD, 0),
            Insn::jump(IFEQ, other),
            a,
            Insn::jump(GOTO, join),
            Insn::label(other),
            b,
            Insn::label(join),
            call,
            Insn::simple(IRETURN),
        ],
    );
    let trim = || {
        Insn::method(
            INVOKEVIRTUAL,
            "java/lang/String",
            "trim",
            "()Ljava/lang/String;",
        )
    };

    let cache = FrameCache::new();
    let locations = {
        let analysis = Analysis::new(&cache, "demo/Edit", &m)?;
        assert_eq!(analysis.safe_push_locations(call_id, 1), vec![a_id, b_id]);
        analysis.safe_modify_locations(call_id, 0)
    };
    assert_eq!(locations.len(), 2);

    let mut batch = EditBatch::new();
    for location in locations {
        batch.insert_before(location, [trim()])?;
    }
    assert!(batch.apply(&mut m.instructions)?);
    m.mark_modified();

    let trims = m
        .instructions
        .iter()
        .filter(|insn| insn.kind == trim().kind)
        .count();
    assert_eq!(trims, 2);
    let analysis = Analysis::new(&cache, "demo/Edit", &m)?;
    assert_eq!(analysis.frames().max_stack(), 1);
    Ok(())
}

#[test]
fn test_edits_are_keyed_by_identity() -> Result<()> {
    let mut list: InsnList = vec![
        Insn::simple(ICONST_1),
        Insn::simple(ICONST_2),
        Insn::simple(IADD),
        Insn::simple(IRETURN),
    ]
    .into_iter()
    .collect();
    let first = list.get(0).expect("first").id();

    // Requests against earlier instructions, made while visiting later ones.
    let changed = rewrite(&mut list, |cursor, insn, _| {
        match insn.kind {
            InsnKind::Simple(IADD) => {
                cursor.replace([Insn::simple(IMUL)])?;
                cursor.insert_before_at(first, [Insn::simple(NOP)])?;
            }
            InsnKind::Simple(ICONST_2) => cursor.replace([])?,
            InsnKind::Simple(IRETURN) => cursor.replace_at(first, [Insn::simple(ICONST_3)])?,
            _ => {}
        }
        Ok(())
    })?;

    assert!(changed);
    assert_eq!(
        kinds(&list),
        vec![
            InsnKind::Simple(NOP),
            InsnKind::Simple(ICONST_3),
            InsnKind::Simple(IMUL),
            InsnKind::Simple(IRETURN),
        ]
    );
    Ok(())
}

#[test]
fn test_conflicting_requests_fail() {
    let list: InsnList = vec![Insn::simple(NOP), Insn::simple(RETURN)]
        .into_iter()
        .collect();
    let result = EditBatch::collect(&list, |cursor, _, _| {
        let target = cursor.current();
        cursor.replace([])?;
        cursor.replace_at(target, [Insn::simple(NOP)])
    });
    assert!(matches!(result, Err(Error::EditConflict { .. })));
}

#[test]
fn test_foreign_target_leaves_list_untouched() {
    let stranger = Insn::simple(NOP);
    let mut list: InsnList = vec![Insn::simple(RETURN)].into_iter().collect();
    let before = kinds(&list);

    let mut batch = EditBatch::new();
    batch
        .insert_before(list.get(0).expect("return").id(), [Insn::simple(NOP)])
        .expect("first request");
    batch
        .replace(stranger.id(), [Insn::simple(POP)])
        .expect("second request");
    let result = batch.apply(&mut list);

    assert!(matches!(result, Err(Error::EditTarget(id)) if id == stranger.id()));
    assert_eq!(kinds(&list), before);
}

#[test]
fn test_stop_ends_collection() -> Result<()> {
    let mut list: InsnList = (0..4).map(|_| Insn::simple(NOP)).collect();
    let mut visited = 0;
    let changed = rewrite(&mut list, |cursor, _, index| {
        visited += 1;
        if index == 1 {
            cursor.replace([])?;
            cursor.stop();
        }
        Ok(())
    })?;
    assert!(changed);
    assert_eq!(visited, 2);
    assert_eq!(list.len(), 3);
    Ok(())
}
