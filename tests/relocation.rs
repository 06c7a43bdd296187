//! Moving code to the places the safety queries report, then re-analyzing.

mod common;

use std::collections::BTreeSet;

use common::method;
use dekotlin::{
    analysis::{Analysis, Constant, Frame, FrameCache},
    ir::{opcodes::*, Insn, InsnId, LabelId, Method},
    rewrite::EditBatch,
    Result,
};

/// Producers of every stack entry, bottom first.
fn stack_sources(frame: &Frame) -> Vec<BTreeSet<InsnId>> {
    frame
        .stack()
        .iter()
        .map(|value| value.sources().clone())
        .collect()
}

/// A copy of `m` whose instructions keep their identities.
fn same_body(m: &Method) -> Method {
    let mut copy = Method::new(m.access, &m.name, &m.desc);
    copy.instructions.extend(m.instructions.iter().cloned());
    copy
}

fn real_instructions(m: &Method) -> usize {
    m.instructions.iter().filter(|insn| !insn.is_pseudo()).count()
}

/// `a * (flag ? b : c) + 1`
fn ternary() -> Method {
    let (other, join) = (LabelId::new(), LabelId::new());
    method(
        "mix",
        "(IZII)I",
        vec![
            Insn::var(ILOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::jump(IFEQ, other),
            Insn::var(ILOAD, 2),
            Insn::jump(GOTO, join),
            Insn::label(other),
            Insn::var(ILOAD, 3),
            Insn::label(join),
            Insn::simple(IMUL),
            Insn::simple(ICONST_1),
            Insn::simple(IADD),
            Insn::simple(IRETURN),
        ],
    )
}

/// `a * (b + 1) - a`
fn straight_line() -> Method {
    method(
        "line",
        "(II)I",
        vec![
            Insn::var(ILOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::simple(ICONST_1),
            Insn::simple(IADD),
            Insn::simple(IMUL),
            Insn::var(ILOAD, 0),
            Insn::simple(ISUB),
            Insn::simple(IRETURN),
        ],
    )
}

/// Inserts `ICONST_0; POP` at every location reported for every reachable instruction
/// and depth. Code placed there must see the same values beneath it as the query
/// point does, and must not disturb what the query point sees. Labels are skipped as
/// query points since code in front of a branch target is off the branching path.
/// Returns the number of locations checked.
fn check_every_location(m: &Method) -> Result<usize> {
    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, "demo/Relocate", m)?;
    let mut checked = 0;

    for insn in m.instructions.iter().filter(|insn| !insn.is_pseudo()) {
        let Some(frame) = analysis.frame(insn.id()) else {
            continue;
        };
        let original = stack_sources(frame);
        for depth in 0..=frame.stack_size() {
            let below = &original[..original.len() - depth];
            for location in analysis.safe_push_locations(insn.id(), depth) {
                let mut edited = same_body(m);
                let marker = Insn::simple(ICONST_0);
                let marker_id = marker.id();
                let mut batch = EditBatch::new();
                batch.insert_before(location, [marker, Insn::simple(POP)])?;
                batch.apply(&mut edited.instructions)?;

                let recheck = Analysis::new(&cache, "demo/Relocate", &edited)?;
                let at_marker = recheck.frame(marker_id).expect("marker is reachable");
                assert_eq!(stack_sources(at_marker), below);
                let at_query = recheck.frame(insn.id()).expect("query point is reachable");
                assert_eq!(stack_sources(at_query), original);
                checked += 1;
            }
        }
    }
    Ok(checked)
}

#[test]
fn test_relocation_through_a_join() -> Result<()> {
    let m = ternary();
    let imul = m.instructions.get(8).expect("IMUL").id();
    let (b, c) = (
        m.instructions.get(3).expect("ILOAD 2").id(),
        m.instructions.get(6).expect("ILOAD 3").id(),
    );
    {
        let cache = FrameCache::new();
        let analysis = Analysis::new(&cache, "demo/Relocate", &m)?;
        assert_eq!(analysis.safe_push_locations(imul, 1), vec![b, c]);
    }

    assert!(check_every_location(&m)? > real_instructions(&m));
    Ok(())
}

#[test]
fn test_relocation_in_straight_line_code() -> Result<()> {
    let m = straight_line();
    let imul = m.instructions.get(4).expect("IMUL").id();
    let load_b = m.instructions.get(1).expect("ILOAD 1").id();
    {
        let cache = FrameCache::new();
        let analysis = Analysis::new(&cache, "demo/Relocate", &m)?;
        assert_eq!(analysis.safe_push_locations(imul, 1), vec![load_b]);
    }

    assert!(check_every_location(&m)? > real_instructions(&m));
    Ok(())
}

#[test]
fn test_spill_rebuilds_the_stack() -> Result<()> {
    // Double the value beneath a long and an int by spilling both to locals.
    let sink = Insn::method(INVOKESTATIC, "demo/Sink", "take", "(IJI)I");
    let sink_id = sink.id();
    let mut m = method(
        "spill",
        "()I",
        vec![
            Insn::simple(ICONST_3),
            Insn::simple(LCONST_1),
            Insn::simple(ICONST_5),
            sink,
            Insn::simple(IRETURN),
        ],
    );

    let cache = FrameCache::new();
    let (stores, loads) = {
        let analysis = Analysis::new(&cache, "demo/Spill", &m)?;
        let mut stores = Vec::new();
        let loads = analysis.fallback_spill(sink_id, 2, &mut stores)?;
        (stores, loads)
    };
    assert_eq!(
        stores.iter().map(|i| i.kind.clone()).collect::<Vec<_>>(),
        vec![Insn::var(ISTORE, 0).kind, Insn::var(LSTORE, 1).kind]
    );

    let mut block = stores;
    block.extend([Insn::simple(ICONST_2), Insn::simple(IMUL)]);
    block.extend(loads.into_iter().rev());
    let mut batch = EditBatch::new();
    batch.insert_before(sink_id, block)?;
    batch.apply(&mut m.instructions)?;
    m.mark_modified();

    let analysis = Analysis::new(&cache, "demo/Spill", &m)?;
    assert_eq!(analysis.constant_at(sink_id, 2), Some(Constant::Int(6)));
    assert_eq!(analysis.constant_at(sink_id, 1), Some(Constant::Long(1)));
    assert_eq!(analysis.constant_at(sink_id, 0), Some(Constant::Int(5)));
    assert_eq!(analysis.frames().max_locals(), 3);
    Ok(())
}
