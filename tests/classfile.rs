//! Reading class files and jars, then analyzing what was read.

mod common;

use std::io::{Cursor, Write};

use common::{ClassFile, Handler};
use dekotlin::{
    analysis::{Analysis, Constant, FrameCache},
    engine::{Engine, EngineConfig},
    file::{Archive, ClassReader},
    ir::{opcodes::*, Insn, InsnId, InsnKind, Method},
    Result,
};
use zip::{write::SimpleFileOptions, ZipWriter};

const ASTORE_0: u8 = 0x4b;

fn returns(method: &Method) -> Vec<InsnId> {
    method
        .instructions
        .iter()
        .filter(|insn| matches!(insn.kind, InsnKind::Simple(IRETURN | ARETURN)))
        .map(Insn::id)
        .collect()
}

fn branching_class() -> Vec<u8> {
    // static int pick(boolean flag) { return flag ? 1 : 2; }
    let mut file = ClassFile::new("demo/Branch");
    let code = [ILOAD_0, IFEQ, 0x00, 0x05, ICONST_1, IRETURN, ICONST_2, IRETURN];
    file.method(0x0009, "pick", "(Z)I", (1, 1), &code, &[]);
    file.build()
}

#[test]
fn test_branches_become_labels() -> Result<()> {
    let class = ClassReader::parse(&branching_class())?;
    let pick = class.method("pick", "(Z)I").expect("pick");

    assert_eq!(
        pick.instructions.get(0).map(|i| &i.kind),
        Some(&Insn::var(ILOAD, 0).kind)
    );
    let InsnKind::Jump { opcode, target } = &pick.instructions.get(1).expect("branch").kind else {
        panic!("expected a jump");
    };
    assert_eq!(*opcode, IFEQ);
    let target_index = pick.instructions.label_index(*target).expect("label");
    assert_eq!(
        pick.instructions.get(target_index + 1).map(|i| &i.kind),
        Some(&InsnKind::Simple(ICONST_2))
    );

    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, &class.name, pick)?;
    let rets = returns(pick);
    assert_eq!(analysis.constant_at(rets[0], 0), Some(Constant::Int(1)));
    assert_eq!(analysis.constant_at(rets[1], 0), Some(Constant::Int(2)));
    Ok(())
}

#[test]
fn test_concat_of_literals_folds() -> Result<()> {
    // static String ab() { return "a".concat("b"); }
    let mut file = ClassFile::new("demo/Concat");
    let a = file.string("a") as u8;
    let b = file.string("b") as u8;
    let concat = file.method_ref(
        "java/lang/String",
        "concat",
        "(Ljava/lang/String;)Ljava/lang/String;",
    );
    let [hi, lo] = concat.to_be_bytes();
    let code = [LDC, a, LDC, b, INVOKEVIRTUAL, hi, lo, ARETURN];
    file.method(0x0009, "ab", "()Ljava/lang/String;", (2, 0), &code, &[]);
    let class = ClassReader::parse(&file.build())?;

    let ab = class.method("ab", "()Ljava/lang/String;").expect("ab");
    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, &class.name, ab)?;
    let ret = returns(ab)[0];
    assert_eq!(analysis.constant_at(ret, 0), Some(Constant::string("ab")));
    assert!(analysis.safe_modify_locations(ret, 0).contains(&ret));
    Ok(())
}

#[test]
fn test_exception_table_is_read() -> Result<()> {
    // static int guarded() { try { return 1; } catch (Exception e) { return 0; } }
    let mut file = ClassFile::new("demo/Guarded");
    let code = [ICONST_1, IRETURN, ASTORE_0, ICONST_0, IRETURN];
    let handlers = [Handler {
        start: 0,
        end: 2,
        handler: 2,
        catch_type: Some("java/lang/Exception"),
    }];
    file.method(0x0009, "guarded", "()I", (1, 1), &code, &handlers);
    let class = ClassReader::parse(&file.build())?;

    let guarded = class.method("guarded", "()I").expect("guarded");
    assert_eq!(guarded.try_catch_blocks.len(), 1);
    assert_eq!(
        guarded.try_catch_blocks[0].catch_type.as_deref(),
        Some("java/lang/Exception")
    );

    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, &class.name, guarded)?;
    let store = guarded
        .instructions
        .iter()
        .find(|insn| insn.kind == Insn::var(ASTORE, 0).kind)
        .expect("handler store");
    let frame = analysis.frame(store.id()).expect("handler is reachable");
    assert_eq!(frame.stack_size(), 1);
    Ok(())
}

#[test]
fn test_process_archive() -> Result<()> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory("demo/", SimpleFileOptions::default())?;
    writer.start_file("demo/Branch.class", SimpleFileOptions::default())?;
    writer.write_all(&branching_class())?;
    writer.start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())?;
    writer.write_all(b"Manifest-Version: 1.0\n")?;
    let data = writer.finish()?.into_inner();

    let archive = Archive::from_bytes(data)?;
    assert_eq!(archive.len(), 2);

    let engine = Engine::new(EngineConfig::default().with_parallel(false));
    let (classes, report) = engine.process_archive(&archive)?;
    assert_eq!(report.classes, 1);
    assert_eq!(report.other_entries, 1);
    assert_eq!(report.changed, 0);
    assert_eq!(classes[0].name, "demo/Branch");
    assert_eq!(classes[0].methods[0].max_stack, Some(1));
    Ok(())
}
