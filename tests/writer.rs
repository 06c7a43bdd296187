//! Writing classes and jars back after processing.

mod common;

use std::fs;

use common::{ClassFile, Handler};
use dekotlin::{
    analysis::{Analysis, Constant, FrameCache},
    engine::{Engine, EngineConfig},
    file::{Archive, ArchiveEntry, ClassReader, ClassWriter},
    ir::{opcodes::*, Class, InsnKind, MethodListing},
    resolver::ResolverChain,
    Result,
};

const ASTORE_0: u8 = 0x4b;
const MANIFEST: &[u8] = b"Manifest-Version: 1.0\nMain-Class: app.Main\n";

fn listings(class: &Class) -> Vec<String> {
    class
        .methods
        .iter()
        .map(|method| MethodListing::new(&class.name, method).to_string())
        .collect()
}

/// `pick` branches, `guarded` has a handler, plus a constant field and a `SourceFile`.
fn sample_class() -> Vec<u8> {
    let mut file = ClassFile::new("demo/Sample");
    file.field(0x0019, "LIMIT", "I", Some(42));
    file.field(0x0002, "name", "Ljava/lang/String;", None);

    let code = [ILOAD_0, IFEQ, 0x00, 0x05, ICONST_1, IRETURN, ICONST_2, IRETURN];
    file.method(0x0009, "pick", "(Z)I", (1, 1), &code, &[]);

    let code = [ICONST_1, IRETURN, ASTORE_0, ICONST_0, IRETURN];
    let handlers = [Handler {
        start: 0,
        end: 2,
        handler: 2,
        catch_type: Some("java/lang/Exception"),
    }];
    file.method(0x0009, "guarded", "()I", (1, 1), &code, &handlers);

    let source = file.utf8("Sample.kt");
    file.attribute("SourceFile", &source.to_be_bytes());
    file.build()
}

#[test]
fn test_untouched_class_survives_a_round_trip() -> Result<()> {
    let data = sample_class();
    let class = ClassReader::parse(&data)?;

    let resolver = ResolverChain::new(0);
    let written = ClassWriter::new(&resolver).write(&class)?;
    let reread = ClassReader::parse(&written)?;

    assert_eq!(listings(&reread), listings(&class));
    assert_eq!(reread.fields, class.fields);
    assert_eq!(reread.attributes, class.attributes);
    assert_eq!(reread.attributes[0].name, "SourceFile");
    assert_eq!(reread.fields[0].attributes[0].name, "ConstantValue");

    // The original pool is emitted first, so raw attribute indices still hold.
    assert_eq!(&written[..8], &data[..8]);
    let count = |bytes: &[u8]| u16::from_be_bytes([bytes[8], bytes[9]]);
    assert!(count(&written) >= count(&data));
    Ok(())
}

#[test]
fn test_written_handler_is_analyzable() -> Result<()> {
    let class = ClassReader::parse(&sample_class())?;
    let resolver = ResolverChain::new(0);
    let reread = ClassReader::parse(&ClassWriter::new(&resolver).write(&class)?)?;

    let guarded = reread.method("guarded", "()I").expect("guarded");
    assert_eq!(guarded.try_catch_blocks.len(), 1);
    assert_eq!(
        guarded.try_catch_blocks[0].catch_type.as_deref(),
        Some("java/lang/Exception")
    );
    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, &reread.name, guarded)?;
    assert_eq!(analysis.frames().max_stack(), 1);
    Ok(())
}

/// `lib/Math.twice(x) = x * 2 + 1` and `app/Main.run(x) = lib/Math.twice(x)`.
fn app_jar(path: &std::path::Path) -> Result<Archive> {
    let mut lib = ClassFile::new("lib/Math");
    let code = [ILOAD_0, ICONST_2, IMUL, ICONST_1, IADD, IRETURN];
    lib.method(0x0009, "twice", "(I)I", (2, 1), &code, &[]);

    let mut app = ClassFile::new("app/Main");
    let twice = app.method_ref("lib/Math", "twice", "(I)I");
    let [hi, lo] = twice.to_be_bytes();
    let code = [ICONST_3, INVOKESTATIC, hi, lo, IRETURN];
    app.method(0x0009, "run", "()I", (1, 0), &code, &[]);

    let archive = Archive::from_entries(vec![
        ArchiveEntry {
            name: "META-INF/MANIFEST.MF".to_string(),
            data: MANIFEST.to_vec(),
        },
        ArchiveEntry {
            name: "app/Main.class".to_string(),
            data: app.build(),
        },
        ArchiveEntry {
            name: "lib/Math.class".to_string(),
            data: lib.build(),
        },
    ]);
    archive.save(path)?;
    Ok(archive)
}

#[test]
fn test_convert_jar_inlines_and_passes_entries_through() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, output) = (dir.path().join("app.jar"), dir.path().join("out.jar"));
    let archive = app_jar(&input)?;

    let engine = Engine::new(
        EngineConfig::default()
            .with_trusted_prefixes(["lib/"])
            .with_parallel(false),
    );
    engine.resolver().add_classpath_entry(&input)?;
    let report = engine.process_archive_to(&archive, &output)?;
    assert_eq!(report.classes, 2);
    assert_eq!(report.changed, 1);
    assert_eq!(report.other_entries, 1);

    let converted = Archive::open(&output)?;
    let names: Vec<&str> = converted.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["META-INF/MANIFEST.MF", "app/Main.class", "lib/Math.class"]);
    assert_eq!(converted.entries()[0].data, MANIFEST);
    assert_eq!(converted.entries()[2].data, archive.entries()[2].data);

    let main = ClassReader::parse(&converted.entries()[1].data)?;
    let run = main.method("run", "()I").expect("run");
    assert!(!run.instructions.iter().any(|insn| {
        matches!(&insn.kind, InsnKind::Method { owner, .. } if owner.starts_with("lib/"))
    }));

    let cache = FrameCache::new();
    let analysis = Analysis::new(&cache, &main.name, run)?;
    let ret = run
        .instructions
        .iter()
        .find(|insn| insn.kind == InsnKind::Simple(IRETURN))
        .expect("return");
    assert_eq!(analysis.constant_at(ret.id(), 0), Some(Constant::Int(7)));
    assert!(fs::metadata(&output)?.len() > 0);
    Ok(())
}

#[test]
fn test_failed_conversion_leaves_no_partial_class() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut broken = ClassFile::new("app/Broken");
    // falls off the end of the code
    broken.method(0x0009, "run", "()I", (1, 0), &[ICONST_1], &[]);
    let archive = Archive::from_entries(vec![ArchiveEntry {
        name: "app/Broken.class".to_string(),
        data: broken.build(),
    }]);

    let output = dir.path().join("out.jar");
    let engine = Engine::new(EngineConfig::default().with_parallel(false));
    assert!(engine.process_archive_to(&archive, &output).is_err());
    assert!(!output.exists());
    Ok(())
}
