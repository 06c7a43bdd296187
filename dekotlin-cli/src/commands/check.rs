use std::path::{Path, PathBuf};

use anyhow::bail;
use dekotlin::{analysis::FrameCache, engine::EngineConfig};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, file_display_name, load_classes},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct Failure {
    class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    stage: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    file: String,
    classes: usize,
    methods: usize,
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<Failure>,
}

pub fn run(path: &Path, classpath: &[PathBuf], opts: &GlobalOptions) -> anyhow::Result<()> {
    let classes = load_classes(path)?;
    let engine = build_engine(EngineConfig::default().with_parallel(false), classpath)?;

    let mut methods = 0;
    let mut failures = Vec::new();
    for class in &classes {
        let frames = FrameCache::new();
        let mut analyzable = true;
        for method in class.methods.iter().filter(|m| !m.instructions.is_empty()) {
            methods += 1;
            if let Err(error) = frames.frames(&class.name, method) {
                analyzable = false;
                failures.push(Failure {
                    class: class.name.clone(),
                    method: Some(method.signature()),
                    stage: "analysis",
                    message: error.to_string(),
                });
            }
        }

        // the pipeline only runs on classes whose input is sound
        if analyzable {
            let mut rewritten = class.clone();
            if let Err(error) = engine.process_class(&mut rewritten) {
                failures.push(Failure {
                    class: class.name.clone(),
                    method: None,
                    stage: "rewrite",
                    message: error.to_string(),
                });
            }
        }
    }

    let result = CheckResult {
        file: file_display_name(path),
        classes: classes.len(),
        methods,
        valid: failures.is_empty(),
        failures,
    };

    print_output(&result, opts, |r| {
        let status = if r.valid { "PASS" } else { "FAIL" };
        println!(
            "{status}  {}  ({} classes, {} methods)",
            r.file, r.classes, r.methods
        );
        if !r.failures.is_empty() {
            let mut tw = TabWriter::new(vec![
                ("Stage", Align::Left),
                ("Class", Align::Left),
                ("Method", Align::Left),
                ("Error", Align::Left),
            ])
            .indent("  ");
            for f in &r.failures {
                tw.row(vec![
                    f.stage.to_string(),
                    f.class.clone(),
                    f.method.clone().unwrap_or_default(),
                    f.message.clone(),
                ]);
            }
            tw.print();
        }
    })?;

    if !result.valid {
        bail!("{} failure(s) in {}", result.failures.len(), path.display());
    }
    Ok(())
}
