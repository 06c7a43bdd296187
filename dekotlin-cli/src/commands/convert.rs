use std::path::{Path, PathBuf};

use anyhow::Context;
use dekotlin::{
    engine::{EngineConfig, SURROGATE_NAMESPACE},
    file::{Archive, ClassReader},
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, file_display_name, is_class_file},
    output::print_output,
};

pub struct ConvertOptions<'a> {
    pub classpath: &'a [PathBuf],
    pub inline: bool,
    pub trust: &'a [String],
    pub dump: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct ConvertOutput {
    input: String,
    output: String,
    classes: usize,
    changed: usize,
    other_entries: usize,
}

pub fn run(
    input: &Path,
    output: &Path,
    options: &ConvertOptions<'_>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let trusted = if options.trust.is_empty() {
        vec![SURROGATE_NAMESPACE.to_string()]
    } else {
        options.trust.to_vec()
    };
    let mut config = EngineConfig::default()
        .with_trusted_prefixes(trusted)
        .with_inlining(options.inline);
    if let Some(dump) = options.dump {
        config = config.with_dump_path(dump);
    }

    // the input itself is searched for helpers after the explicit classpath
    let mut classpath = options.classpath.to_vec();
    if !is_class_file(input) {
        classpath.push(input.to_path_buf());
    }
    let engine = build_engine(config, &classpath)?;

    let result = if is_class_file(input) {
        let mut class = ClassReader::from_file(input)
            .with_context(|| format!("failed to read class file: {}", input.display()))?;
        let changed = engine
            .process_class(&mut class)
            .with_context(|| format!("rewriting failed for: {}", input.display()))?;
        let bytes = engine
            .write_class(&class)
            .with_context(|| format!("failed to encode {}", class.name))?;
        std::fs::write(output, bytes)
            .with_context(|| format!("failed to write {}", output.display()))?;
        ConvertOutput {
            input: file_display_name(input),
            output: output.display().to_string(),
            classes: 1,
            changed: usize::from(changed),
            other_entries: 0,
        }
    } else {
        let archive = Archive::open(input)
            .with_context(|| format!("failed to open archive: {}", input.display()))?;
        let report = engine
            .process_archive_to(&archive, output)
            .with_context(|| format!("converting {} failed", input.display()))?;
        ConvertOutput {
            input: file_display_name(input),
            output: output.display().to_string(),
            classes: report.classes,
            changed: report.changed,
            other_entries: report.other_entries,
        }
    };

    print_output(&result, opts, |out| {
        println!(
            "{} -> {}: {} class(es), {} changed, {} other entr(ies) copied.",
            out.input, out.output, out.classes, out.changed, out.other_entries
        );
    })
}
