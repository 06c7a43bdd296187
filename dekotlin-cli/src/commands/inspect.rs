use std::path::{Path, PathBuf};

use anyhow::Context;
use dekotlin::{
    engine::{EngineConfig, SURROGATE_NAMESPACE},
    ir::MethodListing,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, file_display_name, load_classes},
    output::{print_output, Align, TabWriter},
};

pub struct InspectOptions<'a> {
    pub classpath: &'a [PathBuf],
    pub method: Option<&'a str>,
    pub inline: bool,
    pub trust: &'a [String],
    pub dump: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct MethodOutput {
    class: String,
    method: String,
    max_stack: Option<u16>,
    max_locals: u16,
    listing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    file: String,
    classes: usize,
    changed: usize,
    methods: Vec<MethodOutput>,
}

pub fn run(path: &Path, options: &InspectOptions<'_>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let mut classes = load_classes(path)?;

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
    let engine = build_engine(config, options.classpath)?;

    let changed = engine
        .process_classes(&mut classes)
        .with_context(|| format!("rewriting failed for: {}", path.display()))?;

    let mut methods = Vec::new();
    for class in &classes {
        for method in &class.methods {
            if options.method.is_some_and(|name| name != method.name) {
                continue;
            }
            let listing = MethodListing::new(&class.name, method).to_string();
            methods.push(MethodOutput {
                class: class.name.clone(),
                method: method.signature(),
                max_stack: method.max_stack,
                max_locals: method.max_locals,
                listing: listing.lines().map(str::to_string).collect(),
            });
        }
    }

    let output = InspectOutput {
        file: file_display_name(path),
        classes: classes.len(),
        changed,
        methods,
    };

    print_output(&output, opts, |out| {
        for method in &out.methods {
            for line in &method.listing {
                println!("{line}");
            }
            println!();
        }
        let mut tw = TabWriter::new(vec![
            ("Class", Align::Left),
            ("Method", Align::Left),
            ("Stack", Align::Right),
            ("Locals", Align::Right),
        ]);
        for method in &out.methods {
            tw.row(vec![
                method.class.clone(),
                method.method.clone(),
                method
                    .max_stack
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
                method.max_locals.to_string(),
            ]);
        }
        tw.print();
        println!(
            "\n{}: {} class(es), {} changed, {} method(s) shown.",
            out.file,
            out.classes,
            out.changed,
            out.methods.len()
        );
    })
}
