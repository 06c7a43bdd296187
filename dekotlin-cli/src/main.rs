mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show dekotlin info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dekotlin", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Inspect {
            path,
            classpath,
            method,
            no_inline,
            trust,
            dump,
        } => commands::inspect::run(
            path,
            &commands::inspect::InspectOptions {
                classpath,
                method: method.as_deref(),
                inline: !*no_inline,
                trust,
                dump: dump.as_deref(),
            },
            &cli.global,
        ),
        Command::Convert {
            input,
            output,
            classpath,
            no_inline,
            trust,
            dump,
        } => commands::convert::run(
            input,
            output,
            &commands::convert::ConvertOptions {
                classpath,
                inline: !*no_inline,
                trust,
                dump: dump.as_deref(),
            },
            &cli.global,
        ),
        Command::Check { path, classpath } => commands::check::run(path, classpath, &cli.global),
    }
}
