use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dekotlin - dataflow analysis and inlining of JVM bytecode
#[derive(Debug, Parser)]
#[command(name = "dekotlin", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the rewrite pipeline and print the disassembly of the result.
    Inspect {
        /// Path to a .class file or a jar.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Directories and jars searched for inlining targets.
        #[arg(short, long, value_name = "PATH")]
        classpath: Vec<PathBuf>,

        /// Show only methods with this name.
        #[arg(short, long, value_name = "NAME")]
        method: Option<String>,

        /// Disable inlining of trusted helpers.
        #[arg(long)]
        no_inline: bool,

        /// Namespace prefixes whose functions are inlined (defaults to the surrogate namespace).
        #[arg(long, value_name = "PREFIX")]
        trust: Vec<String>,

        /// Directory receiving the disassembly of methods that fail analysis.
        #[arg(long, value_name = "DIR")]
        dump: Option<PathBuf>,
    },

    /// Run the rewrite pipeline and write the result to a new class file or jar.
    Convert {
        /// Path to a .class file or a jar.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Path of the class file or jar to write.
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Directories and jars searched for inlining targets, before the input itself.
        #[arg(short, long, value_name = "PATH")]
        classpath: Vec<PathBuf>,

        /// Disable inlining of trusted helpers.
        #[arg(long)]
        no_inline: bool,

        /// Namespace prefixes whose functions are inlined (defaults to the surrogate namespace).
        #[arg(long, value_name = "PREFIX")]
        trust: Vec<String>,

        /// Directory receiving the disassembly of methods that fail analysis.
        #[arg(long, value_name = "DIR")]
        dump: Option<PathBuf>,
    },

    /// Analyze every method and report the ones that are rejected.
    Check {
        /// Path to a .class file or a jar.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Directories and jars on the classpath.
        #[arg(short, long, value_name = "PATH")]
        classpath: Vec<PathBuf>,
    },
}
