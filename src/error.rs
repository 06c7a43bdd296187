use thiserror::Error;

use crate::ir::InsnId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// Builds an [`Error::Analysis`] for a method of a class.
macro_rules! analysis_error {
    ($class:expr, $method:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::Analysis {
            class: $class.to_string(),
            method: $method.to_string(),
            message: format!($fmt $(, $arg)*),
        }
    };
}

/// Builds an [`Error::Write`] for a class.
macro_rules! write_error {
    ($class:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::Write {
            class: $class.to_string(),
            message: format!($fmt $(, $arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers the failure modes of class file parsing, dataflow analysis and
/// instruction rewriting. Each variant provides specific context about the failure mode
/// to enable appropriate error handling.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::NotSupported`] - Unsupported class file feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Archive`] - Errors reported by the zip reader
///
/// ## Analysis and Rewriting Errors
/// - [`Error::Analysis`] - A method does not admit a consistent abstract interpretation
/// - [`Error::EditConflict`] - Two edits of the same kind target one instruction
/// - [`Error::EditTarget`] - An edit targets an instruction that is not in the sequence
///
/// ## Writing Errors
/// - [`Error::Write`] - A class does not fit the limits of the class file format
///
/// Unresolvable references and recursive inlining chains are not errors; the inliner
/// leaves those call sites untouched and logs the reason.
///
/// # Examples
///
/// ```rust,no_run
/// use dekotlin::{Error, file::ClassReader};
///
/// let bytes = std::fs::read("Example.class")?;
/// match ClassReader::parse(&bytes) {
///     Ok(class) => println!("{} methods", class.methods.len()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed class: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // File parsing Errors
    /// The class file is damaged and could not be parsed.
    ///
    /// This error indicates that the input does not conform to the class file
    /// format. The error includes the source location where the malformation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The input uses a feature that is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading class files,
    /// archives or classpath directories.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Archive error.
    ///
    /// Wraps errors reported while reading a jar or zip container.
    #[error("{0}")]
    Archive(#[from] zip::result::ZipError),

    // Analysis Errors
    /// The bytecode of a method could not be abstractly interpreted.
    ///
    /// Raised for unbalanced stacks, stack height mismatches at control-flow
    /// joins, execution falling off the end of the code, subroutines and other
    /// shapes the analyzer does not admit. The error is fatal for the containing
    /// class: no partially rewritten method is ever produced.
    ///
    /// # Fields
    ///
    /// * `class` - Internal name of the class owning the method
    /// * `method` - Name and descriptor of the method
    /// * `message` - What went wrong and where
    #[error("Analysis of {class}.{method} failed: {message}")]
    Analysis {
        /// Internal name of the owning class
        class: String,
        /// Method name followed by its descriptor
        method: String,
        /// Failure description
        message: String,
    },

    /// Two edit requests of the same kind targeted one instruction in a single batch.
    ///
    /// This always indicates a bug in a rewrite rule and aborts the whole batch.
    #[error("Conflicting {kind} edits requested for instruction {target}")]
    EditConflict {
        /// The instruction targeted twice
        target: InsnId,
        /// The kind of edit that was requested twice
        kind: crate::rewrite::EditKind,
    },

    /// An edit targeted an instruction that does not belong to the edited sequence.
    #[error("Edit target {0} is not part of the instruction sequence")]
    EditTarget(InsnId),

    // Writing Errors
    /// A class could not be encoded as a class file.
    ///
    /// Raised when the rewritten class exceeds a limit of the format: more than
    /// 65535 constant pool slots, code longer than 65535 bytes, or a branch whose
    /// offset does not fit in 16 bits.
    ///
    /// # Fields
    ///
    /// * `class` - Internal name of the class being written
    /// * `message` - Which limit was exceeded and where
    #[error("Writing {class} failed: {message}")]
    Write {
        /// Internal name of the class
        class: String,
        /// Failure description
        message: String,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
