use thiserror::Error;

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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two classes with different recovery contracts:
///
/// ## Format errors: fatal to the current input file
/// - [`Error::Malformed`] - Corrupted or inconsistent container structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the buffer
/// - [`Error::NotSupported`] - Unknown magic, version, or endianness
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// These are never retried; the input is rejected as-is.
///
/// ## Overflow errors: recoverable at the orchestration layer
/// - [`Error::FieldIdOverflow`] / [`Error::MethodIdOverflow`] / [`Error::TypeIdOverflow`]
///
/// The merging pool guarantees that a file which overflowed an index space
/// leaves zero residual state behind, so the caller can route the offending
/// file to a different output unit and continue with the same pool.
///
/// Engine-internal invariant violations (a validation mismatch after
/// serialization, reading an index-map slot before it was populated) are
/// deliberately *not* represented here: those are bugs, not inputs, and
/// surface as panics.
///
/// # Examples
///
/// ```rust,no_run
/// use dexmerge::{DexFile, Error};
/// use std::path::Path;
///
/// match DexFile::from_file(Path::new("classes.dex")) {
///     Ok(dex) => println!("parsed {} class definitions", dex.class_defs_size()),
///     Err(Error::NotSupported) => eprintln!("not a supported dex file"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed input: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// The container structure does not conform to the dex format: bad MUTF-8,
    /// a string length that disagrees with its declaration, an out-of-range
    /// table index, an unsupported value tag, or a section that lies about its
    /// size. Includes the source location where the malformation was detected.
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

    /// An out of bound access was attempted while parsing the file.
    ///
    /// This error occurs when trying to read data beyond the end of the
    /// buffer. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// The input does not carry a recognized dex magic/version, or declares
    /// the byte-swapped endian constant.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Merging one more file would exceed the 65536 distinct field ids the
    /// format can address with a 16-bit index.
    ///
    /// The associated value is the distinct field count the rejected file
    /// would have produced. The pool has been rolled back to its state before
    /// the offending file was added.
    #[error("Field id space overflow - merge would require {0} field ids")]
    FieldIdOverflow(usize),

    /// Merging one more file would exceed the 65536 distinct method ids the
    /// format can address with a 16-bit index.
    ///
    /// The associated value is the distinct method count the rejected file
    /// would have produced. The pool has been rolled back to its state before
    /// the offending file was added.
    #[error("Method id space overflow - merge would require {0} method ids")]
    MethodIdOverflow(usize),

    /// Merging one more file would exceed the 65536 distinct type ids
    /// addressable by the 16-bit type indices in field/method id records and
    /// instruction operands.
    ///
    /// The associated value is the distinct type count the rejected file
    /// would have produced. The pool has been rolled back to its state before
    /// the offending file was added.
    #[error("Type id space overflow - merge would require {0} type ids")]
    TypeIdOverflow(usize),
}
