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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors split into two groups, mirroring the propagation policy of the
/// analysis: *structural* errors produced while building or validating IR
/// ([`Error::Malformed`]), and *analysis-fatal* conditions that abort a pass
/// invocation ([`Error::UnknownTerminator`], [`Error::NonIntegerOperand`],
/// [`Error::UnsupportedInitializer`]). Soft conditions (unknown cast or
/// binary opcodes, unanalyzable load addresses, unhandled instruction kinds)
/// are never surfaced as `Error` — they are logged and recovered with a
/// conservative result.
///
/// # Examples
///
/// ```rust,ignore
/// use mkint::{MkintPass, Error};
///
/// match MkintPass::new().run(&mut module) {
///     Ok(_) => println!("analysis complete"),
///     Err(Error::UnknownTerminator { function, block }) => {
///         eprintln!("unsupported terminator in {function}::{block}");
///     }
///     Err(e) => eprintln!("analysis failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Structurally invalid IR, e.g. a block without a terminator or an
    /// instruction appended after one.
    #[error("Malformed IR: {message} - {file}:{line}")]
    Malformed {
        /// Description of the malformation
        message: String,
        /// Source file where the error was raised
        file: &'static str,
        /// Line number where the error was raised
        line: u32,
    },

    /// A basic block ends in a terminator the analysis does not model
    /// (anything other than branch, switch or return).
    #[error("Unknown terminator in {function}::{block}")]
    UnknownTerminator {
        /// Name of the containing function
        function: String,
        /// Display name of the offending block
        block: String,
    },

    /// An operand was expected to be integer-typed by the structure of the
    /// instruction (e.g. a compared value feeding a conditional branch) but
    /// is not.
    #[error("Non-integer operand where an integer is structurally required: {context}")]
    NonIntegerOperand {
        /// Description of the offending operand and its location
        context: String,
    },

    /// A global array carries an initializer shape the range seeding cannot
    /// decompose into per-element constants.
    #[error("Unsupported initializer for global array: {global}")]
    UnsupportedInitializer {
        /// Name of the global variable
        global: String,
    },
}

/// Convenience `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
