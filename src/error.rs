use thiserror::Error;

macro_rules! validator_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Validator {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Validator {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! unsupported {
    ($fmt:expr) => {
        crate::Error::Unsupported($fmt.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Unsupported(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups with different propagation policies:
///
/// ## Recoverable
/// - [`Error::Unsupported`] - An instruction or operand combination is not modeled. Callers mark
///   the instruction unhandled or treat it as uninterpreted.
/// - [`Error::Validator`] - A validator step failed. Caught by the top-level `verify()` call and
///   turned into a reported failure.
/// - [`Error::SolverTimeout`], [`Error::SolverInterrupted`], [`Error::Solver`] - The solver
///   could not answer. This is "unknown", never "disproved".
///
/// ## Fatal
/// - [`Error::WidthMismatch`] - An expression was built from operands of incompatible sorts.
///   This always indicates an implementation bug (handler table, formula cache) and is never
///   downgraded.
/// - [`Error::Strata`] - A cached formula file is malformed.
///
/// ## Input
/// - [`Error::Parse`] - Assembly text could not be parsed.
/// - [`Error::Io`] - Filesystem access failed.
/// - [`Error::GraphError`] - A graph operation referenced a node that does not exist.
///
/// Segmentation faults are not errors. They are symbolic conditions carried inside the formulas.
///
/// # Examples
///
/// ```rust
/// use x64verify::{Error, x64::Code};
///
/// match "addq %rax, %%rbx".parse::<Code>() {
///     Ok(_) => unreachable!(),
///     Err(Error::Parse { line, message }) => {
///         eprintln!("line {}: {}", line, message);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The instruction or operand combination is not modeled by a handler.
    #[error("Unsupported - {0}")]
    Unsupported(String),

    /// Two expressions with incompatible sorts were combined.
    ///
    /// # Fields
    ///
    /// * `op` - Name of the operation being built
    /// * `left` - Sort of the first operand
    /// * `right` - Sort of the second operand (or the expected sort)
    #[error("Width mismatch in {op}: {left} vs {right}")]
    WidthMismatch {
        /// The operation that rejected its operands
        op: &'static str,
        /// Rendered sort of the left operand
        left: String,
        /// Rendered sort of the right operand
        right: String,
    },

    /// A validator step failed.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the failure
    /// * `file` - Source file where the error was raised
    /// * `line` - Source line where the error was raised
    #[error("Validator - {file}:{line}: {message}")]
    Validator {
        /// The message to be printed for the Validator error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The solver exceeded its configured timeout.
    #[error("Solver timed out after {0} ms")]
    SolverTimeout(u64),

    /// The solver query was cancelled through the interrupt flag.
    #[error("Solver query was interrupted")]
    SolverInterrupted,

    /// The solver reported a failure other than a timeout.
    #[error("Solver - {0}")]
    Solver(String),

    /// Assembly text could not be parsed.
    #[error("Parse error on line {line}: {message}")]
    Parse {
        /// One-based line number in the parsed text
        line: usize,
        /// What went wrong
        message: String,
    },

    /// A learned formula could not be loaded or does not fit its opcode.
    #[error("Strata - {0}")]
    Strata(String),

    /// Filesystem I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Graph operation error.
    #[error("{0}")]
    GraphError(String),
}

impl Error {
    /// Returns `true` if this error must never be downgraded to a recoverable outcome.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::WidthMismatch { .. } | Error::Strata(_))
    }

    /// Returns `true` if the solver could not give an answer.
    #[must_use]
    pub fn is_solver_unknown(&self) -> bool {
        matches!(
            self,
            Error::SolverTimeout(_) | Error::SolverInterrupted | Error::Solver(_)
        )
    }
}
