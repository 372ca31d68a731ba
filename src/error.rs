use std::fmt;

use thiserror::Error;

use crate::{database::MethodId, ir::Graph};

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

/// The generic Error type, covering every failure a compile request can report.
///
/// A compile has exactly three kinds of outcome: success, a structural bailout (the
/// method is left to a lower tier), or an error in the request itself (unknown method,
/// undecodable bytecode outside of a compile). Policy rejections of inlining and
/// unresolved database entries are never errors; they are recorded on the successful
/// [`crate::compiler::Compilation`].
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Bytecode that cannot be decoded
/// - [`Error::OutOfBounds`] - A read past the end of the bytecode
/// - [`Error::MethodNotFound`] - The database does not know the requested method
///
/// ## Compile Errors
/// - [`Error::Bailout`] - A structural invariant was violated while building the graph
///
/// # Examples
///
/// ```rust,ignore
/// use jitfront::{compiler::compile_method, CompilerConfig, Error};
///
/// match compile_method(&db, method, &CompilerConfig::default()) {
///     Ok(compilation) => println!("{} nodes", compilation.instruction_count),
///     Err(Error::Bailout(bailout)) => eprintln!("bailout: {}", bailout.reason),
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged and could not be decoded.
    ///
    /// The error includes the source location where the malformation was detected.
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

    /// An out of bound access was attempted while decoding bytecode.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The program database has no method with this id.
    #[error("Method {0} is unknown to the program database")]
    MethodNotFound(MethodId),

    /// The compile was aborted by a structural bailout.
    ///
    /// Carries the reason plus the partially built graph, which is only meant for
    /// logging and inspection.
    #[error("{0}")]
    Bailout(Box<Bailout>),
}

/// A failed compile: the reason and whatever graph had been built when it happened.
pub struct Bailout {
    /// Why construction stopped.
    pub reason: BailoutReason,
    /// The partially constructed graph.
    pub graph: Graph,
    /// Number of nodes appended before the bailout.
    pub instruction_count: usize,
}

impl fmt::Debug for Bailout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bailout")
            .field("reason", &self.reason)
            .field("blocks", &self.graph.block_count())
            .field("instruction_count", &self.instruction_count)
            .finish()
    }
}

impl fmt::Display for Bailout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bailout: {}", self.reason)
    }
}

/// Structural reasons for abandoning a compile.
///
/// The `Display` text of each variant is the diagnostic string reported to the
/// caller. Every function in the graph builder that can hit one of these returns
/// `Result<T, BailoutReason>`, so a bailout unwinds straight to the top-level compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BailoutReason {
    /// An exception handler's range includes its own entry.
    #[error("exception handler covers itself")]
    HandlerCoversItself,

    /// Loop marking ran out of bits in its tracking word.
    #[error("too many loops")]
    TooManyLoops,

    /// A handler entry is also the target of an ordinary jump or fall-through.
    #[error("Exception handler can be reached by both normal and exceptional control flow")]
    HandlerReachedByNormalFlow,

    /// An instruction popped more operands than the stack holds.
    #[error("stack underflow at bci {0}")]
    StackUnderflow(i32),

    /// A popped or loaded value does not have the type the bytecode expects.
    #[error("type mismatch at bci {0}")]
    TypeMismatch(i32),

    /// A local was read that holds no value of the requested type.
    #[error("access of illegal local variable {index} at bci {bci}")]
    IllegalLocal {
        /// Local slot index
        index: usize,
        /// Offending bytecode index
        bci: i32,
    },

    /// Two states reaching the same block could not be reconciled.
    #[error("block join failed")]
    BlockJoinFailed,

    /// Two states reaching the same block hold a different number of monitors.
    #[error("locked monitor count mismatch at block join")]
    LockMismatch,

    /// `monitorexit` without a matching held monitor.
    #[error("monitor stack underflow")]
    MonitorUnderflow,

    /// An exception state could not be merged into its handler.
    #[error("error while joining with exception handler, prob. due to complicated jsr/rets")]
    ExceptionJoinFailed,

    /// The node budget was exhausted.
    #[error("Method and/or inlining is too large")]
    TooLarge,

    /// A subroutine was entered again while already active.
    #[error("too-complicated jsr/ret structure")]
    ReentrantSubroutine,

    /// `ret` outside of any subroutine.
    #[error("ret encountered while not parsing subroutine")]
    RetOutsideSubroutine,

    /// `ret` through a local that does not hold the active return address.
    #[error("can not handle complicated jsr/ret constructs")]
    ComplicatedRet,

    /// A nested subroutine stored into the return-address local of its parent.
    #[error("subroutine overwrites return address from previous subroutine")]
    ReturnAddressOverwritten,

    /// A bytecode this front end does not translate.
    #[error("unsupported bytecode {0}")]
    UnsupportedBytecode(&'static str),

    /// Bytecode or constant pool content that cannot be interpreted.
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),

    /// A method referenced during the compile is missing from the database.
    #[error("unknown method {0}")]
    UnknownMethod(MethodId),

    /// The OSR entry block was never reached during parsing.
    #[error("osr entry must have been visited for osr compile")]
    OsrEntryNotVisited,

    /// The OSR entry block has values on its operand stack.
    #[error("stack not empty at OSR entry point")]
    OsrStackNotEmpty,
}

impl From<Error> for BailoutReason {
    fn from(error: Error) -> Self {
        BailoutReason::MalformedBytecode(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bailout_messages() {
        assert_eq!(
            BailoutReason::HandlerCoversItself.to_string(),
            "exception handler covers itself"
        );
        assert_eq!(
            BailoutReason::TooLarge.to_string(),
            "Method and/or inlining is too large"
        );
        assert_eq!(
            BailoutReason::IllegalLocal { index: 3, bci: 7 }.to_string(),
            "access of illegal local variable 3 at bci 7"
        );
    }

    #[test]
    fn test_decode_error_becomes_malformed_bailout() {
        let error = malformed_error!("truncated {} operand", "branch");
        let reason = BailoutReason::from(error);
        match reason {
            BailoutReason::MalformedBytecode(message) => {
                assert!(message.contains("truncated branch operand"));
            }
            other => panic!("unexpected reason {other:?}"),
        }
    }
}
