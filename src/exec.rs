//! Logged execution of external programs.
//!
//! Every invocation leaves two files in the log directory:
//!
//! ```text
//! <log_dir>/
//!   000-git.invocation.log     # Working directory, arguments, environment, timing
//!   000-git.stdoutstderr.log   # Merged stdout/stderr as it was produced
//! ```
//!
//! The invocation record is written before the child starts and replaced
//! atomically once it exits, so a crash mid-execution still leaves a
//! readable record behind. Failures point at both files and quote the
//! first line of output.

mod capture;
mod command;
mod counter;
mod factory;
mod record;

use std::{fmt, io, path::PathBuf, process::ExitStatus};

pub use command::LoggedCommand;
pub use counter::InvocationCounter;
pub use factory::{CommandFactory, passthrough_env};

/// Errors from running a logged command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A log file could not be created, written, or renamed into place.
    #[error("logging to {}: {source}", path.display())]
    Logging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A caller's stdout/stderr sink could not be written. The program
    /// ran to completion and its output log is complete.
    #[error("forwarding output of {command_line:?}: {source}")]
    Sink {
        command_line: String,
        #[source]
        source: io::Error,
    },

    /// The program could not be started or exited unsuccessfully.
    #[error(
        "Running {command_line:?}: {reason}\n\
         See {invocation_log:?} for invocation details.\n\
         See {output_log:?} for full stdout/stderr.\n\
         First stdout/stderr line: {first_line:?}\n"
    )]
    Execution {
        command_line: String,
        reason: ExitReason,
        invocation_log: PathBuf,
        output_log: PathBuf,
        first_line: String,
    },
}

/// Why an execution failed.
#[derive(Debug)]
pub enum ExitReason {
    /// The process ran and exited unsuccessfully.
    Status(ExitStatus),

    /// The process could not be spawned or waited on.
    Io(io::Error),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{status}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}
