//! A single logged invocation of an external program.

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::{Mutex, PoisonError},
    thread,
    time::Instant,
};

use jiff::Timestamp;
use tracing::Span;

use super::{
    CommandError, ExitReason, InvocationCounter,
    capture::{self, CopyError, OutputLog, SharedBuffer},
    record::{self, Invocation, LogLayout, LogPaths},
};

/// Like [`std::process::Command`], but every run is recorded.
///
/// Running a `LoggedCommand`:
///
/// - logs the command line through `tracing`, inside the factory's span,
/// - writes working directory, arguments, environment and timing to an
///   invocation log,
/// - writes merged stdout/stderr to an output log (and to any sinks set
///   with [`stdout`](Self::stdout) / [`stderr`](Self::stderr)),
/// - on failure, returns an error pointing at both logs and quoting the
///   first line of output.
///
/// Built by [`CommandFactory::command`](super::CommandFactory::command).
pub struct LoggedCommand {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: Option<Vec<(String, String)>>,
    logs: LogLayout,
    counter: InvocationCounter,
    span: Span,
    stdout: Option<Box<dyn Write + Send>>,
    stderr: Option<Box<dyn Write + Send>>,
}

/// How running the child went wrong, before it is turned into a `CommandError`.
enum RunFailure {
    Process(io::Error),
    Copy(CopyError),
}

impl LoggedCommand {
    pub(super) fn new(
        program: String,
        args: Vec<String>,
        dir: Option<PathBuf>,
        env: Option<Vec<(String, String)>>,
        logs: LogLayout,
        counter: InvocationCounter,
        span: Span,
    ) -> Self {
        Self {
            program,
            args,
            dir,
            env,
            logs,
            counter,
            span,
            stdout: None,
            stderr: None,
        }
    }

    /// Run in `dir` instead of the factory default.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Add a variable to the child's environment.
    ///
    /// The child environment becomes explicit: if it was inherited
    /// before, the child now sees only this variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Also send the child's stdout to `sink`.
    #[must_use]
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    /// Also send the child's stderr to `sink`.
    #[allow(dead_code)]
    #[must_use]
    pub fn stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    /// The program and its arguments, joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command and return its stdout.
    ///
    /// Replaces any sink set with [`stdout`](Self::stdout).
    pub fn output(self) -> Result<Vec<u8>, CommandError> {
        let buffer = SharedBuffer::default();
        self.stdout(buffer.clone()).run()?;
        Ok(buffer.take())
    }

    /// Run the command to completion.
    pub fn run(self) -> Result<(), CommandError> {
        let command_line = self.command_line();
        let Self {
            program,
            args,
            dir,
            env,
            logs,
            counter,
            span,
            stdout,
            stderr,
        } = self;
        let _entered = span.enter();

        tracing::info!("{command_line}");

        let log_dir = std::path::absolute(&logs.dir).map_err(|source| CommandError::Logging {
            path: logs.dir.clone(),
            source,
        })?;
        let paths = LogPaths::new(&log_dir, counter.next_index(), logs.index_width, &program);

        let work_dir = match &dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(logging_to(&paths.invocation))?,
        };
        let argv: Vec<String> = std::iter::once(program.clone())
            .chain(args.iter().cloned())
            .collect();
        let invocation = Invocation {
            argv: &argv,
            work_dir: &work_dir,
            env: env.as_deref(),
            started: Timestamp::now(),
        };
        let executable = resolve_program(&program, &work_dir);
        let clock = Instant::now();

        // Nothing runs unless the provisional record made it to disk.
        record::write_provisional(&paths.invocation, &invocation.provisional())
            .map_err(logging_to(&paths.invocation))?;
        let output_file = record::create_log(&paths.output).map_err(logging_to(&paths.output))?;
        let output_log = Mutex::new(OutputLog::new(output_file));

        let outcome = execute(
            &executable,
            &args,
            dir.as_deref(),
            env.as_deref(),
            &output_log,
            stdout,
            stderr,
        );

        let finished = invocation.finished(Timestamp::now(), clock.elapsed());
        record::replace_atomically(&paths.invocation, &finished)
            .map_err(logging_to(&paths.invocation))?;

        let reason = match outcome {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => ExitReason::Status(status),
            Err(RunFailure::Process(e)) => ExitReason::Io(e),
            Err(RunFailure::Copy(CopyError::Log(source))) => {
                return Err(CommandError::Logging {
                    path: paths.output,
                    source,
                });
            }
            Err(RunFailure::Copy(CopyError::Sink(source))) => {
                return Err(CommandError::Sink {
                    command_line,
                    source,
                });
            }
        };

        let first_line = output_log
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .first_line();

        Err(CommandError::Execution {
            command_line,
            reason,
            invocation_log: paths.invocation,
            output_log: paths.output,
            first_line,
        })
    }
}

/// Spawn the child, drain both pipes, and wait for it.
fn execute(
    program: &Path,
    args: &[String],
    dir: Option<&Path>,
    env: Option<&[(String, String)]>,
    output_log: &Mutex<OutputLog>,
    stdout: Option<Box<dyn Write + Send>>,
    stderr: Option<Box<dyn Write + Send>>,
) -> Result<ExitStatus, RunFailure> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    if let Some(env) = env {
        command
            .env_clear()
            .envs(env.iter().map(|(key, value)| (key, value)));
    }

    let mut child = command.spawn().map_err(RunFailure::Process)?;
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    let copied = thread::scope(|scope| {
        let drains = [
            child_stdout.map(|pipe| scope.spawn(move || capture::drain(pipe, output_log, stdout))),
            child_stderr.map(|pipe| scope.spawn(move || capture::drain(pipe, output_log, stderr))),
        ];
        let mut result = Ok(());
        for handle in drains.into_iter().flatten() {
            let drained = handle
                .join()
                .unwrap_or_else(|_| {
                    Err(CopyError::Log(io::Error::other("output drain panicked")))
                });
            if result.is_ok() {
                result = drained;
            }
        }
        result
    });

    let status = child.wait().map_err(RunFailure::Process)?;
    copied.map_err(RunFailure::Copy)?;
    Ok(status)
}

/// Look `program` up in this process's `PATH`, relative entries taken from `cwd`.
///
/// Children usually run with an explicit environment that has no `PATH`,
/// so the lookup cannot be left to the child's environment. A program that
/// is not found is returned as is and fails to spawn.
fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
    which::which_in(program, env::var_os("PATH"), cwd).unwrap_or_else(|e| {
        tracing::debug!(program, error = %e, "program not found in PATH");
        PathBuf::from(program)
    })
}

fn logging_to(path: &Path) -> impl FnOnce(io::Error) -> CommandError + '_ {
    move |source| CommandError::Logging {
        path: path.to_path_buf(),
        source,
    }
}
