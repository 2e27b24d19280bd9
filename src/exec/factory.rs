//! Command factories: execution context shared by a group of commands.
//!
//! A factory binds a log directory, a tracing span, a default working
//! directory and an environment. Deriving a factory returns a new value
//! and leaves the original untouched, so a factory handed to an earlier
//! stage keeps behaving as it was configured.

use std::path::PathBuf;

use tracing::Span;

use super::{InvocationCounter, LoggedCommand, record::LogLayout};

/// Variables forwarded to children once a factory's environment is bound.
///
/// Commit attribution plus SSH and GPG agent access. Everything else is
/// dropped, so the invocation log lists all the environment a tool saw.
pub const PASSTHROUGH_ENV: [&str; 5] = [
    "DEBFULLNAME",
    "DEBEMAIL",
    "SSH_AGENT_PID",
    "GPG_AGENT_INFO",
    "SSH_AUTH_SOCK",
];

/// The allow-listed variables present in this process's environment.
pub fn passthrough_env() -> Vec<(String, String)> {
    PASSTHROUGH_ENV
        .iter()
        .filter_map(|name| {
            std::env::var(name)
                .ok()
                .map(|value| ((*name).to_string(), value))
        })
        .collect()
}

/// Builds [`LoggedCommand`]s that share a log directory, span, working
/// directory, environment and invocation sequence.
#[derive(Debug, Clone)]
pub struct CommandFactory {
    logs: LogLayout,
    counter: InvocationCounter,
    span: Span,
    dir: Option<PathBuf>,
    env: Option<Vec<(String, String)>>,
}

impl CommandFactory {
    /// A factory logging into `log_dir` with a fresh invocation sequence.
    ///
    /// Commands run in the current directory with the inherited
    /// environment until derived otherwise.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs: LogLayout::new(log_dir.into()),
            counter: InvocationCounter::new(),
            span: Span::current(),
            dir: None,
            env: None,
        }
    }

    /// Derive a factory logging into `dir`. The invocation sequence continues.
    #[must_use]
    pub fn log_into(&self, dir: impl Into<PathBuf>) -> Self {
        Self {
            logs: LogLayout {
                dir: dir.into(),
                ..self.logs.clone()
            },
            ..self.clone()
        }
    }

    /// Derive a factory padding invocation indices in log file names to
    /// `width` digits (three by default).
    #[must_use]
    pub fn with_index_width(&self, width: usize) -> Self {
        Self {
            logs: LogLayout {
                index_width: width,
                ..self.logs.clone()
            },
            ..self.clone()
        }
    }

    /// Derive a factory whose command lines are logged inside `span`.
    #[must_use]
    pub fn in_span(&self, span: Span) -> Self {
        Self {
            span,
            ..self.clone()
        }
    }

    /// Derive a factory whose commands run in `dir` by default.
    #[must_use]
    pub fn in_dir(&self, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..self.clone()
        }
    }

    /// Derive a factory with an explicit environment: this factory's
    /// explicit variables (none if inherited) followed by `vars`.
    #[must_use]
    pub fn with_env<I, K, V>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = self.env.clone().unwrap_or_default();
        env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            env: Some(env),
            ..self.clone()
        }
    }

    /// Value of `key` in the bound environment, if explicitly set.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .as_deref()?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    fn log_dir(&self) -> &std::path::Path {
        &self.logs.dir
    }

    #[cfg(test)]
    fn dir(&self) -> Option<&std::path::Path> {
        self.dir.as_deref()
    }

    /// A command for `program` carrying this factory's context.
    pub fn command<I, S>(&self, program: &str, args: I) -> LoggedCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LoggedCommand::new(
            program.to_string(),
            args.into_iter().map(Into::into).collect(),
            self.dir.clone(),
            self.env.clone(),
            self.logs.clone(),
            self.counter.clone(),
            self.span.clone(),
        )
    }
}
