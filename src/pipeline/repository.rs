//! Where a source package's packaging lives.

use crate::exec::CommandFactory;

use super::PipelineError;

/// A packaging repository as reported by `debcheckout --print`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Version control system, e.g. `git`.
    pub scm: String,

    /// Clone URL, rewritten to be pushable where known.
    pub url: String,
}

/// Ask `debcheckout` where `source_package` is maintained.
pub(super) fn resolve(
    commands: &CommandFactory,
    source_package: &str,
) -> Result<Repository, PipelineError> {
    let command = commands.command("debcheckout", ["--print", source_package]);
    let command_line = command.command_line();
    let output = command.output()?;
    parse(&command_line, &String::from_utf8_lossy(&output))
}

fn parse(command_line: &str, output: &str) -> Result<Repository, PipelineError> {
    let fields: Vec<&str> = output.trim().split('\t').collect();
    let [scm, url] = fields[..] else {
        return Err(PipelineError::UnexpectedOutput {
            command: command_line.to_string(),
            output: output.to_string(),
        });
    };
    Ok(Repository {
        scm: scm.to_string(),
        url: rewrite_push_url(url),
    })
}

/// Turn an anonymous read-only Alioth URL into its push URL.
///
/// `git://anonscm.debian.org/pkg.git` becomes
/// `git+ssh://git.debian.org/git/pkg.git`. Other URLs are returned as is.
pub fn rewrite_push_url(url: &str) -> String {
    if !url.contains("anonscm.debian.org") {
        return url.to_string();
    }
    url.replacen("git", "git+ssh", 1)
        .replacen("anonscm.debian.org", "git.debian.org", 1)
        .replacen("debian.org", "debian.org/git", 1)
}
