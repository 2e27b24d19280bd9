//! The merge-and-build run.
//!
//! A run fetches the patch attached to a bug, checks out the source
//! package's packaging repository, applies and commits the patch, releases
//! the changelog and builds the package:
//!
//! ```text
//! <tempdir>/
//!   latest.patch                  # The patch as fetched
//!   repo/                         # Packaging repository checkout
//!   export/                       # Build results
//!   000-debcheckout.invocation.log
//!   000-debcheckout.stdoutstderr.log
//!   ...
//! ```
//!
//! The temporary directory is never removed, whether the run succeeds or
//! not: pushing and uploading are left to a human who inspects it first.

mod repository;
mod stages;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn};

use crate::exec::{CommandError, CommandFactory};
use crate::patch::{PatchSource, ProtocolError};

/// Name of the fetched patch inside the temporary directory.
pub const PATCH_FILE_NAME: &str = "latest.patch";

/// Checkout directory name inside the temporary directory.
pub const CHECKOUT_DIR_NAME: &str = "repo";

/// `gbp buildpackage --git-builder` used unless configured otherwise.
pub const DEFAULT_BUILDER: &str = "sbuild -v -As --dist=unstable";

/// The steps of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    FetchPatch,
    ResolveRepository,
    Checkout,
    FingerprintBefore,
    ApplyPatch,
    Commit,
    FingerprintAfter,
    ReleaseChangelog,
    Build,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "creating temporary directory",
            Self::FetchPatch => "fetching patch",
            Self::ResolveRepository => "resolving repository",
            Self::Checkout => "checking out repository",
            Self::FingerprintBefore => "fingerprinting changelog",
            Self::ApplyPatch => "applying patch",
            Self::Commit => "committing patch",
            Self::FingerprintAfter => "fingerprinting patched changelog",
            Self::ReleaseChangelog => "releasing changelog",
            Self::Build => "building package",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("mergebot only supports git currently, but {url:?} is using the SCM {scm:?}")]
    UnsupportedScm { url: String, scm: String },

    #[error("unexpected command output: {command:?} returned {output:?}, expected 2 tab-separated fields")]
    UnexpectedOutput { command: String, output: String },

    #[error("patch does not apply: {0}")]
    PatchApplication(#[source] CommandError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// A run that stopped early.
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {error}")]
pub struct Failure {
    pub stage: Stage,

    /// The temporary directory, unless creating it is what failed.
    pub work_dir: Option<PathBuf>,

    #[source]
    pub error: PipelineError,
}

/// What to merge, and how to build it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Debian source package the bug was filed against.
    pub source_package: String,

    /// Bug number, without a leading `#`.
    pub bug: String,

    /// Environment forwarded to every command of the run.
    pub passthrough: Vec<(String, String)>,

    /// `VISUAL` for `gbp dch`: this program in changelog filter mode.
    pub filter_command: String,

    /// `gbp buildpackage --git-builder`.
    pub builder: String,
}

/// Merge the patch from `settings.bug` into `settings.source_package` and
/// build the result.
///
/// Returns the temporary directory holding the checkout, build results and
/// command logs. Commands are created from `commands`, rebound to log into
/// the temporary directory.
pub fn run(
    commands: &CommandFactory,
    settings: &Settings,
    patches: &dyn PatchSource,
) -> Result<PathBuf, Failure> {
    let span = info_span!("run", package = %settings.source_package, bug = %settings.bug);
    let _entered = span.enter();

    info!(stage = %Stage::Init, "starting");
    let work_dir = stages::create_work_dir().map_err(|error| Failure {
        stage: Stage::Init,
        work_dir: None,
        error,
    })?;
    info!(work_dir = %work_dir.display(), "created temporary directory");

    let commands = commands
        .log_into(&work_dir)
        .in_span(span.clone())
        .with_env(settings.passthrough.iter().cloned());

    let mut stage = Stage::Init;
    match merge_and_build(&commands, settings, patches, &work_dir, &mut stage) {
        Ok(()) => Ok(work_dir),
        Err(error) => Err(Failure {
            stage,
            work_dir: Some(work_dir),
            error,
        }),
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    *stage = next;
    info!(stage = %next, "starting");
}

fn merge_and_build(
    commands: &CommandFactory,
    settings: &Settings,
    patches: &dyn PatchSource,
    work_dir: &Path,
    stage: &mut Stage,
) -> Result<(), PipelineError> {
    enter(stage, Stage::FetchPatch);
    let patch = patches.fetch(&settings.bug)?;
    stages::write_patch(work_dir, &patch.data)?;
    info!(author = %patch.author, subject = %patch.subject, "fetched patch");

    enter(stage, Stage::ResolveRepository);
    let repository = repository::resolve(commands, &settings.source_package)?;
    if repository.scm != "git" {
        return Err(PipelineError::UnsupportedScm {
            url: repository.url,
            scm: repository.scm,
        });
    }

    enter(stage, Stage::Checkout);
    let checkout_dir = work_dir.join(CHECKOUT_DIR_NAME);
    let commands = stages::checkout(commands, work_dir, &checkout_dir, &repository.url)?;

    enter(stage, Stage::FingerprintBefore);
    let changelog = checkout_dir.join("debian").join("changelog");
    let before = stages::fingerprint(&changelog)?;

    enter(stage, Stage::ApplyPatch);
    stages::apply_patch(&commands)?;

    enter(stage, Stage::Commit);
    stages::commit(&commands, &patch.author, &commit_message(&patch.subject, &settings.bug))?;

    enter(stage, Stage::FingerprintAfter);
    let after = stages::fingerprint(&changelog)?;
    if after != before {
        warn!(path = %changelog.display(), %before, %after, "patch changed the changelog");
    }

    enter(stage, Stage::ReleaseChangelog);
    stages::release_changelog(&commands, &settings.filter_command)?;

    enter(stage, Stage::Build);
    stages::build(&commands, &settings.builder)?;

    Ok(())
}

/// Commit message for the patch from `bug`.
pub fn commit_message(subject: &str, bug: &str) -> String {
    format!("Fix for \"{subject}\" (Closes: #{bug})")
}
