//! The individual steps of a run.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::exec::{CommandError, CommandFactory};

use super::{PATCH_FILE_NAME, PipelineError};

/// Create the run's temporary directory under `$TMPDIR`. It is never removed.
pub(super) fn create_work_dir() -> Result<PathBuf, PipelineError> {
    let dir = tempfile::Builder::new()
        .prefix("mergebot-")
        .tempdir()
        .map_err(PipelineError::io("creating temporary directory"))?;
    Ok(dir.keep())
}

/// Store the fetched patch as `latest.patch`, readable only by us.
pub(super) fn write_patch(work_dir: &Path, data: &[u8]) -> Result<(), PipelineError> {
    let path = work_dir.join(PATCH_FILE_NAME);
    let context = format!("writing {}", path.display());
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)
        .map_err(PipelineError::io(context.clone()))?;
    file.write_all(data).map_err(PipelineError::io(context))
}

/// Clone `url` into `checkout_dir` and set it up for pushing.
///
/// Returns a factory whose commands run in the checkout.
pub(super) fn checkout(
    commands: &CommandFactory,
    work_dir: &Path,
    checkout_dir: &Path,
    url: &str,
) -> Result<CommandFactory, PipelineError> {
    let destination = checkout_dir.to_string_lossy();
    commands
        .command(
            "gbp",
            ["clone", "--pristine-tar", url, destination.as_ref()],
        )
        .current_dir(work_dir)
        .run()?;

    let commands = commands.in_dir(checkout_dir);

    let mut settings: Vec<Vec<&str>> = vec![
        // Push all matching branches at once.
        vec!["push.default", "matching"],
        // Push tags along with heads.
        vec!["--add", "remote.origin.push", "+refs/heads/*:refs/heads/*"],
        vec!["--add", "remote.origin.push", "+refs/tags/*:refs/tags/*"],
    ];
    if let Some(name) = commands.env_var("DEBFULLNAME").filter(|v| !v.is_empty()) {
        settings.push(vec!["user.name", name]);
    }
    if let Some(email) = commands.env_var("DEBEMAIL").filter(|v| !v.is_empty()) {
        settings.push(vec!["user.email", email]);
    }

    for args in settings {
        commands
            .command("git", std::iter::once("config").chain(args))
            .run()?;
    }

    Ok(commands)
}

/// Short content hash used to notice whether a file changed.
///
/// The first 16 bytes of the SHA-256 digest, hex-encoded.
pub(super) fn fingerprint(path: &Path) -> Result<String, PipelineError> {
    let context = || format!("fingerprinting {}", path.display());
    let mut file = File::open(path).map_err(PipelineError::io(context()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(PipelineError::io(context()))?;
    let digest = hasher.finalize();
    let fingerprint = hex::encode(&digest[..16]);
    debug!(path = %path.display(), %fingerprint);
    Ok(fingerprint)
}

/// `patch -p1` the fetched patch onto the checkout.
pub(super) fn apply_patch(commands: &CommandFactory) -> Result<(), PipelineError> {
    let patch_file = Path::new("..").join(PATCH_FILE_NAME);
    commands
        .command("patch", ["-p1", "-i", patch_file.to_string_lossy().as_ref()])
        .run()
        .map_err(patch_failure)
}

/// A patch that did not apply is reported as such; logging trouble is not.
fn patch_failure(error: CommandError) -> PipelineError {
    match error {
        e @ CommandError::Execution { .. } => PipelineError::PatchApplication(e),
        e @ (CommandError::Logging { .. } | CommandError::Sink { .. }) => {
            PipelineError::Command(e)
        }
    }
}

/// Commit everything in the checkout on behalf of `author`.
pub(super) fn commit(
    commands: &CommandFactory,
    author: &str,
    message: &str,
) -> Result<(), PipelineError> {
    commands.command("git", ["add", "."]).run()?;
    commands
        .command(
            "git",
            ["commit", "-a", "--author", author, "--message", message],
        )
        .run()?;
    Ok(())
}

/// Finalize the changelog entry and commit it.
///
/// `gbp dch` has no flag to pick the editor and would leave empty committer
/// sections behind, so `VISUAL` points at the changelog filter.
pub(super) fn release_changelog(
    commands: &CommandFactory,
    filter_command: &str,
) -> Result<(), PipelineError> {
    commands
        .command("gbp", ["dch", "--release", "--git-author", "--commit"])
        .env("VISUAL", filter_command)
        .run()?;
    Ok(())
}

/// Build the package, tagging on success. Results go to `../export`
/// so the checkout stays clean.
pub(super) fn build(commands: &CommandFactory, builder: &str) -> Result<(), PipelineError> {
    commands
        .command(
            "gbp",
            [
                "buildpackage".to_string(),
                "--git-tag".to_string(),
                "--git-export-dir=../export".to_string(),
                format!("--git-builder={builder}"),
            ],
        )
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    #[test]
    fn fingerprint_is_truncated_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changelog");
        fs::write(&path, "").unwrap();

        assert_eq!(
            fingerprint(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb924"
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changelog");
        fs::write(&path, "pkg (1.0) unstable; urgency=medium\n").unwrap();
        let before = fingerprint(&path).unwrap();
        fs::write(&path, "pkg (1.1) unstable; urgency=medium\n").unwrap();

        assert_ne!(fingerprint(&path).unwrap(), before);
        assert_eq!(before.len(), 32);
    }

    #[test]
    fn fingerprint_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = fingerprint(&dir.path().join("debian/changelog")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
        assert!(err.to_string().starts_with("fingerprinting "));
    }

    #[test]
    fn patch_is_private() {
        let dir = TempDir::new().unwrap();

        write_patch(dir.path(), b"--- a/README\n").unwrap();

        let path = dir.path().join(PATCH_FILE_NAME);
        assert_eq!(fs::read(&path).unwrap(), b"--- a/README\n");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn work_dir_outlives_creation() {
        let dir = create_work_dir().unwrap();

        assert!(dir.is_dir());
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mergebot-"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failing_patch_is_a_patch_application_error() {
        let dir = TempDir::new().unwrap();
        let commands = CommandFactory::new(dir.path()).in_dir(dir.path());

        // Stand-in for patch(1) so the test only depends on sh.
        let err = commands
            .command("sh", ["-c", "echo 'Hunk #1 FAILED at 1.'; exit 1"])
            .run()
            .map_err(patch_failure)
            .unwrap_err();

        assert!(matches!(err, PipelineError::PatchApplication(_)));
        assert!(err.to_string().starts_with("patch does not apply: Running \"sh -c "));
        assert!(err.to_string().contains("First stdout/stderr line: \"Hunk #1 FAILED at 1.\""));
    }
}
