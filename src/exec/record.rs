//! Invocation records: naming, rendering, and durable writes.

use std::{
    fmt::Write as _,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use jiff::Timestamp;

/// Marker ending a provisional record.
pub(super) const STILL_RUNNING: &str = "(Still running…)";

/// Index digits in log file names unless configured otherwise.
pub(super) const DEFAULT_INDEX_WIDTH: usize = 3;

/// A log directory and how invocation indices are rendered in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LogLayout {
    pub dir: PathBuf,

    /// Indices are zero-padded to this many digits. Wider ones are kept whole.
    pub index_width: usize,
}

impl LogLayout {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            index_width: DEFAULT_INDEX_WIDTH,
        }
    }
}

/// The two log files belonging to one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LogPaths {
    pub invocation: PathBuf,
    pub output: PathBuf,
}

impl LogPaths {
    /// `<log_dir>/<index>-<program base name>.{invocation,stdoutstderr}.log`
    ///
    /// Only the program name goes into the file name; arguments may carry
    /// private data and the directory listing is readable by other users.
    pub(super) fn new(log_dir: &Path, index: u64, index_width: usize, program: &str) -> Self {
        let base = Path::new(program)
            .file_name()
            .map_or_else(|| program.into(), |name| name.to_string_lossy());
        let prefix = format!("{index:0index_width$}-{base}");
        Self {
            invocation: log_dir.join(format!("{prefix}.invocation.log")),
            output: log_dir.join(format!("{prefix}.stdoutstderr.log")),
        }
    }
}

/// What is known about an invocation before it runs.
pub(super) struct Invocation<'a> {
    pub argv: &'a [String],
    pub work_dir: &'a Path,
    pub env: Option<&'a [(String, String)]>,
    pub started: Timestamp,
}

impl Invocation<'_> {
    fn header(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "Execution started: {}", self.started);
        let _ = writeln!(out, "Working directory: {:?}", self.work_dir);
        let _ = writeln!(out, "Command ({} elements):", self.argv.len());
        for arg in self.argv {
            let _ = writeln!(out, "\t{arg:?}");
        }
        match self.env {
            Some(env) => {
                let _ = writeln!(out, "Environment ({} elements):", env.len());
                for (key, value) in env {
                    let _ = writeln!(out, "\t{:?}", format!("{key}={value}"));
                }
            }
            None => {
                let _ = writeln!(out, "Environment (inherited)");
            }
        }
        out
    }

    /// The record written before the child starts.
    pub(super) fn provisional(&self) -> String {
        format!("{}{STILL_RUNNING}\n", self.header())
    }

    /// The record that replaces the provisional one once the child is done.
    pub(super) fn finished(&self, finished: Timestamp, duration: Duration) -> String {
        format!(
            "{}Execution finished: {finished} (duration: {duration:?})\n",
            self.header()
        )
    }
}

/// Create (or truncate) a log file readable only by the current user.
pub(super) fn create_log(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

/// Write the provisional record and sync it to disk.
pub(super) fn write_provisional(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = create_log(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// Replace `path` with `contents` via a temp file in the same directory,
/// so readers see either the old record or the new one, never a mix.
pub(super) fn replace_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".invocation-log-")
        .tempfile_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    // The rename itself is only durable once the directory is synced.
    fs::File::open(dir)?.sync_all()
}
