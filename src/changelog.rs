//! Post-processing for changelogs released by `gbp dch`.
//!
//! `gbp dch` leaves a `[ name ]` section header for every committer, even
//! those without entries, and runs of empty lines between sections. The
//! filter runs as the editor (`VISUAL`) so the tidied file is what gets
//! committed. Only the newest entry is touched: everything from its
//! ` -- ` trailer line onwards is copied verbatim.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Filter changelog text. Every output line ends with a newline.
pub fn filter(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut lines = input.lines();
    let mut section: Option<&str> = None;
    let mut last_empty = false;

    for line in lines.by_ref() {
        if line.starts_with("  [ ") {
            section = Some(line);
            continue;
        }
        if line.starts_with("  * ")
            && let Some(header) = section.take()
        {
            push_line(&mut output, header);
        }

        let empty = line.is_empty();
        if !(empty && last_empty) {
            push_line(&mut output, line);
        }
        last_empty = empty;

        if line.starts_with(" -- ") {
            break;
        }
    }

    for line in lines {
        push_line(&mut output, line);
    }
    output
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

/// Filter the changelog at `path` in place.
///
/// The result is written to a temporary file next to `path` and renamed
/// over it, so an interrupted run leaves the original untouched.
pub fn filter_file(path: &Path) -> io::Result<()> {
    let input = fs::read_to_string(path)?;
    let permissions = fs::metadata(path)?.permissions();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut output = tempfile::Builder::new()
        .prefix(".mergebot-")
        .tempfile_in(dir)?;
    output.write_all(filter(&input).as_bytes())?;
    output.as_file().sync_all()?;
    fs::set_permissions(output.path(), permissions)?;
    output.persist(path).map_err(|e| e.error)?;
    Ok(())
}
