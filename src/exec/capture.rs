//! Output plumbing: the merged output log, first-line capture, and tee sinks.

use std::{
    fs::File,
    io::{self, Read, Write},
    sync::{Arc, Mutex, PoisonError},
};

/// Keeps bytes until the first newline has been seen.
#[derive(Debug, Default)]
pub(super) struct FirstLine {
    data: Vec<u8>,
    complete: bool,
}

impl FirstLine {
    pub(super) fn record(&mut self, chunk: &[u8]) {
        if self.complete {
            return;
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                self.data.extend_from_slice(&chunk[..=newline]);
                self.complete = true;
            }
            None => self.data.extend_from_slice(chunk),
        }
    }

    /// The captured text up to (not including) the first newline.
    pub(super) fn line(&self) -> String {
        let end = self
            .data
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }
}

/// The merged stdout/stderr log of one invocation.
pub(super) struct OutputLog {
    file: File,
    first_line: FirstLine,
}

impl OutputLog {
    pub(super) fn new(file: File) -> Self {
        Self {
            file,
            first_line: FirstLine::default(),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.first_line.record(chunk);
        self.file.write_all(chunk)
    }

    pub(super) fn first_line(&self) -> String {
        self.first_line.line()
    }
}

/// Where copying a child pipe went wrong.
#[derive(Debug)]
pub(super) enum CopyError {
    /// Reading the pipe or writing the output log.
    Log(io::Error),

    /// Writing a caller sink.
    Sink(io::Error),
}

/// Copy one child pipe into the shared output log and, if given, a caller sink.
///
/// A failing sink is dropped and the pipe is still drained into the log,
/// so the log stays complete and the child never blocks on a full pipe.
pub(super) fn drain(
    mut pipe: impl Read,
    log: &Mutex<OutputLog>,
    mut sink: Option<Box<dyn Write + Send>>,
) -> Result<(), CopyError> {
    let mut sink_error = None;
    let mut buf = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Log(e)),
        };
        let chunk = &buf[..n];
        if let Some(mut target) = sink.take() {
            match target.write_all(chunk) {
                Ok(()) => sink = Some(target),
                Err(e) => sink_error = Some(e),
            }
        }
        log.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(chunk)
            .map_err(CopyError::Log)?;
    }
    if let Some(mut target) = sink
        && let Err(e) = target.flush()
    {
        sink_error = Some(e);
    }
    sink_error.map_or(Ok(()), |e| Err(CopyError::Sink(e)))
}

/// An in-memory sink that stays readable after being handed to a command.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Takes everything written so far.
    pub(crate) fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    #[test]
    fn first_line_stops_at_newline() {
        let mut first = FirstLine::default();
        first.record(b"ls: cannot ");
        first.record(b"access\nsecond line\n");
        first.record(b"third line\n");

        assert_eq!(first.line(), "ls: cannot access");
    }

    #[test]
    fn first_line_without_newline_keeps_everything() {
        let mut first = FirstLine::default();
        first.record(b"no newline");
        first.record(b" yet");

        assert_eq!(first.line(), "no newline yet");
    }

    #[test]
    fn first_line_empty_when_nothing_written() {
        assert_eq!(FirstLine::default().line(), "");
    }

    #[test]
    fn drain_tees_into_log_and_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        let log = Mutex::new(OutputLog::new(File::create(&path).unwrap()));
        let sink = SharedBuffer::default();

        drain(
            &b"first\nsecond\n"[..],
            &log,
            Some(Box::new(sink.clone())),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        assert_eq!(sink.take(), b"first\nsecond\n");
        assert_eq!(log.into_inner().unwrap().first_line(), "first");
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sink_still_fills_the_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        let log = Mutex::new(OutputLog::new(File::create(&path).unwrap()));

        let err = drain(&b"first\nsecond\n"[..], &log, Some(Box::new(BrokenSink))).unwrap_err();

        assert!(matches!(err, CopyError::Sink(e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
