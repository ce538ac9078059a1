//! Append-only JSONL log file.

use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to a log file opened in append mode.
///
/// Each writer handed out holds the lock until dropped, so one event is
/// one uninterrupted line even when several threads log at once.
#[derive(Clone)]
pub struct LogFile {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogFile {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

/// Locked writer for a single event. Flushes on drop.
pub struct LogLine<'a> {
    guard: MutexGuard<'a, BufWriter<File>>,
}

impl Write for LogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

impl Drop for LogLine<'_> {
    fn drop(&mut self) {
        let _ = self.guard.flush();
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine {
            guard: self.inner.lock(),
        }
    }
}
