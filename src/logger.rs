use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use parking_lot::Mutex;

use crate::Result;

const TIMESTAMP_FORMAT: &str = "[%Y/%m/%d_%H:%M:%S%.3f] ";
const SEPARATOR_WIDTH: usize = 100;

/// Returns the current timestamp prefix used for every event-log line
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The two append-only event-log streams of a run.
///
/// Worker events (connections, disconnections, protocol errors, buffer
/// progress) go to `Worker.log`; training events (iteration banners, phase
/// progress) go to `Training.log`. Every line is prefixed with a timestamp
/// and mirrored to stderr. Each run opens with a separator line.
pub struct EventLog {
    worker: Mutex<File>,
    training: Mutex<File>,
}

impl EventLog {
    /// Opens both streams in append mode under the given directory
    pub fn create(dir: &Path) -> Result<Self> {
        Ok(Self {
            worker: Mutex::new(open_stream(&dir.join("Worker.log"))?),
            training: Mutex::new(open_stream(&dir.join("Training.log"))?),
        })
    }
    /// Appends one line to the worker event stream
    pub fn worker(&self, line: &str) -> Result<()> {
        append(&mut self.worker.lock(), line)
    }
    /// Appends one line to the training event stream
    pub fn training(&self, line: &str) -> Result<()> {
        append(&mut self.training.lock(), line)
    }
}

fn open_stream(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", "=".repeat(SEPARATOR_WIDTH))?;
    file.flush()?;
    Ok(file)
}

fn append(file: &mut File, line: &str) -> Result<()> {
    let stamp = timestamp();
    writeln!(file, "{}{}", stamp, line)?;
    file.flush()?;
    eprintln!("{}{}", stamp, line);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        // [YYYY/MM/DD_HH:MM:SS.fff] with a trailing space
        let stamp = timestamp();
        assert_eq!(stamp.len(), 27);
        assert!(stamp.starts_with('['));
        assert!(stamp.ends_with("] "));
        assert_eq!(&stamp[5..6], "/");
        assert_eq!(&stamp[11..12], "_");
        assert_eq!(&stamp[20..21], ".");
    }

    #[test]
    fn test_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::create(dir.path()).unwrap();
        log.worker("[Worker Connection] A sp").unwrap();
        log.training("[Iteration] =====1=====").unwrap();
        drop(log);

        let worker = std::fs::read_to_string(dir.path().join("Worker.log")).unwrap();
        let mut lines = worker.lines();
        assert_eq!(lines.next().unwrap(), "=".repeat(100));
        assert!(lines.next().unwrap().ends_with("[Worker Connection] A sp"));

        let training = std::fs::read_to_string(dir.path().join("Training.log")).unwrap();
        assert!(training.ends_with("[Iteration] =====1=====\n"));

        // a second run appends after a fresh separator
        let log = EventLog::create(dir.path()).unwrap();
        log.worker("[Worker Connection] B op").unwrap();
        drop(log);
        let worker = std::fs::read_to_string(dir.path().join("Worker.log")).unwrap();
        assert_eq!(worker.lines().count(), 4);
    }
}
