//! Rolling event log: every log record is also appended to a file, rotated
//! once it passes 1,000,000 bytes (design §6/§7).
//!
//! Wraps an inner logger and duplicates every record to a second
//! destination: the active log file, rotated on the write path instead of
//! evicting old entries.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{Log, Metadata, Record};

const ROTATE_AT_BYTES: u64 = 1_000_000;

struct RotatingFile {
    active_path: PathBuf,
    backup_path: PathBuf,
    file: File,
    size: u64,
}

impl RotatingFile {
    fn open(active_path: PathBuf, backup_path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&active_path)?;
        let size = file.metadata()?.len();
        Ok(RotatingFile { active_path, backup_path, file, size })
    }

    fn write_line(&mut self, line: &str) {
        if self.size >= ROTATE_AT_BYTES {
            self.rotate();
        }
        if let Ok(n) = writeln!(self.file, "{line}").map(|_| line.len() + 1) {
            self.size += n as u64;
        }
    }

    fn rotate(&mut self) {
        let _ = self.file.flush();
        if std::fs::rename(&self.active_path, &self.backup_path).is_ok() {
            if let Ok(fresh) = OpenOptions::new().create(true).write(true).truncate(true).open(&self.active_path) {
                self.file = fresh;
                self.size = 0;
                return;
            }
        }
        // Rotation failed (e.g. no write permission on the directory):
        // keep appending to the same file rather than losing log output.
        let _ = self.file.seek(SeekFrom::End(0));
    }
}

/// Forwards every record to an inner logger (typically `env_logger`) and
/// also appends it to the rotating file.
pub struct TeeLogger {
    inner: env_logger::Logger,
    file: Mutex<RotatingFile>,
}

impl TeeLogger {
    pub fn new(inner: env_logger::Logger, active_path: &Path, backup_path: &Path) -> std::io::Result<Self> {
        let file = RotatingFile::open(active_path.to_path_buf(), backup_path.to_path_buf())?;
        Ok(TeeLogger { inner, file: Mutex::new(file) })
    }

    pub fn filter(&self) -> log::LevelFilter {
        self.inner.filter()
    }
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.inner.log(record);
        if self.enabled(record.metadata()) {
            let line = format!("{} {} {}", record.level(), record.target(), record.args());
            self.file.lock().expect("log file mutex poisoned").write_line(&line);
        }
    }

    fn flush(&self) {
        self.inner.flush();
        let _ = self.file.lock().expect("log file mutex poisoned").file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_renames_active_and_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("log.txt");
        let backup = dir.path().join("log.bak");
        let mut file = RotatingFile::open(active.clone(), backup.clone()).unwrap();

        // Push past the rotation threshold.
        let line = "x".repeat(1000);
        for _ in 0..(ROTATE_AT_BYTES / 1000 + 2) {
            file.write_line(&line);
        }
        assert!(backup.exists());
        assert!(file.size < ROTATE_AT_BYTES);
    }

    #[test]
    fn second_rotation_overwrites_backup_not_appends() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("log.txt");
        let backup = dir.path().join("log.bak");
        let mut file = RotatingFile::open(active.clone(), backup.clone()).unwrap();

        let line = "x".repeat(1000);
        for _ in 0..(ROTATE_AT_BYTES / 1000 + 2) {
            file.write_line(&line);
        }
        let first_backup_len = std::fs::metadata(&backup).unwrap().len();
        for _ in 0..(ROTATE_AT_BYTES / 1000 + 2) {
            file.write_line(&line);
        }
        let second_backup_len = std::fs::metadata(&backup).unwrap().len();
        assert_eq!(first_backup_len, second_backup_len);
    }
}
