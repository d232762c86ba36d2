use crate::{Error, Result};
use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Process-wide switch for sample persistence.
///
/// Settable at any time by an external collaborator (CLI flag, UI control);
/// the logger reads it immediately before each write.
#[derive(Clone, Debug, Default)]
pub struct LoggingToggle(Arc<AtomicBool>);

impl LoggingToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Appends cell-voltage samples to one CSV file per device.
///
/// Row format: `HH:MM:SS,v1,…,vN` with 3-decimal volts. Failures are
/// surfaced as [`Error::Logging`] and must never propagate into the session's
/// control flow.
#[derive(Clone, Debug)]
pub struct SampleLogger {
    dir: PathBuf,
    toggle: LoggingToggle,
}

impl SampleLogger {
    pub fn new(dir: impl Into<PathBuf>, toggle: LoggingToggle) -> Self {
        Self {
            dir: dir.into(),
            toggle,
        }
    }

    pub fn toggle(&self) -> &LoggingToggle {
        &self.toggle
    }

    /// Append one sample row; a no-op while the toggle is off
    pub fn log(&self, device: &str, timestamp: &str, voltages: &[f32]) -> Result<()> {
        if !self.toggle.is_enabled() {
            return Ok(());
        }
        self.append(device, timestamp, voltages)
            .map_err(Error::Logging)
    }

    fn append(&self, device: &str, timestamp: &str, voltages: &[f32]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{device}.csv"));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut row = String::from(timestamp);
        for volts in voltages {
            row.push_str(&format!(",{volts:.3}"));
        }
        writeln!(file, "{row}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SampleLogger::new(dir.path(), LoggingToggle::new(true));
        logger
            .log("akku-1", "12:00:00", &[3.3, 3.31, 3.295])
            .unwrap();
        logger.log("akku-1", "12:00:05", &[3.3, 3.31, 3.296]).unwrap();

        let rows = std::fs::read_to_string(dir.path().join("akku-1.csv")).unwrap();
        assert_eq!(
            rows,
            "12:00:00,3.300,3.310,3.295\n12:00:05,3.300,3.310,3.296\n"
        );
    }

    #[test]
    fn disabled_toggle_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let toggle = LoggingToggle::new(false);
        let logger = SampleLogger::new(dir.path(), toggle.clone());
        logger.log("akku-1", "12:00:00", &[3.3]).unwrap();
        assert!(!dir.path().join("akku-1.csv").exists());

        toggle.set(true);
        logger.log("akku-1", "12:00:05", &[3.3]).unwrap();
        assert!(dir.path().join("akku-1.csv").exists());
    }

    #[test]
    fn one_file_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SampleLogger::new(dir.path(), LoggingToggle::new(true));
        logger.log("akku-1", "12:00:00", &[3.3]).unwrap();
        logger.log("akku-2", "12:00:00", &[3.2]).unwrap();
        assert!(dir.path().join("akku-1.csv").exists());
        assert!(dir.path().join("akku-2.csv").exists());
    }

    #[test]
    fn io_failure_is_a_logging_error() {
        let dir = tempfile::tempdir().unwrap();
        // a file where the log directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let logger = SampleLogger::new(&blocked, LoggingToggle::new(true));
        let error = logger.log("akku-1", "12:00:00", &[3.3]).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Logging);
    }
}
