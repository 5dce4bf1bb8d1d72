//! Logger collaborator: timestamped run lines.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

/// Appends timestamped lines to a log file, or forwards them to the `log`
/// facade when no usable file is configured.
#[derive(Debug, Default)]
pub struct RunLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn file_sink(&self) -> Option<&PathBuf> {
        self.path.as_ref().filter(|p| match p.parent() {
            Some(parent) => parent.as_os_str().is_empty() || parent.is_dir(),
            None => false,
        })
    }

    pub fn line(&self, message: &str) {
        let stamped = format!("{} {}", Local::now().format("%a %b %e %H:%M:%S %Y"), message);
        let Some(path) = self.file_sink() else {
            log::info!("{}", stamped);
            return;
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", stamped));
        if let Err(e) = written {
            log::warn!("Could not write to {}: {}", path.display(), e);
            log::info!("{}", stamped);
        }
    }
}
