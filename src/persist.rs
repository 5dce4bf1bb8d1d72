//! Result Persister collaborator: snapshots of the multi-learner result map.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::error::Result;
use crate::stats::StatReport;

pub trait ResultPersister: Send + Sync {
    /// Store the current result map, replacing any earlier snapshot.
    fn save(&self, results: &BTreeMap<String, StatReport>) -> Result<()>;
}

/// Writes the result map as pretty JSON.
///
/// Without a path, or when the parent directory of the path does not exist,
/// saving does nothing.
#[derive(Debug, Clone, Default)]
pub struct JsonResultPersister {
    path: Option<PathBuf>,
}

impl JsonResultPersister {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ResultPersister for JsonResultPersister {
    fn save(&self, results: &BTreeMap<String, StatReport>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                log::debug!(
                    "Not saving results: directory {} does not exist",
                    parent.display()
                );
                return Ok(());
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, results)?;
        log::trace!("Saved {} results to {}", results.len(), path.display());
        Ok(())
    }
}

/// Read back a snapshot written by [`JsonResultPersister`].
pub fn load_results(path: &std::path::Path) -> Result<BTreeMap<String, StatReport>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
