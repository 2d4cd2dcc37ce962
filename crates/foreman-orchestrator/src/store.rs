//! On-disk archive store.
//!
//! Every archive is written under two names: one keyed by project name for
//! people browsing the output directory, and `<run-id>_final.zip` for lookup
//! by run id. Writes go through a temporary file in the same directory and are
//! renamed into place, so a reader never sees a half-written checkpoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

/// Paths written for a final deliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    /// `<project>_<run-id>.zip`
    pub project_archive: PathBuf,
    /// `<run-id>_final.zip`
    pub run_archive: PathBuf,
    /// `final_output_<project>_<run-id>.md`
    pub markdown: PathBuf,
}

/// Archive files under one output directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    /// Stores under `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the run-keyed archive.
    pub fn run_archive_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}_final.zip"))
    }

    /// Reads the latest archive written for `run_id`.
    pub fn load(&self, run_id: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.run_archive_path(run_id))?)
    }

    /// Writes the final archive and the Markdown copy of the deliverable.
    pub fn store_final(
        &self,
        project_name: &str,
        run_id: &str,
        archive: &[u8],
        deliverable: &str,
    ) -> Result<StoredArchive> {
        let project = sanitize_name(project_name);
        let project_archive = self.write_atomic(&format!("{project}_{run_id}.zip"), archive)?;
        let run_archive = self.write_atomic(&format!("{run_id}_final.zip"), archive)?;
        let markdown = self.write_atomic(
            &format!("final_output_{project}_{run_id}.md"),
            deliverable.as_bytes(),
        )?;
        Ok(StoredArchive { project_archive, run_archive, markdown })
    }

    /// Writes a continuation checkpoint and refreshes the run-keyed archive.
    pub fn store_checkpoint(
        &self,
        project_name: &str,
        run_id: &str,
        round: usize,
        archive: &[u8],
    ) -> Result<PathBuf> {
        let project = sanitize_name(project_name);
        let path = self.write_atomic(&format!("{project}_{run_id}_{round}.zip"), archive)?;
        self.write_atomic(&format!("{run_id}_final.zip"), archive)?;
        Ok(path)
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(name);

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target)?;

        debug!(path = %target.display(), bytes = bytes.len(), "Wrote archive file");
        Ok(target)
    }
}

/// Replaces characters that are unsafe in file names.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() { "project".to_string() } else { cleaned.to_string() }
}
