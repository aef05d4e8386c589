//! Output file naming for leaf actions.
//!
//! Every run has a *filebase*: the sequence file's stem (`scan_xy.con` → `scan_xy`).
//! Leaf actions name their files `<filebase>_<action>.csv`, or
//! `<filebase>_<action>_<n>.csv` when they write one file per run.
//!
//! Two actions never share an output stem: each claims one at setup through
//! [`OutputTarget::claim`], and a second action of the same type gets a numbered
//! default (`<filebase>_a2d2`).

use crate::error::ActionError;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Destination directory and file prefix for action output.
#[derive(Clone, Debug)]
pub struct OutputTarget {
    dir: PathBuf,
    filebase: String,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl OutputTarget {
    pub fn new(dir: impl Into<PathBuf>, filebase: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filebase: filebase.into(),
            claimed: Arc::default(),
        }
    }

    /// Target whose filebase is the stem of the sequence file at `confile`.
    pub fn for_confile(dir: impl Into<PathBuf>, confile: &Path) -> Self {
        let filebase = confile
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string());
        Self::new(dir, filebase)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filebase(&self) -> &str {
        &self.filebase
    }

    /// `<dir>/<filebase>_<name>.csv`
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", self.filebase, name))
    }

    /// `<dir>/<filebase>_<name>_<index>.csv`
    pub fn numbered(&self, name: &str, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.csv", self.filebase, name, index))
    }

    /// `<dir>/<stem>.csv`
    pub fn stem_file(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.csv"))
    }

    /// Reserve an output stem for one action and return it.
    ///
    /// An explicit stem (the action's `file` parameter) must not be held by another
    /// action. Without one the stem is `<filebase>_<name>`, then `<filebase>_<name>2`,
    /// `<filebase>_<name>3` and so on for later claimants.
    pub async fn claim(&self, explicit: Option<&str>, name: &str) -> Result<String, ActionError> {
        let mut claimed = self.claimed.lock().await;
        if let Some(stem) = explicit {
            if !claimed.insert(stem.to_string()) {
                return Err(ActionError::Parameter(format!(
                    "output '{stem}' is already written by another action"
                )));
            }
            return Ok(stem.to_string());
        }

        let mut ordinal = 1usize;
        loop {
            let stem = match ordinal {
                1 => format!("{}_{}", self.filebase, name),
                n => format!("{}_{}{}", self.filebase, name, n),
            };
            if claimed.insert(stem.clone()) {
                debug!(%stem, "Claimed output stem");
                return Ok(stem);
            }
            ordinal += 1;
        }
    }
}

/// Open a CSV writer at `path`, creating parent directories. Existing files are
/// truncated.
pub fn csv_writer(path: &Path) -> Result<csv::Writer<File>, ActionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(csv::Writer::from_path(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filebase_from_confile() {
        let target = OutputTarget::for_confile("/data", Path::new("runs/trapped_bead_2.con"));
        assert_eq!(target.filebase(), "trapped_bead_2");
        assert_eq!(
            target.file("a2d"),
            PathBuf::from("/data/trapped_bead_2_a2d.csv")
        );
        assert_eq!(
            target.numbered("camera", 3),
            PathBuf::from("/data/trapped_bead_2_camera_3.csv")
        );
    }

    #[test]
    fn test_csv_writer_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let mut writer = csv_writer(&path).unwrap();
        writer.write_record(["a", "b"]).unwrap();
        writer.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
    }

    #[tokio::test]
    async fn test_default_stems_are_numbered_per_claimant() {
        let target = OutputTarget::new("/data", "bead");
        let shared = target.clone();
        assert_eq!(target.claim(None, "a2d").await.unwrap(), "bead_a2d");
        assert_eq!(shared.claim(None, "a2d").await.unwrap(), "bead_a2d2");
        assert_eq!(target.claim(None, "camera").await.unwrap(), "bead_camera");
        assert_eq!(target.claim(None, "a2d").await.unwrap(), "bead_a2d3");
        assert_eq!(
            target.stem_file("bead_a2d2"),
            PathBuf::from("/data/bead_a2d2.csv")
        );
    }

    #[tokio::test]
    async fn test_explicit_stem_claimed_once() {
        let target = OutputTarget::new("/data", "bead");
        assert_eq!(target.claim(Some("focus"), "camera").await.unwrap(), "focus");
        assert!(matches!(
            target.claim(Some("focus"), "a2d").await,
            Err(ActionError::Parameter(_))
        ));
        // An explicit stem equal to a default one takes it over.
        target.claim(Some("bead_a2d"), "a2d").await.unwrap();
        assert_eq!(target.claim(None, "a2d").await.unwrap(), "bead_a2d2");
    }
}
