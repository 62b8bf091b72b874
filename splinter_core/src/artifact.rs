use crate::oracle::FailureKind;
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes offending candidates to `<dir>/<stem>_<kind>.txt`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

/// File name of `binary` up to its first `.`.
fn binary_stem(binary: &Path) -> String {
    let name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => "target".to_string(),
    }
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, binary: &Path, kind: FailureKind) -> PathBuf {
        let name = format!("{}_{}.txt", binary_stem(binary), kind.artifact_suffix());
        self.dir.join(name)
    }

    /// Atomically writes `bytes` as the artifact for `binary` and returns the
    /// final path. The directory is created when missing.
    pub fn persist(&self, binary: &Path, kind: FailureKind, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(binary, kind);
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged.persist(&path).map_err(|e| e.error)?;
        debug!("Wrote {} byte artifact to {}", bytes.len(), path.display());
        Ok(path)
    }
}
