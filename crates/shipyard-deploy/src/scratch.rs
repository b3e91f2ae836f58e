//! Local copy of a downloaded manifest, removed when dropped.

use std::path::{Path, PathBuf};

use shipyard_core::ResourceId;
use tracing::warn;

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Write `contents` to `{work_dir}/{resource_id}_{file_name}`.
    ///
    /// Only the final component of `file_name` is used.
    pub async fn write(
        work_dir: &Path,
        resource_id: ResourceId,
        file_name: &str,
        contents: &[u8],
    ) -> std::io::Result<Self> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("manifest.yaml");
        tokio::fs::create_dir_all(work_dir).await?;
        let path = work_dir.join(format!("{resource_id}_{base}"));
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove scratch manifest");
            }
        }
    }
}
