use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use super::PageContent;

const PREVIEW_CHARS: usize = 2000;

/// Writes the last rendered page to disk for post-mortem inspection.
///
/// Every write is best effort: failures are logged and swallowed so a broken
/// debug directory never aborts an acquisition.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    dir: PathBuf,
}

impl DebugArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(&self, page: &PageContent) {
        if let Err(err) = self.try_write(page).await {
            log::warn!(
                "failed to write debug artifacts to {}: {}",
                self.dir.display(),
                err
            );
        }
    }

    async fn try_write(&self, page: &PageContent) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.dir.join("page.html"), &page.html).await?;
        fs::write(self.dir.join("page.title.txt"), &page.title).await?;
        fs::write(self.dir.join("page.preview.txt"), page.preview(PREVIEW_CHARS)).await?;
        log::debug!("debug artifacts for {} written to {}", page.url, self.dir.display());
        Ok(())
    }
}
