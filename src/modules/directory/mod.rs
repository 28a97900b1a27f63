//! Destination directory policy and on-disk layout.
//!
//! [`DirectoryGuard`] is the only code that creates or deletes a book's target
//! directory. The layout is `<output_root>/uploads/<title>_<id>/<title>.pdf`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;

const MAX_COMPONENT_CHARS: usize = 80;
const UPLOADS_DIR: &str = "uploads";

/// What to do when the target directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    Overwrite,
    Skip,
    #[default]
    Ask,
}

/// Answer returned by the interactive conflict callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskAnswer {
    Overwrite,
    Skip,
    Cancel,
}

/// Conflict callback consulted under [`OverwritePolicy::Ask`].
pub type AskFn = dyn Fn(&Path) -> AskAnswer + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryDecision {
    Created,
    Overwritten,
    Skipped,
    Cancelled,
}

impl DirectoryDecision {
    /// `true` when the acquisition may write into the directory.
    pub fn proceeds(&self) -> bool {
        matches!(self, DirectoryDecision::Created | DirectoryDecision::Overwritten)
    }
}

impl fmt::Display for DirectoryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectoryDecision::Created => "created",
            DirectoryDecision::Overwritten => "overwritten",
            DirectoryDecision::Skipped => "skipped",
            DirectoryDecision::Cancelled => "cancelled",
        })
    }
}

pub struct DirectoryGuard;

impl DirectoryGuard {
    /// Prepare `path` according to `policy`.
    ///
    /// `Ask` without a callback resolves to `Cancelled`.
    pub async fn reserve(
        path: &Path,
        policy: OverwritePolicy,
        ask: Option<&AskFn>,
    ) -> io::Result<DirectoryDecision> {
        if !fs::try_exists(path).await? {
            fs::create_dir_all(path).await?;
            log::debug!("created target directory {}", path.display());
            return Ok(DirectoryDecision::Created);
        }

        let answer = match policy {
            OverwritePolicy::Overwrite => AskAnswer::Overwrite,
            OverwritePolicy::Skip => AskAnswer::Skip,
            OverwritePolicy::Ask => match ask {
                Some(ask) => ask(path),
                None => {
                    log::warn!(
                        "{} exists and no conflict callback is set; cancelling",
                        path.display()
                    );
                    AskAnswer::Cancel
                }
            },
        };

        match answer {
            AskAnswer::Overwrite => {
                if fs::metadata(path).await?.is_dir() {
                    fs::remove_dir_all(path).await?;
                } else {
                    fs::remove_file(path).await?;
                }
                fs::create_dir_all(path).await?;
                log::info!("overwriting existing directory {}", path.display());
                Ok(DirectoryDecision::Overwritten)
            }
            AskAnswer::Skip => {
                log::info!("skipping existing directory {}", path.display());
                Ok(DirectoryDecision::Skipped)
            }
            AskAnswer::Cancel => Ok(DirectoryDecision::Cancelled),
        }
    }
}

/// Make `raw` safe as a single path component.
///
/// Alphanumerics and `-` survive; every other run of characters collapses to
/// one `_`. The result is trimmed of `_` and capped in length.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_alphanumeric() || ch == '-' {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed: String = out
        .trim_matches('_')
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches('_');

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<root>/uploads/<title>_<identifier>`
pub fn target_dir(output_root: &Path, title: &str, identifier: &str) -> PathBuf {
    output_root.join(UPLOADS_DIR).join(format!(
        "{}_{}",
        sanitize_component(title),
        sanitize_component(identifier)
    ))
}

/// `<dir>/<title>.pdf`
pub fn target_file(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.pdf", sanitize_component(title)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_component("The Pragmatic Programmer"), "The_Pragmatic_Programmer");
        assert_eq!(sanitize_component("  C++: A/B?  "), "C_A_B");
        assert_eq!(sanitize_component("978-0-13-595705-9"), "978-0-13-595705-9");
        assert_eq!(sanitize_component("../.."), "untitled");
        assert_eq!(sanitize_component(&"a".repeat(200)).len(), MAX_COMPONENT_CHARS);
    }

    #[test]
    fn layout_paths() {
        let dir = target_dir(Path::new("/data"), "Rust in Action", "9781617294556");
        assert_eq!(dir, PathBuf::from("/data/uploads/Rust_in_Action_9781617294556"));
        assert_eq!(
            target_file(&dir, "Rust in Action"),
            dir.join("Rust_in_Action.pdf")
        );
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("uploads").join("book");
        let decision = DirectoryGuard::reserve(&path, OverwritePolicy::Skip, None).await.unwrap();
        assert_eq!(decision, DirectoryDecision::Created);
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book");
        std_fs::create_dir_all(&path).unwrap();
        std_fs::write(path.join("old.pdf.part"), b"partial").unwrap();

        let decision = DirectoryGuard::reserve(&path, OverwritePolicy::Overwrite, None).await.unwrap();
        assert_eq!(decision, DirectoryDecision::Overwritten);
        assert!(path.is_dir());
        assert!(!path.join("old.pdf.part").exists());
    }

    #[tokio::test]
    async fn skip_leaves_directory_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book");
        std_fs::create_dir_all(&path).unwrap();
        std_fs::write(path.join("book.pdf"), b"%PDF").unwrap();

        let decision = DirectoryGuard::reserve(&path, OverwritePolicy::Skip, None).await.unwrap();
        assert_eq!(decision, DirectoryDecision::Skipped);
        assert!(!decision.proceeds());
        assert!(path.join("book.pdf").exists());
    }

    #[tokio::test]
    async fn ask_consults_callback() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book");
        std_fs::create_dir_all(&path).unwrap();

        let cancel = |_: &Path| AskAnswer::Cancel;
        let overwrite = |_: &Path| AskAnswer::Overwrite;
        let skip = |_: &Path| AskAnswer::Skip;

        assert_eq!(
            DirectoryGuard::reserve(&path, OverwritePolicy::Ask, Some(&cancel)).await.unwrap(),
            DirectoryDecision::Cancelled
        );
        assert_eq!(
            DirectoryGuard::reserve(&path, OverwritePolicy::Ask, Some(&skip)).await.unwrap(),
            DirectoryDecision::Skipped
        );
        assert_eq!(
            DirectoryGuard::reserve(&path, OverwritePolicy::Ask, Some(&overwrite)).await.unwrap(),
            DirectoryDecision::Overwritten
        );
    }

    #[tokio::test]
    async fn ask_without_callback_cancels() {
        let tmp = tempfile::tempdir().unwrap();
        let decision = DirectoryGuard::reserve(tmp.path(), OverwritePolicy::Ask, None).await.unwrap();
        assert_eq!(decision, DirectoryDecision::Cancelled);
        assert!(tmp.path().exists());
    }
}
