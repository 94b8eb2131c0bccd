// Saving rendered replies to disk

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::view::RenderView;

const MAX_SLUG_LEN: usize = 40;
const FALLBACK_SLUG: &str = "lesson";

pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    /// Export into the download directory, or the data directory when the
    /// platform has none.
    pub fn new() -> Result<Self> {
        let dir = match dirs::download_dir() {
            Some(dir) => dir,
            None => dirs::data_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
                .join("lessonstream"),
        };
        Self::with_dir(dir)
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context("Failed to create export directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(title: &str, view: RenderView, at: DateTime<Local>) -> String {
        format!(
            "{}-{}-ai-response.{}",
            slugify(title),
            at.format("%Y%m%d-%H%M%S"),
            view.extension()
        )
    }

    pub fn export(&self, title: &str, view: RenderView, content: &str) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(title, view, Local::now()));
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = content.len(), "exported reply");
        Ok(path)
    }
}

/// Lowercase ASCII words joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for word in title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        if slug.len() + word.len() + 1 > MAX_SLUG_LEN {
            break;
        }
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}
