//! Blog view counts, persisted in `posts.json`.
//!
//! Every increment goes through one [`ViewCounter`]: the file is re-read,
//! the matching post's `views` bumped, and the result written to a sibling
//! temp file that is renamed over the original. Increments are serialized
//! by an async mutex, so concurrent views of the same post never lose an
//! update and readers never observe a half-written file.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::content::{ContentError, ContentKind};

pub struct ViewCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ViewCounter {
    pub fn new(content_dir: &Path) -> Self {
        Self {
            path: ContentKind::Posts.path(content_dir),
            lock: Mutex::new(()),
        }
    }

    /// Adds one view to `slug` and returns the new count.
    ///
    /// Unknown slugs return [`ContentError::NotFound`] and leave the file
    /// untouched.
    pub async fn increment(&self, slug: &str) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        // Edit as untyped JSON so fields this crate doesn't model survive the rewrite.
        let mut posts: Vec<Value> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        let post = posts
            .iter_mut()
            .find(|p| p.get("slug").and_then(Value::as_str) == Some(slug))
            .ok_or_else(|| ContentError::NotFound {
                kind: "post",
                key: slug.to_string(),
            })?;

        let views = post.get("views").and_then(Value::as_u64).unwrap_or(0) + 1;
        if let Some(obj) = post.as_object_mut() {
            obj.insert("views".to_string(), Value::from(views));
        }

        let body = serde_json::to_string_pretty(&posts)?;
        write_atomic(&self.path, body.as_bytes()).await?;

        debug!(slug = %slug, views, "view counted");
        Ok(views)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "posts.json".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
