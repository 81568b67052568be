//! Blog posts: metadata from `posts.json`, bodies from `blog/<slug>.md`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::content::{self, ContentError, ContentKind};
use crate::markdown::{self, MarkdownRenderer};
use crate::models::{BlogPost, PostDetail, PostSummary};

const WORDS_PER_MINUTE: usize = 200;

/// Minutes to read `markdown` at 200 words per minute, at least 1.
pub fn reading_time_minutes(markdown: &str) -> u32 {
    let words = markdown::word_count(markdown);
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

fn body_path(dir: &Path, slug: &str) -> Option<PathBuf> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| dir.join("blog").join(format!("{}.md", slug)))
}

/// Markdown body for `slug`, or `None` if the file does not exist.
pub fn read_body(dir: &Path, slug: &str) -> Result<Option<String>> {
    let Some(path) = body_path(dir, slug) else {
        return Ok(None);
    };
    match std::fs::read_to_string(&path) {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// All posts including drafts, as stored.
pub fn load_posts(dir: &Path) -> Result<Vec<BlogPost>> {
    content::load_records(dir, ContentKind::Posts)
}

fn summarize(dir: &Path, post: BlogPost) -> Result<PostSummary> {
    let body = read_body(dir, &post.slug)?.unwrap_or_default();
    Ok(PostSummary {
        reading_time_minutes: reading_time_minutes(&body),
        post,
        blur_data_url: None,
    })
}

/// Published posts, newest first, sliced to `limit`.
pub fn list_posts(dir: &Path, limit: Option<usize>) -> Result<Vec<PostSummary>> {
    let mut posts: Vec<BlogPost> = load_posts(dir)?
        .into_iter()
        .filter(|p| p.published)
        .collect();
    content::sort_by_date_desc(&mut posts);

    let summaries = content::take_limit(posts, limit)
        .into_iter()
        .map(|p| summarize(dir, p))
        .collect::<Result<Vec<_>>>()
        .context(ContentError::Fetch("posts"))?;
    Ok(summaries)
}

/// One published post with its rendered body.
pub fn get_post(dir: &Path, renderer: &MarkdownRenderer, slug: &str) -> Result<PostDetail> {
    let post = load_posts(dir)?
        .into_iter()
        .find(|p| p.slug == slug && p.published)
        .ok_or_else(|| ContentError::NotFound {
            kind: "post",
            key: slug.to_string(),
        })?;

    let markdown = read_body(dir, slug)
        .context(ContentError::Fetch("posts"))?
        .unwrap_or_default();
    let html = renderer.render(&markdown);

    Ok(PostDetail {
        summary: PostSummary {
            reading_time_minutes: reading_time_minutes(&markdown),
            post,
            blur_data_url: None,
        },
        markdown,
        html,
    })
}
