//! Content loading and aggregation.
//!
//! Every content type follows the same pipeline: read a JSON array from the
//! content directory, deserialize it, optionally join it against a second
//! dataset, sort newest-first and slice to a limit. Files are read fresh on
//! every call; the filesystem is the source of truth.
//!
//! Load failures are logged with their cause and surfaced as
//! [`ContentError::Fetch`] so callers can render a generic message.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::models::{
    Dated, Milestone, MilestoneKind, NewsItem, Project, ProjectView, Publication, RepoStats,
    UsesCategory,
};

/// The JSON content files under the content directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Posts,
    Projects,
    Milestones,
    Publications,
    News,
    Uses,
}

impl ContentKind {
    pub const ALL: [ContentKind; 6] = [
        ContentKind::Posts,
        ContentKind::Projects,
        ContentKind::Milestones,
        ContentKind::Publications,
        ContentKind::News,
        ContentKind::Uses,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ContentKind::Posts => "posts.json",
            ContentKind::Projects => "projects.json",
            ContentKind::Milestones => "milestones.json",
            ContentKind::Publications => "publications.json",
            ContentKind::News => "news.json",
            ContentKind::Uses => "uses.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContentKind::Posts => "posts",
            ContentKind::Projects => "projects",
            ContentKind::Milestones => "milestones",
            ContentKind::Publications => "publications",
            ContentKind::News => "news",
            ContentKind::Uses => "uses",
        }
    }

    pub fn path(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Errors callers are expected to tell apart.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to fetch {0}")]
    Fetch(&'static str),
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
}

/// Reads and deserializes one content file.
pub fn load_records<T: DeserializeOwned>(dir: &Path, kind: ContentKind) -> Result<Vec<T>> {
    let path = kind.path(dir);
    let result = read_json_array(&path);
    match result {
        Ok(records) => {
            debug!(kind = kind.label(), count = records.len(), "loaded content");
            Ok(records)
        }
        Err(e) => {
            error!(kind = kind.label(), path = %path.display(), "content load failed: {:#}", e);
            Err(e.context(ContentError::Fetch(kind.label())))
        }
    }
}

fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<T> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(records)
}

/// Newest first. Ties keep their file order.
pub fn sort_by_date_desc<T: Dated>(items: &mut [T]) {
    items.sort_by(|a, b| b.date().cmp(&a.date()));
}

pub fn take_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

pub fn load_projects(dir: &Path) -> Result<Vec<Project>> {
    let mut projects: Vec<Project> = load_records(dir, ContentKind::Projects)?;
    sort_by_date_desc(&mut projects);
    Ok(projects)
}

/// Projects flagged `featured`, in input order.
pub fn featured_projects(projects: &[Project], limit: Option<usize>) -> Vec<Project> {
    let featured: Vec<Project> = projects.iter().filter(|p| p.featured).cloned().collect();
    take_limit(featured, limit)
}

pub fn load_milestones(dir: &Path, kind: Option<MilestoneKind>) -> Result<Vec<Milestone>> {
    let mut milestones: Vec<Milestone> = load_records(dir, ContentKind::Milestones)?;
    if let Some(kind) = kind {
        milestones.retain(|m| m.kind == kind);
    }
    sort_by_date_desc(&mut milestones);
    Ok(milestones)
}

pub fn load_publications(dir: &Path) -> Result<Vec<Publication>> {
    let mut publications: Vec<Publication> = load_records(dir, ContentKind::Publications)?;
    sort_by_date_desc(&mut publications);
    Ok(publications)
}

pub fn load_news(dir: &Path, limit: Option<usize>) -> Result<Vec<NewsItem>> {
    let mut news: Vec<NewsItem> = load_records(dir, ContentKind::News)?;
    sort_by_date_desc(&mut news);
    Ok(take_limit(news, limit))
}

pub fn load_uses(dir: &Path) -> Result<Vec<UsesCategory>> {
    load_records(dir, ContentKind::Uses)
}

/// Attaches GitHub stats to each project by case-insensitive name match.
///
/// A project's `repo` field takes precedence over its `name`.
pub fn join_projects_with_repos(projects: Vec<Project>, repos: &[RepoStats]) -> Vec<ProjectView> {
    let by_name: HashMap<String, &RepoStats> = repos
        .iter()
        .map(|r| (r.name.to_lowercase(), r))
        .collect();

    projects
        .into_iter()
        .map(|project| {
            let key = project
                .repo
                .as_deref()
                .unwrap_or(&project.name)
                .to_lowercase();
            let repository = by_name.get(&key).map(|r| (*r).clone());
            ProjectView {
                project,
                repository,
                blur_data_url: None,
            }
        })
        .collect()
}

/// Markdown files under `<dir>/blog`, as slugs, sorted.
pub fn scan_markdown_slugs(dir: &Path) -> Result<Vec<String>> {
    let blog_dir = dir.join("blog");
    if !blog_dir.exists() {
        return Ok(Vec::new());
    }

    let mut slugs = Vec::new();
    for entry in WalkDir::new(&blog_dir).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            slugs.push(stem.to_string_lossy().to_string());
        }
    }
    slugs.sort();
    Ok(slugs)
}
