//! Content directory validation.
//!
//! Loads every content file with its typed schema and cross-checks posts
//! against their Markdown bodies. Used by `folio check` before deploying
//! edited content.

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

use crate::blog;
use crate::content::{self, ContentKind};
use crate::models::{Milestone, NewsItem, Project, Publication, UsesCategory};

/// Outcome for one content file.
pub struct FileStatus {
    pub kind: ContentKind,
    /// Record count, or the load error.
    pub result: Result<usize, String>,
}

pub struct CheckReport {
    pub files: Vec<FileStatus>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn failed(&self) -> bool {
        self.files.iter().any(|f| f.result.is_err())
    }
}

fn count<T: serde::de::DeserializeOwned>(dir: &Path, kind: ContentKind) -> Result<usize, String> {
    content::load_records::<T>(dir, kind)
        .map(|records| records.len())
        .map_err(|e| format!("{:#}", e))
}

pub fn check_content(dir: &Path) -> Result<CheckReport> {
    let mut files = Vec::new();
    for kind in ContentKind::ALL {
        let result = match kind {
            ContentKind::Posts => count::<crate::models::BlogPost>(dir, kind),
            ContentKind::Projects => count::<Project>(dir, kind),
            ContentKind::Milestones => count::<Milestone>(dir, kind),
            ContentKind::Publications => count::<Publication>(dir, kind),
            ContentKind::News => count::<NewsItem>(dir, kind),
            ContentKind::Uses => count::<UsesCategory>(dir, kind),
        };
        files.push(FileStatus { kind, result });
    }

    let mut warnings = Vec::new();

    if let Ok(posts) = blog::load_posts(dir) {
        let bodies: HashSet<String> = content::scan_markdown_slugs(dir)?.into_iter().collect();
        let mut seen = HashSet::new();

        for post in &posts {
            if !seen.insert(post.slug.as_str()) {
                warnings.push(format!("duplicate post slug: {}", post.slug));
            }
            if post.published && !bodies.contains(&post.slug) {
                warnings.push(format!("post without body: blog/{}.md", post.slug));
            }
        }

        let mut orphans: Vec<&String> = bodies.iter().filter(|s| !seen.contains(s.as_str())).collect();
        orphans.sort();
        for slug in orphans {
            warnings.push(format!("markdown without post entry: blog/{}.md", slug));
        }
    }

    if let Ok(projects) = content::load_projects(dir) {
        let mut seen = HashSet::new();
        for project in &projects {
            if !seen.insert(project.name.to_lowercase()) {
                warnings.push(format!("duplicate project name: {}", project.name));
            }
        }
    }

    Ok(CheckReport { files, warnings })
}

/// Runs the check and prints a table. Fails if any file did not load.
pub fn run_check(dir: &Path) -> Result<()> {
    let report = check_content(dir)?;

    println!("Content: {}", dir.display());
    println!();
    println!("{:<20} {:<8} DETAIL", "FILE", "STATUS");
    for file in &report.files {
        match &file.result {
            Ok(n) => println!("{:<20} {:<8} {} records", file.kind.file_name(), "ok", n),
            Err(e) => println!("{:<20} {:<8} {}", file.kind.file_name(), "error", e),
        }
    }

    if !report.warnings.is_empty() {
        println!();
        for w in &report.warnings {
            println!("warning: {}", w);
        }
    }

    if report.failed() {
        anyhow::bail!("content check failed");
    }
    println!();
    println!("ok");
    Ok(())
}
