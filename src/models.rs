//! Content records served by Folio.
//!
//! Every record is loaded wholesale from a JSON array under the content
//! directory. Derived values (reading time, placeholders, repository
//! stats) live on the view types and are never written back.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Record kinds that carry a date and can be sorted newest-first.
pub trait Dated {
    fn date(&self) -> NaiveDate;
}

/// Record kinds that can be matched by the search box.
pub trait Searchable {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    fn tags(&self) -> &[String];
}

/// Blog post metadata from `posts.json`. The body lives in `blog/<slug>.md`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlogPost {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

/// A project from `projects.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// GitHub repository name when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub featured: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneKind {
    Employment,
    Education,
}

/// Employment or education entry from `milestones.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub kind: MilestoneKind,
    pub title: String,
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: NaiveDate,
    /// `None` while ongoing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub venue: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// One section of the "uses" page (hardware, editor, desk, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsesCategory {
    pub category: String,
    #[serde(default)]
    pub items: Vec<UsesItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsesItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// GitHub repository summary used to enrich projects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoStats {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub forks: u64,
    #[serde(default)]
    pub language: Option<String>,
}

/// Post as listed on the blog index.
#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    #[serde(flatten)]
    pub post: BlogPost,
    pub reading_time_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_data_url: Option<String>,
}

/// Full post with its rendered body.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub markdown: String,
    pub html: String,
}

/// Project joined with its GitHub repository, when one matched.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepoStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_data_url: Option<String>,
}

impl Dated for BlogPost {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Dated for Project {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Dated for Milestone {
    fn date(&self) -> NaiveDate {
        self.start
    }
}

impl Dated for Publication {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Dated for NewsItem {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Searchable for PostSummary {
    fn title(&self) -> &str {
        &self.post.title
    }
    fn description(&self) -> &str {
        &self.post.description
    }
    fn tags(&self) -> &[String] {
        &self.post.tags
    }
}

impl Searchable for ProjectView {
    fn title(&self) -> &str {
        &self.project.title
    }
    fn description(&self) -> &str {
        &self.project.description
    }
    fn tags(&self) -> &[String] {
        &self.project.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_defaults() {
        let post: BlogPost = serde_json::from_str(
            r#"{"slug":"hello","title":"Hello","date":"2024-03-01"}"#,
        )
        .unwrap();
        assert!(post.published);
        assert_eq!(post.views, 0);
        assert!(post.tags.is_empty());
        assert_eq!(post.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_milestone_kind_lowercase() {
        let m: Milestone = serde_json::from_str(
            r#"{"kind":"education","title":"BSc","organization":"Uni","start":"2015-09-01"}"#,
        )
        .unwrap();
        assert_eq!(m.kind, MilestoneKind::Education);
        assert!(m.end.is_none());
    }

    #[test]
    fn test_summary_flattens_post() {
        let post: BlogPost =
            serde_json::from_str(r#"{"slug":"a","title":"A","date":"2024-01-01"}"#).unwrap();
        let summary = PostSummary {
            post,
            reading_time_minutes: 2,
            blur_data_url: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["slug"], "a");
        assert_eq!(json["reading_time_minutes"], 2);
        assert!(json.get("blur_data_url").is_none());
    }
}
