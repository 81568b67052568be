//! Search filtering and pagination over in-memory record lists.
//!
//! Pages are 1-based. A page past the end is empty but still reports the
//! correct totals, so the client can render its pager.

use serde::Serialize;

use crate::models::Searchable;

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Returns `items` whose title, description or tags contain every
/// whitespace-separated term of `query` (case-insensitive).
pub fn filter<T: Searchable>(items: Vec<T>, query: Option<&str>) -> Vec<T> {
    let terms: Vec<String> = match query {
        Some(q) => q.split_whitespace().map(|t| t.to_lowercase()).collect(),
        None => Vec::new(),
    };
    if terms.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|item| {
            let haystack = haystack(item);
            terms.iter().all(|t| haystack.contains(t.as_str()))
        })
        .collect()
}

fn haystack<T: Searchable>(item: &T) -> String {
    let mut text = String::new();
    text.push_str(&item.title().to_lowercase());
    text.push('\n');
    text.push_str(&item.description().to_lowercase());
    for tag in item.tags() {
        text.push('\n');
        text.push_str(&tag.to_lowercase());
    }
    text
}

/// Keeps items carrying `tag` (exact, case-insensitive).
pub fn filter_tag<T: Searchable>(items: Vec<T>, tag: Option<&str>) -> Vec<T> {
    let tag = match tag.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return items,
    };
    items
        .into_iter()
        .filter(|item| item.tags().iter().any(|t| t.to_lowercase() == tag))
        .collect()
}

/// Slices `items` into the requested page.
///
/// `page` 0 is treated as 1. `per_page` 0 is treated as 1.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page).max(1);

    let start = (page - 1).saturating_mul(per_page);
    let items: Vec<T> = items.into_iter().skip(start).take(per_page).collect();

    Page {
        items,
        page,
        per_page,
        total_items,
        total_pages,
    }
}

/// Sorted, de-duplicated tag list across `items`, lowercased.
pub fn all_tags<T: Searchable>(items: &[T]) -> Vec<String> {
    let mut tags: Vec<String> = items
        .iter()
        .flat_map(|i| i.tags().iter().map(|t| t.to_lowercase()))
        .collect();
    tags.sort();
    tags.dedup();
    tags
}
