//! `robots.txt`, `sitemap.xml` and the web app manifest.

use serde_json::{json, Value};

use crate::config::Config;
use crate::models::PostSummary;

/// Top-level pages always listed in the sitemap.
pub const STATIC_ROUTES: [&str; 7] = ["/", "/blog", "/projects", "/uses", "/publications", "/news", "/chat"];

pub fn robots_txt(config: &Config) -> String {
    format!(
        "User-agent: *\nAllow: /\n\nSitemap: {}/sitemap.xml\n",
        config.site_url()
    )
}

pub fn sitemap_xml(config: &Config, posts: &[PostSummary]) -> String {
    let base = config.site_url();
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );

    for route in STATIC_ROUTES {
        xml.push_str(&format!("  <url><loc>{}{}</loc></url>\n", base, xml_escape(route)));
    }

    for post in posts.iter().filter(|p| p.post.published) {
        xml.push_str(&format!(
            "  <url><loc>{}/blog/{}</loc><lastmod>{}</lastmod></url>\n",
            base,
            xml_escape(&post.post.slug),
            post.post.date.format("%Y-%m-%d")
        ));
    }

    xml.push_str("</urlset>\n");
    xml
}

pub fn manifest(config: &Config) -> Value {
    let site = &config.site;
    json!({
        "name": site.name,
        "short_name": site.short_name,
        "description": site.description,
        "start_url": "/",
        "display": "standalone",
        "theme_color": site.theme_color,
        "background_color": site.background_color,
        "icons": [
            { "src": "/icon-192.png", "sizes": "192x192", "type": "image/png" },
            { "src": "/icon-512.png", "sizes": "512x512", "type": "image/png" }
        ]
    })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
