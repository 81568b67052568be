//! # Folio
//!
//! Content, integration and streaming-chat backend for a personal portfolio
//! site.
//!
//! Folio reads hand-edited JSON and Markdown from a content directory and
//! serves it as JSON over HTTP, together with thin proxies for the GitHub,
//! WakaTime and Spotify widgets, a token-by-token chat relay to a hosted
//! language model, and the robots/sitemap/manifest documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌────────────┐
//! │ data/*.json    │──▶│ content      │──▶│            │
//! │ data/blog/*.md │   │ blog, views  │   │   server   │──▶ browser
//! └────────────────┘   └──────────────┘   │   (axum)   │
//! ┌────────────────┐   ┌──────────────┐   │            │
//! │ GitHub, Waka,  │──▶│ integrations │──▶│            │
//! │ Spotify, LLM   │   │ chat         │   │            │
//! └────────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! folio check                 # validate the content directory
//! folio posts --query rust    # list matching posts
//! folio serve                 # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Content records |
//! | [`content`] | JSON loading, sorting, joining |
//! | [`blog`] | Posts, Markdown bodies, reading time |
//! | [`views`] | Serialized view counting |
//! | [`paginate`] | Search filtering and pagination |
//! | [`markdown`] | Markdown rendering with highlighting |
//! | [`placeholder`] | Blur placeholders |
//! | [`integrations`] | GitHub, WakaTime, Spotify proxies |
//! | [`chat`] | Streaming chat relay |
//! | [`metadata`] | Crawler documents |
//! | [`server`] | HTTP server |
//! | [`check`] | Content directory validation |

pub mod blog;
pub mod chat;
pub mod check;
pub mod config;
pub mod content;
pub mod integrations;
pub mod markdown;
pub mod metadata;
pub mod models;
pub mod paginate;
pub mod placeholder;
pub mod server;
pub mod views;
