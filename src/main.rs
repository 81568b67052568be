//! # Folio CLI (`folio`)
//!
//! Serves the portfolio API and offers a few content maintenance commands.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio serve` | Start the HTTP server |
//! | `folio check` | Validate every content file |
//! | `folio posts` | Print a page of posts |
//! | `folio render <slug>` | Print a post's rendered HTML |
//! | `folio placeholder <src>` | Print an image's blur data URL |
//! | `folio chat "<message>"` | Stream a one-off chat reply |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `folio=info`).

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use folio::chat::{ChatMessage, ChatService};
use folio::config::{self, Config};
use folio::markdown::MarkdownRenderer;
use folio::placeholder::PlaceholderService;
use folio::{blog, check, paginate, server};

/// Folio: content, integration and streaming-chat backend for a personal
/// portfolio site.
#[derive(Parser)]
#[command(name = "folio", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Content commands fall back to built-in defaults when the file is
    /// missing; `serve` and `chat` require it.
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Load every content file and report problems.
    ///
    /// Exits non-zero if any file fails to load.
    Check,

    /// Print one page of published posts.
    Posts {
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Search terms matched against title, description and tags.
        #[arg(long)]
        query: Option<String>,

        /// Only posts carrying this tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Print the rendered HTML of a post.
    Render {
        /// Post slug.
        slug: String,
    },

    /// Print the blur placeholder data URL of an image.
    Placeholder {
        /// Public path (`/images/a.png`) or http(s) URL.
        src: String,
    },

    /// Send one message to the chat relay and stream the reply.
    Chat {
        /// The message.
        message: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("folio=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            let cfg = load_or_default(&cli.config)?;
            check::run_check(&cfg.content.dir)?;
        }
        Commands::Posts { page, query, tag } => {
            let cfg = load_or_default(&cli.config)?;
            let posts = blog::list_posts(&cfg.content.dir, None)?;
            let posts = paginate::filter_tag(posts, tag.as_deref());
            let posts = paginate::filter(posts, query.as_deref());
            let page = paginate::paginate(posts, page, cfg.pagination.per_page);

            if page.items.is_empty() {
                println!("No posts.");
            }
            for p in &page.items {
                println!(
                    "{}  {:<32} {:>3} min  {:>6} views  [{}]",
                    p.post.date,
                    p.post.slug,
                    p.reading_time_minutes,
                    p.post.views,
                    p.post.tags.join(", ")
                );
            }
            println!(
                "page {}/{} ({} posts)",
                page.page, page.total_pages, page.total_items
            );
        }
        Commands::Render { slug } => {
            let cfg = load_or_default(&cli.config)?;
            let renderer = MarkdownRenderer::new(cfg.markdown.theme.clone());
            let post = blog::get_post(&cfg.content.dir, &renderer, &slug)?;
            println!("{}", post.html);
        }
        Commands::Placeholder { src } => {
            let cfg = load_or_default(&cli.config)?;
            let service = PlaceholderService::new(cfg.placeholders.clone(), cfg.site_url())?;
            println!("{}", service.data_url(&src).await?);
        }
        Commands::Chat { message } => {
            let cfg = config::load_config(&cli.config)?;
            let chat = ChatService::from_config(&cfg.chat)?;
            let mut rx = chat.relay(vec![ChatMessage::user(message)]);
            let mut stdout = std::io::stdout();
            while let Some(token) = rx.recv().await {
                write!(stdout, "{}", token)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }

    Ok(())
}
