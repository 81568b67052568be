use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub markdown: MarkdownConfig,
    #[serde(default)]
    pub placeholders: PlaceholderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_site_url")]
    pub url: String,
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default = "default_short_name")]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_theme_color")]
    pub theme_color: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            url: default_site_url(),
            name: default_site_name(),
            short_name: default_short_name(),
            description: String::new(),
            theme_color: default_theme_color(),
            background_color: default_background_color(),
        }
    }
}

fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_site_name() -> String {
    "Portfolio".to_string()
}
fn default_short_name() -> String {
    "Portfolio".to_string()
}
fn default_theme_color() -> String {
    "#0f172a".to_string()
}
fn default_background_color() -> String {
    "#ffffff".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_content_dir")]
    pub dir: PathBuf,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            dir: default_content_dir(),
        }
    }
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaginationConfig {
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
        }
    }
}

fn default_per_page() -> usize {
    9
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkdownConfig {
    #[serde(default = "default_markdown_theme")]
    pub theme: String,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            theme: default_markdown_theme(),
        }
    }
}

fn default_markdown_theme() -> String {
    "base16-ocean.dark".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaceholderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_placeholder_size")]
    pub size: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest source image accepted, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_bytes: u64,
    /// Hosts remote images may be fetched from, besides the site's own.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            public_dir: default_public_dir(),
            cache_dir: None,
            size: default_placeholder_size(),
            timeout_secs: default_fetch_timeout_secs(),
            max_bytes: default_max_image_bytes(),
            allowed_hosts: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_public_dir() -> PathBuf {
    PathBuf::from("./public")
}
fn default_placeholder_size() -> u32 {
    10
}
fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_max_image_bytes() -> u64 {
    5 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_api_base")]
    pub api_base: String,
    #[serde(default = "default_chat_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_chat_max_retries")]
    pub max_retries: u32,
    /// Longest wait for the next chunk of a reply, in seconds.
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: default_chat_api_base(),
            api_key_env: default_chat_api_key_env(),
            model: default_chat_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: None,
            max_retries: default_chat_max_retries(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_system_prompt() -> String {
    "You are a friendly assistant embedded in a personal portfolio website. \
     Answer questions about the site owner's work, projects and writing. \
     Keep answers short and use Markdown for code."
        .to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_chat_max_retries() -> u32 {
    2
}
fn default_chat_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub wakatime: WakatimeConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_repo_count")]
    pub repo_count: u32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            username: None,
            api_base: default_github_api_base(),
            token_env: default_github_token_env(),
            repo_count: default_repo_count(),
        }
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_repo_count() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct WakatimeConfig {
    #[serde(default = "default_wakatime_api_base")]
    pub api_base: String,
    #[serde(default = "default_wakatime_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_wakatime_range")]
    pub range: String,
}

impl Default for WakatimeConfig {
    fn default() -> Self {
        Self {
            api_base: default_wakatime_api_base(),
            api_key_env: default_wakatime_key_env(),
            range: default_wakatime_range(),
        }
    }
}

fn default_wakatime_api_base() -> String {
    "https://wakatime.com/api/v1".to_string()
}
fn default_wakatime_key_env() -> String {
    "WAKATIME_API_KEY".to_string()
}
fn default_wakatime_range() -> String {
    "last_7_days".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,
    #[serde(default = "default_spotify_token_url")]
    pub token_url: String,
    #[serde(default = "default_spotify_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_spotify_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_spotify_refresh_token_env")]
    pub refresh_token_env: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base: default_spotify_api_base(),
            token_url: default_spotify_token_url(),
            client_id_env: default_spotify_client_id_env(),
            client_secret_env: default_spotify_client_secret_env(),
            refresh_token_env: default_spotify_refresh_token_env(),
        }
    }
}

fn default_spotify_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}
fn default_spotify_token_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}
fn default_spotify_client_id_env() -> String {
    "SPOTIFY_CLIENT_ID".to_string()
}
fn default_spotify_client_secret_env() -> String {
    "SPOTIFY_CLIENT_SECRET".to_string()
}
fn default_spotify_refresh_token_env() -> String {
    "SPOTIFY_REFRESH_TOKEN".to_string()
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self {
            site: SiteConfig::default(),
            content: ContentConfig::default(),
            server: ServerConfig::default(),
            pagination: PaginationConfig::default(),
            markdown: MarkdownConfig::default(),
            placeholders: PlaceholderConfig::default(),
            chat: ChatConfig::default(),
            integrations: IntegrationsConfig::default(),
        }
    }

    /// Absolute site URL without a trailing slash.
    pub fn site_url(&self) -> &str {
        self.site.url.trim_end_matches('/')
    }
}

/// Reads a secret from the environment variable named by `var`.
///
/// Empty values count as missing.
pub fn secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.pagination.per_page == 0 {
        anyhow::bail!("pagination.per_page must be > 0");
    }

    if !(4..=64).contains(&config.placeholders.size) {
        anyhow::bail!("placeholders.size must be in [4, 64]");
    }

    if config.placeholders.max_bytes == 0 {
        anyhow::bail!("placeholders.max_bytes must be > 0");
    }

    let url = &config.site.url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("site.url must be an absolute http(s) URL, got '{}'", url);
    }

    if !(0.0..=2.0).contains(&config.chat.temperature) {
        anyhow::bail!("chat.temperature must be in [0.0, 2.0]");
    }

    if config.chat.model.trim().is_empty() {
        anyhow::bail!("chat.model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.pagination.per_page, 9);
        assert_eq!(cfg.content.dir, PathBuf::from("./data"));
        assert_eq!(cfg.chat.max_retries, 2);
        assert_eq!(cfg.placeholders.size, 10);
        assert_eq!(cfg.placeholders.max_bytes, 5 * 1024 * 1024);
        assert!(cfg.placeholders.allowed_hosts.is_empty());
    }

    #[test]
    fn test_overrides() {
        let file = write_config(
            r#"
[site]
url = "https://example.dev/"
name = "Jo"

[pagination]
per_page = 6

[integrations.github]
username = "octo"
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.site_url(), "https://example.dev");
        assert_eq!(cfg.pagination.per_page, 6);
        assert_eq!(cfg.integrations.github.username.as_deref(), Some("octo"));
        assert_eq!(cfg.integrations.github.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn test_rejects_zero_per_page() {
        let file = write_config("[pagination]\nper_page = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("per_page"));
    }

    #[test]
    fn test_rejects_relative_site_url() {
        let file = write_config("[site]\nurl = \"example.dev\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_placeholder_size() {
        let file = write_config("[placeholders]\nsize = 200\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/folio.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
