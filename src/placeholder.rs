//! Blur placeholders for thumbnails.
//!
//! A placeholder is the source image downscaled to a few pixels wide,
//! re-encoded as PNG and inlined as a `data:` URL. Results are cached by the
//! SHA-256 of the source bytes, in memory and optionally on disk. The cache
//! is never evicted; the set of site images is small and fixed.
//!
//! Remote sources are only fetched from the site's own host or a host in
//! `placeholders.allowed_hosts`, without following redirects, and no
//! source larger than `placeholders.max_bytes` is read.

use anyhow::{bail, Context, Result};
use base64::Engine;
use futures_util::StreamExt;
use image::imageops::FilterType;
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::PlaceholderConfig;

pub struct PlaceholderService {
    config: PlaceholderConfig,
    client: reqwest::Client,
    /// Lowercased hosts remote images may come from.
    allowed_hosts: Vec<String>,
    cache: RwLock<HashMap<String, String>>,
}

impl PlaceholderService {
    /// `site_url` contributes its host to the remote allow-list.
    pub fn new(config: PlaceholderConfig, site_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let mut allowed_hosts: Vec<String> = config
            .allowed_hosts
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if let Some(host) = reqwest::Url::parse(site_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        {
            allowed_hosts.push(host);
        }

        Ok(Self {
            config,
            client,
            allowed_hosts,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the blur data URL for `src` (public path or http(s) URL).
    pub async fn data_url(&self, src: &str) -> Result<String> {
        let bytes = self.fetch(src).await?;
        let key = content_key(&bytes);

        if let Some(hit) = self.cache.read().await.get(&key) {
            debug!(src = %src, "placeholder cache hit");
            return Ok(hit.clone());
        }

        if let Some(hit) = self.read_disk(&key).await {
            self.cache.write().await.insert(key, hit.clone());
            return Ok(hit);
        }

        let size = self.config.size;
        let url = tokio::task::spawn_blocking(move || blur_data_url(&bytes, size)).await??;

        self.write_disk(&key, &url).await;
        self.cache.write().await.insert(key, url.clone());
        Ok(url)
    }

    /// Like [`data_url`](Self::data_url) but logs and swallows failures.
    ///
    /// Returns `None` when placeholders are disabled or `src` is absent.
    pub async fn try_data_url(&self, src: Option<&str>) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let src = src?;
        match self.data_url(src).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(src = %src, "placeholder failed: {:#}", e);
                None
            }
        }
    }

    async fn fetch(&self, src: &str) -> Result<Vec<u8>> {
        if src.starts_with("http://") || src.starts_with("https://") {
            return self.fetch_remote(src).await;
        }

        let path = resolve_public_path(&self.config.public_dir, src)?;
        let len = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .len();
        if len > self.config.max_bytes {
            bail!("image {} is {} bytes, limit is {}", src, len, self.config.max_bytes);
        }
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))
    }

    async fn fetch_remote(&self, src: &str) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse(src).with_context(|| format!("invalid image URL: {}", src))?;
        let host = url.host_str().map(str::to_lowercase).unwrap_or_default();
        if !self.allowed_hosts.iter().any(|h| *h == host) {
            bail!("image host not allowed: {}", host);
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch image {}", src))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("Image request for {} returned {}", src, status);
        }

        let limit = self.config.max_bytes;
        if let Some(len) = resp.content_length() {
            if len > limit {
                bail!("image {} is {} bytes, limit is {}", src, len, limit);
            }
        }

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to fetch image {}", src))?;
            if (bytes.len() + chunk.len()) as u64 > limit {
                bail!("image {} exceeds {} bytes", src, limit);
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.config
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.txt", key)))
    }

    async fn read_disk(&self, key: &str) -> Option<String> {
        let path = self.disk_path(key)?;
        tokio::fs::read_to_string(&path).await.ok()
    }

    async fn write_disk(&self, key: &str, url: &str) {
        let Some(path) = self.disk_path(key) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(dir = %parent.display(), "cannot create placeholder cache dir: {}", e);
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&path, url).await {
            warn!(path = %path.display(), "cannot write placeholder cache: {}", e);
        }
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Hex SHA-256 of the image bytes.
pub fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Downscales `bytes` so the longest side is `size` pixels and returns a
/// PNG data URL.
pub fn blur_data_url(bytes: &[u8], size: u32) -> Result<String> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    let (width, height) = scaled_dimensions(img.width(), img.height(), size);

    let small = img.resize_exact(width, height, FilterType::Triangle);

    let mut png = Vec::new();
    small
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode placeholder")?;

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&png)
    ))
}

/// Scales `(width, height)` so the longer side is `size`, keeping the
/// aspect ratio. Neither side drops below 1.
fn scaled_dimensions(width: u32, height: u32, size: u32) -> (u32, u32) {
    let size = size.max(1);
    let (width, height) = (width.max(1) as f64, height.max(1) as f64);
    let scale = size as f64 / width.max(height);
    let scaled = |side: f64| ((side * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Maps a site path like `/images/a.png` under `public_dir`.
///
/// Rejects parent-directory components.
fn resolve_public_path(public_dir: &Path, src: &str) -> Result<PathBuf> {
    let relative = Path::new(src.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        bail!("invalid image path: empty");
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("invalid image path: {}", src),
        }
    }
    Ok(public_dir.join(relative))
}
