//! WakaTime coding stats proxy.

use base64::Engine;
use serde_json::Value;

use super::{read_json, UpstreamError};
use crate::config::WakatimeConfig;

pub const SERVICE: &str = "wakatime";

/// `GET users/current/stats/<range>`, returned as received.
pub async fn fetch_stats(
    client: &reqwest::Client,
    config: &WakatimeConfig,
    api_key: &str,
) -> Result<Value, UpstreamError> {
    let url = format!(
        "{}/users/current/stats/{}",
        config.api_base.trim_end_matches('/'),
        config.range
    );
    let auth = base64::engine::general_purpose::STANDARD.encode(api_key);

    let resp = client
        .get(url)
        .header("Authorization", format!("Basic {}", auth))
        .send()
        .await
        .map_err(UpstreamError::request(SERVICE))?;

    read_json(SERVICE, resp).await
}
