//! Thin proxies to GitHub, WakaTime and Spotify.
//!
//! Each provider module exposes plain async functions taking an explicit
//! token; [`Integrations`] resolves tokens from the environment variables
//! named in the config and calls them. Upstream failures keep the
//! provider's HTTP status in [`UpstreamError`] so the server can surface it
//! unchanged.

pub mod github;
pub mod spotify;
pub mod wakatime;

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::{secret, IntegrationsConfig};
use crate::models::RepoStats;

pub use spotify::NowPlaying;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} is not configured: {missing} is not set")]
    NotConfigured {
        service: &'static str,
        missing: String,
    },
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned an unexpected payload: {message}")]
    Payload {
        service: &'static str,
        message: String,
    },
}

impl UpstreamError {
    /// The provider's HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn request(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| UpstreamError::Request { service, source }
    }

    pub(crate) fn payload(service: &'static str, message: impl Into<String>) -> Self {
        UpstreamError::Payload {
            service,
            message: message.into(),
        }
    }
}

/// Reads a JSON body, turning non-2xx responses into [`UpstreamError::Status`].
pub(crate) async fn read_json(
    service: &'static str,
    resp: reqwest::Response,
) -> Result<Value, UpstreamError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(service, status = status.as_u16(), "upstream error: {}", body);
        return Err(UpstreamError::Status {
            service,
            status: status.as_u16(),
            message: upstream_message(&body),
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| UpstreamError::payload(service, e.to_string()))
}

/// Best-effort error text from a provider body.
fn upstream_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("error_description"))
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "no response body".to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    })
}

fn require(service: &'static str, var: &str) -> Result<String, UpstreamError> {
    secret(var).ok_or_else(|| UpstreamError::NotConfigured {
        service,
        missing: var.to_string(),
    })
}

/// Shared HTTP client plus provider settings.
#[derive(Clone)]
pub struct Integrations {
    client: reqwest::Client,
    config: IntegrationsConfig,
}

impl Integrations {
    pub fn new(config: IntegrationsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn github_configured(&self) -> bool {
        self.config.github.username.is_some() && secret(&self.config.github.token_env).is_some()
    }

    pub async fn github_profile(&self) -> Result<Value, UpstreamError> {
        let cfg = &self.config.github;
        let token = require(github::SERVICE, &cfg.token_env)?;
        github::fetch_profile(&self.client, cfg, &token).await
    }

    pub async fn github_repositories(&self) -> Result<Vec<RepoStats>, UpstreamError> {
        let data = self.github_profile().await?;
        github::repositories_from_profile(&data)
    }

    pub async fn wakatime_stats(&self) -> Result<Value, UpstreamError> {
        let cfg = &self.config.wakatime;
        let key = require(wakatime::SERVICE, &cfg.api_key_env)?;
        wakatime::fetch_stats(&self.client, cfg, &key).await
    }

    pub async fn spotify_now_playing(&self) -> Result<NowPlaying, UpstreamError> {
        let cfg = &self.config.spotify;
        let creds = spotify::Credentials {
            client_id: require(spotify::SERVICE, &cfg.client_id_env)?,
            client_secret: require(spotify::SERVICE, &cfg.client_secret_env)?,
            refresh_token: require(spotify::SERVICE, &cfg.refresh_token_env)?,
        };
        spotify::now_playing(&self.client, cfg, &creds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_from_json() {
        assert_eq!(
            upstream_message(r#"{"error":{"status":401,"message":"The access token expired"}}"#),
            "The access token expired"
        );
        assert_eq!(upstream_message(r#"{"message":"Bad credentials"}"#), "Bad credentials");
        assert_eq!(
            upstream_message(r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#),
            "Invalid refresh token"
        );
    }

    #[test]
    fn test_upstream_message_plain() {
        assert_eq!(upstream_message("  oops "), "oops");
        assert_eq!(upstream_message(""), "no response body");
    }

    #[test]
    fn test_status_only_for_status_errors() {
        let e = UpstreamError::Status {
            service: "github",
            status: 403,
            message: "rate limited".to_string(),
        };
        assert_eq!(e.status(), Some(403));
        let e = UpstreamError::NotConfigured {
            service: "github",
            missing: "GITHUB_TOKEN".to_string(),
        };
        assert_eq!(e.status(), None);
        assert!(e.to_string().contains("GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_configured() {
        let mut config = IntegrationsConfig::default();
        config.wakatime.api_key_env = "FOLIO_TEST_UNSET_WAKATIME_KEY".to_string();
        let integrations = Integrations::new(config).unwrap();
        let err = integrations.wakatime_stats().await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured { .. }));
    }
}
