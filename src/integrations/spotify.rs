//! Spotify "now playing" proxy.
//!
//! Exchanges the long-lived refresh token for an access token on every
//! call, then asks for the currently playing item. Anything other than a
//! playing track is reported as `is_playing: false`.

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use super::{read_json, UpstreamError};
use crate::config::SpotifyConfig;

pub const SERVICE: &str = "spotify";

pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct NowPlaying {
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_url: Option<String>,
}

async fn access_token(
    client: &reqwest::Client,
    config: &SpotifyConfig,
    creds: &Credentials,
) -> Result<String, UpstreamError> {
    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", creds.client_id, creds.client_secret));

    let resp = client
        .post(&config.token_url)
        .header("Authorization", format!("Basic {}", basic))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", creds.refresh_token.as_str()),
        ])
        .send()
        .await
        .map_err(UpstreamError::request(SERVICE))?;

    let json = read_json(SERVICE, resp).await?;
    json.get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| UpstreamError::payload(SERVICE, "token response without access_token"))
}

pub async fn now_playing(
    client: &reqwest::Client,
    config: &SpotifyConfig,
    creds: &Credentials,
) -> Result<NowPlaying, UpstreamError> {
    let token = access_token(client, config, creds).await?;

    let resp = client
        .get(format!(
            "{}/me/player/currently-playing",
            config.api_base.trim_end_matches('/')
        ))
        .bearer_auth(token)
        .send()
        .await
        .map_err(UpstreamError::request(SERVICE))?;

    if resp.status() == reqwest::StatusCode::NO_CONTENT {
        return Ok(NowPlaying::default());
    }

    let json = read_json(SERVICE, resp).await?;
    Ok(parse_now_playing(&json))
}

fn parse_now_playing(json: &Value) -> NowPlaying {
    let is_track = json.get("currently_playing_type").and_then(Value::as_str) == Some("track");
    let item = match json.get("item") {
        Some(item) if is_track && !item.is_null() => item,
        _ => return NowPlaying::default(),
    };

    let str_at = |pointer: &str| item.pointer(pointer).and_then(Value::as_str).map(str::to_string);

    let artist = item.get("artists").and_then(Value::as_array).map(|artists| {
        artists
            .iter()
            .filter_map(|a| a.get("name").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", ")
    });

    NowPlaying {
        is_playing: json.get("is_playing").and_then(Value::as_bool).unwrap_or(false),
        title: str_at("/name"),
        artist,
        album: str_at("/album/name"),
        album_image_url: str_at("/album/images/0/url"),
        song_url: str_at("/external_urls/spotify"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn creds() -> Credentials {
        Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    fn config(base: &str) -> SpotifyConfig {
        SpotifyConfig {
            api_base: base.to_string(),
            token_url: format!("{}/api/token", base),
            client_id_env: "UNUSED".to_string(),
            client_secret_env: "UNUSED".to_string(),
            refresh_token_env: "UNUSED".to_string(),
        }
    }

    async fn mock_token(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/api/token")
            .match_header("authorization", "Basic aWQ6c2VjcmV0")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"acc","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await
    }

    #[test]
    fn test_parse_track() {
        let np = parse_now_playing(&json!({
            "is_playing": true,
            "currently_playing_type": "track",
            "item": {
                "name": "Song",
                "artists": [{ "name": "A" }, { "name": "B" }],
                "album": { "name": "Album", "images": [{ "url": "https://i/1.jpg" }] },
                "external_urls": { "spotify": "https://open.spotify.com/track/1" }
            }
        }));
        assert!(np.is_playing);
        assert_eq!(np.title.as_deref(), Some("Song"));
        assert_eq!(np.artist.as_deref(), Some("A, B"));
        assert_eq!(np.album_image_url.as_deref(), Some("https://i/1.jpg"));
    }

    #[test]
    fn test_parse_podcast_is_not_playing() {
        let np = parse_now_playing(&json!({
            "is_playing": true,
            "currently_playing_type": "episode",
            "item": { "name": "Ep" }
        }));
        assert_eq!(np, NowPlaying::default());
    }

    #[tokio::test]
    async fn test_no_content_is_not_playing() {
        let mut server = mockito::Server::new_async().await;
        let token = mock_token(&mut server).await;
        server
            .mock("GET", "/me/player/currently-playing")
            .match_header("authorization", "Bearer acc")
            .with_status(204)
            .create_async()
            .await;

        let np = now_playing(&reqwest::Client::new(), &config(&server.url()), &creds())
            .await
            .unwrap();
        assert!(!np.is_playing);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#)
            .create_async()
            .await;

        let err = now_playing(&reqwest::Client::new(), &config(&server.url()), &creds())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("Invalid refresh token"));
    }
}
