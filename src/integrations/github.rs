//! GitHub GraphQL proxy: repositories, pinned items and the contribution
//! calendar for the configured user.

use serde_json::{json, Value};

use super::{read_json, UpstreamError};
use crate::config::GithubConfig;
use crate::models::RepoStats;

pub const SERVICE: &str = "github";

const PROFILE_QUERY: &str = r#"
query($login: String!, $count: Int!) {
  user(login: $login) {
    login
    name
    avatarUrl
    followers { totalCount }
    repositories(first: $count, ownerAffiliations: OWNER, privacy: PUBLIC, orderBy: {field: STARGAZERS, direction: DESC}) {
      nodes { name description url stargazerCount forkCount primaryLanguage { name } }
    }
    pinnedItems(first: 6, types: REPOSITORY) {
      nodes { ... on Repository { name description url stargazerCount forkCount primaryLanguage { name } } }
    }
    contributionsCollection {
      contributionCalendar {
        totalContributions
        weeks { contributionDays { date contributionCount color } }
      }
    }
  }
}
"#;

/// Runs the profile query and returns the GraphQL `data` object unchanged.
pub async fn fetch_profile(
    client: &reqwest::Client,
    config: &GithubConfig,
    token: &str,
) -> Result<Value, UpstreamError> {
    let login = config
        .username
        .as_deref()
        .ok_or_else(|| UpstreamError::NotConfigured {
            service: SERVICE,
            missing: "integrations.github.username".to_string(),
        })?;

    let body = json!({
        "query": PROFILE_QUERY,
        "variables": { "login": login, "count": config.repo_count },
    });

    let resp = client
        .post(format!("{}/graphql", config.api_base.trim_end_matches('/')))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .map_err(UpstreamError::request(SERVICE))?;

    let mut json = read_json(SERVICE, resp).await?;

    if let Some(errors) = json.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let message = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(UpstreamError::payload(SERVICE, message));
        }
    }

    match json.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(UpstreamError::payload(SERVICE, "missing data")),
    }
}

/// Typed repositories from a profile `data` object, pinned ones first.
pub fn repositories_from_profile(data: &Value) -> Result<Vec<RepoStats>, UpstreamError> {
    let user = data
        .get("user")
        .filter(|u| !u.is_null())
        .ok_or_else(|| UpstreamError::payload(SERVICE, "user not found"))?;

    let mut repos: Vec<RepoStats> = Vec::new();
    for pointer in ["/pinnedItems/nodes", "/repositories/nodes"] {
        let nodes = user
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for node in nodes {
            if let Some(repo) = repo_from_node(node) {
                if !repos.iter().any(|r| r.name == repo.name) {
                    repos.push(repo);
                }
            }
        }
    }
    Ok(repos)
}

fn repo_from_node(node: &Value) -> Option<RepoStats> {
    Some(RepoStats {
        name: node.get("name")?.as_str()?.to_string(),
        description: node
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        url: node.get("url")?.as_str()?.to_string(),
        stars: node.get("stargazerCount").and_then(Value::as_u64).unwrap_or(0),
        forks: node.get("forkCount").and_then(Value::as_u64).unwrap_or(0),
        language: node
            .pointer("/primaryLanguage/name")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(api_base: String) -> GithubConfig {
        GithubConfig {
            username: Some("octo".to_string()),
            api_base,
            token_env: "UNUSED".to_string(),
            repo_count: 10,
        }
    }

    fn sample_data() -> Value {
        json!({
            "user": {
                "login": "octo",
                "pinnedItems": { "nodes": [
                    { "name": "folio", "description": "site", "url": "https://github.com/octo/folio",
                      "stargazerCount": 5, "forkCount": 1, "primaryLanguage": { "name": "Rust" } },
                    {}
                ]},
                "repositories": { "nodes": [
                    { "name": "big", "description": null, "url": "https://github.com/octo/big",
                      "stargazerCount": 99, "forkCount": 4, "primaryLanguage": null },
                    { "name": "folio", "description": "site", "url": "https://github.com/octo/folio",
                      "stargazerCount": 5, "forkCount": 1, "primaryLanguage": { "name": "Rust" } }
                ]}
            }
        })
    }

    #[test]
    fn test_repositories_pinned_first_deduplicated() {
        let repos = repositories_from_profile(&sample_data()).unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["folio", "big"]);
        assert_eq!(repos[0].language.as_deref(), Some("Rust"));
        assert!(repos[1].language.is_none());
        assert_eq!(repos[1].stars, 99);
    }

    #[test]
    fn test_null_user() {
        assert!(repositories_from_profile(&json!({ "user": null })).is_err());
    }

    #[tokio::test]
    async fn test_fetch_profile_returns_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "Bearer t0ken")
            .match_body(Matcher::PartialJson(json!({ "variables": { "login": "octo" } })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": sample_data() }).to_string())
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let data = fetch_profile(&client, &config(server.url()), "t0ken")
            .await
            .unwrap();
        assert_eq!(data["user"]["login"], "octo");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_profile_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(401)
            .with_body(r#"{"message":"Bad credentials"}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let err = fetch_profile(&client, &config(server.url()), "bad")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_graphql_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":null,"errors":[{"message":"Could not resolve to a User"}]}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let err = fetch_profile(&client, &config(server.url()), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Payload { .. }));
        assert!(err.to_string().contains("Could not resolve"));
    }

    #[tokio::test]
    async fn test_missing_username() {
        let mut cfg = config("http://127.0.0.1:9".to_string());
        cfg.username = None;
        let err = fetch_profile(&reqwest::Client::new(), &cfg, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured { .. }));
    }
}
