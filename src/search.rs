use std::collections::HashSet;

use eyre::{Result, bail};
use log::debug;
use serde::Deserialize;

use crate::config::Config;

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const PAGE_SIZE: &str = "50";

/// Credentials for the YouTube Data API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OAuth access token obtained outside this tool
    AccessToken(String),
    ApiKey(String),
}

impl Credentials {
    /// Resolve credentials from YOUTUBE_ACCESS_TOKEN, YOUTUBE_API_KEY, then the tool config
    pub fn resolve(config: &Config) -> Result<Self> {
        Self::from_sources(
            std::env::var("YOUTUBE_ACCESS_TOKEN").ok(),
            std::env::var("YOUTUBE_API_KEY").ok(),
            config.api_key.as_deref(),
        )
    }

    fn from_sources(token: Option<String>, api_key: Option<String>, config_key: Option<&str>) -> Result<Self> {
        let non_blank = |s: &String| !s.trim().is_empty();
        if let Some(token) = token.filter(non_blank) {
            return Ok(Credentials::AccessToken(token.trim().to_string()));
        }
        if let Some(key) = api_key.filter(non_blank) {
            return Ok(Credentials::ApiKey(key.trim().to_string()));
        }
        if let Some(key) = config_key.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(Credentials::ApiKey(key.to_string()));
        }
        bail!(
            "no YouTube API credentials found\n\n\
             Set YOUTUBE_ACCESS_TOKEN (OAuth bearer token) or YOUTUBE_API_KEY,\n\
             or add api_key to {}",
            crate::config::config_path().display()
        );
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchListResponse {
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub items: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub id: ResourceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceId {
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

/// Search videos matching `query`, optionally limited to one channel, following every result page
pub async fn search_videos(
    client: &reqwest::Client,
    credentials: &Credentials,
    query: &str,
    channel_id: Option<&str>,
) -> Result<Vec<String>> {
    collect_video_ids(|page_token| fetch_page(client, credentials, query, channel_id, page_token)).await
}

/// Drive a page fetcher until no continuation token comes back, keeping first-seen order
pub async fn collect_video_ids<F, Fut>(fetch_page: F) -> Result<Vec<String>>
where
    F: Fn(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<SearchListResponse>>,
{
    let mut video_ids = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut seen_tokens = HashSet::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = fetch_page(page_token.take()).await?;
        debug!("Search page returned {} items", page.items.len());

        for video_id in page.items.into_iter().filter_map(|item| item.id.video_id) {
            if seen_ids.insert(video_id.clone()) {
                video_ids.push(video_id);
            }
        }

        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                if !seen_tokens.insert(token.clone()) {
                    bail!("search API repeated page token {token}");
                }
                page_token = Some(token);
            }
            None => break,
        }
    }

    Ok(video_ids)
}

async fn fetch_page(
    client: &reqwest::Client,
    credentials: &Credentials,
    query: &str,
    channel_id: Option<&str>,
    page_token: Option<String>,
) -> Result<SearchListResponse> {
    let mut params: Vec<(&str, &str)> = vec![
        ("part", "snippet"),
        ("type", "video"),
        ("maxResults", PAGE_SIZE),
        ("q", query),
    ];
    if let Some(channel_id) = channel_id {
        params.push(("channelId", channel_id));
    }
    if let Some(ref token) = page_token {
        params.push(("pageToken", token.as_str()));
    }

    debug!("Requesting search page (token={page_token:?})");

    let mut request = client.get(SEARCH_URL).query(&params);
    request = match credentials {
        Credentials::AccessToken(token) => request.bearer_auth(token),
        Credentials::ApiKey(key) => request.query(&[("key", key.as_str())]),
    };

    let resp = request.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("YouTube search API returned {status}: {body}");
    }

    Ok(resp.json().await?)
}
