use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::StoreError;
use crate::timestamps::decode;
use crate::timestamps::ChapterTimestamps;

const USER_AGENT: &str = "readalong/0.1";

/// What the timestamp endpoint said about a chapter
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterFetch {
    Available(ChapterTimestamps),
    /// The server has no timestamps for this chapter
    NoTimestamps,
}

/// Network access to per-chapter timestamps (allows mocking for tests)
#[async_trait::async_trait]
pub trait TimestampClient: Send + Sync {
    async fn fetch_chapter(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Result<ChapterFetch, StoreError>;
}

/// Timestamp endpoint response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimestampResponse {
    #[serde(default, deserialize_with = "decode::default_on_error")]
    timestamps: Option<ChapterTimestamps>,
    #[serde(default, deserialize_with = "decode::default_on_error")]
    no_timestamps: bool,
}

#[derive(Clone)]
pub struct HttpTimestampClient {
    client: Client,
    base_url: String,
}

impl HttpTimestampClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chapter_url(&self, audiobook_id: &str, chapter_number: u32) -> String {
        format!(
            "{}/audiobooks/{}/chapters/{}/timestamps",
            self.base_url,
            urlencoding::encode(audiobook_id),
            chapter_number
        )
    }
}

#[async_trait::async_trait]
impl TimestampClient for HttpTimestampClient {
    async fn fetch_chapter(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Result<ChapterFetch, StoreError> {
        let url = self.chapter_url(audiobook_id, chapter_number);
        debug!(%url, "Fetching chapter timestamps");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(ChapterFetch::NoTimestamps);
        }
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: TimestampResponse = serde_json::from_slice(&body)?;
        match parsed.timestamps {
            Some(timestamps) if !parsed.no_timestamps => Ok(ChapterFetch::Available(timestamps)),
            _ => Ok(ChapterFetch::NoTimestamps),
        }
    }
}
