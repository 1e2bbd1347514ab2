//! OpenSubtitles request shaping.
//!
//! Every upstream call carries the API key and the relay's own `User-Agent`,
//! which browsers are not allowed to set.

use serde_json::{Value, json};
use url::Url;

use crate::{
    config::Config,
    moviehash::MovieHash,
    relay::{RelayClient, RelayError, RelayRequest, RelayResponse},
};

pub const DEFAULT_BASE_URL: &str = "https://api.opensubtitles.com/api/v1";
pub const DEFAULT_USER_AGENT: &str = "SubtitleSearchApp v1.0.0";
pub const DEFAULT_LANGUAGES: &str = "en";

/// Parameters of a title search.
#[derive(Debug, Clone)]
pub struct TitleQuery<'a> {
    pub query: &'a str,
    pub year: Option<i64>,
    pub languages: &'a str,
}

#[derive(Debug, Clone)]
pub struct OpenSubtitles {
    relay: RelayClient,
    base_url: String,
    api_key: String,
    user_agent: String,
}

impl OpenSubtitles {
    pub fn new(relay: RelayClient, config: &Config) -> Self {
        Self {
            relay,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{path}", self.base_url))
    }

    fn authorized(&self, request: RelayRequest) -> RelayRequest {
        request
            .header("Api-Key", self.api_key.as_str())
            .header("Accept", "application/json")
            .header("User-Agent", self.user_agent.as_str())
    }

    /// `GET /subtitles` by title, best hash matches first.
    pub fn title_search_request(
        &self,
        query: &TitleQuery<'_>,
    ) -> Result<RelayRequest, url::ParseError> {
        let mut url = self.endpoint("subtitles")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("query", query.query)
                .append_pair("type", "movie")
                .append_pair("languages", query.languages)
                .append_pair("order_by", "moviehash_match")
                .append_pair("order_direction", "desc");
            if let Some(year) = query.year {
                pairs.append_pair("year", &year.to_string());
            }
        }

        Ok(self.authorized(RelayRequest::get(url)))
    }

    /// `GET /subtitles` restricted to exact movie hash matches.
    pub fn hash_search_request(
        &self,
        hash: MovieHash,
        languages: Option<&str>,
    ) -> Result<RelayRequest, url::ParseError> {
        let mut url = self.endpoint("subtitles")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("moviehash", &hash.to_string())
                .append_pair("moviehash_match", "only");
            if let Some(languages) = languages {
                pairs.append_pair("languages", languages);
            }
        }

        Ok(self.authorized(RelayRequest::get(url)))
    }

    /// `POST /download` with `{"file_id": ...}`.
    pub fn download_request(&self, file_id: &Value) -> Result<RelayRequest, url::ParseError> {
        let url = self.endpoint("download")?;
        Ok(self
            .authorized(RelayRequest::post(url))
            .json(&json!({ "file_id": file_id })))
    }

    pub async fn send(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        self.relay.send(request).await
    }
}
