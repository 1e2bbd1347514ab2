//! Redirect-aware HTTP relay.
//!
//! Upstream APIs under error conditions sometimes answer with an HTML page,
//! or redirect to one, instead of the documented JSON. [`RelayClient`]
//! follows redirects itself, refuses to follow redirects into error pages and
//! classifies every terminal response once, so callers only deal with
//! [`ResponseBody`] variants.

use std::{sync::Arc, time::Duration};

use reqwest::{
    Method, StatusCode,
    header::{CONTENT_TYPE, LOCATION},
    redirect::Policy,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Follow-up hops allowed after the initial request.
pub const MAX_REDIRECTS: usize = 5;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("too many redirects (more than {limit})")]
    TooManyRedirects { limit: usize },

    #[error("redirect to error page: {location}. Response: {excerpt}")]
    RedirectToErrorPage { location: String, excerpt: String },

    #[error("invalid redirect target {location:?}: {source}")]
    InvalidRedirect {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API returned HTML instead of JSON: {excerpt}")]
    HtmlResponse { excerpt: String },

    #[error("invalid JSON response: {excerpt}")]
    InvalidJson { excerpt: String },
}

/// Decides whether a redirect target looks like an HTML error page.
#[derive(Debug, Clone)]
pub struct ErrorPageMatcher {
    markers: Vec<String>,
}

impl ErrorPageMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|marker| !marker.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, location: &str) -> bool {
        self.markers
            .iter()
            .any(|marker| location.contains(marker.as_str()))
    }

    pub fn default_markers() -> Vec<String> {
        vec![".html".to_string(), "/error".to_string()]
    }
}

impl Default for ErrorPageMatcher {
    fn default() -> Self {
        Self::new(Self::default_markers())
    }
}

/// A single upstream call. Header names are unique (case-insensitively) and
/// keep the case they were given.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    url: Url,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl RelayRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Sets a header, replacing any existing header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    pub fn json(self, value: &Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Body of a terminal response, classified once when it arrives.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json { value: Value, raw: String },
    Raw(String),
    Unparseable { raw: String, diagnostic: String },
}

impl ResponseBody {
    pub fn text(&self) -> &str {
        match self {
            Self::Json { raw, .. } | Self::Raw(raw) | Self::Unparseable { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    success: bool,
    status: StatusCode,
    status_text: String,
    body: ResponseBody,
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn text(&self) -> &str {
        self.body.text()
    }

    pub fn json(&self) -> Result<&Value, RelayError> {
        match &self.body {
            ResponseBody::Json { value, .. } => Ok(value),
            ResponseBody::Raw(raw) => Err(RelayError::InvalidJson {
                excerpt: excerpt(raw),
            }),
            ResponseBody::Unparseable { diagnostic, .. } => Err(RelayError::HtmlResponse {
                excerpt: diagnostic.clone(),
            }),
        }
    }

    pub fn into_json(self) -> Result<Value, RelayError> {
        match self.body {
            ResponseBody::Json { value, .. } => Ok(value),
            ResponseBody::Raw(raw) => Err(RelayError::InvalidJson {
                excerpt: excerpt(&raw),
            }),
            ResponseBody::Unparseable { diagnostic, .. } => Err(RelayError::HtmlResponse {
                excerpt: diagnostic,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub timeout: Duration,
    pub error_pages: ErrorPageMatcher,
    pub max_redirects: usize,
    pub use_system_proxy: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            error_pages: ErrorPageMatcher::default(),
            max_redirects: MAX_REDIRECTS,
            use_system_proxy: true,
        }
    }
}

/// Stateless relay; clones share one connection pool and may be used
/// concurrently.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    error_pages: Arc<ErrorPageMatcher>,
    max_redirects: usize,
}

impl RelayClient {
    pub fn new(options: RelayOptions) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(options.timeout);
        if !options.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            http: builder.build()?,
            error_pages: Arc::new(options.error_pages),
            max_redirects: options.max_redirects,
        })
    }

    /// Sends `request`, following redirects with the same method, headers and
    /// body until a terminal response arrives.
    pub async fn send(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let RelayRequest {
            mut url,
            method,
            headers,
            body,
        } = request;
        let mut depth = 0;

        loop {
            if depth > self.max_redirects {
                warn!("Upstream redirect chain exceeded {} hops at {}", self.max_redirects, url);
                return Err(RelayError::TooManyRedirects {
                    limit: self.max_redirects,
                });
            }

            debug!("Relaying {} {} (hop {})", method, url, depth);
            let mut builder = self.http.request(method.clone(), url.clone());
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let status = response.status();
            let location = if status.is_redirection() {
                response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(ToString::to_string)
            } else {
                None
            };

            if let Some(location) = location {
                if self.error_pages.matches(&location) {
                    let drained = response.text().await.unwrap_or_default();
                    warn!("Upstream redirected to error page {location}");
                    return Err(RelayError::RedirectToErrorPage {
                        location,
                        excerpt: excerpt(&drained),
                    });
                }

                let next = url
                    .join(&location)
                    .map_err(|source| RelayError::InvalidRedirect {
                        location: location.clone(),
                        source,
                    })?;
                info!("Following redirect {} to: {}", status.as_u16(), next);
                url = next;
                depth += 1;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);
            let raw = response.text().await?;

            return Ok(classify(status, content_type.as_deref(), raw));
        }
    }
}

/// Classifies a terminal response. A 2xx answer carrying markup is reported
/// as a failed 500.
pub fn classify(status: StatusCode, content_type: Option<&str>, raw: String) -> RelayResponse {
    if status.is_success() && looks_like_markup(&raw, content_type) {
        warn!("Upstream returned HTML with status {}", status.as_u16());
        return RelayResponse {
            success: false,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            status_text: "HTML Response".to_string(),
            body: ResponseBody::Unparseable {
                diagnostic: excerpt(&raw),
                raw,
            },
        };
    }

    let body = match serde_json::from_str::<Value>(&raw) {
        Ok(value) => ResponseBody::Json { value, raw },
        Err(_) => ResponseBody::Raw(raw),
    };

    RelayResponse {
        success: status.is_success(),
        status,
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    }
}

pub fn looks_like_markup(body: &str, content_type: Option<&str>) -> bool {
    let trimmed = body.trim_start();
    let prefix: String = trimmed.chars().take(16).collect::<String>().to_ascii_lowercase();

    prefix.starts_with("<!doctype")
        || prefix.starts_with("<html")
        || prefix.starts_with("<meta")
        || body.contains("<html")
        || content_type.is_some_and(|value| value.to_ascii_lowercase().contains("text/html"))
}

/// First characters of `body`, for diagnostics.
pub fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_CHARS).collect()
}
