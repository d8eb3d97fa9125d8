use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use super::{ContentItem, ContentSource, SearchQuery, SourceError};

/// Public RedGifs API root.
pub const DEFAULT_BASE_URL: &str = "https://api.redgifs.com/v2";

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Refresh the token this many seconds before its `exp` claim.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 30;

struct AccessToken {
    secret: Arc<SecretString>,
    /// Unix seconds, from the JWT `exp` claim
    expires_at: i64,
}

impl AccessToken {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at.saturating_sub(TOKEN_EXPIRY_SKEW_SECS)
    }
}

/// [`ContentSource`] backed by the RedGifs v2 HTTP API.
///
/// Obtains a temporary bearer token on first use and transparently renews it
/// when it expires or the API answers 401.
pub struct RedgifsClient {
    http: reqwest::Client,
    base_url: Url,
    token: Mutex<Option<AccessToken>>,
    retry_backoff: Duration,
}

/// Masks the bearer token
impl std::fmt::Debug for RedgifsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedgifsClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct TokenClaims {
    exp: i64,
}

#[derive(Deserialize)]
struct GifsResponse {
    gifs: Vec<GifEntry>,
}

#[derive(Deserialize)]
struct GifEntry {
    id: String,
    #[serde(rename = "userName", default)]
    user_name: String,
    #[serde(rename = "createDate", default)]
    create_date: Option<i64>,
    #[serde(default)]
    urls: GifUrls,
    /// Present (non-null) on promoted entries
    #[serde(default)]
    cta: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct GifUrls {
    #[serde(default)]
    sd: Option<String>,
    #[serde(default)]
    hd: Option<String>,
}

impl RedgifsClient {
    /// Create a client against `base_url` (normally [`DEFAULT_BASE_URL`]).
    ///
    /// Plain HTTP is accepted only for localhost, so the bearer token never
    /// crosses the network unencrypted.
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, SourceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::Malformed(format!("invalid base URL: {e}")))?;

        match base_url.scheme() {
            "https" => {}
            "http" if matches!(base_url.host_str(), Some("localhost" | "127.0.0.1")) => {
                tracing::warn!(base_url = %base_url, "Using non-HTTPS API base URL (localhost only)");
            }
            _ => {
                tracing::error!(base_url = %base_url, "Rejecting non-HTTPS base URL");
                return Err(SourceError::InsecureBaseUrl);
            }
        }

        Ok(Self {
            http,
            base_url,
            token: Mutex::new(None),
            retry_backoff: Duration::from_secs(2),
        })
    }

    /// Base delay for 429/5xx retries; doubles on each attempt.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Longest a single request can take through every retry, given the
    /// HTTP client's per-attempt timeout. Token acquisition is not included.
    pub fn retry_budget(&self, per_attempt: Duration) -> Duration {
        let backoff_total = self.retry_backoff * (2u32.pow(MAX_RETRIES) - 1);
        per_attempt * (MAX_RETRIES + 1) + backoff_total
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Malformed("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn search_url(&self, query: &SearchQuery, count: u32, page: u32) -> Result<Url, SourceError> {
        let mut url = match query {
            SearchQuery::Tags(_) => self.endpoint(&["gifs", "search"])?,
            SearchQuery::Creator(username) => self.endpoint(&["users", username.as_str(), "search"])?,
        };

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("type", "g");
            match query {
                SearchQuery::Tags(tags) => {
                    pairs
                        .append_pair("order", "latest")
                        .append_pair("page", &page.to_string())
                        .append_pair("count", &count.to_string())
                        .append_pair("tags", &tags.join("|"));
                }
                SearchQuery::Creator(_) => {
                    pairs
                        .append_pair("order", "new")
                        .append_pair("page", &page.to_string())
                        .append_pair("count", &count.to_string());
                }
            }
        }
        Ok(url)
    }

    /// Current bearer token, logging in first if there is none or it expired.
    async fn bearer(&self) -> Result<Arc<SecretString>, SourceError> {
        let mut guard = self.token.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(token) = guard.as_ref() {
            if !token.is_expired(now) {
                return Ok(Arc::clone(&token.secret));
            }
            tracing::debug!("Access token expired, renewing");
        }

        let token = self.login().await?;
        let secret = Arc::clone(&token.secret);
        *guard = Some(token);
        Ok(secret)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn login(&self) -> Result<AccessToken, SourceError> {
        let url = self.endpoint(&["auth", "temporary"])?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(SourceError::Auth(format!(
                "token request returned status {}",
                response.status().as_u16()
            )));
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        let body: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Auth(format!("invalid token response: {e}")))?;
        let expires_at = jwt_expiry(&body.token)?;

        tracing::info!(expires_at = expires_at, "Obtained temporary API token");
        Ok(AccessToken {
            secret: Arc::new(SecretString::from(body.token)),
            expires_at,
        })
    }

    /// GET with bearer auth, retrying 429 and 5xx with exponential backoff.
    async fn get_with_retry(&self, url: &Url, token: &SecretString) -> Result<Vec<u8>, SourceError> {
        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .get(url.clone())
                .header(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token.expose_secret()),
                )
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status.is_server_error() {
                        SourceError::HttpStatus(status.as_u16())
                    } else {
                        SourceError::RateLimited(MAX_RETRIES)
                    });
                }

                let delay = self.retry_backoff * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Search request throttled or failed, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(SourceError::HttpStatus(status.as_u16()));
            }

            return read_limited_bytes(response, MAX_RESPONSE_SIZE).await;
        }
    }
}

#[async_trait]
impl ContentSource for RedgifsClient {
    async fn search(
        &self,
        query: &SearchQuery,
        count: u32,
        page: u32,
    ) -> Result<Vec<ContentItem>, SourceError> {
        let url = self.search_url(query, count, page)?;
        let mut renewed = false;

        let bytes = loop {
            let token = self.bearer().await?;
            match self.get_with_retry(&url, &token).await {
                Err(SourceError::HttpStatus(401)) if !renewed => {
                    tracing::debug!("Token rejected, logging in again");
                    self.invalidate_token().await;
                    renewed = true;
                }
                other => break other?,
            }
        };

        let items = parse_page(&bytes, chrono::Utc::now().timestamp())?;
        tracing::debug!(query = ?query, page = page, items = items.len(), "Fetched search page");
        Ok(items)
    }
}

/// Extract the `exp` claim from a JWT without verifying it.
fn jwt_expiry(token: &str) -> Result<i64, SourceError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(SourceError::Auth("invalid JWT format".to_string()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| SourceError::Auth(format!("failed to decode JWT payload: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&payload)
        .map_err(|e| SourceError::Auth(format!("failed to parse JWT claims: {e}")))?;
    Ok(claims.exp)
}

/// Decode a search page, skipping promoted entries and preferring the SD rendition.
fn parse_page(bytes: &[u8], now: i64) -> Result<Vec<ContentItem>, SourceError> {
    let response: GifsResponse =
        serde_json::from_slice(bytes).map_err(|e| SourceError::Malformed(e.to_string()))?;

    Ok(response
        .gifs
        .into_iter()
        .filter(|gif| gif.cta.is_none())
        .map(|gif| {
            let url = [gif.urls.sd, gif.urls.hd]
                .into_iter()
                .flatten()
                .find(|u| !u.is_empty());
            ContentItem {
                id: gif.id,
                url,
                author: gif.user_name,
                created_at: gif.create_date.unwrap_or(now),
            }
        })
        .collect())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(SourceError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("e30.{payload}.sig")
    }

    #[test]
    fn test_jwt_expiry_decodes_claim() {
        assert_eq!(jwt_expiry(&jwt_with_exp(1_900_000_000)).unwrap(), 1_900_000_000);
    }

    #[test]
    fn test_jwt_expiry_rejects_bad_format() {
        assert!(matches!(jwt_expiry("not-a-jwt"), Err(SourceError::Auth(_))));
        assert!(matches!(jwt_expiry("a.!!!.c"), Err(SourceError::Auth(_))));
    }

    #[test]
    fn test_token_expiry_includes_skew() {
        let token = AccessToken {
            secret: Arc::new(SecretString::from("t".to_string())),
            expires_at: 1_000,
        };
        assert!(!token.is_expired(1_000 - TOKEN_EXPIRY_SKEW_SECS - 1));
        assert!(token.is_expired(1_000 - TOKEN_EXPIRY_SKEW_SECS));
    }

    #[test]
    fn test_parse_page_prefers_sd_and_skips_adverts() {
        let body = br#"{"gifs":[
            {"id":"a","userName":"alice","createDate":100,"urls":{"sd":"https://m/a-sd.mp4","hd":"https://m/a-hd.mp4"},"cta":null},
            {"id":"ad","userName":"brand","createDate":99,"urls":{"sd":"https://m/ad.mp4"},"cta":{"showReason":"promo"}},
            {"id":"b","userName":"bob","createDate":98,"urls":{"sd":"","hd":"https://m/b-hd.mp4"}},
            {"id":"c","userName":"carol","createDate":97,"urls":{}}
        ]}"#;

        let items = parse_page(body, 0).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(items[0].url.as_deref(), Some("https://m/a-sd.mp4"));
        assert_eq!(items[1].url.as_deref(), Some("https://m/b-hd.mp4"));
        assert_eq!(items[2].url, None);
        assert_eq!(items[0].author, "alice");
        assert_eq!(items[0].created_at, 100);
    }

    #[test]
    fn test_parse_page_missing_create_date_uses_now() {
        let body = br#"{"gifs":[{"id":"a","userName":"alice","urls":{"sd":"https://m/a.mp4"}}]}"#;
        let items = parse_page(body, 12345).unwrap();
        assert_eq!(items[0].created_at, 12345);
    }

    #[test]
    fn test_parse_page_malformed() {
        assert!(matches!(
            parse_page(b"{\"nope\":1}", 0),
            Err(SourceError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_insecure_base_url() {
        let err = RedgifsClient::new(reqwest::Client::new(), "http://api.example.com/v2").unwrap_err();
        assert!(matches!(err, SourceError::InsecureBaseUrl));
        assert!(RedgifsClient::new(reqwest::Client::new(), "http://127.0.0.1:8080").is_ok());
    }

    #[test]
    fn test_search_urls() {
        let client = RedgifsClient::new(reqwest::Client::new(), DEFAULT_BASE_URL).unwrap();

        let url = client
            .search_url(
                &SearchQuery::Tags(vec!["cats".to_string(), "dogs".to_string()]),
                20,
                2,
            )
            .unwrap();
        assert_eq!(url.path(), "/v2/gifs/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("order".to_string(), "latest".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("count".to_string(), "20".to_string())));
        assert!(pairs.contains(&("tags".to_string(), "cats|dogs".to_string())));

        let url = client
            .search_url(&SearchQuery::Creator("some one".to_string()), 20, 1)
            .unwrap();
        assert_eq!(url.path(), "/v2/users/some%20one/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("order".to_string(), "new".to_string())));
    }

    #[test]
    fn test_debug_masks_token() {
        let client = RedgifsClient::new(reqwest::Client::new(), DEFAULT_BASE_URL).unwrap();
        let debug_output = format!("{:?}", client);
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_retry_budget_counts_every_attempt_and_backoff() {
        let client = RedgifsClient::new(reqwest::Client::new(), DEFAULT_BASE_URL).unwrap();
        // 4 attempts of 20s, plus 2s + 4s + 8s of backoff
        assert_eq!(client.retry_budget(Duration::from_secs(20)), Duration::from_secs(94));

        let fast = client.with_retry_backoff(Duration::from_millis(1));
        assert_eq!(
            fast.retry_budget(Duration::from_secs(1)),
            Duration::from_secs(4) + Duration::from_millis(7)
        );
    }
}
