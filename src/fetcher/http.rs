//! Cookie-authenticated HTTP client
//!
//! Every outbound request:
//!
//! 1. takes one permit from the shared [`RateLimiter`]
//! 2. carries `Cookie: sessionid=...; csrftoken=...`, `X-CSRFToken`,
//!    `X-IG-App-ID` and a desktop `User-Agent`
//! 3. runs under the [`RetryPolicy`], one permit per attempt
//! 4. is abandoned as soon as the [`CancelHandle`] fires
//!
//! The per-request timeout applies to each attempt, not to the retry loop.

use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, COOKIE, REFERER, RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client, Response};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::models::{FeedPage, FeedResponse};
use crate::auth::Account;
use crate::downloader::config::PAGE_SIZE;
use crate::downloader::rate_limit::RateLimiter;
use crate::downloader::retry::RetryPolicy;
use crate::error::{ScrapeError, ScrapeResult};
use crate::output::{ProfileLayout, TEMP_SUFFIX};
use crate::shutdown::CancelHandle;
use crate::{PageCursor, Username};

/// Production host
pub const DEFAULT_BASE_URL: &str = "https://www.instagram.com";

/// Profile feed endpoint
pub const PROFILE_ENDPOINT: &str = "/api/v1/users/web_profile_info/";

/// Web app id the endpoint expects
pub const APP_ID: &str = "936619743392459";

/// User agent sent when the account does not carry one
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed and image client bound to one account
#[derive(Debug, Clone)]
pub struct InstagramClient {
    http: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cancel: CancelHandle,
    request_timeout: Duration,
}

impl InstagramClient {
    /// Build a client carrying `account`'s cookies
    ///
    /// # Arguments
    /// * `account` - Session cookies and optional user agent
    /// * `limiter` - Shared rate limiter (one permit per attempt)
    /// * `retry` - Retry policy for every request
    /// * `cancel` - Root cancellation handle
    /// * `request_timeout` - Timeout for each individual attempt
    pub fn new(
        account: &Account,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        cancel: CancelHandle,
        request_timeout: Duration,
    ) -> ScrapeResult<Self> {
        let http = Client::builder()
            .default_headers(auth_headers(account)?)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ScrapeError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter,
            retry,
            cancel,
            request_timeout,
        })
    }

    /// Point the client at another host (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Host requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch one page of `username`'s feed starting at `cursor`.
    pub async fn fetch_page(
        &self,
        username: &Username,
        cursor: &PageCursor,
    ) -> ScrapeResult<FeedPage> {
        let label = if cursor.is_initial() {
            format!("{username} first page")
        } else {
            format!("{username} page after {}", cursor.as_query())
        };
        self.retry
            .run(&self.cancel, &label, |_| self.fetch_page_once(username, cursor))
            .await
    }

    async fn fetch_page_once(
        &self,
        username: &Username,
        cursor: &PageCursor,
    ) -> ScrapeResult<FeedPage> {
        self.limiter.acquire(1, &self.cancel).await?;

        let url = format!("{}{}", self.base_url, PROFILE_ENDPOINT);
        let mut query = vec![
            ("username", username.to_string()),
            ("count", PAGE_SIZE.to_string()),
        ];
        if !cursor.is_initial() {
            query.push(("max_id", cursor.as_query().to_string()));
        }

        let request = self
            .http
            .get(&url)
            .query(&query)
            .header(ACCEPT, "application/json")
            .header(REFERER, format!("{}/{username}/", self.base_url))
            .header("X-Requested-With", "XMLHttpRequest")
            .timeout(self.request_timeout);

        let response = self.cancellable(request.send()).await??;
        let response = check_status(response, username.as_str()).await?;
        let body = self.cancellable(response.text()).await??;

        let parsed: FeedResponse = serde_json::from_str(&body)
            .map_err(|e| ScrapeError::Parse(format!("feed response: {e}")))?;
        if parsed.is_rate_limited() {
            return Err(ScrapeError::RateLimited { retry_after: None });
        }

        let user = parsed
            .data
            .and_then(|d| d.user)
            .ok_or_else(|| ScrapeError::NotFound(format!("profile '{username}'")))?;
        if user.is_private && user.edge_owner_to_timeline_media.edges.is_empty() {
            debug!(username = %username, "Profile is private and not followed");
        }

        let page = FeedPage::from(user.edge_owner_to_timeline_media);
        debug!(
            username = %username,
            items = page.items.len(),
            has_next_page = page.cursor.has_next_page,
            "Fetched feed page"
        );
        Ok(page)
    }

    /// Download `url` to `dest`, streaming through a temp file in the same
    /// directory that is renamed into place only once the body is complete.
    ///
    /// Returns the number of bytes written.
    pub async fn download_to(&self, url: &str, dest: &Path, label: &str) -> ScrapeResult<u64> {
        self.retry
            .run(&self.cancel, label, |_| self.download_once(url, dest))
            .await
    }

    async fn download_once(&self, url: &str, dest: &Path) -> ScrapeResult<u64> {
        self.limiter.acquire(1, &self.cancel).await?;

        let request = self.http.get(url).timeout(self.request_timeout);
        let response = self.cancellable(request.send()).await??;
        let response = check_status(response, url).await?;

        self.cancellable(write_body(response, dest)).await?
    }

    async fn cancellable<F: Future>(&self, fut: F) -> ScrapeResult<F::Output> {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
        }
    }
}

/// Stream a response body into `dest` via a temp file.
///
/// The temp file is removed on every error path.
async fn write_body(response: Response, dest: &Path) -> ScrapeResult<u64> {
    let dir = dest
        .parent()
        .ok_or_else(|| ScrapeError::Io(format!("{} has no parent directory", dest.display())))?;
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");

    let temp = tempfile::Builder::new()
        .prefix(&ProfileLayout::temp_prefix(stem))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    if written == 0 {
        return Err(ScrapeError::Network("empty response body".to_string()));
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    temp_path
        .persist(dest)
        .map_err(|e| ScrapeError::Io(format!("failed to rename into {}: {}", dest.display(), e.error)))?;
    Ok(written)
}

/// Map non-success statuses onto the error taxonomy.
///
/// A redirect to the login page means the session is no longer valid.
async fn check_status(response: Response, context: &str) -> ScrapeResult<Response> {
    if response.url().path().starts_with("/accounts/login") {
        return Err(ScrapeError::AuthInvalid { status: 401 });
    }

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    if status.as_u16() == 400 || status.as_u16() == 429 {
        // The soft rate limit arrives as a 400 with a JSON body
        let body = response.text().await.unwrap_or_default();
        let soft_limit = serde_json::from_str::<FeedResponse>(&body)
            .map(|r| r.is_rate_limited())
            .unwrap_or(false);
        if status.as_u16() == 429 || soft_limit {
            warn!(status = status.as_u16(), ?retry_after, "Rate limited by server");
            return Err(ScrapeError::RateLimited { retry_after });
        }
    }

    Err(ScrapeError::from_status(status.as_u16(), retry_after, context))
}

/// `Retry-After` as delta-seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Session headers attached to every request
fn auth_headers(account: &Account) -> ScrapeResult<HeaderMap> {
    let invalid = |field: &str| {
        ScrapeError::AuthRequired(format!("{field} contains characters not allowed in a header"))
    };

    let mut cookie = HeaderValue::from_str(&format!(
        "sessionid={}; csrftoken={}",
        account.session_id, account.csrf_token
    ))
    .map_err(|_| invalid("session cookie"))?;
    cookie.set_sensitive(true);

    let mut csrf = HeaderValue::from_str(&account.csrf_token).map_err(|_| invalid("CSRF token"))?;
    csrf.set_sensitive(true);

    let user_agent = account.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    let user_agent = HeaderValue::from_str(user_agent).map_err(|_| invalid("user agent"))?;

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, cookie);
    headers.insert(HeaderName::from_static("x-csrftoken"), csrf);
    headers.insert(
        HeaderName::from_static("x-ig-app-id"),
        HeaderValue::from_static(APP_ID),
    );
    headers.insert(USER_AGENT, user_agent);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_parse_retry_after_date_in_past() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_missing_or_garbage() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_auth_headers() {
        let account = Account::new("me", "sid123", "csrf456");
        let headers = auth_headers(&account).unwrap();
        assert_eq!(headers[COOKIE], "sessionid=sid123; csrftoken=csrf456");
        assert!(headers[COOKIE].is_sensitive());
        assert_eq!(headers["x-csrftoken"], "csrf456");
        assert_eq!(headers["x-ig-app-id"], APP_ID);
        assert_eq!(headers[USER_AGENT], DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_auth_headers_reject_newlines() {
        let account = Account::new("me", "sid\r\ninjected", "csrf");
        assert!(matches!(
            auth_headers(&account),
            Err(ScrapeError::AuthRequired(_))
        ));
    }
}
