//! Generic JSON-over-HTTP publisher.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::core::adapt::AdaptedContent;
use crate::core::dispatcher::{Credential, PlatformPublisher, PublishError, PublishReceipt};
use crate::core::ExternalErrorKind;
use crate::util::Platform;

/// Longest error body kept in a failure message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(alias = "post_id", alias = "external_id")]
    id: String,
    #[serde(default, alias = "permalink")]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

/// Read a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success response to a [`PublishError`].
#[must_use]
pub fn classify_failure(status: u16, body: &str, retry_after: Option<Duration>) -> PublishError {
    let kind = ExternalErrorKind::from_http_status(status).unwrap_or(ExternalErrorKind::Terminal);
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    PublishError::new(kind, format!("HTTP {status}: {body}")).with_retry_after(retry_after)
}

fn classify_transport(err: &reqwest::Error) -> PublishError {
    let what = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    PublishError::new(ExternalErrorKind::Transient, format!("{what}: {err}"))
}

/// Posts adapted content as JSON to a platform endpoint with a bearer token.
///
/// The endpoint answers with `{"id": ..., "url": ...}` on success. Status
/// codes are classified by [`ExternalErrorKind::from_http_status`].
pub struct HttpPublisher {
    platform: Platform,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPublisher {
    /// Publisher for `platform` posting to `endpoint`.
    pub fn new(platform: Platform, endpoint: impl Into<String>) -> Self {
        Self::with_client(platform, endpoint, reqwest::Client::new())
    }

    /// Same as [`Self::new`] with a preconfigured client.
    pub fn with_client(platform: Platform, endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            platform,
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl PlatformPublisher for HttpPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        content: &AdaptedContent,
        credential: &Credential,
    ) -> Result<PublishReceipt, PublishError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.access_token.expose_secret())
            .json(&serde_json::json!({
                "platform": self.platform,
                "text": content.text,
            }))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(platform = %self.platform, status = status.as_u16(), "platform rejected post");
            return Err(classify_failure(status.as_u16(), &body, retry_after));
        }

        // The post may exist even if the body is unreadable; never retry it.
        let body: PublishResponse = resp.json().await.map_err(|e| {
            PublishError::new(
                ExternalErrorKind::Terminal,
                format!("unreadable success response: {e}"),
            )
        })?;
        Ok(PublishReceipt {
            external_id: body.id,
            url: body.url,
            published_at: body.published_at,
        })
    }
}
