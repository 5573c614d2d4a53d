// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of notices to the collector.
//!
//! Every payload is a single JSON `POST` to `<endpoint>/v1/notices`. The response status is
//! mapped onto [`TransportError`] so the delivery worker can apply backoff. Nothing is retried
//! here: retries are the worker's throttle.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::config::Config;
use crate::constants::{NOTICES_PATH, NOTIFIER_NAME, NOTIFIER_VERSION};
use crate::error::TransportError;
use crate::transport::{Response, Transport};

// Header names must be lower-case to be used as static names
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let url = format!("{}{NOTICES_PATH}", config.endpoint.trim_end_matches('/'));
        Self {
            client: get_client(config),
            url,
            headers: build_headers(config.api_key.as_deref()),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &serde_json::Value) -> Result<Response, TransportError> {
        let time = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        debug!(
            "Collector answered {} in {} ms",
            status,
            time.elapsed().as_millis()
        );

        if status.is_success() {
            // An unreadable body still means the notice was accepted
            let body = response.bytes().await.unwrap_or_default();
            return Ok(parse_body(&body));
        }
        Err(status_error(status))
    }
}

fn status_error(status: StatusCode) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized,
        StatusCode::UNPROCESSABLE_ENTITY => TransportError::Validation,
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
        status if status.is_server_error() => TransportError::ServerError(status.as_u16()),
        status => TransportError::Http(status.as_u16()),
    }
}

fn parse_body(body: &[u8]) -> Response {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Response::new(),
    }
}

fn build_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Ok(agent) = HeaderValue::from_str(&format!("{NOTIFIER_NAME}/{NOTIFIER_VERSION}")) {
        headers.insert(USER_AGENT, agent);
    }
    match api_key.map(HeaderValue::from_str) {
        Some(Ok(value)) => {
            headers.insert(API_KEY_HEADER, value);
        }
        Some(Err(e)) => error!("API key is not a valid header value: {}", e),
        // The collector answers 401, which the worker logs on every send
        None => error!("No API key configured, notices will be rejected"),
    }
    headers
}

/// Creates the HTTP client, falling back to a direct connection when the proxy is invalid.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &Config, allow_proxy: bool) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}
