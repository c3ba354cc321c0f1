//! The HTTP transport: one `request` primitive, retried with linear backoff on transient
//! connection failure (spec.md §4.A).

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::error::TransportError;

/// Basic-auth credentials, attached to a request when supplied (spec.md §4.A).
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// Either a pre-formatted query string or a map to be URL-encoded as `k=v&...`
/// (spec.md §4.A: "user arguments may be either a dict ... or an already-formatted string").
#[derive(Debug, Clone)]
pub enum QueryArgs {
    Map(HashMap<String, String>),
    Formatted(String),
}

impl QueryArgs {
    fn into_query_string(self) -> String {
        match self {
            QueryArgs::Map(map) => {
                let mut pairs: Vec<String> = map
                    .into_iter()
                    .map(|(key, val)| format!("{}={}", key, val))
                    .collect();
                pairs.sort();
                pairs.join("&")
            }
            QueryArgs::Formatted(s) => s,
        }
    }
}

/// Authenticated HTTP request/response against a peer, with retry/backoff.
///
/// One `Transport` is shared across all requests for a given peer base URL; it holds no
/// per-session state of its own.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: Url,
}

impl Transport {
    pub fn new(base_url: Url) -> Self {
        Transport {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Compose `base_url + endpoint + (lookup + '/')?`, per spec.md §4.A.
    fn build_url(&self, endpoint: &str, lookup: Option<&str>) -> Result<Url, TransportError> {
        let mut url = self.base_url.join(endpoint)?;
        if let Some(lookup) = lookup {
            let mut path = url.path().trim_end_matches('/').to_string();
            path.push('/');
            path.push_str(lookup);
            path.push('/');
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Issue a request against `endpoint`, retrying up to `max_retries` times with a linearly
    /// increasing sleep of `timeout * attempt` seconds between attempts on transient connection
    /// failure. A non-2xx HTTP status is surfaced immediately as
    /// [`TransportError::HttpStatus`] and is *not* retried (spec.md §4.A).
    #[allow(clippy::too_many_arguments)]
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        method: Method,
        lookup: Option<&str>,
        body: Option<&B>,
        query: Option<QueryArgs>,
        basic_auth: Option<BasicAuth>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<reqwest::Response, TransportError> {
        let mut url = self.build_url(endpoint, lookup)?;
        if let Some(query) = query {
            let query_string = query.into_query_string();
            if !query_string.is_empty() {
                url.set_query(Some(&query_string));
            }
        }

        for attempt in 0..max_retries {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(BasicAuth { username, password }) = &basic_auth {
                request = request.basic_auth(username, password.as_deref());
            }

            match request.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::HttpStatus { status, body });
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    warn!(
                        attempt,
                        max_retries, "transient connection failure, retrying: {}", err
                    );
                    tokio::time::sleep(timeout * attempt).await;
                    continue;
                }
                Err(err) => return Err(TransportError::Reqwest(err)),
            }
        }

        Err(TransportError::ConnectionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_lookup_with_trailing_slash() {
        let transport = Transport::new(Url::parse("https://peer.example/api/").unwrap());
        let url = transport
            .build_url("transfersessions", Some("abc-123"))
            .unwrap();
        assert_eq!(url.path(), "/api/transfersessions/abc-123/");
    }

    #[test]
    fn build_url_without_lookup() {
        let transport = Transport::new(Url::parse("https://peer.example/api/").unwrap());
        let url = transport.build_url("nonces", None).unwrap();
        assert_eq!(url.path(), "/api/nonces");
    }
}
