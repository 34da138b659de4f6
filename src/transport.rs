use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::debug;

use crate::config;
use crate::error::TransportError;

/// How the hub should react to a reply's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The reply carries a batch to decode.
    Ok,
    /// The mesh has nothing more to say; polling ends successfully.
    NoContent,
    Failed(u16),
}

impl ReplyStatus {
    pub fn classify(code: u16) -> Self {
        match code {
            200 => ReplyStatus::Ok,
            204 => ReplyStatus::NoContent,
            other => ReplyStatus::Failed(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    /// Base64 text of the reply batch.
    pub body: String,
}

/// Exchanges one base64-encoded request batch for a reply.
pub trait Transport {
    fn send(&self, request: String) -> impl Future<Output = Result<Reply, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, config: &config::TransportConfig) -> Result<Self, TransportError> {
        let url = if url.is_empty() {
            config::DEFAULT_URL.to_string()
        } else {
            url.to_string()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(10)))
            .build()?;

        Ok(HttpTransport { client, url })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: String) -> Result<Reply, TransportError> {
        debug!("POST {} ({} base64 chars)", self.url, request.len());
        let response = self.client.post(&self.url).body(request).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Reply { status, body })
    }
}

pub fn encode_request(batch: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(batch)
}

/// Decode a reply body, ignoring any whitespace the server wrapped it in.
pub fn decode_reply(body: &str) -> Result<Vec<u8>, TransportError> {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(URL_SAFE_NO_PAD.decode(compact)?)
}
