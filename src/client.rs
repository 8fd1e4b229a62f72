use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::portfolio::{duplicate_tickers, Holding, Portfolio};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("duplicate tickers in submission: {0:?}")]
    DuplicateTickers(Vec<String>),
    #[error("team_api_code is not a valid header value")]
    InvalidToken,
}

/// Challenge server client. One attempt per call, bounded by the configured timeout.
pub struct PrismClient {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl PrismClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(config.team_api_code.trim())
            .map_err(|_| ClientError::InvalidToken)?;
        headers.insert("X-API-Code", token);

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            headers,
        })
    }

    async fn send_get_request(&self, path: &str) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;
        Self::read_body(resp).await
    }

    async fn send_post_request<T: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &T,
    ) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let mut headers = self.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(data)
            .send()
            .await?;
        Self::read_body(resp).await
    }

    /// Only a 200 counts as success; any other status is surfaced with its body.
    async fn read_body(resp: reqwest::Response) -> Result<String, ClientError> {
        let status = resp.status();
        let text = resp.text().await?;
        if status != StatusCode::OK {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    pub async fn fetch_team_info(&self) -> Result<String, ClientError> {
        self.send_get_request("/info").await
    }

    pub async fn fetch_context(&self) -> Result<String, ClientError> {
        self.send_get_request("/request").await
    }

    pub async fn submit_portfolio(&self, portfolio: &Portfolio) -> Result<String, ClientError> {
        self.submit_holdings(portfolio.holdings()).await
    }

    /// POST `/submit` with `[{"ticker", "quantity"}, ...]`. Duplicates are refused locally.
    pub async fn submit_holdings(&self, holdings: &[Holding]) -> Result<String, ClientError> {
        let dups = duplicate_tickers(holdings);
        if !dups.is_empty() {
            return Err(ClientError::DuplicateTickers(dups));
        }
        self.send_post_request("/submit", holdings).await
    }
}
