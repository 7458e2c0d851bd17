use reqwest::Client;
use tracing::trace;

use cipherroom_types::{ApiEnvelope, HistoryPage, HistoryQuery};

use crate::config::SyncConfig;
use crate::error::{FetchError, classify_http_status};
use crate::fetcher::HistorySource;

/// History read API over HTTP:
/// `GET {base}/rooms/{room_id}/messages?pageSize=N[&cursor=<RFC 3339>]`
/// answered with `{ "data": HistoryPage }` or `{ "error": "..." }`.
pub struct HttpHistorySource {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpHistorySource {
    pub fn new(
        base_url: &str,
        room_id: &str,
        token: Option<String>,
        config: &SyncConfig,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rooms/{}/messages", base_url.trim_end_matches('/'), room_id),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl HistorySource for HttpHistorySource {
    async fn fetch(&self, query: HistoryQuery) -> Result<HistoryPage, FetchError> {
        let mut request = self.client.get(&self.endpoint).query(&query.query_pairs());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("history request failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("history response interrupted: {}", e)))?;
        trace!(status = status.as_u16(), bytes = body.len(), "history response received");

        if !status.is_success() {
            let detail = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(classify_http_status(status.as_u16(), detail));
        }

        let envelope: ApiEnvelope<HistoryPage> = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Protocol(format!("undecodable history page: {}", e)))?;

        envelope.into_result().map_err(FetchError::Protocol)
    }
}
