//! Remote scan-job API.
//!
//! `JobApi` is the seam between the engine and the network: the reconciler,
//! exporter and automation cache only ever talk to a `dyn JobApi`, so tests
//! can count calls against a fake while the binary uses `HttpJobClient`.

use async_trait::async_trait;
use radar_proto::config::ServerConfig;
use radar_proto::protocol::{
    AutomationConfig, CacheInfo, ExportRequest, ExportResponse, JobAck, ScanParams, ScanStatus,
    Track,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{RadarError, Result};

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn start(&self, params: &ScanParams) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn status(&self) -> Result<ScanStatus>;
    async fn results(&self) -> Result<Vec<Track>>;
    async fn cache_info(&self) -> Result<CacheInfo>;
    async fn export(&self, request: &ExportRequest) -> Result<ExportResponse>;
    async fn automation_config(&self) -> Result<AutomationConfig>;
    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpJobClient {
    base_url: String,
    client: Client,
}

impl HttpJobClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("release-radar/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(&config.base_url, client))
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RadarError::Transport(format!("Request failed: {}", e)))?;
        decode(check_status(response).await?).await
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        debug!("POST {}", url);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RadarError::Transport(format!("Request failed: {}", e)))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!("Scan API error: {} - {}", status, body);
    Err(RadarError::Transport(format!(
        "API returned status: {} - {}",
        status, body
    )))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| RadarError::Transport(format!("Failed to read response: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| {
        RadarError::Transport(format!(
            "Failed to parse response: {} - Response: {}",
            e,
            text.chars().take(200).collect::<String>()
        ))
    })
}

/// Human-readable message from a rejection body: FastAPI-style `detail`
/// (string or list of `{msg}`), or a plain `message`.
pub(crate) fn rejection_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    match value.get("detail") {
        Some(Value::String(s)) => return s.clone(),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|i| i.get("msg").and_then(Value::as_str))
                .collect();
            if !msgs.is_empty() {
                return msgs.join("; ");
            }
        }
        _ => {}
    }
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Interpret a `POST start` acknowledgement.
pub(crate) fn interpret_start_ack(ack: &JobAck) -> Result<()> {
    if !ack.is_error() {
        return Ok(());
    }
    let message = ack.message.clone().unwrap_or_default();
    if message.to_lowercase().contains("already") {
        Err(RadarError::AlreadyRunning)
    } else {
        Err(RadarError::Validation(message))
    }
}

#[async_trait]
impl JobApi for HttpJobClient {
    async fn start(&self, params: &ScanParams) -> Result<()> {
        let response = self.post_json("start", params).await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(RadarError::Validation(rejection_message(&body)));
        }
        let ack: JobAck = decode(check_status(response).await?).await?;
        interpret_start_ack(&ack)
    }

    async fn stop(&self) -> Result<()> {
        let response = self.post_json("stop", &serde_json::json!({})).await?;
        check_status(response).await?;
        Ok(())
    }

    async fn status(&self) -> Result<ScanStatus> {
        self.get_json("status").await
    }

    async fn results(&self) -> Result<Vec<Track>> {
        self.get_json("results").await
    }

    async fn cache_info(&self) -> Result<CacheInfo> {
        self.get_json("cache-info").await
    }

    async fn export(&self, request: &ExportRequest) -> Result<ExportResponse> {
        let response = self.post_json("export", request).await?;
        let status = response.status();
        if status.is_client_error() {
            // Provider-side refusals come back as 4xx with a message body.
            let body = response.text().await.unwrap_or_default();
            return Ok(ExportResponse {
                status: "failure".to_string(),
                message: Some(rejection_message(&body)),
                ..Default::default()
            });
        }
        decode(check_status(response).await?).await
    }

    async fn automation_config(&self) -> Result<AutomationConfig> {
        self.get_json("automation/config").await
    }

    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<()> {
        let response = self.post_json("automation/config", config).await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(RadarError::Validation(rejection_message(&body)));
        }
        check_status(response).await?;
        Ok(())
    }
}
