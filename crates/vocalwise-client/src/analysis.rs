//! Remote analysis of uploaded media.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use vocalwise_shared::constants::{ANALYSIS_FALLBACK_TEXT, APP_NAME};

use crate::error::{ChatError, Result};

pub const DEFAULT_TITLE: &str = "Video analysis";
pub const DEFAULT_DESCRIPTION: &str = "Video uploaded from VocalWise";

/// Body posted to the analysis endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub url: String,
    /// Text the user sent with the file.
    #[serde(rename = "VocalWise")]
    pub context: String,
    #[serde(rename = "nombre")]
    pub title: String,
    #[serde(rename = "descripcion")]
    pub description: String,
}

impl AnalysisRequest {
    pub fn new(url: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: context.into(),
            title: DEFAULT_TITLE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Analyse the file behind `request.url` and return the result text.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String>;
}

/// Pull the result text out of an endpoint response.
pub fn extract_result(body: &Value) -> String {
    body.pointer("/videoAnalisis/textResult")
        .and_then(Value::as_str)
        .or_else(|| body.get("result").and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(ANALYSIS_FALLBACK_TEXT)
        .to_string()
}

pub struct HttpAnalysisClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(APP_NAME)
            .build()
            .map_err(|e| ChatError::AnalysisFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        debug!(endpoint = %self.endpoint, url = %request.url, "requesting analysis");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::AnalysisFailed("request timed out".into())
                } else {
                    ChatError::AnalysisFailed(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body = %body, "analysis endpoint rejected request");
            return Err(ChatError::AnalysisFailed(format!("endpoint answered {status}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::AnalysisFailed(format!("unreadable response: {e}")))?;
        Ok(extract_result(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_endpoint(status: StatusCode, reply: Value) -> (String, Arc<Mutex<Option<Value>>>) {
        let seen = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/analyze",
                post(
                    move |State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                        *seen.lock().unwrap() = Some(body);
                        (status, Json(reply))
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/analyze"), seen)
    }

    #[test]
    fn result_extraction_falls_back() {
        assert_eq!(
            extract_result(&json!({"videoAnalisis": {"textResult": "Clear voice"}})),
            "Clear voice"
        );
        assert_eq!(extract_result(&json!({"result": "Steady pace"})), "Steady pace");
        assert_eq!(extract_result(&json!({"other": 1})), ANALYSIS_FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn posts_expected_body() {
        let (endpoint, seen) = spawn_endpoint(
            StatusCode::OK,
            json!({"videoAnalisis": {"textResult": "Good projection"}}),
        )
        .await;
        let client = HttpAnalysisClient::new(endpoint, Duration::from_secs(5)).unwrap();

        let text = client
            .analyze(&AnalysisRequest::new("https://blobs/uploads/1_talk.mp4", "my talk"))
            .await
            .unwrap();
        assert_eq!(text, "Good projection");

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["url"], "https://blobs/uploads/1_talk.mp4");
        assert_eq!(body["VocalWise"], "my talk");
        assert_eq!(body["nombre"], DEFAULT_TITLE);
        assert_eq!(body["descripcion"], DEFAULT_DESCRIPTION);
    }

    #[tokio::test]
    async fn error_status_is_analysis_failure() {
        let (endpoint, _) = spawn_endpoint(StatusCode::BAD_GATEWAY, json!({})).await;
        let client = HttpAnalysisClient::new(endpoint, Duration::from_secs(5)).unwrap();

        let err = client
            .analyze(&AnalysisRequest::new("u", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AnalysisFailed(_)));
    }
}
