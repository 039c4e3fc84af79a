//! Hand-off of hits to an external system.
//!
//! The operation collects the ids of matching hits and posts them to an
//! [`ExternalSink`]. [`WebhookSink`] is the HTTP implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hw_core::{HitService, HitStore, Query, Report, ReportEntry, Role, User};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::no_matches;
use crate::registry::{optional_str, Operation, OperationError, Params};
use crate::specification::{OperationSpecification, Step};

/// The JSON payload sent to external systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPayload {
    /// Name of the sink the hits are sent to.
    pub destination: String,
    /// User who ran the operation.
    pub user: String,
    /// Query the hits were selected with.
    pub query: String,
    pub hit_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// A destination for hit hand-offs.
#[async_trait]
pub trait ExternalSink: Send + Sync {
    /// Returns the sink name.
    fn name(&self) -> &str;

    /// Delivers a payload.
    async fn send(&self, payload: &ExternalPayload) -> Result<(), OperationError>;
}

/// A sink that posts JSON payloads to a webhook URL.
pub struct WebhookSink {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Creates a new webhook sink.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, OperationError> {
        let url = url.into();
        if url.is_empty() {
            return Err(OperationError::InvalidParameters(
                "Webhook URL cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        })
    }

    /// Adds a header to be included in webhook requests.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Adds an authorization header with a bearer token.
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.into()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExternalSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, payload), fields(url = %self.url, hits = payload.hit_ids.len()))]
    async fn send(&self, payload: &ExternalPayload) -> Result<(), OperationError> {
        let mut request = self.client.post(&self.url).json(payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Webhook request failed");
            OperationError::External(format!("HTTP request failed: {}", e))
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("Delivered hits to webhook");
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        error!(status = %status, "Webhook rejected hits");
        Err(OperationError::External(format!(
            "Webhook returned {}: {}",
            status, body
        )))
    }
}

/// Sends the ids of matching hits to an external system.
pub struct SendToExternalOperation {
    service: HitService,
    sink: Arc<dyn ExternalSink>,
}

impl SendToExternalOperation {
    pub fn new(service: HitService, sink: Arc<dyn ExternalSink>) -> Self {
        Self { service, sink }
    }
}

#[async_trait]
impl Operation for SendToExternalOperation {
    fn id(&self) -> &str {
        "send_to_external"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("send_to_external", "Send to External System", 20)
            .describe(
                "Send hits to an external system",
                "Posts the ids of every matching hit to the configured external \
                 system, with an optional note.",
            )
            .with_roles([Role::ActionrunnerAdvanced])
            .with_step(Step::new().arg("note"))
    }

    #[instrument(skip(self, query, params, user), fields(query = %query, sink = %self.sink.name()))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let row_cap = self.service.config().transitions.row_cap;
        let found = self.service.hits().search(query, row_cap).await?;
        if found.items.is_empty() {
            return Ok(vec![no_matches(query)]);
        }

        let hit_ids: Vec<String> = found.items.iter().map(|hit| hit.id.clone()).collect();
        let payload = ExternalPayload {
            destination: self.sink.name().to_string(),
            user: user.username.clone(),
            query: query.to_string(),
            hit_ids: hit_ids.clone(),
            note: optional_str(params, "note")?.map(str::to_string),
            sent_at: Utc::now(),
        };
        self.sink.send(&payload).await?;

        let sent = Query::ids(hit_ids);
        let mut report = vec![ReportEntry::success(
            sent.clone(),
            "Sent to external system",
            format!("Sent to {}", self.sink.name()),
        )];
        if found.total > found.items.len() as u64 {
            report.push(ReportEntry::skipped(
                query.clone().and(sent.not()),
                "Row cap reached",
                format!(
                    "Only the first {} of {} hits were sent",
                    found.items.len(),
                    found.total
                ),
            ));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::service_with;
    use hw_core::{Hit, Outcome};
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<ExternalPayload>>,
    }

    #[async_trait]
    impl ExternalSink for RecordingSink {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, payload: &ExternalPayload) -> Result<(), OperationError> {
            self.sent.lock().await.push(payload.clone());
            Ok(())
        }
    }

    #[test]
    fn test_webhook_sink_rejects_empty_url() {
        assert!(WebhookSink::new("ticketing", "").is_err());
        let sink = WebhookSink::new("ticketing", "https://example.com/hook")
            .unwrap()
            .with_bearer_token("secret");
        assert_eq!(sink.name(), "ticketing");
        assert_eq!(sink.url(), "https://example.com/hook");
    }

    #[tokio::test]
    async fn test_sends_matching_ids() {
        let hit = Hit::new("Beaconing", None, json!({}));
        let (service, _) = service_with(vec![hit.clone()]);
        let sink = Arc::new(RecordingSink::default());
        let operation = SendToExternalOperation::new(service, sink.clone());

        let params: Params = serde_json::from_value(json!({"note": "case 42"})).unwrap();
        let report = operation
            .execute(&Query::All, &params, &User::new("alice", [Role::ActionrunnerAdvanced]))
            .await
            .unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].outcome, Outcome::Success);
        let sent = sink.sent.lock().await;
        assert_eq!(sent[0].hit_ids, vec![hit.id.clone()]);
        assert_eq!(sent[0].note.as_deref(), Some("case 42"));
        assert_eq!(sent[0].user, "alice");
    }

    #[tokio::test]
    async fn test_nothing_sent_without_matches() {
        let (service, _) = service_with(vec![]);
        let sink = Arc::new(RecordingSink::default());
        let report = SendToExternalOperation::new(service, sink.clone())
            .execute(&Query::All, &Params::new(), &User::system())
            .await
            .unwrap();
        assert_eq!(report[0].outcome, Outcome::Skipped);
        assert!(sink.sent.lock().await.is_empty());
    }
}
