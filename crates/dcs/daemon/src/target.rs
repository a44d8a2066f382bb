//! HTTP deployment target

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcs_types::{DcsError, DcsResult};
use dcs_workflow::{DeploymentPayload, DispatchReceipt, TargetSystem};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Synchronous acknowledgement body returned with a 2xx status.
#[derive(Debug, Deserialize)]
struct AckBody {
    #[serde(default)]
    acknowledged_at: Option<DateTime<Utc>>,
}

/// Posts deployment payloads to a remote target system.
///
/// `202 Accepted` means the acknowledgement follows by callback. Any other
/// 2xx with an `acknowledged_at` field acknowledges synchronously; a 2xx
/// without one is treated as accepted.
pub struct HttpTargetSystem {
    name: String,
    url: String,
    client: Client,
}

impl HttpTargetSystem {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> DcsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DcsError::ExternalUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl TargetSystem for HttpTargetSystem {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, payload: &DeploymentPayload) -> DcsResult<DispatchReceipt> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DcsError::ExternalUnavailable(format!("{}: {e}", self.name)))?;

        let status = response.status();
        debug!(target_system = %self.name, %status, correlation = %payload.correlation_id, "dispatched");
        if status == StatusCode::ACCEPTED {
            return Ok(DispatchReceipt::Accepted);
        }
        if !status.is_success() {
            return Err(DcsError::ExternalUnavailable(format!(
                "{} rejected deployment with {status}",
                self.name
            )));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<AckBody>(&body) {
            Ok(AckBody {
                acknowledged_at: Some(at),
            }) => Ok(DispatchReceipt::Acknowledged { at }),
            _ => Ok(DispatchReceipt::Accepted),
        }
    }
}
