//! CDP Session - one attached page target
//!
//! All sessions share the client's WebSocket. Each device surface owns one.

use super::client::{CDPClient, CDPError, Result};
use super::protocol::{
    AttachToTargetResult, CreateTargetResult, EvaluateResult, SessionId, TargetId, TargetInfo,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Domains a mirrored surface needs events or commands from
pub const SURFACE_DOMAINS: [&str; 5] = ["Page", "Runtime", "DOM", "Overlay", "Network"];

#[derive(Clone)]
pub struct CDPSession {
    client: Arc<CDPClient>,

    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,

    pub title: String,
    pub url: String,
}

impl CDPSession {
    /// Create a new page target at `url` and attach to it
    pub async fn open(client: Arc<CDPClient>, url: &str) -> Result<Self> {
        let result = client
            .send_request("Target.createTarget", Some(json!({ "url": url })), None)
            .await?;
        let created: CreateTargetResult = serde_json::from_value(result)?;
        Self::attach(client, created.target_id, None).await
    }

    /// Attach to a target and enable `domains` (the surface set by default)
    pub async fn attach(
        client: Arc<CDPClient>,
        target_id: TargetId,
        domains: Option<Vec<&str>>,
    ) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        let domains = domains.unwrap_or_else(|| SURFACE_DOMAINS.to_vec());
        let enable_futures: Vec<_> = domains
            .into_iter()
            .map(|domain| {
                let client = client.clone();
                let session_id = session_id.clone();
                async move {
                    client
                        .send_request(format!("{}.enable", domain), None, Some(session_id))
                        .await
                }
            })
            .collect();

        // Individual failures only cost the features of that domain
        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(
                "[CDPSession] Some domain enables failed: {}/{}",
                failures,
                results.len()
            );
        }

        let info_result = client
            .send_request(
                "Target.getTargetInfo",
                Some(json!({ "targetId": &target_id })),
                None,
            )
            .await?;
        let target_info: TargetInfo = serde_json::from_value(info_result["targetInfo"].clone())?;

        Ok(Self {
            client,
            target_id,
            session_id,
            title: target_info.title,
            url: target_info.url,
        })
    }

    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    pub async fn get_target_info(&self) -> Result<TargetInfo> {
        let result = self
            .client
            .send_request(
                "Target.getTargetInfo",
                Some(json!({ "targetId": &self.target_id })),
                None,
            )
            .await?;

        Ok(serde_json::from_value(result["targetInfo"].clone())?)
    }

    pub async fn navigate(&self, url: impl Into<String>) -> Result<Value> {
        self.send("Page.navigate", Some(json!({ "url": url.into() })))
            .await
    }

    /// Evaluate JavaScript and return the value it produced. A thrown
    /// exception comes back as a protocol error.
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression.into(),
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        let evaluated: EvaluateResult = serde_json::from_value(result)?;
        if let Some(exception) = evaluated.exception_details {
            return Err(CDPError::Protocol {
                code: 0,
                message: exception.message(),
            });
        }
        Ok(evaluated.result.value.unwrap_or(Value::Null))
    }

    /// Close the page target behind this session
    pub async fn close(&self) -> Result<()> {
        self.client
            .send_request(
                "Target.closeTarget",
                Some(json!({ "targetId": &self.target_id })),
                None,
            )
            .await?;
        Ok(())
    }
}
