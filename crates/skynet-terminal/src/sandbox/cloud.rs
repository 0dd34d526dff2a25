//! `CloudBackend` — delegates execution to an external sandbox service over
//! HTTP (the provider owns process isolation; this backend is just a thin
//! client). Persistence, when the provider supports it, is the provider's
//! own filesystem snapshotting keyed by `task_id` — we pass `task_id`
//! through and otherwise stay stateless.
//!
//! Built in the other backends' request/cancel shape, substituting an HTTP
//! round-trip for a spawned child: the request races the cancellation token
//! the same way `run_child_with_cancellation` races a child's exit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TerminalError};

use super::{ExecOutcome, ExecRequest, SandboxBackend, RETURNCODE_INTERRUPTED};

pub struct CloudBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudBackend {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[derive(Serialize)]
struct CloudExecBody<'a> {
    command: &'a str,
    cwd: Option<&'a str>,
    timeout_secs: u64,
    stdin: Option<&'a str>,
}

#[derive(Deserialize)]
struct CloudExecResponse {
    output: String,
    returncode: i32,
}

#[async_trait]
impl SandboxBackend for CloudBackend {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome> {
        let url = format!("{}/sandboxes/{}/exec", self.base_url, request.task_id);
        let body = CloudExecBody {
            command: &request.command,
            cwd: request.cwd.as_deref(),
            timeout_secs: request.timeout_secs,
            stdin: request.stdin.as_deref(),
        };

        debug!(task_id = %request.task_id, url, "cloud sandbox exec");

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        tokio::select! {
            resp = send => {
                let resp = resp.map_err(|e| TerminalError::BackendUnavailable(format!("cloud sandbox request failed: {e}")))?;
                if !resp.status().is_success() {
                    return Err(TerminalError::BackendUnavailable(format!(
                        "cloud sandbox returned {}", resp.status()
                    )));
                }
                let parsed: CloudExecResponse = resp
                    .json()
                    .await
                    .map_err(|e| TerminalError::BackendUnavailable(format!("cloud sandbox response malformed: {e}")))?;
                Ok(ExecOutcome { output: parsed.output, returncode: parsed.returncode })
            }
            _ = request.cancel.cancelled() => {
                // Best-effort: the provider-side process keeps running until
                // its own timeout; we simply stop waiting on it here.
                Ok(ExecOutcome {
                    output: "[Command interrupted]".to_string(),
                    returncode: RETURNCODE_INTERRUPTED,
                })
            }
        }
    }

    async fn cleanup(&self, task_id: &str) -> Result<()> {
        let url = format!("{}/sandboxes/{task_id}", self.base_url);
        let _ = self.client.delete(&url).bearer_auth(&self.api_key).send().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "cloud"
    }
}
