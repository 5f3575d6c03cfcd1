//! HTTP client for the workload registry API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::WorkloadRegistry;
use crate::{
    config::RegistryConfig,
    core::error::{RegistryError, RegistryResult},
    protocols::{
        registry_api::{
            ClaimRequest, ClaimResponse, ListWorkloadsRequest, ListWorkloadsResponse,
            TerminalReportRequest, WorkloadIdRequest,
        },
        ClaimResult, DataplaneIdentity, WorkloadRecord, WorkloadStatus,
    },
};

const API_PREFIX: &str = "/api/v1/workload";
const REPORT_SOURCE: &str = "workload-launcher";

/// Registry client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWorkloadRegistry {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpWorkloadRegistry {
    pub fn new(config: &RegistryConfig, request_timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RegistryError::Transport {
                target: config.url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &RegistryConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PREFIX, route)
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> RegistryResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self.send(route, body).await?;
        response.json::<R>().await.map_err(|e| RegistryError::Decode {
            message: format!("{}: {}", route, e),
        })
    }

    async fn post_no_content<B>(&self, route: &str, body: &B) -> RegistryResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        self.send(route, body).await.map(|_| ())
    }

    async fn send<B>(&self, route: &str, body: &B) -> RegistryResult<reqwest::Response>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(route);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        debug!(route = route, status = %status, "Registry returned error: {}", message);
        Err(RegistryError::Api {
            target: url,
            status: status.as_u16(),
            message,
        })
    }

    /// A rejected claim does not say why; read the record to find out.
    async fn classify_rejected_claim(
        &self,
        workload_id: &str,
        owner: &DataplaneIdentity,
    ) -> RegistryResult<ClaimResult> {
        let record = self.get(workload_id).await?;
        if record.status.is_terminal() {
            return Ok(ClaimResult::Terminal(record.status));
        }
        match record.dataplane_id {
            Some(current) if current == owner.as_str() => Ok(ClaimResult::AlreadyClaimedBySelf),
            Some(current) => Ok(ClaimResult::AlreadyClaimedByOther { owner: current }),
            None => Err(RegistryError::Inconsistent {
                workload_id: workload_id.to_string(),
                message: format!("claim rejected while {} and unowned", record.status),
            }),
        }
    }
}

fn terminal_route(status: WorkloadStatus) -> Option<&'static str> {
    match status {
        WorkloadStatus::Success => Some("success"),
        WorkloadStatus::Failure => Some("failure"),
        WorkloadStatus::Cancelled => Some("cancel"),
        WorkloadStatus::Pending | WorkloadStatus::Claimed | WorkloadStatus::Running => None,
    }
}

#[async_trait]
impl WorkloadRegistry for HttpWorkloadRegistry {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn claim(
        &self,
        workload_id: &str,
        owner: &DataplaneIdentity,
    ) -> RegistryResult<ClaimResult> {
        let body = ClaimRequest {
            workload_id: workload_id.to_string(),
            dataplane_id: owner.to_string(),
        };
        let response: ClaimResponse = self.post("claim", &body).await?;
        if response.claimed {
            return Ok(ClaimResult::Claimed);
        }
        self.classify_rejected_claim(workload_id, owner).await
    }

    async fn get(&self, workload_id: &str) -> RegistryResult<WorkloadRecord> {
        let body = WorkloadIdRequest {
            workload_id: workload_id.to_string(),
        };
        match self.post("get", &body).await {
            Err(RegistryError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(RegistryError::NotFound {
                    workload_id: workload_id.to_string(),
                })
            }
            other => other,
        }
    }

    async fn report_launched(&self, workload_id: &str) -> RegistryResult<()> {
        let body = WorkloadIdRequest {
            workload_id: workload_id.to_string(),
        };
        self.post_no_content("launched", &body).await
    }

    async fn report_terminal(
        &self,
        workload_id: &str,
        status: WorkloadStatus,
        reason: Option<&str>,
    ) -> RegistryResult<()> {
        let route = terminal_route(status).ok_or(RegistryError::NotTerminal { status })?;
        let body = TerminalReportRequest {
            workload_id: workload_id.to_string(),
            reason: reason.map(str::to_string),
            source: REPORT_SOURCE.to_string(),
        };

        match self.post_no_content(route, &body).await {
            // Registry answers 409 when the workload is already terminal
            Err(RegistryError::Api { status: 409, message, .. }) => {
                warn!(
                    workload_id = workload_id,
                    "Terminal report for {} rejected: {}", status, message
                );
                let current = self.get_status(workload_id).await?;
                if current == status {
                    Ok(())
                } else {
                    Err(RegistryError::InvalidTransition {
                        workload_id: workload_id.to_string(),
                        from: current,
                        to: status,
                    })
                }
            }
            other => other,
        }
    }

    async fn list(
        &self,
        owner: Option<&DataplaneIdentity>,
        statuses: &[WorkloadStatus],
    ) -> RegistryResult<Vec<WorkloadRecord>> {
        let body = ListWorkloadsRequest {
            dataplane: owner.map(|o| vec![o.to_string()]).unwrap_or_default(),
            status: statuses.to_vec(),
        };
        let response: ListWorkloadsResponse = self.post("list", &body).await?;
        Ok(response.workloads)
    }
}
