use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{JobRunner, OutcomeSource, ProposalBrief, ProposalWriter, Publisher, TrendScout};
use crate::config::CollaboratorConfig;
use crate::core::dispatch::ProgressReporter;
use crate::model::{Brand, Proposal, ProposalDraft, PublishedItem, WorkItem};
use crate::strategy::WinnerRef;
use crate::types::BrandId;

/// HTTP client for the content services (writer, renderer, analytics,
/// trend scout and publisher), all served from one base URL.
pub struct ContentServiceClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    job: &'a WorkItem,
    proposal: Option<&'a Proposal>,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    completed: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiscoverRequest<'a> {
    brand_id: &'a BrandId,
    brand_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    scheduled: usize,
}

impl ContentServiceClient {
    pub fn new(config: &CollaboratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("content-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(anyhow!("{} returned {}", what, response.status()))
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ProposalWriter for ContentServiceClient {
    async fn write(&self, brief: &ProposalBrief) -> Result<ProposalDraft> {
        let request = self.client.post(self.endpoint("proposals/draft")).json(brief);
        let draft: ProposalDraft = self.send(request, "proposal draft").await?.json().await?;
        Ok(draft)
    }
}

#[async_trait]
impl JobRunner for ContentServiceClient {
    async fn run(
        &self,
        job: &WorkItem,
        proposal: Option<&Proposal>,
        progress: &ProgressReporter,
    ) -> Result<()> {
        progress.report("submitting", 5).await;

        let url = self.endpoint(&format!("jobs/{}/render", job.job_id));
        let request = self.client.post(url).json(&RenderRequest { job, proposal });
        let outcome: RenderResponse = self.send(request, "render").await?.json().await?;

        if outcome.completed {
            progress.report("rendered", 100).await;
            Ok(())
        } else {
            Err(anyhow!(
                "{}",
                outcome
                    .error
                    .unwrap_or_else(|| "render service reported failure".to_string())
            ))
        }
    }
}

#[async_trait]
impl OutcomeSource for ContentServiceClient {
    async fn published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>> {
        let url = self.endpoint(&format!(
            "published?start={}&end={}",
            timestamp(start),
            timestamp(end)
        ));
        let items: Vec<PublishedItem> = self
            .send(self.client.get(url), "published")
            .await?
            .json()
            .await?;
        debug!("Fetched {} published items", items.len());
        Ok(items)
    }

    async fn top_performers(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<WinnerRef>> {
        let url = self.endpoint(&format!("brands/{brand_id}/top-performers?limit={limit}"));
        let winners: Vec<WinnerRef> = self
            .send(self.client.get(url), "top performers")
            .await?
            .json()
            .await?;
        Ok(winners)
    }
}

#[async_trait]
impl TrendScout for ContentServiceClient {
    async fn discover(&self, brand: &Brand) -> Result<Vec<String>> {
        let request = self.client.post(self.endpoint("trends/discover")).json(&DiscoverRequest {
            brand_id: &brand.brand_id,
            brand_name: &brand.name,
        });
        let found: DiscoverResponse = self.send(request, "trend discovery").await?.json().await?;
        Ok(found.topics)
    }
}

#[async_trait]
impl Publisher for ContentServiceClient {
    async fn schedule_ready_outputs(&self) -> Result<usize> {
        let request = self.client.post(self.endpoint("publishing/schedule-ready"));
        let scheduled: ScheduleResponse = self
            .send(request, "publish hand-off")
            .await?
            .json()
            .await?;
        Ok(scheduled.scheduled)
    }
}
