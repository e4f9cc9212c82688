//! External services the orchestrator drives but does not implement.
//!
//! Each service is a trait so the engines can run against fakes. The
//! production implementation of all of them is [`http::ContentServiceClient`].

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::dispatch::ProgressReporter;
use crate::model::{
    AgentVariant, Brand, Proposal, ProposalDraft, PublishedItem, RiskTolerance, WorkItem,
};
use crate::strategy::{StrategyPlan, WinnerRef};
use crate::types::{AgentId, BrandId, ContentType};

pub use http::ContentServiceClient;

/// Everything the text-generation service needs to draft one proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalBrief {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub variant: AgentVariant,
    pub risk_tolerance: RiskTolerance,
    /// Sampling temperature handed to the writer.
    pub exploration: f64,
    pub brand_id: BrandId,
    pub brand_name: String,
    pub content_type: ContentType,
    pub plan: StrategyPlan,
    pub directive: String,
}

/// Drafts proposal text.
#[async_trait]
pub trait ProposalWriter: Send + Sync {
    async fn write(&self, brief: &ProposalBrief) -> Result<ProposalDraft>;
}

/// Turns a dispatched work item into a finished artifact.
///
/// Returning `Ok` means the artifact is complete; progress is reported
/// through the given reporter while the work runs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        job: &WorkItem,
        proposal: Option<&Proposal>,
        progress: &ProgressReporter,
    ) -> Result<()>;
}

/// Read model of published content and its metrics.
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    /// Items published within `[start, end)`.
    async fn published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>>;

    /// Best performing published pieces for a brand, most viewed first.
    async fn top_performers(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<WinnerRef>>;
}

#[async_trait]
pub trait TrendScout: Send + Sync {
    /// Topics currently trending for the brand's audience.
    async fn discover(&self, brand: &Brand) -> Result<Vec<String>>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hand finished, not yet scheduled artifacts to the publishing side.
    /// Idempotent; returns how many were newly scheduled.
    async fn schedule_ready_outputs(&self) -> Result<usize>;
}

/// The full set of external services, shared by every cycle.
#[derive(Clone)]
pub struct Collaborators {
    pub writer: Arc<dyn ProposalWriter>,
    pub runner: Arc<dyn JobRunner>,
    pub outcomes: Arc<dyn OutcomeSource>,
    pub scout: Arc<dyn TrendScout>,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    /// Route every collaborator through one HTTP client.
    pub fn from_client(client: Arc<ContentServiceClient>) -> Self {
        Self {
            writer: client.clone(),
            runner: client.clone(),
            outcomes: client.clone(),
            scout: client.clone(),
            publisher: client,
        }
    }
}
