//! Persistence seams.
//!
//! Engines only see these traits. [`crate::db::SurrealStore`] is the
//! production implementation; tests run against an in-memory fake.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{
    AgentDna, Brand, GenePoolEntry, JobStatus, MutationRecord, PerformanceSnapshot, Proposal,
    TrendTopic, WorkItem,
};
use crate::types::{AgentId, BrandId, GeneEntryId, JobId, ProposalId};

/// Key/value store for the few settings that survive restarts.
///
/// Values are JSON text so the store stays schema-agnostic.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>>;
    async fn put_value(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Every agent, active or not, ordered by creation time then id.
    async fn list_agents(&self) -> Result<Vec<AgentDna>>;
    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentDna>>;
    /// Insert or replace the agent row. Only for new agents; updates to an
    /// existing row go through the field-scoped methods below.
    async fn save_agent(&self, agent: &AgentDna) -> Result<()>;
    /// Add to the lifetime proposal counters in one atomic update.
    async fn add_lifetime_counts(
        &self,
        agent_id: &AgentId,
        proposals: u64,
        accepted: u64,
    ) -> Result<()>;
    /// Replace the survival score and add to the lifetime views.
    async fn record_survival(
        &self,
        agent_id: &AgentId,
        survival_score: f64,
        views: u64,
    ) -> Result<()>;
    async fn deactivate_agent(&self, agent_id: &AgentId) -> Result<()>;
    /// Write the evolved fields of `agent` (weights, exploration, generation,
    /// mutation bookkeeping) only if the stored generation still equals
    /// `expected_generation`. Returns false when another writer got there first.
    async fn apply_mutation(&self, agent: &AgentDna, expected_generation: u32) -> Result<bool>;

    async fn append_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<()>;
    /// Up to `limit` snapshots for the agent, newest first.
    async fn recent_snapshots(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<PerformanceSnapshot>>;
    async fn snapshot_count(&self, agent_id: &AgentId) -> Result<usize>;

    async fn append_mutation(&self, record: &MutationRecord) -> Result<()>;
    /// Mutation history for the agent, oldest first.
    async fn mutations_for(&self, agent_id: &AgentId) -> Result<Vec<MutationRecord>>;

    async fn archive_gene(&self, entry: &GenePoolEntry) -> Result<()>;
    /// All gene pool entries, highest survival score first.
    async fn gene_pool(&self) -> Result<Vec<GenePoolEntry>>;
    async fn increment_inheritance(&self, entry_id: &GeneEntryId) -> Result<()>;
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// All brands ordered by creation time.
    async fn list_brands(&self) -> Result<Vec<Brand>>;
    async fn save_brand(&self, brand: &Brand) -> Result<()>;

    async fn save_proposal(&self, proposal: &Proposal) -> Result<()>;
    async fn get_proposal(&self, proposal_id: &ProposalId) -> Result<Option<Proposal>>;

    /// Store discovered topics; a topic already known for the brand is kept once.
    async fn save_trends(&self, topics: &[TrendTopic]) -> Result<()>;
    /// Up to `limit` topics for the brand, most recently discovered first.
    async fn recent_trends(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<TrendTopic>>;
    async fn trend_count(&self) -> Result<u64>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save_job(&self, job: &WorkItem) -> Result<()>;
    async fn get_job(&self, job_id: &JobId) -> Result<Option<WorkItem>>;
    async fn find_job_by_proposal(&self, proposal_id: &ProposalId) -> Result<Option<WorkItem>>;
    /// Jobs in any of the given states, oldest first.
    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<WorkItem>>;
}

/// Everything the engines persist, behind one object.
pub trait Store: AgentRepository + ContentRepository + JobRepository {}

impl<T> Store for T where T: AgentRepository + ContentRepository + JobRepository + ?Sized {}

/// Brand-scoped key for a trend topic, used to keep topics unique per brand.
pub fn trend_key(brand_id: &BrandId, topic: &str) -> String {
    format!("{}:{}", brand_id, topic.trim().to_lowercase())
}
