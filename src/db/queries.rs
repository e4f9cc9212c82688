// SurrealDB-backed implementation of the store traits.
//
// Records are keyed by their own identifiers via `type::thing`, so inserts
// are an UPSERT and re-saving a record replaces it. Agent rows that already
// exist are only touched by field-scoped UPDATEs so concurrent cycles do not
// overwrite each other. Ordering and time-window filtering happen in Rust on
// the deserialized rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::db::schema::*;
use crate::model::{
    AgentDna, Brand, GenePoolEntry, JobStatus, MutationRecord, PerformanceSnapshot, Proposal,
    TrendTopic, WorkItem,
};
use crate::store::{AgentRepository, ConfigStore, ContentRepository, JobRepository, trend_key};
use crate::types::{AgentId, BrandId, GeneEntryId, JobId, ProposalId};

/// Projection returned by a conditional agent update.
#[derive(Deserialize)]
struct GenerationRow {
    generation: u32,
}

#[derive(Clone)]
pub struct SurrealStore {
    db: Db,
}

impl SurrealStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn upsert<T>(&self, table: &'static str, key: &str, data: &T) -> Result<()>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.db
            .query("UPSERT type::thing($tb, $key) CONTENT $data")
            .bind(("tb", table))
            .bind(("key", key.to_string()))
            .bind(("data", data.clone()))
            .await?
            .check()
            .with_context(|| format!("failed to write {table}:{key}"))?;
        Ok(())
    }

    async fn select_by_key<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &str,
    ) -> Result<Option<T>> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM type::thing($tb, $key)")
            .bind(("tb", table))
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn select_all<T: DeserializeOwned>(&self, table: &'static str) -> Result<Vec<T>> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM type::table($tb)")
            .bind(("tb", table))
            .await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows)
    }

    async fn select_by_agent<T: DeserializeOwned>(
        &self,
        table: &'static str,
        agent_id: &AgentId,
    ) -> Result<Vec<T>> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM type::table($tb) WHERE agent_id = $agent_id")
            .bind(("tb", table))
            .bind(("agent_id", agent_id.to_string()))
            .await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows)
    }
}

#[async_trait]
impl ConfigStore for SurrealStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let record: Option<SettingRecord> = self.select_by_key(TABLE_SETTING, key).await?;
        Ok(record.map(|r| r.value))
    }

    async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        let record = SettingRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.upsert(TABLE_SETTING, key, &record).await
    }
}

#[async_trait]
impl AgentRepository for SurrealStore {
    async fn list_agents(&self) -> Result<Vec<AgentDna>> {
        let mut agents: Vec<AgentDna> = self.select_all(TABLE_AGENT).await?;
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentDna>> {
        self.select_by_key(TABLE_AGENT, agent_id.as_str()).await
    }

    async fn save_agent(&self, agent: &AgentDna) -> Result<()> {
        self.upsert(TABLE_AGENT, agent.agent_id.as_str(), agent).await
    }

    async fn add_lifetime_counts(
        &self,
        agent_id: &AgentId,
        proposals: u64,
        accepted: u64,
    ) -> Result<()> {
        self.db
            .query(
                "UPDATE type::thing($tb, $key) \
                 SET lifetime_proposals += $proposals, lifetime_accepted += $accepted",
            )
            .bind(("tb", TABLE_AGENT))
            .bind(("key", agent_id.to_string()))
            .bind(("proposals", proposals))
            .bind(("accepted", accepted))
            .await?
            .check()
            .with_context(|| format!("failed to update counters of {TABLE_AGENT}:{agent_id}"))?;
        Ok(())
    }

    async fn record_survival(
        &self,
        agent_id: &AgentId,
        survival_score: f64,
        views: u64,
    ) -> Result<()> {
        self.db
            .query(
                "UPDATE type::thing($tb, $key) \
                 SET survival_score = $score, lifetime_views += $views",
            )
            .bind(("tb", TABLE_AGENT))
            .bind(("key", agent_id.to_string()))
            .bind(("score", survival_score))
            .bind(("views", views))
            .await?
            .check()
            .with_context(|| format!("failed to record survival of {TABLE_AGENT}:{agent_id}"))?;
        Ok(())
    }

    async fn deactivate_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.db
            .query("UPDATE type::thing($tb, $key) SET active = false")
            .bind(("tb", TABLE_AGENT))
            .bind(("key", agent_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn apply_mutation(&self, agent: &AgentDna, expected_generation: u32) -> Result<bool> {
        let mut res = self
            .db
            .query(
                "UPDATE type::thing($tb, $key) SET \
                 strategy_weights = $weights, exploration = $exploration, \
                 generation = $generation, mutation_count = $mutation_count, \
                 last_mutation_at = $last_mutation_at \
                 WHERE generation = $expected RETURN generation",
            )
            .bind(("tb", TABLE_AGENT))
            .bind(("key", agent.agent_id.to_string()))
            .bind(("weights", agent.strategy_weights.clone()))
            .bind(("exploration", agent.exploration))
            .bind(("generation", agent.generation))
            .bind(("mutation_count", agent.mutation_count))
            .bind(("last_mutation_at", agent.last_mutation_at))
            .bind(("expected", expected_generation))
            .await?;
        let rows: Vec<GenerationRow> = res
            .take(0)
            .with_context(|| format!("failed to mutate {TABLE_AGENT}:{}", agent.agent_id))?;
        Ok(rows.iter().any(|row| row.generation == agent.generation))
    }

    async fn append_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        let key = uuid::Uuid::new_v4().to_string();
        self.upsert(TABLE_SNAPSHOT, &key, snapshot).await
    }

    async fn recent_snapshots(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<PerformanceSnapshot>> {
        let mut snapshots: Vec<PerformanceSnapshot> =
            self.select_by_agent(TABLE_SNAPSHOT, agent_id).await?;
        snapshots.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    async fn snapshot_count(&self, agent_id: &AgentId) -> Result<usize> {
        let query = format!(
            "SELECT count() AS count FROM {TABLE_SNAPSHOT} WHERE agent_id = $agent_id GROUP ALL"
        );
        let mut res = self
            .db
            .query(query)
            .bind(("agent_id", agent_id.to_string()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count.max(0) as usize).unwrap_or(0))
    }

    async fn append_mutation(&self, record: &MutationRecord) -> Result<()> {
        let key = uuid::Uuid::new_v4().to_string();
        self.upsert(TABLE_MUTATION, &key, record).await
    }

    async fn mutations_for(&self, agent_id: &AgentId) -> Result<Vec<MutationRecord>> {
        let mut records: Vec<MutationRecord> =
            self.select_by_agent(TABLE_MUTATION, agent_id).await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn archive_gene(&self, entry: &GenePoolEntry) -> Result<()> {
        self.upsert(TABLE_GENE_POOL, entry.entry_id.as_str(), entry).await
    }

    async fn gene_pool(&self) -> Result<Vec<GenePoolEntry>> {
        let mut entries: Vec<GenePoolEntry> = self.select_all(TABLE_GENE_POOL).await?;
        entries.sort_by(|a, b| b.survival_score.total_cmp(&a.survival_score));
        Ok(entries)
    }

    async fn increment_inheritance(&self, entry_id: &GeneEntryId) -> Result<()> {
        self.db
            .query("UPDATE type::thing($tb, $key) SET inherit_count += 1")
            .bind(("tb", TABLE_GENE_POOL))
            .bind(("key", entry_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for SurrealStore {
    async fn list_brands(&self) -> Result<Vec<Brand>> {
        let mut brands: Vec<Brand> = self.select_all(TABLE_BRAND).await?;
        brands.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.brand_id.cmp(&b.brand_id))
        });
        Ok(brands)
    }

    async fn save_brand(&self, brand: &Brand) -> Result<()> {
        self.upsert(TABLE_BRAND, brand.brand_id.as_str(), brand).await
    }

    async fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.upsert(TABLE_PROPOSAL, proposal.proposal_id.as_str(), proposal)
            .await
    }

    async fn get_proposal(&self, proposal_id: &ProposalId) -> Result<Option<Proposal>> {
        self.select_by_key(TABLE_PROPOSAL, proposal_id.as_str()).await
    }

    async fn save_trends(&self, topics: &[TrendTopic]) -> Result<()> {
        for topic in topics {
            let key = trend_key(&topic.brand_id, &topic.topic);
            self.upsert(TABLE_TREND, &key, topic).await?;
        }
        Ok(())
    }

    async fn recent_trends(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<TrendTopic>> {
        let query = format!("SELECT * OMIT id FROM {TABLE_TREND} WHERE brand_id = $brand_id");
        let mut res = self
            .db
            .query(query)
            .bind(("brand_id", brand_id.to_string()))
            .await?;
        let mut topics: Vec<TrendTopic> = res.take(0)?;
        topics.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at));
        topics.truncate(limit);
        Ok(topics)
    }

    async fn trend_count(&self) -> Result<u64> {
        let query = format!("SELECT count() AS count FROM {TABLE_TREND} GROUP ALL");
        let mut res = self.db.query(query).await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count.max(0) as u64).unwrap_or(0))
    }
}

#[async_trait]
impl JobRepository for SurrealStore {
    async fn save_job(&self, job: &WorkItem) -> Result<()> {
        self.upsert(TABLE_JOB, job.job_id.as_str(), job).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<WorkItem>> {
        self.select_by_key(TABLE_JOB, job_id.as_str()).await
    }

    async fn find_job_by_proposal(&self, proposal_id: &ProposalId) -> Result<Option<WorkItem>> {
        let query =
            format!("SELECT * OMIT id FROM {TABLE_JOB} WHERE proposal_id = $proposal_id LIMIT 1");
        let mut res = self
            .db
            .query(query)
            .bind(("proposal_id", proposal_id.to_string()))
            .await?;
        let jobs: Vec<WorkItem> = res.take(0)?;
        Ok(jobs.into_iter().next())
    }

    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<WorkItem>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let query = format!("SELECT * OMIT id FROM {TABLE_JOB} WHERE status INSIDE $statuses");
        let mut res = self.db.query(query).bind(("statuses", statuses)).await?;
        let mut jobs: Vec<WorkItem> = res.take(0)?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DnaConfig;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::model::{ArchiveReason, MutationKind};
    use crate::strategy::{Strategy, StrategyPlan, StrategyWeights};
    use crate::types::ContentType;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeMap;

    async fn setup_test_store() -> SurrealStore {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        SurrealStore::new(db)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_snapshot(
        agent_id: &AgentId,
        recorded_at: DateTime<Utc>,
        score: f64,
    ) -> PerformanceSnapshot {
        let mut averages = BTreeMap::new();
        averages.insert(Strategy::Explore, 1200.0);
        let mut samples = BTreeMap::new();
        samples.insert(Strategy::Explore, 3);
        PerformanceSnapshot {
            agent_id: agent_id.clone(),
            published_count: 3,
            total_views: 3600,
            avg_views: 1200.0,
            total_likes: 100,
            total_comments: 10,
            total_saves: 5,
            total_reach: 5000,
            engagement_rate: 0.023,
            best_strategy: Some(Strategy::Explore),
            worst_strategy: Some(Strategy::Explore),
            strategy_avg_views: averages,
            strategy_samples: samples,
            consistency: 100.0,
            avg_examiner_score: 7.5,
            survival_score: score,
            window_start: recorded_at - Duration::hours(30),
            window_end: recorded_at - Duration::hours(24),
            recorded_at,
        }
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let store = setup_test_store().await;
        assert!(store.get_value("is_paused").await.unwrap().is_none());

        store.put_value("is_paused", "true").await.unwrap();
        store.put_value("is_paused", "false").await.unwrap();
        assert_eq!(
            store.get_value("is_paused").await.unwrap().as_deref(),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_agent_round_trip_and_ordering() {
        let store = setup_test_store().await;
        let dna = DnaConfig::default();

        let older = AgentDna::provision_for_brand(&Brand::new("Older", now()), &dna, now());
        let newer = AgentDna::provision_for_brand(
            &Brand::new("Newer", now()),
            &dna,
            now() + Duration::minutes(5),
        );
        store.save_agent(&newer).await.unwrap();
        store.save_agent(&older).await.unwrap();

        let agents = store.list_agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].agent_id, older.agent_id);
        assert_eq!(agents[0].strategy_weights, older.strategy_weights);

        let mut updated = older.clone();
        updated.active = false;
        store.save_agent(&updated).await.unwrap();
        let fetched = store.get_agent(&older.agent_id).await.unwrap().unwrap();
        assert!(!fetched.active);
        assert_eq!(store.list_agents().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_field_scoped_agent_updates_keep_other_fields() {
        let store = setup_test_store().await;
        let agent =
            AgentDna::provision_for_brand(&Brand::new("Acme", now()), &DnaConfig::default(), now());
        store.save_agent(&agent).await.unwrap();

        let mut evolved = agent.clone();
        evolved.strategy_weights =
            StrategyWeights::new([(Strategy::Explore, 0.6), (Strategy::Iterate, 0.4)]);
        evolved.exploration = 0.8;
        evolved.generation = agent.generation + 1;
        evolved.mutation_count = 1;
        evolved.last_mutation_at = Some(now());

        store.add_lifetime_counts(&agent.agent_id, 3, 2).await.unwrap();
        store.record_survival(&agent.agent_id, 61.5, 4000).await.unwrap();
        assert!(store.apply_mutation(&evolved, agent.generation).await.unwrap());
        // A writer still holding the old generation loses.
        assert!(!store.apply_mutation(&evolved, agent.generation).await.unwrap());
        store.add_lifetime_counts(&agent.agent_id, 1, 0).await.unwrap();

        let fetched = store.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(fetched.lifetime_proposals, 4);
        assert_eq!(fetched.lifetime_accepted, 2);
        assert_eq!(fetched.lifetime_views, 4000);
        assert_eq!(fetched.survival_score, 61.5);
        assert_eq!(fetched.strategy_weights, evolved.strategy_weights);
        assert_eq!(fetched.generation, evolved.generation);
        assert_eq!(fetched.last_mutation_at, Some(now()));
        assert!(fetched.active);

        store.deactivate_agent(&agent.agent_id).await.unwrap();
        let fetched = store.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert!(!fetched.active);
        assert_eq!(fetched.lifetime_proposals, 4);
    }

    #[tokio::test]
    async fn test_snapshots_newest_first() {
        let store = setup_test_store().await;
        let agent_id = AgentId::new("agent-1");

        for hours in 0..3 {
            let snapshot = sample_snapshot(&agent_id, now() + Duration::hours(hours), hours as f64);
            store.append_snapshot(&snapshot).await.unwrap();
        }
        store
            .append_snapshot(&sample_snapshot(&AgentId::new("other"), now(), 99.0))
            .await
            .unwrap();

        assert_eq!(store.snapshot_count(&agent_id).await.unwrap(), 3);
        let recent = store.recent_snapshots(&agent_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].survival_score, 2.0);
        assert_eq!(recent[0].strategy_avg_views.get(&Strategy::Explore), Some(&1200.0));
    }

    #[tokio::test]
    async fn test_gene_pool_inheritance_counter() {
        let store = setup_test_store().await;
        let mut agent =
            AgentDna::provision_for_brand(&Brand::new("Acme", now()), &DnaConfig::default(), now());
        agent.survival_score = 71.5;

        let entry = GenePoolEntry::archive(&agent, ArchiveReason::TopPerformer, now());
        store.archive_gene(&entry).await.unwrap();
        store.increment_inheritance(&entry.entry_id).await.unwrap();
        store.increment_inheritance(&entry.entry_id).await.unwrap();

        let pool = store.gene_pool().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].inherit_count, 2);
        assert_eq!(pool[0].dna.agent_id, agent.agent_id);
    }

    #[tokio::test]
    async fn test_jobs_by_status_and_proposal() {
        let store = setup_test_store().await;
        let proposal = Proposal {
            proposal_id: ProposalId::new("p-1"),
            agent_id: AgentId::new("a-1"),
            brand_id: BrandId::new("b-1"),
            content_type: ContentType::Post,
            strategy: Strategy::Trending,
            plan: StrategyPlan::Trending {
                topic: "eclipse".to_string(),
            },
            title: "Eclipse week".to_string(),
            body: "Draft".to_string(),
            created_at: now(),
        };
        store.save_proposal(&proposal).await.unwrap();
        assert_eq!(
            store.get_proposal(&proposal.proposal_id).await.unwrap(),
            Some(proposal.clone())
        );

        let mut job = WorkItem::for_proposal(&proposal, now());
        store.save_job(&job).await.unwrap();
        job.status = JobStatus::Failed;
        job.error = Some("ffmpeg exited with status 1".to_string());
        store.save_job(&job).await.unwrap();

        let failed = store.jobs_with_status(&[JobStatus::Failed]).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(store.jobs_with_status(&[JobStatus::Pending]).await.unwrap().is_empty());

        let found = store.find_job_by_proposal(&proposal.proposal_id).await.unwrap();
        assert_eq!(found.map(|j| j.job_id), Some(job.job_id));
    }

    #[tokio::test]
    async fn test_trends_are_unique_per_brand() {
        let store = setup_test_store().await;
        let brand = BrandId::new("b-1");
        let topic = |name: &str, minutes: i64| TrendTopic {
            brand_id: brand.clone(),
            topic: name.to_string(),
            discovered_at: now() + Duration::minutes(minutes),
            source: "observe".to_string(),
        };

        store
            .save_trends(&[topic("Solar", 0), topic("Harvest", 1)])
            .await
            .unwrap();
        store.save_trends(&[topic("solar", 2)]).await.unwrap();

        assert_eq!(store.trend_count().await.unwrap(), 2);
        let recent = store.recent_trends(&brand, 10).await.unwrap();
        assert_eq!(recent[0].topic, "solar");
    }

    #[tokio::test]
    async fn test_mutations_oldest_first() {
        let store = setup_test_store().await;
        let agent_id = AgentId::new("a-1");
        for (minutes, kind) in [
            (5, MutationKind::ExplorationShift),
            (0, MutationKind::WeightShift),
        ] {
            let record = MutationRecord::new::<f64, f64>(
                agent_id.clone(),
                kind,
                Some(&0.8),
                Some(&0.75),
                "feedback",
                1.0,
                70.0,
                now() + Duration::minutes(minutes),
            );
            store.append_mutation(&record).await.unwrap();
        }

        let history = store.mutations_for(&agent_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, MutationKind::WeightShift);
    }
}
