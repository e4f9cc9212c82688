//! In-memory fakes for the store and collaborator seams, shared by tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::collaborators::{
    Collaborators, JobRunner, OutcomeSource, ProposalBrief, ProposalWriter, Publisher, TrendScout,
};
use crate::config::DnaConfig;
use crate::core::dispatch::ProgressReporter;
use crate::model::{
    AgentDna, Brand, GenePoolEntry, JobStatus, MutationRecord, PerformanceSnapshot, Proposal,
    ProposalDraft, PublishedItem, TrendTopic, WorkItem,
};
use crate::store::{
    AgentRepository, ConfigStore, ContentRepository, JobRepository, trend_key,
};
use crate::strategy::{Strategy, StrategyPlan, WinnerRef};
use crate::types::{AgentId, BrandId, ContentType, GeneEntryId, JobId, ProposalId};

/// Friday 2026-10-16, noon UTC (07:00 at UTC-5).
pub fn test_now() -> DateTime<Utc> {
    at("2026-10-16T12:00:00Z")
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn sample_brand(name: &str, created_at: DateTime<Utc>) -> Brand {
    Brand {
        brand_id: BrandId::new(format!("brand-{}", name.to_lowercase())),
        name: name.to_string(),
        active: true,
        created_at,
    }
}

pub fn sample_agent(name: &str, created_at: DateTime<Utc>) -> AgentDna {
    let brand = sample_brand(name, created_at);
    let mut agent = AgentDna::provision_for_brand(&brand, &DnaConfig::default(), created_at);
    agent.agent_id = AgentId::new(format!("agent-{}", name.to_lowercase()));
    agent.name = name.to_string();
    agent
}

pub fn sample_proposal(id: &str) -> Proposal {
    Proposal {
        proposal_id: ProposalId::new(id),
        agent_id: AgentId::new("agent-a"),
        brand_id: BrandId::new("brand-a"),
        content_type: ContentType::Reel,
        strategy: Strategy::Explore,
        plan: StrategyPlan::Explore { novelty: 0.85 },
        title: format!("Proposal {id}"),
        body: "Draft body".to_string(),
        created_at: test_now(),
    }
}

/// A snapshot with the given per-strategy average views.
pub fn sample_snapshot(
    agent_id: &AgentId,
    published: usize,
    survival: f64,
    averages: &[(Strategy, f64)],
) -> PerformanceSnapshot {
    let strategy_avg_views: BTreeMap<Strategy, f64> = averages.iter().copied().collect();
    let best = averages
        .iter()
        .copied()
        .fold(None::<(Strategy, f64)>, |acc, (s, v)| match acc {
            Some((_, b)) if b >= v => acc,
            _ => Some((s, v)),
        })
        .map(|(s, _)| s);
    let worst = averages
        .iter()
        .copied()
        .fold(None::<(Strategy, f64)>, |acc, (s, v)| match acc {
            Some((_, w)) if w <= v => acc,
            _ => Some((s, v)),
        })
        .map(|(s, _)| s);
    PerformanceSnapshot {
        agent_id: agent_id.clone(),
        published_count: published,
        total_views: 0,
        avg_views: 0.0,
        total_likes: 0,
        total_comments: 0,
        total_saves: 0,
        total_reach: 0,
        engagement_rate: 0.0,
        best_strategy: best,
        worst_strategy: worst,
        strategy_samples: strategy_avg_views.keys().map(|s| (*s, 1)).collect(),
        strategy_avg_views,
        consistency: 50.0,
        avg_examiner_score: 0.0,
        survival_score: survival,
        window_start: test_now() - chrono::Duration::hours(30),
        window_end: test_now() - chrono::Duration::hours(24),
        recorded_at: test_now(),
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryConfigStore {
    /// Make every subsequent read and write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("config store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Accepts writes but never returns anything, so every write fails verification.
pub struct SilentConfigStore;

#[async_trait]
impl ConfigStore for SilentConfigStore {
    async fn get_value(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put_value(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    agents: BTreeMap<AgentId, AgentDna>,
    snapshots: Vec<PerformanceSnapshot>,
    mutations: Vec<MutationRecord>,
    genes: Vec<GenePoolEntry>,
    brands: BTreeMap<BrandId, Brand>,
    proposals: HashMap<ProposalId, Proposal>,
    trends: BTreeMap<String, TrendTopic>,
    jobs: BTreeMap<JobId, WorkItem>,
}

/// In-memory [`Store`](crate::store::Store) with switchable failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every agent read for `delay` after taking its copy, so a
    /// concurrent writer can land in between.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    async fn read_pause(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Apply `change` to the agent row under the store lock.
    fn update_agent(&self, agent_id: &AgentId, change: impl FnOnce(&mut AgentDna)) -> Result<()> {
        self.check()?;
        if let Some(agent) = self.state.lock().unwrap().agents.get_mut(agent_id) {
            change(agent);
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("store unavailable"))
        } else {
            Ok(())
        }
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn all_jobs(&self) -> Vec<WorkItem> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn all_mutations(&self) -> Vec<MutationRecord> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn active_agents(&self) -> Vec<AgentDna> {
        let mut agents: Vec<AgentDna> = self
            .state
            .lock()
            .unwrap()
            .agents
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect();
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        agents
    }

    /// Poll until the job reaches `status`.
    pub async fn wait_for_status(&self, job_id: &JobId, status: JobStatus) -> WorkItem {
        for _ in 0..500 {
            let job = self.state.lock().unwrap().jobs.get(job_id).cloned();
            if let Some(job) = job
                && job.status == status
            {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached {status}");
    }
}

#[async_trait]
impl AgentRepository for MemoryStore {
    async fn list_agents(&self) -> Result<Vec<AgentDna>> {
        self.check()?;
        let mut agents: Vec<AgentDna> =
            self.state.lock().unwrap().agents.values().cloned().collect();
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        self.read_pause().await;
        Ok(agents)
    }

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentDna>> {
        self.check()?;
        let agent = self.state.lock().unwrap().agents.get(agent_id).cloned();
        self.read_pause().await;
        Ok(agent)
    }

    async fn save_agent(&self, agent: &AgentDna) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .agents
            .insert(agent.agent_id.clone(), agent.clone());
        Ok(())
    }

    async fn add_lifetime_counts(
        &self,
        agent_id: &AgentId,
        proposals: u64,
        accepted: u64,
    ) -> Result<()> {
        self.update_agent(agent_id, |agent| {
            agent.lifetime_proposals += proposals;
            agent.lifetime_accepted += accepted;
        })
    }

    async fn record_survival(
        &self,
        agent_id: &AgentId,
        survival_score: f64,
        views: u64,
    ) -> Result<()> {
        self.update_agent(agent_id, |agent| {
            agent.survival_score = survival_score;
            agent.lifetime_views += views;
        })
    }

    async fn deactivate_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.update_agent(agent_id, |agent| agent.active = false)
    }

    async fn apply_mutation(&self, evolved: &AgentDna, expected_generation: u32) -> Result<bool> {
        let mut applied = false;
        self.update_agent(&evolved.agent_id, |agent| {
            if agent.generation == expected_generation {
                agent.strategy_weights = evolved.strategy_weights.clone();
                agent.exploration = evolved.exploration;
                agent.generation = evolved.generation;
                agent.mutation_count = evolved.mutation_count;
                agent.last_mutation_at = evolved.last_mutation_at;
                applied = true;
            }
        })?;
        Ok(applied)
    }

    async fn append_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn recent_snapshots(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<PerformanceSnapshot>> {
        self.check()?;
        let mut snapshots: Vec<PerformanceSnapshot> = self
            .state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| &s.agent_id == agent_id)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    async fn snapshot_count(&self, agent_id: &AgentId) -> Result<usize> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| &s.agent_id == agent_id)
            .count())
    }

    async fn append_mutation(&self, record: &MutationRecord) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().mutations.push(record.clone());
        Ok(())
    }

    async fn mutations_for(&self, agent_id: &AgentId) -> Result<Vec<MutationRecord>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .mutations
            .iter()
            .filter(|m| &m.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn archive_gene(&self, entry: &GenePoolEntry) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.genes.retain(|g| g.entry_id != entry.entry_id);
        state.genes.push(entry.clone());
        Ok(())
    }

    async fn gene_pool(&self) -> Result<Vec<GenePoolEntry>> {
        self.check()?;
        let mut genes = self.state.lock().unwrap().genes.clone();
        genes.sort_by(|a, b| b.survival_score.total_cmp(&a.survival_score));
        Ok(genes)
    }

    async fn increment_inheritance(&self, entry_id: &GeneEntryId) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.genes.iter_mut().find(|g| &g.entry_id == entry_id) {
            entry.inherit_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn list_brands(&self) -> Result<Vec<Brand>> {
        self.check()?;
        let mut brands: Vec<Brand> =
            self.state.lock().unwrap().brands.values().cloned().collect();
        brands.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.brand_id.cmp(&b.brand_id))
        });
        Ok(brands)
    }

    async fn save_brand(&self, brand: &Brand) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .brands
            .insert(brand.brand_id.clone(), brand.clone());
        Ok(())
    }

    async fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .proposals
            .insert(proposal.proposal_id.clone(), proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: &ProposalId) -> Result<Option<Proposal>> {
        self.check()?;
        Ok(self.state.lock().unwrap().proposals.get(proposal_id).cloned())
    }

    async fn save_trends(&self, topics: &[TrendTopic]) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for topic in topics {
            state
                .trends
                .insert(trend_key(&topic.brand_id, &topic.topic), topic.clone());
        }
        Ok(())
    }

    async fn recent_trends(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<TrendTopic>> {
        self.check()?;
        let mut topics: Vec<TrendTopic> = self
            .state
            .lock()
            .unwrap()
            .trends
            .values()
            .filter(|t| &t.brand_id == brand_id)
            .cloned()
            .collect();
        topics.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at));
        topics.truncate(limit);
        Ok(topics)
    }

    async fn trend_count(&self) -> Result<u64> {
        self.check()?;
        Ok(self.state.lock().unwrap().trends.len() as u64)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn save_job(&self, job: &WorkItem) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .jobs
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<WorkItem>> {
        self.check()?;
        Ok(self.state.lock().unwrap().jobs.get(job_id).cloned())
    }

    async fn find_job_by_proposal(&self, proposal_id: &ProposalId) -> Result<Option<WorkItem>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .values()
            .find(|j| j.proposal_id.as_ref() == Some(proposal_id))
            .cloned())
    }

    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<WorkItem>> {
        self.check()?;
        let mut jobs: Vec<WorkItem> = self
            .state
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}

/// Writer that drafts a proposal from the directive.
#[derive(Default)]
pub struct FakeWriter {
    briefs: Mutex<Vec<ProposalBrief>>,
    failing_brand: Mutex<Option<BrandId>>,
    hold: Option<Arc<Semaphore>>,
}

impl FakeWriter {
    /// A writer whose calls block until the returned semaphore gets permits.
    pub fn held() -> (Self, Arc<Semaphore>) {
        let hold = Arc::new(Semaphore::new(0));
        let writer = Self {
            hold: Some(hold.clone()),
            ..Default::default()
        };
        (writer, hold)
    }

    pub fn fail_for(&self, brand_id: BrandId) {
        *self.failing_brand.lock().unwrap() = Some(brand_id);
    }

    pub fn briefs(&self) -> Vec<ProposalBrief> {
        self.briefs.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.briefs.lock().unwrap().len()
    }
}

#[async_trait]
impl ProposalWriter for FakeWriter {
    async fn write(&self, brief: &ProposalBrief) -> Result<ProposalDraft> {
        if let Some(hold) = &self.hold {
            let _permit = hold.acquire().await?;
        }
        self.briefs.lock().unwrap().push(brief.clone());
        if self.failing_brand.lock().unwrap().as_ref() == Some(&brief.brand_id) {
            return Err(anyhow!("writer rejected brand {}", brief.brand_id));
        }
        Ok(ProposalDraft {
            title: format!("{} for {}", brief.plan.strategy(), brief.brand_name),
            body: brief.directive.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum RunnerBehavior {
    Succeed,
    Fail(String),
    Hang,
}

pub struct FakeRunner {
    behavior: Mutex<RunnerBehavior>,
    runs: AtomicUsize,
}

impl FakeRunner {
    pub fn new(behavior: RunnerBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: RunnerBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub async fn wait_for_runs(&self, expected: usize) {
        for _ in 0..500 {
            if self.run_count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("runner saw {} runs, expected {expected}", self.run_count());
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(
        &self,
        _job: &WorkItem,
        _proposal: Option<&Proposal>,
        progress: &ProgressReporter,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        progress.report("rendering", 50).await;
        match behavior {
            RunnerBehavior::Succeed => Ok(()),
            RunnerBehavior::Fail(message) => Err(anyhow!(message)),
            RunnerBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct FakeOutcomes {
    items: Mutex<Vec<PublishedItem>>,
    winners: Mutex<HashMap<BrandId, Vec<WinnerRef>>>,
    failing: AtomicBool,
}

impl FakeOutcomes {
    pub fn publish(&self, item: PublishedItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn set_winners(&self, brand_id: BrandId, winners: Vec<WinnerRef>) {
        self.winners.lock().unwrap().insert(brand_id, winners);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutcomeSource for FakeOutcomes {
    async fn published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("analytics unavailable"));
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.published_at >= start && i.published_at < end)
            .cloned()
            .collect())
    }

    async fn top_performers(&self, brand_id: &BrandId, limit: usize) -> Result<Vec<WinnerRef>> {
        let mut winners = self
            .winners
            .lock()
            .unwrap()
            .get(brand_id)
            .cloned()
            .unwrap_or_default();
        winners.truncate(limit);
        Ok(winners)
    }
}

#[derive(Default)]
pub struct FakeScout {
    topics: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeScout {
    pub fn with_topics(topics: &[&str]) -> Self {
        Self {
            topics: Mutex::new(topics.iter().map(|t| t.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendScout for FakeScout {
    async fn discover(&self, brand: &Brand) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .topics
            .lock()
            .unwrap()
            .iter()
            .map(|t| format!("{} {}", brand.name, t))
            .collect())
    }
}

#[derive(Default)]
pub struct FakePublisher {
    calls: AtomicUsize,
}

impl FakePublisher {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn schedule_ready_outputs(&self) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

/// Handles to every fake collaborator plus the bundle built from them.
pub struct FakeServices {
    pub writer: Arc<FakeWriter>,
    pub runner: Arc<FakeRunner>,
    pub outcomes: Arc<FakeOutcomes>,
    pub scout: Arc<FakeScout>,
    pub publisher: Arc<FakePublisher>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::with_writer(FakeWriter::default())
    }

    pub fn with_writer(writer: FakeWriter) -> Self {
        Self {
            writer: Arc::new(writer),
            runner: Arc::new(FakeRunner::new(RunnerBehavior::Succeed)),
            outcomes: Arc::new(FakeOutcomes::default()),
            scout: Arc::new(FakeScout::with_topics(&["harvest festival", "solar eclipse"])),
            publisher: Arc::new(FakePublisher::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            writer: self.writer.clone(),
            runner: self.runner.clone(),
            outcomes: self.outcomes.clone(),
            scout: self.scout.clone(),
            publisher: self.publisher.clone(),
        }
    }
}
