//! The orchestrator daemon: owns run state and composes the engines into the
//! daily burst and the periodic cycles.

pub mod burst;
pub mod cycles;
pub mod state;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, reference_date, reference_hour};
use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::core::{ConcurrencyGate, CycleScheduler, CycleStats, JobDispatcher};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::evolution::{AdaptationEngine, FeedbackEngine, SelectionEngine};
use crate::healing::{HealingEngine, HealingNotification};
use crate::model::{AgentDna, Brand};
use crate::settings::{KEY_BOOTSTRAP_ENABLED, KEY_LAST_DAILY_RUN, KEY_PAUSED, Settings};
use crate::store::{AgentRepository, ConfigStore, ContentRepository, Store};

pub use burst::{AgentTally, BurstReport, PhaseReport, split_quota};
pub use cycles::BootstrapOutcome;
pub use state::{BurstDecision, DiagnosticsReport, RunState};

/// Everything the orchestrator needs from the outside world.
pub struct OrchestratorDeps {
    pub store: Arc<dyn Store>,
    pub config_store: Arc<dyn ConfigStore>,
    pub collaborators: Collaborators,
    pub clock: Arc<dyn Clock>,
    pub config: OrchestratorConfig,
}

/// Status snapshot served to operators. Settings that could not be read
/// are reported as null.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub paused: Option<bool>,
    pub burst_running: bool,
    pub last_daily_run: Option<DateTime<Utc>>,
    pub bootstrap_enabled: Option<bool>,
    pub cycles: Vec<CycleStats>,
    pub state: RunState,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    settings: Settings,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    reference_offset: FixedOffset,
    dispatcher: JobDispatcher,
    feedback: FeedbackEngine,
    adaptation: AdaptationEngine,
    selection: SelectionEngine,
    healing: HealingEngine,
    scheduler: CycleScheduler,
    state: RwLock<RunState>,
    burst_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> OrchestratorResult<Self> {
        let OrchestratorDeps {
            store,
            config_store,
            collaborators,
            clock,
            config,
        } = deps;
        config.validate()?;

        let gate = Arc::new(ConcurrencyGate::from_config(&config.gate));
        let dispatcher = JobDispatcher::new(
            store.clone(),
            collaborators.runner.clone(),
            gate,
            clock.clone(),
        );
        let feedback = FeedbackEngine::new(
            store.clone(),
            collaborators.outcomes.clone(),
            clock.clone(),
            config.feedback.clone(),
        );
        let adaptation = AdaptationEngine::new(
            store.clone(),
            clock.clone(),
            config.adaptation.clone(),
            config.dna.clone(),
        );
        let selection = SelectionEngine::new(
            store.clone(),
            clock.clone(),
            config.selection.clone(),
            config.dna.clone(),
        );
        let healing = HealingEngine::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            config.healing.clone(),
            config.dna.clone(),
        );
        let state = RunState::new(
            clock.now(),
            config.diagnostics.activity_log_capacity,
            config.healing.notification_capacity,
        );

        Ok(Self {
            reference_offset: config.burst.reference_offset()?,
            settings: Settings::new(config_store),
            scheduler: CycleScheduler::new(clock.clone()),
            state: RwLock::new(state),
            burst_lock: Mutex::new(()),
            store,
            collaborators,
            clock,
            config,
            dispatcher,
            feedback,
            adaptation,
            selection,
            healing,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register every periodic cycle with the scheduler.
    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        if self.settings.bootstrap_enabled(self.config.bootstrap.enabled).await?
            && self.settings.bootstrap_started_at().await?.is_none()
        {
            self.settings.set_bootstrap_started_at(self.clock.now()).await?;
        }
        self.register_cycles()?;
        self.log("orchestrator", "started").await;
        info!("Orchestrator started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        info!("Orchestrator stopped");
    }

    /// Wait for every dispatched work item to finish executing. One-shot
    /// commands call this before exiting so queued items are not dropped
    /// with the runtime.
    pub async fn wait_for_dispatched(&self) {
        let gate = self.dispatcher.gate();
        let in_flight = gate.in_flight();
        if in_flight > 0 {
            info!(in_flight, "Waiting for dispatched work items to finish");
        }
        gate.wait_idle().await;
    }

    /// The periodic daily-burst decision.
    pub async fn check_daily_burst(&self) -> BurstDecision {
        match self.collaborators.publisher.schedule_ready_outputs().await {
            Ok(0) => {}
            Ok(scheduled) => info!(scheduled, "Handed ready outputs to the publisher"),
            Err(e) => warn!("Publisher hand-off failed: {:#}", e),
        }

        let paused = match self.settings.is_paused().await {
            Ok(paused) => paused,
            Err(e) => return store_unavailable(e),
        };
        if paused {
            return BurstDecision::Paused;
        }

        let last_run = match self.settings.last_daily_run().await {
            Ok(last_run) => last_run,
            Err(e) => return store_unavailable(e),
        };
        let now = self.clock.now();
        let today = reference_date(now, self.reference_offset);
        if let Some(last) = last_run
            && reference_date(last, self.reference_offset) == today
        {
            return BurstDecision::AlreadyRan;
        }
        if reference_hour(now, self.reference_offset) < self.config.burst.cutoff_hour {
            return BurstDecision::TooEarly;
        }

        let Ok(_guard) = self.burst_lock.try_lock() else {
            info!("Burst already running, skipping daily check");
            return BurstDecision::AlreadyRunning;
        };
        let decision = self.execute_burst(false).await;
        if let Err(e) = self.settings.set_last_daily_run(now).await {
            error!("Failed to persist last daily run: {}", e);
        }
        decision
    }

    /// Run a burst right away, regardless of pause state and the daily slot.
    pub async fn trigger_burst_now(&self) -> BurstDecision {
        let Ok(_guard) = self.burst_lock.try_lock() else {
            info!("Burst already running, ignoring manual trigger");
            return BurstDecision::AlreadyRunning;
        };
        self.execute_burst(true).await
    }

    async fn execute_burst(&self, manual: bool) -> BurstDecision {
        match self.run_burst(manual).await {
            Ok(report) => {
                self.state.write().await.record_burst(&report);
                BurstDecision::Ran(report)
            }
            Err(e) => {
                error!("Burst failed: {:#}", e);
                self.log("burst", format!("burst failed: {e:#}")).await;
                BurstDecision::Failed {
                    error: format!("{e:#}"),
                }
            }
        }
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        let burst_running = self.burst_lock.try_lock().is_err();
        let bootstrap_enabled = self
            .settings
            .bootstrap_enabled(self.config.bootstrap.enabled)
            .await;
        StatusSnapshot {
            paused: readable(KEY_PAUSED, self.settings.is_paused().await),
            burst_running,
            last_daily_run: readable(KEY_LAST_DAILY_RUN, self.settings.last_daily_run().await)
                .flatten(),
            bootstrap_enabled: readable(KEY_BOOTSTRAP_ENABLED, bootstrap_enabled),
            cycles: self.scheduler.stats(),
            state: self.state.read().await.clone(),
        }
    }

    pub async fn set_paused(&self, paused: bool) -> OrchestratorResult<()> {
        self.settings.set_paused(paused).await?;
        self.log("operator", if paused { "paused" } else { "resumed" }).await;
        info!(paused, "Daily burst pause toggled");
        Ok(())
    }

    /// Healing notifications, newest first.
    pub async fn notifications(&self) -> Vec<HealingNotification> {
        self.state.read().await.notifications.iter().cloned().collect()
    }

    pub async fn agents(&self) -> Result<Vec<AgentDna>> {
        self.store.list_agents().await
    }

    /// Register a brand and provision its agent.
    pub async fn add_brand(&self, name: &str) -> Result<(Brand, AgentDna)> {
        let now = self.clock.now();
        let brand = Brand::new(name.trim(), now);
        self.store.save_brand(&brand).await?;
        let agent = AgentDna::provision_for_brand(&brand, &self.config.dna, now);
        self.store.save_agent(&agent).await?;
        self.log("operator", format!("added brand {} with agent {}", brand.name, agent.name))
            .await;
        info!(brand_id = %brand.brand_id, agent_id = %agent.agent_id, "Added brand");
        Ok((brand, agent))
    }

    async fn log(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        debug!(source, "{}", message);
        self.state.write().await.log(self.clock.now(), source, message);
    }
}

fn store_unavailable(e: OrchestratorError) -> BurstDecision {
    error!("Config store unavailable, skipping daily burst check: {}", e);
    BurstDecision::StoreUnavailable {
        error: e.to_string(),
    }
}

fn readable<T>(key: &str, value: OrchestratorResult<T>) -> Option<T> {
    value
        .inspect_err(|e| warn!(key, "Failed to read setting: {}", e))
        .ok()
}
