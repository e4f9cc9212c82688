//! Process-lifetime run state. Rebuilt on every restart.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::evolution::SelectionReport;
use crate::healing::{HealingNotification, HealingReport};
use crate::orchestrator::burst::BurstReport;
use crate::types::AgentId;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentCounters {
    pub proposals: u64,
    pub dispatched: u64,
    pub failures: u64,
    pub last_burst_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleRecord {
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub active_brands: usize,
    pub active_agents: usize,
    pub average_survival: f64,
    pub top_agent: Option<String>,
    pub pending_jobs: usize,
    pub generating_jobs: usize,
    pub recent_completed: usize,
    pub recent_failed: usize,
    pub failure_ratio: f64,
    pub gate_capacity: usize,
    pub gate_available: usize,
    pub pending_notifications: usize,
    pub alert: bool,
}

/// What the daily burst check decided.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BurstDecision {
    Paused,
    AlreadyRan,
    TooEarly,
    AlreadyRunning,
    Ran(BurstReport),
    Failed { error: String },
    /// The persisted guards could not be read, so the tick was skipped.
    StoreUnavailable { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub started_at: DateTime<Utc>,
    pub agents: BTreeMap<AgentId, AgentCounters>,
    pub cycles: BTreeMap<String, CycleRecord>,
    pub activity: VecDeque<ActivityEntry>,
    /// Newest first.
    pub notifications: VecDeque<HealingNotification>,
    pub total_healed: u64,
    pub total_healing_failures: u64,
    pub last_burst: Option<BurstReport>,
    pub last_selection: Option<SelectionReport>,
    pub last_diagnostics: Option<DiagnosticsReport>,
    #[serde(skip)]
    activity_capacity: usize,
    #[serde(skip)]
    notification_capacity: usize,
}

impl RunState {
    pub fn new(
        started_at: DateTime<Utc>,
        activity_capacity: usize,
        notification_capacity: usize,
    ) -> Self {
        Self {
            started_at,
            agents: BTreeMap::new(),
            cycles: BTreeMap::new(),
            activity: VecDeque::new(),
            notifications: VecDeque::new(),
            total_healed: 0,
            total_healing_failures: 0,
            last_burst: None,
            last_selection: None,
            last_diagnostics: None,
            activity_capacity: activity_capacity.max(1),
            notification_capacity: notification_capacity.max(1),
        }
    }

    /// Append to the activity log, dropping the oldest entries past capacity.
    pub fn log(&mut self, at: DateTime<Utc>, source: &str, message: impl Into<String>) {
        self.activity.push_back(ActivityEntry {
            at,
            source: source.to_string(),
            message: message.into(),
        });
        while self.activity.len() > self.activity_capacity {
            self.activity.pop_front();
        }
    }

    pub fn record_cycle(&mut self, name: &str, at: DateTime<Utc>) {
        let record = self.cycles.entry(name.to_string()).or_default();
        record.runs += 1;
        record.last_run = Some(at);
    }

    /// Push notifications, given newest first, onto the front of the queue.
    pub fn push_notifications(&mut self, newest_first: &[HealingNotification]) {
        for notification in newest_first.iter().rev() {
            self.notifications.push_front(notification.clone());
        }
        self.notifications.truncate(self.notification_capacity);
    }

    pub fn record_healing(&mut self, at: DateTime<Utc>, report: &HealingReport) {
        self.total_healed += report.healed() as u64;
        self.total_healing_failures += report.failures() as u64;
        self.push_notifications(&report.notifications);
        if !report.timed_out.is_empty() || report.healed() > 0 || report.failures() > 0 {
            self.log(
                at,
                "healing",
                format!(
                    "{} timed out, {} retried, {} escalated",
                    report.timed_out.len(),
                    report.healed(),
                    report.failures()
                ),
            );
        }
        for agent_id in &report.population.provisioned {
            self.log(at, "healing", format!("provisioned agent {agent_id}"));
        }
    }

    pub fn record_burst(&mut self, report: &BurstReport) {
        for tally in report.phases.iter().flat_map(|phase| phase.agents.iter()) {
            let counters = self.agents.entry(tally.agent_id.clone()).or_default();
            counters.proposals += tally.proposals as u64;
            counters.dispatched += tally.dispatched as u64;
            counters.failures += tally.failures as u64;
            counters.last_burst_at = Some(report.started_at);
        }
        self.log(
            report.finished_at,
            "burst",
            format!(
                "{} burst: {} proposals, {} dispatched, {} failures",
                if report.manual { "manual" } else { "daily" },
                report.total_proposals(),
                report.total_dispatched(),
                report.total_failures()
            ),
        );
        self.last_burst = Some(report.clone());
    }
}
