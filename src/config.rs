//! Orchestrator configuration.
//!
//! Configuration lives in an optional JSON file. Every section has defaults,
//! so an absent file (or an absent section) yields a working orchestrator.
//! `${VAR}` references in the file are expanded from the environment before
//! parsing.

use chrono::{FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::Path, path::PathBuf};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub burst: BurstConfig,
    pub gate: GateConfig,
    pub schedule: ScheduleConfig,
    pub dna: DnaConfig,
    pub feedback: FeedbackConfig,
    pub adaptation: AdaptationConfig,
    pub selection: SelectionConfig,
    pub healing: HealingConfig,
    pub bootstrap: BootstrapConfig,
    pub diagnostics: DiagnosticsConfig,
    pub collaborators: CollaboratorConfig,
}

/// Daily burst settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Offset of the reference timezone that defines "today" for the burst.
    pub reference_utc_offset_hours: i32,
    /// Reference-time hour before which the burst waits.
    pub cutoff_hour: u32,
    pub reels_per_brand: usize,
    pub posts_per_brand: usize,
    /// How many historical winners an agent sees per request.
    pub winners_per_request: usize,
    /// How many trend topics an agent sees per request.
    pub topics_per_request: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            reference_utc_offset_hours: -5,
            cutoff_hour: 12,
            reels_per_brand: 6,
            posts_per_brand: 3,
            winners_per_request: 10,
            topics_per_request: 10,
        }
    }
}

impl BurstConfig {
    pub fn reference_offset(&self) -> OrchestratorResult<FixedOffset> {
        FixedOffset::east_opt(self.reference_utc_offset_hours * 3600).ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!(
                "reference_utc_offset_hours {} is out of range",
                self.reference_utc_offset_hours
            ))
        })
    }
}

/// Concurrency gate shared by every work-item launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_concurrent_jobs: usize,
    pub stagger_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            stagger_secs: 8,
        }
    }
}

impl GateConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }
}

/// Cycle cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub burst_check_mins: u64,
    pub observe_hours: u64,
    pub feedback_hours: u64,
    pub healing_mins: u64,
    pub diagnostics_hours: u64,
    pub bootstrap_mins: u64,
    pub selection_weekday: Weekday,
    pub selection_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            burst_check_mins: 10,
            observe_hours: 3,
            feedback_hours: 6,
            healing_mins: 15,
            diagnostics_hours: 4,
            bootstrap_mins: 20,
            selection_weekday: Weekday::Sun,
            selection_hour: 3,
        }
    }
}

/// Bounds and defaults for agent DNA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnaConfig {
    pub exploration_min: f64,
    pub exploration_max: f64,
    pub default_exploration: f64,
    pub default_proposals_per_brand: usize,
}

impl Default for DnaConfig {
    fn default() -> Self {
        Self {
            exploration_min: 0.60,
            exploration_max: 0.98,
            default_exploration: 0.85,
            default_proposals_per_brand: 6,
        }
    }
}

impl DnaConfig {
    pub fn clamp_exploration(&self, value: f64) -> f64 {
        value.clamp(self.exploration_min, self.exploration_max)
    }
}

/// Relative weight of each survival-score component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalWeights {
    pub views: f64,
    pub engagement: f64,
    pub consistency: f64,
    pub examiner: f64,
}

impl Default for SurvivalWeights {
    fn default() -> Self {
        Self {
            views: 0.40,
            engagement: 0.30,
            consistency: 0.20,
            examiner: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Attribution window start, in hours before now.
    pub window_start_hours: u32,
    /// Attribution window end, in hours before now.
    pub window_end_hours: u32,
    /// Average views at which the views component saturates.
    pub views_cap: f64,
    /// Engagement rate (x1000) at which the engagement component saturates.
    pub engagement_cap: f64,
    pub survival_weights: SurvivalWeights,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window_start_hours: 30,
            window_end_hours: 24,
            views_cap: 100_000.0,
            engagement_cap: 100.0,
            survival_weights: SurvivalWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub min_samples: usize,
    pub weight_shift_cap: f64,
    pub exploration_shift_cap: f64,
    pub min_weight: f64,
    pub confidence_threshold: f64,
    pub dominance_ratio: f64,
    /// Survival score above which the agent exploits (lower exploration).
    pub exploit_above: f64,
    /// Survival score below which the agent explores more.
    pub explore_below: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            weight_shift_cap: 0.10,
            exploration_shift_cap: 0.05,
            min_weight: 0.05,
            confidence_threshold: 0.70,
            dominance_ratio: 1.5,
            exploit_above: 60.0,
            explore_below: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub thriving_fraction: f64,
    pub surviving_fraction: f64,
    /// Thriving agents above this score are archived as top performers.
    pub archive_threshold: f64,
    pub death_threshold: f64,
    /// Selection never retires an agent if that would leave this many or fewer.
    pub protected_minimum: usize,
    /// Snapshots an agent needs before it can be retired.
    pub min_feedback_cycles: usize,
    /// Consecutive recent snapshots that must all sit below the death threshold.
    pub death_window: usize,
    pub inherit_probability: f64,
    pub gene_pool_top_k: usize,
    pub exploration_jitter: f64,
    pub weight_jitter: f64,
    /// Fixed seed for reproducible selection runs.
    pub rng_seed: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            thriving_fraction: 0.40,
            surviving_fraction: 0.40,
            archive_threshold: 50.0,
            death_threshold: 20.0,
            protected_minimum: 2,
            min_feedback_cycles: 8,
            // Four feedback cycles a day for two weeks.
            death_window: 56,
            inherit_probability: 0.80,
            gene_pool_top_k: 5,
            exploration_jitter: 0.05,
            weight_jitter: 0.05,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub timeout_mins: i64,
    pub lookback_hours: i64,
    pub max_retries: u32,
    pub notification_capacity: usize,
    pub error_excerpt_chars: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            timeout_mins: 30,
            lookback_hours: 24,
            max_retries: 2,
            notification_capacity: 50,
            error_excerpt_chars: 300,
        }
    }
}

/// Aggressive early trend discovery that switches itself off once mature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub enabled: bool,
    pub max_days: i64,
    pub trend_target: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_days: 7,
            trend_target: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub activity_log_capacity: usize,
    /// Recent failure ratio above which diagnostics logs an alert.
    pub failure_ratio_alert: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            activity_log_capacity: 500,
            failure_ratio_alert: 0.5,
        }
    }
}

/// Where the external content services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            request_timeout_secs: 120,
            api_key: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from `path`, `ORCHESTRATOR_CONFIG`, or
    /// `./orchestrator.json`, falling back to defaults when none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match resolve_config_path(path)? {
            Some(path) => {
                let raw = fs::read_to_string(&path)?;
                let expanded = expand_env_vars(&raw);
                let config: OrchestratorConfig = serde_json::from_str(&expanded)
                    .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;
                tracing::info!("Loaded orchestrator config from {}", path.display());
                config
            }
            None => OrchestratorConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break engine invariants.
    pub fn validate(&self) -> OrchestratorResult<()> {
        let invalid = |msg: String| Err(OrchestratorError::InvalidConfig(msg));

        self.burst.reference_offset()?;
        if self.burst.cutoff_hour > 23 {
            return invalid(format!("cutoff_hour {} is not an hour", self.burst.cutoff_hour));
        }
        if self.schedule.selection_hour > 23 {
            return invalid(format!(
                "selection_hour {} is not an hour",
                self.schedule.selection_hour
            ));
        }
        if self.gate.max_concurrent_jobs == 0 {
            return invalid("gate.max_concurrent_jobs must be at least 1".to_string());
        }
        if self.dna.exploration_min > self.dna.exploration_max {
            return invalid(format!(
                "exploration_min {} exceeds exploration_max {}",
                self.dna.exploration_min, self.dna.exploration_max
            ));
        }
        if self.feedback.window_start_hours <= self.feedback.window_end_hours {
            return invalid("feedback window must start before it ends".to_string());
        }
        let survival = &self.feedback.survival_weights;
        let survival_sum =
            survival.views + survival.engagement + survival.consistency + survival.examiner;
        if (survival_sum - 1.0).abs() > 1e-6 {
            return invalid(format!("survival weights sum to {survival_sum}, expected 1.0"));
        }
        if self.selection.thriving_fraction + self.selection.surviving_fraction > 1.0 {
            return invalid("selection tier fractions exceed 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.selection.inherit_probability) {
            return invalid("selection.inherit_probability must be within [0, 1]".to_string());
        }
        if self.adaptation.min_weight < 0.0 || self.adaptation.weight_shift_cap < 0.0 {
            return invalid("adaptation caps must be non-negative".to_string());
        }

        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow::anyhow!("config file {} does not exist", path.display()));
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(p) = env::var("ORCHESTRATOR_CONFIG") {
        return Ok(Some(PathBuf::from(p)));
    }

    let candidate = PathBuf::from("orchestrator.json");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(val) => out.push_str(&val),
                Err(_) => {
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}
