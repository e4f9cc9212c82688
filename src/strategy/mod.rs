//! Content strategies an agent can pursue, their weights, and the concrete
//! per-proposal plans built from them.
//!
//! Strategies form a closed set. A [`StrategyPlan`] carries the parameters one
//! proposal needs (which winner to iterate on, which topic to ride) and is
//! turned into a writer directive by exhaustive match, so a misspelled
//! strategy is a compile error rather than a silent fallback.

pub mod allocator;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestratorError;
use crate::types::JobId;

pub use allocator::allocate;

/// Tolerance used when checking that weights sum to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fresh ideas with no reference material.
    Explore,
    /// A new take on a proven winner.
    Iterate,
    /// Close variations of the single best winner.
    DoubleDown,
    /// Ride a topic discovered by the trend scout.
    Trending,
    /// Blend two winners into one piece.
    Remix,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Explore,
        Strategy::Iterate,
        Strategy::DoubleDown,
        Strategy::Trending,
        Strategy::Remix,
    ];

    /// Strategy that absorbs weight from unusable strategies and rounding error.
    pub const DEFAULT: Strategy = Strategy::Explore;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Iterate => "iterate",
            Self::DoubleDown => "double_down",
            Self::Trending => "trending",
            Self::Remix => "remix",
        }
    }

    /// Whether this strategy needs historical winners to build a plan.
    pub fn needs_winners(&self) -> bool {
        matches!(self, Self::Iterate | Self::DoubleDown | Self::Remix)
    }

    /// Whether this strategy needs discovered trend topics.
    pub fn needs_trends(&self) -> bool {
        matches!(self, Self::Trending)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidDna(format!("unknown strategy `{s}`")))
    }
}

/// Serde helpers for maps keyed by [`Strategy`].
///
/// Keys are written as their snake_case names so the map round-trips through
/// JSON and through the database as a plain object.
pub mod keyed {
    use super::*;
    use serde::ser::SerializeMap;

    pub fn serialize<S, T>(map: &BTreeMap<Strategy, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (strategy, value) in map {
            out.serialize_entry(strategy.as_str(), value)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<Strategy, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let raw = BTreeMap::<String, T>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, value)| {
                key.parse::<Strategy>()
                    .map(|strategy| (strategy, value))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// Non-negative strategy weights that sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyWeights(#[serde(with = "keyed")] BTreeMap<Strategy, f64>);

impl StrategyWeights {
    /// Build weights from arbitrary non-negative values, normalizing them.
    pub fn new(weights: impl IntoIterator<Item = (Strategy, f64)>) -> Self {
        let mut out = Self(weights.into_iter().collect());
        out.normalize();
        out
    }

    /// The default mix given to freshly provisioned agents.
    pub fn starter() -> Self {
        Self::new([
            (Strategy::Explore, 0.40),
            (Strategy::Iterate, 0.25),
            (Strategy::DoubleDown, 0.10),
            (Strategy::Trending, 0.15),
            (Strategy::Remix, 0.10),
        ])
    }

    pub fn get(&self, strategy: Strategy) -> f64 {
        self.0.get(&strategy).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, strategy: Strategy) -> bool {
        self.0.contains_key(&strategy)
    }

    /// Set a raw weight. Call [`normalize`](Self::normalize) afterwards.
    pub fn set(&mut self, strategy: Strategy, weight: f64) {
        self.0.insert(strategy, weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Strategy, f64)> + '_ {
        self.0.iter().map(|(s, w)| (*s, *w))
    }

    pub fn as_map(&self) -> &BTreeMap<Strategy, f64> {
        &self.0
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clamp negative or non-finite weights to zero and rescale to sum to one.
    ///
    /// An all-zero map collapses onto [`Strategy::DEFAULT`].
    pub fn normalize(&mut self) {
        for weight in self.0.values_mut() {
            if !weight.is_finite() || *weight < 0.0 {
                *weight = 0.0;
            }
        }

        let total = self.sum();
        if total <= f64::EPSILON {
            self.0.insert(Strategy::DEFAULT, 1.0);
            for (strategy, weight) in self.0.iter_mut() {
                if *strategy != Strategy::DEFAULT {
                    *weight = 0.0;
                }
            }
            return;
        }

        for weight in self.0.values_mut() {
            *weight /= total;
        }
    }

    /// Whether the weights satisfy the sum-to-one, non-negative invariant.
    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE && self.0.values().all(|w| *w >= 0.0)
    }
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self::starter()
    }
}

/// A historical top performer used as reference material by winner-based
/// strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerRef {
    pub job_id: JobId,
    pub title: String,
    pub views: u64,
}

/// Which externally-determined preconditions hold for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrategyAvailability {
    pub has_winners: bool,
    pub has_trends: bool,
}

impl StrategyAvailability {
    pub fn all() -> Self {
        Self {
            has_winners: true,
            has_trends: true,
        }
    }

    pub fn is_usable(&self, strategy: Strategy) -> bool {
        (!strategy.needs_winners() || self.has_winners)
            && (!strategy.needs_trends() || self.has_trends)
    }
}

/// Reference material available when planning proposals for one brand.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    pub winners: Vec<WinnerRef>,
    pub topics: Vec<String>,
}

impl PlanInputs {
    pub fn availability(&self) -> StrategyAvailability {
        StrategyAvailability {
            has_winners: !self.winners.is_empty(),
            has_trends: !self.topics.is_empty(),
        }
    }
}

/// One proposal's worth of strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyPlan {
    Explore { novelty: f64 },
    Iterate { winner: WinnerRef },
    DoubleDown { winner: WinnerRef, variation: u32 },
    Trending { topic: String },
    Remix { primary: WinnerRef, secondary: WinnerRef },
}

impl StrategyPlan {
    /// Build a plan for `strategy`, picking reference material at random.
    ///
    /// Returns `None` when the strategy's precondition does not hold.
    /// `ordinal` is the position of this proposal within the strategy's
    /// allocation and is used to spread double-down variations.
    pub fn build<R: Rng + ?Sized>(
        strategy: Strategy,
        inputs: &PlanInputs,
        exploration: f64,
        ordinal: u32,
        rng: &mut R,
    ) -> Option<Self> {
        match strategy {
            Strategy::Explore => Some(Self::Explore {
                novelty: exploration,
            }),
            Strategy::Iterate => inputs
                .winners
                .choose(rng)
                .cloned()
                .map(|winner| Self::Iterate { winner }),
            Strategy::DoubleDown => inputs
                .winners
                .iter()
                .max_by_key(|w| w.views)
                .cloned()
                .map(|winner| Self::DoubleDown {
                    winner,
                    variation: ordinal + 1,
                }),
            Strategy::Trending => inputs
                .topics
                .choose(rng)
                .cloned()
                .map(|topic| Self::Trending { topic }),
            Strategy::Remix => {
                let primary = inputs.winners.choose(rng)?.clone();
                let secondary = inputs.winners.choose(rng)?.clone();
                Some(Self::Remix { primary, secondary })
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Explore { .. } => Strategy::Explore,
            Self::Iterate { .. } => Strategy::Iterate,
            Self::DoubleDown { .. } => Strategy::DoubleDown,
            Self::Trending { .. } => Strategy::Trending,
            Self::Remix { .. } => Strategy::Remix,
        }
    }

    /// Instruction handed to the proposal writer.
    pub fn directive(&self) -> String {
        match self {
            Self::Explore { novelty } => format!(
                "Pitch an original idea unlike anything published so far (novelty {:.2}).",
                novelty
            ),
            Self::Iterate { winner } => format!(
                "Write a fresh angle on the proven piece \"{}\" ({} views) without copying it.",
                winner.title, winner.views
            ),
            Self::DoubleDown { winner, variation } => format!(
                "Produce variation #{} of the top performer \"{}\", keeping its hook and format.",
                variation, winner.title
            ),
            Self::Trending { topic } => {
                format!("Tie the brand into the trending topic \"{}\" while it is hot.", topic)
            }
            Self::Remix { primary, secondary } => format!(
                "Combine the strongest elements of \"{}\" and \"{}\" into one piece.",
                primary.title, secondary.title
            ),
        }
    }
}
