//! Feedback attribution, adaptation and weekly selection of agents.

pub mod adaptation;
pub mod dna;
pub mod feedback;
pub mod selection;

pub use adaptation::{AdaptationEngine, AdaptationReport};
pub use feedback::{FeedbackEngine, FeedbackWindow};
pub use selection::{SelectionEngine, SelectionReport};
