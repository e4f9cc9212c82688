//! Table names and the small row shapes used by the SurrealDB store.
//!
//! Domain records are written as `CONTENT` under a record id derived from
//! their own identifier and read back with `OMIT id`, so they need no
//! database-specific fields of their own.

use serde::{Deserialize, Serialize};

pub const TABLE_AGENT: &str = "agent";
pub const TABLE_SNAPSHOT: &str = "performance_snapshot";
pub const TABLE_MUTATION: &str = "mutation";
pub const TABLE_GENE_POOL: &str = "gene_pool";
pub const TABLE_BRAND: &str = "brand";
pub const TABLE_PROPOSAL: &str = "proposal";
pub const TABLE_JOB: &str = "job";
pub const TABLE_TREND: &str = "trend";
pub const TABLE_SETTING: &str = "setting";

/// One persisted setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: String,
}

/// Result row of a `count() ... GROUP ALL` query.
#[derive(Debug, Clone, Deserialize)]
pub struct CountRow {
    pub count: i64,
}
