use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

use crate::db::schema::{
    TABLE_AGENT, TABLE_BRAND, TABLE_GENE_POOL, TABLE_JOB, TABLE_MUTATION, TABLE_PROPOSAL,
    TABLE_SETTING, TABLE_SNAPSHOT, TABLE_TREND,
};

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "content".to_string()),
            database: env::var("SURREALDB_DATABASE")
                .unwrap_or_else(|_| "orchestrator".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define tables and the indexes the lookups rely on. Safe to run repeatedly.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_AGENT} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS agent_active ON TABLE {TABLE_AGENT} COLUMNS active;"
        ),
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_SNAPSHOT} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS snapshot_agent ON TABLE {TABLE_SNAPSHOT} COLUMNS agent_id;"
        ),
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_MUTATION} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS mutation_agent ON TABLE {TABLE_MUTATION} COLUMNS agent_id;"
        ),
        format!("DEFINE TABLE IF NOT EXISTS {TABLE_GENE_POOL} SCHEMALESS;"),
        format!("DEFINE TABLE IF NOT EXISTS {TABLE_BRAND} SCHEMALESS;"),
        format!("DEFINE TABLE IF NOT EXISTS {TABLE_PROPOSAL} SCHEMALESS;"),
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_JOB} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS job_status ON TABLE {TABLE_JOB} COLUMNS status;
             DEFINE INDEX IF NOT EXISTS job_proposal ON TABLE {TABLE_JOB} COLUMNS proposal_id;"
        ),
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_TREND} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS trend_brand ON TABLE {TABLE_TREND} COLUMNS brand_id;"
        ),
        format!(
            "DEFINE TABLE IF NOT EXISTS {TABLE_SETTING} SCHEMAFULL;
             DEFINE FIELD IF NOT EXISTS key ON TABLE {TABLE_SETTING} TYPE string;
             DEFINE FIELD IF NOT EXISTS value ON TABLE {TABLE_SETTING} TYPE string;
             DEFINE FIELD IF NOT EXISTS updated_at ON TABLE {TABLE_SETTING} VALUE time::now();"
        ),
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
