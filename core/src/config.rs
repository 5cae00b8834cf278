use crate::catalog::{StageAmount, StageCatalog};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHECK_BACK: &str =
    "Your receipt is being processed. Please check back later for the next stage.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite path, or ":memory:".
    pub db_path: String,
    /// SQLite busy timeout. Contention past this surfaces as StoreUnavailable.
    pub store_timeout_ms: u64,
    /// Longest a request waits for another request on the same user.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceFile {
    store: StoreConfig,
    #[serde(default)]
    check_back_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StagesFile {
    stages: Vec<StageAmount>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub catalog: StageCatalog,
    /// Shown to the user after a successful upload.
    pub check_back_message: String,
}

impl ServiceConfig {
    /// Load from the data/ directory.
    /// In tests, use ServiceConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/service.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: ServiceFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;

        let stages_path = format!("{data_dir}/stages.json");
        let stages_content = std::fs::read_to_string(&stages_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {stages_path}: {e}"))?;
        let stages_file: StagesFile = serde_json::from_str(&stages_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {stages_path}: {e}"))?;
        let catalog = StageCatalog::from_entries(&stages_file.stages)
            .map_err(|e| anyhow::anyhow!("Invalid stage table in {stages_path}: {e}"))?;

        if file.store.lock_timeout_ms == 0 {
            anyhow::bail!("{path}: store.lock_timeout_ms must be positive");
        }

        Ok(Self {
            store: file.store,
            catalog,
            check_back_message: file
                .check_back_message
                .unwrap_or_else(|| DEFAULT_CHECK_BACK.to_string()),
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            store: StoreConfig {
                db_path:          ":memory:".into(),
                store_timeout_ms: 2_000,
                lock_timeout_ms:  2_000,
            },
            catalog: StageCatalog::standard(),
            check_back_message: DEFAULT_CHECK_BACK.to_string(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.store_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.store.lock_timeout_ms)
    }
}
