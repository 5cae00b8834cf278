//! Stage catalog: the fixed amount due at each subscription stage.
//!
//! Stateless. Stage numbers outside 1..=5 are not errors here; they map
//! to an amount of 0.

use crate::types::{Amount, Stage};
use serde::{Deserialize, Serialize};

pub const FIRST_STAGE: Stage = 1;
pub const FINAL_STAGE: Stage = 5;

const STANDARD_AMOUNTS: [Amount; FINAL_STAGE as usize] = [2000, 1500, 2000, 5000, 10000];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCatalog {
    amounts: [Amount; FINAL_STAGE as usize],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAmount {
    pub stage: Stage,
    pub amount: Amount,
}

impl StageCatalog {
    pub fn standard() -> Self {
        Self { amounts: STANDARD_AMOUNTS }
    }

    /// Build from a stage table. Every stage 1..=5 must appear exactly once
    /// with a non-negative amount.
    pub fn from_entries(entries: &[StageAmount]) -> anyhow::Result<Self> {
        let mut amounts: [Option<Amount>; FINAL_STAGE as usize] = [None; FINAL_STAGE as usize];
        for entry in entries {
            if !(FIRST_STAGE..=FINAL_STAGE).contains(&entry.stage) {
                anyhow::bail!("stage {} is outside {FIRST_STAGE}..={FINAL_STAGE}", entry.stage);
            }
            if entry.amount < 0 {
                anyhow::bail!("stage {} has negative amount {}", entry.stage, entry.amount);
            }
            let slot = &mut amounts[(entry.stage - FIRST_STAGE) as usize];
            if slot.replace(entry.amount).is_some() {
                anyhow::bail!("stage {} listed more than once", entry.stage);
            }
        }
        let mut resolved = [0; FINAL_STAGE as usize];
        for (idx, amount) in amounts.iter().enumerate() {
            resolved[idx] = amount
                .ok_or_else(|| anyhow::anyhow!("stage {} missing from table", idx + 1))?;
        }
        Ok(Self { amounts: resolved })
    }

    pub fn amount_for(&self, stage: Stage) -> Amount {
        if !(FIRST_STAGE..=FINAL_STAGE).contains(&stage) {
            return 0;
        }
        self.amounts[(stage - FIRST_STAGE) as usize]
    }

    pub fn entries(&self) -> Vec<StageAmount> {
        (FIRST_STAGE..=FINAL_STAGE)
            .map(|stage| StageAmount { stage, amount: self.amount_for(stage) })
            .collect()
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
