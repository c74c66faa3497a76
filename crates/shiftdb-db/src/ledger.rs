use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shiftdb_common::{Result, StepState, Version};

/// One row of the applied-versions ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub name: String,
    pub state: StepState,
    pub checksum: Option<String>,
    /// Order in which entries reached `Applied`; `None` while transient.
    pub sequence: Option<i64>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Durable record of which versions are applied. Every write must be
/// durable before it returns.
pub trait LedgerStore {
    /// All entries, transient ones included, in ascending version order.
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Applied versions in ascending order.
    fn list_applied(&self) -> Result<Vec<Version>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.state == StepState::Applied)
            .map(|e| e.version)
            .collect())
    }

    /// Record that `version` is entering `Applying` or `Reverting`.
    fn mark_transient(&self, version: Version, name: &str, state: StepState) -> Result<()>;

    fn mark_applied(&self, version: Version, name: &str, checksum: &str) -> Result<()>;

    /// Remove `version` from the ledger, returning it to `Pending`.
    fn mark_reverted(&self, version: Version) -> Result<()>;

    /// Operator override to settle a version as `Applied` or `Pending`
    /// after manual intervention.
    fn force_state(
        &self,
        version: Version,
        name: &str,
        state: StepState,
        checksum: Option<&str>,
    ) -> Result<()>;
}
