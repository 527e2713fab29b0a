//! Credit gate - the single, irrevocable unit-of-work debit per job
//!
//! `try_debit` must succeed (or be explicitly waved through after a
//! transient persistence failure) strictly before a submission request is
//! sent. Once a debit succeeds it is never rolled back, regardless of the
//! job's eventual outcome: the accounting authority is the backend, and
//! the client never invents a refund policy it cannot verify.
//!
//! State is persisted to a JSON file so the balance survives navigation;
//! a corrupted or missing file resets to an empty state instead of
//! blocking submissions.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Local credit state file name
const CREDIT_FILE_NAME: &str = "credits.json";

/// Outcome of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    Accepted,
    InsufficientBalance,
}

/// One unit of quota consumed for one accepted job. Never rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub job_id: String,
    pub debited_at: DateTime<Utc>,
}

/// Persisted credit state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CreditState {
    /// Units of quota still available, as last confirmed by the backend.
    balance: u32,
    /// One entry per accepted job submission.
    ledger: Vec<CreditLedgerEntry>,
    last_sync: Option<DateTime<Utc>>,
}

/// Enforces "exactly one debit per accepted job". Debits are serialized
/// behind the gate's own lock so two racing submissions can never both
/// consume the last unit.
pub struct CreditGate {
    state_file: PathBuf,
    state: Mutex<CreditState>,
}

impl CreditGate {
    /// Create a gate backed by the platform data directory.
    pub fn new(initial_balance: u32) -> Result<Self> {
        let dirs = ProjectDirs::from("dev", "scanwatch", "scanwatch")
            .context("Failed to determine data directory")?;
        let data_dir = dirs.data_dir();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self::with_state_file(
            data_dir.join(CREDIT_FILE_NAME),
            initial_balance,
        ))
    }

    /// Create a gate with an explicit state file path.
    pub fn with_state_file(state_file: PathBuf, initial_balance: u32) -> Self {
        let state = Self::load_state(&state_file).unwrap_or_else(|| CreditState {
            balance: initial_balance,
            ..CreditState::default()
        });
        Self {
            state_file,
            state: Mutex::new(state),
        }
    }

    /// Load persisted state, resetting on a missing or corrupted file.
    fn load_state(path: &PathBuf) -> Option<CreditState> {
        if !path.exists() {
            return None;
        }
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read credit state file, resetting: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Credit state file corrupted, resetting: {}", e);
                None
            }
        }
    }

    fn save_state(&self, state: &CreditState) -> Result<()> {
        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize credit state")?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.state_file)
                .with_context(|| {
                    format!("Failed to create credit state file: {:?}", self.state_file)
                })?;
            file.write_all(content.as_bytes())?;
        }

        #[cfg(not(unix))]
        fs::write(&self.state_file, &content)
            .with_context(|| format!("Failed to write credit state file: {:?}", self.state_file))?;

        Ok(())
    }

    /// Try to consume one unit of quota.
    ///
    /// A persistence failure after the balance was already confirmed
    /// sufficient surfaces as an error, but the in-memory debit stands:
    /// the caller logs it and proceeds with submission, since accounting
    /// is reconciled later from the authoritative backend.
    pub async fn try_debit(&self) -> Result<Debit> {
        let mut state = self.state.lock().await;

        if state.balance == 0 {
            return Ok(Debit::InsufficientBalance);
        }

        state.balance -= 1;
        self.save_state(&state)?;
        Ok(Debit::Accepted)
    }

    /// Record the ledger entry once the scan engine assigned a job id.
    /// Exactly one entry is created per accepted job.
    pub async fn record_entry(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ledger.push(CreditLedgerEntry {
            job_id: job_id.to_string(),
            debited_at: Utc::now(),
        });
        self.save_state(&state)
    }

    /// Replace the local balance with the backend's authoritative figure.
    pub async fn sync_balance(&self, balance: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.balance != balance {
            info!(local = state.balance, remote = balance, "Syncing credit balance from backend");
        }
        state.balance = balance;
        state.last_sync = Some(Utc::now());
        self.save_state(&state)
    }

    pub async fn balance(&self) -> u32 {
        self.state.lock().await.balance
    }

    pub async fn ledger(&self) -> Vec<CreditLedgerEntry> {
        self.state.lock().await.ledger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_gate(balance: u32) -> (CreditGate, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let gate = CreditGate::with_state_file(temp_dir.path().join(CREDIT_FILE_NAME), balance);
        (gate, temp_dir)
    }

    #[tokio::test]
    async fn test_debit_consumes_balance() {
        let (gate, _temp) = test_gate(2);

        assert_eq!(gate.try_debit().await.unwrap(), Debit::Accepted);
        assert_eq!(gate.balance().await, 1);
        assert_eq!(gate.try_debit().await.unwrap(), Debit::Accepted);
        assert_eq!(gate.try_debit().await.unwrap(), Debit::InsufficientBalance);
        assert_eq!(gate.balance().await, 0);
    }

    #[tokio::test]
    async fn test_racing_debits_never_both_win_the_last_unit() {
        let (gate, _temp) = test_gate(1);
        let gate = Arc::new(gate);

        let a = tokio::spawn({
            let gate = gate.clone();
            async move { gate.try_debit().await.unwrap() }
        });
        let b = tokio::spawn({
            let gate = gate.clone();
            async move { gate.try_debit().await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let accepted = [a, b].iter().filter(|d| **d == Debit::Accepted).count();
        let rejected = [a, b]
            .iter()
            .filter(|d| **d == Debit::InsufficientBalance)
            .count();
        assert_eq!((accepted, rejected), (1, 1));
    }

    #[tokio::test]
    async fn test_ledger_entry_per_accepted_job() {
        let (gate, _temp) = test_gate(5);

        gate.try_debit().await.unwrap();
        gate.record_entry("J1").await.unwrap();

        let ledger = gate.ledger().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].job_id, "J1");
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CREDIT_FILE_NAME);

        {
            let gate = CreditGate::with_state_file(path.clone(), 3);
            gate.try_debit().await.unwrap();
            gate.record_entry("J1").await.unwrap();
        }

        let reloaded = CreditGate::with_state_file(path, 99);
        // Persisted state wins over the initial balance hint
        assert_eq!(reloaded.balance().await, 2);
        assert_eq!(reloaded.ledger().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_state_resets() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CREDIT_FILE_NAME);
        fs::write(&path, "{broken").unwrap();

        let gate = CreditGate::with_state_file(path, 4);
        assert_eq!(gate.balance().await, 4);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_debits_in_memory() {
        let gate = CreditGate::with_state_file(
            PathBuf::from("/nonexistent-dir/credits.json"),
            2,
        );

        // The save fails, but the balance was confirmed sufficient and the
        // in-memory debit stands
        assert!(gate.try_debit().await.is_err());
        assert_eq!(gate.balance().await, 1);
    }

    #[tokio::test]
    async fn test_sync_balance_is_authoritative() {
        let (gate, _temp) = test_gate(1);
        gate.try_debit().await.unwrap();
        assert_eq!(gate.balance().await, 0);

        gate.sync_balance(10).await.unwrap();
        assert_eq!(gate.balance().await, 10);
        assert_eq!(gate.try_debit().await.unwrap(), Debit::Accepted);
    }
}
