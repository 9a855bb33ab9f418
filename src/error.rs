//! Error types for key derivation, ledger access and deployment runs

use thiserror::Error;

use crate::orchestrator::Stage;

/// Errors reported by a ledger session.
///
/// Every variant carries a human readable reason from the underlying client; the
/// orchestrator maps them onto [`DeployError`] depending on the step that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("deployment rejected: {0}")]
    Deployment(String),

    #[error("invalid address `{0}`")]
    InvalidAddress(String),
}

/// Fatal failures of a generator or deployment run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("secure entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid secret phrase: {0}")]
    InvalidSecret(String),

    #[error("funding transfer failed: {0}")]
    FundingTransferFailed(String),

    #[error("deployment rejected: {0}")]
    DeploymentRejected(String),

    #[error("{count} existing contracts match identity key {key}")]
    LookupAmbiguous { key: String, count: usize },

    #[error("ledger query failed: {0}")]
    LedgerQuery(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A deployment run that ended in the `Failed` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("deployment failed after stage {stage}: {error}")]
pub struct RunFailure {
    /// Last stage the run reached before failing.
    pub stage: Stage,
    #[source]
    pub error: DeployError,
}

pub type DeployResult<T> = Result<T, DeployError>;
