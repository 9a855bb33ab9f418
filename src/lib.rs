//! Deterministic deployer accounts and idempotent contract deployment
//!
//! [`keys`] turns a BIP39 phrase into a signing account, [`orchestrator`] funds that
//! account when it is empty and deploys a contract unless an instance with the same
//! identity key already exists. The ledger is reached through the traits in [`ledger`];
//! [`miden_ledger`] implements them with `miden-client`.

pub mod config;
pub mod error;
pub mod helpers;
pub mod keys;
pub mod ledger;
pub mod miden_ledger;
pub mod orchestrator;

pub use config::{load_env_file, ContractConfig, DeployConfig, NetworkConfig};
pub use error::{DeployError, DeployResult, LedgerError, RunFailure};
pub use keys::{derive, generate, SecretPhrase, SecretString, SigningAccount, WordCount};
pub use ledger::{
    Address, Balance, Confirmation, ContractInstance, DeploymentSpec, IdentityKey,
    LedgerConnector, LedgerSession, Salt,
};
pub use miden_ledger::{MidenConnector, MidenSession};
pub use orchestrator::{run, DeployReport, Stage};
