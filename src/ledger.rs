//! Ledger session boundary consumed by the orchestrator
//!
//! Addresses, balances and confirmations are opaque to the orchestrator. A network
//! backend implements [`LedgerConnector`] and [`LedgerSession`]; see
//! [`crate::miden_ledger`] for the one shipped with this crate.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{error::LedgerError, keys::SigningAccount};

/// Amount in the smallest denomination of the fee asset.
pub type Balance = u128;

/// Placeholder in constructor arguments that expands to the deployer's address.
pub const DEPLOYER_PLACEHOLDER: &str = "@deployer";

/// Opaque account or contract address, as rendered by the network backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Salt mixed into contract address derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Salt(Vec<u8>);

impl Salt {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Reads `0x`-prefixed hex, falling back to the raw UTF-8 bytes of `value`.
    pub fn parse(value: &str) -> Self {
        value
            .strip_prefix("0x")
            .and_then(|digits| hex::decode(digits).ok())
            .map(Self)
            .unwrap_or_else(|| Self(value.as_bytes().to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Digest identifying a deployable contract instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Everything needed to deploy one contract instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    /// Reference to the contract code (a package file or a contract project directory).
    pub code: String,
    pub constructor: String,
    pub args: Vec<String>,
    pub deployer: Address,
    pub gas_limit: u64,
    /// Value moved into the contract when it is created.
    pub endowment: Balance,
    pub salt: Salt,
    pub label: String,
}

impl DeploymentSpec {
    /// Digest over code reference, constructor, arguments and salt.
    ///
    /// Deployer, gas limit, endowment and label do not take part: two specs that differ
    /// only in those resolve to the same instance.
    pub fn identity_key(&self) -> IdentityKey {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, self.code.as_bytes());
        write_field(&mut hasher, self.constructor.as_bytes());
        hasher.update((self.args.len() as u64).to_le_bytes());
        for arg in &self.args {
            write_field(&mut hasher, arg.as_bytes());
        }
        write_field(&mut hasher, self.salt.as_bytes());
        IdentityKey(hasher.finalize().into())
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// A contract that exists on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInstance {
    pub address: Address,
    pub spec: DeploymentSpec,
}

/// Proof that a transaction was included by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub transaction_id: String,
    pub block: Option<u64>,
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{} (block {block})", self.transaction_id),
            None => f.write_str(&self.transaction_id),
        }
    }
}

/// An open connection to the ledger.
///
/// Every state-changing call returns only once the ledger has confirmed inclusion. Runs
/// are sequential, so sessions and their futures need not be `Send`.
#[async_trait(?Send)]
pub trait LedgerSession {
    /// Makes the session aware of an account it may have to sign for.
    async fn register_account(&mut self, _account: &SigningAccount) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn query_balance(&mut self, address: &Address) -> Result<Balance, LedgerError>;

    async fn transfer(
        &mut self,
        from: &SigningAccount,
        to: &Address,
        amount: Balance,
    ) -> Result<Confirmation, LedgerError>;

    /// All existing instances matching the spec's identity key.
    async fn find_contracts(
        &mut self,
        spec: &DeploymentSpec,
    ) -> Result<Vec<ContractInstance>, LedgerError>;

    async fn deploy_contract(
        &mut self,
        deployer: &SigningAccount,
        spec: &DeploymentSpec,
    ) -> Result<ContractInstance, LedgerError>;

    async fn disconnect(&mut self) -> Result<(), LedgerError>;
}

/// Opens and releases ledger sessions.
#[async_trait(?Send)]
pub trait LedgerConnector {
    type Session: LedgerSession;

    async fn connect(&self) -> Result<Self::Session, LedgerError>;

    /// Releases a session. Called exactly once per run, with `None` when connecting
    /// never produced a session.
    async fn release(&self, session: Option<Self::Session>) {
        if let Some(mut session) = session {
            if let Err(err) = session.disconnect().await {
                warn!(%err, "ledger session did not disconnect cleanly");
            }
        }
    }
}
