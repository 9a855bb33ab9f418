//! Common helper functions for orchestration tests
//!
//! [`MemoryLedger`] is an in-process ledger that records every call made through it.
//! Clones share state, so a test keeps one handle for assertions while the orchestrator
//! drives another.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use prosopo_deploy::{
    Address, Balance, Confirmation, ContractInstance, DeploymentSpec, IdentityKey,
    LedgerConnector, LedgerError, LedgerSession, SigningAccount,
};
use sha2::{Digest, Sha256};

/// One call observed by the ledger, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Connect,
    RegisterAccount(Address),
    QueryBalance(Address),
    Transfer {
        from: Address,
        to: Address,
        amount: Balance,
    },
    FindContracts(IdentityKey),
    DeployContract(IdentityKey),
    Disconnect,
    Release { had_session: bool },
}

/// Failures the ledger injects into calls.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub refuse_connect: bool,
    /// `connect` never completes
    pub stall_connect: bool,
    pub reject_transfers: bool,
    /// `transfer` never confirms
    pub stall_transfers: bool,
    pub reject_deploys: bool,
    /// `deploy_contract` never completes
    pub stall_deploys: bool,
    pub fail_balance_queries: bool,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, Balance>,
    contracts: Vec<ContractInstance>,
    calls: Vec<LedgerCall>,
    faults: Faults,
    block: u64,
}

impl LedgerState {
    fn commit(&mut self, kind: &str) -> Confirmation {
        self.block += 1;
        Confirmation {
            transaction_id: format!("{kind}-{}", self.block),
            block: Some(self.block),
        }
    }
}

/// Shared in-memory ledger, usable as a [`LedgerConnector`].
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: Faults) -> Self {
        let ledger = Self::new();
        ledger.set_faults(faults);
        ledger
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().faults = faults;
    }

    pub fn set_balance(&self, address: &Address, balance: Balance) {
        self.state.lock().balances.insert(address.clone(), balance);
    }

    pub fn balance(&self, address: &Address) -> Balance {
        self.state.lock().balances.get(address).copied().unwrap_or(0)
    }

    /// Places a contract on the ledger directly, bypassing the uniqueness check.
    pub fn insert_contract(&self, contract: ContractInstance) {
        self.state.lock().contracts.push(contract);
    }

    pub fn contracts(&self) -> Vec<ContractInstance> {
        self.state.lock().contracts.clone()
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count(&self, matches: impl Fn(&LedgerCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn transfers(&self) -> usize {
        self.count(|call| matches!(call, LedgerCall::Transfer { .. }))
    }

    pub fn deploys(&self) -> usize {
        self.count(|call| matches!(call, LedgerCall::DeployContract(_)))
    }

    pub fn releases(&self) -> usize {
        self.count(|call| matches!(call, LedgerCall::Release { .. }))
    }

    fn record(&self, call: LedgerCall) -> Faults {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.faults.clone()
    }
}

/// Address a contract with `key` receives on this ledger.
pub fn contract_address(key: &IdentityKey) -> Address {
    let digest = Sha256::new()
        .chain_update(b"memory-ledger/contract")
        .chain_update(key.as_bytes())
        .finalize();
    Address::new(format!("0x{}", hex::encode(&digest[..15])))
}

#[async_trait(?Send)]
impl LedgerConnector for MemoryLedger {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, LedgerError> {
        let faults = self.record(LedgerCall::Connect);
        if faults.stall_connect {
            std::future::pending::<()>().await;
        }
        if faults.refuse_connect {
            return Err(LedgerError::Connection("connection refused".into()));
        }
        Ok(MemorySession {
            ledger: self.clone(),
        })
    }

    async fn release(&self, session: Option<MemorySession>) {
        self.record(LedgerCall::Release {
            had_session: session.is_some(),
        });
        if let Some(mut session) = session {
            let _ = session.disconnect().await;
        }
    }
}

/// Session handed out by [`MemoryLedger`].
pub struct MemorySession {
    ledger: MemoryLedger,
}

#[async_trait(?Send)]
impl LedgerSession for MemorySession {
    async fn register_account(&mut self, account: &SigningAccount) -> Result<(), LedgerError> {
        self.ledger
            .record(LedgerCall::RegisterAccount(account.address().clone()));
        Ok(())
    }

    async fn query_balance(&mut self, address: &Address) -> Result<Balance, LedgerError> {
        let faults = self.ledger.record(LedgerCall::QueryBalance(address.clone()));
        if faults.fail_balance_queries {
            return Err(LedgerError::Query("state unavailable".into()));
        }
        Ok(self.ledger.balance(address))
    }

    async fn transfer(
        &mut self,
        from: &SigningAccount,
        to: &Address,
        amount: Balance,
    ) -> Result<Confirmation, LedgerError> {
        let faults = self.ledger.record(LedgerCall::Transfer {
            from: from.address().clone(),
            to: to.clone(),
            amount,
        });
        if faults.reject_transfers {
            return Err(LedgerError::Transfer("transaction rejected".into()));
        }
        if faults.stall_transfers {
            std::future::pending::<()>().await;
        }

        let mut state = self.ledger.state.lock();
        let available = state.balances.get(from.address()).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::Transfer(format!(
                "insufficient balance: have {available}, need {amount}"
            )));
        }
        state.balances.insert(from.address().clone(), available - amount);
        *state.balances.entry(to.clone()).or_default() += amount;
        Ok(state.commit("transfer"))
    }

    async fn find_contracts(
        &mut self,
        spec: &DeploymentSpec,
    ) -> Result<Vec<ContractInstance>, LedgerError> {
        let key = spec.identity_key();
        self.ledger.record(LedgerCall::FindContracts(key));
        Ok(self
            .ledger
            .contracts()
            .into_iter()
            .filter(|contract| contract.spec.identity_key() == key)
            .collect())
    }

    async fn deploy_contract(
        &mut self,
        _deployer: &SigningAccount,
        spec: &DeploymentSpec,
    ) -> Result<ContractInstance, LedgerError> {
        let key = spec.identity_key();
        let faults = self.ledger.record(LedgerCall::DeployContract(key));
        if faults.stall_deploys {
            std::future::pending::<()>().await;
        }
        if faults.reject_deploys {
            return Err(LedgerError::Deployment("constructor trapped".into()));
        }

        let mut state = self.ledger.state.lock();
        if state
            .contracts
            .iter()
            .any(|contract| contract.spec.identity_key() == key)
        {
            return Err(LedgerError::Deployment(format!("duplicate instance for {key}")));
        }
        let contract = ContractInstance {
            address: contract_address(&key),
            spec: spec.clone(),
        };
        state.contracts.push(contract.clone());
        state.commit("deploy");
        Ok(contract)
    }

    async fn disconnect(&mut self) -> Result<(), LedgerError> {
        self.ledger.record(LedgerCall::Disconnect);
        Ok(())
    }
}
