//! Deploy-or-reuse orchestration
//!
//! A run walks `Disconnected -> Connected -> AccountDerived -> FundingChecked -> Resolved ->
//! Reported`. Any step may fail, which ends the run in the `Failed` state. The ledger
//! session is released through [`LedgerConnector::release`] exactly once per run,
//! whichever way the run ends.

use std::{fmt, future::Future, time::Duration};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    config::DeployConfig,
    error::{DeployError, DeployResult, LedgerError, RunFailure},
    keys::{self, SecretPhrase, SigningAccount},
    ledger::{
        Address, Balance, Confirmation, ContractInstance, IdentityKey, LedgerConnector,
        LedgerSession,
    },
};

/// Progress of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Disconnected,
    Connected,
    AccountDerived,
    FundingChecked,
    Resolved,
    Reported,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Disconnected => "disconnected",
            Stage::Connected => "connected",
            Stage::AccountDerived => "account-derived",
            Stage::FundingChecked => "funding-checked",
            Stage::Resolved => "resolved",
            Stage::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// What a successful run found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub deployer: Address,
    /// Deployer balance observed before any funding transfer.
    pub deployer_balance: Balance,
    pub funder: Option<Address>,
    /// Funding account balance observed before any funding transfer.
    pub funder_balance: Option<Balance>,
    /// Set when the deployer was empty and got topped up.
    pub funding: Option<Confirmation>,
    pub identity_key: IdentityKey,
    pub contract: ContractInstance,
    /// `true` when an existing instance was returned without deploying.
    pub reused: bool,
}

/// Runs the deployment workflow against the ledger reached through `connector`.
pub async fn run<C: LedgerConnector>(
    connector: &C,
    config: &DeployConfig,
) -> Result<DeployReport, RunFailure> {
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.run(connector).await
}

struct Orchestrator<'a> {
    config: &'a DeployConfig,
    stage: Stage,
}

struct Accounts {
    deployer: SigningAccount,
    funder: Option<SigningAccount>,
}

struct Funding {
    balance: Balance,
    funder_balance: Option<Balance>,
    confirmation: Option<Confirmation>,
}

impl<'a> Orchestrator<'a> {
    fn new(config: &'a DeployConfig) -> Self {
        Self {
            config,
            stage: Stage::Disconnected,
        }
    }

    async fn run<C: LedgerConnector>(&mut self, connector: &C) -> Result<DeployReport, RunFailure> {
        let connect_timeout = self.config.network.connect_timeout;
        let connected = match timeout(connect_timeout, connector.connect()).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(err)) => Err(DeployError::Connection(err.to_string())),
            Err(_) => Err(DeployError::Connection(format!(
                "ledger not ready after {} ms",
                connect_timeout.as_millis()
            ))),
        };

        let mut session = match connected {
            Ok(session) => session,
            Err(error) => {
                connector.release(None).await;
                return Err(self.fail(error));
            }
        };
        self.advance(Stage::Connected);

        let outcome = self.execute(&mut session).await;
        connector.release(Some(session)).await;

        match outcome {
            Ok(report) => {
                self.advance(Stage::Reported);
                Ok(report)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    async fn execute<S: LedgerSession>(&mut self, session: &mut S) -> DeployResult<DeployReport> {
        let accounts = self.derive_accounts()?;
        for account in std::iter::once(&accounts.deployer).chain(accounts.funder.as_ref()) {
            session
                .register_account(account)
                .await
                .map_err(|err| DeployError::LedgerQuery(err.to_string()))?;
        }
        self.advance(Stage::AccountDerived);

        let funding = self.check_funding(session, &accounts).await?;
        self.advance(Stage::FundingChecked);

        let (contract, reused) = self.resolve_contract(session, &accounts.deployer).await?;
        self.advance(Stage::Resolved);

        Ok(DeployReport {
            deployer: accounts.deployer.address().clone(),
            deployer_balance: funding.balance,
            funder: accounts.funder.map(|funder| funder.address().clone()),
            funder_balance: funding.funder_balance,
            funding: funding.confirmation,
            identity_key: contract.spec.identity_key(),
            contract,
            reused,
        })
    }

    fn derive_accounts(&self) -> DeployResult<Accounts> {
        let deployer = keys::derive(&SecretPhrase::parse(
            self.config.deployer_mnemonic.expose(),
        )?)?;
        info!(address = %deployer.address(), "derived deployer account");

        let funder = match &self.config.funder_mnemonic {
            Some(mnemonic) => {
                let funder = keys::derive(&SecretPhrase::parse(mnemonic.expose())?)?;
                info!(address = %funder.address(), "derived funding account");
                Some(funder)
            }
            None => None,
        };

        Ok(Accounts { deployer, funder })
    }

    async fn check_funding<S: LedgerSession>(
        &self,
        session: &mut S,
        accounts: &Accounts,
    ) -> DeployResult<Funding> {
        let deployer = accounts.deployer.address();
        let balance = session
            .query_balance(deployer)
            .await
            .map_err(|err| DeployError::LedgerQuery(err.to_string()))?;
        info!(address = %deployer, balance, "deployer balance");

        let funder_balance = match &accounts.funder {
            Some(funder) => {
                let funder_balance = session
                    .query_balance(funder.address())
                    .await
                    .map_err(|err| DeployError::LedgerQuery(err.to_string()))?;
                info!(address = %funder.address(), balance = funder_balance, "funder balance");
                Some(funder_balance)
            }
            None => None,
        };

        if balance != 0 {
            return Ok(Funding {
                balance,
                funder_balance,
                confirmation: None,
            });
        }

        let funder = accounts.funder.as_ref().ok_or_else(|| {
            DeployError::FundingTransferFailed(
                "deployer balance is zero and no funding account is configured".into(),
            )
        })?;
        let amount = self.config.bootstrap_amount;
        info!(from = %funder.address(), to = %deployer, amount, "funding deployer");

        let confirmation = self
            .confirmed(session.transfer(funder, deployer, amount))
            .await
            .map_err(DeployError::FundingTransferFailed)?;
        info!(transaction = %confirmation, "funding transfer confirmed");

        Ok(Funding {
            balance,
            funder_balance,
            confirmation: Some(confirmation),
        })
    }

    async fn resolve_contract<S: LedgerSession>(
        &self,
        session: &mut S,
        deployer: &SigningAccount,
    ) -> DeployResult<(ContractInstance, bool)> {
        let spec = self.config.contract.spec_for(deployer.address());
        let key = spec.identity_key();

        let mut existing = session
            .find_contracts(&spec)
            .await
            .map_err(|err| DeployError::LedgerQuery(err.to_string()))?;
        match existing.len() {
            0 => {}
            1 => {
                let contract = existing.remove(0);
                info!(
                    address = %contract.address,
                    identity_key = %key,
                    "reusing existing contract"
                );
                return Ok((contract, true));
            }
            count => {
                return Err(DeployError::LookupAmbiguous {
                    key: key.to_string(),
                    count,
                })
            }
        }

        info!(
            label = %spec.label,
            constructor = %spec.constructor,
            salt = %spec.salt,
            gas_limit = spec.gas_limit,
            endowment = spec.endowment,
            identity_key = %key,
            "deploying contract"
        );
        let contract = self
            .confirmed(session.deploy_contract(deployer, &spec))
            .await
            .map_err(DeployError::DeploymentRejected)?;
        info!(address = %contract.address, "contract deployed");

        Ok((contract, false))
    }

    /// Awaits a state-changing ledger call, bounded by the confirmation timeout.
    async fn confirmed<T, F>(&self, call: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        let limit: Duration = self.config.network.confirmation_timeout;
        match timeout(limit, call).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(format!("not confirmed within {} ms", limit.as_millis())),
        }
    }

    fn advance(&mut self, stage: Stage) {
        info!(from = %self.stage, to = %stage, "deployment stage");
        self.stage = stage;
    }

    fn fail(&self, error: DeployError) -> RunFailure {
        warn!(stage = %self.stage, %error, "deployment failed");
        RunFailure {
            stage: self.stage,
            error,
        }
    }
}
