//! Ledger session backed by `miden-client`
//!
//! Balances are measured in the fungible asset of the configured fee faucet. A transfer
//! is a public pay-to-id note that the recipient consumes right away when this session
//! holds its key. Contracts are public accounts whose id is content-addressed by the
//! identity key, so looking one up is a single account query.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use miden_client::{
    account::{Account, AccountId},
    asset::FungibleAsset,
    auth::AuthSecretKey,
    keystore::FilesystemKeyStore,
    note::{Note, NoteType},
    rpc::{GrpcError, NodeRpcClient, RpcError, TonicRpcClient},
    store::TransactionFilter,
    transaction::{
        OutputNote, PaymentNoteDescription, TransactionRequest, TransactionRequestBuilder,
        TransactionStatus,
    },
    Client,
};
use miden_mast_package::Package;
use rand::rngs::StdRng;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{
    config::NetworkConfig,
    error::LedgerError,
    helpers::{contract_account, load_package, setup_client, ClientSetup},
    keys::SigningAccount,
    ledger::{
        Address, Balance, Confirmation, ContractInstance, DeploymentSpec, LedgerConnector,
        LedgerSession,
    },
};

const COMMIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Opens sessions against a miden node.
pub struct MidenConnector {
    network: NetworkConfig,
}

impl MidenConnector {
    pub fn new(network: NetworkConfig) -> Self {
        Self { network }
    }
}

#[async_trait(?Send)]
impl LedgerConnector for MidenConnector {
    type Session = MidenSession;

    async fn connect(&self) -> Result<MidenSession, LedgerError> {
        let fee_faucet = self
            .network
            .fee_faucet_id
            .as_deref()
            .ok_or_else(|| LedgerError::Connection("FEE_FAUCET_ID is not set".into()))
            .and_then(|id| parse_account_id(&Address::new(id)))?;

        let ClientSetup {
            mut client,
            keystore,
            rpc,
        } = setup_client(&self.network)
            .await
            .map_err(|err| LedgerError::Connection(format!("{err:#}")))?;

        let summary = client
            .sync_state()
            .await
            .map_err(|err| LedgerError::Connection(err.to_string()))?;
        info!(
            endpoint = %self.network.endpoint,
            block = %summary.block_num,
            "ledger session ready"
        );

        Ok(MidenSession {
            client,
            keystore,
            rpc,
            fee_faucet,
            packages: HashMap::new(),
        })
    }
}

/// An open miden client plus the packages loaded during the session.
pub struct MidenSession {
    client: Client<FilesystemKeyStore<StdRng>>,
    keystore: Arc<FilesystemKeyStore<StdRng>>,
    rpc: Arc<TonicRpcClient>,
    fee_faucet: AccountId,
    packages: HashMap<String, Arc<Package>>,
}

impl MidenSession {
    /// Fetches the public on-chain state of `id`; `None` when the node does not know it.
    async fn fetch_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        match self.rpc.get_account_details(id).await {
            Ok(fetched) => fetched.account().cloned().map(Some).ok_or_else(|| {
                LedgerError::Query(format!("account {} is not public", id.to_hex()))
            }),
            Err(err) if is_unknown_account(&err) => Ok(None),
            Err(err) => Err(LedgerError::Query(err.to_string())),
        }
    }

    async fn is_tracked(&mut self, id: AccountId) -> Result<bool, LedgerError> {
        self.client
            .get_account(id)
            .await
            .map(|record| record.is_some())
            .map_err(|err| LedgerError::Query(err.to_string()))
    }

    fn package(&mut self, code: &str) -> Result<Arc<Package>, LedgerError> {
        if let Some(package) = self.packages.get(code) {
            return Ok(package.clone());
        }
        let package = Arc::new(
            load_package(code).map_err(|err| LedgerError::Deployment(format!("{err:#}")))?,
        );
        self.packages.insert(code.to_string(), package.clone());
        Ok(package)
    }

    fn contract_for(
        &mut self,
        spec: &DeploymentSpec,
    ) -> Result<(Account, miden_client::Word), LedgerError> {
        let package = self.package(&spec.code)?;
        contract_account(&package, spec)
            .map_err(|err| LedgerError::Deployment(format!("{err:#}")))
    }

    /// Executes `request` for `account_id`, submits it and waits until it is committed.
    async fn execute(
        &mut self,
        account_id: AccountId,
        request: TransactionRequest,
    ) -> Result<(Confirmation, Vec<Note>), String> {
        let result = self
            .client
            .new_transaction(account_id, request)
            .await
            .map_err(|err| err.to_string())?;
        let transaction_id = result.executed_transaction().id();
        let notes = result
            .created_notes()
            .iter()
            .filter_map(|note| match note {
                OutputNote::Full(note) => Some(note.clone()),
                _ => None,
            })
            .collect();

        self.client
            .submit_transaction(result)
            .await
            .map_err(|err| err.to_string())?;
        debug!(transaction = %transaction_id.to_hex(), "transaction submitted");

        let transaction_hex = transaction_id.to_hex();
        loop {
            self.client.sync_state().await.map_err(|err| err.to_string())?;
            let records = self
                .client
                .get_transactions(TransactionFilter::Ids(vec![transaction_id]))
                .await
                .map_err(|err| err.to_string())?;

            match settled(&transaction_hex, records.first().map(|record| &record.status)) {
                Some(outcome) => return outcome.map(|confirmation| (confirmation, notes)),
                None => sleep(COMMIT_POLL_INTERVAL).await,
            }
        }
    }

    /// Sends `amount` of the fee asset from `sender` to `target` as a public note and
    /// returns the confirmation together with the note.
    async fn pay(
        &mut self,
        sender: AccountId,
        target: AccountId,
        amount: Balance,
    ) -> Result<(Confirmation, Note), String> {
        let amount = u64::try_from(amount).map_err(|_| format!("amount {amount} exceeds u64"))?;
        let asset = FungibleAsset::new(self.fee_faucet, amount).map_err(|err| err.to_string())?;
        let request = TransactionRequestBuilder::new()
            .build_pay_to_id(
                PaymentNoteDescription::new(vec![asset.into()], sender, target),
                NoteType::Public,
                self.client.rng(),
            )
            .map_err(|err| err.to_string())?;

        let (confirmation, mut notes) = self.execute(sender, request).await?;
        let note = notes.pop().ok_or("payment produced no note")?;
        Ok((confirmation, note))
    }

    /// Consumes `note` into `account_id` without waiting for the note to be synced.
    async fn consume(&mut self, account_id: AccountId, note: Note) -> Result<Confirmation, String> {
        let request = TransactionRequestBuilder::new()
            .unauthenticated_input_notes([(note, None)])
            .build()
            .map_err(|err| err.to_string())?;
        self.execute(account_id, request).await.map(|(confirmation, _)| confirmation)
    }
}

#[async_trait(?Send)]
impl LedgerSession for MidenSession {
    async fn register_account(&mut self, account: &SigningAccount) -> Result<(), LedgerError> {
        let id = account.account().id();
        if !self.is_tracked(id).await? {
            let result = match self.fetch_account(id).await? {
                Some(on_chain) => self.client.add_account(&on_chain, None, false).await,
                None => {
                    self.client
                        .add_account(account.account(), Some(account.seed()), false)
                        .await
                }
            };
            result.map_err(|err| LedgerError::Query(err.to_string()))?;
        }

        // the client only signs with keys held in KEYSTORE_PATH
        self.keystore
            .add_key(&AuthSecretKey::RpoFalcon512(account.secret_key().clone()))
            .map_err(|err| LedgerError::Query(err.to_string()))?;
        debug!(address = %account.address(), "account registered with ledger client");
        Ok(())
    }

    async fn query_balance(&mut self, address: &Address) -> Result<Balance, LedgerError> {
        let id = parse_account_id(address)?;
        match self.fetch_account(id).await? {
            Some(account) => account
                .vault()
                .get_balance(self.fee_faucet)
                .map(Balance::from)
                .map_err(|err| LedgerError::Query(err.to_string())),
            None => Ok(0),
        }
    }

    async fn transfer(
        &mut self,
        from: &SigningAccount,
        to: &Address,
        amount: Balance,
    ) -> Result<Confirmation, LedgerError> {
        let sender = from.account().id();
        let target = parse_account_id(to)?;

        let (confirmation, note) = self
            .pay(sender, target, amount)
            .await
            .map_err(LedgerError::Transfer)?;

        if self.is_tracked(target).await? {
            let consumed = self
                .consume(target, note)
                .await
                .map_err(LedgerError::Transfer)?;
            debug!(transaction = %consumed, "recipient consumed transfer");
        }

        Ok(confirmation)
    }

    async fn find_contracts(
        &mut self,
        spec: &DeploymentSpec,
    ) -> Result<Vec<ContractInstance>, LedgerError> {
        let (contract, _) = self.contract_for(spec)?;
        let existing = self.fetch_account(contract.id()).await?;

        Ok(existing
            .map(|account| ContractInstance {
                address: Address::new(account.id().to_hex()),
                spec: spec.clone(),
            })
            .into_iter()
            .collect())
    }

    async fn deploy_contract(
        &mut self,
        deployer: &SigningAccount,
        spec: &DeploymentSpec,
    ) -> Result<ContractInstance, LedgerError> {
        check_deployable(spec)?;

        let (contract, seed) = self.contract_for(spec)?;
        let contract_id = contract.id();
        if self.fetch_account(contract_id).await?.is_some() {
            return Err(LedgerError::Deployment(format!(
                "address {} is already taken",
                contract_id.to_hex()
            )));
        }

        self.client
            .add_account(&contract, Some(seed), false)
            .await
            .map_err(|err| LedgerError::Deployment(err.to_string()))?;
        debug!(gas_limit = spec.gas_limit, "gas is metered by the node, limit not forwarded");

        // Consuming the endowment note is the contract's first transaction and publishes it.
        let (_, note) = self
            .pay(deployer.account().id(), contract_id, spec.endowment)
            .await
            .map_err(LedgerError::Deployment)?;
        let confirmation = self
            .consume(contract_id, note)
            .await
            .map_err(LedgerError::Deployment)?;
        info!(transaction = %confirmation, "deployment committed");

        Ok(ContractInstance {
            address: Address::new(contract_id.to_hex()),
            spec: spec.clone(),
        })
    }

    async fn disconnect(&mut self) -> Result<(), LedgerError> {
        self.client
            .sync_state()
            .await
            .map(|summary| debug!(block = %summary.block_num, "final sync before disconnect"))
            .map_err(|err| LedgerError::Connection(err.to_string()))
    }
}

/// Rejects deployments this backend cannot publish.
///
/// A new account only gets a non-zero nonce from a transaction that changes its state, so
/// the endowment has to be non-zero.
fn check_deployable(spec: &DeploymentSpec) -> Result<(), LedgerError> {
    if spec.gas_limit == 0 {
        return Err(LedgerError::Deployment("gas limit must be non-zero".into()));
    }
    if spec.endowment == 0 {
        return Err(LedgerError::Deployment(
            "endowment must be non-zero to publish a contract account".into(),
        ));
    }
    Ok(())
}

/// Maps a polled transaction status to its outcome; `None` while still pending.
fn settled(
    transaction_id: &str,
    status: Option<&TransactionStatus>,
) -> Option<Result<Confirmation, String>> {
    match status? {
        TransactionStatus::Committed { block_number, .. } => Some(Ok(Confirmation {
            transaction_id: transaction_id.to_string(),
            block: Some(u64::from(block_number.as_u32())),
        })),
        TransactionStatus::Discarded(cause) => {
            Some(Err(format!("transaction {transaction_id} discarded: {cause:?}")))
        }
        TransactionStatus::Pending => None,
    }
}

fn is_unknown_account(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::GrpcError {
            error_kind: GrpcError::NotFound,
            ..
        }
    )
}

fn parse_account_id(address: &Address) -> Result<AccountId, LedgerError> {
    AccountId::from_hex(address.as_str())
        .map_err(|_| LedgerError::InvalidAddress(address.to_string()))
}
