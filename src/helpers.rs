//! Common helper functions for the miden-backed ledger session

use std::{collections::BTreeSet, path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use miden_client::{
    account::{
        component::{BasicWallet, NoAuth},
        Account, AccountId, AccountStorageMode, AccountType, StorageSlot,
    },
    builder::ClientBuilder,
    keystore::FilesystemKeyStore,
    rpc::{Endpoint, TonicRpcClient},
    utils::Deserializable,
    Client, Felt, Word,
};
use miden_crypto::hash::rpo::Rpo256;
use miden_mast_package::Package;
use miden_objects::account::{
    AccountBuilder, AccountComponent, AccountComponentMetadata, AccountComponentTemplate,
};
use rand::rngs::StdRng;

use crate::{config::NetworkConfig, ledger::DeploymentSpec};

/// Client, keystore and raw RPC handle of one session
pub struct ClientSetup {
    pub client: Client<FilesystemKeyStore<StdRng>>,
    pub keystore: Arc<FilesystemKeyStore<StdRng>>,
    pub rpc: Arc<TonicRpcClient>,
}

/// Resolves the configured endpoint name or URL.
pub fn endpoint(name: &str) -> anyhow::Result<Endpoint> {
    match name {
        "testnet" => Ok(Endpoint::testnet()),
        "devnet" => Ok(Endpoint::devnet()),
        "localhost" => Ok(Endpoint::localhost()),
        url => Endpoint::try_from(url).map_err(|err| anyhow!("invalid endpoint `{url}`: {err}")),
    }
}

/// Initialize the client with RPC connection, sqlite store and filesystem keystore
pub async fn setup_client(network: &NetworkConfig) -> anyhow::Result<ClientSetup> {
    let endpoint = endpoint(&network.endpoint)?;
    let timeout_ms = u64::try_from(network.connect_timeout.as_millis()).unwrap_or(u64::MAX);
    let rpc = Arc::new(TonicRpcClient::new(&endpoint, timeout_ms));

    let keystore = Arc::new(
        FilesystemKeyStore::<StdRng>::new(network.keystore_path.clone())
            .map_err(|err| anyhow!("cannot open keystore: {err}"))?,
    );

    let store_path = network
        .store_path
        .to_str()
        .context("store path is not valid UTF-8")?;
    let client = ClientBuilder::new()
        .rpc(rpc.clone())
        .sqlite_store(store_path)
        .authenticator(keystore.clone())
        .in_debug_mode(false.into())
        .build()
        .await?;

    Ok(ClientSetup {
        client,
        keystore,
        rpc,
    })
}

/// Loads contract code: a directory is compiled as a contract project, anything else is
/// read as a serialized package.
pub fn load_package(code: &str) -> anyhow::Result<Package> {
    let path = Path::new(code);
    if path.is_dir() {
        return build_project_in_dir(path, true);
    }

    let bytes = std::fs::read(path).with_context(|| format!("cannot read package `{code}`"))?;
    Package::read_from_bytes(&bytes).map_err(|err| anyhow!("invalid package `{code}`: {err}"))
}

#[cfg(feature = "cargo-build")]
pub fn build_project_in_dir(dir: &Path, release: bool) -> anyhow::Result<Package> {
    use cargo_miden::{run, BuildOutput, CommandOutput, OutputType};

    let profile = if release { "--release" } else { "--debug" };
    let manifest_path = dir.join("Cargo.toml");

    let args = vec![
        "cargo".to_string(),
        "miden".to_string(),
        "build".to_string(),
        profile.to_string(),
        "--manifest-path".to_string(),
        manifest_path.to_string_lossy().to_string(),
    ];

    let output = run(args.into_iter(), OutputType::Masm)
        .map_err(|err| anyhow!("cargo miden build failed: {err:?}"))?
        .ok_or_else(|| anyhow!("cargo miden build returned no output"))?;
    let artifact_path = match output {
        CommandOutput::BuildCommandOutput { output } => match output {
            BuildOutput::Masm { artifact_path } => artifact_path,
            other => return Err(anyhow!("expected Masm output, got {other:?}")),
        },
        other => return Err(anyhow!("expected BuildCommandOutput, got {other:?}")),
    };

    let package_bytes = std::fs::read(&artifact_path)
        .with_context(|| format!("cannot read {}", artifact_path.display()))?;
    Package::read_from_bytes(&package_bytes).map_err(|err| anyhow!("invalid package: {err}"))
}

#[cfg(not(feature = "cargo-build"))]
pub fn build_project_in_dir(dir: &Path, _release: bool) -> anyhow::Result<Package> {
    Err(anyhow!(
        "`{}` is a contract project; build it to a .masp package or enable the `cargo-build` feature",
        dir.display()
    ))
}

/// Configuration for creating an account with a custom component
#[derive(Clone)]
pub struct AccountCreationConfig {
    pub account_type: AccountType,
    pub storage_mode: AccountStorageMode,
    pub storage_slots: Vec<StorageSlot>,
}

impl Default for AccountCreationConfig {
    fn default() -> Self {
        Self {
            account_type: AccountType::RegularAccountImmutableCode,
            storage_mode: AccountStorageMode::Public,
            storage_slots: vec![],
        }
    }
}

pub fn account_component_from_package(
    package: &Package,
    config: &AccountCreationConfig,
) -> anyhow::Result<AccountComponent> {
    let bytes = package
        .account_component_metadata_bytes
        .as_deref()
        .context("package carries no account component metadata")?;
    let metadata = AccountComponentMetadata::read_from_bytes(bytes)
        .map_err(|err| anyhow!("invalid component metadata: {err}"))?;
    let template =
        AccountComponentTemplate::new(metadata, package.unwrap_library().as_ref().clone());

    let component = AccountComponent::new(template.library().clone(), config.storage_slots.clone())
        .map_err(|err| anyhow!("invalid account component: {err}"))?;

    Ok(component.with_supported_types(BTreeSet::from([config.account_type])))
}

/// Encodes one constructor argument as a storage word.
///
/// Account ids and unsigned integers are stored as values; any other text is stored as
/// its RPO digest.
pub fn argument_word(arg: &str) -> Word {
    if let Ok(id) = AccountId::from_hex(arg) {
        return Word::from([Felt::new(0), Felt::new(0), id.suffix(), id.prefix().as_felt()]);
    }
    if let Ok(value) = arg.parse::<u64>() {
        return Word::from([Felt::new(0), Felt::new(0), Felt::new(0), Felt::new(value)]);
    }
    Word::from(Rpo256::hash(arg.as_bytes()))
}

/// Builds the contract account for `spec` without touching the network.
///
/// The identity key is the account's init seed and the constructor arguments are its
/// storage, so the resulting id only depends on the code and the identity fields.
pub fn contract_account(
    package: &Package,
    spec: &DeploymentSpec,
) -> anyhow::Result<(Account, Word)> {
    let config = AccountCreationConfig {
        storage_slots: spec
            .args
            .iter()
            .map(|arg| StorageSlot::Value(argument_word(arg)))
            .collect(),
        ..Default::default()
    };
    let component = account_component_from_package(package, &config)?;

    AccountBuilder::new(*spec.identity_key().as_bytes())
        .account_type(config.account_type)
        .storage_mode(config.storage_mode)
        .with_component(component)
        .with_component(BasicWallet)
        .with_auth_component(NoAuth)
        .build()
        .map_err(|err| anyhow!("cannot build contract account: {err}"))
}
