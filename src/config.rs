//! Environment-sourced configuration for the deployment command

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use tracing::{debug, warn};

use crate::{
    error::{DeployError, DeployResult},
    keys::SecretString,
    ledger::{Address, Balance, DeploymentSpec, Salt, DEPLOYER_PLACEHOLDER},
};

/// Default bootstrap transfer for an empty deployer account.
pub const DEFAULT_BOOTSTRAP_AMOUNT: Balance = 1_000_000_000_000_000;
pub const DEFAULT_GAS_LIMIT: u64 = 400_000_000_000;
pub const DEFAULT_ENDOWMENT: Balance = 400_000_000_000_000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Where and how to reach the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// `testnet`, `devnet`, `localhost` or a full RPC URL.
    pub endpoint: String,
    /// Faucet whose fungible asset pays fees and endowments.
    pub fee_faucet_id: Option<String>,
    pub store_path: PathBuf,
    pub keystore_path: PathBuf,
    pub connect_timeout: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: "testnet".to_string(),
            fee_faucet_id: None,
            store_path: PathBuf::from("./store.sqlite3"),
            keystore_path: PathBuf::from("./keystore"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

/// Static description of the contract to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractConfig {
    pub code: String,
    pub constructor: String,
    /// Constructor arguments; [`DEPLOYER_PLACEHOLDER`] expands to the deployer address.
    pub args: Vec<String>,
    pub gas_limit: u64,
    pub endowment: Balance,
    pub salt: Salt,
    pub label: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            code: "contracts/prosopo".to_string(),
            constructor: "default".to_string(),
            args: vec![DEPLOYER_PLACEHOLDER.to_string()],
            gas_limit: DEFAULT_GAS_LIMIT,
            endowment: DEFAULT_ENDOWMENT,
            salt: Salt::parse("0x01"),
            label: "prosopo".to_string(),
        }
    }
}

impl ContractConfig {
    /// Builds the deployment spec for `deployer`.
    pub fn spec_for(&self, deployer: &Address) -> DeploymentSpec {
        let args = self
            .args
            .iter()
            .map(|arg| {
                if arg == DEPLOYER_PLACEHOLDER {
                    deployer.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect();

        DeploymentSpec {
            code: self.code.clone(),
            constructor: self.constructor.clone(),
            args,
            deployer: deployer.clone(),
            gas_limit: self.gas_limit,
            endowment: self.endowment,
            salt: self.salt.clone(),
            label: self.label.clone(),
        }
    }
}

/// Full configuration of one orchestration run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub deployer_mnemonic: SecretString,
    /// Account that tops up an empty deployer.
    pub funder_mnemonic: Option<SecretString>,
    pub bootstrap_amount: Balance,
    pub network: NetworkConfig,
    pub contract: ContractConfig,
}

impl DeployConfig {
    pub fn new(deployer_mnemonic: SecretString) -> Self {
        Self {
            deployer_mnemonic,
            funder_mnemonic: None,
            bootstrap_amount: DEFAULT_BOOTSTRAP_AMOUNT,
            network: NetworkConfig::default(),
            contract: ContractConfig::default(),
        }
    }

    /// Reads the configuration from process environment variables.
    pub fn from_env() -> DeployResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F) -> DeployResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let deployer_mnemonic = get("DEPLOYER_MNEMONIC")
            .map(SecretString::new)
            .ok_or_else(|| DeployError::Config("DEPLOYER_MNEMONIC is not set".into()))?;
        let mut config = Self::new(deployer_mnemonic);
        config.funder_mnemonic = get("FUNDER_MNEMONIC").map(SecretString::new);

        if let Some(amount) = get("BOOTSTRAP_AMOUNT") {
            config.bootstrap_amount = parse_number("BOOTSTRAP_AMOUNT", &amount)?;
        }

        let network = &mut config.network;
        if let Some(endpoint) = get("LEDGER_ENDPOINT") {
            network.endpoint = endpoint;
        }
        network.fee_faucet_id = get("FEE_FAUCET_ID");
        if let Some(path) = get("STORE_PATH") {
            network.store_path = PathBuf::from(path);
        }
        if let Some(path) = get("KEYSTORE_PATH") {
            network.keystore_path = PathBuf::from(path);
        }
        if let Some(ms) = get("CONNECT_TIMEOUT_MS") {
            network.connect_timeout =
                Duration::from_millis(parse_number("CONNECT_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = get("CONFIRMATION_TIMEOUT_MS") {
            network.confirmation_timeout =
                Duration::from_millis(parse_number("CONFIRMATION_TIMEOUT_MS", &ms)?);
        }

        let contract = &mut config.contract;
        if let Some(code) = get("CONTRACT_CODE") {
            contract.code = code;
        }
        if let Some(constructor) = get("CONTRACT_CONSTRUCTOR") {
            contract.constructor = constructor;
        }
        if let Some(args) = lookup("CONTRACT_ARGS") {
            contract.args = args
                .split(',')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(gas) = get("CONTRACT_GAS_LIMIT") {
            contract.gas_limit = parse_number("CONTRACT_GAS_LIMIT", &gas)?;
        }
        if let Some(endowment) = get("CONTRACT_ENDOWMENT") {
            contract.endowment = parse_number("CONTRACT_ENDOWMENT", &endowment)?;
        }
        if let Some(salt) = get("CONTRACT_SALT") {
            contract.salt = Salt::parse(&salt);
        }
        if let Some(label) = get("CONTRACT_LABEL") {
            contract.label = label;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DeployResult<()> {
        if self.contract.gas_limit == 0 {
            return Err(DeployError::Config("CONTRACT_GAS_LIMIT must be non-zero".into()));
        }
        if self.bootstrap_amount == 0 {
            return Err(DeployError::Config("BOOTSTRAP_AMOUNT must be non-zero".into()));
        }
        Ok(())
    }
}

/// Loads a dotenv file into the process environment.
///
/// Uses `DEPLOY_ENV_FILE` when set, otherwise `.env`. A missing file is not an error;
/// variables already present in the environment win over the file.
pub fn load_env_file() {
    let env_file = env::var("DEPLOY_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    match dotenvy::from_filename(&env_file) {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(dotenvy::Error::Io(_)) => debug!(%env_file, "no environment file"),
        Err(err) => warn!(%env_file, %err, "failed to load environment file"),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> DeployResult<T> {
    let digits: String = value.trim().chars().filter(|c| *c != '_').collect();
    digits.parse().map_err(|_| {
        DeployError::Config(format!("{key} must be an unsigned integer, got `{value}`"))
    })
}
