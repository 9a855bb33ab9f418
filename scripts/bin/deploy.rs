//! Deploys the configured contract, or reuses the instance already on chain.
//!
//! Configuration comes from the environment (see `DeployConfig::from_env`), optionally
//! loaded from `.env` or the file named by `DEPLOY_ENV_FILE`.

use prosopo_deploy::{load_env_file, run, DeployConfig, MidenConnector};
use scripts::{format_report, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    load_env_file();

    let config = DeployConfig::from_env()?;
    info!(
        endpoint = %config.network.endpoint,
        label = %config.contract.label,
        "starting deployment"
    );

    let connector = MidenConnector::new(config.network.clone());
    let report = run(&connector, &config).await?;
    print!("{}", format_report(&report));

    Ok(())
}
