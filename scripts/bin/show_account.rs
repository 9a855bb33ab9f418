//! Prints the address controlled by the configured deployer (or funder) phrase, so it
//! can be funded by hand. The phrase itself is never printed.

use anyhow::Context;
use clap::Parser;
use prosopo_deploy::{keys::derive_from_str, load_env_file, DeployConfig};
use scripts::init_tracing;

#[derive(Parser)]
#[command(about = "Show the address derived from the configured secret phrase")]
struct Args {
    /// Show the funding account instead of the deployer
    #[arg(long)]
    funder: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    load_env_file();
    let args = Args::parse();

    let config = DeployConfig::from_env()?;
    let mnemonic = if args.funder {
        config
            .funder_mnemonic
            .as_ref()
            .context("FUNDER_MNEMONIC is not set")?
    } else {
        &config.deployer_mnemonic
    };

    let account = derive_from_str(mnemonic.expose())?;
    println!("Address: {}", account.address());

    Ok(())
}
