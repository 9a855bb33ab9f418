//! Shared output and logging setup for the command-line scripts
//!
//! Reports go to stdout; logs go to stderr so the report stays machine-readable.

use std::fmt::Write as _;

use prosopo_deploy::{DeployReport, SecretPhrase, SigningAccount};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct GeneratedAccount<'a> {
    address: &'a str,
    mnemonic: &'a str,
}

/// Renders a freshly generated account, phrase included.
pub fn format_generated(
    account: &SigningAccount,
    phrase: &SecretPhrase,
    json: bool,
) -> anyhow::Result<String> {
    if json {
        let generated = GeneratedAccount {
            address: account.address().as_str(),
            mnemonic: phrase.expose(),
        };
        return Ok(format!("{}\n", serde_json::to_string_pretty(&generated)?));
    }

    Ok(format!(
        "Address: {}\nMnemonic: {}\n",
        account.address(),
        phrase.expose()
    ))
}

/// Renders the outcome of a deployment run.
pub fn format_report(report: &DeployReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deployer Address: {}", report.deployer);
    let _ = writeln!(out, "Deployer Balance: {}", report.deployer_balance);
    if let Some(funder) = &report.funder {
        let _ = writeln!(out, "Funder Address: {funder}");
    }
    if let Some(balance) = report.funder_balance {
        let _ = writeln!(out, "Funder Balance: {balance}");
    }
    if let Some(funding) = &report.funding {
        let _ = writeln!(out, "Funding Transaction: {funding}");
    }
    let outcome = if report.reused { "Reused" } else { "Deployed" };
    let _ = writeln!(out, "{outcome} contract `{}`", report.contract.spec.label);
    let _ = writeln!(out, "Contract Address: {}", report.contract.address);
    out
}
