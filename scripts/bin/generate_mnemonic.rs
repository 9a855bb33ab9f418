//! Generates a new secret phrase and prints it with the account it controls.
//!
//! Nothing is sent to the network and nothing is written to disk; store the phrase
//! yourself.

use clap::Parser;
use prosopo_deploy::{generate, WordCount};
use scripts::{format_generated, init_tracing};

#[derive(Parser)]
#[command(about = "Generate a secret phrase and derive its account")]
struct Args {
    /// Number of words: 12, 15, 18, 21 or 24
    #[arg(long, default_value_t = 12)]
    words: usize,

    /// Print `{address, mnemonic}` as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let (phrase, account) = generate(WordCount::try_from(args.words)?)?;
    print!("{}", format_generated(&account, &phrase, args.json)?);

    Ok(())
}
