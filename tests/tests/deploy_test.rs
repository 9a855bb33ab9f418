use helpers::{contract_address, Faults, LedgerCall, MemoryLedger};
use prosopo_deploy::{
    generate, run, ContractInstance, DeployError, SecretString, Stage, WordCount,
};
use tests::{
    address_of, deploy_config, with_salt, BOOTSTRAP_AMOUNT, DEPLOYER_PHRASE, FUNDER_PHRASE,
};

fn funded_ledger() -> MemoryLedger {
    let ledger = MemoryLedger::new();
    ledger.set_balance(&address_of(FUNDER_PHRASE), 10 * BOOTSTRAP_AMOUNT);
    ledger
}

#[tokio::test]
async fn first_run_funds_and_deploys_second_run_reuses() -> anyhow::Result<()> {
    let ledger = funded_ledger();
    let config = deploy_config();
    let deployer = address_of(DEPLOYER_PHRASE);

    let first = run(&ledger, &config).await?;

    assert_eq!(first.deployer, deployer);
    assert_eq!(first.deployer_balance, 0);
    assert_eq!(first.funder_balance, Some(10 * BOOTSTRAP_AMOUNT));
    assert!(first.funding.is_some());
    assert!(!first.reused);
    assert!(!first.contract.address.as_str().is_empty());
    assert_eq!(ledger.balance(&deployer), BOOTSTRAP_AMOUNT);
    assert_eq!(ledger.transfers(), 1);
    assert_eq!(ledger.deploys(), 1);
    assert!(ledger.calls().contains(&LedgerCall::Transfer {
        from: address_of(FUNDER_PHRASE),
        to: deployer.clone(),
        amount: BOOTSTRAP_AMOUNT,
    }));

    ledger.clear_calls();
    let second = run(&ledger, &config).await?;

    assert_eq!(second.contract.address, first.contract.address);
    assert!(second.reused);
    assert_eq!(second.funding, None);
    assert_eq!(second.deployer_balance, BOOTSTRAP_AMOUNT);
    assert_eq!(second.funder_balance, Some(9 * BOOTSTRAP_AMOUNT));
    assert_eq!(ledger.transfers(), 0);
    assert_eq!(ledger.deploys(), 0);
    assert_eq!(ledger.contracts().len(), 1);
    Ok(())
}

#[tokio::test]
async fn funded_deployer_is_not_topped_up() -> anyhow::Result<()> {
    let ledger = funded_ledger();
    ledger.set_balance(&address_of(DEPLOYER_PHRASE), 5);

    let report = run(&ledger, &deploy_config()).await?;

    assert_eq!(report.deployer_balance, 5);
    assert_eq!(report.funding, None);
    assert_eq!(ledger.transfers(), 0);
    assert_eq!(ledger.deploys(), 1);
    Ok(())
}

#[tokio::test]
async fn funder_balance_is_absent_without_funder() -> anyhow::Result<()> {
    let ledger = MemoryLedger::new();
    ledger.set_balance(&address_of(DEPLOYER_PHRASE), 5);
    let mut config = deploy_config();
    config.funder_mnemonic = None;

    let report = run(&ledger, &config).await?;

    assert_eq!(report.funder, None);
    assert_eq!(report.funder_balance, None);
    assert_eq!(
        ledger.count(|call| matches!(call, LedgerCall::QueryBalance(_))),
        1
    );
    Ok(())
}

#[tokio::test]
async fn funding_is_confirmed_before_resolution() -> anyhow::Result<()> {
    let ledger = funded_ledger();
    run(&ledger, &deploy_config()).await?;

    let calls = ledger.calls();
    let position = |wanted: fn(&LedgerCall) -> bool| calls.iter().position(wanted).unwrap();
    let transfer = position(|call| matches!(call, LedgerCall::Transfer { .. }));
    let lookup = position(|call| matches!(call, LedgerCall::FindContracts(_)));
    let deploy = position(|call| matches!(call, LedgerCall::DeployContract(_)));

    assert!(transfer < lookup);
    assert!(lookup < deploy);
    assert_eq!(calls.first(), Some(&LedgerCall::Connect));
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            LedgerCall::Release { had_session: true },
            LedgerCall::Disconnect
        ]
    );
    Ok(())
}

#[tokio::test]
async fn different_salts_resolve_to_different_instances() -> anyhow::Result<()> {
    let ledger = funded_ledger();

    let first = run(&ledger, &with_salt(deploy_config(), "0x01")).await?;
    let second = run(&ledger, &with_salt(deploy_config(), "0x02")).await?;

    assert_ne!(first.contract.address, second.contract.address);
    assert_ne!(first.identity_key, second.identity_key);
    assert!(!second.reused);
    assert_eq!(ledger.deploys(), 2);
    assert_eq!(ledger.contracts().len(), 2);
    // the deployer only needed funding once
    assert_eq!(ledger.transfers(), 1);
    Ok(())
}

#[tokio::test]
async fn non_identity_fields_do_not_create_new_instances() -> anyhow::Result<()> {
    let ledger = funded_ledger();
    let first = run(&ledger, &deploy_config()).await?;

    let mut changed = deploy_config();
    changed.contract.label = "prosopo-renamed".into();
    changed.contract.endowment = 1;
    changed.contract.gas_limit = 1;
    let second = run(&ledger, &changed).await?;

    assert!(second.reused);
    assert_eq!(second.contract.address, first.contract.address);
    assert_eq!(ledger.deploys(), 1);
    Ok(())
}

#[tokio::test]
async fn generated_phrase_derives_the_deployer_it_reported() -> anyhow::Result<()> {
    let (phrase, account) = generate(WordCount::Twelve)?;
    let ledger = funded_ledger();
    let mut config = deploy_config();
    config.deployer_mnemonic = SecretString::new(phrase.expose());

    let report = run(&ledger, &config).await?;

    assert_eq!(&report.deployer, account.address());
    assert_eq!(report.contract.spec.args, vec![account.address().to_string()]);
    Ok(())
}

#[tokio::test]
async fn connection_failure_stops_the_run() {
    let ledger = MemoryLedger::with_faults(Faults {
        refuse_connect: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Disconnected);
    assert!(matches!(failure.error, DeployError::Connection(_)));
    assert_eq!(
        ledger.calls(),
        vec![
            LedgerCall::Connect,
            LedgerCall::Release { had_session: false }
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_a_connection_error() {
    let ledger = MemoryLedger::with_faults(Faults {
        stall_connect: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(
        failure.error,
        DeployError::Connection("ledger not ready after 10000 ms".into())
    );
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn invalid_secret_releases_session() {
    let ledger = funded_ledger();
    let mut config = deploy_config();
    config.deployer_mnemonic = SecretString::new("correct horse battery staple");

    let failure = run(&ledger, &config).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Connected);
    assert!(matches!(failure.error, DeployError::InvalidSecret(_)));
    assert_eq!(ledger.count(|call| matches!(call, LedgerCall::QueryBalance(_))), 0);
    assert_eq!(ledger.releases(), 1);
    assert_eq!(ledger.count(|call| *call == LedgerCall::Disconnect), 1);
}

#[tokio::test]
async fn empty_funder_fails_funding() {
    // funder holds nothing
    let ledger = MemoryLedger::new();

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(failure.stage, Stage::AccountDerived);
    match failure.error {
        DeployError::FundingTransferFailed(reason) => {
            assert!(reason.contains("insufficient balance"), "{reason}")
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ledger.count(|call| matches!(call, LedgerCall::FindContracts(_))), 0);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn missing_funder_fails_funding() {
    let ledger = funded_ledger();
    let mut config = deploy_config();
    config.funder_mnemonic = None;

    let failure = run(&ledger, &config).await.unwrap_err();

    assert!(matches!(failure.error, DeployError::FundingTransferFailed(_)));
    assert_eq!(ledger.transfers(), 0);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn rejected_transfer_fails_funding() {
    let ledger = funded_ledger();
    ledger.set_faults(Faults {
        reject_transfers: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(
        failure.error,
        DeployError::FundingTransferFailed("transfer failed: transaction rejected".into())
    );
    assert_eq!(ledger.deploys(), 0);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_funding_times_out() {
    let ledger = funded_ledger();
    ledger.set_faults(Faults {
        stall_transfers: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(failure.stage, Stage::AccountDerived);
    assert_eq!(
        failure.error,
        DeployError::FundingTransferFailed("not confirmed within 120000 ms".into())
    );
    assert_eq!(ledger.transfers(), 1);
    assert_eq!(ledger.deploys(), 0);
    assert_eq!(ledger.count(|call| matches!(call, LedgerCall::FindContracts(_))), 0);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn rejected_deployment_is_fatal() {
    let ledger = funded_ledger();
    ledger.set_faults(Faults {
        reject_deploys: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(failure.stage, Stage::FundingChecked);
    assert!(matches!(failure.error, DeployError::DeploymentRejected(_)));
    assert!(ledger.contracts().is_empty());
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_deployment_times_out() {
    let ledger = funded_ledger();
    ledger.set_faults(Faults {
        stall_deploys: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(
        failure.error,
        DeployError::DeploymentRejected("not confirmed within 120000 ms".into())
    );
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn ambiguous_lookup_is_not_guessed() {
    let ledger = funded_ledger();
    let config = deploy_config();
    let spec = config.contract.spec_for(&address_of(DEPLOYER_PHRASE));
    for _ in 0..2 {
        ledger.insert_contract(ContractInstance {
            address: contract_address(&spec.identity_key()),
            spec: spec.clone(),
        });
    }

    let failure = run(&ledger, &config).await.unwrap_err();

    assert_eq!(
        failure.error,
        DeployError::LookupAmbiguous {
            key: spec.identity_key().to_string(),
            count: 2,
        }
    );
    assert_eq!(ledger.deploys(), 0);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn failing_balance_query_is_reported() {
    let ledger = MemoryLedger::with_faults(Faults {
        fail_balance_queries: true,
        ..Faults::default()
    });

    let failure = run(&ledger, &deploy_config()).await.unwrap_err();

    assert_eq!(
        failure.error,
        DeployError::LedgerQuery("query failed: state unavailable".into())
    );
    assert_eq!(ledger.transfers(), 0);
}

#[tokio::test]
async fn accounts_are_registered_before_funding() -> anyhow::Result<()> {
    let ledger = funded_ledger();
    run(&ledger, &deploy_config()).await?;

    let calls = ledger.calls();
    assert_eq!(
        &calls[1..3],
        &[
            LedgerCall::RegisterAccount(address_of(DEPLOYER_PHRASE)),
            LedgerCall::RegisterAccount(address_of(FUNDER_PHRASE)),
        ]
    );
    assert_eq!(
        &calls[3..5],
        &[
            LedgerCall::QueryBalance(address_of(DEPLOYER_PHRASE)),
            LedgerCall::QueryBalance(address_of(FUNDER_PHRASE)),
        ]
    );
    Ok(())
}
