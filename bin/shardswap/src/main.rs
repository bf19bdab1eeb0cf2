//! shardswap deploys a Uniswap v3 style DEX to a sharded EVM chain and
//! bootstraps its first pool.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio::sync::watch;

use cli::{Cli, Command};
use shardswap_deploy::{
    DeploymentOutcome, DeploymentStore, FileDeploymentStore, FsArtifactLoader, NetworkConfig,
    NetworkId, Orchestrator, RpcChainClient, ShardswapConfig, Validation, Workflow, Zone,
    run_workflow, stack::dex_stack,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if let Command::InitConfig { force } = cli.command {
        return init_config(&cli.config, force);
    }

    let config = ShardswapConfig::load(&cli.config)?;
    let (network, network_config) = config.network(cli.network.as_deref())?;
    let store = FileDeploymentStore::new(&config.deployments_dir);

    if cli.command == Command::Status {
        return print_status(&store, &network, network_config);
    }

    let signing = network_config.signing(&network.name)?;
    let sender = signing.sender();
    let client = RpcChainClient::connect(network_config.rpc_client_config()?, signing).await?;
    let loader = FsArtifactLoader::new(config.artifacts.paths.clone());

    // Ctrl-C stops the run between steps; the record is already flushed.
    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after the current step...");
            abort_tx.send_replace(true);
        }
    });

    let mut orchestrator = Orchestrator::new(&client, &store)
        .with_abort(abort_rx)
        .with_redeploy(cli.command.redeploy());
    if let Some(constraint) = &network_config.address_constraint {
        orchestrator = orchestrator.with_constraint(constraint.clone());
    }
    if let Some(dir) = &config.artifacts.metadata_dir {
        orchestrator = orchestrator.with_metadata_dir(dir);
    }

    tracing::info!(
        %network,
        %sender,
        signing = %network_config.signing,
        record = %store.record_path(&network.name).display(),
        "Target network"
    );

    match cli.command {
        Command::Deploy { .. } => {
            let plan = dex_stack(&loader)?;
            let outcome = orchestrator.run(&plan, &network).await?;
            report_deployment(&outcome);
        }
        Command::DeployContract { id } => {
            let plan = dex_stack(&loader)?.restricted_to(&id)?;
            let outcome = orchestrator.run(&plan, &network).await?;
            report_deployment(&outcome);
        }
        Command::Workflow {
            two_tokens,
            production,
        } => {
            let workflow = if two_tokens {
                Workflow::TwoTokens
            } else {
                Workflow::SingleToken
            };
            let mut settings = config.bootstrap.clone();
            settings.production |= production;

            let outcome = run_workflow(workflow, &orchestrator, &loader, &network, settings).await?;
            report_deployment(&outcome.deployment);

            let result = &outcome.bootstrap;
            if let Some(pool) = &result.pool {
                println!(
                    "Pool {} ({} / {}, fee {})",
                    pool.pool, pool.token0, pool.token1, pool.fee
                );
            }
            if let Some(liquidity) = &result.liquidity {
                println!(
                    "Position #{}: {} / {} in ticks [{}, {}]",
                    liquidity.token_id,
                    liquidity.amount0,
                    liquidity.amount1,
                    liquidity.tick_lower,
                    liquidity.tick_upper
                );
            }
            if let Some(swap) = &result.swap {
                println!("Swapped {} for {}", swap.amount_in, swap.amount_out);
            }
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
            if result.unguarded_swap {
                println!("warning: the swap ran without an output minimum");
            }
        }
        Command::Status | Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    ShardswapConfig::default().save_to_file(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn report_deployment(outcome: &DeploymentOutcome) {
    for id in &outcome.deployed {
        if let Some(address) = outcome.address(id) {
            println!("deployed {id}: {address}");
        }
    }
    for id in &outcome.reused {
        if let Some(address) = outcome.address(id) {
            println!("reused   {id}: {address}");
        }
    }
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }
}

fn print_status(
    store: &FileDeploymentStore,
    network: &NetworkId,
    network_config: &NetworkConfig,
) -> Result<()> {
    let record = store
        .load(network)
        .context("Failed to load the deployment record")?;

    if record.is_empty() {
        println!("No deployments recorded for {network}");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Contract",
        "Address",
        "Zone",
        "Placement",
        "Transaction",
        "Deployed at",
    ]);

    for (name, entry) in &record.entries {
        let placement = match network_config
            .address_constraint
            .as_ref()
            .map(|c| c.validate(entry.address))
        {
            None => "-".to_string(),
            Some(Validation::Ok) => "ok".to_string(),
            Some(Validation::Violation(violation)) => violation.to_string(),
        };
        table.add_row(vec![
            name.clone(),
            entry.address.to_string(),
            Zone::from_address(entry.address).to_string(),
            placement,
            entry
                .transaction_hash
                .map(|h| h.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.timestamp.to_rfc3339(),
        ]);
    }
    for (name, pending) in &record.pending {
        table.add_row(vec![
            name.clone(),
            "pending".to_string(),
            "-".to_string(),
            "-".to_string(),
            pending.transaction_hash.to_string(),
            pending.submitted_at.to_rfc3339(),
        ]);
    }

    println!("{network}");
    println!("{table}");
    Ok(())
}
