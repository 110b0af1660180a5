//! Command-line entry point for the harness
//!
//! Mostly for poking at a backend by hand: apply the session settings, or
//! provision a target plus client config and keep it alive until Ctrl+C.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use harness::services::HawkbitMgmtClient;
use harness::session::apply_backend_settings;
use harness::{HarnessOptions, ResourceScope, Session};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Provision hawkBit test fixtures for the update client")]
struct Cli {
    #[command(flatten)]
    options: HarnessOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the polling and authentication settings the tests rely on
    ConfigureBackend,

    /// Create a target and its client config, hold them until Ctrl+C
    Provision {
        /// Also upload a dummy bundle of this many bytes and assign it
        #[arg(long)]
        bundle_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    shared::logging::init_tracing(&cli.options.log_level);

    match cli.command {
        Command::ConfigureBackend => {
            let client = HawkbitMgmtClient::new(cli.options.hawkbit_instance.clone())?;
            apply_backend_settings(&client)
                .await
                .with_context(|| format!("configuring {}", cli.options.hawkbit_instance))?;
            info!("✅ Backend {} configured", cli.options.hawkbit_instance);
        }
        Command::Provision { bundle_size } => {
            let client = HawkbitMgmtClient::new(cli.options.hawkbit_instance.clone())?;
            let session = Session::with_backend(cli.options, Arc::new(client))
                .await
                .context("connecting to backend")?;
            provision(session, bundle_size).await?;
        }
    }

    Ok(())
}

async fn provision(session: Session, bundle_size: Option<usize>) -> anyhow::Result<()> {
    let mut scope = ResourceScope::new("provision");

    let result = async {
        let target = session.entities().target_in(&mut scope).await?;
        let client = session.client_config(&mut scope, &target).await?;
        println!("{}", client.path.display());

        if let Some(size) = bundle_size {
            let bundle = session.dummy_bundle(&mut scope, size).await?;
            let content = tokio::fs::read(&bundle).await?;
            let entities = session.entities();
            let module = entities.software_module_in(&mut scope).await?;
            entities.artifact_in(&mut scope, content, module).await?;
            let dist = entities.distribution_set_in(&mut scope, module).await?;
            let action = entities.assignment_in(&mut scope, dist, &target).await?;
            info!("🚀 {} assigned", action);
        }
        harness::HarnessResult::Ok(())
    }
    .await;

    if let Err(e) = &result {
        warn!("⚠️ Provisioning failed: {}", e);
    } else {
        info!("⏳ Holding fixtures until Ctrl+C");
        if let Err(e) = signal::ctrl_c().await {
            warn!("⚠️ Signal handling failed, tearing down now: {}", e);
        }
    }

    let teardown = scope.close().await;
    result.context("provisioning")?;
    teardown.context("tearing down")?;
    Ok(())
}
