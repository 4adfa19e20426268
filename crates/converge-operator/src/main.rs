//! Converge operator - declarative backup, restore and data sync controllers
//!
//! Certificate CRDs are installed here too; their controllers are library-only
//! (see `converge_operator::controller_runner::build_certificate_controllers`).

use clap::Parser;
use kube::Client;

use converge_common::telemetry::init_telemetry;
use converge_operator::config::{Cli, Commands, ControllerArgs};
use converge_operator::controller_runner::{build_backup_controllers, RunnerConfig};
use converge_operator::startup::{backup_crds, certificate_crds, ensure_crds, print_crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let mut crds = backup_crds();
        crds.extend(certificate_crds());
        print!("{}", print_crds(&crds)?);
        return Ok(());
    }

    init_telemetry(cli.telemetry())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    match cli.command() {
        Commands::InstallCrds => {
            let client = Client::try_default().await?;
            let mut crds = backup_crds();
            crds.extend(certificate_crds());
            ensure_crds(&client, crds).await
        }
        Commands::Controller(args) => run_controller(args).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    if !args.skip_crd_install {
        ensure_crds(&client, backup_crds()).await?;
    }

    let config = RunnerConfig {
        namespace: args.namespace.clone(),
        concurrency: args.concurrency,
    };
    tracing::info!(
        namespace = args.namespace.as_deref().unwrap_or("<all>"),
        concurrency = args.concurrency,
        "starting controllers"
    );
    let controllers = build_backup_controllers(client, &config, args.restic());

    futures::future::join_all(controllers).await;
    tracing::info!("controllers stopped");
    Ok(())
}
