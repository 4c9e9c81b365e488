use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::debug;

use fipwatch::cloud::CloudClient;
use fipwatch::config::{Args, Command, Config};
use fipwatch::engine::Fleet;
use fipwatch::error::Result;
use fipwatch::logger::init_logger;
use fipwatch::remote::SshShell;
use fipwatch::store::{JsonFileStore, Store};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logger(args.debug_log.as_deref(), args.verbose)?;

    let config = Config::from_args(args)?;
    debug!("Using data file {}", config.data_file.display());

    let store = Arc::new(Store::open(Arc::new(JsonFileStore::new(&config.data_file)))?);
    let cloud = CloudClient::new(config.cloud_region.clone(), config.cloud_timeout)?;
    let fleet = Fleet::new(store, Arc::new(SshShell::new()), cloud, config.limits);

    match config.command {
        Command::RefreshStatus => print_json(&fleet.refresh_agent_statuses().await?),
        Command::RefreshCloud => print_json(&fleet.refresh_cloud_inventory().await?),
        Command::View => print_json(&fleet.get_merged_view()),
        Command::Accounts => print_json(&fleet.account_summaries()),
        Command::Addresses => print_json(&fleet.inventory_listing()),
        Command::Probe { host_id, agent_id } => print_json(&fleet.probe_agent(host_id, agent_id).await?),
        Command::Control {
            host_id,
            agent_id,
            action,
        } => print_json(&fleet.control_agent(host_id, agent_id, &action).await?),
        Command::Rebind {
            host_id,
            agent_id,
            account,
        } => print_json(&fleet.rebind_agent(host_id, agent_id, &account).await?),
        Command::Logs {
            host_id,
            agent_id,
            lines,
        } => {
            println!("{}", fleet.fetch_logs(host_id, agent_id, lines).await?);
            Ok(())
        }
        Command::RefreshLogs { lines } => print_json(&fleet.refresh_logs(lines).await?),
    }
}
