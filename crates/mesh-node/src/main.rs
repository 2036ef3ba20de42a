use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use mesh_node::{DemoOptions, Loss, NodeConfig, run_demo};

#[derive(Parser)]
#[command(name = "mesh-node", about = "Bluetooth Mesh provisioner node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/mesh-node/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Provision a simulated device and exchange segmented messages with it
    Demo {
        /// Percentage of network PDUs to drop
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
        loss: u8,
        /// Length of the access payload sent to the new node
        #[arg(long, default_value_t = 60)]
        payload: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    mesh_node::logging::init_from_env(&config.logging.level);

    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::CheckConfig => {
            tracing::info!(config = %cli.config.display(), "configuration ok");
            ExitCode::SUCCESS
        }
        Command::Demo { loss, payload } => {
            let options = DemoOptions {
                loss: if loss == 0 { Loss::None } else { Loss::Random(loss) },
                payload_len: payload,
                ..DemoOptions::default()
            };
            tokio::select! {
                result = run_demo(&config, options) => match result {
                    Ok(report) => {
                        tracing::info!(
                            address = %report.node.unicast_address,
                            messages = report.messages_delivered,
                            "demo complete"
                        );
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        tracing::error!("demo failed: {e}");
                        ExitCode::FAILURE
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
