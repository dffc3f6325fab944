//! tagwire demo driver.
//!
//! ```text
//! tagwire server [--address A] [--port P] [--count N]
//!     → listen, admit one client, receive N little-endian u32s, print them
//!
//! tagwire client [--address A] [--port P] [--count N] [--start S]
//!     → connect, send S, S+1, ... (N values)
//! ```
//!
//! Defaults come from the `[demo]` section of the configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use tagwire::config::{read_config, validate_demo, ConfigError, DemoConfig};
use tagwire::demo;
use tagwire::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "tagwire")]
#[command(about = "Point-to-point tagged messaging demo", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept one client and print the integers it sends
    Server(DemoArgs),
    /// Connect to the server and send a run of integers
    Client(DemoArgs),
}

#[derive(Args)]
struct DemoArgs {
    #[arg(short, long)]
    address: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Number of integers to transfer.
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// First integer the client sends.
    #[arg(short, long)]
    start: Option<u32>,
}

impl DemoArgs {
    fn apply(&self, demo: &mut DemoConfig) {
        if let Some(address) = &self.address {
            demo.address = address.clone();
        }
        if let Some(port) = self.port {
            demo.port = port;
        }
        if let Some(count) = self.count {
            demo.count = count;
        }
        if let Some(start) = self.start {
            demo.start = start;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = read_config(cli.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!("tagwire v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let (Commands::Server(args) | Commands::Client(args)) = &cli.command;
    args.apply(&mut config.demo);
    if let Err(errors) = validate_demo(&config.demo, &config.worker) {
        for err in &errors {
            tracing::error!(error = %err, "Invalid demo settings");
        }
        return Err(ConfigError::Validation(errors).into());
    }

    match cli.command {
        Commands::Server(_) => {
            let values = demo::run_server(&config, &config.demo).await?;
            let rendered: Vec<String> = values.iter().map(u32::to_string).collect();
            println!("Received: {}", rendered.join(" "));
        }
        Commands::Client(_) => {
            let sent = demo::run_client(&config, &config.demo).await?;
            println!("Sent {} integers ({} bytes)", config.demo.count, sent);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
