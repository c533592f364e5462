//! easyconnect-agent main entry point
//!
//! Handles CLI parsing, logging setup, and agent startup. Fatal commands
//! (restart, factory reset) make the process exit; an external supervisor
//! is expected to start it again.

use clap::{Parser, Subcommand};
use easyconnect_agent::{AgentBuilder, APP_NAME, VERSION};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Device connectivity agent
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/easyconnect-agent/config.json"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the agent
    Start {
        /// HTTP API bind address
        #[arg(long, default_value = "0.0.0.0:80")]
        http_addr: String,

        /// Push channel bind address
        #[arg(long, default_value = "0.0.0.0:81")]
        push_addr: String,

        /// Console bind address (default: 0.0.0.0:<configured port>)
        #[arg(long)]
        console_addr: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Start {
            http_addr,
            push_addr,
            console_addr,
        } => {
            info!("Starting {} v{} with config {}", APP_NAME, VERSION, cli.config);

            let mut builder = AgentBuilder::new(&cli.config)
                .http_addr(http_addr)
                .push_addr(push_addr);
            if let Some(addr) = console_addr {
                builder = builder.console_addr(addr);
            }

            let agent = builder.start().await?;
            if let Some(addr) = agent.console_addr() {
                info!("Console available at {}", addr);
            }
            info!("HTTP API at {}", agent.http_addr());
            info!("Push channel at {}", agent.push_addr());

            match agent.run().await {
                Some(kind) => {
                    info!("{:?} requested, exiting for supervisor restart", kind);
                }
                None => {
                    info!("Shutting down agent");
                }
            }
            Ok(())
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}
