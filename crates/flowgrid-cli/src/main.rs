use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "flowgrid",
    about = "flowgrid: flow-network scheduling cost model",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price every task class of a cluster snapshot.
    ///
    /// The snapshot is a JSON document with `machines` (resource topology
    /// trees) and `tasks` (task descriptors). Running tasks are folded into
    /// machine availability before pricing.
    Arcs {
        /// Cluster snapshot (JSON)
        #[arg(short, long)]
        cluster: String,
        /// Cost model config (TOML); defaults apply when omitted
        #[arg(short = 'C', long)]
        config: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Cost model configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a flowgrid.toml with default values
    Init {
        #[arg(short, long, default_value = "flowgrid.toml")]
        output: String,
    },
    /// Parse and validate a config file
    Check {
        #[arg(short, long, default_value = "flowgrid.toml")]
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowgrid=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Arcs { cluster, config, format } => {
            commands::arcs::arcs(&cluster, config.as_deref(), &format)
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { output } => commands::config::init(&output),
            ConfigAction::Check { path } => commands::config::check(&path),
        },
    }
}
