use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod archive;
mod commands;

#[derive(Parser)]
#[command(name = "modelctl", version, about = "Deploy PyTorch models as SageMaker async endpoints")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a model (or a new version of an existing model) to SageMaker
    Deploy(commands::deploy::DeployArgs),
    /// Enable or disable autoscaling for a SageMaker endpoint
    Autoscale(commands::autoscale::AutoscaleArgs),
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Deploy(args) => commands::deploy::run(args).await,
        Commands::Autoscale(args) => commands::autoscale::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
