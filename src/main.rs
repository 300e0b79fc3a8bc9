//! node-deployer - builds ignition images for swarm nodes and writes them to disk.

use std::{net::IpAddr, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::lib::{
    config::types::Settings, ignition::template::NodeSettings, orchestrator::types::Deployer,
};

mod lib {
    pub mod artifact;
    pub mod automation;
    pub mod config;
    pub mod ignition;
    pub mod orchestrator;
    pub mod readiness;
    pub mod tasks;
    pub mod validation;

    #[cfg(test)]
    pub mod testing;
}

#[derive(Parser, Debug)]
#[command(name = "node-deployer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the configuration file
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Configuration file, relative to the project root. Paths in it resolve
    /// against its directory
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Configuration tables to merge, in order
    #[arg(long = "config-label", default_values = ["default", "cli"])]
    config_labels: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a configuration document into an ignition image
    JsonToImg {
        /// Configuration document
        json: PathBuf,

        /// Where to write the image
        img: PathBuf,
    },

    /// Render the node's configuration and convert it into an ignition image
    CreateImg {
        #[command(flatten)]
        node: NodeArgs,

        /// Where to write the image (default: the build dir)
        #[arg(long)]
        img: Option<PathBuf>,
    },

    /// Validate the ignition image in the build dir
    Validate,

    /// Validate the ignition image in the build dir and write it to a device
    WriteDisk {
        /// Target block device, e.g. /dev/sdb
        device: PathBuf,
    },

    /// Create, validate and write an ignition image in one go
    CreateDisk {
        /// Target block device, e.g. /dev/sdb
        device: PathBuf,

        #[command(flatten)]
        node: NodeArgs,
    },
}

#[derive(Args, Debug)]
struct NodeArgs {
    #[arg(long, default_value = "node")]
    hostname: String,

    /// Hashed login password for the root user
    #[arg(long, default_value = "")]
    password: String,

    /// Address of the swarm manager
    #[arg(long)]
    switch_ip: IpAddr,

    #[arg(long, default_value = "4789")]
    switch_port: u16,

    #[arg(long)]
    swarm_token: String,
}

impl From<NodeArgs> for NodeSettings {
    fn from(args: NodeArgs) -> Self {
        NodeSettings {
            hostname: args.hostname,
            password: args.password,
            switch_ip: args.switch_ip,
            switch_port: args.switch_port,
            swarm_token: args.swarm_token,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let project_root = std::path::absolute(&cli.project_root)
        .with_context(|| format!("invalid project root {}", cli.project_root.display()))?;
    let settings = Settings::from_file(&project_root.join(&cli.config), &cli.config_labels)
        .context("failed to load configuration")?;
    info!(project_root = %settings.paths.project_root.display(), "Configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted, tearing down (interrupt again to exit now)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Interrupted twice, exiting without teardown");
                std::process::exit(130);
            }
        }
    });

    let deployer = Deployer::connect(settings, cancel).context("failed to connect to Docker")?;
    run(&deployer, cli.command).await
}

async fn run(deployer: &Deployer, command: Commands) -> Result<ExitCode> {
    let paths = &deployer.settings.paths;
    match command {
        Commands::JsonToImg { json, img } => {
            let img = deployer.json_to_img(&json, &img).await?;
            info!(image = %img.display(), "Done");
        }
        Commands::CreateImg { node, img } => {
            let img = img.unwrap_or_else(|| paths.image_path());
            let img = deployer.create_img(&node.into(), &img).await?;
            info!(image = %img.display(), "Done");
        }
        Commands::Validate => {
            let outcome = deployer.validate().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.valid {
                error!("Ignition image is invalid");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::WriteDisk { device } => {
            deployer.write_disk(&device).await?;
        }
        Commands::CreateDisk { device, node } => {
            deployer.create_ignition_disk(&device, &node.into()).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
