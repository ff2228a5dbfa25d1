//! CLI dispatcher for the node binary.
//!
//! Two physical roles share one codebase: the compute node owns the
//! accelerator and serves the stream; the presenter sources video and
//! displays results.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

/// Parse CLI arguments and run the requested role.
pub fn dispatch() -> Result<()> {
    let cli = AppCli::parse();
    match cli.command {
        Command::Compute(args) => crate::compute::run(args),
        Command::Present(args) => crate::present::run(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "edge-node",
    version,
    about = "Edge AI vision node: streaming inference over the LAN"
)]
struct AppCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve detection or enhancement on the accelerator node.
    Compute(ComputeArgs),
    /// Source video, stream it to the compute node, and show results.
    Present(PresentArgs),
}

#[derive(Debug, Args)]
pub struct ComputeArgs {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
    /// Listening port; overrides GRPC_PORT.
    #[arg(long)]
    pub port: Option<u16>,
    /// Default inference graph; overrides HEF_PATH.
    #[arg(long)]
    pub hef: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PresentArgs {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
    /// Compute peer `host:port`; overrides GRPC_TARGET.
    #[arg(long)]
    pub target: Option<String>,
    /// Frame source path; overrides VIDEO_PATH.
    #[arg(long)]
    pub video: Option<PathBuf>,
}
