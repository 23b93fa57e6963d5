use std::path::PathBuf;

use clap::Parser;

use crate::cli::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// portside is a self-hosted OCI registry and pull-through cache for
/// container images and helm charts
#[derive(Debug, Parser)]
#[command(name = "portside", author, styles=styles::styles())]
pub struct PortsideArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<PortsideSubcommand>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show version
    #[arg(short = 'v', long)]
    pub version: bool,
}

/// Available subcommands for running the registry
#[derive(Debug, Parser)]
pub enum PortsideSubcommand {
    /// Start the registry server
    #[command(name = "serve")]
    Serve {
        /// Port to listen on, overriding the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Remove all pull-through cache content
    #[command(name = "purge")]
    Purge,
}
