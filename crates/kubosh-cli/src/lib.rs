//! kubosh CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// kubosh - run BOSH deployments on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "kubosh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "KUBOSH_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile instance groups into Kubernetes manifests
    Compile(commands::compile::CompileArgs),
    /// Print the JSON schema of an input document
    Schema(commands::schema::SchemaArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Compile(args) => commands::compile::run(args),
            Commands::Schema(args) => commands::schema::run(args),
        }
    }
}
