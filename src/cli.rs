//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-tenant JWT authorizer for API Gateway (AWS Lambda)
#[derive(Parser, Debug)]
#[command(name = "tenant-authorizer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TENANT_AUTHORIZER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to the Lambda runtime loop)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the Lambda runtime loop (default)
    Serve,

    /// Evaluate one token locally and print the decision
    Check {
        /// Bearer token (with or without the `Bearer` scheme)
        #[arg(long, env = "TENANT_AUTHORIZER_TOKEN", hide_env_values = true)]
        token: String,

        /// Method ARN of the request being authorized
        #[arg(long)]
        method_arn: String,
    },

    /// Fetch one issuer's JWKS and list its keys
    Keys {
        /// User pool id (e.g. `us-east-1_AbCdEf123`)
        #[arg(long)]
        issuer: String,
    },
}
