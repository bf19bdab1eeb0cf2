use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shardswap_deploy::CONFIG_FILENAME;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "shardswap")]
#[command(
    author,
    version,
    about = "Deploy and bootstrap a Uniswap v3 style DEX on sharded EVM chains"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "SHARDSWAP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// A missing file is not an error: built-in defaults and `SHARDSWAP_*`
    /// environment variables are used instead.
    #[arg(short, long, global = true, alias = "conf", env = "SHARDSWAP_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// The network to target. Defaults to `default_network` from the config.
    #[arg(short, long, global = true, env = "SHARDSWAP_NETWORK")]
    pub network: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Deploy the DEX stack. Contracts already in the deployment record are
    /// reused.
    Deploy {
        /// Deploy these contracts again even if the record has them.
        #[arg(long, value_delimiter = ',')]
        redeploy: Vec<String>,
    },

    /// Deploy a single contract of the stack, plus whatever it depends on.
    DeployContract {
        /// Logical name, e.g. `factory` or `router`.
        id: String,
    },

    /// Deploy test tokens and bootstrap a pool: wrap, create the pool, add
    /// liquidity and swap.
    Workflow {
        /// Pool two fresh test tokens instead of one token against the
        /// wrapped native asset.
        #[arg(long)]
        two_tokens: bool,

        /// Refuse to swap without an output minimum.
        #[arg(long)]
        production: bool,
    },

    /// Show the deployment record of the network.
    Status,

    /// Write the default configuration to the config path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    /// Logical names to redeploy for this command.
    pub fn redeploy(&self) -> Vec<String> {
        match self {
            Self::Deploy { redeploy } => redeploy.clone(),
            _ => Vec::new(),
        }
    }
}
