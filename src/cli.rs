use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "procrig", version, about = "Single-host process supervisor")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Supervisor home holding the registry and default logs
    #[arg(long, global = true, env = "PROCRIG_HOME")]
    pub home: Option<PathBuf>,
}

/// Options shared by `run` and `watch`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Process name
    pub name: String,
    /// Shell command to run (reused from the registry when omitted)
    #[arg(short, long)]
    pub command: Option<String>,
    /// Working directory (reused from the registry when omitted)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,
    /// Env-config file, relative to the working directory
    #[arg(long)]
    pub config: Option<String>,
    /// Restart even if the process is running
    #[arg(long)]
    pub force: bool,
    /// Pull the latest changes before restarting
    #[arg(long)]
    pub fetch: bool,
    /// Extra environment variables (KEY=VALUE)
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
    /// Stdout log file
    #[arg(long)]
    pub stdout: Option<PathBuf>,
    /// Stderr log file
    #[arg(long)]
    pub stderr: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start or restart a process
    Run(RunArgs),
    /// Stop a process, keeping its record
    Stop {
        /// Process name
        name: String,
    },
    /// Stop a process and forget it
    Delete {
        /// Process name
        name: String,
    },
    /// Show process status
    #[command(aliases = ["ls", "status"])]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a process's logs
    Logs {
        /// Process name
        name: String,
        /// Number of trailing lines to show (all when omitted)
        #[arg(short = 'n', long)]
        lines: Option<usize>,
        /// Only show stdout
        #[arg(long, conflicts_with = "stderr")]
        stdout: bool,
        /// Only show stderr
        #[arg(long)]
        stderr: bool,
        /// Keep printing new output
        #[arg(short, long)]
        follow: bool,
    },
    /// Run a process and restart it when its directory changes
    Watch(RunArgs),
    /// Remove records of processes that are no longer running
    Clean {
        /// Stop and remove every process
        #[arg(long)]
        all: bool,
    },
    /// Serve the HTTP API and live status feed
    Dashboard {
        /// Port to listen on
        #[arg(short, long, default_value_t = 4040)]
        port: u16,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::aot::Shell,
    },
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
